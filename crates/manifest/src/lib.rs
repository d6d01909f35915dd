//! Forensic manifest engine for custody.
//!
//! This crate generates tamper-evident manifests over a data payload and its
//! attachments, validates candidate content against a stored manifest, and
//! defines the audit entries that record each chain-of-custody step.

pub mod audit;
pub mod manifest;
pub mod schema;
pub mod validation;

pub use audit::{AuditAction, AuditEntry, AuditLog, AuditResult, IntegrityDetails};
pub use manifest::{
    canonical_manifest_json, generate_manifest, AttachmentSet, ForensicManifest,
    MANIFEST_FILE_NAME,
};
pub use validation::{validate_manifest, ValidationVerdict};
