//! Chain-of-custody workflows for custody.
//!
//! Case bundles and confirmation packages are sealed with a forensic
//! manifest on export and validated on import. Storage and audit
//! persistence sit behind the [`BlobStore`] and [`AuditSink`] traits.

pub mod bundle;
pub mod case;
pub mod config;
pub mod confirmation;
pub mod sink;
pub mod store;
pub mod workflow;

pub use bundle::{read_bundle, verify_bundle_file, write_bundle, CaseBundle};
pub use case::{CaseData, CaseFile};
pub use config::WorkflowConfig;
pub use confirmation::{ConfirmationPackage, ConfirmationRecord, StoredConfirmation};
pub use sink::{read_audit_log, AuditSink, JsonlAuditSink, MemoryAuditSink};
pub use store::{BlobStore, FsBlobStore, MemoryBlobStore};
pub use workflow::{ExportReport, ImportReport, Workflow};
