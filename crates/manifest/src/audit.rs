//! Audit trail types for chain-of-custody events.

use crate::validation::ValidationVerdict;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The workflow phase that produced an audit entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuditAction {
    CaseCreate,
    CaseExport,
    CaseImport,
    ConfirmationCreate,
    ConfirmationExport,
    ConfirmationImport,
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AuditAction::CaseCreate => "case-create",
            AuditAction::CaseExport => "case-export",
            AuditAction::CaseImport => "case-import",
            AuditAction::ConfirmationCreate => "confirmation-create",
            AuditAction::ConfirmationExport => "confirmation-export",
            AuditAction::ConfirmationImport => "confirmation-import",
        };
        f.write_str(s)
    }
}

/// How a workflow phase ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditResult {
    Success,
    /// Integrity validation failed; nothing was accepted.
    Rejected,
    /// The operation aborted with an error.
    Failure,
}

/// Integrity check outcome attached to import entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityDetails {
    pub is_valid: bool,
    pub data_valid: bool,
    pub manifest_valid: bool,
    pub images_checked: usize,
    pub images_valid: usize,
    pub errors: Vec<String>,
}

impl From<&ValidationVerdict> for IntegrityDetails {
    fn from(verdict: &ValidationVerdict) -> Self {
        Self {
            is_valid: verdict.is_valid,
            data_valid: verdict.data_valid,
            manifest_valid: verdict.manifest_valid,
            images_checked: verdict.images_checked(),
            images_valid: verdict.images_valid(),
            errors: verdict.errors.clone(),
        }
    }
}

/// A single audit log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Sequence number, assigned by the log.
    pub seq: u64,
    /// When the phase started.
    pub started_at: DateTime<Utc>,
    /// Duration in milliseconds.
    pub duration_ms: u64,
    pub action: AuditAction,
    pub result: AuditResult,
    /// Examiner who performed the action.
    pub user: String,
    pub case_number: Option<String>,
    /// Artifact produced or consumed (bundle or package path).
    pub file_name: Option<String>,
    /// Manifest hash produced or checked.
    pub manifest_hash: Option<String>,
    pub integrity: Option<IntegrityDetails>,
    pub error: Option<String>,
}

impl AuditEntry {
    /// Start an entry for an action; the result defaults to success.
    pub fn new(action: AuditAction, user: impl Into<String>) -> Self {
        Self {
            seq: 0,
            started_at: Utc::now(),
            duration_ms: 0,
            action,
            result: AuditResult::Success,
            user: user.into(),
            case_number: None,
            file_name: None,
            manifest_hash: None,
            integrity: None,
            error: None,
        }
    }

    pub fn with_case(mut self, case_number: impl Into<String>) -> Self {
        self.case_number = Some(case_number.into());
        self
    }

    pub fn with_file(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }

    pub fn with_manifest_hash(mut self, hash: impl Into<String>) -> Self {
        self.manifest_hash = Some(hash.into());
        self
    }

    /// Attach a verdict; an invalid verdict marks the entry as rejected.
    pub fn with_verdict(mut self, verdict: &ValidationVerdict) -> Self {
        if !verdict.is_valid {
            self.result = AuditResult::Rejected;
        }
        self.integrity = Some(IntegrityDetails::from(verdict));
        self
    }

    /// Mark the entry as failed with an error message.
    pub fn failed(mut self, error: impl fmt::Display) -> Self {
        self.result = AuditResult::Failure;
        self.error = Some(error.to_string());
        self
    }

    /// Stamp the duration since `started_at`.
    pub fn finish(mut self) -> Self {
        let elapsed = Utc::now() - self.started_at;
        self.duration_ms = elapsed.num_milliseconds().max(0) as u64;
        self
    }
}

/// Collection of audit entries (written as JSONL).
#[derive(Debug, Clone, Default)]
pub struct AuditLog {
    entries: Vec<AuditEntry>,
    next_seq: u64,
}

impl AuditLog {
    /// Create a new empty audit log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry to the audit log, assigning its sequence number.
    pub fn add(&mut self, mut entry: AuditEntry) -> u64 {
        entry.seq = self.next_seq;
        self.next_seq += 1;
        let seq = entry.seq;
        self.entries.push(entry);
        seq
    }

    /// Get all entries.
    pub fn entries(&self) -> &[AuditEntry] {
        &self.entries
    }

    /// Entries recorded for one case.
    pub fn for_case<'a>(&'a self, case_number: &'a str) -> impl Iterator<Item = &'a AuditEntry> {
        self.entries
            .iter()
            .filter(move |e| e.case_number.as_deref() == Some(case_number))
    }

    /// Sequence number the next entry will receive.
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    /// Convert to JSONL format.
    pub fn to_jsonl(&self) -> String {
        self.entries
            .iter()
            .filter_map(|e| serde_json::to_string(e).ok())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Parse from JSONL format.
    pub fn from_jsonl(content: &str) -> Result<Self, serde_json::Error> {
        let mut log = Self::new();
        for line in content.lines() {
            if !line.trim().is_empty() {
                let entry: AuditEntry = serde_json::from_str(line)?;
                log.entries.push(entry);
            }
        }
        if let Some(last) = log.entries.last() {
            log.next_seq = last.seq + 1;
        }
        Ok(log)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{generate_manifest, AttachmentSet};
    use crate::validation::validate_manifest;

    #[test]
    fn test_audit_log_jsonl() {
        let mut log = AuditLog::new();
        log.add(
            AuditEntry::new(AuditAction::CaseExport, "examiner-1")
                .with_case("CASE-001")
                .with_file("CASE-001.tar.gz")
                .finish(),
        );
        log.add(AuditEntry::new(AuditAction::CaseImport, "examiner-2").failed("disk full"));

        let jsonl = log.to_jsonl();
        let parsed = AuditLog::from_jsonl(&jsonl).unwrap();
        assert_eq!(parsed.entries().len(), 2);
        assert_eq!(parsed.next_seq(), 2);
        assert_eq!(parsed.entries()[1].result, AuditResult::Failure);
        assert_eq!(parsed.entries()[1].error.as_deref(), Some("disk full"));
        assert!(jsonl.contains("\"action\":\"case-export\""));
    }

    #[test]
    fn test_rejected_verdict_marks_entry() {
        let attachments: AttachmentSet = [("a.png", vec![1u8, 2, 3])].into_iter().collect();
        let manifest = generate_manifest("data", &attachments, None).unwrap();
        let verdict = validate_manifest("tampered", &attachments, &manifest).unwrap();

        let entry = AuditEntry::new(AuditAction::CaseImport, "examiner")
            .with_case("CASE-9")
            .with_verdict(&verdict);
        assert_eq!(entry.result, AuditResult::Rejected);
        let integrity = entry.integrity.unwrap();
        assert!(!integrity.data_valid);
        assert_eq!(integrity.images_checked, 1);
        assert_eq!(integrity.images_valid, 1);
        assert_eq!(integrity.errors, verdict.errors);
    }

    #[test]
    fn test_for_case_filters() {
        let mut log = AuditLog::new();
        log.add(AuditEntry::new(AuditAction::CaseCreate, "u").with_case("A"));
        log.add(AuditEntry::new(AuditAction::CaseCreate, "u").with_case("B"));
        log.add(AuditEntry::new(AuditAction::CaseExport, "u").with_case("A"));
        let seqs: Vec<u64> = log.for_case("A").map(|e| e.seq).collect();
        assert_eq!(seqs, vec![0, 2]);
    }
}
