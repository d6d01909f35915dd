//! Audit sinks that persist chain-of-custody entries.

use async_trait::async_trait;
use custody_common::Result;
use custody_manifest::{AuditEntry, AuditLog};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

/// Destination for audit entries.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Persist an entry and return the sequence number it was given.
    async fn record(&self, entry: AuditEntry) -> Result<u64>;
}

/// Keeps entries in memory.
#[derive(Default)]
pub struct MemoryAuditSink {
    log: Mutex<AuditLog>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything recorded so far.
    pub async fn snapshot(&self) -> AuditLog {
        self.log.lock().await.clone()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, entry: AuditEntry) -> Result<u64> {
        Ok(self.log.lock().await.add(entry))
    }
}

/// Appends one JSON line per entry to a file.
pub struct JsonlAuditSink {
    path: PathBuf,
    next_seq: Mutex<u64>,
}

impl JsonlAuditSink {
    /// Open (or create) an audit log, continuing its sequence numbers.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let next_seq = match tokio::fs::read_to_string(&path).await {
            Ok(content) => AuditLog::from_jsonl(&content)?.next_seq(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            next_seq: Mutex::new(next_seq),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read back the whole log.
    pub async fn read_log(&self) -> Result<AuditLog> {
        read_audit_log(&self.path).await
    }
}

#[async_trait]
impl AuditSink for JsonlAuditSink {
    async fn record(&self, mut entry: AuditEntry) -> Result<u64> {
        let mut next_seq = self.next_seq.lock().await;
        entry.seq = *next_seq;

        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        debug!(seq = entry.seq, action = %entry.action, "audit entry recorded");
        *next_seq += 1;
        Ok(entry.seq)
    }
}

/// Read an audit log file. A missing file is an empty log.
pub async fn read_audit_log(path: &Path) -> Result<AuditLog> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => Ok(AuditLog::from_jsonl(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AuditLog::new()),
        Err(e) => Err(e.into()),
    }
}
