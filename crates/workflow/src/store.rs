//! Blob storage for case data, images and confirmations.

use async_trait::async_trait;
use custody_common::{Error, Result};
use regex::Regex;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::OnceLock;
use tokio::sync::RwLock;
use tracing::debug;

/// Key-value blob store addressed by `/`-separated paths.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Fetch a blob, or `None` if it does not exist.
    async fn get(&self, path: &str) -> Result<Option<Vec<u8>>>;

    /// Store a blob, replacing any existing content.
    async fn put(&self, path: &str, content: &[u8]) -> Result<()>;

    /// Delete a blob. Returns whether it existed.
    async fn delete(&self, path: &str) -> Result<bool>;

    /// All paths starting with `prefix`, sorted.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;
}

/// Store layout keys.
pub mod keys {
    pub const CASE_DATA_FILE: &str = "case_data.json";

    pub fn case_data(case_number: &str) -> String {
        format!("cases/{}/{}", case_number, CASE_DATA_FILE)
    }

    pub fn images_prefix(case_number: &str) -> String {
        format!("cases/{}/images/", case_number)
    }

    pub fn image(case_number: &str, file_name: &str) -> String {
        format!("cases/{}/images/{}", case_number, file_name)
    }

    pub fn confirmations_prefix(case_number: &str) -> String {
        format!("cases/{}/confirmations/", case_number)
    }

    pub fn confirmation(case_number: &str, confirmation_id: &str) -> String {
        format!("cases/{}/confirmations/{}.json", case_number, confirmation_id)
    }
}

fn case_number_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]{0,63}$").expect("case number pattern is valid")
    })
}

/// Check that a case number is safe to use as a path segment.
pub fn validate_case_number(case_number: &str) -> Result<()> {
    if case_number_pattern().is_match(case_number) {
        Ok(())
    } else {
        Err(Error::InvalidCaseNumber(case_number.to_string()))
    }
}

/// Check that an attachment filename is a single, plain path segment.
pub fn validate_file_name(name: &str) -> Result<()> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(|c: char| c == '/' || c == '\\')
        || name.chars().any(char::is_control);
    if bad {
        return Err(Error::InvalidBundle(format!("invalid attachment filename {:?}", name)));
    }
    Ok(())
}

fn validate_path(path: &str) -> Result<()> {
    let bad = path.is_empty()
        || path.starts_with('/')
        || path.contains('\\')
        || path.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..");
    if bad {
        return Err(Error::Store(format!("invalid store path {:?}", path)));
    }
    Ok(())
}

/// Directory-backed blob store.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        validate_path(path)?;
        Ok(path.split('/').fold(self.root.clone(), |acc, seg| acc.join(seg)))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn get(&self, path: &str) -> Result<Option<Vec<u8>>> {
        let full = self.resolve(path)?;
        match tokio::fs::read(&full).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, path: &str, content: &[u8]) -> Result<()> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&full, content).await?;
        debug!("Stored {} ({} bytes)", path, content.len());
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<bool> {
        let full = self.resolve(path)?;
        match tokio::fs::remove_file(&full).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut found = Vec::new();
        let mut pending = vec![(self.root.clone(), String::new())];

        while let Some((dir, rel)) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name().to_string_lossy().to_string();
                let key = if rel.is_empty() {
                    name
                } else {
                    format!("{}/{}", rel, name)
                };
                // Only descend into directories that can still match.
                if entry.file_type().await?.is_dir() {
                    let dir_key = format!("{}/", key);
                    if dir_key.starts_with(prefix) || prefix.starts_with(&dir_key) {
                        pending.push((entry.path(), key));
                    }
                } else if key.starts_with(prefix) {
                    found.push(key);
                }
            }
        }

        found.sort();
        Ok(found)
    }
}

/// In-process blob store.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn get(&self, path: &str) -> Result<Option<Vec<u8>>> {
        validate_path(path)?;
        Ok(self.blobs.read().await.get(path).cloned())
    }

    async fn put(&self, path: &str, content: &[u8]) -> Result<()> {
        validate_path(path)?;
        self.blobs
            .write()
            .await
            .insert(path.to_string(), content.to_vec());
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<bool> {
        validate_path(path)?;
        Ok(self.blobs.write().await.remove(path).is_some())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .blobs
            .read()
            .await
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}
