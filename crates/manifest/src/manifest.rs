//! Forensic manifest types and generation.
//!
//! A manifest commits to a data payload and a set of named attachments:
//! one digest per item plus a `manifestHash` over the canonical JSON of
//! `{dataHash, imageHashes, totalFiles, createdAt}`.

use custody_common::hash::{digest_binary, digest_string_timing_normalized};
use custody_common::{Result, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// File name of the manifest inside an exported bundle.
pub const MANIFEST_FILE_NAME: &str = "FORENSIC_MANIFEST.json";

/// Named binary attachments, always iterated in sorted filename order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttachmentSet {
    files: BTreeMap<String, Vec<u8>>,
}

impl AttachmentSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an attachment, returning the previous content for that name.
    pub fn insert(&mut self, name: impl Into<String>, content: impl Into<Vec<u8>>) -> Option<Vec<u8>> {
        self.files.insert(name.into(), content.into())
    }

    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.files.get(name).map(Vec::as_slice)
    }

    pub fn remove(&mut self, name: &str) -> Option<Vec<u8>> {
        self.files.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.files.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Filenames in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    /// `(filename, content)` pairs in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.files.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }
}

impl<N: Into<String>, C: Into<Vec<u8>>> FromIterator<(N, C)> for AttachmentSet {
    fn from_iter<I: IntoIterator<Item = (N, C)>>(iter: I) -> Self {
        let mut set = AttachmentSet::new();
        for (name, content) in iter {
            set.insert(name, content);
        }
        set
    }
}

/// The manifest that travels with an exported artifact.
///
/// Digest fields are kept as the strings found on the wire so that a
/// malformed value from a received manifest can be reported rather than
/// silently rejected during parsing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForensicManifest {
    pub data_hash: String,
    pub image_hashes: BTreeMap<String, String>,
    pub manifest_hash: String,
    pub total_files: u64,
    pub created_at: String,
}

/// The hashed view of a manifest. Field order is part of the format.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ManifestCore<'a> {
    data_hash: &'a str,
    image_hashes: &'a BTreeMap<String, String>,
    total_files: u64,
    created_at: &'a str,
}

/// Serialize the hashed fields of a manifest in canonical form.
///
/// Compact JSON, keys in the fixed order `dataHash`, `imageHashes`,
/// `totalFiles`, `createdAt`; `imageHashes` keys sorted.
pub fn canonical_manifest_json(
    data_hash: &str,
    image_hashes: &BTreeMap<String, String>,
    total_files: u64,
    created_at: &str,
) -> Result<String> {
    let core = ManifestCore {
        data_hash,
        image_hashes,
        total_files,
        created_at,
    };
    Ok(serde_json::to_string(&core)?)
}

/// Generate a manifest for a data payload and its attachments.
///
/// `timestamp` must be `None` when creating a new artifact and the original
/// `createdAt` when re-deriving a manifest for validation.
pub fn generate_manifest(
    data_content: &str,
    attachments: &AttachmentSet,
    timestamp: Option<&str>,
) -> Result<ForensicManifest> {
    let data_hash = digest_string_timing_normalized(data_content);

    let mut image_hashes: BTreeMap<String, String> = BTreeMap::new();
    for (name, content) in attachments.iter() {
        let digest = digest_binary(content);
        debug!(file = name, digest = %digest, "hashed attachment");
        image_hashes.insert(name.to_string(), digest.into());
    }

    let total_files = attachments.len() as u64 + 1;
    let created_at = match timestamp {
        Some(ts) => ts.to_string(),
        None => Timestamp::now().to_iso8601(),
    };

    let canonical =
        canonical_manifest_json(data_hash.as_str(), &image_hashes, total_files, &created_at)?;
    let manifest_hash = digest_string_timing_normalized(&canonical);

    Ok(ForensicManifest {
        data_hash: data_hash.into(),
        image_hashes,
        manifest_hash: manifest_hash.into(),
        total_files,
        created_at,
    })
}

impl ForensicManifest {
    /// Parse a manifest file, checking it against the manifest schema first.
    pub fn from_json_slice(bytes: &[u8]) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_slice(bytes)?;
        Self::from_json_value(value)
    }

    /// Deserialize an already-parsed manifest value after a schema check.
    pub fn from_json_value(value: serde_json::Value) -> Result<Self> {
        crate::schema::check_manifest(&value)?;
        Ok(serde_json::from_value(value)?)
    }

    /// Pretty JSON as written into bundles.
    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
