//! Case bundle reading and writing.
//!
//! A bundle is a gzip-compressed tarball holding `case_data.json`, one
//! `images/<filename>` entry per attachment and `FORENSIC_MANIFEST.json`.

use crate::store::{keys::CASE_DATA_FILE, validate_file_name};
use custody_common::{Error, Result};
use custody_manifest::{
    validate_manifest, AttachmentSet, ForensicManifest, ValidationVerdict, MANIFEST_FILE_NAME,
};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use tar::{Archive, Builder};
use tracing::{info, warn};

/// Path prefix for attachments inside a bundle.
pub const IMAGES_PREFIX: &str = "images/";

/// An exported case: data payload, attachments and their manifest.
#[derive(Debug, Clone)]
pub struct CaseBundle {
    pub data: String,
    pub attachments: AttachmentSet,
    pub manifest: ForensicManifest,
    /// Entries found in a read bundle that are not part of the format.
    pub unrecognized_entries: Vec<String>,
}

impl CaseBundle {
    pub fn new(data: String, attachments: AttachmentSet, manifest: ForensicManifest) -> Self {
        Self {
            data,
            attachments,
            manifest,
            unrecognized_entries: Vec::new(),
        }
    }

    /// Validate the bundle contents against its own manifest.
    pub fn validate(&self) -> Result<ValidationVerdict> {
        validate_manifest(&self.data, &self.attachments, &self.manifest)
    }
}

/// Write a bundle to a compressed tarball.
pub fn write_bundle(bundle: &CaseBundle, path: &Path) -> Result<()> {
    let file = File::create(path)?;
    write_bundle_to(bundle, file)?;
    info!("Bundle written to {:?}", path);
    Ok(())
}

/// Write a bundle to any writer.
pub fn write_bundle_to<W: Write>(bundle: &CaseBundle, writer: W) -> Result<W> {
    let encoder = GzEncoder::new(writer, Compression::default());
    let mut archive = Builder::new(encoder);

    add_file_to_archive(&mut archive, CASE_DATA_FILE, bundle.data.as_bytes())?;

    for (name, content) in bundle.attachments.iter() {
        let entry_path = format!("{}{}", IMAGES_PREFIX, name);
        add_file_to_archive(&mut archive, &entry_path, content)?;
    }

    let manifest_json = bundle.manifest.to_json_pretty()?;
    add_file_to_archive(&mut archive, MANIFEST_FILE_NAME, manifest_json.as_bytes())?;

    let encoder = archive.into_inner()?;
    Ok(encoder.finish()?)
}

fn add_file_to_archive<W: Write>(
    archive: &mut Builder<W>,
    path: &str,
    content: &[u8],
) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_size(content.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();

    archive.append_data(&mut header, path, content)?;
    Ok(())
}

/// Read a bundle from a compressed tarball.
pub fn read_bundle(path: &Path) -> Result<CaseBundle> {
    let file = File::open(path)?;
    read_bundle_from(file)
}

/// Read a bundle from any reader.
///
/// The `images/` prefix is stripped to form attachment names. Duplicate
/// entries are rejected; unknown entries are kept in
/// `unrecognized_entries`.
pub fn read_bundle_from<R: Read>(reader: R) -> Result<CaseBundle> {
    let decoder = GzDecoder::new(reader);
    let mut archive = Archive::new(decoder);

    let mut data: Option<String> = None;
    let mut manifest: Option<ForensicManifest> = None;
    let mut attachments = AttachmentSet::new();
    let mut unrecognized_entries = Vec::new();

    for entry in archive.entries()? {
        let mut entry = entry?;
        if entry.header().entry_type().is_dir() {
            continue;
        }
        let path = entry.path()?.to_string_lossy().to_string();

        let mut content = Vec::new();
        entry.read_to_end(&mut content)?;

        if path == CASE_DATA_FILE {
            let text = String::from_utf8(content).map_err(|_| {
                Error::invalid_input(CASE_DATA_FILE, "UTF-8 text", "non-UTF-8 bytes")
            })?;
            if data.replace(text).is_some() {
                return Err(duplicate(&path));
            }
        } else if path == MANIFEST_FILE_NAME {
            if manifest
                .replace(ForensicManifest::from_json_slice(&content)?)
                .is_some()
            {
                return Err(duplicate(&path));
            }
        } else if let Some(name) = path.strip_prefix(IMAGES_PREFIX) {
            validate_file_name(name)?;
            if attachments.insert(name, content).is_some() {
                return Err(duplicate(&path));
            }
        } else {
            warn!("Unrecognized bundle entry: {}", path);
            unrecognized_entries.push(path);
        }
    }

    let data = data.ok_or_else(|| Error::InvalidBundle(format!("missing {}", CASE_DATA_FILE)))?;
    let manifest =
        manifest.ok_or_else(|| Error::InvalidBundle(format!("missing {}", MANIFEST_FILE_NAME)))?;

    Ok(CaseBundle {
        data,
        attachments,
        manifest,
        unrecognized_entries,
    })
}

fn duplicate(path: &str) -> Error {
    Error::InvalidBundle(format!("duplicate entry {}", path))
}

/// Read a bundle file and validate it without importing anything.
pub fn verify_bundle_file(path: &Path) -> Result<(CaseBundle, ValidationVerdict)> {
    let bundle = read_bundle(path)?;
    let verdict = bundle.validate()?;
    Ok((bundle, verdict))
}
