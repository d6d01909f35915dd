//! Manifest validation.
//!
//! Re-derives every digest from the candidate data and attachments and
//! compares it with a previously generated manifest. Discrepancies are
//! reported in the returned [`ValidationVerdict`]; they are never errors.

use crate::manifest::{generate_manifest, AttachmentSet, ForensicManifest};
use custody_common::hash::{digest_binary, digest_string_timing_normalized, is_hex_digest};
use custody_common::{DigestValue, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// Outcome of validating candidate content against a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationVerdict {
    /// True iff every sub-check passed and no error was recorded.
    pub is_valid: bool,
    pub data_valid: bool,
    /// One entry per attachment actually provided.
    pub image_validation: BTreeMap<String, bool>,
    /// Whether the recreated manifest hash matches the expected one.
    pub manifest_valid: bool,
    pub errors: Vec<String>,
    pub summary: String,
}

impl ValidationVerdict {
    /// Number of provided attachments whose digest matched.
    pub fn images_valid(&self) -> usize {
        self.image_validation.values().filter(|v| **v).count()
    }

    /// Number of provided attachments.
    pub fn images_checked(&self) -> usize {
        self.image_validation.len()
    }
}

/// Validate data and attachments against an expected manifest.
///
/// Only fails for malformed input; a failed integrity check is returned as a
/// verdict with `is_valid == false`.
pub fn validate_manifest(
    data_content: &str,
    attachments: &AttachmentSet,
    expected: &ForensicManifest,
) -> Result<ValidationVerdict> {
    let mut errors = Vec::new();

    // Data payload.
    let actual_data_hash = digest_string_timing_normalized(data_content);
    let data_valid = actual_data_hash.matches(&expected.data_hash);
    if !data_valid {
        errors.push(mismatch("Data hash mismatch", &expected.data_hash, &actual_data_hash));
    }

    // Scope comes from the files actually provided, not from the manifest.
    let actual_names: BTreeSet<&str> = attachments.names().collect();
    let expected_names: BTreeSet<&str> = expected.image_hashes.keys().map(String::as_str).collect();

    for name in expected_names.difference(&actual_names) {
        errors.push(format!(
            "Missing image file: {} is listed in the manifest but was not provided",
            name
        ));
    }
    for name in actual_names.difference(&expected_names) {
        errors.push(format!(
            "Extra image file: {} was provided but is not listed in the manifest",
            name
        ));
    }

    let mut image_validation = BTreeMap::new();
    for (name, content) in attachments.iter() {
        let valid = match expected.image_hashes.get(name) {
            Some(expected_hash) => {
                let actual = digest_binary(content);
                let valid = actual.matches(expected_hash);
                debug!(file = name, valid, "checked attachment digest");
                if !valid {
                    errors.push(mismatch(
                        &format!("Image hash mismatch for {}", name),
                        expected_hash,
                        &actual,
                    ));
                }
                valid
            }
            // Already reported as an extra file; it cannot be attested.
            None => false,
        };
        image_validation.insert(name.to_string(), valid);
    }

    // Recreate the whole manifest with the original timestamp.
    let recreated = generate_manifest(data_content, attachments, Some(&expected.created_at))?;
    let recreated_hash = DigestValue::parse(&recreated.manifest_hash)?;

    // The recorded count is not covered by a matching manifestHash on its own.
    if recreated.total_files != expected.total_files {
        errors.push(format!(
            "Manifest totalFiles mismatch: recorded {}, recreated {}",
            expected.total_files, recreated.total_files
        ));
    }

    let manifest_valid = recreated_hash.matches(&expected.manifest_hash);
    if !manifest_valid {
        errors.push(mismatch(
            "Manifest hash mismatch",
            &expected.manifest_hash,
            &recreated_hash,
        ));
        diff_manifest_fields(expected, &recreated, &mut errors);
    }

    let is_valid = data_valid
        && image_validation.values().all(|v| *v)
        && manifest_valid
        && errors.is_empty();

    let mut verdict = ValidationVerdict {
        is_valid,
        data_valid,
        image_validation,
        manifest_valid,
        errors,
        summary: String::new(),
    };
    verdict.summary = summarize(&verdict);

    if verdict.is_valid {
        debug!(summary = %verdict.summary, "manifest validation passed");
    } else {
        warn!(errors = verdict.errors.len(), summary = %verdict.summary, "manifest validation failed");
    }

    Ok(verdict)
}

fn mismatch(what: &str, expected: &str, actual: &DigestValue) -> String {
    if is_hex_digest(expected) {
        format!("{}: expected {}, got {}", what, expected, actual)
    } else {
        format!(
            "{}: expected value {:?} is not a valid SHA-256 digest, got {}",
            what, expected, actual
        )
    }
}

/// Explain a top-level manifest hash mismatch field by field.
fn diff_manifest_fields(
    expected: &ForensicManifest,
    recreated: &ForensicManifest,
    errors: &mut Vec<String>,
) {
    let before = errors.len();

    if !hashes_equal(&recreated.data_hash, &expected.data_hash) {
        errors.push(format!(
            "Manifest dataHash differs from recreated manifest: recorded {}, recreated {}",
            expected.data_hash, recreated.data_hash
        ));
    }

    for (name, recreated_hash) in &recreated.image_hashes {
        if let Some(recorded) = expected.image_hashes.get(name) {
            if !hashes_equal(recreated_hash, recorded) {
                errors.push(format!(
                    "Manifest imageHashes entry for {} differs from recreated manifest: recorded {}, recreated {}",
                    name, recorded, recreated_hash
                ));
            }
        }
    }

    if errors.len() == before
        && expected.image_hashes.len() == recreated.image_hashes.len()
        && expected.total_files == recreated.total_files
    {
        errors.push(
            "Manifest structure mismatch: recorded digests agree with the content, \
             so manifestHash or createdAt has been altered"
                .to_string(),
        );
    }
}

fn hashes_equal(a: &str, b: &str) -> bool {
    DigestValue::parse(a)
        .map(|d| d.matches(b))
        .unwrap_or(false)
}

fn summarize(verdict: &ValidationVerdict) -> String {
    let mut summary = format!(
        "Validation {}: data {}, {}/{} images valid, manifest {}",
        if verdict.is_valid { "PASSED" } else { "FAILED" },
        if verdict.data_valid { "valid" } else { "invalid" },
        verdict.images_valid(),
        verdict.images_checked(),
        if verdict.manifest_valid { "valid" } else { "invalid" },
    );
    match verdict.errors.len() {
        0 => {}
        1 => summary.push_str(" (1 error)"),
        n => summary.push_str(&format!(" ({} errors)", n)),
    }
    summary
}
