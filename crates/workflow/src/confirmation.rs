//! Confirmation records and the confirmation export package.

use custody_common::hash::expect_str;
use custody_common::{Error, Result, Timestamp};
use custody_manifest::{
    generate_manifest, validate_manifest, AttachmentSet, ForensicManifest, ValidationVerdict,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A second examiner's confirmation of an identification on one image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationRecord {
    pub confirmation_id: String,
    pub case_number: String,
    pub original_image_id: String,
    pub confirmed_by: String,
    pub confirmed_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl ConfirmationRecord {
    pub fn new(
        case_number: &str,
        original_image_id: &str,
        confirmed_by: &str,
        note: Option<String>,
    ) -> Self {
        Self {
            confirmation_id: uuid::Uuid::new_v4().to_string(),
            case_number: case_number.to_string(),
            original_image_id: original_image_id.to_string(),
            confirmed_by: confirmed_by.to_string(),
            confirmed_at: Timestamp::now().to_iso8601(),
            note,
        }
    }
}

/// A confirmation as kept in the store, with a manifest over its JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredConfirmation {
    pub record: ConfirmationRecord,
    pub manifest: ForensicManifest,
}

impl StoredConfirmation {
    /// Seal a new record with a freshly generated manifest.
    pub fn seal(record: ConfirmationRecord) -> Result<Self> {
        let json = serde_json::to_string(&record)?;
        let manifest = generate_manifest(&json, &AttachmentSet::new(), None)?;
        Ok(Self { record, manifest })
    }

    /// Validate the record against the manifest it was sealed with.
    pub fn verify(&self) -> Result<ValidationVerdict> {
        let json = serde_json::to_string(&self.record)?;
        validate_manifest(&json, &AttachmentSet::new(), &self.manifest)
    }

    /// Fail with `IntegrityViolation` unless the seal still holds.
    pub fn ensure_sealed(&self) -> Result<()> {
        let verdict = self.verify()?;
        if verdict.is_valid {
            Ok(())
        } else {
            Err(Error::IntegrityViolation {
                item: format!("confirmation {}", self.record.confirmation_id),
                summary: verdict.errors.join("; "),
            })
        }
    }
}

/// The attested payload of a confirmation export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationData {
    pub case_number: String,
    pub confirmations: Vec<StoredConfirmation>,
}

/// Descriptive package header. Not covered by the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageMetadata {
    pub case_number: String,
    pub exported_at: String,
    pub exported_by: String,
    pub total_confirmations: usize,
}

/// A confirmation export: metadata, the verbatim payload and its manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationPackage {
    pub metadata: PackageMetadata,
    pub confirmation_data: String,
    pub forensic_manifest: ForensicManifest,
}

impl ConfirmationPackage {
    /// Serialize the payload and generate its manifest.
    pub fn build(data: &ConfirmationData, exported_by: &str) -> Result<Self> {
        let confirmation_data = serde_json::to_string(data)?;
        let forensic_manifest = generate_manifest(&confirmation_data, &AttachmentSet::new(), None)?;

        Ok(Self {
            metadata: PackageMetadata {
                case_number: data.case_number.clone(),
                exported_at: forensic_manifest.created_at.clone(),
                exported_by: exported_by.to_string(),
                total_confirmations: data.confirmations.len(),
            },
            confirmation_data,
            forensic_manifest,
        })
    }

    /// Parse a package file.
    ///
    /// `confirmationData` must be a JSON string; any other type is rejected
    /// as invalid input before anything is hashed.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(bytes)?;

        let metadata: PackageMetadata = serde_json::from_value(field(&value, "metadata").clone())?;
        let confirmation_data = expect_str("confirmationData", field(&value, "confirmationData"))?;
        let forensic_manifest =
            ForensicManifest::from_json_value(field(&value, "forensicManifest").clone())?;

        Ok(Self {
            metadata,
            confirmation_data: confirmation_data.to_string(),
            forensic_manifest,
        })
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Validate the payload against the bundled manifest.
    pub fn validate(&self) -> Result<ValidationVerdict> {
        validate_manifest(
            &self.confirmation_data,
            &AttachmentSet::new(),
            &self.forensic_manifest,
        )
    }

    /// Decode the payload. Only meaningful after a successful validation.
    pub fn confirmations(&self) -> Result<ConfirmationData> {
        let data: ConfirmationData = serde_json::from_str(&self.confirmation_data)?;
        if let Some(stray) = data
            .confirmations
            .iter()
            .find(|c| c.record.case_number != data.case_number)
        {
            return Err(Error::InvalidBundle(format!(
                "confirmation {} belongs to case {}, not {}",
                stray.record.confirmation_id, stray.record.case_number, data.case_number
            )));
        }
        Ok(data)
    }
}

static NULL: Value = Value::Null;

fn field<'a>(value: &'a Value, name: &str) -> &'a Value {
    value.get(name).unwrap_or(&NULL)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data() -> ConfirmationData {
        let record = ConfirmationRecord::new("CASE-7", "bullet-1.png", "Examiner B", None);
        ConfirmationData {
            case_number: "CASE-7".to_string(),
            confirmations: vec![StoredConfirmation::seal(record).unwrap()],
        }
    }

    #[test]
    fn test_sealed_record_validates() {
        let stored = StoredConfirmation::seal(ConfirmationRecord::new(
            "CASE-7",
            "img.png",
            "Examiner B",
            Some("agree".to_string()),
        ))
        .unwrap();
        assert!(stored.verify().unwrap().is_valid);
        assert!(stored.ensure_sealed().is_ok());
        assert_eq!(stored.manifest.total_files, 1);

        // The seal survives a trip through the stored JSON form.
        let raw = serde_json::to_vec_pretty(&stored).unwrap();
        let reloaded: StoredConfirmation = serde_json::from_slice(&raw).unwrap();
        assert!(reloaded.ensure_sealed().is_ok());
    }

    #[test]
    fn test_edited_record_breaks_seal() {
        let mut stored = StoredConfirmation::seal(ConfirmationRecord::new(
            "CASE-7",
            "img.png",
            "Examiner B",
            Some("agree".to_string()),
        ))
        .unwrap();
        stored.record.note = Some("DISAGREE".to_string());

        let verdict = stored.verify().unwrap();
        assert!(!verdict.is_valid);
        assert!(!verdict.data_valid);
        assert!(matches!(
            stored.ensure_sealed(),
            Err(Error::IntegrityViolation { ref item, .. }) if item.contains(&stored.record.confirmation_id)
        ));
    }

    #[test]
    fn test_package_round_trip() {
        let package = ConfirmationPackage::build(&data(), "Examiner B").unwrap();
        assert_eq!(package.metadata.total_confirmations, 1);

        let parsed = ConfirmationPackage::parse(package.to_json_pretty().unwrap().as_bytes()).unwrap();
        assert_eq!(parsed, package);
        assert!(parsed.validate().unwrap().is_valid);
        let decoded = parsed.confirmations().unwrap();
        assert_eq!(decoded.case_number, "CASE-7");
        assert_eq!(decoded.confirmations.len(), 1);
        assert_eq!(decoded.confirmations[0].record.original_image_id, "bullet-1.png");
    }

    #[test]
    fn test_tampered_payload_fails_validation() {
        let mut package = ConfirmationPackage::build(&data(), "Examiner B").unwrap();
        package.confirmation_data = package
            .confirmation_data
            .replace("Examiner B", "Examiner C");

        let verdict = package.validate().unwrap();
        assert!(!verdict.is_valid);
        assert!(!verdict.data_valid);
    }

    #[test]
    fn test_non_string_payload_is_invalid_input() {
        let package = ConfirmationPackage::build(&data(), "Examiner B").unwrap();
        let mut value = serde_json::to_value(&package).unwrap();

        for bad in [Value::Null, serde_json::json!(12), serde_json::json!({"x": 1})] {
            value["confirmationData"] = bad;
            let bytes = serde_json::to_vec(&value).unwrap();
            assert!(matches!(
                ConfirmationPackage::parse(&bytes),
                Err(Error::InvalidInput { ref param, .. }) if param == "confirmationData"
            ));
        }
    }

    #[test]
    fn test_missing_manifest_is_schema_error() {
        let package = ConfirmationPackage::build(&data(), "Examiner B").unwrap();
        let mut value = serde_json::to_value(&package).unwrap();
        value.as_object_mut().unwrap().remove("forensicManifest");
        let bytes = serde_json::to_vec(&value).unwrap();
        assert!(matches!(
            ConfirmationPackage::parse(&bytes),
            Err(Error::SchemaValidation(_))
        ));
    }

    #[test]
    fn test_stray_case_number_rejected() {
        let mut d = data();
        d.confirmations[0].record.case_number = "OTHER".to_string();
        let package = ConfirmationPackage::build(&d, "Examiner B").unwrap();
        assert!(matches!(
            package.confirmations(),
            Err(Error::InvalidBundle(_))
        ));
    }
}
