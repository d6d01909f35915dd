//! Case data payload.
//!
//! The integrity engine treats `case_data.json` as opaque text. The
//! workflow only needs its `caseNumber` and writes the payload in the shape
//! below when a case is created.

use custody_common::{Error, Result, Timestamp};
use custody_manifest::AttachmentSet;
use serde::{Deserialize, Serialize};

/// Contents of `case_data.json` as created by this tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseData {
    pub case_number: String,
    pub created_at: String,
    pub created_by: String,
    pub files: Vec<CaseFile>,
}

/// An image belonging to a case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseFile {
    /// Identifier used by confirmations; the stored filename.
    pub id: String,
    pub original_name: String,
    pub uploaded_at: String,
    pub size: u64,
}

impl CaseData {
    /// Describe a new case and its images.
    pub fn new(case_number: &str, created_by: &str, images: &AttachmentSet) -> Self {
        let now = Timestamp::now().to_iso8601();
        let files = images
            .iter()
            .map(|(name, content)| CaseFile {
                id: name.to_string(),
                original_name: name.to_string(),
                uploaded_at: now.clone(),
                size: content.len() as u64,
            })
            .collect();

        Self {
            case_number: case_number.to_string(),
            created_at: now,
            created_by: created_by.to_string(),
            files,
        }
    }
}

#[derive(Deserialize)]
struct CaseHeader {
    #[serde(rename = "caseNumber")]
    case_number: String,
}

/// Read the `caseNumber` field out of an opaque case data payload.
pub fn case_number_of(data: &str) -> Result<String> {
    let header: CaseHeader = serde_json::from_str(data).map_err(|e| {
        Error::InvalidBundle(format!("case data has no readable caseNumber: {}", e))
    })?;
    Ok(header.case_number)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_data_lists_images_sorted() {
        let images: AttachmentSet = [("b.png", vec![0u8; 4]), ("a.png", vec![0u8; 2])]
            .into_iter()
            .collect();
        let data = CaseData::new("CASE-1", "examiner", &images);
        let ids: Vec<&str> = data.files.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["a.png", "b.png"]);
        assert_eq!(data.files[1].size, 4);

        let json = serde_json::to_string(&data).unwrap();
        assert_eq!(case_number_of(&json).unwrap(), "CASE-1");
    }

    #[test]
    fn test_case_number_of_ignores_other_fields() {
        let data = r#"{"annotations":{"x":1},"caseNumber":"2024-17"}"#;
        assert_eq!(case_number_of(data).unwrap(), "2024-17");
        assert!(matches!(
            case_number_of(r#"{"case":"A"}"#),
            Err(Error::InvalidBundle(_))
        ));
    }
}
