//! JSON schema for FORENSIC_MANIFEST.json.

use custody_common::{Error, Result};
use jsonschema::JSONSchema;
use serde_json::Value;

/// JSON Schema for the forensic manifest file.
pub const MANIFEST_SCHEMA: &str = r##"{
  "$schema": "http://json-schema.org/draft-07/schema#",
  "$id": "https://custody.dev/schemas/forensic-manifest.json",
  "title": "Forensic Manifest",
  "type": "object",
  "required": ["dataHash", "imageHashes", "manifestHash", "totalFiles", "createdAt"],
  "properties": {
    "dataHash": { "$ref": "#/definitions/digest" },
    "imageHashes": {
      "type": "object",
      "additionalProperties": { "$ref": "#/definitions/digest" }
    },
    "manifestHash": { "$ref": "#/definitions/digest" },
    "totalFiles": {
      "type": "integer",
      "minimum": 0
    },
    "createdAt": {
      "type": "string",
      "minLength": 1
    }
  },
  "definitions": {
    "digest": {
      "type": "string",
      "pattern": "^[0-9a-fA-F]{64}$"
    }
  }
}"##;

/// Get the manifest schema as a parsed JSON value.
pub fn manifest_schema() -> Result<Value> {
    serde_json::from_str(MANIFEST_SCHEMA)
        .map_err(|e| Error::SchemaValidation(format!("invalid manifest schema: {}", e)))
}

/// Check a manifest value against [`MANIFEST_SCHEMA`].
///
/// All violations are collected into a single `SchemaValidation` error.
pub fn check_manifest(manifest: &Value) -> Result<()> {
    let schema_value = manifest_schema()?;
    let compiled = JSONSchema::compile(&schema_value)
        .map_err(|e| Error::SchemaValidation(e.to_string()))?;

    let problems: Vec<String> = match compiled.validate(manifest) {
        Ok(()) => return Ok(()),
        Err(errors) => errors
            .map(|error| format!("{} at {}", error, error.instance_path))
            .collect(),
    };
    Err(Error::SchemaValidation(problems.join("; ")))
}
