//! Chain-of-custody workflows.
//!
//! Export and creation phases generate a manifest; import phases validate
//! one. Every phase records exactly one audit entry. A failed validation
//! stops the import: nothing from the artifact is written to the store.

use crate::bundle::{verify_bundle_file, write_bundle, CaseBundle};
use crate::case::{case_number_of, CaseData};
use crate::confirmation::{
    ConfirmationData, ConfirmationPackage, ConfirmationRecord, StoredConfirmation,
};
use crate::sink::AuditSink;
use crate::store::{keys, validate_case_number, validate_file_name, BlobStore};
use custody_common::{Error, Result, Timestamp};
use custody_manifest::{
    generate_manifest, AttachmentSet, AuditAction, AuditEntry, ForensicManifest,
    ValidationVerdict,
};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Result of an export or creation phase.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportReport {
    pub case_number: String,
    pub path: PathBuf,
    pub manifest: ForensicManifest,
}

/// Result of an import phase.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub case_number: Option<String>,
    /// True only if validation passed and the content was stored.
    pub accepted: bool,
    pub verdict: ValidationVerdict,
    pub manifest_hash: String,
    pub items_written: usize,
    pub warnings: Vec<String>,
}

/// Runs workflow phases against a blob store and records them in an audit sink.
pub struct Workflow {
    store: Arc<dyn BlobStore>,
    audit: Arc<dyn AuditSink>,
    examiner: String,
}

impl Workflow {
    pub fn new(
        store: Arc<dyn BlobStore>,
        audit: Arc<dyn AuditSink>,
        examiner: impl Into<String>,
    ) -> Self {
        Self {
            store,
            audit,
            examiner: examiner.into(),
        }
    }

    /// Create a new case from a set of images.
    pub async fn create_case(&self, case_number: &str, images: AttachmentSet) -> Result<CaseData> {
        let entry = AuditEntry::new(AuditAction::CaseCreate, &self.examiner).with_case(case_number);
        let result = self.create_case_inner(case_number, images).await;
        self.finish(entry, result, |e, _| e).await
    }

    async fn create_case_inner(&self, case_number: &str, images: AttachmentSet) -> Result<CaseData> {
        validate_case_number(case_number)?;
        for name in images.names() {
            validate_file_name(name)?;
        }
        if self.case_exists(case_number).await? {
            return Err(Error::CaseExists(case_number.to_string()));
        }

        let data = CaseData::new(case_number, &self.examiner, &images);
        let json = serde_json::to_string_pretty(&data)?;
        let mut blobs: Vec<(String, &[u8])> = images
            .iter()
            .map(|(name, content)| (keys::image(case_number, name), content))
            .collect();
        blobs.push((keys::case_data(case_number), json.as_bytes()));
        self.put_all(&blobs).await?;

        info!("Created case {} with {} images", case_number, images.len());
        Ok(data)
    }

    /// Load a case's data payload and images from the store.
    pub async fn load_case(&self, case_number: &str) -> Result<(String, AttachmentSet)> {
        validate_case_number(case_number)?;
        let raw = self
            .store
            .get(&keys::case_data(case_number))
            .await?
            .ok_or_else(|| Error::CaseNotFound(case_number.to_string()))?;
        let data = String::from_utf8(raw)
            .map_err(|_| Error::invalid_input(keys::CASE_DATA_FILE, "UTF-8 text", "non-UTF-8 bytes"))?;

        let prefix = keys::images_prefix(case_number);
        let mut images = AttachmentSet::new();
        for key in self.store.list(&prefix).await? {
            let Some(name) = key.strip_prefix(&prefix) else {
                continue;
            };
            let content = self
                .store
                .get(&key)
                .await?
                .ok_or_else(|| Error::Store(format!("{} disappeared while loading", key)))?;
            images.insert(name, content);
        }
        Ok((data, images))
    }

    /// Export a case as a bundle with a freshly generated manifest.
    pub async fn export_case(&self, case_number: &str, out: &Path) -> Result<ExportReport> {
        let entry = AuditEntry::new(AuditAction::CaseExport, &self.examiner)
            .with_case(case_number)
            .with_file(out.display().to_string());
        let result = self.export_case_inner(case_number, out).await;
        self.finish(entry, result, |e, r| e.with_manifest_hash(&r.manifest.manifest_hash))
            .await
    }

    async fn export_case_inner(&self, case_number: &str, out: &Path) -> Result<ExportReport> {
        let (data, images) = self.load_case(case_number).await?;
        let manifest = generate_manifest(&data, &images, None)?;
        let bundle = CaseBundle::new(data, images, manifest.clone());
        let path = out.to_path_buf();
        run_blocking(move || write_bundle(&bundle, &path)).await?;

        info!(
            "Exported case {} ({} files, manifest {})",
            case_number, manifest.total_files, manifest.manifest_hash
        );
        Ok(ExportReport {
            case_number: case_number.to_string(),
            path: out.to_path_buf(),
            manifest,
        })
    }

    /// Import a case bundle after validating it against its manifest.
    pub async fn import_case(&self, bundle_path: &Path) -> Result<ImportReport> {
        let entry = AuditEntry::new(AuditAction::CaseImport, &self.examiner)
            .with_file(bundle_path.display().to_string());
        let result = self.import_case_inner(bundle_path).await;
        self.finish_import(entry, result).await
    }

    async fn import_case_inner(&self, bundle_path: &Path) -> Result<ImportReport> {
        let path = bundle_path.to_path_buf();
        let (bundle, verdict) = run_blocking(move || verify_bundle_file(&path)).await?;
        let case_number = case_number_of(&bundle.data).ok();

        let mut warnings: Vec<String> = bundle
            .unrecognized_entries
            .iter()
            .map(|e| format!("Unrecognized bundle entry ignored: {}", e))
            .collect();

        let mut report = ImportReport {
            case_number: case_number.clone(),
            accepted: false,
            verdict,
            manifest_hash: bundle.manifest.manifest_hash.clone(),
            items_written: 0,
            warnings: Vec::new(),
        };

        if !report.verdict.is_valid {
            warn!("Rejected case bundle {:?}: {}", bundle_path, report.verdict.summary);
            report.warnings = warnings;
            return Ok(report);
        }

        let case_number = case_number.ok_or_else(|| {
            Error::InvalidBundle("case data has no caseNumber".to_string())
        })?;
        validate_case_number(&case_number)?;
        if self.case_exists(&case_number).await? {
            return Err(Error::CaseExists(case_number));
        }

        // Case data goes last so a partial import never looks like a case.
        let mut blobs: Vec<(String, &[u8])> = bundle
            .attachments
            .iter()
            .map(|(name, content)| (keys::image(&case_number, name), content))
            .collect();
        blobs.push((keys::case_data(&case_number), bundle.data.as_bytes()));
        let written = self.put_all(&blobs).await?;

        if bundle.attachments.is_empty() {
            warnings.push("Bundle contains no images".to_string());
        }
        info!(
            "Imported case {} ({} images)",
            case_number,
            bundle.attachments.len()
        );

        report.accepted = true;
        report.items_written = written;
        report.warnings = warnings;
        Ok(report)
    }

    /// Record a confirmation of an image in an existing case.
    pub async fn create_confirmation(
        &self,
        case_number: &str,
        original_image_id: &str,
        note: Option<String>,
    ) -> Result<StoredConfirmation> {
        let entry =
            AuditEntry::new(AuditAction::ConfirmationCreate, &self.examiner).with_case(case_number);
        let result = self
            .create_confirmation_inner(case_number, original_image_id, note)
            .await;
        self.finish(entry, result, |e, c| e.with_manifest_hash(&c.manifest.manifest_hash))
            .await
    }

    async fn create_confirmation_inner(
        &self,
        case_number: &str,
        original_image_id: &str,
        note: Option<String>,
    ) -> Result<StoredConfirmation> {
        validate_case_number(case_number)?;
        validate_file_name(original_image_id)?;
        if !self.case_exists(case_number).await? {
            return Err(Error::CaseNotFound(case_number.to_string()));
        }
        if self
            .store
            .get(&keys::image(case_number, original_image_id))
            .await?
            .is_none()
        {
            return Err(Error::ImageNotFound {
                case_number: case_number.to_string(),
                image: original_image_id.to_string(),
            });
        }

        let record = ConfirmationRecord::new(case_number, original_image_id, &self.examiner, note);
        let stored = StoredConfirmation::seal(record)?;
        let json = serde_json::to_string_pretty(&stored)?;
        self.store
            .put(
                &keys::confirmation(case_number, &stored.record.confirmation_id),
                json.as_bytes(),
            )
            .await?;

        info!(
            "Confirmation {} recorded for {} in case {}",
            stored.record.confirmation_id, original_image_id, case_number
        );
        Ok(stored)
    }

    /// Export all confirmations of a case as a JSON package.
    pub async fn export_confirmations(&self, case_number: &str, out: &Path) -> Result<ExportReport> {
        let entry = AuditEntry::new(AuditAction::ConfirmationExport, &self.examiner)
            .with_case(case_number)
            .with_file(out.display().to_string());
        let result = self.export_confirmations_inner(case_number, out).await;
        self.finish(entry, result, |e, r| e.with_manifest_hash(&r.manifest.manifest_hash))
            .await
    }

    async fn export_confirmations_inner(&self, case_number: &str, out: &Path) -> Result<ExportReport> {
        validate_case_number(case_number)?;
        let mut confirmations = Vec::new();
        for key in self.store.list(&keys::confirmations_prefix(case_number)).await? {
            if let Some(raw) = self.store.get(&key).await? {
                let stored: StoredConfirmation = serde_json::from_slice(&raw)?;
                // A record edited in the store must not be resealed by the export.
                stored.ensure_sealed()?;
                confirmations.push(stored);
            }
        }
        if confirmations.is_empty() {
            return Err(Error::Other(format!(
                "No confirmations recorded for case {}",
                case_number
            )));
        }
        confirmations.sort_by_cached_key(|c| {
            (
                Timestamp::parse(&c.record.confirmed_at).ok(),
                c.record.confirmation_id.clone(),
            )
        });

        let data = ConfirmationData {
            case_number: case_number.to_string(),
            confirmations,
        };
        let package = ConfirmationPackage::build(&data, &self.examiner)?;
        tokio::fs::write(out, package.to_json_pretty()?).await?;

        info!(
            "Exported {} confirmations for case {} to {:?}",
            package.metadata.total_confirmations, case_number, out
        );
        Ok(ExportReport {
            case_number: case_number.to_string(),
            path: out.to_path_buf(),
            manifest: package.forensic_manifest,
        })
    }

    /// Import a confirmation package into an existing case.
    pub async fn import_confirmations(&self, package_path: &Path) -> Result<ImportReport> {
        let entry = AuditEntry::new(AuditAction::ConfirmationImport, &self.examiner)
            .with_file(package_path.display().to_string());
        let result = self.import_confirmations_inner(package_path).await;
        self.finish_import(entry, result).await
    }

    async fn import_confirmations_inner(&self, package_path: &Path) -> Result<ImportReport> {
        let raw = tokio::fs::read(package_path).await?;
        let package = ConfirmationPackage::parse(&raw)?;
        let verdict = package.validate()?;

        let mut report = ImportReport {
            case_number: Some(package.metadata.case_number.clone()),
            accepted: false,
            verdict,
            manifest_hash: package.forensic_manifest.manifest_hash.clone(),
            items_written: 0,
            warnings: Vec::new(),
        };

        if !report.verdict.is_valid {
            warn!(
                "Rejected confirmation package {:?}: {}",
                package_path, report.verdict.summary
            );
            return Ok(report);
        }

        // Only the attested payload is authoritative from here on.
        let data = package.confirmations()?;
        if package.metadata.case_number != data.case_number {
            report.warnings.push(format!(
                "Package metadata names case {} but attested data is for case {}",
                package.metadata.case_number, data.case_number
            ));
        }
        report.case_number = Some(data.case_number.clone());

        validate_case_number(&data.case_number)?;
        if !self.case_exists(&data.case_number).await? {
            return Err(Error::CaseNotFound(data.case_number));
        }

        // Every record must still match its own seal before anything is stored.
        for stored in &data.confirmations {
            stored.ensure_sealed()?;
        }

        let mut seen = BTreeSet::new();
        let mut encoded = Vec::with_capacity(data.confirmations.len());
        for stored in &data.confirmations {
            let id = &stored.record.confirmation_id;
            let image = &stored.record.original_image_id;
            if validate_file_name(id).is_err() {
                report
                    .warnings
                    .push(format!("Skipped confirmation with unusable id {:?}", id));
                continue;
            }
            if !seen.insert(id.as_str()) {
                report
                    .warnings
                    .push(format!("Skipped duplicate confirmation {} in package", id));
                continue;
            }
            let image_present = validate_file_name(image).is_ok()
                && self
                    .store
                    .get(&keys::image(&data.case_number, image))
                    .await?
                    .is_some();
            if !image_present {
                report.warnings.push(format!(
                    "Skipped confirmation {}: image {} is not in case {}",
                    id, image, data.case_number
                ));
                continue;
            }

            let key = keys::confirmation(&data.case_number, id);
            if let Some(existing) = self.store.get(&key).await? {
                let identical = serde_json::from_slice::<StoredConfirmation>(&existing)
                    .map(|e| &e == stored)
                    .unwrap_or(false);
                report.warnings.push(if identical {
                    format!("Skipped confirmation {}: already present", id)
                } else {
                    format!(
                        "Skipped confirmation {}: conflicts with the stored record, which was kept",
                        id
                    )
                });
                continue;
            }
            encoded.push((key, serde_json::to_string_pretty(stored)?));
        }
        let blobs: Vec<(String, &[u8])> = encoded
            .iter()
            .map(|(key, json)| (key.clone(), json.as_bytes()))
            .collect();
        let written = self.put_all(&blobs).await?;

        info!(
            "Imported {} of {} confirmations into case {}",
            written,
            data.confirmations.len(),
            data.case_number
        );
        report.accepted = true;
        report.items_written = written;
        Ok(report)
    }

    /// Write every blob or, on the first failure, remove those already written.
    async fn put_all(&self, blobs: &[(String, &[u8])]) -> Result<usize> {
        let mut written: Vec<&str> = Vec::with_capacity(blobs.len());
        for (key, content) in blobs {
            if let Err(e) = self.store.put(key, content).await {
                for done in &written {
                    if let Err(cleanup) = self.store.delete(done).await {
                        warn!("Failed to roll back {}: {}", done, cleanup);
                    }
                }
                return Err(e);
            }
            written.push(key);
        }
        Ok(written.len())
    }

    async fn case_exists(&self, case_number: &str) -> Result<bool> {
        Ok(self
            .store
            .get(&keys::case_data(case_number))
            .await?
            .is_some())
    }

    /// Record the audit entry for a finished phase and pass the result on.
    async fn finish<T>(
        &self,
        entry: AuditEntry,
        result: Result<T>,
        annotate: impl FnOnce(AuditEntry, &T) -> AuditEntry,
    ) -> Result<T> {
        match result {
            Ok(value) => {
                self.audit.record(annotate(entry, &value).finish()).await?;
                Ok(value)
            }
            Err(e) => {
                self.record_failure(entry, &e).await;
                Err(e)
            }
        }
    }

    async fn finish_import(
        &self,
        entry: AuditEntry,
        result: Result<ImportReport>,
    ) -> Result<ImportReport> {
        match result {
            Ok(report) => {
                let mut entry = entry
                    .with_manifest_hash(&report.manifest_hash)
                    .with_verdict(&report.verdict);
                if let Some(case_number) = &report.case_number {
                    entry = entry.with_case(case_number);
                }
                self.audit.record(entry.finish()).await?;
                Ok(report)
            }
            Err(e) => {
                self.record_failure(entry, &e).await;
                Err(e)
            }
        }
    }

    async fn record_failure(&self, entry: AuditEntry, error: &Error) {
        if let Err(audit_err) = self.audit.record(entry.failed(error).finish()).await {
            warn!("Failed to record audit entry: {}", audit_err);
        }
    }
}

/// Run synchronous archive work off the async executor.
async fn run_blocking<T, F>(task: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| Error::Other(format!("blocking task failed: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::{read_bundle, write_bundle};
    use crate::sink::MemoryAuditSink;
    use crate::store::MemoryBlobStore;
    use custody_manifest::AuditResult;
    use pretty_assertions::assert_eq;

    struct Harness {
        store: Arc<MemoryBlobStore>,
        sink: Arc<MemoryAuditSink>,
        workflow: Workflow,
    }

    fn harness(examiner: &str) -> Harness {
        let store = Arc::new(MemoryBlobStore::new());
        let sink = Arc::new(MemoryAuditSink::new());
        let workflow = Workflow::new(store.clone(), sink.clone(), examiner);
        Harness {
            store,
            sink,
            workflow,
        }
    }

    fn images() -> AttachmentSet {
        [
            ("bullet-1.png", b"first image".to_vec()),
            ("bullet-2.png", b"second image".to_vec()),
        ]
        .into_iter()
        .collect()
    }

    async fn results(sink: &MemoryAuditSink) -> Vec<(AuditAction, AuditResult)> {
        sink.snapshot()
            .await
            .entries()
            .iter()
            .map(|e| (e.action, e.result))
            .collect()
    }

    #[tokio::test]
    async fn test_export_import_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let bundle_path = dir.path().join("case.tar.gz");

        let lab_a = harness("Examiner A");
        let created = lab_a.workflow.create_case("CASE-1", images()).await.unwrap();
        assert_eq!(created.files.len(), 2);
        let export = lab_a.workflow.export_case("CASE-1", &bundle_path).await.unwrap();
        assert_eq!(export.manifest.total_files, 3);

        let lab_b = harness("Examiner B");
        let report = lab_b.workflow.import_case(&bundle_path).await.unwrap();
        assert!(report.accepted);
        assert!(report.verdict.is_valid);
        assert_eq!(report.case_number.as_deref(), Some("CASE-1"));
        assert_eq!(report.items_written, 3);
        assert_eq!(report.manifest_hash, export.manifest.manifest_hash);

        let (data_a, images_a) = lab_a.workflow.load_case("CASE-1").await.unwrap();
        let (data_b, images_b) = lab_b.workflow.load_case("CASE-1").await.unwrap();
        assert_eq!(data_a, data_b);
        assert_eq!(images_a, images_b);

        assert_eq!(
            results(&lab_a.sink).await,
            vec![
                (AuditAction::CaseCreate, AuditResult::Success),
                (AuditAction::CaseExport, AuditResult::Success),
            ]
        );
        let log_b = lab_b.sink.snapshot().await;
        let entry = &log_b.entries()[0];
        assert_eq!(entry.action, AuditAction::CaseImport);
        assert_eq!(entry.result, AuditResult::Success);
        assert_eq!(entry.case_number.as_deref(), Some("CASE-1"));
        assert_eq!(entry.user, "Examiner B");
        assert!(entry.integrity.is_some());
    }

    #[tokio::test]
    async fn test_tampered_bundle_is_rejected_and_not_stored() {
        let dir = tempfile::tempdir().unwrap();
        let bundle_path = dir.path().join("case.tar.gz");

        let lab_a = harness("Examiner A");
        lab_a.workflow.create_case("CASE-2", images()).await.unwrap();
        lab_a.workflow.export_case("CASE-2", &bundle_path).await.unwrap();

        let mut bundle = read_bundle(&bundle_path).unwrap();
        bundle.attachments.insert("bullet-2.png", b"swapped image".to_vec());
        write_bundle(&bundle, &bundle_path).unwrap();

        let lab_b = harness("Examiner B");
        let report = lab_b.workflow.import_case(&bundle_path).await.unwrap();
        assert!(!report.accepted);
        assert!(!report.verdict.is_valid);
        assert_eq!(report.verdict.image_validation["bullet-1.png"], true);
        assert_eq!(report.verdict.image_validation["bullet-2.png"], false);
        assert_eq!(report.items_written, 0);

        assert!(lab_b.store.list("").await.unwrap().is_empty());
        assert_eq!(
            results(&lab_b.sink).await,
            vec![(AuditAction::CaseImport, AuditResult::Rejected)]
        );
    }

    #[tokio::test]
    async fn test_import_existing_case_fails() {
        let dir = tempfile::tempdir().unwrap();
        let bundle_path = dir.path().join("case.tar.gz");

        let lab = harness("Examiner A");
        lab.workflow.create_case("CASE-3", images()).await.unwrap();
        lab.workflow.export_case("CASE-3", &bundle_path).await.unwrap();

        let err = lab.workflow.import_case(&bundle_path).await.unwrap_err();
        assert!(matches!(err, Error::CaseExists(ref c) if c == "CASE-3"));

        let log = lab.sink.snapshot().await;
        let last = log.entries().last().unwrap();
        assert_eq!(last.result, AuditResult::Failure);
        assert!(last.error.as_deref().unwrap().contains("CASE-3"));
    }

    #[tokio::test]
    async fn test_create_case_validates_input() {
        let lab = harness("Examiner A");
        assert!(matches!(
            lab.workflow.create_case("../escape", images()).await,
            Err(Error::InvalidCaseNumber(_))
        ));

        lab.workflow.create_case("CASE-4", images()).await.unwrap();
        assert!(matches!(
            lab.workflow.create_case("CASE-4", images()).await,
            Err(Error::CaseExists(_))
        ));
        assert!(matches!(
            lab.workflow.load_case("CASE-5").await,
            Err(Error::CaseNotFound(_))
        ));

        assert_eq!(
            results(&lab.sink).await,
            vec![
                (AuditAction::CaseCreate, AuditResult::Failure),
                (AuditAction::CaseCreate, AuditResult::Success),
                (AuditAction::CaseCreate, AuditResult::Failure),
            ]
        );
    }

    /// Store that refuses to write case data.
    struct FailingStore(MemoryBlobStore);

    #[async_trait::async_trait]
    impl BlobStore for FailingStore {
        async fn get(&self, path: &str) -> Result<Option<Vec<u8>>> {
            self.0.get(path).await
        }

        async fn put(&self, path: &str, content: &[u8]) -> Result<()> {
            if path.ends_with(keys::CASE_DATA_FILE) {
                return Err(Error::Store("disk full".to_string()));
            }
            self.0.put(path, content).await
        }

        async fn delete(&self, path: &str) -> Result<bool> {
            self.0.delete(path).await
        }

        async fn list(&self, prefix: &str) -> Result<Vec<String>> {
            self.0.list(prefix).await
        }
    }

    #[tokio::test]
    async fn test_failed_write_rolls_back_images() {
        let store = Arc::new(FailingStore(MemoryBlobStore::new()));
        let sink = Arc::new(MemoryAuditSink::new());
        let workflow = Workflow::new(store.clone(), sink.clone(), "Examiner A");

        let err = workflow.create_case("CASE-9", images()).await.unwrap_err();
        assert!(matches!(err, Error::Store(_)));
        assert!(store.list("").await.unwrap().is_empty());
        assert_eq!(
            results(&sink).await,
            vec![(AuditAction::CaseCreate, AuditResult::Failure)]
        );
    }

    #[tokio::test]
    async fn test_confirmation_flow() {
        let dir = tempfile::tempdir().unwrap();
        let bundle_path = dir.path().join("case.tar.gz");
        let package_path = dir.path().join("confirmations.json");

        let lab_a = harness("Examiner A");
        lab_a.workflow.create_case("CASE-6", images()).await.unwrap();
        lab_a.workflow.export_case("CASE-6", &bundle_path).await.unwrap();

        let lab_b = harness("Examiner B");
        assert!(lab_b.workflow.import_case(&bundle_path).await.unwrap().accepted);
        let stored = lab_b
            .workflow
            .create_confirmation("CASE-6", "bullet-1.png", Some("identified".to_string()))
            .await
            .unwrap();
        assert_eq!(stored.record.confirmed_by, "Examiner B");
        lab_b
            .workflow
            .export_confirmations("CASE-6", &package_path)
            .await
            .unwrap();

        let report = lab_a
            .workflow
            .import_confirmations(&package_path)
            .await
            .unwrap();
        assert!(report.accepted);
        assert_eq!(report.items_written, 1);
        assert!(report.warnings.is_empty());

        let key = keys::confirmation("CASE-6", &stored.record.confirmation_id);
        let raw = lab_a.store.get(&key).await.unwrap().unwrap();
        let imported: StoredConfirmation = serde_json::from_slice(&raw).unwrap();
        assert_eq!(imported, stored);

        assert_eq!(
            results(&lab_b.sink).await,
            vec![
                (AuditAction::CaseImport, AuditResult::Success),
                (AuditAction::ConfirmationCreate, AuditResult::Success),
                (AuditAction::ConfirmationExport, AuditResult::Success),
            ]
        );
        assert_eq!(
            results(&lab_a.sink).await.last(),
            Some(&(AuditAction::ConfirmationImport, AuditResult::Success))
        );
    }

    #[tokio::test]
    async fn test_confirmation_preconditions() {
        let dir = tempfile::tempdir().unwrap();
        let package_path = dir.path().join("confirmations.json");

        let lab = harness("Examiner B");
        assert!(matches!(
            lab.workflow
                .create_confirmation("CASE-7", "bullet-1.png", None)
                .await,
            Err(Error::CaseNotFound(_))
        ));

        lab.workflow.create_case("CASE-7", images()).await.unwrap();
        assert!(matches!(
            lab.workflow
                .create_confirmation("CASE-7", "missing.png", None)
                .await,
            Err(Error::ImageNotFound { ref image, .. }) if image == "missing.png"
        ));
        assert!(lab
            .workflow
            .export_confirmations("CASE-7", &package_path)
            .await
            .is_err());

        lab.workflow
            .create_confirmation("CASE-7", "bullet-2.png", None)
            .await
            .unwrap();
        lab.workflow
            .export_confirmations("CASE-7", &package_path)
            .await
            .unwrap();

        let other = harness("Examiner C");
        assert!(matches!(
            other.workflow.import_confirmations(&package_path).await,
            Err(Error::CaseNotFound(ref c)) if c == "CASE-7"
        ));
    }

    #[tokio::test]
    async fn test_tampered_confirmation_package_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let package_path = dir.path().join("confirmations.json");

        let lab = harness("Examiner B");
        lab.workflow.create_case("CASE-8", images()).await.unwrap();
        lab.workflow
            .create_confirmation("CASE-8", "bullet-1.png", None)
            .await
            .unwrap();
        lab.workflow
            .export_confirmations("CASE-8", &package_path)
            .await
            .unwrap();

        let raw = std::fs::read(&package_path).unwrap();
        let mut package = ConfirmationPackage::parse(&raw).unwrap();
        package.confirmation_data = package.confirmation_data.replace("bullet-1", "bullet-2");
        std::fs::write(&package_path, package.to_json_pretty().unwrap()).unwrap();

        let before = lab.store.list(&keys::confirmations_prefix("CASE-8")).await.unwrap();
        let report = lab.workflow.import_confirmations(&package_path).await.unwrap();
        assert!(!report.accepted);
        assert!(!report.verdict.data_valid);
        let after = lab.store.list(&keys::confirmations_prefix("CASE-8")).await.unwrap();
        assert_eq!(before, after);

        assert_eq!(
            results(&lab.sink).await.last(),
            Some(&(AuditAction::ConfirmationImport, AuditResult::Rejected))
        );
    }

    #[tokio::test]
    async fn test_export_refuses_edited_confirmation() {
        let dir = tempfile::tempdir().unwrap();
        let package_path = dir.path().join("confirmations.json");

        let lab = harness("Examiner B");
        lab.workflow.create_case("CASE-10", images()).await.unwrap();
        let stored = lab
            .workflow
            .create_confirmation("CASE-10", "bullet-1.png", Some("identified".to_string()))
            .await
            .unwrap();

        let key = keys::confirmation("CASE-10", &stored.record.confirmation_id);
        let raw = lab.store.get(&key).await.unwrap().unwrap();
        let mut edited: StoredConfirmation = serde_json::from_slice(&raw).unwrap();
        edited.record.note = Some("excluded".to_string());
        lab.store
            .put(&key, serde_json::to_string_pretty(&edited).unwrap().as_bytes())
            .await
            .unwrap();

        let err = lab
            .workflow
            .export_confirmations("CASE-10", &package_path)
            .await
            .unwrap_err();
        assert!(
            matches!(err, Error::IntegrityViolation { ref item, .. } if item.contains(&stored.record.confirmation_id))
        );
        assert!(!package_path.exists());

        let log = lab.sink.snapshot().await;
        let last = log.entries().last().unwrap();
        assert_eq!(last.action, AuditAction::ConfirmationExport);
        assert_eq!(last.result, AuditResult::Failure);
        assert!(last.error.as_deref().unwrap().contains("Integrity check failed"));
    }

    #[tokio::test]
    async fn test_import_refuses_resealed_package_with_edited_record() {
        let dir = tempfile::tempdir().unwrap();
        let package_path = dir.path().join("confirmations.json");

        let lab = harness("Examiner A");
        lab.workflow.create_case("CASE-11", images()).await.unwrap();

        let record = ConfirmationRecord::new("CASE-11", "bullet-1.png", "Examiner B", None);
        let mut stored = StoredConfirmation::seal(record).unwrap();
        stored.record.confirmed_by = "Examiner Z".to_string();
        let data = ConfirmationData {
            case_number: "CASE-11".to_string(),
            confirmations: vec![stored],
        };
        let package = ConfirmationPackage::build(&data, "Examiner Z").unwrap();
        std::fs::write(&package_path, package.to_json_pretty().unwrap()).unwrap();

        let err = lab
            .workflow
            .import_confirmations(&package_path)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::IntegrityViolation { .. }));
        assert!(lab
            .store
            .list(&keys::confirmations_prefix("CASE-11"))
            .await
            .unwrap()
            .is_empty());
        assert_eq!(
            results(&lab.sink).await.last(),
            Some(&(AuditAction::ConfirmationImport, AuditResult::Failure))
        );
    }

    #[tokio::test]
    async fn test_import_skips_existing_and_unknown_image_records() {
        let dir = tempfile::tempdir().unwrap();
        let package_path = dir.path().join("confirmations.json");

        let lab = harness("Examiner A");
        lab.workflow.create_case("CASE-12", images()).await.unwrap();
        let existing = lab
            .workflow
            .create_confirmation("CASE-12", "bullet-1.png", None)
            .await
            .unwrap();

        let fresh = StoredConfirmation::seal(ConfirmationRecord::new(
            "CASE-12",
            "bullet-2.png",
            "Examiner B",
            None,
        ))
        .unwrap();
        let orphan = StoredConfirmation::seal(ConfirmationRecord::new(
            "CASE-12",
            "ghost.png",
            "Examiner B",
            None,
        ))
        .unwrap();
        let data = ConfirmationData {
            case_number: "CASE-12".to_string(),
            confirmations: vec![existing.clone(), fresh.clone(), orphan.clone()],
        };
        let package = ConfirmationPackage::build(&data, "Examiner B").unwrap();
        std::fs::write(&package_path, package.to_json_pretty().unwrap()).unwrap();

        let report = lab
            .workflow
            .import_confirmations(&package_path)
            .await
            .unwrap();
        assert!(report.accepted);
        assert_eq!(report.items_written, 1);
        assert_eq!(report.warnings.len(), 2);
        assert!(report.warnings[0].contains("already present"));
        assert!(report.warnings[1].contains("ghost.png"));

        let keys_now = lab
            .store
            .list(&keys::confirmations_prefix("CASE-12"))
            .await
            .unwrap();
        assert_eq!(keys_now.len(), 2);
        assert!(lab
            .store
            .get(&keys::confirmation("CASE-12", &orphan.record.confirmation_id))
            .await
            .unwrap()
            .is_none());

        let again = lab
            .workflow
            .import_confirmations(&package_path)
            .await
            .unwrap();
        assert_eq!(again.items_written, 0);
        assert!(again.warnings[1].contains(&fresh.record.confirmation_id));
    }

    #[tokio::test]
    async fn test_non_string_confirmation_data_fails() {
        let dir = tempfile::tempdir().unwrap();
        let package_path = dir.path().join("confirmations.json");
        std::fs::write(
            &package_path,
            r#"{"metadata":{"caseNumber":"X","exportedAt":"t","exportedBy":"b","totalConfirmations":0},"confirmationData":{"caseNumber":"X"},"forensicManifest":{}}"#,
        )
        .unwrap();

        let lab = harness("Examiner B");
        assert!(matches!(
            lab.workflow.import_confirmations(&package_path).await,
            Err(Error::InvalidInput { .. })
        ));
        assert_eq!(
            results(&lab.sink).await,
            vec![(AuditAction::ConfirmationImport, AuditResult::Failure)]
        );
    }
}
