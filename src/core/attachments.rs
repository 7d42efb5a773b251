use crate::domain::model::{AttachmentMapping, FieldValue, Record};
use crate::domain::ports::{AttachmentUploader, ObjectStore, StoreResult};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// One attachment value that could not be hosted and was degraded to empty.
#[derive(Debug, Clone, PartialEq)]
pub struct AttachmentFailure {
    pub field: String,
    pub reference: String,
    pub reason: String,
}

/// Replaces local file references with hosted attachment descriptors.
///
/// Holds no per-record state, so one instance is shared by every upload worker.
pub struct AttachmentResolver {
    uploader: Option<Arc<dyn AttachmentUploader>>,
    columns: Vec<String>,
    mappings: Vec<AttachmentMapping>,
    base_dir: Option<PathBuf>,
}

impl AttachmentResolver {
    pub fn new(
        uploader: Option<Arc<dyn AttachmentUploader>>,
        columns: Vec<String>,
        mappings: Vec<AttachmentMapping>,
    ) -> Self {
        Self {
            uploader,
            columns,
            mappings,
            base_dir: None,
        }
    }

    /// Relative references are looked up under `dir`, usually the input file's directory.
    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(dir.into());
        self
    }

    /// A resolver that leaves every value untouched.
    pub fn disabled() -> Self {
        Self::new(None, Vec::new(), Vec::new())
    }

    pub fn is_active(&self) -> bool {
        self.uploader.is_some() && (!self.columns.is_empty() || !self.mappings.is_empty())
    }

    /// Readies the hosting side. Nothing happens when no uploader is configured.
    pub async fn prepare(&self) -> StoreResult<()> {
        match self.uploader.as_deref() {
            Some(uploader) => uploader.prepare().await,
            None => Ok(()),
        }
    }

    pub async fn resolve(&self, record: &mut Record) -> Vec<AttachmentFailure> {
        let Some(uploader) = self.uploader.as_deref() else {
            return Vec::new();
        };

        let mut failures = Vec::new();
        for column in &self.columns {
            if let Some(failure) = self.resolve_into(uploader, record, column, column).await {
                failures.push(failure);
            }
        }
        for mapping in &self.mappings {
            if let Some(failure) = self
                .resolve_into(uploader, record, &mapping.source, &mapping.target)
                .await
            {
                failures.push(failure);
            }
        }
        failures
    }

    async fn resolve_into(
        &self,
        uploader: &dyn AttachmentUploader,
        record: &mut Record,
        source: &str,
        target: &str,
    ) -> Option<AttachmentFailure> {
        let reference = match record.get(source)? {
            FieldValue::Empty => return None,
            value => match value.as_reference() {
                Some(reference) => reference.trim().to_string(),
                None => {
                    let failure = AttachmentFailure {
                        field: source.to_string(),
                        reference: format!("{value:?}"),
                        reason: "value is not a file reference".to_string(),
                    };
                    tracing::warn!(
                        "Attachment column '{}' holds a non-text value; leaving it empty",
                        source
                    );
                    record.insert(target, FieldValue::Empty);
                    return Some(failure);
                }
            },
        };

        if reference.is_empty() {
            tracing::debug!("Empty attachment reference in column '{}'", source);
            record.insert(target, FieldValue::Empty);
            return None;
        }

        let path = self.local_path(&reference);
        match uploader.upload_file(&path).await {
            Ok(url) => {
                tracing::debug!("Hosted '{}' at {}", reference, url);
                record.insert(target, FieldValue::attachment(url));
                None
            }
            Err(err) => {
                tracing::warn!("Attachment '{}' could not be uploaded: {}", reference, err);
                record.insert(target, FieldValue::Empty);
                Some(AttachmentFailure {
                    field: source.to_string(),
                    reference,
                    reason: err.to_string(),
                })
            }
        }
    }

    fn local_path(&self, reference: &str) -> PathBuf {
        let path = Path::new(reference);
        match &self.base_dir {
            Some(dir) if path.is_relative() => dir.join(path),
            _ => path.to_path_buf(),
        }
    }
}

/// Hosts files in a per-run scratch folder of an object store.
pub struct ScratchUploader<O: ObjectStore> {
    store: O,
    root: String,
    folder: String,
}

impl<O: ObjectStore> ScratchUploader<O> {
    pub fn new(store: O, root: impl Into<String>, started: NaiveDateTime) -> Self {
        let root = root.into();
        let folder = format!("{root}{root} {}", started.format("%Y-%m-%d %H-%M-%S"));
        Self {
            store,
            root,
            folder,
        }
    }

    pub fn folder(&self) -> &str {
        &self.folder
    }

    /// `{parent-dir}/{file}` of the local path, or just the file name.
    fn object_name(path: &Path) -> String {
        let file = path
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_default();
        match path
            .parent()
            .and_then(Path::file_name)
            .map(|p| p.to_string_lossy())
        {
            Some(parent) if !parent.is_empty() => format!("{parent}/{file}"),
            _ => file,
        }
    }
}

#[async_trait]
impl<O: ObjectStore> AttachmentUploader for ScratchUploader<O> {
    /// Creates the root and run folders. Both calls are idempotent.
    async fn prepare(&self) -> StoreResult<()> {
        self.store.create_folder(&self.root).await?;
        self.store.create_folder(&self.folder).await?;
        tracing::info!("Attachments will be stored under {}", self.folder);
        Ok(())
    }

    async fn upload_file(&self, path: &Path) -> StoreResult<String> {
        let bytes = tokio::fs::read(path).await?;
        let stored = self
            .store
            .upload(bytes, &self.folder, &Self::object_name(path))
            .await?;
        self.store.create_shared_link(&stored).await
    }
}
