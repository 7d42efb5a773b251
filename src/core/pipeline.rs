use crate::core::attachments::AttachmentResolver;
use crate::core::normalizer::RecordNormalizer;
use crate::core::reconciler::{ReconcileOptions, SchemaReconciler};
use crate::core::scheduler::{UploadScheduler, DEFAULT_WORKERS};
use crate::domain::model::{DuplicateColumnPolicy, Record, UploadReport};
use crate::domain::ports::{Pipeline, RecordStore};
use crate::utils::error::{AirliftError, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// File to table upload: normalize, reconcile against the remote schema,
/// then resolve attachments and upload under bounded concurrency.
pub struct UploadPipeline {
    input: PathBuf,
    normalizer: RecordNormalizer,
    reconciler: SchemaReconciler,
    store: Arc<dyn RecordStore>,
    resolver: Arc<AttachmentResolver>,
    workers: usize,
    stop: Arc<AtomicBool>,
    show_progress: bool,
}

impl UploadPipeline {
    pub fn new(input: impl Into<PathBuf>, store: Arc<dyn RecordStore>) -> Self {
        Self {
            input: input.into(),
            normalizer: RecordNormalizer::new(DuplicateColumnPolicy::default()),
            reconciler: SchemaReconciler::new(ReconcileOptions::default()),
            store,
            resolver: Arc::new(AttachmentResolver::disabled()),
            workers: DEFAULT_WORKERS,
            stop: Arc::new(AtomicBool::new(false)),
            show_progress: false,
        }
    }

    pub fn with_duplicate_policy(mut self, policy: DuplicateColumnPolicy) -> Self {
        self.normalizer = RecordNormalizer::new(policy);
        self
    }

    pub fn with_reconcile_options(mut self, options: ReconcileOptions) -> Self {
        self.reconciler = SchemaReconciler::new(options);
        self
    }

    pub fn with_resolver(mut self, resolver: AttachmentResolver) -> Self {
        self.resolver = Arc::new(resolver);
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    pub fn with_progress(mut self, visible: bool) -> Self {
        self.show_progress = visible;
        self
    }
}

#[async_trait]
impl Pipeline for UploadPipeline {
    async fn extract(&self) -> Result<Vec<Record>> {
        tracing::debug!("Reading {}", self.input.display());
        let records = self.normalizer.read_file(&self.input)?;
        if records.is_empty() {
            return Err(AirliftError::config(format!(
                "{} contains no records",
                self.input.display()
            )));
        }
        Ok(records)
    }

    async fn transform(&self, records: Vec<Record>) -> Result<Vec<Record>> {
        let schema = self.store.get_schema().await?;
        tracing::debug!(
            "Table '{}' declares {} fields",
            schema.table_name,
            schema.fields.len()
        );
        self.reconciler
            .reconcile(self.store.as_ref(), &schema, records)
            .await
    }

    async fn load(&self, records: Vec<Record>) -> Result<UploadReport> {
        self.resolver.prepare().await?;
        let scheduler = UploadScheduler::new(
            Arc::clone(&self.store),
            Arc::clone(&self.resolver),
            self.workers,
        )
        .with_stop_flag(Arc::clone(&self.stop))
        .with_progress(self.show_progress);

        Ok(scheduler.run(records).await)
    }
}
