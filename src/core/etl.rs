use crate::domain::model::{Record, UploadReport};
use crate::domain::ports::Pipeline;
use crate::utils::error::{AirliftError, Result};
use crate::utils::monitor::RunMetrics;
use std::time::Instant;

pub struct EtlEngine<P: Pipeline> {
    pipeline: P,
    metrics: RunMetrics,
}

impl<P: Pipeline> EtlEngine<P> {
    pub fn new(pipeline: P) -> Self {
        Self {
            pipeline,
            metrics: RunMetrics::default(),
        }
    }

    pub fn new_with_monitoring(pipeline: P, monitor: bool) -> Self {
        Self {
            pipeline,
            metrics: RunMetrics::new(monitor),
        }
    }

    pub fn metrics(&self) -> &RunMetrics {
        &self.metrics
    }

    /// Runs the three phases. A batch that stopped early is an error, but its
    /// summary is logged first.
    pub async fn run(&self) -> Result<UploadReport> {
        tracing::info!("Starting upload run");

        let started = Instant::now();
        let records = self.pipeline.extract().await?;
        self.metrics.record("extract", started.elapsed(), records.len());
        self.run_extracted(records).await
    }

    /// Transform and load for records the caller already extracted, so that
    /// input problems surface before any remote service is contacted.
    pub async fn run_extracted(&self, records: Vec<Record>) -> Result<UploadReport> {
        tracing::info!("Read {} records", records.len());

        let started = Instant::now();
        let records = self.pipeline.transform(records).await?;
        self.metrics.record("transform", started.elapsed(), records.len());

        let started = Instant::now();
        let report = self.pipeline.load(records).await?;
        self.metrics.record("load", started.elapsed(), report.total());

        log_summary(&report);
        self.metrics.log_final_stats();

        match &report.halted {
            Some(reason) => Err(AirliftError::UploadHalted {
                completed: report.uploaded() + report.failed(),
                total: report.total(),
                reason: reason.clone(),
            }),
            None => Ok(report),
        }
    }
}

pub fn log_summary(report: &UploadReport) {
    tracing::info!(
        "Uploaded {} of {} records ({} failed, {} not processed)",
        report.uploaded(),
        report.total(),
        report.failed(),
        report.unprocessed()
    );
    if report.attachment_failures > 0 {
        tracing::warn!(
            "{} attachment values could not be uploaded and were left empty",
            report.attachment_failures
        );
    }
}
