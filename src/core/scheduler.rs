use crate::core::attachments::AttachmentResolver;
use crate::domain::model::{Record, RecordState, RowFailure, UploadReport};
use crate::domain::ports::RecordStore;
use crate::utils::progress::UploadProgress;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::task::JoinSet;

pub const DEFAULT_WORKERS: usize = 5;

type Queue = mpsc::UnboundedReceiver<(usize, Record)>;

enum Dequeue {
    Next(usize, Record),
    Drained,
    Corrupted,
}

/// State shared by the workers of one batch. Records themselves are never
/// shared: a worker owns each record from dequeue until its upload returns.
struct Batch {
    queue: Mutex<Queue>,
    states: Mutex<Vec<RecordState>>,
    failures: Mutex<Vec<RowFailure>>,
    halted: Mutex<Option<String>>,
    attachment_failures: AtomicUsize,
    stop: Arc<AtomicBool>,
    progress: UploadProgress,
    store: Arc<dyn RecordStore>,
    resolver: Arc<AttachmentResolver>,
}

impl Batch {
    fn dequeue(&self) -> Dequeue {
        let Ok(mut queue) = self.queue.lock() else {
            return Dequeue::Corrupted;
        };
        match queue.try_recv() {
            Ok((index, record)) => Dequeue::Next(index, record),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => Dequeue::Drained,
        }
    }

    fn set_state(&self, index: usize, state: RecordState) {
        let mut states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(slot) = states.get_mut(index) {
            *slot = state;
        }
    }

    fn fail(&self, index: usize, reason: String) {
        self.set_state(index, RecordState::Failed);
        self.progress.record_failed();
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RowFailure { index, reason });
    }

    /// Stops every worker before its next dequeue. The first reason wins.
    fn halt(&self, reason: String) {
        self.stop.store(true, Ordering::SeqCst);
        let mut halted = self.halted.lock().unwrap_or_else(PoisonError::into_inner);
        if halted.is_none() {
            *halted = Some(reason);
        }
    }
}

/// Bounded pool of upload workers draining one shared queue.
pub struct UploadScheduler {
    store: Arc<dyn RecordStore>,
    resolver: Arc<AttachmentResolver>,
    workers: usize,
    stop: Arc<AtomicBool>,
    show_progress: bool,
}

impl UploadScheduler {
    pub fn new(
        store: Arc<dyn RecordStore>,
        resolver: Arc<AttachmentResolver>,
        workers: usize,
    ) -> Self {
        Self {
            store,
            resolver,
            workers: workers.max(1),
            stop: Arc::new(AtomicBool::new(false)),
            show_progress: false,
        }
    }

    /// Shares an externally owned stop flag, e.g. one set on Ctrl-C.
    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    pub fn with_progress(mut self, visible: bool) -> Self {
        self.show_progress = visible;
        self
    }

    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub async fn run(&self, records: Vec<Record>) -> UploadReport {
        let total = records.len();
        let (tx, rx) = mpsc::unbounded_channel();
        for entry in records.into_iter().enumerate() {
            // The receiver is alive until the batch is dropped.
            let _ = tx.send(entry);
        }
        drop(tx);

        let batch = Arc::new(Batch {
            queue: Mutex::new(rx),
            states: Mutex::new(vec![RecordState::Queued; total]),
            failures: Mutex::new(Vec::new()),
            halted: Mutex::new(None),
            attachment_failures: AtomicUsize::new(0),
            stop: Arc::clone(&self.stop),
            progress: UploadProgress::new(total, self.show_progress),
            store: Arc::clone(&self.store),
            resolver: Arc::clone(&self.resolver),
        });

        let workers = self.workers.min(total.max(1));
        tracing::info!("Uploading {} records with {} workers", total, workers);

        let mut join_set = JoinSet::new();
        for worker_id in 0..workers {
            join_set.spawn(run_worker(worker_id, Arc::clone(&batch)));
        }
        while let Some(joined) = join_set.join_next().await {
            if let Err(err) = joined {
                tracing::error!("Upload worker stopped unexpectedly: {}", err);
                batch.halt(format!("upload worker failed: {err}"));
            }
        }
        batch.progress.finish();

        let states = std::mem::take(&mut *batch.states.lock().unwrap_or_else(PoisonError::into_inner));
        let failures =
            std::mem::take(&mut *batch.failures.lock().unwrap_or_else(PoisonError::into_inner));
        let mut halted = batch
            .halted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let unfinished = states
            .iter()
            .any(|s| matches!(s, RecordState::Queued | RecordState::InFlight));
        if halted.is_none() && unfinished && self.stop.load(Ordering::SeqCst) {
            halted = Some("interrupted".to_string());
        }

        UploadReport {
            states,
            failures,
            attachment_failures: batch.attachment_failures.load(Ordering::SeqCst),
            halted,
        }
    }
}

async fn run_worker(worker_id: usize, batch: Arc<Batch>) {
    loop {
        if batch.stop.load(Ordering::SeqCst) {
            tracing::debug!("Worker {} stopping on signal", worker_id);
            break;
        }

        let (index, mut record) = match batch.dequeue() {
            Dequeue::Next(index, record) => (index, record),
            Dequeue::Drained => break,
            Dequeue::Corrupted => {
                tracing::error!("Worker {} found the work queue corrupted", worker_id);
                batch.halt("work queue corrupted".to_string());
                break;
            }
        };
        batch.set_state(index, RecordState::InFlight);

        let degraded = batch.resolver.resolve(&mut record).await;
        if !degraded.is_empty() {
            batch
                .attachment_failures
                .fetch_add(degraded.len(), Ordering::SeqCst);
        }

        match batch.store.create_record(&record.fields).await {
            Ok(id) => {
                tracing::debug!("Record {} uploaded as {}", index + 1, id);
                batch.set_state(index, RecordState::Uploaded);
                batch.progress.record_uploaded();
            }
            Err(err) if err.is_row_level() => {
                tracing::warn!("Record {} was rejected and skipped: {}", index + 1, err);
                batch.fail(index, err.to_string());
            }
            Err(err) => {
                tracing::error!("Record {} hit a systemic failure: {}", index + 1, err);
                batch.fail(index, err.to_string());
                batch.halt(err.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::attachments::{AttachmentResolver, ScratchUploader};
    use crate::core::test_support::{schema, MockObjectStore, MockRecordStore};
    use crate::domain::model::FieldValue;
    use crate::domain::ports::AttachmentUploader;
    use crate::utils::error::StoreError;
    use std::collections::BTreeSet;
    use std::time::Duration;

    fn numbered(count: usize) -> Vec<Record> {
        (0..count)
            .map(|i| [("n", FieldValue::Number(i as f64))].into_iter().collect())
            .collect()
    }

    fn is_record(fields: &std::collections::BTreeMap<String, FieldValue>, n: usize) -> bool {
        fields.get("n") == Some(&FieldValue::Number(n as f64))
    }

    fn scheduler(store: &Arc<MockRecordStore>, workers: usize) -> UploadScheduler {
        let store: Arc<dyn RecordStore> = store.clone();
        UploadScheduler::new(store, Arc::new(AttachmentResolver::disabled()), workers)
    }

    #[tokio::test]
    async fn test_row_level_failure_is_isolated() {
        let store = Arc::new(
            MockRecordStore::new(schema(&["n"])).failing_records(|fields| {
                is_record(fields, 3).then(|| StoreError::Validation("INVALID_VALUE_FOR_COLUMN".into()))
            }),
        );

        let report = scheduler(&store, 3).run(numbered(10)).await;

        assert_eq!(report.uploaded(), 9);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.states[3], RecordState::Failed);
        assert_eq!(report.failures[0].index, 3);
        assert!(report.is_success());
        assert_eq!(store.created().len(), 9);
    }

    #[tokio::test]
    async fn test_systemic_failure_halts_batch() {
        let store = Arc::new(
            MockRecordStore::new(schema(&["n"]))
                .with_delay(Duration::from_millis(20))
                .failing_records(|fields| {
                    is_record(fields, 0).then(|| StoreError::Server {
                        status: 500,
                        body: "internal".into(),
                    })
                }),
        );

        let report = scheduler(&store, 2).run(numbered(10)).await;

        assert!(!report.is_success());
        assert!(report.unprocessed() > 0);
        assert_eq!(report.states[0], RecordState::Failed);
        assert!(report.halted.unwrap().contains("500"));
    }

    #[tokio::test]
    async fn test_rejection_quoting_duplicate_stays_row_level() {
        let body = r#"{"error":{"type":"INVALID_MULTIPLE_CHOICE_OPTIONS","message":"Insufficient permissions to create new select option \"DUPLICATE\""}}"#;
        let store = Arc::new(MockRecordStore::new(schema(&["n"])).failing_records(move |fields| {
            is_record(fields, 3).then(|| StoreError::from_status(422, body.to_string()))
        }));

        let report = scheduler(&store, 1).run(numbered(10)).await;

        assert!(report.is_success());
        assert_eq!(report.uploaded(), 9);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.states[3], RecordState::Failed);
    }

    #[tokio::test]
    async fn test_panicking_worker_halts_batch() {
        let store = Arc::new(
            MockRecordStore::new(schema(&["n"]))
                .with_delay(Duration::from_millis(20))
                .failing_records(|fields| {
                    if is_record(fields, 0) {
                        panic!("store connection pool dropped");
                    }
                    None
                }),
        );

        let report = scheduler(&store, 2).run(numbered(10)).await;

        assert!(!report.is_success());
        assert!(report.unprocessed() > 0);
        assert_eq!(report.states[0], RecordState::InFlight);
        assert!(report.halted.unwrap().starts_with("upload worker failed"));
    }

    #[tokio::test]
    async fn test_each_record_uploaded_exactly_once() {
        let store = Arc::new(
            MockRecordStore::new(schema(&["n"])).with_delay(Duration::from_millis(1)),
        );

        let report = scheduler(&store, 5).run(numbered(50)).await;

        assert_eq!(report.uploaded(), 50);
        let seen: BTreeSet<u64> = store
            .created()
            .iter()
            .filter_map(|fields| match fields.get("n") {
                Some(FieldValue::Number(n)) => Some(*n as u64),
                _ => None,
            })
            .collect();
        assert_eq!(seen.len(), 50);
    }

    #[tokio::test]
    async fn test_preset_stop_flag_leaves_everything_queued() {
        let store = Arc::new(MockRecordStore::new(schema(&["n"])));
        let scheduler = scheduler(&store, 3);
        scheduler.stop_flag().store(true, Ordering::SeqCst);

        let report = scheduler.run(numbered(4)).await;

        assert_eq!(report.unprocessed(), 4);
        assert_eq!(report.halted.as_deref(), Some("interrupted"));
        assert!(store.created().is_empty());
    }

    #[tokio::test]
    async fn test_attachment_failures_are_counted_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let uploader: Arc<dyn AttachmentUploader> = Arc::new(ScratchUploader::new(
            MockObjectStore::default(),
            "/Airlift",
            chrono::Local::now().naive_local(),
        ));
        let resolver = AttachmentResolver::new(Some(uploader), vec!["Image".into()], Vec::new())
            .with_base_dir(dir.path());
        let store = Arc::new(MockRecordStore::new(schema(&["Image"])));
        let dyn_store: Arc<dyn RecordStore> = store.clone();

        let records = (0..3)
            .map(|i| {
                [("Image", FieldValue::Text(format!("missing-{i}.png")))]
                    .into_iter()
                    .collect()
            })
            .collect();
        let report = UploadScheduler::new(dyn_store, Arc::new(resolver), 2)
            .run(records)
            .await;

        assert_eq!(report.uploaded(), 3);
        assert_eq!(report.attachment_failures, 3);
        assert!(store
            .created()
            .iter()
            .all(|fields| fields.get("Image") == Some(&FieldValue::Empty)));
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let store = Arc::new(MockRecordStore::new(schema(&["n"])));
        let report = scheduler(&store, 5).run(Vec::new()).await;
        assert_eq!(report.total(), 0);
        assert!(report.is_success());
    }
}
