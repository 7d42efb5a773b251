use crate::domain::model::{FieldValue, Record, RemoteSchema, UploadReport};
use crate::utils::error::{Result, StoreError};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::Path;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Remote tabular store the records end up in.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get_schema(&self) -> StoreResult<RemoteSchema>;

    async fn create_field(&self, table_id: &str, name: &str, field_type: &str) -> StoreResult<()>;

    /// Returns the id of the created record.
    async fn create_record(&self, fields: &BTreeMap<String, FieldValue>) -> StoreResult<String>;

    async fn list_record_ids(&self) -> StoreResult<Vec<String>>;

    /// Deletes `ids` and returns how many the store confirmed. Implementations
    /// split the ids into whatever batch size the remote API accepts.
    async fn delete_records(&self, ids: &[String]) -> StoreResult<usize>;

    async fn delete_all_records(&self) -> StoreResult<usize> {
        let ids = self.list_record_ids().await?;
        self.delete_records(&ids).await
    }
}

/// Remote object store that can host binary content behind shareable links.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Idempotent: an existing folder counts as success.
    async fn create_folder(&self, path: &str) -> StoreResult<()>;

    /// Stores `bytes` as `folder/name` and returns the stored path.
    async fn upload(&self, bytes: Vec<u8>, folder: &str, name: &str) -> StoreResult<String>;

    async fn create_shared_link(&self, path: &str) -> StoreResult<String>;

    async fn delete(&self, path: &str) -> StoreResult<()>;

    /// Paths of the direct children of `path`.
    async fn list_folder(&self, path: &str) -> StoreResult<Vec<String>>;
}

/// Turns a local file into a stable URL. Shared by all upload workers.
#[async_trait]
pub trait AttachmentUploader: Send + Sync {
    /// Called once before the first upload of a run.
    async fn prepare(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn upload_file(&self, path: &Path) -> StoreResult<String>;
}

#[async_trait]
pub trait Pipeline: Send + Sync {
    async fn extract(&self) -> Result<Vec<Record>>;
    async fn transform(&self, records: Vec<Record>) -> Result<Vec<Record>>;
    async fn load(&self, records: Vec<Record>) -> Result<UploadReport>;
}
