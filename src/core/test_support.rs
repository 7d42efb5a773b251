use crate::domain::model::{FieldValue, RemoteSchema};
use crate::domain::ports::{ObjectStore, RecordStore, StoreResult};
use crate::utils::error::StoreError;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

type Fields = BTreeMap<String, FieldValue>;
type RecordHook = Box<dyn Fn(&Fields) -> Option<StoreError> + Send + Sync>;
type FieldHook = Box<dyn Fn(&str) -> Option<StoreError> + Send + Sync>;

pub(crate) fn schema(fields: &[&str]) -> RemoteSchema {
    RemoteSchema {
        table_id: "tblTest".into(),
        table_name: "Test".into(),
        fields: fields
            .iter()
            .map(|name| (name.to_string(), "singleLineText".to_string()))
            .collect(),
    }
}

pub(crate) struct MockRecordStore {
    pub schema: RemoteSchema,
    pub field_calls: Mutex<Vec<String>>,
    pub created: Mutex<Vec<Fields>>,
    pub deleted: Mutex<Vec<String>>,
    pub delay: Duration,
    on_record: Option<RecordHook>,
    on_field: Option<FieldHook>,
}

impl MockRecordStore {
    pub fn new(schema: RemoteSchema) -> Self {
        Self {
            schema,
            field_calls: Mutex::new(Vec::new()),
            created: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
            on_record: None,
            on_field: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing_records(
        mut self,
        hook: impl Fn(&Fields) -> Option<StoreError> + Send + Sync + 'static,
    ) -> Self {
        self.on_record = Some(Box::new(hook));
        self
    }

    pub fn failing_fields(
        mut self,
        hook: impl Fn(&str) -> Option<StoreError> + Send + Sync + 'static,
    ) -> Self {
        self.on_field = Some(Box::new(hook));
        self
    }

    pub fn created(&self) -> Vec<Fields> {
        self.created.lock().unwrap().clone()
    }

    pub fn field_calls(&self) -> Vec<String> {
        self.field_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl RecordStore for MockRecordStore {
    async fn get_schema(&self) -> StoreResult<RemoteSchema> {
        Ok(self.schema.clone())
    }

    async fn create_field(&self, _table_id: &str, name: &str, _field_type: &str) -> StoreResult<()> {
        self.field_calls.lock().unwrap().push(name.to_string());
        match self.on_field.as_ref().and_then(|hook| hook(name)) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn create_record(&self, fields: &Fields) -> StoreResult<String> {
        if let Some(err) = self.on_record.as_ref().and_then(|hook| hook(fields)) {
            return Err(err);
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let mut created = self.created.lock().unwrap();
        created.push(fields.clone());
        Ok(format!("rec{}", created.len()))
    }

    async fn list_record_ids(&self) -> StoreResult<Vec<String>> {
        Ok((1..=self.created.lock().unwrap().len())
            .map(|i| format!("rec{i}"))
            .collect())
    }

    async fn delete_records(&self, ids: &[String]) -> StoreResult<usize> {
        self.deleted.lock().unwrap().extend(ids.iter().cloned());
        Ok(ids.len())
    }
}

#[derive(Default)]
pub(crate) struct MockObjectStore {
    pub folders: Mutex<Vec<String>>,
    pub uploads: Mutex<Vec<(String, String, usize)>>,
    pub deleted: Mutex<Vec<String>>,
    pub entries: Vec<String>,
    pub reject_uploads: bool,
}

impl MockObjectStore {
    pub fn uploads(&self) -> Vec<(String, String, usize)> {
        self.uploads.lock().unwrap().clone()
    }
}

#[async_trait]
impl ObjectStore for MockObjectStore {
    async fn create_folder(&self, path: &str) -> StoreResult<()> {
        self.folders.lock().unwrap().push(path.to_string());
        Ok(())
    }

    async fn upload(&self, bytes: Vec<u8>, folder: &str, name: &str) -> StoreResult<String> {
        if self.reject_uploads {
            return Err(StoreError::Forbidden("uploads disabled".into()));
        }
        self.uploads
            .lock()
            .unwrap()
            .push((folder.to_string(), name.to_string(), bytes.len()));
        Ok(format!("{folder}/{name}"))
    }

    async fn create_shared_link(&self, path: &str) -> StoreResult<String> {
        Ok(format!("https://files.test{}", path.replace(' ', "%20")))
    }

    async fn delete(&self, path: &str) -> StoreResult<()> {
        self.deleted.lock().unwrap().push(path.to_string());
        Ok(())
    }

    async fn list_folder(&self, _path: &str) -> StoreResult<Vec<String>> {
        Ok(self.entries.clone())
    }
}
