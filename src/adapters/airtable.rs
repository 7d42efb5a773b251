use super::{endpoint, http_client, parse_base_url, read_json, send_with_retry, RetryPolicy};
use crate::domain::model::{FieldValue, RemoteSchema};
use crate::domain::ports::{RecordStore, StoreResult};
use crate::utils::error::StoreError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use url::Url;

pub const AIRTABLE_API_URL: &str = "https://api.airtable.com";
const FIELD_DESCRIPTION: &str = "Created by airlift";
/// Airtable accepts at most this many ids per delete request.
const DELETE_CHUNK: usize = 10;
const DUPLICATE_FIELD_NAME: &str = "DUPLICATE_OR_EMPTY_FIELD_NAME";

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct TablesResponse {
    tables: Vec<TableMeta>,
}

#[derive(Debug, Deserialize)]
struct TableMeta {
    id: String,
    name: String,
    fields: Vec<FieldMeta>,
}

#[derive(Debug, Deserialize)]
struct FieldMeta {
    name: String,
    #[serde(rename = "type")]
    field_type: String,
}

#[derive(Debug, Serialize)]
struct NewField<'a> {
    name: &'a str,
    description: &'a str,
    #[serde(rename = "type")]
    field_type: &'a str,
}

#[derive(Debug, Serialize)]
struct NewRecord<'a> {
    fields: &'a BTreeMap<String, FieldValue>,
    typecast: bool,
}

#[derive(Debug, Deserialize)]
struct CreatedRecord {
    id: String,
}

#[derive(Debug, Deserialize)]
struct RecordPage {
    records: Vec<CreatedRecord>,
    offset: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DeletedRecord {
    #[serde(default)]
    deleted: bool,
}

#[derive(Debug, Deserialize)]
struct DeleteResponse {
    records: Vec<DeletedRecord>,
}

/// Airtable REST client bound to one base and table.
pub struct AirtableClient {
    http: reqwest::Client,
    api_url: Url,
    token: String,
    base: String,
    table: String,
    retry: RetryPolicy,
}

impl AirtableClient {
    pub fn new(
        api_url: &str,
        token: impl Into<String>,
        base: impl Into<String>,
        table: impl Into<String>,
        retry: RetryPolicy,
    ) -> StoreResult<Self> {
        Ok(Self {
            http: http_client()?,
            api_url: parse_base_url(api_url)?,
            token: token.into(),
            base: base.into(),
            table: table.into(),
            retry,
        })
    }

    fn records_url(&self) -> StoreResult<Url> {
        endpoint(&self.api_url, &["v0", &self.base, &self.table])
    }

    async fn delete_chunk(&self, ids: &[String]) -> StoreResult<usize> {
        let mut url = self.records_url()?;
        {
            let mut query = url.query_pairs_mut();
            for id in ids {
                query.append_pair("records[]", id);
            }
        }

        let response = send_with_retry(&self.retry, || {
            self.http.delete(url.clone()).bearer_auth(&self.token)
        })
        .await?;
        let deleted: DeleteResponse = read_json(response).await?;
        Ok(deleted.records.iter().filter(|r| r.deleted).count())
    }
}

#[async_trait]
impl RecordStore for AirtableClient {
    async fn get_schema(&self) -> StoreResult<RemoteSchema> {
        let url = endpoint(&self.api_url, &["v0", "meta", "bases", &self.base, "tables"])?;
        let response = send_with_retry(&self.retry, || {
            self.http.get(url.clone()).bearer_auth(&self.token)
        })
        .await?;
        let tables: TablesResponse = read_json(response).await?;

        let table = tables
            .tables
            .into_iter()
            .find(|t| t.id == self.table || t.name == self.table)
            .ok_or_else(|| {
                StoreError::NotFound(format!(
                    "table '{}' does not exist in base '{}'",
                    self.table, self.base
                ))
            })?;

        Ok(RemoteSchema {
            table_id: table.id,
            table_name: table.name,
            fields: table
                .fields
                .into_iter()
                .map(|f| (f.name, f.field_type))
                .collect(),
        })
    }

    async fn create_field(&self, table_id: &str, name: &str, field_type: &str) -> StoreResult<()> {
        let url = endpoint(
            &self.api_url,
            &["v0", "meta", "bases", &self.base, "tables", table_id, "fields"],
        )?;
        let body = NewField {
            name,
            description: FIELD_DESCRIPTION,
            field_type,
        };
        let sent = send_with_retry(&self.retry, || {
            self.http
                .post(url.clone())
                .bearer_auth(&self.token)
                .json(&body)
        })
        .await;
        match sent {
            Ok(_) => Ok(()),
            Err(StoreError::Validation(body)) if is_duplicate_field(&body) => {
                Err(StoreError::AlreadyExists(body))
            }
            Err(e) => Err(e),
        }
    }

    async fn create_record(&self, fields: &BTreeMap<String, FieldValue>) -> StoreResult<String> {
        let url = self.records_url()?;
        let body = NewRecord {
            fields,
            typecast: true,
        };
        let response = send_with_retry(&self.retry, || {
            self.http
                .post(url.clone())
                .bearer_auth(&self.token)
                .json(&body)
        })
        .await?;
        let created: CreatedRecord = read_json(response).await?;
        Ok(created.id)
    }

    async fn list_record_ids(&self) -> StoreResult<Vec<String>> {
        let url = self.records_url()?;
        let mut ids = Vec::new();
        let mut offset: Option<String> = None;

        loop {
            let mut page_url = url.clone();
            page_url.query_pairs_mut().append_pair("pageSize", "100");
            if let Some(cursor) = &offset {
                page_url.query_pairs_mut().append_pair("offset", cursor);
            }

            let response = send_with_retry(&self.retry, || {
                self.http.get(page_url.clone()).bearer_auth(&self.token)
            })
            .await?;
            let page: RecordPage = read_json(response).await?;
            ids.extend(page.records.into_iter().map(|r| r.id));

            match page.offset {
                Some(next) => offset = Some(next),
                None => break,
            }
        }

        Ok(ids)
    }

    async fn delete_records(&self, ids: &[String]) -> StoreResult<usize> {
        let mut deleted = 0;
        for chunk in ids.chunks(DELETE_CHUNK) {
            deleted += self.delete_chunk(chunk).await?;
        }
        Ok(deleted)
    }
}

/// Airtable answers a field-name clash with a 422 whose error type names it.
fn is_duplicate_field(body: &str) -> bool {
    serde_json::from_str::<ErrorBody>(body)
        .map(|e| e.error.kind == DUPLICATE_FIELD_NAME)
        .unwrap_or(false)
}
