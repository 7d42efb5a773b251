use airlift::adapters::airtable::AirtableClient;
use airlift::adapters::dropbox::{DropboxClient, DropboxEndpoints};
use airlift::adapters::RetryPolicy;
use airlift::core::attachments::{AttachmentResolver, ScratchUploader};
use airlift::core::reconciler::ReconcileOptions;
use airlift::domain::model::DuplicateColumnPolicy;
use airlift::domain::ports::{AttachmentUploader, RecordStore};
use airlift::{AirliftError, EtlEngine, UploadPipeline};
use anyhow::Result;
use httpmock::prelude::*;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn retry() -> RetryPolicy {
    RetryPolicy {
        max_retries: 1,
        initial_delay: Duration::from_millis(5),
    }
}

fn write_input(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, content).unwrap();
    path
}

fn airtable(server: &MockServer) -> Arc<dyn RecordStore> {
    Arc::new(AirtableClient::new(&server.base_url(), "pat-test", "appBase", "tblUsers", retry()).unwrap())
}

async fn mock_schema<'a>(server: &'a MockServer, fields: &[&str]) -> httpmock::Mock<'a> {
    let fields: Vec<_> = fields
        .iter()
        .enumerate()
        .map(|(i, name)| json!({"id": format!("fld{i}"), "name": name, "type": "singleLineText"}))
        .collect();
    server
        .mock_async(|when, then| {
            when.method(GET).path("/v0/meta/bases/appBase/tables");
            then.status(200).json_body(json!({
                "tables": [{"id": "tblUsers", "name": "Users", "fields": fields}]
            }));
        })
        .await
}

#[tokio::test]
async fn test_csv_upload_creates_missing_field_once() -> Result<()> {
    let server = MockServer::start_async().await;
    let schema = mock_schema(&server, &["Name", "Count"]).await;
    let field = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/v0/meta/bases/appBase/tables/tblUsers/fields")
                .json_body_partial(r#"{"name": "Extra", "type": "multilineText"}"#);
            then.status(200).json_body(json!({"id": "fldNew", "name": "Extra"}));
        })
        .await;
    let records = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/v0/appBase/tblUsers")
                .json_body_partial(r#"{"typecast": true}"#);
            then.status(200).json_body(json!({"id": "recX", "fields": {}}));
        })
        .await;

    let dir = TempDir::new()?;
    let input = write_input(&dir, "data.csv", "Name,Count,Extra\nAlice,3,x\nBob,4,y\nCarol,5,z\n");

    let pipeline = UploadPipeline::new(&input, airtable(&server))
        .with_reconcile_options(ReconcileOptions {
            create_missing_fields: true,
            ..Default::default()
        })
        .with_workers(2);
    let report = EtlEngine::new(pipeline).run().await?;

    assert_eq!(report.uploaded(), 3);
    assert!(report.is_success());
    schema.assert_hits_async(1).await;
    field.assert_hits_async(1).await;
    records.assert_hits_async(3).await;
    Ok(())
}

#[tokio::test]
async fn test_duplicate_headers_fail_before_any_request() -> Result<()> {
    let server = MockServer::start_async().await;
    let schema = mock_schema(&server, &["A", "B"]).await;

    let dir = TempDir::new()?;
    let input = write_input(&dir, "dup.csv", "A,B,A\n1,2,3\n");

    let pipeline = UploadPipeline::new(&input, airtable(&server))
        .with_duplicate_policy(DuplicateColumnPolicy::Fail);
    let err = EtlEngine::new(pipeline).run().await.unwrap_err();

    assert!(matches!(
        &err,
        AirliftError::DuplicateColumnsError { columns, .. } if columns == &vec!["A".to_string()]
    ));
    schema.assert_hits_async(0).await;
    Ok(())
}

#[tokio::test]
async fn test_attachments_hosted_and_missing_files_left_empty() -> Result<()> {
    let airtable_server = MockServer::start_async().await;
    let dropbox_server = MockServer::start_async().await;

    mock_schema(&airtable_server, &["Name", "Photo"]).await;
    let with_photo = airtable_server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/v0/appBase/tblUsers")
                .json_body_partial(
                    r#"{"fields": {"Name": "Alice", "Photo": [{"url": "https://dl.dropboxusercontent.com/s/abc/a.png?dl=1"}]}}"#,
                );
            then.status(200).json_body(json!({"id": "recA"}));
        })
        .await;
    let without_photo = airtable_server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/v0/appBase/tblUsers")
                .json_body_partial(r#"{"fields": {"Name": "Bob", "Photo": null}}"#);
            then.status(200).json_body(json!({"id": "recB"}));
        })
        .await;

    dropbox_server
        .mock_async(|when, then| {
            when.method(POST).path("/oauth2/token");
            then.status(200).json_body(json!({"access_token": "sl.token"}));
        })
        .await;
    let folders = dropbox_server
        .mock_async(|when, then| {
            when.method(POST).path("/2/files/create_folder_v2");
            then.status(200).json_body(json!({"metadata": {}}));
        })
        .await;
    let upload = dropbox_server
        .mock_async(|when, then| {
            when.method(POST).path("/2/files/upload");
            then.status(200).json_body(json!({"path_display": "/Airlift/run/a.png"}));
        })
        .await;
    dropbox_server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/2/sharing/create_shared_link_with_settings")
                .json_body(json!({"path": "/Airlift/run/a.png"}));
            then.status(200)
                .json_body(json!({"url": "https://www.dropbox.com/s/abc/a.png?dl=0"}));
        })
        .await;

    let dir = TempDir::new()?;
    std::fs::write(dir.path().join("a.png"), b"png")?;
    let input = write_input(&dir, "people.csv", "Name,Photo\nAlice,a.png\nBob,missing.png\n");

    let endpoints = DropboxEndpoints {
        api: dropbox_server.base_url(),
        content: dropbox_server.base_url(),
        authorize: dropbox_server.url("/oauth2/authorize"),
    };
    let dropbox = DropboxClient::connect(&endpoints, "app-key", "refresh", retry()).await?;
    let uploader: Arc<dyn AttachmentUploader> = Arc::new(ScratchUploader::new(
        dropbox,
        "/Airlift",
        chrono::Local::now().naive_local(),
    ));
    let resolver = AttachmentResolver::new(Some(uploader), vec!["Photo".into()], Vec::new())
        .with_base_dir(dir.path());

    let pipeline = UploadPipeline::new(&input, airtable(&airtable_server))
        .with_resolver(resolver)
        .with_workers(2);
    let report = EtlEngine::new(pipeline).run().await?;

    assert_eq!(report.uploaded(), 2);
    assert_eq!(report.attachment_failures, 1);
    folders.assert_hits_async(2).await;
    upload.assert_hits_async(1).await;
    with_photo.assert_hits_async(1).await;
    without_photo.assert_hits_async(1).await;
    Ok(())
}

#[tokio::test]
async fn test_header_only_input_creates_no_scratch_folder() -> Result<()> {
    let airtable_server = MockServer::start_async().await;
    let dropbox_server = MockServer::start_async().await;
    let schema = mock_schema(&airtable_server, &["Name", "Photo"]).await;
    dropbox_server
        .mock_async(|when, then| {
            when.method(POST).path("/oauth2/token");
            then.status(200).json_body(json!({"access_token": "sl.token"}));
        })
        .await;
    let folders = dropbox_server
        .mock_async(|when, then| {
            when.method(POST).path("/2/files/create_folder_v2");
            then.status(200).json_body(json!({"metadata": {}}));
        })
        .await;

    let dir = TempDir::new()?;
    let input = write_input(&dir, "empty.csv", "Name,Photo\n");

    let endpoints = DropboxEndpoints {
        api: dropbox_server.base_url(),
        content: dropbox_server.base_url(),
        authorize: dropbox_server.url("/oauth2/authorize"),
    };
    let dropbox = DropboxClient::connect(&endpoints, "app-key", "refresh", retry()).await?;
    let uploader: Arc<dyn AttachmentUploader> = Arc::new(ScratchUploader::new(
        dropbox,
        "/Airlift",
        chrono::Local::now().naive_local(),
    ));
    let resolver = AttachmentResolver::new(Some(uploader), vec!["Photo".into()], Vec::new());

    let pipeline = UploadPipeline::new(&input, airtable(&airtable_server)).with_resolver(resolver);
    let err = EtlEngine::new(pipeline).run().await.unwrap_err();

    assert!(matches!(err, AirliftError::ConfigError { .. }));
    schema.assert_hits_async(0).await;
    folders.assert_hits_async(0).await;
    Ok(())
}
