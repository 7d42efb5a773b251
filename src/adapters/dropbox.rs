use super::{endpoint, http_client, parse_base_url, read_json, send_with_retry, RetryPolicy};
use crate::domain::ports::{ObjectStore, StoreResult};
use crate::utils::error::StoreError;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use url::Url;

pub const DROPBOX_API_URL: &str = "https://api.dropboxapi.com";
pub const DROPBOX_CONTENT_URL: &str = "https://content.dropboxapi.com";
pub const DROPBOX_AUTHORIZE_URL: &str = "https://www.dropbox.com/oauth2/authorize";

pub const ROOT_FOLDER: &str = "/Airlift";
pub const MARKER_DATA_FOLDER: &str = "/Marker Data";

#[derive(Debug, Clone, PartialEq)]
pub struct DropboxEndpoints {
    pub api: String,
    pub content: String,
    pub authorize: String,
}

impl Default for DropboxEndpoints {
    fn default() -> Self {
        Self {
            api: DROPBOX_API_URL.to_string(),
            content: DROPBOX_CONTENT_URL.to_string(),
            authorize: DROPBOX_AUTHORIZE_URL.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct AccessToken {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct FileMetadata {
    path_display: String,
}

#[derive(Debug, Deserialize)]
struct SharedLink {
    url: String,
}

#[derive(Debug, Deserialize)]
struct SharedLinks {
    links: Vec<SharedLink>,
}

#[derive(Debug, Deserialize)]
struct FolderPage {
    entries: Vec<FileMetadata>,
    cursor: String,
    has_more: bool,
}

/// Dropbox v2 client authenticated with a short-lived access token.
pub struct DropboxClient {
    http: reqwest::Client,
    api: Url,
    content: Url,
    access_token: String,
    retry: RetryPolicy,
}

impl DropboxClient {
    /// Mints an access token from the long-lived refresh token.
    pub async fn connect(
        endpoints: &DropboxEndpoints,
        app_key: &str,
        refresh_token: &str,
        retry: RetryPolicy,
    ) -> StoreResult<Self> {
        let http = http_client()?;
        let api = parse_base_url(&endpoints.api)?;
        let content = parse_base_url(&endpoints.content)?;

        let token_url = endpoint(&api, &["oauth2", "token"])?;
        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", app_key),
        ];
        let response = send_with_retry(&retry, || http.post(token_url.clone()).form(&form)).await?;
        let token: AccessToken = read_json(response).await?;
        tracing::info!("Created a Dropbox client");

        Ok(Self {
            http,
            api,
            content,
            access_token: token.access_token,
            retry,
        })
    }

    async fn rpc<B, R>(&self, route: &str, body: &B) -> StoreResult<R>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        let mut segments = vec!["2"];
        segments.extend(route.split('/'));
        let url = endpoint(&self.api, &segments)?;
        let response = send_with_retry(&self.retry, || {
            self.http
                .post(url.clone())
                .bearer_auth(&self.access_token)
                .json(body)
        })
        .await?;
        read_json(response).await
    }
}

#[async_trait]
impl ObjectStore for DropboxClient {
    async fn create_folder(&self, path: &str) -> StoreResult<()> {
        let body = json!({ "path": path, "autorename": false });
        match self.rpc::<_, serde_json::Value>("files/create_folder_v2", &body).await {
            Ok(_) => {
                tracing::debug!("Created folder {}", path);
                Ok(())
            }
            Err(StoreError::AlreadyExists(reason)) if reason.contains("conflict") => {
                tracing::debug!("The folder {} already exists", path);
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    async fn upload(&self, bytes: Vec<u8>, folder: &str, name: &str) -> StoreResult<String> {
        let url = endpoint(&self.content, &["2", "files", "upload"])?;
        let arg = header_safe_json(&json!({
            "path": format!("{folder}/{name}"),
            "mode": "add",
            "autorename": true,
            "mute": false,
        }));
        let response = send_with_retry(&self.retry, || {
            self.http
                .post(url.clone())
                .bearer_auth(&self.access_token)
                .header("Dropbox-API-Arg", arg.as_str())
                .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
                .body(bytes.clone())
        })
        .await?;
        let stored: FileMetadata = read_json(response).await?;
        Ok(stored.path_display)
    }

    async fn create_shared_link(&self, path: &str) -> StoreResult<String> {
        let body = json!({ "path": path });
        let link = match self
            .rpc::<_, SharedLink>("sharing/create_shared_link_with_settings", &body)
            .await
        {
            Ok(link) => link.url,
            Err(StoreError::AlreadyExists(reason))
                if reason.contains("shared_link_already_exists") =>
            {
                let body = json!({ "path": path, "direct_only": true });
                let existing: SharedLinks = self.rpc("sharing/list_shared_links", &body).await?;
                existing
                    .links
                    .into_iter()
                    .next()
                    .map(|l| l.url)
                    .ok_or_else(|| {
                        StoreError::UnexpectedResponse(format!("no shared link listed for {path}"))
                    })?
            }
            Err(err) => return Err(err),
        };
        Ok(direct_download_url(&link))
    }

    async fn delete(&self, path: &str) -> StoreResult<()> {
        let body = json!({ "path": path });
        self.rpc::<_, serde_json::Value>("files/delete_v2", &body)
            .await?;
        Ok(())
    }

    async fn list_folder(&self, path: &str) -> StoreResult<Vec<String>> {
        let body = json!({ "path": path });
        let mut page: FolderPage = self.rpc("files/list_folder", &body).await?;
        let mut paths: Vec<String> = Vec::new();

        loop {
            paths.extend(page.entries.into_iter().map(|e| e.path_display));
            if !page.has_more {
                break;
            }
            let body = json!({ "cursor": page.cursor });
            page = self.rpc("files/list_folder/continue", &body).await?;
        }

        Ok(paths)
    }
}

/// Turns a preview link into one that serves the raw bytes.
pub fn direct_download_url(shared: &str) -> String {
    shared
        .replace("www.dropbox.com", "dl.dropboxusercontent.com")
        .replace("?dl=0", "?dl=1")
        .replace("&dl=0", "&dl=1")
}

/// HTTP headers must be ASCII, so every other character is written as a JSON escape.
fn header_safe_json(value: &serde_json::Value) -> String {
    let raw = value.to_string();
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if ch.is_ascii() {
            escaped.push(ch);
        } else {
            let mut units = [0u16; 2];
            for unit in ch.encode_utf16(&mut units) {
                escaped.push_str(&format!("\\u{:04x}", unit));
            }
        }
    }
    escaped
}

/// Deletes every entry under `root` and returns how many were removed.
pub async fn empty_folder<O: ObjectStore + ?Sized>(store: &O, root: &str) -> StoreResult<usize> {
    let entries = store.list_folder(root).await?;
    let mut removed = 0;
    for entry in &entries {
        store.delete(entry).await?;
        tracing::debug!("Deleted {}", entry);
        removed += 1;
    }
    Ok(removed)
}
