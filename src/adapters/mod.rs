// Adapters layer: HTTP clients for the remote record store and object store,
// plus the on-disk object store credentials.

pub mod airtable;
pub mod credentials;
pub mod dropbox;

use crate::domain::ports::StoreResult;
use crate::utils::error::StoreError;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use url::Url;

/// Backoff applied when a service answers 429.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_millis(500),
        }
    }
}

pub(crate) fn http_client() -> StoreResult<reqwest::Client> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(120))
        .connect_timeout(Duration::from_secs(10))
        .user_agent(concat!("airlift/", env!("CARGO_PKG_VERSION")))
        .build()?;
    Ok(client)
}

/// Sends the request built by `build`, rebuilding it for every retry.
pub(crate) async fn send_with_retry<F>(policy: &RetryPolicy, mut build: F) -> StoreResult<Response>
where
    F: FnMut() -> RequestBuilder + Send,
{
    let mut delay = policy.initial_delay;
    let mut attempts = 0;

    loop {
        attempts += 1;
        let response = build().send().await?;
        let status = response.status();

        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            if attempts > policy.max_retries {
                return Err(StoreError::RateLimited { attempts });
            }
            tracing::debug!("Rate limited, retrying in {:?}", delay);
            tokio::time::sleep(delay).await;
            delay *= 2;
            continue;
        }

        let body = response.text().await.unwrap_or_default();
        return Err(StoreError::from_status(status.as_u16(), body));
    }
}

pub(crate) async fn read_json<T: DeserializeOwned>(response: Response) -> StoreResult<T> {
    let body = response.bytes().await?;
    serde_json::from_slice(&body).map_err(|e| StoreError::UnexpectedResponse(e.to_string()))
}

/// Appends path segments to `base`, percent-encoding each one.
pub(crate) fn endpoint(base: &Url, segments: &[&str]) -> StoreResult<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| StoreError::UnexpectedResponse(format!("{base} cannot be used as a base URL")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

pub(crate) fn parse_base_url(raw: &str) -> StoreResult<Url> {
    Url::parse(raw).map_err(|e| StoreError::UnexpectedResponse(format!("invalid URL '{raw}': {e}")))
}
