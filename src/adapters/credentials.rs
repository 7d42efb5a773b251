use super::dropbox::DropboxEndpoints;
use super::{endpoint, http_client, parse_base_url, read_json, send_with_retry, RetryPolicy};
use crate::domain::ports::StoreResult;
use crate::utils::error::{AirliftError, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use serde::Deserialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use url::Url;

const APP_KEY: &str = "app_key";
const REFRESH_TOKEN: &str = "refresh_token";

fn credential_error(message: impl Into<String>) -> AirliftError {
    AirliftError::CredentialError {
        message: message.into(),
    }
}

/// The on-disk JSON credential document. Keys other than the app key and
/// refresh token are carried through untouched when the file is rewritten.
#[derive(Debug, Clone)]
pub struct DropboxCredentials {
    path: PathBuf,
    document: Map<String, Value>,
    app_key: String,
}

impl DropboxCredentials {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            credential_error(format!("cannot read credential file {}: {e}", path.display()))
        })?;
        let document: Map<String, Value> = serde_json::from_str(&raw).map_err(|e| {
            credential_error(format!("{} is not a JSON object: {e}", path.display()))
        })?;

        let app_key = match document.get(APP_KEY) {
            Some(Value::String(key)) if !key.trim().is_empty() => key.trim().to_string(),
            _ => {
                tracing::warn!("app_key not present in {}", path.display());
                return Err(credential_error(format!(
                    "app_key not present in {}",
                    path.display()
                )));
            }
        };

        Ok(Self {
            path: path.to_path_buf(),
            document,
            app_key,
        })
    }

    pub fn app_key(&self) -> &str {
        &self.app_key
    }

    pub fn refresh_token(&self) -> Option<&str> {
        match self.document.get(REFRESH_TOKEN) {
            Some(Value::String(token)) if !token.is_empty() => Some(token),
            _ => None,
        }
    }

    pub fn set_refresh_token(&mut self, token: impl Into<String>) {
        self.document
            .insert(REFRESH_TOKEN.to_string(), Value::String(token.into()));
    }

    pub fn save(&self) -> Result<()> {
        let body = serde_json::to_string_pretty(&self.document)?;
        std::fs::write(&self.path, body)?;
        Ok(())
    }

    /// Runs the interactive authorization only when no refresh token is stored.
    pub async fn ensure_refresh_token<F>(
        &mut self,
        endpoints: &DropboxEndpoints,
        prompt: F,
    ) -> Result<String>
    where
        F: FnOnce(&Url) -> std::io::Result<String> + Send,
    {
        if let Some(token) = self.refresh_token() {
            return Ok(token.to_string());
        }
        tracing::info!("No refresh token stored; starting authorization");
        self.replace_refresh_token(endpoints, prompt).await
    }

    /// Authorizes again and writes the new refresh token back to the file.
    pub async fn replace_refresh_token<F>(
        &mut self,
        endpoints: &DropboxEndpoints,
        prompt: F,
    ) -> Result<String>
    where
        F: FnOnce(&Url) -> std::io::Result<String> + Send,
    {
        let flow = PkceFlow::new(&self.app_key);
        let authorize_url = flow.authorize_url(&endpoints.authorize)?;
        let code = prompt(&authorize_url)?;
        let code = code.trim();
        if code.is_empty() {
            return Err(credential_error("no authorization code was entered"));
        }

        let token = flow.exchange(&endpoints.api, code).await.map_err(|e| {
            tracing::warn!("Error while retrieving the refresh token: {}", e);
            credential_error(format!("could not obtain a refresh token: {e}"))
        })?;

        self.set_refresh_token(token.clone());
        self.save()?;
        tracing::info!("Stored a new refresh token in {}", self.path.display());
        Ok(token)
    }
}

#[derive(Debug, Deserialize)]
struct CodeExchange {
    refresh_token: String,
}

/// Authorization-code flow with a PKCE verifier, for clients that cannot keep a secret.
pub struct PkceFlow {
    app_key: String,
    verifier: String,
}

impl PkceFlow {
    pub fn new(app_key: &str) -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self {
            app_key: app_key.to_string(),
            verifier: URL_SAFE_NO_PAD.encode(bytes),
        }
    }

    pub fn challenge(&self) -> String {
        URL_SAFE_NO_PAD.encode(Sha256::digest(self.verifier.as_bytes()))
    }

    pub fn authorize_url(&self, authorize: &str) -> Result<Url> {
        let mut url = Url::parse(authorize)
            .map_err(|e| AirliftError::config(format!("invalid authorize URL '{authorize}': {e}")))?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.app_key)
            .append_pair("response_type", "code")
            .append_pair("code_challenge", &self.challenge())
            .append_pair("code_challenge_method", "S256")
            .append_pair("token_access_type", "offline");
        Ok(url)
    }

    pub async fn exchange(&self, api_url: &str, code: &str) -> StoreResult<String> {
        let url = endpoint(&parse_base_url(api_url)?, &["oauth2", "token"])?;
        let http = http_client()?;
        let form = [
            ("code", code),
            ("grant_type", "authorization_code"),
            ("code_verifier", self.verifier.as_str()),
            ("client_id", self.app_key.as_str()),
        ];
        let response = send_with_retry(&RetryPolicy::default(), || {
            http.post(url.clone()).form(&form)
        })
        .await?;
        let exchanged: CodeExchange = read_json(response).await?;
        Ok(exchanged.refresh_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_creds(dir: &tempfile::TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("dropbox.json");
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_missing_app_key_is_credential_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_creds(&dir, r#"{"refresh_token": "abc"}"#);
        let err = DropboxCredentials::load(&path).unwrap_err();
        assert!(matches!(err, AirliftError::CredentialError { .. }));
    }

    #[test]
    fn test_missing_file_is_credential_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = DropboxCredentials::load(dir.path().join("nope.json")).unwrap_err();
        assert!(err.to_string().contains("nope.json"));
    }

    #[test]
    fn test_save_preserves_unknown_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_creds(&dir, r#"{"app_key": "key1", "note": "mine"}"#);

        let mut creds = DropboxCredentials::load(&path).unwrap();
        assert_eq!(creds.refresh_token(), None);
        creds.set_refresh_token("fresh");
        creds.save().unwrap();

        let saved: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(saved["app_key"], "key1");
        assert_eq!(saved["note"], "mine");
        assert_eq!(saved["refresh_token"], "fresh");
    }

    #[test]
    fn test_authorize_url_carries_pkce_challenge() {
        let flow = PkceFlow::new("key1");
        let url = flow
            .authorize_url("https://www.dropbox.com/oauth2/authorize")
            .unwrap();
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();

        assert!(pairs.contains(&("client_id".into(), "key1".into())));
        assert!(pairs.contains(&("code_challenge_method".into(), "S256".into())));
        assert!(pairs.contains(&("code_challenge".into(), flow.challenge())));
        assert_eq!(flow.verifier.len(), 43);
    }

    #[tokio::test]
    async fn test_stored_token_skips_authorization() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_creds(&dir, r#"{"app_key": "key1", "refresh_token": "stored"}"#);
        let mut creds = DropboxCredentials::load(&path).unwrap();

        let token = creds
            .ensure_refresh_token(&DropboxEndpoints::default(), |_| {
                panic!("authorization must not run")
            })
            .await
            .unwrap();
        assert_eq!(token, "stored");
    }

    #[tokio::test]
    async fn test_empty_code_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_creds(&dir, r#"{"app_key": "key1"}"#);
        let mut creds = DropboxCredentials::load(&path).unwrap();

        let err = creds
            .replace_refresh_token(&DropboxEndpoints::default(), |_| Ok("  ".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, AirliftError::CredentialError { .. }));
    }
}
