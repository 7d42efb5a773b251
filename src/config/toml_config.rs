use crate::utils::error::{AirliftError, Result};
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

static ENV_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([^}]+)\}").unwrap_or_else(|e| panic!("env reference pattern: {e}"))
});

/// Optional run file. Every value is a default that the command line overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub airtable: AirtableSection,
    pub dropbox: DropboxSection,
    pub upload: UploadSection,
    pub logging: LoggingSection,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AirtableSection {
    pub token: Option<String>,
    pub base: Option<String>,
    pub table: Option<String>,
    pub api_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DropboxSection {
    pub credentials: Option<PathBuf>,
    pub marker_data: Option<bool>,
    pub api_url: Option<String>,
    pub content_url: Option<String>,
    pub authorize_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UploadSection {
    pub workers: Option<usize>,
    pub create_missing_fields: Option<bool>,
    pub fail_on_duplicate_columns: Option<bool>,
    pub new_field_type: Option<String>,
    pub attachment_columns: Option<Vec<String>>,
    /// `[[source, target], …]`
    pub attachment_columns_map: Option<Vec<(String, String)>>,
    /// `[old, new]`
    pub rename_key_column: Option<(String, String)>,
    /// `[source, target, …]`
    pub columns_copy: Option<Vec<String>>,
    pub max_retries: Option<u32>,
    pub retry_delay_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingSection {
    pub verbose: Option<bool>,
    pub file: Option<PathBuf>,
    pub monitor: Option<bool>,
}

impl FileConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            AirliftError::config(format!("cannot read run file {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed = substitute_env_vars(content);
        toml::from_str(&processed).map_err(|e| AirliftError::InvalidConfigValueError {
            field: "run file".to_string(),
            value: String::new(),
            reason: format!("TOML parsing error: {}", e),
        })
    }
}

/// Replaces `${VAR}` with the variable's value. Unset variables stay as written.
fn substitute_env_vars(content: &str) -> String {
    ENV_REFERENCE
        .replace_all(content, |caps: &Captures| {
            let name = &caps[1];
            std::env::var(name).unwrap_or_else(|_| format!("${{{}}}", name))
        })
        .into_owned()
}
