#[cfg(feature = "cli")]
pub mod cli;
pub mod toml_config;

use crate::adapters::airtable::AIRTABLE_API_URL;
use crate::adapters::dropbox::{DropboxEndpoints, MARKER_DATA_FOLDER, ROOT_FOLDER};
use crate::adapters::RetryPolicy;
use crate::core::reconciler::{ReconcileOptions, DEFAULT_FIELD_TYPE};
use crate::core::scheduler::DEFAULT_WORKERS;
use crate::domain::model::{AttachmentMapping, CopyGroup, DuplicateColumnPolicy, RenamePair};
use crate::utils::error::{AirliftError, Result};
use crate::utils::validation::{
    validate_file_extension, validate_non_empty_string, validate_path, validate_positive_number,
    validate_required_field, validate_url, Validate,
};
use std::path::{Path, PathBuf};

pub const SUPPORTED_EXTENSIONS: [&str; 3] = ["csv", "tsv", "json"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    #[default]
    Upload,
    RefreshDropboxToken,
    DeleteAllRecords,
    EmptyDropboxFolder,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AirtableConfig {
    pub token: String,
    pub base: String,
    pub table: String,
    pub api_url: String,
}

impl AirtableConfig {
    pub fn new(token: impl Into<String>, base: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            base: base.into(),
            table: table.into(),
            api_url: AIRTABLE_API_URL.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DropboxConfig {
    pub credentials: PathBuf,
    /// Store attachments under the marker-data folder instead of the default one.
    pub marker_data: bool,
    pub endpoints: DropboxEndpoints,
}

impl DropboxConfig {
    pub fn new(credentials: impl Into<PathBuf>) -> Self {
        Self {
            credentials: credentials.into(),
            marker_data: false,
            endpoints: DropboxEndpoints::default(),
        }
    }

    pub fn root_folder(&self) -> &'static str {
        if self.marker_data {
            MARKER_DATA_FOLDER
        } else {
            ROOT_FOLDER
        }
    }
}

/// Every recognized option for one run, fixed at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub mode: RunMode,
    pub input: Option<PathBuf>,
    pub airtable: Option<AirtableConfig>,
    pub dropbox: Option<DropboxConfig>,
    pub workers: usize,
    pub duplicate_policy: DuplicateColumnPolicy,
    pub create_missing_fields: bool,
    pub new_field_type: String,
    pub attachment_columns: Vec<String>,
    pub attachment_mappings: Vec<AttachmentMapping>,
    pub rename: Option<RenamePair>,
    pub copy_group: Option<CopyGroup>,
    pub retry: RetryPolicy,
    pub verbose: bool,
    pub log_file: Option<PathBuf>,
    pub monitor: bool,
    pub show_progress: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            mode: RunMode::Upload,
            input: None,
            airtable: None,
            dropbox: None,
            workers: DEFAULT_WORKERS,
            duplicate_policy: DuplicateColumnPolicy::default(),
            create_missing_fields: false,
            new_field_type: DEFAULT_FIELD_TYPE.to_string(),
            attachment_columns: Vec::new(),
            attachment_mappings: Vec::new(),
            rename: None,
            copy_group: None,
            retry: RetryPolicy::default(),
            verbose: false,
            log_file: None,
            monitor: false,
            show_progress: false,
        }
    }
}

impl RunConfig {
    pub fn input(&self) -> Result<&Path> {
        validate_required_field("FILE", &self.input).map(PathBuf::as_path)
    }

    pub fn airtable(&self) -> Result<&AirtableConfig> {
        validate_required_field("--token/--base/--table", &self.airtable)
    }

    pub fn dropbox(&self) -> Result<&DropboxConfig> {
        validate_required_field("--dropbox-token", &self.dropbox)
    }

    pub fn reconcile_options(&self) -> ReconcileOptions {
        ReconcileOptions {
            create_missing_fields: self.create_missing_fields,
            new_field_type: self.new_field_type.clone(),
            rename: self.rename.clone(),
            copy_group: self.copy_group.clone(),
            attachment_mappings: self.attachment_mappings.clone(),
            ignored_columns: Vec::new(),
        }
    }

    fn validate_airtable(&self) -> Result<()> {
        let airtable = self.airtable()?;
        validate_non_empty_string("token", &airtable.token)?;
        validate_non_empty_string("base", &airtable.base)?;
        validate_non_empty_string("table", &airtable.table)?;
        validate_url("airtable.api_url", &airtable.api_url)
    }

    fn validate_dropbox(&self) -> Result<()> {
        let dropbox = self.dropbox()?;
        validate_path("dropbox.credentials", &dropbox.credentials)?;
        validate_url("dropbox.api_url", &dropbox.endpoints.api)?;
        validate_url("dropbox.content_url", &dropbox.endpoints.content)?;
        validate_url("dropbox.authorize_url", &dropbox.endpoints.authorize)
    }

    fn validate_transforms(&self) -> Result<()> {
        if let Some(rename) = &self.rename {
            rename.validate()?;
        }
        if let Some(group) = &self.copy_group {
            if group.targets.is_empty() {
                return Err(AirliftError::config(
                    "--columns-copy needs a source column and at least one target column",
                ));
            }
        }
        for mapping in &self.attachment_mappings {
            validate_non_empty_string("attachment_columns_map", &mapping.source)?;
            validate_non_empty_string("attachment_columns_map", &mapping.target)?;
        }
        Ok(())
    }
}

impl Validate for RunConfig {
    fn validate(&self) -> Result<()> {
        match self.mode {
            RunMode::Upload => {
                let input = self.input()?;
                validate_path("FILE", input)?;
                validate_file_extension("FILE", input, &SUPPORTED_EXTENSIONS)?;
                self.validate_airtable()?;
                validate_positive_number("workers", self.workers, 1)?;
                validate_non_empty_string("new_field_type", &self.new_field_type)?;
                self.validate_transforms()?;
                if self.dropbox.is_some() {
                    self.validate_dropbox()?;
                }
                Ok(())
            }
            RunMode::DeleteAllRecords => self.validate_airtable(),
            RunMode::RefreshDropboxToken | RunMode::EmptyDropboxFolder => self.validate_dropbox(),
        }
    }
}
