use super::toml_config::FileConfig;
use super::{AirtableConfig, DropboxConfig, RunConfig, RunMode};
use crate::adapters::RetryPolicy;
use crate::domain::model::{AttachmentMapping, CopyGroup, DuplicateColumnPolicy, RenamePair};
use crate::utils::error::{AirliftError, Result};
use clap::{ArgAction, Parser};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Parser)]
#[command(name = "airlift")]
#[command(version)]
#[command(about = "Upload and merge CSV or JSON data, with attachments, into an Airtable table")]
pub struct CliArgs {
    /// CSV, TSV or JSON file to upload
    #[arg(value_name = "FILE")]
    pub file: Option<PathBuf>,

    /// Airtable personal access token
    #[arg(long, env = "AIRTABLE_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Airtable base ID
    #[arg(long)]
    pub base: Option<String>,

    /// Airtable table ID or name
    #[arg(long)]
    pub table: Option<String>,

    /// File to store the program log
    #[arg(long, value_name = "FILE")]
    pub log: Option<PathBuf>,

    /// Output debug information
    #[arg(long)]
    pub verbose: bool,

    /// Log phase timings
    #[arg(long)]
    pub monitor: bool,

    /// Number of concurrent upload workers (default: 5)
    #[arg(long)]
    pub workers: Option<usize>,

    /// TOML run file supplying defaults for any option
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// JSON file with the Dropbox app key and refresh token
    #[arg(long, value_name = "FILE")]
    pub dropbox_token: Option<PathBuf>,

    /// Authorize again and replace the stored Dropbox refresh token
    #[arg(long)]
    pub dropbox_refresh_token: bool,

    /// One or more columns holding local file paths to upload as attachments
    #[arg(long, num_args = 1.., value_name = "COLUMN")]
    pub attachment_columns: Vec<String>,

    /// Upload the files named in SOURCE into the attachment column TARGET
    #[arg(long, num_args = 2, value_names = ["SOURCE", "TARGET"], action = ArgAction::Append)]
    pub attachment_columns_map: Vec<String>,

    /// Create columns that are missing from the table instead of skipping them
    #[arg(long)]
    pub disable_bypass_column_creation: bool,

    /// Fail if the input file has duplicate columns instead of keeping the last one
    #[arg(long)]
    pub fail_on_duplicate_csv_columns: bool,

    /// Upload the values of column OLD into column NEW
    #[arg(long, num_args = 2, value_names = ["OLD", "NEW"])]
    pub rename_key_column: Option<Vec<String>>,

    /// Copy the values of column SOURCE into each TARGET column
    #[arg(long, num_args = 2.., value_names = ["SOURCE", "TARGET"])]
    pub columns_copy: Option<Vec<String>>,

    #[arg(long, hide = true)]
    pub md: bool,

    /// Delete every record in the table and exit
    #[arg(long, conflicts_with_all = ["empty_dropbox_folder", "dropbox_refresh_token"])]
    pub delete_all_records: bool,

    /// Delete everything in the Dropbox attachment folder and exit
    #[arg(long, conflicts_with = "dropbox_refresh_token")]
    pub empty_dropbox_folder: bool,
}

impl CliArgs {
    pub fn mode(&self) -> RunMode {
        if self.dropbox_refresh_token {
            RunMode::RefreshDropboxToken
        } else if self.delete_all_records {
            RunMode::DeleteAllRecords
        } else if self.empty_dropbox_folder {
            RunMode::EmptyDropboxFolder
        } else {
            RunMode::Upload
        }
    }

    /// Reads the `--config` run file, if any, and merges it under the command line.
    pub fn load_run_config(self) -> Result<RunConfig> {
        let file = match &self.config {
            Some(path) => FileConfig::from_file(path)?,
            None => FileConfig::default(),
        };
        self.into_run_config(file)
    }

    pub fn into_run_config(self, file: FileConfig) -> Result<RunConfig> {
        let mode = self.mode();
        let defaults = RunConfig::default();
        let FileConfig {
            airtable: file_airtable,
            dropbox: file_dropbox,
            upload,
            logging,
        } = file;

        let token = self.token.or(file_airtable.token);
        let base = self.base.or(file_airtable.base);
        let table = self.table.or(file_airtable.table);
        let airtable = match (token, base, table) {
            (Some(token), Some(base), Some(table)) => {
                let mut airtable = AirtableConfig::new(token, base, table);
                if let Some(api_url) = file_airtable.api_url {
                    airtable.api_url = api_url;
                }
                Some(airtable)
            }
            _ => None,
        };

        let dropbox = self
            .dropbox_token
            .or(file_dropbox.credentials)
            .map(|credentials| {
                let mut dropbox = DropboxConfig::new(credentials);
                dropbox.marker_data = self.md || file_dropbox.marker_data.unwrap_or(false);
                if let Some(api) = file_dropbox.api_url {
                    dropbox.endpoints.api = api;
                }
                if let Some(content) = file_dropbox.content_url {
                    dropbox.endpoints.content = content;
                }
                if let Some(authorize) = file_dropbox.authorize_url {
                    dropbox.endpoints.authorize = authorize;
                }
                dropbox
            });

        let attachment_mappings = if self.attachment_columns_map.is_empty() {
            upload
                .attachment_columns_map
                .unwrap_or_default()
                .into_iter()
                .map(|(source, target)| AttachmentMapping { source, target })
                .collect()
        } else {
            pairs(self.attachment_columns_map)?
        };

        let rename = match self.rename_key_column {
            Some(values) => match <[String; 2]>::try_from(values) {
                Ok([from, to]) => Some(RenamePair { from, to }),
                Err(_) => {
                    return Err(AirliftError::config(
                        "--rename-key-column takes exactly two column names",
                    ))
                }
            },
            None => upload
                .rename_key_column
                .map(|(from, to)| RenamePair { from, to }),
        };

        let copy_group = match self.columns_copy.or(upload.columns_copy) {
            Some(mut names) if names.len() >= 2 => {
                let source = names.remove(0);
                Some(CopyGroup {
                    source,
                    targets: names,
                })
            }
            Some(_) => {
                return Err(AirliftError::config(
                    "--columns-copy needs a source column and at least one target column",
                ))
            }
            None => None,
        };

        let fail_on_duplicates =
            self.fail_on_duplicate_csv_columns || upload.fail_on_duplicate_columns.unwrap_or(false);

        let attachment_columns = if self.attachment_columns.is_empty() {
            upload.attachment_columns.unwrap_or_default()
        } else {
            self.attachment_columns
        };

        let retry = RetryPolicy {
            max_retries: upload.max_retries.unwrap_or(defaults.retry.max_retries),
            initial_delay: upload
                .retry_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry.initial_delay),
        };

        Ok(RunConfig {
            mode,
            input: self.file,
            airtable,
            dropbox,
            workers: self.workers.or(upload.workers).unwrap_or(defaults.workers),
            duplicate_policy: if fail_on_duplicates {
                DuplicateColumnPolicy::Fail
            } else {
                DuplicateColumnPolicy::Collapse
            },
            create_missing_fields: self.disable_bypass_column_creation
                || upload.create_missing_fields.unwrap_or(false),
            new_field_type: upload.new_field_type.unwrap_or(defaults.new_field_type),
            attachment_columns,
            attachment_mappings,
            rename,
            copy_group,
            retry,
            verbose: self.verbose || logging.verbose.unwrap_or(false),
            log_file: self.log.or(logging.file),
            monitor: self.monitor || logging.monitor.unwrap_or(false),
            show_progress: true,
        })
    }
}

fn pairs(values: Vec<String>) -> Result<Vec<AttachmentMapping>> {
    if values.len() % 2 != 0 {
        return Err(AirliftError::config(
            "--attachment-columns-map takes a SOURCE and a TARGET column",
        ));
    }
    let mut mappings = Vec::with_capacity(values.len() / 2);
    let mut values = values.into_iter();
    while let (Some(source), Some(target)) = (values.next(), values.next()) {
        mappings.push(AttachmentMapping { source, target });
    }
    Ok(mappings)
}
