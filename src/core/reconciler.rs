use crate::domain::model::{
    AttachmentMapping, CopyGroup, FieldValue, Record, RemoteSchema, RenamePair,
};
use crate::domain::ports::RecordStore;
use crate::utils::error::{AirliftError, Result, StoreError};
use std::collections::BTreeSet;

pub const DEFAULT_FIELD_TYPE: &str = "multilineText";

#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    pub create_missing_fields: bool,
    pub new_field_type: String,
    pub rename: Option<RenamePair>,
    pub copy_group: Option<CopyGroup>,
    pub attachment_mappings: Vec<AttachmentMapping>,
    /// Columns allowed to be absent from the table without being created or dropped.
    pub ignored_columns: Vec<String>,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            create_missing_fields: false,
            new_field_type: DEFAULT_FIELD_TYPE.to_string(),
            rename: None,
            copy_group: None,
            attachment_mappings: Vec::new(),
            ignored_columns: Vec::new(),
        }
    }
}

impl RenamePair {
    pub fn validate(&self) -> Result<()> {
        if self.from == self.to {
            return Err(AirliftError::config(format!(
                "Cannot rename key column '{}' to itself",
                self.from
            )));
        }
        Ok(())
    }
}

/// Brings record field sets in line with the destination table.
///
/// The field set of the first record stands for the whole batch, so remote
/// field creation is attempted at most once per missing name.
pub struct SchemaReconciler {
    options: ReconcileOptions,
}

impl SchemaReconciler {
    pub fn new(options: ReconcileOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ReconcileOptions {
        &self.options
    }

    pub async fn reconcile<S: RecordStore + ?Sized>(
        &self,
        store: &S,
        schema: &RemoteSchema,
        mut records: Vec<Record>,
    ) -> Result<Vec<Record>> {
        let Some(first) = records.first() else {
            return Ok(records);
        };

        let ignored = self.ignored_columns();
        let missing: Vec<String> = first
            .field_names()
            .filter(|name| !schema.contains(name) && !ignored.contains(name))
            .map(str::to_string)
            .collect();

        let mut known: BTreeSet<String> = schema.fields.keys().cloned().collect();

        if missing.is_empty() {
            tracing::info!("All columns are present in both the file and the table");
        }

        let dropped = if self.options.create_missing_fields {
            self.create_missing(store, schema, &missing, &mut known)
                .await?
        } else {
            for column in &missing {
                tracing::warn!("Column '{}' is not in the table and will be skipped", column);
            }
            missing
        };

        if !dropped.is_empty() {
            for record in &mut records {
                for column in &dropped {
                    record.remove(column);
                }
            }
        }

        if let Some(rename) = &self.options.rename {
            rename.validate()?;
            if !known.contains(&rename.to) {
                return Err(AirliftError::config(format!(
                    "Rename target column '{}' does not exist in the table; create it first",
                    rename.to
                )));
            }
        }

        self.reserve_attachment_targets(&known, &mut records)?;
        self.apply_copy_group(&known, &mut records)?;
        self.apply_rename(&mut records);

        Ok(records)
    }

    fn ignored_columns(&self) -> BTreeSet<&str> {
        let mut ignored: BTreeSet<&str> = self
            .options
            .ignored_columns
            .iter()
            .map(String::as_str)
            .collect();
        if let Some(rename) = &self.options.rename {
            ignored.insert(rename.from.as_str());
        }
        ignored
    }

    /// Returns the columns whose creation was rejected.
    async fn create_missing<S: RecordStore + ?Sized>(
        &self,
        store: &S,
        schema: &RemoteSchema,
        missing: &[String],
        known: &mut BTreeSet<String>,
    ) -> Result<Vec<String>> {
        let mut rejected = Vec::new();

        for column in missing {
            match store
                .create_field(&schema.table_id, column, &self.options.new_field_type)
                .await
            {
                Ok(()) => {
                    tracing::info!("Created new column '{}' in the table", column);
                    known.insert(column.clone());
                }
                Err(StoreError::AlreadyExists(_)) => {
                    tracing::warn!("Column '{}' already exists in the table", column);
                    known.insert(column.clone());
                }
                Err(err @ (StoreError::Validation(_) | StoreError::Forbidden(_))) => {
                    tracing::warn!(
                        "Could not create column '{}' ({}); it will be skipped",
                        column,
                        err
                    );
                    rejected.push(column.clone());
                }
                Err(err) => return Err(err.into()),
            }
        }

        Ok(rejected)
    }

    fn reserve_attachment_targets(
        &self,
        known: &BTreeSet<String>,
        records: &mut [Record],
    ) -> Result<()> {
        for mapping in &self.options.attachment_mappings {
            if !known.contains(&mapping.target) {
                return Err(AirliftError::config(format!(
                    "Attachment target column '{}' does not exist in the table; create it first",
                    mapping.target
                )));
            }
            for record in records.iter_mut() {
                record.insert(mapping.target.clone(), FieldValue::Empty);
            }
        }
        Ok(())
    }

    fn apply_copy_group(&self, known: &BTreeSet<String>, records: &mut [Record]) -> Result<()> {
        let Some(group) = &self.options.copy_group else {
            return Ok(());
        };

        if group.targets.is_empty() {
            return Err(AirliftError::config(format!(
                "Column copy from '{}' needs at least one target column",
                group.source
            )));
        }
        if let Some(target) = group.targets.iter().find(|t| !known.contains(*t)) {
            return Err(AirliftError::config(format!(
                "Copy target column '{}' does not exist in the table; create it first",
                target
            )));
        }
        if records
            .first()
            .is_some_and(|first| first.get(&group.source).is_none())
        {
            return Err(AirliftError::config(format!(
                "Copy source column '{}' is not present in the records",
                group.source
            )));
        }

        for record in records.iter_mut() {
            let Some(value) = record.get(&group.source).cloned() else {
                continue;
            };
            for target in &group.targets {
                record.insert(target.clone(), value.clone());
            }
        }
        Ok(())
    }

    fn apply_rename(&self, records: &mut [Record]) {
        let Some(rename) = &self.options.rename else {
            return;
        };
        for record in records.iter_mut() {
            if let Some(value) = record.remove(&rename.from) {
                record.insert(rename.to.clone(), value);
            }
        }
    }
}
