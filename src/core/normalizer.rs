use crate::core::type_guesser::{guess_type, GuessedType};
use crate::domain::model::{DuplicateColumnPolicy, FieldValue, RawRow, RawValue, Record};
use crate::utils::error::{AirliftError, Result};
use chrono::NaiveDate;
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    Delimited(u8),
    JsonRecords,
}

impl InputFormat {
    pub fn from_path(path: &Path) -> Result<Self> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        match extension.as_str() {
            "csv" => Ok(InputFormat::Delimited(b',')),
            "tsv" => Ok(InputFormat::Delimited(b'\t')),
            "json" => Ok(InputFormat::JsonRecords),
            _ => Err(AirliftError::config(format!(
                "File type not supported: {} (expected .csv, .tsv or .json)",
                path.display()
            ))),
        }
    }
}

/// Reads source files into rows and converts rows into typed records.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordNormalizer {
    policy: DuplicateColumnPolicy,
}

impl RecordNormalizer {
    pub fn new(policy: DuplicateColumnPolicy) -> Self {
        Self { policy }
    }

    pub fn read_file(&self, path: &Path) -> Result<Vec<Record>> {
        let format = InputFormat::from_path(path)?;
        let content = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                AirliftError::ingestion(format!("File {} not found", path.display()))
            }
            _ => AirliftError::IoError(e),
        })?;
        let content = content.strip_prefix('\u{feff}').unwrap_or(&content);
        let source = path.display().to_string();

        tracing::debug!("Reading {} as {:?}", source, format);
        let rows = match format {
            InputFormat::Delimited(delimiter) => {
                self.read_delimited(content.as_bytes(), delimiter, &source)?
            }
            InputFormat::JsonRecords => self.read_json(content.as_bytes(), &source)?,
        };

        self.normalize(rows)
    }

    /// Header uniqueness is checked once for the whole file. Short rows are
    /// padded with empty cells, surplus cells are dropped.
    pub fn read_delimited<R: Read>(
        &self,
        reader: R,
        delimiter: u8,
        source: &str,
    ) -> Result<Vec<RawRow>> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .flexible(true)
            .from_reader(reader);

        let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        if headers.iter().all(|h| h.is_empty()) {
            return Err(AirliftError::ingestion(format!("{} has no columns", source)));
        }

        let duplicates = list_duplicates(&headers);
        if !duplicates.is_empty() {
            match self.policy {
                DuplicateColumnPolicy::Fail => {
                    return Err(AirliftError::DuplicateColumnsError {
                        source_name: source.to_string(),
                        columns: duplicates,
                    });
                }
                DuplicateColumnPolicy::Collapse => {
                    tracing::warn!(
                        "Duplicate columns {:?} in {}; the right-most occurrence is kept",
                        duplicates,
                        source
                    );
                }
            }
        }

        let mut rows = Vec::new();
        for (index, result) in reader.records().enumerate() {
            let cells = result?;
            if cells.len() > headers.len() {
                tracing::debug!(
                    "Row {} has {} cells for {} columns; extra cells ignored",
                    index + 1,
                    cells.len(),
                    headers.len()
                );
            }

            let mut row = RawRow::default();
            for (position, header) in headers.iter().enumerate() {
                if header.is_empty() {
                    continue;
                }
                let value = cells.get(position).unwrap_or("");
                row.push(header.clone(), RawValue::Text(value.to_string()));
            }
            rows.push(row);
        }

        Ok(rows)
    }

    pub fn read_json<R: Read>(&self, reader: R, source: &str) -> Result<Vec<RawRow>> {
        let document: serde_json::Value = serde_json::from_reader(reader)?;
        let items = match document {
            serde_json::Value::Array(items) => items,
            _ => {
                return Err(AirliftError::ingestion(format!(
                    "{} must contain an array of records",
                    source
                )))
            }
        };

        if items.is_empty() {
            return Err(AirliftError::ingestion(format!("{} has no data", source)));
        }

        items
            .into_iter()
            .enumerate()
            .map(|(index, item)| match item {
                serde_json::Value::Object(object) => Ok(RawRow {
                    cells: object
                        .into_iter()
                        .map(|(key, value)| (key, RawValue::Json(value)))
                        .collect(),
                }),
                _ => Err(AirliftError::ingestion(format!(
                    "Record {} in {} is not an object",
                    index + 1,
                    source
                ))),
            })
            .collect()
    }

    /// Any conversion fault aborts the whole ingestion.
    pub fn normalize(&self, rows: Vec<RawRow>) -> Result<Vec<Record>> {
        rows.into_iter()
            .enumerate()
            .map(|(index, row)| normalize_row(index + 1, row))
            .collect()
    }
}

fn normalize_row(row_number: usize, row: RawRow) -> Result<Record> {
    let mut record = Record::default();
    // later cells with the same name overwrite earlier ones
    for (column, raw) in row.cells {
        let value = match raw {
            RawValue::Text(text) => convert_text(&column, row_number, text)?,
            RawValue::Json(value) => FieldValue::Json(value),
        };
        record.insert(column, value);
    }
    Ok(record)
}

pub fn convert_text(column: &str, row: usize, text: String) -> Result<FieldValue> {
    let conversion_error = |text: &str, kind: &str| AirliftError::ConversionError {
        column: column.to_string(),
        row,
        value: text.to_string(),
        kind: kind.to_string(),
    };

    match guess_type(&text) {
        GuessedType::Number => text
            .parse::<f64>()
            .ok()
            .filter(|n| n.is_finite())
            .map(FieldValue::Number)
            .ok_or_else(|| conversion_error(&text, "number")),
        GuessedType::Date => NaiveDate::parse_from_str(&text, "%Y-%m-%d")
            .map(FieldValue::Date)
            .map_err(|_| conversion_error(&text, "date")),
        GuessedType::Boolean => Ok(FieldValue::Bool(!text.eq_ignore_ascii_case("false"))),
        GuessedType::Email => Ok(FieldValue::Text(mailbox_address(&text))),
        GuessedType::Unknown => Ok(FieldValue::Text(text)),
    }
}

fn mailbox_address(text: &str) -> String {
    match mailparse::addrparse(text) {
        Ok(addresses) => match addresses.iter().next() {
            Some(mailparse::MailAddr::Single(info)) => info.addr.clone(),
            _ => text.to_string(),
        },
        Err(_) => text.to_string(),
    }
}

fn list_duplicates(headers: &[String]) -> Vec<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for header in headers {
        *counts.entry(header.as_str()).or_default() += 1;
    }

    let mut duplicates: Vec<String> = Vec::new();
    for header in headers {
        if counts[header.as_str()] > 1 && !duplicates.contains(header) {
            duplicates.push(header.clone());
        }
    }
    duplicates
}
