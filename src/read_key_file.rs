use crate::errors::{ParseOutputError, Result};
use crate::open_input::{open_input, tsv_reader_builder};
use log::debug;
use std::collections::HashMap;
use std::fmt;
use std::io::Read;
use std::path::Path;

const KEY_FILE_FIELDS: usize = 4;

/// Full identity of one mutation on one transcript.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VariantReference {
    pub transcript: String,
    pub variant: String,
}

impl VariantReference {
    pub fn new(transcript: &str, variant: &str) -> Self {
        VariantReference {
            transcript: transcript.to_string(),
            variant: variant.to_string(),
        }
    }
}

impl fmt::Display for VariantReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.transcript, self.variant)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct KeyRecord {
    pub placeholder: String,
    pub reference: VariantReference,
    pub table_index: u64,
}

/// Placeholder identifiers exist because the prediction tools cap the length of
/// sequence names; this maps them back to the variant they stand for.
#[derive(Debug, Default)]
pub struct KeyIndex {
    records: HashMap<String, KeyRecord>,
}

impl KeyIndex {
    pub fn from_path(path: &Path) -> Result<Self> {
        let index = Self::from_reader(open_input(path)?, path)?;
        debug!("Loaded {} placeholder keys from {}", index.len(), path.display());
        Ok(index)
    }

    /// `source` is only used in error messages.
    pub fn from_reader<R: Read>(reader: R, source: &Path) -> Result<Self> {
        let mut csv_reader = tsv_reader_builder(false)
            .flexible(true)
            .from_reader(reader);
        let mut records = HashMap::new();

        for row in csv_reader.records() {
            let row = row.map_err(|e| ParseOutputError::from_csv(source, e))?;
            let line = row.position().map(|p| p.line()).unwrap_or(0);

            // A lone empty field is a blank line
            if row.len() == 1 && row[0].trim().is_empty() {
                continue;
            }
            if row.len() != KEY_FILE_FIELDS {
                return Err(ParseOutputError::Format(format!(
                    "{} line {line}: expected {KEY_FILE_FIELDS} tab-separated fields, found {}",
                    source.display(),
                    row.len()
                )));
            }

            let placeholder = row[0].trim().to_string();
            let table_index = row[3].trim().parse::<u64>().map_err(|_| {
                ParseOutputError::Format(format!(
                    "{} line {line}: table index '{}' is not a non-negative integer",
                    source.display(),
                    &row[3]
                ))
            })?;
            let record = KeyRecord {
                placeholder: placeholder.clone(),
                reference: VariantReference::new(row[1].trim(), row[2].trim()),
                table_index,
            };

            if records.insert(placeholder.clone(), record).is_some() {
                return Err(ParseOutputError::Format(format!(
                    "{} line {line}: placeholder '{placeholder}' is declared more than once",
                    source.display()
                )));
            }
        }

        Ok(KeyIndex { records })
    }

    pub fn resolve(&self, placeholder: &str) -> Result<&KeyRecord> {
        self.records.get(placeholder).ok_or_else(|| {
            ParseOutputError::Lookup(format!(
                "placeholder '{placeholder}' is not present in the key file"
            ))
        })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
