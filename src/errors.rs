use std::path::{Path, PathBuf};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ParseOutputError>;

/// Every failure is fatal: nothing here is retried or skipped.
#[derive(Debug, Error)]
pub enum ParseOutputError {
    /// Malformed file name, non-numeric field, unknown variant class or bad column count.
    #[error("Format error: {0}")]
    Format(String),
    /// A placeholder or variant reference that the reference tables do not know.
    #[error("Lookup error: {0}")]
    Lookup(String),
    /// A prediction that contradicts the variant it resolved to.
    #[error("Consistency error: {0}")]
    Consistency(String),
    #[error("I/O error on '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ParseOutputError {
    pub fn io(path: &Path, source: std::io::Error) -> Self {
        ParseOutputError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// csv errors are either I/O failures underneath or malformed rows.
    pub fn from_csv(path: &Path, err: csv::Error) -> Self {
        let line = err.position().map(|pos| pos.line());
        match err.into_kind() {
            csv::ErrorKind::Io(source) => ParseOutputError::io(path, source),
            kind => {
                let detail = match kind {
                    csv::ErrorKind::UnequalLengths {
                        expected_len, len, ..
                    } => format!("expected {expected_len} columns but found {len}"),
                    csv::ErrorKind::Deserialize { err, .. } => err.to_string(),
                    csv::ErrorKind::Utf8 { err, .. } => err.to_string(),
                    other => format!("{other:?}"),
                };
                match line {
                    Some(line) => ParseOutputError::Format(format!(
                        "{} line {line}: {detail}",
                        path.display()
                    )),
                    None => ParseOutputError::Format(format!("{}: {detail}", path.display())),
                }
            }
        }
    }
}
