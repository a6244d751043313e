use crate::errors::{ParseOutputError, Result};
use crate::open_input::{open_input, tsv_reader_builder};
use regex::Regex;
use serde::Deserialize;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

fn file_name_regex() -> &'static Regex {
    static FILE_NAME: OnceLock<Regex> = OnceLock::new();
    FILE_NAME.get_or_init(|| {
        // Optional sample prefix, then method.allele.length.tsv
        Regex::new(r"^(?:.+\.)?(?P<method>[A-Za-z0-9_]+)\.(?P<allele>[^.]+)\.(?P<length>\d+)\.tsv(?:\.gz)?$")
            .expect("file name pattern is valid")
    })
}

/// What a prediction file's name says about its content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PredictionFileName {
    pub path: PathBuf,
    pub method: String,
    pub allele: String,
    pub peptide_length: usize,
}

impl PredictionFileName {
    pub fn parse(path: &Path) -> Result<Self> {
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                ParseOutputError::Format(format!("'{}' has no usable file name", path.display()))
            })?;

        let captures = file_name_regex().captures(file_name).ok_or_else(|| {
            ParseOutputError::Format(format!(
                "prediction file name '{file_name}' does not match <method>.<allele>.<length>.tsv"
            ))
        })?;

        let peptide_length = captures["length"].parse::<usize>().map_err(|_| {
            ParseOutputError::Format(format!(
                "peptide length in '{file_name}' is out of range"
            ))
        })?;
        if peptide_length == 0 {
            return Err(ParseOutputError::Format(format!(
                "peptide length in '{file_name}' must be positive"
            )));
        }

        Ok(PredictionFileName {
            path: path.to_path_buf(),
            method: captures["method"].to_string(),
            allele: captures["allele"].to_string(),
            peptide_length,
        })
    }
}

/// One scored peptide from one prediction file.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionRecord {
    pub placeholder: String,
    pub peptide: String,
    /// 1-based offset of the peptide inside the submitted window.
    pub start: usize,
    pub score: f64,
    pub allele: String,
    pub peptide_length: usize,
    pub method: String,
}

#[derive(Debug, Deserialize)]
struct PredictionRow {
    seq_num: String,
    start: String,
    peptide: String,
    ic50: String,
    #[serde(default)]
    allele: Option<String>,
    #[serde(default)]
    length: Option<String>,
}

/// Lazy, single-pass reader over one prediction file. Reopen the file to read it again.
pub struct PredictionReader {
    file_name: PredictionFileName,
    rows: csv::DeserializeRecordsIntoIter<Box<dyn Read + Send>, PredictionRow>,
}

impl PredictionReader {
    pub fn open(file_name: &PredictionFileName) -> Result<Self> {
        let input = open_input(&file_name.path)?;
        Ok(Self::from_reader(input, file_name.clone()))
    }

    pub fn from_reader(input: Box<dyn Read + Send>, file_name: PredictionFileName) -> Self {
        let rows = tsv_reader_builder(true)
            .from_reader(input)
            .into_deserialize::<PredictionRow>();
        PredictionReader { file_name, rows }
    }

    fn format_error(&self, peptide: &str, detail: String) -> ParseOutputError {
        ParseOutputError::Format(format!(
            "{} (peptide '{peptide}'): {detail}",
            self.file_name.path.display()
        ))
    }

    fn convert(&self, row: PredictionRow) -> Result<PredictionRecord> {
        let expected = &self.file_name;

        let score = row.ic50.trim().parse::<f64>().ok().filter(|s| s.is_finite()).ok_or_else(|| {
            self.format_error(&row.peptide, format!("score '{}' is not numeric", row.ic50))
        })?;
        let start = row.start.trim().parse::<usize>().map_err(|_| {
            self.format_error(&row.peptide, format!("start '{}' is not an integer", row.start))
        })?;

        let peptide_length = row.peptide.chars().count();
        if peptide_length != expected.peptide_length {
            return Err(self.format_error(
                &row.peptide,
                format!(
                    "peptide has length {peptide_length} but the file name declares {}",
                    expected.peptide_length
                ),
            ));
        }
        if let Some(length) = row.length.as_deref().filter(|l| !l.trim().is_empty()) {
            if length.trim().parse::<usize>().ok() != Some(peptide_length) {
                return Err(self.format_error(
                    &row.peptide,
                    format!("length column '{length}' disagrees with the peptide"),
                ));
            }
        }
        if let Some(allele) = row.allele.as_deref().filter(|a| !a.trim().is_empty()) {
            if allele.trim() != expected.allele {
                return Err(self.format_error(
                    &row.peptide,
                    format!(
                        "allele '{allele}' disagrees with '{}' from the file name",
                        expected.allele
                    ),
                ));
            }
        }

        Ok(PredictionRecord {
            placeholder: row.seq_num.trim().to_string(),
            peptide: row.peptide,
            start,
            score,
            allele: expected.allele.clone(),
            peptide_length,
            method: expected.method.clone(),
        })
    }
}

impl Iterator for PredictionReader {
    type Item = Result<PredictionRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        let row = self.rows.next()?;
        Some(
            row.map_err(|e| ParseOutputError::from_csv(&self.file_name.path, e))
                .and_then(|row| self.convert(row)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reader_for(name: &str, content: &'static str) -> PredictionReader {
        let file_name = PredictionFileName::parse(Path::new(name)).unwrap();
        PredictionReader::from_reader(Box::new(content.as_bytes()), file_name)
    }

    #[test]
    fn test_parse_file_name_with_sample_prefix() {
        let parsed = PredictionFileName::parse(Path::new("/tmp/input.ann.HLA-A*29:02.9.tsv")).unwrap();
        assert_eq!(parsed.method, "ann");
        assert_eq!(parsed.allele, "HLA-A*29:02");
        assert_eq!(parsed.peptide_length, 9);

        let parsed = PredictionFileName::parse(Path::new("nn_align.H2-IAb.15.tsv.gz")).unwrap();
        assert_eq!(parsed.method, "nn_align");
        assert_eq!(parsed.allele, "H2-IAb");
        assert_eq!(parsed.peptide_length, 15);
    }

    #[test]
    fn test_bad_file_names_are_format_errors() {
        for name in ["input.nn_align.H2-IAb.tsv", "ann.HLA-A*02:01.9.txt", "ann.tsv"] {
            assert!(
                matches!(
                    PredictionFileName::parse(Path::new(name)),
                    Err(ParseOutputError::Format(_))
                ),
                "{name} should be rejected"
            );
        }
    }

    #[test]
    fn test_reads_rows_lazily() {
        let mut reader = reader_for(
            "smm.HLA-A*02:01.9.tsv",
            "allele\tseq_num\tstart\tend\tlength\tpeptide\tic50\n\
             HLA-A*02:01\t1\t1\t9\t9\tKLMVAAAAA\t123.4\n\
             HLA-A*02:01\t1\t2\t10\t9\tLMVAAAAAK\t56\n",
        );

        let first = reader.next().unwrap().unwrap();
        assert_eq!(first.placeholder, "1");
        assert_eq!(first.start, 1);
        assert_eq!(first.score, 123.4);
        assert_eq!(first.method, "smm");
        assert_eq!(first.allele, "HLA-A*02:01");

        let second = reader.next().unwrap().unwrap();
        assert_eq!(second.peptide, "LMVAAAAAK");
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_non_numeric_score_is_format_error() {
        let mut reader = reader_for(
            "ann.HLA-A*02:01.9.tsv",
            "seq_num\tstart\tpeptide\tic50\n1\t1\tKLMVAAAAA\tNA\n",
        );
        assert!(matches!(reader.next(), Some(Err(ParseOutputError::Format(_)))));
    }

    #[test]
    fn test_peptide_length_must_match_file_name() {
        let mut reader = reader_for(
            "ann.HLA-A*02:01.10.tsv",
            "seq_num\tstart\tpeptide\tic50\n1\t1\tKLMVAAAAA\t10\n",
        );
        assert!(matches!(reader.next(), Some(Err(ParseOutputError::Format(_)))));
    }

    #[test]
    fn test_allele_column_must_match_file_name() {
        let mut reader = reader_for(
            "ann.HLA-A*02:01.9.tsv",
            "allele\tseq_num\tstart\tpeptide\tic50\nHLA-B*07:02\t1\t1\tKLMVAAAAA\t10\n",
        );
        assert!(matches!(reader.next(), Some(Err(ParseOutputError::Format(_)))));
    }

    #[test]
    fn test_column_count_mismatch_is_format_error() {
        let mut reader = reader_for(
            "ann.HLA-A*02:01.9.tsv",
            "seq_num\tstart\tpeptide\tic50\n1\t1\tKLMVAAAAA\n",
        );
        assert!(matches!(reader.next(), Some(Err(ParseOutputError::Format(_)))));
    }
}
