use crate::aggregate_scores::{OutputRecord, ScoreMetric};
use crate::errors::{ParseOutputError, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use log::debug;
use std::fs::create_dir_all;
use std::io::{BufWriter, Write};
use std::path::Path;
use tempfile::NamedTempFile;

const LEADING_COLUMNS: [&str; 7] = [
    "Transcript",
    "Variant",
    "Variant Type",
    "HLA Allele",
    "Peptide Length",
    "MT Epitope Seq",
    "WT Epitope Seq",
];

/// Placement details, after the score columns.
const TRAILING_COLUMNS: [&str; 5] = [
    "Best Score Method",
    "Sub-peptide Position",
    "Mutation Position",
    "Protein Position",
    "Mutation",
];

pub fn report_headers(methods: &[String], metric: ScoreMetric) -> Vec<String> {
    let mut headers: Vec<String> = LEADING_COLUMNS.iter().map(|c| c.to_string()).collect();
    headers.extend(methods.iter().map(|method| format!("{method} Score")));
    headers.push(metric.column_name().to_string());
    headers.extend(TRAILING_COLUMNS.iter().map(|c| c.to_string()));
    headers
}

fn report_row(record: &OutputRecord) -> Vec<String> {
    let mut row = vec![
        record.key.reference.transcript.clone(),
        record.key.reference.variant.clone(),
        record.class.to_string(),
        record.key.allele.clone(),
        record.key.peptide_length.to_string(),
        record.key.peptide.clone(),
        record.wildtype_peptide.clone().unwrap_or_default(),
    ];
    row.extend(
        record
            .method_scores
            .iter()
            .map(|score| score.map_or(String::new(), |s| s.to_string())),
    );
    row.push(record.aggregate_score.to_string());
    row.extend([
        record.best_method.clone(),
        record.position.to_string(),
        record
            .mutation_position
            .map_or(String::new(), |p| p.to_string()),
        record.protein_position.to_string(),
        record.amino_acid_change.to_string(),
    ]);
    row
}

pub fn write_tsv_content<W: Write>(
    writer: &mut W,
    headers: &[String],
    records: &[OutputRecord],
) -> std::io::Result<()> {
    writeln!(writer, "{}", headers.join("\t"))?;
    for record in records {
        writeln!(writer, "{}", report_row(record).join("\t"))?;
    }
    Ok(())
}

/// Write the report next to its destination and move it into place only once it is
/// complete, so a failed run never leaves a truncated file behind.
pub fn write_report(
    filename: &Path,
    methods: &[String],
    metric: ScoreMetric,
    records: &[OutputRecord],
    compress: bool,
) -> Result<()> {
    let io_error = |e: std::io::Error| ParseOutputError::io(filename, e);

    let parent = match filename.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    // Create the directory structure if it doesn't exist
    create_dir_all(parent).map_err(io_error)?;

    let temp = NamedTempFile::new_in(parent).map_err(io_error)?;
    let headers = report_headers(methods, metric);

    let temp = if compress {
        let encoder = GzEncoder::new(temp, Compression::default());
        let mut writer = BufWriter::new(encoder);
        write_tsv_content(&mut writer, &headers, records).map_err(io_error)?;
        let encoder = writer.into_inner().map_err(|e| io_error(e.into_error()))?;
        encoder.finish().map_err(io_error)?
    } else {
        let mut writer = BufWriter::new(temp);
        write_tsv_content(&mut writer, &headers, records).map_err(io_error)?;
        writer.into_inner().map_err(|e| io_error(e.into_error()))?
    };

    temp.as_file().sync_all().map_err(io_error)?;
    temp.persist(filename).map_err(|e| io_error(e.error))?;
    debug!("Report with {} rows written to {}", records.len(), filename.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate_scores::MutationKey;
    use crate::load_variant_table::{AminoAcidChange, VariantClass};
    use crate::read_key_file::VariantReference;

    fn record(wildtype: Option<&str>) -> OutputRecord {
        OutputRecord {
            key: MutationKey {
                reference: VariantReference::new("ENST1", "chr1:100A>T"),
                peptide_length: 9,
                allele: "HLA-A*29:02".to_string(),
                peptide: "KLMVNAAAA".to_string(),
            },
            class: VariantClass::FrameshiftElongation,
            protein_position: 14,
            amino_acid_change: AminoAcidChange {
                reference: "G".to_string(),
                alternate: String::new(),
            },
            wildtype_peptide: wildtype.map(str::to_string),
            position: 12,
            mutation_position: None,
            method_scores: vec![Some(123.5), None],
            best_method: "ann".to_string(),
            aggregate_score: 123.5,
        }
    }

    #[test]
    fn test_headers_follow_method_order() {
        let headers = report_headers(&["smm".to_string(), "ann".to_string()], ScoreMetric::Lowest);
        assert_eq!(headers.len(), 15);
        assert_eq!(headers[5], "MT Epitope Seq");
        assert_eq!(headers[6], "WT Epitope Seq");
        assert_eq!(headers[7], "smm Score");
        assert_eq!(headers[8], "ann Score");
        assert_eq!(headers[9], "Lowest Score");
        assert_eq!(headers[10], "Best Score Method");
        assert_eq!(headers[14], "Mutation");
    }

    #[test]
    fn test_empty_fields_are_blank() {
        let mut out = Vec::new();
        let headers = report_headers(&["ann".to_string(), "smm".to_string()], ScoreMetric::Median);
        write_tsv_content(&mut out, &headers, &[record(None)]).unwrap();

        let text = String::from_utf8(out).unwrap();
        let row: Vec<&str> = text.lines().nth(1).unwrap().split('\t').collect();
        assert_eq!(row.len(), headers.len());
        assert_eq!(row[2], "frameshift_elongation");
        assert_eq!(row[5], "KLMVNAAAA");
        assert_eq!(row[6], "");
        assert_eq!(row[7], "123.5");
        assert_eq!(row[8], "");
        assert_eq!(row[9], "123.5");
        assert_eq!(row[10], "ann");
        assert_eq!(row[11], "12");
        assert_eq!(row[12], "");
        assert_eq!(row[13], "14");
        assert_eq!(row[14], "G/-");
    }
}
