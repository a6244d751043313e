use crate::errors::{ParseOutputError, Result};
use crate::open_input::{open_input, tsv_reader_builder};
use crate::read_key_file::{KeyRecord, VariantReference};
use log::debug;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

/// How a mutation changes the protein sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VariantClass {
    Missense,
    InframeInsertion,
    InframeDeletion,
    FrameshiftElongation,
    FrameshiftTruncation,
}

impl VariantClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            VariantClass::Missense => "missense",
            VariantClass::InframeInsertion => "inframe_insertion",
            VariantClass::InframeDeletion => "inframe_deletion",
            VariantClass::FrameshiftElongation => "frameshift_elongation",
            VariantClass::FrameshiftTruncation => "frameshift_truncation",
        }
    }

    pub fn is_frameshift(&self) -> bool {
        matches!(
            self,
            VariantClass::FrameshiftElongation | VariantClass::FrameshiftTruncation
        )
    }
}

impl fmt::Display for VariantClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VariantClass {
    type Err = ParseOutputError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        match normalized.as_str() {
            "missense" | "missense_variant" => Ok(VariantClass::Missense),
            "inframe_ins" | "inframe_insertion" => Ok(VariantClass::InframeInsertion),
            "inframe_del" | "inframe_deletion" => Ok(VariantClass::InframeDeletion),
            "fs_elongation" | "frameshift_elongation" => Ok(VariantClass::FrameshiftElongation),
            "fs_truncation" | "frameshift_truncation" => Ok(VariantClass::FrameshiftTruncation),
            _ => Err(ParseOutputError::Format(format!(
                "unrecognized variant type '{s}'"
            ))),
        }
    }
}

/// Residues replaced by the variant, as annotated (`REF/ALT`, `-` for none).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AminoAcidChange {
    pub reference: String,
    pub alternate: String,
}

impl FromStr for AminoAcidChange {
    type Err = ParseOutputError;

    fn from_str(s: &str) -> Result<Self> {
        let (reference, alternate) = s.trim().split_once('/').ok_or_else(|| {
            ParseOutputError::Format(format!(
                "amino acid change '{s}' is not in REF/ALT form"
            ))
        })?;
        let residues = |side: &str| {
            if side == "-" {
                String::new()
            } else {
                side.to_string()
            }
        };
        Ok(AminoAcidChange {
            reference: residues(reference),
            alternate: residues(alternate),
        })
    }
}

impl fmt::Display for AminoAcidChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let residues = |side: &str| -> String {
            if side.is_empty() {
                "-".to_string()
            } else {
                side.to_string()
            }
        };
        write!(f, "{}/{}", residues(&self.reference), residues(&self.alternate))
    }
}

/// Where the changed residues sit inside the submitted windows.
///
/// `offset` is 0-based in both windows; the variant replaces `reference_len` wildtype
/// residues with `alternate_len` mutant residues starting there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VariantAnchor {
    pub offset: usize,
    pub reference_len: usize,
    pub alternate_len: usize,
}

#[derive(Debug, Clone)]
pub struct VariantRecord {
    pub reference: VariantReference,
    pub table_index: u64,
    pub class: VariantClass,
    /// Declared start as annotated, 1-based protein coordinate.
    pub protein_position: usize,
    pub amino_acid_change: AminoAcidChange,
    /// 1-based protein coordinate of the first residue of both windows.
    pub window_start: usize,
    pub wildtype_window: String,
    pub mutant_window: String,
    /// Total length of the mutant protein.
    pub protein_length: usize,
    pub anchor: VariantAnchor,
}

#[derive(Debug, Deserialize)]
struct VariantRow {
    index: u64,
    transcript_name: String,
    variant: String,
    variant_type: String,
    protein_position: String,
    amino_acid_change: String,
    subsequence_start: usize,
    wildtype_subsequence: String,
    mutant_subsequence: String,
    protein_length: usize,
}

/// Parse `N` or `N-M`. A pure insertion written as a range starts after `N`.
fn parse_protein_position(raw: &str, change: &AminoAcidChange) -> Result<usize> {
    let invalid = || ParseOutputError::Format(format!("invalid protein position '{raw}'"));
    let (first, second) = match raw.trim().split_once('-') {
        Some((first, second)) => (first, Some(second)),
        None => (raw.trim(), None),
    };
    let first = first.parse::<usize>().map_err(|_| invalid())?;
    let position = match second {
        Some(second) if change.reference.is_empty() => {
            second.parse::<usize>().map_err(|_| invalid())?
        }
        _ => first,
    };
    if position == 0 {
        return Err(invalid());
    }
    Ok(position)
}

fn validate_change_shape(class: VariantClass, change: &AminoAcidChange) -> Result<()> {
    let (ref_len, alt_len) = (change.reference.len(), change.alternate.len());
    let valid = match class {
        VariantClass::Missense => ref_len == alt_len && ref_len > 0,
        VariantClass::InframeInsertion => alt_len > ref_len,
        VariantClass::InframeDeletion => ref_len > alt_len,
        VariantClass::FrameshiftElongation | VariantClass::FrameshiftTruncation => true,
    };
    if valid {
        Ok(())
    } else {
        Err(ParseOutputError::Format(format!(
            "amino acid change '{}/{}' does not describe a {} variant",
            change.reference, change.alternate, class
        )))
    }
}

/// Place the changed span inside the windows, starting from the declared offset.
///
/// Shared leading/trailing residues of REF and ALT are trimmed. A pure insertion or
/// deletion is then moved left through a run of identical residues to the leftmost
/// placement producing the same sequence, stopping at the window start.
fn anchor_variant(
    class: VariantClass,
    declared_offset: usize,
    change: &AminoAcidChange,
    wildtype: &[u8],
    mutant: &[u8],
) -> std::result::Result<VariantAnchor, String> {
    if class.is_frameshift() {
        if declared_offset >= mutant.len() {
            return Err(format!(
                "frameshift start at window offset {declared_offset} lies outside the {} residue mutant window",
                mutant.len()
            ));
        }
        return Ok(VariantAnchor {
            offset: declared_offset,
            reference_len: 0,
            alternate_len: mutant.len() - declared_offset,
        });
    }

    let mut reference = change.reference.as_bytes();
    let mut alternate = change.alternate.as_bytes();
    let mut offset = declared_offset;

    check_residues(wildtype, offset, reference, "wildtype")?;
    check_residues(mutant, offset, alternate, "mutant")?;

    while let (Some(r), Some(a)) = (reference.first(), alternate.first()) {
        if r != a {
            break;
        }
        reference = &reference[1..];
        alternate = &alternate[1..];
        offset += 1;
    }
    while let (Some(r), Some(a)) = (reference.last(), alternate.last()) {
        if r != a {
            break;
        }
        reference = &reference[..reference.len() - 1];
        alternate = &alternate[..alternate.len() - 1];
    }

    let (reference_len, alternate_len) = (reference.len(), alternate.len());
    if reference_len == 0 || alternate_len == 0 {
        // The side that carries the indel residues decides which window we rotate in
        let (sequence, span) = if reference_len == 0 {
            (mutant, alternate_len)
        } else {
            (wildtype, reference_len)
        };
        while span > 0 && offset > 0 && sequence[offset - 1] == sequence[offset + span - 1] {
            offset -= 1;
        }
    }

    Ok(VariantAnchor {
        offset,
        reference_len,
        alternate_len,
    })
}

fn check_residues(
    window: &[u8],
    offset: usize,
    residues: &[u8],
    label: &str,
) -> std::result::Result<(), String> {
    match window.get(offset..offset + residues.len()) {
        Some(found) if found == residues => Ok(()),
        Some(found) => Err(format!(
            "{label} window has '{}' at offset {offset}, annotation declares '{}'",
            String::from_utf8_lossy(found),
            String::from_utf8_lossy(residues)
        )),
        None => Err(format!(
            "{label} window of {} residues cannot hold '{}' at offset {offset}",
            window.len(),
            String::from_utf8_lossy(residues)
        )),
    }
}

impl VariantRecord {
    fn from_row(row: VariantRow) -> Result<Self> {
        let reference = VariantReference::new(&row.transcript_name, &row.variant);
        let class = row
            .variant_type
            .parse::<VariantClass>()
            .map_err(|e| annotate(&reference, e))?;
        let amino_acid_change = row
            .amino_acid_change
            .parse::<AminoAcidChange>()
            .map_err(|e| annotate(&reference, e))?;
        validate_change_shape(class, &amino_acid_change).map_err(|e| annotate(&reference, e))?;
        let protein_position = parse_protein_position(&row.protein_position, &amino_acid_change)
            .map_err(|e| annotate(&reference, e))?;

        if row.subsequence_start == 0 {
            return Err(annotate(
                &reference,
                ParseOutputError::Format("subsequence_start is 1-based and cannot be 0".into()),
            ));
        }
        if protein_position < row.subsequence_start {
            return Err(ParseOutputError::Consistency(format!(
                "{reference}: protein position {protein_position} precedes the window start {}",
                row.subsequence_start
            )));
        }

        let declared_offset = protein_position - row.subsequence_start;
        let anchor = anchor_variant(
            class,
            declared_offset,
            &amino_acid_change,
            row.wildtype_subsequence.as_bytes(),
            row.mutant_subsequence.as_bytes(),
        )
        .map_err(|message| ParseOutputError::Consistency(format!("{reference}: {message}")))?;

        Ok(VariantRecord {
            reference,
            table_index: row.index,
            class,
            protein_position,
            amino_acid_change,
            window_start: row.subsequence_start,
            wildtype_window: row.wildtype_subsequence,
            mutant_window: row.mutant_subsequence,
            protein_length: row.protein_length,
            anchor,
        })
    }
}

fn annotate(reference: &VariantReference, err: ParseOutputError) -> ParseOutputError {
    match err {
        ParseOutputError::Format(message) => {
            ParseOutputError::Format(format!("{reference}: {message}"))
        }
        other => other,
    }
}

/// The annotation table, keyed by (transcript, variant). Immutable once loaded.
#[derive(Debug, Default)]
pub struct VariantTable {
    records: HashMap<VariantReference, VariantRecord>,
}

impl VariantTable {
    pub fn from_path(path: &Path) -> Result<Self> {
        let table = Self::from_reader(open_input(path)?, path)?;
        debug!("Loaded {} variant records from {}", table.len(), path.display());
        Ok(table)
    }

    pub fn from_reader<R: Read>(reader: R, source: &Path) -> Result<Self> {
        let mut csv_reader = tsv_reader_builder(true).from_reader(reader);
        let mut records = HashMap::new();

        for row in csv_reader.deserialize::<VariantRow>() {
            let row = row.map_err(|e| ParseOutputError::from_csv(source, e))?;
            let record = VariantRecord::from_row(row)?;
            let key = record.reference.clone();
            if records.insert(key.clone(), record).is_some() {
                return Err(ParseOutputError::Format(format!(
                    "{}: variant {key} appears more than once",
                    source.display()
                )));
            }
        }

        Ok(VariantTable { records })
    }

    pub fn get(&self, reference: &VariantReference) -> Option<&VariantRecord> {
        self.records.get(reference)
    }

    /// Follow a key record into the table, checking that both sides agree on the row.
    pub fn resolve(&self, key: &KeyRecord) -> Result<&VariantRecord> {
        let record = self.get(&key.reference).ok_or_else(|| {
            ParseOutputError::Lookup(format!(
                "variant {} (placeholder '{}') is not present in the variant table",
                key.reference, key.placeholder
            ))
        })?;
        if record.table_index != key.table_index {
            return Err(ParseOutputError::Lookup(format!(
                "placeholder '{}' points at table row {} but {} is row {}",
                key.placeholder, key.table_index, key.reference, record.table_index
            )));
        }
        Ok(record)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
