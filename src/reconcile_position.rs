use crate::errors::{ParseOutputError, Result};
use crate::load_variant_table::{AminoAcidChange, VariantClass, VariantRecord};
use crate::read_key_file::VariantReference;
use crate::read_prediction_file::PredictionRecord;

/// A prediction placed on its mutant protein.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconciledPeptide {
    pub reference: VariantReference,
    pub class: VariantClass,
    /// Declared variant start, as annotated.
    pub protein_position: usize,
    pub amino_acid_change: AminoAcidChange,
    pub allele: String,
    pub peptide_length: usize,
    pub peptide: String,
    /// Wildtype peptide at the aligned coordinate; `None` where nothing aligns.
    pub wildtype_peptide: Option<String>,
    /// 1-based coordinate of the peptide's first residue in the mutant protein.
    pub position: usize,
    /// 1-based position of the first mutated residue inside the peptide.
    pub mutation_position: Option<usize>,
    pub method: String,
    pub score: f64,
}

/// Wildtype peptides for indels are reported only if they still resemble the mutant one.
pub fn min_match_count(peptide_length: usize) -> usize {
    peptide_length.div_ceil(2)
}

/// Identical residues running in from the left end plus those running in from the right.
fn count_matches(mutant: &str, wildtype: &str) -> usize {
    let from_left = mutant
        .bytes()
        .zip(wildtype.bytes())
        .take_while(|(m, w)| m == w)
        .count();
    let from_right = mutant
        .bytes()
        .rev()
        .zip(wildtype.bytes().rev())
        .take_while(|(m, w)| m == w)
        .count();
    from_left + from_right
}

fn window_slice(window: &str, start: usize, len: usize) -> Option<&str> {
    window.get(start..start.checked_add(len)?)
}

/// Resolve one prediction against the variant its placeholder points at.
///
/// Returns `Ok(None)` for peptides cut off by a frameshift truncation.
pub fn reconcile(
    prediction: &PredictionRecord,
    variant: &VariantRecord,
) -> Result<Option<ReconciledPeptide>> {
    let inconsistent = |detail: String| {
        ParseOutputError::Consistency(format!(
            "{} peptide '{}' at start {} ({}, {}): {detail}",
            variant.reference, prediction.peptide, prediction.start, prediction.method, prediction.allele
        ))
    };

    if prediction.start == 0 {
        return Err(inconsistent("start offsets are 1-based".to_string()));
    }
    let offset = prediction.start - 1;
    let length = prediction.peptide_length;

    match window_slice(&variant.mutant_window, offset, length) {
        Some(found) if found == prediction.peptide => {}
        Some(found) => {
            return Err(inconsistent(format!(
                "mutant window holds '{found}' at this offset"
            )))
        }
        None => {
            return Err(inconsistent(format!(
                "peptide runs past the {} residue mutant window",
                variant.mutant_window.len()
            )))
        }
    }

    let (position, last_residue) = variant
        .window_start
        .checked_add(offset)
        .and_then(|position| Some((position, position.checked_add(length.saturating_sub(1))?)))
        .ok_or_else(|| inconsistent("protein coordinate overflows".to_string()))?;
    if last_residue > variant.protein_length {
        return match variant.class {
            VariantClass::FrameshiftTruncation => Ok(None),
            _ => Err(inconsistent(format!(
                "peptide ends at {last_residue}, past the mutant protein length {}",
                variant.protein_length
            ))),
        };
    }

    let anchor = variant.anchor;
    let overlaps_change = match variant.class {
        VariantClass::FrameshiftElongation | VariantClass::FrameshiftTruncation => {
            offset + length > anchor.offset
        }
        // A pure deletion leaves only a junction; the peptide must straddle it
        _ if anchor.alternate_len == 0 => offset < anchor.offset && offset + length > anchor.offset,
        _ => offset < anchor.offset + anchor.alternate_len && offset + length > anchor.offset,
    };
    let mutation_position = overlaps_change.then(|| offset.max(anchor.offset) - offset + 1);

    let wildtype_peptide = match variant.class {
        VariantClass::Missense => {
            let wildtype = window_slice(&variant.wildtype_window, offset, length).ok_or_else(|| {
                inconsistent(format!(
                    "wildtype window of {} residues is shorter than the mutant one",
                    variant.wildtype_window.len()
                ))
            })?;
            Some(wildtype.to_string())
        }
        VariantClass::InframeInsertion | VariantClass::InframeDeletion => {
            let wildtype_start = if offset + length <= anchor.offset {
                offset
            } else if offset >= anchor.offset + anchor.alternate_len {
                offset - anchor.alternate_len + anchor.reference_len
            } else if offset < anchor.offset {
                offset
            } else {
                anchor.offset + (offset - anchor.offset).min(anchor.reference_len)
            };
            window_slice(&variant.wildtype_window, wildtype_start, length)
                .filter(|wildtype| {
                    count_matches(&prediction.peptide, wildtype) >= min_match_count(length)
                })
                .map(str::to_string)
        }
        VariantClass::FrameshiftElongation | VariantClass::FrameshiftTruncation => {
            if offset + length <= anchor.offset {
                window_slice(&variant.wildtype_window, offset, length).map(str::to_string)
            } else {
                None
            }
        }
    };

    Ok(Some(ReconciledPeptide {
        reference: variant.reference.clone(),
        class: variant.class,
        protein_position: variant.protein_position,
        amino_acid_change: variant.amino_acid_change.clone(),
        allele: prediction.allele.clone(),
        peptide_length: length,
        peptide: prediction.peptide.clone(),
        wildtype_peptide,
        position,
        mutation_position,
        method: prediction.method.clone(),
        score: prediction.score,
    }))
}
