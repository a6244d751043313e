use crate::errors::{ParseOutputError, Result};
use crate::load_variant_table::{AminoAcidChange, VariantClass};
use crate::read_key_file::VariantReference;
use crate::read_prediction_file::PredictionFileName;
use crate::reconcile_position::ReconciledPeptide;
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreMetric {
    Lowest,
    Median,
}

impl ScoreMetric {
    pub fn column_name(&self) -> &'static str {
        match self {
            ScoreMetric::Lowest => "Lowest Score",
            ScoreMetric::Median => "Median Score",
        }
    }

    pub fn aggregate(&self, scores: &[f64]) -> Result<f64> {
        if scores.is_empty() {
            return Err(ParseOutputError::Internal(
                "cannot aggregate an empty score set".to_string(),
            ));
        }
        let mut sorted = scores.to_vec();
        sorted.sort_by(f64::total_cmp);

        Ok(match self {
            ScoreMetric::Lowest => sorted[0],
            ScoreMetric::Median => {
                let mid = sorted.len() / 2;
                if sorted.len() % 2 == 0 {
                    (sorted[mid - 1] + sorted[mid]) / 2.0
                } else {
                    sorted[mid]
                }
            }
        })
    }
}

/// Everything that identifies one report row.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MutationKey {
    pub reference: VariantReference,
    pub peptide_length: usize,
    pub allele: String,
    pub peptide: String,
}

#[derive(Debug, Clone)]
pub struct MutationEntry {
    pub key: MutationKey,
    pub class: VariantClass,
    pub protein_position: usize,
    pub amino_acid_change: AminoAcidChange,
    pub wildtype_peptide: Option<String>,
    pub position: usize,
    pub mutation_position: Option<usize>,
    /// Multiset of (method, score); a method repeats when the peptide recurs in a window.
    pub scores: Vec<(String, f64)>,
}

#[derive(Debug, Clone)]
pub struct OutputRecord {
    pub key: MutationKey,
    pub class: VariantClass,
    pub protein_position: usize,
    pub amino_acid_change: AminoAcidChange,
    pub wildtype_peptide: Option<String>,
    pub position: usize,
    pub mutation_position: Option<usize>,
    /// Lowest score per method, aligned with `ScoreAggregator::methods`.
    pub method_scores: Vec<Option<f64>>,
    pub best_method: String,
    pub aggregate_score: f64,
}

/// Collects scores per mutation key until every prediction file has been consumed.
#[derive(Debug)]
pub struct ScoreAggregator {
    files: Vec<PathBuf>,
    methods: Vec<String>,
    expected_methods: HashMap<(String, usize), BTreeSet<String>>,
    /// File that supplied each (mutation, allele, length, method), by input index.
    contributors: HashMap<(VariantReference, String, usize, String), usize>,
    entries: HashMap<MutationKey, MutationEntry>,
}

impl ScoreAggregator {
    /// Method columns follow the order the files were given in. Several files may share
    /// a method, allele and length as long as they cover different mutations.
    pub fn new(files: &[PredictionFileName]) -> Self {
        let mut methods: Vec<String> = Vec::new();
        let mut expected_methods: HashMap<(String, usize), BTreeSet<String>> = HashMap::new();

        for file in files {
            if !methods.contains(&file.method) {
                methods.push(file.method.clone());
            }
            expected_methods
                .entry((file.allele.clone(), file.peptide_length))
                .or_default()
                .insert(file.method.clone());
        }

        ScoreAggregator {
            files: files.iter().map(|file| file.path.clone()).collect(),
            methods,
            expected_methods,
            contributors: HashMap::new(),
            entries: HashMap::new(),
        }
    }

    pub fn methods(&self) -> &[String] {
        &self.methods
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record one peptide read from the file at `file_index` in input order.
    ///
    /// The first observation of a key fixes its position and wildtype fields. A mutation
    /// already scored for this allele, length and method by another file is rejected.
    pub fn add(&mut self, file_index: usize, peptide: ReconciledPeptide) -> Result<()> {
        let contributor = (
            peptide.reference.clone(),
            peptide.allele.clone(),
            peptide.peptide_length,
            peptide.method.clone(),
        );
        let first_index = *self.contributors.entry(contributor).or_insert(file_index);
        if first_index != file_index {
            let path = |index: usize| {
                self.files
                    .get(index)
                    .map_or_else(|| format!("file #{index}"), |p| p.display().to_string())
            };
            return Err(ParseOutputError::Format(format!(
                "{} ({}, length {}) is predicted by method '{}' in both {} and {}",
                peptide.reference,
                peptide.allele,
                peptide.peptide_length,
                peptide.method,
                path(first_index),
                path(file_index)
            )));
        }

        let key = MutationKey {
            reference: peptide.reference,
            peptide_length: peptide.peptide_length,
            allele: peptide.allele,
            peptide: peptide.peptide,
        };
        let entry = self.entries.entry(key.clone()).or_insert_with(|| MutationEntry {
            key,
            class: peptide.class,
            protein_position: peptide.protein_position,
            amino_acid_change: peptide.amino_acid_change,
            wildtype_peptide: peptide.wildtype_peptide,
            position: peptide.position,
            mutation_position: peptide.mutation_position,
            scores: Vec::new(),
        });
        entry.scores.push((peptide.method, peptide.score));
        Ok(())
    }

    fn check_methods(&self, entry: &MutationEntry) -> Result<()> {
        let key = &entry.key;
        let observed: BTreeSet<&str> = entry.scores.iter().map(|(m, _)| m.as_str()).collect();
        let expected: BTreeSet<&str> = self
            .expected_methods
            .get(&(key.allele.clone(), key.peptide_length))
            .map(|methods| methods.iter().map(String::as_str).collect())
            .unwrap_or_default();

        if observed != expected {
            return Err(ParseOutputError::Consistency(format!(
                "{} peptide '{}' ({}, length {}) was scored by {:?} but the input files provide {:?}",
                key.reference, key.peptide, key.allele, key.peptide_length, observed, expected
            )));
        }
        Ok(())
    }

    /// Aggregate every entry, sorted by mutation, length, allele, position and peptide.
    pub fn finalize(self, metric: ScoreMetric) -> Result<Vec<OutputRecord>> {
        let mut records = Vec::with_capacity(self.entries.len());

        for entry in self.entries.values() {
            self.check_methods(entry)?;

            let method_scores: Vec<Option<f64>> = self
                .methods
                .iter()
                .map(|method| {
                    entry
                        .scores
                        .iter()
                        .filter(|(m, _)| m == method)
                        .map(|(_, score)| *score)
                        .min_by(f64::total_cmp)
                })
                .collect();

            // Strict comparison keeps the first method in column order on ties
            let mut best: Option<(usize, f64)> = None;
            for (i, score) in method_scores.iter().enumerate() {
                if let Some(score) = score {
                    if best.map_or(true, |(_, b)| *score < b) {
                        best = Some((i, *score));
                    }
                }
            }
            let best_method = best
                .map(|(i, _)| self.methods[i].clone())
                .ok_or_else(|| {
                    ParseOutputError::Internal(format!(
                        "no method scores recorded for peptide '{}'",
                        entry.key.peptide
                    ))
                })?;

            let scores: Vec<f64> = entry.scores.iter().map(|(_, s)| *s).collect();
            let aggregate_score = metric.aggregate(&scores)?;

            records.push(OutputRecord {
                key: entry.key.clone(),
                class: entry.class,
                protein_position: entry.protein_position,
                amino_acid_change: entry.amino_acid_change.clone(),
                wildtype_peptide: entry.wildtype_peptide.clone(),
                position: entry.position,
                mutation_position: entry.mutation_position,
                method_scores,
                best_method,
                aggregate_score,
            });
        }

        records.sort_by(|a, b| {
            a.key
                .reference
                .cmp(&b.key.reference)
                .then(a.key.peptide_length.cmp(&b.key.peptide_length))
                .then_with(|| a.key.allele.cmp(&b.key.allele))
                .then(a.position.cmp(&b.position))
                .then_with(|| a.key.peptide.cmp(&b.key.peptide))
        });
        Ok(records)
    }
}

fn rank_within_mutation(a: &OutputRecord, b: &OutputRecord) -> Ordering {
    a.aggregate_score
        .total_cmp(&b.aggregate_score)
        .then_with(|| a.key.peptide.cmp(&b.key.peptide))
        .then_with(|| a.key.allele.cmp(&b.key.allele))
        .then(a.key.peptide_length.cmp(&b.key.peptide_length))
}

/// Keep only the best row per (transcript, variant).
pub fn top_result_per_mutation(records: Vec<OutputRecord>) -> Vec<OutputRecord> {
    let mut best: HashMap<VariantReference, OutputRecord> = HashMap::new();
    for record in records {
        match best.get(&record.key.reference) {
            Some(current) if rank_within_mutation(current, &record) != Ordering::Greater => {}
            _ => {
                best.insert(record.key.reference.clone(), record);
            }
        }
    }

    let mut top: Vec<OutputRecord> = best.into_values().collect();
    top.sort_by(|a, b| a.key.reference.cmp(&b.key.reference));
    top
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(prefix: &str, method: &str, allele: &str, length: usize) -> PredictionFileName {
        PredictionFileName {
            path: PathBuf::from(format!("{prefix}.{method}.{allele}.{length}.tsv")),
            method: method.to_string(),
            allele: allele.to_string(),
            peptide_length: length,
        }
    }

    fn peptide(variant: &str, seq: &str, method: &str, score: f64) -> ReconciledPeptide {
        ReconciledPeptide {
            reference: VariantReference::new("ENST1", variant),
            class: VariantClass::Missense,
            protein_position: 10,
            amino_acid_change: AminoAcidChange {
                reference: "K".to_string(),
                alternate: "N".to_string(),
            },
            allele: "HLA-A*02:01".to_string(),
            peptide_length: seq.len(),
            peptide: seq.to_string(),
            wildtype_peptide: Some(seq.to_lowercase()),
            position: 10,
            mutation_position: Some(1),
            method: method.to_string(),
            score,
        }
    }

    #[test]
    fn test_median_odd_and_even() {
        assert_eq!(ScoreMetric::Median.aggregate(&[30.0, 10.0, 20.0]).unwrap(), 20.0);
        assert_eq!(ScoreMetric::Median.aggregate(&[40.0, 10.0, 30.0, 20.0]).unwrap(), 25.0);
        assert_eq!(ScoreMetric::Median.aggregate(&[7.5]).unwrap(), 7.5);
    }

    #[test]
    fn test_lowest_is_minimum() {
        assert_eq!(ScoreMetric::Lowest.aggregate(&[30.0, 10.5, 20.0]).unwrap(), 10.5);
    }

    #[test]
    fn test_empty_score_set_is_internal_error() {
        assert!(matches!(
            ScoreMetric::Median.aggregate(&[]),
            Err(ParseOutputError::Internal(_))
        ));
    }

    #[test]
    fn test_same_mutation_from_two_files_of_one_method_is_format_error() {
        let files = vec![
            file("a", "ann", "HLA-A*02:01", 9),
            file("b", "ann", "HLA-A*02:01", 9),
        ];
        let mut aggregator = ScoreAggregator::new(&files);
        aggregator.add(0, peptide("v1", "KLMVAAAAA", "ann", 100.0)).unwrap();
        assert!(matches!(
            aggregator.add(1, peptide("v1", "LMVAAAAAK", "ann", 80.0)),
            Err(ParseOutputError::Format(_))
        ));
    }

    #[test]
    fn test_disjoint_chunks_of_one_method_are_merged() {
        let files = vec![
            file("chunk1", "ann", "HLA-A*02:01", 9),
            file("chunk2", "ann", "HLA-A*02:01", 9),
        ];
        let mut aggregator = ScoreAggregator::new(&files);
        assert_eq!(aggregator.methods(), ["ann"]);
        aggregator.add(0, peptide("v1", "KLMVAAAAA", "ann", 100.0)).unwrap();
        aggregator.add(0, peptide("v1", "LMVAAAAAK", "ann", 60.0)).unwrap();
        aggregator.add(1, peptide("v2", "WWWWWWWWW", "ann", 500.0)).unwrap();

        let records = aggregator.finalize(ScoreMetric::Median).unwrap();
        assert_eq!(records.len(), 3);
        assert!(records.iter().all(|r| r.method_scores.len() == 1));
    }

    #[test]
    fn test_three_methods_median_and_column_order() {
        let files = vec![
            file("s", "smmpmbec", "HLA-A*02:01", 9),
            file("s", "ann", "HLA-A*02:01", 9),
            file("s", "smm", "HLA-A*02:01", 9),
        ];
        let mut aggregator = ScoreAggregator::new(&files);
        aggregator.add(0, peptide("v1", "KLMVAAAAA", "smmpmbec", 300.0)).unwrap();
        aggregator.add(1, peptide("v1", "KLMVAAAAA", "ann", 100.0)).unwrap();
        aggregator.add(2, peptide("v1", "KLMVAAAAA", "smm", 200.0)).unwrap();
        assert_eq!(aggregator.methods(), ["smmpmbec", "ann", "smm"]);

        let records = aggregator.finalize(ScoreMetric::Median).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].aggregate_score, 200.0);
        assert_eq!(records[0].method_scores, vec![Some(300.0), Some(100.0), Some(200.0)]);
        assert_eq!(records[0].best_method, "ann");
        assert_eq!(records[0].protein_position, 10);
    }

    #[test]
    fn test_repeated_peptide_in_one_file_keeps_all_scores() {
        let files = vec![file("s", "ann", "HLA-A*02:01", 9)];
        let mut aggregator = ScoreAggregator::new(&files);
        aggregator.add(0, peptide("v1", "AAAAAAAAA", "ann", 50.0)).unwrap();
        aggregator.add(0, peptide("v1", "AAAAAAAAA", "ann", 20.0)).unwrap();
        aggregator.add(0, peptide("v1", "AAAAAAAAA", "ann", 35.0)).unwrap();

        let records = aggregator.finalize(ScoreMetric::Lowest).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].aggregate_score, 20.0);
        assert_eq!(records[0].method_scores, vec![Some(20.0)]);
    }

    #[test]
    fn test_missing_method_is_consistency_error() {
        let files = vec![
            file("s", "ann", "HLA-A*02:01", 9),
            file("s", "smm", "HLA-A*02:01", 9),
        ];
        let mut aggregator = ScoreAggregator::new(&files);
        aggregator.add(0, peptide("v1", "KLMVAAAAA", "ann", 100.0)).unwrap();
        assert!(matches!(
            aggregator.finalize(ScoreMetric::Median),
            Err(ParseOutputError::Consistency(_))
        ));
    }

    #[test]
    fn test_top_result_per_mutation_breaks_ties_by_peptide() {
        let files = vec![file("s", "ann", "HLA-A*02:01", 9)];
        let mut aggregator = ScoreAggregator::new(&files);
        aggregator.add(0, peptide("v1", "MMMMMMMMM", "ann", 10.0)).unwrap();
        aggregator.add(0, peptide("v1", "KKKKKKKKK", "ann", 10.0)).unwrap();
        aggregator.add(0, peptide("v1", "AAAAAAAAA", "ann", 90.0)).unwrap();
        aggregator.add(0, peptide("v2", "WWWWWWWWW", "ann", 500.0)).unwrap();

        let all = aggregator.finalize(ScoreMetric::Lowest).unwrap();
        assert_eq!(all.len(), 4);

        let top = top_result_per_mutation(all);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].key.reference.variant, "v1");
        assert_eq!(top[0].key.peptide, "KKKKKKKKK");
        assert_eq!(top[1].key.peptide, "WWWWWWWWW");
    }
}
