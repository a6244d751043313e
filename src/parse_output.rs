use crate::aggregate_scores::{top_result_per_mutation, ScoreAggregator, ScoreMetric};
use crate::errors::{ParseOutputError, Result};
use crate::load_variant_table::VariantTable;
use crate::read_key_file::KeyIndex;
use crate::read_prediction_file::{PredictionFileName, PredictionReader};
use crate::reconcile_position::{reconcile, ReconciledPeptide};
use crate::write_report::write_report;
use log::{debug, info};
use rayon::prelude::*;
use std::path::PathBuf;
use std::time::Instant;

/// Everything one run needs to know.
#[derive(Debug, Clone)]
pub struct ParseOutputConfig {
    pub input_prediction_files: Vec<PathBuf>,
    pub input_tsv_file: PathBuf,
    pub key_file: PathBuf,
    pub output_file: PathBuf,
    pub top_result_per_mutation: bool,
    pub top_score_metric: ScoreMetric,
    /// Files reconciled concurrently when greater than 1.
    pub threads: usize,
    pub compress: bool,
}

impl ParseOutputConfig {
    pub fn new(
        input_prediction_files: Vec<PathBuf>,
        input_tsv_file: PathBuf,
        key_file: PathBuf,
        output_file: PathBuf,
    ) -> Self {
        ParseOutputConfig {
            input_prediction_files,
            input_tsv_file,
            key_file,
            output_file,
            top_result_per_mutation: false,
            top_score_metric: ScoreMetric::Median,
            threads: 1,
            compress: false,
        }
    }
}

/// Summary of a finished run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub predictions_read: usize,
    pub predictions_dropped: usize,
    pub rows_written: usize,
}

pub struct ParseOutput {
    config: ParseOutputConfig,
}

/// Read one prediction file and place every row on its variant.
fn reconcile_file(
    file_name: &PredictionFileName,
    keys: &KeyIndex,
    variants: &VariantTable,
) -> Result<(usize, Vec<ReconciledPeptide>)> {
    let start = Instant::now();
    let mut read = 0;
    let mut reconciled = Vec::new();

    for prediction in PredictionReader::open(file_name)? {
        let prediction = prediction?;
        read += 1;
        let key = keys.resolve(&prediction.placeholder)?;
        let variant = variants.resolve(key)?;
        if let Some(peptide) = reconcile(&prediction, variant)? {
            reconciled.push(peptide);
        }
    }

    debug!(
        "{}: {} predictions, {} kept in {:.2?}",
        file_name.path.display(),
        read,
        reconciled.len(),
        start.elapsed()
    );
    Ok((read, reconciled))
}

impl ParseOutput {
    pub fn new(config: ParseOutputConfig) -> Self {
        ParseOutput { config }
    }

    pub fn execute(&self) -> Result<RunSummary> {
        let config = &self.config;

        let file_names = config
            .input_prediction_files
            .iter()
            .map(|path| PredictionFileName::parse(path))
            .collect::<Result<Vec<_>>>()?;
        let mut aggregator = ScoreAggregator::new(&file_names);

        let load_start = Instant::now();
        let keys = KeyIndex::from_path(&config.key_file)?;
        let variants = VariantTable::from_path(&config.input_tsv_file)?;
        info!(
            "Loaded {} keys and {} variants in {:.2?}",
            keys.len(),
            variants.len(),
            load_start.elapsed()
        );

        let reconcile_start = Instant::now();
        // Collected in file order whatever the thread count, so the report is stable
        let per_file: Vec<(usize, Vec<ReconciledPeptide>)> = if config.threads > 1 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(config.threads)
                .build()
                .map_err(|e| ParseOutputError::Internal(e.to_string()))?;
            pool.install(|| {
                file_names
                    .par_iter()
                    .map(|file_name| reconcile_file(file_name, &keys, &variants))
                    .collect::<Result<Vec<_>>>()
            })?
        } else {
            file_names
                .iter()
                .map(|file_name| reconcile_file(file_name, &keys, &variants))
                .collect::<Result<Vec<_>>>()?
        };

        let mut predictions_read = 0;
        let mut predictions_kept = 0;
        for (file_index, (read, peptides)) in per_file.into_iter().enumerate() {
            predictions_read += read;
            predictions_kept += peptides.len();
            for peptide in peptides {
                aggregator.add(file_index, peptide)?;
            }
        }
        info!(
            "Reconciled {} predictions from {} files in {:.2?}",
            predictions_read,
            file_names.len(),
            reconcile_start.elapsed()
        );

        let methods = aggregator.methods().to_vec();
        let mut records = aggregator.finalize(config.top_score_metric)?;
        if config.top_result_per_mutation {
            records = top_result_per_mutation(records);
        }

        write_report(
            &config.output_file,
            &methods,
            config.top_score_metric,
            &records,
            config.compress,
        )?;

        Ok(RunSummary {
            predictions_read,
            predictions_dropped: predictions_read - predictions_kept,
            rows_written: records.len(),
        })
    }
}
