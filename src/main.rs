//! # Epitope Reconciler
//!
//! Merges per-method MHC binding predictions with the variant table they were generated
//! from, and writes one scored report row per mutant peptide.
//!
//! ## Quick Start
//!
//! ```bash
//! # One method, median across methods (default)
//! epitope-reconciler sample.ann.HLA-A*02:01.9.tsv -t sample.tsv -k sample.key -o sample.parsed.tsv
//!
//! # Several methods, best peptide per mutation, lowest score
//! epitope-reconciler sample.{ann,smm,smmpmbec}.HLA-A*02:01.9.tsv -t sample.tsv -k sample.key \
//!     -o sample.top.tsv --top-result-per-mutation -m lowest -j 0
//! ```

use clap::{Parser, ValueEnum};
use epitope_reconciler::aggregate_scores::ScoreMetric;
use epitope_reconciler::parse_output::{ParseOutput, ParseOutputConfig};
use log::{error, info, LevelFilter};
use std::path::PathBuf;
use std::time::Instant;

#[derive(Parser)]
#[command(
    name = "epitope-reconciler",
    version,
    about = "🧬 Merge MHC binding predictions with variant annotations into one epitope report",
    long_about = "Reads binding-prediction files named <method>.<allele>.<length>.tsv, resolves each predicted peptide back to the mutation it came from through the key file and the variant table, corrects its position for the variant type and aggregates scores across prediction methods.",
    after_help = "EXAMPLES:
    Single prediction file:
      epitope-reconciler input.ann.HLA-A*29:02.9.tsv -t input.tsv -k input.key -o out.tsv

    Three methods, lowest score, best row per mutation:
      epitope-reconciler input.ann.HLA-A*29:02.9.tsv input.smm.HLA-A*29:02.9.tsv \\
        input.smmpmbec.HLA-A*29:02.9.tsv -t input.tsv -k input.key -o out.tsv -m lowest --top-result-per-mutation"
)]
struct Cli {
    /// Prediction files named <method>.<allele>.<length>.tsv (optionally .gz)
    #[arg(value_name = "PREDICTION_FILES", required = true)]
    input_prediction_files: Vec<PathBuf>,

    /// Variant table the prediction windows were generated from
    #[arg(short = 't', long = "input-tsv")]
    input_tsv_file: PathBuf,

    /// Key file mapping placeholder identifiers to variants
    #[arg(short = 'k', long = "key-file")]
    key_file: PathBuf,

    /// Output report path
    #[arg(short = 'o', long = "output")]
    output_file: PathBuf,

    /// Keep only the best-scoring row per mutation
    #[arg(long = "top-result-per-mutation")]
    top_result_per_mutation: bool,

    /// How scores from several methods are combined
    #[arg(short = 'm', long = "top-score-metric", value_enum, default_value_t = ScoreMetricCli::Median)]
    top_score_metric: ScoreMetricCli,

    /// Number of threads to use for reading prediction files (0 = auto-detect)
    #[arg(short = 'j', long = "threads", default_value_t = 1)]
    threads: usize,

    /// Verbose output
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,

    /// Compress the report with gzip
    #[arg(short = 'c', long = "compress")]
    compress: bool,
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum ScoreMetricCli {
    /// Lowest score across methods
    #[value(name = "lowest")]
    Lowest,
    /// Median score across methods
    #[value(name = "median")]
    Median,
}

impl From<ScoreMetricCli> for ScoreMetric {
    fn from(cli: ScoreMetricCli) -> Self {
        match cli {
            ScoreMetricCli::Lowest => ScoreMetric::Lowest,
            ScoreMetricCli::Median => ScoreMetric::Median,
        }
    }
}

impl From<&Cli> for ParseOutputConfig {
    fn from(cli: &Cli) -> Self {
        let threads = if cli.threads == 0 {
            num_cpus::get()
        } else {
            cli.threads
        };
        ParseOutputConfig {
            input_prediction_files: cli.input_prediction_files.clone(),
            input_tsv_file: cli.input_tsv_file.clone(),
            key_file: cli.key_file.clone(),
            output_file: cli.output_file.clone(),
            top_result_per_mutation: cli.top_result_per_mutation,
            top_score_metric: cli.top_score_metric.into(),
            threads,
            compress: cli.compress,
        }
    }
}

fn init_logging(verbose: bool) {
    let mut builder = env_logger::Builder::new();
    builder
        .filter_level(if verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        })
        .format_module_path(false);
    // RUST_LOG still wins over the -v default
    if let Ok(filters) = std::env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }
    builder.init();
}

fn print_startup_info(config: &ParseOutputConfig) {
    info!("🧬 Epitope Reconciler Starting...");
    for file in &config.input_prediction_files {
        info!("📁 Prediction file: {}", file.display());
    }
    info!("📑 Variant table: {}", config.input_tsv_file.display());
    info!("🔑 Key file: {}", config.key_file.display());
    info!(
        "📊 Score metric: {}{}",
        config.top_score_metric.column_name(),
        if config.top_result_per_mutation {
            " (top result per mutation)"
        } else {
            ""
        }
    );
    info!(
        "⚡ Processing mode: {} (using {} thread{})",
        if config.threads > 1 {
            "Parallel"
        } else {
            "Sequential"
        },
        config.threads,
        if config.threads == 1 { "" } else { "s" }
    );
    if config.compress {
        info!("🗜️  Output compression: Enabled (gzip)");
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = ParseOutputConfig::from(&cli);
    print_startup_info(&config);

    let total_start = Instant::now();
    match ParseOutput::new(config).execute() {
        Ok(summary) => {
            info!("🎉 Processing completed successfully!");
            info!("   📁 Report: {}", cli.output_file.display());
            info!(
                "   📊 {} predictions read, {} beyond truncated proteins, {} rows written",
                summary.predictions_read, summary.predictions_dropped, summary.rows_written
            );
            info!("⏱️  Total time: {:.2?}", total_start.elapsed());
        }
        Err(e) => {
            error!("❌ {e}");
            std::process::exit(1);
        }
    }
}
