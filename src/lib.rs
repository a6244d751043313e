pub mod aggregate_scores;
pub mod errors;
pub mod load_variant_table;
pub mod open_input;
pub mod parse_output;
pub mod read_key_file;
pub mod read_prediction_file;
pub mod reconcile_position;
pub mod write_report;
