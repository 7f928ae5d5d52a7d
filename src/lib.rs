// Library exports for the binary and for embedding the processors elsewhere
pub mod cli;
pub mod config_file;
pub mod image_processing;
pub mod json_output;
pub mod report;
pub mod utils;

// Re-export commonly used types
pub use config_file::{AppConfig, Command};
pub use image_processing::batch::{BatchJob, BatchReport, FileOutcome};
pub use image_processing::progress::{BatchEvent, ProgressCounter, ProgressObserver};
pub use image_processing::{CommandSummary, ProcessingEngine, ProcessingResult, ResultStatus};
pub use json_output::JsonMessage;
