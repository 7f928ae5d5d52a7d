//! JSON output for GUI integration
//!
//! When --json-progress flag is enabled, all progress and status information
//! is emitted as JSON lines to stdout, suppressing all other output.

use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Success,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JsonMessage {
    /// Free-form log line
    Log { level: LogLevel, message: String },
    /// Batch started
    Started {
        command: String,
        total_files: usize,
        total_units: u64,
    },
    /// Progress update, percentage rounded to one decimal place
    Progress {
        percentage: f64,
        completed: u64,
        total: u64,
    },
    /// File processing completed
    FileCompleted {
        input_path: String,
        output_path: String,
        processing_time_ms: u128,
    },
    /// File skipped (missing or undecodable)
    FileSkipped { input_path: String, reason: String },
    /// File processing failed
    FileFailed { input_path: String, error: String },
    /// Processing summary
    Summary {
        command: String,
        total_files: usize,
        processed: usize,
        skipped: usize,
        failed: usize,
        duration_secs: f64,
    },
}

impl JsonMessage {
    /// Emit JSON message to stdout
    pub fn emit(&self) {
        if let Ok(json) = serde_json::to_string(self) {
            println!("{}", json);
        }
    }

    pub fn log(level: LogLevel, message: impl Into<String>) {
        Self::Log {
            level,
            message: message.into(),
        }
        .emit();
    }

    pub fn started(command: impl Into<String>, total_files: usize, total_units: u64) {
        Self::Started {
            command: command.into(),
            total_files,
            total_units,
        }
        .emit();
    }

    /// Every unit is reported; the batch is sequential so the volume stays low.
    pub fn progress(percentage: f64, completed: u64, total: u64) {
        Self::Progress {
            percentage,
            completed,
            total,
        }
        .emit();
    }

    /// Create and emit file completed message
    pub fn file_completed(input_path: &Path, output_path: &Path, processing_time_ms: u128) {
        Self::FileCompleted {
            input_path: input_path.display().to_string(),
            output_path: output_path.display().to_string(),
            processing_time_ms,
        }
        .emit();
    }

    pub fn file_skipped(input_path: &Path, reason: impl Into<String>) {
        Self::FileSkipped {
            input_path: input_path.display().to_string(),
            reason: reason.into(),
        }
        .emit();
    }

    /// Create and emit file failed message
    pub fn file_failed(input_path: &Path, error: impl Into<String>) {
        Self::FileFailed {
            input_path: input_path.display().to_string(),
            error: error.into(),
        }
        .emit();
    }

    /// Create and emit summary message
    pub fn summary(
        command: impl Into<String>,
        total_files: usize,
        processed: usize,
        skipped: usize,
        failed: usize,
        duration_secs: f64,
    ) {
        Self::Summary {
            command: command.into(),
            total_files,
            processed,
            skipped,
            failed,
            duration_secs,
        }
        .emit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_serialization() {
        let msg = JsonMessage::Progress {
            percentage: 66.7,
            completed: 2,
            total: 3,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(
            json,
            r#"{"type":"progress","percentage":66.7,"completed":2,"total":3}"#
        );
    }

    #[test]
    fn test_log_level_serialization() {
        let msg = JsonMessage::Log {
            level: LogLevel::Warning,
            message: "4 channels image detected".into(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""type":"log""#));
        assert!(json.contains(r#""level":"warning""#));
    }

    #[test]
    fn test_file_skipped_tag() {
        let json = r#"{"type":"file_skipped","input_path":"a.png","reason":"missing"}"#;
        let msg: JsonMessage = serde_json::from_str(json).unwrap();
        assert_eq!(
            msg,
            JsonMessage::FileSkipped {
                input_path: "a.png".into(),
                reason: "missing".into()
            }
        );
    }
}
