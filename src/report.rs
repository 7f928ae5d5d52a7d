/// Results table printed after a command when `--report` is given
use prettytable::{format, Cell, Row, Table};
use std::path::Path;

use crate::image_processing::{CommandSummary, ResultStatus};
use crate::utils::format_duration;

/// Build the per-file table for a finished command
pub fn build_table(summary: &CommandSummary) -> Table {
    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BOX_CHARS);

    table.add_row(Row::new(vec![
        Cell::new("Input"),
        Cell::new("Output"),
        Cell::new("Status"),
        Cell::new("Time"),
        Cell::new("Detail"),
    ]));

    for result in &summary.results {
        let output = result
            .output_path
            .as_deref()
            .map(extract_filename)
            .unwrap_or_else(|| "-".to_string());
        let status = match result.status {
            ResultStatus::Completed => "✓ completed",
            ResultStatus::Skipped => "- skipped",
            ResultStatus::Failed => "✗ failed",
        };

        table.add_row(Row::new(vec![
            Cell::new(&truncate(&extract_filename(&result.input_path), 30)),
            Cell::new(&truncate(&output, 30)),
            Cell::new(status),
            Cell::new(&format_duration(result.processing_time)),
            Cell::new(&truncate(&result.detail, 40)),
        ]));
    }

    table
}

pub fn print_report(summary: &CommandSummary) {
    println!();
    println!(
        "📋 {} REPORT ({} files)\n",
        summary.command.to_string().to_uppercase(),
        summary.results.len()
    );

    if summary.results.is_empty() {
        println!("   No files were processed.");
    } else {
        build_table(summary).printstd();
    }

    println!();
    println!("   • Completed: {}", summary.processed());
    println!("   • Skipped: {}", summary.skipped());
    println!("   • Failed: {}", summary.failed());
    println!("   • Total time: {}", format_duration(summary.duration));
    println!();
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len - 1).collect();
        format!("{}…", kept)
    }
}

/// Helper to extract filename from path
pub fn extract_filename(path: &Path) -> String {
    path.file_name()
        .and_then(|f| f.to_str())
        .unwrap_or("unknown")
        .to_string()
}
