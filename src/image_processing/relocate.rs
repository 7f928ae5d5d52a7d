use anyhow::{Context, Result};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;

use super::{ProcessingResult, ResultStatus};
use crate::config_file::SaveFileConfig;
use crate::utils::{ensure_dir, Console};

/// First free `{name}{ext}`, `{name}_1{ext}`, `{name}_2{ext}`, ... in `dir`
pub fn unique_destination(dir: &Path, input_path: &Path) -> PathBuf {
    let name = input_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());
    let ext = input_path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    let mut candidate = dir.join(format!("{}{}", name, ext));
    let mut n = 1;
    while candidate.exists() {
        candidate = dir.join(format!("{}_{}{}", name, n, ext));
        n += 1;
    }
    candidate
}

/// Rename, falling back to copy + remove only across filesystems
fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    match fs::rename(from, to) {
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => copy_then_remove(from, to),
        other => other,
    }
}

/// The copy is removed again if the source cannot be
fn copy_then_remove(from: &Path, to: &Path) -> io::Result<()> {
    fs::copy(from, to)?;
    if let Err(e) = fs::remove_file(from) {
        let _ = fs::remove_file(to);
        return Err(e);
    }
    Ok(())
}

pub fn relocate_file(input_path: &Path, output_dir: &Path) -> Result<PathBuf> {
    let destination = unique_destination(output_dir, input_path);
    move_file(input_path, &destination).with_context(|| {
        format!(
            "Failed to move {} to {}",
            input_path.display(),
            destination.display()
        )
    })?;
    Ok(destination)
}

/// Run the `save_file` command; missing inputs are skipped with a warning
pub fn run(config: &SaveFileConfig, console: &Console) -> Result<Vec<ProcessingResult>> {
    let output_dir = &config.base.output_path;
    ensure_dir(output_dir)?;

    let mut results = Vec::new();
    for input_path in &config.base.input_path {
        let start = Instant::now();

        if !input_path.is_file() {
            console.warn(&format!("File does not exist: {}", input_path.display()));
            results.push(ProcessingResult::new(
                input_path,
                None,
                ResultStatus::Skipped,
                "not a file".to_string(),
                start,
            ));
            continue;
        }

        match relocate_file(input_path, output_dir) {
            Ok(destination) => {
                console.success(&format!(
                    "File {} saved to {}",
                    input_path.display(),
                    destination.display()
                ));
                results.push(ProcessingResult::completed(
                    input_path,
                    destination,
                    String::new(),
                    start,
                ));
            }
            Err(e) => {
                console.error(&format!("{:#}", e));
                results.push(ProcessingResult::new(
                    input_path,
                    None,
                    ResultStatus::Failed,
                    format!("{:#}", e),
                    start,
                ));
            }
        }
    }

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_unique_destination_suffixes() {
        let dir = TempDir::new().unwrap();
        let input = Path::new("/elsewhere/report.png");

        assert_eq!(unique_destination(dir.path(), input), dir.path().join("report.png"));

        fs::write(dir.path().join("report.png"), b"a").unwrap();
        assert_eq!(unique_destination(dir.path(), input), dir.path().join("report_1.png"));

        fs::write(dir.path().join("report_1.png"), b"b").unwrap();
        assert_eq!(unique_destination(dir.path(), input), dir.path().join("report_2.png"));
    }

    #[test]
    fn test_no_extension() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("README"), b"x").unwrap();
        assert_eq!(
            unique_destination(dir.path(), Path::new("README")),
            dir.path().join("README_1")
        );
    }

    #[test]
    fn test_move_file_renames() {
        let dir = TempDir::new().unwrap();
        let from = dir.path().join("a.png");
        let to = dir.path().join("b.png");
        fs::write(&from, b"png").unwrap();

        move_file(&from, &to).unwrap();
        assert!(!from.exists());
        assert_eq!(fs::read(&to).unwrap(), b"png");
    }

    #[test]
    fn test_failed_rename_keeps_source_and_copies_nothing() {
        let dir = TempDir::new().unwrap();
        let from = dir.path().join("a.png");
        let occupied = dir.path().join("taken");
        fs::write(&from, b"png").unwrap();
        fs::create_dir(&occupied).unwrap();
        fs::write(occupied.join("keep.txt"), b"x").unwrap();

        assert!(move_file(&from, &occupied).is_err());
        assert_eq!(fs::read(&from).unwrap(), b"png");
        assert_eq!(fs::read_dir(&occupied).unwrap().count(), 1);
    }

    #[test]
    fn test_copy_then_remove() {
        let dir = TempDir::new().unwrap();
        let from = dir.path().join("a.png");
        let to = dir.path().join("b.png");
        fs::write(&from, b"png").unwrap();

        copy_then_remove(&from, &to).unwrap();
        assert!(!from.exists());
        assert_eq!(fs::read(&to).unwrap(), b"png");
    }

    #[test]
    fn test_run_moves_and_skips() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        let first = src.path().join("a.jpg");
        let missing = src.path().join("gone.jpg");
        fs::write(&first, b"jpeg bytes").unwrap();
        fs::write(dst.path().join("a.jpg"), b"already here").unwrap();

        let config: SaveFileConfig = serde_json::from_value(serde_json::json!({
            "input_path": [first, missing],
            "output_path": dst.path(),
        }))
        .unwrap();

        let results = run(&config, &Console::new(false, true)).unwrap();
        assert_eq!(results[0].status, ResultStatus::Completed);
        assert_eq!(results[1].status, ResultStatus::Skipped);

        assert!(!first.exists());
        assert_eq!(fs::read(dst.path().join("a_1.jpg")).unwrap(), b"jpeg bytes");
        assert_eq!(fs::read(dst.path().join("a.jpg")).unwrap(), b"already here");
    }
}
