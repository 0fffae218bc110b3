//! File checks, output naming and run diagnostics shared by the library and the CLI

use crate::{UmivarError, UmivarResult};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Check if a file starts with the gzip magic bytes
pub fn is_gzipped<P: AsRef<Path>>(path: P) -> UmivarResult<bool> {
    let mut file = File::open(path)?;
    let mut buffer = [0; 2];

    match file.read_exact(&mut buffer) {
        Ok(()) => Ok(buffer == GZIP_MAGIC),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(UmivarError::Io(e)),
    }
}

/// Default worker count
pub fn get_num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(1)
}

pub fn validate_file_exists<P: AsRef<Path>>(path: P) -> UmivarResult<()> {
    let path = path.as_ref();
    if !path.is_file() {
        return Err(UmivarError::FileNotFound(path.display().to_string()));
    }
    Ok(())
}

/// Existing file that can be opened; permission problems surface as I/O errors
pub fn validate_file_readable<P: AsRef<Path>>(path: P) -> UmivarResult<()> {
    validate_file_exists(&path)?;
    File::open(&path)?;
    Ok(())
}

/// Case-insensitive check of the last extension
pub fn has_extension<P: AsRef<Path>>(path: P, extension: &str) -> bool {
    path.as_ref()
        .extension()
        .and_then(|s| s.to_str())
        .is_some_and(|s| s.eq_ignore_ascii_case(extension))
}

/// Format a file size in bytes to a human-readable string
pub fn format_file_size(size: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = size as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

pub fn ensure_parent_dirs<P: AsRef<Path>>(path: P) -> UmivarResult<()> {
    if let Some(parent) = path.as_ref().parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Log progress of a stream of known or unknown length
pub fn log_progress(current: u64, total: Option<u64>, message: &str) {
    match total {
        Some(total) if total > 0 => {
            let percentage = (current as f64 / total as f64) * 100.0;
            log::info!("{}: {} / {} ({:.1}%)", message, current, total, percentage);
        }
        _ => log::info!("{}: {}", message, current),
    }
}

/// Path of a file written next to an output prefix, e.g. `out` -> `out.variants.tsv`
pub fn with_suffix<P: AsRef<Path>>(prefix: P, suffix: &str) -> PathBuf {
    let mut name = prefix.as_ref().as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

/// Logs the wall time of a pipeline stage when dropped
pub struct Timer {
    start: Instant,
    stage: String,
}

impl Timer {
    pub fn new(stage: &str) -> Self {
        log::info!("{}...", stage);
        Timer {
            start: Instant::now(),
            stage: stage.to_string(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        log::info!("{} finished in {:.2?}", self.stage, self.elapsed());
    }
}

/// Resident set size in kilobytes from a `/proc/<pid>/status` listing
fn parse_vm_rss(status: &str) -> Option<u64> {
    status
        .lines()
        .find(|line| line.starts_with("VmRSS:"))
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|value| value.parse().ok())
}

/// Log the resident memory of the process; a no-op where `/proc` is missing
pub fn log_memory_usage(context: &str) {
    match std::fs::read_to_string("/proc/self/status")
        .ok()
        .as_deref()
        .and_then(parse_vm_rss)
    {
        Some(kb) => log::info!("Memory usage ({}): {}", context, format_file_size(kb * 1024)),
        None => log::debug!("Memory usage not available ({})", context),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_is_gzipped() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "test content").unwrap();
        assert!(!is_gzipped(temp_file.path()).unwrap());

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(&[0x1f, 0x8b]).unwrap();
        assert!(is_gzipped(temp_file.path()).unwrap());
    }

    #[test]
    fn test_get_num_cpus() {
        let num_cpus = get_num_cpus();
        assert!(num_cpus >= 1);
    }

    #[test]
    fn test_validate_file_exists() {
        let temp_file = NamedTempFile::new().unwrap();
        assert!(validate_file_exists(temp_file.path()).is_ok());
        assert!(validate_file_readable(temp_file.path()).is_ok());

        assert!(matches!(
            validate_file_exists("/nonexistent/file"),
            Err(UmivarError::FileNotFound(_))
        ));
        let dir = tempfile::tempdir().unwrap();
        assert!(validate_file_exists(dir.path()).is_err());
    }

    #[test]
    fn test_parse_vm_rss() {
        let status = "Name:\tumivar\nVmPeak:\t  9000 kB\nVmRSS:\t  4096 kB\nThreads:\t4\n";
        assert_eq!(parse_vm_rss(status), Some(4096));
        assert_eq!(parse_vm_rss("Name:\tumivar\n"), None);
    }

    #[test]
    fn test_has_extension() {
        assert!(has_extension("variants.tsv.gz", "gz"));
        assert!(has_extension("variants.TSV.GZ", "gz"));
        assert!(!has_extension("variants.tsv", "gz"));
        assert!(!has_extension("variants", "gz"));
    }

    #[test]
    fn test_format_file_size() {
        assert_eq!(format_file_size(512), "512.00 B");
        assert_eq!(format_file_size(1024), "1.00 KB");
        assert_eq!(format_file_size(1536), "1.50 KB");
        assert_eq!(format_file_size(1024 * 1024), "1.00 MB");
    }

    #[test]
    fn test_with_suffix() {
        assert_eq!(
            with_suffix("out/sample1", ".variants.tsv"),
            std::path::PathBuf::from("out/sample1.variants.tsv")
        );
    }

    #[test]
    fn test_ensure_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deeper/file.tsv");
        ensure_parent_dirs(&path).unwrap();
        assert!(path.parent().unwrap().is_dir());
    }

    #[test]
    fn test_timer() {
        let timer = Timer::new("test");
        std::thread::sleep(std::time::Duration::from_millis(1));
        assert!(timer.elapsed().as_millis() >= 1);
    }
}