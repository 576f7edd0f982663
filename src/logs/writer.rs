use crate::config::TimestampFormat;
use crate::error::LogOpenError;
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

/// LogWriter appends timestamped lines to a single log file
pub struct LogWriter {
    /// Path to the log file
    path: PathBuf,
    /// Async file handle
    file: File,
}

impl LogWriter {
    /// Open `path` for appending, creating it and its parent directory
    pub async fn open(path: &Path) -> std::result::Result<Self, LogOpenError> {
        let open_error = |source| LogOpenError {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(open_error)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(open_error)?;

        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    /// Write one line prefixed with `timestamp`
    pub async fn write_line(&mut self, timestamp: &str, line: &[u8]) -> std::io::Result<()> {
        let entry = format_log_entry(timestamp, line);

        self.file.write_all(&entry).await?;
        // Flush per line so the file can be tailed
        self.file.flush().await?;

        Ok(())
    }

    /// Convenience for callers holding a clock reading and a format
    pub async fn write_line_at(
        &mut self,
        format: &TimestampFormat,
        at: &DateTime<Local>,
        line: &[u8],
    ) -> std::io::Result<()> {
        self.write_line(&format.format(at), line).await
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush and sync to disk
    pub async fn close(mut self) -> std::io::Result<()> {
        self.file.flush().await?;
        self.file.sync_all().await
    }
}

/// `<timestamp> <line>\n`, with any trailing newline normalized
fn format_log_entry(timestamp: &str, line: &[u8]) -> Vec<u8> {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    let line = line.strip_suffix(b"\r").unwrap_or(line);

    let mut entry = Vec::with_capacity(timestamp.len() + line.len() + 2);
    if !timestamp.is_empty() {
        entry.extend_from_slice(timestamp.as_bytes());
        entry.push(b' ');
    }
    entry.extend_from_slice(line);
    entry.push(b'\n');
    entry
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_format_log_entry() {
        assert_eq!(
            format_log_entry("2024-01-01 12:00:00", b"hello\n"),
            b"2024-01-01 12:00:00 hello\n".to_vec()
        );
        assert_eq!(
            format_log_entry("2024-01-01 12:00:00", b"no newline"),
            b"2024-01-01 12:00:00 no newline\n".to_vec()
        );
        assert_eq!(format_log_entry("", b"bare\r\n"), b"bare\n".to_vec());
    }

    #[tokio::test]
    async fn test_open_creates_parent_directory() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("logs/nested/out.log");

        let writer = LogWriter::open(&path).await.unwrap();
        assert!(writer.path().exists());
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_open_failure_reports_path() {
        let temp_dir = TempDir::new().unwrap();
        let blocker = temp_dir.path().join("blocker");
        std::fs::write(&blocker, "").unwrap();

        // A regular file where a directory is needed
        let path = blocker.join("out.log");
        let err = LogWriter::open(&path).await.err().unwrap();
        assert_eq!(err.path, path);
    }

    #[tokio::test]
    async fn test_append_preserves_existing_content() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("out.log");
        std::fs::write(&path, "earlier\n").unwrap();

        let mut writer = LogWriter::open(&path).await.unwrap();

        writer.write_line("T", b"later").await.unwrap();
        writer.close().await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "earlier\nT later\n");
    }

    #[tokio::test]
    async fn test_write_line_at_uses_format() {
        use chrono::TimeZone;

        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("out.log");
        let format = TimestampFormat::parse("YYYY-MM-DD HH:mm:ss").unwrap();
        let at = Local.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();

        let mut writer = LogWriter::open(&path).await.unwrap();
        writer.write_line_at(&format, &at, b"ready").await.unwrap();
        writer.close().await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "2024-01-01 12:00:00 ready\n");
    }
}
