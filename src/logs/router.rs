use crate::config::{LogTargets, TimestampFormat};
use crate::error::LogOpenError;
use crate::logs::LogWriter;
use chrono::Local;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Lines buffered between the pipe readers and the writer task
const CHANNEL_CAPACITY: usize = 1024;

/// Longest line kept in memory; longer output is split into chunks
const MAX_LINE_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stream {
    Stdout,
    Stderr,
}

/// Routes a child's stdout/stderr into its log files.
///
/// Files are opened before the child is spawned so that an unwritable log
/// path aborts the launch.
pub struct LogRouter {
    stdout: LogWriter,
    /// `None` when both streams are merged into the stdout file
    stderr: Option<LogWriter>,
    format: TimestampFormat,
}

impl LogRouter {
    pub async fn open(targets: &LogTargets) -> std::result::Result<Self, LogOpenError> {
        let stdout = LogWriter::open(&targets.stdout_path).await?;
        let stderr = if targets.merge_streams {
            None
        } else {
            Some(LogWriter::open(&targets.stderr_path).await?)
        };

        Ok(Self {
            stdout,
            stderr,
            format: targets.timestamp_format.clone(),
        })
    }

    /// Start copying both pipes into the log files
    pub fn attach<O, E>(self, stdout: O, stderr: E) -> RouterHandle
    where
        O: AsyncRead + Unpin + Send + 'static,
        E: AsyncRead + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);

        let readers = vec![
            tokio::spawn(read_stream(Stream::Stdout, stdout, tx.clone())),
            tokio::spawn(read_stream(Stream::Stderr, stderr, tx)),
        ];
        let writer = tokio::spawn(self.write_lines(rx));

        RouterHandle { readers, writer }
    }

    /// Owns the files; ends once both readers have hung up
    async fn write_lines(mut self, mut rx: mpsc::Receiver<(Stream, Vec<u8>)>) {
        while let Some((stream, line)) = rx.recv().await {
            let now = Local::now();
            let writer = match (stream, self.stderr.as_mut()) {
                (Stream::Stderr, Some(stderr)) => stderr,
                _ => &mut self.stdout,
            };

            if let Err(e) = writer.write_line_at(&self.format, &now, &line).await {
                tracing::error!("Failed to write to {}: {}", writer.path().display(), e);
            }
        }

        if let Err(e) = self.stdout.close().await {
            tracing::error!("Failed to close stdout log: {}", e);
        }
        if let Some(stderr) = self.stderr {
            if let Err(e) = stderr.close().await {
                tracing::error!("Failed to close stderr log: {}", e);
            }
        }
    }
}

async fn read_stream<R>(stream: Stream, pipe: R, tx: mpsc::Sender<(Stream, Vec<u8>)>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(pipe);
    let mut line = Vec::new();

    loop {
        let mut limited = (&mut reader).take(MAX_LINE_BYTES as u64);
        match limited.read_until(b'\n', &mut line).await {
            // EOF
            Ok(0) => break,
            Ok(_) => {
                if tx.send((stream, std::mem::take(&mut line))).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::debug!("Stopped reading {:?}: {}", stream, e);
                break;
            }
        }
    }
}

/// Keeps the router tasks alive until the logs are flushed and closed
pub struct RouterHandle {
    readers: Vec<JoinHandle<()>>,
    writer: JoinHandle<()>,
}

impl RouterHandle {
    /// Wait for the pipes to drain and the files to close.
    ///
    /// A grandchild can hold a pipe open after the child is gone; after
    /// `grace` the readers are abandoned and whatever was read is flushed.
    pub async fn finish(self, grace: Duration) {
        let RouterHandle { readers, mut writer } = self;

        if tokio::time::timeout(grace, &mut writer).await.is_ok() {
            return;
        }

        tracing::warn!("Output pipes still open after {:?}, closing logs", grace);
        for reader in &readers {
            reader.abort();
        }
        let _ = writer.await;
    }
}
