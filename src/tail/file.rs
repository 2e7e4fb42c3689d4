//! Polling tailer for a single file.
//!
//! Follows the file by name: truncation rewinds to the start, and a file
//! replaced at the same path (rotation, delete and recreate) is reopened
//! and read from its beginning.
//!
//! The first bytes already read are kept and compared against the file
//! before each fresh read, so a copytruncate-style rotation that regrows the
//! file past the old offset between two reads is still caught. A rewrite
//! that reproduces those first bytes exactly goes unnoticed.
//!
//! Bytes that are not valid UTF-8 are replaced with U+FFFD rather than
//! dropping the line.

use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::Stream;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncSeekExt, BufReader};

use crate::config::DEFAULT_POLL_INTERVAL_MS;
use crate::error::TailError;

/// How many leading bytes are compared to notice an in-place rewrite.
const HEAD_LEN: usize = 64;

/// Where reading starts when the file is first opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartPosition {
    /// Every line already in the file is produced first.
    #[default]
    Beginning,
    /// Only lines appended after opening are produced.
    End,
}

/// Configuration for the file tailer.
#[derive(Debug, Clone)]
pub struct TailConfig {
    /// How often to check the file once everything has been read.
    pub poll_interval: Duration,

    pub start: StartPosition,
}

impl Default for TailConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            start: StartPosition::default(),
        }
    }
}

/// Identifies the file behind a path, to notice when it gets replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileIdentity {
    dev: u64,
    ino: u64,
}

#[cfg(unix)]
fn identity(meta: &std::fs::Metadata) -> Option<FileIdentity> {
    use std::os::unix::fs::MetadataExt;
    Some(FileIdentity {
        dev: meta.dev(),
        ino: meta.ino(),
    })
}

// Without inode numbers only truncation and disappearance are detected.
#[cfg(not(unix))]
fn identity(_meta: &std::fs::Metadata) -> Option<FileIdentity> {
    None
}

/// Lazy, endless sequence of lines appended to one file.
#[derive(Debug)]
pub struct FileTail {
    path: PathBuf,
    config: TailConfig,
    /// `None` while the file is missing.
    reader: Option<BufReader<File>>,
    identity: Option<FileIdentity>,
    offset: u64,
    /// First `min(offset, HEAD_LEN)` bytes of the current file.
    head: Vec<u8>,
    partial: Vec<u8>,
}

impl FileTail {
    /// Opens `path` for tailing. The file must already exist.
    pub async fn open(path: impl Into<PathBuf>, config: TailConfig) -> Result<Self, TailError> {
        let path = path.into();
        let open_err = |source: io::Error| TailError::Open {
            path: path.clone(),
            source,
        };

        let file = File::open(&path).await.map_err(open_err)?;
        let meta = file.metadata().await.map_err(open_err)?;
        if !meta.is_file() {
            return Err(open_err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "not a regular file",
            )));
        }

        let mut reader = BufReader::new(file);
        let offset = match config.start {
            StartPosition::Beginning => 0,
            StartPosition::End => reader.seek(SeekFrom::End(0)).await.map_err(open_err)?,
        };
        let head = read_head(&path, head_len(offset)).await.map_err(open_err)?;

        tracing::info!(path = %path.display(), offset, "Tailing file");

        Ok(Self {
            identity: identity(&meta),
            path,
            config,
            reader: Some(reader),
            offset,
            head,
            partial: Vec::new(),
        })
    }

    /// Waits for and returns the next complete line, without its line ending.
    ///
    /// Errors are per-line; calling again continues tailing.
    pub async fn next_line(&mut self) -> Result<String, TailError> {
        loop {
            let buffered = match self.reader.as_ref() {
                Some(reader) => !reader.buffer().is_empty(),
                None => {
                    self.reopen().await?;
                    continue;
                }
            };
            if !buffered {
                self.check_rewritten().await?;
            }
            let Some(reader) = self.reader.as_mut() else {
                continue;
            };

            match reader.read_until(b'\n', &mut self.partial).await {
                Ok(0) => self.at_eof().await?,
                Ok(n) => {
                    self.record_head(n);
                    self.offset += n as u64;
                    if self.partial.last() == Some(&b'\n') {
                        return Ok(self.take_line());
                    }
                    // Unterminated, wait for the rest
                }
                Err(source) => {
                    tokio::time::sleep(self.config.poll_interval).await;
                    return Err(self.io_error(source));
                }
            }
        }
    }

    /// Adapts the tailer into a [`Stream`] of lines.
    pub fn into_stream(self) -> impl Stream<Item = Result<String, TailError>> + Send {
        futures::stream::unfold(self, |mut tail| async move {
            let item = tail.next_line().await;
            Some((item, tail))
        })
    }

    fn take_line(&mut self) -> String {
        let mut bytes = std::mem::take(&mut self.partial);
        bytes.pop();
        if bytes.last() == Some(&b'\r') {
            bytes.pop();
        }
        match String::from_utf8(bytes) {
            Ok(line) => line,
            Err(err) => String::from_utf8_lossy(err.as_bytes()).into_owned(),
        }
    }

    /// Checks for truncation or replacement, then waits one poll interval.
    async fn at_eof(&mut self) -> Result<(), TailError> {
        match tokio::fs::metadata(&self.path).await {
            Ok(meta) => {
                let replaced = matches!(
                    (self.identity, identity(&meta)),
                    (Some(old), Some(new)) if old != new
                );
                if replaced {
                    tracing::info!(path = %self.path.display(), "File replaced, reopening");
                    self.reader = None;
                    return self.discard_partial();
                }

                if meta.len() < self.offset {
                    tracing::info!(
                        path = %self.path.display(),
                        offset = self.offset,
                        len = meta.len(),
                        "File truncated, reading from start"
                    );
                    return self.rewind().await;
                }
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                tracing::info!(path = %self.path.display(), "File removed, waiting for it to reappear");
                self.reader = None;
                self.identity = None;
                self.head.clear();
                return self.discard_partial();
            }
            Err(source) => {
                tokio::time::sleep(self.config.poll_interval).await;
                return Err(self.io_error(source));
            }
        }

        tokio::time::sleep(self.config.poll_interval).await;
        Ok(())
    }

    async fn reopen(&mut self) -> Result<(), TailError> {
        match File::open(&self.path).await {
            Ok(file) => {
                let meta = file.metadata().await.map_err(|source| self.io_error(source))?;
                tracing::info!(path = %self.path.display(), "Reopened file");
                self.identity = identity(&meta);
                self.offset = 0;
                self.head.clear();
                self.reader = Some(BufReader::new(file));
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                tokio::time::sleep(self.config.poll_interval).await;
                Ok(())
            }
            Err(source) => {
                tokio::time::sleep(self.config.poll_interval).await;
                Err(self.io_error(source))
            }
        }
    }

    /// Rewinds when the bytes already read at the start of the file have
    /// changed underneath us.
    async fn check_rewritten(&mut self) -> Result<(), TailError> {
        if self.head.is_empty() {
            return Ok(());
        }
        let current = match self.current_head().await {
            Ok(Some(current)) => current,
            // Removal and replacement are handled at EOF
            Ok(None) => return Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(source) => {
                tokio::time::sleep(self.config.poll_interval).await;
                return Err(self.io_error(source));
            }
        };
        if current == self.head {
            return Ok(());
        }

        tracing::info!(
            path = %self.path.display(),
            offset = self.offset,
            "File rewritten, reading from start"
        );
        self.rewind().await
    }

    /// Leading bytes of the file at the path, or `None` when the path now
    /// names a different file.
    async fn current_head(&self) -> io::Result<Option<Vec<u8>>> {
        let meta = tokio::fs::metadata(&self.path).await?;
        let replaced = matches!(
            (self.identity, identity(&meta)),
            (Some(old), Some(new)) if old != new
        );
        if replaced {
            return Ok(None);
        }
        read_head(&self.path, self.head.len()).await.map(Some)
    }

    async fn rewind(&mut self) -> Result<(), TailError> {
        if let Some(reader) = self.reader.as_mut() {
            if let Err(source) = reader.seek(SeekFrom::Start(0)).await {
                self.reader = None;
                return Err(self.io_error(source));
            }
        }
        self.offset = 0;
        self.head.clear();
        self.discard_partial()
    }

    /// Keeps the leading bytes of the `n` just appended to `partial`.
    fn record_head(&mut self, n: usize) {
        let have = self.head.len();
        if have >= HEAD_LEN || self.offset > have as u64 {
            return;
        }
        let start = self.partial.len() - n;
        let take = (HEAD_LEN - have).min(n);
        self.head.extend_from_slice(&self.partial[start..start + take]);
    }

    fn discard_partial(&mut self) -> Result<(), TailError> {
        if self.partial.is_empty() {
            return Ok(());
        }
        let bytes = self.partial.len();
        self.partial.clear();
        Err(TailError::PartialLine {
            path: self.path.clone(),
            bytes,
        })
    }

    fn io_error(&self, source: io::Error) -> TailError {
        TailError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

fn head_len(offset: u64) -> usize {
    usize::try_from(offset).map_or(HEAD_LEN, |offset| offset.min(HEAD_LEN))
}

async fn read_head(path: &Path, len: usize) -> io::Result<Vec<u8>> {
    if len == 0 {
        return Ok(Vec::new());
    }
    let file = File::open(path).await?;
    let mut head = Vec::with_capacity(len);
    file.take(len as u64).read_to_end(&mut head).await?;
    Ok(head)
}
