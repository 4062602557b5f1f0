//! Terminator-delimited line reading over an async transport.

use std::io;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

/// Longest line accepted before the buffered bytes are discarded.
pub const DEFAULT_MAX_LINE_LENGTH: usize = 64 * 1024;

/// Splits an [`AsyncRead`] into lines ending in a configurable terminator.
///
/// [`LineReader::next_line`] is cancel safe: bytes read before the future is
/// dropped stay buffered and are returned by the next call.
#[derive(Debug)]
pub struct LineReader<R> {
    inner: BufReader<R>,
    terminator: Vec<u8>,
    pending: Vec<u8>,
    max_line_length: usize,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    /// `terminator` must not be empty.
    pub fn new(reader: R, terminator: impl Into<Vec<u8>>) -> Self {
        Self {
            inner: BufReader::new(reader),
            terminator: terminator.into(),
            pending: Vec::new(),
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
        }
    }

    /// Cap on the length of one line, terminator excluded.
    pub fn with_max_line_length(mut self, max: usize) -> Self {
        self.max_line_length = max;
        self
    }

    pub fn terminator(&self) -> &[u8] {
        &self.terminator
    }

    /// Next line without its terminator.
    ///
    /// Returns `Ok(None)` at end of input. A trailing partial line is kept
    /// until more bytes arrive or the reader is dropped, so a transport that
    /// reports a transient EOF never splits a line.
    ///
    /// A line longer than the configured maximum is dropped and reported as
    /// [`io::ErrorKind::InvalidData`]; reading can continue after it.
    pub async fn next_line(&mut self) -> io::Result<Option<Vec<u8>>> {
        let Some(&last) = self.terminator.last() else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "empty line terminator",
            ));
        };
        loop {
            let available = self.inner.fill_buf().await?;
            if available.is_empty() {
                return Ok(None);
            }
            let (used, hit) = match available.iter().position(|&b| b == last) {
                Some(idx) => (idx + 1, true),
                None => (available.len(), false),
            };
            self.pending.extend_from_slice(&available[..used]);
            self.inner.consume(used);

            if hit && self.pending.ends_with(&self.terminator) {
                let mut line = std::mem::take(&mut self.pending);
                line.truncate(line.len() - self.terminator.len());
                if line.len() > self.max_line_length {
                    return Err(self.overlong(line.len()));
                }
                return Ok(Some(line));
            }
            if self.pending.len() > self.max_line_length + self.terminator.len() {
                let len = self.pending.len();
                self.pending.clear();
                return Err(self.overlong(len));
            }
        }
    }

    fn overlong(&self, len: usize) -> io::Error {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "line exceeds {} bytes ({len} discarded)",
                self.max_line_length
            ),
        )
    }

    /// Bytes read since the last complete line.
    pub fn pending(&self) -> &[u8] {
        &self.pending
    }

    pub fn into_inner(self) -> R {
        self.inner.into_inner()
    }
}
