//! Newline-framed JSON transport
//!
//! Reads one command per line; writes responses and events as single lines.
//! The writer is shared between the command handlers and the event pump, so
//! all outbound lines go through one lock and never interleave.

use crate::protocol::RpcCommand;
use serde::Serialize;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

/// Errors from the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Reads commands line by line.
pub struct LineReader<R> {
    reader: R,
}

impl<R: AsyncBufRead + Unpin> LineReader<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    /// Read the next command. Returns `Ok(None)` on EOF; skips empty lines.
    /// Parse failures are recoverable: the caller reports them and keeps
    /// reading.
    pub async fn read_command(&mut self) -> Result<Option<RpcCommand>, TransportError> {
        let mut line = String::new();
        loop {
            line.clear();
            let read = self.reader.read_line(&mut line).await?;
            if read == 0 {
                return Ok(None);
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let command: RpcCommand = serde_json::from_str(trimmed)?;
            return Ok(Some(command));
        }
    }
}

/// Serializes all outbound lines through one lock.
pub struct LineWriter<W> {
    inner: Arc<Mutex<W>>,
}

impl<W> Clone for LineWriter<W> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<W: AsyncWrite + Unpin> LineWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            inner: Arc::new(Mutex::new(writer)),
        }
    }

    /// Write one JSON value as a single line and flush.
    pub async fn write_json<T: Serialize>(&self, value: &T) -> Result<(), TransportError> {
        let json = serde_json::to_string(value)?;
        let mut writer = self.inner.lock().await;
        writer.write_all(json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        Ok(())
    }
}
