//! Splitting an attached exec stream into stdout and stderr buffers.

use bytes::BytesMut;
use futures_util::StreamExt;

use crate::runtime::{OutputChunk, OutputStream, RuntimeError};

/// Output captured from one exec session so far.
///
/// Frames are appended as they arrive, so a drain cut short by a deadline
/// still leaves everything read up to that point.
#[derive(Debug, Default)]
pub struct CapturedOutput {
    stdout: BytesMut,
    stderr: BytesMut,
}

impl CapturedOutput {
    /// Reads `stream` to the end. Stops at the first stream error, keeping
    /// what was captured before it.
    pub async fn drain(&mut self, stream: &mut OutputStream) -> Result<(), RuntimeError> {
        while let Some(chunk) = stream.next().await {
            match chunk? {
                OutputChunk::Stdout(bytes) => self.stdout.extend_from_slice(&bytes),
                OutputChunk::Stderr(bytes) => self.stderr.extend_from_slice(&bytes),
            }
        }
        Ok(())
    }

    /// Stdout so far, lossily decoded as UTF-8.
    pub fn stdout(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Stderr so far, lossily decoded as UTF-8.
    pub fn stderr(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}
