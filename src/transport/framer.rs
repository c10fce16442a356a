//! Line framing on top of a [`Link`].
//!
//! The framer owns the single-writer discipline of the link: a command is
//! written chunk by chunk with pacing in between, and no other command's
//! chunks are interleaved with it.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{Mutex, mpsc};

use crate::error::Result;
use crate::protocol::{LineDecoder, UART_SAFE_SIZE, chunk, encode_line};
use crate::transport::Link;

/// Default delay after every chunk write.
pub const DEFAULT_WRITE_PACING: Duration = Duration::from_millis(200);

/// Chunking, pacing writer for one link.
pub struct Framer {
    link: Arc<dyn Link>,
    chunk_size: usize,
    pacing: Duration,
    write_lock: Mutex<()>,
}

impl Framer {
    /// Creates a framer with the given chunk size and pacing.
    ///
    /// A chunk size of zero falls back to [`UART_SAFE_SIZE`].
    #[must_use]
    pub fn new(link: Arc<dyn Link>, chunk_size: usize, pacing: Duration) -> Self {
        Self {
            link,
            chunk_size: if chunk_size == 0 {
                UART_SAFE_SIZE
            } else {
                chunk_size
            },
            pacing,
            write_lock: Mutex::new(()),
        }
    }

    /// Returns the underlying link.
    #[must_use]
    pub fn link(&self) -> &Arc<dyn Link> {
        &self.link
    }

    /// Sends one line, appending the terminator.
    ///
    /// Every chunk is awaited until the driver acknowledges it and is
    /// followed by the pacing delay. An empty line writes nothing.
    ///
    /// # Errors
    ///
    /// Returns the first write error; remaining chunks are not sent.
    pub async fn send_line(&self, line: &str) -> Result<()> {
        let payload = encode_line(line);
        if payload.is_empty() {
            return Ok(());
        }

        let _guard = self.write_lock.lock().await;
        for piece in chunk(&payload, self.chunk_size) {
            tracing::trace!("writing chunk: {}", hex::encode(&piece));
            self.link.write_chunk(piece).await?;
            tokio::time::sleep(self.pacing).await;
        }

        Ok(())
    }

    /// Runs the inbound loop, handing every complete line to `on_line`.
    ///
    /// A line that fails to decode or to be handled is logged and skipped;
    /// the rest of the batch is still processed. Returns once the
    /// notification stream closes.
    pub async fn run_read_loop<F, Fut>(
        mut inbound: mpsc::Receiver<Bytes>,
        mut decoder: LineDecoder,
        mut on_line: F,
    ) where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        while let Some(data) = inbound.recv().await {
            tracing::trace!("received {} bytes: {}", data.len(), hex::encode(&data));
            decoder.feed(&data);

            loop {
                match decoder.decode() {
                    Ok(Some(line)) => {
                        tracing::debug!("received line: {line}");
                        if let Err(e) = on_line(line).await {
                            tracing::warn!("failed to handle line: {e}");
                        }
                    }
                    Ok(None) => break,
                    Err(e) => tracing::warn!("line decode error: {e}"),
                }
            }
        }

        tracing::debug!("notification stream closed");
    }
}
