use crate::error::{ProbeError, Result};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::debug;

const READ_CHUNK_SIZE: usize = 4096;

/// Background reader that consumes a stream until end-of-data.
///
/// The task is tied to this handle: dropping the handle aborts the task,
/// so a drain that timed out does not linger.
pub struct OutputDrain {
    done: oneshot::Receiver<std::io::Result<Vec<u8>>>,
    progress: watch::Receiver<usize>,
    task: JoinHandle<()>,
}

impl OutputDrain {
    /// Spawns the drain task on the current runtime
    pub fn spawn<R>(reader: R) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel();
        let (progress_tx, progress_rx) = watch::channel(0usize);

        let task = tokio::spawn(async move {
            let result = drain_to_end(reader, &progress_tx).await;
            // The waiter may have given up already
            let _ = done_tx.send(result);
        });

        Self {
            done: done_rx,
            progress: progress_rx,
            task,
        }
    }

    /// Number of bytes drained so far
    pub fn bytes_received(&self) -> usize {
        *self.progress.borrow()
    }

    /// Waits until at least `count` bytes were drained.
    ///
    /// Returns false if `bound` expired or the stream ended first.
    pub async fn wait_for_bytes(&mut self, count: usize, bound: Duration) -> bool {
        let mut progress = self.progress.clone();
        let reached = match timeout(bound, progress.wait_for(|received| *received >= count)).await {
            Ok(Ok(_)) => true,
            Ok(Err(_)) => self.bytes_received() >= count,
            Err(_) => {
                debug!(
                    "only {} of {} bytes arrived within {:?}",
                    self.bytes_received(),
                    count,
                    bound
                );
                false
            }
        };
        reached
    }

    /// Waits for the completion signal and hands over the captured bytes
    pub async fn wait(mut self, bound: Duration) -> Result<Vec<u8>> {
        match timeout(bound, &mut self.done).await {
            Ok(Ok(Ok(bytes))) => Ok(bytes),
            Ok(Ok(Err(source))) => Err(ProbeError::Read {
                stream: "stdout",
                source,
            }),
            Ok(Err(_)) => Err(ProbeError::DrainAborted),
            Err(_) => Err(ProbeError::Timeout {
                what: "output drain",
                bound,
            }),
        }
    }
}

impl Drop for OutputDrain {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn drain_to_end<R>(mut reader: R, progress: &watch::Sender<usize>) -> std::io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut buffer = Vec::new();
    let mut chunk = [0u8; READ_CHUNK_SIZE];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            debug!("drain reached end-of-data after {} bytes", buffer.len());
            return Ok(buffer);
        }
        buffer.extend_from_slice(&chunk[..n]);
        progress.send_replace(buffer.len());
    }
}
