use crate::error::{ProbeError, Result};
use crate::launcher::{launch, LaunchConfig};
use futures::StreamExt;
use std::process::ExitStatus;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{AnyDelimiterCodec, AnyDelimiterCodecError, FramedRead};
use tracing::{debug, info};

/// Longest line accepted from a streamed command
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

const LINE_CHANNEL_CAPACITY: usize = 256;

/// Summary of a streamed command run
#[derive(Debug)]
pub struct StreamSummary {
    pub lines: usize,
    pub status: ExitStatus,
}

/// Frames a byte stream into lines on a background task.
///
/// Lines are delivered in order over a bounded channel; the channel closes
/// after end-of-data or after the first error, which is sent as the last item.
pub struct LineStream {
    rx: mpsc::Receiver<Result<String>>,
    task: JoinHandle<()>,
}

impl LineStream {
    pub fn spawn<R>(reader: R) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(LINE_CHANNEL_CAPACITY);
        let task = tokio::spawn(async move {
            let codec = AnyDelimiterCodec::new_with_max_length(b"\n".to_vec(), b"\n".to_vec(), MAX_LINE_LENGTH);
            let mut framed = FramedRead::new(reader, codec);
            while let Some(item) = framed.next().await {
                let item = item.map(|raw| decode_line(&raw)).map_err(line_error);
                let failed = item.is_err();
                if tx.send(item).await.is_err() || failed {
                    break;
                }
            }
            debug!("line stream finished");
        });
        Self { rx, task }
    }

    /// Next line, or `None` once the stream is exhausted
    pub async fn next_line(&mut self) -> Option<Result<String>> {
        self.rx.recv().await
    }
}

impl Drop for LineStream {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Lines may carry arbitrary bytes (raw file paths); invalid UTF-8 is replaced
fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

fn line_error(e: AnyDelimiterCodecError) -> ProbeError {
    let source = match e {
        AnyDelimiterCodecError::MaxChunkLengthExceeded => std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("line longer than {} bytes", MAX_LINE_LENGTH),
        ),
        AnyDelimiterCodecError::Io(e) => e,
    };
    ProbeError::Read {
        stream: "stdout",
        source,
    }
}

/// Launches `config` and feeds each stdout line to `sink` until the command exits.
///
/// A read failure terminates the command before the error is returned.
pub async fn stream_lines<F>(config: &LaunchConfig, mut sink: F) -> Result<StreamSummary>
where
    F: FnMut(&str),
{
    let (mut process, stdout) = launch(config).await?;
    let mut lines = LineStream::spawn(stdout);
    let mut count = 0usize;

    while let Some(line) = lines.next_line().await {
        match line {
            Ok(line) => {
                count += 1;
                sink(&line);
            }
            Err(e) => {
                process.terminate().await?;
                return Err(e);
            }
        }
    }

    let status = process.wait().await?;
    info!("{} exited with {:?} after {} lines", config.command, status, count);
    Ok(StreamSummary { lines: count, status })
}
