//! Minimal keep-open TCP listener that copies whatever it receives to stdout.
//!
//! Behaves like `nc -lk ADDR PORT` for the purposes of the netcat scenario,
//! which makes the scenario runnable on hosts without a compatible `nc`.

use crate::error::Result;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

const RELAY_CHUNK_SIZE: usize = 4096;

/// Copies `reader` into `writer` until EOF, flushing after every chunk.
///
/// Flushing per chunk matters: the listener is killed rather than shut down,
/// so anything left in a buffer would never reach the reader of our stdout.
pub async fn relay<R, W>(reader: &mut R, writer: &mut W) -> std::io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut chunk = [0u8; RELAY_CHUNK_SIZE];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Ok(total);
        }
        writer.write_all(&chunk[..n]).await?;
        writer.flush().await?;
        total += n as u64;
    }
}

/// Accepts connections on `addr` one at a time and relays each to stdout.
///
/// Runs until the process is killed or accepting fails.
pub async fn serve(addr: SocketAddr) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("Listening on {}", listener.local_addr()?);

    let mut stdout = tokio::io::stdout();
    loop {
        let (mut socket, peer) = listener.accept().await?;
        debug!("Accepted connection from {}", peer);
        match relay(&mut socket, &mut stdout).await {
            Ok(bytes) => debug!("Connection from {} closed after {} bytes", peer, bytes),
            Err(e) => warn!("Connection from {} failed: {}", peer, e),
        }
    }
}
