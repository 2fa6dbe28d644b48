use crate::error::{ProbeError, Result};
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tracing::{debug, info};

/// Asks the OS for a currently unused TCP port on `ip`.
///
/// The temporary socket is closed before returning, so the port is only
/// likely, not guaranteed, to still be free when it is used.
pub fn free_local_port(ip: IpAddr) -> Result<u16> {
    let domain = match ip {
        IpAddr::V4(_) => Domain::IPV4,
        IpAddr::V6(_) => Domain::IPV6,
    };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&SocketAddr::new(ip, 0).into())?;

    let local = socket
        .local_addr()?
        .as_socket()
        .ok_or_else(|| std::io::Error::other("bound socket has no inet address"))?;
    debug!("OS assigned free port {}", local.port());
    Ok(local.port())
}

async fn try_connect(addr: SocketAddr, connect_timeout: Duration) -> std::io::Result<TcpStream> {
    match timeout(connect_timeout, TcpStream::connect(addr)).await {
        Ok(result) => result,
        Err(_) => Err(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            format!("connection timeout after {:?}", connect_timeout),
        )),
    }
}

/// Opens a client connection, failing with `Connect` after `connect_timeout`
pub async fn connect(addr: SocketAddr, connect_timeout: Duration) -> Result<TcpStream> {
    try_connect(addr, connect_timeout)
        .await
        .map_err(|source| ProbeError::Connect { addr, source })
}

/// Polls `addr` until a connection succeeds or `bound` expires.
///
/// Each readiness connection is closed immediately.
pub async fn wait_until_listening(
    addr: SocketAddr,
    bound: Duration,
    poll_interval: Duration,
) -> Result<()> {
    let deadline = Instant::now() + bound;
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        let remaining = deadline.saturating_duration_since(Instant::now());
        match try_connect(addr, remaining.min(poll_interval.max(Duration::from_millis(50)))).await {
            Ok(_) => {
                debug!("{} accepting connections after {} attempts", addr, attempts);
                return Ok(());
            }
            Err(last) => {
                if Instant::now() + poll_interval >= deadline {
                    let source = std::io::Error::new(
                        last.kind(),
                        format!("not listening within {:?}, last attempt: {}", bound, last),
                    );
                    return Err(ProbeError::Connect { addr, source });
                }
            }
        }
        sleep(poll_interval).await;
    }
}

/// Connects to `addr`, writes `payload` and flushes it.
///
/// The stream is returned open so the caller decides when the peer sees EOF.
pub async fn send_payload(
    addr: SocketAddr,
    payload: &[u8],
    connect_timeout: Duration,
) -> Result<TcpStream> {
    let mut stream = connect(addr, connect_timeout).await?;
    stream.write_all(payload).await?;
    stream.flush().await?;
    info!("Sent {} bytes to {}", payload.len(), addr);
    Ok(stream)
}
