//! Completion-style echo server on tokio.
//!
//! The accept loop dispatches every connection to its own task and
//! immediately re-issues the next accept, so acceptance is continuous
//! regardless of how long individual echoes take. Each handler waits a
//! bounded 100ms for the read to complete, echoes up to one buffer of
//! data, and closes.

use crate::config::Config;
use bytes::BytesMut;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::{debug, error, info};

/// Receive buffer per connection, matching the reactor's.
const RECV_BUFFER_SIZE: usize = 1024;

/// How long a handler waits for the read to complete.
const READ_DEADLINE: Duration = Duration::from_millis(100);

/// Run the completion-based server forever.
pub fn run(config: &Config) -> io::Result<()> {
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(serve(config))
}

async fn serve(config: &Config) -> io::Result<()> {
    let listener = TcpListener::bind(&config.listen).await?;
    info!(addr = %listener.local_addr()?, "Completion server listening");

    loop {
        match listener.accept().await {
            Ok((stream, peer_addr)) => {
                debug!(peer = %peer_addr, "Accepted connection");
                tokio::spawn(async move {
                    if let Err(e) = handle(stream).await {
                        debug!(peer = %peer_addr, error = %e, "Connection error");
                    }
                });
            }
            Err(e) => {
                error!(error = %e, "Accept error");
            }
        }
    }
}

/// One bounded read, one echo write, then close.
async fn handle(mut stream: TcpStream) -> io::Result<()> {
    let mut buf = BytesMut::with_capacity(RECV_BUFFER_SIZE);

    let n = timeout(READ_DEADLINE, stream.read_buf(&mut buf))
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "read deadline exceeded"))??;

    stream.write_all(&buf[..n]).await?;
    stream.shutdown().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn start_server() -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                if let Ok((stream, _)) = listener.accept().await {
                    tokio::spawn(async move {
                        let _ = handle(stream).await;
                    });
                }
            }
        });
        addr
    }

    #[tokio::test]
    async fn test_chunk_echo() {
        let addr = start_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client.write_all(b"completion says hi").await.unwrap();
        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();
        assert_eq!(response, b"completion says hi");
    }

    #[test]
    fn test_zero_byte_close() {
        tokio_test::block_on(async {
            let addr = start_server().await;
            let mut client = TcpStream::connect(addr).await.unwrap();

            client.shutdown().await.unwrap();
            let mut response = Vec::new();
            client.read_to_end(&mut response).await.unwrap();
            assert!(response.is_empty());
        });
    }

    #[tokio::test]
    async fn test_read_deadline_closes_connection() {
        let addr = start_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        // Send nothing and keep the socket open; the server gives up
        // after the deadline and hangs up on us.
        let mut response = Vec::new();
        let result = tokio::time::timeout(
            Duration::from_secs(5),
            client.read_to_end(&mut response),
        )
        .await
        .expect("server never closed the idle connection");
        // A reset instead of a clean EOF is acceptable here.
        let _ = result;
        assert!(response.is_empty());
    }
}
