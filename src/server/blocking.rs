//! Blocking echo server: one thread per connection.
//!
//! Line-oriented framing, unlike the reactor's raw-byte framing: the
//! handler reads a single newline-terminated line through a buffered
//! reader, writes it back with a trailing newline, and closes.

use crate::config::Config;
use std::io::{self, BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use tracing::{debug, error, info};

/// Run the blocking server forever.
pub fn run(config: &Config) -> io::Result<()> {
    let listener = TcpListener::bind(&config.listen)?;
    info!(addr = %listener.local_addr()?, "Blocking server listening");

    let mut next_id: u64 = 0;
    loop {
        match listener.accept() {
            Ok((stream, peer_addr)) => {
                debug!(peer = %peer_addr, "Accepted connection");
                let id = next_id;
                next_id += 1;
                thread::Builder::new()
                    .name(format!("echo-conn-{id}"))
                    .spawn(move || {
                        if let Err(e) = serve(stream) {
                            debug!(peer = %peer_addr, error = %e, "Connection error");
                        }
                    })?;
            }
            Err(e) => {
                error!(error = %e, "Accept error");
            }
        }
    }
}

/// Echo one line back and hang up.
fn serve(stream: TcpStream) -> io::Result<()> {
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut line = String::new();
    reader.read_line(&mut line)?;

    let mut stream = stream;
    stream.write_all(line.trim_end_matches(&['\r', '\n'][..]).as_bytes())?;
    stream.write_all(b"\n")?;
    stream.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::time::Duration;

    fn start_server() -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || loop {
            if let Ok((stream, _)) = listener.accept() {
                thread::spawn(move || {
                    let _ = serve(stream);
                });
            }
        });
        addr
    }

    #[test]
    fn test_line_echo() {
        let addr = start_server();
        let mut client = TcpStream::connect(addr).unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();

        client.write_all(b"hello blocking world\n").unwrap();
        let mut response = String::new();
        client.read_to_string(&mut response).unwrap();
        assert_eq!(response, "hello blocking world\n");
    }

    #[test]
    fn test_crlf_line_echo() {
        let addr = start_server();
        let mut client = TcpStream::connect(addr).unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();

        client.write_all(b"dos line\r\n").unwrap();
        let mut response = String::new();
        client.read_to_string(&mut response).unwrap();
        assert_eq!(response, "dos line\n");
    }
}
