//! I/O loop: polls the read-interest set and serves each ready
//! connection with a single-shot echo.
//!
//! One bounded read, one write of the same bytes, then close. The
//! connection is never kept open for a second exchange. A read of zero
//! bytes (peer closed first) still echoes the empty payload and closes
//! without error.

use super::poll_set::PollSet;
use super::RECV_BUFFER_SIZE;
use mio::net::TcpStream;
use mio::Token;
use std::io::{self, Read, Write};
use std::time::Duration;
use tracing::debug;

/// Run the I/O loop forever.
pub fn run(mut io_set: PollSet<TcpStream>, timeout: Duration) -> io::Result<()> {
    loop {
        cycle(&mut io_set, timeout)?;
    }
}

/// One poll cycle: echo and close every connection with data ready.
fn cycle(io_set: &mut PollSet<TcpStream>, timeout: Duration) -> io::Result<()> {
    let ready = io_set.poll(timeout)?;
    let reported = ready.len();
    let mut actionable = 0;

    for event in ready {
        if !event.readable {
            continue;
        }
        if serve(io_set, event.token) {
            actionable += 1;
        }
    }

    io_set.complete_cycle(reported, actionable)?;
    Ok(())
}

/// Attempt one echo round-trip on `token`.
///
/// Returns whether the event was actionable. Non-actionable outcomes
/// leave the registration alive (spurious `WouldBlock`) or were already
/// gone (stale token); everything else ends with the connection closed.
fn serve(io_set: &mut PollSet<TcpStream>, token: Token) -> bool {
    let Some(stream) = io_set.source_mut(token) else {
        // Registration already consumed; stale event.
        return false;
    };

    let mut buf = [0u8; RECV_BUFFER_SIZE];
    let n = match stream.read(&mut buf) {
        Ok(n) => n,
        Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
            // Spurious readiness; keep the registration for real data.
            return false;
        }
        Err(e) => {
            debug!(token = token.0, error = %e, "Read error, closing connection");
            io_set.deregister(token);
            return true;
        }
    };

    // Single-shot: the registration is consumed whatever happens next.
    if let Some(mut stream) = io_set.deregister(token) {
        if let Err(e) = write_fully(&mut stream, &buf[..n]) {
            debug!(token = token.0, error = %e, "Echo write failed");
        }
        debug!(token = token.0, bytes = n, "Echoed and closed");
    }
    true
}

/// Write the whole payload on a non-blocking stream.
///
/// The payload is at most one receive buffer, well under any socket
/// send buffer, so `WouldBlock` here clears within the same exchange.
fn write_fully(stream: &mut TcpStream, mut buf: &[u8]) -> io::Result<()> {
    while !buf.is_empty() {
        match stream.write(buf) {
            Ok(0) => return Err(io::Error::new(io::ErrorKind::WriteZero, "write returned 0")),
            Ok(n) => buf = &buf[n..],
            Err(ref e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    stream.flush()
}
