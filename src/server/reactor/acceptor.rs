//! Acceptor loop: polls the accept-interest set and hands accepted
//! connections to the I/O loop via its registrar.
//!
//! The loop has no stopping condition; it runs until the process exits.
//! A failed accept is logged and skipped, never fatal.

use super::poll_set::{PollSet, Registrar};
use mio::net::{TcpListener, TcpStream};
use std::io;
use std::time::Duration;
use tracing::{debug, warn};

/// Run the acceptor loop forever.
pub fn run(
    mut accept_set: PollSet<TcpListener>,
    conn_registrar: Registrar<TcpStream>,
    timeout: Duration,
) -> io::Result<()> {
    loop {
        cycle(&mut accept_set, &conn_registrar, timeout)?;
    }
}

/// One poll cycle: accept everything pending on each ready listener.
fn cycle(
    accept_set: &mut PollSet<TcpListener>,
    conn_registrar: &Registrar<TcpStream>,
    timeout: Duration,
) -> io::Result<()> {
    let ready = accept_set.poll(timeout)?;
    let reported = ready.len();
    let mut actionable = 0;

    for event in ready {
        if !event.readable {
            continue;
        }
        let Some(listener) = accept_set.source_mut(event.token) else {
            continue;
        };

        // Drain the accept queue; mio streams come back non-blocking.
        let mut accepted = 0;
        loop {
            match listener.accept() {
                Ok((stream, peer_addr)) => {
                    accepted += 1;
                    debug!(peer = %peer_addr, "Accepted connection");
                    conn_registrar.register(stream);
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!(error = %e, "Accept error");
                    break;
                }
            }
        }
        if accepted > 0 {
            actionable += 1;
        }
    }

    accept_set.complete_cycle(reported, actionable)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accept_handoff() {
        let std_listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        std_listener.set_nonblocking(true).unwrap();
        let addr = std_listener.local_addr().unwrap();
        let listener = TcpListener::from_std(std_listener);

        let mut accept_set: PollSet<TcpListener> = PollSet::new(4).unwrap();
        accept_set.registrar().register(listener);

        let mut io_set: PollSet<TcpStream> = PollSet::new(4).unwrap();
        let conn_registrar = io_set.registrar();

        let _client = std::net::TcpStream::connect(addr).unwrap();

        // Drive cycles until the connection lands on the I/O set.
        for _ in 0..100 {
            cycle(&mut accept_set, &conn_registrar, Duration::from_millis(10)).unwrap();
            io_set.poll(Duration::from_millis(1)).unwrap();
            if io_set.len() == 1 {
                return;
            }
        }
        panic!("accepted connection never reached the I/O poll set");
    }
}
