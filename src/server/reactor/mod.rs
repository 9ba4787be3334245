//! Readiness-based dual-selector reactor.
//!
//! Two event loops on two OS threads, each owning one poll set:
//!
//! - the **acceptor loop** polls accept-interest on the listener and
//!   registers every accepted connection on the I/O loop's poll set;
//! - the **I/O loop** polls read-interest and serves each ready
//!   connection with one bounded read, one echo write, then a close.
//!
//! Keeping accept-readiness and read-readiness on separate poll sets
//! isolates the two event classes: a spurious-wakeup storm triggered by
//! connection churn on one set is repaired by rebuilding that set alone
//! (see `poll_set`), and a flood of new connections cannot starve
//! already-connected peers of service. The only coupling between the
//! loops is the I/O set's registrar.

mod acceptor;
mod io_loop;
mod poll_set;

pub(crate) use poll_set::PollSet;

use crate::config::Config;
use mio::net::{TcpListener, TcpStream};
use std::io;
use std::net::SocketAddr;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{error, info};

/// Receive buffer per connection; reads beyond this are truncated.
pub(crate) const RECV_BUFFER_SIZE: usize = 1024;

/// Poll timeout for both loops. Short enough to stay responsive,
/// non-zero so an idle loop does not busy-spin.
const POLL_TIMEOUT: Duration = Duration::from_millis(1);

/// Upper bound on concurrently registered connections.
const MAX_CONNECTIONS: usize = 4096;

/// A bound reactor, not yet running.
pub struct Reactor {
    accept_set: PollSet<TcpListener>,
    io_set: PollSet<TcpStream>,
    local_addr: SocketAddr,
}

impl Reactor {
    /// Bind the listening socket and set up both poll sets.
    pub fn bind(addr: SocketAddr) -> io::Result<Self> {
        let listener = create_listener(addr)?;
        let local_addr = listener.local_addr()?;
        let listener = TcpListener::from_std(listener);

        let accept_set: PollSet<TcpListener> = PollSet::new(4)?;
        accept_set.registrar().register(listener);
        let io_set: PollSet<TcpStream> = PollSet::new(MAX_CONNECTIONS)?;

        Ok(Self {
            accept_set,
            io_set,
            local_addr,
        })
    }

    /// Address the listener actually bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Spawn the two loop threads. Neither returns in normal operation.
    pub fn start(self) -> io::Result<Vec<JoinHandle<()>>> {
        let conn_registrar = self.io_set.registrar();

        let accept_set = self.accept_set;
        let acceptor = thread::Builder::new()
            .name("acceptor".to_string())
            .spawn(move || {
                if let Err(e) = acceptor::run(accept_set, conn_registrar, POLL_TIMEOUT) {
                    error!(error = %e, "Acceptor loop failed");
                }
            })?;

        let io_set = self.io_set;
        let io = thread::Builder::new()
            .name("echo-io".to_string())
            .spawn(move || {
                if let Err(e) = io_loop::run(io_set, POLL_TIMEOUT) {
                    error!(error = %e, "I/O loop failed");
                }
            })?;

        Ok(vec![acceptor, io])
    }
}

/// Run the reactor on the configured address, blocking forever.
pub fn run(config: &Config) -> io::Result<()> {
    let addr = super::listen_addr(config)?;
    let reactor = Reactor::bind(addr)?;
    info!(addr = %reactor.local_addr(), "Reactor listening");

    for handle in reactor.start()? {
        let _ = handle.join();
    }
    Ok(())
}

/// Create a non-blocking TCP listener ready for mio registration.
fn create_listener(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;

    Ok(socket.into())
}
