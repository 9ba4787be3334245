//! Echo server implementations, one per I/O model.
//!
//! - `blocking`: thread-per-connection with a buffered line reader
//! - `reactor`: dual-selector readiness reactor (the core of this crate)
//! - `completion`: tokio tasks with a bounded read wait
//!
//! All three serve a single-shot echo: one request, one response,
//! then the server closes the connection.

pub mod blocking;
pub mod completion;
pub mod reactor;

use crate::config::{Config, Mode};
use std::io;
use std::net::SocketAddr;

/// Run the server in the configured mode. Does not return in normal operation.
pub fn run(config: Config) -> io::Result<()> {
    match config.mode {
        Mode::Blocking => blocking::run(&config),
        Mode::Reactor => reactor::run(&config),
        Mode::Completion => completion::run(&config),
    }
}

/// Parse the configured listen address.
pub(crate) fn listen_addr(config: &Config) -> io::Result<SocketAddr> {
    config
        .listen
        .parse()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
}
