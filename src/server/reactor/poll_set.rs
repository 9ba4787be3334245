//! Poll-set and registration abstraction for the reactor.
//!
//! A `PollSet` wraps one `mio::Poll` plus the set of registrations made
//! against it. Two instances exist at runtime: the acceptor loop's
//! (holding the listener) and the I/O loop's (holding accepted
//! connections). Each is polled by exactly one thread.
//!
//! Cross-thread handoff happens only through a `Registrar`: the acceptor
//! pushes accepted streams into a mutex-guarded pending queue, and the
//! owning loop drains that queue at the top of each poll call. The poll
//! itself is therefore never shared between threads, which also makes
//! the spurious-wakeup rebuild safe: admission and reconstruction run on
//! the same thread, so a registration can never race against a poll
//! instance that is being thrown away.
//!
//! ## Spurious-wakeup guard
//!
//! epoll-backed selectors are known to occasionally report readiness
//! with nothing actionable behind it, which turns a short-timeout loop
//! into a core-saturating spin. `complete_cycle` counts consecutive
//! cycles that reported events but yielded zero actionable work; once
//! `SPURIOUS_WAKEUP_LIMIT` is hit, the poll is rebuilt from scratch and
//! every live registration is re-registered under its existing token.

use mio::event::Source;
use mio::{Events, Interest, Poll, Token};
use slab::Slab;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

/// Consecutive ready-but-idle poll cycles tolerated before the poll is
/// rebuilt. At a 1ms poll timeout a real storm trips this in ~8ms.
pub(crate) const SPURIOUS_WAKEUP_LIMIT: u32 = 8;

/// One ready registration reported by a poll cycle.
///
/// Transient: the vector returned by [`PollSet::poll`] is rebuilt every
/// cycle, so an event never survives into the next iteration.
#[derive(Debug, Clone, Copy)]
pub struct ReadyEvent {
    pub token: Token,
    pub readable: bool,
}

/// Cross-thread handle for registering sources on a `PollSet`.
///
/// Pushes are individually atomic with respect to a concurrent poll on
/// the owning thread; the source is admitted (slab slot + READABLE
/// registration) at the top of that thread's next poll call.
pub struct Registrar<S> {
    pending: Arc<Mutex<Vec<S>>>,
}

impl<S> Clone for Registrar<S> {
    fn clone(&self) -> Self {
        Self {
            pending: Arc::clone(&self.pending),
        }
    }
}

impl<S> Registrar<S> {
    /// Queue a source for registration on the owning loop's next cycle.
    pub fn register(&self, source: S) {
        self.pending.lock().unwrap().push(source);
    }
}

/// A readiness poll set: one `mio::Poll` and the registrations it owns.
pub struct PollSet<S> {
    poll: Poll,
    events: Events,
    sources: Slab<S>,
    pending: Arc<Mutex<Vec<S>>>,
    /// Maximum number of live registrations; admissions beyond it are dropped.
    capacity: usize,
    /// Consecutive cycles that reported readiness but yielded no work.
    idle_wakeups: u32,
}

impl<S: Source> PollSet<S> {
    /// Create a poll set with room for `capacity` registrations.
    pub fn new(capacity: usize) -> io::Result<Self> {
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(capacity.min(1024)),
            sources: Slab::with_capacity(capacity),
            pending: Arc::new(Mutex::new(Vec::new())),
            capacity,
            idle_wakeups: 0,
        })
    }

    /// Handle for registering sources from any thread.
    pub fn registrar(&self) -> Registrar<S> {
        Registrar {
            pending: Arc::clone(&self.pending),
        }
    }

    /// Admit pending registrations, then poll with a bounded timeout.
    ///
    /// Returns this cycle's ready set in the order the poll reported it.
    pub fn poll(&mut self, timeout: Duration) -> io::Result<Vec<ReadyEvent>> {
        self.admit_pending();

        match self.poll.poll(&mut self.events, Some(timeout)) {
            Ok(()) => {}
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => return Ok(Vec::new()),
            Err(e) => return Err(e),
        }

        Ok(self
            .events
            .iter()
            .map(|e| ReadyEvent {
                token: e.token(),
                readable: e.is_readable(),
            })
            .collect())
    }

    /// Drain the pending queue into the slab and register each source.
    fn admit_pending(&mut self) {
        let incoming = {
            let mut queue = self.pending.lock().unwrap();
            if queue.is_empty() {
                return;
            }
            std::mem::take(&mut *queue)
        };

        for mut source in incoming {
            if self.sources.len() >= self.capacity {
                warn!("Registration limit reached, dropping connection");
                continue;
            }

            let entry = self.sources.vacant_entry();
            let token = Token(entry.key());
            match self.poll.registry().register(&mut source, token, Interest::READABLE) {
                Ok(()) => {
                    entry.insert(source);
                }
                Err(e) => {
                    // Dropping the source closes it; the peer sees a reset.
                    warn!(error = %e, "Failed to register source");
                }
            }
        }
    }

    /// Access a registered source.
    pub fn source_mut(&mut self, token: Token) -> Option<&mut S> {
        self.sources.get_mut(token.0)
    }

    /// Remove a registration, deregistering it from the poll.
    ///
    /// Dropping the returned source closes it.
    pub fn deregister(&mut self, token: Token) -> Option<S> {
        let mut source = self.sources.try_remove(token.0)?;
        if let Err(e) = self.poll.registry().deregister(&mut source) {
            debug!(token = token.0, error = %e, "Deregister failed");
        }
        Some(source)
    }

    /// Number of live registrations.
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// Account for one finished poll cycle and apply the spurious-wakeup
    /// guard. `reported` is the size of the ready set the poll returned;
    /// `actionable` is how many of those events produced real work.
    ///
    /// Returns `true` if the poll was rebuilt this cycle.
    pub fn complete_cycle(&mut self, reported: usize, actionable: usize) -> io::Result<bool> {
        if reported > 0 && actionable == 0 {
            self.idle_wakeups += 1;
            if self.idle_wakeups >= SPURIOUS_WAKEUP_LIMIT {
                warn!(
                    idle_cycles = self.idle_wakeups,
                    live = self.sources.len(),
                    "Spurious wakeup storm detected, rebuilding poll set"
                );
                self.rebuild()?;
                self.idle_wakeups = 0;
                return Ok(true);
            }
        } else {
            self.idle_wakeups = 0;
        }
        Ok(false)
    }

    /// Replace the poll with a fresh one, re-registering every live
    /// source under its existing token. The defective poll instance is
    /// dropped at the end, closing its selector fd.
    ///
    /// Sources must be detached from the old poll before they can be
    /// attached to the new one, so each is deregistered first; a failed
    /// deregister on the defective poll is logged and ignored.
    fn rebuild(&mut self) -> io::Result<()> {
        let fresh = Poll::new()?;
        for (key, source) in self.sources.iter_mut() {
            if let Err(e) = self.poll.registry().deregister(source) {
                debug!(token = key, error = %e, "Deregister from defective poll failed");
            }
            fresh
                .registry()
                .register(source, Token(key), Interest::READABLE)?;
        }
        self.poll = fresh;
        Ok(())
    }
}
