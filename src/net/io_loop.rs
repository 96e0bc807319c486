//! Single-threaded, level-triggered I/O loop.
//!
//! Built directly on `mio::Poll`/`mio::Events`/`mio::Token` rather than
//! hidden behind `async`/`await`, per the hub's explicit event-loop design
//! (no suspension anywhere but the single `poll` wait point). Per-token
//! deadlines are tracked in a min-heap keyed by instant and consulted once
//! per wakeup to compute both the next `poll` timeout and the set of
//! connections that have timed out.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::io;
use std::time::{Duration, Instant};

pub use mio::Token;
use mio::{event::Source, Events, Interest, Poll};

/// A connection's registered readiness, reported once per wakeup.
#[derive(Debug, Clone, Copy)]
pub struct ReadyEvent {
    pub token: Token,
    pub readable: bool,
    pub writable: bool,
}

/// The result of a single `poll` wakeup: events ready on registered
/// sources, plus tokens whose deadline has elapsed.
#[derive(Debug, Default)]
pub struct PollOutcome {
    pub ready: Vec<ReadyEvent>,
    pub expired: Vec<Token>,
}

#[derive(Eq, PartialEq)]
struct Deadline {
    at: Instant,
    token: Token,
}

impl Ord for Deadline {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.at.cmp(&other.at)
    }
}
impl PartialOrd for Deadline {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

pub struct IoLoop {
    poll: Poll,
    events: Events,
    next_token: usize,
    deadlines: BinaryHeap<Reverse<Deadline>>,
    /// The current (most recent) deadline per token, so a stale heap
    /// entry left behind by an earlier `set_deadline`/`reset_deadline`
    /// call can be recognized and ignored instead of firing a spurious
    /// timeout after the deadline was actually pushed out.
    current: HashMap<Token, Instant>,
}

impl IoLoop {
    pub fn new(event_capacity: usize) -> io::Result<Self> {
        Ok(IoLoop {
            poll: Poll::new()?,
            events: Events::with_capacity(event_capacity),
            next_token: 1,
            deadlines: BinaryHeap::new(),
            current: HashMap::new(),
        })
    }

    /// Allocates a fresh token and registers `source` for `interest`.
    pub fn register(&mut self, source: &mut impl Source, interest: Interest) -> io::Result<Token> {
        let token = Token(self.next_token);
        self.next_token += 1;
        self.poll.registry().register(source, token, interest)?;
        Ok(token)
    }

    pub fn reregister(&mut self, source: &mut impl Source, token: Token, interest: Interest) -> io::Result<()> {
        self.poll.registry().reregister(source, token, interest)
    }

    /// Deregisters a source. Per the cancellation contract, this must be
    /// called before the source is dropped so its pending events can't
    /// fire against a reused token.
    pub fn deregister(&mut self, source: &mut impl Source) -> io::Result<()> {
        self.poll.registry().deregister(source)
    }

    /// Drops a token's tracked deadline, e.g. once its connection has been
    /// torn down, so a stale heap entry can never re-arm it.
    pub fn clear_deadline(&mut self, token: Token) {
        self.current.remove(&token);
    }

    /// Sets (or replaces) the deadline for `token`. Any prior heap entry
    /// for the same token becomes stale and is ignored when popped, since
    /// `current` only remembers the latest deadline per token.
    pub fn set_deadline(&mut self, token: Token, at: Instant) {
        self.current.insert(token, at);
        self.deadlines.push(Reverse(Deadline { at, token }));
    }

    /// Clears a connection's pending timeout by advancing its deadline to
    /// `now + timeout` (the common "reset on traffic" path).
    pub fn reset_deadline(&mut self, token: Token, timeout: Duration) {
        self.set_deadline(token, Instant::now() + timeout);
    }

    /// Runs one wait-and-dispatch cycle. `max_wait` bounds how long to
    /// block when no deadline is sooner; pass `None` for no bound (e.g. no
    /// connections registered yet).
    pub fn poll(&mut self, max_wait: Option<Duration>) -> io::Result<PollOutcome> {
        let now = Instant::now();
        let next_deadline = self.deadlines.peek().map(|Reverse(d)| d.at);
        let timeout = match (next_deadline, max_wait) {
            (Some(at), Some(bound)) => Some(at.saturating_duration_since(now).min(bound)),
            (Some(at), None) => Some(at.saturating_duration_since(now)),
            (None, bound) => bound,
        };

        self.poll.poll(&mut self.events, timeout)?;

        let mut outcome = PollOutcome::default();
        for event in self.events.iter() {
            outcome.ready.push(ReadyEvent {
                token: event.token(),
                readable: event.is_readable(),
                writable: event.is_writable(),
            });
        }

        let now = Instant::now();
        while let Some(Reverse(d)) = self.deadlines.peek() {
            if d.at > now {
                break;
            }
            let Reverse(expired) = self.deadlines.pop().expect("peek just matched");
            // A token may have been re-armed (or deregistered) after this
            // heap entry was pushed; only the entry matching the token's
            // current deadline is a real timeout.
            if self.current.get(&expired.token) == Some(&expired.at) {
                self.current.remove(&expired.token);
                outcome.expired.push(expired.token);
            }
        }

        Ok(outcome)
    }
}
