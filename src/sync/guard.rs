use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

/// Result of a guarded request
#[derive(Debug, Clone, PartialEq)]
pub enum Guarded<T> {
    /// The request was still the latest for its stream when it finished
    Current(T),
    /// A newer request (or a cancel) superseded it; the result was dropped
    Stale,
}

impl<T> Guarded<T> {
    pub fn is_stale(&self) -> bool {
        matches!(self, Guarded::Stale)
    }

    pub fn into_current(self) -> Option<T> {
        match self {
            Guarded::Current(value) => Some(value),
            Guarded::Stale => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Guarded<U> {
        match self {
            Guarded::Current(value) => Guarded::Current(f(value)),
            Guarded::Stale => Guarded::Stale,
        }
    }
}

/// Proof that a request was issued on a stream, and at which point
#[derive(Debug, Clone)]
pub struct Ticket<K> {
    key: K,
    seq: u64,
    token: CancellationToken,
}

impl<K> Ticket<K> {
    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Cancelled as soon as the ticket is superseded
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

struct Latest {
    seq: u64,
    token: CancellationToken,
}

struct Streams<K> {
    next_seq: u64,
    latest: HashMap<K, Latest>,
}

/// Latest-wins gate for concurrent requests on the same logical stream.
///
/// Each stream key (a node's children, the roots page, search) keeps the
/// sequence number of its newest request. Starting a request cancels the
/// previous one on that key; a result is only handed back if its sequence
/// number is still the newest when it completes. Sequence numbers are
/// global, so a key that is cancelled and reopened never reuses one.
pub struct StreamGuard<K> {
    streams: Mutex<Streams<K>>,
}

impl<K: Eq + Hash + Clone + Debug> Default for StreamGuard<K> {
    fn default() -> Self {
        StreamGuard::new()
    }
}

impl<K: Eq + Hash + Clone + Debug> StreamGuard<K> {
    pub fn new() -> Self {
        StreamGuard {
            streams: Mutex::new(Streams {
                next_seq: 0,
                latest: HashMap::new(),
            }),
        }
    }

    /// Register a new request on `key`, superseding any in-flight one
    pub fn begin(&self, key: K) -> Ticket<K> {
        let mut streams = self.streams.lock();
        streams.next_seq += 1;
        let seq = streams.next_seq;
        let token = CancellationToken::new();
        let previous = streams.latest.insert(
            key.clone(),
            Latest {
                seq,
                token: token.clone(),
            },
        );
        if let Some(previous) = previous {
            previous.token.cancel();
        }
        Ticket { key, seq, token }
    }

    pub fn is_current(&self, ticket: &Ticket<K>) -> bool {
        self.streams
            .lock()
            .latest
            .get(&ticket.key)
            .is_some_and(|latest| latest.seq == ticket.seq)
    }

    /// Supersede whatever is in flight on `key` without starting anything new
    pub fn cancel(&self, key: &K) {
        if let Some(latest) = self.streams.lock().latest.remove(key) {
            latest.token.cancel();
        }
    }

    /// Number of streams with a live request registered
    pub fn open_streams(&self) -> usize {
        self.streams.lock().latest.len()
    }

    /// Run `work` as the newest request on `key`.
    ///
    /// The ticket is taken when this is called, not when the returned future
    /// is first polled, so request order is call order. `work` receives the
    /// ticket's token; it is also dropped outright once the ticket is
    /// superseded.
    pub fn run<T, F, Fut>(&self, key: K, work: F) -> impl Future<Output = Guarded<T>>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = T>,
    {
        let ticket = self.begin(key);
        let work = work(ticket.token.clone());
        async move {
            let outcome = tokio::select! {
                biased;
                _ = ticket.token.cancelled() => None,
                value = work => Some(value),
            };
            self.settle(ticket, outcome)
        }
    }

    fn settle<T>(&self, ticket: Ticket<K>, outcome: Option<T>) -> Guarded<T> {
        let mut streams = self.streams.lock();
        let current = streams
            .latest
            .get(&ticket.key)
            .is_some_and(|latest| latest.seq == ticket.seq);
        match outcome {
            Some(value) if current => {
                streams.latest.remove(&ticket.key);
                Guarded::Current(value)
            }
            _ => {
                tracing::trace!(stream = ?ticket.key, seq = ticket.seq, "discarded stale response");
                Guarded::Stale
            }
        }
    }
}
