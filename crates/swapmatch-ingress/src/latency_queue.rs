//! The latency queue: a cooperative retry scheduler for funding-coin
//! lookups that may lag order submission (the client broadcast a funding
//! transaction the backend has not yet seen).
//!
//! A [`Waiter`] is a short-lived task record: a deadline, a try function,
//! and an expiry function. Each tick the queue invokes every waiter's try
//! function; `TryAgain` re-queues it, `DontTryAgain` completes it, and a
//! waiter still pending at its deadline gets its expiry function instead.
//! The queue never blocks the caller: `wait` runs one immediate attempt
//! and parks the waiter only if it wants another try.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::trace;

/// What a try function wants next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryDirective {
    TryAgain,
    DontTryAgain,
}

/// A scheduled retry task.
pub struct Waiter {
    /// When `expire_fn` fires if the task has not completed.
    pub expiration: DateTime<Utc>,
    /// Attempted each tick until it returns `DontTryAgain`.
    pub try_fn: Box<dyn FnMut() -> TryDirective + Send>,
    /// Runs exactly once if the deadline passes first.
    pub expire_fn: Box<dyn FnOnce() + Send>,
}

impl std::fmt::Debug for Waiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Waiter")
            .field("expiration", &self.expiration)
            .finish_non_exhaustive()
    }
}

/// A single-threaded cooperative scheduler driven by a timer.
pub struct TickerQueue {
    interval: Duration,
    waiters: Mutex<Vec<Waiter>>,
}

impl TickerQueue {
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            waiters: Mutex::new(Vec::new()),
        }
    }

    /// Submit a waiter. One attempt runs immediately; if it asks to try
    /// again the waiter parks until the next tick.
    pub fn wait(&self, mut waiter: Waiter) {
        match (waiter.try_fn)() {
            TryDirective::DontTryAgain => {}
            TryDirective::TryAgain => {
                self.waiters
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .push(waiter);
            }
        }
    }

    /// Run one scheduling pass at the given instant. Exposed so tests and
    /// the driving thread share the same code path.
    pub fn tick(&self, now: DateTime<Utc>) {
        let pending: Vec<Waiter> = {
            let mut waiters = self.waiters.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *waiters)
        };
        trace!(pending = pending.len(), "latency queue tick");
        let mut keep = Vec::with_capacity(pending.len());
        for mut waiter in pending {
            match (waiter.try_fn)() {
                TryDirective::DontTryAgain => {}
                TryDirective::TryAgain => {
                    if now >= waiter.expiration {
                        (waiter.expire_fn)();
                    } else {
                        keep.push(waiter);
                    }
                }
            }
        }
        self.waiters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .append(&mut keep);
    }

    /// Drive the queue until `stop` is set. Intended for a dedicated
    /// thread owned by the server.
    pub fn run(&self, stop: &Arc<AtomicBool>) {
        while !stop.load(Ordering::Relaxed) {
            std::thread::sleep(self.interval);
            self.tick(Utc::now());
        }
    }

    #[must_use]
    pub fn pending(&self) -> usize {
        self.waiters.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}
