//! The server's surface over the durable archive.
//!
//! The archive itself (a relational store) lives outside this workspace;
//! the server writes through this trait and treats any write failure as
//! grounds to shut the affected market down. [`MemArchive`] is the
//! in-memory implementation used by tests and the bare binary.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use swapmatch_types::{DexError, EpochResults, Match, MatchId, Order, OrderId, Result};
use swapmatch_swap::{SwapArchiver, SwapTransition};

/// Append-only durable storage for orders, epochs, matches, and swap
/// transitions.
pub trait Archive: Send + Sync {
    /// # Errors
    /// Any error marks the archive unhealthy; the caller shuts the
    /// affected market down.
    fn store_order(&self, market: &str, order: &Order) -> Result<()>;
    fn store_match(&self, m: &Match) -> Result<()>;
    fn store_epoch_results(&self, results: &EpochResults) -> Result<()>;
    fn record_swap_transition(&self, rec: &SwapTransition) -> Result<()>;
    /// Live (non-terminal) matches, for swap recovery on restart.
    fn active_matches(&self) -> Result<Vec<Match>>;
    /// False once any write has failed.
    fn healthy(&self) -> bool;
}

/// Adapter handing the swap coordinator its transition sink.
pub struct ArchiveSwapSink(pub Arc<dyn Archive>);

impl SwapArchiver for ArchiveSwapSink {
    fn record_transition(&self, rec: &SwapTransition) -> Result<()> {
        self.0.record_swap_transition(rec)
    }
}

/// In-memory archive for tests and scaffolding.
#[derive(Default)]
pub struct MemArchive {
    orders: Mutex<Vec<(String, Order)>>,
    matches: Mutex<HashMap<MatchId, Match>>,
    epochs: Mutex<Vec<EpochResults>>,
    transitions: Mutex<Vec<SwapTransition>>,
    fail_writes: AtomicBool,
    unhealthy: AtomicBool,
}

impl MemArchive {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail, for failure-path tests.
    pub fn break_writes(&self) {
        self.fail_writes.store(true, Ordering::SeqCst);
    }

    fn write_guard(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            self.unhealthy.store(true, Ordering::SeqCst);
            return Err(DexError::ArchiveFailure("storage failure".into()));
        }
        Ok(())
    }

    #[must_use]
    pub fn order_count(&self) -> usize {
        self.orders.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    #[must_use]
    pub fn stored_order_ids(&self) -> Vec<OrderId> {
        self.orders
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, o)| o.id())
            .collect()
    }

    #[must_use]
    pub fn epoch_results(&self) -> Vec<EpochResults> {
        self.epochs.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    #[must_use]
    pub fn transitions(&self) -> Vec<SwapTransition> {
        self.transitions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    #[must_use]
    pub fn match_record(&self, id: &MatchId) -> Option<Match> {
        self.matches
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
    }
}

impl Archive for MemArchive {
    fn store_order(&self, market: &str, order: &Order) -> Result<()> {
        self.write_guard()?;
        self.orders
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((market.to_string(), order.clone()));
        Ok(())
    }

    fn store_match(&self, m: &Match) -> Result<()> {
        self.write_guard()?;
        self.matches
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(m.id, m.clone());
        Ok(())
    }

    fn store_epoch_results(&self, results: &EpochResults) -> Result<()> {
        self.write_guard()?;
        self.epochs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(results.clone());
        Ok(())
    }

    fn record_swap_transition(&self, rec: &SwapTransition) -> Result<()> {
        self.write_guard()?;
        // Keep the match record's status current alongside the log.
        let mut matches = self.matches.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(m) = matches.get_mut(&rec.match_id) {
            m.status = rec.new_status;
            m.updated_at = rec.time;
        }
        drop(matches);
        self.transitions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(rec.clone());
        Ok(())
    }

    fn active_matches(&self) -> Result<Vec<Match>> {
        Ok(self
            .matches
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|m| !m.status.is_terminal())
            .cloned()
            .collect())
    }

    fn healthy(&self) -> bool {
        !self.unhealthy.load(Ordering::SeqCst)
    }
}
