//! # swapmatch-matchcore
//!
//! The deterministic heart of the exchange: the per-market order book,
//! the epoch queue, the commit-reveal shuffle, and the matching
//! algorithm. Everything here is a pure function of its inputs, with no
//! clocks and no I/O, so the same epoch orders and revealed preimages
//! always produce the same match sequence and book state, and any
//! auditor can replay an epoch from the archived seed.

pub mod account_tracker;
pub mod book;
pub mod epoch;
pub mod matcher;
pub mod shuffle;

pub use account_tracker::{AccountTracker, AccountTracking};
pub use book::{Book, FillResult};
pub use epoch::Epoch;
pub use matcher::{match_epoch, validate_preimages, MatchResults, PreimageOutcome};
pub use shuffle::{commitment_checksum, shuffle_orders, shuffle_seed, HashPrng};
