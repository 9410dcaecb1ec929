//! # swapmatch-types
//!
//! Shared types, errors, and configuration for the **swapmatch** DEX server.
//!
//! This crate is the leaf dependency of the workspace; every other crate
//! depends on it. It defines:
//!
//! - **Identifiers**: [`AccountId`], [`OrderId`], [`MatchId`], [`CoinId`], [`AssetId`]
//! - **Order model**: [`Order`], [`LimitOrder`], [`MarketOrder`], [`CancelOrder`],
//!   [`Commitment`], [`Preimage`]
//! - **Match model**: [`Match`], [`MatchStatus`]
//! - **Epoch records**: [`EpochResults`], [`EpochStats`]
//! - **Asset surface**: [`Asset`], [`Network`], the [`Backend`] capability traits
//! - **Wire protocol**: [`Message`], route constants, signable payloads
//! - **Rate arithmetic**: [`calc`]
//! - **Errors**: [`DexError`] with `SM_ERR_` prefix codes
//! - **Configuration**: [`ServerConfig`], [`MarketConfig`]

pub mod asset;
pub mod calc;
pub mod config;
pub mod constants;
pub mod epoch;
pub mod error;
pub mod ids;
pub mod matches;
pub mod msgs;
pub mod order;

// Re-export all primary types at crate root for ergonomic imports:
//   use swapmatch_types::{Order, LimitOrder, Match, DexError, ...};

pub use asset::*;
pub use config::*;
pub use epoch::*;
pub use error::*;
pub use ids::*;
pub use matches::*;
pub use order::*;

// Wire messages are accessed via `swapmatch_types::msgs::...` and calc
// helpers via `swapmatch_types::calc::...` (not re-exported to keep the
// crate root free of route-name collisions).
