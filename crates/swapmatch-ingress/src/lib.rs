//! # swapmatch-ingress
//!
//! The order ingress plane: everything between an authenticated wire
//! request and an order resting in a market's epoch queue.
//!
//! ## Order flow
//!
//! ```text
//! comms → OrderRouter::handle_{limit,market,cancel}
//!       → authenticate → validate parameters → verify funding
//!         (UTXO: latency-queue retries; account: DexBalancer)
//!       → MarketTunnel::submit_order (stamps time, commits coin locks)
//! ```
//!
//! The [`CoinLocker`] is the process-wide registry preventing a funding
//! output from backing two live orders; the [`DexBalancer`] bounds a
//! user's account-asset exposure across every market.

pub mod balancer;
pub mod coin_locker;
pub mod latency_queue;
pub mod router;

pub use balancer::{AccountCommitments, BalanceSource, DexBalancer};
pub use coin_locker::{CoinLocker, LockHolder};
pub use latency_queue::{TickerQueue, TryDirective, Waiter};
pub use router::{AuthManager, FeeSource, MarketTunnel, OrderRecord, OrderRouter};
