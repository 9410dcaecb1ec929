//! # swapmatch-swap
//!
//! The swap coordinator: drives every active match through the atomic
//! swap protocol (maker init, taker init, maker redeem revealing the
//! secret, taker redeem) with a broadcast deadline on each required
//! action. A missed deadline revokes the match, records a failure
//! against the non-acting party, and leaves the waiting counterparty
//! free to refund once their contract's lock time expires.
//!
//! The coordinator is explicit and auditable: every transition lands in
//! the archive as a [`SwapTransition`] record, and restart recovery
//! rebuilds the live set from archived matches.

pub mod coordinator;

pub use coordinator::{
    SwapArchiver, SwapCoordinator, SwapNotifier, SwapSide, SwapTransition, TransitionAction,
    DEFAULT_BROADCAST_TIMEOUT,
};
