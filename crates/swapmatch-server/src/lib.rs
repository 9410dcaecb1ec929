//! # swapmatch-server
//!
//! The per-market pipeline and the glue that assembles a running server:
//! each [`Market`] owns a book and an epoch queue, stamps incoming
//! orders, runs the preimage round at epoch close, applies match results,
//! and hands trade matches to the swap coordinator. The [`Archive`]
//! trait is the server's narrow view of the durable store, and [`Feed`]
//! carries market-data notifications to the comms layer.

pub mod archive;
pub mod market;
pub mod notify;
pub mod server;

pub use archive::{Archive, ArchiveSwapSink, MemArchive};
pub use market::Market;
pub use notify::{Feed, NullFeed};
pub use server::Server;
