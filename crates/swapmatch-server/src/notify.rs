//! Market-data notifications to the comms layer.
//!
//! The transport is a collaborator; the market only knows this trait.
//! Book and epoch notes fan out to market subscribers, while `nomatch`
//! goes to the order's owner alone.

use swapmatch_types::msgs::{
    BookOrderNote, CandleUpdateNote, EpochOrderNote, MatchProofNote, NoMatchNote, SpotsNote,
    SuspensionNote, UnbookOrderNote, UpdateRemainingNote,
};
use swapmatch_types::{AccountId, EpochResults};

/// Outbound market-data stream.
pub trait Feed: Send + Sync {
    fn book_order(&self, note: BookOrderNote);
    fn unbook_order(&self, note: UnbookOrderNote);
    fn epoch_order(&self, note: EpochOrderNote);
    fn update_remaining(&self, note: UpdateRemainingNote);
    fn nomatch(&self, user: &AccountId, note: NoMatchNote);
    fn match_proof(&self, note: MatchProofNote);
    fn epoch_report(&self, results: &EpochResults);
    fn spots(&self, note: SpotsNote);
    fn candle_update(&self, note: CandleUpdateNote);
    fn suspension(&self, note: SuspensionNote);
}

/// A feed that drops everything, for tests and detached markets.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullFeed;

impl Feed for NullFeed {
    fn book_order(&self, _note: BookOrderNote) {}
    fn unbook_order(&self, _note: UnbookOrderNote) {}
    fn epoch_order(&self, _note: EpochOrderNote) {}
    fn update_remaining(&self, _note: UpdateRemainingNote) {}
    fn nomatch(&self, _user: &AccountId, _note: NoMatchNote) {}
    fn match_proof(&self, _note: MatchProofNote) {}
    fn epoch_report(&self, _results: &EpochResults) {}
    fn spots(&self, _note: SpotsNote) {}
    fn candle_update(&self, _note: CandleUpdateNote) {}
    fn suspension(&self, _note: SuspensionNote) {}
}
