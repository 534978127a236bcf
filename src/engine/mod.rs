//! Core engine: the bounded round history and the settlement loop that
//! turns each completed round into a prediction, a wager and a ledger update.

pub mod history;
pub mod settlement;

pub use history::{RoundHistory, HISTORY_CAPACITY};
pub use settlement::{DailyBaseline, EngineSnapshot, RoundSettlementEngine};
