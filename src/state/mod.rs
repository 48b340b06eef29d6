//! Session state consumed by the UI layer.
//!
//! Everything the broker and the alert feed produce ends up here as a
//! [`StateUpdate`], and the [`StateAggregator`] folds those updates into a
//! single [`Snapshot`] that readers can borrow or watch.

pub mod aggregator;
pub mod alert;
pub mod reading;

use serde::Serialize;
use strum::Display;

pub use aggregator::{Snapshot, StateAggregator, StateUpdate};
pub use alert::{AlertEvent, RawAlert, SequenceKey};
pub use reading::{MetricUpdate, Reading, ReadingUpdate};

/// Broker link state as seen by the UI.
///
/// Anything other than `Online` means device commands will be rejected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Display)]
pub enum ConnectivityState {
    #[default]
    Connecting,
    Online,
    Offline,
}
