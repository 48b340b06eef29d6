//! Watermark-based alert de-duplication.

use crate::state::{AlertEvent, SequenceKey};
use log::debug;
use std::cmp::Ordering;

/// Drops alerts whose sequence key does not advance the watermark.
#[derive(Debug, Default)]
pub struct Deduplicator {
    watermark: Option<SequenceKey>,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Highest key accepted so far.
    pub fn watermark(&self) -> Option<SequenceKey> {
        self.watermark
    }

    /// Accept `event` iff its key is strictly greater than the watermark.
    ///
    /// Unordered keys (mixed kinds, NaN timestamps) are rejected.
    pub fn accept(&mut self, event: &AlertEvent) -> bool {
        let key = event.sequence_key;
        let advances = match self.watermark {
            None => key.partial_cmp(&key).is_some(),
            Some(watermark) => key.partial_cmp(&watermark) == Some(Ordering::Greater),
        };

        if advances {
            self.watermark = Some(key);
        } else {
            debug!(
                "[Alert] Dropping {:?}, watermark is {:?}",
                key, self.watermark
            );
        }
        advances
    }
}
