//! Alert values surfaced to the UI.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::cmp::Ordering;

/// Ordering key used for alert de-duplication.
///
/// Push feeds carry no trustworthy server time, so their events are numbered
/// locally; poll feeds use the server-supplied timestamp. Keys of different
/// kinds are unordered.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum SequenceKey {
    Counter(u64),
    Timestamp(f64),
}

impl PartialOrd for SequenceKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (SequenceKey::Counter(a), SequenceKey::Counter(b)) => a.partial_cmp(b),
            (SequenceKey::Timestamp(a), SequenceKey::Timestamp(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

/// A fall alert accepted from the alert feed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertEvent {
    pub message: String,
    /// Detector confidence in `[0, 1]`, when the feed supplied one.
    pub confidence: Option<f64>,
    pub sequence_key: SequenceKey,
    pub received_at: DateTime<Utc>,
}

impl AlertEvent {
    pub fn fall(confidence: Option<f64>, sequence_key: SequenceKey) -> Self {
        let confidence = confidence.map(|c| c.clamp(0.0, 1.0));
        let message = match confidence {
            Some(c) => format!("Fall detected ({:.0}% confidence)", c * 100.0),
            None => "Fall detected".to_string(),
        };

        Self {
            message,
            confidence,
            sequence_key,
            received_at: Utc::now(),
        }
    }
}

/// Raw alert text published on the broker's alert topic.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawAlert {
    pub message: String,
    pub received_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_order_within_kind() {
        assert!(SequenceKey::Counter(2) > SequenceKey::Counter(1));
        assert!(SequenceKey::Timestamp(1.5) > SequenceKey::Timestamp(1.25));
        assert_eq!(
            SequenceKey::Counter(3).partial_cmp(&SequenceKey::Counter(3)),
            Some(Ordering::Equal)
        );
    }

    #[test]
    fn test_keys_unordered_across_kinds_and_nan() {
        assert_eq!(
            SequenceKey::Counter(1).partial_cmp(&SequenceKey::Timestamp(0.0)),
            None
        );
        assert_eq!(
            SequenceKey::Timestamp(f64::NAN).partial_cmp(&SequenceKey::Timestamp(1.0)),
            None
        );
    }

    #[test]
    fn test_fall_message_and_confidence_clamp() {
        let event = AlertEvent::fall(Some(0.874), SequenceKey::Counter(1));
        assert_eq!(event.message, "Fall detected (87% confidence)");

        let event = AlertEvent::fall(Some(1.7), SequenceKey::Counter(2));
        assert_eq!(event.confidence, Some(1.0));

        let event = AlertEvent::fall(None, SequenceKey::Counter(3));
        assert_eq!(event.message, "Fall detected");
    }
}
