//! Latest sensor reading and the partial updates applied to it.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Latest environment reading.
///
/// Starts zeroed with no `updated_at`; fields are overwritten independently
/// as metric messages arrive.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Reading {
    pub temperature: f64,
    pub humidity: f64,
    pub gas: i64,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Which field(s) a single broker message carries.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricUpdate {
    Temperature(f64),
    Humidity(f64),
    Gas(i64),
    /// Aggregate message carrying all three metrics.
    All {
        temperature: f64,
        humidity: f64,
        gas: i64,
    },
}

/// A metric update stamped with the time the router received it.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadingUpdate {
    pub metric: MetricUpdate,
    pub captured_at: DateTime<Utc>,
}

impl ReadingUpdate {
    pub fn new(metric: MetricUpdate, captured_at: DateTime<Utc>) -> Self {
        Self {
            metric,
            captured_at,
        }
    }
}

impl Reading {
    /// Apply one update. Only the fields named by the update change.
    pub fn apply(&mut self, update: &ReadingUpdate) {
        match update.metric {
            MetricUpdate::Temperature(value) => self.temperature = value,
            MetricUpdate::Humidity(value) => self.humidity = value,
            MetricUpdate::Gas(value) => self.gas = value,
            MetricUpdate::All {
                temperature,
                humidity,
                gas,
            } => {
                self.temperature = temperature;
                self.humidity = humidity;
                self.gas = gas;
            }
        }
        self.updated_at = Some(update.captured_at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    #[test]
    fn test_initial_reading_is_zeroed() {
        let reading = Reading::default();
        assert_eq!(reading.temperature, 0.0);
        assert_eq!(reading.humidity, 0.0);
        assert_eq!(reading.gas, 0);
        assert!(reading.updated_at.is_none());
    }

    #[test]
    fn test_single_metric_updates_do_not_interfere() {
        let updates = [
            MetricUpdate::Humidity(40.0),
            MetricUpdate::Temperature(21.5),
            MetricUpdate::Gas(300),
            MetricUpdate::Humidity(42.5),
            MetricUpdate::Temperature(22.0),
        ];

        // Every permutation of the same updates yields the same last-per-field result
        // as long as each field's own updates keep their relative order.
        let mut forward = Reading::default();
        for (i, metric) in updates.iter().enumerate() {
            forward.apply(&ReadingUpdate::new(metric.clone(), at(i as i64)));
        }

        let mut interleaved = Reading::default();
        for index in [2, 0, 1, 3, 4] {
            interleaved.apply(&ReadingUpdate::new(updates[index].clone(), at(index as i64)));
        }

        assert_eq!(forward.temperature, 22.0);
        assert_eq!(forward.humidity, 42.5);
        assert_eq!(forward.gas, 300);
        assert_eq!(interleaved.temperature, forward.temperature);
        assert_eq!(interleaved.humidity, forward.humidity);
        assert_eq!(interleaved.gas, forward.gas);
    }

    #[test]
    fn test_aggregate_overwrites_all_metrics() {
        let mut reading = Reading::default();
        reading.apply(&ReadingUpdate::new(MetricUpdate::Gas(999), at(1)));
        reading.apply(&ReadingUpdate::new(
            MetricUpdate::All {
                temperature: 19.0,
                humidity: 55.0,
                gas: 120,
            },
            at(2),
        ));

        assert_eq!(reading.temperature, 19.0);
        assert_eq!(reading.humidity, 55.0);
        assert_eq!(reading.gas, 120);
        assert_eq!(reading.updated_at, Some(at(2)));
    }
}
