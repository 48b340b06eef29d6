//! Topic router for the home broker.
//!
//! Turns raw `(topic, payload)` pairs into typed updates. Topics follow
//! `<area>/<scope>/<metric-or-device>[/<action>]`; with the default area the
//! known topics are:
//!
//! | topic                          | meaning                         |
//! |--------------------------------|---------------------------------|
//! | `maison/status`                | broker-side liveness (`ONLINE`) |
//! | `maison/capteurs/all`          | JSON with all three metrics     |
//! | `maison/capteurs/temperature`  | temperature                     |
//! | `maison/capteurs/humidite`     | humidity                        |
//! | `maison/capteurs/gaz`          | gas level                       |
//! | `maison/alerte/gaz`            | gas alert text                  |
//! | `maison/<room>/<device>/status`| device on/off report            |

use crate::config::MetricPolicy;
use crate::state::{ConnectivityState, MetricUpdate, RawAlert, ReadingUpdate, StateUpdate};
use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde_json::Value;

/// Payload the status topic carries when the house controller is up.
const ONLINE_PAYLOAD: &str = "ONLINE";

/// Result of routing one broker message.
#[derive(Debug, Clone, PartialEq)]
pub enum Routed {
    Reading(ReadingUpdate),
    Connectivity(ConnectivityState),
    Alert(RawAlert),
    DeviceStatus {
        room: String,
        device: String,
        on: bool,
    },
    Unrecognized,
}

impl Routed {
    /// Convert into the aggregator's update type, if there is anything to apply.
    pub fn into_update(self) -> Option<StateUpdate> {
        match self {
            Routed::Reading(update) => Some(StateUpdate::Reading(update)),
            Routed::Connectivity(state) => Some(StateUpdate::Connectivity(state)),
            Routed::Alert(alert) => Some(StateUpdate::GasAlert(alert)),
            Routed::DeviceStatus { room, device, on } => {
                Some(StateUpdate::DeviceStatus { room, device, on })
            }
            Routed::Unrecognized => None,
        }
    }
}

/// Maps broker topics to typed updates.
#[derive(Debug, Clone)]
pub struct TopicRouter {
    area: String,
    policy: MetricPolicy,
    status_topic: String,
    aggregate_topic: String,
    alert_topic: String,
}

impl TopicRouter {
    pub fn new(area: impl Into<String>, policy: MetricPolicy) -> Self {
        let area = area.into();
        Self {
            status_topic: format!("{}/status", area),
            aggregate_topic: format!("{}/capteurs/all", area),
            alert_topic: format!("{}/alerte/gaz", area),
            area,
            policy,
        }
    }

    /// Topics a session subscribes to by default.
    pub fn default_topics(&self) -> Vec<String> {
        vec![
            self.aggregate_topic.clone(),
            format!("{}/capteurs/temperature", self.area),
            format!("{}/capteurs/humidite", self.area),
            format!("{}/capteurs/gaz", self.area),
            self.alert_topic.clone(),
            self.status_topic.clone(),
            format!("{}/+/+/status", self.area),
        ]
    }

    /// Route a message received now.
    pub fn route(&self, topic: &str, payload: &str) -> Routed {
        self.route_at(topic, payload, Utc::now())
    }

    /// Route a message with an explicit capture time.
    pub fn route_at(&self, topic: &str, payload: &str, now: DateTime<Utc>) -> Routed {
        if topic == self.status_topic {
            let state = if payload == ONLINE_PAYLOAD {
                ConnectivityState::Online
            } else {
                ConnectivityState::Offline
            };
            return Routed::Connectivity(state);
        }

        if topic == self.aggregate_topic {
            match self.parse_aggregate(payload) {
                Some(metric) => return Routed::Reading(ReadingUpdate::new(metric, now)),
                None => debug!("[MQTT] Aggregate payload on {} not usable, falling through", topic),
            }
        }

        // Checked before the suffix rule: the alert topic also ends in `/gaz`.
        if topic == self.alert_topic {
            return Routed::Alert(RawAlert {
                message: payload.to_string(),
                received_at: now,
            });
        }

        if let Some(routed) = self.route_metric(topic, payload, now) {
            return routed;
        }

        if let Some(routed) = self.route_device_status(topic, payload) {
            return routed;
        }

        Routed::Unrecognized
    }

    fn route_metric(&self, topic: &str, payload: &str, now: DateTime<Utc>) -> Option<Routed> {
        let metric = if topic.ends_with("/temperature") {
            self.number(payload).map(MetricUpdate::Temperature)
        } else if topic.ends_with("/humidite") {
            self.number(payload).map(MetricUpdate::Humidity)
        } else if topic.ends_with("/gaz") {
            self.number(payload).and_then(gas_level).map(MetricUpdate::Gas)
        } else {
            return None;
        };

        match metric {
            Some(metric) => Some(Routed::Reading(ReadingUpdate::new(metric, now))),
            None => {
                warn!("[MQTT] Dropping unusable payload on {}: {:?}", topic, payload);
                Some(Routed::Unrecognized)
            }
        }
    }

    fn route_device_status(&self, topic: &str, payload: &str) -> Option<Routed> {
        let rest = topic.strip_prefix(self.area.as_str())?.strip_prefix('/')?;
        let mut parts = rest.split('/');
        let (room, device, action) = (parts.next()?, parts.next()?, parts.next()?);
        if action != "status" || parts.next().is_some() || room.is_empty() || device.is_empty() {
            return None;
        }

        let on = match payload.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "on" => true,
            "0" | "false" | "off" => false,
            other => {
                warn!("[MQTT] Unknown device status {:?} on {}", other, topic);
                return Some(Routed::Unrecognized);
            }
        };

        Some(Routed::DeviceStatus {
            room: room.to_string(),
            device: device.to_string(),
            on,
        })
    }

    fn parse_aggregate(&self, payload: &str) -> Option<MetricUpdate> {
        let json: Value = serde_json::from_str(payload).ok()?;
        let field = |name: &str| match json.get(name) {
            Some(Value::Number(n)) => n.as_f64().ok_or(()),
            Some(Value::String(s)) => parse_finite(s),
            _ => Err(()),
        };

        let temperature = self.apply_policy(field("temperature"))?;
        let humidity = self.apply_policy(field("humidity"))?;
        let gas = self.apply_policy(field("gas"))?;

        Some(MetricUpdate::All {
            temperature,
            humidity,
            gas: gas_level(gas)?,
        })
    }

    /// Parse a bare numeric payload under the configured policy.
    fn number(&self, payload: &str) -> Option<f64> {
        self.apply_policy(parse_finite(payload))
    }

    fn apply_policy(&self, parsed: Result<f64, ()>) -> Option<f64> {
        match (parsed, self.policy) {
            (Ok(value), _) => Some(value),
            (Err(()), MetricPolicy::Reject) => None,
            (Err(()), MetricPolicy::Coerce) => Some(f64::NAN),
        }
    }
}

/// Round a gas reading to the integer the state stores.
///
/// NaN (only produced under `MetricPolicy::Coerce`) becomes 0. Values outside
/// the `i64` range are dropped instead of saturating.
fn gas_level(value: f64) -> Option<i64> {
    if value.is_nan() {
        return Some(0);
    }

    let rounded = value.round();
    if rounded < i64::MIN as f64 || rounded >= i64::MAX as f64 {
        warn!("[MQTT] Gas level {} out of range", value);
        return None;
    }
    if rounded != value {
        debug!("[MQTT] Rounding gas level {} to {}", value, rounded);
    }
    Some(rounded as i64)
}

/// `str::parse` accepts `NaN` and `inf`; sensors never send those on purpose.
fn parse_finite(raw: &str) -> Result<f64, ()> {
    match raw.trim().parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(()),
    }
}
