use crate::error::{HubError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use strum::{Display, EnumString};

/// Parse `.env` style content into key/value pairs.
///
/// Values may contain spaces without quoting; a single pair of surrounding
/// quotes is stripped.
pub fn parse_dotenv(content: &str) -> Vec<(String, String)> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let (key, value) = line.split_once('=')?;
            let mut value = value.trim();
            if value.len() >= 2
                && ((value.starts_with('"') && value.ends_with('"'))
                    || (value.starts_with('\'') && value.ends_with('\'')))
            {
                value = &value[1..value.len() - 1];
            }
            Some((key.trim().to_string(), value.to_string()))
        })
        .collect()
}

/// Load environment variables from a `.env` file in the working directory.
///
/// Variables already present in the environment win.
pub fn load_dotenv() {
    let env_path = Path::new(".env");
    let Ok(content) = fs::read_to_string(env_path) else {
        return;
    };

    for (key, value) in parse_dotenv(&content) {
        if std::env::var(&key).is_err() {
            // SAFETY: called from main before the async runtime spawns any threads
            unsafe { std::env::set_var(key, value) };
        }
    }
}

/// How non-numeric metric payloads are treated by the topic router.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, EnumString, Display)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum MetricPolicy {
    /// Drop the message and keep the previous value.
    #[default]
    Reject,
    /// Store NaN for unparseable values; gas saturates to 0.
    Coerce,
}

/// Which fall-alert transport a session uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, EnumString, Display)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum AlertMode {
    /// Probe the push socket at session start, fall back to polling.
    #[default]
    Auto,
    Push,
    Poll,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub mqtt: MqttConfig,
    pub alert: AlertConfig,
    pub detection: DetectionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    pub broker_host: String,
    pub broker_port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Constant delay between reconnect attempts.
    pub reconnect_period: Duration,
    pub keep_alive: Duration,
    /// First topic segment, e.g. `maison` in `maison/capteurs/all`.
    pub topic_area: String,
    pub metric_policy: MetricPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertConfig {
    pub mode: AlertMode,
    pub push_url: String,
    pub status_url: String,
    pub poll_interval: Duration,
    pub probe_timeout: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    pub url: String,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker_host: "mqtt.eclipseprojects.io".to_string(),
            broker_port: 1883,
            client_id: format!("maison-link-{}", uuid::Uuid::new_v4().simple()),
            username: None,
            password: None,
            reconnect_period: Duration::from_millis(4000),
            keep_alive: Duration::from_secs(30),
            topic_area: "maison".to_string(),
            metric_policy: MetricPolicy::default(),
        }
    }
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            mode: AlertMode::default(),
            push_url: "ws://localhost:8000/ws/fall".to_string(),
            status_url: "http://localhost:8000/latest-fall".to_string(),
            poll_interval: Duration::from_secs(1),
            probe_timeout: Duration::from_secs(3),
        }
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8000/detect".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mqtt: MqttConfig::default(),
            alert: AlertConfig::default(),
            detection: DetectionConfig::default(),
        }
    }
}

impl MqttConfig {
    /// Apply an `mqtt://host[:port]` (or `tcp://`) broker URL.
    pub fn set_url(&mut self, url: &str) -> Result<()> {
        let (host, port) = parse_broker_url(url)?;
        self.broker_host = host;
        self.broker_port = port;
        Ok(())
    }
}

fn parse_broker_url(url: &str) -> Result<(String, u16)> {
    let rest = url
        .strip_prefix("mqtt://")
        .or_else(|| url.strip_prefix("tcp://"))
        .ok_or_else(|| HubError::InvalidBrokerUrl(format!("unsupported scheme in {}", url)))?;
    let authority = rest.split('/').next().unwrap_or_default();

    let (host, port) = match authority.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse()
                .map_err(|_| HubError::InvalidBrokerUrl(format!("bad port in {}", url)))?;
            (host, port)
        }
        None => (authority, 1883),
    };

    if host.is_empty() {
        return Err(HubError::InvalidBrokerUrl(format!("missing host in {}", url)));
    }
    Ok((host.to_string(), port))
}

fn parse_value<T: std::str::FromStr>(key: &str, value: String) -> Result<T> {
    value.parse().map_err(|_| HubError::InvalidConfig {
        key: key.to_string(),
        value,
    })
}

/// Parse a period in milliseconds. Zero is rejected: every period feeds a timer.
fn parse_duration_ms(key: &str, value: String) -> Result<Duration> {
    match parse_value::<u64>(key, value.clone())? {
        0 => Err(HubError::InvalidConfig {
            key: key.to_string(),
            value,
        }),
        ms => Ok(Duration::from_millis(ms)),
    }
}

impl Config {
    /// Build a config from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from defaults overlaid with whatever `lookup` returns.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        // MQTT configuration
        if let Some(url) = lookup("MQTT_URL") {
            config.mqtt.set_url(&url)?;
        }
        if let Some(host) = lookup("MQTT_BROKER_HOST") {
            config.mqtt.broker_host = host;
        }
        if let Some(port) = lookup("MQTT_BROKER_PORT") {
            config.mqtt.broker_port = parse_value("MQTT_BROKER_PORT", port)?;
        }
        if let Some(client_id) = lookup("MQTT_CLIENT_ID") {
            config.mqtt.client_id = client_id;
        }
        if let Some(username) = lookup("MQTT_USERNAME") {
            config.mqtt.username = Some(username);
        }
        if let Some(password) = lookup("MQTT_PASSWORD") {
            config.mqtt.password = Some(password);
        }
        if let Some(ms) = lookup("MQTT_RECONNECT_PERIOD_MS") {
            config.mqtt.reconnect_period = parse_duration_ms("MQTT_RECONNECT_PERIOD_MS", ms)?;
        }
        if let Some(area) = lookup("MQTT_TOPIC_AREA") {
            config.mqtt.topic_area = area;
        }
        if let Some(policy) = lookup("METRIC_POLICY") {
            config.mqtt.metric_policy = parse_value("METRIC_POLICY", policy)?;
        }

        // Alert feed configuration
        if let Some(mode) = lookup("ALERT_MODE") {
            config.alert.mode = parse_value("ALERT_MODE", mode)?;
        }
        if let Some(url) = lookup("ALERT_PUSH_URL") {
            config.alert.push_url = url;
        }
        if let Some(url) = lookup("ALERT_STATUS_URL") {
            config.alert.status_url = url;
        }
        if let Some(ms) = lookup("ALERT_POLL_INTERVAL_MS") {
            config.alert.poll_interval = parse_duration_ms("ALERT_POLL_INTERVAL_MS", ms)?;
        }
        if let Some(ms) = lookup("ALERT_PROBE_TIMEOUT_MS") {
            config.alert.probe_timeout = parse_duration_ms("ALERT_PROBE_TIMEOUT_MS", ms)?;
        }

        if let Some(url) = lookup("DETECT_URL") {
            config.detection.url = url;
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_endpoints() {
        let config = Config::default();
        assert_eq!(config.mqtt.broker_host, "mqtt.eclipseprojects.io");
        assert_eq!(config.mqtt.broker_port, 1883);
        assert_eq!(config.mqtt.reconnect_period, Duration::from_secs(4));
        assert_eq!(config.mqtt.topic_area, "maison");
        assert_eq!(config.alert.poll_interval, Duration::from_secs(1));
        assert_eq!(config.alert.mode, AlertMode::Auto);
        assert!(config.mqtt.client_id.starts_with("maison-link-"));
    }

    #[test]
    fn test_client_ids_are_unique() {
        assert_ne!(Config::default().mqtt.client_id, Config::default().mqtt.client_id);
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = Config::from_lookup(lookup_from(&[
            ("MQTT_URL", "mqtt://broker.local:1884"),
            ("MQTT_RECONNECT_PERIOD_MS", "250"),
            ("METRIC_POLICY", "Coerce"),
            ("ALERT_MODE", "poll"),
            ("ALERT_STATUS_URL", "http://pi:8000/latest-fall"),
        ]))
        .unwrap();

        assert_eq!(config.mqtt.broker_host, "broker.local");
        assert_eq!(config.mqtt.broker_port, 1884);
        assert_eq!(config.mqtt.reconnect_period, Duration::from_millis(250));
        assert_eq!(config.mqtt.metric_policy, MetricPolicy::Coerce);
        assert_eq!(config.alert.mode, AlertMode::Poll);
        assert_eq!(config.alert.status_url, "http://pi:8000/latest-fall");
    }

    #[test]
    fn test_from_lookup_rejects_bad_values() {
        let result = Config::from_lookup(lookup_from(&[("ALERT_MODE", "carrier-pigeon")]));
        assert!(matches!(result, Err(HubError::InvalidConfig { .. })));

        let result = Config::from_lookup(lookup_from(&[("MQTT_BROKER_PORT", "abc")]));
        assert!(matches!(result, Err(HubError::InvalidConfig { .. })));
    }

    #[test]
    fn test_zero_periods_rejected() {
        for key in [
            "MQTT_RECONNECT_PERIOD_MS",
            "ALERT_POLL_INTERVAL_MS",
            "ALERT_PROBE_TIMEOUT_MS",
        ] {
            let result = Config::from_lookup(lookup_from(&[(key, "0"), ("ALERT_MODE", "poll")]));
            match result {
                Err(HubError::InvalidConfig { key: rejected, value }) => {
                    assert_eq!(rejected, key);
                    assert_eq!(value, "0");
                }
                other => panic!("{} = 0 accepted: {:?}", key, other.map(|_| ())),
            }
        }

        let config = Config::from_lookup(lookup_from(&[("ALERT_POLL_INTERVAL_MS", "1")])).unwrap();
        assert_eq!(config.alert.poll_interval, Duration::from_millis(1));
    }

    #[test]
    fn test_broker_url_parsing() {
        assert_eq!(
            parse_broker_url("mqtt://10.0.0.2").unwrap(),
            ("10.0.0.2".to_string(), 1883)
        );
        assert_eq!(
            parse_broker_url("tcp://host:8883/").unwrap(),
            ("host".to_string(), 8883)
        );
        assert!(parse_broker_url("wss://host/mqtt").is_err());
        assert!(parse_broker_url("mqtt://:1883").is_err());
    }

    #[test]
    fn test_parse_dotenv() {
        let pairs = parse_dotenv(
            "# comment\n\nMQTT_USERNAME = home user\nMQTT_PASSWORD=\"s3cret\"\nnot a pair\n",
        );
        assert_eq!(
            pairs,
            vec![
                ("MQTT_USERNAME".to_string(), "home user".to_string()),
                ("MQTT_PASSWORD".to_string(), "s3cret".to_string()),
            ]
        );
    }
}
