//! Configuration file management for cam-tracker.
//!
//! Reads/writes `~/.cam-tracker/config.yaml` with broker, dashboard, map,
//! store retention and decoder settings.

use std::path::{Path, PathBuf};

use crate::store::Retention;
use crate::types::CamError;
use crate::view::{MapDefaults, DEFAULT_CENTER, DEFAULT_ZOOM};

/// Full configuration structure.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub broker: BrokerConfig,
    pub dashboard: DashboardConfig,
    pub map: MapConfig,
    pub store: StoreConfig,
    pub decoder: DecoderConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub topic: String,
    pub client_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DashboardConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MapConfig {
    pub center_lat: f64,
    pub center_lon: f64,
    pub zoom: u8,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreConfig {
    pub max_points: Option<usize>,
    pub max_age_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecoderConfig {
    pub timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            broker: BrokerConfig {
                host: "localhost".into(),
                port: 1883,
                topic: "cam/packets".into(),
                client_id: "cam-tracker".into(),
            },
            dashboard: DashboardConfig {
                host: "127.0.0.1".into(),
                port: 5000,
            },
            map: MapConfig {
                center_lat: DEFAULT_CENTER[0],
                center_lon: DEFAULT_CENTER[1],
                zoom: DEFAULT_ZOOM,
            },
            store: StoreConfig::default(),
            decoder: DecoderConfig { timeout_ms: 200 },
        }
    }
}

impl MapConfig {
    pub fn defaults(&self) -> MapDefaults {
        MapDefaults {
            center: [self.center_lat, self.center_lon],
            zoom: self.zoom,
        }
    }
}

impl StoreConfig {
    /// `max_points` wins when both limits are set.
    pub fn retention(&self) -> Retention {
        match (self.max_points, self.max_age_secs) {
            (Some(n), _) => Retention::MaxPoints(n),
            (None, Some(secs)) => Retention::MaxAge(secs),
            (None, None) => Retention::Unbounded,
        }
    }
}

/// Get the config directory path (`~/.cam-tracker/`).
pub fn config_dir() -> PathBuf {
    dirs_home().join(".cam-tracker")
}

/// Get the config file path.
pub fn config_file() -> PathBuf {
    config_dir().join("config.yaml")
}

fn dirs_home() -> PathBuf {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

/// Load config from `~/.cam-tracker/config.yaml`.
///
/// Returns default config if file doesn't exist.
pub fn load_config() -> Config {
    load_config_from(&config_file())
}

/// Load config from an explicit path, falling back to defaults.
pub fn load_config_from(path: &Path) -> Config {
    match std::fs::read_to_string(path) {
        Ok(text) => parse_config(&text),
        Err(_) => Config::default(),
    }
}

/// Save config to `~/.cam-tracker/config.yaml`.
pub fn save_config(config: &Config) -> Result<PathBuf, CamError> {
    let path = config_file();
    save_config_to(config, &path)?;
    Ok(path)
}

pub fn save_config_to(config: &Config, path: &Path) -> Result<(), CamError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| CamError::Config(e.to_string()))?;
    }
    std::fs::write(path, serialize_config(config)).map_err(|e| CamError::Config(e.to_string()))
}

/// Parse simple YAML-like config text. Unknown keys and bad values are ignored.
fn parse_config(text: &str) -> Config {
    let mut config = Config::default();
    let mut section: Option<&str> = None;

    for line in text.lines() {
        let stripped = line.trim();
        if stripped.is_empty() || stripped.starts_with('#') {
            continue;
        }
        let Some((key, val)) = stripped.split_once(':') else {
            continue;
        };
        let key = key.trim();
        let val = val.trim();

        let is_indented = line.starts_with("  ") || line.starts_with('\t');
        if !is_indented {
            section = val.is_empty().then_some(key);
            continue;
        }

        match (section, key) {
            (Some("broker"), "host") => set_string(&mut config.broker.host, val),
            (Some("broker"), "port") => set_parsed(&mut config.broker.port, val),
            (Some("broker"), "topic") => set_string(&mut config.broker.topic, val),
            (Some("broker"), "client_id") => set_string(&mut config.broker.client_id, val),
            (Some("dashboard"), "host") => set_string(&mut config.dashboard.host, val),
            (Some("dashboard"), "port") => set_parsed(&mut config.dashboard.port, val),
            (Some("map"), "center_lat") => set_parsed(&mut config.map.center_lat, val),
            (Some("map"), "center_lon") => set_parsed(&mut config.map.center_lon, val),
            (Some("map"), "zoom") => set_parsed(&mut config.map.zoom, val),
            (Some("store"), "max_points") => config.store.max_points = parse_optional(val),
            (Some("store"), "max_age_secs") => config.store.max_age_secs = parse_optional(val),
            (Some("decoder"), "timeout_ms") => set_parsed(&mut config.decoder.timeout_ms, val),
            _ => {}
        }
    }

    config
}

fn is_null(val: &str) -> bool {
    val == "null" || val == "~" || val.is_empty()
}

fn parse_string_value(val: &str) -> Option<String> {
    if is_null(val) {
        return None;
    }
    // Strip quotes
    if val.len() >= 2
        && ((val.starts_with('"') && val.ends_with('"'))
            || (val.starts_with('\'') && val.ends_with('\'')))
    {
        return Some(val[1..val.len() - 1].to_string());
    }
    Some(val.to_string())
}

fn parse_optional<T: std::str::FromStr>(val: &str) -> Option<T> {
    if is_null(val) {
        return None;
    }
    val.parse().ok()
}

fn set_string(slot: &mut String, val: &str) {
    if let Some(v) = parse_string_value(val) {
        *slot = v;
    }
}

fn set_parsed<T: std::str::FromStr>(slot: &mut T, val: &str) {
    if let Some(v) = parse_optional(val) {
        *slot = v;
    }
}

fn optional_line<T: std::fmt::Display>(key: &str, val: Option<T>) -> String {
    match val {
        Some(v) => format!("  {key}: {v}"),
        None => format!("  {key}: null"),
    }
}

/// Serialize config to YAML-like text.
fn serialize_config(config: &Config) -> String {
    let lines = [
        "# cam-tracker configuration".to_string(),
        String::new(),
        "broker:".into(),
        format!("  host: \"{}\"", config.broker.host),
        format!("  port: {}", config.broker.port),
        format!("  topic: \"{}\"", config.broker.topic),
        format!("  client_id: \"{}\"", config.broker.client_id),
        String::new(),
        "dashboard:".into(),
        format!("  host: \"{}\"", config.dashboard.host),
        format!("  port: {}", config.dashboard.port),
        String::new(),
        "map:".into(),
        format!("  center_lat: {}", config.map.center_lat),
        format!("  center_lon: {}", config.map.center_lon),
        format!("  zoom: {}", config.map.zoom),
        String::new(),
        "store:".into(),
        optional_line("max_points", config.store.max_points),
        optional_line("max_age_secs", config.store.max_age_secs),
        String::new(),
        "decoder:".into(),
        format!("  timeout_ms: {}", config.decoder.timeout_ms),
    ];

    lines.join("\n") + "\n"
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.broker.host, "localhost");
        assert_eq!(config.broker.port, 1883);
        assert_eq!(config.broker.topic, "cam/packets");
        assert_eq!(config.dashboard.port, 5000);
        assert_eq!(config.map.defaults(), MapDefaults::default());
        assert_eq!(config.store.retention(), Retention::Unbounded);
        assert_eq!(config.decoder.timeout_ms, 200);
    }

    #[test]
    fn test_parse_config() {
        let text = r#"
broker:
  host: "mqtt.lab"
  port: 8883
  topic: 'its/cam'
  client_id: tracker-1

dashboard:
  host: "0.0.0.0"
  port: 9090

map:
  center_lat: 48.85
  center_lon: 2.35
  zoom: 15

store:
  max_points: 100
  max_age_secs: null

decoder:
  timeout_ms: 50
"#;
        let config = parse_config(text);
        assert_eq!(config.broker.host, "mqtt.lab");
        assert_eq!(config.broker.port, 8883);
        assert_eq!(config.broker.topic, "its/cam");
        assert_eq!(config.broker.client_id, "tracker-1");
        assert_eq!(config.dashboard.host, "0.0.0.0");
        assert_eq!(config.dashboard.port, 9090);
        assert_eq!(config.map.defaults().center, [48.85, 2.35]);
        assert_eq!(config.map.zoom, 15);
        assert_eq!(config.store.retention(), Retention::MaxPoints(100));
        assert_eq!(config.decoder.timeout_ms, 50);
    }

    #[test]
    fn test_bad_values_keep_defaults() {
        let text = "broker:\n  port: nope\nmap:\n  zoom: 900\nunknown:\n  key: 1\n";
        let config = parse_config(text);
        assert_eq!(config.broker.port, 1883);
        assert_eq!(config.map.zoom, DEFAULT_ZOOM);
    }

    #[test]
    fn test_retention_from_store_config() {
        let age = StoreConfig {
            max_points: None,
            max_age_secs: Some(60),
        };
        assert_eq!(age.retention(), Retention::MaxAge(60));

        let both = StoreConfig {
            max_points: Some(5),
            max_age_secs: Some(60),
        };
        assert_eq!(both.retention(), Retention::MaxPoints(5));
    }

    #[test]
    fn test_roundtrip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.yaml");

        let mut config = Config::default();
        config.broker.host = "10.0.0.2".into();
        config.store.max_age_secs = Some(300);
        config.map.center_lat = -33.5;

        save_config_to(&config, &path).unwrap();
        assert_eq!(load_config_from(&path), config);
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_from(&dir.path().join("absent.yaml"));
        assert_eq!(config, Config::default());
    }
}
