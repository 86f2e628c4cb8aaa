use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::detect::{ClassId, DetectParams, BACKEND_NAMES, PERSON_CLASS_ID};
use crate::track::TrackerConfig;
use crate::zone::Anchor;

pub const CONFIG_PATH_ENV: &str = "OCCUPANCY_CONFIG";

const DEFAULT_SOURCE_URL: &str = "stub://zone_camera";
const DEFAULT_TARGET_FPS: u32 = 15;
const DEFAULT_WIDTH: u32 = 1280;
const DEFAULT_HEIGHT: u32 = 720;
const DEFAULT_DETECTOR: &str = "stub";
const DEFAULT_MODEL_INPUT: u32 = 640;
const DEFAULT_BROKER: &str = "localhost:1883";
const DEFAULT_TOPIC: &str = "vision/zone1";
const DEFAULT_CLIENT_ID: &str = "zone-occupancy";
const DEFAULT_KEEP_ALIVE_SECS: u64 = 60;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_QUEUE_CAPACITY: usize = 64;
const DEFAULT_MAX_CONSECUTIVE_SKIPS: u32 = 50;
const DEFAULT_HEALTH_LOG_SECS: u64 = 60;

/// Left half of the frame, normalized.
const DEFAULT_ZONE: [[f64; 2]; 4] = [[0.0, 0.0], [0.5, 0.0], [0.5, 1.0], [0.0, 1.0]];

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct OccupancyConfigFile {
    source: Option<SourceConfigFile>,
    detector: Option<DetectorConfigFile>,
    tracker: Option<TrackerConfig>,
    zone: Option<ZoneConfigFile>,
    mqtt: Option<MqttConfigFile>,
    pipeline: Option<PipelineConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct SourceConfigFile {
    url: Option<String>,
    target_fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct DetectorConfigFile {
    backend: Option<String>,
    model_path: Option<PathBuf>,
    script_path: Option<PathBuf>,
    input_width: Option<u32>,
    input_height: Option<u32>,
    confidence_threshold: Option<f32>,
    agnostic_nms: Option<bool>,
    nms_iou_threshold: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ZoneConfigFile {
    polygon: Option<Vec<[f64; 2]>>,
    normalized: Option<bool>,
    target_class: Option<ClassId>,
    anchor: Option<Anchor>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct MqttConfigFile {
    broker: Option<String>,
    topic: Option<String>,
    client_id: Option<String>,
    username: Option<String>,
    password: Option<String>,
    tls_ca_path: Option<PathBuf>,
    tls_client_cert_path: Option<PathBuf>,
    tls_client_key_path: Option<PathBuf>,
    keep_alive_secs: Option<u64>,
    connect_timeout_secs: Option<u64>,
    queue_capacity: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PipelineConfigFile {
    max_frames: Option<u64>,
    max_consecutive_skips: Option<u32>,
    health_log_secs: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct OccupancyConfig {
    pub source: SourceSettings,
    pub detector: DetectorSettings,
    pub tracker: TrackerConfig,
    pub zone: ZoneSettings,
    pub mqtt: MqttSettings,
    pub pipeline: PipelineSettings,
}

#[derive(Debug, Clone)]
pub struct SourceSettings {
    pub url: String,
    pub target_fps: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub backend: String,
    pub model_path: Option<PathBuf>,
    pub script_path: Option<PathBuf>,
    pub input_width: u32,
    pub input_height: u32,
    pub params: DetectParams,
}

#[derive(Debug, Clone)]
pub struct ZoneSettings {
    pub polygon: Vec<[f64; 2]>,
    /// Vertices are fractions of the frame size rather than pixels.
    pub normalized: bool,
    pub target_class: ClassId,
    pub anchor: Anchor,
}

impl Default for ZoneSettings {
    fn default() -> Self {
        Self {
            polygon: DEFAULT_ZONE.to_vec(),
            normalized: true,
            target_class: PERSON_CLASS_ID,
            anchor: Anchor::default(),
        }
    }
}

#[derive(Clone)]
pub struct MqttSettings {
    pub broker: String,
    pub topic: String,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub tls_ca_path: Option<PathBuf>,
    pub tls_client_cert_path: Option<PathBuf>,
    pub tls_client_key_path: Option<PathBuf>,
    pub keep_alive: Duration,
    pub connect_timeout: Duration,
    pub queue_capacity: usize,
}

impl std::fmt::Debug for MqttSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttSettings")
            .field("broker", &self.broker)
            .field("topic", &self.topic)
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("tls_ca_path", &self.tls_ca_path)
            .field("keep_alive", &self.keep_alive)
            .field("connect_timeout", &self.connect_timeout)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Stop after this many processed frames.
    pub max_frames: Option<u64>,
    /// Consecutive skipped frames tolerated before the run fails.
    pub max_consecutive_skips: u32,
    pub health_log_interval: Duration,
}

impl OccupancyConfig {
    /// Load from the file named by `OCCUPANCY_CONFIG` (if set), then apply
    /// environment overrides and validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var(CONFIG_PATH_ENV)
            .ok()
            .filter(|path| !path.trim().is_empty());
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    /// Same as [`OccupancyConfig::load`] with an explicit file path.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => OccupancyConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: OccupancyConfigFile) -> Self {
        let source = SourceSettings {
            url: file
                .source
                .as_ref()
                .and_then(|source| source.url.clone())
                .unwrap_or_else(|| DEFAULT_SOURCE_URL.to_string()),
            target_fps: file
                .source
                .as_ref()
                .and_then(|source| source.target_fps)
                .unwrap_or(DEFAULT_TARGET_FPS),
            width: file
                .source
                .as_ref()
                .and_then(|source| source.width)
                .unwrap_or(DEFAULT_WIDTH),
            height: file
                .source
                .as_ref()
                .and_then(|source| source.height)
                .unwrap_or(DEFAULT_HEIGHT),
        };

        let detector_file = file.detector.unwrap_or_default();
        let param_defaults = DetectParams::default();
        let detector = DetectorSettings {
            backend: detector_file
                .backend
                .unwrap_or_else(|| DEFAULT_DETECTOR.to_string()),
            model_path: detector_file.model_path,
            script_path: detector_file.script_path,
            input_width: detector_file.input_width.unwrap_or(DEFAULT_MODEL_INPUT),
            input_height: detector_file.input_height.unwrap_or(DEFAULT_MODEL_INPUT),
            params: DetectParams {
                confidence_threshold: detector_file
                    .confidence_threshold
                    .unwrap_or(param_defaults.confidence_threshold),
                agnostic_nms: detector_file
                    .agnostic_nms
                    .unwrap_or(param_defaults.agnostic_nms),
                nms_iou_threshold: detector_file
                    .nms_iou_threshold
                    .unwrap_or(param_defaults.nms_iou_threshold),
            },
        };

        let zone_defaults = ZoneSettings::default();
        let zone_file = file.zone.unwrap_or_default();
        let zone = ZoneSettings {
            polygon: zone_file.polygon.unwrap_or(zone_defaults.polygon),
            normalized: zone_file.normalized.unwrap_or(zone_defaults.normalized),
            target_class: zone_file.target_class.unwrap_or(zone_defaults.target_class),
            anchor: zone_file.anchor.unwrap_or(zone_defaults.anchor),
        };

        let mqtt_file = file.mqtt.unwrap_or_default();
        let mqtt = MqttSettings {
            broker: mqtt_file
                .broker
                .unwrap_or_else(|| DEFAULT_BROKER.to_string()),
            topic: mqtt_file.topic.unwrap_or_else(|| DEFAULT_TOPIC.to_string()),
            client_id: mqtt_file
                .client_id
                .unwrap_or_else(|| DEFAULT_CLIENT_ID.to_string()),
            username: mqtt_file.username,
            password: mqtt_file.password,
            tls_ca_path: mqtt_file.tls_ca_path,
            tls_client_cert_path: mqtt_file.tls_client_cert_path,
            tls_client_key_path: mqtt_file.tls_client_key_path,
            keep_alive: Duration::from_secs(
                mqtt_file.keep_alive_secs.unwrap_or(DEFAULT_KEEP_ALIVE_SECS),
            ),
            connect_timeout: Duration::from_secs(
                mqtt_file
                    .connect_timeout_secs
                    .unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS),
            ),
            queue_capacity: mqtt_file.queue_capacity.unwrap_or(DEFAULT_QUEUE_CAPACITY),
        };

        let pipeline = PipelineSettings {
            max_frames: file.pipeline.as_ref().and_then(|p| p.max_frames),
            max_consecutive_skips: file
                .pipeline
                .as_ref()
                .and_then(|p| p.max_consecutive_skips)
                .unwrap_or(DEFAULT_MAX_CONSECUTIVE_SKIPS),
            health_log_interval: Duration::from_secs(
                file.pipeline
                    .and_then(|p| p.health_log_secs)
                    .unwrap_or(DEFAULT_HEALTH_LOG_SECS),
            ),
        };

        Self {
            source,
            detector,
            tracker: file.tracker.unwrap_or_default(),
            zone,
            mqtt,
            pipeline,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(url) = env_non_empty("OCCUPANCY_SOURCE_URL") {
            self.source.url = url;
        }
        if let Some(broker) = env_non_empty("OCCUPANCY_MQTT_BROKER") {
            self.mqtt.broker = broker;
        }
        if let Some(topic) = env_non_empty("OCCUPANCY_MQTT_TOPIC") {
            self.mqtt.topic = topic;
        }
        if let Some(username) = env_non_empty("OCCUPANCY_MQTT_USERNAME") {
            self.mqtt.username = Some(username);
        }
        if let Some(password) = env_non_empty("OCCUPANCY_MQTT_PASSWORD") {
            self.mqtt.password = Some(password);
        }
        if let Some(backend) = env_non_empty("OCCUPANCY_DETECTOR") {
            self.detector.backend = backend;
        }
        if let Some(path) = env_non_empty("OCCUPANCY_MODEL_PATH") {
            self.detector.model_path = Some(PathBuf::from(path));
        }
        if let Some(polygon) = env_non_empty("OCCUPANCY_ZONE_POLYGON") {
            self.zone.polygon = parse_polygon(&polygon)
                .context("OCCUPANCY_ZONE_POLYGON must look like '0,0;0.5,0;0.5,1;0,1'")?;
        }
        if let Some(class) = env_non_empty("OCCUPANCY_TARGET_CLASS") {
            self.zone.target_class = class
                .trim()
                .parse()
                .map_err(|_| anyhow!("OCCUPANCY_TARGET_CLASS must be a class id integer"))?;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.source.url.trim().is_empty() {
            return Err(anyhow!("source url must not be empty"));
        }
        if self.source.width == 0 || self.source.height == 0 {
            return Err(anyhow!(
                "source resolution must be non-zero, got {}x{}",
                self.source.width,
                self.source.height
            ));
        }

        self.detector.backend = self.detector.backend.trim().to_lowercase();
        if !BACKEND_NAMES.contains(&self.detector.backend.as_str()) {
            return Err(anyhow!(
                "unknown detector backend '{}': expected one of {}",
                self.detector.backend,
                BACKEND_NAMES.join(", ")
            ));
        }
        if self.detector.input_width == 0 || self.detector.input_height == 0 {
            return Err(anyhow!("detector input size must be non-zero"));
        }
        self.detector.params.validate()?;
        self.tracker.validate()?;

        if self.zone.polygon.len() < 3 {
            return Err(anyhow!(
                "zone polygon needs at least 3 points, got {}",
                self.zone.polygon.len()
            ));
        }
        crate::zone::Zone::from_settings(&self.zone, self.source.width, self.source.height)?;

        if self.mqtt.topic.trim().is_empty() {
            return Err(anyhow!("mqtt topic must not be empty"));
        }
        if self.mqtt.topic.contains(['+', '#']) {
            return Err(anyhow!(
                "mqtt topic '{}' must not contain wildcards",
                self.mqtt.topic
            ));
        }
        if self.mqtt.client_id.trim().is_empty() {
            return Err(anyhow!("mqtt client_id must not be empty"));
        }
        if self.mqtt.password.is_some() && self.mqtt.username.is_none() {
            return Err(anyhow!("mqtt password provided without username"));
        }
        if self.mqtt.connect_timeout.is_zero() {
            return Err(anyhow!("mqtt connect_timeout must be greater than zero"));
        }
        if self.mqtt.queue_capacity == 0 {
            return Err(anyhow!("mqtt queue_capacity must be greater than zero"));
        }
        crate::transport::parse_mqtt_endpoint(&self.mqtt.broker)?;

        if self.pipeline.max_consecutive_skips == 0 {
            return Err(anyhow!("pipeline max_consecutive_skips must be at least 1"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<OccupancyConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

/// Parse `x,y;x,y;...` into vertex pairs.
pub fn parse_polygon(value: &str) -> Result<Vec<[f64; 2]>> {
    value
        .split(';')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (x, y) = entry
                .split_once(',')
                .ok_or_else(|| anyhow!("zone vertex '{}' is not 'x,y'", entry))?;
            let x: f64 = x
                .trim()
                .parse()
                .with_context(|| format!("invalid zone x coordinate in '{}'", entry))?;
            let y: f64 = y
                .trim()
                .parse()
                .with_context(|| format!("invalid zone y coordinate in '{}'", entry))?;
            Ok([x, y])
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_polygon_pairs() {
        let parsed = parse_polygon("0,0; 0.5,0 ;0.5,1;0,1").unwrap();
        assert_eq!(parsed, DEFAULT_ZONE.to_vec());
        assert!(parse_polygon("0,0;0.5").is_err());
        assert!(parse_polygon("a,b").is_err());
    }

    #[test]
    fn defaults_mirror_left_half_person_zone() {
        let cfg = OccupancyConfig::from_file(OccupancyConfigFile::default());
        assert_eq!(cfg.zone.polygon, DEFAULT_ZONE.to_vec());
        assert_eq!(cfg.zone.target_class, PERSON_CLASS_ID);
        assert_eq!(cfg.mqtt.topic, "vision/zone1");
        assert_eq!(cfg.mqtt.broker, "localhost:1883");
        assert_eq!(cfg.tracker, TrackerConfig::default());
        assert_eq!((cfg.source.width, cfg.source.height), (1280, 720));
    }

    #[test]
    fn debug_redacts_password() {
        let mut cfg = OccupancyConfig::from_file(OccupancyConfigFile::default());
        cfg.mqtt.username = Some("user".into());
        cfg.mqtt.password = Some("hunter2".into());
        let rendered = format!("{:?}", cfg.mqtt);
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn validate_rejects_wildcard_topic() {
        let mut cfg = OccupancyConfig::from_file(OccupancyConfigFile::default());
        cfg.mqtt.topic = "vision/#".into();
        assert!(cfg.validate().is_err());
    }
}
