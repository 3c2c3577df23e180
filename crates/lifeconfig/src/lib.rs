use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};

pub const DEFAULT_GRID_SIZE: u32 = 32;
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(200);
pub const DEFAULT_WORKGROUP_SIZE: u32 = 8;
pub const DEFAULT_LIVE_PROBABILITY: f64 = 0.4;
pub const DEFAULT_CELL_SCALE: f32 = 0.8;
pub const DEFAULT_BACKGROUND: [f64; 4] = [0.0, 0.0, 0.4, 1.0];
pub const DEFAULT_WINDOW: [u32; 2] = [512, 512];

/// Largest square tile that stays within the 256-invocation limit every
/// WebGPU-class adapter guarantees.
pub const MAX_WORKGROUP_SIZE: u32 = 16;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("failed to read configuration at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// What lies beyond the last row and column of the grid.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgePolicy {
    /// Neighbours outside the grid count as dead.
    #[default]
    Bounded,
    /// Coordinates wrap around both axes.
    Toroidal,
}

impl EdgePolicy {
    pub fn wraps(self) -> bool {
        matches!(self, EdgePolicy::Toroidal)
    }
}

impl fmt::Display for EdgePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EdgePolicy::Bounded => "bounded",
            EdgePolicy::Toroidal => "toroidal",
        })
    }
}

impl std::str::FromStr for EdgePolicy {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "bounded" | "dead" => Ok(EdgePolicy::Bounded),
            "toroidal" | "torus" | "wrap" => Ok(EdgePolicy::Toroidal),
            other => Err(format!(
                "invalid edge policy '{other}'; expected 'bounded' or 'toroidal'"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LifeConfig {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub grid: GridSection,
    #[serde(default)]
    pub timing: TimingSection,
    #[serde(default)]
    pub compute: ComputeSection,
    #[serde(default)]
    pub seed: SeedSection,
    #[serde(default)]
    pub render: RenderSection,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct GridSection {
    pub size: u32,
    pub edges: EdgePolicy,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TimingSection {
    #[serde(
        default = "default_interval",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub interval: Duration,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ComputeSection {
    pub workgroup_size: u32,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SeedSection {
    pub live_probability: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RenderSection {
    pub cell_scale: f32,
    pub background: [f64; 4],
    pub window: [u32; 2],
}

impl Default for LifeConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            grid: GridSection::default(),
            timing: TimingSection::default(),
            compute: ComputeSection::default(),
            seed: SeedSection::default(),
            render: RenderSection::default(),
        }
    }
}

impl Default for GridSection {
    fn default() -> Self {
        Self {
            size: DEFAULT_GRID_SIZE,
            edges: EdgePolicy::default(),
        }
    }
}

impl Default for TimingSection {
    fn default() -> Self {
        Self {
            interval: default_interval(),
        }
    }
}

impl Default for ComputeSection {
    fn default() -> Self {
        Self {
            workgroup_size: DEFAULT_WORKGROUP_SIZE,
        }
    }
}

impl Default for SeedSection {
    fn default() -> Self {
        Self {
            live_probability: DEFAULT_LIVE_PROBABILITY,
            seed: None,
        }
    }
}

impl Default for RenderSection {
    fn default() -> Self {
        Self {
            cell_scale: DEFAULT_CELL_SCALE,
            background: DEFAULT_BACKGROUND,
            window: DEFAULT_WINDOW,
        }
    }
}

fn default_version() -> u32 {
    1
}

fn default_interval() -> Duration {
    DEFAULT_INTERVAL
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    struct Visitor;
    impl<'de> de::Visitor<'de> for Visitor {
        type Value = Duration;

        fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            formatter.write_str("a duration as number of seconds or human-readable string")
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            humantime::parse_duration(v)
                .map_err(|err| E::custom(format!("invalid duration '{v}': {err}")))
        }

        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(Duration::from_secs(v))
        }

        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v < 0 {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Duration::from_secs(v as u64))
        }

        fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v.is_nan() || v.is_sign_negative() || v.is_infinite() {
                return Err(E::custom("duration must be a finite non-negative number"));
            }
            Ok(Duration::from_secs_f64(v))
        }
    }

    deserializer.deserialize_any(Visitor)
}

fn serialize_duration<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&humantime::format_duration(*value).to_string())
}

impl LifeConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let raw: LifeConfig = toml::from_str(input)?;
        raw.validate()?;
        Ok(raw)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Loads `path` when it exists, otherwise returns the built-in defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::from_path(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn cell_count(&self) -> u64 {
        u64::from(self.grid.size) * u64::from(self.grid.size)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version != 1 {
            return Err(ConfigError::Invalid(format!(
                "unsupported config version {}; expected 1",
                self.version
            )));
        }

        if self.grid.size == 0 {
            return Err(ConfigError::Invalid(
                "grid.size must be greater than zero".into(),
            ));
        }

        let workgroup = self.compute.workgroup_size;
        if workgroup == 0 || workgroup > MAX_WORKGROUP_SIZE {
            return Err(ConfigError::Invalid(format!(
                "compute.workgroup_size must be between 1 and {MAX_WORKGROUP_SIZE}, got {workgroup}"
            )));
        }

        let probability = self.seed.live_probability;
        if !(0.0..=1.0).contains(&probability) {
            return Err(ConfigError::Invalid(format!(
                "seed.live_probability must be within [0, 1], got {probability}"
            )));
        }

        let scale = self.render.cell_scale;
        if !(scale > 0.0 && scale <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "render.cell_scale must be within (0, 1], got {scale}"
            )));
        }

        if self.render.background.iter().any(|c| !c.is_finite()) {
            return Err(ConfigError::Invalid(
                "render.background components must be finite".into(),
            ));
        }

        if self.render.window.iter().any(|&d| d == 0) {
            return Err(ConfigError::Invalid(
                "render.window dimensions must be greater than zero".into(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
version = 1

[grid]
size = 64
edges = "toroidal"

[timing]
interval = "50ms"

[compute]
workgroup_size = 16

[seed]
live_probability = 0.25
seed = 99

[render]
cell_scale = 0.9
background = [0.1, 0.1, 0.1, 1.0]
window = [800, 600]
"#;

    #[test]
    fn parses_sample_config() {
        let config = LifeConfig::from_toml_str(SAMPLE).expect("parse config");
        assert_eq!(config.grid.size, 64);
        assert_eq!(config.grid.edges, EdgePolicy::Toroidal);
        assert_eq!(config.timing.interval, Duration::from_millis(50));
        assert_eq!(config.compute.workgroup_size, 16);
        assert_eq!(config.seed.seed, Some(99));
        assert_eq!(config.render.window, [800, 600]);
        assert_eq!(config.cell_count(), 64 * 64);
    }

    #[test]
    fn empty_document_yields_defaults() {
        let config = LifeConfig::from_toml_str("").unwrap();
        assert_eq!(config, LifeConfig::default());
        assert_eq!(config.grid.size, DEFAULT_GRID_SIZE);
        assert_eq!(config.timing.interval, DEFAULT_INTERVAL);
        assert_eq!(config.grid.edges, EdgePolicy::Bounded);
    }

    #[test]
    fn numeric_intervals_are_seconds() {
        let config = LifeConfig::from_toml_str("[timing]\ninterval = 2").unwrap();
        assert_eq!(config.timing.interval, Duration::from_secs(2));
        let config = LifeConfig::from_toml_str("[timing]\ninterval = 0.25").unwrap();
        assert_eq!(config.timing.interval, Duration::from_millis(250));
    }

    #[test]
    fn rejects_negative_interval() {
        let err = LifeConfig::from_toml_str("[timing]\ninterval = -1").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn rejects_zero_grid() {
        let err = LifeConfig::from_toml_str("[grid]\nsize = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_oversized_workgroup() {
        let err = LifeConfig::from_toml_str("[compute]\nworkgroup_size = 32").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_probability_out_of_range() {
        let err = LifeConfig::from_toml_str("[seed]\nlive_probability = 1.5").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_unknown_version() {
        let err = LifeConfig::from_toml_str("version = 2").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn serialized_config_parses_back() {
        let config = LifeConfig::from_toml_str(SAMPLE).unwrap();
        let text = config.to_toml_string().unwrap();
        assert!(text.contains("interval = \"50ms\""));
        let reparsed = LifeConfig::from_toml_str(&text).unwrap();
        assert_eq!(reparsed, config);
    }

    #[test]
    fn load_or_default_handles_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("config.toml");
        let config = LifeConfig::load_or_default(&missing).unwrap();
        assert_eq!(config, LifeConfig::default());

        fs::write(&missing, "[grid]\nsize = 12\n").unwrap();
        let config = LifeConfig::load_or_default(&missing).unwrap();
        assert_eq!(config.grid.size, 12);
    }

    #[test]
    fn edge_policy_parses_aliases() {
        assert_eq!("wrap".parse::<EdgePolicy>(), Ok(EdgePolicy::Toroidal));
        assert_eq!("Bounded".parse::<EdgePolicy>(), Ok(EdgePolicy::Bounded));
        assert!("sideways".parse::<EdgePolicy>().is_err());
    }
}
