//! Configuration for TPUT nodes
//!
//! Defaults match a production deployment (3 s phase waits, 30 s lock TTL);
//! `test()` shrinks every wait so protocol tests finish quickly. Settings can
//! come from TOML (`load`, `from_toml_str`) or `TPUT_*` environment variables
//! (`from_env`).

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Error type for configuration loading
#[derive(Debug)]
pub enum ConfigError {
    /// Config file could not be read
    Io(std::io::Error),
    /// Config file is not valid TOML for `TputConfig`
    Toml(toml::de::Error),
    /// Environment variable holds an unusable value
    InvalidEnv { var: String, value: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "I/O error reading config: {}", e),
            ConfigError::Toml(e) => write!(f, "invalid config: {}", e),
            ConfigError::InvalidEnv { var, value } => {
                write!(f, "invalid value '{}' for {}", value, var)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(e) => Some(e),
            ConfigError::Toml(e) => Some(e),
            ConfigError::InvalidEnv { .. } => None,
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Toml(e)
    }
}

/// Which summary supplies the phase-2 completion threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdSource {
    /// The completing node's own local summary
    LocalSummary,
    /// The merged phase-2 summary in the store
    SharedDict2,
}

/// How a node counts words locally
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocalMode {
    /// Bounded Space-Saving summary of `local_capacity` counters
    SpaceSaving,
    /// Unbounded exact table
    Exact,
}

/// Main configuration for a TPUT node
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TputConfig {
    /// Node name used in log fields
    pub node: String,
    /// Size of the global answer (default: 10)
    pub k: usize,
    /// Capacity of the node-local summary (default: 1000)
    pub local_capacity: usize,
    /// Capacity of the shared per-phase summaries (default: 10000)
    pub shared_capacity: usize,
    /// Local counting structure
    pub local_mode: LocalMode,
    /// Threshold source for phase-2 completion
    pub threshold_source: ThresholdSource,
    /// Sleep before each completion attempt
    pub phase_waits: PhaseWaits,
    /// Distributed lock settings
    pub lock: LockConfig,
}

impl Default for TputConfig {
    fn default() -> Self {
        TputConfig {
            node: "node-0".to_string(),
            k: 10,
            local_capacity: 1000,
            shared_capacity: 10_000,
            local_mode: LocalMode::SpaceSaving,
            threshold_source: ThresholdSource::LocalSummary,
            phase_waits: PhaseWaits::default(),
            lock: LockConfig::default(),
        }
    }
}

impl TputConfig {
    /// Create config for testing (no waits, short lock timeouts)
    pub fn test() -> Self {
        TputConfig {
            node: "test-node".to_string(),
            k: 10,
            local_capacity: 100,
            shared_capacity: 1000,
            local_mode: LocalMode::SpaceSaving,
            threshold_source: ThresholdSource::LocalSummary,
            phase_waits: PhaseWaits::test(),
            lock: LockConfig::test(),
        }
    }

    pub fn with_node(mut self, node: impl Into<String>) -> Self {
        self.node = node.into();
        self
    }

    pub fn with_k(mut self, k: usize) -> Self {
        self.k = k;
        self
    }

    pub fn with_local_mode(mut self, mode: LocalMode) -> Self {
        self.local_mode = mode;
        self
    }

    pub fn with_phase_waits(mut self, wait: Duration) -> Self {
        self.phase_waits = PhaseWaits::uniform(wait);
        self
    }

    /// Parse a TOML document. Missing fields keep their defaults.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    /// Load configuration from `TPUT_*` environment variables over the defaults
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = TputConfig::default();

        if let Some(node) = lookup("TPUT_NODE") {
            config.node = node;
        }
        if let Some(k) = parse_var(&lookup, "TPUT_K")? {
            config.k = k;
        }
        if let Some(cap) = parse_var(&lookup, "TPUT_LOCAL_CAPACITY")? {
            config.local_capacity = cap;
        }
        if let Some(cap) = parse_var(&lookup, "TPUT_SHARED_CAPACITY")? {
            config.shared_capacity = cap;
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "TPUT_PHASE_WAIT_MS")? {
            config.phase_waits = PhaseWaits::uniform(Duration::from_millis(ms));
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "TPUT_LOCK_TTL_MS")? {
            config.lock.ttl = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "TPUT_LOCK_TIMEOUT_MS")? {
            config.lock.acquire_timeout = Duration::from_millis(ms);
        }
        if let Some(mode) = lookup("TPUT_LOCAL_MODE") {
            config.local_mode = match mode.as_str() {
                "space_saving" | "approx" => LocalMode::SpaceSaving,
                "exact" => LocalMode::Exact,
                _ => {
                    return Err(ConfigError::InvalidEnv {
                        var: "TPUT_LOCAL_MODE".to_string(),
                        value: mode,
                    })
                }
            };
        }
        if let Some(source) = lookup("TPUT_THRESHOLD_SOURCE") {
            config.threshold_source = match source.as_str() {
                "local" | "local_summary" => ThresholdSource::LocalSummary,
                "shared" | "shared_dict2" => ThresholdSource::SharedDict2,
                _ => {
                    return Err(ConfigError::InvalidEnv {
                        var: "TPUT_THRESHOLD_SOURCE".to_string(),
                        value: source,
                    })
                }
            };
        }

        Ok(config)
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &str,
) -> Result<Option<T>, ConfigError> {
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv {
                var: var.to_string(),
                value,
            }),
    }
}

/// Per-phase completion waits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseWaits {
    #[serde(with = "duration_millis")]
    pub phase1: Duration,
    #[serde(with = "duration_millis")]
    pub phase2: Duration,
    #[serde(with = "duration_millis")]
    pub phase3: Duration,
}

impl Default for PhaseWaits {
    fn default() -> Self {
        Self::uniform(Duration::from_secs(3))
    }
}

impl PhaseWaits {
    pub fn test() -> Self {
        Self::uniform(Duration::ZERO)
    }

    pub fn uniform(wait: Duration) -> Self {
        PhaseWaits {
            phase1: wait,
            phase2: wait,
            phase3: wait,
        }
    }
}

/// Distributed lock configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    /// Lease of a blocking acquisition (default: 30s)
    #[serde(with = "duration_millis")]
    pub ttl: Duration,
    /// How long a blocking acquisition keeps retrying (default: 10s)
    #[serde(with = "duration_millis")]
    pub acquire_timeout: Duration,
    /// Lease of a single-attempt acquisition (default: 5s)
    #[serde(with = "duration_millis")]
    pub try_lock_ttl: Duration,
    /// Upper bound of the jittered retry delay (default: 100ms)
    #[serde(with = "duration_millis")]
    pub retry_delay: Duration,
    /// Fraction of the TTL reserved for clock drift (default: 0.01)
    pub clock_drift_factor: f64,
}

impl Default for LockConfig {
    fn default() -> Self {
        LockConfig {
            ttl: Duration::from_secs(30),
            acquire_timeout: Duration::from_secs(10),
            try_lock_ttl: Duration::from_secs(5),
            retry_delay: Duration::from_millis(100),
            clock_drift_factor: 0.01,
        }
    }
}

impl LockConfig {
    pub fn test() -> Self {
        LockConfig {
            ttl: Duration::from_secs(5),
            acquire_timeout: Duration::from_secs(2),
            try_lock_ttl: Duration::from_secs(1),
            retry_delay: Duration::from_millis(4),
            clock_drift_factor: 0.01,
        }
    }
}

/// Serde helper for Duration as milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = TputConfig::default();
        assert_eq!(config.k, 10);
        assert_eq!(config.phase_waits.phase2, Duration::from_secs(3));
        assert_eq!(config.lock.ttl, Duration::from_secs(30));
        assert_eq!(config.threshold_source, ThresholdSource::LocalSummary);
        assert_eq!(config.local_mode, LocalMode::SpaceSaving);
    }

    #[test]
    fn test_test_config_has_no_waits() {
        let config = TputConfig::test();
        assert_eq!(config.phase_waits.phase1, Duration::ZERO);
        assert!(config.lock.acquire_timeout < Duration::from_secs(10));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = TputConfig::from_toml_str(
            r#"
            k = 3
            threshold_source = "shared_dict2"
            local_mode = "exact"

            [phase_waits]
            phase1 = 10
            phase2 = 20
            phase3 = 30
            "#,
        )
        .unwrap();
        assert_eq!(config.k, 3);
        assert_eq!(config.threshold_source, ThresholdSource::SharedDict2);
        assert_eq!(config.local_mode, LocalMode::Exact);
        assert_eq!(config.phase_waits.phase3, Duration::from_millis(30));
        assert_eq!(config.local_capacity, 1000);
        assert_eq!(config.lock.retry_delay, Duration::from_millis(100));
    }

    #[test]
    fn test_invalid_toml() {
        let err = TputConfig::from_toml_str("k = \"ten\"").unwrap_err();
        assert!(matches!(err, ConfigError::Toml(_)));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tput.toml");
        std::fs::write(&path, "node = \"edge-7\"\nshared_capacity = 50\n").unwrap();

        let config = TputConfig::load(&path).unwrap();
        assert_eq!(config.node, "edge-7");
        assert_eq!(config.shared_capacity, 50);

        let missing = TputConfig::load(dir.path().join("absent.toml"));
        assert!(matches!(missing, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_serialize_roundtrip_through_toml() {
        let config = TputConfig::test().with_k(4);
        let raw = toml::to_string(&config).unwrap();
        let parsed = TputConfig::from_toml_str(&raw).unwrap();
        assert_eq!(parsed.k, 4);
        assert_eq!(parsed.lock.retry_delay, config.lock.retry_delay);
    }

    #[test]
    fn test_from_vars() {
        let vars: HashMap<&str, &str> = [
            ("TPUT_K", "5"),
            ("TPUT_PHASE_WAIT_MS", "250"),
            ("TPUT_THRESHOLD_SOURCE", "shared"),
            ("TPUT_NODE", "n1"),
            ("TPUT_LOCAL_MODE", "exact"),
        ]
        .into_iter()
        .collect();
        let config = TputConfig::from_vars(|name| vars.get(name).map(|v| v.to_string())).unwrap();

        assert_eq!(config.k, 5);
        assert_eq!(config.node, "n1");
        assert_eq!(config.phase_waits.phase1, Duration::from_millis(250));
        assert_eq!(config.threshold_source, ThresholdSource::SharedDict2);
        assert_eq!(config.local_mode, LocalMode::Exact);
    }

    #[test]
    fn test_from_vars_rejects_garbage() {
        let err = TputConfig::from_vars(|name| (name == "TPUT_K").then(|| "many".to_string()))
            .unwrap_err();
        match err {
            ConfigError::InvalidEnv { var, value } => {
                assert_eq!(var, "TPUT_K");
                assert_eq!(value, "many");
            }
            other => panic!("unexpected error: {}", other),
        }
    }
}
