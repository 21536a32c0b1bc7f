//! TOML configuration for the logwarden service and CLI.
//!
//! Layered: an explicit path, then `LOGWARDEN_CONFIG`, then
//! `/etc/logwarden/logwarden.toml`, then compiled-in defaults. Secrets and a
//! few deployment knobs can also come from the environment.

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

const SYSTEM_CONFIG_PATH: &str = "/etc/logwarden/logwarden.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub ai: AiConfig,
    #[serde(default)]
    pub compression: CompressionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file at `path`, then apply environment
    /// overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let mut config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        config.apply_env();
        config
            .validate()
            .with_context(|| format!("invalid config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded logwarden configuration");
        Ok(config)
    }

    /// Try to load configuration from, in order:
    /// 1. The path in `LOGWARDEN_CONFIG`.
    /// 2. `/etc/logwarden/logwarden.toml`.
    /// 3. Compiled-in defaults.
    pub fn load_or_default() -> Self {
        if let Ok(env_path) = std::env::var("LOGWARDEN_CONFIG") {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "LOGWARDEN_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let system_path = Path::new(SYSTEM_CONFIG_PATH);
        if system_path.exists() {
            match Self::load(system_path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %system_path.display(),
                        error = %e,
                        "system config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Load from `path` when given, otherwise fall back to [`Config::load_or_default`].
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::load_or_default()),
        }
    }

    /// Reject values the engine cannot work with.
    pub fn validate(&self) -> Result<()> {
        self.detection.validate()
    }

    fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Environment values win over file values. Empty values are ignored.
    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = get("OPENAI_API_KEY") {
            self.ai.api_key = Some(key);
        }
        if let Some(key) = get("SCALEDOWN_API_KEY") {
            self.compression.api_key = Some(key);
        }
        if let Some(model) = get("TARGET_MODEL") {
            self.compression.target_model = model;
        }
        if let Some(origins) = get("ALLOWED_ORIGINS") {
            self.server.allowed_origins = origins
                .split(',')
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .collect();
        }
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address for the HTTP API.
    pub bind: String,
    /// Origins allowed by the CORS layer.
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8000".to_string(),
            allowed_origins: vec![
                "http://localhost:8000".to_string(),
                "http://localhost:3000".to_string(),
            ],
        }
    }
}

// ---------------------------------------------------------------------------
// Detection
// ---------------------------------------------------------------------------

/// Engine tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Minimum confidence for a finding to drive the overall verdict.
    pub acceptance_threshold: f64,
    /// Failed authentications from one source before brute force fires.
    pub brute_force_threshold: usize,
    /// Distinct destination ports from one source before port scan fires.
    pub port_scan_threshold: usize,
    /// Outbound transfer size (bytes) counted as a volume signal.
    pub exfil_bytes_threshold: u64,
    /// Cap on `affected_resources` per finding.
    pub max_affected_resources: usize,
    /// Whole-call deadline (seconds).
    pub call_timeout_secs: u64,
    /// Return rule-only findings when the call deadline passes.
    pub partial_results: bool,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            acceptance_threshold: crate::detect::reduce::DEFAULT_ACCEPTANCE_THRESHOLD,
            brute_force_threshold: 3,
            port_scan_threshold: 5,
            exfil_bytes_threshold: 100 * 1024 * 1024,
            max_affected_resources: 5,
            call_timeout_secs: 30,
            partial_results: true,
        }
    }
}

impl DetectionConfig {
    /// The acceptance threshold must be a number in `[0, 1]`.
    pub fn validate(&self) -> Result<()> {
        let t = self.acceptance_threshold;
        if !(0.0..=1.0).contains(&t) {
            bail!("detection.acceptance_threshold must be between 0 and 1, got {t}");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// AI augmentation
// ---------------------------------------------------------------------------

/// OpenAI-compatible chat-completions backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    pub endpoint: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            timeout_secs: 15,
        }
    }
}

// ---------------------------------------------------------------------------
// Compression
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressionBackend {
    Mock,
    Scaledown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    pub backend: CompressionBackend,
    pub endpoint: String,
    pub api_key: Option<String>,
    pub target_model: String,
    /// Compression rate hint passed upstream (`auto` or a fraction).
    pub rate: String,
    pub timeout_secs: u64,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            backend: CompressionBackend::Mock,
            endpoint: "https://api.scaledown.xyz/compress/raw/".to_string(),
            api_key: None,
            target_model: "gpt-4o-mini".to_string(),
            rate: "auto".to_string(),
            timeout_secs: 30,
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum tracing level (`trace`, `debug`, `info`, `warn`, `error`).
    /// `RUST_LOG` takes precedence when set.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_sane() {
        let cfg = Config::default();

        assert_eq!(cfg.server.bind, "0.0.0.0:8000");
        assert_eq!(cfg.server.allowed_origins.len(), 2);

        assert_eq!(cfg.detection.acceptance_threshold, 0.5);
        assert_eq!(cfg.detection.brute_force_threshold, 3);
        assert_eq!(cfg.detection.port_scan_threshold, 5);
        assert_eq!(cfg.detection.exfil_bytes_threshold, 104_857_600);
        assert_eq!(cfg.detection.max_affected_resources, 5);
        assert_eq!(cfg.detection.call_timeout_secs, 30);
        assert!(cfg.detection.partial_results);

        assert_eq!(cfg.ai.model, "gpt-4o-mini");
        assert!(cfg.ai.api_key.is_none());
        assert_eq!(cfg.ai.timeout_secs, 15);

        assert_eq!(cfg.compression.backend, CompressionBackend::Mock);
        assert_eq!(cfg.compression.rate, "auto");

        assert_eq!(cfg.logging.level, "info");
        assert!(!cfg.logging.json);
    }

    #[test]
    fn test_parse_full_toml() {
        let toml_str = r#"
[server]
bind = "127.0.0.1:9000"
allowed_origins = ["https://soc.example.com"]

[detection]
acceptance_threshold = 0.7
brute_force_threshold = 5
max_affected_resources = 3
partial_results = false

[ai]
model = "gpt-4o"
api_key = "sk-test"
timeout_secs = 5

[compression]
backend = "scaledown"
api_key = "sd-test"
rate = "0.4"

[logging]
level = "debug"
json = true
"#;

        let cfg: Config = toml::from_str(toml_str).unwrap();

        assert_eq!(cfg.server.bind, "127.0.0.1:9000");
        assert_eq!(cfg.server.allowed_origins, vec!["https://soc.example.com"]);
        assert_eq!(cfg.detection.acceptance_threshold, 0.7);
        assert_eq!(cfg.detection.brute_force_threshold, 5);
        assert_eq!(cfg.detection.max_affected_resources, 3);
        assert!(!cfg.detection.partial_results);
        // Unset keys in a present section keep their defaults.
        assert_eq!(cfg.detection.port_scan_threshold, 5);
        assert_eq!(cfg.ai.model, "gpt-4o");
        assert_eq!(cfg.ai.api_key.as_deref(), Some("sk-test"));
        assert_eq!(cfg.compression.backend, CompressionBackend::Scaledown);
        assert_eq!(cfg.compression.rate, "0.4");
        assert!(cfg.logging.json);
    }

    #[test]
    fn test_empty_toml_uses_all_defaults() {
        let cfg: Config = toml::from_str("").unwrap();
        let defaults = Config::default();

        assert_eq!(cfg.server.bind, defaults.server.bind);
        assert_eq!(
            cfg.detection.exfil_bytes_threshold,
            defaults.detection.exfil_bytes_threshold
        );
        assert_eq!(cfg.ai.endpoint, defaults.ai.endpoint);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("OPENAI_API_KEY", "sk-env"),
            ("SCALEDOWN_API_KEY", "sd-env"),
            ("TARGET_MODEL", "claude-3-haiku"),
            ("ALLOWED_ORIGINS", "https://a.example, ,https://b.example"),
        ]
        .into_iter()
        .collect();

        let mut cfg = Config::default();
        cfg.apply_overrides(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(cfg.ai.api_key.as_deref(), Some("sk-env"));
        assert_eq!(cfg.compression.api_key.as_deref(), Some("sd-env"));
        assert_eq!(cfg.compression.target_model, "claude-3-haiku");
        assert_eq!(
            cfg.server.allowed_origins,
            vec!["https://a.example", "https://b.example"]
        );
    }

    #[test]
    fn test_blank_env_values_ignored() {
        let mut cfg = Config::default();
        cfg.ai.api_key = Some("from-file".into());
        cfg.apply_overrides(|k| (k == "OPENAI_API_KEY").then(|| "  ".to_string()));
        assert_eq!(cfg.ai.api_key.as_deref(), Some("from-file"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("logwarden.toml");
        std::fs::write(
            &path,
            r#"
[server]
bind = "0.0.0.0:9999"
"#,
        )
        .unwrap();

        let cfg = Config::load(&path).unwrap();
        assert_eq!(cfg.server.bind, "0.0.0.0:9999");
    }

    #[test]
    fn test_acceptance_threshold_out_of_range_rejected() {
        for bad in [1.5, -0.1, f64::NAN] {
            let cfg = DetectionConfig {
                acceptance_threshold: bad,
                ..DetectionConfig::default()
            };
            assert!(cfg.validate().is_err(), "{bad} accepted");
        }
        for good in [0.0, 0.95, 1.0] {
            let cfg = DetectionConfig {
                acceptance_threshold: good,
                ..DetectionConfig::default()
            };
            assert!(cfg.validate().is_ok(), "{good} rejected");
        }
    }

    #[test]
    fn test_load_rejects_invalid_threshold() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("logwarden.toml");
        std::fs::write(&path, "[detection]\nacceptance_threshold = nan\n").unwrap();
        let err = Config::load(&path).unwrap_err();
        assert!(format!("{err:#}").contains("acceptance_threshold"));
    }

    #[test]
    fn test_load_missing_file_errors() {
        let result = Config::load(Path::new("/nonexistent/path/logwarden.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_serialization_roundtrip() {
        let cfg = Config::default();
        let toml_str = toml::to_string_pretty(&cfg).unwrap();
        let back: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(cfg.server.bind, back.server.bind);
        assert_eq!(cfg.detection.call_timeout_secs, back.detection.call_timeout_secs);
    }
}
