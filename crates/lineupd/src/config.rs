use anyhow::{bail, Context, Result};
use lineup_core::{DetectionMode, SamplePolicy, DEFAULT_MATCH_THRESHOLD};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Service configuration.
///
/// Loaded once at start-up: defaults, then the TOML file named by
/// `LINEUP_CONFIG` (if any), then `LINEUP_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Address the HTTP listener binds to (default: 0.0.0.0:1234).
    pub listen_addr: SocketAddr,
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// Training root: one sub-directory of images per identity.
    pub training_dir: PathBuf,
    /// Detection mode for recognition requests that do not override it.
    pub detection_mode: DetectionMode,
    /// Detection mode used when embedding training samples.
    pub training_mode: DetectionMode,
    /// Maximum Euclidean distance for a match, unless a request overrides it.
    pub match_threshold: f32,
    /// Which samples per identity go into the gallery.
    pub sample_policy: SamplePolicy,
    /// How long a recognition request waits for the engine.
    pub request_timeout_secs: u64,
    /// Upper bound on a request body, base64 overhead included.
    pub max_body_bytes: usize,
    /// Pending engine requests before callers wait for a slot.
    pub engine_queue_depth: usize,
    /// Rebuild the gallery from the training root at start-up.
    pub rebuild_on_start: bool,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = PathBuf::from("data");
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 1234)),
            model_dir: lineup_core::default_model_dir(),
            training_dir: data_dir.join("training"),
            detection_mode: DetectionMode::Fast,
            training_mode: DetectionMode::Accurate,
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            sample_policy: SamplePolicy::All,
            request_timeout_secs: 30,
            max_body_bytes: 16 * 1024 * 1024,
            engine_queue_depth: 4,
            rebuild_on_start: true,
        }
    }
}

impl Config {
    /// Load from `LINEUP_CONFIG` and `LINEUP_*` environment variables.
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var_os("LINEUP_CONFIG") {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Self = toml::from_str(&text)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        tracing::info!(path = %path.display(), "configuration file loaded");
        Ok(config)
    }

    /// Override fields from environment variables, looked up through `lookup`.
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        override_from(&lookup, "LINEUP_LISTEN_ADDR", &mut self.listen_addr)?;
        override_from(&lookup, "LINEUP_DETECTION_MODE", &mut self.detection_mode)?;
        override_from(&lookup, "LINEUP_TRAINING_MODE", &mut self.training_mode)?;
        override_from(&lookup, "LINEUP_MATCH_THRESHOLD", &mut self.match_threshold)?;
        override_from(&lookup, "LINEUP_SAMPLE_POLICY", &mut self.sample_policy)?;
        override_from(&lookup, "LINEUP_REQUEST_TIMEOUT_SECS", &mut self.request_timeout_secs)?;
        override_from(&lookup, "LINEUP_MAX_BODY_BYTES", &mut self.max_body_bytes)?;
        override_from(&lookup, "LINEUP_ENGINE_QUEUE_DEPTH", &mut self.engine_queue_depth)?;
        if let Some(dir) = lookup("LINEUP_MODEL_DIR") {
            self.model_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("LINEUP_TRAINING_DIR") {
            self.training_dir = PathBuf::from(dir);
        }
        if let Some(v) = lookup("LINEUP_REBUILD_ON_START") {
            self.rebuild_on_start = v != "0" && !v.eq_ignore_ascii_case("false");
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if !self.match_threshold.is_finite() || self.match_threshold < 0.0 {
            bail!("match_threshold must be a non-negative number, got {}", self.match_threshold);
        }
        if self.request_timeout_secs == 0 {
            bail!("request_timeout_secs must be at least 1");
        }
        if self.engine_queue_depth == 0 {
            bail!("engine_queue_depth must be at least 1");
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn override_from<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T) -> Result<()>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(raw) = lookup(key) {
        *slot = raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid {key}={raw:?}: {e}"))?;
    }
    Ok(())
}
