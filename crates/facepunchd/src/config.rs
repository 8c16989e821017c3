use std::path::{Path, PathBuf};
use std::time::Duration;

use facepunch_core::EngineConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Daemon configuration.
///
/// Built from defaults, then the TOML file named by `FACEPUNCH_CONFIG` (if
/// set), then `FACEPUNCH_*` environment variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Thresholds of the matching, liveness and attendance engines.
    pub engine: EngineConfig,
    /// Idle lifetime of a liveness session.
    pub liveness_session_ttl_secs: u64,
    /// Embedding length produced by the recognizer and accepted by the store.
    pub embedding_dim: usize,
    /// Verify model checksums before loading them.
    pub verify_models: bool,
    /// Serve on the session bus instead of the system bus (development mode).
    pub session_bus: bool,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = data_dir();
        Self {
            model_dir: data_dir.join("models"),
            db_path: data_dir.join("attendance.db"),
            engine: EngineConfig::default(),
            liveness_session_ttl_secs: 120,
            embedding_dim: 512,
            verify_models: true,
            session_bus: false,
        }
    }
}

impl Config {
    /// Load the file named by `FACEPUNCH_CONFIG`, then apply environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var("FACEPUNCH_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Override fields from `FACEPUNCH_*` variables looked up through `var`.
    ///
    /// Unparseable values are ignored with a warning.
    pub fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = var("FACEPUNCH_MODEL_DIR") {
            self.model_dir = PathBuf::from(dir);
        }
        if let Some(path) = var("FACEPUNCH_DB_PATH") {
            self.db_path = PathBuf::from(path);
        }

        let engine = &mut self.engine;
        parse_into(&var, "FACEPUNCH_MATCH_TOLERANCE", &mut engine.matching.tolerance);
        parse_into(&var, "FACEPUNCH_BLINK_THRESHOLD", &mut engine.liveness.blink.threshold);
        parse_into(
            &var,
            "FACEPUNCH_TEXTURE_THRESHOLD",
            &mut engine.liveness.texture_threshold,
        );
        parse_into(&var, "FACEPUNCH_LIVENESS_MIN_FRAMES", &mut engine.liveness.min_frames);
        parse_into(
            &var,
            "FACEPUNCH_MIN_HOURS_FOR_PUNCHOUT",
            &mut engine.attendance.min_hours_for_punch_out,
        );

        parse_into(
            &var,
            "FACEPUNCH_LIVENESS_SESSION_TTL_SECS",
            &mut self.liveness_session_ttl_secs,
        );
        parse_into(&var, "FACEPUNCH_EMBEDDING_DIM", &mut self.embedding_dim);
        if let Some(v) = var("FACEPUNCH_VERIFY_MODELS") {
            self.verify_models = v != "0";
        }
        if var("FACEPUNCH_SESSION_BUS").is_some() {
            self.session_bus = true;
        }
    }

    pub fn liveness_session_ttl(&self) -> Duration {
        Duration::from_secs(self.liveness_session_ttl_secs)
    }
}

fn parse_into<T: std::str::FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    key: &str,
    slot: &mut T,
) {
    let Some(raw) = var(key) else {
        return;
    };
    match raw.parse() {
        Ok(v) => *slot = v,
        Err(_) => tracing::warn!(key, value = %raw, "ignoring unparseable override"),
    }
}

/// `$XDG_DATA_HOME/facepunch`, falling back to `~/.local/share/facepunch`.
fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facepunch")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn test_defaults() {
        let c = Config::default();
        assert_eq!(c.engine.matching.tolerance, 0.45);
        assert_eq!(c.engine.liveness.min_frames, 3);
        assert_eq!(c.engine.attendance.min_hours_for_punch_out, 6);
        assert_eq!(c.liveness_session_ttl(), Duration::from_secs(120));
        assert_eq!(c.embedding_dim, 512);
        assert!(c.verify_models);
        assert!(!c.session_bus);
        assert!(c.db_path.ends_with("facepunch/attendance.db"));
    }

    #[test]
    fn test_env_overrides() {
        let mut c = Config::default();
        c.apply_overrides(vars(&[
            ("FACEPUNCH_MATCH_TOLERANCE", "0.5"),
            ("FACEPUNCH_BLINK_THRESHOLD", "0.21"),
            ("FACEPUNCH_TEXTURE_THRESHOLD", "0.7"),
            ("FACEPUNCH_LIVENESS_MIN_FRAMES", "4"),
            ("FACEPUNCH_MIN_HOURS_FOR_PUNCHOUT", "8"),
            ("FACEPUNCH_DB_PATH", "/srv/attendance.db"),
            ("FACEPUNCH_VERIFY_MODELS", "0"),
            ("FACEPUNCH_SESSION_BUS", "1"),
        ]));
        assert_eq!(c.engine.matching.tolerance, 0.5);
        assert_eq!(c.engine.liveness.blink.threshold, 0.21);
        assert_eq!(c.engine.liveness.texture_threshold, 0.7);
        assert_eq!(c.engine.liveness.min_frames, 4);
        assert_eq!(c.engine.attendance.min_hours_for_punch_out, 8);
        assert_eq!(c.db_path, PathBuf::from("/srv/attendance.db"));
        assert!(!c.verify_models);
        assert!(c.session_bus);
    }

    #[test]
    fn test_bad_override_keeps_value() {
        let mut c = Config::default();
        c.apply_overrides(vars(&[("FACEPUNCH_MATCH_TOLERANCE", "loose")]));
        assert_eq!(c.engine.matching.tolerance, 0.45);
    }

    #[test]
    fn test_partial_toml() {
        let c = Config::from_toml(
            r#"
            model_dir = "/opt/facepunch/models"
            liveness_session_ttl_secs = 30

            [engine.matching]
            tolerance = 0.4

            [engine.liveness.blink]
            min_samples = 8
            "#,
        )
        .unwrap();
        assert_eq!(c.model_dir, PathBuf::from("/opt/facepunch/models"));
        assert_eq!(c.liveness_session_ttl_secs, 30);
        assert_eq!(c.engine.matching.tolerance, 0.4);
        assert_eq!(c.engine.liveness.blink.min_samples, 8);
        assert_eq!(c.engine.liveness.blink.threshold, 0.25);
        assert_eq!(c.engine.liveness.min_frames, 3);
        assert_eq!(c.embedding_dim, 512);
    }

    #[test]
    fn test_unknown_file() {
        let err = Config::from_file(Path::new("/nonexistent/facepunch.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
