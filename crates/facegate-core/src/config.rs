use crate::matcher::{DUPLICATE_TOLERANCE, MATCH_TOLERANCE};
use crate::pipeline::{
    PipelineSettings, DETECTION_SCALE, ENCODING_JITTERS, MIN_FACE_SIZE, MIN_FRAME_SIZE,
};
use std::path::PathBuf;
use thiserror::Error;

const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";
const EMBEDDER_MODEL_FILE: &str = "face_embedder_128.onnx";

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("{name} must be positive, got {value}")]
    NotPositive { name: &'static str, value: f32 },
    #[error("duplicate tolerance ({duplicate}) must be stricter than match tolerance ({matching})")]
    DuplicateNotStricter { duplicate: f32, matching: f32 },
    #[error("detection scale must be in (0, 1], got {0}")]
    DetectionScale(f32),
}

/// Service configuration, loaded from `FACEGATE_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Maximum distance accepted as a verification match.
    pub match_tolerance: f32,
    /// Maximum distance at which a new registration is a duplicate.
    pub duplicate_tolerance: f32,
    pub min_frame_size: u32,
    pub detection_scale: f32,
    pub min_face_size: u32,
    pub encoding_jitters: u32,
    /// Deadline in seconds for a single daemon request.
    pub call_timeout_secs: u64,
    /// Serve on the session bus instead of the system bus.
    pub dbus_session: bool,
}

impl Config {
    /// Load configuration from `FACEGATE_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Config::from_env`] with an explicit variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let model_dir = lookup("FACEGATE_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(default_model_dir);

        let data_dir = lookup("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                let home = lookup("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("facegate");

        let db_path = lookup("FACEGATE_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("faces.db"));

        let parse_f32 = |key: &str, default: f32| parse_or(lookup(key), default);
        let parse_u32 = |key: &str, default: u32| parse_or(lookup(key), default);

        Self {
            model_dir,
            db_path,
            match_tolerance: parse_f32("FACEGATE_MATCH_TOLERANCE", MATCH_TOLERANCE),
            duplicate_tolerance: parse_f32("FACEGATE_DUPLICATE_TOLERANCE", DUPLICATE_TOLERANCE),
            min_frame_size: parse_u32("FACEGATE_MIN_FRAME_SIZE", MIN_FRAME_SIZE),
            detection_scale: parse_f32("FACEGATE_DETECTION_SCALE", DETECTION_SCALE),
            min_face_size: parse_u32("FACEGATE_MIN_FACE_SIZE", MIN_FACE_SIZE),
            encoding_jitters: parse_u32("FACEGATE_ENCODING_JITTERS", ENCODING_JITTERS),
            call_timeout_secs: parse_or(lookup("FACEGATE_CALL_TIMEOUT_SECS"), 30),
            dbus_session: lookup("FACEGATE_DBUS_SESSION")
                .map(|v| v == "1")
                .unwrap_or(false),
        }
    }

    /// Reject tolerance and scale combinations that break enrollment policy.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("match tolerance", self.match_tolerance),
            ("duplicate tolerance", self.duplicate_tolerance),
        ] {
            if !(value > 0.0) {
                return Err(ConfigError::NotPositive { name, value });
            }
        }
        if self.duplicate_tolerance >= self.match_tolerance {
            return Err(ConfigError::DuplicateNotStricter {
                duplicate: self.duplicate_tolerance,
                matching: self.match_tolerance,
            });
        }
        if !(self.detection_scale > 0.0 && self.detection_scale <= 1.0) {
            return Err(ConfigError::DetectionScale(self.detection_scale));
        }
        Ok(())
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            min_frame_size: self.min_frame_size,
            detection_scale: self.detection_scale,
            min_face_size: self.min_face_size,
            encoding_jitters: self.encoding_jitters,
            render_preview: true,
        }
    }

    /// Path to the SCRFD detection model.
    pub fn detector_model_path(&self) -> String {
        self.model_dir
            .join(DETECTOR_MODEL_FILE)
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the 128-d embedding model.
    pub fn embedder_model_path(&self) -> String {
        self.model_dir
            .join(EMBEDDER_MODEL_FILE)
            .to_string_lossy()
            .into_owned()
    }
}

/// System-wide model directory used when `FACEGATE_MODEL_DIR` is unset.
pub fn default_model_dir() -> PathBuf {
    PathBuf::from("/usr/share/facegate/models")
}

fn parse_or<T: std::str::FromStr>(raw: Option<String>, default: T) -> T {
    raw.and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[("HOME", "/home/alice")]);
        assert_eq!(config.match_tolerance, 0.45);
        assert_eq!(config.duplicate_tolerance, 0.42);
        assert_eq!(config.detection_scale, 0.5);
        assert_eq!(config.encoding_jitters, 3);
        assert_eq!(config.min_face_size, 60);
        assert_eq!(config.min_frame_size, 50);
        assert_eq!(config.call_timeout_secs, 30);
        assert!(!config.dbus_session);
        assert_eq!(config.db_path, PathBuf::from("/home/alice/.local/share/facegate/faces.db"));
        assert_eq!(config.model_dir, default_model_dir());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("XDG_DATA_HOME", "/var/lib"),
            ("FACEGATE_MODEL_DIR", "/opt/models"),
            ("FACEGATE_MATCH_TOLERANCE", "0.5"),
            ("FACEGATE_ENCODING_JITTERS", "1"),
            ("FACEGATE_DBUS_SESSION", "1"),
        ]);
        assert_eq!(config.db_path, PathBuf::from("/var/lib/facegate/faces.db"));
        assert_eq!(config.match_tolerance, 0.5);
        assert_eq!(config.encoding_jitters, 1);
        assert!(config.dbus_session);
        assert_eq!(config.detector_model_path(), "/opt/models/det_10g.onnx");
        assert_eq!(config.embedder_model_path(), "/opt/models/face_embedder_128.onnx");
    }

    #[test]
    fn test_unparsable_value_falls_back() {
        let config = config_from(&[("FACEGATE_DETECTION_SCALE", "half")]);
        assert_eq!(config.detection_scale, 0.5);
    }

    #[test]
    fn test_duplicate_tolerance_must_be_stricter() {
        let config = config_from(&[("FACEGATE_DUPLICATE_TOLERANCE", "0.45")]);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DuplicateNotStricter { .. })
        ));
    }

    #[test]
    fn test_rejects_bad_scale_and_tolerance() {
        let config = config_from(&[("FACEGATE_DETECTION_SCALE", "1.5")]);
        assert_eq!(config.validate(), Err(ConfigError::DetectionScale(1.5)));

        let config = config_from(&[("FACEGATE_MATCH_TOLERANCE", "-1")]);
        assert!(matches!(config.validate(), Err(ConfigError::NotPositive { .. })));
    }

    #[test]
    fn test_pipeline_settings_follow_config() {
        let config = config_from(&[("FACEGATE_MIN_FACE_SIZE", "80")]);
        let settings = config.pipeline_settings();
        assert_eq!(settings.min_face_size, 80);
        assert!(settings.render_preview);
    }
}
