//! Session configuration.
//!
//! Loaded once at setup from YAML. JSON is valid YAML, so the camelCase keys of
//! browser-style settings files (`markerSize`, `feed`, ...) are accepted as aliases.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::error::SetupError;

/// Physical marker edge length used when none is configured (millimetres).
pub const DEFAULT_MARKER_SIZE_MM: f64 = 39.0;

/// Accepted render cadence range (Hz).
pub const MIN_REFRESH_HZ: f64 = 0.1;
pub const MAX_REFRESH_HZ: f64 = 1000.0;

/// Where frames come from.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum FeedSpec {
    /// Live camera capture.
    Camera,
    /// An image file or a directory of frames played back in name order.
    File(PathBuf),
}

impl From<String> for FeedSpec {
    fn from(value: String) -> Self {
        if value.trim().eq_ignore_ascii_case("camera") {
            FeedSpec::Camera
        } else {
            FeedSpec::File(PathBuf::from(value.trim()))
        }
    }
}

impl Default for FeedSpec {
    fn default() -> Self {
        FeedSpec::Camera
    }
}

/// Tracking session configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Marker edge length in millimetres.
    #[serde(alias = "markerSize")]
    pub marker_size: f64,

    /// Width of the render/capture surface in pixels.
    #[serde(alias = "renderWidth")]
    pub render_width: u32,

    /// Attach corner outlines to published poses and log them.
    pub debug: bool,

    /// Frame source.
    pub feed: FeedSpec,

    /// Render cadence used by `TrackingSession`.
    #[serde(alias = "refreshHz")]
    pub refresh_hz: f64,

    /// A detection request outstanding for longer than this is abandoned.
    #[serde(alias = "requestTimeoutMs")]
    pub request_timeout_ms: u64,

    /// Consecutive detector channel failures tolerated before giving up.
    #[serde(alias = "maxChannelRestarts")]
    pub max_channel_restarts: u32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            marker_size: DEFAULT_MARKER_SIZE_MM,
            render_width: 640,
            debug: false,
            feed: FeedSpec::default(),
            refresh_hz: 60.0,
            request_timeout_ms: 500,
            max_channel_restarts: 3,
        }
    }
}

impl TrackerConfig {
    /// Parse a configuration document.
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let config: TrackerConfig =
            serde_yaml::from_str(text).context("Failed to parse tracker configuration")?;
        Ok(config)
    }

    /// Load a configuration file.
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
        let config: TrackerConfig = serde_yaml::from_reader(file)
            .with_context(|| format!("Failed to parse tracker configuration {:?}", path))?;
        Ok(config)
    }

    /// Reject values the tracking loop cannot work with.
    pub fn validate(&self) -> Result<(), SetupError> {
        if !(self.marker_size.is_finite() && self.marker_size > 0.0) {
            return Err(SetupError::InvalidConfig(format!(
                "marker_size must be positive, got {}",
                self.marker_size
            )));
        }
        if self.render_width == 0 {
            return Err(SetupError::InvalidRenderWidth(self.render_width));
        }
        if !(MIN_REFRESH_HZ..=MAX_REFRESH_HZ).contains(&self.refresh_hz) {
            return Err(SetupError::InvalidConfig(format!(
                "refresh_hz must be within {}..={}, got {}",
                MIN_REFRESH_HZ, MAX_REFRESH_HZ, self.refresh_hz
            )));
        }
        if self.request_timeout_ms == 0 {
            return Err(SetupError::InvalidConfig(
                "request_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Interval between render-cadence signals. The rate is clamped to the
    /// accepted range, so an unvalidated config still yields a usable interval.
    pub fn refresh_interval(&self) -> Duration {
        let hz = if self.refresh_hz.is_nan() {
            MIN_REFRESH_HZ
        } else {
            self.refresh_hz.clamp(MIN_REFRESH_HZ, MAX_REFRESH_HZ)
        };
        Duration::from_secs_f64(1.0 / hz)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = TrackerConfig::default();
        assert_eq!(config.marker_size, 39.0);
        assert_eq!(config.feed, FeedSpec::Camera);
        assert!(!config.debug);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_camel_case_settings() {
        let config = TrackerConfig::from_yaml_str(
            r#"{"markerSize": 50, "debug": true, "feed": "media/clip", "model": "model.json"}"#,
        )
        .unwrap();
        assert_eq!(config.marker_size, 50.0);
        assert!(config.debug);
        assert_eq!(config.feed, FeedSpec::File(PathBuf::from("media/clip")));
        // Unspecified fields keep their defaults.
        assert_eq!(config.render_width, 640);
    }

    #[test]
    fn test_parse_yaml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "marker_size: 80\nrender_width: 320\nfeed: camera\nrefresh_hz: 30\nrequest_timeout_ms: 250"
        )
        .unwrap();

        let config = TrackerConfig::from_yaml_file(file.path()).unwrap();
        assert_eq!(config.render_width, 320);
        assert_eq!(config.feed, FeedSpec::Camera);
        assert_eq!(config.request_timeout(), Duration::from_millis(250));
        assert!((config.refresh_interval().as_secs_f64() - 1.0 / 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_missing_file_is_reported() {
        let err = TrackerConfig::from_yaml_file("/nonexistent/tracker.yaml").unwrap_err();
        assert!(format!("{err:#}").contains("Failed to open"));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = TrackerConfig {
            marker_size: 0.0,
            ..TrackerConfig::default()
        };
        assert!(matches!(config.validate(), Err(SetupError::InvalidConfig(_))));

        let config = TrackerConfig {
            render_width: 0,
            ..TrackerConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(SetupError::InvalidRenderWidth(0))
        ));

        let config = TrackerConfig {
            refresh_hz: -1.0,
            ..TrackerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_refresh_rate_out_of_range() {
        for refresh_hz in [1e-300, 0.0, 5000.0, f64::INFINITY, f64::NAN] {
            let config = TrackerConfig {
                refresh_hz,
                ..TrackerConfig::default()
            };
            assert!(
                matches!(config.validate(), Err(SetupError::InvalidConfig(_))),
                "refresh_hz {refresh_hz} accepted"
            );
            // Never panics, even without validation.
            let interval = config.refresh_interval();
            assert!(interval >= Duration::from_micros(999));
            assert!(interval <= Duration::from_secs(11));
        }

        let config = TrackerConfig::from_yaml_str("refresh_hz: 1.0e-300").unwrap();
        assert!(config.validate().is_err());
    }
}
