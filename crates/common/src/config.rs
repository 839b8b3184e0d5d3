//! Application configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{ClipforgeError, ClipforgeResult};

/// Global application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// External encoder and prober settings.
    pub encoder: EncoderConfig,

    /// Fixed output normalization targets.
    pub output: OutputDefaults,

    /// Multi-lane composition settings.
    pub composition: CompositionConfig,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// External tool locations and workspace settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    /// Encoding engine binary (ffmpeg-compatible).
    pub ffmpeg_path: PathBuf,

    /// Media prober binary (ffprobe-compatible).
    pub ffprobe_path: PathBuf,

    /// Directory under which per-export temporary workspaces are created.
    /// `None` uses the system temp directory.
    pub temp_root: Option<PathBuf>,

    /// Write a plan/command debug report next to the output file.
    pub write_debug_report: bool,
}

/// Output encoding parameters applied to every export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputDefaults {
    /// Video encoder name.
    pub video_codec: String,

    /// Encoder speed/quality preset.
    pub preset: String,

    /// Constant-quality factor.
    pub crf: u8,

    /// Audio encoder name.
    pub audio_codec: String,

    /// Audio bitrate in kbps.
    pub audio_bitrate_kbps: u32,

    /// Output frame rate.
    pub frame_rate: u32,

    /// Output pixel format.
    pub pixel_format: String,
}

/// How non-base video lanes are composed when overlaying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OverlayLanePolicy {
    /// Concatenate every clip of the lane before compositing it.
    #[default]
    ConcatFull,
    /// Composite only the lane's earliest clip and ignore the rest.
    EarliestClipOnly,
}

/// Multi-lane composition settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompositionConfig {
    /// Distance in pixels from the bottom-right corner for overlay lanes.
    pub overlay_margin_px: u32,

    /// Overlay sources are scaled to `1 / overlay_scale_divisor` of their width.
    pub overlay_scale_divisor: u32,

    /// Treatment of multi-clip overlay lanes.
    pub overlay_lanes: OverlayLanePolicy,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "clipforge=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,

    /// Optional log file path.
    pub file: Option<PathBuf>,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_path: PathBuf::from("ffprobe"),
            temp_root: None,
            write_debug_report: false,
        }
    }
}

impl EncoderConfig {
    /// Resolved temp root.
    pub fn temp_root(&self) -> PathBuf {
        self.temp_root.clone().unwrap_or_else(std::env::temp_dir)
    }
}

impl Default for OutputDefaults {
    fn default() -> Self {
        Self {
            video_codec: "libx264".to_string(),
            preset: "medium".to_string(),
            crf: 23,
            audio_codec: "aac".to_string(),
            audio_bitrate_kbps: 192,
            frame_rate: 30,
            pixel_format: "yuv420p".to_string(),
        }
    }
}

impl Default for CompositionConfig {
    fn default() -> Self {
        Self {
            overlay_margin_px: 10,
            overlay_scale_divisor: 4,
            overlay_lanes: OverlayLanePolicy::ConcatFull,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl AppConfig {
    /// Load config from the standard location, falling back to defaults.
    pub fn load() -> Self {
        Self::load_from(&config_file_path())
    }

    /// Load config from an explicit path, falling back to defaults.
    pub fn load_from(config_path: &Path) -> Self {
        if config_path.exists() {
            match std::fs::read_to_string(config_path) {
                Ok(content) => match serde_json::from_str(&content) {
                    Ok(config) => return config,
                    Err(e) => {
                        tracing::warn!("Failed to parse config at {:?}: {}", config_path, e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to read config at {:?}: {}", config_path, e);
                }
            }
        }
        Self::default()
    }

    /// Reject settings no export can be encoded with.
    pub fn validate(&self) -> ClipforgeResult<()> {
        let output = &self.output;
        for (key, value) in [
            ("output.video_codec", &output.video_codec),
            ("output.preset", &output.preset),
            ("output.audio_codec", &output.audio_codec),
            ("output.pixel_format", &output.pixel_format),
        ] {
            if value.trim().is_empty() {
                return Err(ClipforgeError::config(format!("{key} must not be empty")));
            }
        }
        if output.frame_rate == 0 {
            return Err(ClipforgeError::config("output.frame_rate must be positive"));
        }
        if output.audio_bitrate_kbps == 0 {
            return Err(ClipforgeError::config(
                "output.audio_bitrate_kbps must be positive",
            ));
        }
        if self.composition.overlay_scale_divisor == 0 {
            return Err(ClipforgeError::config(
                "composition.overlay_scale_divisor must be at least 1",
            ));
        }
        if self.encoder.ffmpeg_path.as_os_str().is_empty() {
            return Err(ClipforgeError::config("encoder.ffmpeg_path must not be empty"));
        }
        Ok(())
    }

    /// Save config to the standard location.
    pub fn save(&self) -> Result<(), std::io::Error> {
        self.save_to(&config_file_path())
    }

    /// Save config to an explicit path.
    pub fn save_to(&self, config_path: &Path) -> Result<(), std::io::Error> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(config_path, json)
    }
}

/// Standard config file location.
pub fn config_file_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("clipforge").join("config.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_output_normalization() {
        let config = AppConfig::default();
        assert_eq!(config.output.frame_rate, 30);
        assert_eq!(config.output.pixel_format, "yuv420p");
        assert_eq!(config.output.crf, 23);
        assert_eq!(
            config.composition.overlay_lanes,
            OverlayLanePolicy::ConcatFull
        );
    }

    #[test]
    fn test_validate_rejects_unusable_output_settings() {
        assert!(AppConfig::default().validate().is_ok());

        let mut config = AppConfig::default();
        config.output.frame_rate = 0;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ClipforgeError::Config { .. }));
        assert!(err.to_string().contains("frame_rate"));

        let mut config = AppConfig::default();
        config.composition.overlay_scale_divisor = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.output.audio_codec = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let parsed: AppConfig =
            serde_json::from_str(r#"{"composition":{"overlay_lanes":"earliest_clip_only"}}"#)
                .unwrap();
        assert_eq!(
            parsed.composition.overlay_lanes,
            OverlayLanePolicy::EarliestClipOnly
        );
        assert_eq!(parsed.composition.overlay_margin_px, 10);
        assert_eq!(parsed.encoder.ffmpeg_path, PathBuf::from("ffmpeg"));
    }

    #[test]
    fn test_save_and_load_roundtrip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut config = AppConfig::default();
        config.output.crf = 18;
        config.save_to(&path).unwrap();

        let loaded = AppConfig::load_from(&path);
        assert_eq!(loaded.output.crf, 18);
    }

    #[test]
    fn test_invalid_config_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();

        let loaded = AppConfig::load_from(&path);
        assert_eq!(loaded.output.crf, 23);
    }
}
