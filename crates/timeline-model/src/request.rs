//! Export request wire format.
//!
//! This is what the editor hands over for one export. Field names follow
//! the editor's camelCase JSON.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::timeline::TimelineError;

/// One clip as placed by the editor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClipInput {
    /// Source media file.
    pub input_path: PathBuf,

    /// Trim in-point within the source (seconds).
    pub start_time: f64,

    /// Trim out-point within the source (seconds).
    pub end_time: f64,

    /// Timeline placement start (seconds).
    pub timeline_start: f64,

    /// Timeline placement end (seconds). Recomputed from the trim bounds.
    #[serde(default)]
    pub timeline_end: Option<f64>,

    /// Lane (track) index.
    #[serde(default)]
    pub lane: u32,
}

impl ClipInput {
    /// Convenience constructor with `timeline_end` derived from the trim.
    pub fn new(
        input_path: impl Into<PathBuf>,
        start_time: f64,
        end_time: f64,
        timeline_start: f64,
        lane: u32,
    ) -> Self {
        Self {
            input_path: input_path.into(),
            start_time,
            end_time,
            timeline_start,
            timeline_end: Some(timeline_start + (end_time - start_time)),
            lane,
        }
    }
}

/// Optional output downscale target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "Option<u32>", into = "Option<u32>")]
pub enum ScaleTarget {
    /// Keep source resolution.
    #[default]
    None,
    /// Fit within 1280x720.
    P720,
    /// Fit within 1920x1080.
    P1080,
}

impl ScaleTarget {
    /// Bounding box `(width, height)` when a target is set.
    pub fn bounds(self) -> Option<(u32, u32)> {
        match self {
            ScaleTarget::None => None,
            ScaleTarget::P720 => Some((1280, 720)),
            ScaleTarget::P1080 => Some((1920, 1080)),
        }
    }

    pub fn parse(value: &str) -> Result<Self, String> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Ok(ScaleTarget::None),
            "720" | "720p" => Ok(ScaleTarget::P720),
            "1080" | "1080p" => Ok(ScaleTarget::P1080),
            other => Err(format!("Unknown scale target: {other}. Use: none, 720, 1080")),
        }
    }
}

impl TryFrom<Option<u32>> for ScaleTarget {
    type Error = String;

    fn try_from(value: Option<u32>) -> Result<Self, Self::Error> {
        match value {
            None | Some(0) => Ok(ScaleTarget::None),
            Some(720) => Ok(ScaleTarget::P720),
            Some(1080) => Ok(ScaleTarget::P1080),
            Some(other) => Err(format!(
                "unsupported scaleTarget {other}, expected 720, 1080 or null"
            )),
        }
    }
}

impl From<ScaleTarget> for Option<u32> {
    fn from(value: ScaleTarget) -> Self {
        match value {
            ScaleTarget::None => None,
            ScaleTarget::P720 => Some(720),
            ScaleTarget::P1080 => Some(1080),
        }
    }
}

/// One export request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportRequest {
    /// Destination file.
    pub output_path: PathBuf,

    #[serde(default)]
    pub video_clips: Vec<ClipInput>,

    #[serde(default)]
    pub audio_clips: Vec<ClipInput>,

    #[serde(default)]
    pub scale_target: ScaleTarget,
}

impl ExportRequest {
    pub fn new(output_path: impl Into<PathBuf>) -> Self {
        Self {
            output_path: output_path.into(),
            video_clips: vec![],
            audio_clips: vec![],
            scale_target: ScaleTarget::None,
        }
    }

    /// Load a request from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, TimelineError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| TimelineError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        serde_json::from_str(&json).map_err(|e| TimelineError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Save a request as pretty JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), TimelineError> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self).map_err(|e| TimelineError::Parse {
            path: path.to_path_buf(),
            source: e,
        })?;
        std::fs::write(path, json).map_err(|e| TimelineError::Io {
            path: path.to_path_buf(),
            source: e,
        })
    }
}
