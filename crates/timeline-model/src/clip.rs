//! Clip and lane identity types.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Stable clip identifier, assigned during normalization.
///
/// Video clips take ids `0..n` in request order, audio clips continue
/// from `n`. Used as the ordering tie-break inside a lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClipId(pub usize);

impl fmt::Display for ClipId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "clip{}", self.0)
    }
}

/// Lane (track) identifier as supplied by the editor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LaneId(pub u32);

impl fmt::Display for LaneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lane{}", self.0)
    }
}

/// What kind of media a clip (or lane) carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Audio,
}

impl MediaKind {
    /// Stream specifier letter used by the encoder (`v` / `a`).
    pub fn stream_letter(self) -> char {
        match self {
            MediaKind::Video => 'v',
            MediaKind::Audio => 'a',
        }
    }
}

/// Audio stream presence for a clip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AudioPresence {
    /// Not probed yet.
    #[default]
    Unknown,
    Present,
    Absent,
}

impl AudioPresence {
    pub fn from_probe(has_audio: bool) -> Self {
        if has_audio {
            AudioPresence::Present
        } else {
            AudioPresence::Absent
        }
    }

    /// Unknown counts as absent.
    pub fn is_present(self) -> bool {
        self == AudioPresence::Present
    }
}

/// Per-clip audio presence resolved for one export.
pub type AudioPresenceMap = BTreeMap<ClipId, bool>;

/// A trimmed reference to a source media file placed on a lane.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Clip {
    pub id: ClipId,

    /// Source media file.
    pub source_path: PathBuf,

    /// Trim in-point within the source (seconds).
    pub source_trim_start: f64,

    /// Trim out-point within the source (seconds), strictly after the in-point.
    pub source_trim_end: f64,

    /// Placement on the timeline (seconds, may be negative).
    pub timeline_start: f64,

    /// Always `timeline_start + trimmed duration`.
    pub timeline_end: f64,

    pub lane_id: LaneId,

    pub media_type: MediaKind,

    pub has_audio: AudioPresence,
}

impl Clip {
    /// Trimmed duration in seconds.
    pub fn duration(&self) -> f64 {
        self.source_trim_end - self.source_trim_start
    }

    /// Ordering used within a lane: timeline start, then id.
    pub fn lane_order(&self, other: &Clip) -> std::cmp::Ordering {
        self.timeline_start
            .total_cmp(&other.timeline_start)
            .then(self.id.cmp(&other.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clip(id: usize, start: f64) -> Clip {
        Clip {
            id: ClipId(id),
            source_path: PathBuf::from("a.mp4"),
            source_trim_start: 0.0,
            source_trim_end: 1.0,
            timeline_start: start,
            timeline_end: start + 1.0,
            lane_id: LaneId(0),
            media_type: MediaKind::Video,
            has_audio: AudioPresence::Unknown,
        }
    }

    #[test]
    fn test_lane_order_breaks_ties_by_id() {
        let a = clip(3, 1.0);
        let b = clip(1, 1.0);
        assert_eq!(a.lane_order(&b), std::cmp::Ordering::Greater);
        assert_eq!(clip(0, 0.5).lane_order(&b), std::cmp::Ordering::Less);
    }

    #[test]
    fn test_unknown_presence_is_not_audio() {
        assert!(!AudioPresence::Unknown.is_present());
        assert!(AudioPresence::from_probe(true).is_present());
        assert!(!AudioPresence::from_probe(false).is_present());
    }
}
