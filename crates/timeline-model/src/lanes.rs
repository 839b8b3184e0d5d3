//! Lane grouping and composition-mode classification.

use std::collections::BTreeMap;

use clipforge_common::config::OverlayLanePolicy;
use serde::Serialize;

use crate::clip::{Clip, LaneId, MediaKind};
use crate::timeline::Timeline;

/// How the video lanes of an export combine into one stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompositionMode {
    /// One video lane holding one clip.
    Single,
    /// One video lane holding several clips joined end to end.
    Concat,
    /// Several video lanes stacked; the base lane may itself be concatenated.
    Overlay,
}

/// An independently addressable track holding clips in timeline order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Lane {
    pub id: LaneId,
    pub kind: MediaKind,
    /// Sorted by `timeline_start`, ties broken by clip id.
    pub clips: Vec<Clip>,
}

impl Lane {
    /// Earliest clip on the lane.
    pub fn representative(&self) -> &Clip {
        &self.clips[0]
    }

    pub fn needs_concat(&self) -> bool {
        self.clips.len() > 1
    }

    pub fn start(&self) -> f64 {
        self.representative().timeline_start
    }

    pub fn end(&self) -> f64 {
        self.clips
            .iter()
            .map(|c| c.timeline_end)
            .fold(f64::NEG_INFINITY, f64::max)
    }

    /// Total trimmed media on the lane (gaps between clips are not counted).
    pub fn media_duration(&self) -> f64 {
        self.clips.iter().map(Clip::duration).sum()
    }

    /// Clips that actually take part in composition.
    ///
    /// The base lane always contributes every clip. A non-base lane under
    /// `EarliestClipOnly` is reduced to its representative clip.
    pub fn composed_clips(&self, is_base: bool, policy: OverlayLanePolicy) -> &[Clip] {
        if !is_base && policy == OverlayLanePolicy::EarliestClipOnly {
            &self.clips[..1]
        } else {
            &self.clips
        }
    }

    /// True when every clip on the lane has a resolved audio stream.
    pub fn all_clips_have_audio(&self) -> bool {
        self.clips.iter().all(|c| c.has_audio.is_present())
    }
}

/// Lanes of one export, split by media kind and classified.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LaneGroups {
    /// Video lanes in ascending lane-id order; the first is the base lane.
    pub video_lanes: Vec<Lane>,
    /// Audio lanes in ascending lane-id order.
    pub audio_lanes: Vec<Lane>,
    pub mode: CompositionMode,
    /// Some lane holds more than one clip.
    pub needs_concat: bool,
    /// More than one distinct video lane.
    pub needs_overlay: bool,
}

impl LaneGroups {
    pub fn base_lane(&self) -> Option<&Lane> {
        self.video_lanes.first()
    }

    /// Standalone audio clips in lane order, then timeline order.
    pub fn audio_clips(&self) -> impl Iterator<Item = &Clip> {
        self.audio_lanes.iter().flat_map(|lane| lane.clips.iter())
    }
}

/// Partition clips by lane, sort each lane, and classify the video lanes.
pub fn group_lanes(timeline: &Timeline) -> LaneGroups {
    let video_lanes = collect_lanes(timeline.video_clips(), MediaKind::Video);
    let audio_lanes = collect_lanes(timeline.audio_clips(), MediaKind::Audio);

    let needs_concat = video_lanes.iter().any(Lane::needs_concat);
    let needs_overlay = video_lanes.len() > 1;
    let mode = if needs_overlay {
        CompositionMode::Overlay
    } else if needs_concat {
        CompositionMode::Concat
    } else {
        CompositionMode::Single
    };

    tracing::debug!(
        video_lanes = video_lanes.len(),
        audio_lanes = audio_lanes.len(),
        ?mode,
        "Lanes grouped"
    );

    LaneGroups {
        video_lanes,
        audio_lanes,
        mode,
        needs_concat,
        needs_overlay,
    }
}

fn collect_lanes<'a>(clips: impl Iterator<Item = &'a Clip>, kind: MediaKind) -> Vec<Lane> {
    let mut by_lane: BTreeMap<LaneId, Vec<Clip>> = BTreeMap::new();
    for clip in clips {
        by_lane.entry(clip.lane_id).or_default().push(clip.clone());
    }

    by_lane
        .into_iter()
        .map(|(id, mut clips)| {
            clips.sort_by(|a, b| a.lane_order(b));
            Lane { id, kind, clips }
        })
        .collect()
}
