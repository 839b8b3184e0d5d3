//! Normalized timeline for one export.

use std::path::PathBuf;

use clipforge_common::error::ClipforgeError;
use clipforge_common::timecode::approx_same_ms;
use serde::Serialize;

use crate::clip::{AudioPresence, AudioPresenceMap, Clip, ClipId, LaneId, MediaKind};
use crate::request::{ClipInput, ExportRequest};

/// The validated clip set of one export request.
///
/// Origin and extent are derived on demand, never stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Timeline {
    clips: Vec<Clip>,
}

impl Timeline {
    /// Validate and normalize a request.
    ///
    /// Fails when no media is supplied, when only audio is supplied (the
    /// export needs a video backbone), or when any clip has invalid bounds.
    pub fn from_request(request: &ExportRequest) -> Result<Self, TimelineError> {
        if request.video_clips.is_empty() && request.audio_clips.is_empty() {
            return Err(TimelineError::NoMedia);
        }
        if request.video_clips.is_empty() {
            return Err(TimelineError::VideoRequired {
                audio_clips: request.audio_clips.len(),
            });
        }

        let mut clips = Vec::with_capacity(request.video_clips.len() + request.audio_clips.len());
        let video = request.video_clips.iter().map(|c| (c, MediaKind::Video));
        let audio = request.audio_clips.iter().map(|c| (c, MediaKind::Audio));
        for (index, (input, kind)) in video.chain(audio).enumerate() {
            clips.push(normalize_clip(ClipId(index), input, kind)?);
        }

        Ok(Self { clips })
    }

    /// Build directly from already-normalized clips (tests, replays).
    pub fn from_clips(clips: Vec<Clip>) -> Result<Self, TimelineError> {
        if clips.is_empty() {
            return Err(TimelineError::NoMedia);
        }
        if !clips.iter().any(|c| c.media_type == MediaKind::Video) {
            return Err(TimelineError::VideoRequired {
                audio_clips: clips.len(),
            });
        }
        Ok(Self { clips })
    }

    pub fn clips(&self) -> &[Clip] {
        &self.clips
    }

    pub fn clip(&self, id: ClipId) -> Option<&Clip> {
        self.clips.iter().find(|c| c.id == id)
    }

    pub fn video_clips(&self) -> impl Iterator<Item = &Clip> {
        self.clips
            .iter()
            .filter(|c| c.media_type == MediaKind::Video)
    }

    pub fn audio_clips(&self) -> impl Iterator<Item = &Clip> {
        self.clips
            .iter()
            .filter(|c| c.media_type == MediaKind::Audio)
    }

    /// `min(0, earliest timeline_start)`.
    pub fn origin(&self) -> f64 {
        self.clips
            .iter()
            .map(|c| c.timeline_start)
            .fold(0.0, f64::min)
    }

    /// Latest `timeline_end` across all clips.
    pub fn extent(&self) -> f64 {
        self.clips
            .iter()
            .map(|c| c.timeline_end)
            .fold(f64::NEG_INFINITY, f64::max)
    }

    /// Span from origin to extent.
    pub fn duration(&self) -> f64 {
        (self.extent() - self.origin()).max(0.0)
    }

    /// Copy of this timeline with resolved audio presence attached.
    ///
    /// Clips missing from `presence` stay `Unknown`.
    pub fn with_audio_presence(&self, presence: &AudioPresenceMap) -> Timeline {
        let clips = self
            .clips
            .iter()
            .map(|clip| {
                let mut annotated = clip.clone();
                if let Some(has_audio) = presence.get(&clip.id) {
                    annotated.has_audio = AudioPresence::from_probe(*has_audio);
                }
                annotated
            })
            .collect();
        Timeline { clips }
    }
}

fn normalize_clip(id: ClipId, input: &ClipInput, kind: MediaKind) -> Result<Clip, TimelineError> {
    let invalid = |message: String| TimelineError::InvalidClip {
        index: id.0,
        kind,
        message,
    };

    for (name, value) in [
        ("startTime", input.start_time),
        ("endTime", input.end_time),
        ("timelineStart", input.timeline_start),
    ] {
        if !value.is_finite() {
            return Err(invalid(format!("{name} is not a finite number")));
        }
    }
    if input.start_time < 0.0 {
        return Err(invalid(format!(
            "startTime {} is before the start of the source",
            input.start_time
        )));
    }
    if input.end_time <= input.start_time {
        return Err(invalid(format!(
            "endTime {} must be after startTime {}",
            input.end_time, input.start_time
        )));
    }
    if input.input_path.as_os_str().is_empty() {
        return Err(invalid("inputPath is empty".to_string()));
    }

    let timeline_end = input.timeline_start + (input.end_time - input.start_time);
    if let Some(supplied) = input.timeline_end {
        if !approx_same_ms(supplied, timeline_end) {
            tracing::warn!(
                clip = %id,
                supplied,
                derived = timeline_end,
                "timelineEnd disagrees with trim bounds; using derived value"
            );
        }
    }

    Ok(Clip {
        id,
        source_path: input.input_path.clone(),
        source_trim_start: input.start_time,
        source_trim_end: input.end_time,
        timeline_start: input.timeline_start,
        timeline_end,
        lane_id: LaneId(input.lane),
        media_type: kind,
        has_audio: AudioPresence::Unknown,
    })
}

/// Errors raised while validating an export request.
#[derive(Debug, thiserror::Error)]
pub enum TimelineError {
    #[error("No media supplied: the export request has no video or audio clips")]
    NoMedia,

    #[error("Export requires at least one video clip ({audio_clips} audio clip(s) supplied)")]
    VideoRequired { audio_clips: usize },

    #[error("Invalid {kind:?} clip #{index}: {message}")]
    InvalidClip {
        index: usize,
        kind: MediaKind,
        message: String,
    },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Parse error in {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

impl From<TimelineError> for ClipforgeError {
    fn from(err: TimelineError) -> Self {
        match err {
            TimelineError::Io { source, .. } => ClipforgeError::Io(source),
            TimelineError::Parse { source, .. } => ClipforgeError::Json(source),
            other => ClipforgeError::validation(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn request(video: Vec<ClipInput>, audio: Vec<ClipInput>) -> ExportRequest {
        let mut request = ExportRequest::new("/tmp/out.mp4");
        request.video_clips = video;
        request.audio_clips = audio;
        request
    }

    #[test]
    fn test_empty_request_is_no_media() {
        let err = Timeline::from_request(&request(vec![], vec![])).unwrap_err();
        assert!(matches!(err, TimelineError::NoMedia));
    }

    #[test]
    fn test_audio_only_request_requires_video() {
        let err = Timeline::from_request(&request(
            vec![],
            vec![ClipInput::new("voice.wav", 0.0, 3.0, 0.0, 0)],
        ))
        .unwrap_err();
        assert!(matches!(err, TimelineError::VideoRequired { audio_clips: 1 }));

        let converted: ClipforgeError = err.into();
        assert!(matches!(converted, ClipforgeError::Validation { .. }));
    }

    #[test]
    fn test_rejects_inverted_trim() {
        let err = Timeline::from_request(&request(
            vec![ClipInput::new("a.mp4", 4.0, 4.0, 0.0, 0)],
            vec![],
        ))
        .unwrap_err();
        assert!(matches!(err, TimelineError::InvalidClip { index: 0, .. }));
    }

    #[test]
    fn test_rejects_non_finite_times() {
        let err = Timeline::from_request(&request(
            vec![ClipInput::new("a.mp4", 0.0, 2.0, f64::NAN, 0)],
            vec![],
        ))
        .unwrap_err();
        assert!(err.to_string().contains("timelineStart"));
    }

    #[test]
    fn test_ids_assigned_video_first() {
        let timeline = Timeline::from_request(&request(
            vec![
                ClipInput::new("a.mp4", 0.0, 2.0, 0.0, 0),
                ClipInput::new("b.mp4", 0.0, 2.0, 2.0, 0),
            ],
            vec![ClipInput::new("m.wav", 0.0, 2.0, 0.0, 0)],
        ))
        .unwrap();
        let ids: Vec<(usize, MediaKind)> = timeline
            .clips()
            .iter()
            .map(|c| (c.id.0, c.media_type))
            .collect();
        assert_eq!(
            ids,
            vec![
                (0, MediaKind::Video),
                (1, MediaKind::Video),
                (2, MediaKind::Audio)
            ]
        );
    }

    #[test]
    fn test_timeline_end_is_derived_from_trim() {
        let mut input = ClipInput::new("a.mp4", 2.0, 5.0, 1.0, 0);
        input.timeline_end = Some(99.0);
        let timeline = Timeline::from_request(&request(vec![input], vec![])).unwrap();
        assert!((timeline.clips()[0].timeline_end - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_origin_clamps_to_zero_and_extent_covers_all() {
        let timeline = Timeline::from_request(&request(
            vec![ClipInput::new("a.mp4", 0.0, 6.0, 1.5, 0)],
            vec![ClipInput::new("m.wav", 0.0, 10.0, 2.0, 1)],
        ))
        .unwrap();
        assert_eq!(timeline.origin(), 0.0);
        assert!((timeline.extent() - 12.0).abs() < 1e-9);
        assert!((timeline.duration() - 12.0).abs() < 1e-9);
    }

    #[test]
    fn test_negative_start_moves_origin() {
        let timeline = Timeline::from_request(&request(
            vec![ClipInput::new("a.mp4", 0.0, 6.0, -2.0, 0)],
            vec![],
        ))
        .unwrap();
        assert_eq!(timeline.origin(), -2.0);
    }

    #[test]
    fn test_with_audio_presence_annotates_copy() {
        let timeline = Timeline::from_request(&request(
            vec![
                ClipInput::new("a.mp4", 0.0, 2.0, 0.0, 0),
                ClipInput::new("b.mp4", 0.0, 2.0, 2.0, 0),
            ],
            vec![],
        ))
        .unwrap();
        let presence = AudioPresenceMap::from([(ClipId(0), true)]);
        let annotated = timeline.with_audio_presence(&presence);

        assert_eq!(annotated.clips()[0].has_audio, AudioPresence::Present);
        assert_eq!(annotated.clips()[1].has_audio, AudioPresence::Unknown);
        assert_eq!(timeline.clips()[0].has_audio, AudioPresence::Unknown);
    }

    proptest! {
        #[test]
        fn prop_origin_is_min_of_zero_and_starts(
            starts in proptest::collection::vec(-100.0f64..100.0, 1..12)
        ) {
            let video = starts
                .iter()
                .enumerate()
                .map(|(i, s)| ClipInput::new(format!("{i}.mp4"), 0.0, 1.0, *s, (i % 3) as u32))
                .collect();
            let timeline = Timeline::from_request(&request(video, vec![])).unwrap();
            let expected = starts.iter().cloned().fold(0.0, f64::min);
            prop_assert_eq!(timeline.origin(), expected);
            prop_assert!(timeline.origin() <= 0.0);
        }
    }
}
