//! Audio resolution: which lanes and clips contribute audio, how far each
//! branch is delayed against the timeline origin, and how branches are mixed.

use serde::Serialize;

use clipforge_common::config::OverlayLanePolicy;
use clipforge_common::timecode::secs_to_delay_ms;
use clipforge_timeline_model::{Clip, ClipId, LaneGroups, LaneId};

/// Where an audio branch comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "id")]
pub enum BranchSource {
    /// The (possibly concatenated) audio of a video lane.
    VideoLane(LaneId),
    /// A standalone audio clip.
    AudioClip(ClipId),
}

/// One synchronized audio stream prior to mixing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AudioBranch {
    pub source: BranchSource,
    /// Earliest clip of the branch; its start drives the delay.
    pub representative: ClipId,
    pub delay_ms: u64,
    /// Trimmed media length carried by the branch.
    pub duration_secs: f64,
    pub has_audio: bool,
}

/// How the mix duration is chosen when branches differ in length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MixDuration {
    /// Run until the longest branch ends; shorter ones are silence-padded.
    Longest,
}

impl MixDuration {
    pub fn as_str(self) -> &'static str {
        match self {
            MixDuration::Longest => "longest",
        }
    }
}

/// How active branches end up in the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "strategy")]
pub enum MixStrategy {
    /// No audio in the output.
    None,
    /// Exactly one branch, mapped straight through.
    Passthrough,
    /// Several branches mixed into one.
    Mix { inputs: usize, duration: MixDuration },
}

/// Resolved audio for one export.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AudioPlan {
    /// Every candidate branch, including ones without audio.
    pub branches: Vec<AudioBranch>,
    pub strategy: MixStrategy,
}

impl AudioPlan {
    /// Branches that actually carry audio, in plan order.
    pub fn active(&self) -> impl Iterator<Item = &AudioBranch> {
        self.branches.iter().filter(|b| b.has_audio)
    }

    pub fn active_count(&self) -> usize {
        self.active().count()
    }

    pub fn has_audio(&self) -> bool {
        self.strategy != MixStrategy::None
    }
}

/// Resolve audio branches from lanes whose clips carry resolved presence.
///
/// Video lanes come first (lane order), then standalone audio clips. A
/// concatenated lane contributes audio only when every member clip has
/// audio, since the concat stage requires a uniform stream layout.
pub fn resolve_audio(groups: &LaneGroups, origin: f64, policy: OverlayLanePolicy) -> AudioPlan {
    let mut branches = Vec::new();

    for (index, lane) in groups
        .video_lanes
        .iter()
        .filter(|lane| !lane.clips.is_empty())
        .enumerate()
    {
        let clips = lane.composed_clips(index == 0, policy);
        let has_audio = if clips.len() > 1 {
            clips.iter().all(|c| c.has_audio.is_present())
        } else {
            clips[0].has_audio.is_present()
        };
        if clips.len() > 1 && !has_audio && clips.iter().any(|c| c.has_audio.is_present()) {
            tracing::info!(
                lane = %lane.id,
                clips = clips.len(),
                "Dropping lane audio: not every concatenated clip has an audio stream"
            );
        }
        branches.push(branch_for(
            BranchSource::VideoLane(lane.id),
            clips,
            origin,
            has_audio,
        ));
    }

    for clip in groups.audio_clips() {
        let has_audio = clip.has_audio.is_present();
        if !has_audio {
            tracing::warn!(
                clip = %clip.id,
                path = %clip.source_path.display(),
                "Skipping audio clip without a usable audio stream"
            );
        }
        branches.push(branch_for(
            BranchSource::AudioClip(clip.id),
            std::slice::from_ref(clip),
            origin,
            has_audio,
        ));
    }

    let active = branches.iter().filter(|b| b.has_audio).count();
    let strategy = match active {
        0 => MixStrategy::None,
        1 => MixStrategy::Passthrough,
        n => MixStrategy::Mix {
            inputs: n,
            duration: MixDuration::Longest,
        },
    };

    tracing::debug!(candidates = branches.len(), active, ?strategy, "Audio resolved");

    AudioPlan { branches, strategy }
}

fn branch_for(source: BranchSource, clips: &[Clip], origin: f64, has_audio: bool) -> AudioBranch {
    let representative = &clips[0];
    AudioBranch {
        source,
        representative: representative.id,
        delay_ms: secs_to_delay_ms(representative.timeline_start - origin),
        duration_secs: clips.iter().map(Clip::duration).sum(),
        has_audio,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clipforge_timeline_model::{
        group_lanes, AudioPresenceMap, ClipInput, ExportRequest, Timeline,
    };

    fn resolve(
        video: Vec<ClipInput>,
        audio: Vec<ClipInput>,
        with_audio: &[usize],
        policy: OverlayLanePolicy,
    ) -> AudioPlan {
        let mut request = ExportRequest::new("/tmp/out.mp4");
        request.video_clips = video;
        request.audio_clips = audio;
        let timeline = Timeline::from_request(&request).unwrap();
        let presence: AudioPresenceMap = timeline
            .clips()
            .iter()
            .map(|c| (c.id, with_audio.contains(&c.id.0)))
            .collect();
        let annotated = timeline.with_audio_presence(&presence);
        resolve_audio(&group_lanes(&annotated), annotated.origin(), policy)
    }

    #[test]
    fn test_concat_lane_with_full_audio_has_branch_at_zero() {
        let plan = resolve(
            vec![
                ClipInput::new("a.mp4", 0.0, 5.0, 0.0, 0),
                ClipInput::new("b.mp4", 0.0, 3.0, 5.0, 0),
            ],
            vec![],
            &[0, 1],
            OverlayLanePolicy::ConcatFull,
        );
        assert_eq!(plan.active_count(), 1);
        let branch = plan.active().next().unwrap();
        assert_eq!(branch.delay_ms, 0);
        assert!((branch.duration_secs - 8.0).abs() < 1e-9);
        assert_eq!(plan.strategy, MixStrategy::Passthrough);
    }

    #[test]
    fn test_concat_lane_with_partial_audio_drops_branch() {
        let plan = resolve(
            vec![
                ClipInput::new("a.mp4", 0.0, 5.0, 0.0, 0),
                ClipInput::new("b.mp4", 0.0, 3.0, 5.0, 0),
            ],
            vec![],
            &[0],
            OverlayLanePolicy::ConcatFull,
        );
        assert_eq!(plan.active_count(), 0);
        assert_eq!(plan.strategy, MixStrategy::None);
        assert!(!plan.has_audio());
    }

    #[test]
    fn test_delay_measured_from_origin() {
        let plan = resolve(
            vec![ClipInput::new("a.mp4", 0.0, 5.0, 2.0, 0)],
            vec![],
            &[0],
            OverlayLanePolicy::ConcatFull,
        );
        assert_eq!(plan.branches[0].delay_ms, 2000);
    }

    #[test]
    fn test_negative_origin_shifts_every_delay() {
        let plan = resolve(
            vec![ClipInput::new("a.mp4", 0.0, 5.0, -1.0, 0)],
            vec![ClipInput::new("m.wav", 0.0, 5.0, 0.5, 0)],
            &[0, 1],
            OverlayLanePolicy::ConcatFull,
        );
        let delays: Vec<u64> = plan.active().map(|b| b.delay_ms).collect();
        assert_eq!(delays, vec![0, 1500]);
    }

    #[test]
    fn test_two_lanes_mix_longest() {
        let plan = resolve(
            vec![
                ClipInput::new("base.mp4", 0.0, 6.0, 0.0, 0),
                ClipInput::new("top.mp4", 0.0, 3.0, 1.0, 1),
            ],
            vec![],
            &[0, 1],
            OverlayLanePolicy::ConcatFull,
        );
        let delays: Vec<u64> = plan.active().map(|b| b.delay_ms).collect();
        assert_eq!(delays, vec![0, 1000]);
        assert_eq!(
            plan.strategy,
            MixStrategy::Mix {
                inputs: 2,
                duration: MixDuration::Longest
            }
        );
    }

    #[test]
    fn test_audio_clips_without_stream_are_skipped() {
        let plan = resolve(
            vec![ClipInput::new("v.mp4", 0.0, 6.0, 0.0, 0)],
            vec![
                ClipInput::new("music.wav", 0.0, 6.0, 0.0, 0),
                ClipInput::new("empty.wav", 0.0, 6.0, 0.0, 1),
            ],
            &[1],
            OverlayLanePolicy::ConcatFull,
        );
        assert_eq!(plan.branches.len(), 3);
        assert_eq!(plan.active_count(), 1);
        assert_eq!(
            plan.active().next().unwrap().source,
            BranchSource::AudioClip(ClipId(1))
        );
    }

    #[test]
    fn test_earliest_clip_policy_uses_representative_audio_on_overlay_lane() {
        let video = vec![
            ClipInput::new("base.mp4", 0.0, 6.0, 0.0, 0),
            ClipInput::new("o1.mp4", 0.0, 1.0, 1.0, 1),
            ClipInput::new("o2.mp4", 0.0, 1.0, 3.0, 1),
        ];
        let truncated = resolve(
            video.clone(),
            vec![],
            &[1],
            OverlayLanePolicy::EarliestClipOnly,
        );
        assert_eq!(truncated.active_count(), 1);

        let full = resolve(video, vec![], &[1], OverlayLanePolicy::ConcatFull);
        assert_eq!(full.active_count(), 0);
    }
}
