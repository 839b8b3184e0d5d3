//! Execution plan: the explicit, ordered operation graph compiled from a
//! grouped timeline and its resolved audio.
//!
//! Building a plan is pure. Identical lanes, trims, audio facts and options
//! always yield the same operations in the same order; only the output path
//! (and temp files realized later by the executor) differ between runs.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use clipforge_common::config::{AppConfig, OutputDefaults, OverlayLanePolicy};
use clipforge_common::error::{ClipforgeError, ClipforgeResult};
use clipforge_common::timecode::secs_to_delay_ms;
use clipforge_timeline_model::{
    Clip, ClipId, CompositionMode, LaneGroups, LaneId, MediaKind, ScaleTarget,
};

use crate::audio::{AudioPlan, BranchSource, MixDuration, MixStrategy};

/// Label of a stream inside the encoder's filter graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum StreamRef {
    /// A stream of one of the encoder inputs (`0:v`, `2:a`).
    Input { index: usize, kind: MediaKind },
    /// An intermediate filter output (`ov1`, `a0`, `aout`).
    Node { name: String },
}

impl StreamRef {
    pub fn input(index: usize, kind: MediaKind) -> Self {
        StreamRef::Input { index, kind }
    }

    pub fn node(name: impl Into<String>) -> Self {
        StreamRef::Node { name: name.into() }
    }

    /// Bracketed pad label for use inside a filter graph.
    pub fn pad(&self) -> String {
        format!("[{self}]")
    }

    /// Argument for `-map`: bare specifier for inputs, bracketed for nodes.
    pub fn map_arg(&self) -> String {
        match self {
            StreamRef::Input { .. } => self.to_string(),
            StreamRef::Node { .. } => self.pad(),
        }
    }
}

impl fmt::Display for StreamRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamRef::Input { index, kind } => write!(f, "{index}:{}", kind.stream_letter()),
            StreamRef::Node { name } => f.write_str(name),
        }
    }
}

/// Where an encoder input comes from.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum InputSource {
    /// A source file read through an input-side trim.
    File {
        path: PathBuf,
        trim_start: f64,
        trim_end: f64,
    },
    /// The concat list realized for a lane by its `Concat` operation.
    ConcatList { lane: LaneId },
}

/// One input of the final encoder invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanInput {
    pub index: usize,
    pub kind: MediaKind,
    pub source: InputSource,
}

/// One step of the plan.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "op")]
pub enum Operation {
    /// Trim one clip and re-encode it to the common intermediate profile.
    Trim {
        segment: usize,
        lane: LaneId,
        clip: ClipId,
        source: PathBuf,
        start_secs: f64,
        end_secs: f64,
        keep_audio: bool,
    },
    /// Join normalized segments of a lane, in timeline order, into one input.
    Concat {
        lane: LaneId,
        segments: Vec<usize>,
        input: usize,
        with_audio: bool,
    },
    /// Composite `overlay` on top of `base` at the bottom-right corner.
    /// `offset_ms` is measured from the timeline origin.
    Overlay {
        lane: LaneId,
        base: StreamRef,
        overlay: StreamRef,
        offset_ms: u64,
        margin_px: u32,
        scale_divisor: u32,
        output: StreamRef,
    },
    /// Prefix an audio branch with `delay_ms` of silence.
    Delay {
        branch: BranchSource,
        input: StreamRef,
        delay_ms: u64,
        output: StreamRef,
    },
    /// Mix delayed branches into one stream.
    Mix {
        inputs: Vec<StreamRef>,
        duration: MixDuration,
        output: StreamRef,
    },
    /// Select the final streams. `video_lead_in_ms` of black is padded
    /// onto the base lane before any overlay is composited.
    Map {
        video: StreamRef,
        audio: Option<StreamRef>,
        video_lead_in_ms: u64,
    },
}

impl Operation {
    pub fn kind(&self) -> &'static str {
        match self {
            Operation::Trim { .. } => "trim",
            Operation::Concat { .. } => "concat",
            Operation::Overlay { .. } => "overlay",
            Operation::Delay { .. } => "delay",
            Operation::Mix { .. } => "mix",
            Operation::Map { .. } => "map",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VideoCodecParams {
    pub codec: String,
    pub preset: String,
    pub crf: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AudioCodecParams {
    pub codec: String,
    pub bitrate_kbps: u32,
}

/// Final encoding parameters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputSpec {
    pub video: VideoCodecParams,
    /// `None` when no audio branch survives.
    pub audio: Option<AudioCodecParams>,
    pub frame_rate: u32,
    pub pixel_format: String,
    pub scale_target: ScaleTarget,
}

/// Options that shape the plan beyond the timeline itself.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanOptions {
    pub scale_target: ScaleTarget,
    pub overlay_lanes: OverlayLanePolicy,
    pub overlay_margin_px: u32,
    pub overlay_scale_divisor: u32,
    pub output: OutputDefaults,
}

impl PlanOptions {
    pub fn from_config(config: &AppConfig, scale_target: ScaleTarget) -> Self {
        Self {
            scale_target,
            overlay_lanes: config.composition.overlay_lanes,
            overlay_margin_px: config.composition.overlay_margin_px,
            overlay_scale_divisor: config.composition.overlay_scale_divisor.max(1),
            output: config.output.clone(),
        }
    }
}

impl Default for PlanOptions {
    fn default() -> Self {
        Self::from_config(&AppConfig::default(), ScaleTarget::None)
    }
}

/// The complete, immutable plan for one export.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionPlan {
    pub output_path: PathBuf,
    pub mode: CompositionMode,
    pub inputs: Vec<PlanInput>,
    pub operations: Vec<Operation>,
    pub mix: MixStrategy,
    pub output: OutputSpec,
    /// Expected output length, used for progress.
    pub expected_duration_secs: f64,
}

impl ExecutionPlan {
    pub fn trims(&self) -> impl Iterator<Item = &Operation> {
        self.operations
            .iter()
            .filter(|op| matches!(op, Operation::Trim { .. }))
    }

    pub fn concats(&self) -> impl Iterator<Item = &Operation> {
        self.operations
            .iter()
            .filter(|op| matches!(op, Operation::Concat { .. }))
    }

    pub fn count(&self, kind: &str) -> usize {
        self.operations.iter().filter(|op| op.kind() == kind).count()
    }

    /// Sequence of operation kinds, e.g. `["trim", "trim", "concat", ...]`.
    pub fn kinds(&self) -> Vec<&'static str> {
        self.operations.iter().map(Operation::kind).collect()
    }

    /// The final `Map` operation.
    pub fn map(&self) -> Option<&Operation> {
        self.operations
            .iter()
            .rev()
            .find(|op| matches!(op, Operation::Map { .. }))
    }

    pub fn has_audio(&self) -> bool {
        self.output.audio.is_some()
    }

    /// Structural signature: every operation, input and output parameter,
    /// excluding the output path.
    pub fn signature(&self) -> u64 {
        let body = serde_json::json!({
            "mode": self.mode,
            "inputs": self.inputs,
            "operations": self.operations,
            "mix": self.mix,
            "output": self.output,
        });
        fnv1a_64(&body.to_string())
    }
}

fn fnv1a_64(input: &str) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in input.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

/// Compile lanes and resolved audio into an execution plan.
///
/// `groups` must hold clips annotated with audio presence, `origin` is the
/// timeline origin the audio delays were measured against. Every video
/// offset is measured against the same origin.
pub fn build_plan(
    output_path: impl Into<PathBuf>,
    groups: &LaneGroups,
    audio: &AudioPlan,
    origin: f64,
    options: &PlanOptions,
) -> ClipforgeResult<ExecutionPlan> {
    if groups.video_lanes.iter().all(|lane| lane.clips.is_empty()) {
        return Err(ClipforgeError::validation(
            "At least one video clip is required to build a plan",
        ));
    }

    let mut builder = PlanBuilder::default();
    let policy = options.overlay_lanes;

    // Video lanes: one encoder input each, realized from a file or a concat list.
    let mut lane_streams: Vec<(LaneId, usize, f64, f64)> = Vec::new();
    for (index, lane) in groups
        .video_lanes
        .iter()
        .filter(|lane| !lane.clips.is_empty())
        .enumerate()
    {
        let clips = lane.composed_clips(index == 0, policy);
        if clips.len() < lane.clips.len() {
            tracing::warn!(
                lane = %lane.id,
                ignored = lane.clips.len() - clips.len(),
                "Overlay lane reduced to its earliest clip"
            );
        }
        let lane_has_audio = audio
            .active()
            .any(|b| b.source == BranchSource::VideoLane(lane.id));
        let input = if clips.len() > 1 {
            builder.concat_lane(lane.id, clips, lane_has_audio)
        } else {
            builder.file_input(&clips[0], MediaKind::Video)
        };
        let duration: f64 = clips.iter().map(Clip::duration).sum();
        lane_streams.push((lane.id, input, clips[0].timeline_start, duration));
    }

    // Standalone audio clips follow the video inputs.
    let mut audio_clip_inputs = Vec::new();
    for clip in groups.audio_clips() {
        if audio
            .active()
            .any(|b| b.source == BranchSource::AudioClip(clip.id))
        {
            audio_clip_inputs.push((clip.id, builder.file_input(clip, MediaKind::Audio)));
        }
    }

    // Overlay fold: the base lane, padded to start at the origin, is the
    // background and each further lane is composited onto the running result.
    let (_, base_input, base_start, base_duration) = lane_streams[0];
    let mut video = StreamRef::input(base_input, MediaKind::Video);
    for (step, (lane, input, start, _)) in lane_streams.iter().enumerate().skip(1) {
        let output = StreamRef::node(format!("ov{step}"));
        builder.operations.push(Operation::Overlay {
            lane: *lane,
            base: video,
            overlay: StreamRef::input(*input, MediaKind::Video),
            offset_ms: secs_to_delay_ms(start - origin),
            margin_px: options.overlay_margin_px,
            scale_divisor: options.overlay_scale_divisor,
            output: output.clone(),
        });
        video = output;
    }

    // One delay per active branch.
    let mut delayed = Vec::new();
    for (n, branch) in audio.active().enumerate() {
        let input_index = match branch.source {
            BranchSource::VideoLane(lane) => lane_streams
                .iter()
                .find(|(id, ..)| *id == lane)
                .map(|(_, input, ..)| *input),
            BranchSource::AudioClip(clip) => audio_clip_inputs
                .iter()
                .find(|(id, _)| *id == clip)
                .map(|(_, input)| *input),
        };
        let Some(input_index) = input_index else {
            continue;
        };
        let output = StreamRef::node(format!("a{n}"));
        builder.operations.push(Operation::Delay {
            branch: branch.source,
            input: StreamRef::input(input_index, MediaKind::Audio),
            delay_ms: branch.delay_ms,
            output: output.clone(),
        });
        delayed.push(output);
    }

    let final_audio = match audio.strategy {
        MixStrategy::None => None,
        MixStrategy::Passthrough => delayed.first().cloned(),
        MixStrategy::Mix { duration, .. } => {
            let output = StreamRef::node("aout");
            builder.operations.push(Operation::Mix {
                inputs: delayed.clone(),
                duration,
                output: output.clone(),
            });
            Some(output)
        }
    };

    let video_lead_in_ms = secs_to_delay_ms(base_start - origin);
    builder.operations.push(Operation::Map {
        video,
        audio: final_audio.clone(),
        video_lead_in_ms,
    });

    let video_end = video_lead_in_ms as f64 / 1000.0 + base_duration;
    let audio_end = audio
        .active()
        .map(|b| b.delay_ms as f64 / 1000.0 + b.duration_secs)
        .fold(0.0, f64::max);
    let expected_duration_secs = if final_audio.is_some() {
        video_end.max(audio_end)
    } else {
        video_end
    };

    let output = OutputSpec {
        video: VideoCodecParams {
            codec: options.output.video_codec.clone(),
            preset: options.output.preset.clone(),
            crf: options.output.crf,
        },
        audio: final_audio.as_ref().map(|_| AudioCodecParams {
            codec: options.output.audio_codec.clone(),
            bitrate_kbps: options.output.audio_bitrate_kbps,
        }),
        frame_rate: options.output.frame_rate,
        pixel_format: options.output.pixel_format.clone(),
        scale_target: options.scale_target,
    };

    let plan = ExecutionPlan {
        output_path: output_path.into(),
        mode: groups.mode,
        inputs: builder.inputs,
        operations: builder.operations,
        mix: audio.strategy,
        output,
        expected_duration_secs,
    };

    tracing::info!(
        mode = ?plan.mode,
        inputs = plan.inputs.len(),
        operations = ?plan.kinds(),
        expected_duration_secs = plan.expected_duration_secs,
        "Execution plan built"
    );

    Ok(plan)
}

#[derive(Default)]
struct PlanBuilder {
    inputs: Vec<PlanInput>,
    operations: Vec<Operation>,
    next_segment: usize,
}

impl PlanBuilder {
    fn file_input(&mut self, clip: &Clip, kind: MediaKind) -> usize {
        let index = self.inputs.len();
        self.inputs.push(PlanInput {
            index,
            kind,
            source: InputSource::File {
                path: clip.source_path.clone(),
                trim_start: clip.source_trim_start,
                trim_end: clip.source_trim_end,
            },
        });
        index
    }

    fn concat_lane(&mut self, lane: LaneId, clips: &[Clip], with_audio: bool) -> usize {
        let mut segments = Vec::with_capacity(clips.len());
        for clip in clips {
            let segment = self.next_segment;
            self.next_segment += 1;
            self.operations.push(Operation::Trim {
                segment,
                lane,
                clip: clip.id,
                source: clip.source_path.clone(),
                start_secs: clip.source_trim_start,
                end_secs: clip.source_trim_end,
                keep_audio: with_audio,
            });
            segments.push(segment);
        }

        let index = self.inputs.len();
        self.inputs.push(PlanInput {
            index,
            kind: MediaKind::Video,
            source: InputSource::ConcatList { lane },
        });
        self.operations.push(Operation::Concat {
            lane,
            segments,
            input: index,
            with_audio,
        });
        index
    }
}
