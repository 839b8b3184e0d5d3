//! Compile an [`ExecutionPlan`] into concrete encoder invocations.
//!
//! Trims become normalization encodes (one process each), concats become
//! list files for the concat demuxer, and everything else is folded into a
//! single `-filter_complex` graph for the final encode.

use std::path::{Path, PathBuf};

use clipforge_common::timecode::{format_secs, ms_to_secs};
use clipforge_timeline_model::LaneId;

use crate::plan::{
    AudioCodecParams, ExecutionPlan, InputSource, Operation, OutputSpec, StreamRef,
};

/// Sample rate of normalized intermediate audio.
pub const SEGMENT_AUDIO_RATE: u32 = 48_000;

/// Channel count of normalized intermediate audio.
pub const SEGMENT_AUDIO_CHANNELS: u32 = 2;

/// Where intermediate artifacts of one export live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactLayout {
    root: PathBuf,
}

impl ArtifactLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn segment_path(&self, segment: usize) -> PathBuf {
        self.root.join(format!("segment-{segment:03}.mp4"))
    }

    pub fn concat_list_path(&self, lane: LaneId) -> PathBuf {
        self.root.join(format!("concat-{lane}.txt"))
    }
}

/// One normalization encode.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentCommand {
    pub segment: usize,
    pub lane: LaneId,
    pub output: PathBuf,
    pub duration_secs: f64,
    pub args: Vec<String>,
}

/// A concat demuxer list file to be written before the final encode.
#[derive(Debug, Clone, PartialEq)]
pub struct ConcatList {
    pub lane: LaneId,
    pub path: PathBuf,
    pub body: String,
}

/// Every command needed to realize a plan.
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderCommands {
    pub segments: Vec<SegmentCommand>,
    pub concat_lists: Vec<ConcatList>,
    /// Empty when the streams can be mapped straight through.
    pub filter_graph: String,
    pub final_args: Vec<String>,
}

impl EncoderCommands {
    /// Human-readable dump of every command, for debug reports.
    pub fn describe(&self, binary: &Path) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            out.push_str(&format!(
                "# normalize segment {} ({})\n{} {}\n\n",
                segment.segment,
                segment.lane,
                binary.display(),
                shell_join(&segment.args)
            ));
        }
        for list in &self.concat_lists {
            out.push_str(&format!(
                "# concat list {} ({})\n{}\n",
                list.path.display(),
                list.lane,
                list.body
            ));
        }
        if !self.filter_graph.is_empty() {
            out.push_str("# filter graph\n");
            for chain in self.filter_graph.split(';') {
                out.push_str(chain);
                out.push('\n');
            }
            out.push('\n');
        }
        out.push_str(&format!(
            "# final encode\n{} {}\n",
            binary.display(),
            shell_join(&self.final_args)
        ));
        out
    }
}

/// Compile a plan against an artifact layout.
pub fn compile(plan: &ExecutionPlan, layout: &ArtifactLayout) -> EncoderCommands {
    let mut segments = Vec::new();
    let mut concat_lists = Vec::new();

    for op in &plan.operations {
        match op {
            Operation::Trim {
                segment,
                lane,
                source,
                start_secs,
                end_secs,
                keep_audio,
                ..
            } => {
                let output = layout.segment_path(*segment);
                let audio = plan.output.audio.as_ref().filter(|_| *keep_audio);
                let args = normalize_args(source, *start_secs, *end_secs, audio, &output, &plan.output);
                segments.push(SegmentCommand {
                    segment: *segment,
                    lane: *lane,
                    output,
                    duration_secs: end_secs - start_secs,
                    args,
                });
            }
            Operation::Concat { lane, segments: parts, .. } => {
                let files: Vec<PathBuf> = parts.iter().map(|s| layout.segment_path(*s)).collect();
                concat_lists.push(ConcatList {
                    lane: *lane,
                    path: layout.concat_list_path(*lane),
                    body: concat_list_body(&files),
                });
            }
            _ => {}
        }
    }

    let graph = build_filter_graph(plan);
    let final_args = final_args(plan, layout, &graph);

    EncoderCommands {
        segments,
        concat_lists,
        filter_graph: graph.chains.join(";"),
        final_args,
    }
}

fn base_args() -> Vec<String> {
    [
        "-y",
        "-hide_banner",
        "-loglevel",
        "error",
        "-nostats",
        "-progress",
        "pipe:1",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn trimmed_input_args(path: &Path, start: f64, end: f64) -> Vec<String> {
    vec![
        "-ss".to_string(),
        format_secs(start),
        "-t".to_string(),
        format_secs(end - start),
        "-i".to_string(),
        path.display().to_string(),
    ]
}

fn video_codec_args(spec: &OutputSpec) -> Vec<String> {
    vec![
        "-c:v".to_string(),
        spec.video.codec.clone(),
        "-preset".to_string(),
        spec.video.preset.clone(),
        "-crf".to_string(),
        spec.video.crf.to_string(),
        "-pix_fmt".to_string(),
        spec.pixel_format.clone(),
        "-r".to_string(),
        spec.frame_rate.to_string(),
    ]
}

fn audio_codec_args(codec: &str, bitrate_kbps: u32) -> Vec<String> {
    vec![
        "-c:a".to_string(),
        codec.to_string(),
        "-b:a".to_string(),
        format!("{bitrate_kbps}k"),
        "-ar".to_string(),
        SEGMENT_AUDIO_RATE.to_string(),
        "-ac".to_string(),
        SEGMENT_AUDIO_CHANNELS.to_string(),
    ]
}

/// Arguments that trim one clip and re-encode it to the intermediate profile
/// shared by every segment of a concatenated lane. Audio is kept only when
/// `audio` names the codec to encode it with.
pub fn normalize_args(
    source: &Path,
    start_secs: f64,
    end_secs: f64,
    audio: Option<&AudioCodecParams>,
    output: &Path,
    spec: &OutputSpec,
) -> Vec<String> {
    let mut args = base_args();
    args.extend(trimmed_input_args(source, start_secs, end_secs));
    args.extend(["-map".to_string(), "0:v:0".to_string()]);
    if audio.is_some() {
        args.extend(["-map".to_string(), "0:a:0".to_string()]);
    }
    args.extend(["-vf".to_string(), "setsar=1".to_string()]);
    args.extend(video_codec_args(spec));
    match audio {
        Some(codec) => args.extend(audio_codec_args(&codec.codec, codec.bitrate_kbps)),
        None => args.push("-an".to_string()),
    }
    args.push(output.display().to_string());
    args
}

/// Body of a concat demuxer list.
pub fn concat_list_body(files: &[PathBuf]) -> String {
    let mut body = String::from("ffconcat version 1.0\n");
    for file in files {
        let escaped = file.display().to_string().replace('\'', "'\\''");
        body.push_str(&format!("file '{escaped}'\n"));
    }
    body
}

struct FilterGraph {
    chains: Vec<String>,
    video: StreamRef,
    audio: Option<StreamRef>,
}

/// The stream the overlay fold starts from, with the lead-in it needs.
fn base_video(plan: &ExecutionPlan) -> Option<(StreamRef, u64)> {
    let lead_in = match plan.map() {
        Some(Operation::Map {
            video_lead_in_ms, ..
        }) => *video_lead_in_ms,
        _ => return None,
    };
    let base = plan.operations.iter().find_map(|op| match op {
        Operation::Overlay { base, .. } => Some(base.clone()),
        Operation::Map { video, .. } => Some(video.clone()),
        _ => None,
    })?;
    Some((base, lead_in))
}

/// Fold overlay, delay, mix and map operations into filter chains.
fn build_filter_graph(plan: &ExecutionPlan) -> FilterGraph {
    let mut chains = Vec::new();
    let mut video = StreamRef::input(0, clipforge_timeline_model::MediaKind::Video);
    let mut audio = None;

    // Black lead-in goes on the base lane itself so overlays and audio
    // delays share the timeline origin.
    let mut padded: Option<(StreamRef, StreamRef)> = None;
    if let Some((base, lead_in)) = base_video(plan) {
        if lead_in > 0 {
            let vbase = StreamRef::node("vbase");
            chains.push(format!(
                "{}tpad=start_duration={}:color=black{}",
                base.pad(),
                format_secs(ms_to_secs(lead_in)),
                vbase.pad()
            ));
            padded = Some((base, vbase));
        }
    }
    let resolve = |stream: &StreamRef| -> StreamRef {
        match &padded {
            Some((base, vbase)) if base == stream => vbase.clone(),
            _ => stream.clone(),
        }
    };

    for op in &plan.operations {
        match op {
            Operation::Overlay {
                base,
                overlay,
                offset_ms,
                margin_px,
                scale_divisor,
                output,
                ..
            } => {
                let shifted = StreamRef::node(format!("{output}src"));
                chains.push(format!(
                    "{}setpts=PTS-STARTPTS+{}/TB,scale=iw/{}:-2{}",
                    overlay.pad(),
                    format_secs(ms_to_secs(*offset_ms)),
                    (*scale_divisor).max(1),
                    shifted.pad()
                ));
                chains.push(format!(
                    "{}{}overlay=x=W-w-{m}:y=H-h-{m}:eof_action=pass{}",
                    resolve(base).pad(),
                    shifted.pad(),
                    output.pad(),
                    m = margin_px
                ));
            }
            Operation::Delay {
                input,
                delay_ms,
                output,
                ..
            } => {
                chains.push(format!(
                    "{}adelay=delays={delay_ms}:all=1{}",
                    input.pad(),
                    output.pad()
                ));
            }
            Operation::Mix {
                inputs,
                duration,
                output,
            } => {
                let pads: String = inputs.iter().map(StreamRef::pad).collect();
                chains.push(format!(
                    "{pads}amix=inputs={}:duration={}:dropout_transition=0{}",
                    inputs.len(),
                    duration.as_str(),
                    output.pad()
                ));
            }
            Operation::Map {
                video: mapped_video,
                audio: mapped_audio,
                ..
            } => {
                let mapped_video = resolve(mapped_video);
                if let Some((w, h)) = plan.output.scale_target.bounds() {
                    let vout = StreamRef::node("vout");
                    chains.push(format!(
                        "{}scale=w='min({w},iw)':h='min({h},ih)':force_original_aspect_ratio=decrease:force_divisible_by=2{}",
                        mapped_video.pad(),
                        vout.pad()
                    ));
                    video = vout;
                } else {
                    video = mapped_video;
                }
                audio = mapped_audio.clone();
            }
            Operation::Trim { .. } | Operation::Concat { .. } => {}
        }
    }

    FilterGraph {
        chains,
        video,
        audio,
    }
}

fn final_args(plan: &ExecutionPlan, layout: &ArtifactLayout, graph: &FilterGraph) -> Vec<String> {
    let mut args = base_args();

    for input in &plan.inputs {
        match &input.source {
            InputSource::File {
                path,
                trim_start,
                trim_end,
            } => args.extend(trimmed_input_args(path, *trim_start, *trim_end)),
            InputSource::ConcatList { lane } => {
                args.extend([
                    "-f".to_string(),
                    "concat".to_string(),
                    "-safe".to_string(),
                    "0".to_string(),
                    "-i".to_string(),
                    layout.concat_list_path(*lane).display().to_string(),
                ]);
            }
        }
    }

    if !graph.chains.is_empty() {
        args.push("-filter_complex".to_string());
        args.push(graph.chains.join(";"));
    }

    args.push("-map".to_string());
    args.push(graph.video.map_arg());
    args.extend(video_codec_args(&plan.output));

    match (&graph.audio, &plan.output.audio) {
        (Some(stream), Some(codec)) => {
            args.push("-map".to_string());
            args.push(stream.map_arg());
            args.extend(audio_codec_args(&codec.codec, codec.bitrate_kbps));
        }
        _ => args.push("-an".to_string()),
    }

    args.extend(["-movflags".to_string(), "+faststart".to_string()]);
    args.push(plan.output_path.display().to_string());
    args
}

fn shell_join(args: &[String]) -> String {
    args.iter()
        .map(|arg| {
            if arg.is_empty() || arg.chars().any(|c| c.is_whitespace() || "'\"[];,()".contains(c)) {
                format!("'{}'", arg.replace('\'', "'\\''"))
            } else {
                arg.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
