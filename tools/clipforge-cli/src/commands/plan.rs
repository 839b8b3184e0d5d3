//! Print the execution plan for a request.

use std::path::PathBuf;

use clipforge_common::config::AppConfig;
use clipforge_render_engine::ffmpeg::{compile, ArtifactLayout};
use clipforge_render_engine::plan::{InputSource, Operation, PlanOptions};
use clipforge_render_engine::{plan_export, plan_with_presence, FfprobeProber};
use clipforge_timeline_model::{AudioPresenceMap, ClipId, ExportRequest};

pub async fn run(
    request_path: PathBuf,
    assume_audio: bool,
    json: bool,
    config: AppConfig,
) -> anyhow::Result<()> {
    let request = ExportRequest::load(&request_path)
        .map_err(|e| anyhow::anyhow!("Failed to load export request: {e}"))?;
    let options = PlanOptions::from_config(&config, request.scale_target);

    let plan = if assume_audio {
        let clip_count = request.video_clips.len() + request.audio_clips.len();
        let presence: AudioPresenceMap = (0..clip_count).map(|i| (ClipId(i), true)).collect();
        plan_with_presence(&request, &presence, &options)?
    } else {
        let prober = FfprobeProber::from_config(&config.encoder);
        plan_export(&request, &prober, &options).await?
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(());
    }

    println!("Execution plan for: {}", request_path.display());
    println!("  Mode: {:?}", plan.mode);
    println!("  Expected duration: {:.3}s", plan.expected_duration_secs);
    println!("  Signature: {:016x}", plan.signature());

    println!("\nInputs:");
    for input in &plan.inputs {
        match &input.source {
            InputSource::File {
                path,
                trim_start,
                trim_end,
            } => println!(
                "  #{} {:?} {} [{trim_start:.3}s..{trim_end:.3}s]",
                input.index,
                input.kind,
                path.display()
            ),
            InputSource::ConcatList { lane } => {
                println!("  #{} {:?} concat list of {lane}", input.index, input.kind)
            }
        }
    }

    println!("\nOperations:");
    for (step, op) in plan.operations.iter().enumerate() {
        println!("  {:>2}. {}", step + 1, describe(op));
    }

    let commands = compile(&plan, &ArtifactLayout::new("<workspace>"));
    println!("\n{}", commands.describe(&config.encoder.ffmpeg_path));

    Ok(())
}

fn describe(op: &Operation) -> String {
    match op {
        Operation::Trim {
            segment,
            lane,
            clip,
            start_secs,
            end_secs,
            keep_audio,
            ..
        } => format!(
            "trim {clip} on {lane} [{start_secs:.3}s..{end_secs:.3}s] -> segment {segment}{}",
            if *keep_audio { "" } else { " (no audio)" }
        ),
        Operation::Concat {
            lane,
            segments,
            input,
            with_audio,
        } => format!(
            "concat {} segment(s) of {lane} -> input #{input}{}",
            segments.len(),
            if *with_audio { "" } else { " (no audio)" }
        ),
        Operation::Overlay {
            lane,
            base,
            overlay,
            offset_ms,
            output,
            ..
        } => format!("overlay {lane}: {base} + {overlay} at +{offset_ms}ms -> {output}"),
        Operation::Delay {
            input,
            delay_ms,
            output,
            ..
        } => format!("delay {input} by {delay_ms}ms -> {output}"),
        Operation::Mix {
            inputs,
            duration,
            output,
        } => format!(
            "mix {} branch(es), duration={} -> {output}",
            inputs.len(),
            duration.as_str()
        ),
        Operation::Map {
            video,
            audio,
            video_lead_in_ms,
        } => {
            let audio = audio
                .as_ref()
                .map(|a| a.to_string())
                .unwrap_or_else(|| "none".to_string());
            format!("map video={video} audio={audio} lead-in={video_lead_in_ms}ms")
        }
    }
}
