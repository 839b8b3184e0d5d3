//! Export a timeline request to video.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use clipforge_common::config::{AppConfig, OverlayLanePolicy};
use clipforge_common::error::{ClipforgeError, ClipforgeResult};
use clipforge_render_engine::{spawn_export, ExportOutcome, Exporter};
use clipforge_timeline_model::{ExportRequest, ScaleTarget};

/// Process exit status of an export cancelled from the terminal.
pub const EXIT_CANCELLED: i32 = 130;

pub async fn run(
    request_path: PathBuf,
    output: Option<PathBuf>,
    scale: Option<String>,
    overlay_lanes: Option<String>,
    mut config: AppConfig,
) -> anyhow::Result<()> {
    println!("Exporting request: {}", request_path.display());

    let mut request = ExportRequest::load(&request_path)
        .map_err(|e| anyhow::anyhow!("Failed to load export request: {e}"))?;

    if let Some(output) = output {
        request.output_path = output;
    }
    if let Some(scale) = scale {
        request.scale_target = ScaleTarget::parse(&scale).map_err(|e| anyhow::anyhow!(e))?;
    }
    if let Some(policy) = overlay_lanes {
        config.composition.overlay_lanes = parse_overlay_lanes(&policy)?;
    }

    println!("  Output: {}", request.output_path.display());
    println!(
        "  Clips: {} video, {} audio",
        request.video_clips.len(),
        request.audio_clips.len()
    );
    match request.scale_target.bounds() {
        Some((w, h)) => println!("  Scale: fit within {w}x{h}"),
        None => println!("  Scale: source resolution"),
    }

    let exporter = Arc::new(Exporter::from_config(config));
    let mut handle = spawn_export(exporter, request);
    let mut cancel_requested = false;

    loop {
        tokio::select! {
            progress = handle.next_progress() => match progress {
                Some(percent) => {
                    print!("\r  Progress: {percent:>3}%  ");
                    let _ = std::io::stdout().flush();
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c(), if !cancel_requested => {
                println!("\n  Cancelling...");
                tracing::info!("Cancellation requested from terminal");
                handle.cancel();
                cancel_requested = true;
            }
        }
    }

    conclude(handle.wait().await)
}

fn conclude(result: ClipforgeResult<ExportOutcome>) -> anyhow::Result<()> {
    match result {
        Ok(outcome) => {
            println!(
                "\nExport complete: {} ({:.1}s)",
                outcome.output_path.display(),
                outcome.elapsed_secs
            );
            Ok(())
        }
        Err(e) if e.is_cancelled() => {
            println!("\nExport cancelled ({e})");
            Err(e.into())
        }
        Err(e) => {
            println!("\nExport failed: {e}");
            Err(e.into())
        }
    }
}

/// Whether a command failed because the export was cancelled.
pub fn is_cancellation(err: &anyhow::Error) -> bool {
    err.downcast_ref::<ClipforgeError>()
        .is_some_and(ClipforgeError::is_cancelled)
}

fn parse_overlay_lanes(value: &str) -> anyhow::Result<OverlayLanePolicy> {
    match value {
        "concat-full" => Ok(OverlayLanePolicy::ConcatFull),
        "earliest-clip-only" => Ok(OverlayLanePolicy::EarliestClipOnly),
        _ => Err(anyhow::anyhow!(
            "Unknown overlay lane policy: {value}. Use: concat-full, earliest-clip-only"
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clipforge_common::error::PipelineStage;

    #[test]
    fn test_parse_overlay_lanes() {
        assert_eq!(
            parse_overlay_lanes("earliest-clip-only").unwrap(),
            OverlayLanePolicy::EarliestClipOnly
        );
        assert_eq!(
            parse_overlay_lanes("concat-full").unwrap(),
            OverlayLanePolicy::ConcatFull
        );
        assert!(parse_overlay_lanes("first").is_err());
    }

    #[test]
    fn test_cancelled_export_is_reported_as_cancellation() {
        let err = conclude(Err(ClipforgeError::Cancelled {
            stage: PipelineStage::FinalEncode,
        }))
        .unwrap_err();
        assert!(is_cancellation(&err));

        let err = conclude(Err(ClipforgeError::validation("no clips"))).unwrap_err();
        assert!(!is_cancellation(&err));
    }
}
