//! Export entry points: dry-run planning, awaited exports and spawned
//! exports with progress and cancellation handles.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use clipforge_common::config::AppConfig;
use clipforge_common::error::{ClipforgeError, ClipforgeResult, PipelineStage};
use clipforge_timeline_model::{group_lanes, AudioPresenceMap, ExportRequest, Timeline};

pub use crate::audio::{resolve_audio, AudioPlan};
pub use crate::engine::{CancelHandle, CancelSignal, EncodingEngine, FfmpegEngine};
pub use crate::executor::{ProgressCallback, ProgressTracker};
pub use crate::plan::{build_plan, ExecutionPlan, Operation, PlanOptions};
pub use crate::probe::{probe_audio_presence, FfprobeProber, MediaProber};

use crate::executor::PlanExecutor;

/// Terminal success of one export.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportOutcome {
    pub output_path: PathBuf,
    /// Per-export identifier, also used to name the temp workspace.
    pub session_id: Uuid,
    pub elapsed_secs: f64,
    pub started_at: DateTime<Utc>,
}

/// Build a plan from already-resolved audio presence. Pure and synchronous.
pub fn plan_with_presence(
    request: &ExportRequest,
    presence: &AudioPresenceMap,
    options: &PlanOptions,
) -> ClipforgeResult<ExecutionPlan> {
    let timeline = Timeline::from_request(request)?.with_audio_presence(presence);
    let groups = group_lanes(&timeline);
    let origin = timeline.origin();
    let audio = resolve_audio(&groups, origin, options.overlay_lanes);
    build_plan(&request.output_path, &groups, &audio, origin, options)
}

/// Validate, probe and plan without encoding anything.
pub async fn plan_export(
    request: &ExportRequest,
    prober: &dyn MediaProber,
    options: &PlanOptions,
) -> ClipforgeResult<ExecutionPlan> {
    let timeline = Timeline::from_request(request)?;
    let presence = probe_audio_presence(&timeline, prober).await;
    plan_with_presence(request, &presence, options)
}

/// Runs exports against an encoding engine and a media prober.
pub struct Exporter {
    engine: Arc<dyn EncodingEngine>,
    prober: Arc<dyn MediaProber>,
    config: AppConfig,
}

impl Exporter {
    pub fn new(
        engine: Arc<dyn EncodingEngine>,
        prober: Arc<dyn MediaProber>,
        config: AppConfig,
    ) -> Self {
        Self {
            engine,
            prober,
            config,
        }
    }

    /// Exporter backed by the configured ffmpeg and ffprobe binaries.
    pub fn from_config(config: AppConfig) -> Self {
        let engine = Arc::new(FfmpegEngine::from_config(&config.encoder));
        let prober = Arc::new(FfprobeProber::from_config(&config.encoder));
        Self::new(engine, prober, config)
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn engine(&self) -> &dyn EncodingEngine {
        self.engine.as_ref()
    }

    pub fn prober(&self) -> &dyn MediaProber {
        self.prober.as_ref()
    }

    /// Plan options for a request under this exporter's configuration.
    pub fn options_for(&self, request: &ExportRequest) -> PlanOptions {
        PlanOptions::from_config(&self.config, request.scale_target)
    }

    /// Run one export to completion.
    ///
    /// Emits `0` before any work and `100` only on success. Temporary
    /// artifacts are removed on every exit path.
    pub async fn export(
        &self,
        request: &ExportRequest,
        progress: Option<ProgressCallback>,
        mut cancel: CancelSignal,
    ) -> ClipforgeResult<ExportOutcome> {
        let started_at = Utc::now();
        let started = std::time::Instant::now();
        let mut tracker = ProgressTracker::new(progress);
        tracker.begin();

        tracing::info!(
            output = %request.output_path.display(),
            video_clips = request.video_clips.len(),
            audio_clips = request.audio_clips.len(),
            scale_target = ?request.scale_target,
            "Starting export"
        );

        let timeline = Timeline::from_request(request)?;
        self.config.validate()?;

        if !self.engine.is_available() {
            return Err(ClipforgeError::unsupported(format!(
                "Encoding engine '{}' is not available",
                self.engine.name()
            )));
        }

        if cancel.is_cancelled() {
            return Err(ClipforgeError::Cancelled {
                stage: PipelineStage::Probe,
            });
        }
        let presence = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(ClipforgeError::Cancelled { stage: PipelineStage::Probe });
            }
            presence = probe_audio_presence(&timeline, self.prober.as_ref()) => presence,
        };

        let options = self.options_for(request);
        let plan = plan_with_presence(request, &presence, &options)?;

        let executor = PlanExecutor::new(self.engine.as_ref(), &self.config.encoder);
        let report = executor.execute(&plan, &mut tracker, cancel).await?;
        tracker.finish();

        let outcome = ExportOutcome {
            output_path: report.output_path,
            session_id: report.session_id,
            elapsed_secs: started.elapsed().as_secs_f64(),
            started_at,
        };
        tracing::info!(
            output = %outcome.output_path.display(),
            session_id = %outcome.session_id,
            elapsed_secs = outcome.elapsed_secs,
            segments = report.segments_encoded,
            "Export finished"
        );
        Ok(outcome)
    }
}

/// Export a request with the configured ffmpeg toolchain.
///
/// This is the main entry point for callers that do not need cancellation.
pub async fn export_timeline(
    request: &ExportRequest,
    config: AppConfig,
    progress: Option<ProgressCallback>,
) -> ClipforgeResult<ExportOutcome> {
    Exporter::from_config(config)
        .export(request, progress, CancelSignal::never())
        .await
}

/// A running export spawned onto the tokio runtime.
pub struct ExportHandle {
    progress: mpsc::UnboundedReceiver<u8>,
    cancel: CancelHandle,
    task: JoinHandle<ClipforgeResult<ExportOutcome>>,
}

impl ExportHandle {
    /// Next progress percentage; `None` once the export has ended.
    pub async fn next_progress(&mut self) -> Option<u8> {
        self.progress.recv().await
    }

    /// Request cancellation of the running export.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Wait for the terminal result.
    pub async fn wait(self) -> ClipforgeResult<ExportOutcome> {
        match self.task.await {
            Ok(result) => result,
            Err(err) => Err(ClipforgeError::Other(anyhow::anyhow!(
                "Export task failed: {err}"
            ))),
        }
    }
}

/// Spawn an export off the caller's task; progress arrives on the handle.
pub fn spawn_export(exporter: Arc<Exporter>, request: ExportRequest) -> ExportHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let cancel = CancelHandle::new();
    let signal = cancel.signal();

    let progress: ProgressCallback = Arc::new(move |percent| {
        let _ = tx.send(percent);
    });
    let task = tokio::spawn(async move {
        exporter
            .export(&request, Some(progress), signal)
            .await
    });

    ExportHandle {
        progress: rx,
        cancel,
        task,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clipforge_timeline_model::{ClipId, ClipInput, CompositionMode};

    #[test]
    fn test_plan_with_presence_rejects_invalid_request() {
        let request = ExportRequest::new("/tmp/out.mp4");
        let err = plan_with_presence(&request, &AudioPresenceMap::new(), &PlanOptions::default())
            .unwrap_err();
        assert!(matches!(err, ClipforgeError::Validation { .. }));
    }

    #[test]
    fn test_plan_with_presence_is_pure() {
        let mut request = ExportRequest::new("/tmp/out.mp4");
        request.video_clips = vec![
            ClipInput::new("a.mp4", 0.0, 5.0, 0.0, 0),
            ClipInput::new("b.mp4", 0.0, 4.0, 5.0, 0),
        ];
        let presence = AudioPresenceMap::from([(ClipId(0), true), (ClipId(1), true)]);
        let first = plan_with_presence(&request, &presence, &PlanOptions::default()).unwrap();
        let second = plan_with_presence(&request, &presence, &PlanOptions::default()).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.mode, CompositionMode::Concat);
        assert!((first.expected_duration_secs - 9.0).abs() < 1e-9);
    }

    #[test]
    fn test_outcome_serializes_with_timestamp() {
        let outcome = ExportOutcome {
            output_path: PathBuf::from("/tmp/out.mp4"),
            session_id: Uuid::nil(),
            elapsed_secs: 1.5,
            started_at: Utc::now(),
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["output_path"], "/tmp/out.mp4");
        assert!(json["started_at"].is_string());
    }
}
