//! Plan execution: per-export workspace, staged encoder runs, progress
//! aggregation and guaranteed cleanup.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI16, Ordering};
use std::sync::Arc;

use uuid::Uuid;

use clipforge_common::config::EncoderConfig;
use clipforge_common::error::{ClipforgeError, ClipforgeResult, PipelineStage};

use crate::engine::{CancelSignal, EncodeJob, EncodingEngine};
use crate::ffmpeg::{self, ArtifactLayout, EncoderCommands};
use crate::plan::ExecutionPlan;

/// Progress callback receiving integer percentages.
pub type ProgressCallback = Arc<dyn Fn(u8) + Send + Sync>;

/// Per-export temporary directory holding segments and concat lists.
///
/// Removed by [`ExportWorkspace::cleanup`], or on drop if cleanup never ran.
#[derive(Debug)]
pub struct ExportWorkspace {
    session_id: Uuid,
    layout: ArtifactLayout,
    artifacts: Vec<PathBuf>,
    cleaned: bool,
}

impl ExportWorkspace {
    /// Create `clipforge-<uuid>` under `temp_root`.
    pub fn create(temp_root: &Path) -> ClipforgeResult<Self> {
        let session_id = Uuid::new_v4();
        let root = temp_root.join(format!("clipforge-{session_id}"));
        std::fs::create_dir_all(&root)?;
        tracing::debug!(path = %root.display(), %session_id, "Export workspace created");
        Ok(Self {
            session_id,
            layout: ArtifactLayout::new(root),
            artifacts: Vec::new(),
            cleaned: false,
        })
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn path(&self) -> &Path {
        self.layout.root()
    }

    pub fn layout(&self) -> &ArtifactLayout {
        &self.layout
    }

    pub fn artifacts(&self) -> &[PathBuf] {
        &self.artifacts
    }

    /// Register a file that an external process is about to create.
    pub fn track(&mut self, path: impl Into<PathBuf>) {
        self.artifacts.push(path.into());
    }

    /// Write a tracked file inside the workspace.
    pub fn write_file(&mut self, path: &Path, contents: &str) -> ClipforgeResult<()> {
        self.track(path);
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Remove every artifact and the workspace itself.
    ///
    /// Best effort: failures are logged and never escalated. Returns the
    /// number of artifacts that were removed.
    pub fn cleanup(&mut self) -> usize {
        if self.cleaned {
            return 0;
        }
        self.cleaned = true;

        let mut removed = 0;
        for artifact in &self.artifacts {
            match std::fs::remove_file(artifact) {
                Ok(()) => removed += 1,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => tracing::warn!(
                    stage = %PipelineStage::Cleanup,
                    path = %artifact.display(),
                    error = %err,
                    "Failed to remove temporary artifact"
                ),
            }
        }

        let root = self.layout.root();
        if let Err(err) = std::fs::remove_dir_all(root) {
            if err.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(
                    stage = %PipelineStage::Cleanup,
                    path = %root.display(),
                    error = %err,
                    "Failed to remove export workspace"
                );
            }
        }

        tracing::debug!(
            session_id = %self.session_id,
            removed,
            tracked = self.artifacts.len(),
            "Export workspace cleaned up"
        );
        removed
    }
}

impl Drop for ExportWorkspace {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// Turns weighted stage progress into a non-decreasing integer percentage.
///
/// `0` is emitted by [`begin`](Self::begin), `100` only by
/// [`finish`](Self::finish); intermediate reports are capped at 99.
pub struct ProgressTracker {
    callback: Option<ProgressCallback>,
    last: AtomicI16,
    total_weight: f64,
}

impl ProgressTracker {
    pub fn new(callback: Option<ProgressCallback>) -> Self {
        Self {
            callback,
            last: AtomicI16::new(-1),
            total_weight: 0.0,
        }
    }

    /// Set the total weight (seconds of media to encode across stages).
    pub fn set_total_weight(&mut self, total: f64) {
        self.total_weight = total.max(0.0);
    }

    pub fn begin(&self) {
        self.emit(0);
    }

    /// Report absolute completed weight.
    pub fn report(&self, completed_weight: f64) {
        if self.total_weight <= 0.0 {
            return;
        }
        let ratio = (completed_weight / self.total_weight).clamp(0.0, 1.0);
        let percent = ((ratio * 100.0).floor() as i16).min(99);
        self.emit(percent);
    }

    pub fn finish(&self) {
        self.emit(100);
    }

    /// Last emitted percentage.
    pub fn last(&self) -> Option<u8> {
        u8::try_from(self.last.load(Ordering::SeqCst)).ok()
    }

    fn emit(&self, percent: i16) {
        let previous = self.last.fetch_max(percent, Ordering::SeqCst);
        if percent > previous {
            if let Some(callback) = &self.callback {
                callback(percent as u8);
            }
        }
    }
}

/// Result of running a plan.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionReport {
    pub output_path: PathBuf,
    pub session_id: Uuid,
    pub segments_encoded: usize,
}

/// Runs an [`ExecutionPlan`] through an [`EncodingEngine`].
pub struct PlanExecutor<'a> {
    engine: &'a dyn EncodingEngine,
    config: &'a EncoderConfig,
}

impl<'a> PlanExecutor<'a> {
    pub fn new(engine: &'a dyn EncodingEngine, config: &'a EncoderConfig) -> Self {
        Self { engine, config }
    }

    /// Realize intermediates, run the final encode and clean up.
    ///
    /// The workspace is removed on every exit path, including errors and
    /// cancellation.
    pub async fn execute(
        &self,
        plan: &ExecutionPlan,
        tracker: &mut ProgressTracker,
        cancel: CancelSignal,
    ) -> ClipforgeResult<ExecutionReport> {
        if cancel.is_cancelled() {
            return Err(ClipforgeError::Cancelled {
                stage: PipelineStage::Prepare,
            });
        }

        let mut workspace = ExportWorkspace::create(&self.config.temp_root())?;
        let commands = ffmpeg::compile(plan, workspace.layout());
        let total = commands
            .segments
            .iter()
            .map(|s| s.duration_secs)
            .sum::<f64>()
            + plan.expected_duration_secs;
        tracker.set_total_weight(total);

        let result = self
            .run_stages(plan, &commands, &mut workspace, tracker, cancel)
            .await;

        let removed = workspace.cleanup();
        match &result {
            Ok(_) => tracing::info!(removed, "Plan executed"),
            Err(err) => tracing::warn!(
                removed,
                stage = ?err.stage(),
                error = %err,
                "Plan execution aborted"
            ),
        }
        result
    }

    async fn run_stages(
        &self,
        plan: &ExecutionPlan,
        commands: &EncoderCommands,
        workspace: &mut ExportWorkspace,
        tracker: &ProgressTracker,
        cancel: CancelSignal,
    ) -> ClipforgeResult<ExecutionReport> {
        if let Some(parent) = plan.output_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        if self.config.write_debug_report {
            self.write_debug_report(plan, commands);
        }

        let mut completed = 0.0;

        for segment in &commands.segments {
            ensure_not_cancelled(&cancel, PipelineStage::Normalize)?;
            workspace.track(&segment.output);
            let job = EncodeJob {
                stage: PipelineStage::Normalize,
                label: format!("segment {}", segment.segment),
                args: segment.args.clone(),
                expected_duration_secs: segment.duration_secs,
            };
            let base = completed;
            let weight = segment.duration_secs;
            self.engine
                .run(
                    &job,
                    &|fraction: f64| tracker.report(base + fraction * weight),
                    cancel.clone(),
                )
                .await?;
            completed += weight;
            tracker.report(completed);
        }

        if !commands.concat_lists.is_empty() {
            ensure_not_cancelled(&cancel, PipelineStage::Concat)?;
            for list in &commands.concat_lists {
                workspace.write_file(&list.path, &list.body)?;
                tracing::debug!(lane = %list.lane, path = %list.path.display(), "Concat list written");
            }
        }

        ensure_not_cancelled(&cancel, PipelineStage::FinalEncode)?;
        let job = EncodeJob {
            stage: PipelineStage::FinalEncode,
            label: "final".to_string(),
            args: commands.final_args.clone(),
            expected_duration_secs: plan.expected_duration_secs,
        };
        let base = completed;
        let weight = plan.expected_duration_secs;
        self.engine
            .run(
                &job,
                &|fraction: f64| tracker.report(base + fraction * weight),
                cancel.clone(),
            )
            .await?;

        Ok(ExecutionReport {
            output_path: plan.output_path.clone(),
            session_id: workspace.session_id(),
            segments_encoded: commands.segments.len(),
        })
    }

    fn write_debug_report(&self, plan: &ExecutionPlan, commands: &EncoderCommands) {
        let path = debug_report_path(&plan.output_path);
        let plan_json = match serde_json::to_string_pretty(plan) {
            Ok(json) => json,
            Err(err) => format!("<failed to serialize plan: {err}>"),
        };
        let report = format!(
            "engine: {}\nsignature: {:016x}\n\n# plan\n{plan_json}\n\n{}",
            self.engine.name(),
            plan.signature(),
            commands.describe(&self.config.ffmpeg_path)
        );
        if let Err(err) = std::fs::write(&path, report) {
            tracing::warn!(error = %err, path = %path.display(), "Failed to write plan debug report");
        } else {
            tracing::info!(path = %path.display(), "Wrote plan debug report");
        }
    }
}

/// `<output>.plan-debug.txt`, next to the output file.
pub fn debug_report_path(output: &Path) -> PathBuf {
    let mut name = output
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".plan-debug.txt");
    output.with_file_name(name)
}

fn ensure_not_cancelled(cancel: &CancelSignal, stage: PipelineStage) -> ClipforgeResult<()> {
    if cancel.is_cancelled() {
        tracing::info!(%stage, "Export cancelled");
        return Err(ClipforgeError::Cancelled { stage });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recording_tracker() -> (ProgressTracker, Arc<Mutex<Vec<u8>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let tracker = ProgressTracker::new(Some(Arc::new(move |p| sink.lock().unwrap().push(p))));
        (tracker, seen)
    }

    #[test]
    fn test_workspace_is_unique_and_removed() {
        let temp = tempfile::tempdir().unwrap();
        let mut a = ExportWorkspace::create(temp.path()).unwrap();
        let b = ExportWorkspace::create(temp.path()).unwrap();
        assert_ne!(a.path(), b.path());
        assert!(a
            .path()
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("clipforge-"));

        let list = a.layout().concat_list_path(clipforge_timeline_model::LaneId(0));
        a.write_file(&list, "ffconcat version 1.0\n").unwrap();
        assert!(list.exists());

        assert_eq!(a.cleanup(), 1);
        assert!(!a.path().exists());
        assert_eq!(a.cleanup(), 0);

        let b_path = b.path().to_path_buf();
        drop(b);
        assert!(!b_path.exists());
    }

    #[test]
    fn test_cleanup_ignores_missing_artifacts() {
        let temp = tempfile::tempdir().unwrap();
        let mut workspace = ExportWorkspace::create(temp.path()).unwrap();
        workspace.track(workspace.layout().segment_path(0));
        assert_eq!(workspace.cleanup(), 0);
        assert!(!workspace.path().exists());
    }

    #[test]
    fn test_tracker_is_monotonic_and_reserves_100() {
        let (mut tracker, seen) = recording_tracker();
        tracker.set_total_weight(10.0);
        tracker.begin();
        tracker.report(2.5);
        tracker.report(1.0);
        tracker.report(2.5);
        tracker.report(10.0);
        tracker.report(50.0);
        tracker.finish();
        tracker.finish();
        assert_eq!(*seen.lock().unwrap(), vec![0, 25, 99, 100]);
        assert_eq!(tracker.last(), Some(100));
    }

    #[test]
    fn test_tracker_without_weight_only_emits_bounds() {
        let (tracker, seen) = recording_tracker();
        tracker.begin();
        tracker.report(3.0);
        tracker.finish();
        assert_eq!(*seen.lock().unwrap(), vec![0, 100]);
    }

    #[test]
    fn test_debug_report_path_keeps_extension() {
        assert_eq!(
            debug_report_path(Path::new("/out/final.mp4")),
            PathBuf::from("/out/final.mp4.plan-debug.txt")
        );
    }
}
