//! Encoding engine abstraction and the ffmpeg-backed implementation.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::watch;

use clipforge_common::config::EncoderConfig;
use clipforge_common::error::{ClipforgeError, ClipforgeResult, PipelineStage};

/// Seconds without progress advancement before a stall warning is logged.
const STALL_WARNING_SECS: u64 = 10;

/// One encoder invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodeJob {
    pub stage: PipelineStage,
    /// Short description for logs ("segment 2", "final").
    pub label: String,
    pub args: Vec<String>,
    /// Media length the invocation produces, for fractional progress.
    pub expected_duration_secs: f64,
}

/// Receives fractional completion in `[0, 1]` for the running job.
pub type EngineProgress<'a> = &'a (dyn Fn(f64) + Send + Sync);

/// Trait for encoding engines (ffmpeg, test doubles).
#[async_trait]
pub trait EncodingEngine: Send + Sync {
    /// Run one job to completion, reporting progress until it exits.
    ///
    /// Must return `ClipforgeError::Cancelled` promptly once `cancel` fires,
    /// after stopping any subprocess it started.
    async fn run(
        &self,
        job: &EncodeJob,
        progress: EngineProgress<'_>,
        cancel: CancelSignal,
    ) -> ClipforgeResult<()>;

    /// Check if this engine is available on the system.
    fn is_available(&self) -> bool;

    /// Engine name.
    fn name(&self) -> &str;
}

/// Caller side of export cancellation.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn signal(&self) -> CancelSignal {
        CancelSignal {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Worker side of export cancellation.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested; pends forever otherwise.
    pub async fn cancelled(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Engine driving an ffmpeg-compatible binary.
#[derive(Debug, Clone)]
pub struct FfmpegEngine {
    binary: PathBuf,
}

impl FfmpegEngine {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn from_config(config: &EncoderConfig) -> Self {
        Self::new(&config.ffmpeg_path)
    }

    pub fn binary(&self) -> &std::path::Path {
        &self.binary
    }
}

#[async_trait]
impl EncodingEngine for FfmpegEngine {
    async fn run(
        &self,
        job: &EncodeJob,
        progress: EngineProgress<'_>,
        mut cancel: CancelSignal,
    ) -> ClipforgeResult<()> {
        if cancel.is_cancelled() {
            return Err(ClipforgeError::Cancelled { stage: job.stage });
        }

        tracing::debug!(label = %job.label, args = ?job.args, "Running encoder");
        let start = Instant::now();
        let mut child = Command::new(&self.binary)
            .args(&job.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => ClipforgeError::unsupported(format!(
                    "Encoder binary not found: {}",
                    self.binary.display()
                )),
                _ => ClipforgeError::encode(
                    job.stage,
                    None,
                    &format!("Failed to start {}: {e}", self.binary.display()),
                ),
            })?;

        tracing::info!(
            pid = child.id(),
            label = %job.label,
            stage = %job.stage,
            args_len = job.args.len(),
            "Encoder process started"
        );

        let stdout = child.stdout.take().ok_or_else(|| {
            ClipforgeError::encode(job.stage, None, "Failed to capture encoder stdout")
        })?;
        let mut stderr = child.stderr.take().ok_or_else(|| {
            ClipforgeError::encode(job.stage, None, "Failed to capture encoder stderr")
        })?;

        // Drain stderr concurrently so the encoder never blocks on a full pipe.
        let stderr_task = tokio::spawn(async move {
            let mut output = String::new();
            match stderr.read_to_string(&mut output).await {
                Ok(_) => output,
                Err(err) => format!("<failed to read encoder stderr: {err}>"),
            }
        });

        let mut lines = BufReader::new(stdout).lines();
        let mut state = ProgressState::default();
        let mut last_progress_secs = 0.0f64;
        let mut last_progress_wall = Instant::now();

        loop {
            let line = tokio::select! {
                _ = cancel.cancelled() => {
                    stop_child(&mut child, &job.label).await;
                    stderr_task.abort();
                    return Err(ClipforgeError::Cancelled { stage: job.stage });
                }
                line = lines.next_line() => line,
            };

            let line = match line {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    stop_child(&mut child, &job.label).await;
                    return Err(ClipforgeError::encode(
                        job.stage,
                        None,
                        &format!("Failed reading encoder progress: {e}"),
                    ));
                }
            };

            let Some((key, value)) = line.trim().split_once('=') else {
                continue;
            };
            state.update(key, value);
            if key != "progress" {
                continue;
            }

            if state.out_time_secs > last_progress_secs + 0.001 {
                last_progress_secs = state.out_time_secs;
                last_progress_wall = Instant::now();
            }
            progress(state.fraction(job.expected_duration_secs));

            if last_progress_wall.elapsed() >= Duration::from_secs(STALL_WARNING_SECS) {
                tracing::warn!(
                    label = %job.label,
                    out_time_secs = state.out_time_secs,
                    elapsed_secs = start.elapsed().as_secs_f64(),
                    "No encoder progress advancement for {STALL_WARNING_SECS}s"
                );
                last_progress_wall = Instant::now();
            }
        }

        let status = tokio::select! {
            _ = cancel.cancelled() => {
                stop_child(&mut child, &job.label).await;
                stderr_task.abort();
                return Err(ClipforgeError::Cancelled { stage: job.stage });
            }
            status = child.wait() => status?,
        };

        let stderr_output = stderr_task
            .await
            .unwrap_or_else(|_| "<failed to join stderr reader>".to_string());

        if !status.success() {
            tracing::warn!(
                label = %job.label,
                status = ?status.code(),
                "Encoder exited with failure"
            );
            return Err(ClipforgeError::encode(
                job.stage,
                status.code(),
                &stderr_output,
            ));
        }

        tracing::info!(
            label = %job.label,
            elapsed_secs = start.elapsed().as_secs_f64(),
            "Encoder process finished"
        );
        Ok(())
    }

    fn is_available(&self) -> bool {
        std::process::Command::new(&self.binary)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false)
    }

    fn name(&self) -> &str {
        "ffmpeg"
    }
}

async fn stop_child(child: &mut tokio::process::Child, label: &str) {
    if let Err(err) = child.kill().await {
        tracing::warn!(label, error = %err, "Failed to kill encoder process");
    } else {
        tracing::info!(label, "Encoder process killed");
    }
}

/// Accumulated `-progress` key/value state.
#[derive(Debug, Default)]
struct ProgressState {
    out_time_secs: f64,
    complete: bool,
}

impl ProgressState {
    fn update(&mut self, key: &str, value: &str) {
        match key {
            // Despite the name, ffmpeg reports out_time_ms in microseconds.
            "out_time_ms" | "out_time_us" => {
                if let Ok(us) = value.trim().parse::<f64>() {
                    self.out_time_secs = us / 1_000_000.0;
                }
            }
            "progress" => {
                self.complete = value.trim() == "end";
            }
            _ => {}
        }
    }

    fn fraction(&self, expected_duration_secs: f64) -> f64 {
        if self.complete {
            1.0
        } else if expected_duration_secs <= 0.0 {
            0.0
        } else {
            (self.out_time_secs / expected_duration_secs).clamp(0.0, 1.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn shell_job(script: &str, expected: f64) -> EncodeJob {
        EncodeJob {
            stage: PipelineStage::FinalEncode,
            label: "test".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            expected_duration_secs: expected,
        }
    }

    #[test]
    fn test_progress_state_parses_microseconds() {
        let mut state = ProgressState::default();
        state.update("out_time_us", "2500000");
        assert!((state.fraction(5.0) - 0.5).abs() < 1e-9);
        state.update("out_time_ms", "10000000");
        assert_eq!(state.fraction(5.0), 1.0);
        state.update("out_time_ms", "N/A");
        assert!((state.out_time_secs - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_progress_end_is_complete() {
        let mut state = ProgressState::default();
        assert_eq!(state.fraction(0.0), 0.0);
        state.update("progress", "end");
        assert_eq!(state.fraction(0.0), 1.0);
    }

    #[tokio::test]
    async fn test_cancel_handle_fires_signal() {
        let handle = CancelHandle::new();
        let mut signal = handle.signal();
        assert!(!signal.is_cancelled());
        handle.cancel();
        handle.cancel();
        tokio::time::timeout(Duration::from_secs(1), signal.cancelled())
            .await
            .unwrap();
        assert!(handle.is_cancelled());
    }

    #[tokio::test]
    async fn test_never_signal_stays_pending() {
        let mut signal = CancelSignal::never();
        let waited = tokio::time::timeout(Duration::from_millis(50), signal.cancelled()).await;
        assert!(waited.is_err());
    }

    #[tokio::test]
    async fn test_missing_binary_is_unsupported() {
        let engine = FfmpegEngine::new("/nonexistent/clipforge-ffmpeg");
        assert!(!engine.is_available());
        let err = engine
            .run(&shell_job("true", 1.0), &|_: f64| {}, CancelSignal::never())
            .await
            .unwrap_err();
        assert!(matches!(err, ClipforgeError::Unsupported { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_progress_lines_are_forwarded() {
        let engine = FfmpegEngine::new("sh");
        let seen = Mutex::new(Vec::new());
        let script = "printf 'frame=1\\nout_time_us=1000000\\nprogress=continue\\nout_time_us=2000000\\nprogress=end\\n'";
        engine
            .run(
                &shell_job(script, 4.0),
                &|p: f64| seen.lock().unwrap().push(p),
                CancelSignal::never(),
            )
            .await
            .unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![0.25, 1.0]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failure_carries_status_and_stderr_tail() {
        let engine = FfmpegEngine::new("sh");
        let err = engine
            .run(
                &shell_job("echo 'Invalid data found' >&2; exit 3", 1.0),
                &|_: f64| {},
                CancelSignal::never(),
            )
            .await
            .unwrap_err();
        match err {
            ClipforgeError::Encode {
                stage,
                status,
                diagnostics,
            } => {
                assert_eq!(stage, PipelineStage::FinalEncode);
                assert_eq!(status, Some(3));
                assert_eq!(diagnostics, "Invalid data found");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancel_kills_running_process() {
        let engine = FfmpegEngine::new("sh");
        let handle = CancelHandle::new();
        let signal = handle.signal();
        let canceller = handle.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            canceller.cancel();
        });

        let started = Instant::now();
        let err = engine
            .run(&shell_job("sleep 30", 30.0), &|_: f64| {}, signal)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
