//! Test doubles shared by the integration tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use clipforge_common::config::AppConfig;
use clipforge_common::error::{ClipforgeError, ClipforgeResult, PipelineStage};
use clipforge_render_engine::engine::{CancelSignal, EncodeJob, EncodingEngine, EngineProgress};
use clipforge_render_engine::probe::{MediaProber, ProbeReport};
use clipforge_timeline_model::ExportRequest;

pub fn fixture_request(name: &str) -> ExportRequest {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..")
        .join("fixtures")
        .join("requests")
        .join(name);
    ExportRequest::load(path).expect("fixture request should parse")
}

/// Prober answering from a fixed table; unknown paths have audio.
#[derive(Default)]
pub struct ScriptedProber {
    silent: BTreeSet<PathBuf>,
    broken: BTreeSet<PathBuf>,
    pub calls: AtomicUsize,
}

impl ScriptedProber {
    pub fn all_audio() -> Self {
        Self::default()
    }

    pub fn silent(mut self, path: &str) -> Self {
        self.silent.insert(PathBuf::from(path));
        self
    }

    pub fn broken(mut self, path: &str) -> Self {
        self.broken.insert(PathBuf::from(path));
        self
    }
}

#[async_trait]
impl MediaProber for ScriptedProber {
    async fn probe(&self, path: &Path) -> ClipforgeResult<ProbeReport> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.broken.contains(path) {
            return Err(ClipforgeError::probe(path, "Invalid data found when processing input"));
        }
        Ok(ProbeReport {
            has_audio: !self.silent.contains(path),
        })
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// What the engine saw when a job started.
#[derive(Debug, Clone)]
pub struct RecordedJob {
    pub job: EncodeJob,
    /// Concat list files referenced by the job and whether they existed.
    pub inputs_present: BTreeMap<PathBuf, bool>,
}

/// Engine that records jobs, fakes their outputs and can fail or hang.
#[derive(Default)]
pub struct RecordingEngine {
    pub jobs: Mutex<Vec<RecordedJob>>,
    fail_stage: Option<PipelineStage>,
    hang_stage: Option<PipelineStage>,
    unavailable: bool,
    pub hanging: AtomicBool,
}

impl RecordingEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_at(stage: PipelineStage) -> Self {
        Self {
            fail_stage: Some(stage),
            ..Self::default()
        }
    }

    pub fn hanging_at(stage: PipelineStage) -> Self {
        Self {
            hang_stage: Some(stage),
            ..Self::default()
        }
    }

    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }

    pub fn stages(&self) -> Vec<PipelineStage> {
        self.jobs
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.job.stage)
            .collect()
    }

    pub fn recorded(&self) -> Vec<RecordedJob> {
        self.jobs.lock().unwrap().clone()
    }
}

#[async_trait]
impl EncodingEngine for RecordingEngine {
    async fn run(
        &self,
        job: &EncodeJob,
        progress: EngineProgress<'_>,
        mut cancel: CancelSignal,
    ) -> ClipforgeResult<()> {
        let inputs_present = job
            .args
            .windows(2)
            .filter(|w| w[0] == "-i" && w[1].ends_with(".txt"))
            .map(|w| (PathBuf::from(&w[1]), Path::new(&w[1]).exists()))
            .collect();
        self.jobs.lock().unwrap().push(RecordedJob {
            job: job.clone(),
            inputs_present,
        });

        progress(0.5);

        if self.hang_stage == Some(job.stage) {
            self.hanging.store(true, Ordering::SeqCst);
            cancel.cancelled().await;
            return Err(ClipforgeError::Cancelled { stage: job.stage });
        }
        if self.fail_stage == Some(job.stage) {
            return Err(ClipforgeError::encode(
                job.stage,
                Some(1),
                "Error while decoding stream #0:0\nConversion failed!",
            ));
        }

        if let Some(output) = job.args.last() {
            std::fs::write(output, b"fake media")?;
        }
        progress(1.0);
        Ok(())
    }

    fn is_available(&self) -> bool {
        !self.unavailable
    }

    fn name(&self) -> &str {
        "recording"
    }
}

/// Config whose temp root and debug report live under `temp_root`.
pub fn test_config(temp_root: &Path) -> AppConfig {
    let mut config = AppConfig::default();
    config.encoder.temp_root = Some(temp_root.to_path_buf());
    config
}

/// Entries currently under a directory.
pub fn entries(dir: &Path) -> Vec<PathBuf> {
    match std::fs::read_dir(dir) {
        Ok(read) => read.filter_map(|e| e.ok().map(|e| e.path())).collect(),
        Err(_) => Vec::new(),
    }
}

pub fn collect_progress() -> (
    clipforge_render_engine::executor::ProgressCallback,
    Arc<Mutex<Vec<u8>>>,
) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let callback: clipforge_render_engine::executor::ProgressCallback =
        Arc::new(move |percent| sink.lock().unwrap().push(percent));
    (callback, seen)
}
