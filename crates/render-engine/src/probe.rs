//! Media probing: audio stream presence per source file.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use clipforge_common::config::EncoderConfig;
use clipforge_common::error::{ClipforgeError, ClipforgeResult};
use clipforge_timeline_model::{AudioPresenceMap, Timeline};
use futures_util::future::join_all;

/// What the prober reports about one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProbeReport {
    pub has_audio: bool,
}

/// Trait for media probers (ffprobe, test doubles).
#[async_trait]
pub trait MediaProber: Send + Sync {
    /// Inspect one media file.
    async fn probe(&self, path: &Path) -> ClipforgeResult<ProbeReport>;

    /// Prober name.
    fn name(&self) -> &str;
}

/// Prober backed by an ffprobe-compatible binary.
#[derive(Debug, Clone)]
pub struct FfprobeProber {
    binary: PathBuf,
}

impl FfprobeProber {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn from_config(config: &EncoderConfig) -> Self {
        Self::new(&config.ffprobe_path)
    }

    pub fn is_available(&self) -> bool {
        std::process::Command::new(&self.binary)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false)
    }
}

#[async_trait]
impl MediaProber for FfprobeProber {
    async fn probe(&self, path: &Path) -> ClipforgeResult<ProbeReport> {
        let output = tokio::process::Command::new(&self.binary)
            .args([
                "-v",
                "error",
                "-select_streams",
                "a",
                "-show_entries",
                "stream=index",
                "-of",
                "csv=p=0",
            ])
            .arg(path)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ClipforgeError::probe(path, format!("failed to run ffprobe: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ClipforgeError::probe(path, stderr.trim().to_string()));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(ProbeReport {
            has_audio: parse_stream_listing(&stdout),
        })
    }

    fn name(&self) -> &str {
        "ffprobe"
    }
}

/// One stream index per line; any line means an audio stream exists.
fn parse_stream_listing(stdout: &str) -> bool {
    stdout.lines().any(|line| !line.trim().is_empty())
}

/// Probe every distinct source of the timeline concurrently and cache the
/// answer per clip.
///
/// A failed probe degrades to "no audio" for the clips using that file.
pub async fn probe_audio_presence(
    timeline: &Timeline,
    prober: &dyn MediaProber,
) -> AudioPresenceMap {
    let paths: BTreeSet<&Path> = timeline
        .clips()
        .iter()
        .map(|clip| clip.source_path.as_path())
        .collect();

    let probes = paths.into_iter().map(|path| async move {
        let result = prober.probe(path).await;
        (path, result)
    });

    let mut by_path: BTreeMap<&Path, bool> = BTreeMap::new();
    for (path, result) in join_all(probes).await {
        let has_audio = match result {
            Ok(report) => report.has_audio,
            Err(err) => {
                tracing::warn!(
                    path = %path.display(),
                    prober = prober.name(),
                    error = %err,
                    "Probe failed; treating source as having no audio"
                );
                false
            }
        };
        by_path.insert(path, has_audio);
    }

    let presence: AudioPresenceMap = timeline
        .clips()
        .iter()
        .map(|clip| {
            let has_audio = by_path
                .get(clip.source_path.as_path())
                .copied()
                .unwrap_or(false);
            (clip.id, has_audio)
        })
        .collect();

    tracing::info!(
        sources = by_path.len(),
        clips = presence.len(),
        with_audio = presence.values().filter(|v| **v).count(),
        "Audio presence resolved"
    );

    presence
}
