//! Error types shared across Clipforge crates.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Number of trailing stderr lines kept in encode diagnostics.
pub const DIAGNOSTIC_TAIL_LINES: usize = 40;

/// The export stage an error (or cancellation) is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Validate,
    Probe,
    Prepare,
    Normalize,
    Concat,
    FinalEncode,
    Cleanup,
}

impl PipelineStage {
    pub fn as_str(self) -> &'static str {
        match self {
            PipelineStage::Validate => "validate",
            PipelineStage::Probe => "probe",
            PipelineStage::Prepare => "prepare",
            PipelineStage::Normalize => "normalize",
            PipelineStage::Concat => "concat",
            PipelineStage::FinalEncode => "final_encode",
            PipelineStage::Cleanup => "cleanup",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level error type for Clipforge operations.
#[derive(Debug, thiserror::Error)]
pub enum ClipforgeError {
    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Probe failed for {path}: {message}")]
    Probe { path: PathBuf, message: String },

    #[error("Encoder failed during {stage} ({}): {diagnostics}", describe_status(.status))]
    Encode {
        stage: PipelineStage,
        status: Option<i32>,
        diagnostics: String,
    },

    #[error("Export cancelled during {stage}")]
    Cancelled { stage: PipelineStage },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Unsupported operation: {message}")]
    Unsupported { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using ClipforgeError.
pub type ClipforgeResult<T> = Result<T, ClipforgeError>;

fn describe_status(status: &Option<i32>) -> String {
    match status {
        Some(code) => format!("exit status {code}"),
        None => "terminated without exit status".to_string(),
    }
}

impl ClipforgeError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    pub fn probe(path: impl Into<PathBuf>, msg: impl Into<String>) -> Self {
        Self::Probe {
            path: path.into(),
            message: msg.into(),
        }
    }

    /// Build an encode error, keeping only the tail of the engine output.
    pub fn encode(stage: PipelineStage, status: Option<i32>, output: &str) -> Self {
        Self::Encode {
            stage,
            status,
            diagnostics: diagnostic_tail(output, DIAGNOSTIC_TAIL_LINES),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported {
            message: msg.into(),
        }
    }

    /// The stage this error is attributed to, when it carries one.
    pub fn stage(&self) -> Option<PipelineStage> {
        match self {
            Self::Validation { .. } => Some(PipelineStage::Validate),
            Self::Probe { .. } => Some(PipelineStage::Probe),
            Self::Encode { stage, .. } | Self::Cancelled { stage } => Some(*stage),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

/// Keep the last `max_lines` non-empty lines of an engine's output.
pub fn diagnostic_tail(output: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = output
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.is_empty())
        .collect();
    let skip = lines.len().saturating_sub(max_lines);
    lines[skip..].join("\n")
}
