//! Clipforge Render Engine
//!
//! Turns a multi-lane editing timeline into one deterministic execution
//! plan and runs it through an external ffmpeg-compatible encoder.
//!
//! # Pipeline Architecture
//!
//! ```text
//! ExportRequest ──► Timeline ──► LaneGroups ──┐
//!                                              ├── AudioPlan (probe fan-out, delays, mix)
//! MediaProber ─────────────────────────────────┘         │
//!                                                        ▼
//!                                                 ExecutionPlan
//!                                  Trim* → Concat* → Overlay* → Delay* → Mix? → Map
//!                                                        │
//!                                                        ▼
//!                                   PlanExecutor (per-export workspace, progress,
//!                                   cancellation, cleanup) ──► EncodingEngine
//!                                                        │
//!                                                        ▼
//!                                                   output.mp4
//! ```

pub mod audio;
pub mod engine;
pub mod executor;
pub mod export;
pub mod ffmpeg;
pub mod plan;
pub mod probe;

pub use export::*;
