//! Clipforge Timeline Model
//!
//! Defines the data contracts for a single export request:
//! - **Request:** The wire format handed over by the editor (clip lists, scale target)
//! - **Clip:** A trimmed reference to a source file placed on a lane
//! - **Timeline:** The validated, normalized clip set with its origin and extent
//! - **Lanes:** Per-lane grouping, ordering, and composition-mode classification
//!
//! All times are seconds as `f64`. Clips are never mutated once normalized;
//! downstream stages annotate copies.

pub mod clip;
pub mod lanes;
pub mod request;
pub mod timeline;

pub use clip::*;
pub use lanes::*;
pub use request::*;
pub use timeline::*;
