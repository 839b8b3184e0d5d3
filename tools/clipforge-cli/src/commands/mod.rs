pub mod check;
pub mod export;
pub mod plan;
pub mod probe;
