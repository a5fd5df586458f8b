//! Build orchestration.
//!
//! A build walks a recipe in order. For each instruction it computes the
//! cache key, reuses a cached layer when one exists, and otherwise executes
//! the instruction and commits the result. The first failure stops the
//! build.
//!
//! # Submodules
//!
//! - [`context`] - Per-build mutable state
//! - [`orchestrate`] - The [`Builder`] and its build loop

pub mod context;
pub mod orchestrate;
mod types;

pub use context::BuildContext;
pub use orchestrate::Builder;
pub use types::*;
