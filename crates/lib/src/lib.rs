//! layerbuild-lib: Core types and logic for layerbuild
//!
//! This crate turns a textual recipe into a chain of immutable,
//! content-addressed filesystem layers:
//! - `Recipe`: the parsed, ordered instruction sequence
//! - `Layer`: an immutable filesystem delta plus metadata
//! - `CacheResolver`: decides whether an instruction's layer can be reused
//! - `Builder`: runs a recipe to completion or to its first failure

pub mod build;
pub mod cache;
pub mod config;
pub mod consts;
pub mod execute;
pub mod layer;
pub mod platform;
pub mod recipe;
pub mod store_lock;
pub mod util;
