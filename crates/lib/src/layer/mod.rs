//! Layers and the layer store.
//!
//! A layer is an immutable filesystem delta plus metadata. Layers form a
//! tree rooted at base images: each layer names its parent by id, and the
//! store directory is the index from id to layer.
//!
//! # Layout
//!
//! ```text
//! store/
//! ├── layers/<id>/
//! │   ├── layer.json          # Layer metadata (written before commit)
//! │   └── diff/               # Added and changed entries
//! ├── bases/<name-hash>/
//! │   ├── base.json
//! │   └── rootfs/
//! ├── locks/<id>.lock         # Per-key write locks
//! └── tmp/                    # Staging and scratch directories
//! ```
//!
//! # Submodules
//!
//! - [`base`] - Registry of importable base images
//! - [`diff`] - Tree snapshots, delta capture and delta application
//! - [`store`] - Content-addressed storage with atomic commit

pub mod base;
pub mod diff;
pub mod store;
mod types;

pub use base::BaseImage;
pub use store::{CommitOutcome, LayerStore, ScratchDir, StagedLayer, StoreError};
pub use types::*;
