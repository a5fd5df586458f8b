//! Per-instruction handlers.
//!
//! One module per instruction kind that touches the filesystem. `WORKDIR`
//! and `ENV` only change the build context and are handled in
//! [`crate::execute::apply`].

pub mod base;
pub mod cmd;
pub mod copy;

pub use base::{apply_base, require_base};
pub use cmd::{execute_cmd, run_in_layer, shell_command};
pub use copy::{apply_copy, resolve_context_path};
