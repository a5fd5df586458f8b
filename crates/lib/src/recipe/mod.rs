//! Recipe parsing.
//!
//! A recipe is a line-oriented text file. Each logical line starts with a
//! keyword from a fixed vocabulary:
//!
//! ```text
//! FROM python:3.9-slim
//! RUN apt-get update && \
//!     apt-get install -y git
//! WORKDIR /app
//! COPY . /app
//! ENV PYTHONUNBUFFERED=1
//! ```
//!
//! # Submodules
//!
//! - [`parser`] - Logical-line splitting, tokenization and validation

pub mod parser;
mod types;

pub use parser::{RecipeError, SyntaxError, parse, parse_file};
pub use types::*;
