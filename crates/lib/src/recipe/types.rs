use std::fmt;

use serde::{Deserialize, Serialize};

/// The closed set of instruction kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstructionKind {
  SetBase,
  RunCommand,
  CopyFiles,
  SetWorkdir,
  SetEnv,
}

impl InstructionKind {
  pub const ALL: [InstructionKind; 5] = [
    InstructionKind::SetBase,
    InstructionKind::RunCommand,
    InstructionKind::CopyFiles,
    InstructionKind::SetWorkdir,
    InstructionKind::SetEnv,
  ];

  /// The recipe keyword that introduces this kind.
  pub fn keyword(self) -> &'static str {
    match self {
      InstructionKind::SetBase => "FROM",
      InstructionKind::RunCommand => "RUN",
      InstructionKind::CopyFiles => "COPY",
      InstructionKind::SetWorkdir => "WORKDIR",
      InstructionKind::SetEnv => "ENV",
    }
  }

  /// Case-sensitive keyword lookup.
  pub fn from_keyword(keyword: &str) -> Option<Self> {
    Self::ALL.into_iter().find(|kind| kind.keyword() == keyword)
  }
}

impl fmt::Display for InstructionKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.keyword())
  }
}

/// A single parsed recipe instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Instruction {
  /// FROM image
  SetBase { image: String },
  /// RUN command line, passed verbatim to the shell
  RunCommand { command: String },
  /// COPY src... dest
  CopyFiles { sources: Vec<String>, destination: String },
  /// WORKDIR path
  SetWorkdir { path: String },
  /// ENV key=value..., in declaration order
  SetEnv { vars: Vec<(String, String)> },
}

impl Instruction {
  pub fn kind(&self) -> InstructionKind {
    match self {
      Instruction::SetBase { .. } => InstructionKind::SetBase,
      Instruction::RunCommand { .. } => InstructionKind::RunCommand,
      Instruction::CopyFiles { .. } => InstructionKind::CopyFiles,
      Instruction::SetWorkdir { .. } => InstructionKind::SetWorkdir,
      Instruction::SetEnv { .. } => InstructionKind::SetEnv,
    }
  }

  /// The kind-specific arguments as an ordered sequence of strings.
  pub fn args(&self) -> Vec<String> {
    match self {
      Instruction::SetBase { image } => vec![image.clone()],
      Instruction::RunCommand { command } => vec![command.clone()],
      Instruction::CopyFiles { sources, destination } => {
        let mut args = sources.clone();
        args.push(destination.clone());
        args
      }
      Instruction::SetWorkdir { path } => vec![path.clone()],
      Instruction::SetEnv { vars } => vars.iter().map(|(k, v)| format!("{}={}", k, v)).collect(),
    }
  }
}

impl fmt::Display for Instruction {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} {}", self.kind(), self.args().join(" "))
  }
}

/// An instruction together with the 1-based line it started on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
  pub line: usize,
  pub instruction: Instruction,
}

/// A parsed recipe.
///
/// Invariant: `steps` is non-empty and `steps[0]` is a `SetBase` naming `base`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipe {
  pub base: String,
  pub steps: Vec<Step>,
}

impl Recipe {
  pub fn len(&self) -> usize {
    self.steps.len()
  }

  pub fn is_empty(&self) -> bool {
    self.steps.is_empty()
  }

  pub fn instructions(&self) -> impl Iterator<Item = &Instruction> {
    self.steps.iter().map(|s| &s.instruction)
  }
}
