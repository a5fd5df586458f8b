//! Recipe parser.
//!
//! Parsing runs in two passes: raw text is folded into logical lines
//! (continuations joined, comments and blank lines dropped), then each
//! logical line is classified by keyword and its arguments tokenized.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use super::types::{Instruction, InstructionKind, Recipe, Step};

/// A malformed recipe. The build never starts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyntaxError {
  #[error("line {line}: unknown instruction `{token}`")]
  UnknownInstruction { line: usize, token: String },

  #[error("line {line}: {token}: {message}")]
  InvalidArguments {
    line: usize,
    token: String,
    message: String,
  },

  #[error("line {line}: unterminated {quote} quote")]
  UnterminatedQuote { line: usize, quote: char },

  #[error("missing base: {reason}")]
  MissingBase { reason: String },

  #[error("line {line}: only one FROM instruction is allowed")]
  DuplicateBase { line: usize },
}

impl SyntaxError {
  /// Source line of the error, when it points at one.
  pub fn line(&self) -> Option<usize> {
    match self {
      SyntaxError::UnknownInstruction { line, .. }
      | SyntaxError::InvalidArguments { line, .. }
      | SyntaxError::UnterminatedQuote { line, .. }
      | SyntaxError::DuplicateBase { line } => Some(*line),
      SyntaxError::MissingBase { .. } => None,
    }
  }
}

/// Failure to load a recipe from disk.
#[derive(Debug, Error)]
pub enum RecipeError {
  #[error("failed to read recipe {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error(transparent)]
  Syntax(#[from] SyntaxError),
}

/// Parse recipe text into a [`Recipe`].
///
/// # Example
///
/// ```
/// use layerbuild_lib::recipe::{parse, InstructionKind};
///
/// let recipe = parse("FROM scratch\nRUN echo hi\n").unwrap();
/// assert_eq!(recipe.base, "scratch");
/// assert_eq!(recipe.steps[1].instruction.kind(), InstructionKind::RunCommand);
/// ```
pub fn parse(text: &str) -> Result<Recipe, SyntaxError> {
  let mut steps = Vec::new();

  for (line, content) in logical_lines(text) {
    let instruction = parse_line(line, &content)?;

    if steps.is_empty() && !matches!(instruction, Instruction::SetBase { .. }) {
      return Err(SyntaxError::MissingBase {
        reason: format!("line {}: recipe must start with FROM", line),
      });
    }
    if !steps.is_empty() && matches!(instruction, Instruction::SetBase { .. }) {
      return Err(SyntaxError::DuplicateBase { line });
    }

    steps.push(Step { line, instruction });
  }

  let base = match steps.first().map(|s| &s.instruction) {
    Some(Instruction::SetBase { image }) => image.clone(),
    _ => {
      return Err(SyntaxError::MissingBase {
        reason: "recipe contains no instructions".to_string(),
      });
    }
  };

  Ok(Recipe { base, steps })
}

/// Parse a recipe from a file.
pub fn parse_file(path: &Path) -> Result<Recipe, RecipeError> {
  let text = std::fs::read_to_string(path).map_err(|source| RecipeError::Read {
    path: path.to_path_buf(),
    source,
  })?;
  Ok(parse(&text)?)
}

/// Fold raw text into `(first_line_number, content)` logical lines.
///
/// A trailing backslash joins the next physical line. Comment lines are
/// dropped even inside a continuation.
fn logical_lines(text: &str) -> Vec<(usize, String)> {
  let mut result = Vec::new();
  let mut current = String::new();
  let mut start_line = 0;
  let mut continuation = false;

  for (idx, raw) in text.lines().enumerate() {
    let line_num = idx + 1;
    let trimmed = raw.trim();

    if trimmed.starts_with('#') || (trimmed.is_empty() && !continuation) {
      continue;
    }

    let (body, continues) = match trimmed.strip_suffix('\\') {
      Some(body) => (body.trim_end(), true),
      None => (trimmed, false),
    };

    if continuation {
      if current.is_empty() {
        start_line = line_num;
      } else if !body.is_empty() {
        current.push(' ');
      }
      current.push_str(body);
    } else {
      start_line = line_num;
      current = body.to_string();
    }

    continuation = continues;
    if !continuation && !current.is_empty() {
      result.push((start_line, std::mem::take(&mut current)));
    }
  }

  // Trailing continuation at end of input
  if !current.is_empty() {
    result.push((start_line, current));
  }

  result
}

fn parse_line(line: usize, content: &str) -> Result<Instruction, SyntaxError> {
  let (keyword, rest) = match content.split_once(char::is_whitespace) {
    Some((keyword, rest)) => (keyword, rest.trim()),
    None => (content, ""),
  };

  let kind = InstructionKind::from_keyword(keyword).ok_or_else(|| SyntaxError::UnknownInstruction {
    line,
    token: keyword.to_string(),
  })?;

  let invalid = |message: &str| SyntaxError::InvalidArguments {
    line,
    token: keyword.to_string(),
    message: message.to_string(),
  };

  match kind {
    InstructionKind::SetBase => {
      let words = split_words(rest, line)?;
      match words.as_slice() {
        [image] if !image.is_empty() => Ok(Instruction::SetBase { image: image.clone() }),
        _ => Err(invalid("expected exactly one image reference")),
      }
    }

    InstructionKind::RunCommand => {
      // Tokenize only to validate quoting; the shell receives the raw text.
      if split_words(rest, line)?.is_empty() {
        return Err(invalid("expected a command"));
      }
      Ok(Instruction::RunCommand {
        command: rest.to_string(),
      })
    }

    InstructionKind::CopyFiles => {
      let mut words = split_words(rest, line)?;
      if words.len() < 2 || words.iter().any(|w| w.is_empty()) {
        return Err(invalid("expected at least one source and a destination"));
      }
      let destination = words.pop().unwrap_or_default();
      Ok(Instruction::CopyFiles {
        sources: words,
        destination,
      })
    }

    InstructionKind::SetWorkdir => {
      let words = split_words(rest, line)?;
      match words.as_slice() {
        [path] if !path.is_empty() => Ok(Instruction::SetWorkdir { path: path.clone() }),
        _ => Err(invalid("expected exactly one path")),
      }
    }

    InstructionKind::SetEnv => {
      let words = split_words(rest, line)?;
      let vars = parse_env_words(&words).map_err(invalid)?;
      Ok(Instruction::SetEnv { vars })
    }
  }
}

/// `ENV a=1 b=2` or `ENV key value with spaces`.
fn parse_env_words(words: &[String]) -> Result<Vec<(String, String)>, &'static str> {
  let Some(first) = words.first() else {
    return Err("expected at least one variable");
  };

  if !first.contains('=') {
    if words.len() < 2 {
      return Err("expected `KEY=VALUE` or `KEY VALUE`");
    }
    return Ok(vec![(first.clone(), words[1..].join(" "))]);
  }

  words
    .iter()
    .map(|word| match word.split_once('=') {
      Some((key, _)) if key.is_empty() => Err("variable name must not be empty"),
      Some((key, value)) => Ok((key.to_string(), value.to_string())),
      None => Err("mixed `KEY=VALUE` and bare words"),
    })
    .collect()
}

/// Shell-like word splitting.
///
/// Honors single quotes (literal), double quotes (with `\"`, `\\`, `\$` and
/// `` \` `` escapes) and backslash escapes outside quotes.
pub fn split_words(input: &str, line: usize) -> Result<Vec<String>, SyntaxError> {
  #[derive(PartialEq)]
  enum State {
    Plain,
    Single,
    Double,
  }

  let mut words = Vec::new();
  let mut word = String::new();
  let mut in_word = false;
  let mut state = State::Plain;
  let mut chars = input.chars().peekable();

  while let Some(c) = chars.next() {
    match state {
      State::Plain => match c {
        c if c.is_whitespace() => {
          if in_word {
            words.push(std::mem::take(&mut word));
            in_word = false;
          }
        }
        '\'' => {
          state = State::Single;
          in_word = true;
        }
        '"' => {
          state = State::Double;
          in_word = true;
        }
        '\\' => {
          in_word = true;
          if let Some(next) = chars.next() {
            word.push(next);
          } else {
            word.push('\\');
          }
        }
        c => {
          in_word = true;
          word.push(c);
        }
      },
      State::Single => match c {
        '\'' => state = State::Plain,
        c => word.push(c),
      },
      State::Double => match c {
        '"' => state = State::Plain,
        '\\' => match chars.peek() {
          Some(&next) if matches!(next, '"' | '\\' | '$' | '`') => {
            word.push(next);
            chars.next();
          }
          _ => word.push('\\'),
        },
        c => word.push(c),
      },
    }
  }

  match state {
    State::Single => return Err(SyntaxError::UnterminatedQuote { line, quote: '\'' }),
    State::Double => return Err(SyntaxError::UnterminatedQuote { line, quote: '"' }),
    State::Plain => {}
  }

  if in_word {
    words.push(word);
  }

  Ok(words)
}
