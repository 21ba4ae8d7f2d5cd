use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lowering component selectable with `debug_trace`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebugTrace {
  Classify,
  Ownership,
  Access,
  Materialize,
  Cfg,
  Closure,
  Thunk,
  Dispatch,
  Verify,
}

impl DebugTrace {
  /// Spelling used in `debug_trace` and in trace output.
  pub fn name(self) -> &'static str {
    match self {
      DebugTrace::Classify => "classify",
      DebugTrace::Ownership => "ownership",
      DebugTrace::Access => "access",
      DebugTrace::Materialize => "materialize",
      DebugTrace::Cfg => "cfg",
      DebugTrace::Closure => "closure",
      DebugTrace::Thunk => "thunk",
      DebugTrace::Dispatch => "dispatch",
      DebugTrace::Verify => "verify",
    }
  }
}

/// Enforcement used for accesses whose exclusivity cannot be proven statically
/// (class properties, globals, escaping boxes).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExclusivityChecking {
  #[default]
  Dynamic,
  Unchecked,
}

/// How non-consuming reads of loadable bindings are lowered.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BorrowPolicy {
  /// Use the binding as a guaranteed value when the use does not consume it.
  #[default]
  Borrow,
  /// Copy on every read.
  AlwaysCopy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoweringOptions {
  pub exclusivity: ExclusivityChecking,
  pub borrow_policy: BorrowPolicy,
  /// Run the IR verifier after lowering.
  pub verify: bool,
}

impl Default for LoweringOptions {
  fn default() -> Self {
    Self {
      exclusivity: ExclusivityChecking::Dynamic,
      borrow_policy: BorrowPolicy::Borrow,
      verify: true,
    }
  }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KilnConfig {
  pub debug: bool,
  pub debug_trace: Vec<DebugTrace>,
  pub quiet: bool,
  pub verbose: u8,
  pub lowering: LoweringOptions,
}

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("failed to read config file `{path}`: {source}")]
  Io {
    path: String,
    #[source]
    source: std::io::Error,
  },
  #[error("invalid config: {0}")]
  Parse(#[from] toml::de::Error),
}

impl KilnConfig {
  pub fn new_basic(
    debug: bool,
    debug_trace: Vec<DebugTrace>,
    quiet: bool,
    verbose: u8,
  ) -> Self {
    Self {
      debug,
      debug_trace,
      quiet,
      verbose,
      lowering: LoweringOptions::default(),
    }
  }

  /// Configuration for embedding and tests: no output, verifier on.
  pub fn silent() -> Self {
    Self::new_basic(false, vec![], true, 0)
  }

  pub fn with_lowering(
    mut self,
    lowering: LoweringOptions,
  ) -> Self {
    self.lowering = lowering;
    self
  }

  pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
    Ok(toml::from_str(text)?)
  }

  pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
      path: path.display().to_string(),
      source,
    })?;
    Self::from_toml_str(&text)
  }
}
