//! Stderr logging gated by [`KilnConfig`].
//!
//! Phase messages (`phase_log!`, `phase_ok!`, `phase_warn!`) print unless
//! the configuration is quiet. `log_dbg!` and `log_trc!` need verbosity 2
//! and 3. `trace_dbg!` prints when its lowering component is selected.

use std::fmt;

pub use colored;
use colored::Colorize;
use kiln_config::{DebugTrace, KilnConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
  Phase,
  Debug,
  Trace,
}

impl Level {
  fn min_verbosity(self) -> u8 {
    match self {
      Level::Phase => 0,
      Level::Debug => 2,
      Level::Trace => 3,
    }
  }
}

/// `debug` implies debug verbosity; `quiet` wins over both.
pub fn enabled(
  config: &KilnConfig,
  level: Level,
) -> bool {
  if config.quiet {
    return false;
  }
  let verbosity = if config.debug { config.verbose.max(2) } else { config.verbose };
  verbosity >= level.min_verbosity()
}

pub fn tracing(
  config: &KilnConfig,
  trace: DebugTrace,
) -> bool {
  !config.quiet && (config.debug || config.debug_trace.contains(&trace))
}

#[doc(hidden)]
#[derive(Debug, Clone, Copy)]
pub enum Arrow {
  Ok,
  Warn,
}

#[doc(hidden)]
pub fn arrow(
  kind: Arrow,
  indent: usize,
  message: fmt::Arguments,
) {
  let arrow = match kind {
    Arrow::Ok => "-->".bright_green().bold(),
    Arrow::Warn => "-->".bright_yellow().bold(),
  };
  eprintln!("{:indent$}{} {}", "", arrow, message, indent = indent);
}

/// Progress inside a phase, indented under its heading.
///
/// ```ignore
/// phase_log!(&config, "lowering {}", name);
/// phase_log!(&config, indent = 8, "thunk {}", thunk);
/// ```
#[macro_export]
macro_rules! phase_log {
  ($config:expr, indent = $indent:expr, $($arg:tt)+) => {{
    if $crate::enabled($config, $crate::Level::Phase) {
      $crate::arrow($crate::Arrow::Ok, $indent, format_args!($($arg)+));
    }
  }};
  ($config:expr, $($arg:tt)+) => {
    $crate::phase_log!($config, indent = 4, $($arg)+)
  };
}

#[macro_export]
macro_rules! phase_ok {
  ($config:expr, $($arg:tt)+) => {{
    if $crate::enabled($config, $crate::Level::Phase) {
      $crate::arrow($crate::Arrow::Ok, 0, format_args!($($arg)+));
    }
  }};
}

#[macro_export]
macro_rules! phase_warn {
  ($config:expr, $($arg:tt)+) => {{
    if $crate::enabled($config, $crate::Level::Phase) {
      $crate::arrow($crate::Arrow::Warn, 0, format_args!($($arg)+));
    }
  }};
}

/// Prints `debug[component]: message` for a selected component.
#[macro_export]
macro_rules! trace_dbg {
  ($config:expr, $trace:expr, $($arg:tt)+) => {{
    if $crate::tracing($config, $trace) {
      eprintln!("debug[{}]: {}", $trace.name(), format_args!($($arg)+));
    }
  }};
}

#[macro_export]
macro_rules! log_dbg {
  ($config:expr, $($arg:tt)+) => {{
    if $crate::enabled($config, $crate::Level::Debug) {
      eprintln!("debug: {}", format_args!($($arg)+));
    }
  }};
}

#[macro_export]
macro_rules! log_trc {
  ($config:expr, $($arg:tt)+) => {{
    if $crate::enabled($config, $crate::Level::Trace) {
      eprintln!("trace: {}", format_args!($($arg)+));
    }
  }};
}
