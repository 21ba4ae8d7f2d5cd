pub mod diagnostic_report;
pub mod message;

use std::fmt::Write;

use colored::*;
use diagnostic_report::{Diagnostic, Severity};
use kiln_type::file::SourceMap;

pub use diagnostic_report::Label;
pub use message::DiagnosticMessage;

pub fn render(
  diag: &Diagnostic,
  sm: &SourceMap,
) {
  eprint!("{}", format_diagnostic(diag, sm));
}

pub fn render_batch(
  diagnostics: &[Diagnostic],
  sm: &SourceMap,
) {
  for diag in diagnostics {
    render(diag, sm);
  }
}

/// Formats a diagnostic with its header, source excerpt, labels and notes.
/// Synthesized code has no source excerpt.
pub fn format_diagnostic(
  diag: &Diagnostic,
  sm: &SourceMap,
) -> String {
  let mut out = String::new();
  let message = diag.message.bold();
  let code = diag.error_code.bold();

  let _ = match diag.severity {
    Severity::Warning => writeln!(out, "{}[{}]: {}", "Warning".yellow().bold(), code.yellow(), message),
    Severity::Error => writeln!(out, "{}[{}]: {}", "Error".red().bold(), code.red().bold(), message),
  };

  if !diag.primary_span.is_synthetic() {
    let span = &diag.primary_span;
    if let (Some(file), Some((line, col))) = (sm.get(&span.file), sm.line_col(&span.file, span.start)) {
      let _ = writeln!(
        out,
        "{:2}{} {}:{}:{}",
        "",
        "-->".blue().bold(),
        file.path.display().to_string().bold(),
        line,
        col
      );
    }
    if let Some(snippet) = sm.snippet(span) {
      let _ = writeln!(out, "{}", snippet);
    }
  }

  for label in &diag.labels {
    let _ = writeln!(out, "  {} {}", "label:".yellow().bold(), label.message);
    if let Some(snippet) = sm.snippet(&label.span) {
      let _ = writeln!(out, "{}", snippet);
    }
  }

  for note in &diag.notes {
    let _ = writeln!(out, "  {} {}", "note:".cyan().bold(), note);
  }

  out
}

#[cfg(test)]
mod tests {
  use kiln_type::{BytePosition, span::Span};

  use super::*;

  #[test]
  fn format_includes_excerpt_and_notes() {
    colored::control::set_override(false);
    let mut sm = SourceMap::new();
    let file = sm.add_virtual("demo", "let p = f(q)\n".to_string());
    let diag = Diagnostic::error("L0002", "Cannot convert", Span::new(file, BytePosition(8), BytePosition(12)))
      .with_note("lowering of 'main' was abandoned");

    let text = format_diagnostic(&diag, &sm);
    assert!(text.starts_with("Error[L0002]: Cannot convert"));
    assert!(text.contains("<demo>:1:9"));
    assert!(text.contains("let p = f(q)"));
    assert!(text.contains("note: lowering of 'main' was abandoned"));
  }
}
