use std::fmt;

use kiln_type::span::Span;

use crate::diagnostic_report::Diagnostic;

/// User-visible lowering failures.
#[derive(Debug, Clone, PartialEq)]
pub enum DiagnosticMessage {
  /// An upstream stage handed over a tree the lowering cannot accept.
  LoweringPrecondition {
    function: String,
    reason: String,
    at: Span,
  },
  UnsupportedConversion {
    from: String,
    to: String,
    reason: String,
    at: Span,
  },
  OverlappingAccess {
    storage: String,
    first: String,
    second: String,
    at: Span,
    prior: Span,
  },
  /// The lowered body failed IR verification.
  MalformedBody {
    function: String,
    reason: String,
    at: Span,
  },
}

impl fmt::Display for DiagnosticMessage {
  fn fmt(
    &self,
    f: &mut fmt::Formatter,
  ) -> fmt::Result {
    match self {
      DiagnosticMessage::LoweringPrecondition { function, reason, .. } => {
        write!(f, "Internal lowering error in '{}': {}", function, reason)
      },
      DiagnosticMessage::UnsupportedConversion { from, to, reason, .. } => {
        write!(f, "Cannot convert value of type '{}' to '{}': {}", from, to, reason)
      },
      DiagnosticMessage::OverlappingAccess {
        storage, first, second, ..
      } => {
        write!(
          f,
          "Overlapping accesses to '{}': {} access conflicts with an earlier {} access",
          storage, second, first
        )
      },
      DiagnosticMessage::MalformedBody { function, reason, .. } => {
        write!(f, "Lowered body of '{}' is malformed: {}", function, reason)
      },
    }
  }
}

impl DiagnosticMessage {
  pub fn primary_span(&self) -> Span {
    match self {
      DiagnosticMessage::LoweringPrecondition { at, .. }
      | DiagnosticMessage::UnsupportedConversion { at, .. }
      | DiagnosticMessage::OverlappingAccess { at, .. }
      | DiagnosticMessage::MalformedBody { at, .. } => *at,
    }
  }

  pub fn code(&self) -> &'static str {
    match self {
      DiagnosticMessage::LoweringPrecondition { .. } => "L0001",
      DiagnosticMessage::UnsupportedConversion { .. } => "L0002",
      DiagnosticMessage::OverlappingAccess { .. } => "L0003",
      DiagnosticMessage::MalformedBody { .. } => "L0004",
    }
  }

  pub fn secondary_labels(&self) -> Vec<(Span, String)> {
    match self {
      DiagnosticMessage::OverlappingAccess { first, prior, .. } => {
        vec![(*prior, format!("conflicting {} access is here", first))]
      },
      _ => vec![],
    }
  }

  pub fn report(&self) -> Diagnostic {
    let mut diagnostic = Diagnostic::error(self.code(), self.to_string(), self.primary_span());

    for (span, message) in self.secondary_labels() {
      diagnostic = diagnostic.with_label(span, message);
    }

    diagnostic
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn overlapping_access_reports_prior_access() {
    let message = DiagnosticMessage::OverlappingAccess {
      storage: "x".to_string(),
      first: "modify".to_string(),
      second: "read".to_string(),
      at: Span::default(),
      prior: Span::default(),
    };

    let report = message.report();
    assert!(report.is_error());
    assert_eq!(report.error_code, "L0003");
    assert_eq!(report.labels.len(), 1);
    assert!(report.message.contains("'x'"));
  }
}
