use kiln_diagnostics::{DiagnosticMessage, diagnostic_report::Diagnostic};
use kiln_ir::AccessKind;
use kiln_type::span::Span;
use thiserror::Error;

/// Failure that abandons the lowering of one function.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LowerError {
  /// The tree violates an assumption the type checker should have enforced.
  #[error("lowering precondition violated in '{function}': {reason}")]
  Precondition {
    function: String,
    reason: String,
    span: Span,
  },

  #[error("cannot convert '{from}' to '{to}': {reason}")]
  UnsupportedConversion {
    from: String,
    to: String,
    reason: String,
    span: Span,
  },

  #[error("overlapping {second:?} access to '{storage}' while a {first:?} access is in progress")]
  OverlappingAccess {
    storage: String,
    first: AccessKind,
    second: AccessKind,
    span: Span,
    prior: Span,
  },
}

pub type LowerResult<T> = Result<T, LowerError>;

pub(crate) fn access_kind_name(kind: AccessKind) -> &'static str {
  match kind {
    AccessKind::Read => "read",
    AccessKind::Modify => "modify",
  }
}

impl LowerError {
  pub fn span(&self) -> Span {
    match self {
      LowerError::Precondition { span, .. }
      | LowerError::UnsupportedConversion { span, .. }
      | LowerError::OverlappingAccess { span, .. } => *span,
    }
  }

  pub fn message(&self) -> DiagnosticMessage {
    match self {
      LowerError::Precondition { function, reason, span } => DiagnosticMessage::LoweringPrecondition {
        function: function.clone(),
        reason: reason.clone(),
        at: *span,
      },
      LowerError::UnsupportedConversion { from, to, reason, span } => DiagnosticMessage::UnsupportedConversion {
        from: from.clone(),
        to: to.clone(),
        reason: reason.clone(),
        at: *span,
      },
      LowerError::OverlappingAccess {
        storage,
        first,
        second,
        span,
        prior,
      } => DiagnosticMessage::OverlappingAccess {
        storage: storage.clone(),
        first: access_kind_name(*first).to_string(),
        second: access_kind_name(*second).to_string(),
        at: *span,
        prior: *prior,
      },
    }
  }

  /// Diagnostic for a function whose body was dropped because of this error.
  pub fn report(
    &self,
    function: &str,
  ) -> Diagnostic {
    self
      .message()
      .report()
      .with_note(format!("lowering of '{}' was abandoned", function))
  }
}
