use kiln_type::span::Span;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
  Warning,
  Error,
}

/// Secondary location, such as the earlier of two conflicting accesses.
#[derive(Debug, Clone)]
pub struct Label {
  pub span: Span,
  pub message: String,
}

#[derive(Debug, Clone)]
pub struct Diagnostic {
  pub severity: Severity,
  pub message: String,
  pub error_code: String,
  pub primary_span: Span,
  pub labels: Vec<Label>,
  pub notes: Vec<String>,
}

impl Diagnostic {
  pub fn error(
    code: &str,
    message: impl Into<String>,
    primary_span: Span,
  ) -> Self {
    Self {
      severity: Severity::Error,
      message: message.into(),
      error_code: code.to_string(),
      primary_span,
      labels: Vec::new(),
      notes: Vec::new(),
    }
  }

  pub fn with_label(
    mut self,
    span: Span,
    message: impl Into<String>,
  ) -> Self {
    self.labels.push(Label {
      span,
      message: message.into(),
    });
    self
  }

  pub fn with_note(
    mut self,
    note: impl Into<String>,
  ) -> Self {
    self.notes.push(note.into());
    self
  }

  pub fn is_error(&self) -> bool {
    self.severity == Severity::Error
  }
}
