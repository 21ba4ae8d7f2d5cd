use crate::{BytePosition, file::FileId};

/// Byte range in one source file. Lowered values and instructions carry
/// the span of the syntax that produced them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Span {
  pub start: BytePosition,
  pub end: BytePosition,
  pub file: FileId,
}

impl Span {
  pub fn new(
    file: FileId,
    start: BytePosition,
    end: BytePosition,
  ) -> Self {
    debug_assert!(start <= end, "span starts at {} after its end {}", start, end);
    Self { file, start, end }
  }

  /// Span for compiler-synthesized code (thunks, global initializers).
  pub fn synthetic() -> Self {
    Self {
      file: FileId::SYNTHETIC,
      start: BytePosition(0),
      end: BytePosition(0),
    }
  }

  pub fn is_synthetic(&self) -> bool {
    self.file == FileId::SYNTHETIC
  }
}

impl std::fmt::Display for Span {
  fn fmt(
    &self,
    f: &mut std::fmt::Formatter<'_>,
  ) -> std::fmt::Result {
    if self.is_synthetic() {
      return write!(f, "<synthetic>");
    }
    write!(f, "{}:{}..{}", self.file.index(), self.start, self.end)
  }
}
