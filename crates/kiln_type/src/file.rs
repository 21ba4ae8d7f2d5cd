use std::collections::HashMap;
use std::path::PathBuf;

use crate::{BytePosition, Id, Store, span::Span};

pub type FileId = Id<SourceFile>;

impl FileId {
  /// Sentinel for code the lowering synthesizes itself (thunks, initializers).
  pub const SYNTHETIC: FileId = FileId::new(u32::MAX);
}

#[derive(Default, Clone, Eq, PartialEq, Hash, Debug)]
pub struct SourceFile {
  pub path: PathBuf,
  pub text: String,
  /// Byte offset of the first character of every line.
  pub line_starts: Vec<usize>,
}

impl SourceFile {
  pub fn new(
    path: PathBuf,
    text: String,
  ) -> Self {
    let line_starts = std::iter::once(0)
      .chain(text.match_indices('\n').map(|(i, _)| i + 1))
      .collect();
    Self {
      path,
      text,
      line_starts,
    }
  }

  /// Zero-based line containing `offset`.
  fn line_of(
    &self,
    offset: usize,
  ) -> usize {
    self.line_starts.partition_point(|start| *start <= offset).saturating_sub(1)
  }

  fn line_text(
    &self,
    line: usize,
  ) -> &str {
    let start = self.line_starts[line];
    let end = self.line_starts.get(line + 1).copied().unwrap_or(self.text.len());
    self.text[start..end].trim_end_matches(['\r', '\n'])
  }
}

/// Source text of the modules being lowered, used to render diagnostics.
#[derive(Debug, Default)]
pub struct SourceMap {
  files: Store<SourceFile>,
  by_path: HashMap<PathBuf, FileId>,
}

impl SourceMap {
  pub fn new() -> Self {
    Self::default()
  }

  /// Registers a file on disk. A path seen before keeps its first text.
  pub fn add_file(
    &mut self,
    path: impl Into<PathBuf>,
    text: String,
  ) -> FileId {
    let path = path.into();
    if let Some(id) = self.by_path.get(&path) {
      return *id;
    }

    let id = self.files.alloc(SourceFile::new(path.clone(), text));
    self.by_path.insert(path, id);
    id
  }

  /// Registers in-memory text, displayed as `<label>`.
  pub fn add_virtual(
    &mut self,
    label: &str,
    text: String,
  ) -> FileId {
    self.files.alloc(SourceFile::new(PathBuf::from(format!("<{}>", label)), text))
  }

  pub fn get(
    &self,
    id: &FileId,
  ) -> Option<&SourceFile> {
    self.files.try_get(id)
  }

  /// One-based line and character column of `pos`.
  pub fn line_col(
    &self,
    file: &FileId,
    pos: BytePosition,
  ) -> Option<(u32, u32)> {
    let source = self.get(file)?;
    let offset = (pos.0 as usize).min(source.text.len());
    let line = source.line_of(offset);
    let prefix = source.text.get(source.line_starts[line]..offset).unwrap_or("");
    Some((line as u32 + 1, prefix.chars().count() as u32 + 1))
  }

  /// The line holding the start of `span`, with the span underlined.
  pub fn snippet(
    &self,
    span: &Span,
  ) -> Option<String> {
    let (line, col) = self.line_col(&span.file, span.start)?;
    let source = self.get(&span.file)?;
    let text = source.line_text(line as usize - 1);

    let width = (span.end.0.saturating_sub(span.start.0) as usize).max(1);
    let underline = format!("{}{}", " ".repeat(col as usize - 1), "^".repeat(width));
    Some(format!("{:>4} | {}\n     | {}", line, text, underline))
  }
}
