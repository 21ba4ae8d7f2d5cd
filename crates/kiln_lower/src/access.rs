use kiln_ast::DeclId;
use kiln_ir::{AccessKind, GlobalId, ValueId};
use kiln_type::span::Span;

/// Storage whose identity is known while lowering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageId {
  Local(DeclId),
  Global(GlobalId),
}

/// A formal access: which storage, which projection of it, and how.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessPath {
  pub storage: StorageId,
  /// Field and element indices from the root.
  pub path: Vec<u32>,
  pub name: String,
}

#[derive(Debug, Clone)]
pub struct OpenAccess {
  pub token: ValueId,
  pub path: AccessPath,
  pub kind: AccessKind,
  pub span: Span,
}

/// Accesses currently open in the function being lowered, in lexical order.
///
/// Two accesses conflict when they reach overlapping parts of the same
/// storage and at least one of them modifies it. Disjoint stored fields of a
/// struct never overlap.
#[derive(Debug, Default)]
pub struct AccessTracker {
  open: Vec<OpenAccess>,
}

impl AccessTracker {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn conflict(
    &self,
    path: &AccessPath,
    kind: AccessKind,
  ) -> Option<&OpenAccess> {
    self.open.iter().rev().find(|open| {
      open.path.storage == path.storage
        && overlaps(&open.path.path, &path.path)
        && (open.kind == AccessKind::Modify || kind == AccessKind::Modify)
    })
  }

  pub fn begin(
    &mut self,
    token: ValueId,
    path: AccessPath,
    kind: AccessKind,
    span: Span,
  ) {
    self.open.push(OpenAccess { token, path, kind, span });
  }

  pub fn end(
    &mut self,
    token: ValueId,
  ) {
    self.open.retain(|open| open.token != token);
  }

  pub fn is_empty(&self) -> bool {
    self.open.is_empty()
  }
}

/// Whether two field paths from the same root reach a common part.
pub(crate) fn overlaps(
  a: &[u32],
  b: &[u32],
) -> bool {
  a.iter().zip(b.iter()).all(|(x, y)| x == y)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn local(
    decl: u32,
    path: Vec<u32>,
  ) -> AccessPath {
    AccessPath {
      storage: StorageId::Local(DeclId::new(decl)),
      path,
      name: "x".to_string(),
    }
  }

  #[test]
  fn reads_do_not_conflict() {
    let mut tracker = AccessTracker::new();
    tracker.begin(ValueId::new(0), local(1, vec![]), AccessKind::Read, Span::default());

    assert!(tracker.conflict(&local(1, vec![]), AccessKind::Read).is_none());
    assert!(tracker.conflict(&local(1, vec![]), AccessKind::Modify).is_some());
  }

  #[test]
  fn disjoint_fields_and_storage_do_not_conflict() {
    let mut tracker = AccessTracker::new();
    tracker.begin(ValueId::new(0), local(1, vec![0]), AccessKind::Modify, Span::default());

    assert!(tracker.conflict(&local(1, vec![1]), AccessKind::Modify).is_none());
    assert!(tracker.conflict(&local(2, vec![0]), AccessKind::Modify).is_none());
    assert!(tracker.conflict(&local(1, vec![0, 3]), AccessKind::Read).is_some());
    assert!(tracker.conflict(&local(1, vec![]), AccessKind::Read).is_some());
  }

  #[test]
  fn ended_access_no_longer_conflicts() {
    let mut tracker = AccessTracker::new();
    tracker.begin(ValueId::new(4), local(1, vec![]), AccessKind::Modify, Span::default());
    tracker.end(ValueId::new(4));

    assert!(tracker.is_empty());
    assert!(tracker.conflict(&local(1, vec![]), AccessKind::Modify).is_none());
  }
}
