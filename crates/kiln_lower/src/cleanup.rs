use kiln_ir::ValueId;

/// Work owed at scope exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupKind {
  DestroyValue(ValueId),
  /// Destroys the contents of memory, leaving the allocation alive.
  DestroyAddr(ValueId),
  DeallocStack(ValueId),
  /// Frees a box whose contents were never initialized.
  DeallocBox(ValueId),
  EndBorrow(ValueId),
  EndAccess(ValueId),
  EndApply(ValueId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CleanupHandle(usize);

#[derive(Debug, Clone, Copy)]
struct Cleanup {
  kind: CleanupKind,
  active: bool,
}

/// Scoped stack of pending cleanups.
///
/// Scopes are delimited by depths: `pending(depth)` lists what a branch out
/// of the scope must emit without disturbing the stack, while `pop_to(depth)`
/// closes the scope. Both return cleanups innermost first.
#[derive(Debug, Default)]
pub struct CleanupStack {
  entries: Vec<Cleanup>,
}

impl CleanupStack {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn push(
    &mut self,
    kind: CleanupKind,
  ) -> CleanupHandle {
    self.entries.push(Cleanup { kind, active: true });
    CleanupHandle(self.entries.len() - 1)
  }

  /// Disables a cleanup because ownership moved elsewhere.
  pub fn forward(
    &mut self,
    handle: CleanupHandle,
  ) {
    if let Some(entry) = self.entries.get_mut(handle.0) {
      entry.active = false;
    }
  }

  pub fn is_active(
    &self,
    handle: CleanupHandle,
  ) -> bool {
    self.entries.get(handle.0).is_some_and(|e| e.active)
  }

  pub fn depth(&self) -> usize {
    self.entries.len()
  }

  pub fn pending(
    &self,
    depth: usize,
  ) -> Vec<CleanupKind> {
    self.entries[depth.min(self.entries.len())..]
      .iter()
      .rev()
      .filter(|e| e.active)
      .map(|e| e.kind)
      .collect()
  }

  pub fn pop_to(
    &mut self,
    depth: usize,
  ) -> Vec<CleanupKind> {
    let pending = self.pending(depth);
    self.entries.truncate(depth);
    pending
  }
}
