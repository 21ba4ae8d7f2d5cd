use kiln_ir::ValueId;

use crate::cleanup::{CleanupHandle, CleanupStack};

/// A lowered value together with the cleanup that destroys it, if the
/// current scope owns it.
///
/// For objects the cleanup is a `destroy_value`; for addresses it is a
/// `destroy_addr` of the memory's contents. A value without a cleanup is
/// either trivial or borrowed from something that outlives the expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagedValue {
  pub value: ValueId,
  pub cleanup: Option<CleanupHandle>,
}

impl ManagedValue {
  pub fn owned(
    value: ValueId,
    cleanup: CleanupHandle,
  ) -> Self {
    Self {
      value,
      cleanup: Some(cleanup),
    }
  }

  pub fn unmanaged(value: ValueId) -> Self {
    Self { value, cleanup: None }
  }

  pub fn has_cleanup(&self) -> bool {
    self.cleanup.is_some()
  }

  /// Hands responsibility for the value to whoever consumes it next.
  pub fn forward(
    self,
    cleanups: &mut CleanupStack,
  ) -> ValueId {
    if let Some(handle) = self.cleanup {
      cleanups.forward(handle);
    }
    self.value
  }
}
