/// Produces the symbol names of lowered entities.
///
/// Names must be deterministic for a given module and unique within it.
pub trait NameMangler {
  /// `owner` is the class for methods.
  fn mangle_function(
    &self,
    name: &str,
    owner: Option<&str>,
  ) -> String;

  fn mangle_closure(
    &self,
    parent: &str,
    name: &str,
  ) -> String;

  /// `ordinal` counts thunks already synthesized in the module.
  fn mangle_thunk(
    &self,
    callee: Option<&str>,
    ordinal: usize,
  ) -> String;

  fn mangle_global(
    &self,
    name: &str,
  ) -> String;

  fn mangle_global_init(
    &self,
    global: &str,
  ) -> String;
}

/// Dotted, human-readable names.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultMangler;

impl NameMangler for DefaultMangler {
  fn mangle_function(
    &self,
    name: &str,
    owner: Option<&str>,
  ) -> String {
    match owner {
      Some(owner) => format!("{}.{}", owner, name),
      None => name.to_string(),
    }
  }

  fn mangle_closure(
    &self,
    parent: &str,
    name: &str,
  ) -> String {
    format!("{}.{}", parent, name)
  }

  fn mangle_thunk(
    &self,
    callee: Option<&str>,
    ordinal: usize,
  ) -> String {
    match callee {
      Some(callee) => format!("{}.thunk.{}", callee, ordinal),
      None => format!("reabstraction_thunk.{}", ordinal),
    }
  }

  fn mangle_global(
    &self,
    name: &str,
  ) -> String {
    name.to_string()
  }

  fn mangle_global_init(
    &self,
    global: &str,
  ) -> String {
    format!("{}.init", global)
  }
}
