use std::collections::HashMap;

use kiln_ast::DeclId;
use kiln_type::{
  Id, Store,
  nominal::{NominalId, ProtocolId},
  types::TypeId,
};

use crate::Function;

pub type FuncId = Id<Function>;
pub type GlobalId = Id<GlobalData>;

/// Lazily initialized module-level storage.
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalData {
  pub name: String,
  pub ty: TypeId,
  pub decl: Option<DeclId>,
  /// Run once, guarded by the global's once-token, before the first access.
  pub initializer: Option<FuncId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VTableEntry {
  pub slot: u32,
  pub method: String,
  pub implementation: FuncId,
}

/// Per-class dispatch table indexed by stable method slot.
#[derive(Debug, Clone, PartialEq)]
pub struct VTable {
  pub class: NominalId,
  pub entries: Vec<VTableEntry>,
}

impl VTable {
  pub fn entry(
    &self,
    slot: u32,
  ) -> Option<&VTableEntry> {
    self.entries.iter().find(|e| e.slot == slot)
  }
}

/// Implementations of a protocol's requirements for one conforming type,
/// indexed by requirement.
#[derive(Debug, Clone, PartialEq)]
pub struct WitnessTable {
  pub conforming: TypeId,
  pub protocol: ProtocolId,
  pub entries: Vec<FuncId>,
}

/// Identity of a reabstraction: source function type, target function type,
/// and for context-free targets the function the thunk calls directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThunkKey {
  pub from: TypeId,
  pub to: TypeId,
  pub callee: Option<FuncId>,
}

/// Write-once-per-key memo of synthesized thunks.
#[derive(Debug, Clone, Default)]
pub struct ThunkCache {
  entries: HashMap<ThunkKey, FuncId>,
}

impl ThunkCache {
  pub fn get(
    &self,
    key: &ThunkKey,
  ) -> Option<FuncId> {
    self.entries.get(key).copied()
  }

  /// Records `thunk` for `key` unless one is already present, and returns
  /// whichever thunk the key now maps to.
  pub fn insert_if_absent(
    &mut self,
    key: ThunkKey,
    thunk: FuncId,
  ) -> FuncId {
    *self.entries.entry(key).or_insert(thunk)
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }
}

#[derive(Debug, Clone, Default)]
pub struct IrModule {
  pub name: String,
  pub functions: Store<Function>,
  by_name: HashMap<String, FuncId>,
  pub globals: Store<GlobalData>,
  pub vtables: Vec<VTable>,
  pub witness_tables: Vec<WitnessTable>,
  pub thunks: ThunkCache,
}

impl IrModule {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      ..Default::default()
    }
  }

  pub fn add_function(
    &mut self,
    function: Function,
  ) -> FuncId {
    let name = function.name.clone();
    let id = self.functions.alloc(function);
    self.by_name.insert(name, id);
    id
  }

  pub fn function(
    &self,
    id: &FuncId,
  ) -> &Function {
    self.functions.get(id)
  }

  pub fn function_mut(
    &mut self,
    id: &FuncId,
  ) -> &mut Function {
    self.functions.get_mut(id)
  }

  pub fn lookup(
    &self,
    name: &str,
  ) -> Option<FuncId> {
    self.by_name.get(name).copied()
  }

  pub fn function_named(
    &self,
    name: &str,
  ) -> Option<&Function> {
    self.lookup(name).map(|id| self.function(&id))
  }

  pub fn add_global(
    &mut self,
    global: GlobalData,
  ) -> GlobalId {
    self.globals.alloc(global)
  }

  pub fn global(
    &self,
    id: &GlobalId,
  ) -> &GlobalData {
    self.globals.get(id)
  }

  pub fn vtable(
    &self,
    class: NominalId,
  ) -> Option<&VTable> {
    self.vtables.iter().find(|t| t.class == class)
  }

  pub fn witness_table(
    &self,
    conforming: TypeId,
    protocol: ProtocolId,
  ) -> Option<&WitnessTable> {
    self
      .witness_tables
      .iter()
      .find(|t| t.conforming == conforming && t.protocol == protocol)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn thunk_cache_keeps_first_insert() {
    let mut cache = ThunkCache::default();
    let key = ThunkKey {
      from: TypeId::new(1),
      to: TypeId::new(2),
      callee: None,
    };

    assert_eq!(cache.insert_if_absent(key, FuncId::new(7)), FuncId::new(7));
    assert_eq!(cache.insert_if_absent(key, FuncId::new(9)), FuncId::new(7));
    assert_eq!(cache.len(), 1);
    assert_eq!(cache.get(&key), Some(FuncId::new(7)));
  }
}
