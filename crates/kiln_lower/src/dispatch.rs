//! Vtables and witness tables.

use std::collections::HashMap;

use kiln_ast::{DeclId, FuncContext};
use kiln_config::DebugTrace;
use kiln_ir::{ArgConvention, FuncId, VTable, VTableEntry, WitnessTable};
use kiln_log::trace_dbg;
use kiln_type::{
  nominal::{NominalId, NominalKind},
  span::Span,
  types::{FnParam, FnRepr, ParamConvention, TypeId},
};

use crate::{
  context::ModuleLowering,
  error::{LowerError, LowerResult},
};

impl ModuleLowering<'_> {
  /// Assigns every class method a slot and records one vtable per class.
  /// Subclasses inherit their superclass's slots; an override replaces
  /// the implementation in the slot of the method it overrides.
  pub(crate) fn build_vtables(&mut self) {
    let ast = self.ast;
    let mut methods: HashMap<NominalId, Vec<DeclId>> = HashMap::new();
    for (decl, func) in ast.functions() {
      if let FuncContext::Method { class, .. } = func.context {
        methods.entry(class).or_default().push(decl);
      }
    }

    let classes: Vec<NominalId> = self
      .types
      .nominal_ids()
      .filter(|id| self.types.nominal_decl(id).is_class())
      .collect();

    let mut built = HashMap::new();
    for class in classes {
      self.build_vtable(class, &methods, &mut built);
    }
  }

  fn build_vtable(
    &mut self,
    class: NominalId,
    methods: &HashMap<NominalId, Vec<DeclId>>,
    built: &mut HashMap<NominalId, Vec<VTableEntry>>,
  ) -> Vec<VTableEntry> {
    if let Some(entries) = built.get(&class) {
      return entries.clone();
    }

    let superclass = match &self.types.nominal_decl(&class).kind {
      NominalKind::Class { superclass, .. } => *superclass,
      _ => None,
    };
    let mut entries = match superclass {
      Some(parent) => self.build_vtable(parent, methods, built),
      None => Vec::new(),
    };

    let ast = self.ast;
    for decl in methods.get(&class).into_iter().flatten() {
      // Declarations that failed to lower have already been reported
      let Some(&implementation) = self.functions.get(decl) else {
        continue;
      };
      let name = self.module.function(&implementation).name.clone();
      let overrides = match ast.func(decl).map(|f| f.context) {
        Some(FuncContext::Method { overrides, .. }) => overrides,
        _ => None,
      };

      let slot = match overrides {
        Some(base) => match self.method_slots.get(&base) {
          Some(&slot) => slot,
          None => {
            let err = LowerError::Precondition {
              function: name.clone(),
              reason: format!("overrides '{}', which has no vtable slot", ast.decl(&base).name),
              span: ast.decl(decl).span,
            };
            self.abandon(&name, err);
            continue;
          },
        },
        None => entries.iter().map(|e| e.slot + 1).max().unwrap_or(0),
      };

      self.method_slots.insert(*decl, slot);
      let entry = VTableEntry {
        slot,
        method: name,
        implementation,
      };
      match entries.iter_mut().find(|e| e.slot == slot) {
        Some(existing) => *existing = entry,
        None => entries.push(entry),
      }
    }

    trace_dbg!(
      self.config,
      DebugTrace::Dispatch,
      "vtable for {}: {} slots",
      self.types.nominal_decl(&class).name,
      entries.len()
    );
    built.insert(class, entries.clone());
    self.module.vtables.push(VTable {
      class,
      entries: entries.clone(),
    });
    entries
  }

  /// One witness table per conformance. Implementations whose `self` is
  /// not already passed indirectly and borrowed are wrapped in a thunk
  /// that receives it the way an existential call passes it.
  pub(crate) fn build_witness_tables(&mut self) {
    let ast = self.ast;
    for conformance in &ast.conformances {
      let protocol = self.types.protocol(&conformance.protocol).name.clone();
      let conforming = self.types.display(&conformance.ty);
      let table_name = format!("{}: {}", conforming, protocol);

      let expected = self.types.protocol(&conformance.protocol).requirements.len();
      if conformance.witnesses.len() != expected {
        let span = conformance
          .witnesses
          .first()
          .map(|w| ast.decl(w).span)
          .unwrap_or_default();
        let err = LowerError::Precondition {
          function: table_name.clone(),
          reason: format!("{} witnesses for {} requirements", conformance.witnesses.len(), expected),
          span,
        };
        self.abandon(&table_name, err);
        continue;
      }

      let mut entries = Vec::with_capacity(expected);
      for witness in &conformance.witnesses {
        match self.witness_entry(conformance.ty, *witness) {
          Ok(entry) => entries.push(entry),
          Err(err) => {
            self.abandon(&table_name, err);
            break;
          },
        }
      }
      if entries.len() != expected {
        continue;
      }

      trace_dbg!(self.config, DebugTrace::Dispatch, "witness table {}", table_name);
      self.module.witness_tables.push(WitnessTable {
        conforming: conformance.ty,
        protocol: conformance.protocol,
        entries,
      });
    }
  }

  fn witness_entry(
    &mut self,
    conforming: TypeId,
    witness: DeclId,
  ) -> LowerResult<FuncId> {
    let ast = self.ast;
    let span: Span = ast.decl(&witness).span;
    let name = ast.decl(&witness).name.clone();
    let Some(&implementation) = self.functions.get(&witness) else {
      return Err(LowerError::Precondition {
        function: name,
        reason: "witness was not declared".to_string(),
        span,
      });
    };

    let signature = &self.module.function(&implementation).signature;
    let self_index = usize::from(signature.indirect_result().is_some());
    let self_param = signature.params.get(self_index).map(|p| p.convention);
    if self_param == Some(ArgConvention::IndirectInGuaranteed) {
      return Ok(implementation);
    }

    let impl_ty = ast.decl_type(&witness);
    let Some(mut target) = self.types.as_function(&impl_ty).cloned() else {
      return Err(LowerError::Precondition {
        function: name,
        reason: "witness is not a function".to_string(),
        span,
      });
    };
    if target.params.is_empty() {
      return Err(LowerError::Precondition {
        function: name,
        reason: "witness has no self parameter".to_string(),
        span,
      });
    }

    target.params[0] = FnParam {
      ty: conforming,
      convention: ParamConvention::Guaranteed,
      opaque: true,
    };
    target.repr = FnRepr::Thin;
    let to = self.types.function(target);
    self.reabstraction_thunk(impl_ty, to, Some(implementation), span)
  }
}
