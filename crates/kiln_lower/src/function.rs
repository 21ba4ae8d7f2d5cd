use std::collections::HashMap;

use kiln_ast::{AstModule, DeclId};
use kiln_config::{BorrowPolicy, DebugTrace, ExclusivityChecking, KilnConfig};
use kiln_ir::{
  ArgConvention, BlockId, Enforcement, FuncId, Function, GlobalId, Instr, LoweredParam, Ownership, Terminator,
  ValueId, ValueRepr,
};
use kiln_log::trace_dbg;
use kiln_type::{
  span::Span,
  types::{FnRepr, TypeId, TypeStore},
};

use crate::{
  access::AccessTracker,
  builder::FunctionBuilder,
  captures::CaptureMode,
  classify::TypeInfo,
  cleanup::{CleanupKind, CleanupStack},
  context::ModuleLowering,
  error::{LowerError, LowerResult},
  managed::ManagedValue,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StorageKind {
  Stack,
  /// Heap box shared with closures.
  Box,
  InOut,
  /// Caller storage reached through a non-escaping closure.
  Captured,
}

/// What a declaration is bound to inside the function being lowered.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Binding {
  Value(ValueId),
  /// Immutable value held in memory.
  Address(ValueId),
  Storage {
    address: ValueId,
    kind: StorageKind,
    boxed: Option<ValueId>,
  },
  Global(GlobalId),
}

/// Context for a loop (for break/continue targets).
#[derive(Debug, Clone, Copy)]
pub(crate) struct LoopScope {
  pub continue_block: BlockId,
  pub break_block: BlockId,
  /// Cleanup depth when the body starts.
  pub depth: usize,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct CatchScope {
  pub block: BlockId,
  pub depth: usize,
  pub used: bool,
}

/// Lowers one function body.
pub(crate) struct FunctionLowering<'m, 'a> {
  pub(crate) m: &'m mut ModuleLowering<'a>,
  pub(crate) b: FunctionBuilder,
  pub(crate) cleanups: CleanupStack,
  pub(crate) access: AccessTracker,
  pub(crate) locals: HashMap<DeclId, Binding>,
  pub(crate) loops: Vec<LoopScope>,
  pub(crate) catches: Vec<CatchScope>,
  /// Address the caller supplied for an address-only result.
  pub(crate) indirect_result: Option<ValueId>,
  pub(crate) name: String,
}

impl<'m, 'a> FunctionLowering<'m, 'a> {
  pub(crate) fn new(
    m: &'m mut ModuleLowering<'a>,
    declaration: Function,
  ) -> Self {
    let name = declaration.name.clone();
    Self {
      m,
      b: FunctionBuilder::new(declaration),
      cleanups: CleanupStack::new(),
      access: AccessTracker::new(),
      locals: HashMap::new(),
      loops: Vec::new(),
      catches: Vec::new(),
      indirect_result: None,
      name,
    }
  }

  pub(crate) fn ast(&self) -> &'a AstModule {
    self.m.ast
  }

  pub(crate) fn config(&self) -> &'a KilnConfig {
    self.m.config
  }

  pub(crate) fn types(&self) -> &TypeStore {
    &*self.m.types
  }

  pub(crate) fn type_info(
    &mut self,
    ty: TypeId,
  ) -> TypeInfo {
    self.m.type_info(ty)
  }

  pub(crate) fn precondition(
    &self,
    reason: impl Into<String>,
    span: Span,
  ) -> LowerError {
    LowerError::Precondition {
      function: self.name.clone(),
      reason: reason.into(),
      span,
    }
  }

  pub(crate) fn unsupported(
    &self,
    from: TypeId,
    to: TypeId,
    reason: impl Into<String>,
    span: Span,
  ) -> LowerError {
    LowerError::UnsupportedConversion {
      from: self.types().display(&from),
      to: self.types().display(&to),
      reason: reason.into(),
      span,
    }
  }

  /// Lower the body of an AST function into the declaration this lowering
  /// was created with.
  pub(crate) fn lower_decl(
    mut self,
    decl: DeclId,
  ) -> LowerResult<Function> {
    let ast = self.ast();
    let span = ast.decl(&decl).span;
    let Some(func) = ast.func(&decl) else {
      return Err(self.precondition("declaration is not a function", span));
    };
    let Some(body) = func.body else {
      return Err(self.precondition("function has no body", span));
    };

    let signature = self.b.signature().clone();
    let mut params = signature.params.iter().copied();

    if signature.indirect_result().is_some() {
      if let Some(out) = params.next() {
        self.indirect_result = Some(self.entry_param(out, span).value);
      }
    }

    for param_decl in &func.params {
      let Some(param) = params.next() else {
        return Err(self.precondition("more parameters than the lowered signature", span));
      };
      let value = self.entry_param(param, span);
      let binding = param_binding(param.convention, value.value);
      self.locals.insert(*param_decl, binding);
    }

    let captures = self.m.captures.captures(&decl).to_vec();
    for capture in captures {
      let Some(param) = params.next() else {
        return Err(self.precondition("capture has no parameter in the lowered signature", span));
      };
      let value = self.entry_param(param, span).value;
      let binding = if capture.mode == CaptureMode::ByBox {
        let var_ty = ast.decl_type(&capture.decl);
        let address = self.address(var_ty, span);
        self.b.emit(Instr::ProjectBox {
          dest: address,
          boxed: value,
        });
        Binding::Storage {
          address,
          kind: StorageKind::Box,
          boxed: Some(value),
        }
      } else {
        param_binding(param.convention, value)
      };
      self.locals.insert(capture.decl, binding);
    }

    if params.next().is_some() {
      return Err(self.precondition("lowered signature has unbound parameters", span));
    }

    self.emit_stmt(body)?;
    self.finish_body()
  }

  /// Terminates a body that runs off its end.
  pub(crate) fn finish_body(mut self) -> LowerResult<Function> {
    if self.b.has_insertion_point() {
      let returns_unit = self.indirect_result.is_none() && self.b.signature().result == self.types().unit();
      if returns_unit {
        self.emit_cleanups_to(0);
        self.b.terminate(Terminator::Return(None));
      } else {
        trace_dbg!(
          self.config(),
          DebugTrace::Cfg,
          "{} falls off its end without a value",
          self.name
        );
        self.b.terminate(Terminator::Unreachable);
      }
    }

    Ok(self.b.finish())
  }

  /// Adds an entry block parameter for `param` and registers the cleanup the
  /// callee owes for it.
  pub(crate) fn entry_param(
    &mut self,
    param: LoweredParam,
    span: Span,
  ) -> ManagedValue {
    let entry = self.b.entry_block();

    if param.convention.is_indirect() {
      let address = self
        .b
        .add_block_param(entry, param.ty, Ownership::Trivial, ValueRepr::Address, span);
      if param.convention == ArgConvention::IndirectIn {
        let handle = self.cleanups.push(CleanupKind::DestroyAddr(address));
        return ManagedValue::owned(address, handle);
      }
      return ManagedValue::unmanaged(address);
    }

    let info = self.type_info(param.ty);
    match param.convention {
      ArgConvention::DirectOwned => {
        let value = self
          .b
          .add_block_param(entry, param.ty, info.fresh_ownership(), ValueRepr::Object, span);
        self.manage(value)
      },
      ArgConvention::DirectUnowned if !info.trivial => {
        let value = self
          .b
          .add_block_param(entry, param.ty, Ownership::Unowned, ValueRepr::Object, span);
        ManagedValue::unmanaged(value)
      },
      _ => {
        let value = self
          .b
          .add_block_param(entry, param.ty, info.borrowed_ownership(), ValueRepr::Object, span);
        ManagedValue::unmanaged(value)
      },
    }
  }

  pub(crate) fn object(
    &mut self,
    ty: TypeId,
    ownership: Ownership,
    span: Span,
  ) -> ValueId {
    self.b.new_value(ty, ownership, ValueRepr::Object, span)
  }

  pub(crate) fn address(
    &mut self,
    ty: TypeId,
    span: Span,
  ) -> ValueId {
    self.b.new_value(ty, Ownership::Trivial, ValueRepr::Address, span)
  }

  /// Registers a destroy for `value` if the current scope owns it.
  pub(crate) fn manage(
    &mut self,
    value: ValueId,
  ) -> ManagedValue {
    let data = self.b.value(value);
    if data.ownership == Ownership::Owned && !data.is_address() {
      let handle = self.cleanups.push(CleanupKind::DestroyValue(value));
      ManagedValue::owned(value, handle)
    } else {
      ManagedValue::unmanaged(value)
    }
  }

  pub(crate) fn manage_address(
    &mut self,
    address: ValueId,
  ) -> ManagedValue {
    let handle = self.cleanups.push(CleanupKind::DestroyAddr(address));
    ManagedValue::owned(address, handle)
  }

  /// Runs `f` in a fresh cleanup scope and closes the scope afterwards.
  pub(crate) fn with_scope<T>(
    &mut self,
    f: impl FnOnce(&mut Self) -> LowerResult<T>,
  ) -> LowerResult<T> {
    let depth = self.cleanups.depth();
    let result = f(self)?;
    self.pop_cleanups_to(depth);
    Ok(result)
  }

  fn emit_cleanup(
    &mut self,
    cleanup: CleanupKind,
  ) {
    let instr = match cleanup {
      CleanupKind::DestroyValue(operand) => Instr::DestroyValue { operand },
      CleanupKind::DestroyAddr(address) => Instr::DestroyAddr { address },
      CleanupKind::DeallocStack(address) => Instr::DeallocStack { address },
      CleanupKind::DeallocBox(boxed) => Instr::DeallocBox { boxed },
      CleanupKind::EndBorrow(borrow) => Instr::EndBorrow { borrow },
      CleanupKind::EndAccess(access) => Instr::EndAccess { access },
      CleanupKind::EndApply(token) => Instr::EndApply { token },
    };
    self.b.emit(instr);
  }

  /// Emit the cleanups a branch out to `depth` must run, leaving the scope open.
  pub(crate) fn emit_cleanups_to(
    &mut self,
    depth: usize,
  ) {
    for cleanup in self.cleanups.pending(depth) {
      self.emit_cleanup(cleanup);
    }
  }

  /// Close every scope above `depth`.
  pub(crate) fn pop_cleanups_to(
    &mut self,
    depth: usize,
  ) {
    let live = self.b.has_insertion_point();
    for cleanup in self.cleanups.pop_to(depth) {
      if let CleanupKind::EndAccess(token) = cleanup {
        self.access.end(token);
      }
      if live {
        self.emit_cleanup(cleanup);
      }
    }
  }

  /// Send `error` to the innermost catch, or out of the function.
  pub(crate) fn emit_throw_edge(
    &mut self,
    error: ValueId,
    span: Span,
  ) -> LowerResult<()> {
    if let Some(scope) = self.catches.last_mut() {
      scope.used = true;
      let (block, depth) = (scope.block, scope.depth);
      self.emit_cleanups_to(depth);
      self.b.terminate(Terminator::Br {
        target: block,
        args: vec![error],
      });
      return Ok(());
    }

    if !self.b.signature().throws() {
      return Err(self.precondition("error escapes a function that does not throw", span));
    }

    self.emit_cleanups_to(0);
    self.b.terminate(Terminator::Throw(error));
    Ok(())
  }

  pub(crate) fn function_ref(
    &mut self,
    func: FuncId,
    ty: TypeId,
    span: Span,
  ) -> ValueId {
    let dest = self.object(ty, Ownership::Trivial, span);
    self.b.emit(Instr::FunctionRef { dest, func });
    dest
  }

  /// The context-free variant of a function type.
  pub(crate) fn thin_type(
    &mut self,
    ty: TypeId,
  ) -> TypeId {
    match self.types().as_function(&ty).cloned() {
      Some(fty) => self.m.types.function(fty.with_repr(FnRepr::Thin)),
      None => ty,
    }
  }

  pub(crate) fn borrow_policy(&self) -> BorrowPolicy {
    self.config().lowering.borrow_policy
  }

  /// Enforcement for accesses the lowering cannot prove exclusive.
  pub(crate) fn dynamic_enforcement(&self) -> Enforcement {
    match self.config().lowering.exclusivity {
      ExclusivityChecking::Dynamic => Enforcement::Dynamic,
      ExclusivityChecking::Unchecked => Enforcement::Unchecked,
    }
  }

  pub(crate) fn enforcement(
    &self,
    kind: StorageKind,
  ) -> Enforcement {
    match kind {
      StorageKind::Stack | StorageKind::InOut => Enforcement::Static,
      StorageKind::Box | StorageKind::Captured => self.dynamic_enforcement(),
    }
  }
}

fn param_binding(
  convention: ArgConvention,
  value: ValueId,
) -> Binding {
  match convention {
    ArgConvention::IndirectInout => Binding::Storage {
      address: value,
      kind: StorageKind::InOut,
      boxed: None,
    },
    ArgConvention::IndirectInoutAliasable => Binding::Storage {
      address: value,
      kind: StorageKind::Captured,
      boxed: None,
    },
    ArgConvention::IndirectIn | ArgConvention::IndirectInGuaranteed | ArgConvention::IndirectOut => {
      Binding::Address(value)
    },
    ArgConvention::DirectOwned | ArgConvention::DirectGuaranteed | ArgConvention::DirectUnowned => {
      Binding::Value(value)
    },
  }
}
