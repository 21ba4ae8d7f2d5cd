//! Reabstraction thunks.
//!
//! A thunk adapts a function of one type to the calling convention of
//! another: it receives arguments the way the target type passes them,
//! converts each one to the way the source type expects it, calls the
//! source and converts the result back. Thunks are memoized per
//! `(source, target, callee)` so every conversion site shares one body.

use kiln_ast::{DeclKind, ExprId, ExprKind};
use kiln_config::DebugTrace;
use kiln_ir::{
  ArgConvention, FuncId, Function, FunctionKind, Instr, LoadQualifier, LoweredParam, LoweredSignature, Ownership,
  Terminator, ThunkKey, ValueId,
};
use kiln_log::trace_dbg;
use kiln_type::{
  span::Span,
  types::{FnParam, FnRepr, FunctionType, ParamConvention, TypeId},
};

use crate::{
  context::ModuleLowering,
  error::{LowerError, LowerResult},
  function::FunctionLowering,
  managed::ManagedValue,
};

/// What one thunk body calls and how.
pub(crate) struct ThunkPlan {
  pub from: TypeId,
  pub source: LoweredSignature,
  /// Called directly; without one the source function arrives as the
  /// thunk's trailing context parameter.
  pub callee: Option<FuncId>,
}

impl ModuleLowering<'_> {
  /// The thunk converting functions of type `from` to type `to`, built on
  /// first request.
  pub(crate) fn reabstraction_thunk(
    &mut self,
    from: TypeId,
    to: TypeId,
    callee: Option<FuncId>,
    span: Span,
  ) -> LowerResult<FuncId> {
    let key = ThunkKey { from, to, callee };
    if let Some(existing) = self.module.thunks.get(&key) {
      trace_dbg!(
        self.config,
        DebugTrace::Thunk,
        "reusing {} for {} -> {}",
        self.module.function(&existing).name,
        self.types.display(&from),
        self.types.display(&to)
      );
      return Ok(existing);
    }

    self.check_thunkable(from, to, span)?;
    let (Some(source), Some(mut signature)) = (self.lower_function_type(from), self.lower_function_type(to)) else {
      return Err(self.conversion_error(from, to, "not a function type", span));
    };
    signature.repr = FnRepr::Thin;
    if callee.is_none() {
      signature.params.push(LoweredParam {
        ty: from,
        convention: ArgConvention::DirectGuaranteed,
      });
    }

    let callee_name = callee.map(|f| self.module.function(&f).name.clone());
    let name = self.unique_name(self.mangler.mangle_thunk(callee_name.as_deref(), self.module.thunks.len()));
    let declaration = Function::declaration(name.clone(), None, FunctionKind::Thunk, signature, span);

    let plan = ThunkPlan { from, source, callee };
    let function = FunctionLowering::new(self, declaration).lower_thunk(plan, span)?;
    let id = self.module.add_function(function);
    let id = self.module.thunks.insert_if_absent(key, id);

    trace_dbg!(
      self.config,
      DebugTrace::Thunk,
      "{}: {} -> {}",
      name,
      self.types.display(&from),
      self.types.display(&to)
    );
    Ok(id)
  }

  fn conversion_error(
    &self,
    from: TypeId,
    to: TypeId,
    reason: impl Into<String>,
    span: Span,
  ) -> LowerError {
    LowerError::UnsupportedConversion {
      from: self.types.display(&from),
      to: self.types.display(&to),
      reason: reason.into(),
      span,
    }
  }

  /// Thunks only change how values are passed, never which values.
  fn check_thunkable(
    &self,
    from: TypeId,
    to: TypeId,
    span: Span,
  ) -> LowerResult<()> {
    let (Some(source), Some(target)) = (self.types.as_function(&from), self.types.as_function(&to)) else {
      return Err(self.conversion_error(from, to, "not a function type", span));
    };

    if source.throws && !target.throws {
      return Err(self.conversion_error(from, to, "a throwing function cannot become non-throwing", span));
    }
    if source.params.len() != target.params.len() {
      return Err(self.conversion_error(from, to, "parameter counts differ", span));
    }
    for (i, (have, want)) in source.params.iter().zip(target.params.iter()).enumerate() {
      if have.ty != want.ty {
        return Err(self.conversion_error(from, to, format!("parameter {} has a different type", i), span));
      }
      if (have.convention == ParamConvention::Inout) != (want.convention == ParamConvention::Inout) {
        return Err(self.conversion_error(from, to, format!("parameter {} differs in inout-ness", i), span));
      }
    }
    if source.result != target.result {
      return Err(self.conversion_error(from, to, "result types differ", span));
    }
    Ok(())
  }
}

impl FunctionLowering<'_, '_> {
  pub(crate) fn lower_thunk(
    mut self,
    plan: ThunkPlan,
    span: Span,
  ) -> LowerResult<Function> {
    let signature = self.b.signature().clone();
    let mut params = signature.params.clone();

    let out = match signature.indirect_result() {
      Some(_) => {
        let param = params.remove(0);
        Some(self.entry_param(param, span).value)
      },
      None => None,
    };
    let context_param = if plan.callee.is_none() { params.pop() } else { None };

    let mut inputs = Vec::with_capacity(params.len());
    for param in &params {
      let value = self.entry_param(*param, span);
      inputs.push((value, *param));
    }
    let context = context_param.map(|p| self.entry_param(p, span).value);

    let callee = match (plan.callee, context) {
      (Some(func), _) => {
        let thin = self.thin_type(plan.from);
        self.function_ref(func, thin, span)
      },
      (None, Some(context)) => context,
      (None, None) => return Err(self.precondition("thunk has nothing to call", span)),
    };

    let source = &plan.source;
    let source_out = source.indirect_result().copied();
    let source_params = &source.params[usize::from(source_out.is_some())..];
    if source_params.len() != inputs.len() {
      return Err(self.precondition("thunk and callee disagree on arity", span));
    }

    let result_address = match (source_out, out) {
      (Some(_), Some(out)) => Some(out),
      (Some(param), None) => Some(self.alloc_temporary(param.ty, span)),
      (None, _) => None,
    };

    let depth = self.cleanups.depth();
    let mut operands = Vec::with_capacity(inputs.len());
    for ((value, have), want) in inputs.into_iter().zip(source_params.iter()) {
      operands.push(self.convert_argument(value, have, *want, span)?);
    }

    let mut args: Vec<ValueId> = result_address.into_iter().collect();
    args.extend(operands.into_iter().map(|v| v.forward(&mut self.cleanups)));
    let direct = self.emit_apply(callee, args, source, span)?;
    self.pop_cleanups_to(depth);

    // Results are returned unmanaged; `return` consumes them
    let returned = match (source_out, out, result_address) {
      (Some(_), Some(_), _) | (None, None, _) => direct,
      (Some(param), None, Some(temp)) => {
        let info = self.type_info(param.ty);
        let (ownership, qualifier) = if info.trivial {
          (Ownership::Trivial, LoadQualifier::Trivial)
        } else {
          (Ownership::Owned, LoadQualifier::Take)
        };
        let dest = self.object(param.ty, ownership, span);
        self.b.emit(Instr::Load {
          dest,
          address: temp,
          qualifier,
        });
        Some(dest)
      },
      (None, Some(out), _) => {
        let value = match direct {
          Some(value) => ManagedValue::unmanaged(value),
          None => self.emit_unit(span),
        };
        self.store_init(value, out);
        None
      },
      (Some(_), None, None) => return Err(self.precondition("indirect result has no memory", span)),
    };

    self.emit_cleanups_to(0);
    self.b.terminate(Terminator::Return(returned));
    self.finish_body()
  }

  /// Adapts one argument from the thunk's convention (`have`) to the
  /// callee's (`want`). Only arguments the callee consumes come back managed.
  fn convert_argument(
    &mut self,
    value: ManagedValue,
    have: LoweredParam,
    want: LoweredParam,
    span: Span,
  ) -> LowerResult<ManagedValue> {
    use ArgConvention::*;

    if have.convention == want.convention {
      return Ok(value);
    }

    match (have.convention, want.convention) {
      (DirectOwned, DirectGuaranteed | DirectUnowned)
      | (DirectGuaranteed, DirectUnowned)
      | (IndirectIn, IndirectInGuaranteed) => Ok(ManagedValue::unmanaged(value.value)),
      // Nothing keeps an unowned reference alive across the call
      (DirectUnowned, DirectGuaranteed) => {
        let owned = self.ensure_owned(value, span);
        Ok(ManagedValue::unmanaged(owned.value))
      },
      (DirectGuaranteed | DirectUnowned, DirectOwned) => Ok(self.ensure_owned(value, span)),
      (IndirectInGuaranteed, IndirectIn) => {
        let temp = self.alloc_temporary(have.ty, span);
        self.b.emit(Instr::CopyAddr {
          source: value.value,
          dest: temp,
          take: false,
          init: true,
        });
        Ok(self.manage_address(temp))
      },
      (IndirectIn, DirectOwned) => {
        let info = self.type_info(want.ty);
        let address = value.forward(&mut self.cleanups);
        let (ownership, qualifier) = if info.trivial {
          (Ownership::Trivial, LoadQualifier::Trivial)
        } else {
          (Ownership::Owned, LoadQualifier::Take)
        };
        let dest = self.object(want.ty, ownership, span);
        self.b.emit(Instr::Load {
          dest,
          address,
          qualifier,
        });
        Ok(self.manage(dest))
      },
      (IndirectInGuaranteed, DirectOwned) => Ok(self.read_address(value.value, want.ty, span)),
      (IndirectIn | IndirectInGuaranteed, DirectGuaranteed | DirectUnowned) => {
        Ok(ManagedValue::unmanaged(self.load_guaranteed(value.value, want.ty, span)))
      },
      (DirectOwned | DirectGuaranteed | DirectUnowned, IndirectIn | IndirectInGuaranteed) => {
        let temp = self.alloc_temporary(want.ty, span);
        let owned = self.ensure_owned(value, span);
        self.store_init(owned, temp);
        let cleanup = self.manage_address(temp);
        if want.convention.is_consumed() {
          Ok(cleanup)
        } else {
          Ok(ManagedValue::unmanaged(temp))
        }
      },
      (IndirectInout, IndirectInoutAliasable) | (IndirectInoutAliasable, IndirectInout) => {
        Ok(ManagedValue::unmanaged(value.value))
      },
      (have, want) => Err(self.precondition(format!("cannot pass a {} argument as {}", have, want), span)),
    }
  }

  /// Conversion between function types, through a thunk when the calling
  /// conventions differ.
  pub(crate) fn emit_function_conversion(
    &mut self,
    inner: ExprId,
    ty: TypeId,
    span: Span,
  ) -> LowerResult<ManagedValue> {
    let from = self.ast().expr(&inner).ty;
    if from == ty {
      return self.emit_rvalue(inner);
    }

    let (Some(source), Some(target)) = (
      self.types().as_function(&from).cloned(),
      self.types().as_function(&ty).cloned(),
    ) else {
      return Err(self.unsupported(from, ty, "not a function type", span));
    };
    if source.throws && !target.throws {
      return Err(self.unsupported(from, ty, "a throwing function cannot become non-throwing", span));
    }
    if !source.escaping && target.escaping {
      return Err(self.unsupported(from, ty, "a non-escaping function cannot become escaping", span));
    }

    match target.repr {
      FnRepr::Thin | FnRepr::CFunctionPointer => self.emit_context_free_conversion(inner, from, ty, &target, span),
      FnRepr::Thick | FnRepr::Block => self.emit_thick_conversion(inner, from, ty, &source, &target, span),
    }
  }

  fn emit_context_free_conversion(
    &mut self,
    inner: ExprId,
    from: TypeId,
    ty: TypeId,
    target: &FunctionType,
    span: Span,
  ) -> LowerResult<ManagedValue> {
    let c_pointer = target.repr == FnRepr::CFunctionPointer;
    let Some(func) = self.context_free_function(inner) else {
      let reason = if c_pointer {
        "a C function pointer cannot capture context"
      } else {
        "a thin function cannot capture context"
      };
      return Err(self.unsupported(from, ty, reason, span));
    };

    if c_pointer {
      self.check_c_representable(from, ty, target, span)?;
    } else {
      let thin_from = self.thin_type(from);
      if self.m.lower_function_type(thin_from) == self.m.lower_function_type(ty) {
        return Ok(ManagedValue::unmanaged(self.function_ref(func, ty, span)));
      }
    }

    let thunk = self.m.reabstraction_thunk(from, ty, Some(func), span)?;
    Ok(ManagedValue::unmanaged(self.function_ref(thunk, ty, span)))
  }

  fn emit_thick_conversion(
    &mut self,
    inner: ExprId,
    from: TypeId,
    ty: TypeId,
    source: &FunctionType,
    target: &FunctionType,
    span: Span,
  ) -> LowerResult<ManagedValue> {
    let same_shape =
      source.params == target.params && source.result == target.result && source.opaque_result == target.opaque_result;

    if same_shape && source.repr == target.repr {
      let value = self.emit_owned(inner)?;
      let operand = value.forward(&mut self.cleanups);
      let dest = self.object(ty, Ownership::Owned, span);
      self.b.emit(Instr::ConvertFunction { dest, operand });
      return Ok(self.manage(dest));
    }

    if same_shape && source.throws == target.throws && source.repr == FnRepr::Thin {
      let value = self.emit_rvalue(inner)?;
      let dest = self.object(ty, Ownership::Owned, span);
      self.b.emit(Instr::ThinToThick {
        dest,
        func: value.value,
      });
      return Ok(self.manage(dest));
    }

    // The converted value is evaluated before the thunk exists
    let context = if target.escaping {
      self.emit_owned(inner)?
    } else {
      let value = self.emit_rvalue(inner)?;
      self.borrow_value(value, span)
    };

    let thunk = self.m.reabstraction_thunk(from, ty, None, span)?;
    let mut params = target.params.clone();
    params.push(FnParam {
      ty: from,
      convention: ParamConvention::Guaranteed,
      opaque: false,
    });
    let thunk_ty = self.m.types.function(FunctionType {
      params,
      repr: FnRepr::Thin,
      ..target.clone()
    });
    let fref = self.function_ref(thunk, thunk_ty, span);

    let (capture, convention) = if target.escaping {
      (context.forward(&mut self.cleanups), ArgConvention::DirectOwned)
    } else {
      (context.value, ArgConvention::DirectGuaranteed)
    };
    let dest = self.object(ty, Ownership::Owned, span);
    self.b.emit(Instr::PartialApply {
      dest,
      callee: fref,
      captures: vec![capture],
      conventions: vec![convention],
      on_stack: !target.escaping,
    });
    trace_dbg!(
      self.config(),
      DebugTrace::Thunk,
      "{} reabstracted to {}",
      self.types().display(&from),
      self.types().display(&ty)
    );
    Ok(self.manage(dest))
  }

  /// The function a context-free reference denotes, if it has no captures.
  fn context_free_function(
    &self,
    expr_id: ExprId,
  ) -> Option<FuncId> {
    match &self.ast().expr(&expr_id).kind {
      ExprKind::DeclRef(decl) | ExprKind::Closure(decl) => {
        let is_func = matches!(self.ast().decl(decl).kind, DeclKind::Func(_));
        if is_func && self.m.captures.captures(decl).is_empty() {
          self.m.functions.get(decl).copied()
        } else {
          None
        }
      },
      _ => None,
    }
  }

  fn check_c_representable(
    &mut self,
    from: TypeId,
    to: TypeId,
    target: &FunctionType,
    span: Span,
  ) -> LowerResult<()> {
    if target.throws {
      return Err(self.unsupported(from, to, "a C function pointer cannot throw", span));
    }

    for param in &target.params {
      if param.convention == ParamConvention::Inout || param.opaque || !self.type_info(param.ty).trivial {
        let reason = format!("'{}' is not representable in C", self.types().display(&param.ty));
        return Err(self.unsupported(from, to, reason, span));
      }
    }
    if target.opaque_result || !self.type_info(target.result).trivial {
      let reason = format!("'{}' is not representable in C", self.types().display(&target.result));
      return Err(self.unsupported(from, to, reason, span));
    }
    Ok(())
  }
}
