//! Calls: argument passing conventions, dynamic dispatch and error edges.

use kiln_ast::{Callee, DeclId, ExprId, ExprKind, FuncContext};
use kiln_config::{BorrowPolicy, DebugTrace};
use kiln_ir::{
  AccessKind, ArgConvention, Instr, LoadQualifier, LoweredParam, LoweredSignature, Ownership, Terminator, ValueId,
  ValueRepr,
};
use kiln_log::trace_dbg;
use kiln_type::{
  span::Span,
  types::{FnParam, FnRepr, FunctionType, ParamConvention, TypeId},
};

use crate::{
  access::overlaps, cleanup::CleanupKind, error::LowerResult, function::FunctionLowering, managed::ManagedValue,
};

/// Variable and field path an inout argument will modify.
pub(crate) type ModifiedPlace = (DeclId, Vec<u32>);

impl FunctionLowering<'_, '_> {
  /// Lower a call. With `into`, an indirect or direct result is written to
  /// that uninitialized memory and `None` is returned.
  pub(crate) fn emit_call(
    &mut self,
    expr_id: ExprId,
    into: Option<ValueId>,
  ) -> LowerResult<Option<ManagedValue>> {
    let expr = self.ast().expr(&expr_id);
    let span = expr.span;
    let ExprKind::Call { callee, args } = &expr.kind else {
      return Err(self.precondition("expression is not a call", span));
    };

    let signature = self.callee_signature(callee, span)?;
    if signature.coroutine {
      return Err(self.precondition("accessors can only be reached through a subscript", span));
    }

    let out = signature.indirect_result().copied();
    let mut params: &[LoweredParam] = &signature.params;
    if out.is_some() {
      params = &params[1..];
    }
    let self_param = match callee {
      Callee::ClassMethod { .. } | Callee::Witness { .. } => {
        let Some((first, rest)) = params.split_first() else {
          return Err(self.precondition("method has no self parameter", span));
        };
        params = rest;
        Some(*first)
      },
      _ => None,
    };

    let capture_count = match callee {
      Callee::Direct(decl) => self.m.captures.captures(decl).len(),
      _ => 0,
    };
    if params.len() != args.len() + capture_count {
      return Err(self.precondition(
        format!(
          "call passes {} arguments to a function taking {}",
          args.len(),
          params.len().saturating_sub(capture_count)
        ),
        span,
      ));
    }

    // The result's memory outlives the argument scope
    let temp = match (out, into) {
      (Some(out), None) => Some(self.alloc_temporary(out.ty, span)),
      _ => None,
    };
    let out_address = out.and(into.or(temp));

    let modified = self.modified_places(args, params);
    let depth = self.cleanups.depth();
    let mut operands = Vec::with_capacity(args.len() + 1);
    let callee_value = match callee {
      Callee::Direct(decl) => self.direct_callee(*decl, span)?,
      Callee::Value(callee_expr) => self.emit_rvalue(*callee_expr)?.value,
      Callee::ClassMethod { receiver, method } => {
        let Some(self_param) = self_param else {
          return Err(self.precondition("method has no self parameter", span));
        };
        let copy_out = self.read_precedes_modify(*receiver, &modified);
        let receiver_value = self.emit_arg(*receiver, self_param, copy_out, span)?;
        let object = receiver_value.value;
        operands.push(receiver_value);
        self.emit_class_method(*receiver, *method, object, span)?
      },
      Callee::Witness {
        receiver,
        protocol,
        requirement,
        method_ty,
      } => {
        let receiver_ty = self.ast().expr(receiver).ty;
        let witness_ty = self.witness_method_type(receiver_ty, *method_ty, span)?;
        let receiver_param = LoweredParam {
          ty: receiver_ty,
          convention: ArgConvention::IndirectInGuaranteed,
        };
        let copy_out = self.read_precedes_modify(*receiver, &modified);
        let existential = self.emit_arg(*receiver, receiver_param, copy_out, span)?;

        let opened = self.address(receiver_ty, span);
        self.b.emit(Instr::OpenExistentialAddr {
          dest: opened,
          address: existential.value,
        });
        let dest = self.object(witness_ty, Ownership::Trivial, span);
        self.b.emit(Instr::WitnessMethod {
          dest,
          opened,
          protocol: *protocol,
          requirement: *requirement,
        });
        trace_dbg!(
          self.config(),
          DebugTrace::Dispatch,
          "witness_method #{} on %{}",
          requirement,
          opened.index()
        );
        // The implementation receives the opened value as `self`
        operands.push(ManagedValue::unmanaged(opened));
        dest
      },
    };

    for (i, (arg, param)) in args.iter().zip(params.iter()).enumerate() {
      let copy_out = self.read_precedes_modify(*arg, &modified[i + 1..]);
      let value = self.emit_arg(*arg, *param, copy_out, span)?;
      operands.push(value);
    }
    if let Callee::Direct(decl) = callee {
      let captured = self.emit_capture_operands(*decl, span)?;
      operands.extend(captured);
    }

    // Nothing is consumed until every operand exists
    let mut call_args: Vec<ValueId> = out_address.into_iter().collect();
    call_args.extend(operands.into_iter().map(|v| v.forward(&mut self.cleanups)));
    let result = self.emit_apply(callee_value, call_args, &signature, span)?;
    self.pop_cleanups_to(depth);

    match (out, into, temp) {
      (Some(_), Some(_), _) => Ok(None),
      (Some(out), None, Some(temp)) => {
        let info = self.type_info(out.ty);
        if info.is_address_only() {
          return Ok(Some(self.manage_address(temp)));
        }
        let (ownership, qualifier) = if info.trivial {
          (Ownership::Trivial, LoadQualifier::Trivial)
        } else {
          (Ownership::Owned, LoadQualifier::Take)
        };
        let dest = self.object(out.ty, ownership, span);
        self.b.emit(Instr::Load {
          dest,
          address: temp,
          qualifier,
        });
        Ok(Some(self.manage(dest)))
      },
      (None, Some(dest), _) => {
        let value = match result {
          Some(value) => self.manage(value),
          None => self.emit_unit(span),
        };
        self.store_init(value, dest);
        Ok(None)
      },
      _ => Ok(result.map(|value| self.manage(value))),
    }
  }

  /// Emits `apply`, or `try_apply` with an error edge for throwing callees.
  /// Returns the direct result, which the caller must manage.
  pub(crate) fn emit_apply(
    &mut self,
    callee: ValueId,
    args: Vec<ValueId>,
    signature: &LoweredSignature,
    span: Span,
  ) -> LowerResult<Option<ValueId>> {
    let unit = self.types().unit();
    let has_result = signature.result != unit;
    let info = self.type_info(signature.result);
    let conventions = signature.conventions();

    let Some(error_ty) = signature.error else {
      let dest = has_result.then(|| self.object(signature.result, info.fresh_ownership(), span));
      self.b.emit(Instr::Apply {
        dest,
        callee,
        args,
        conventions,
      });
      return Ok(dest);
    };

    let normal = self.b.create_block("call_normal");
    let error = self.b.create_block("call_error");
    let result = has_result.then(|| {
      self
        .b
        .add_block_param(normal, signature.result, info.fresh_ownership(), ValueRepr::Object, span)
    });
    let error_value = self
      .b
      .add_block_param(error, error_ty, Ownership::Owned, ValueRepr::Object, span);

    self.b.terminate(Terminator::TryApply {
      callee,
      args,
      conventions,
      normal,
      error,
    });

    self.b.switch_to_block(error);
    self.emit_throw_edge(error_value, span)?;

    self.b.switch_to_block(normal);
    Ok(result)
  }

  fn callee_signature(
    &mut self,
    callee: &Callee,
    span: Span,
  ) -> LowerResult<LoweredSignature> {
    match callee {
      Callee::Direct(decl) | Callee::ClassMethod { method: decl, .. } => match self.m.functions.get(decl) {
        Some(func) => Ok(self.m.module.function(func).signature.clone()),
        None => Err(self.precondition(
          format!("'{}' was not declared", self.ast().decl(decl).name),
          span,
        )),
      },
      Callee::Value(callee_expr) => {
        let ty = self.ast().expr(callee_expr).ty;
        match self.m.lower_function_type(ty) {
          Some(signature) => Ok(signature),
          None => Err(self.precondition("callee is not a function", span)),
        }
      },
      Callee::Witness {
        receiver, method_ty, ..
      } => {
        let receiver_ty = self.ast().expr(receiver).ty;
        let ty = self.witness_method_type(receiver_ty, *method_ty, span)?;
        match self.m.lower_function_type(ty) {
          Some(signature) => Ok(signature),
          None => Err(self.precondition("requirement is not a function", span)),
        }
      },
    }
  }

  fn direct_callee(
    &mut self,
    decl: DeclId,
    span: Span,
  ) -> LowerResult<ValueId> {
    let Some(&func) = self.m.functions.get(&decl) else {
      return Err(self.precondition(
        format!("'{}' was not declared", self.ast().decl(&decl).name),
        span,
      ));
    };
    let ty = self.ast().decl_type(&decl);
    let thin = self.thin_type(ty);
    Ok(self.function_ref(func, thin, span))
  }

  /// Looks `method` up in the vtable of the receiver's dynamic class.
  fn emit_class_method(
    &mut self,
    receiver: ExprId,
    method: DeclId,
    object: ValueId,
    span: Span,
  ) -> LowerResult<ValueId> {
    let receiver_ty = self.ast().expr(&receiver).ty;
    let declared = match self.ast().func(&method).map(|f| f.context) {
      Some(FuncContext::Method { class, .. }) => class,
      _ => {
        return Err(self.precondition(
          format!("'{}' is not a class method", self.ast().decl(&method).name),
          span,
        ));
      },
    };
    let class = match self.types().as_nominal(&receiver_ty) {
      Some((id, _)) if self.types().is_class(&receiver_ty) => id,
      _ => declared,
    };
    let Some(&slot) = self.m.method_slots.get(&method) else {
      return Err(self.precondition(
        format!("'{}' has no vtable slot", self.ast().decl(&method).name),
        span,
      ));
    };

    let method_ty = self.ast().decl_type(&method);
    let thin = self.thin_type(method_ty);
    let dest = self.object(thin, Ownership::Trivial, span);
    self.b.emit(Instr::ClassMethod {
      dest,
      object,
      class,
      slot,
    });
    trace_dbg!(self.config(), DebugTrace::Dispatch, "class_method slot {} on %{}", slot, object.index());
    Ok(dest)
  }

  /// Type of a protocol requirement's implementation as seen through an
  /// existential: `self` is always passed indirectly and borrowed.
  pub(crate) fn witness_method_type(
    &mut self,
    receiver_ty: TypeId,
    method_ty: TypeId,
    span: Span,
  ) -> LowerResult<TypeId> {
    let Some(method) = self.types().as_function(&method_ty).cloned() else {
      return Err(self.precondition(
        format!("requirement has type '{}'", self.types().display(&method_ty)),
        span,
      ));
    };

    let mut params = vec![FnParam {
      ty: receiver_ty,
      convention: ParamConvention::Guaranteed,
      opaque: true,
    }];
    params.extend(method.params.iter().cloned());
    Ok(self.m.types.function(FunctionType {
      params,
      repr: FnRepr::Thin,
      ..method
    }))
  }

  /// The place each inout argument of a call modifies, when it is a
  /// variable or a stored projection of one.
  pub(crate) fn modified_places(
    &self,
    args: &[ExprId],
    params: &[LoweredParam],
  ) -> Vec<Option<ModifiedPlace>> {
    args
      .iter()
      .zip(params.iter())
      .map(|(arg, param)| match param.convention {
        ArgConvention::IndirectInout | ArgConvention::IndirectInoutAliasable => self.storage_projection(*arg),
        _ => None,
      })
      .collect()
  }

  /// Whether reading `expr_id` touches storage that a later argument of the
  /// same call modifies. Such a read has to end before that argument starts.
  pub(crate) fn read_precedes_modify(
    &self,
    expr_id: ExprId,
    later: &[Option<ModifiedPlace>],
  ) -> bool {
    let Some((root, path)) = self.storage_projection(expr_id) else {
      return false;
    };
    later
      .iter()
      .flatten()
      .any(|(other, other_path)| *other == root && overlaps(other_path, &path))
  }

  /// Evaluates one argument for a parameter. Only arguments the callee
  /// consumes come back with a cleanup; anything the caller keeps owning
  /// stays registered in the current scope. With `copy_out`, a borrowed
  /// argument read from storage is copied and its access closed at once.
  pub(crate) fn emit_arg(
    &mut self,
    expr_id: ExprId,
    param: LoweredParam,
    copy_out: bool,
    span: Span,
  ) -> LowerResult<ManagedValue> {
    match param.convention {
      ArgConvention::IndirectInout | ArgConvention::IndirectInoutAliasable => {
        let address = self.emit_lvalue(expr_id, AccessKind::Modify)?;
        Ok(ManagedValue::unmanaged(address))
      },
      ArgConvention::DirectOwned => self.emit_owned(expr_id),
      ArgConvention::DirectGuaranteed | ArgConvention::DirectUnowned => {
        let value = self.emit_guaranteed(expr_id, copy_out)?;
        Ok(ManagedValue::unmanaged(value))
      },
      ArgConvention::IndirectIn => {
        let temp = self.alloc_temporary(param.ty, span);
        self.emit_into(expr_id, temp)?;
        Ok(self.manage_address(temp))
      },
      ArgConvention::IndirectInGuaranteed => {
        let address = self.emit_guaranteed_address(expr_id, param.ty, copy_out, span)?;
        Ok(ManagedValue::unmanaged(address))
      },
      ArgConvention::IndirectOut => Err(self.precondition("an argument cannot be an indirect result", span)),
    }
  }

  /// A borrowed object valid until the current scope closes. Only a
  /// non-trivial value borrowed in place keeps its read access open; trivial
  /// reads and copies end the access before returning.
  pub(crate) fn emit_guaranteed(
    &mut self,
    expr_id: ExprId,
    copy_out: bool,
  ) -> LowerResult<ValueId> {
    let expr = self.ast().expr(&expr_id);
    let info = self.type_info(expr.ty);

    if self.borrow_policy() == BorrowPolicy::Borrow
      && !copy_out
      && info.is_loadable()
      && !info.trivial
      && self.is_lvalue_expr(expr_id)
    {
      let address = self.emit_lvalue(expr_id, AccessKind::Read)?;
      return Ok(self.load_guaranteed(address, expr.ty, expr.span));
    }

    let value = self.emit_rvalue(expr_id)?;
    Ok(self.borrow_value(value, expr.span).value)
  }

  /// Borrows an owned object for the rest of the current scope. Anything
  /// else is already safe to lend.
  pub(crate) fn borrow_value(
    &mut self,
    value: ManagedValue,
    span: Span,
  ) -> ManagedValue {
    let data = self.b.value(value.value);
    if data.ownership != Ownership::Owned || data.is_address() {
      return ManagedValue::unmanaged(value.value);
    }

    let ty = data.ty;
    let dest = self.object(ty, Ownership::Guaranteed, span);
    self.b.emit(Instr::BeginBorrow {
      dest,
      operand: value.value,
    });
    self.cleanups.push(CleanupKind::EndBorrow(dest));
    trace_dbg!(self.config(), DebugTrace::Ownership, "begin_borrow %{} of %{}", dest.index(), value.value.index());
    ManagedValue::unmanaged(dest)
  }

  /// Address of a value the callee borrows in memory.
  fn emit_guaranteed_address(
    &mut self,
    expr_id: ExprId,
    ty: TypeId,
    copy_out: bool,
    span: Span,
  ) -> LowerResult<ValueId> {
    if self.borrow_policy() == BorrowPolicy::Borrow && !copy_out && self.is_lvalue_expr(expr_id) {
      return self.emit_lvalue(expr_id, AccessKind::Read);
    }

    let value = self.emit_rvalue(expr_id)?;
    if self.b.value(value.value).is_address() {
      return Ok(value.value);
    }

    // A loadable value passed as if it were opaque
    let temp = self.alloc_temporary(ty, span);
    let owned = self.ensure_owned(value, span);
    self.store_init(owned, temp);
    self.manage_address(temp);
    Ok(temp)
  }
}
