use kiln_ast::{BinaryOp, DeclKind, ExprId, ExprKind, Literal};
use kiln_ir::{ConstValue, Instr, Ownership, Terminator, ValueId, ValueRepr};
use kiln_type::{
  span::Span,
  types::{Type, TypeId},
};

use crate::{error::LowerResult, function::FunctionLowering, managed::ManagedValue};

impl FunctionLowering<'_, '_> {
  /// Lower an expression to a value. Values of address-only types are
  /// produced as addresses; everything else as objects.
  pub(crate) fn emit_rvalue(
    &mut self,
    expr_id: ExprId,
  ) -> LowerResult<ManagedValue> {
    let expr = self.ast().expr(&expr_id);
    let span = expr.span;

    match &expr.kind {
      ExprKind::Literal(lit) => Ok(self.emit_literal(lit, expr.ty, span)),
      ExprKind::DeclRef(decl) => match &self.ast().decl(decl).kind {
        DeclKind::Func(_) => self.emit_function_value(*decl, expr.ty, span),
        _ => self.emit_read_var(*decl, expr.ty, span),
      },
      ExprKind::Call { .. } => match self.emit_call(expr_id, None)? {
        Some(value) => Ok(value),
        None => Ok(self.emit_unit(span)),
      },
      ExprKind::Binary { op, lhs, rhs } => self.emit_binary(*op, *lhs, *rhs, expr.ty, span),
      ExprKind::Assign { dest, source } => {
        self.emit_assign(*dest, *source, span)?;
        Ok(self.emit_unit(span))
      },
      ExprKind::InOut(_) => Err(self.precondition("'&' used outside an argument list", span)),
      ExprKind::Member { base, field } => self.emit_member(expr_id, *base, *field, expr.ty, span),
      ExprKind::Subscript { .. } => self.emit_load_from_lvalue(expr_id),
      ExprKind::EnumCase { case, payload } => self.emit_enum(expr_id, expr.ty, *case, *payload, span),
      ExprKind::StructInit(items) | ExprKind::Tuple(items) => self.emit_aggregate(expr_id, expr.ty, items, span),
      ExprKind::Closure(decl) => self.emit_function_value(*decl, expr.ty, span),
      ExprKind::Erase(inner) => self.emit_erasure(expr_id, *inner, expr.ty, span),
      ExprKind::FunctionConversion(inner) => self.emit_function_conversion(*inner, expr.ty, span),
      ExprKind::Ternary {
        condition,
        then_expr,
        else_expr,
      } => self.emit_ternary(expr_id, *condition, *then_expr, *else_expr, expr.ty, span),
      ExprKind::Try(inner) => self.emit_rvalue(*inner),
    }
  }

  /// Lower an expression to a value the current scope owns.
  pub(crate) fn emit_owned(
    &mut self,
    expr_id: ExprId,
  ) -> LowerResult<ManagedValue> {
    let span = self.ast().expr(&expr_id).span;
    let value = self.emit_rvalue(expr_id)?;
    Ok(self.ensure_owned(value, span))
  }

  /// Evaluates an expression for its effects. Whatever it produces is
  /// destroyed when the enclosing scope closes.
  pub(crate) fn emit_ignored(
    &mut self,
    expr_id: ExprId,
  ) -> LowerResult<()> {
    let expr = self.ast().expr(&expr_id);
    match &expr.kind {
      ExprKind::Assign { dest, source } => self.emit_assign(*dest, *source, expr.span),
      ExprKind::Call { .. } => self.emit_call(expr_id, None).map(|_| ()),
      _ => self.emit_rvalue(expr_id).map(|_| ()),
    }
  }

  /// A Bool condition, with any temporaries it needed already cleaned up.
  pub(crate) fn emit_condition(
    &mut self,
    expr_id: ExprId,
  ) -> LowerResult<ValueId> {
    let expr = self.ast().expr(&expr_id);
    if expr.ty != self.types().bool() {
      return Err(self.precondition(
        format!("condition has type '{}'", self.types().display(&expr.ty)),
        expr.span,
      ));
    }
    self.with_scope(|this| Ok(this.emit_rvalue(expr_id)?.value))
  }

  pub(crate) fn emit_unit(
    &mut self,
    span: Span,
  ) -> ManagedValue {
    let unit = self.types().unit();
    let dest = self.object(unit, Ownership::Trivial, span);
    self.b.emit(Instr::Const {
      dest,
      value: ConstValue::Unit,
    });
    ManagedValue::unmanaged(dest)
  }

  fn emit_literal(
    &mut self,
    lit: &Literal,
    ty: TypeId,
    span: Span,
  ) -> ManagedValue {
    let (value, ownership) = match lit {
      Literal::Int(v) => (ConstValue::Int(*v), Ownership::Trivial),
      Literal::Float(v) => (ConstValue::Float(*v), Ownership::Trivial),
      Literal::Bool(v) => (ConstValue::Bool(*v), Ownership::Trivial),
      Literal::Str(s) => (ConstValue::Str(s.clone()), Ownership::Owned),
      Literal::Unit => (ConstValue::Unit, Ownership::Trivial),
    };

    let dest = self.object(ty, ownership, span);
    self.b.emit(Instr::Const { dest, value });
    self.manage(dest)
  }

  fn emit_binary(
    &mut self,
    op: BinaryOp,
    lhs: ExprId,
    rhs: ExprId,
    ty: TypeId,
    span: Span,
  ) -> LowerResult<ManagedValue> {
    if matches!(op, BinaryOp::And | BinaryOp::Or) {
      return self.emit_short_circuit(op, lhs, rhs, ty, span);
    }

    let (lhs, rhs) = self.with_scope(|this| {
      let lhs = this.emit_rvalue(lhs)?.value;
      let rhs = this.emit_rvalue(rhs)?.value;
      for operand in [lhs, rhs] {
        let data = this.b.value(operand);
        if data.ownership != Ownership::Trivial || data.is_address() {
          return Err(this.precondition(format!("'{}' needs trivial operands", op), span));
        }
      }
      Ok((lhs, rhs))
    })?;

    let dest = self.object(ty, Ownership::Trivial, span);
    self.b.emit(Instr::Builtin { dest, op, lhs, rhs });
    Ok(ManagedValue::unmanaged(dest))
  }

  fn emit_short_circuit(
    &mut self,
    op: BinaryOp,
    lhs: ExprId,
    rhs: ExprId,
    ty: TypeId,
    span: Span,
  ) -> LowerResult<ManagedValue> {
    let lhs = self.emit_condition(lhs)?;

    let rhs_bb = self.b.create_block(if op == BinaryOp::And { "and_rhs" } else { "or_rhs" });
    let short_bb = self.b.create_block("short_circuit");
    let join = self.b.create_block("logic_join");
    let result = self.b.add_block_param(join, ty, Ownership::Trivial, ValueRepr::Object, span);

    let (then_block, else_block) = if op == BinaryOp::And {
      (rhs_bb, short_bb)
    } else {
      (short_bb, rhs_bb)
    };
    self.b.terminate(Terminator::CondBr {
      condition: lhs,
      then_block,
      else_block,
    });

    // The short-circuited side already knows the answer: it is lhs
    self.b.switch_to_block(short_bb);
    self.b.terminate(Terminator::Br {
      target: join,
      args: vec![lhs],
    });

    self.b.switch_to_block(rhs_bb);
    let rhs = self.emit_condition(rhs)?;
    self.b.terminate(Terminator::Br {
      target: join,
      args: vec![rhs],
    });

    self.b.switch_to_block(join);
    Ok(ManagedValue::unmanaged(result))
  }

  fn emit_member(
    &mut self,
    expr_id: ExprId,
    base: ExprId,
    field: u32,
    ty: TypeId,
    span: Span,
  ) -> LowerResult<ManagedValue> {
    if self.is_lvalue_expr(expr_id) {
      return self.emit_load_from_lvalue(expr_id);
    }

    let base_ty = self.ast().expr(&base).ty;
    let base_value = self.emit_rvalue(base)?;
    if self.b.value(base_value.value).is_address() {
      let element = self.element_address(base_value.value, base_ty, field, span)?;
      return Ok(self.read_address(element, ty, span));
    }

    // Borrowed from the aggregate, which outlives the expression
    let info = self.type_info(ty);
    let dest = self.object(ty, info.borrowed_ownership(), span);
    let operand = base_value.value;
    let instr = if matches!(self.types().get(&base_ty), Type::Tuple(_)) {
      Instr::TupleExtract {
        dest,
        operand,
        index: field,
      }
    } else {
      Instr::StructExtract { dest, operand, field }
    };
    self.b.emit(instr);
    Ok(ManagedValue::unmanaged(dest))
  }

  fn emit_enum(
    &mut self,
    expr_id: ExprId,
    ty: TypeId,
    case: u32,
    payload: Option<ExprId>,
    span: Span,
  ) -> LowerResult<ManagedValue> {
    let info = self.type_info(ty);
    if info.is_address_only() {
      return self.emit_into_temporary(expr_id, ty, span);
    }

    let declared = self.enum_case(ty, case, payload.is_some(), span)?;
    let payload = match (payload, declared.payload) {
      (Some(p), Some(payload_ty)) if declared.indirect => {
        let boxed = self.emit_indirect_payload(p, payload_ty, span)?;
        Some(boxed.forward(&mut self.cleanups))
      },
      (Some(p), _) => {
        let value = self.emit_owned(p)?;
        Some(value.forward(&mut self.cleanups))
      },
      _ => None,
    };

    let dest = self.object(ty, info.fresh_ownership(), span);
    self.b.emit(Instr::Enum {
      dest,
      ty,
      case,
      payload,
    });
    Ok(self.manage(dest))
  }

  fn emit_aggregate(
    &mut self,
    expr_id: ExprId,
    ty: TypeId,
    items: &[ExprId],
    span: Span,
  ) -> LowerResult<ManagedValue> {
    let info = self.type_info(ty);
    if info.is_address_only() {
      return self.emit_into_temporary(expr_id, ty, span);
    }

    // Every item is evaluated before any is consumed, so a throw part way
    // through still destroys the finished ones
    let mut values = Vec::with_capacity(items.len());
    for item in items {
      values.push(self.emit_owned(*item)?);
    }

    if self.types().is_class(&ty) {
      let dest = self.object(ty, Ownership::Owned, span);
      self.b.emit(Instr::AllocRef { dest, ty });
      let object = self.manage(dest);
      for (field, value) in values.into_iter().enumerate() {
        let field_ty = self.b.value_type(value.value);
        let address = self.address(field_ty, span);
        self.b.emit(Instr::RefElementAddr {
          dest: address,
          object: dest,
          field: field as u32,
        });
        self.move_into(value, address, span);
      }
      return Ok(object);
    }

    let operands: Vec<ValueId> = values.into_iter().map(|v| v.forward(&mut self.cleanups)).collect();
    let dest = self.object(ty, info.fresh_ownership(), span);
    let instr = if matches!(self.types().get(&ty), Type::Tuple(_)) {
      Instr::Tuple {
        dest,
        elements: operands,
      }
    } else {
      Instr::Struct {
        dest,
        ty,
        fields: operands,
      }
    };
    self.b.emit(instr);
    Ok(self.manage(dest))
  }

  fn emit_erasure(
    &mut self,
    expr_id: ExprId,
    inner: ExprId,
    ty: TypeId,
    span: Span,
  ) -> LowerResult<ManagedValue> {
    let concrete = self.ast().expr(&inner).ty;

    if ty == self.types().error_existential() {
      let dest = self.object(ty, Ownership::Owned, span);
      let payload = self.address(concrete, span);
      self.b.emit(Instr::AllocExistentialBox { dest, payload, concrete });
      return self.init_box_payload(dest, |this| this.emit_into(inner, payload));
    }

    let info = self.type_info(ty);
    if info.is_address_only() {
      return self.emit_into_temporary(expr_id, ty, span);
    }

    // Class-bound existential: a single reference
    let value = self.emit_owned(inner)?;
    let operand = value.forward(&mut self.cleanups);
    let dest = self.object(ty, Ownership::Owned, span);
    self.b.emit(Instr::InitExistentialRef { dest, operand });
    Ok(self.manage(dest))
  }

  fn emit_ternary(
    &mut self,
    expr_id: ExprId,
    condition: ExprId,
    then_expr: ExprId,
    else_expr: ExprId,
    ty: TypeId,
    span: Span,
  ) -> LowerResult<ManagedValue> {
    let info = self.type_info(ty);
    if info.is_address_only() {
      return self.emit_into_temporary(expr_id, ty, span);
    }

    let condition = self.emit_condition(condition)?;
    let then_bb = self.b.create_block("ternary_then");
    let else_bb = self.b.create_block("ternary_else");
    let join = self.b.create_block("ternary_join");
    let result = self
      .b
      .add_block_param(join, ty, info.fresh_ownership(), ValueRepr::Object, span);

    self.b.terminate(Terminator::CondBr {
      condition,
      then_block: then_bb,
      else_block: else_bb,
    });

    for (block, arm) in [(then_bb, then_expr), (else_bb, else_expr)] {
      self.b.switch_to_block(block);
      let value = self.with_scope(|this| {
        let value = this.emit_owned(arm)?;
        Ok(value.forward(&mut this.cleanups))
      })?;
      self.b.terminate(Terminator::Br {
        target: join,
        args: vec![value],
      });
    }

    self.b.switch_to_block(join);
    Ok(self.manage(result))
  }

  /// Materializes an address-only expression into a fresh temporary the
  /// current scope owns.
  fn emit_into_temporary(
    &mut self,
    expr_id: ExprId,
    ty: TypeId,
    span: Span,
  ) -> LowerResult<ManagedValue> {
    let temp = self.alloc_temporary(ty, span);
    self.emit_into(expr_id, temp)?;
    Ok(self.manage_address(temp))
  }
}
