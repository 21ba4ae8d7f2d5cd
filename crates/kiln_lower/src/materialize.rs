//! Temporaries for address-only values and in-place initialization.
//!
//! Address-only results are built directly in their final memory whenever
//! the consumer already has an address (a variable, an indirect result or
//! an argument temporary); only otherwise is a fresh `alloc_stack` made.

use kiln_ast::{ExprId, ExprKind};
use kiln_config::DebugTrace;
use kiln_ir::{Instr, Ownership, StoreQualifier, Terminator, ValueId};
use kiln_log::trace_dbg;
use kiln_type::{
  nominal::EnumCase,
  span::Span,
  types::{Type, TypeId},
};

use crate::{
  cleanup::CleanupKind,
  error::LowerResult,
  function::FunctionLowering,
  managed::ManagedValue,
};

impl FunctionLowering<'_, '_> {
  /// Stack memory for a value of `ty`, deallocated when the current scope closes.
  /// The contents are the caller's to initialize and destroy.
  pub(crate) fn alloc_temporary(
    &mut self,
    ty: TypeId,
    span: Span,
  ) -> ValueId {
    let dest = self.address(ty, span);
    self.b.emit(Instr::AllocStack { dest, ty });
    self.cleanups.push(CleanupKind::DeallocStack(dest));
    trace_dbg!(
      self.config(),
      DebugTrace::Materialize,
      "temporary %{} for {} in {}",
      dest.index(),
      self.types().display(&ty),
      self.name
    );
    dest
  }

  /// A value the current scope owns: borrowed objects are copied and
  /// borrowed addresses copied into a temporary.
  pub(crate) fn ensure_owned(
    &mut self,
    value: ManagedValue,
    span: Span,
  ) -> ManagedValue {
    if value.has_cleanup() {
      return value;
    }

    let data = self.b.value(value.value).clone();
    if data.is_address() {
      let temp = self.alloc_temporary(data.ty, span);
      self.b.emit(Instr::CopyAddr {
        source: value.value,
        dest: temp,
        take: false,
        init: true,
      });
      return self.manage_address(temp);
    }

    if data.ownership == Ownership::Trivial {
      return value;
    }

    let dest = self.object(data.ty, Ownership::Owned, span);
    self.b.emit(Instr::CopyValue {
      dest,
      operand: value.value,
    });
    trace_dbg!(self.config(), DebugTrace::Ownership, "copy %{} -> %{}", value.value.index(), dest.index());
    self.manage(dest)
  }

  /// Stores an owned or trivial object into uninitialized memory.
  pub(crate) fn store_init(
    &mut self,
    value: ManagedValue,
    address: ValueId,
  ) {
    let trivial = self.b.value(value.value).ownership == Ownership::Trivial;
    let value = value.forward(&mut self.cleanups);
    let qualifier = if trivial {
      StoreQualifier::Trivial
    } else {
      StoreQualifier::Init
    };
    self.b.emit(Instr::Store {
      value,
      address,
      qualifier,
    });
  }

  /// Initializes `dest` from an already lowered value, taking it when the
  /// scope owns it.
  pub(crate) fn move_into(
    &mut self,
    value: ManagedValue,
    dest: ValueId,
    span: Span,
  ) {
    if self.b.value(value.value).is_address() {
      let take = value.has_cleanup();
      let source = value.forward(&mut self.cleanups);
      self.b.emit(Instr::CopyAddr {
        source,
        dest,
        take,
        init: true,
      });
    } else {
      let owned = self.ensure_owned(value, span);
      self.store_init(owned, dest);
    }
  }

  /// Evaluate `expr` directly into the uninitialized memory at `dest`.
  pub(crate) fn emit_into(
    &mut self,
    expr_id: ExprId,
    dest: ValueId,
  ) -> LowerResult<()> {
    let expr = self.ast().expr(&expr_id);
    let span = expr.span;
    let info = self.type_info(expr.ty);

    match &expr.kind {
      ExprKind::Call { .. } => {
        self.emit_call(expr_id, Some(dest))?;
        Ok(())
      },
      ExprKind::Try(inner) => self.emit_into(*inner, dest),
      ExprKind::EnumCase { case, payload } if info.is_address_only() => {
        self.emit_enum_into(expr.ty, *case, *payload, dest, span)
      },
      ExprKind::Erase(inner) if info.is_address_only() => {
        let concrete = self.ast().expr(inner).ty;
        let payload = self.address(concrete, span);
        self.b.emit(Instr::InitExistentialAddr {
          dest: payload,
          address: dest,
          concrete,
        });
        self.emit_into(*inner, payload)
      },
      ExprKind::StructInit(fields) | ExprKind::Tuple(fields) if info.is_address_only() => {
        for (index, field) in fields.iter().enumerate() {
          let element = self.element_address(dest, expr.ty, index as u32, span)?;
          self.emit_into(*field, element)?;
        }
        Ok(())
      },
      ExprKind::Ternary {
        condition,
        then_expr,
        else_expr,
      } if info.is_address_only() => {
        let condition = self.emit_condition(*condition)?;
        let then_bb = self.b.create_block("ternary_then");
        let else_bb = self.b.create_block("ternary_else");
        let join = self.b.create_block("ternary_join");
        self.b.terminate(Terminator::CondBr {
          condition,
          then_block: then_bb,
          else_block: else_bb,
        });

        for (block, arm) in [(then_bb, *then_expr), (else_bb, *else_expr)] {
          self.b.switch_to_block(block);
          self.with_scope(|this| this.emit_into(arm, dest))?;
          self.b.terminate(Terminator::Br {
            target: join,
            args: vec![],
          });
        }

        self.b.switch_to_block(join);
        Ok(())
      },
      _ => self.with_scope(|this| {
        let value = this.emit_rvalue(expr_id)?;
        this.move_into(value, dest, span);
        Ok(())
      }),
    }
  }

  pub(crate) fn emit_enum_into(
    &mut self,
    ty: TypeId,
    case: u32,
    payload: Option<ExprId>,
    dest: ValueId,
    span: Span,
  ) -> LowerResult<()> {
    let declared = self.enum_case(ty, case, payload.is_some(), span)?;

    if let (Some(payload), Some(payload_ty)) = (payload, declared.payload) {
      let slot_ty = if declared.indirect {
        self.m.types.boxed(payload_ty)
      } else {
        payload_ty
      };
      let data = self.address(slot_ty, span);
      self.b.emit(Instr::InitEnumDataAddr {
        dest: data,
        address: dest,
        case,
      });
      if declared.indirect {
        let boxed = self.emit_indirect_payload(payload, payload_ty, span)?;
        self.store_init(boxed, data);
      } else {
        self.emit_into(payload, data)?;
      }
    }

    self.b.emit(Instr::InjectEnumAddr { address: dest, case });
    Ok(())
  }

  /// The box an indirect case carries, with `payload` evaluated into it.
  pub(crate) fn emit_indirect_payload(
    &mut self,
    payload: ExprId,
    payload_ty: TypeId,
    span: Span,
  ) -> LowerResult<ManagedValue> {
    let boxed_ty = self.m.types.boxed(payload_ty);
    let boxed = self.object(boxed_ty, Ownership::Owned, span);
    self.b.emit(Instr::AllocBox { dest: boxed, ty: payload_ty });
    let address = self.address(payload_ty, span);
    self.b.emit(Instr::ProjectBox { dest: address, boxed });
    trace_dbg!(
      self.config(),
      DebugTrace::Materialize,
      "indirect payload of {} in box %{}",
      self.types().display(&payload_ty),
      boxed.index()
    );
    self.init_box_payload(boxed, |this| this.emit_into(payload, address))
  }

  /// Runs `init` to fill a freshly allocated box. Until it completes, an
  /// early exit only deallocates the box; afterwards the scope owns the box
  /// and its contents.
  pub(crate) fn init_box_payload(
    &mut self,
    boxed: ValueId,
    init: impl FnOnce(&mut Self) -> LowerResult<()>,
  ) -> LowerResult<ManagedValue> {
    let uninit = self.cleanups.push(CleanupKind::DeallocBox(boxed));
    init(self)?;
    self.cleanups.forward(uninit);
    Ok(self.manage(boxed))
  }

  /// The declaration of `case`, checking that a payload is given exactly
  /// when the case declares one.
  pub(crate) fn enum_case(
    &self,
    ty: TypeId,
    case: u32,
    has_payload: bool,
    span: Span,
  ) -> LowerResult<EnumCase> {
    let Some(cases) = self.types().enum_cases(&ty) else {
      return Err(self.precondition(format!("'{}' is not an enum", self.types().display(&ty)), span));
    };
    let Some(declared) = cases.get(case as usize) else {
      return Err(self.precondition(
        format!("'{}' has no case {}", self.types().display(&ty), case),
        span,
      ));
    };
    if declared.payload.is_some() != has_payload {
      return Err(self.precondition(format!("payload does not match case '{}'", declared.name), span));
    }
    Ok(declared.clone())
  }

  /// Address of stored field or element `index` inside an aggregate in memory.
  pub(crate) fn element_address(
    &mut self,
    address: ValueId,
    aggregate: TypeId,
    index: u32,
    span: Span,
  ) -> LowerResult<ValueId> {
    let Some(field_ty) = self.types().field_type(&aggregate, index) else {
      return Err(self.precondition(
        format!("'{}' has no field {}", self.types().display(&aggregate), index),
        span,
      ));
    };

    let dest = self.address(field_ty, span);
    let instr = if matches!(self.types().get(&aggregate), Type::Tuple(_)) {
      Instr::TupleElementAddr { dest, address, index }
    } else {
      Instr::StructElementAddr {
        dest,
        address,
        field: index,
      }
    };
    self.b.emit(instr);
    Ok(dest)
  }
}
