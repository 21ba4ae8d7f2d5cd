//! Function values: references to declared functions and closures over
//! their captured variables.

use kiln_ast::DeclId;
use kiln_config::DebugTrace;
use kiln_ir::{AccessKind, ArgConvention, Instr, Ownership};
use kiln_log::trace_dbg;
use kiln_type::{
  span::Span,
  types::{FnRepr, TypeId},
};

use crate::{
  captures::{Capture, CaptureMode},
  error::LowerResult,
  function::{Binding, FunctionLowering},
  managed::ManagedValue,
};

impl FunctionLowering<'_, '_> {
  /// The value of a function declaration or closure expression, typed `ty`.
  pub(crate) fn emit_function_value(
    &mut self,
    decl: DeclId,
    ty: TypeId,
    span: Span,
  ) -> LowerResult<ManagedValue> {
    let name = self.ast().decl(&decl).name.clone();
    let Some(&func) = self.m.functions.get(&decl) else {
      return Err(self.precondition(format!("'{}' was not declared", name), span));
    };
    let Some(target) = self.types().as_function(&ty).cloned() else {
      return Err(self.precondition(format!("'{}' is used as a non-function value", name), span));
    };

    let captures = self.m.captures.captures(&decl).to_vec();
    if matches!(target.repr, FnRepr::Thin | FnRepr::CFunctionPointer) {
      if !captures.is_empty() {
        return Err(self.precondition(format!("'{}' captures context and cannot be thin", name), span));
      }
      let fref = self.function_ref(func, ty, span);
      return Ok(ManagedValue::unmanaged(fref));
    }

    let decl_ty = self.ast().decl_type(&decl);
    let thin = self.thin_type(decl_ty);
    let fref = self.function_ref(func, thin, span);

    if captures.is_empty() {
      let dest = self.object(ty, Ownership::Owned, span);
      self.b.emit(Instr::ThinToThick { dest, func: fref });
      return Ok(self.manage(dest));
    }

    let escaping = self.types().as_function(&decl_ty).is_some_and(|f| f.escaping);
    let (operands, conventions) = if escaping {
      let mut values = Vec::with_capacity(captures.len());
      for capture in &captures {
        values.push(self.escaping_capture(*capture, span)?);
      }
      let operands: Vec<_> = values.into_iter().map(|v| v.forward(&mut self.cleanups)).collect();
      let conventions = vec![ArgConvention::DirectOwned; operands.len()];
      (operands, conventions)
    } else {
      let values = self.emit_capture_operands(decl, span)?;
      let all = self.m.module.function(&func).signature.conventions();
      let conventions = all[all.len().saturating_sub(values.len())..].to_vec();
      (values.into_iter().map(|v| v.value).collect(), conventions)
    };

    let dest = self.object(ty, Ownership::Owned, span);
    self.b.emit(Instr::PartialApply {
      dest,
      callee: fref,
      captures: operands,
      conventions,
      on_stack: !escaping,
    });
    trace_dbg!(
      self.config(),
      DebugTrace::Closure,
      "{} closes over {} values{}",
      name,
      captures.len(),
      if escaping { "" } else { " on the stack" }
    );
    Ok(self.manage(dest))
  }

  /// Owned context for a closure that may outlive the current function.
  fn escaping_capture(
    &mut self,
    capture: Capture,
    span: Span,
  ) -> LowerResult<ManagedValue> {
    let var_ty = self.ast().decl_type(&capture.decl);

    match capture.mode {
      CaptureMode::ByValue => {
        let value = self.emit_read_var(capture.decl, var_ty, span)?;
        Ok(self.ensure_owned(value, span))
      },
      CaptureMode::ByBox => {
        if let Binding::Storage { boxed: Some(boxed), .. } = self.binding(capture.decl, span)? {
          return Ok(self.ensure_owned(ManagedValue::unmanaged(boxed), span));
        }

        // An immutable value moves into a fresh box of its own
        let boxed_ty = self.m.types.boxed(var_ty);
        let dest = self.object(boxed_ty, Ownership::Owned, span);
        self.b.emit(Instr::AllocBox { dest, ty: var_ty });
        let boxed = self.manage(dest);
        let address = self.address(var_ty, span);
        self.b.emit(Instr::ProjectBox {
          dest: address,
          boxed: dest,
        });
        let value = self.emit_read_var(capture.decl, var_ty, span)?;
        self.move_into(value, address, span);
        Ok(boxed)
      },
      CaptureMode::ByBorrow | CaptureMode::ByAddress => Err(self.precondition(
        format!(
          "escaping closure captures '{}' by address",
          self.ast().decl(&capture.decl).name
        ),
        span,
      )),
    }
  }

  /// Capture arguments for a call to, or a non-escaping closure over, a
  /// local function. They are all borrowed from the current scope.
  pub(crate) fn emit_capture_operands(
    &mut self,
    decl: DeclId,
    span: Span,
  ) -> LowerResult<Vec<ManagedValue>> {
    let captures = self.m.captures.captures(&decl).to_vec();
    let mut operands = Vec::with_capacity(captures.len());
    for capture in captures {
      operands.push(self.guaranteed_capture(capture, span)?);
    }
    Ok(operands)
  }

  fn guaranteed_capture(
    &mut self,
    capture: Capture,
    span: Span,
  ) -> LowerResult<ManagedValue> {
    let var_ty = self.ast().decl_type(&capture.decl);
    let binding = self.binding(capture.decl, span)?;

    match (capture.mode, binding) {
      (CaptureMode::ByBox, Binding::Storage { boxed: Some(boxed), .. }) => Ok(ManagedValue::unmanaged(boxed)),
      (CaptureMode::ByBox, _) => {
        let boxed = self.escaping_capture(capture, span)?;
        Ok(ManagedValue::unmanaged(boxed.value))
      },
      (CaptureMode::ByAddress, Binding::Storage { address, .. } | Binding::Address(address)) => {
        Ok(ManagedValue::unmanaged(address))
      },
      (CaptureMode::ByValue | CaptureMode::ByBorrow, Binding::Value(value)) => {
        Ok(self.borrow_value(ManagedValue::unmanaged(value), span))
      },
      (CaptureMode::ByValue | CaptureMode::ByBorrow, Binding::Address(address)) => {
        Ok(ManagedValue::unmanaged(self.load_guaranteed(address, var_ty, span)))
      },
      (CaptureMode::ByValue | CaptureMode::ByBorrow, Binding::Storage { .. } | Binding::Global(_)) => {
        let address = self.emit_storage_access(capture.decl, &[], AccessKind::Read, span)?;
        Ok(ManagedValue::unmanaged(self.load_guaranteed(address, var_ty, span)))
      },
      _ => Err(self.precondition(
        format!("cannot capture '{}' here", self.ast().decl(&capture.decl).name),
        span,
      )),
    }
  }
}
