use std::collections::HashSet;

use kiln_ast::{BinaryOp, DeclId, DeclKind, ExprId, StmtId, StmtKind, SwitchCase};
use kiln_config::DebugTrace;
use kiln_ir::{BlockId, ConstValue, Instr, LoadQualifier, Ownership, SwitchTarget, Terminator, ValueId, ValueRepr};
use kiln_log::trace_dbg;
use kiln_type::{nominal::EnumCase, span::Span, types::TypeId};

use crate::{
  cleanup::CleanupKind,
  error::LowerResult,
  function::{Binding, CatchScope, FunctionLowering, LoopScope, StorageKind},
  managed::ManagedValue,
};

impl FunctionLowering<'_, '_> {
  pub(crate) fn emit_stmt(
    &mut self,
    stmt_id: StmtId,
  ) -> LowerResult<()> {
    // Dead code after a jump
    if !self.b.has_insertion_point() {
      return Ok(());
    }

    let stmt = self.ast().stmt(&stmt_id);
    match &stmt.kind {
      // Bindings live until the enclosing block ends
      StmtKind::Let { decl, init } => self.emit_let(*decl, *init, stmt.span),
      StmtKind::LocalFunctions(_) => Ok(()),
      _ => self.with_scope(|this| this.emit_scoped_stmt(stmt_id)),
    }
  }

  fn emit_scoped_stmt(
    &mut self,
    stmt_id: StmtId,
  ) -> LowerResult<()> {
    let stmt = self.ast().stmt(&stmt_id);
    let span = stmt.span;

    match &stmt.kind {
      StmtKind::Expr(expr) => self.emit_ignored(*expr),
      StmtKind::Return(value) => self.emit_return(*value, span),
      StmtKind::Throw(error) => {
        let ty = self.ast().expr(error).ty;
        if ty != self.types().error_existential() {
          return Err(self.precondition(
            format!("thrown value has type '{}'", self.types().display(&ty)),
            span,
          ));
        }
        let error = self.emit_owned(*error)?;
        let error = error.forward(&mut self.cleanups);
        self.emit_throw_edge(error, span)
      },
      StmtKind::Block(stmts) => {
        for stmt in stmts {
          self.emit_stmt(*stmt)?;
        }
        Ok(())
      },
      StmtKind::If {
        condition,
        then_branch,
        else_branch,
      } => self.emit_if(*condition, *then_branch, *else_branch),
      StmtKind::Guard { condition, else_branch } => {
        let condition = self.emit_condition(*condition)?;
        let cont = self.b.create_block("guard_cont");
        let else_bb = self.b.create_block("guard_else");
        self.b.terminate(Terminator::CondBr {
          condition,
          then_block: cont,
          else_block: else_bb,
        });

        self.b.switch_to_block(else_bb);
        self.with_scope(|this| this.emit_stmt(*else_branch))?;
        if self.b.has_insertion_point() {
          return Err(self.precondition("guard body must not fall through", span));
        }

        self.b.switch_to_block(cont);
        Ok(())
      },
      StmtKind::Switch { subject, cases } => self.emit_switch(*subject, cases, span),
      StmtKind::While { condition, body } => self.emit_while(*condition, *body),
      StmtKind::ForRange { var, start, end, body } => self.emit_for_range(*var, *start, *end, *body, span),
      StmtKind::Break | StmtKind::Continue => {
        let is_break = matches!(stmt.kind, StmtKind::Break);
        let Some(scope) = self.loops.last().copied() else {
          let keyword = if is_break { "break" } else { "continue" };
          return Err(self.precondition(format!("'{}' outside a loop", keyword), span));
        };

        self.emit_cleanups_to(scope.depth);
        let target = if is_break {
          scope.break_block
        } else {
          scope.continue_block
        };
        self.b.terminate(Terminator::Br { target, args: vec![] });
        Ok(())
      },
      StmtKind::Do {
        body,
        catch_var,
        catch_body,
      } => self.emit_do(*body, *catch_var, *catch_body, span),
      StmtKind::Let { .. } | StmtKind::LocalFunctions(_) => self.emit_stmt(stmt_id),
    }
  }

  fn emit_return(
    &mut self,
    value: Option<ExprId>,
    span: Span,
  ) -> LowerResult<()> {
    let returned = match (value, self.indirect_result) {
      (Some(expr), Some(out)) => {
        self.emit_into(expr, out)?;
        None
      },
      (Some(expr), None) => {
        let value = self.emit_owned(expr)?;
        if self.b.signature().result == self.types().unit() {
          None
        } else {
          Some(value.forward(&mut self.cleanups))
        }
      },
      (None, _) => None,
    };

    if returned.is_none() && self.indirect_result.is_none() && self.b.signature().result != self.types().unit() {
      return Err(self.precondition("return without a value", span));
    }

    self.emit_cleanups_to(0);
    self.b.terminate(Terminator::Return(returned));
    Ok(())
  }

  fn emit_let(
    &mut self,
    decl: DeclId,
    init: Option<ExprId>,
    span: Span,
  ) -> LowerResult<()> {
    let name = self.ast().decl(&decl).name.clone();
    let DeclKind::Var(var) = &self.ast().decl(&decl).kind else {
      return Err(self.precondition(format!("'{}' is not a variable", name), span));
    };
    let (ty, mutable) = (var.ty, var.mutable);
    let info = self.type_info(ty);

    if mutable {
      let (address, kind, boxed) = self.alloc_var_storage(decl, ty, span);
      match init {
        Some(init) => self.emit_into(init, address)?,
        None if !info.trivial => {
          return Err(self.precondition(format!("'{}' must be initialized where it is declared", name), span));
        },
        None => {},
      }
      if kind == StorageKind::Stack && !info.trivial {
        self.cleanups.push(CleanupKind::DestroyAddr(address));
      }
      self.locals.insert(decl, Binding::Storage { address, kind, boxed });
      return Ok(());
    }

    let Some(init) = init else {
      return Err(self.precondition(format!("'{}' must be initialized where it is declared", name), span));
    };

    if info.is_address_only() {
      let temp = self.alloc_temporary(ty, span);
      self.emit_into(init, temp)?;
      self.cleanups.push(CleanupKind::DestroyAddr(temp));
      self.locals.insert(decl, Binding::Address(temp));
      return Ok(());
    }

    // Temporaries of the initializer die here; the value itself lives on
    let value = self.with_scope(|this| {
      let value = this.emit_owned(init)?;
      Ok(value.forward(&mut this.cleanups))
    })?;
    let value = self.manage(value);
    self.locals.insert(decl, Binding::Value(value.value));
    Ok(())
  }

  /// Memory for a mutable variable: a box when an escaping closure may
  /// share it, otherwise the stack.
  fn alloc_var_storage(
    &mut self,
    decl: DeclId,
    ty: TypeId,
    span: Span,
  ) -> (ValueId, StorageKind, Option<ValueId>) {
    if self.m.captures.is_boxed(&decl) {
      let boxed_ty = self.m.types.boxed(ty);
      let boxed = self.object(boxed_ty, Ownership::Owned, span);
      self.b.emit(Instr::AllocBox { dest: boxed, ty });
      self.cleanups.push(CleanupKind::DestroyValue(boxed));
      let address = self.address(ty, span);
      self.b.emit(Instr::ProjectBox { dest: address, boxed });
      trace_dbg!(
        self.config(),
        DebugTrace::Closure,
        "'{}' lives in box %{}",
        self.ast().decl(&decl).name,
        boxed.index()
      );
      return (address, StorageKind::Box, Some(boxed));
    }

    let address = self.alloc_temporary(ty, span);
    (address, StorageKind::Stack, None)
  }

  fn emit_if(
    &mut self,
    condition: ExprId,
    then_branch: StmtId,
    else_branch: Option<StmtId>,
  ) -> LowerResult<()> {
    let condition = self.emit_condition(condition)?;
    let then_bb = self.b.create_block("if_then");
    let else_bb = self
      .b
      .create_block(if else_branch.is_some() { "if_else" } else { "if_end" });
    self.b.terminate(Terminator::CondBr {
      condition,
      then_block: then_bb,
      else_block: else_bb,
    });

    let mut exits = Vec::new();
    self.b.switch_to_block(then_bb);
    self.with_scope(|this| this.emit_stmt(then_branch))?;
    exits.extend(self.b.current_block());

    match else_branch {
      Some(else_branch) => {
        self.b.switch_to_block(else_bb);
        self.with_scope(|this| this.emit_stmt(else_branch))?;
        exits.extend(self.b.current_block());
      },
      None => exits.push(else_bb),
    }

    self.merge_exits(exits, "if_merge");
    Ok(())
  }

  /// Continues in a block every fall-through exit branches to. With no
  /// exits the insertion point stays cleared.
  fn merge_exits(
    &mut self,
    exits: Vec<BlockId>,
    label: &str,
  ) {
    match exits.as_slice() {
      [] => {},
      [only] => self.b.switch_to_block(*only),
      _ => {
        let join = self.b.create_block(label);
        for exit in exits {
          self.b.switch_to_block(exit);
          self.b.terminate(Terminator::Br {
            target: join,
            args: vec![],
          });
        }
        self.b.switch_to_block(join);
      },
    }
  }

  fn emit_switch(
    &mut self,
    subject: ExprId,
    cases: &[SwitchCase],
    span: Span,
  ) -> LowerResult<()> {
    let subject_ty = self.ast().expr(&subject).ty;
    let Some(declared) = self.types().enum_cases(&subject_ty).map(|c| c.to_vec()) else {
      return Err(self.precondition(
        format!("cannot switch over '{}'", self.types().display(&subject_ty)),
        span,
      ));
    };

    let mut seen = HashSet::new();
    for case in cases {
      let Some(declared_case) = declared.get(case.case as usize) else {
        return Err(self.precondition(
          format!("'{}' has no case {}", self.types().display(&subject_ty), case.case),
          span,
        ));
      };
      if !seen.insert(case.case) {
        return Err(self.precondition(format!("case '{}' is matched twice", declared_case.name), span));
      }
      if case.binding.is_some() && declared_case.payload.is_none() {
        return Err(self.precondition(format!("case '{}' has no payload to bind", declared_case.name), span));
      }
    }

    let exits = if self.type_info(subject_ty).is_address_only() {
      self.emit_switch_addr(subject, subject_ty, cases, &declared, span)?
    } else {
      self.emit_switch_value(subject, cases, &declared, span)?
    };
    self.merge_exits(exits, "switch_merge");
    Ok(())
  }

  fn emit_switch_value(
    &mut self,
    subject: ExprId,
    cases: &[SwitchCase],
    declared: &[EnumCase],
    span: Span,
  ) -> LowerResult<Vec<BlockId>> {
    let operand = self.with_scope(|this| {
      let value = this.emit_owned(subject)?;
      Ok(value.forward(&mut this.cleanups))
    })?;

    let mut targets = Vec::with_capacity(declared.len());
    let mut arms = Vec::new();
    let mut missing = Vec::new();
    for (index, declared_case) in declared.iter().enumerate() {
      let index = index as u32;
      let arm = cases.iter().find(|c| c.case == index);
      let block = self
        .b
        .create_block(if arm.is_some() { "case" } else { "case_unreachable" });
      let payload = match declared_case.payload {
        Some(ty) if declared_case.indirect => {
          let boxed_ty = self.m.types.boxed(ty);
          Some(self.b.add_block_param(block, boxed_ty, Ownership::Owned, ValueRepr::Object, span))
        },
        Some(ty) => {
          let ownership = self.type_info(ty).fresh_ownership();
          Some(self.b.add_block_param(block, ty, ownership, ValueRepr::Object, span))
        },
        None => None,
      };

      targets.push(SwitchTarget { case: index, block });
      match arm {
        Some(arm) => arms.push((arm.clone(), block, payload)),
        None => missing.push(block),
      }
    }

    self.b.terminate(Terminator::SwitchEnum {
      operand,
      cases: targets,
      default: None,
    });

    // Cases the source leaves out cannot occur
    for block in missing {
      self.b.switch_to_block(block);
      self.b.terminate(Terminator::Unreachable);
    }

    let mut exits = Vec::new();
    for (arm, block, payload) in arms {
      self.b.switch_to_block(block);
      let declared_case = &declared[arm.case as usize];
      self.with_scope(|this| {
        if let Some(payload) = payload {
          let mut payload = this.manage(payload);
          if let (true, Some(ty)) = (declared_case.indirect, declared_case.payload) {
            payload = this.open_indirect_payload(payload, ty, span);
          }
          if let Some(binding) = arm.binding {
            this.bind_value(binding, payload, span)?;
          }
        }
        this.emit_stmt(arm.body)
      })?;
      exits.extend(self.b.current_block());
    }
    Ok(exits)
  }

  /// Switch over an address-only enum, taking the payload out of memory.
  fn emit_switch_addr(
    &mut self,
    subject: ExprId,
    subject_ty: TypeId,
    cases: &[SwitchCase],
    declared: &[EnumCase],
    span: Span,
  ) -> LowerResult<Vec<BlockId>> {
    let temp = self.alloc_temporary(subject_ty, span);
    self.emit_into(subject, temp)?;

    let mut targets = Vec::with_capacity(declared.len());
    let mut arms = Vec::new();
    let mut missing = Vec::new();
    for index in 0..declared.len() as u32 {
      let arm = cases.iter().find(|c| c.case == index);
      let block = self
        .b
        .create_block(if arm.is_some() { "case" } else { "case_unreachable" });
      targets.push(SwitchTarget { case: index, block });
      match arm {
        Some(arm) => arms.push((arm.clone(), block)),
        None => missing.push(block),
      }
    }

    self.b.terminate(Terminator::SwitchEnumAddr {
      address: temp,
      cases: targets,
      default: None,
    });

    for block in missing {
      self.b.switch_to_block(block);
      self.b.terminate(Terminator::Unreachable);
    }

    let mut exits = Vec::new();
    for (arm, block) in arms {
      self.b.switch_to_block(block);
      let declared_case = &declared[arm.case as usize];
      self.with_scope(|this| {
        if let Some(payload_ty) = declared_case.payload {
          let slot_ty = if declared_case.indirect {
            this.m.types.boxed(payload_ty)
          } else {
            payload_ty
          };
          let data = this.address(slot_ty, span);
          this.b.emit(Instr::UncheckedTakeEnumDataAddr {
            dest: data,
            address: temp,
            case: arm.case,
          });
          let mut payload = this.take_payload(data, slot_ty, span);
          if declared_case.indirect {
            payload = this.open_indirect_payload(payload, payload_ty, span);
          }
          if let Some(binding) = arm.binding {
            this.bind_value(binding, payload, span)?;
          }
        }
        this.emit_stmt(arm.body)
      })?;
      exits.extend(self.b.current_block());
    }
    Ok(exits)
  }

  /// Takes ownership of a payload left in memory by a switch.
  fn take_payload(
    &mut self,
    data: ValueId,
    ty: TypeId,
    span: Span,
  ) -> ManagedValue {
    let info = self.type_info(ty);
    if info.is_address_only() {
      return self.manage_address(data);
    }

    let (ownership, qualifier) = if info.trivial {
      (Ownership::Trivial, LoadQualifier::Trivial)
    } else {
      (Ownership::Owned, LoadQualifier::Take)
    };
    let dest = self.object(ty, ownership, span);
    self.b.emit(Instr::Load {
      dest,
      address: data,
      qualifier,
    });
    self.manage(dest)
  }

  /// The payload inside the box of an indirect case. The box stays with
  /// the current scope, so the payload is copied out or borrowed in place.
  fn open_indirect_payload(
    &mut self,
    boxed: ManagedValue,
    ty: TypeId,
    span: Span,
  ) -> ManagedValue {
    let address = self.address(ty, span);
    self.b.emit(Instr::ProjectBox {
      dest: address,
      boxed: boxed.value,
    });
    self.read_address(address, ty, span)
  }

  /// Binds a pattern variable to a value the current scope owns.
  fn bind_value(
    &mut self,
    decl: DeclId,
    value: ManagedValue,
    span: Span,
  ) -> LowerResult<()> {
    let mutable = matches!(&self.ast().decl(&decl).kind, DeclKind::Var(v) if v.mutable);
    if !mutable {
      let binding = if self.b.value(value.value).is_address() {
        Binding::Address(value.value)
      } else {
        Binding::Value(value.value)
      };
      self.locals.insert(decl, binding);
      return Ok(());
    }

    let ty = self.ast().decl_type(&decl);
    let info = self.type_info(ty);
    let (address, kind, boxed) = self.alloc_var_storage(decl, ty, span);
    self.move_into(value, address, span);
    if kind == StorageKind::Stack && !info.trivial {
      self.cleanups.push(CleanupKind::DestroyAddr(address));
    }
    self.locals.insert(decl, Binding::Storage { address, kind, boxed });
    Ok(())
  }

  fn emit_while(
    &mut self,
    condition: ExprId,
    body: StmtId,
  ) -> LowerResult<()> {
    let header = self.b.create_block("while_header");
    let body_bb = self.b.create_block("while_body");
    let exit = self.b.create_block("while_exit");

    self.b.terminate(Terminator::Br {
      target: header,
      args: vec![],
    });
    self.b.switch_to_block(header);
    let condition = self.emit_condition(condition)?;
    self.b.terminate(Terminator::CondBr {
      condition,
      then_block: body_bb,
      else_block: exit,
    });

    self.b.switch_to_block(body_bb);
    self.loops.push(LoopScope {
      continue_block: header,
      break_block: exit,
      depth: self.cleanups.depth(),
    });
    let result = self.with_scope(|this| this.emit_stmt(body));
    self.loops.pop();
    result?;

    if self.b.has_insertion_point() {
      self.b.terminate(Terminator::Br {
        target: header,
        args: vec![],
      });
    }
    self.b.switch_to_block(exit);
    Ok(())
  }

  fn emit_for_range(
    &mut self,
    var: DeclId,
    start: ExprId,
    end: ExprId,
    body: StmtId,
    span: Span,
  ) -> LowerResult<()> {
    let int = self.types().int();
    let bool_ty = self.types().bool();
    for bound in [start, end] {
      if self.ast().expr(&bound).ty != int {
        return Err(self.precondition("range bounds must be Int", span));
      }
    }
    let (start, end) = self.with_scope(|this| {
      let start = this.emit_rvalue(start)?.value;
      let end = this.emit_rvalue(end)?.value;
      Ok((start, end))
    })?;

    let header = self.b.create_block("for_header");
    let index = self
      .b
      .add_block_param(header, int, Ownership::Trivial, ValueRepr::Object, span);
    let body_bb = self.b.create_block("for_body");
    let latch = self.b.create_block("for_latch");
    let exit = self.b.create_block("for_exit");

    self.b.terminate(Terminator::Br {
      target: header,
      args: vec![start],
    });

    self.b.switch_to_block(header);
    let in_range = self.object(bool_ty, Ownership::Trivial, span);
    self.b.emit(Instr::Builtin {
      dest: in_range,
      op: BinaryOp::Lt,
      lhs: index,
      rhs: end,
    });
    self.b.terminate(Terminator::CondBr {
      condition: in_range,
      then_block: body_bb,
      else_block: exit,
    });

    self.b.switch_to_block(body_bb);
    self.loops.push(LoopScope {
      continue_block: latch,
      break_block: exit,
      depth: self.cleanups.depth(),
    });
    let result = self.with_scope(|this| {
      this.locals.insert(var, Binding::Value(index));
      this.emit_stmt(body)
    });
    self.loops.pop();
    result?;

    if self.b.has_insertion_point() {
      self.b.terminate(Terminator::Br {
        target: latch,
        args: vec![],
      });
    }

    self.b.switch_to_block(latch);
    let one = self.object(int, Ownership::Trivial, span);
    self.b.emit(Instr::Const {
      dest: one,
      value: ConstValue::Int(1),
    });
    let next = self.object(int, Ownership::Trivial, span);
    self.b.emit(Instr::Builtin {
      dest: next,
      op: BinaryOp::Add,
      lhs: index,
      rhs: one,
    });
    self.b.terminate(Terminator::Br {
      target: header,
      args: vec![next],
    });

    self.b.switch_to_block(exit);
    Ok(())
  }

  fn emit_do(
    &mut self,
    body: StmtId,
    catch_var: DeclId,
    catch_body: StmtId,
    span: Span,
  ) -> LowerResult<()> {
    let catch_bb = self.b.create_block("catch");
    let error_ty = self.types().error_existential();
    let error = self
      .b
      .add_block_param(catch_bb, error_ty, Ownership::Owned, ValueRepr::Object, span);

    self.catches.push(CatchScope {
      block: catch_bb,
      depth: self.cleanups.depth(),
      used: false,
    });
    let result = self.with_scope(|this| this.emit_stmt(body));
    let scope = self.catches.pop();
    result?;

    let mut exits = Vec::new();
    exits.extend(self.b.current_block());

    if scope.is_some_and(|s| s.used) {
      self.b.switch_to_block(catch_bb);
      self.with_scope(|this| {
        let error = this.manage(error);
        this.bind_value(catch_var, error, span)?;
        this.emit_stmt(catch_body)
      })?;
      exits.extend(self.b.current_block());
    }

    self.merge_exits(exits, "do_merge");
    Ok(())
  }
}
