use kiln_ast::ExprId;
use kiln_ir::{Function, FunctionKind, GlobalData, GlobalId, Instr, LoweredSignature, Terminator, ValueId};
use kiln_log::log_dbg;
use kiln_type::{span::Span, types::FnRepr};

use crate::{context::ModuleLowering, error::LowerResult, function::FunctionLowering};

impl ModuleLowering<'_> {
  /// Declares every global, then lowers the initializers of those that
  /// have one. Initializers run lazily, once, on first access.
  pub(crate) fn declare_globals(&mut self) {
    let ast = self.ast;
    let mut pending = Vec::new();

    for (decl, global) in ast.globals() {
      let name = &ast.decl(&decl).name;
      let id = self.module.add_global(GlobalData {
        name: self.mangler.mangle_global(name),
        ty: global.ty,
        decl: Some(decl),
        initializer: None,
      });
      self.globals.insert(decl, id);
      if let Some(init) = global.init {
        pending.push((decl, id, init));
      }
    }

    // Every initializer is declared before any is lowered so one global's
    // initializer can read another global
    let mut initializers = Vec::with_capacity(pending.len());
    for (decl, global, init) in pending {
      let span = ast.decl(&decl).span;
      let name = self.unique_name(self.mangler.mangle_global_init(&ast.decl(&decl).name));
      let signature = LoweredSignature {
        params: Vec::new(),
        result: self.types.unit(),
        error: None,
        repr: FnRepr::Thin,
        coroutine: false,
      };
      let func = self.module.add_function(Function::declaration(
        name,
        Some(decl),
        FunctionKind::GlobalInit,
        signature,
        span,
      ));
      self.module.globals.get_mut(&global).initializer = Some(func);
      initializers.push((global, func, init));
    }

    for (global, func, init) in initializers {
      let declaration = self.module.function(&func).clone();
      let name = declaration.name.clone();
      log_dbg!(self.config, "lowering initializer {}", name);

      match FunctionLowering::new(self, declaration).lower_global_init(global, init) {
        Ok(function) => *self.module.function_mut(&func) = function,
        Err(err) => self.abandon(&name, err),
      }
    }
  }
}

impl FunctionLowering<'_, '_> {
  fn lower_global_init(
    mut self,
    global: GlobalId,
    init: ExprId,
  ) -> LowerResult<Function> {
    let span = self.ast().expr(&init).span;
    let ty = self.m.module.global(&global).ty;

    let address = self.address(ty, span);
    self.b.emit(Instr::GlobalAddr { dest: address, global });
    self.emit_into(init, address)?;

    self.emit_cleanups_to(0);
    self.b.terminate(Terminator::Return(None));
    self.finish_body()
  }

  /// Address of a global, running its initializer first if it has one.
  pub(crate) fn global_address(
    &mut self,
    global: GlobalId,
    span: Span,
  ) -> ValueId {
    let data = self.m.module.global(&global).clone();
    if let Some(initializer) = data.initializer {
      self.b.emit(Instr::Once { global, initializer });
    }

    let dest = self.address(data.ty, span);
    self.b.emit(Instr::GlobalAddr { dest, global });
    dest
  }
}
