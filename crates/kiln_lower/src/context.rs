use std::collections::HashMap;

use kiln_ast::{AstModule, DeclId, DeclKind, FuncContext, FuncDecl};
use kiln_config::{DebugTrace, KilnConfig};
use kiln_diagnostics::{DiagnosticMessage, diagnostic_report::Diagnostic};
use kiln_ir::{
  ArgConvention, FuncId, Function, FunctionKind, GlobalId, IrModule, LoweredParam, LoweredSignature, VerifyError,
};
use kiln_log::{log_dbg, log_trc, phase_log, phase_ok, phase_warn, trace_dbg};
use kiln_type::types::{ParamConvention, TypeId, TypeStore};

use crate::{
  captures::{CaptureAnalysis, CaptureMode},
  classify::{TypeInfo, TypeLowering},
  error::{LowerError, LowerResult},
  function::FunctionLowering,
  layout::LayoutOracle,
  mangle::NameMangler,
};

/// Everything produced by lowering one module.
#[derive(Debug)]
pub struct LoweringOutput {
  pub module: IrModule,
  /// One entry per declaration whose lowering was abandoned.
  pub diagnostics: Vec<Diagnostic>,
  pub abandoned: Vec<String>,
}

impl LoweringOutput {
  pub fn is_ok(&self) -> bool {
    self.diagnostics.is_empty()
  }

  /// Drops the body of a function the verifier rejected, reporting the
  /// first error found in it.
  pub(crate) fn reject_malformed(
    &mut self,
    error: &VerifyError,
  ) {
    let name = error.function();
    if self.abandoned.iter().any(|abandoned| abandoned == name) {
      return;
    }
    let Some(id) = self.module.lookup(name) else {
      return;
    };

    let function = self.module.function_mut(&id);
    let message = DiagnosticMessage::MalformedBody {
      function: name.to_string(),
      reason: error.to_string(),
      at: function.span,
    };
    *function = Function::declaration(
      function.name.clone(),
      function.decl,
      function.kind,
      function.signature.clone(),
      function.span,
    );

    self
      .diagnostics
      .push(message.report().with_note(format!("lowering of '{}' was abandoned", name)));
    self.abandoned.push(name.to_string());
  }
}

/// Module-wide lowering state shared by every function being lowered.
pub struct ModuleLowering<'a> {
  pub(crate) ast: &'a AstModule,
  pub(crate) types: &'a mut TypeStore,
  pub(crate) config: &'a KilnConfig,
  pub(crate) oracle: &'a dyn LayoutOracle,
  pub(crate) mangler: &'a dyn NameMangler,
  pub(crate) lowering: TypeLowering,
  pub(crate) module: IrModule,

  /// AST function -> IR function
  pub(crate) functions: HashMap<DeclId, FuncId>,
  pub(crate) globals: HashMap<DeclId, GlobalId>,
  /// Vtable slot of every class method.
  pub(crate) method_slots: HashMap<DeclId, u32>,
  pub(crate) captures: CaptureAnalysis,

  diagnostics: Vec<Diagnostic>,
  abandoned: Vec<String>,
}

impl<'a> ModuleLowering<'a> {
  pub fn new(
    ast: &'a AstModule,
    types: &'a mut TypeStore,
    config: &'a KilnConfig,
    oracle: &'a dyn LayoutOracle,
    mangler: &'a dyn NameMangler,
  ) -> Self {
    Self {
      ast,
      types,
      config,
      oracle,
      mangler,
      lowering: TypeLowering::new(),
      module: IrModule::new(ast.name.clone()),
      functions: HashMap::new(),
      globals: HashMap::new(),
      method_slots: HashMap::new(),
      captures: CaptureAnalysis::default(),
      diagnostics: Vec::new(),
      abandoned: Vec::new(),
    }
  }

  /// Lower the whole module.
  pub fn run(mut self) -> LoweringOutput {
    phase_log!(self.config, "Lowering module {}", self.ast.name);

    self.captures = CaptureAnalysis::analyze(self.ast, &*self.types, &mut self.lowering, self.oracle);

    // Signatures first so bodies can refer to anything
    self.declare_functions();
    self.build_vtables();
    self.declare_globals();

    let ast = self.ast;
    for (decl, func) in ast.functions() {
      if func.body.is_some() {
        self.lower_function(decl);
      }
    }

    self.build_witness_tables();

    log_dbg!(
      self.config,
      "module {}: {} functions, {} thunks, {} abandoned",
      self.module.name,
      self.module.functions.len(),
      self.module.thunks.len(),
      self.abandoned.len()
    );
    if self.abandoned.is_empty() {
      phase_ok!(self.config, "Lowered module {}", self.module.name);
    }

    LoweringOutput {
      module: self.module,
      diagnostics: self.diagnostics,
      abandoned: self.abandoned,
    }
  }

  pub(crate) fn type_info(
    &mut self,
    ty: TypeId,
  ) -> TypeInfo {
    let cached = self.lowering.is_cached(&ty);
    let info = self.lowering.classify(&*self.types, self.oracle, ty);
    if !cached {
      trace_dbg!(
        self.config,
        DebugTrace::Classify,
        "{} is {:?}{}",
        self.types.display(&ty),
        info.class,
        if info.trivial { ", trivial" } else { "" }
      );
    }
    info
  }

  /// Lowered signature of a function type, or `None` if `ty` is not one.
  pub(crate) fn lower_function_type(
    &mut self,
    ty: TypeId,
  ) -> Option<LoweredSignature> {
    let types = &*self.types;
    let fty = types.as_function(&ty)?;
    Some(self.lowering.lower_signature(types, self.oracle, fty))
  }

  /// Records a failed declaration; the IR function stays a bodyless declaration.
  pub(crate) fn abandon(
    &mut self,
    function: &str,
    err: LowerError,
  ) {
    phase_warn!(self.config, "abandoned lowering of '{}': {}", function, err);
    self.diagnostics.push(err.report(function));
    self.abandoned.push(function.to_string());
  }

  fn declare_functions(&mut self) {
    let ast = self.ast;
    for (decl, func) in ast.functions() {
      match self.declare_function(decl, func) {
        Ok(id) => {
          self.functions.insert(decl, id);
        },
        Err(err) => self.abandon(&ast.decl(&decl).name, err),
      }
    }
  }

  fn declare_function(
    &mut self,
    decl: DeclId,
    func: &FuncDecl,
  ) -> LowerResult<FuncId> {
    let span = self.ast.decl(&decl).span;
    let name = self.unique_name(self.function_name(decl));

    let Some(mut signature) = self.lower_function_type(func.ty) else {
      return Err(LowerError::Precondition {
        function: name,
        reason: "declaration does not have a function type".to_string(),
        span,
      });
    };

    let kind = match func.context {
      FuncContext::TopLevel | FuncContext::Method { .. } => FunctionKind::Normal,
      FuncContext::Local { .. } => {
        let captured = self.capture_params(decl);
        signature.params.extend(captured);
        FunctionKind::Closure
      },
      FuncContext::Accessor { .. } => {
        // Accessors yield the element's address instead of returning it
        signature.params.retain(|p| p.convention != ArgConvention::IndirectOut);
        signature.result = func.result;
        signature.coroutine = true;
        FunctionKind::Accessor
      },
    };

    log_dbg!(self.config, "declared {} ({} params)", name, signature.params.len());
    Ok(self.module.add_function(Function::declaration(name, Some(decl), kind, signature, span)))
  }

  fn function_name(
    &self,
    decl: DeclId,
  ) -> String {
    let name = &self.ast.decl(&decl).name;
    match self.ast.func(&decl).map(|f| f.context) {
      Some(FuncContext::Local { parent }) => self.mangler.mangle_closure(&self.function_name(parent), name),
      Some(FuncContext::Method { class, .. }) => {
        let owner = &self.types.nominal_decl(&class).name;
        self.mangler.mangle_function(name, Some(owner))
      },
      _ => self.mangler.mangle_function(name, None),
    }
  }

  pub(crate) fn unique_name(
    &self,
    name: String,
  ) -> String {
    if self.module.lookup(&name).is_none() {
      return name;
    }

    let mut n = 1;
    loop {
      let candidate = format!("{}.{}", name, n);
      if self.module.lookup(&candidate).is_none() {
        return candidate;
      }
      n += 1;
    }
  }

  /// Extra parameters through which a local function receives its captures.
  fn capture_params(
    &mut self,
    decl: DeclId,
  ) -> Vec<LoweredParam> {
    let captures = self.captures.captures(&decl).to_vec();
    let mut params = Vec::with_capacity(captures.len());

    for capture in captures {
      let ty = self.ast.decl_type(&capture.decl);
      let param = match capture.mode {
        CaptureMode::ByValue | CaptureMode::ByBorrow => LoweredParam {
          ty,
          convention: ArgConvention::DirectGuaranteed,
        },
        CaptureMode::ByBox => LoweredParam {
          ty: self.types.boxed(ty),
          convention: ArgConvention::DirectGuaranteed,
        },
        CaptureMode::ByAddress => {
          let convention = if self.is_mutable_storage(capture.decl) {
            ArgConvention::IndirectInoutAliasable
          } else {
            ArgConvention::IndirectInGuaranteed
          };
          LoweredParam { ty, convention }
        },
      };
      params.push(param);
    }

    params
  }

  pub(crate) fn is_mutable_storage(
    &self,
    decl: DeclId,
  ) -> bool {
    match &self.ast.decl(&decl).kind {
      DeclKind::Var(v) => v.mutable,
      DeclKind::Param(p) => p.convention == ParamConvention::Inout,
      _ => false,
    }
  }

  fn lower_function(
    &mut self,
    decl: DeclId,
  ) {
    let Some(&id) = self.functions.get(&decl) else {
      return;
    };

    let declaration = self.module.function(&id).clone();
    let name = declaration.name.clone();
    phase_log!(self.config, indent = 8, "function {}", name);

    match FunctionLowering::new(self, declaration).lower_decl(decl) {
      Ok(function) => {
        log_trc!(self.config, "{}: {} blocks", name, function.blocks.len());
        *self.module.function_mut(&id) = function;
      },
      Err(err) => self.abandon(&name, err),
    }
  }
}

#[cfg(test)]
mod tests {
  use kiln_ir::verify_module;
  use kiln_type::{span::Span, types::FnRepr};

  use super::*;
  use crate::builder::FunctionBuilder;

  #[test]
  fn malformed_body_is_reported_and_dropped() {
    let types = TypeStore::new();
    let signature = LoweredSignature {
      params: vec![],
      result: types.unit(),
      error: None,
      repr: FnRepr::Thin,
      coroutine: false,
    };
    let declaration = Function::declaration(
      "broken".to_string(),
      None,
      FunctionKind::Normal,
      signature,
      Span::default(),
    );
    // The entry block is never terminated
    let body = FunctionBuilder::new(declaration).finish();

    let mut module = IrModule::new("m");
    module.add_function(body);
    let mut output = LoweringOutput {
      module,
      diagnostics: vec![],
      abandoned: vec![],
    };

    let Err(errors) = verify_module(&output.module, &types) else {
      panic!("unterminated block was accepted");
    };
    for error in &errors {
      output.reject_malformed(error);
    }

    assert!(!output.is_ok());
    assert_eq!(output.abandoned, vec!["broken".to_string()]);
    assert_eq!(output.diagnostics.len(), 1);
    assert_eq!(output.diagnostics[0].error_code, "L0004");
    assert!(output.module.function_named("broken").is_some_and(|f| f.is_declaration()));
    assert!(verify_module(&output.module, &types).is_ok());
  }
}
