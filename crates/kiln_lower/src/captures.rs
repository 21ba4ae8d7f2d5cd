use std::collections::{BTreeSet, HashMap, HashSet};

use kiln_ast::{AstModule, Callee, DeclId, DeclKind, ExprId, ExprKind, FuncContext, StmtId, StmtKind};
use kiln_type::types::{ParamConvention, TypeStore};

use crate::{classify::TypeLowering, layout::LayoutOracle};

/// How a nested function receives one of its free variables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaptureMode {
  /// A copy of the value; the closure context owns it.
  ByValue,
  /// A shared, reference-counted box holding the variable's storage.
  ByBox,
  /// The caller's value, valid for the closure's non-escaping lifetime.
  ByBorrow,
  /// The address of the caller's storage.
  ByAddress,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capture {
  pub decl: DeclId,
  pub mode: CaptureMode,
}

/// Capture lists of every local function and the set of variables that
/// must live in a box because a closure mutates them or sees them mutated.
#[derive(Debug, Default)]
pub struct CaptureAnalysis {
  captures: HashMap<DeclId, Vec<Capture>>,
  boxed: HashSet<DeclId>,
}

/// Per-function facts gathered from one body.
#[derive(Debug, Default)]
struct BodyFacts {
  defined: HashSet<DeclId>,
  referenced: BTreeSet<DeclId>,
  local_functions: BTreeSet<DeclId>,
}

impl CaptureAnalysis {
  pub fn analyze(
    ast: &AstModule,
    types: &TypeStore,
    lowering: &mut TypeLowering,
    oracle: &dyn LayoutOracle,
  ) -> Self {
    let mut mutated = HashSet::new();
    let mut facts: HashMap<DeclId, BodyFacts> = HashMap::new();

    for (id, func) in ast.functions() {
      let mut body = BodyFacts::default();
      body.defined.extend(func.params.iter().copied());
      if let Some(stmt) = func.body {
        let mut collector = Collector {
          ast,
          types,
          facts: &mut body,
          mutated: &mut mutated,
        };
        collector.visit_stmt(stmt);
      }
      facts.insert(id, body);
    }

    let locals: Vec<DeclId> = ast
      .functions()
      .filter(|(_, f)| matches!(f.context, FuncContext::Local { .. }))
      .map(|(id, _)| id)
      .collect();

    // Free variables, closed over the local functions each body refers to.
    let mut free: HashMap<DeclId, BTreeSet<DeclId>> = HashMap::new();
    for id in &locals {
      let body = &facts[id];
      let vars = body
        .referenced
        .iter()
        .copied()
        .filter(|d| !body.defined.contains(d) && is_variable(ast, d))
        .collect();
      free.insert(*id, vars);
    }

    let mut changed = true;
    while changed {
      changed = false;
      for id in &locals {
        let body = &facts[id];
        let mut inherited = Vec::new();
        for callee in &body.local_functions {
          if let Some(callee_free) = free.get(callee) {
            inherited.extend(callee_free.iter().copied().filter(|d| !body.defined.contains(d)));
          }
        }

        let vars = free.entry(*id).or_default();
        for var in inherited {
          changed |= vars.insert(var);
        }
      }
    }

    let mut analysis = CaptureAnalysis::default();
    for id in &locals {
      let escaping = ast
        .func(id)
        .and_then(|f| types.as_function(&f.ty))
        .is_some_and(|t| t.escaping);

      let mut captures = Vec::new();
      for var in &free[id] {
        let mode = capture_mode(ast, types, lowering, oracle, *var, escaping, &mutated);
        if mode == CaptureMode::ByBox && mutated.contains(var) {
          analysis.boxed.insert(*var);
        }
        captures.push(Capture { decl: *var, mode });
      }
      analysis.captures.insert(*id, captures);
    }

    analysis
  }

  pub fn captures(
    &self,
    func: &DeclId,
  ) -> &[Capture] {
    self.captures.get(func).map(|c| c.as_slice()).unwrap_or(&[])
  }

  /// The variable's storage is a heap box shared with closures.
  pub fn is_boxed(
    &self,
    var: &DeclId,
  ) -> bool {
    self.boxed.contains(var)
  }
}

fn is_variable(
  ast: &AstModule,
  decl: &DeclId,
) -> bool {
  matches!(ast.decl(decl).kind, DeclKind::Var(_) | DeclKind::Param(_))
}

fn capture_mode(
  ast: &AstModule,
  types: &TypeStore,
  lowering: &mut TypeLowering,
  oracle: &dyn LayoutOracle,
  var: DeclId,
  escaping: bool,
  mutated: &HashSet<DeclId>,
) -> CaptureMode {
  match &ast.decl(&var).kind {
    DeclKind::Param(p) if p.convention == ParamConvention::Inout => return CaptureMode::ByAddress,
    DeclKind::Var(v) if v.mutable && mutated.contains(&var) => return CaptureMode::ByBox,
    _ => {},
  }

  let info = lowering.classify(types, oracle, ast.decl_type(&var));
  match (info.trivial, info.is_address_only(), escaping) {
    (true, _, _) => CaptureMode::ByValue,
    (false, true, true) => CaptureMode::ByBox,
    (false, false, true) => CaptureMode::ByValue,
    (false, true, false) => CaptureMode::ByAddress,
    (false, false, false) => CaptureMode::ByBorrow,
  }
}

struct Collector<'a> {
  ast: &'a AstModule,
  types: &'a TypeStore,
  facts: &'a mut BodyFacts,
  mutated: &'a mut HashSet<DeclId>,
}

impl Collector<'_> {
  fn visit_stmt(
    &mut self,
    id: StmtId,
  ) {
    match &self.ast.stmt(&id).kind {
      StmtKind::Let { decl, init } => {
        self.facts.defined.insert(*decl);
        if let Some(init) = init {
          self.visit_expr(*init);
        }
      },
      StmtKind::Expr(e) | StmtKind::Throw(e) => self.visit_expr(*e),
      StmtKind::Return(e) => {
        if let Some(e) = e {
          self.visit_expr(*e);
        }
      },
      StmtKind::Block(stmts) => {
        for s in stmts {
          self.visit_stmt(*s);
        }
      },
      StmtKind::If {
        condition,
        then_branch,
        else_branch,
      } => {
        self.visit_expr(*condition);
        self.visit_stmt(*then_branch);
        if let Some(e) = else_branch {
          self.visit_stmt(*e);
        }
      },
      StmtKind::Guard { condition, else_branch } => {
        self.visit_expr(*condition);
        self.visit_stmt(*else_branch);
      },
      StmtKind::Switch { subject, cases } => {
        self.visit_expr(*subject);
        for case in cases {
          if let Some(binding) = case.binding {
            self.facts.defined.insert(binding);
          }
          self.visit_stmt(case.body);
        }
      },
      StmtKind::While { condition, body } => {
        self.visit_expr(*condition);
        self.visit_stmt(*body);
      },
      StmtKind::ForRange { var, start, end, body } => {
        self.facts.defined.insert(*var);
        self.visit_expr(*start);
        self.visit_expr(*end);
        self.visit_stmt(*body);
      },
      StmtKind::Do {
        body,
        catch_var,
        catch_body,
      } => {
        self.facts.defined.insert(*catch_var);
        self.visit_stmt(*body);
        self.visit_stmt(*catch_body);
      },
      StmtKind::LocalFunctions(funcs) => {
        for f in funcs {
          self.facts.local_functions.insert(*f);
        }
      },
      StmtKind::Break | StmtKind::Continue => {},
    }
  }

  fn visit_expr(
    &mut self,
    id: ExprId,
  ) {
    match &self.ast.expr(&id).kind {
      ExprKind::Literal(_) => {},
      ExprKind::DeclRef(decl) => self.reference(*decl),
      ExprKind::Call { callee, args } => {
        match callee {
          Callee::Direct(decl) => self.reference(*decl),
          Callee::Value(e) => self.visit_expr(*e),
          Callee::ClassMethod { receiver, .. } | Callee::Witness { receiver, .. } => self.visit_expr(*receiver),
        }
        for arg in args {
          self.visit_expr(*arg);
        }
      },
      ExprKind::Binary { lhs, rhs, .. } => {
        self.visit_expr(*lhs);
        self.visit_expr(*rhs);
      },
      ExprKind::Assign { dest, source } => {
        self.mark_mutated(*dest);
        self.visit_expr(*dest);
        self.visit_expr(*source);
      },
      ExprKind::InOut(place) => {
        self.mark_mutated(*place);
        self.visit_expr(*place);
      },
      ExprKind::Member { base, .. } => self.visit_expr(*base),
      ExprKind::Subscript { base, index, .. } => {
        self.visit_expr(*base);
        self.visit_expr(*index);
      },
      ExprKind::EnumCase { payload, .. } => {
        if let Some(p) = payload {
          self.visit_expr(*p);
        }
      },
      ExprKind::StructInit(items) | ExprKind::Tuple(items) => {
        for item in items {
          self.visit_expr(*item);
        }
      },
      ExprKind::Closure(decl) => self.reference(*decl),
      ExprKind::Erase(e) | ExprKind::FunctionConversion(e) | ExprKind::Try(e) => self.visit_expr(*e),
      ExprKind::Ternary {
        condition,
        then_expr,
        else_expr,
      } => {
        self.visit_expr(*condition);
        self.visit_expr(*then_expr);
        self.visit_expr(*else_expr);
      },
    }
  }

  fn reference(
    &mut self,
    decl: DeclId,
  ) {
    match &self.ast.decl(&decl).kind {
      DeclKind::Func(f) if matches!(f.context, FuncContext::Local { .. }) => {
        self.facts.local_functions.insert(decl);
      },
      DeclKind::Var(_) | DeclKind::Param(_) => {
        self.facts.referenced.insert(decl);
      },
      _ => {},
    }
  }

  fn mark_mutated(
    &mut self,
    place: ExprId,
  ) {
    if let Some(root) = lvalue_root(self.ast, self.types, place) {
      self.mutated.insert(root);
    }
  }
}

/// The variable whose storage an lvalue expression writes, if any. Writes
/// through a class reference leave the reference itself untouched.
pub(crate) fn lvalue_root(
  ast: &AstModule,
  types: &TypeStore,
  expr: ExprId,
) -> Option<DeclId> {
  match &ast.expr(&expr).kind {
    ExprKind::DeclRef(decl) => Some(*decl),
    ExprKind::InOut(place) => lvalue_root(ast, types, *place),
    ExprKind::Member { base, .. } => {
      let base_ty = ast.expr(base).ty;
      if types.is_class(&base_ty) {
        None
      } else {
        lvalue_root(ast, types, *base)
      }
    },
    ExprKind::Subscript { base, .. } => lvalue_root(ast, types, *base),
    _ => None,
  }
}
