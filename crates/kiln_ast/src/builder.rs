use kiln_type::{
  nominal::{NominalId, ProtocolId},
  span::Span,
  types::{FnParam, FunctionType, ParamConvention, TypeId, TypeStore},
};
use ordered_float::OrderedFloat;

use crate::{
  AstModule, BinaryOp, Callee, Conformance, Decl, DeclId, DeclKind, Expr, ExprId, ExprKind, FuncContext, FuncDecl,
  GlobalDecl, Literal, ParamDecl, Stmt, StmtId, StmtKind, SwitchCase, VarDecl,
};

/// Assembles a typed module node by node, computing the types a type checker
/// would have attached. Owns the `TypeStore` so both can grow together.
pub struct AstBuilder {
  pub types: TypeStore,
  module: AstModule,
  span: Span,
}

impl AstBuilder {
  pub fn new(name: &str) -> Self {
    Self {
      types: TypeStore::new(),
      module: AstModule::new(name),
      span: Span::default(),
    }
  }

  /// Span attached to every node created from now on.
  pub fn at(
    &mut self,
    span: Span,
  ) -> &mut Self {
    self.span = span;
    self
  }

  pub fn module(&self) -> &AstModule {
    &self.module
  }

  pub fn finish(self) -> (AstModule, TypeStore) {
    (self.module, self.types)
  }

  fn decl(
    &mut self,
    name: &str,
    kind: DeclKind,
  ) -> DeclId {
    self.module.decls.alloc(Decl {
      name: name.to_string(),
      kind,
      span: self.span,
    })
  }

  pub fn param(
    &mut self,
    name: &str,
    ty: TypeId,
    convention: ParamConvention,
  ) -> DeclId {
    self.decl(name, DeclKind::Param(ParamDecl { ty, convention }))
  }

  /// Mutable local (`var`).
  pub fn var(
    &mut self,
    name: &str,
    ty: TypeId,
  ) -> DeclId {
    self.decl(name, DeclKind::Var(VarDecl { ty, mutable: true }))
  }

  /// Immutable local (`let`).
  pub fn constant(
    &mut self,
    name: &str,
    ty: TypeId,
  ) -> DeclId {
    self.decl(name, DeclKind::Var(VarDecl { ty, mutable: false }))
  }

  pub fn global(
    &mut self,
    name: &str,
    ty: TypeId,
    init: Option<ExprId>,
  ) -> DeclId {
    let id = self.decl(name, DeclKind::Global(GlobalDecl { ty, init }));
    self.module.items.push(id);
    id
  }

  /// Declares a non-throwing, escaping function. Top-level functions are
  /// registered as module items; use the `set_*` methods to refine it.
  pub fn func(
    &mut self,
    name: &str,
    params: Vec<DeclId>,
    result: TypeId,
  ) -> DeclId {
    let ty = self.types.error();
    let id = self.decl(
      name,
      DeclKind::Func(FuncDecl {
        params,
        result,
        throws: false,
        ty,
        body: None,
        context: FuncContext::TopLevel,
      }),
    );
    self.recompute_func_type(id, true);
    self.module.items.push(id);
    id
  }

  /// Declares a closure or local function nested in `parent`.
  pub fn local_func(
    &mut self,
    name: &str,
    parent: DeclId,
    params: Vec<DeclId>,
    result: TypeId,
  ) -> DeclId {
    let id = self.func(name, params, result);
    self.module.items.pop();
    self.set_context(id, FuncContext::Local { parent });
    id
  }

  pub fn set_body(
    &mut self,
    func: DeclId,
    stmts: Vec<StmtId>,
  ) {
    let body = self.block(stmts);
    self.func_mut(func).body = Some(body);
  }

  pub fn set_throws(
    &mut self,
    func: DeclId,
  ) {
    self.func_mut(func).throws = true;
    let escaping = self.func_escaping(func);
    self.recompute_func_type(func, escaping);
  }

  pub fn set_escaping(
    &mut self,
    func: DeclId,
    escaping: bool,
  ) {
    self.recompute_func_type(func, escaping);
  }

  pub fn set_context(
    &mut self,
    func: DeclId,
    context: FuncContext,
  ) {
    self.func_mut(func).context = context;
  }

  /// Declares a bodyless coroutine accessor.
  pub fn accessor(
    &mut self,
    name: &str,
    kind: crate::AccessorKind,
    params: Vec<DeclId>,
    element: TypeId,
  ) -> DeclId {
    let id = self.func(name, params, element);
    self.module.items.pop();
    self.set_context(id, FuncContext::Accessor { kind });
    id
  }

  pub fn method(
    &mut self,
    name: &str,
    class: NominalId,
    overrides: Option<DeclId>,
    params: Vec<DeclId>,
    result: TypeId,
  ) -> DeclId {
    let id = self.func(name, params, result);
    self.set_context(id, FuncContext::Method { class, overrides });
    id
  }

  pub fn conformance(
    &mut self,
    ty: TypeId,
    protocol: ProtocolId,
    witnesses: Vec<DeclId>,
  ) {
    self.module.conformances.push(Conformance { ty, protocol, witnesses });
  }

  fn func_mut(
    &mut self,
    func: DeclId,
  ) -> &mut FuncDecl {
    match &mut self.module.decls.get_mut(&func).kind {
      DeclKind::Func(f) => f,
      _ => panic!("declaration is not a function"),
    }
  }

  fn func_escaping(
    &self,
    func: DeclId,
  ) -> bool {
    self
      .module
      .func(&func)
      .and_then(|f| self.types.as_function(&f.ty))
      .map(|t| t.escaping)
      .unwrap_or(true)
  }

  fn recompute_func_type(
    &mut self,
    func: DeclId,
    escaping: bool,
  ) {
    let (params, result, throws) = {
      let f = self.module.func(&func).expect("declaration is not a function");
      (f.params.clone(), f.result, f.throws)
    };

    let params = params
      .iter()
      .map(|p| match &self.module.decl(p).kind {
        DeclKind::Param(param) => FnParam::new(param.ty, param.convention),
        _ => panic!("function parameter is not a parameter declaration"),
      })
      .collect();

    let ty = self.types.function(
      FunctionType::new(params, result)
        .with_throws(throws)
        .with_escaping(escaping),
    );
    self.func_mut(func).ty = ty;
  }

  // Expressions

  pub fn expr(
    &mut self,
    kind: ExprKind,
    ty: TypeId,
  ) -> ExprId {
    self.module.exprs.alloc(Expr {
      kind,
      ty,
      span: self.span,
    })
  }

  pub fn int(
    &mut self,
    value: i64,
  ) -> ExprId {
    let ty = self.types.int();
    self.expr(ExprKind::Literal(Literal::Int(value)), ty)
  }

  pub fn float(
    &mut self,
    value: f64,
  ) -> ExprId {
    let ty = self.types.float();
    self.expr(ExprKind::Literal(Literal::Float(OrderedFloat(value))), ty)
  }

  pub fn bool_lit(
    &mut self,
    value: bool,
  ) -> ExprId {
    let ty = self.types.bool();
    self.expr(ExprKind::Literal(Literal::Bool(value)), ty)
  }

  pub fn string(
    &mut self,
    value: &str,
  ) -> ExprId {
    let ty = self.types.string();
    self.expr(ExprKind::Literal(Literal::Str(value.to_string())), ty)
  }

  pub fn unit(&mut self) -> ExprId {
    let ty = self.types.unit();
    self.expr(ExprKind::Literal(Literal::Unit), ty)
  }

  pub fn decl_ref(
    &mut self,
    decl: DeclId,
  ) -> ExprId {
    let ty = self.module.decl_type(&decl);
    self.expr(ExprKind::DeclRef(decl), ty)
  }

  pub fn call(
    &mut self,
    func: DeclId,
    args: Vec<ExprId>,
  ) -> ExprId {
    let ty = self.module.func(&func).map(|f| f.result).unwrap_or_else(|| self.types.error());
    self.expr(
      ExprKind::Call {
        callee: Callee::Direct(func),
        args,
      },
      ty,
    )
  }

  pub fn call_value(
    &mut self,
    callee: ExprId,
    args: Vec<ExprId>,
  ) -> ExprId {
    let callee_ty = self.module.expr(&callee).ty;
    let ty = self
      .types
      .as_function(&callee_ty)
      .map(|f| f.result)
      .unwrap_or_else(|| self.types.error());
    self.expr(
      ExprKind::Call {
        callee: Callee::Value(callee),
        args,
      },
      ty,
    )
  }

  pub fn call_method(
    &mut self,
    receiver: ExprId,
    method: DeclId,
    args: Vec<ExprId>,
  ) -> ExprId {
    let ty = self.module.func(&method).map(|f| f.result).unwrap_or_else(|| self.types.error());
    self.expr(
      ExprKind::Call {
        callee: Callee::ClassMethod { receiver, method },
        args,
      },
      ty,
    )
  }

  pub fn call_witness(
    &mut self,
    receiver: ExprId,
    protocol: ProtocolId,
    requirement: u32,
    method_ty: TypeId,
    args: Vec<ExprId>,
  ) -> ExprId {
    let ty = self
      .types
      .as_function(&method_ty)
      .map(|f| f.result)
      .unwrap_or_else(|| self.types.error());
    self.expr(
      ExprKind::Call {
        callee: Callee::Witness {
          receiver,
          protocol,
          requirement,
          method_ty,
        },
        args,
      },
      ty,
    )
  }

  pub fn binary(
    &mut self,
    op: BinaryOp,
    lhs: ExprId,
    rhs: ExprId,
  ) -> ExprId {
    let ty = if op.is_comparison() {
      self.types.bool()
    } else {
      self.module.expr(&lhs).ty
    };
    self.expr(ExprKind::Binary { op, lhs, rhs }, ty)
  }

  pub fn assign(
    &mut self,
    dest: ExprId,
    source: ExprId,
  ) -> ExprId {
    let ty = self.types.unit();
    self.expr(ExprKind::Assign { dest, source }, ty)
  }

  pub fn inout(
    &mut self,
    place: ExprId,
  ) -> ExprId {
    let ty = self.module.expr(&place).ty;
    self.expr(ExprKind::InOut(place), ty)
  }

  pub fn member(
    &mut self,
    base: ExprId,
    field: u32,
  ) -> ExprId {
    let base_ty = self.module.expr(&base).ty;
    let ty = self
      .types
      .field_type(&base_ty, field)
      .unwrap_or_else(|| self.types.error());
    self.expr(ExprKind::Member { base, field }, ty)
  }

  pub fn subscript(
    &mut self,
    base: ExprId,
    index: ExprId,
    read: DeclId,
    modify: DeclId,
  ) -> ExprId {
    let ty = self.module.func(&read).map(|f| f.result).unwrap_or_else(|| self.types.error());
    self.expr(
      ExprKind::Subscript {
        base,
        index,
        read,
        modify,
      },
      ty,
    )
  }

  pub fn enum_case(
    &mut self,
    enum_ty: TypeId,
    case: u32,
    payload: Option<ExprId>,
  ) -> ExprId {
    self.expr(ExprKind::EnumCase { case, payload }, enum_ty)
  }

  pub fn struct_init(
    &mut self,
    ty: TypeId,
    fields: Vec<ExprId>,
  ) -> ExprId {
    self.expr(ExprKind::StructInit(fields), ty)
  }

  pub fn tuple(
    &mut self,
    elements: Vec<ExprId>,
  ) -> ExprId {
    let element_tys: Vec<TypeId> = elements.iter().map(|e| self.module.expr(e).ty).collect();
    let ty = self.types.tuple(element_tys);
    self.expr(ExprKind::Tuple(elements), ty)
  }

  pub fn closure(
    &mut self,
    func: DeclId,
  ) -> ExprId {
    let ty = self.module.decl_type(&func);
    self.expr(ExprKind::Closure(func), ty)
  }

  pub fn erase(
    &mut self,
    value: ExprId,
    to: TypeId,
  ) -> ExprId {
    self.expr(ExprKind::Erase(value), to)
  }

  pub fn convert_function(
    &mut self,
    value: ExprId,
    to: TypeId,
  ) -> ExprId {
    self.expr(ExprKind::FunctionConversion(value), to)
  }

  pub fn ternary(
    &mut self,
    condition: ExprId,
    then_expr: ExprId,
    else_expr: ExprId,
  ) -> ExprId {
    let ty = self.module.expr(&then_expr).ty;
    self.expr(
      ExprKind::Ternary {
        condition,
        then_expr,
        else_expr,
      },
      ty,
    )
  }

  pub fn try_expr(
    &mut self,
    inner: ExprId,
  ) -> ExprId {
    let ty = self.module.expr(&inner).ty;
    self.expr(ExprKind::Try(inner), ty)
  }

  // Statements

  pub fn stmt(
    &mut self,
    kind: StmtKind,
  ) -> StmtId {
    self.module.stmts.alloc(Stmt { kind, span: self.span })
  }

  pub fn let_stmt(
    &mut self,
    decl: DeclId,
    init: ExprId,
  ) -> StmtId {
    self.stmt(StmtKind::Let { decl, init: Some(init) })
  }

  pub fn expr_stmt(
    &mut self,
    expr: ExprId,
  ) -> StmtId {
    self.stmt(StmtKind::Expr(expr))
  }

  pub fn ret(
    &mut self,
    value: Option<ExprId>,
  ) -> StmtId {
    self.stmt(StmtKind::Return(value))
  }

  pub fn throw(
    &mut self,
    error: ExprId,
  ) -> StmtId {
    self.stmt(StmtKind::Throw(error))
  }

  pub fn block(
    &mut self,
    stmts: Vec<StmtId>,
  ) -> StmtId {
    self.stmt(StmtKind::Block(stmts))
  }

  pub fn if_stmt(
    &mut self,
    condition: ExprId,
    then_branch: Vec<StmtId>,
    else_branch: Option<Vec<StmtId>>,
  ) -> StmtId {
    let then_branch = self.block(then_branch);
    let else_branch = else_branch.map(|stmts| self.block(stmts));
    self.stmt(StmtKind::If {
      condition,
      then_branch,
      else_branch,
    })
  }

  pub fn guard(
    &mut self,
    condition: ExprId,
    else_branch: Vec<StmtId>,
  ) -> StmtId {
    let else_branch = self.block(else_branch);
    self.stmt(StmtKind::Guard { condition, else_branch })
  }

  /// `cases` holds (case index, optional payload binding, body).
  pub fn switch(
    &mut self,
    subject: ExprId,
    cases: Vec<(u32, Option<DeclId>, Vec<StmtId>)>,
  ) -> StmtId {
    let cases = cases
      .into_iter()
      .map(|(case, binding, body)| SwitchCase {
        case,
        binding,
        body: self.block(body),
      })
      .collect();
    self.stmt(StmtKind::Switch { subject, cases })
  }

  pub fn while_loop(
    &mut self,
    condition: ExprId,
    body: Vec<StmtId>,
  ) -> StmtId {
    let body = self.block(body);
    self.stmt(StmtKind::While { condition, body })
  }

  pub fn for_range(
    &mut self,
    var: DeclId,
    start: ExprId,
    end: ExprId,
    body: Vec<StmtId>,
  ) -> StmtId {
    let body = self.block(body);
    self.stmt(StmtKind::ForRange { var, start, end, body })
  }

  pub fn break_stmt(&mut self) -> StmtId {
    self.stmt(StmtKind::Break)
  }

  pub fn continue_stmt(&mut self) -> StmtId {
    self.stmt(StmtKind::Continue)
  }

  pub fn do_catch(
    &mut self,
    body: Vec<StmtId>,
    catch_var: DeclId,
    catch_body: Vec<StmtId>,
  ) -> StmtId {
    let body = self.block(body);
    let catch_body = self.block(catch_body);
    self.stmt(StmtKind::Do {
      body,
      catch_var,
      catch_body,
    })
  }

  pub fn local_functions(
    &mut self,
    funcs: Vec<DeclId>,
  ) -> StmtId {
    self.stmt(StmtKind::LocalFunctions(funcs))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn func_type_tracks_parameters_and_throws() {
    let mut b = AstBuilder::new("m");
    let int = b.types.int();
    let x = b.param("x", int, ParamConvention::Owned);
    let f = b.func("f", vec![x], int);
    b.set_throws(f);

    let (module, types) = b.finish();
    let decl = module.func(&f).unwrap();
    let ty = types.as_function(&decl.ty).unwrap();

    assert!(ty.throws);
    assert_eq!(ty.params.len(), 1);
    assert_eq!(ty.params[0].convention, ParamConvention::Owned);
    assert_eq!(module.items, vec![f]);
  }

  #[test]
  fn local_functions_are_not_items() {
    let mut b = AstBuilder::new("m");
    let unit = b.types.unit();
    let outer = b.func("outer", vec![], unit);
    let inner = b.local_func("inner", outer, vec![], unit);
    b.set_escaping(inner, false);

    let module = b.module();
    assert_eq!(module.items, vec![outer]);
    assert_eq!(module.func(&inner).unwrap().context, FuncContext::Local { parent: outer });
    assert!(!b.types.as_function(&module.decl_type(&inner)).unwrap().escaping);
  }
}
