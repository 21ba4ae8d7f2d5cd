//! Typed syntax tree handed over by the front end.
//!
//! Every node carries a resolved semantic type and every reference is a
//! resolved declaration id; the lowering never performs name lookup.

pub mod builder;

use kiln_type::{
  Id, Store,
  nominal::{NominalId, ProtocolId},
  span::Span,
  types::{ParamConvention, TypeId},
};
use ordered_float::OrderedFloat;

pub use builder::AstBuilder;

pub type ExprId = Id<Expr>;
pub type StmtId = Id<Stmt>;
pub type DeclId = Id<Decl>;

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
  Int(i64),
  Float(OrderedFloat<f64>),
  Bool(bool),
  Str(String),
  Unit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
  Add,
  Sub,
  Mul,
  Div,
  Eq,
  Ne,
  Lt,
  Le,
  Gt,
  Ge,
  And,
  Or,
}

impl BinaryOp {
  pub fn is_comparison(&self) -> bool {
    matches!(
      self,
      BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
    )
  }
}

impl std::fmt::Display for BinaryOp {
  fn fmt(
    &self,
    f: &mut std::fmt::Formatter<'_>,
  ) -> std::fmt::Result {
    let name = match self {
      BinaryOp::Add => "add",
      BinaryOp::Sub => "sub",
      BinaryOp::Mul => "mul",
      BinaryOp::Div => "div",
      BinaryOp::Eq => "cmp_eq",
      BinaryOp::Ne => "cmp_ne",
      BinaryOp::Lt => "cmp_lt",
      BinaryOp::Le => "cmp_le",
      BinaryOp::Gt => "cmp_gt",
      BinaryOp::Ge => "cmp_ge",
      BinaryOp::And => "and",
      BinaryOp::Or => "or",
    };
    write!(f, "{}", name)
  }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Callee {
  /// Statically known function declaration.
  Direct(DeclId),
  /// Any expression of function type.
  Value(ExprId),
  /// Dynamically dispatched through the receiver's vtable.
  ClassMethod { receiver: ExprId, method: DeclId },
  /// Requirement of a protocol, called on an existential receiver.
  /// `method_ty` is the requirement's type without the `self` parameter.
  Witness {
    receiver: ExprId,
    protocol: ProtocolId,
    requirement: u32,
    method_ty: TypeId,
  },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
  Literal(Literal),
  DeclRef(DeclId),
  Call {
    callee: Callee,
    args: Vec<ExprId>,
  },
  Binary {
    op: BinaryOp,
    lhs: ExprId,
    rhs: ExprId,
  },
  Assign {
    dest: ExprId,
    source: ExprId,
  },
  /// `&x` passed to an inout parameter.
  InOut(ExprId),
  Member {
    base: ExprId,
    field: u32,
  },
  Subscript {
    base: ExprId,
    index: ExprId,
    read: DeclId,
    modify: DeclId,
  },
  EnumCase {
    case: u32,
    payload: Option<ExprId>,
  },
  StructInit(Vec<ExprId>),
  Tuple(Vec<ExprId>),
  Closure(DeclId),
  /// Concrete value wrapped into the expression's existential type.
  Erase(ExprId),
  /// Function value converted to the expression's function type.
  FunctionConversion(ExprId),
  Ternary {
    condition: ExprId,
    then_expr: ExprId,
    else_expr: ExprId,
  },
  Try(ExprId),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
  pub kind: ExprKind,
  pub ty: TypeId,
  pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SwitchCase {
  pub case: u32,
  pub binding: Option<DeclId>,
  pub body: StmtId,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
  Let {
    decl: DeclId,
    init: Option<ExprId>,
  },
  Expr(ExprId),
  Return(Option<ExprId>),
  Throw(ExprId),
  Block(Vec<StmtId>),
  If {
    condition: ExprId,
    then_branch: StmtId,
    else_branch: Option<StmtId>,
  },
  Guard {
    condition: ExprId,
    else_branch: StmtId,
  },
  Switch {
    subject: ExprId,
    cases: Vec<SwitchCase>,
  },
  While {
    condition: ExprId,
    body: StmtId,
  },
  /// `for var in start..<end`
  ForRange {
    var: DeclId,
    start: ExprId,
    end: ExprId,
    body: StmtId,
  },
  Break,
  Continue,
  Do {
    body: StmtId,
    catch_var: DeclId,
    catch_body: StmtId,
  },
  /// A group of local functions that may refer to each other.
  LocalFunctions(Vec<DeclId>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
  pub kind: StmtKind,
  pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessorKind {
  Read,
  Modify,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FuncContext {
  TopLevel,
  /// Local function or closure expression nested in `parent`.
  Local { parent: DeclId },
  Method {
    class: NominalId,
    overrides: Option<DeclId>,
  },
  /// Coroutine accessor yielding the element's address. Always bodyless.
  Accessor { kind: AccessorKind },
}

#[derive(Debug, Clone, PartialEq)]
pub struct FuncDecl {
  pub params: Vec<DeclId>,
  pub result: TypeId,
  pub throws: bool,
  /// The declaration's function type, consistent with `params` and `result`.
  pub ty: TypeId,
  pub body: Option<StmtId>,
  pub context: FuncContext,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VarDecl {
  pub ty: TypeId,
  pub mutable: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParamDecl {
  pub ty: TypeId,
  pub convention: ParamConvention,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GlobalDecl {
  pub ty: TypeId,
  pub init: Option<ExprId>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeclKind {
  Var(VarDecl),
  Param(ParamDecl),
  Func(FuncDecl),
  Global(GlobalDecl),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Decl {
  pub name: String,
  pub kind: DeclKind,
  pub span: Span,
}

/// A concrete type's conformance: `witnesses[i]` implements requirement `i`.
#[derive(Debug, Clone, PartialEq)]
pub struct Conformance {
  pub ty: TypeId,
  pub protocol: ProtocolId,
  pub witnesses: Vec<DeclId>,
}

#[derive(Debug, Clone, Default)]
pub struct AstModule {
  pub name: String,
  pub decls: Store<Decl>,
  pub exprs: Store<Expr>,
  pub stmts: Store<Stmt>,
  /// Top-level functions, methods and globals in source order.
  pub items: Vec<DeclId>,
  pub conformances: Vec<Conformance>,
}

impl AstModule {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      ..Default::default()
    }
  }

  pub fn decl(
    &self,
    id: &DeclId,
  ) -> &Decl {
    self.decls.get(id)
  }

  pub fn expr(
    &self,
    id: &ExprId,
  ) -> &Expr {
    self.exprs.get(id)
  }

  pub fn stmt(
    &self,
    id: &StmtId,
  ) -> &Stmt {
    self.stmts.get(id)
  }

  pub fn func(
    &self,
    id: &DeclId,
  ) -> Option<&FuncDecl> {
    match &self.decl(id).kind {
      DeclKind::Func(f) => Some(f),
      _ => None,
    }
  }

  pub fn decl_type(
    &self,
    id: &DeclId,
  ) -> TypeId {
    match &self.decl(id).kind {
      DeclKind::Var(v) => v.ty,
      DeclKind::Param(p) => p.ty,
      DeclKind::Func(f) => f.ty,
      DeclKind::Global(g) => g.ty,
    }
  }

  pub fn functions(&self) -> impl Iterator<Item = (DeclId, &FuncDecl)> {
    self.decls.iter().filter_map(|(id, decl)| match &decl.kind {
      DeclKind::Func(f) => Some((id, f)),
      _ => None,
    })
  }

  pub fn globals(&self) -> impl Iterator<Item = (DeclId, &GlobalDecl)> {
    self.decls.iter().filter_map(|(id, decl)| match &decl.kind {
      DeclKind::Global(g) => Some((id, g)),
      _ => None,
    })
  }
}
