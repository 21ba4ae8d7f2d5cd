use kiln_ast::BinaryOp;
use kiln_type::{
  nominal::{NominalId, ProtocolId},
  types::TypeId,
};
use ordered_float::OrderedFloat;

use crate::{ArgConvention, FuncId, GlobalId, ValueId};

#[derive(Debug, Clone, PartialEq)]
pub enum ConstValue {
  Int(i64),
  Float(OrderedFloat<f64>),
  Bool(bool),
  Str(String),
  Unit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadQualifier {
  /// Moves the value out, leaving the memory uninitialized.
  Take,
  /// Produces an owned copy; the memory keeps its value.
  Copy,
  Trivial,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreQualifier {
  /// Memory was uninitialized.
  Init,
  /// Memory held a value, which is destroyed first.
  Assign,
  Trivial,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessKind {
  Read,
  Modify,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Enforcement {
  Static,
  Dynamic,
  Unchecked,
}

/// How an instruction uses one of its operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UseKind {
  /// Ends the lifetime of an owned operand.
  Consuming,
  NonConsuming,
  EndBorrow,
  EndAccess,
  EndApply,
  Dealloc,
}

/// A single non-terminating IR instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Instr {
  Const {
    dest: ValueId,
    value: ConstValue,
  },
  /// Scalar arithmetic and comparisons on trivial operands.
  Builtin {
    dest: ValueId,
    op: BinaryOp,
    lhs: ValueId,
    rhs: ValueId,
  },

  FunctionRef {
    dest: ValueId,
    func: FuncId,
  },
  ThinToThick {
    dest: ValueId,
    func: ValueId,
  },
  /// Representation-preserving function conversion (adding `throws`, dropping escapability).
  ConvertFunction {
    dest: ValueId,
    operand: ValueId,
  },
  Apply {
    dest: Option<ValueId>,
    callee: ValueId,
    args: Vec<ValueId>,
    conventions: Vec<ArgConvention>,
  },
  /// Closes `callee` over `captures`, producing a thick function.
  PartialApply {
    dest: ValueId,
    callee: ValueId,
    captures: Vec<ValueId>,
    conventions: Vec<ArgConvention>,
    on_stack: bool,
  },
  /// First half of a coroutine accessor call; yields an address and a token.
  BeginApply {
    address: ValueId,
    token: ValueId,
    callee: ValueId,
    args: Vec<ValueId>,
    conventions: Vec<ArgConvention>,
  },
  EndApply {
    token: ValueId,
  },
  ClassMethod {
    dest: ValueId,
    object: ValueId,
    class: NominalId,
    slot: u32,
  },
  WitnessMethod {
    dest: ValueId,
    opened: ValueId,
    protocol: ProtocolId,
    requirement: u32,
  },

  CopyValue {
    dest: ValueId,
    operand: ValueId,
  },
  DestroyValue {
    operand: ValueId,
  },
  BeginBorrow {
    dest: ValueId,
    operand: ValueId,
  },
  LoadBorrow {
    dest: ValueId,
    address: ValueId,
  },
  EndBorrow {
    borrow: ValueId,
  },

  Load {
    dest: ValueId,
    address: ValueId,
    qualifier: LoadQualifier,
  },
  Store {
    value: ValueId,
    address: ValueId,
    qualifier: StoreQualifier,
  },
  AllocStack {
    dest: ValueId,
    ty: TypeId,
  },
  DeallocStack {
    address: ValueId,
  },
  AllocBox {
    dest: ValueId,
    ty: TypeId,
  },
  ProjectBox {
    dest: ValueId,
    boxed: ValueId,
  },
  /// Frees a box, or an error box, whose contents were never initialized.
  DeallocBox {
    boxed: ValueId,
  },
  AllocRef {
    dest: ValueId,
    ty: TypeId,
  },
  CopyAddr {
    source: ValueId,
    dest: ValueId,
    take: bool,
    init: bool,
  },
  DestroyAddr {
    address: ValueId,
  },
  BeginAccess {
    dest: ValueId,
    address: ValueId,
    kind: AccessKind,
    enforcement: Enforcement,
  },
  EndAccess {
    access: ValueId,
  },

  Struct {
    dest: ValueId,
    ty: TypeId,
    fields: Vec<ValueId>,
  },
  StructExtract {
    dest: ValueId,
    operand: ValueId,
    field: u32,
  },
  StructElementAddr {
    dest: ValueId,
    address: ValueId,
    field: u32,
  },
  Tuple {
    dest: ValueId,
    elements: Vec<ValueId>,
  },
  TupleExtract {
    dest: ValueId,
    operand: ValueId,
    index: u32,
  },
  TupleElementAddr {
    dest: ValueId,
    address: ValueId,
    index: u32,
  },
  Enum {
    dest: ValueId,
    ty: TypeId,
    case: u32,
    payload: Option<ValueId>,
  },
  InitEnumDataAddr {
    dest: ValueId,
    address: ValueId,
    case: u32,
  },
  InjectEnumAddr {
    address: ValueId,
    case: u32,
  },
  UncheckedTakeEnumDataAddr {
    dest: ValueId,
    address: ValueId,
    case: u32,
  },

  InitExistentialAddr {
    dest: ValueId,
    address: ValueId,
    concrete: TypeId,
  },
  InitExistentialRef {
    dest: ValueId,
    operand: ValueId,
  },
  OpenExistentialAddr {
    dest: ValueId,
    address: ValueId,
  },
  AllocExistentialBox {
    dest: ValueId,
    payload: ValueId,
    concrete: TypeId,
  },

  RefElementAddr {
    dest: ValueId,
    object: ValueId,
    field: u32,
  },
  GlobalAddr {
    dest: ValueId,
    global: GlobalId,
  },
  /// Runs `initializer` the first time any thread reaches it for `global`.
  Once {
    global: GlobalId,
    initializer: FuncId,
  },
}

pub(crate) fn convention_use(convention: ArgConvention) -> UseKind {
  match convention {
    ArgConvention::DirectOwned => UseKind::Consuming,
    _ => UseKind::NonConsuming,
  }
}

fn call_uses(
  callee: ValueId,
  args: &[ValueId],
  conventions: &[ArgConvention],
) -> Vec<(ValueId, UseKind)> {
  let mut uses = vec![(callee, UseKind::NonConsuming)];
  for (i, arg) in args.iter().enumerate() {
    let kind = conventions.get(i).copied().map(convention_use).unwrap_or(UseKind::NonConsuming);
    uses.push((*arg, kind));
  }
  uses
}

impl Instr {
  /// Values defined by this instruction, in order.
  pub fn results(&self) -> Vec<ValueId> {
    use Instr::*;
    match self {
      Const { dest, .. }
      | Builtin { dest, .. }
      | FunctionRef { dest, .. }
      | ThinToThick { dest, .. }
      | ConvertFunction { dest, .. }
      | PartialApply { dest, .. }
      | ClassMethod { dest, .. }
      | WitnessMethod { dest, .. }
      | CopyValue { dest, .. }
      | BeginBorrow { dest, .. }
      | LoadBorrow { dest, .. }
      | Load { dest, .. }
      | AllocStack { dest, .. }
      | AllocBox { dest, .. }
      | ProjectBox { dest, .. }
      | AllocRef { dest, .. }
      | BeginAccess { dest, .. }
      | Struct { dest, .. }
      | StructExtract { dest, .. }
      | StructElementAddr { dest, .. }
      | Tuple { dest, .. }
      | TupleExtract { dest, .. }
      | TupleElementAddr { dest, .. }
      | Enum { dest, .. }
      | InitEnumDataAddr { dest, .. }
      | UncheckedTakeEnumDataAddr { dest, .. }
      | InitExistentialAddr { dest, .. }
      | InitExistentialRef { dest, .. }
      | OpenExistentialAddr { dest, .. }
      | RefElementAddr { dest, .. }
      | GlobalAddr { dest, .. } => vec![*dest],
      Apply { dest, .. } => dest.iter().copied().collect(),
      BeginApply { address, token, .. } => vec![*address, *token],
      AllocExistentialBox { dest, payload, .. } => vec![*dest, *payload],
      EndApply { .. }
      | DestroyValue { .. }
      | EndBorrow { .. }
      | Store { .. }
      | DeallocStack { .. }
      | DeallocBox { .. }
      | CopyAddr { .. }
      | DestroyAddr { .. }
      | EndAccess { .. }
      | InjectEnumAddr { .. }
      | Once { .. } => vec![],
    }
  }

  /// Operands with the way each one is used.
  pub fn uses(&self) -> Vec<(ValueId, UseKind)> {
    use Instr::*;
    match self {
      Const { .. } | FunctionRef { .. } | AllocStack { .. } | AllocBox { .. } | AllocRef { .. } => vec![],
      GlobalAddr { .. } | Once { .. } | AllocExistentialBox { .. } => vec![],
      Builtin { lhs, rhs, .. } => vec![(*lhs, UseKind::NonConsuming), (*rhs, UseKind::NonConsuming)],
      ThinToThick { func, .. } => vec![(*func, UseKind::NonConsuming)],
      ConvertFunction { operand, .. } => vec![(*operand, UseKind::Consuming)],
      Apply {
        callee,
        args,
        conventions,
        ..
      } => call_uses(*callee, args, conventions),
      BeginApply {
        callee,
        args,
        conventions,
        ..
      } => call_uses(*callee, args, conventions),
      PartialApply {
        callee,
        captures,
        conventions,
        on_stack,
        ..
      } => {
        if *on_stack {
          let mut uses = vec![(*callee, UseKind::NonConsuming)];
          uses.extend(captures.iter().map(|c| (*c, UseKind::NonConsuming)));
          uses
        } else {
          call_uses(*callee, captures, conventions)
        }
      },
      EndApply { token } => vec![(*token, UseKind::EndApply)],
      ClassMethod { object, .. } => vec![(*object, UseKind::NonConsuming)],
      WitnessMethod { opened, .. } => vec![(*opened, UseKind::NonConsuming)],
      CopyValue { operand, .. } => vec![(*operand, UseKind::NonConsuming)],
      DestroyValue { operand } => vec![(*operand, UseKind::Consuming)],
      BeginBorrow { operand, .. } => vec![(*operand, UseKind::NonConsuming)],
      LoadBorrow { address, .. } => vec![(*address, UseKind::NonConsuming)],
      EndBorrow { borrow } => vec![(*borrow, UseKind::EndBorrow)],
      Load { address, .. } => vec![(*address, UseKind::NonConsuming)],
      Store { value, address, .. } => vec![(*value, UseKind::Consuming), (*address, UseKind::NonConsuming)],
      DeallocStack { address } => vec![(*address, UseKind::Dealloc)],
      ProjectBox { boxed, .. } => vec![(*boxed, UseKind::NonConsuming)],
      DeallocBox { boxed } => vec![(*boxed, UseKind::Consuming)],
      CopyAddr { source, dest, .. } => vec![(*source, UseKind::NonConsuming), (*dest, UseKind::NonConsuming)],
      DestroyAddr { address } => vec![(*address, UseKind::NonConsuming)],
      BeginAccess { address, .. } => vec![(*address, UseKind::NonConsuming)],
      EndAccess { access } => vec![(*access, UseKind::EndAccess)],
      Struct { fields, .. } => fields.iter().map(|f| (*f, UseKind::Consuming)).collect(),
      Tuple { elements, .. } => elements.iter().map(|e| (*e, UseKind::Consuming)).collect(),
      Enum { payload, .. } => payload.iter().map(|p| (*p, UseKind::Consuming)).collect(),
      StructExtract { operand, .. } | TupleExtract { operand, .. } => vec![(*operand, UseKind::NonConsuming)],
      StructElementAddr { address, .. }
      | TupleElementAddr { address, .. }
      | InitEnumDataAddr { address, .. }
      | InjectEnumAddr { address, .. }
      | UncheckedTakeEnumDataAddr { address, .. }
      | InitExistentialAddr { address, .. }
      | OpenExistentialAddr { address, .. } => vec![(*address, UseKind::NonConsuming)],
      InitExistentialRef { operand, .. } => vec![(*operand, UseKind::Consuming)],
      RefElementAddr { object, .. } => vec![(*object, UseKind::NonConsuming)],
    }
  }
}
