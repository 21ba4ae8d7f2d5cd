//! Ownership SSA intermediate representation.
//!
//! Every value carries its type, an ownership qualifier and whether it is an
//! object or the address of memory. Blocks take arguments instead of phis and
//! end in exactly one terminator.

pub mod block;
pub mod display;
pub mod function;
pub mod instr;
pub mod module;
pub mod verify;

use kiln_type::{Id, span::Span, types::TypeId};

pub use block::{Block, SwitchTarget, Terminator};
pub use display::{print_function, print_module};
pub use function::{ArgConvention, Function, FunctionKind, LoweredParam, LoweredSignature};
pub use instr::{AccessKind, ConstValue, Enforcement, Instr, LoadQualifier, StoreQualifier, UseKind};
pub use module::{FuncId, GlobalData, GlobalId, IrModule, ThunkCache, ThunkKey, VTable, VTableEntry, WitnessTable};
pub use verify::{IrVerifier, LifetimeKind, VerifyError, VerifyResult, verify_function, verify_module};

pub type ValueId = Id<ValueData>;
pub type BlockId = Id<Block>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ownership {
  /// The holder must consume the value exactly once.
  Owned,
  /// Valid for a bounded scope; never consumed by its user.
  Guaranteed,
  /// No destruction needed.
  Trivial,
  /// Reference not kept alive by the holder.
  Unowned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueRepr {
  Object,
  Address,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueOrigin {
  Param { block: BlockId, index: u32 },
  Instr { block: BlockId, index: u32 },
  /// Created but never placed, or its block was pruned as unreachable.
  Detached,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValueData {
  pub ty: TypeId,
  pub ownership: Ownership,
  pub repr: ValueRepr,
  pub origin: ValueOrigin,
  pub span: Span,
}

impl ValueData {
  pub fn new(
    ty: TypeId,
    ownership: Ownership,
    repr: ValueRepr,
    span: Span,
  ) -> Self {
    Self {
      ty,
      ownership,
      repr,
      origin: ValueOrigin::Detached,
      span,
    }
  }

  pub fn is_address(&self) -> bool {
    self.repr == ValueRepr::Address
  }
}
