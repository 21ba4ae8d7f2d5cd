use std::collections::HashMap;
use std::fmt;

use kiln_ast::DeclId;
use kiln_type::{Store, span::Span, types::{FnRepr, TypeId}};

use crate::{Block, BlockId, ValueData, ValueId};

/// How a parameter's value crosses the call boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArgConvention {
  DirectOwned,
  DirectGuaranteed,
  DirectUnowned,
  IndirectIn,
  IndirectInGuaranteed,
  IndirectInout,
  /// Address captured by a non-escaping closure.
  IndirectInoutAliasable,
  IndirectOut,
}

impl ArgConvention {
  pub fn is_indirect(&self) -> bool {
    !matches!(
      self,
      ArgConvention::DirectOwned | ArgConvention::DirectGuaranteed | ArgConvention::DirectUnowned
    )
  }

  /// The callee takes over responsibility for destroying the argument.
  pub fn is_consumed(&self) -> bool {
    matches!(self, ArgConvention::DirectOwned | ArgConvention::IndirectIn)
  }
}

impl fmt::Display for ArgConvention {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    let name = match self {
      ArgConvention::DirectOwned => "@owned",
      ArgConvention::DirectGuaranteed => "@guaranteed",
      ArgConvention::DirectUnowned => "@unowned",
      ArgConvention::IndirectIn => "@in",
      ArgConvention::IndirectInGuaranteed => "@in_guaranteed",
      ArgConvention::IndirectInout => "@inout",
      ArgConvention::IndirectInoutAliasable => "@inout_aliasable",
      ArgConvention::IndirectOut => "@out",
    };
    write!(f, "{}", name)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LoweredParam {
  pub ty: TypeId,
  pub convention: ArgConvention,
}

/// A function type after deciding direct vs indirect passing for every
/// parameter. An indirect result appears first in `params`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LoweredSignature {
  pub params: Vec<LoweredParam>,
  /// Direct result type; `()` when the result is returned indirectly.
  pub result: TypeId,
  pub error: Option<TypeId>,
  pub repr: FnRepr,
  /// Two-phase accessor: yields an address instead of returning.
  pub coroutine: bool,
}

impl LoweredSignature {
  pub fn indirect_result(&self) -> Option<&LoweredParam> {
    self.params.first().filter(|p| p.convention == ArgConvention::IndirectOut)
  }

  pub fn conventions(&self) -> Vec<ArgConvention> {
    self.params.iter().map(|p| p.convention).collect()
  }

  pub fn throws(&self) -> bool {
    self.error.is_some()
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionKind {
  Normal,
  Closure,
  Thunk,
  GlobalInit,
  Accessor,
}

#[derive(Debug, Clone)]
pub struct Function {
  pub name: String,
  pub decl: Option<DeclId>,
  pub kind: FunctionKind,
  pub signature: LoweredSignature,
  pub values: Store<ValueData>,
  /// Empty for declarations; otherwise block 0 is the entry.
  pub blocks: Store<Block>,
  pub span: Span,
}

impl Function {
  pub fn declaration(
    name: String,
    decl: Option<DeclId>,
    kind: FunctionKind,
    signature: LoweredSignature,
    span: Span,
  ) -> Self {
    Self {
      name,
      decl,
      kind,
      signature,
      values: Store::new(),
      blocks: Store::new(),
      span,
    }
  }

  pub fn is_declaration(&self) -> bool {
    self.blocks.is_empty()
  }

  /// Drops the body, keeping the function as an external declaration.
  pub fn clear_body(&mut self) {
    self.values.clear();
    self.blocks.clear();
  }

  pub fn entry_block(&self) -> BlockId {
    BlockId::new(0)
  }

  pub fn value(
    &self,
    id: &ValueId,
  ) -> &ValueData {
    self.values.get(id)
  }

  pub fn block(
    &self,
    id: &BlockId,
  ) -> &Block {
    self.blocks.get(id)
  }

  pub fn predecessors(&self) -> HashMap<BlockId, Vec<BlockId>> {
    let mut preds: HashMap<BlockId, Vec<BlockId>> = HashMap::new();
    for (id, block) in self.blocks.iter() {
      if let Some(term) = &block.terminator {
        for succ in term.successors() {
          preds.entry(succ).or_default().push(id);
        }
      }
    }
    preds
  }

  pub fn instructions(&self) -> impl Iterator<Item = &crate::Instr> {
    self.blocks.get_all().iter().flat_map(|b| b.instructions.iter())
  }
}
