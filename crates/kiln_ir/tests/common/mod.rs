#![allow(dead_code)]

use kiln_ir::{
  Block, BlockId, Function, FunctionKind, Instr, LoweredParam, LoweredSignature, Ownership, Terminator, ValueData,
  ValueId, ValueRepr,
};
use kiln_type::{
  span::Span,
  types::{FnRepr, TypeId},
};

/// Assembles IR functions by hand for verifier and printer tests.
pub struct FnBuilder {
  function: Function,
}

impl FnBuilder {
  pub fn new(
    name: &str,
    params: Vec<LoweredParam>,
    result: TypeId,
  ) -> Self {
    let signature = LoweredSignature {
      params,
      result,
      error: None,
      repr: FnRepr::Thick,
      coroutine: false,
    };
    Self {
      function: Function::declaration(name.to_string(), None, FunctionKind::Normal, signature, Span::default()),
    }
  }

  pub fn block(&mut self) -> BlockId {
    let label = format!("bb{}", self.function.blocks.len());
    self.function.blocks.alloc(Block::new(label))
  }

  pub fn value(
    &mut self,
    ty: TypeId,
    ownership: Ownership,
  ) -> ValueId {
    self
      .function
      .values
      .alloc(ValueData::new(ty, ownership, ValueRepr::Object, Span::default()))
  }

  pub fn address(
    &mut self,
    ty: TypeId,
  ) -> ValueId {
    self
      .function
      .values
      .alloc(ValueData::new(ty, Ownership::Trivial, ValueRepr::Address, Span::default()))
  }

  pub fn param(
    &mut self,
    block: BlockId,
    ty: TypeId,
    ownership: Ownership,
  ) -> ValueId {
    let value = self.value(ty, ownership);
    self.function.blocks.get_mut(&block).params.push(value);
    value
  }

  pub fn push(
    &mut self,
    block: BlockId,
    instr: Instr,
  ) {
    self.function.blocks.get_mut(&block).instructions.push(instr);
  }

  pub fn terminate(
    &mut self,
    block: BlockId,
    term: Terminator,
  ) {
    self.function.blocks.get_mut(&block).terminator = Some(term);
  }

  pub fn finish(self) -> Function {
    self.function
  }
}
