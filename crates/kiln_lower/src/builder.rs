use std::collections::{HashMap, HashSet, VecDeque};

use kiln_ir::{
  Block, BlockId, Function, Instr, LoweredSignature, Ownership, Terminator, ValueData, ValueId, ValueOrigin, ValueRepr,
};
use kiln_type::{Store, span::Span, types::TypeId};

/// Builder for constructing a single function's IR.
pub struct FunctionBuilder {
  function: Function,

  /// Block receiving new instructions; `None` after a terminator until the
  /// next `switch_to_block`.
  current_block: Option<BlockId>,

  /// Counter for generating unique block labels.
  block_counter: u32,
}

impl FunctionBuilder {
  /// Starts a body for `function`, which must be a declaration.
  pub fn new(function: Function) -> Self {
    let mut builder = Self {
      function,
      current_block: None,
      block_counter: 0,
    };

    // Create entry block
    let entry = builder.create_block("entry");
    builder.switch_to_block(entry);

    builder
  }

  pub fn name(&self) -> &str {
    &self.function.name
  }

  pub fn signature(&self) -> &LoweredSignature {
    &self.function.signature
  }

  /// Create a new basic block with a label.
  pub fn create_block(
    &mut self,
    prefix: &str,
  ) -> BlockId {
    let label = format!("{}_{}", prefix, self.block_counter);
    self.block_counter += 1;
    self.function.blocks.alloc(Block::new(label))
  }

  /// Switch to building a different block.
  pub fn switch_to_block(
    &mut self,
    block: BlockId,
  ) {
    self.current_block = Some(block);
  }

  /// Block receiving new instructions, if the current position is reachable.
  pub fn current_block(&self) -> Option<BlockId> {
    self.current_block
  }

  pub fn entry_block(&self) -> BlockId {
    self.function.entry_block()
  }

  /// Code emitted after a terminator goes to a fresh block with no
  /// predecessors, which `finish` drops.
  fn insertion_block(&mut self) -> BlockId {
    match self.current_block {
      Some(block) => block,
      None => {
        let block = self.create_block("unreachable");
        self.current_block = Some(block);
        block
      },
    }
  }

  pub fn has_insertion_point(&self) -> bool {
    self.current_block.is_some()
  }

  /// Allocates a value that is not yet defined by anything.
  pub fn new_value(
    &mut self,
    ty: TypeId,
    ownership: Ownership,
    repr: ValueRepr,
    span: Span,
  ) -> ValueId {
    self.function.values.alloc(ValueData::new(ty, ownership, repr, span))
  }

  pub fn add_block_param(
    &mut self,
    block: BlockId,
    ty: TypeId,
    ownership: Ownership,
    repr: ValueRepr,
    span: Span,
  ) -> ValueId {
    let value = self.new_value(ty, ownership, repr, span);
    let params = &mut self.function.blocks.get_mut(&block).params;
    self.function.values.get_mut(&value).origin = ValueOrigin::Param {
      block,
      index: params.len() as u32,
    };
    params.push(value);
    value
  }

  pub fn block_params(
    &self,
    block: BlockId,
  ) -> &[ValueId] {
    &self.function.blocks.get(&block).params
  }

  pub fn value(
    &self,
    id: ValueId,
  ) -> &ValueData {
    self.function.values.get(&id)
  }

  pub fn value_type(
    &self,
    id: ValueId,
  ) -> TypeId {
    self.value(id).ty
  }

  /// Emit an instruction to the current block.
  pub fn emit(
    &mut self,
    instr: Instr,
  ) {
    let block = self.insertion_block();
    let index = self.function.blocks.get(&block).instructions.len() as u32;
    for result in instr.results() {
      self.function.values.get_mut(&result).origin = ValueOrigin::Instr { block, index };
    }
    self.function.blocks.get_mut(&block).instructions.push(instr);
  }

  /// Set the terminator for the current block and clear the insertion point.
  pub fn terminate(
    &mut self,
    term: Terminator,
  ) {
    let block = self.insertion_block();
    self.function.blocks.get_mut(&block).terminator = Some(term);
    self.current_block = None;
  }

  /// Finish building, dropping blocks no path from the entry reaches.
  pub fn finish(self) -> Function {
    let mut function = self.function;
    let reachable = reachable_from_entry(&function);
    if reachable.len() == function.blocks.len() {
      return function;
    }

    let mut remap: HashMap<BlockId, BlockId> = HashMap::new();
    let mut blocks = Store::new();
    for (id, block) in function.blocks.iter() {
      if reachable.contains(&id) {
        remap.insert(id, blocks.alloc(block.clone()));
      }
    }

    for (_, block) in blocks.iter() {
      for value in &block.params {
        if let ValueOrigin::Param { block: owner, .. } = &mut function.values.get_mut(value).origin {
          *owner = remap[&*owner];
        }
      }
      for instr in &block.instructions {
        for value in instr.results() {
          if let ValueOrigin::Instr { block: owner, .. } = &mut function.values.get_mut(&value).origin {
            *owner = remap[&*owner];
          }
        }
      }
    }

    for id in function.blocks.ids().collect::<Vec<_>>() {
      if reachable.contains(&id) {
        continue;
      }
      let block = function.blocks.get(&id);
      let dropped: Vec<ValueId> = block
        .params
        .iter()
        .copied()
        .chain(block.instructions.iter().flat_map(|i| i.results()))
        .collect();
      for value in dropped {
        function.values.get_mut(&value).origin = ValueOrigin::Detached;
      }
    }

    let ids: Vec<BlockId> = blocks.ids().collect();
    for id in ids {
      if let Some(term) = &mut blocks.get_mut(&id).terminator {
        for succ in term.successors_mut() {
          *succ = remap[&*succ];
        }
      }
    }

    function.blocks = blocks;
    function
  }
}

fn reachable_from_entry(function: &Function) -> HashSet<BlockId> {
  let entry = function.entry_block();
  let mut seen = HashSet::from([entry]);
  let mut queue = VecDeque::from([entry]);

  while let Some(id) = queue.pop_front() {
    if let Some(term) = &function.block(&id).terminator {
      for succ in term.successors() {
        if seen.insert(succ) {
          queue.push_back(succ);
        }
      }
    }
  }

  seen
}

#[cfg(test)]
mod tests {
  use kiln_ir::{ConstValue, FunctionKind};
  use kiln_type::types::{FnRepr, TypeStore};

  use super::*;

  fn declaration(types: &TypeStore) -> Function {
    let signature = LoweredSignature {
      params: vec![],
      result: types.unit(),
      error: None,
      repr: FnRepr::Thin,
      coroutine: false,
    };
    Function::declaration("f".to_string(), None, FunctionKind::Normal, signature, Span::default())
  }

  #[test]
  fn emit_records_value_origin() {
    let types = TypeStore::new();
    let mut b = FunctionBuilder::new(declaration(&types));
    let dest = b.new_value(types.int(), Ownership::Trivial, ValueRepr::Object, Span::default());

    b.emit(Instr::Const {
      dest,
      value: ConstValue::Int(1),
    });
    b.terminate(Terminator::Return(None));

    assert!(!b.has_insertion_point());
    let function = b.finish();
    assert_eq!(
      function.value(&dest).origin,
      ValueOrigin::Instr {
        block: BlockId::new(0),
        index: 0
      }
    );
  }

  #[test]
  fn finish_prunes_unreachable_blocks() {
    let types = TypeStore::new();
    let mut b = FunctionBuilder::new(declaration(&types));
    let dead = b.create_block("dead");
    let exit = b.create_block("exit");
    let arg = b.add_block_param(exit, types.int(), Ownership::Trivial, ValueRepr::Object, Span::default());

    b.terminate(Terminator::Br {
      target: exit,
      args: vec![],
    });
    b.switch_to_block(dead);
    b.terminate(Terminator::Unreachable);
    b.switch_to_block(exit);
    b.terminate(Terminator::Return(None));

    let function = b.finish();
    assert_eq!(function.blocks.len(), 2);
    assert_eq!(
      function.block(&BlockId::new(0)).terminator,
      Some(Terminator::Br {
        target: BlockId::new(1),
        args: vec![]
      })
    );
    assert_eq!(function.block(&BlockId::new(1)).label, "exit_2");
    assert_eq!(
      function.value(&arg).origin,
      ValueOrigin::Param {
        block: BlockId::new(1),
        index: 0
      }
    );
  }

  #[test]
  fn code_after_a_terminator_is_dropped() {
    let types = TypeStore::new();
    let mut b = FunctionBuilder::new(declaration(&types));
    b.terminate(Terminator::Return(None));

    let dead = b.new_value(types.int(), Ownership::Trivial, ValueRepr::Object, Span::default());
    b.emit(Instr::Const {
      dest: dead,
      value: ConstValue::Int(2),
    });
    b.terminate(Terminator::Return(None));

    let function = b.finish();
    assert_eq!(function.blocks.len(), 1);
    assert!(function.block(&BlockId::new(0)).instructions.is_empty());
    assert_eq!(function.value(&dead).origin, ValueOrigin::Detached);
  }
}
