use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

use kiln_type::{
  nominal::NominalKind,
  types::{Type, TypeId, TypeStore},
};
use thiserror::Error;

use crate::{
  AccessKind, Block, BlockId, Function, GlobalId, Instr, IrModule, Ownership, SwitchTarget, Terminator, UseKind,
  ValueId,
};

/// What a linear lifetime check is tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifetimeKind {
  Owned,
  Borrow,
  Access,
  Coroutine,
}

impl fmt::Display for LifetimeKind {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    let name = match self {
      LifetimeKind::Owned => "owned value",
      LifetimeKind::Borrow => "borrow scope",
      LifetimeKind::Access => "access scope",
      LifetimeKind::Coroutine => "coroutine token",
    };
    write!(f, "{}", name)
  }
}

/// Errors found during IR verification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
  #[error("{function}: block {block} has no terminator")]
  MissingTerminator { function: String, block: String },

  #[error("{function}: block {block} branches to missing block bb{target}")]
  InvalidBlockRef {
    function: String,
    block: String,
    target: u32,
  },

  #[error("{function}: branch from {block} to {target} passes {found} arguments, expected {expected}")]
  BranchArgumentMismatch {
    function: String,
    block: String,
    target: String,
    expected: usize,
    found: usize,
  },

  /// A non-entry block no path from the entry reaches.
  #[error("{function}: block {block} is unreachable")]
  UnreachableBlock { function: String, block: String },

  #[error("{function}: %{value} used in {block} is never defined")]
  InvalidValueRef {
    function: String,
    block: String,
    value: u32,
  },

  #[error("{function}: use of %{value} in {block} is not dominated by its definition")]
  NotDominated {
    function: String,
    block: String,
    value: u32,
  },

  /// A value of a type that can only live in memory, held as an object.
  #[error("{function}: %{value} of address-only type '{ty}' is held as an object")]
  AddressOnlyObject {
    function: String,
    value: u32,
    ty: String,
  },

  #[error("{function}: address %{value} is used as an object in {block}")]
  AddressUsedAsObject {
    function: String,
    block: String,
    value: u32,
  },

  #[error("{function}: cond_br in {block} on non-Bool value %{value}")]
  NonBoolBranchCondition {
    function: String,
    block: String,
    value: u32,
  },

  #[error("{function}: switch in {block} does not cover case {case}")]
  NonExhaustiveSwitch {
    function: String,
    block: String,
    case: u32,
  },

  #[error("{function}: switch in {block} lists case {case} twice")]
  DuplicateSwitchCase {
    function: String,
    block: String,
    case: u32,
  },

  #[error("{function}: {kind} %{value} is still live when {block} exits")]
  LeakedValue {
    function: String,
    block: String,
    value: u32,
    kind: LifetimeKind,
  },

  #[error("{function}: {kind} %{value} is ended twice on a path through {block}")]
  DoubleConsume {
    function: String,
    block: String,
    value: u32,
    kind: LifetimeKind,
  },

  #[error("{function}: {kind} %{value} is live on some paths into {block} and ended on others")]
  InconsistentLifetime {
    function: String,
    block: String,
    value: u32,
    kind: LifetimeKind,
  },

  #[error("{function}: guaranteed value %{value} is consumed in {block}")]
  ConsumedGuaranteed {
    function: String,
    block: String,
    value: u32,
  },

  #[error("{function}: dealloc_stack %{value} in {block} is not the most recent allocation")]
  StackOrderViolation {
    function: String,
    block: String,
    value: u32,
  },

  #[error("{function}: stack allocation %{value} is still live when {block} exits")]
  LeakedStackAllocation {
    function: String,
    block: String,
    value: u32,
  },

  #[error("{function}: predecessors of {block} disagree on the live stack allocations")]
  InconsistentStack { function: String, block: String },

  #[error("{function}: access %{value} in {block} overlaps open access %{other}")]
  OverlappingAccess {
    function: String,
    block: String,
    value: u32,
    other: u32,
  },
}

impl VerifyError {
  /// Name of the function the error was found in.
  pub fn function(&self) -> &str {
    match self {
      VerifyError::MissingTerminator { function, .. }
      | VerifyError::InvalidBlockRef { function, .. }
      | VerifyError::BranchArgumentMismatch { function, .. }
      | VerifyError::UnreachableBlock { function, .. }
      | VerifyError::InvalidValueRef { function, .. }
      | VerifyError::NotDominated { function, .. }
      | VerifyError::AddressOnlyObject { function, .. }
      | VerifyError::AddressUsedAsObject { function, .. }
      | VerifyError::NonBoolBranchCondition { function, .. }
      | VerifyError::NonExhaustiveSwitch { function, .. }
      | VerifyError::DuplicateSwitchCase { function, .. }
      | VerifyError::LeakedValue { function, .. }
      | VerifyError::DoubleConsume { function, .. }
      | VerifyError::InconsistentLifetime { function, .. }
      | VerifyError::ConsumedGuaranteed { function, .. }
      | VerifyError::StackOrderViolation { function, .. }
      | VerifyError::LeakedStackAllocation { function, .. }
      | VerifyError::InconsistentStack { function, .. }
      | VerifyError::OverlappingAccess { function, .. } => function,
    }
  }
}

/// IR verification result.
pub type VerifyResult = Result<(), Vec<VerifyError>>;

/// Checks every defined function in `module`.
pub fn verify_module(
  module: &IrModule,
  types: &TypeStore,
) -> VerifyResult {
  IrVerifier::new(types).verify(module)
}

pub fn verify_function(
  types: &TypeStore,
  function: &Function,
) -> VerifyResult {
  let mut verifier = IrVerifier::new(types);
  verifier.verify_function(function);
  verifier.finish()
}

#[derive(Debug, Clone, Copy)]
struct Def {
  block: BlockId,
  /// 0 for block parameters, `i + 1` for instruction `i`.
  pos: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StorageRoot {
  Value(ValueId),
  Global(GlobalId),
}

#[derive(Debug, Clone)]
struct OpenAccess {
  access: ValueId,
  root: Option<StorageRoot>,
  path: Vec<u32>,
  kind: AccessKind,
}

/// Operands of a block with their position; the terminator sits after the last instruction.
fn block_uses(block: &Block) -> Vec<(usize, ValueId, UseKind)> {
  let mut uses = Vec::new();
  for (i, instr) in block.instructions.iter().enumerate() {
    for (value, kind) in instr.uses() {
      uses.push((i + 1, value, kind));
    }
  }
  if let Some(term) = &block.terminator {
    for (value, kind) in term.uses() {
      uses.push((block.instructions.len() + 1, value, kind));
    }
  }
  uses
}

fn collect_defs(function: &Function) -> HashMap<ValueId, Def> {
  let mut defs = HashMap::new();
  for (id, block) in function.blocks.iter() {
    for param in &block.params {
      defs.insert(*param, Def { block: id, pos: 0 });
    }
    for (i, instr) in block.instructions.iter().enumerate() {
      for result in instr.results() {
        defs.insert(result, Def { block: id, pos: i + 1 });
      }
    }
  }
  defs
}

fn reachable_blocks(function: &Function) -> Vec<BlockId> {
  let entry = function.entry_block();
  let mut seen = HashSet::from([entry]);
  let mut order = vec![entry];
  let mut queue = VecDeque::from([entry]);

  while let Some(id) = queue.pop_front() {
    let Some(term) = &function.block(&id).terminator else {
      continue;
    };
    for succ in term.successors() {
      if seen.insert(succ) {
        order.push(succ);
        queue.push_back(succ);
      }
    }
  }
  order
}

fn dominators(
  function: &Function,
  order: &[BlockId],
) -> HashMap<BlockId, HashSet<BlockId>> {
  let entry = function.entry_block();
  let preds = function.predecessors();
  let all: HashSet<BlockId> = order.iter().copied().collect();

  let mut dom: HashMap<BlockId, HashSet<BlockId>> = HashMap::new();
  for id in order {
    if *id == entry {
      dom.insert(*id, HashSet::from([entry]));
    } else {
      dom.insert(*id, all.clone());
    }
  }

  let mut changed = true;
  while changed {
    changed = false;
    for id in order.iter().filter(|b| **b != entry) {
      let mut next: Option<HashSet<BlockId>> = None;
      for pred in preds.get(id).into_iter().flatten().filter(|p| all.contains(p)) {
        let pred_dom = &dom[pred];
        next = Some(match next {
          None => pred_dom.clone(),
          Some(acc) => acc.intersection(pred_dom).copied().collect(),
        });
      }

      let mut next = next.unwrap_or_default();
      next.insert(*id);
      if next != dom[id] {
        dom.insert(*id, next);
        changed = true;
      }
    }
  }
  dom
}

fn paths_overlap(
  a: &[u32],
  b: &[u32],
) -> bool {
  a.iter().zip(b.iter()).all(|(x, y)| x == y)
}

/// Verifier for IR modules.
pub struct IrVerifier<'a> {
  types: &'a TypeStore,
  errors: Vec<VerifyError>,
}

impl<'a> IrVerifier<'a> {
  pub fn new(types: &'a TypeStore) -> Self {
    Self {
      types,
      errors: Vec::new(),
    }
  }

  pub fn verify(
    mut self,
    module: &IrModule,
  ) -> VerifyResult {
    for (_, function) in module.functions.iter() {
      self.verify_function(function);
    }
    self.finish()
  }

  fn finish(self) -> VerifyResult {
    if self.errors.is_empty() {
      Ok(())
    } else {
      Err(self.errors)
    }
  }

  pub fn verify_function(
    &mut self,
    function: &Function,
  ) {
    if function.is_declaration() {
      return;
    }

    if !self.check_structure(function) {
      return;
    }

    let order = reachable_blocks(function);
    let reachable: HashSet<BlockId> = order.iter().copied().collect();
    for (id, block) in function.blocks.iter() {
      if !reachable.contains(&id) {
        self.errors.push(VerifyError::UnreachableBlock {
          function: function.name.clone(),
          block: block.label.clone(),
        });
      }
    }

    let defs = collect_defs(function);
    if !self.check_values(function, &defs, &order) {
      return;
    }

    self.check_representation(function, &defs, &order);
    self.check_terminators(function, &order);
    self.check_lifetimes(function, &defs, &order);
    self.check_stack(function);
    self.check_accesses(function);
  }

  fn check_structure(
    &mut self,
    function: &Function,
  ) -> bool {
    let before = self.errors.len();

    for (_, block) in function.blocks.iter() {
      let Some(term) = &block.terminator else {
        self.errors.push(VerifyError::MissingTerminator {
          function: function.name.clone(),
          block: block.label.clone(),
        });
        continue;
      };

      for target in term.successors() {
        if !function.blocks.contains(&target) {
          self.errors.push(VerifyError::InvalidBlockRef {
            function: function.name.clone(),
            block: block.label.clone(),
            target: target.index(),
          });
        }
      }

      if let Terminator::Br { target, args } = term {
        if let Some(target_block) = function.blocks.try_get(target) {
          if target_block.params.len() != args.len() {
            self.errors.push(VerifyError::BranchArgumentMismatch {
              function: function.name.clone(),
              block: block.label.clone(),
              target: target_block.label.clone(),
              expected: target_block.params.len(),
              found: args.len(),
            });
          }
        }
      }
    }

    self.errors.len() == before
  }

  /// Every operand must be defined and dominated by its definition.
  fn check_values(
    &mut self,
    function: &Function,
    defs: &HashMap<ValueId, Def>,
    order: &[BlockId],
  ) -> bool {
    let before = self.errors.len();
    let dom = dominators(function, order);

    for id in order {
      let block = function.block(id);
      for (pos, value, _) in block_uses(block) {
        let Some(def) = defs.get(&value).filter(|_| function.values.contains(&value)) else {
          self.errors.push(VerifyError::InvalidValueRef {
            function: function.name.clone(),
            block: block.label.clone(),
            value: value.index(),
          });
          continue;
        };

        let dominated = if def.block == *id {
          def.pos < pos
        } else {
          dom.get(id).is_some_and(|d| d.contains(&def.block))
        };

        if !dominated {
          self.errors.push(VerifyError::NotDominated {
            function: function.name.clone(),
            block: block.label.clone(),
            value: value.index(),
          });
        }
      }
    }

    !self.errors[before..]
      .iter()
      .any(|e| matches!(e, VerifyError::InvalidValueRef { .. }))
  }

  /// Values of types that need memory under any layout must be addresses,
  /// and operands that are consumed or aggregated as objects must be objects.
  fn check_representation(
    &mut self,
    function: &Function,
    defs: &HashMap<ValueId, Def>,
    order: &[BlockId],
  ) {
    let mut values: Vec<ValueId> = defs.keys().copied().collect();
    values.sort_by_key(|v| v.index());
    let mut memo = HashMap::new();
    for value in values {
      let data = function.value(&value);
      if !data.is_address() && self.needs_memory(data.ty, &mut memo, &mut Vec::new()) {
        self.errors.push(VerifyError::AddressOnlyObject {
          function: function.name.clone(),
          value: value.index(),
          ty: self.types.display(&data.ty),
        });
      }
    }

    for id in order {
      let block = function.block(id);
      for instr in &block.instructions {
        let objects: Vec<ValueId> = match instr {
          Instr::Struct { fields, .. } => fields.clone(),
          Instr::Tuple { elements, .. } => elements.clone(),
          Instr::Enum { payload, .. } => payload.iter().copied().collect(),
          Instr::Store { value, .. } => vec![*value],
          Instr::CopyValue { operand, .. } | Instr::DestroyValue { operand } | Instr::BeginBorrow { operand, .. } => {
            vec![*operand]
          },
          _ => Vec::new(),
        };
        for value in objects {
          if function.value(&value).is_address() {
            self.errors.push(VerifyError::AddressUsedAsObject {
              function: function.name.clone(),
              block: block.label.clone(),
              value: value.index(),
            });
          }
        }
      }
    }
  }

  /// Whether `ty` is address-only no matter what the layout of its
  /// nominal types turns out to be. Recursion through a type already being
  /// visited does not count.
  fn needs_memory(
    &self,
    ty: TypeId,
    memo: &mut HashMap<TypeId, bool>,
    visiting: &mut Vec<TypeId>,
  ) -> bool {
    if let Some(known) = memo.get(&ty) {
      return *known;
    }
    if visiting.contains(&ty) {
      return false;
    }

    visiting.push(ty);
    let result = match self.types.get(&ty) {
      Type::GenericParam { .. } => true,
      Type::Existential(protocols) => {
        protocols.is_empty() || !protocols.iter().all(|p| self.types.protocol(p).class_bound)
      },
      Type::Tuple(elements) => elements.iter().any(|e| self.needs_memory(*e, memo, visiting)),
      Type::Nominal(id) => {
        let decl = self.types.nominal_decl(id);
        match &decl.kind {
          NominalKind::Class { .. } => false,
          _ if decl.custom_copy => true,
          NominalKind::Struct { fields } => fields.iter().any(|f| self.needs_memory(f.ty, memo, visiting)),
          NominalKind::Enum { cases } => cases
            .iter()
            .filter(|c| !c.indirect)
            .filter_map(|c| c.payload)
            .any(|p| self.needs_memory(p, memo, visiting)),
        }
      },
      _ => false,
    };
    visiting.pop();
    // Answers that depended on an enclosing visit are not final
    if visiting.is_empty() {
      memo.insert(ty, result);
    }
    result
  }

  fn check_terminators(
    &mut self,
    function: &Function,
    order: &[BlockId],
  ) {
    for id in order {
      let block = function.block(id);
      match &block.terminator {
        Some(Terminator::CondBr { condition, .. }) => {
          if function.value(condition).ty != self.types.bool() {
            self.errors.push(VerifyError::NonBoolBranchCondition {
              function: function.name.clone(),
              block: block.label.clone(),
              value: condition.index(),
            });
          }
        },
        Some(Terminator::SwitchEnum {
          operand,
          cases,
          default,
        }) => self.check_switch(function, block, *operand, cases, default),
        Some(Terminator::SwitchEnumAddr {
          address,
          cases,
          default,
        }) => self.check_switch(function, block, *address, cases, default),
        _ => {},
      }
    }
  }

  fn check_switch(
    &mut self,
    function: &Function,
    block: &Block,
    scrutinee: ValueId,
    cases: &[SwitchTarget],
    default: &Option<BlockId>,
  ) {
    let mut seen = HashSet::new();
    for target in cases {
      if !seen.insert(target.case) {
        self.errors.push(VerifyError::DuplicateSwitchCase {
          function: function.name.clone(),
          block: block.label.clone(),
          case: target.case,
        });
      }
    }

    if default.is_some() {
      return;
    }

    let ty = function.value(&scrutinee).ty;
    let Some(declared) = self.types.enum_cases(&ty) else {
      return;
    };

    for case in 0..declared.len() as u32 {
      if !seen.contains(&case) {
        self.errors.push(VerifyError::NonExhaustiveSwitch {
          function: function.name.clone(),
          block: block.label.clone(),
          case,
        });
      }
    }
  }

  fn check_lifetimes(
    &mut self,
    function: &Function,
    defs: &HashMap<ValueId, Def>,
    order: &[BlockId],
  ) {
    let mut uses: HashMap<ValueId, Vec<(BlockId, usize, UseKind)>> = HashMap::new();
    for id in order {
      let block = function.block(id);
      for (pos, value, kind) in block_uses(block) {
        if kind == UseKind::Consuming && function.value(&value).ownership == Ownership::Guaranteed {
          self.errors.push(VerifyError::ConsumedGuaranteed {
            function: function.name.clone(),
            block: block.label.clone(),
            value: value.index(),
          });
        }
        uses.entry(value).or_default().push((*id, pos, kind));
      }
    }

    let mut tracked: Vec<(ValueId, LifetimeKind)> = Vec::new();
    for id in order {
      let block = function.block(id);
      for param in &block.params {
        let data = function.value(param);
        if data.ownership == Ownership::Owned && !data.is_address() {
          tracked.push((*param, LifetimeKind::Owned));
        }
      }

      for instr in &block.instructions {
        for result in instr.results() {
          let data = function.value(&result);
          if data.ownership == Ownership::Owned && !data.is_address() {
            tracked.push((result, LifetimeKind::Owned));
          }
        }

        match instr {
          Instr::BeginBorrow { dest, .. } | Instr::LoadBorrow { dest, .. } => {
            tracked.push((*dest, LifetimeKind::Borrow));
          },
          Instr::BeginAccess { dest, .. } => tracked.push((*dest, LifetimeKind::Access)),
          Instr::BeginApply { token, .. } => tracked.push((*token, LifetimeKind::Coroutine)),
          _ => {},
        }
      }
    }

    let empty = Vec::new();
    for (value, kind) in tracked {
      let value_uses = uses.get(&value).unwrap_or(&empty);
      self.check_linear_lifetime(function, value, kind, defs[&value], value_uses);
    }
  }

  /// Walks every path from the definition and requires exactly one ending
  /// use before the path leaves the function. Paths ending in `unreachable`
  /// are exempt.
  fn check_linear_lifetime(
    &mut self,
    function: &Function,
    value: ValueId,
    kind: LifetimeKind,
    def: Def,
    uses: &[(BlockId, usize, UseKind)],
  ) {
    let ends = |use_kind: UseKind| match kind {
      LifetimeKind::Owned => use_kind == UseKind::Consuming,
      LifetimeKind::Borrow => use_kind == UseKind::EndBorrow,
      LifetimeKind::Access => use_kind == UseKind::EndAccess,
      LifetimeKind::Coroutine => use_kind == UseKind::EndApply,
    };

    let mut ending: HashMap<BlockId, Vec<usize>> = HashMap::new();
    for (block, pos, use_kind) in uses {
      if ends(*use_kind) {
        ending.entry(*block).or_default().push(*pos);
      }
    }
    for positions in ending.values_mut() {
      positions.sort_unstable();
    }

    let label = |id: &BlockId| function.block(id).label.clone();
    let mut entry_state: HashMap<BlockId, bool> = HashMap::new();
    let mut queue = VecDeque::from([(def.block, true, def.pos)]);

    while let Some((id, live_in, start)) = queue.pop_front() {
      let mut live = live_in;
      for _ in ending.get(&id).into_iter().flatten().filter(|p| **p > start) {
        if !live {
          self.errors.push(VerifyError::DoubleConsume {
            function: function.name.clone(),
            block: label(&id),
            value: value.index(),
            kind,
          });
          return;
        }
        live = false;
      }

      let Some(term) = &function.block(&id).terminator else {
        continue;
      };

      if term.is_function_exit() && live {
        self.errors.push(VerifyError::LeakedValue {
          function: function.name.clone(),
          block: label(&id),
          value: value.index(),
          kind,
        });
        return;
      }

      for succ in term.successors() {
        if succ == def.block {
          if live {
            self.errors.push(VerifyError::LeakedValue {
              function: function.name.clone(),
              block: label(&id),
              value: value.index(),
              kind,
            });
            return;
          }
          continue;
        }

        match entry_state.get(&succ) {
          Some(previous) if *previous != live => {
            self.errors.push(VerifyError::InconsistentLifetime {
              function: function.name.clone(),
              block: label(&succ),
              value: value.index(),
              kind,
            });
            return;
          },
          Some(_) => {},
          None => {
            entry_state.insert(succ, live);
            queue.push_back((succ, live, 0));
          },
        }
      }
    }
  }

  fn check_stack(
    &mut self,
    function: &Function,
  ) {
    let entry = function.entry_block();
    let mut states: HashMap<BlockId, Vec<ValueId>> = HashMap::from([(entry, Vec::new())]);
    let mut queue = VecDeque::from([entry]);

    while let Some(id) = queue.pop_front() {
      let block = function.block(&id);
      let mut stack = states[&id].clone();

      for instr in &block.instructions {
        match instr {
          Instr::AllocStack { dest, .. } => stack.push(*dest),
          Instr::DeallocStack { address } => {
            if stack.last() == Some(address) {
              stack.pop();
            } else {
              self.errors.push(VerifyError::StackOrderViolation {
                function: function.name.clone(),
                block: block.label.clone(),
                value: address.index(),
              });
              stack.retain(|v| v != address);
            }
          },
          _ => {},
        }
      }

      let Some(term) = &block.terminator else {
        continue;
      };

      if term.is_function_exit() {
        if let Some(top) = stack.last() {
          self.errors.push(VerifyError::LeakedStackAllocation {
            function: function.name.clone(),
            block: block.label.clone(),
            value: top.index(),
          });
        }
        continue;
      }

      for succ in term.successors() {
        match states.get(&succ) {
          Some(previous) => {
            if *previous != stack {
              self.errors.push(VerifyError::InconsistentStack {
                function: function.name.clone(),
                block: function.block(&succ).label.clone(),
              });
            }
          },
          None => {
            states.insert(succ, stack.clone());
            queue.push_back(succ);
          },
        }
      }
    }
  }

  /// No two open accesses may reach overlapping parts of one storage
  /// location when either of them modifies it.
  fn check_accesses(
    &mut self,
    function: &Function,
  ) {
    let mut def_instr: HashMap<ValueId, &Instr> = HashMap::new();
    for instr in function.instructions() {
      for result in instr.results() {
        def_instr.insert(result, instr);
      }
    }

    let entry = function.entry_block();
    let mut states: HashMap<BlockId, Vec<OpenAccess>> = HashMap::from([(entry, Vec::new())]);
    let mut queue = VecDeque::from([entry]);

    while let Some(id) = queue.pop_front() {
      let block = function.block(&id);
      let mut open = states[&id].clone();

      for instr in &block.instructions {
        match instr {
          Instr::BeginAccess {
            dest, address, kind, ..
          } => {
            let storage = storage_path(*address, &def_instr);
            let (root, path) = match storage {
              Some((root, path)) => (Some(root), path),
              None => (None, Vec::new()),
            };

            if root.is_some() {
              for other in &open {
                let conflicts = other.root == root
                  && paths_overlap(&other.path, &path)
                  && (other.kind == AccessKind::Modify || *kind == AccessKind::Modify);
                if conflicts {
                  self.errors.push(VerifyError::OverlappingAccess {
                    function: function.name.clone(),
                    block: block.label.clone(),
                    value: dest.index(),
                    other: other.access.index(),
                  });
                }
              }
            }

            open.push(OpenAccess {
              access: *dest,
              root,
              path,
              kind: *kind,
            });
          },
          Instr::EndAccess { access } => open.retain(|o| o.access != *access),
          _ => {},
        }
      }

      let Some(term) = &block.terminator else {
        continue;
      };
      for succ in term.successors() {
        if !states.contains_key(&succ) {
          states.insert(succ, open.clone());
          queue.push_back(succ);
        }
      }
    }
  }
}

/// Traces an address back to the storage it projects from. Addresses derived
/// from class references or coroutine yields have no statically known root.
fn storage_path(
  address: ValueId,
  def_instr: &HashMap<ValueId, &Instr>,
) -> Option<(StorageRoot, Vec<u32>)> {
  let mut path = Vec::new();
  let mut current = address;

  loop {
    let Some(instr) = def_instr.get(&current) else {
      path.reverse();
      return Some((StorageRoot::Value(current), path));
    };

    match instr {
      Instr::StructElementAddr { address, field, .. } => {
        path.push(*field);
        current = *address;
      },
      Instr::TupleElementAddr { address, index, .. } => {
        path.push(*index);
        current = *address;
      },
      Instr::BeginAccess { address, .. }
      | Instr::InitEnumDataAddr { address, .. }
      | Instr::UncheckedTakeEnumDataAddr { address, .. } => current = *address,
      Instr::ProjectBox { boxed, .. } => current = *boxed,
      Instr::CopyValue { operand, .. } | Instr::BeginBorrow { operand, .. } => current = *operand,
      Instr::AllocStack { dest, .. } | Instr::AllocBox { dest, .. } => {
        path.reverse();
        return Some((StorageRoot::Value(*dest), path));
      },
      Instr::GlobalAddr { global, .. } => {
        path.reverse();
        return Some((StorageRoot::Global(*global), path));
      },
      _ => return None,
    }
  }
}
