use kiln_type::span::Span;

use crate::{ArgConvention, BlockId, ValueId, instr::convention_use, instr::UseKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwitchTarget {
  pub case: u32,
  pub block: BlockId,
}

/// Block terminator - every reachable block ends with exactly one.
#[derive(Debug, Clone, PartialEq)]
pub enum Terminator {
  Br {
    target: BlockId,
    args: Vec<ValueId>,
  },
  CondBr {
    condition: ValueId,
    then_block: BlockId,
    else_block: BlockId,
  },
  /// Loadable enum dispatch; payload cases receive the payload as their block argument.
  SwitchEnum {
    operand: ValueId,
    cases: Vec<SwitchTarget>,
    default: Option<BlockId>,
  },
  SwitchEnumAddr {
    address: ValueId,
    cases: Vec<SwitchTarget>,
    default: Option<BlockId>,
  },
  /// Call that may throw. `normal` receives the direct result, `error` the thrown error.
  TryApply {
    callee: ValueId,
    args: Vec<ValueId>,
    conventions: Vec<ArgConvention>,
    normal: BlockId,
    error: BlockId,
  },
  Return(Option<ValueId>),
  Throw(ValueId),
  Unreachable,
}

impl Terminator {
  pub fn successors(&self) -> Vec<BlockId> {
    match self {
      Terminator::Br { target, .. } => vec![*target],
      Terminator::CondBr {
        then_block, else_block, ..
      } => vec![*then_block, *else_block],
      Terminator::SwitchEnum { cases, default, .. } | Terminator::SwitchEnumAddr { cases, default, .. } => {
        let mut succs: Vec<BlockId> = cases.iter().map(|c| c.block).collect();
        succs.extend(default.iter().copied());
        succs
      },
      Terminator::TryApply { normal, error, .. } => vec![*normal, *error],
      Terminator::Return(_) | Terminator::Throw(_) | Terminator::Unreachable => vec![],
    }
  }

  pub fn successors_mut(&mut self) -> Vec<&mut BlockId> {
    match self {
      Terminator::Br { target, .. } => vec![target],
      Terminator::CondBr {
        then_block, else_block, ..
      } => vec![then_block, else_block],
      Terminator::SwitchEnum { cases, default, .. } | Terminator::SwitchEnumAddr { cases, default, .. } => {
        let mut succs: Vec<&mut BlockId> = cases.iter_mut().map(|c| &mut c.block).collect();
        succs.extend(default.iter_mut());
        succs
      },
      Terminator::TryApply { normal, error, .. } => vec![normal, error],
      Terminator::Return(_) | Terminator::Throw(_) | Terminator::Unreachable => vec![],
    }
  }

  pub fn uses(&self) -> Vec<(ValueId, UseKind)> {
    match self {
      Terminator::Br { args, .. } => args.iter().map(|a| (*a, UseKind::Consuming)).collect(),
      Terminator::CondBr { condition, .. } => vec![(*condition, UseKind::NonConsuming)],
      Terminator::SwitchEnum { operand, .. } => vec![(*operand, UseKind::Consuming)],
      Terminator::SwitchEnumAddr { address, .. } => vec![(*address, UseKind::NonConsuming)],
      Terminator::TryApply {
        callee,
        args,
        conventions,
        ..
      } => {
        let mut uses = vec![(*callee, UseKind::NonConsuming)];
        for (i, arg) in args.iter().enumerate() {
          let kind = conventions.get(i).copied().map(convention_use).unwrap_or(UseKind::NonConsuming);
          uses.push((*arg, kind));
        }
        uses
      },
      Terminator::Return(value) => value.iter().map(|v| (*v, UseKind::Consuming)).collect(),
      Terminator::Throw(error) => vec![(*error, UseKind::Consuming)],
      Terminator::Unreachable => vec![],
    }
  }

  /// Leaves the function normally or by throwing.
  pub fn is_function_exit(&self) -> bool {
    matches!(self, Terminator::Return(_) | Terminator::Throw(_))
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Block {
  pub label: String,
  pub params: Vec<ValueId>,
  pub instructions: Vec<crate::Instr>,
  pub terminator: Option<Terminator>,
  pub span: Span,
}

impl Block {
  pub fn new(label: String) -> Self {
    Self {
      label,
      params: Vec::new(),
      instructions: Vec::new(),
      terminator: None,
      span: Span::default(),
    }
  }

  pub fn is_terminated(&self) -> bool {
    self.terminator.is_some()
  }
}
