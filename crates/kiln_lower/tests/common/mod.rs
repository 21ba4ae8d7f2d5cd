#![allow(dead_code)]

use kiln_ast::AstBuilder;
use kiln_config::{KilnConfig, LoweringOptions};
use kiln_ir::{Function, Instr, Terminator, print_function, verify_module};
use kiln_lower::{LoweringOutput, lower_module};
use kiln_type::{
  nominal::{ProtocolDecl, ProtocolId},
  types::{TypeId, TypeStore},
};

pub struct Lowered {
  pub output: LoweringOutput,
  pub types: TypeStore,
}

impl Lowered {
  pub fn function(
    &self,
    name: &str,
  ) -> &Function {
    match self.output.module.function_named(name) {
      Some(function) => function,
      None => panic!("no function named {}", name),
    }
  }

  pub fn print(
    &self,
    name: &str,
  ) -> String {
    print_function(&self.output.module, &self.types, self.function(name))
  }

  pub fn assert_verifies(&self) {
    if let Err(errors) = verify_module(&self.output.module, &self.types) {
      let text: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
      panic!("verifier rejected lowered module:\n{}", text.join("\n"));
    }
  }

  pub fn assert_clean(&self) {
    assert!(
      self.output.is_ok(),
      "lowering abandoned {:?}",
      self.output.abandoned
    );
    self.assert_verifies();
  }
}

pub fn lower(b: AstBuilder) -> Lowered {
  lower_with(b, LoweringOptions::default())
}

pub fn lower_with(
  b: AstBuilder,
  options: LoweringOptions,
) -> Lowered {
  let config = KilnConfig::silent().with_lowering(options);
  let (ast, mut types) = b.finish();
  let output = lower_module(&ast, &mut types, &config);
  Lowered { output, types }
}

/// An existential over a fresh protocol that is not class-bound, so it is
/// address-only.
pub fn opaque_protocol(
  b: &mut AstBuilder,
  name: &str,
  requirements: &[&str],
) -> (ProtocolId, TypeId) {
  let requirements = requirements.iter().map(|r| r.to_string()).collect();
  let protocol = b.types.declare_protocol(ProtocolDecl::new(name, requirements));
  let ty = b.types.existential(vec![protocol]);
  (protocol, ty)
}

/// Short name of every instruction and terminator, block by block.
pub fn opcodes(function: &Function) -> Vec<&'static str> {
  let mut ops = Vec::new();
  for block in function.blocks.get_all() {
    ops.extend(block.instructions.iter().map(opcode));
    if let Some(term) = &block.terminator {
      ops.push(terminator_name(term));
    }
  }
  ops
}

pub fn count(
  function: &Function,
  name: &str,
) -> usize {
  opcodes(function).iter().filter(|op| **op == name).count()
}

pub fn labels(function: &Function) -> Vec<String> {
  function.blocks.get_all().iter().map(|b| b.label.clone()).collect()
}

pub fn opcode(instr: &Instr) -> &'static str {
  match instr {
    Instr::Const { .. } => "const",
    Instr::Builtin { .. } => "builtin",
    Instr::FunctionRef { .. } => "function_ref",
    Instr::ThinToThick { .. } => "thin_to_thick_function",
    Instr::ConvertFunction { .. } => "convert_function",
    Instr::Apply { .. } => "apply",
    Instr::PartialApply { .. } => "partial_apply",
    Instr::BeginApply { .. } => "begin_apply",
    Instr::EndApply { .. } => "end_apply",
    Instr::ClassMethod { .. } => "class_method",
    Instr::WitnessMethod { .. } => "witness_method",
    Instr::CopyValue { .. } => "copy_value",
    Instr::DestroyValue { .. } => "destroy_value",
    Instr::BeginBorrow { .. } => "begin_borrow",
    Instr::LoadBorrow { .. } => "load_borrow",
    Instr::EndBorrow { .. } => "end_borrow",
    Instr::Load { .. } => "load",
    Instr::Store { .. } => "store",
    Instr::AllocStack { .. } => "alloc_stack",
    Instr::DeallocStack { .. } => "dealloc_stack",
    Instr::AllocBox { .. } => "alloc_box",
    Instr::ProjectBox { .. } => "project_box",
    Instr::DeallocBox { .. } => "dealloc_box",
    Instr::AllocRef { .. } => "alloc_ref",
    Instr::CopyAddr { .. } => "copy_addr",
    Instr::DestroyAddr { .. } => "destroy_addr",
    Instr::BeginAccess { .. } => "begin_access",
    Instr::EndAccess { .. } => "end_access",
    Instr::Struct { .. } => "struct",
    Instr::StructExtract { .. } => "struct_extract",
    Instr::StructElementAddr { .. } => "struct_element_addr",
    Instr::Tuple { .. } => "tuple",
    Instr::TupleExtract { .. } => "tuple_extract",
    Instr::TupleElementAddr { .. } => "tuple_element_addr",
    Instr::Enum { .. } => "enum",
    Instr::InitEnumDataAddr { .. } => "init_enum_data_addr",
    Instr::InjectEnumAddr { .. } => "inject_enum_addr",
    Instr::UncheckedTakeEnumDataAddr { .. } => "unchecked_take_enum_data_addr",
    Instr::InitExistentialAddr { .. } => "init_existential_addr",
    Instr::InitExistentialRef { .. } => "init_existential_ref",
    Instr::OpenExistentialAddr { .. } => "open_existential_addr",
    Instr::AllocExistentialBox { .. } => "alloc_existential_box",
    Instr::RefElementAddr { .. } => "ref_element_addr",
    Instr::GlobalAddr { .. } => "global_addr",
    Instr::Once { .. } => "once",
  }
}

fn terminator_name(term: &Terminator) -> &'static str {
  match term {
    Terminator::Br { .. } => "br",
    Terminator::CondBr { .. } => "cond_br",
    Terminator::SwitchEnum { .. } => "switch_enum",
    Terminator::SwitchEnumAddr { .. } => "switch_enum_addr",
    Terminator::TryApply { .. } => "try_apply",
    Terminator::Return(_) => "return",
    Terminator::Throw(_) => "throw",
    Terminator::Unreachable => "unreachable",
  }
}
