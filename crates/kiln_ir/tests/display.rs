mod common;

use common::FnBuilder;
use insta::assert_snapshot;
use kiln_ast::BinaryOp;
use kiln_ir::{
  ArgConvention, ConstValue, Function, FunctionKind, GlobalData, Instr, IrModule, LoweredParam, LoweredSignature,
  Ownership, Terminator, print_function, print_module,
};
use kiln_type::{
  span::Span,
  types::{FnRepr, TypeStore},
};

#[test]
fn prints_function_body() {
  let types = TypeStore::new();
  let int = types.int();
  let params = vec![LoweredParam {
    ty: int,
    convention: ArgConvention::DirectGuaranteed,
  }];
  let mut b = FnBuilder::new("inc", params, int);
  let entry = b.block();
  let n = b.param(entry, int, Ownership::Trivial);
  let one = b.value(int, Ownership::Trivial);
  let sum = b.value(int, Ownership::Trivial);
  b.push(
    entry,
    Instr::Const {
      dest: one,
      value: ConstValue::Int(1),
    },
  );
  b.push(
    entry,
    Instr::Builtin {
      dest: sum,
      op: BinaryOp::Add,
      lhs: n,
      rhs: one,
    },
  );
  b.terminate(entry, Terminator::Return(Some(sum)));

  let module = IrModule::new("m");
  assert_snapshot!(print_function(&module, &types, &b.finish()), @r###"
  fn @inc : $(@guaranteed Int) -> Int {
  bb0(%0 : @trivial $Int):
    %1 = integer_literal $Int, 1
    %2 = builtin "add"(%0, %1)
    return %2
  }
  "###);
}

#[test]
fn prints_declarations_and_globals() {
  let mut types = TypeStore::new();
  let t = types.generic_param(0, 0);
  let signature = LoweredSignature {
    params: vec![
      LoweredParam {
        ty: t,
        convention: ArgConvention::IndirectOut,
      },
      LoweredParam {
        ty: t,
        convention: ArgConvention::IndirectInGuaranteed,
      },
    ],
    result: types.unit(),
    error: None,
    repr: FnRepr::Thick,
    coroutine: false,
  };

  let mut module = IrModule::new("m");
  module.add_global(GlobalData {
    name: "counter".to_string(),
    ty: types.int(),
    decl: None,
    initializer: None,
  });
  module.add_function(Function::declaration(
    "identity".to_string(),
    None,
    FunctionKind::Normal,
    signature,
    Span::default(),
  ));

  assert_snapshot!(print_module(&module, &types), @r###"
  module m
  global @counter : $Int

  fn @identity : $(@in_guaranteed τ_0_0) -> @out τ_0_0
  "###);
}
