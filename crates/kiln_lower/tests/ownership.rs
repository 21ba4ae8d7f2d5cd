mod common;

use common::{count, lower, lower_with, opaque_protocol, opcodes};
use insta::assert_snapshot;
use kiln_ast::{AstBuilder, BinaryOp};
use kiln_config::{BorrowPolicy, LoweringOptions};
use kiln_type::{
  nominal::{EnumCase, NominalDecl, NominalKind},
  types::ParamConvention,
};

#[test]
fn address_only_param_is_returned_through_out_address() {
  let mut b = AstBuilder::new("m");
  let (_, p) = opaque_protocol(&mut b, "P", &[]);

  let param = b.param("p", p, ParamConvention::Owned);
  let identity = b.func("identity", vec![param], p);
  let value = b.decl_ref(param);
  let ret = b.ret(Some(value));
  b.set_body(identity, vec![ret]);

  let lowered = lower(b);
  lowered.assert_clean();
  assert_snapshot!(lowered.print("identity"), @r###"
  fn @identity : $(@in any P) -> @out any P {
  bb0(%0 : $*any P, %1 : $*any P):
    copy_addr %1 to [init] %0
    destroy_addr %1
    return
  }
  "###);
}

#[test]
fn assignment_into_inout_takes_temporary() {
  let mut b = AstBuilder::new("m");
  let (_, p) = opaque_protocol(&mut b, "P", &[]);

  let unit = b.types.unit();
  let make = b.func("make", vec![], p);

  let dest = b.param("dest", p, ParamConvention::Inout);
  let assign = b.func("assign", vec![dest], unit);
  let place = b.decl_ref(dest);
  let call = b.call(make, vec![]);
  let store = b.assign(place, call);
  let stmt = b.expr_stmt(store);
  b.set_body(assign, vec![stmt]);

  let lowered = lower(b);
  lowered.assert_clean();
  assert_snapshot!(lowered.print("assign"), @r###"
  fn @assign : $(@inout any P) -> () {
  bb0(%0 : $*any P):
    %1 = alloc_stack $any P
    %2 = function_ref @make
    apply %2(%1)
    %3 = begin_access [modify] [static] %0
    copy_addr [take] %1 to %3
    end_access %3
    dealloc_stack %1
    return
  }
  "###);
}

#[test]
fn returning_owned_param_copies_and_destroys_original() {
  let mut b = AstBuilder::new("m");
  let string = b.types.string();
  let s = b.param("s", string, ParamConvention::Owned);
  let keep = b.func("keep", vec![s], string);
  let value = b.decl_ref(s);
  let ret = b.ret(Some(value));
  b.set_body(keep, vec![ret]);

  let lowered = lower(b);
  lowered.assert_clean();
  assert_snapshot!(lowered.print("keep"), @r###"
  fn @keep : $(@owned String) -> String {
  bb0(%0 : @owned $String):
    %1 = copy_value %0
    destroy_value %0
    return %1
  }
  "###);
}

#[test]
fn guaranteed_value_is_copied_for_owned_argument() {
  let mut b = AstBuilder::new("m");
  let string = b.types.string();
  let unit = b.types.unit();

  let taken = b.param("taken", string, ParamConvention::Owned);
  let consume = b.func("consume", vec![taken], unit);

  let s = b.param("s", string, ParamConvention::Guaranteed);
  let lend = b.func("lend", vec![s], unit);
  let arg = b.decl_ref(s);
  let call = b.call(consume, vec![arg]);
  let stmt = b.expr_stmt(call);
  b.set_body(lend, vec![stmt]);

  let lowered = lower(b);
  lowered.assert_clean();
  assert_snapshot!(lowered.print("lend"), @r###"
  fn @lend : $(@guaranteed String) -> () {
  bb0(%0 : @guaranteed $String):
    %1 = function_ref @consume
    %2 = copy_value %0
    apply %1(%2)
    return
  }
  "###);
}

#[test]
fn early_return_destroys_live_locals_on_each_path() {
  let mut b = AstBuilder::new("m");
  let bool_ty = b.types.bool();
  let int = b.types.int();
  let string = b.types.string();

  let flag = b.param("flag", bool_ty, ParamConvention::Guaranteed);
  let early = b.func("early", vec![flag], int);
  let s = b.constant("s", string);
  let hi = b.string("hi");
  let bind = b.let_stmt(s, hi);
  let cond = b.decl_ref(flag);
  let one = b.int(1);
  let ret_one = b.ret(Some(one));
  let branch = b.if_stmt(cond, vec![ret_one], None);
  let two = b.int(2);
  let ret_two = b.ret(Some(two));
  b.set_body(early, vec![bind, branch, ret_two]);

  let lowered = lower(b);
  lowered.assert_clean();
  let function = lowered.function("early");
  assert_eq!(
    opcodes(function),
    vec!["const", "cond_br", "const", "destroy_value", "return", "const", "destroy_value", "return"]
  );
  assert_eq!(count(function, "destroy_value"), 2);
}

fn observe_module() -> AstBuilder {
  let mut b = AstBuilder::new("m");
  let string = b.types.string();
  let unit = b.types.unit();

  let seen = b.param("seen", string, ParamConvention::Guaranteed);
  let observe = b.func("observe", vec![seen], unit);

  let s = b.param("s", string, ParamConvention::Guaranteed);
  let look = b.func("look", vec![s], unit);
  let arg = b.decl_ref(s);
  let call = b.call(observe, vec![arg]);
  let stmt = b.expr_stmt(call);
  b.set_body(look, vec![stmt]);
  b
}

#[test]
fn guaranteed_argument_is_passed_without_copy() {
  let lowered = lower(observe_module());
  lowered.assert_clean();
  assert_eq!(opcodes(lowered.function("look")), vec!["function_ref", "apply", "return"]);
}

#[test]
fn always_copy_policy_borrows_a_fresh_copy() {
  let options = LoweringOptions {
    borrow_policy: BorrowPolicy::AlwaysCopy,
    ..LoweringOptions::default()
  };
  let lowered = lower_with(observe_module(), options);
  lowered.assert_clean();
  assert_eq!(
    opcodes(lowered.function("look")),
    vec![
      "function_ref",
      "copy_value",
      "begin_borrow",
      "apply",
      "end_borrow",
      "destroy_value",
      "return"
    ]
  );
}

#[test]
fn mutable_local_lives_on_the_stack() {
  let mut b = AstBuilder::new("m");
  let int = b.types.int();
  let counter = b.func("counter", vec![], int);

  let x = b.var("x", int);
  let zero = b.int(0);
  let bind = b.let_stmt(x, zero);
  let place = b.decl_ref(x);
  let read = b.decl_ref(x);
  let one = b.int(1);
  let sum = b.binary(BinaryOp::Add, read, one);
  let update = b.assign(place, sum);
  let update = b.expr_stmt(update);
  let result = b.decl_ref(x);
  let ret = b.ret(Some(result));
  b.set_body(counter, vec![bind, update, ret]);

  let lowered = lower(b);
  lowered.assert_clean();
  assert_snapshot!(lowered.print("counter"), @r###"
  fn @counter : $() -> Int {
  bb0:
    %0 = alloc_stack $Int
    %1 = integer_literal $Int, 0
    store %1 to [trivial] %0
    %2 = begin_access [read] [static] %0
    %3 = load [trivial] %2
    end_access %2
    %4 = integer_literal $Int, 1
    %5 = builtin "add"(%3, %4)
    %6 = begin_access [modify] [static] %0
    store %5 to [trivial] %6
    end_access %6
    %7 = begin_access [read] [static] %0
    %8 = load [trivial] %7
    end_access %7
    dealloc_stack %0
    return %8
  }
  "###);
}

#[test]
fn address_only_let_copies_into_stack_slot() {
  let mut b = AstBuilder::new("m");
  let (_, p) = opaque_protocol(&mut b, "P", &[]);
  let unit = b.types.unit();

  let param = b.param("p", p, ParamConvention::Guaranteed);
  let hold = b.func("hold", vec![param], unit);
  let q = b.constant("q", p);
  let value = b.decl_ref(param);
  let bind = b.let_stmt(q, value);
  b.set_body(hold, vec![bind]);

  let lowered = lower(b);
  lowered.assert_clean();
  assert_eq!(
    opcodes(lowered.function("hold")),
    vec!["alloc_stack", "copy_addr", "destroy_addr", "dealloc_stack", "return"]
  );
}

#[test]
fn address_only_payload_is_built_in_place() {
  let mut b = AstBuilder::new("m");
  let (_, p) = opaque_protocol(&mut b, "P", &[]);
  let (_, opt) = b.types.declare_nominal(NominalDecl::new(
    "Opt",
    NominalKind::Enum {
      cases: vec![EnumCase::new("none", None), EnumCase::new("some", Some(p))],
    },
  ));

  let param = b.param("p", p, ParamConvention::Owned);
  let wrap = b.func("wrap", vec![param], opt);
  let value = b.decl_ref(param);
  let some = b.enum_case(opt, 1, Some(value));
  let ret = b.ret(Some(some));
  b.set_body(wrap, vec![ret]);

  let lowered = lower(b);
  lowered.assert_clean();
  assert_eq!(
    opcodes(lowered.function("wrap")),
    vec!["init_enum_data_addr", "copy_addr", "inject_enum_addr", "destroy_addr", "return"]
  );
}
