mod common;

use common::{count, labels, lower, opaque_protocol, opcodes};
use kiln_ast::{AstBuilder, BinaryOp};
use kiln_type::{
  nominal::{EnumCase, NominalDecl, NominalKind},
  types::ParamConvention,
};

#[test]
fn if_else_joins_in_merge_block() {
  let mut b = AstBuilder::new("m");
  let bool_ty = b.types.bool();
  let int = b.types.int();

  let flag = b.param("flag", bool_ty, ParamConvention::Guaranteed);
  let choose = b.func("choose", vec![flag], int);
  let r = b.var("r", int);
  let zero = b.int(0);
  let bind = b.let_stmt(r, zero);
  let cond = b.decl_ref(flag);

  let then_place = b.decl_ref(r);
  let one = b.int(1);
  let then_assign = b.assign(then_place, one);
  let then_stmt = b.expr_stmt(then_assign);
  let else_place = b.decl_ref(r);
  let two = b.int(2);
  let else_assign = b.assign(else_place, two);
  let else_stmt = b.expr_stmt(else_assign);
  let branch = b.if_stmt(cond, vec![then_stmt], Some(vec![else_stmt]));

  let result = b.decl_ref(r);
  let ret = b.ret(Some(result));
  b.set_body(choose, vec![bind, branch, ret]);

  let lowered = lower(b);
  lowered.assert_clean();
  let function = lowered.function("choose");
  assert_eq!(labels(function), vec!["entry_0", "if_then_1", "if_else_2", "if_merge_3"]);
  assert_eq!(count(function, "dealloc_stack"), 1);
}

#[test]
fn if_without_else_falls_through_end_block() {
  let mut b = AstBuilder::new("m");
  let bool_ty = b.types.bool();
  let unit = b.types.unit();

  let flag = b.param("flag", bool_ty, ParamConvention::Guaranteed);
  let noop = b.func("noop", vec![flag], unit);
  let cond = b.decl_ref(flag);
  let value = b.int(7);
  let ignored = b.expr_stmt(value);
  let branch = b.if_stmt(cond, vec![ignored], None);
  b.set_body(noop, vec![branch]);

  let lowered = lower(b);
  lowered.assert_clean();
  assert_eq!(
    labels(lowered.function("noop")),
    vec!["entry_0", "if_then_1", "if_end_2", "if_merge_3"]
  );
}

#[test]
fn break_leaves_while_loop() {
  let mut b = AstBuilder::new("m");
  let bool_ty = b.types.bool();
  let unit = b.types.unit();

  let flag = b.param("flag", bool_ty, ParamConvention::Guaranteed);
  let spin = b.func("spin", vec![flag], unit);
  let cond = b.decl_ref(flag);
  let brk = b.break_stmt();
  let body = b.while_loop(cond, vec![brk]);
  b.set_body(spin, vec![body]);

  let lowered = lower(b);
  lowered.assert_clean();
  let function = lowered.function("spin");
  assert_eq!(
    labels(function),
    vec!["entry_0", "while_header_1", "while_body_2", "while_exit_3"]
  );
  assert_eq!(opcodes(function), vec!["br", "cond_br", "br", "return"]);
}

#[test]
fn for_range_counts_through_latch() {
  let mut b = AstBuilder::new("m");
  let int = b.types.int();

  let n = b.param("n", int, ParamConvention::Guaranteed);
  let sum = b.func("sum", vec![n], int);
  let total = b.var("total", int);
  let zero = b.int(0);
  let bind = b.let_stmt(total, zero);

  let i = b.constant("i", int);
  let start = b.int(0);
  let end = b.decl_ref(n);
  let place = b.decl_ref(total);
  let current = b.decl_ref(total);
  let index = b.decl_ref(i);
  let added = b.binary(BinaryOp::Add, current, index);
  let update = b.assign(place, added);
  let update = b.expr_stmt(update);
  let range = b.for_range(i, start, end, vec![update]);

  let result = b.decl_ref(total);
  let ret = b.ret(Some(result));
  b.set_body(sum, vec![bind, range, ret]);

  let lowered = lower(b);
  lowered.assert_clean();
  let function = lowered.function("sum");
  assert_eq!(
    labels(function),
    vec!["entry_0", "for_header_1", "for_body_2", "for_latch_3", "for_exit_4"]
  );
  // bound check, body addition, increment
  assert_eq!(count(function, "builtin"), 3);
}

#[test]
fn continue_outside_loop_is_rejected() {
  let mut b = AstBuilder::new("m");
  let unit = b.types.unit();
  let stray = b.func("stray", vec![], unit);
  let cont = b.continue_stmt();
  b.set_body(stray, vec![cont]);

  let lowered = lower(b);
  assert_eq!(lowered.output.abandoned, vec!["stray".to_string()]);
  assert_eq!(lowered.output.diagnostics[0].error_code, "L0001");
  assert!(lowered.function("stray").is_declaration());
}

#[test]
fn missing_switch_cases_become_unreachable() {
  let mut b = AstBuilder::new("m");
  let int = b.types.int();
  let (_, shape) = b.types.declare_nominal(NominalDecl::new(
    "Shape",
    NominalKind::Enum {
      cases: vec![
        EnumCase::new("circle", Some(int)),
        EnumCase::new("square", Some(int)),
        EnumCase::new("point", None),
      ],
    },
  ));

  let s = b.param("s", shape, ParamConvention::Guaranteed);
  let size = b.func("size", vec![s], int);
  let subject = b.decl_ref(s);
  let r = b.constant("r", int);
  let side = b.constant("side", int);
  let radius = b.decl_ref(r);
  let ret_radius = b.ret(Some(radius));
  let edge = b.decl_ref(side);
  let ret_edge = b.ret(Some(edge));
  let switch = b.switch(subject, vec![(0, Some(r), vec![ret_radius]), (1, Some(side), vec![ret_edge])]);
  b.set_body(size, vec![switch]);

  let lowered = lower(b);
  lowered.assert_clean();
  let function = lowered.function("size");
  assert_eq!(labels(function), vec!["entry_0", "case_1", "case_2", "case_unreachable_3"]);
  assert_eq!(count(function, "switch_enum"), 1);
  assert_eq!(count(function, "unreachable"), 1);
}

#[test]
fn switch_over_address_only_enum_takes_payload_from_memory() {
  let mut b = AstBuilder::new("m");
  let (_, p) = opaque_protocol(&mut b, "P", &[]);
  let unit = b.types.unit();
  let (_, opt) = b.types.declare_nominal(NominalDecl::new(
    "Opt",
    NominalKind::Enum {
      cases: vec![EnumCase::new("none", None), EnumCase::new("some", Some(p))],
    },
  ));

  let o = b.param("o", opt, ParamConvention::Guaranteed);
  let inspect = b.func("inspect", vec![o], unit);
  let subject = b.decl_ref(o);
  let bound = b.constant("value", p);
  let switch = b.switch(subject, vec![(0, None, vec![]), (1, Some(bound), vec![])]);
  b.set_body(inspect, vec![switch]);

  let lowered = lower(b);
  lowered.assert_clean();
  let function = lowered.function("inspect");
  assert_eq!(labels(function), vec!["entry_0", "case_1", "case_2", "switch_merge_3"]);
  assert_eq!(count(function, "switch_enum_addr"), 1);
  assert_eq!(count(function, "unchecked_take_enum_data_addr"), 1);
  assert_eq!(count(function, "destroy_addr"), 1);
  assert_eq!(count(function, "dealloc_stack"), 1);
}

/// `enum Opt { case none; indirect case some(any P) }`
fn indirect_opt(b: &mut AstBuilder) -> (kiln_type::types::TypeId, kiln_type::types::TypeId) {
  let (_, p) = opaque_protocol(b, "P", &[]);
  let mut some = EnumCase::new("some", Some(p));
  some.indirect = true;
  let (_, opt) = b.types.declare_nominal(NominalDecl::new(
    "Opt",
    NominalKind::Enum {
      cases: vec![EnumCase::new("none", None), some],
    },
  ));
  (p, opt)
}

#[test]
fn indirect_payload_is_initialized_inside_a_box() {
  let mut b = AstBuilder::new("m");
  let (p, opt) = indirect_opt(&mut b);

  let param = b.param("p", p, ParamConvention::Owned);
  let make = b.func("make", vec![param], opt);
  let value = b.decl_ref(param);
  let some = b.enum_case(opt, 1, Some(value));
  let ret = b.ret(Some(some));
  b.set_body(make, vec![ret]);

  let lowered = lower(b);
  lowered.assert_clean();
  assert_eq!(
    opcodes(lowered.function("make")),
    vec!["alloc_box", "project_box", "copy_addr", "enum", "destroy_addr", "return"]
  );
}

#[test]
fn switch_reads_indirect_payload_through_its_box() {
  let mut b = AstBuilder::new("m");
  let unit = b.types.unit();
  let (p, opt) = indirect_opt(&mut b);

  let seen = b.param("seen", p, ParamConvention::Guaranteed);
  let observe = b.func("observe", vec![seen], unit);

  let o = b.param("o", opt, ParamConvention::Guaranteed);
  let inspect = b.func("inspect", vec![o], unit);
  let subject = b.decl_ref(o);
  let bound = b.constant("value", p);
  let arg = b.decl_ref(bound);
  let call = b.call(observe, vec![arg]);
  let use_value = b.expr_stmt(call);
  let switch = b.switch(subject, vec![(0, None, vec![]), (1, Some(bound), vec![use_value])]);
  b.set_body(inspect, vec![switch]);

  let lowered = lower(b);
  lowered.assert_clean();
  let function = lowered.function("inspect");
  assert_eq!(count(function, "switch_enum"), 1);
  assert_eq!(count(function, "project_box"), 1);
  assert_eq!(count(function, "copy_addr"), 0);
  // The box is the only payload the case owns
  assert_eq!(count(function, "destroy_value"), 1);
  assert_eq!(count(function, "destroy_addr"), 0);
}

#[test]
fn guard_else_must_leave_scope() {
  let mut b = AstBuilder::new("m");
  let bool_ty = b.types.bool();
  let int = b.types.int();

  let flag = b.param("flag", bool_ty, ParamConvention::Guaranteed);
  let checked = b.func("checked", vec![flag], int);
  let cond = b.decl_ref(flag);
  let zero = b.int(0);
  let bail = b.ret(Some(zero));
  let guard = b.guard(cond, vec![bail]);
  let one = b.int(1);
  let ret = b.ret(Some(one));
  b.set_body(checked, vec![guard, ret]);

  let flag = b.param("flag", bool_ty, ParamConvention::Guaranteed);
  let leaky = b.func("leaky", vec![flag], int);
  let cond = b.decl_ref(flag);
  let guard = b.guard(cond, vec![]);
  let one = b.int(1);
  let ret = b.ret(Some(one));
  b.set_body(leaky, vec![guard, ret]);

  let lowered = lower(b);
  assert_eq!(lowered.output.abandoned, vec!["leaky".to_string()]);
  assert_eq!(
    labels(lowered.function("checked")),
    vec!["entry_0", "guard_cont_1", "guard_else_2"]
  );
  lowered.assert_verifies();
}

#[test]
fn thrown_error_reaches_catch_block() {
  let mut b = AstBuilder::new("m");
  let int = b.types.int();
  let error = b.types.error_existential();

  let risky = b.func("risky", vec![], int);
  b.set_throws(risky);

  let safe = b.func("safe", vec![], int);
  let v = b.constant("v", int);
  let call = b.call(risky, vec![]);
  let attempt = b.try_expr(call);
  let bind = b.let_stmt(v, attempt);
  let value = b.decl_ref(v);
  let ret = b.ret(Some(value));
  let e = b.constant("e", error);
  let zero = b.int(0);
  let fallback = b.ret(Some(zero));
  let handled = b.do_catch(vec![bind, ret], e, vec![fallback]);
  b.set_body(safe, vec![handled]);

  let lowered = lower(b);
  lowered.assert_clean();
  let function = lowered.function("safe");
  assert_eq!(
    labels(function),
    vec!["entry_0", "catch_1", "call_normal_2", "call_error_3"]
  );
  assert_eq!(
    opcodes(function),
    vec!["function_ref", "try_apply", "const", "destroy_value", "return", "return", "br"]
  );
}

#[test]
fn error_escaping_non_throwing_function_is_rejected() {
  let mut b = AstBuilder::new("m");
  let int = b.types.int();

  let risky = b.func("risky", vec![], int);
  b.set_throws(risky);

  let careless = b.func("careless", vec![], int);
  let call = b.call(risky, vec![]);
  let attempt = b.try_expr(call);
  let ret = b.ret(Some(attempt));
  b.set_body(careless, vec![ret]);

  let lowered = lower(b);
  assert_eq!(lowered.output.abandoned, vec!["careless".to_string()]);
}

#[test]
fn ternary_merges_owned_arms_through_join_argument() {
  let mut b = AstBuilder::new("m");
  let bool_ty = b.types.bool();
  let string = b.types.string();

  let flag = b.param("flag", bool_ty, ParamConvention::Guaranteed);
  let left = b.param("left", string, ParamConvention::Guaranteed);
  let right = b.param("right", string, ParamConvention::Guaranteed);
  let pick = b.func("pick", vec![flag, left, right], string);
  let cond = b.decl_ref(flag);
  let then_value = b.decl_ref(left);
  let else_value = b.decl_ref(right);
  let choice = b.ternary(cond, then_value, else_value);
  let ret = b.ret(Some(choice));
  b.set_body(pick, vec![ret]);

  let lowered = lower(b);
  lowered.assert_clean();
  let function = lowered.function("pick");
  assert_eq!(
    labels(function),
    vec!["entry_0", "ternary_then_1", "ternary_else_2", "ternary_join_3"]
  );
  assert_eq!(function.blocks.get_all()[3].params.len(), 1);
  assert_eq!(
    opcodes(function),
    vec!["cond_br", "copy_value", "br", "copy_value", "br", "return"]
  );
}

#[test]
fn statements_after_return_are_not_lowered() {
  let mut b = AstBuilder::new("m");
  let int = b.types.int();
  let string = b.types.string();

  let early = b.func("early", vec![], int);
  let one = b.int(1);
  let ret = b.ret(Some(one));
  let s = b.constant("s", string);
  let text = b.string("late");
  let bind = b.let_stmt(s, text);
  let two = b.int(2);
  let late_ret = b.ret(Some(two));
  b.set_body(early, vec![ret, bind, late_ret]);

  let lowered = lower(b);
  lowered.assert_clean();
  let function = lowered.function("early");
  assert_eq!(labels(function), vec!["entry_0"]);
  assert_eq!(opcodes(function), vec!["const", "return"]);
}
