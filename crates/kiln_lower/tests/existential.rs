mod common;

use common::{count, lower, opaque_protocol, opcodes};
use kiln_ast::AstBuilder;
use kiln_ir::ArgConvention;
use kiln_type::types::ParamConvention;

#[test]
fn erased_value_is_initialized_in_the_result_slot() {
  let mut b = AstBuilder::new("m");
  let int = b.types.int();
  let (_, shape) = opaque_protocol(&mut b, "Shape", &[]);

  let x = b.param("x", int, ParamConvention::Guaranteed);
  let wrap = b.func("wrap", vec![x], shape);
  let value = b.decl_ref(x);
  let erased = b.erase(value, shape);
  let ret = b.ret(Some(erased));
  b.set_body(wrap, vec![ret]);

  let lowered = lower(b);
  lowered.assert_clean();

  let wrap = lowered.function("wrap");
  assert_eq!(wrap.signature.params[0].convention, ArgConvention::IndirectOut);
  assert_eq!(opcodes(wrap), vec!["init_existential_addr", "store", "return"]);
}

#[test]
fn thrown_error_is_boxed() {
  let mut b = AstBuilder::new("m");
  let string = b.types.string();
  let unit = b.types.unit();
  let error = b.types.error_existential();

  let message = b.param("message", string, ParamConvention::Guaranteed);
  let fail = b.func("fail", vec![message], unit);
  b.set_throws(fail);
  let value = b.decl_ref(message);
  let boxed = b.erase(value, error);
  let throw = b.throw(boxed);
  b.set_body(fail, vec![throw]);

  let lowered = lower(b);
  lowered.assert_clean();
  assert_eq!(
    opcodes(lowered.function("fail")),
    vec!["alloc_existential_box", "copy_value", "store", "throw"]
  );
}

#[test]
fn error_box_is_deallocated_when_its_payload_throws() {
  let mut b = AstBuilder::new("m");
  let string = b.types.string();
  let unit = b.types.unit();
  let error = b.types.error_existential();

  let describe = b.func("describe", vec![], string);
  b.set_throws(describe);

  let fail = b.func("fail", vec![], unit);
  b.set_throws(fail);
  let call = b.call(describe, vec![]);
  let attempt = b.try_expr(call);
  let boxed = b.erase(attempt, error);
  let throw = b.throw(boxed);
  b.set_body(fail, vec![throw]);

  let lowered = lower(b);
  lowered.assert_clean();

  let fail = lowered.function("fail");
  assert_eq!(count(fail, "alloc_existential_box"), 1);
  assert_eq!(count(fail, "dealloc_box"), 1);
  assert_eq!(count(fail, "destroy_value"), 0);
  assert_eq!(count(fail, "store"), 1);
}
