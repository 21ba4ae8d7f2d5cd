mod common;

use common::{lower, opcodes};
use kiln_ast::{AccessorKind, AstBuilder, DeclId};
use kiln_ir::FunctionKind;
use kiln_type::types::ParamConvention;

/// `read` and `modify` coroutines of `String[Int] -> Int`.
fn accessors(b: &mut AstBuilder) -> (DeclId, DeclId) {
  let string = b.types.string();
  let int = b.types.int();

  let base = b.param("base", string, ParamConvention::Guaranteed);
  let index = b.param("i", int, ParamConvention::Guaranteed);
  let read = b.accessor("get", AccessorKind::Read, vec![base, index], int);

  let base = b.param("base", string, ParamConvention::Inout);
  let index = b.param("i", int, ParamConvention::Guaranteed);
  let modify = b.accessor("set", AccessorKind::Modify, vec![base, index], int);
  (read, modify)
}

#[test]
fn subscript_read_ends_the_coroutine_after_loading() {
  let mut b = AstBuilder::new("m");
  let string = b.types.string();
  let int = b.types.int();
  let (read, modify) = accessors(&mut b);

  let s = b.param("s", string, ParamConvention::Guaranteed);
  let peek = b.func("peek", vec![s], int);
  let base = b.decl_ref(s);
  let index = b.int(0);
  let element = b.subscript(base, index, read, modify);
  let ret = b.ret(Some(element));
  b.set_body(peek, vec![ret]);

  let lowered = lower(b);
  lowered.assert_clean();

  let get = lowered.function("get");
  assert_eq!(get.kind, FunctionKind::Accessor);
  assert!(get.signature.coroutine);
  assert!(get.is_declaration());

  // The index is evaluated before the base
  assert_eq!(
    opcodes(lowered.function("peek")),
    vec!["const", "function_ref", "begin_apply", "load", "end_apply", "return"]
  );
}

#[test]
fn subscript_write_holds_the_base_under_modify_access() {
  let mut b = AstBuilder::new("m");
  let string = b.types.string();
  let unit = b.types.unit();
  let (read, modify) = accessors(&mut b);

  let s = b.param("s", string, ParamConvention::Inout);
  let poke = b.func("poke", vec![s], unit);
  let base = b.decl_ref(s);
  let index = b.int(0);
  let element = b.subscript(base, index, read, modify);
  let five = b.int(5);
  let assign = b.assign(element, five);
  let stmt = b.expr_stmt(assign);
  b.set_body(poke, vec![stmt]);

  let lowered = lower(b);
  lowered.assert_clean();
  assert_eq!(
    opcodes(lowered.function("poke")),
    vec![
      "const",
      "const",
      "begin_access",
      "function_ref",
      "begin_apply",
      "store",
      "end_apply",
      "end_access",
      "return"
    ]
  );
}
