mod common;

use common::{count, lower, opaque_protocol};
use kiln_ast::{AstBuilder, DeclId, StmtId};
use kiln_config::KilnConfig;
use kiln_lower::{DeclaredLayout, TypeLowering, lower_and_verify};
use kiln_type::types::{FnParam, FunctionType, ParamConvention};
use proptest::prelude::*;

#[derive(Debug, Clone, Copy)]
enum Element {
  Int,
  Bool,
  Text,
  Opaque,
}

fn element() -> impl Strategy<Value = Element> {
  prop_oneof![
    Just(Element::Int),
    Just(Element::Bool),
    Just(Element::Text),
    Just(Element::Opaque),
  ]
}

/// One `let s = "x"; if flag { ... }` level: whether it has an else
/// branch and whether its then branch returns early.
fn levels() -> impl Strategy<Value = Vec<(bool, bool)>> {
  prop::collection::vec((any::<bool>(), any::<bool>()), 0..5)
}

fn nested(
  b: &mut AstBuilder,
  flag: DeclId,
  levels: &[(bool, bool)],
) -> Vec<StmtId> {
  let Some((&(has_else, early), rest)) = levels.split_first() else {
    return Vec::new();
  };

  let string = b.types.string();
  let s = b.constant("s", string);
  let text = b.string("x");
  let bind = b.let_stmt(s, text);

  let mut then_branch = nested(b, flag, rest);
  if early {
    then_branch.push(b.ret(None));
  }
  let else_branch = if has_else {
    let value = b.decl_ref(s);
    Some(vec![b.expr_stmt(value)])
  } else {
    None
  };
  let cond = b.decl_ref(flag);
  let branch = b.if_stmt(cond, then_branch, else_branch);
  vec![bind, branch]
}

fn nested_module(levels: &[(bool, bool)]) -> AstBuilder {
  let mut b = AstBuilder::new("m");
  let bool_ty = b.types.bool();
  let unit = b.types.unit();
  let flag = b.param("flag", bool_ty, ParamConvention::Guaranteed);
  let func = b.func("nest", vec![flag], unit);
  let body = nested(&mut b, flag, levels);
  b.set_body(func, body);
  b
}

proptest! {
  #![proptest_config(ProptestConfig::with_cases(50))]

  /// Aggregates are address-only when any element is, and trivial only
  /// when every element is.
  #[test]
  fn tuple_classification_follows_elements(elements in prop::collection::vec(element(), 1..5)) {
    let mut b = AstBuilder::new("m");
    let (_, opaque) = opaque_protocol(&mut b, "P", &[]);
    let tys: Vec<_> = elements
      .iter()
      .map(|e| match e {
        Element::Int => b.types.int(),
        Element::Bool => b.types.bool(),
        Element::Text => b.types.string(),
        Element::Opaque => opaque,
      })
      .collect();
    let tuple = b.types.tuple(tys);

    let mut lowering = TypeLowering::new();
    let info = lowering.classify(&b.types, &DeclaredLayout, tuple);
    let again = lowering.classify(&b.types, &DeclaredLayout, tuple);
    let fresh = TypeLowering::new().classify(&b.types, &DeclaredLayout, tuple);

    let address_only = elements.iter().any(|e| matches!(e, Element::Opaque));
    let trivial = elements.iter().all(|e| matches!(e, Element::Int | Element::Bool));
    prop_assert_eq!(info.is_address_only(), address_only);
    prop_assert_eq!(info.trivial, trivial);
    prop_assert_eq!(info, again);
    prop_assert_eq!(info, fresh);
  }

  /// Cleanups run on every path out of arbitrarily nested branches.
  #[test]
  fn nested_branches_always_verify(levels in levels()) {
    let (ast, mut types) = nested_module(&levels).finish();
    let (output, verified) = lower_and_verify(&ast, &mut types, &KilnConfig::silent());

    prop_assert!(output.is_ok(), "abandoned {:?}", output.abandoned);
    prop_assert!(verified.is_ok(), "{:?}", verified.err());
  }

  #[test]
  fn lowering_is_deterministic(levels in levels()) {
    let first = lower(nested_module(&levels));
    let second = lower(nested_module(&levels));
    prop_assert_eq!(first.print("nest"), second.print("nest"));
  }

  /// However often a conversion is repeated, one thunk serves all of them.
  #[test]
  fn repeated_conversions_share_one_thunk(repeats in 1usize..6) {
    let mut b = AstBuilder::new("m");
    let string = b.types.string();
    let int = b.types.int();
    let unit = b.types.unit();
    let s = b.param("s", string, ParamConvention::Guaranteed);
    let measure = b.func("measure", vec![s], int);
    let target = b
      .types
      .function(FunctionType::new(vec![FnParam::new(string, ParamConvention::Owned)], int));

    let caller = b.func("caller", vec![], unit);
    let mut body = Vec::new();
    for _ in 0..repeats {
      let value = b.decl_ref(measure);
      let converted = b.convert_function(value, target);
      body.push(b.expr_stmt(converted));
    }
    b.set_body(caller, body);

    let lowered = lower(b);
    prop_assert!(lowered.output.is_ok());
    prop_assert_eq!(lowered.output.module.thunks.len(), 1);
    prop_assert_eq!(count(lowered.function("caller"), "partial_apply"), repeats);
  }
}
