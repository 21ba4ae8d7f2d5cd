mod common;

use common::{lower, opaque_protocol, opcodes};
use kiln_ast::{AstBuilder, DeclId};
use kiln_ir::ArgConvention;
use kiln_type::{
  nominal::{NominalDecl, NominalId, NominalKind},
  types::{FunctionType, ParamConvention, TypeId},
};

struct Hierarchy {
  builder: AstBuilder,
  base: NominalId,
  derived: NominalId,
}

/// `Base.area`, overridden by `Derived.area`, plus `Derived.extra`.
fn hierarchy() -> Hierarchy {
  let mut b = AstBuilder::new("m");
  let int = b.types.int();
  let (base, base_ty) = b.types.declare_nominal(NominalDecl::new(
    "Base",
    NominalKind::Class {
      superclass: None,
      fields: vec![],
    },
  ));
  let (derived, derived_ty) = b.types.declare_nominal(NominalDecl::new(
    "Derived",
    NominalKind::Class {
      superclass: Some(base),
      fields: vec![],
    },
  ));

  let base_area = method_returning(&mut b, "area", base, base_ty, None, 1);
  method_returning(&mut b, "area", derived, derived_ty, Some(base_area), 2);
  method_returning(&mut b, "extra", derived, derived_ty, None, 3);

  let receiver = b.param("shape", base_ty, ParamConvention::Guaranteed);
  let poll = b.func("poll", vec![receiver], int);
  let object = b.decl_ref(receiver);
  let call = b.call_method(object, base_area, vec![]);
  let ret = b.ret(Some(call));
  b.set_body(poll, vec![ret]);

  Hierarchy {
    builder: b,
    base,
    derived,
  }
}

fn method_returning(
  b: &mut AstBuilder,
  name: &str,
  class: NominalId,
  self_ty: TypeId,
  overrides: Option<DeclId>,
  value: i64,
) -> DeclId {
  let int = b.types.int();
  let this = b.param("self", self_ty, ParamConvention::Guaranteed);
  let method = b.method(name, class, overrides, vec![this], int);
  let result = b.int(value);
  let ret = b.ret(Some(result));
  b.set_body(method, vec![ret]);
  method
}

#[test]
fn subclass_inherits_and_overrides_slots() {
  let Hierarchy { builder, base, derived } = hierarchy();
  let lowered = lower(builder);
  lowered.assert_clean();
  let module = &lowered.output.module;

  let base_table = module.vtable(base).unwrap();
  let base_methods: Vec<(u32, &str)> = base_table.entries.iter().map(|e| (e.slot, e.method.as_str())).collect();
  assert_eq!(base_methods, vec![(0, "Base.area")]);

  let derived_table = module.vtable(derived).unwrap();
  let derived_methods: Vec<(u32, &str)> = derived_table
    .entries
    .iter()
    .map(|e| (e.slot, e.method.as_str()))
    .collect();
  assert_eq!(derived_methods, vec![(0, "Derived.area"), (1, "Derived.extra")]);
}

#[test]
fn method_call_dispatches_through_class_method() {
  let Hierarchy { builder, .. } = hierarchy();
  let lowered = lower(builder);
  lowered.assert_clean();
  assert_eq!(opcodes(lowered.function("poll")), vec!["class_method", "apply", "return"]);
}

#[test]
fn direct_witness_is_wrapped_to_take_self_indirectly() {
  let mut b = AstBuilder::new("m");
  let int = b.types.int();
  let (protocol, existential) = opaque_protocol(&mut b, "Describable", &["describe"]);

  let this = b.param("self", int, ParamConvention::Guaranteed);
  let describe = b.func("describe", vec![this], int);
  let value = b.decl_ref(this);
  let ret = b.ret(Some(value));
  b.set_body(describe, vec![ret]);
  b.conformance(int, protocol, vec![describe]);

  let requirement_ty = b.types.function(FunctionType::new(vec![], int));
  let p = b.param("p", existential, ParamConvention::Guaranteed);
  let show = b.func("show", vec![p], int);
  let receiver = b.decl_ref(p);
  let call = b.call_witness(receiver, protocol, 0, requirement_ty, vec![]);
  let ret = b.ret(Some(call));
  b.set_body(show, vec![ret]);

  let lowered = lower(b);
  lowered.assert_clean();
  let module = &lowered.output.module;

  let table = module.witness_table(int, protocol).unwrap();
  let thunk = module.function_named("describe.thunk.0").unwrap();
  assert_eq!(table.entries.len(), 1);
  assert_eq!(module.function(&table.entries[0]).name, thunk.name);
  assert_eq!(thunk.signature.params[0].convention, ArgConvention::IndirectInGuaranteed);
  assert_eq!(opcodes(thunk), vec!["function_ref", "load", "apply", "return"]);

  assert_eq!(
    opcodes(lowered.function("show")),
    vec!["open_existential_addr", "witness_method", "apply", "return"]
  );
}

#[test]
fn conformance_missing_a_witness_is_rejected() {
  let mut b = AstBuilder::new("m");
  let int = b.types.int();
  let (protocol, _) = opaque_protocol(&mut b, "Pair", &["first", "second"]);

  let this = b.param("self", int, ParamConvention::Guaranteed);
  let first = b.func("first", vec![this], int);
  let value = b.decl_ref(this);
  let ret = b.ret(Some(value));
  b.set_body(first, vec![ret]);
  b.conformance(int, protocol, vec![first]);

  let lowered = lower(b);
  assert_eq!(lowered.output.abandoned, vec!["Int: Pair".to_string()]);
  assert!(lowered.output.module.witness_table(int, protocol).is_none());
}
