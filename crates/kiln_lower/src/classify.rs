use std::collections::{HashMap, HashSet};

use kiln_ir::{ArgConvention, LoweredParam, LoweredSignature, Ownership};
use kiln_type::{
  nominal::NominalKind,
  types::{FnRepr, FunctionType, ParamConvention, Type, TypeId, TypeStore},
};

use crate::layout::LayoutOracle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeClass {
  /// Held directly as an SSA value.
  Loadable,
  /// Lives in memory and is only manipulated through its address.
  AddressOnly,
}

/// How values of a type are represented and whether they need destruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeInfo {
  pub class: TypeClass,
  pub trivial: bool,
}

impl TypeInfo {
  pub const TRIVIAL: TypeInfo = TypeInfo {
    class: TypeClass::Loadable,
    trivial: true,
  };
  pub const REFERENCE: TypeInfo = TypeInfo {
    class: TypeClass::Loadable,
    trivial: false,
  };
  pub const OPAQUE: TypeInfo = TypeInfo {
    class: TypeClass::AddressOnly,
    trivial: false,
  };

  pub fn is_address_only(&self) -> bool {
    self.class == TypeClass::AddressOnly
  }

  pub fn is_loadable(&self) -> bool {
    self.class == TypeClass::Loadable
  }

  /// Ownership of a freshly produced value.
  pub fn fresh_ownership(&self) -> Ownership {
    if self.trivial {
      Ownership::Trivial
    } else {
      Ownership::Owned
    }
  }

  /// Ownership of a value observed without taking responsibility for it.
  pub fn borrowed_ownership(&self) -> Ownership {
    if self.trivial {
      Ownership::Trivial
    } else {
      Ownership::Guaranteed
    }
  }

  fn combine(
    self,
    other: TypeInfo,
  ) -> TypeInfo {
    let class = if self.is_address_only() || other.is_address_only() {
      TypeClass::AddressOnly
    } else {
      TypeClass::Loadable
    };
    TypeInfo {
      class,
      trivial: self.trivial && other.trivial,
    }
  }
}

/// Memoized value representation classifier.
#[derive(Debug, Default)]
pub struct TypeLowering {
  cache: HashMap<TypeId, TypeInfo>,
  in_progress: HashSet<TypeId>,
}

impl TypeLowering {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn is_cached(
    &self,
    ty: &TypeId,
  ) -> bool {
    self.cache.contains_key(ty)
  }

  pub fn classify(
    &mut self,
    types: &TypeStore,
    oracle: &dyn LayoutOracle,
    ty: TypeId,
  ) -> TypeInfo {
    if let Some(info) = self.cache.get(&ty) {
      return *info;
    }

    // A value type containing itself without indirection has no fixed size.
    if !self.in_progress.insert(ty) {
      return TypeInfo::OPAQUE;
    }

    let info = self.compute(types, oracle, ty);
    self.in_progress.remove(&ty);
    self.cache.insert(ty, info);
    info
  }

  fn compute(
    &mut self,
    types: &TypeStore,
    oracle: &dyn LayoutOracle,
    ty: TypeId,
  ) -> TypeInfo {
    match types.get(&ty) {
      Type::Unit | Type::Bool | Type::Int | Type::Float | Type::RawPointer | Type::Never | Type::Error => {
        TypeInfo::TRIVIAL
      },
      Type::Str | Type::ErrorExistential | Type::Box(_) => TypeInfo::REFERENCE,
      Type::GenericParam { .. } => TypeInfo::OPAQUE,
      Type::Existential(protocols) => {
        let class_bound = !protocols.is_empty() && protocols.iter().all(|p| types.protocol(p).class_bound);
        if class_bound {
          TypeInfo::REFERENCE
        } else {
          TypeInfo::OPAQUE
        }
      },
      Type::Function(f) => match f.repr {
        FnRepr::Thin | FnRepr::CFunctionPointer => TypeInfo::TRIVIAL,
        FnRepr::Thick | FnRepr::Block => TypeInfo::REFERENCE,
      },
      Type::Tuple(elements) => {
        let mut info = TypeInfo::TRIVIAL;
        for element in elements {
          info = info.combine(self.classify(types, oracle, *element));
        }
        info
      },
      Type::Nominal(id) => {
        let decl = types.nominal_decl(id);
        if decl.is_class() {
          return TypeInfo::REFERENCE;
        }
        if decl.custom_copy || !oracle.has_fixed_layout(decl) {
          return TypeInfo::OPAQUE;
        }

        let mut info = TypeInfo::TRIVIAL;
        match &decl.kind {
          NominalKind::Struct { fields } => {
            for field in fields {
              info = info.combine(self.classify(types, oracle, field.ty));
            }
          },
          NominalKind::Enum { cases } => {
            for case in cases {
              let Some(payload) = case.payload else {
                continue;
              };
              let payload_info = if case.indirect {
                TypeInfo::REFERENCE
              } else {
                self.classify(types, oracle, payload)
              };
              info = info.combine(payload_info);
            }
          },
          NominalKind::Class { .. } => {},
        }
        info
      },
    }
  }

  /// Decides direct or indirect passing for every parameter and the result.
  /// Opaque parameters are passed indirectly even when their type is loadable.
  pub fn lower_signature(
    &mut self,
    types: &TypeStore,
    oracle: &dyn LayoutOracle,
    ty: &FunctionType,
  ) -> LoweredSignature {
    let mut params = Vec::with_capacity(ty.params.len() + 1);
    let mut result = ty.result;

    if ty.opaque_result || self.classify(types, oracle, ty.result).is_address_only() {
      params.push(LoweredParam {
        ty: ty.result,
        convention: ArgConvention::IndirectOut,
      });
      result = types.unit();
    }

    // Blocks receive borrowed references without any ownership guarantee
    let foreign = ty.repr == FnRepr::Block;
    for param in &ty.params {
      let info = self.classify(types, oracle, param.ty);
      let indirect = param.opaque || info.is_address_only();
      let convention = match (param.convention, indirect) {
        (ParamConvention::Inout, _) => ArgConvention::IndirectInout,
        (ParamConvention::Owned, true) => ArgConvention::IndirectIn,
        (ParamConvention::Guaranteed, true) => ArgConvention::IndirectInGuaranteed,
        (ParamConvention::Owned, false) => ArgConvention::DirectOwned,
        (ParamConvention::Guaranteed, false) if foreign && !info.trivial => ArgConvention::DirectUnowned,
        (ParamConvention::Guaranteed, false) => ArgConvention::DirectGuaranteed,
      };
      params.push(LoweredParam {
        ty: param.ty,
        convention,
      });
    }

    LoweredSignature {
      params,
      result,
      error: ty.throws.then(|| types.error_existential()),
      repr: ty.repr,
      coroutine: false,
    }
  }
}

#[cfg(test)]
mod tests {
  use kiln_type::{
    nominal::{EnumCase, Field, NominalDecl, ProtocolDecl},
    types::FnParam,
  };

  use super::*;
  use crate::layout::DeclaredLayout;

  fn classify(
    types: &TypeStore,
    ty: TypeId,
  ) -> TypeInfo {
    TypeLowering::new().classify(types, &DeclaredLayout, ty)
  }

  #[test]
  fn scalars_are_trivial() {
    let types = TypeStore::new();

    assert_eq!(classify(&types, types.int()), TypeInfo::TRIVIAL);
    assert_eq!(classify(&types, types.bool()), TypeInfo::TRIVIAL);
    assert_eq!(classify(&types, types.string()), TypeInfo::REFERENCE);
  }

  #[test]
  fn struct_follows_its_fields() {
    let mut types = TypeStore::new();
    let int = types.int();
    let string = types.string();
    let any = types.existential(vec![]);

    let (_, point) = types.declare_nominal(NominalDecl::new(
      "Point",
      NominalKind::Struct {
        fields: vec![Field::new("x", int), Field::new("y", int)],
      },
    ));
    let (_, named) = types.declare_nominal(NominalDecl::new(
      "Named",
      NominalKind::Struct {
        fields: vec![Field::new("name", string)],
      },
    ));
    let (_, boxed) = types.declare_nominal(NominalDecl::new(
      "Wrapper",
      NominalKind::Struct {
        fields: vec![Field::new("value", any)],
      },
    ));

    assert_eq!(classify(&types, point), TypeInfo::TRIVIAL);
    assert_eq!(classify(&types, named), TypeInfo::REFERENCE);
    assert_eq!(classify(&types, boxed), TypeInfo::OPAQUE);
  }

  #[test]
  fn resilient_and_custom_copy_types_are_address_only() {
    let mut types = TypeStore::new();
    let int = types.int();

    let mut resilient = NominalDecl::new(
      "Resilient",
      NominalKind::Struct {
        fields: vec![Field::new("x", int)],
      },
    );
    resilient.resilient = true;
    let (_, resilient) = types.declare_nominal(resilient);

    let mut handle = NominalDecl::new(
      "Handle",
      NominalKind::Struct {
        fields: vec![Field::new("fd", int)],
      },
    );
    handle.custom_copy = true;
    let (_, handle) = types.declare_nominal(handle);

    assert!(classify(&types, resilient).is_address_only());
    assert!(classify(&types, handle).is_address_only());
  }

  #[test]
  fn existentials_depend_on_class_bound() {
    let mut types = TypeStore::new();
    let shape = types.declare_protocol(ProtocolDecl::new("Shape", vec!["area".to_string()]));
    let mut object = ProtocolDecl::new("Object", vec![]);
    object.class_bound = true;
    let object = types.declare_protocol(object);

    let shape_ty = types.existential(vec![shape]);
    let object_ty = types.existential(vec![object]);
    let generic = types.generic_param(0, 0);

    assert!(classify(&types, shape_ty).is_address_only());
    assert_eq!(classify(&types, object_ty), TypeInfo::REFERENCE);
    assert!(classify(&types, generic).is_address_only());
  }

  #[test]
  fn indirect_recursive_enum_is_loadable() {
    let mut types = TypeStore::new();
    let int = types.int();
    let (id, list) = types.declare_nominal(NominalDecl::new("List", NominalKind::Enum { cases: vec![] }));

    let mut cons = EnumCase::new("cons", Some(list));
    cons.indirect = true;
    types.nominal_decl_mut(&id).kind = NominalKind::Enum {
      cases: vec![EnumCase::new("nil", None), EnumCase::new("head", Some(int)), cons],
    };

    assert_eq!(classify(&types, list), TypeInfo::REFERENCE);
  }

  #[test]
  fn direct_recursion_is_address_only() {
    let mut types = TypeStore::new();
    let (id, node) = types.declare_nominal(NominalDecl::new("Node", NominalKind::Struct { fields: vec![] }));
    types.nominal_decl_mut(&id).kind = NominalKind::Struct {
      fields: vec![Field::new("next", node)],
    };

    let mut lowering = TypeLowering::new();
    let first = lowering.classify(&types, &DeclaredLayout, node);
    let second = lowering.classify(&types, &DeclaredLayout, node);

    assert!(first.is_address_only());
    assert_eq!(first, second);
  }

  #[test]
  fn function_representation_decides_triviality() {
    let mut types = TypeStore::new();
    let int = types.int();
    let thick = types.function(FunctionType::new(vec![], int));
    let c = types.function(FunctionType::new(vec![], int).with_repr(FnRepr::CFunctionPointer));

    assert_eq!(classify(&types, thick), TypeInfo::REFERENCE);
    assert_eq!(classify(&types, c), TypeInfo::TRIVIAL);
  }

  #[test]
  fn signature_puts_indirect_result_first() {
    let mut types = TypeStore::new();
    let int = types.int();
    let shape = types.declare_protocol(ProtocolDecl::new("Shape", vec![]));
    let shape = types.existential(vec![shape]);

    let f = FunctionType::new(
      vec![
        FnParam::new(shape, ParamConvention::Owned),
        FnParam::new(int, ParamConvention::Guaranteed),
        FnParam::new(int, ParamConvention::Inout),
      ],
      shape,
    )
    .with_throws(true);

    let sig = TypeLowering::new().lower_signature(&types, &DeclaredLayout, &f);

    assert_eq!(
      sig.conventions(),
      vec![
        ArgConvention::IndirectOut,
        ArgConvention::IndirectIn,
        ArgConvention::DirectGuaranteed,
        ArgConvention::IndirectInout,
      ]
    );
    assert_eq!(sig.result, types.unit());
    assert_eq!(sig.error, Some(types.error_existential()));
  }

  #[test]
  fn opaque_parameter_is_indirect() {
    let mut types = TypeStore::new();
    let int = types.int();
    let mut param = FnParam::new(int, ParamConvention::Guaranteed);
    param.opaque = true;
    let f = FunctionType::new(vec![param], int);

    let sig = TypeLowering::new().lower_signature(&types, &DeclaredLayout, &f);

    assert_eq!(sig.conventions(), vec![ArgConvention::IndirectInGuaranteed]);
    assert_eq!(sig.result, int);
  }

  #[test]
  fn block_borrows_references_unowned() {
    let types = TypeStore::new();
    let int = types.int();
    let string = types.string();
    let params = vec![
      FnParam::new(string, ParamConvention::Guaranteed),
      FnParam::new(int, ParamConvention::Guaranteed),
      FnParam::new(string, ParamConvention::Owned),
    ];

    let block = FunctionType::new(params.clone(), int).with_repr(FnRepr::Block);
    let sig = TypeLowering::new().lower_signature(&types, &DeclaredLayout, &block);
    assert_eq!(
      sig.conventions(),
      vec![
        ArgConvention::DirectUnowned,
        ArgConvention::DirectGuaranteed,
        ArgConvention::DirectOwned,
      ]
    );

    let thick = FunctionType::new(params, int);
    let sig = TypeLowering::new().lower_signature(&types, &DeclaredLayout, &thick);
    assert_eq!(sig.conventions()[0], ArgConvention::DirectGuaranteed);
  }
}
