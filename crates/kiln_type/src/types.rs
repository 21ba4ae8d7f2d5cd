use ahash::AHashMap;

use crate::{
  Id, Store,
  nominal::{EnumCase, NominalDecl, NominalId, ProtocolDecl, ProtocolId},
};

pub type TypeId = Id<Type>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
  Unit,
  Bool,
  Int,
  Float,
  Str,
  RawPointer,
  Never,

  Tuple(Vec<TypeId>),
  Nominal(NominalId),
  /// Protocol composition; the empty list is `Any`.
  Existential(Vec<ProtocolId>),
  GenericParam {
    depth: u32,
    index: u32,
  },
  Function(FunctionType),
  /// Heap cell holding a mutable captured variable.
  Box(TypeId),
  /// The boxed existential carried on error edges.
  ErrorExistential,

  Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamConvention {
  Owned,
  Guaranteed,
  Inout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FnRepr {
  /// Function pointer plus context.
  #[default]
  Thick,
  /// Context-free function pointer.
  Thin,
  /// Block object with its own reference-counted storage.
  Block,
  CFunctionPointer,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FnParam {
  pub ty: TypeId,
  pub convention: ParamConvention,
  /// Passed as if the parameter were generic, forcing indirection.
  pub opaque: bool,
}

impl FnParam {
  pub fn new(
    ty: TypeId,
    convention: ParamConvention,
  ) -> Self {
    Self {
      ty,
      convention,
      opaque: false,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionType {
  pub params: Vec<FnParam>,
  pub result: TypeId,
  pub opaque_result: bool,
  pub throws: bool,
  pub repr: FnRepr,
  pub escaping: bool,
}

impl FunctionType {
  pub fn new(
    params: Vec<FnParam>,
    result: TypeId,
  ) -> Self {
    Self {
      params,
      result,
      opaque_result: false,
      throws: false,
      repr: FnRepr::Thick,
      escaping: true,
    }
  }

  pub fn with_throws(
    mut self,
    throws: bool,
  ) -> Self {
    self.throws = throws;
    self
  }

  pub fn with_repr(
    mut self,
    repr: FnRepr,
  ) -> Self {
    self.repr = repr;
    self
  }

  pub fn with_escaping(
    mut self,
    escaping: bool,
  ) -> Self {
    self.escaping = escaping;
    self
  }
}

/// Interned semantic types plus the nominal and protocol declarations they refer to.
#[derive(Debug, Clone)]
pub struct TypeStore {
  types: Store<Type>,
  interned: AHashMap<Type, TypeId>,
  nominals: Store<NominalDecl>,
  protocols: Store<ProtocolDecl>,
}

impl Default for TypeStore {
  fn default() -> Self {
    Self::new()
  }
}

impl TypeStore {
  pub fn new() -> Self {
    let mut store = Self {
      types: Store::new(),
      interned: AHashMap::new(),
      nominals: Store::new(),
      protocols: Store::new(),
    };
    store.init_primitives();
    store
  }

  fn init_primitives(&mut self) {
    let primitives = [
      Type::Unit,
      Type::Bool,
      Type::Int,
      Type::Float,
      Type::Str,
      Type::RawPointer,
      Type::Never,
      Type::ErrorExistential,
      Type::Error,
    ];

    for ty in primitives {
      self.intern(ty);
    }
  }

  fn intern(
    &mut self,
    ty: Type,
  ) -> TypeId {
    if let Some(&id) = self.interned.get(&ty) {
      return id;
    }
    let id = self.types.alloc(ty.clone());
    self.interned.insert(ty, id);
    id
  }

  fn primitive(
    &self,
    ty: &Type,
  ) -> TypeId {
    self.interned[ty]
  }

  pub fn get(
    &self,
    id: &TypeId,
  ) -> &Type {
    self.types.get(id)
  }

  pub fn unit(&self) -> TypeId {
    self.primitive(&Type::Unit)
  }

  pub fn bool(&self) -> TypeId {
    self.primitive(&Type::Bool)
  }

  pub fn int(&self) -> TypeId {
    self.primitive(&Type::Int)
  }

  pub fn float(&self) -> TypeId {
    self.primitive(&Type::Float)
  }

  pub fn string(&self) -> TypeId {
    self.primitive(&Type::Str)
  }

  pub fn raw_pointer(&self) -> TypeId {
    self.primitive(&Type::RawPointer)
  }

  pub fn never(&self) -> TypeId {
    self.primitive(&Type::Never)
  }

  pub fn error_existential(&self) -> TypeId {
    self.primitive(&Type::ErrorExistential)
  }

  pub fn error(&self) -> TypeId {
    self.primitive(&Type::Error)
  }

  pub fn tuple(
    &mut self,
    elements: Vec<TypeId>,
  ) -> TypeId {
    if elements.is_empty() {
      return self.unit();
    }
    self.intern(Type::Tuple(elements))
  }

  pub fn existential(
    &mut self,
    mut protocols: Vec<ProtocolId>,
  ) -> TypeId {
    protocols.sort();
    protocols.dedup();
    self.intern(Type::Existential(protocols))
  }

  pub fn generic_param(
    &mut self,
    depth: u32,
    index: u32,
  ) -> TypeId {
    self.intern(Type::GenericParam { depth, index })
  }

  pub fn function(
    &mut self,
    ty: FunctionType,
  ) -> TypeId {
    self.intern(Type::Function(ty))
  }

  pub fn boxed(
    &mut self,
    inner: TypeId,
  ) -> TypeId {
    self.intern(Type::Box(inner))
  }

  pub fn nominal(
    &mut self,
    id: NominalId,
  ) -> TypeId {
    self.intern(Type::Nominal(id))
  }

  /// Registers a nominal declaration. Fields may refer back to the returned
  /// type, so recursive declarations are declared first and filled in with
  /// `nominal_decl_mut`.
  pub fn declare_nominal(
    &mut self,
    decl: NominalDecl,
  ) -> (NominalId, TypeId) {
    let id = self.nominals.alloc(decl);
    let ty = self.nominal(id);
    (id, ty)
  }

  pub fn nominal_decl(
    &self,
    id: &NominalId,
  ) -> &NominalDecl {
    self.nominals.get(id)
  }

  pub fn nominal_decl_mut(
    &mut self,
    id: &NominalId,
  ) -> &mut NominalDecl {
    self.nominals.get_mut(id)
  }

  pub fn nominal_ids(&self) -> impl Iterator<Item = NominalId> + '_ {
    self.nominals.ids()
  }

  pub fn declare_protocol(
    &mut self,
    decl: ProtocolDecl,
  ) -> ProtocolId {
    self.protocols.alloc(decl)
  }

  pub fn protocol(
    &self,
    id: &ProtocolId,
  ) -> &ProtocolDecl {
    self.protocols.get(id)
  }

  pub fn as_function(
    &self,
    ty: &TypeId,
  ) -> Option<&FunctionType> {
    match self.get(ty) {
      Type::Function(f) => Some(f),
      _ => None,
    }
  }

  pub fn as_nominal(
    &self,
    ty: &TypeId,
  ) -> Option<(NominalId, &NominalDecl)> {
    match self.get(ty) {
      Type::Nominal(id) => Some((*id, self.nominal_decl(id))),
      _ => None,
    }
  }

  pub fn enum_cases(
    &self,
    ty: &TypeId,
  ) -> Option<&[EnumCase]> {
    self.as_nominal(ty).and_then(|(_, decl)| decl.enum_cases())
  }

  pub fn is_class(
    &self,
    ty: &TypeId,
  ) -> bool {
    self.as_nominal(ty).is_some_and(|(_, decl)| decl.is_class())
  }

  pub fn is_existential(
    &self,
    ty: &TypeId,
  ) -> bool {
    matches!(self.get(ty), Type::Existential(_))
  }

  /// Type of stored field `index` of a struct, class or tuple.
  pub fn field_type(
    &self,
    ty: &TypeId,
    index: u32,
  ) -> Option<TypeId> {
    match self.get(ty) {
      Type::Tuple(elements) => elements.get(index as usize).copied(),
      Type::Nominal(id) => self.nominal_decl(id).stored_fields().get(index as usize).map(|f| f.ty),
      _ => None,
    }
  }

  pub fn display(
    &self,
    ty: &TypeId,
  ) -> String {
    match self.get(ty) {
      Type::Unit => "()".to_string(),
      Type::Bool => "Bool".to_string(),
      Type::Int => "Int".to_string(),
      Type::Float => "Float".to_string(),
      Type::Str => "String".to_string(),
      Type::RawPointer => "RawPointer".to_string(),
      Type::Never => "Never".to_string(),
      Type::Tuple(elements) => {
        let parts: Vec<String> = elements.iter().map(|e| self.display(e)).collect();
        format!("({})", parts.join(", "))
      },
      Type::Nominal(id) => self.nominal_decl(id).name.clone(),
      Type::Existential(protocols) if protocols.is_empty() => "Any".to_string(),
      Type::Existential(protocols) => {
        let names: Vec<&str> = protocols.iter().map(|p| self.protocol(p).name.as_str()).collect();
        format!("any {}", names.join(" & "))
      },
      Type::GenericParam { depth, index } => format!("τ_{}_{}", depth, index),
      Type::Function(f) => self.display_function(f),
      Type::Box(inner) => format!("{{ var {} }}", self.display(inner)),
      Type::ErrorExistential => "any Error".to_string(),
      Type::Error => "<<error>>".to_string(),
    }
  }

  fn display_function(
    &self,
    f: &FunctionType,
  ) -> String {
    let mut out = String::new();
    match f.repr {
      FnRepr::Thick => {},
      FnRepr::Thin => out.push_str("@convention(thin) "),
      FnRepr::Block => out.push_str("@convention(block) "),
      FnRepr::CFunctionPointer => out.push_str("@convention(c) "),
    }
    if !f.escaping {
      out.push_str("@noescape ");
    }

    let params: Vec<String> = f
      .params
      .iter()
      .map(|p| {
        let prefix = match p.convention {
          ParamConvention::Owned => "__owned ",
          ParamConvention::Guaranteed => "",
          ParamConvention::Inout => "inout ",
        };
        let opaque = if p.opaque { "@opaque " } else { "" };
        format!("{}{}{}", opaque, prefix, self.display(&p.ty))
      })
      .collect();

    out.push_str(&format!("({})", params.join(", ")));
    if f.throws {
      out.push_str(" throws");
    }
    out.push_str(" -> ");
    if f.opaque_result {
      out.push_str("@opaque ");
    }
    out.push_str(&self.display(&f.result));
    out
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::nominal::{Field, NominalKind};

  #[test]
  fn interning_returns_same_id() {
    let mut types = TypeStore::new();
    let int = types.int();
    let a = types.function(FunctionType::new(vec![FnParam::new(int, ParamConvention::Guaranteed)], int));
    let b = types.function(FunctionType::new(vec![FnParam::new(int, ParamConvention::Guaranteed)], int));
    let c = types.function(FunctionType::new(vec![FnParam::new(int, ParamConvention::Owned)], int));

    assert_eq!(a, b);
    assert_ne!(a, c);
  }

  #[test]
  fn existential_composition_is_order_independent() {
    let mut types = TypeStore::new();
    let p = types.declare_protocol(ProtocolDecl::new("P", vec![]));
    let q = types.declare_protocol(ProtocolDecl::new("Q", vec![]));

    assert_eq!(types.existential(vec![p, q]), types.existential(vec![q, p]));
    let qp = types.existential(vec![q, p]);
    assert_eq!(types.display(&qp), "any P & Q");
  }

  #[test]
  fn display_function_type() {
    let mut types = TypeStore::new();
    let int = types.int();
    let (_, point) = types.declare_nominal(NominalDecl::new(
      "Point",
      NominalKind::Struct {
        fields: vec![Field::new("x", int)],
      },
    ));
    let f = FunctionType::new(
      vec![
        FnParam::new(point, ParamConvention::Inout),
        FnParam::new(int, ParamConvention::Owned),
      ],
      int,
    )
    .with_throws(true)
    .with_repr(FnRepr::CFunctionPointer);
    let f = types.function(f);

    assert_eq!(types.display(&f), "@convention(c) (inout Point, __owned Int) throws -> Int");
  }
}
