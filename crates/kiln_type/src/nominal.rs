use crate::{Id, types::TypeId};

pub type NominalId = Id<NominalDecl>;
pub type ProtocolId = Id<ProtocolDecl>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
  pub name: String,
  pub ty: TypeId,
}

impl Field {
  pub fn new(
    name: impl Into<String>,
    ty: TypeId,
  ) -> Self {
    Self { name: name.into(), ty }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumCase {
  pub name: String,
  pub payload: Option<TypeId>,
  /// Payload stored out of line behind a box, which keeps recursive enums loadable.
  pub indirect: bool,
}

impl EnumCase {
  pub fn new(
    name: impl Into<String>,
    payload: Option<TypeId>,
  ) -> Self {
    Self {
      name: name.into(),
      payload,
      indirect: false,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NominalKind {
  Struct { fields: Vec<Field> },
  Enum { cases: Vec<EnumCase> },
  Class { superclass: Option<NominalId>, fields: Vec<Field> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NominalDecl {
  pub name: String,
  pub kind: NominalKind,
  /// Layout may change without recompiling clients.
  pub resilient: bool,
  /// User-defined copy/destroy that cannot be done bitwise.
  pub custom_copy: bool,
}

impl NominalDecl {
  pub fn new(
    name: impl Into<String>,
    kind: NominalKind,
  ) -> Self {
    Self {
      name: name.into(),
      kind,
      resilient: false,
      custom_copy: false,
    }
  }

  pub fn is_class(&self) -> bool {
    matches!(self.kind, NominalKind::Class { .. })
  }

  pub fn stored_fields(&self) -> &[Field] {
    match &self.kind {
      NominalKind::Struct { fields } | NominalKind::Class { fields, .. } => fields,
      NominalKind::Enum { .. } => &[],
    }
  }

  pub fn enum_cases(&self) -> Option<&[EnumCase]> {
    match &self.kind {
      NominalKind::Enum { cases } => Some(cases),
      _ => None,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolDecl {
  pub name: String,
  /// Only classes may conform, so existentials are a single reference.
  pub class_bound: bool,
  pub requirements: Vec<String>,
}

impl ProtocolDecl {
  pub fn new(
    name: impl Into<String>,
    requirements: Vec<String>,
  ) -> Self {
    Self {
      name: name.into(),
      class_bound: false,
      requirements,
    }
  }
}
