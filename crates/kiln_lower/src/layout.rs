use kiln_type::nominal::NominalDecl;

/// Answers whether a nominal type's layout is known to this module.
///
/// Types without a fixed layout are address-only no matter what they
/// contain, since their size is only known at run time.
pub trait LayoutOracle {
  fn has_fixed_layout(
    &self,
    decl: &NominalDecl,
  ) -> bool;
}

/// Trusts the `resilient` flag carried by each declaration.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeclaredLayout;

impl LayoutOracle for DeclaredLayout {
  fn has_fixed_layout(
    &self,
    decl: &NominalDecl,
  ) -> bool {
    !decl.resilient
  }
}
