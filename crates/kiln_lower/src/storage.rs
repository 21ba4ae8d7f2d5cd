//! Reading and writing variables, stored properties and subscripts.
//!
//! Every read or write of memory that could be reached from elsewhere is
//! bracketed by a formal access. Accesses to local and global storage are
//! also checked statically here: two lexically overlapping accesses to
//! overlapping parts of the same storage, one of them a modification, are
//! rejected before any instruction is emitted for the second.

use kiln_ast::{DeclId, ExprId, ExprKind};
use kiln_config::{BorrowPolicy, DebugTrace};
use kiln_ir::{AccessKind, Enforcement, Instr, LoadQualifier, Ownership, StoreQualifier, ValueId};
use kiln_log::trace_dbg;
use kiln_type::{span::Span, types::TypeId};

use crate::{
  access::{AccessPath, StorageId},
  cleanup::CleanupKind,
  error::{LowerError, LowerResult},
  function::{Binding, FunctionLowering},
  managed::ManagedValue,
};

impl FunctionLowering<'_, '_> {
  pub(crate) fn binding(
    &self,
    decl: DeclId,
    span: Span,
  ) -> LowerResult<Binding> {
    if let Some(binding) = self.locals.get(&decl) {
      return Ok(*binding);
    }
    if let Some(global) = self.m.globals.get(&decl) {
      return Ok(Binding::Global(*global));
    }
    Err(self.precondition(
      format!("'{}' is referenced outside its scope", self.ast().decl(&decl).name),
      span,
    ))
  }

  /// Whether the expression names memory that needs a formal access to touch.
  pub(crate) fn is_lvalue_expr(
    &self,
    expr_id: ExprId,
  ) -> bool {
    match &self.ast().expr(&expr_id).kind {
      ExprKind::DeclRef(decl) => match self.locals.get(decl) {
        Some(binding) => matches!(binding, Binding::Storage { .. }),
        None => self.m.globals.contains_key(decl),
      },
      ExprKind::Member { base, .. } => {
        let base_ty = self.ast().expr(base).ty;
        self.types().is_class(&base_ty) || self.is_lvalue_expr(*base)
      },
      ExprKind::Subscript { .. } => true,
      ExprKind::InOut(place) => self.is_lvalue_expr(*place),
      _ => false,
    }
  }

  pub(crate) fn emit_read_var(
    &mut self,
    decl: DeclId,
    ty: TypeId,
    span: Span,
  ) -> LowerResult<ManagedValue> {
    match self.binding(decl, span)? {
      Binding::Value(value) => {
        let value = ManagedValue::unmanaged(value);
        let trivial = self.b.value(value.value).ownership == Ownership::Trivial;
        if self.borrow_policy() == BorrowPolicy::AlwaysCopy && !trivial {
          return Ok(self.ensure_owned(value, span));
        }
        Ok(value)
      },
      Binding::Address(address) => Ok(self.read_address(address, ty, span)),
      Binding::Storage { .. } | Binding::Global(_) => {
        self.load_from_place(ty, span, |this| this.emit_storage_access(decl, &[], AccessKind::Read, span))
      },
    }
  }

  /// The value held at an address nothing else can modify. Address-only
  /// values stay in place, borrowed.
  pub(crate) fn read_address(
    &mut self,
    address: ValueId,
    ty: TypeId,
    span: Span,
  ) -> ManagedValue {
    let info = self.type_info(ty);
    if info.is_address_only() {
      return ManagedValue::unmanaged(address);
    }

    let (ownership, qualifier) = if info.trivial {
      (Ownership::Trivial, LoadQualifier::Trivial)
    } else {
      (Ownership::Owned, LoadQualifier::Copy)
    };
    let dest = self.object(ty, ownership, span);
    self.b.emit(Instr::Load {
      dest,
      address,
      qualifier,
    });
    self.manage(dest)
  }

  /// Borrow a loadable value in place for the rest of the current scope.
  pub(crate) fn load_guaranteed(
    &mut self,
    address: ValueId,
    ty: TypeId,
    span: Span,
  ) -> ValueId {
    let info = self.type_info(ty);
    if info.trivial {
      let dest = self.object(ty, Ownership::Trivial, span);
      self.b.emit(Instr::Load {
        dest,
        address,
        qualifier: LoadQualifier::Trivial,
      });
      return dest;
    }

    let dest = self.object(ty, Ownership::Guaranteed, span);
    self.b.emit(Instr::LoadBorrow { dest, address });
    self.cleanups.push(CleanupKind::EndBorrow(dest));
    trace_dbg!(self.config(), DebugTrace::Ownership, "load_borrow %{} from %{}", dest.index(), address.index());
    dest
  }

  /// Copies the value out of a place opened by `place`, closing the access
  /// before the copy is handed to the caller.
  pub(crate) fn load_from_place(
    &mut self,
    ty: TypeId,
    span: Span,
    place: impl FnOnce(&mut Self) -> LowerResult<ValueId>,
  ) -> LowerResult<ManagedValue> {
    let info = self.type_info(ty);
    let temp = if info.is_address_only() {
      Some(self.alloc_temporary(ty, span))
    } else {
      None
    };

    let depth = self.cleanups.depth();
    let address = place(self)?;
    let value = match temp {
      Some(temp) => {
        self.b.emit(Instr::CopyAddr {
          source: address,
          dest: temp,
          take: false,
          init: true,
        });
        temp
      },
      None => {
        let (ownership, qualifier) = if info.trivial {
          (Ownership::Trivial, LoadQualifier::Trivial)
        } else {
          (Ownership::Owned, LoadQualifier::Copy)
        };
        let dest = self.object(ty, ownership, span);
        self.b.emit(Instr::Load {
          dest,
          address,
          qualifier,
        });
        dest
      },
    };
    self.pop_cleanups_to(depth);

    Ok(match temp {
      Some(temp) => self.manage_address(temp),
      None => self.manage(value),
    })
  }

  pub(crate) fn emit_load_from_lvalue(
    &mut self,
    expr_id: ExprId,
  ) -> LowerResult<ManagedValue> {
    let expr = self.ast().expr(&expr_id);
    self.load_from_place(expr.ty, expr.span, |this| this.emit_lvalue(expr_id, AccessKind::Read))
  }

  /// Open an access to the memory an lvalue names. The access ends when
  /// the current scope closes.
  pub(crate) fn emit_lvalue(
    &mut self,
    expr_id: ExprId,
    kind: AccessKind,
  ) -> LowerResult<ValueId> {
    let expr = self.ast().expr(&expr_id);
    let span = expr.span;

    match &expr.kind {
      ExprKind::InOut(place) => self.emit_lvalue(*place, kind),
      ExprKind::DeclRef(decl) => self.emit_storage_access(*decl, &[], kind, span),
      ExprKind::Member { base, field } => {
        let base_ty = self.ast().expr(base).ty;
        if self.types().is_class(&base_ty) {
          return self.emit_class_property(*base, *field, kind, span);
        }
        if let Some((root, path)) = self.storage_projection(expr_id) {
          return self.emit_storage_access(root, &path, kind, span);
        }
        let base_address = self.emit_lvalue(*base, kind)?;
        self.element_address(base_address, base_ty, *field, span)
      },
      ExprKind::Subscript {
        base,
        index,
        read,
        modify,
      } => self.emit_subscript_access(*base, *index, *read, *modify, kind, span),
      _ => Err(self.precondition("expression is not addressable", span)),
    }
  }

  /// Root variable and field path of a chain of struct and tuple member
  /// accesses, so the access covers exactly the projected part.
  pub(crate) fn storage_projection(
    &self,
    expr_id: ExprId,
  ) -> Option<(DeclId, Vec<u32>)> {
    let mut path = Vec::new();
    let mut current = expr_id;
    loop {
      match &self.ast().expr(&current).kind {
        ExprKind::DeclRef(decl) => {
          path.reverse();
          return Some((*decl, path));
        },
        ExprKind::InOut(place) => current = *place,
        ExprKind::Member { base, field } => {
          if self.types().is_class(&self.ast().expr(base).ty) {
            return None;
          }
          path.push(*field);
          current = *base;
        },
        _ => return None,
      }
    }
  }

  pub(crate) fn emit_storage_access(
    &mut self,
    decl: DeclId,
    path: &[u32],
    kind: AccessKind,
    span: Span,
  ) -> LowerResult<ValueId> {
    let name = self.ast().decl(&decl).name.clone();

    match self.binding(decl, span)? {
      Binding::Storage {
        address,
        kind: storage,
        ..
      } => {
        let root_ty = self.b.value_type(address);
        let projected = self.project_path(address, root_ty, path, span)?;
        let access = AccessPath {
          storage: StorageId::Local(decl),
          path: path.to_vec(),
          name,
        };
        let enforcement = self.enforcement(storage);
        self.begin_access(projected, kind, enforcement, Some(access), span)
      },
      Binding::Global(global) => {
        let address = self.global_address(global, span);
        let root_ty = self.b.value_type(address);
        let projected = self.project_path(address, root_ty, path, span)?;
        let access = AccessPath {
          storage: StorageId::Global(global),
          path: path.to_vec(),
          name,
        };
        let enforcement = self.dynamic_enforcement();
        self.begin_access(projected, kind, enforcement, Some(access), span)
      },
      Binding::Address(address) if kind == AccessKind::Read => {
        let root_ty = self.b.value_type(address);
        self.project_path(address, root_ty, path, span)
      },
      _ => Err(self.precondition(format!("'{}' is not mutable storage", name), span)),
    }
  }

  fn project_path(
    &mut self,
    address: ValueId,
    root_ty: TypeId,
    path: &[u32],
    span: Span,
  ) -> LowerResult<ValueId> {
    let mut address = address;
    let mut ty = root_ty;
    for index in path {
      address = self.element_address(address, ty, *index, span)?;
      ty = self.b.value_type(address);
    }
    Ok(address)
  }

  pub(crate) fn begin_access(
    &mut self,
    address: ValueId,
    kind: AccessKind,
    enforcement: Enforcement,
    path: Option<AccessPath>,
    span: Span,
  ) -> LowerResult<ValueId> {
    if let Some(path) = &path {
      if let Some(open) = self.access.conflict(path, kind) {
        return Err(LowerError::OverlappingAccess {
          storage: path.name.clone(),
          first: open.kind,
          second: kind,
          span,
          prior: open.span,
        });
      }
    }

    let ty = self.b.value_type(address);
    let dest = self.address(ty, span);
    self.b.emit(Instr::BeginAccess {
      dest,
      address,
      kind,
      enforcement,
    });
    self.cleanups.push(CleanupKind::EndAccess(dest));
    trace_dbg!(
      self.config(),
      DebugTrace::Access,
      "begin_access [{:?}] [{:?}] %{}",
      kind,
      enforcement,
      dest.index()
    );

    if let Some(path) = path {
      self.access.begin(dest, path, kind, span);
    }
    Ok(dest)
  }

  /// Stored property of a class instance. The instance is shared, so the
  /// access is always checked at run time.
  fn emit_class_property(
    &mut self,
    base: ExprId,
    field: u32,
    kind: AccessKind,
    span: Span,
  ) -> LowerResult<ValueId> {
    let base_ty = self.ast().expr(&base).ty;
    let Some(field_ty) = self.types().field_type(&base_ty, field) else {
      return Err(self.precondition(
        format!("'{}' has no field {}", self.types().display(&base_ty), field),
        span,
      ));
    };

    let object = self.emit_rvalue(base)?;
    let address = self.address(field_ty, span);
    self.b.emit(Instr::RefElementAddr {
      dest: address,
      object: object.value,
      field,
    });

    let enforcement = self.dynamic_enforcement();
    self.begin_access(address, kind, enforcement, None, span)
  }

  /// Starts the read or modify coroutine of a subscript; the yielded
  /// address is valid until the enclosing scope ends the coroutine.
  fn emit_subscript_access(
    &mut self,
    base: ExprId,
    index: ExprId,
    read: DeclId,
    modify: DeclId,
    kind: AccessKind,
    span: Span,
  ) -> LowerResult<ValueId> {
    let accessor = match kind {
      AccessKind::Read => read,
      AccessKind::Modify => modify,
    };
    let Some(&func) = self.m.functions.get(&accessor) else {
      return Err(self.precondition(
        format!("accessor '{}' was not declared", self.ast().decl(&accessor).name),
        span,
      ));
    };

    let signature = self.m.module.function(&func).signature.clone();
    if !signature.coroutine || signature.params.len() != 2 {
      return Err(self.precondition(
        format!("'{}' is not a subscript accessor", self.ast().decl(&accessor).name),
        span,
      ));
    }

    // The index is evaluated before the base is accessed
    let modified = self.modified_places(&[base], &signature.params[..1]);
    let copy_out = self.read_precedes_modify(index, &modified);
    let index = self.emit_arg(index, signature.params[1], copy_out, span)?;
    let base = self.emit_arg(base, signature.params[0], false, span)?;

    let accessor_ty = self.ast().decl_type(&accessor);
    let thin = self.thin_type(accessor_ty);
    let callee = self.function_ref(func, thin, span);
    let args = vec![base.forward(&mut self.cleanups), index.forward(&mut self.cleanups)];

    let address = self.address(signature.result, span);
    let unit = self.types().unit();
    let token = self.object(unit, Ownership::Trivial, span);
    self.b.emit(Instr::BeginApply {
      address,
      token,
      callee,
      args,
      conventions: signature.conventions(),
    });
    self.cleanups.push(CleanupKind::EndApply(token));
    Ok(address)
  }

  pub(crate) fn emit_assign(
    &mut self,
    dest: ExprId,
    source: ExprId,
    span: Span,
  ) -> LowerResult<()> {
    let ty = self.ast().expr(&source).ty;
    let info = self.type_info(ty);

    // The new value is complete before the destination is accessed
    if info.is_address_only() {
      let temp = self.alloc_temporary(ty, span);
      self.emit_into(source, temp)?;
      let value = self.manage_address(temp);

      let depth = self.cleanups.depth();
      let address = self.emit_lvalue(dest, AccessKind::Modify)?;
      let source = value.forward(&mut self.cleanups);
      self.b.emit(Instr::CopyAddr {
        source,
        dest: address,
        take: true,
        init: false,
      });
      self.pop_cleanups_to(depth);
      return Ok(());
    }

    let value = self.emit_owned(source)?;
    let depth = self.cleanups.depth();
    let address = self.emit_lvalue(dest, AccessKind::Modify)?;
    let qualifier = if self.b.value(value.value).ownership == Ownership::Trivial {
      StoreQualifier::Trivial
    } else {
      StoreQualifier::Assign
    };
    let value = value.forward(&mut self.cleanups);
    self.b.emit(Instr::Store {
      value,
      address,
      qualifier,
    });
    self.pop_cleanups_to(depth);
    Ok(())
  }
}
