use std::fmt::Write;

use kiln_type::types::{TypeId, TypeStore};

use crate::{
  AccessKind, BlockId, ConstValue, Enforcement, Function, FunctionKind, Instr, IrModule, LoadQualifier,
  LoweredSignature, Ownership, StoreQualifier, SwitchTarget, Terminator, ValueId,
};

/// Renders a whole module in a SIL-like textual form.
pub fn print_module(
  module: &IrModule,
  types: &TypeStore,
) -> String {
  let mut printer = IrPrinter::new(module, types);
  printer.print_module();
  printer.output
}

pub fn print_function(
  module: &IrModule,
  types: &TypeStore,
  function: &Function,
) -> String {
  let mut printer = IrPrinter::new(module, types);
  printer.print_function(function);
  printer.output
}

struct IrPrinter<'a> {
  module: &'a IrModule,
  types: &'a TypeStore,
  output: String,
}

impl<'a> IrPrinter<'a> {
  fn new(
    module: &'a IrModule,
    types: &'a TypeStore,
  ) -> Self {
    Self {
      module,
      types,
      output: String::new(),
    }
  }

  fn print_module(&mut self) {
    writeln!(self.output, "module {}", self.module.name).unwrap();

    for (_, global) in self.module.globals.iter() {
      let init = global
        .initializer
        .map(|f| format!(", init @{}", self.module.function(&f).name))
        .unwrap_or_default();
      writeln!(self.output, "global @{} : ${}{}", global.name, self.ty(global.ty), init).unwrap();
    }

    for (_, function) in self.module.functions.iter() {
      self.output.push('\n');
      self.print_function(function);
    }

    for vtable in &self.module.vtables {
      let class = &self.types.nominal_decl(&vtable.class).name;
      writeln!(self.output, "\nvtable {} {{", class).unwrap();
      for entry in &vtable.entries {
        let imp = &self.module.function(&entry.implementation).name;
        writeln!(self.output, "  #{} {}: @{}", entry.slot, entry.method, imp).unwrap();
      }
      writeln!(self.output, "}}").unwrap();
    }

    for table in &self.module.witness_tables {
      let protocol = &self.types.protocol(&table.protocol).name;
      writeln!(self.output, "\nwitness_table {}: {} {{", self.ty(table.conforming), protocol).unwrap();
      for (i, entry) in table.entries.iter().enumerate() {
        writeln!(self.output, "  #{}: @{}", i, self.module.function(entry).name).unwrap();
      }
      writeln!(self.output, "}}").unwrap();
    }
  }

  fn print_function(
    &mut self,
    function: &Function,
  ) {
    let kind = match function.kind {
      FunctionKind::Normal => "",
      FunctionKind::Closure => "[closure] ",
      FunctionKind::Thunk => "[thunk] ",
      FunctionKind::GlobalInit => "[global_init] ",
      FunctionKind::Accessor => "[accessor] ",
    };
    let signature = self.signature(&function.signature);

    if function.is_declaration() {
      writeln!(self.output, "fn {}@{} : {}", kind, function.name, signature).unwrap();
      return;
    }

    writeln!(self.output, "fn {}@{} : {} {{", kind, function.name, signature).unwrap();
    for (id, _) in function.blocks.iter() {
      self.print_block(function, id);
    }
    writeln!(self.output, "}}").unwrap();
  }

  fn print_block(
    &mut self,
    function: &Function,
    id: BlockId,
  ) {
    let block = function.block(&id);
    if block.params.is_empty() {
      writeln!(self.output, "bb{}:", id.index()).unwrap();
    } else {
      let params: Vec<String> = block.params.iter().map(|p| self.typed_value(function, *p)).collect();
      writeln!(self.output, "bb{}({}):", id.index(), params.join(", ")).unwrap();
    }

    for instr in &block.instructions {
      let text = self.instr(function, instr);
      writeln!(self.output, "  {}", text).unwrap();
    }

    match &block.terminator {
      Some(term) => {
        let text = self.terminator(function, term);
        writeln!(self.output, "  {}", text).unwrap();
      },
      None => writeln!(self.output, "  <missing terminator>").unwrap(),
    }
  }

  fn ty(
    &self,
    ty: TypeId,
  ) -> String {
    self.types.display(&ty)
  }

  fn signature(
    &self,
    sig: &LoweredSignature,
  ) -> String {
    let mut params = Vec::new();
    let mut result = self.ty(sig.result);

    for param in &sig.params {
      if param.convention == crate::ArgConvention::IndirectOut {
        result = format!("@out {}", self.ty(param.ty));
      } else {
        params.push(format!("{} {}", param.convention, self.ty(param.ty)));
      }
    }

    let mut text = format!("$({})", params.join(", "));
    if sig.throws() {
      text.push_str(" throws");
    }
    if sig.coroutine {
      text.push_str(" yields");
    }
    format!("{} -> {}", text, result)
  }

  fn typed_value(
    &self,
    function: &Function,
    value: ValueId,
  ) -> String {
    let data = function.value(&value);
    if data.is_address() {
      return format!("%{} : $*{}", value.index(), self.ty(data.ty));
    }

    let ownership = match data.ownership {
      Ownership::Owned => "@owned",
      Ownership::Guaranteed => "@guaranteed",
      Ownership::Trivial => "@trivial",
      Ownership::Unowned => "@unowned",
    };
    format!("%{} : {} ${}", value.index(), ownership, self.ty(data.ty))
  }

  fn case_name(
    &self,
    enum_ty: TypeId,
    case: u32,
  ) -> String {
    let name = self
      .types
      .as_nominal(&enum_ty)
      .map(|(_, decl)| decl.name.clone())
      .unwrap_or_else(|| self.ty(enum_ty));
    let case_name = self
      .types
      .enum_cases(&enum_ty)
      .and_then(|cases| cases.get(case as usize))
      .map(|c| c.name.clone())
      .unwrap_or_else(|| case.to_string());
    format!("#{}.{}", name, case_name)
  }

  fn instr(
    &self,
    function: &Function,
    instr: &Instr,
  ) -> String {
    let v = |id: &ValueId| format!("%{}", id.index());
    let list = |ids: &[ValueId]| ids.iter().map(|id| format!("%{}", id.index())).collect::<Vec<_>>().join(", ");
    let value_ty = |id: &ValueId| function.value(id).ty;

    match instr {
      Instr::Const { dest, value } => match value {
        ConstValue::Int(n) => format!("{} = integer_literal $Int, {}", v(dest), n),
        ConstValue::Float(x) => format!("{} = float_literal $Float, {}", v(dest), x),
        ConstValue::Bool(b) => format!("{} = bool_literal {}", v(dest), b),
        ConstValue::Str(s) => format!("{} = string_literal {:?}", v(dest), s),
        ConstValue::Unit => format!("{} = tuple ()", v(dest)),
      },
      Instr::Builtin { dest, op, lhs, rhs } => {
        format!("{} = builtin \"{}\"({}, {})", v(dest), op, v(lhs), v(rhs))
      },
      Instr::FunctionRef { dest, func } => {
        format!("{} = function_ref @{}", v(dest), self.module.function(func).name)
      },
      Instr::ThinToThick { dest, func } => format!("{} = thin_to_thick_function {}", v(dest), v(func)),
      Instr::ConvertFunction { dest, operand } => {
        format!("{} = convert_function {} to ${}", v(dest), v(operand), self.ty(value_ty(dest)))
      },
      Instr::Apply { dest, callee, args, .. } => match dest {
        Some(dest) => format!("{} = apply {}({})", v(dest), v(callee), list(args)),
        None => format!("apply {}({})", v(callee), list(args)),
      },
      Instr::PartialApply {
        dest,
        callee,
        captures,
        on_stack,
        ..
      } => {
        let stack = if *on_stack { "[on_stack] " } else { "" };
        format!("{} = partial_apply {}{}({})", v(dest), stack, v(callee), list(captures))
      },
      Instr::BeginApply {
        address,
        token,
        callee,
        args,
        ..
      } => format!("({}, {}) = begin_apply {}({})", v(address), v(token), v(callee), list(args)),
      Instr::EndApply { token } => format!("end_apply {}", v(token)),
      Instr::ClassMethod {
        dest,
        object,
        class,
        slot,
      } => format!(
        "{} = class_method {}, #{}.{}",
        v(dest),
        v(object),
        self.types.nominal_decl(class).name,
        slot
      ),
      Instr::WitnessMethod {
        dest,
        opened,
        protocol,
        requirement,
      } => {
        let protocol = self.types.protocol(protocol);
        let req = protocol
          .requirements
          .get(*requirement as usize)
          .cloned()
          .unwrap_or_else(|| requirement.to_string());
        format!("{} = witness_method #{}.{}, {}", v(dest), protocol.name, req, v(opened))
      },
      Instr::CopyValue { dest, operand } => format!("{} = copy_value {}", v(dest), v(operand)),
      Instr::DestroyValue { operand } => format!("destroy_value {}", v(operand)),
      Instr::BeginBorrow { dest, operand } => format!("{} = begin_borrow {}", v(dest), v(operand)),
      Instr::LoadBorrow { dest, address } => format!("{} = load_borrow {}", v(dest), v(address)),
      Instr::EndBorrow { borrow } => format!("end_borrow {}", v(borrow)),
      Instr::Load {
        dest,
        address,
        qualifier,
      } => {
        let q = match qualifier {
          LoadQualifier::Take => "take",
          LoadQualifier::Copy => "copy",
          LoadQualifier::Trivial => "trivial",
        };
        format!("{} = load [{}] {}", v(dest), q, v(address))
      },
      Instr::Store {
        value,
        address,
        qualifier,
      } => {
        let q = match qualifier {
          StoreQualifier::Init => "init",
          StoreQualifier::Assign => "assign",
          StoreQualifier::Trivial => "trivial",
        };
        format!("store {} to [{}] {}", v(value), q, v(address))
      },
      Instr::AllocStack { dest, ty } => format!("{} = alloc_stack ${}", v(dest), self.ty(*ty)),
      Instr::DeallocStack { address } => format!("dealloc_stack {}", v(address)),
      Instr::AllocBox { dest, ty } => format!("{} = alloc_box ${}", v(dest), self.ty(*ty)),
      Instr::DeallocBox { boxed } => format!("dealloc_box {}", v(boxed)),
      Instr::ProjectBox { dest, boxed } => format!("{} = project_box {}", v(dest), v(boxed)),
      Instr::AllocRef { dest, ty } => format!("{} = alloc_ref ${}", v(dest), self.ty(*ty)),
      Instr::CopyAddr {
        source,
        dest,
        take,
        init,
      } => {
        let take = if *take { "[take] " } else { "" };
        let init = if *init { "[init] " } else { "" };
        format!("copy_addr {}{} to {}{}", take, v(source), init, v(dest))
      },
      Instr::DestroyAddr { address } => format!("destroy_addr {}", v(address)),
      Instr::BeginAccess {
        dest,
        address,
        kind,
        enforcement,
      } => {
        let kind = match kind {
          AccessKind::Read => "read",
          AccessKind::Modify => "modify",
        };
        let enforcement = match enforcement {
          Enforcement::Static => "static",
          Enforcement::Dynamic => "dynamic",
          Enforcement::Unchecked => "unchecked",
        };
        format!("{} = begin_access [{}] [{}] {}", v(dest), kind, enforcement, v(address))
      },
      Instr::EndAccess { access } => format!("end_access {}", v(access)),
      Instr::Struct { dest, ty, fields } => format!("{} = struct ${} ({})", v(dest), self.ty(*ty), list(fields)),
      Instr::StructExtract { dest, operand, field } => {
        format!("{} = struct_extract {}, #{}", v(dest), v(operand), field)
      },
      Instr::StructElementAddr { dest, address, field } => {
        format!("{} = struct_element_addr {}, #{}", v(dest), v(address), field)
      },
      Instr::Tuple { dest, elements } => format!("{} = tuple ({})", v(dest), list(elements)),
      Instr::TupleExtract { dest, operand, index } => {
        format!("{} = tuple_extract {}, {}", v(dest), v(operand), index)
      },
      Instr::TupleElementAddr { dest, address, index } => {
        format!("{} = tuple_element_addr {}, {}", v(dest), v(address), index)
      },
      Instr::Enum {
        dest,
        ty,
        case,
        payload,
      } => match payload {
        Some(p) => format!("{} = enum ${}, {}, {}", v(dest), self.ty(*ty), self.case_name(*ty, *case), v(p)),
        None => format!("{} = enum ${}, {}", v(dest), self.ty(*ty), self.case_name(*ty, *case)),
      },
      Instr::InitEnumDataAddr { dest, address, case } => format!(
        "{} = init_enum_data_addr {}, {}",
        v(dest),
        v(address),
        self.case_name(value_ty(address), *case)
      ),
      Instr::InjectEnumAddr { address, case } => {
        format!("inject_enum_addr {}, {}", v(address), self.case_name(value_ty(address), *case))
      },
      Instr::UncheckedTakeEnumDataAddr { dest, address, case } => format!(
        "{} = unchecked_take_enum_data_addr {}, {}",
        v(dest),
        v(address),
        self.case_name(value_ty(address), *case)
      ),
      Instr::InitExistentialAddr { dest, address, concrete } => {
        format!("{} = init_existential_addr {}, ${}", v(dest), v(address), self.ty(*concrete))
      },
      Instr::InitExistentialRef { dest, operand } => {
        format!("{} = init_existential_ref {} : ${}", v(dest), v(operand), self.ty(value_ty(dest)))
      },
      Instr::OpenExistentialAddr { dest, address } => format!("{} = open_existential_addr {}", v(dest), v(address)),
      Instr::AllocExistentialBox { dest, payload, concrete } => format!(
        "({}, {}) = alloc_existential_box ${}, ${}",
        v(dest),
        v(payload),
        self.ty(value_ty(dest)),
        self.ty(*concrete)
      ),
      Instr::RefElementAddr { dest, object, field } => {
        format!("{} = ref_element_addr {}, #{}", v(dest), v(object), field)
      },
      Instr::GlobalAddr { dest, global } => format!("{} = global_addr @{}", v(dest), self.module.global(global).name),
      Instr::Once { global, initializer } => format!(
        "once @{}, @{}",
        self.module.global(global).name,
        self.module.function(initializer).name
      ),
    }
  }

  fn targets(
    &self,
    function: &Function,
    scrutinee: ValueId,
    cases: &[SwitchTarget],
    default: &Option<BlockId>,
  ) -> String {
    let enum_ty = function.value(&scrutinee).ty;
    let mut parts: Vec<String> = cases
      .iter()
      .map(|c| format!("case {}: bb{}", self.case_name(enum_ty, c.case), c.block.index()))
      .collect();
    if let Some(d) = default {
      parts.push(format!("default bb{}", d.index()));
    }
    parts.join(", ")
  }

  fn terminator(
    &self,
    function: &Function,
    term: &Terminator,
  ) -> String {
    let v = |id: &ValueId| format!("%{}", id.index());
    let list = |ids: &[ValueId]| ids.iter().map(|id| format!("%{}", id.index())).collect::<Vec<_>>().join(", ");

    match term {
      Terminator::Br { target, args } if args.is_empty() => format!("br bb{}", target.index()),
      Terminator::Br { target, args } => format!("br bb{}({})", target.index(), list(args)),
      Terminator::CondBr {
        condition,
        then_block,
        else_block,
      } => format!("cond_br {}, bb{}, bb{}", v(condition), then_block.index(), else_block.index()),
      Terminator::SwitchEnum {
        operand,
        cases,
        default,
      } => format!("switch_enum {}, {}", v(operand), self.targets(function, *operand, cases, default)),
      Terminator::SwitchEnumAddr {
        address,
        cases,
        default,
      } => format!(
        "switch_enum_addr {}, {}",
        v(address),
        self.targets(function, *address, cases, default)
      ),
      Terminator::TryApply {
        callee,
        args,
        normal,
        error,
        ..
      } => format!(
        "try_apply {}({}), normal bb{}, error bb{}",
        v(callee),
        list(args),
        normal.index(),
        error.index()
      ),
      Terminator::Return(Some(value)) => format!("return {}", v(value)),
      Terminator::Return(None) => "return".to_string(),
      Terminator::Throw(error) => format!("throw {}", v(error)),
      Terminator::Unreachable => "unreachable".to_string(),
    }
  }
}
