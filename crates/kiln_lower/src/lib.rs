//! Lowering of checked syntax trees to ownership SSA.
//!
//! Each function body is lowered on its own against module-wide state:
//! declared signatures, capture lists, vtable slots and the thunk cache. A
//! function whose lowering fails is reported and left as a bodyless
//! declaration; the rest of the module is still lowered.

mod access;
mod apply;
mod builder;
mod captures;
mod classify;
mod cleanup;
mod closure;
mod context;
mod dispatch;
mod error;
mod expr;
mod function;
mod global;
mod layout;
mod managed;
mod mangle;
mod materialize;
mod stmt;
mod storage;
mod thunk;

use kiln_ast::AstModule;
use kiln_config::{DebugTrace, KilnConfig};
use kiln_ir::{VerifyResult, verify_module};
use kiln_log::{phase_warn, trace_dbg};
use kiln_type::types::TypeStore;

pub use access::{AccessPath, AccessTracker, OpenAccess, StorageId};
pub use builder::FunctionBuilder;
pub use captures::{Capture, CaptureAnalysis, CaptureMode};
pub use classify::{TypeClass, TypeInfo, TypeLowering};
pub use cleanup::{CleanupHandle, CleanupKind, CleanupStack};
pub use context::{LoweringOutput, ModuleLowering};
pub use error::{LowerError, LowerResult};
pub use layout::{DeclaredLayout, LayoutOracle};
pub use managed::ManagedValue;
pub use mangle::{DefaultMangler, NameMangler};

/// Lower `ast` with the default layout oracle and name mangler.
pub fn lower_module(
  ast: &AstModule,
  types: &mut TypeStore,
  config: &KilnConfig,
) -> LoweringOutput {
  lower_module_with(ast, types, config, &DeclaredLayout, &DefaultMangler)
}

pub fn lower_module_with(
  ast: &AstModule,
  types: &mut TypeStore,
  config: &KilnConfig,
  oracle: &dyn LayoutOracle,
  mangler: &dyn NameMangler,
) -> LoweringOutput {
  let mut output = ModuleLowering::new(ast, types, config, oracle, mangler).run();

  if config.lowering.verify {
    if let Err(errors) = verify_module(&output.module, types) {
      for error in &errors {
        phase_warn!(config, "verifier: {}", error);
        output.reject_malformed(error);
      }
      trace_dbg!(config, DebugTrace::Verify, "{} verifier errors", errors.len());
    }
  }

  output
}

/// Lower `ast` and verify the result regardless of configuration.
pub fn lower_and_verify(
  ast: &AstModule,
  types: &mut TypeStore,
  config: &KilnConfig,
) -> (LoweringOutput, VerifyResult) {
  let output = lower_module(ast, types, config);
  let verified = verify_module(&output.module, types);
  (output, verified)
}
