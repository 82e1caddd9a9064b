//! The Whiley front end: name and type resolution, the structural type
//! algebra, and lowering to intermediate code.
//!
//! The compilation pipeline is:
//!
//! 1. The (external) parser produces a [`SourceFile`](types::ast::SourceFile)
//!    of declarations with source positions on every node.
//! 2. The [constant evaluator](eval) folds constant declarations through a
//!    cycle-detecting walk.
//! 3. The [resolver](resolve) expands named types to canonical structural
//!    form ([`types::ty`]), ties recursive definitions, and synthesises
//!    constraint blocks for `where` predicates.
//! 4. The [lowerer](build_il) compiles statements and expressions into flat
//!    [`Block`](types::il::Block)s of three-address code, weaving type
//!    constraints into function pre- and post-conditions.
//!
//! The [type algebra](algebra) (subtyping, least upper bounds, negation,
//! least difference) is shared by the resolver and the lowerer. All state
//! is per compilation unit: separate units can be compiled in parallel as
//! long as each gets its own [`ModuleEnv`](types::entity::ModuleEnv), with
//! the module loader shared read-only between them.

#![warn(missing_docs, elided_lifetimes_in_paths, rust_2018_idioms)]
#![allow(clippy::too_many_arguments)]

pub mod algebra;
pub mod build_il;
pub mod error;
pub mod eval;
pub mod resolve;
pub mod symbol;
pub mod types;

pub use build_il::lower_unit;
pub use error::{Error, ErrorKind, InternalFailure, Result, SyntaxError};
pub use symbol::{intern, Interner, Symbol};
pub use types::{FileSpan, ModuleId, NameId, Spanned, Value};

use types::ast::SourceFile;
use types::entity::ModuleLoader;
use types::il::Module;

/// The compiler facade: a module loader plus the per-unit driver.
pub struct Compiler<'l> {
  /// The loader consulted for foreign module references.
  pub loader: &'l dyn ModuleLoader,
}

impl<'l> Compiler<'l> {
  /// Create a compiler over the given loader.
  #[must_use] pub fn new(loader: &'l dyn ModuleLoader) -> Self {
    Compiler { loader }
  }

  /// Compile one parsed unit to an intermediate-code module, collecting
  /// every diagnostic on the way. A declaration with an error is skipped;
  /// the rest of the unit is still compiled.
  pub fn compile(&self, unit: &SourceFile) -> (Module, Vec<Error>) {
    build_il::lower_unit(unit, self.loader)
  }
}
