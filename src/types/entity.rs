//! Entities: the processed state of previously seen declarations, plus the
//! module loader interface.
//!
//! Every declaration of a compilation unit lives in one namespace as an
//! [`Entity`], progressing from its unresolved parse form to its resolved
//! form as the passes run. The resolver state is an explicit [`ModuleEnv`]
//! threaded through every pass; there are no process-wide tables.

use hashbrown::{HashMap, HashSet};

use crate::symbol::Symbol;
use crate::types::{ast, il::Block, ModuleId, NameId, Value};
use crate::types::ty::Type;

/// The resolution status of a type declaration.
#[derive(Clone, Debug)]
pub enum TypeTc {
  /// We know this is a type but have not expanded it yet.
  Unresolved {
    /// The declared (structural, unexpanded) type.
    ty: ast::UnresolvedType,
    /// The `where` predicate over `$`, if any.
    constraint: Option<ast::Expr>,
  },
  /// The declaration has been expanded to canonical structural form, with
  /// its synthesised constraint block.
  Resolved(Type, Option<Block>),
}

impl TypeTc {
  /// Get the resolved type, if resolution has happened.
  #[must_use] pub fn ty(&self) -> Option<&Type> {
    match self {
      TypeTc::Unresolved { .. } => None,
      TypeTc::Resolved(ty, _) => Some(ty),
    }
  }
}

/// The resolution status of a constant declaration.
#[derive(Clone, Debug)]
pub enum ConstTc {
  /// We know this is a constant but have not evaluated it yet.
  Unresolved(ast::Expr),
  /// The constant has been folded to a value.
  Evaluated(Value),
}

/// The resolution status of a function or method declaration.
#[derive(Clone, Debug)]
pub struct FunTc {
  /// Whether this is a method (and so may be a send target).
  pub is_method: bool,
  /// The resolved signature, once the resolver has expanded the
  /// parameter and return types.
  pub ty: Option<Type>,
}

/// A named declaration in some state of processing. Types, constants and
/// functions share one namespace.
#[derive(Clone, Debug)]
pub enum Entity {
  /// A named type.
  Type(TypeTc),
  /// A named constant.
  Const(ConstTc),
  /// A named function or method.
  Fun(FunTc),
}

/// The module loader interface. Foreign modules arrive fully resolved;
/// entries are created lazily by the host and never mutated after
/// publication, so a loader may be shared across compilation units.
pub trait ModuleLoader {
  /// Load a module, returning `None` if it does not exist.
  fn load(&self, id: ModuleId) -> Option<&LoadedModule>;
}

/// A fully resolved foreign module.
#[derive(Clone, Debug, Default)]
pub struct LoadedModule {
  /// The resolved type declarations with their constraint blocks.
  pub types: HashMap<Symbol, (Type, Option<Block>)>,
  /// The evaluated constant declarations.
  pub constants: HashMap<Symbol, Value>,
  /// The function and method signatures.
  pub functions: HashMap<Symbol, Type>,
}

/// A loader that knows no modules; used for single-module compilation.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoLoader;

impl ModuleLoader for NoLoader {
  fn load(&self, _: ModuleId) -> Option<&LoadedModule> { None }
}

/// A loader backed by an in-memory table.
#[derive(Default)]
pub struct TableLoader {
  /// The modules this loader knows.
  pub modules: HashMap<ModuleId, LoadedModule>,
}

impl ModuleLoader for TableLoader {
  fn load(&self, id: ModuleId) -> Option<&LoadedModule> { self.modules.get(&id) }
}

/// The per-compilation-unit resolver state.
pub struct ModuleEnv<'a> {
  /// The module loader for foreign names.
  pub loader: &'a dyn ModuleLoader,
  /// The module being compiled.
  pub module: ModuleId,
  /// The file the unit was parsed from.
  pub file: Symbol,
  /// The modules in scope (the current module and its imports).
  pub modules: HashSet<ModuleId>,
  /// The file each known name was declared in.
  pub filemap: HashMap<NameId, Symbol>,
  /// Every known declaration, by qualified name.
  pub names: HashMap<NameId, Entity>,
}

impl<'a> ModuleEnv<'a> {
  /// Create the state for one compilation unit and seed it with the unit's
  /// declarations.
  pub fn new(loader: &'a dyn ModuleLoader, unit: &ast::SourceFile) -> Self {
    let mut env = ModuleEnv {
      loader,
      module: unit.module,
      file: unit.file,
      modules: unit.imports.iter().copied().chain([unit.module]).collect(),
      filemap: HashMap::new(),
      names: HashMap::new(),
    };
    for decl in &unit.decls {
      let (name, entity) = match &decl.k {
        ast::Decl::Type(d) => (d.name, Entity::Type(TypeTc::Unresolved {
          ty: d.ty.clone(),
          constraint: d.constraint.clone(),
        })),
        ast::Decl::Const(d) => (d.name, Entity::Const(ConstTc::Unresolved(d.value.clone()))),
        ast::Decl::Fun(d) => (d.name, Entity::Fun(FunTc {
          is_method: matches!(d.kind, ast::FunKind::Method(_)),
          ty: None,
        })),
      };
      let name = NameId::new(unit.module, name);
      env.filemap.insert(name, unit.file);
      env.names.insert(name, entity);
    }
    env
  }

  /// Resolve a possibly-qualified name to a qualified one: an explicit
  /// module wins, then the current module, then any import that declares
  /// the name.
  #[must_use] pub fn resolve_name(&self, module: Option<ModuleId>, name: Symbol) -> Option<NameId> {
    if let Some(m) = module {
      return Some(NameId::new(m, name))
    }
    let local = NameId::new(self.module, name);
    if self.names.contains_key(&local) { return Some(local) }
    for &m in &self.modules {
      if m == self.module { continue }
      if let Some(module) = self.loader.load(m) {
        if module.types.contains_key(&name) || module.constants.contains_key(&name) ||
          module.functions.contains_key(&name) {
          return Some(NameId::new(m, name))
        }
      }
    }
    None
  }

  /// The resolved form of a named type, local or foreign.
  #[must_use] pub fn type_of(&self, name: NameId) -> Option<(Type, Option<Block>)> {
    if name.module == self.module {
      if let Some(Entity::Type(TypeTc::Resolved(ty, c))) = self.names.get(&name) {
        return Some((ty.clone(), c.clone()))
      }
      return None
    }
    self.loader.load(name.module)?.types.get(&name.name).cloned()
  }

  /// The value of a named constant, local or foreign.
  #[must_use] pub fn constant(&self, name: NameId) -> Option<Value> {
    if name.module == self.module {
      if let Some(Entity::Const(ConstTc::Evaluated(v))) = self.names.get(&name) {
        return Some(v.clone())
      }
      return None
    }
    self.loader.load(name.module)?.constants.get(&name.name).cloned()
  }

  /// The signature of a named function or method, local or foreign, with a
  /// flag for methods.
  #[must_use] pub fn function(&self, name: NameId) -> Option<(bool, Option<Type>)> {
    if name.module == self.module {
      if let Some(Entity::Fun(f)) = self.names.get(&name) {
        return Some((f.is_method, f.ty.clone()))
      }
      return None
    }
    let ty = self.loader.load(name.module)?.functions.get(&name.name)?.clone();
    let is_method = matches!(ty.root(), crate::types::ty::Node::Meth(_, _));
    Some((is_method, Some(ty)))
  }
}
