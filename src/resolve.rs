//! The type resolver: expands named types to structural form and
//! synthesises their constraint blocks.
//!
//! Expansion is a cycle-tolerant walk. While a declaration is being
//! expanded, references back to it produce a `Nominal`
//! placeholder; when the expansion of `name` comes back mentioning `name`,
//! the graph is closed over the placeholder, which ties recursive types
//! like `LList = null | {int data, LList next}`. A recursive reference
//! that is not guarded by a `list`, `set`, dictionary, record, tuple,
//! union or reference constructor is rejected as `CyclicType`.
//!
//! Constraint blocks are composed structurally: a list constraint iterates
//! its elements, a record constraint checks each field in a shifted slot,
//! a union constraint tries each branch, chaining failures to the next.

use bit_set::BitSet;
use log::{debug, trace};

use crate::build_il;
use crate::error::{err, Error, ErrorKind, InternalFailure, Result};
use crate::eval::ConstEvaluator;
use crate::symbol::Symbol;
use crate::types::{ast, FileSpan, NameId};
use crate::types::ast::{UnresolvedType, UnresolvedTypeKind};
use crate::types::entity::{Entity, ModuleEnv, TypeTc};
use crate::types::il::{Block, LabelId, Op, Slot, THIS_SLOT};
use crate::types::ty::Type;

/// The resolver for one compilation unit. Holds the stack of declarations
/// currently being expanded, for recursion and cycle handling.
pub struct Resolver<'e, 'l> {
  pub(crate) env: &'e mut ModuleEnv<'l>,
  /// In-progress declarations, with the guard depth at which each was
  /// entered.
  expanding: Vec<(NameId, usize)>,
}

impl<'e, 'l> Resolver<'e, 'l> {
  /// Create a resolver over the given state.
  pub fn new(env: &'e mut ModuleEnv<'l>) -> Self {
    Resolver { env, expanding: vec![] }
  }

  /// The underlying resolver state.
  pub(crate) fn env(&mut self) -> &mut ModuleEnv<'l> { self.env }

  /// Resolve every type declaration, constant and function signature in
  /// the unit. At most one error is reported per declaration; a failing
  /// declaration is skipped and the rest continue.
  pub fn resolve_all(&mut self, unit: &ast::SourceFile) -> Vec<Error> {
    let mut errors = vec![];
    for decl in &unit.decls {
      if let ast::Decl::Type(d) = &decl.k {
        let name = NameId::new(self.env.module, d.name);
        if let Err(e) = self.expand_type_name(name, decl.span, 0) {
          errors.push(e)
        }
      }
    }
    for decl in &unit.decls {
      if let ast::Decl::Const(d) = &decl.k {
        let name = NameId::new(self.env.module, d.name);
        if let Err(e) = ConstEvaluator::new(self.env).evaluate_name(name, &d.value) {
          errors.push(e)
        }
      }
    }
    for decl in &unit.decls {
      if let ast::Decl::Fun(d) = &decl.k {
        match self.resolve_signature(d) {
          Ok(ty) => {
            let name = NameId::new(self.env.module, d.name);
            if let Some(Entity::Fun(f)) = self.env.names.get_mut(&name) {
              f.ty = Some(ty)
            }
          }
          Err(e) => errors.push(e),
        }
      }
    }
    errors
  }

  /// Resolve the signature of a function or method declaration.
  pub(crate) fn resolve_signature(&mut self, d: &ast::FunDecl) -> Result<Type> {
    let params = d.params.iter()
      .map(|p| Ok(self.resolve_type(&p.ty)?.0))
      .collect::<Result<Vec<_>>>()?;
    let (ret, _) = self.resolve_type(&d.ret)?;
    Ok(match &d.kind {
      ast::FunKind::Function => Type::function(&ret, &params),
      ast::FunKind::Method(recv) => {
        let recv = recv.as_ref()
          .map(|ut| Ok::<_, Error>(self.resolve_type(ut)?.0))
          .transpose()?;
        Type::method(recv.as_ref(), &ret, &params)
      }
    })
  }

  /// Resolve a type annotation to canonical structural form, with the
  /// constraint block it inherits from named components.
  pub fn resolve_type(&mut self, ut: &UnresolvedType) -> Result<(Type, Option<Block>)> {
    let (ty, c) = self.expand(ut, 0)?;
    let ty = if self.expanding.iter().any(|&(n, _)| ty.mentions(n)) {
      ty
    } else if ty.is_closed() {
      crate::algebra::minimise(&ty)
    } else {
      ty
    };
    Ok((ty, c))
  }

  /// Expand the named type declaration: the cycle-tolerant walk.
  pub(crate) fn expand_type_name(&mut self, name: NameId, span: FileSpan, guards: usize,
  ) -> Result<(Type, Option<Block>)> {
    // An in-progress name resolves to its own placeholder, which is what
    // makes recursive declarations terminate; but only behind a guarding
    // constructor.
    if let Some(&(_, at)) = self.expanding.iter().rev().find(|&&(n, _)| n == name) {
      if at == guards {
        return err(ErrorKind::CyclicType(name.name), span)
      }
      trace!("recursive reference to {name}");
      return Ok((Type::nominal(name), None))
    }
    if let Some((ty, c)) = self.env.type_of(name) {
      return Ok((ty, c))
    }
    if name.module != self.env.module {
      return err(ErrorKind::Resolve(name.to_string()), span)
    }
    let (ut, pred) = match self.env.names.get(&name) {
      Some(Entity::Type(TypeTc::Unresolved { ty, constraint })) =>
        (ty.clone(), constraint.clone()),
      Some(Entity::Type(TypeTc::Resolved(..))) => return Err(InternalFailure {
        msg: format!("type `{name}` resolved but missed the cache"),
        span,
      }.into()),
      Some(Entity::Const(_)) => return err(ErrorKind::InvalidConstantAsType(name), span),
      Some(Entity::Fun(_)) => return err(ErrorKind::InvalidFunctionAsType(name), span),
      None => return err(ErrorKind::Resolve(name.to_string()), span),
    };
    debug!("expanding type {name}");
    self.expanding.push((name, guards));
    let res = self.expand(&ut, guards);
    self.expanding.pop();
    let (mut ty, mut constraint) = res?;
    if ty.mentions(name) {
      ty = ty.close_nominal(name).expect("mentions implies an occurrence");
      // The constraint block captured placeholder types before the knot
      // was tied; give it one unrolling of the recursion.
      if let Some(c) = &constraint {
        constraint = Some(c.substitute_type(name, &ty))
      }
    }
    let open = self.expanding.iter().any(|&(n, _)| ty.mentions(n));
    if !open && ty.is_closed() {
      ty = crate::algebra::minimise(&ty)
    }
    if let Some(p) = &pred {
      let msg = format!("type constraint not satisfied ({})", name.name);
      let own = build_il::lower_constraint(self, p, &msg)?;
      constraint = Some(match constraint {
        Some(mut c) => { c.append(own); c }
        None => own,
      });
    }
    if !open {
      self.env.names.insert(name,
        Entity::Type(TypeTc::Resolved(ty.clone(), constraint.clone())));
    }
    Ok((ty, constraint))
  }

  /// Structurally expand an unresolved type. `guards` counts the guarding
  /// constructors entered on the current path; a recursive reference is
  /// only legal if the count grew since the declaration was entered.
  fn expand(&mut self, ut: &UnresolvedType, guards: usize) -> Result<(Type, Option<Block>)> {
    let span = ut.span;
    Ok(match &ut.k {
      UnresolvedTypeKind::Void => (Type::void(), None),
      UnresolvedTypeKind::Any => (Type::any(), None),
      UnresolvedTypeKind::Null => (Type::null(), None),
      UnresolvedTypeKind::Bool => (Type::bool(), None),
      UnresolvedTypeKind::Byte => (Type::byte(), None),
      UnresolvedTypeKind::Char => (Type::char(), None),
      UnresolvedTypeKind::Int => (Type::int(), None),
      UnresolvedTypeKind::Real => (Type::real(), None),
      UnresolvedTypeKind::Str => (Type::string(), None),
      UnresolvedTypeKind::Named(m, s) => {
        let Some(name) = self.env.resolve_name(*m, *s) else {
          return err(ErrorKind::Resolve(s.to_string()), span)
        };
        return self.expand_type_name(name, span, guards)
      }
      UnresolvedTypeKind::List(t) => {
        let (et, ec) = self.expand(t, guards + 1)?;
        (Type::list(&et), ec.map(|c| iterate_constraint(&c)))
      }
      UnresolvedTypeKind::Set(t) => {
        let (et, ec) = self.expand(t, guards + 1)?;
        (Type::set(&et), ec.map(|c| iterate_constraint(&c)))
      }
      UnresolvedTypeKind::Dict(k, v) => {
        let (kt, kc) = self.expand(k, guards + 1)?;
        let (vt, vc) = self.expand(v, guards + 1)?;
        (Type::dict(&kt, &vt), dict_constraint(kc.as_ref(), vc.as_ref()))
      }
      UnresolvedTypeKind::Tuple(ts) => {
        let mut tys = vec![];
        let mut parts = vec![];
        for (i, t) in ts.iter().enumerate() {
          let (et, ec) = self.expand(t, guards + 1)?;
          tys.push(et);
          if let Some(c) = ec {
            parts.push(index_constraint(u32::try_from(i).expect("tuple arity"), &c))
          }
        }
        (Type::tuple(&tys), concat_constraints(parts))
      }
      UnresolvedTypeKind::Record { open, fields } => {
        let mut tys = vec![];
        let mut parts = vec![];
        for (fname, t) in fields {
          let (et, ec) = self.expand(t, guards + 1)?;
          tys.push((*fname, et));
          if let Some(c) = ec {
            parts.push(field_constraint(*fname, &c))
          }
        }
        (Type::record(*open, &tys), concat_constraints(parts))
      }
      UnresolvedTypeKind::Union(ts) => {
        let branches = ts.iter()
          .map(|t| self.expand(t, guards + 1))
          .collect::<Result<Vec<_>>>()?;
        let ty = Type::union(&branches.iter().map(|(t, _)| t.clone()).collect::<Vec<_>>());
        (ty, union_constraint(&branches))
      }
      // A negation carries no constraint block of its own: its runtime
      // meaning is wholly in the type test.
      UnresolvedTypeKind::Negation(t) => {
        let (et, _) = self.expand(t, guards)?;
        (Type::negation(&et), None)
      }
      UnresolvedTypeKind::Fun { ret, params } => {
        let (rt, _) = self.expand(ret, guards)?;
        let pts = params.iter()
          .map(|t| Ok(self.expand(t, guards)?.0))
          .collect::<Result<Vec<_>>>()?;
        (Type::function(&rt, &pts), None)
      }
      UnresolvedTypeKind::Meth { receiver, ret, params } => {
        let recv = receiver.as_ref()
          .map(|t| Ok::<_, Error>(self.expand(t, guards)?.0))
          .transpose()?;
        let (rt, _) = self.expand(ret, guards)?;
        let pts = params.iter()
          .map(|t| Ok(self.expand(t, guards)?.0))
          .collect::<Result<Vec<_>>>()?;
        (Type::method(recv.as_ref(), &rt, &pts), None)
      }
      UnresolvedTypeKind::Process(t) => {
        let (et, _) = self.expand(t, guards + 1)?;
        (Type::process(&et), None)
      }
      UnresolvedTypeKind::Ref(t) => {
        let (et, _) = self.expand(t, guards + 1)?;
        (Type::reference(&et), None)
      }
    })
  }
}

/// Wrap a constraint so it checks every element of the collection in
/// `THIS_SLOT`: the element lands in slot 1 and the inner block is
/// re-based accordingly.
fn iterate_constraint(inner: &Block) -> Block {
  let end = LabelId::fresh();
  let mut b = Block::new(1);
  b.push_synth(Op::Load(THIS_SLOT));
  b.push_synth(Op::ForAll { slot: Slot(1), end, modified: BitSet::new() });
  b.append(inner.relabel().shift(1));
  b.push_synth(Op::End(end));
  b
}

/// Wrap a constraint so it checks one field of the record in `THIS_SLOT`.
fn field_constraint(field: Symbol, inner: &Block) -> Block {
  let mut b = Block::new(1);
  b.push_synth(Op::Load(THIS_SLOT));
  b.push_synth(Op::FieldLoad(field));
  b.push_synth(Op::Store(Slot(1)));
  b.append(inner.relabel().shift(1));
  b
}

/// Wrap a constraint so it checks one element of the tuple in `THIS_SLOT`.
fn index_constraint(i: u32, inner: &Block) -> Block {
  let mut b = Block::new(1);
  b.push_synth(Op::Load(THIS_SLOT));
  b.push_synth(Op::TupleLoad(i));
  b.push_synth(Op::Store(Slot(1)));
  b.append(inner.relabel().shift(1));
  b
}

/// Iterate the key/value pairs of the dictionary in `THIS_SLOT`, running
/// the key and value constraints on each.
fn dict_constraint(key: Option<&Block>, value: Option<&Block>) -> Option<Block> {
  if key.is_none() && value.is_none() { return None }
  let end = LabelId::fresh();
  let mut b = Block::new(1);
  b.push_synth(Op::Load(THIS_SLOT));
  b.push_synth(Op::ForAll { slot: Slot(1), end, modified: BitSet::new() });
  for (i, c) in [key, value].into_iter().enumerate() {
    if let Some(c) = c {
      b.push_synth(Op::Load(Slot(1)));
      b.push_synth(Op::TupleLoad(u32::try_from(i).expect("pair")));
      b.push_synth(Op::Store(Slot(2)));
      b.append(c.relabel().shift(2));
    }
  }
  b.push_synth(Op::End(end));
  Some(b)
}

/// Concatenate component constraints into one block.
fn concat_constraints(parts: Vec<Block>) -> Option<Block> {
  let mut parts = parts.into_iter();
  let mut b = parts.next()?;
  for p in parts { b.append(p) }
  Some(b)
}

/// The constraint of a union type: try each branch in order. A branch
/// whose type matches and whose constraint passes succeeds; a failing
/// branch constraint is chained to fall through to the next branch; if no
/// branch accepts the value, the whole constraint fails.
fn union_constraint(branches: &[(Type, Option<Block>)]) -> Option<Block> {
  if branches.iter().all(|(_, c)| c.is_none()) { return None }
  let done = LabelId::fresh();
  let mut b = Block::new(1);
  for (ty, c) in branches {
    match c {
      None => b.push_synth(Op::IfType(THIS_SLOT, ty.clone(), done)),
      Some(c) => {
        let check = LabelId::fresh();
        let next = LabelId::fresh();
        b.push_synth(Op::IfType(THIS_SLOT, ty.clone(), check));
        b.push_synth(Op::Goto(next));
        b.push_synth(Op::Label(check));
        b.append(c.relabel().chain(next));
        b.push_synth(Op::Goto(done));
        b.push_synth(Op::Label(next));
      }
    }
  }
  b.push_synth(Op::Fail("type constraint not satisfied".into()));
  b.push_synth(Op::Label(done));
  Some(b)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::symbol::intern;
  use crate::types::{Binop, ModuleId, Spanned, Value};
  use crate::types::ast::{Decl, ExprKind, TypeDecl};
  use crate::types::entity::NoLoader;
  use crate::types::ty::Node;

  fn sp<T>(k: T) -> Spanned<T> { Spanned { span: FileSpan::unknown(), k } }

  fn ut(k: UnresolvedTypeKind) -> UnresolvedType { sp(k) }

  fn named(s: &str) -> UnresolvedType { ut(UnresolvedTypeKind::Named(None, intern(s))) }

  fn unit_of(decls: Vec<Decl>) -> ast::SourceFile {
    ast::SourceFile {
      module: ModuleId(intern("test")),
      file: intern("test.whiley"),
      imports: vec![],
      decls: decls.into_iter().map(sp).collect(),
    }
  }

  fn type_decl(name: &str, t: UnresolvedType, constraint: Option<ast::Expr>) -> Decl {
    Decl::Type(TypeDecl { name: intern(name), ty: t, constraint })
  }

  fn resolve(unit: &ast::SourceFile) -> (Vec<Error>, ModuleEnv<'static>) {
    static LOADER: NoLoader = NoLoader;
    let mut env = ModuleEnv::new(&LOADER, unit);
    let errors = Resolver::new(&mut env).resolve_all(unit);
    (errors, env)
  }

  #[test]
  fn nat_has_constraint_block() {
    // define nat as int where $ >= 0
    let pred = sp(ExprKind::Binary(Binop::Ge,
      Box::new(sp(ExprKind::Name(None, intern("$")))),
      Box::new(sp(ExprKind::Lit(Value::int(0))))));
    let unit = unit_of(vec![type_decl("nat", ut(UnresolvedTypeKind::Int), Some(pred))]);
    let (errors, env) = resolve(&unit);
    assert!(errors.is_empty(), "{errors:?}");
    let (ty, c) = env.type_of(NameId::new(env.module, intern("nat"))).unwrap();
    assert_eq!(ty, Type::int());
    let c = c.unwrap();
    assert!(c.entries.iter().any(|e| matches!(e.op, Op::Fail(_))));
    assert!(c.entries.iter().any(|e| matches!(e.op, Op::Load(THIS_SLOT))));
    assert!(c.validate().is_ok());
  }

  #[test]
  fn list_of_nat_iterates() {
    let pred = sp(ExprKind::Binary(Binop::Ge,
      Box::new(sp(ExprKind::Name(None, intern("$")))),
      Box::new(sp(ExprKind::Lit(Value::int(0))))));
    let unit = unit_of(vec![
      type_decl("nat", ut(UnresolvedTypeKind::Int), Some(pred)),
      type_decl("natlist", ut(UnresolvedTypeKind::List(Box::new(named("nat")))), None),
    ]);
    let (errors, env) = resolve(&unit);
    assert!(errors.is_empty(), "{errors:?}");
    let (ty, c) = env.type_of(NameId::new(env.module, intern("natlist"))).unwrap();
    assert_eq!(ty, Type::list(&Type::int()));
    let c = c.unwrap();
    assert!(c.entries.iter().any(|e| matches!(e.op, Op::ForAll { .. })));
    // The element check runs in a shifted slot.
    assert!(c.entries.iter().any(|e| matches!(e.op, Op::Load(Slot(1)))));
    assert!(c.validate().is_ok());
  }

  #[test]
  fn recursive_list_closes() {
    // define LList as null | {int data, LList next}
    let rec = ut(UnresolvedTypeKind::Record {
      open: false,
      fields: vec![
        (intern("data"), ut(UnresolvedTypeKind::Int)),
        (intern("next"), named("LList")),
      ],
    });
    let unit = unit_of(vec![type_decl("LList",
      ut(UnresolvedTypeKind::Union(vec![ut(UnresolvedTypeKind::Null), rec])), None)]);
    let (errors, env) = resolve(&unit);
    assert!(errors.is_empty(), "{errors:?}");
    let (ty, c) = env.type_of(NameId::new(env.module, intern("LList"))).unwrap();
    assert!(ty.is_closed());
    assert!(c.is_none());
    // The `next` field of the record branch is the whole type again.
    let rec = ty.branches().unwrap().into_iter()
      .find(|t| matches!(t.root(), Node::Record { .. })).unwrap();
    assert_eq!(rec.field(intern("next")).unwrap(), ty);
  }

  #[test]
  fn unguarded_recursion_rejected() {
    let unit = unit_of(vec![type_decl("X", named("X"), None)]);
    let (errors, _) = resolve(&unit);
    assert_eq!(errors.len(), 1);
    let Error::Syntax(e) = &errors[0] else { panic!() };
    assert!(matches!(e.kind, ErrorKind::CyclicType(_)));
  }

  #[test]
  fn mutual_recursion_through_records() {
    // define Tree as null | {int v, Forest kids} ; define Forest as [Tree]
    let tree = ut(UnresolvedTypeKind::Union(vec![
      ut(UnresolvedTypeKind::Null),
      ut(UnresolvedTypeKind::Record {
        open: false,
        fields: vec![
          (intern("v"), ut(UnresolvedTypeKind::Int)),
          (intern("kids"), named("Forest")),
        ],
      }),
    ]));
    let forest = ut(UnresolvedTypeKind::List(Box::new(named("Tree"))));
    let unit = unit_of(vec![
      type_decl("Tree", tree, None),
      type_decl("Forest", forest, None),
    ]);
    let (errors, env) = resolve(&unit);
    assert!(errors.is_empty(), "{errors:?}");
    let (tree, _) = env.type_of(NameId::new(env.module, intern("Tree"))).unwrap();
    let (forest, _) = env.type_of(NameId::new(env.module, intern("Forest"))).unwrap();
    assert!(tree.is_closed() && forest.is_closed());
    // Forest is a list of Tree.
    assert!(crate::algebra::is_equivalent(&forest.element().unwrap(), &tree));
  }

  #[test]
  fn constant_as_type_rejected() {
    let unit = unit_of(vec![
      Decl::Const(ast::ConstDecl { name: intern("C"), value: sp(ExprKind::Lit(Value::int(1))) }),
      type_decl("T", named("C"), None),
    ]);
    let (errors, _) = resolve(&unit);
    assert!(errors.iter().any(|e| matches!(e,
      Error::Syntax(e) if matches!(e.kind, ErrorKind::InvalidConstantAsType(_)))));
  }

  #[test]
  fn union_of_constrained_branches_chains() {
    // define nat as int where $ >= 0 ; define opt as null | nat
    let pred = sp(ExprKind::Binary(Binop::Ge,
      Box::new(sp(ExprKind::Name(None, intern("$")))),
      Box::new(sp(ExprKind::Lit(Value::int(0))))));
    let unit = unit_of(vec![
      type_decl("nat", ut(UnresolvedTypeKind::Int), Some(pred)),
      type_decl("opt", ut(UnresolvedTypeKind::Union(vec![
        ut(UnresolvedTypeKind::Null), named("nat")])), None),
    ]);
    let (errors, env) = resolve(&unit);
    assert!(errors.is_empty(), "{errors:?}");
    let (ty, c) = env.type_of(NameId::new(env.module, intern("opt"))).unwrap();
    assert_eq!(ty, crate::algebra::union(&Type::null(), &Type::int()));
    let c = c.unwrap();
    // Branch dispatch by type test, with a terminal failure.
    assert!(c.entries.iter().any(|e| matches!(e.op, Op::IfType(THIS_SLOT, _, _))));
    assert!(c.entries.iter().any(|e| matches!(e.op, Op::Fail(_))));
    assert!(c.validate().is_ok());
  }
}
