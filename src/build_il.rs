//! Build intermediate code from the AST.
//!
//! The [`Lowerer`] walks statements and expressions, appending operations
//! to the current [`Block`] over an environment mapping local variable
//! names to slots. Slots are allocated monotonically and never reused.
//! Conditions are lowered to branch-on-true shape with short-circuit
//! control flow; type tests and `== null` comparisons specialise to
//! [`IfType`](Op::IfType). Break and continue resolve through a stack of
//! scopes that is pushed and popped around every loop and switch on every
//! exit path.
//!
//! The lowerer reports at most one error per statement: a failing
//! statement is skipped and lowering continues with the next one.

use std::mem;

use bit_set::BitSet;
use if_chain::if_chain;
use log::debug;
use smallvec::SmallVec;

use crate::error::{err, Error, ErrorKind, Result};
use crate::eval::ConstEvaluator;
use crate::resolve::Resolver;
use crate::symbol::{intern, Symbol};
use crate::types::{ast, Binop, Cmp, FileSpan, NameId, Unop, Value};
use crate::types::ast::{CompKind, Expr, ExprKind, Stmt, StmtKind};
use crate::types::entity::{ModuleEnv, ModuleLoader};
use crate::types::il::{self, Block, LabelId, Op, Slot, THIS_SLOT};
use crate::types::ty::Type;

/// A scope that `break` (and for loops, `continue`) can target.
#[derive(Copy, Clone, Debug)]
enum Scope {
  /// A loop body: `break` exits to `brk`, `continue` jumps to `cont`.
  Loop {
    /// The loop's end label; branching to it exits the loop.
    brk: LabelId,
    /// The back-edge label just before the loop end.
    cont: LabelId,
  },
  /// A switch body: `break` exits to `brk`; `continue` skips this scope.
  Switch {
    /// The switch exit label.
    brk: LabelId,
  },
}

/// The statement and expression lowerer for one function.
pub(crate) struct Lowerer<'r, 'e, 'l> {
  res: &'r mut Resolver<'e, 'l>,
  vars: im::HashMap<Symbol, Slot>,
  assigned: im::HashSet<Symbol>,
  next_slot: u32,
  scopes: Vec<Scope>,
  blk: Block,
  errors: Vec<Error>,
  ret: Type,
}

impl<'r, 'e, 'l> Lowerer<'r, 'e, 'l> {
  fn new(res: &'r mut Resolver<'e, 'l>, ret: Type) -> Self {
    Lowerer {
      res,
      vars: im::HashMap::new(),
      assigned: im::HashSet::new(),
      next_slot: 0,
      scopes: vec![],
      blk: Block::default(),
      errors: vec![],
      ret,
    }
  }

  fn alloc_slot(&mut self) -> Slot {
    let s = Slot(self.next_slot);
    self.next_slot += 1;
    s
  }

  /// Bind a (possibly shadowing) variable to a fresh slot.
  fn bind(&mut self, name: Symbol) -> Slot {
    let s = self.alloc_slot();
    self.vars.insert(name, s);
    s
  }

  fn lookup_or_bind(&mut self, name: Symbol) -> Slot {
    match self.vars.get(&name) {
      Some(&s) => s,
      None => self.bind(name),
    }
  }

  /// The slot of a variable, requiring it to be readable.
  fn read_var(&mut self, name: Symbol, span: FileSpan) -> Result<Slot> {
    let Some(&slot) = self.vars.get(&name) else {
      return err(ErrorKind::UnknownVariable(name), span)
    };
    if !self.assigned.contains(&name) {
      return err(ErrorKind::VariablePossiblyUninitialised(name), span)
    }
    Ok(slot)
  }

  fn with_scope<R>(&mut self, sc: Scope, f: impl FnOnce(&mut Self) -> R) -> R {
    self.scopes.push(sc);
    let r = f(self);
    self.scopes.pop();
    r
  }

  // ---------------------------------------------------------------------
  // statements

  /// Lower a statement list, returning whether control can fall out the
  /// end. Statements after a terminal one are unreachable.
  fn stmts(&mut self, list: &[Stmt]) -> bool {
    let mut reachable = true;
    for s in list {
      if !reachable {
        self.errors.push(crate::error::SyntaxError::new(ErrorKind::UnreachableCode, s.span).into());
        break
      }
      match self.stmt(s) {
        Ok(r) => reachable = r,
        Err(e) => self.errors.push(e),
      }
    }
    reachable
  }

  /// Lower one statement, returning whether control falls through it.
  fn stmt(&mut self, s: &Stmt) -> Result<bool> {
    match &s.k {
      StmtKind::Skip => Ok(true),
      StmtKind::VarDecl { ty, name, init } => {
        // The declared type is resolved for its side effects (errors); the
        // slot itself is untyped until the inference stage.
        self.res.resolve_type(ty)?;
        let slot = self.bind(*name);
        if let Some(e) = init {
          self.lower_expr(e)?;
          self.blk.push(Op::Store(slot), s.span);
          self.assigned.insert(*name);
        }
        Ok(true)
      }
      StmtKind::Assign { lhs, rhs } => {
        self.lower_assign(s.span, lhs, rhs)?;
        Ok(true)
      }
      StmtKind::Assert(e) => {
        self.lower_assert(e, "assertion failed")?;
        Ok(true)
      }
      StmtKind::Return(e) => {
        if let Some(e) = e {
          self.lower_expr(e)?;
          self.blk.push(Op::Return(self.ret.clone()), s.span);
        } else {
          self.blk.push(Op::Return(Type::void()), s.span);
        }
        Ok(false)
      }
      StmtKind::Throw(e) => {
        self.lower_expr(e)?;
        self.blk.push(Op::Throw, s.span);
        Ok(false)
      }
      StmtKind::Break => {
        let Some(&sc) = self.scopes.last() else {
          return err(ErrorKind::BreakOutsideLoop, s.span)
        };
        let (Scope::Loop { brk, .. } | Scope::Switch { brk }) = sc;
        self.blk.push(Op::Goto(brk), s.span);
        Ok(false)
      }
      StmtKind::Continue => {
        let cont = self.scopes.iter().rev().find_map(|sc| match sc {
          Scope::Loop { cont, .. } => Some(*cont),
          Scope::Switch { .. } => None,
        });
        let Some(cont) = cont else {
          return err(ErrorKind::BreakOutsideLoop, s.span)
        };
        self.blk.push(Op::Goto(cont), s.span);
        Ok(false)
      }
      StmtKind::If { cond, then, els } => {
        let then_l = LabelId::fresh();
        let exit = LabelId::fresh();
        self.condition(then_l, cond)?;
        let vars0 = self.vars.clone();
        let assigned0 = self.assigned.clone();
        let els_falls = self.stmts(els);
        self.vars = vars0.clone();
        let els_assigned = mem::replace(&mut self.assigned, assigned0.clone());
        self.blk.push_synth(Op::Goto(exit));
        self.blk.push_synth(Op::Label(then_l));
        let then_falls = self.stmts(then);
        self.vars = vars0;
        let then_assigned = mem::replace(&mut self.assigned, assigned0);
        self.blk.push_synth(Op::Label(exit));
        // A variable is definitely assigned only if both branches assign it.
        self.assigned = els_assigned.intersection(then_assigned);
        Ok(els_falls || then_falls)
      }
      StmtKind::While { cond, invariant, body } => {
        let end = LabelId::fresh();
        let cont = LabelId::fresh();
        if let Some(inv) = invariant {
          self.lower_assert(inv, "loop invariant not satisfied")?;
        }
        let modified = self.modified_slots(body);
        self.blk.push(Op::Loop { end, modified }, s.span);
        self.condition_inv(end, cond)?;
        self.loop_body(body, end, cont);
        self.blk.push_synth(Op::Label(cont));
        if let Some(inv) = invariant {
          self.lower_assert(inv, "loop invariant not satisfied")?;
        }
        self.blk.push_synth(Op::End(end));
        Ok(true)
      }
      StmtKind::DoWhile { cond, invariant, body } => {
        let end = LabelId::fresh();
        let cont = LabelId::fresh();
        if let Some(inv) = invariant {
          self.lower_assert(inv, "loop invariant not satisfied")?;
        }
        let modified = self.modified_slots(body);
        self.blk.push(Op::Loop { end, modified }, s.span);
        let vars0 = self.vars.clone();
        self.with_scope(Scope::Loop { brk: end, cont }, |lo| lo.stmts(body));
        self.vars = vars0;
        self.blk.push_synth(Op::Label(cont));
        if let Some(inv) = invariant {
          self.lower_assert(inv, "loop invariant not satisfied")?;
        }
        // Condition false exits; fallthrough re-enters via the loop end.
        self.condition_inv(end, cond)?;
        self.blk.push_synth(Op::End(end));
        Ok(true)
      }
      StmtKind::For { var, source, invariant, body } => {
        self.lower_expr(source)?;
        let end = LabelId::fresh();
        let cont = LabelId::fresh();
        let vars0 = self.vars.clone();
        let assigned0 = self.assigned.clone();
        let slot = self.bind(*var);
        self.assigned.insert(*var);
        let modified = self.modified_slots(body);
        self.blk.push(Op::ForAll { slot, end, modified }, s.span);
        if let Some(inv) = invariant {
          self.lower_assert(inv, "loop invariant not satisfied")?;
        }
        self.loop_body(body, end, cont);
        self.blk.push_synth(Op::Label(cont));
        if let Some(inv) = invariant {
          self.lower_assert(inv, "loop invariant not satisfied")?;
        }
        self.blk.push_synth(Op::End(end));
        self.vars = vars0;
        self.assigned = assigned0;
        Ok(true)
      }
      StmtKind::Switch { subject, cases } => self.lower_switch(s.span, subject, cases),
      StmtKind::TryCatch { body, handlers } => self.lower_try(s.span, body, handlers),
      StmtKind::Expr(e) => {
        if let ExprKind::Invoke { name, receiver, args, synchronous } = &e.k {
          self.lower_invoke(e.span, *name, receiver.as_deref(), args, *synchronous, false)?;
        } else {
          // Evaluated for effect; park the value in a scratch slot.
          self.lower_expr(e)?;
          let scratch = self.alloc_slot();
          self.blk.push(Op::Store(scratch), e.span);
        }
        Ok(true)
      }
    }
  }

  fn loop_body(&mut self, body: &[Stmt], end: LabelId, cont: LabelId) {
    let vars0 = self.vars.clone();
    let assigned0 = self.assigned.clone();
    self.with_scope(Scope::Loop { brk: end, cont }, |lo| lo.stmts(body));
    self.vars = vars0;
    // The body may run zero times.
    self.assigned = assigned0;
  }

  fn lower_switch(&mut self, span: FileSpan, subject: &Expr, cases: &[ast::SwitchCase],
  ) -> Result<bool> {
    self.lower_expr(subject)?;
    let exit = LabelId::fresh();
    let mut default = None;
    let mut table = vec![];
    let mut bodies = vec![];
    for case in cases {
      let l = LabelId::fresh();
      match &case.value {
        Some(e) => {
          // Case expressions must fold to constants.
          let v = ConstEvaluator::new(self.res.env()).eval(e)?;
          if table.iter().any(|&(ref seen, _)| *seen == v) {
            return err(ErrorKind::DuplicateCaseLabel, e.span)
          }
          table.push((v, l));
        }
        None => {
          if default.is_some() {
            return err(ErrorKind::DuplicateDefaultLabel, span)
          }
          default = Some(l);
        }
      }
      bodies.push((l, &case.body));
    }
    self.blk.push(Op::Switch {
      default: default.unwrap_or(exit),
      cases: table.into(),
    }, span);
    let vars0 = self.vars.clone();
    let assigned0 = self.assigned.clone();
    // A variable is definitely assigned after the switch only if every arm
    // assigns it; without a default there is an implicit arm that assigns
    // nothing.
    let mut joined = if default.is_some() { None } else { Some(assigned0.clone()) };
    for (l, body) in bodies {
      self.blk.push_synth(Op::Label(l));
      let falls = self.with_scope(Scope::Switch { brk: exit }, |lo| lo.stmts(body));
      self.vars = vars0.clone();
      let case_assigned = mem::replace(&mut self.assigned, assigned0.clone());
      joined = Some(match joined {
        Some(j) => j.intersection(case_assigned),
        None => case_assigned,
      });
      if falls { self.blk.push_synth(Op::Goto(exit)) }
    }
    self.blk.push_synth(Op::Label(exit));
    if let Some(j) = joined { self.assigned = j }
    Ok(true)
  }

  fn lower_try(&mut self, span: FileSpan, body: &[Stmt], handlers: &[ast::Catch],
  ) -> Result<bool> {
    let exit = LabelId::fresh();
    let mut resolved = vec![];
    for h in handlers {
      let (ty, _) = self.res.resolve_type(&h.ty)?;
      resolved.push((ty, LabelId::fresh()));
    }
    self.blk.push(Op::TryCatch { end: exit, handlers: resolved.iter().cloned().collect() }, span);
    let vars0 = self.vars.clone();
    let assigned0 = self.assigned.clone();
    let mut falls = self.stmts(body);
    self.vars = vars0.clone();
    self.assigned = assigned0.clone();
    if falls { self.blk.push_synth(Op::Goto(exit)) }
    for (h, (_, l)) in handlers.iter().zip(&resolved) {
      self.blk.push_synth(Op::Label(*l));
      // The thrown value arrives on the stack.
      let slot = self.bind(h.name);
      self.assigned.insert(h.name);
      self.blk.push(Op::Store(slot), h.ty.span);
      let h_falls = self.stmts(&h.body);
      self.vars = vars0.clone();
      self.assigned = assigned0.clone();
      if h_falls { self.blk.push_synth(Op::Goto(exit)) }
      falls |= h_falls;
    }
    self.blk.push_synth(Op::Label(exit));
    Ok(falls)
  }

  // ---------------------------------------------------------------------
  // assignment

  fn lower_assign(&mut self, span: FileSpan, lhs: &Expr, rhs: &Expr) -> Result<()> {
    match &lhs.k {
      ExprKind::Name(None, name) => {
        let slot = self.lookup_or_bind(*name);
        self.lower_expr(rhs)?;
        self.blk.push(Op::Store(slot), span);
        self.assigned.insert(*name);
        Ok(())
      }
      // Destructuring: every component must be a variable.
      ExprKind::TupleCon(elems) => {
        let mut slots = vec![];
        for el in elems {
          let ExprKind::Name(None, name) = el.k else {
            return err(ErrorKind::InvalidTupleLVal, el.span)
          };
          slots.push((name, self.lookup_or_bind(name)));
        }
        self.lower_expr(rhs)?;
        self.blk.push(Op::Destructure, span);
        // The last element ends up on top of the stack.
        for &(name, slot) in slots.iter().rev() {
          self.blk.push(Op::Store(slot), span);
          self.assigned.insert(name);
        }
        Ok(())
      }
      ExprKind::Access(_, _) | ExprKind::FieldAccess(_, _) => {
        let (slot, depth, fields) = self.lval_path(lhs)?;
        self.lower_expr(rhs)?;
        self.blk.push(Op::Update { slot, depth, fields: fields.into_vec().into() }, span);
        Ok(())
      }
      _ => err(ErrorKind::InvalidLValExpression, lhs.span),
    }
  }

  /// Walk an l-value to its root variable, pushing evaluated indices onto
  /// the stack and collecting the field path, outermost first.
  fn lval_path(&mut self, e: &Expr) -> Result<(Slot, u32, SmallVec<[Symbol; 4]>)> {
    match &e.k {
      ExprKind::Name(None, name) => {
        let slot = self.read_var(*name, e.span)?;
        Ok((slot, 0, SmallVec::new()))
      }
      ExprKind::Access(l, idx) => {
        let (slot, depth, fields) = self.lval_path(l)?;
        self.lower_expr(idx)?;
        Ok((slot, depth + 1, fields))
      }
      ExprKind::FieldAccess(l, f) => {
        let (slot, depth, mut fields) = self.lval_path(l)?;
        fields.push(*f);
        Ok((slot, depth, fields))
      }
      _ => err(ErrorKind::InvalidLValExpression, e.span),
    }
  }

  /// The slots assigned anywhere in a statement list, for loop
  /// modified-sets.
  fn modified_slots(&self, body: &[Stmt]) -> BitSet {
    fn roots(e: &Expr, out: &mut Vec<Symbol>) {
      match &e.k {
        ExprKind::Name(None, s) => out.push(*s),
        ExprKind::TupleCon(es) => for e in es { roots(e, out) },
        ExprKind::Access(l, _) | ExprKind::FieldAccess(l, _) => roots(l, out),
        _ => {}
      }
    }
    fn walk(stmts: &[Stmt], out: &mut Vec<Symbol>) {
      for s in stmts {
        match &s.k {
          StmtKind::Assign { lhs, .. } => roots(lhs, out),
          StmtKind::If { then, els, .. } => { walk(then, out); walk(els, out) }
          StmtKind::While { body, .. } | StmtKind::DoWhile { body, .. } |
          StmtKind::For { body, .. } => walk(body, out),
          StmtKind::Switch { cases, .. } => for c in cases { walk(&c.body, out) },
          StmtKind::TryCatch { body, handlers } => {
            walk(body, out);
            for h in handlers { walk(&h.body, out) }
          }
          _ => {}
        }
      }
    }
    let mut names = vec![];
    walk(body, &mut names);
    let mut set = BitSet::new();
    for n in names {
      if let Some(&slot) = self.vars.get(&n) {
        set.insert(slot.0 as usize);
      }
    }
    set
  }

  // ---------------------------------------------------------------------
  // conditions

  /// Emit an `Assert` region that fails with `msg` unless `e` holds.
  fn lower_assert(&mut self, e: &Expr, msg: &str) -> Result<()> {
    let ok = LabelId::fresh();
    self.blk.push(Op::Assert(ok), e.span);
    self.condition(ok, e)?;
    self.blk.push(Op::Fail(msg.into()), e.span);
    self.blk.push(Op::Label(ok), e.span);
    Ok(())
  }

  /// Lower `e` as a condition: fall through on false, branch to `target`
  /// on true.
  fn condition(&mut self, target: LabelId, e: &Expr) -> Result<()> {
    match &e.k {
      ExprKind::Lit(Value::Bool(true)) => {
        self.blk.push(Op::Goto(target), e.span);
        Ok(())
      }
      ExprKind::Lit(Value::Bool(false)) => Ok(()),
      ExprKind::Lit(_) => err(ErrorKind::InvalidBooleanExpression, e.span),
      ExprKind::Unary(Unop::Not, inner) => self.condition_inv(target, inner),
      ExprKind::Binary(Binop::LogicalAnd, a, b) => {
        let out = LabelId::fresh();
        self.condition_inv(out, a)?;
        self.condition(target, b)?;
        self.blk.push_synth(Op::Label(out));
        Ok(())
      }
      ExprKind::Binary(Binop::LogicalOr, a, b) => {
        self.condition(target, a)?;
        self.condition(target, b)
      }
      ExprKind::TypeTest(x, ut) => {
        let (ty, _) = self.res.resolve_type(ut)?;
        let slot = self.slot_of(x)?;
        self.blk.push(Op::IfType(slot, ty, target), e.span);
        Ok(())
      }
      ExprKind::Binary(op, a, b) if op.as_cmp().is_some() => {
        let cmp = op.as_cmp().expect("checked");
        // Equality against null specialises to a type test.
        if_chain! {
          if cmp == Cmp::Eq || cmp == Cmp::Ne;
          if let Some(x) = null_test_subject(a, b);
          then {
            let slot = self.slot_of(x)?;
            if cmp == Cmp::Eq {
              self.blk.push(Op::IfType(slot, Type::null(), target), e.span);
            } else {
              let skip = LabelId::fresh();
              self.blk.push(Op::IfType(slot, Type::null(), skip), e.span);
              self.blk.push(Op::Goto(target), e.span);
              self.blk.push_synth(Op::Label(skip));
            }
            return Ok(())
          }
        }
        self.lower_expr(a)?;
        self.lower_expr(b)?;
        self.blk.push(Op::IfGoto(cmp, target), e.span);
        Ok(())
      }
      // Everything else must evaluate to a boolean.
      _ => {
        self.lower_expr(e)?;
        self.blk.push(Op::Const(Value::Bool(true)), e.span);
        self.blk.push(Op::IfGoto(Cmp::Eq, target), e.span);
        Ok(())
      }
    }
  }

  /// Lower `e` as an inverted condition: fall through on true, branch to
  /// `target` on false.
  fn condition_inv(&mut self, target: LabelId, e: &Expr) -> Result<()> {
    match &e.k {
      ExprKind::Lit(Value::Bool(false)) => {
        self.blk.push(Op::Goto(target), e.span);
        Ok(())
      }
      ExprKind::Lit(Value::Bool(true)) => Ok(()),
      ExprKind::Unary(Unop::Not, inner) => self.condition(target, inner),
      ExprKind::Binary(Binop::LogicalAnd, a, b) => {
        self.condition_inv(target, a)?;
        self.condition_inv(target, b)
      }
      ExprKind::Binary(Binop::LogicalOr, a, b) => {
        let out = LabelId::fresh();
        self.condition(out, a)?;
        self.condition_inv(target, b)?;
        self.blk.push_synth(Op::Label(out));
        Ok(())
      }
      ExprKind::Binary(op, a, b) if op.as_cmp().is_some() => {
        let cmp = op.as_cmp().expect("checked");
        if_chain! {
          if cmp == Cmp::Eq || cmp == Cmp::Ne;
          if let Some(x) = null_test_subject(a, b);
          then {
            let slot = self.slot_of(x)?;
            if cmp == Cmp::Ne {
              self.blk.push(Op::IfType(slot, Type::null(), target), e.span);
            } else {
              let skip = LabelId::fresh();
              self.blk.push(Op::IfType(slot, Type::null(), skip), e.span);
              self.blk.push(Op::Goto(target), e.span);
              self.blk.push_synth(Op::Label(skip));
            }
            return Ok(())
          }
        }
        if let Some(neg) = cmp.negate() {
          self.lower_expr(a)?;
          self.lower_expr(b)?;
          self.blk.push(Op::IfGoto(neg, target), e.span);
          return Ok(())
        }
        self.generic_inv(target, e)
      }
      _ => self.generic_inv(target, e),
    }
  }

  fn generic_inv(&mut self, target: LabelId, e: &Expr) -> Result<()> {
    let t = LabelId::fresh();
    self.condition(t, e)?;
    self.blk.push(Op::Goto(target), e.span);
    self.blk.push_synth(Op::Label(t));
    Ok(())
  }

  /// The slot holding the value of `e`: a variable's own slot, or a fresh
  /// slot the evaluated value is parked in.
  fn slot_of(&mut self, e: &Expr) -> Result<Slot> {
    if let ExprKind::Name(None, name) = e.k {
      if self.vars.contains_key(&name) {
        return self.read_var(name, e.span)
      }
    }
    self.lower_expr(e)?;
    let slot = self.alloc_slot();
    self.blk.push(Op::Store(slot), e.span);
    Ok(slot)
  }

  /// Materialise a boolean-shaped expression through a pair of forward
  /// labels.
  fn lower_bool(&mut self, e: &Expr) -> Result<()> {
    let t = LabelId::fresh();
    let done = LabelId::fresh();
    self.condition(t, e)?;
    self.blk.push(Op::Const(Value::Bool(false)), e.span);
    self.blk.push_synth(Op::Goto(done));
    self.blk.push_synth(Op::Label(t));
    self.blk.push(Op::Const(Value::Bool(true)), e.span);
    self.blk.push_synth(Op::Label(done));
    Ok(())
  }

  // ---------------------------------------------------------------------
  // expressions

  /// Lower an expression, pushing its value onto the stack.
  fn lower_expr(&mut self, e: &Expr) -> Result<()> {
    match &e.k {
      ExprKind::Lit(v) => {
        self.blk.push(Op::Const(v.clone()), e.span);
        Ok(())
      }
      ExprKind::This => {
        let slot = self.read_var(intern("this"), e.span)?;
        self.blk.push(Op::Load(slot), e.span);
        Ok(())
      }
      ExprKind::Name(m, s) => {
        if m.is_none() && self.vars.contains_key(s) {
          let slot = self.read_var(*s, e.span)?;
          self.blk.push(Op::Load(slot), e.span);
          return Ok(())
        }
        let Some(name) = self.res.env().resolve_name(*m, *s) else {
          return err(ErrorKind::UnknownVariable(*s), e.span)
        };
        if let Some((_, ty)) = self.res.env().function(name) {
          self.blk.push(Op::Const(Value::Fun(name, ty)), e.span);
          return Ok(())
        }
        let v = ConstEvaluator::new(self.res.env()).evaluate_name(name, e)?;
        self.blk.push(Op::Const(v), e.span);
        Ok(())
      }
      ExprKind::FunConst(m, s) => {
        let Some(name) = self.res.env().resolve_name(*m, *s) else {
          return err(ErrorKind::UnknownFunctionOrMethod(*s), e.span)
        };
        let Some((_, ty)) = self.res.env().function(name) else {
          return err(ErrorKind::UnknownFunctionOrMethod(*s), e.span)
        };
        self.blk.push(Op::Const(Value::Fun(name, ty)), e.span);
        Ok(())
      }
      ExprKind::Binary(op, a, b) => self.lower_binary(e.span, *op, a, b, e),
      ExprKind::Unary(op, a) => match op {
        Unop::Not => self.lower_bool(e),
        Unop::Len => {
          self.lower_expr(a)?;
          self.blk.push(Op::ListLength, e.span);
          Ok(())
        }
        Unop::Deref => {
          self.lower_expr(a)?;
          self.blk.push(Op::ProcLoad, e.span);
          Ok(())
        }
        Unop::Neg => {
          // Fold a negated literal, else subtract from zero.
          if let ExprKind::Lit(v) = &a.k {
            if let Some(v) = Unop::Neg.apply(v) {
              self.blk.push(Op::Const(v), e.span);
              return Ok(())
            }
          }
          self.blk.push(Op::Const(Value::int(0)), e.span);
          self.lower_expr(a)?;
          self.blk.push(Op::BinOp(Binop::Sub), e.span);
          Ok(())
        }
      },
      ExprKind::ListCon(es) => {
        for el in es { self.lower_expr(el)? }
        self.blk.push(Op::NewList(count(es)), e.span);
        Ok(())
      }
      ExprKind::SetCon(es) => {
        for el in es { self.lower_expr(el)? }
        self.blk.push(Op::NewSet(count(es)), e.span);
        Ok(())
      }
      ExprKind::TupleCon(es) => {
        for el in es { self.lower_expr(el)? }
        self.blk.push(Op::NewTuple(count(es)), e.span);
        Ok(())
      }
      ExprKind::DictCon(kvs) => {
        for (k, v) in kvs {
          self.lower_expr(k)?;
          self.lower_expr(v)?;
        }
        self.blk.push(Op::NewDict(u32::try_from(kvs.len()).expect("arity")), e.span);
        Ok(())
      }
      ExprKind::RecordCon(fields) => {
        // Fields are evaluated and laid out in alphabetical order.
        let mut sorted = fields.iter().collect::<Vec<_>>();
        sorted.sort_by_key(|&&(name, _)| name.as_str());
        let mut tys = vec![];
        for (name, el) in &sorted {
          self.lower_expr(el)?;
          tys.push((*name, Type::any()));
        }
        self.blk.push(Op::NewRecord(Type::record(false, &tys)), e.span);
        Ok(())
      }
      ExprKind::Access(a, i) => {
        self.lower_expr(a)?;
        self.lower_expr(i)?;
        self.blk.push(Op::ListLoad, e.span);
        Ok(())
      }
      ExprKind::SubList(a, i, j) => {
        self.lower_expr(a)?;
        self.lower_expr(i)?;
        self.lower_expr(j)?;
        self.blk.push(Op::SubList, e.span);
        Ok(())
      }
      ExprKind::FieldAccess(a, f) => {
        self.lower_expr(a)?;
        self.blk.push(Op::FieldLoad(*f), e.span);
        Ok(())
      }
      ExprKind::Invoke { name, receiver, args, synchronous } =>
        self.lower_invoke(e.span, *name, receiver.as_deref(), args, *synchronous, true),
      ExprKind::Spawn(inner) => {
        self.lower_expr(inner)?;
        self.blk.push(Op::Spawn, e.span);
        Ok(())
      }
      ExprKind::Comprehension { kind, value, sources, condition } =>
        self.lower_comprehension(e.span, *kind, value.as_deref(), sources,
          condition.as_deref()),
      ExprKind::TypeTest(_, _) => self.lower_bool(e),
      ExprKind::Cast(ut, inner) => {
        let (ty, _) = self.res.resolve_type(ut)?;
        self.lower_expr(inner)?;
        self.blk.push(Op::Convert(ty), e.span);
        Ok(())
      }
    }
  }

  fn lower_binary(&mut self, span: FileSpan, op: Binop, a: &Expr, b: &Expr, whole: &Expr,
  ) -> Result<()> {
    match op {
      _ if op.is_value_op() => {
        self.lower_expr(a)?;
        self.lower_expr(b)?;
        self.blk.push(Op::BinOp(op), span);
        Ok(())
      }
      Binop::Union => {
        self.lower_expr(a)?;
        self.lower_expr(b)?;
        self.blk.push(Op::SetUnion(il::OpDir::Uniform), span);
        Ok(())
      }
      Binop::Intersect => {
        self.lower_expr(a)?;
        self.lower_expr(b)?;
        self.blk.push(Op::SetIntersect(il::OpDir::Uniform), span);
        Ok(())
      }
      Binop::Difference => {
        self.lower_expr(a)?;
        self.lower_expr(b)?;
        self.blk.push(Op::SetDifference(il::OpDir::Uniform), span);
        Ok(())
      }
      Binop::Append => {
        self.lower_expr(a)?;
        self.lower_expr(b)?;
        self.blk.push(Op::ListAppend(il::OpDir::Uniform), span);
        Ok(())
      }
      // Comparisons and short-circuit operators materialise a boolean.
      _ => self.lower_bool(whole),
    }
  }

  fn lower_invoke(&mut self, span: FileSpan, name: Symbol, receiver: Option<&Expr>,
    args: &[Expr], synchronous: bool, retain: bool,
  ) -> Result<()> {
    let fun_ty = Type::function(&Type::any(), &vec![Type::any(); args.len()]);
    match receiver {
      None => {
        // A local variable holding a function value calls indirectly.
        if self.vars.contains_key(&name) {
          let slot = self.read_var(name, span)?;
          self.blk.push(Op::Load(slot), span);
          for a in args { self.lower_expr(a)? }
          self.blk.push(Op::IndirectInvoke { ty: fun_ty, retain }, span);
          return Ok(())
        }
        let Some(nid) = self.res.env().resolve_name(None, name) else {
          return err(ErrorKind::UnknownFunctionOrMethod(name), span)
        };
        let Some((is_method, _)) = self.res.env().function(nid) else {
          return err(ErrorKind::UnknownFunctionOrMethod(name), span)
        };
        if is_method && self.vars.contains_key(&intern("this")) {
          // A bare call to a same-module method from inside a method:
          // the receiver is `this`.
          let this = self.read_var(intern("this"), span)?;
          self.blk.push(Op::Load(this), span);
          for a in args { self.lower_expr(a)? }
          let ty = Type::method(Some(&Type::any()), &Type::any(),
            &vec![Type::any(); args.len()]);
          self.blk.push(Op::Invoke { name: nid, ty, retain }, span);
        } else {
          for a in args { self.lower_expr(a)? }
          self.blk.push(Op::Invoke { name: nid, ty: fun_ty, retain }, span);
        }
        Ok(())
      }
      Some(recv) => {
        // A local variable holding a method value sends indirectly.
        if self.vars.contains_key(&name) {
          self.lower_expr(recv)?;
          let slot = self.read_var(name, span)?;
          self.blk.push(Op::Load(slot), span);
          for a in args { self.lower_expr(a)? }
          let ty = Type::method(Some(&Type::any()), &Type::any(),
            &vec![Type::any(); args.len()]);
          self.blk.push(Op::IndirectSend { ty, sync: synchronous || retain, retain }, span);
          return Ok(())
        }
        if_chain! {
          if let Some(nid) = self.res.env().resolve_name(None, name);
          if let Some((true, _)) = self.res.env().function(nid);
          then {
            // An actor-reference receiver with a known method: a send.
            self.lower_expr(recv)?;
            for a in args { self.lower_expr(a)? }
            let ty = Type::method(Some(&Type::any()), &Type::any(),
              &vec![Type::any(); args.len()]);
            self.blk.push(Op::Send {
              name: nid, ty, sync: synchronous || retain, retain,
            }, span);
            return Ok(())
          }
        }
        // Otherwise the callee comes from a record field of the receiver.
        self.lower_expr(recv)?;
        self.blk.push(Op::FieldLoad(name), span);
        for a in args { self.lower_expr(a)? }
        self.blk.push(Op::IndirectInvoke { ty: fun_ty, retain }, span);
        Ok(())
      }
    }
  }

  fn lower_comprehension(&mut self, span: FileSpan, kind: CompKind, value: Option<&Expr>,
    sources: &[(Symbol, Expr)], condition: Option<&Expr>,
  ) -> Result<()> {
    match kind {
      CompKind::ListComp | CompKind::SetComp => {
        let is_list = kind == CompKind::ListComp;
        let acc = self.alloc_slot();
        self.blk.push(if is_list { Op::NewList(0) } else { Op::NewSet(0) }, span);
        self.blk.push(Op::Store(acc), span);
        let vars0 = self.vars.clone();
        let assigned0 = self.assigned.clone();
        let mut modified = BitSet::new();
        modified.insert(acc.0 as usize);
        let mut ends = vec![];
        for (var, src) in sources {
          self.lower_expr(src)?;
          let end = LabelId::fresh();
          let slot = self.bind(*var);
          self.assigned.insert(*var);
          self.blk.push(Op::ForAll { slot, end, modified: modified.clone() }, span);
          ends.push(end);
        }
        let skip = LabelId::fresh();
        if let Some(cond) = condition {
          let keep = LabelId::fresh();
          self.condition(keep, cond)?;
          self.blk.push_synth(Op::Goto(skip));
          self.blk.push_synth(Op::Label(keep));
        }
        self.blk.push(Op::Load(acc), span);
        self.lower_expr(value.expect("list and set comprehensions carry a value"))?;
        if is_list {
          self.blk.push(Op::NewList(1), span);
          self.blk.push(Op::ListAppend(il::OpDir::Uniform), span);
        } else {
          self.blk.push(Op::NewSet(1), span);
          self.blk.push(Op::SetUnion(il::OpDir::Uniform), span);
        }
        self.blk.push(Op::Store(acc), span);
        if condition.is_some() {
          self.blk.push_synth(Op::Label(skip));
        }
        for end in ends.into_iter().rev() {
          self.blk.push_synth(Op::End(end));
        }
        self.vars = vars0;
        self.assigned = assigned0;
        self.blk.push(Op::Load(acc), span);
        Ok(())
      }
      CompKind::Some | CompKind::None => {
        let found = LabelId::fresh();
        let done = LabelId::fresh();
        let vars0 = self.vars.clone();
        let assigned0 = self.assigned.clone();
        let mut ends = vec![];
        for (var, src) in sources {
          self.lower_expr(src)?;
          let end = LabelId::fresh();
          let slot = self.bind(*var);
          self.assigned.insert(*var);
          self.blk.push(Op::ForAll { slot, end, modified: BitSet::new() }, span);
          ends.push(end);
        }
        match condition {
          Some(cond) => self.condition(found, cond)?,
          None => self.blk.push(Op::Goto(found), span),
        }
        for end in ends.into_iter().rev() {
          self.blk.push_synth(Op::End(end));
        }
        self.vars = vars0;
        self.assigned = assigned0;
        let on_empty = kind == CompKind::None;
        self.blk.push(Op::Const(Value::Bool(on_empty)), span);
        self.blk.push_synth(Op::Goto(done));
        self.blk.push_synth(Op::Label(found));
        self.blk.push(Op::Const(Value::Bool(!on_empty)), span);
        self.blk.push_synth(Op::Label(done));
        Ok(())
      }
    }
  }
}

/// If one side of a comparison is the `null` literal, the other side is
/// the subject of a null type test.
fn null_test_subject<'a>(a: &'a Expr, b: &'a Expr) -> Option<&'a Expr> {
  match (&a.k, &b.k) {
    (ExprKind::Lit(Value::Null), _) => Some(b),
    (_, ExprKind::Lit(Value::Null)) => Some(a),
    _ => None,
  }
}

fn count(es: &[Expr]) -> u32 {
  u32::try_from(es.len()).expect("aggregate arity")
}

/// Lower a `where` predicate into a constraint block over [`THIS_SLOT`]:
/// the block falls through when the predicate holds and fails with `msg`
/// otherwise.
pub(crate) fn lower_constraint(res: &mut Resolver<'_, '_>, pred: &ast::Expr, msg: &str,
) -> Result<Block> {
  let mut lo = Lowerer::new(res, Type::void());
  let this = lo.bind(Symbol::THIS);
  debug_assert_eq!(this, THIS_SLOT);
  lo.assigned.insert(Symbol::THIS);
  lo.blk = Block::new(1);
  let ok = LabelId::fresh();
  lo.condition(ok, pred)?;
  lo.blk.push(Op::Fail(msg.into()), pred.span);
  lo.blk.push(Op::Label(ok), pred.span);
  if let Some(e) = lo.errors.into_iter().next() { return Err(e) }
  Ok(lo.blk)
}

/// Lower one function or method declaration.
pub(crate) fn lower_fun(res: &mut Resolver<'_, '_>, d: &ast::FunDecl, span: FileSpan,
) -> Result<(il::FunctionDef, Vec<Error>)> {
  let name = NameId::new(res.env().module, d.name);
  debug!("lowering {name}");
  let sig = match res.env().function(name) {
    Some((_, Some(ty))) => ty,
    _ => res.resolve_signature(d)?,
  };
  let (_, ret_constraint) = res.resolve_type(&d.ret)?;
  let ret_ty = sig.ret().unwrap_or_else(Type::void);

  let mut lo = Lowerer::new(res, ret_ty);
  let mut pre = Block::new(0);
  if let ast::FunKind::Method(_) = d.kind {
    let this = intern("this");
    lo.bind(this);
    lo.assigned.insert(this);
  }
  let mut param_constraints = vec![];
  for p in &d.params {
    let slot = lo.bind(p.name);
    lo.assigned.insert(p.name);
    let (_, c) = lo.res.resolve_type(&p.ty)?;
    if let Some(c) = c { param_constraints.push((slot, c)) }
  }
  pre.inputs = lo.next_slot;
  for (slot, c) in param_constraints {
    pre.append(c.relabel().shift(slot.0));
  }
  if let Some(r) = &d.requires {
    lo.blk = Block::new(lo.next_slot);
    lo.lower_assert(r, "precondition not satisfied")?;
    pre.append(mem::take(&mut lo.blk));
  }
  let precondition = if pre.entries.is_empty() { None } else { Some(pre) };

  lo.blk = Block::new(lo.next_slot);
  let falls = lo.stmts(&d.body);
  if falls {
    lo.blk.push(Op::Return(Type::void()), span);
  }
  let body = mem::take(&mut lo.blk);
  let errors = mem::take(&mut lo.errors);
  drop(lo);

  // The postcondition runs over the post-state: slot 0 is the return
  // value and slots >= 1 are shadow copies of the parameters.
  let nparams = u32::try_from(d.params.len()).expect("arity");
  let mut post = Block::new(1 + nparams);
  if let Some(c) = ret_constraint {
    post.append(c.relabel());
  }
  if let Some(ens) = &d.ensures {
    let mut plo = Lowerer::new(res, Type::void());
    plo.bind(Symbol::THIS);
    plo.assigned.insert(Symbol::THIS);
    for p in &d.params {
      plo.bind(p.name);
      plo.assigned.insert(p.name);
    }
    plo.blk = Block::new(1 + nparams);
    plo.lower_assert(ens, "postcondition not satisfied")?;
    post.append(plo.blk);
  }
  let postcondition = if post.entries.is_empty() { None } else { Some(post) };

  Ok((il::FunctionDef {
    name,
    ty: sig,
    precondition,
    postcondition,
    body,
    span,
  }, errors))
}

/// Compile one parsed unit: resolve every declaration, then lower every
/// function. Returns the output module and every error encountered; a
/// failing declaration is skipped, the rest are compiled.
pub fn lower_unit(unit: &ast::SourceFile, loader: &dyn ModuleLoader,
) -> (il::Module, Vec<Error>) {
  debug!("compiling module {}", unit.module);
  let mut env = ModuleEnv::new(loader, unit);
  let mut errors = Resolver::new(&mut env).resolve_all(unit);
  let mut module = il::Module {
    id: unit.module,
    types: vec![],
    constants: vec![],
    functions: vec![],
  };
  for decl in &unit.decls {
    match &decl.k {
      ast::Decl::Type(d) => {
        let name = NameId::new(unit.module, d.name);
        if let Some((ty, constraint)) = env.type_of(name) {
          module.types.push(il::TypeDef { name, ty, constraint });
        }
      }
      ast::Decl::Const(d) => {
        let name = NameId::new(unit.module, d.name);
        if let Some(value) = env.constant(name) {
          module.constants.push(il::ConstDef { name, value });
        }
      }
      ast::Decl::Fun(d) => {
        let mut res = Resolver::new(&mut env);
        match lower_fun(&mut res, d, decl.span) {
          Ok((def, mut errs)) => {
            module.functions.push(def);
            errors.append(&mut errs);
          }
          Err(e) => errors.push(e),
        }
      }
    }
  }
  (module, errors)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::symbol::intern;
  use crate::types::{ModuleId, Spanned};
  use crate::types::ast::{Decl, FunDecl, FunKind, Param, UnresolvedType, UnresolvedTypeKind};
  use crate::types::entity::NoLoader;

  fn sp<T>(k: T) -> Spanned<T> { Spanned { span: FileSpan::unknown(), k } }

  fn lit(n: i64) -> Expr { sp(ExprKind::Lit(Value::int(n))) }

  fn var(s: &str) -> Expr { sp(ExprKind::Name(None, intern(s))) }

  fn int_ty() -> UnresolvedType { sp(UnresolvedTypeKind::Int) }

  fn fun(name: &str, params: Vec<(&str, UnresolvedType)>, body: Vec<Stmt>) -> Decl {
    Decl::Fun(FunDecl {
      name: intern(name),
      kind: FunKind::Function,
      params: params.into_iter()
        .map(|(n, ty)| Param { ty, name: intern(n) })
        .collect(),
      ret: int_ty(),
      requires: None,
      ensures: None,
      body,
    })
  }

  fn compile(decls: Vec<Decl>) -> (il::Module, Vec<Error>) {
    let unit = ast::SourceFile {
      module: ModuleId(intern("test")),
      file: intern("test.whiley"),
      imports: vec![],
      decls: decls.into_iter().map(sp).collect(),
    };
    lower_unit(&unit, &NoLoader)
  }

  fn body_of(m: &il::Module, name: &str) -> Block {
    m.functions.iter()
      .find(|f| f.name.name == intern(name))
      .expect("function not found")
      .body.clone()
  }

  #[test]
  fn destructuring_assignment() {
    // f(): x, y = (1, 2); return x
    let body = vec![
      sp(StmtKind::Assign {
        lhs: sp(ExprKind::TupleCon(vec![var("x"), var("y")])),
        rhs: sp(ExprKind::TupleCon(vec![lit(1), lit(2)])),
      }),
      sp(StmtKind::Return(Some(var("x")))),
    ];
    let (m, errors) = compile(vec![fun("f", vec![], body)]);
    assert!(errors.is_empty(), "{errors:?}");
    let b = body_of(&m, "f");
    let ops = b.entries.iter().map(|e| &e.op).collect::<Vec<_>>();
    // Tuple built, destructured, then stored back-to-front.
    let i = ops.iter().position(|op| matches!(op, Op::Destructure)).unwrap();
    assert!(matches!(ops[i + 1], Op::Store(Slot(1))), "y first");
    assert!(matches!(ops[i + 2], Op::Store(Slot(0))), "x second");
  }

  #[test]
  fn duplicate_case_labels_rejected() {
    let body = vec![sp(StmtKind::Switch {
      subject: var("x"),
      cases: vec![
        ast::SwitchCase { value: Some(lit(1)), body: vec![] },
        ast::SwitchCase { value: Some(lit(1)), body: vec![] },
      ],
    }), sp(StmtKind::Return(Some(lit(0))))];
    let (_, errors) = compile(vec![fun("f", vec![("x", int_ty())], body)]);
    assert!(errors.iter().any(|e| matches!(e,
      Error::Syntax(e) if e.kind == ErrorKind::DuplicateCaseLabel)), "{errors:?}");
  }

  #[test]
  fn duplicate_defaults_rejected() {
    let body = vec![sp(StmtKind::Switch {
      subject: var("x"),
      cases: vec![
        ast::SwitchCase { value: None, body: vec![] },
        ast::SwitchCase { value: None, body: vec![] },
      ],
    }), sp(StmtKind::Return(Some(lit(0))))];
    let (_, errors) = compile(vec![fun("f", vec![("x", int_ty())], body)]);
    assert!(errors.iter().any(|e| matches!(e,
      Error::Syntax(e) if e.kind == ErrorKind::DuplicateDefaultLabel)), "{errors:?}");
  }

  #[test]
  fn while_loop_shape() {
    // f(x): while x < 10: x = x + 1 ; return x
    let body = vec![
      sp(StmtKind::While {
        cond: sp(ExprKind::Binary(Binop::Lt, Box::new(var("x")), Box::new(lit(10)))),
        invariant: None,
        body: vec![sp(StmtKind::Assign {
          lhs: var("x"),
          rhs: sp(ExprKind::Binary(Binop::Add, Box::new(var("x")), Box::new(lit(1)))),
        })],
      }),
      sp(StmtKind::Return(Some(var("x")))),
    ];
    let (m, errors) = compile(vec![fun("f", vec![("x", int_ty())], body)]);
    assert!(errors.is_empty(), "{errors:?}");
    let b = body_of(&m, "f");
    assert!(b.validate().is_ok());
    let Some((end, modified)) = b.entries.iter().find_map(|e| match &e.op {
      Op::Loop { end, modified } => Some((*end, modified.clone())),
      _ => None,
    }) else { panic!("no loop op") };
    assert!(modified.contains(0), "x is modified");
    assert!(b.entries.iter().any(|e| e.op == Op::End(end)));
  }

  #[test]
  fn switch_arms_join_assignments() {
    let assign_v = |n: i64| sp(StmtKind::Assign { lhs: var("v"), rhs: lit(n) });
    // Every arm (including default) assigns v, so v is definitely
    // assigned afterwards.
    let body = vec![
      sp(StmtKind::VarDecl { ty: int_ty(), name: intern("v"), init: None }),
      sp(StmtKind::Switch {
        subject: var("x"),
        cases: vec![
          ast::SwitchCase { value: Some(lit(1)), body: vec![assign_v(1)] },
          ast::SwitchCase { value: Some(lit(2)), body: vec![assign_v(2)] },
          ast::SwitchCase { value: None, body: vec![assign_v(3)] },
        ],
      }),
      sp(StmtKind::Return(Some(var("v")))),
    ];
    let (_, errors) = compile(vec![fun("f", vec![("x", int_ty())], body)]);
    assert!(errors.is_empty(), "{errors:?}");

    // Without a default the fall-through path assigns nothing.
    let body = vec![
      sp(StmtKind::VarDecl { ty: int_ty(), name: intern("v"), init: None }),
      sp(StmtKind::Switch {
        subject: var("x"),
        cases: vec![ast::SwitchCase { value: Some(lit(1)), body: vec![assign_v(1)] }],
      }),
      sp(StmtKind::Return(Some(var("v")))),
    ];
    let (_, errors) = compile(vec![fun("g", vec![("x", int_ty())], body)]);
    assert!(errors.iter().any(|e| matches!(e,
      Error::Syntax(e) if matches!(e.kind, ErrorKind::VariablePossiblyUninitialised(_)))),
      "{errors:?}");
  }

  #[test]
  fn invariants_checked_at_entry_and_back_edge() {
    let inv = || sp(ExprKind::Binary(Binop::Ge, Box::new(var("x")), Box::new(lit(0))));
    let bump = sp(StmtKind::Assign {
      lhs: var("x"),
      rhs: sp(ExprKind::Binary(Binop::Add, Box::new(var("x")), Box::new(lit(1)))),
    });
    let body = vec![
      sp(StmtKind::DoWhile {
        cond: sp(ExprKind::Binary(Binop::Lt, Box::new(var("x")), Box::new(lit(10)))),
        invariant: Some(inv()),
        body: vec![bump],
      }),
      sp(StmtKind::Return(Some(var("x")))),
    ];
    let (m, errors) = compile(vec![fun("f", vec![("x", int_ty())], body)]);
    assert!(errors.is_empty(), "{errors:?}");
    let b = body_of(&m, "f");
    assert_eq!(b.entries.iter().filter(|e| matches!(e.op, Op::Assert(_))).count(), 2);

    let body = vec![
      sp(StmtKind::For {
        var: intern("i"),
        source: var("xs"),
        invariant: Some(inv()),
        body: vec![],
      }),
      sp(StmtKind::Return(Some(lit(0)))),
    ];
    let (m, errors) = compile(vec![
      fun("g", vec![("x", int_ty()), ("xs", int_ty())], body)]);
    assert!(errors.is_empty(), "{errors:?}");
    let b = body_of(&m, "g");
    assert_eq!(b.entries.iter().filter(|e| matches!(e.op, Op::Assert(_))).count(), 2);
  }

  #[test]
  fn break_outside_loop_rejected() {
    let body = vec![sp(StmtKind::Break), sp(StmtKind::Return(Some(lit(0))))];
    let (_, errors) = compile(vec![fun("f", vec![], body)]);
    assert!(errors.iter().any(|e| matches!(e,
      Error::Syntax(e) if e.kind == ErrorKind::BreakOutsideLoop)), "{errors:?}");
  }

  #[test]
  fn unknown_variable_rejected() {
    let body = vec![sp(StmtKind::Return(Some(var("nope"))))];
    let (_, errors) = compile(vec![fun("f", vec![], body)]);
    assert!(errors.iter().any(|e| matches!(e,
      Error::Syntax(e) if matches!(e.kind, ErrorKind::UnknownVariable(_)))), "{errors:?}");
  }

  #[test]
  fn uninitialised_read_rejected() {
    let body = vec![
      sp(StmtKind::VarDecl { ty: int_ty(), name: intern("x"), init: None }),
      sp(StmtKind::Return(Some(var("x")))),
    ];
    let (_, errors) = compile(vec![fun("f", vec![], body)]);
    assert!(errors.iter().any(|e| matches!(e,
      Error::Syntax(e) if matches!(e.kind, ErrorKind::VariablePossiblyUninitialised(_)))),
      "{errors:?}");
  }

  #[test]
  fn unreachable_code_rejected() {
    let body = vec![
      sp(StmtKind::Return(Some(lit(1)))),
      sp(StmtKind::Return(Some(lit(2)))),
    ];
    let (_, errors) = compile(vec![fun("f", vec![], body)]);
    assert!(errors.iter().any(|e| matches!(e,
      Error::Syntax(e) if e.kind == ErrorKind::UnreachableCode)), "{errors:?}");
  }

  #[test]
  fn nested_update_shape() {
    // f(a, i): a[i].x = 1; return 0
    let lhs = sp(ExprKind::FieldAccess(
      Box::new(sp(ExprKind::Access(Box::new(var("a")), Box::new(var("i"))))),
      intern("x")));
    let body = vec![
      sp(StmtKind::Assign { lhs, rhs: lit(1) }),
      sp(StmtKind::Return(Some(lit(0)))),
    ];
    let (m, errors) = compile(vec![
      fun("f", vec![("a", int_ty()), ("i", int_ty())], body)]);
    assert!(errors.is_empty(), "{errors:?}");
    let b = body_of(&m, "f");
    let up = b.entries.iter().find_map(|e| match &e.op {
      Op::Update { slot, depth, fields } => Some((*slot, *depth, fields.clone())),
      _ => None,
    }).expect("no update");
    assert_eq!(up, (Slot(0), 1, vec![intern("x")].into()));
  }

  #[test]
  fn invoke_dispatch() {
    // g(x): return x ; f(h): h(1); g(2); return 0
    let g = fun("g", vec![("x", int_ty())], vec![sp(StmtKind::Return(Some(var("x"))))]);
    let body = vec![
      sp(StmtKind::Expr(sp(ExprKind::Invoke {
        name: intern("h"), receiver: None, args: vec![lit(1)], synchronous: false,
      }))),
      sp(StmtKind::Expr(sp(ExprKind::Invoke {
        name: intern("g"), receiver: None, args: vec![lit(2)], synchronous: false,
      }))),
      sp(StmtKind::Return(Some(lit(0)))),
    ];
    let f = fun("f", vec![("h", int_ty())], body);
    let (m, errors) = compile(vec![g, f]);
    assert!(errors.is_empty(), "{errors:?}");
    let b = body_of(&m, "f");
    assert!(b.entries.iter().any(|e| matches!(e.op, Op::IndirectInvoke { retain: false, .. })));
    assert!(b.entries.iter().any(|e| matches!(e.op,
      Op::Invoke { name, retain: false, .. } if name.name == intern("g"))));
  }

  #[test]
  fn record_fields_alphabetised() {
    // f(): return {y: 1, x: 2}
    let body = vec![sp(StmtKind::Return(Some(sp(ExprKind::RecordCon(vec![
      (intern("y"), lit(1)),
      (intern("x"), lit(2)),
    ])))))];
    let (m, errors) = compile(vec![fun("f", vec![], body)]);
    assert!(errors.is_empty(), "{errors:?}");
    let b = body_of(&m, "f");
    // x's value (2) is evaluated before y's value (1).
    let consts = b.entries.iter().filter_map(|e| match &e.op {
      Op::Const(Value::Int(n)) => Some(n.clone()),
      _ => None,
    }).collect::<Vec<_>>();
    assert_eq!(consts, vec![2.into(), 1.into()]);
  }

  #[test]
  fn list_comprehension_shape() {
    // f(xs): return [x + 1 | x in xs]
    let comp = sp(ExprKind::Comprehension {
      kind: CompKind::ListComp,
      value: Some(Box::new(sp(ExprKind::Binary(Binop::Add,
        Box::new(var("x")), Box::new(lit(1)))))),
      sources: vec![(intern("x"), var("xs"))],
      condition: None,
    });
    let body = vec![sp(StmtKind::Return(Some(comp)))];
    let (m, errors) = compile(vec![fun("f", vec![("xs", int_ty())], body)]);
    assert!(errors.is_empty(), "{errors:?}");
    let b = body_of(&m, "f");
    assert!(b.validate().is_ok());
    assert!(b.entries.iter().any(|e| matches!(e.op, Op::ForAll { .. })));
    assert!(b.entries.iter().any(|e| matches!(e.op, Op::NewList(0))));
    assert!(b.entries.iter().any(|e| matches!(e.op, Op::ListAppend(_))));
  }

  #[test]
  fn null_test_specialises() {
    // f(x): if x == null: return 0 ; return 1
    let body = vec![
      sp(StmtKind::If {
        cond: sp(ExprKind::Binary(Binop::Eq,
          Box::new(var("x")), Box::new(sp(ExprKind::Lit(Value::Null))))),
        then: vec![sp(StmtKind::Return(Some(lit(0))))],
        els: vec![],
      }),
      sp(StmtKind::Return(Some(lit(1)))),
    ];
    let (m, errors) = compile(vec![fun("f", vec![("x", int_ty())], body)]);
    assert!(errors.is_empty(), "{errors:?}");
    let b = body_of(&m, "f");
    assert!(b.entries.iter().any(|e| matches!(&e.op,
      Op::IfType(Slot(0), ty, _) if *ty == Type::null())), "null test not specialised");
  }
}
