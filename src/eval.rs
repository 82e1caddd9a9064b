//! The constant evaluator.
//!
//! Constant declarations are folded by a recursive walk over their defining
//! expressions. A name encountered twice within one call chain is a cyclic
//! declaration. Results are memoised into the entity table, so each
//! constant is folded at most once per compilation unit.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{err, ErrorKind, Result};
use crate::types::{Binop, NameId, Value};
use crate::types::ast::{Expr, ExprKind};
use crate::types::entity::{ConstTc, Entity, ModuleEnv};

/// The constant folding engine. Holds the visiting chain for cycle
/// detection.
pub struct ConstEvaluator<'a, 'l> {
  env: &'a mut ModuleEnv<'l>,
  visiting: Vec<NameId>,
}

impl<'a, 'l> ConstEvaluator<'a, 'l> {
  /// Create an evaluator over the given resolver state.
  pub fn new(env: &'a mut ModuleEnv<'l>) -> Self {
    ConstEvaluator { env, visiting: vec![] }
  }

  /// Evaluate the named constant, memoising the result. Fails with
  /// `CyclicConstant` if the name is already being evaluated further up
  /// the call chain.
  pub fn evaluate_name(&mut self, name: NameId, at: &Expr) -> Result<Value> {
    if let Some(v) = self.env.constant(name) { return Ok(v) }
    if self.visiting.contains(&name) {
      return err(ErrorKind::CyclicConstant(name.name), at.span)
    }
    let e = match self.env.names.get(&name) {
      Some(Entity::Const(ConstTc::Unresolved(e))) => e.clone(),
      Some(_) => return err(ErrorKind::NonConstantExpression, at.span),
      None => return err(ErrorKind::Resolve(name.to_string()), at.span),
    };
    self.visiting.push(name);
    let v = self.eval(&e);
    self.visiting.pop();
    let v = v?;
    self.env.names.insert(name, Entity::Const(ConstTc::Evaluated(v.clone())));
    Ok(v)
  }

  /// Fold an expression to a value, or fail with `NonConstantExpression`
  /// (or a more specific kind) if it is not a compile-time constant.
  pub fn eval(&mut self, e: &Expr) -> Result<Value> {
    match &e.k {
      ExprKind::Lit(v) => Ok(v.clone()),
      ExprKind::Name(m, s) => {
        let Some(name) = self.env.resolve_name(*m, *s) else {
          return err(ErrorKind::Resolve(s.to_string()), e.span)
        };
        // A function name folds to a deferred function reference.
        if let Some((_, ty)) = self.env.function(name) {
          return Ok(Value::Fun(name, ty))
        }
        self.evaluate_name(name, e)
      }
      ExprKind::FunConst(m, s) => {
        let Some(name) = self.env.resolve_name(*m, *s) else {
          return err(ErrorKind::Resolve(s.to_string()), e.span)
        };
        match self.env.function(name) {
          Some((_, ty)) => Ok(Value::Fun(name, ty)),
          None => err(ErrorKind::UnknownFunctionOrMethod(*s), e.span),
        }
      }
      ExprKind::Binary(op, a, b) => {
        let va = self.eval(a)?;
        let vb = self.eval(b)?;
        match op.apply(&va, &vb) {
          Some(v) => Ok(v),
          None => err(binop_error(*op), e.span),
        }
      }
      ExprKind::Unary(op, a) => {
        let va = self.eval(a)?;
        match op.apply(&va) {
          Some(v) => Ok(v),
          None => err(ErrorKind::InvalidNumericExpression, e.span),
        }
      }
      ExprKind::ListCon(es) => Ok(Value::List(
        es.iter().map(|e| self.eval(e)).collect::<Result<_>>()?)),
      ExprKind::SetCon(es) => Ok(Value::Set(
        es.iter().map(|e| self.eval(e)).collect::<Result<BTreeSet<_>>>()?)),
      ExprKind::TupleCon(es) => Ok(Value::Tuple(
        es.iter().map(|e| self.eval(e)).collect::<Result<_>>()?)),
      ExprKind::DictCon(kvs) => Ok(Value::Dict(kvs.iter()
        .map(|(k, v)| Ok((self.eval(k)?, self.eval(v)?)))
        .collect::<Result<BTreeMap<_, _>>>()?)),
      ExprKind::RecordCon(fields) => Ok(Value::record(fields.iter()
        .map(|(name, e)| Ok((*name, self.eval(e)?)))
        .collect::<Result<Vec<_>>>()?)),
      ExprKind::FieldAccess(rec, name) => {
        let v = self.eval(rec)?;
        if let Value::Record(fields) = &v {
          if let Some((_, v)) = fields.iter().find(|(f, _)| f == name) {
            return Ok(v.clone())
          }
        }
        err(ErrorKind::NonConstantExpression, e.span)
      }
      ExprKind::Access(list, idx) => {
        let vl = self.eval(list)?;
        let vi = self.eval(idx)?;
        match (&vl, &vi) {
          (Value::List(l), Value::Int(i)) =>
            match usize::try_from(i).ok().and_then(|i| l.get(i)) {
              Some(v) => Ok(v.clone()),
              None => err(ErrorKind::InvalidListExpression, e.span),
            },
          (Value::Dict(d), k) => match d.get(k) {
            Some(v) => Ok(v.clone()),
            None => err(ErrorKind::InvalidListExpression, e.span),
          },
          _ => err(ErrorKind::InvalidListExpression, e.span),
        }
      }
      // Invocations, variable references, comprehensions and the rest are
      // not compile-time constants.
      ExprKind::This | ExprKind::SubList(_, _, _) | ExprKind::Invoke { .. } |
      ExprKind::Spawn(_) | ExprKind::Comprehension { .. } |
      ExprKind::TypeTest(_, _) | ExprKind::Cast(_, _) =>
        err(ErrorKind::NonConstantExpression, e.span),
    }
  }
}

/// The error kind for a binary operation that failed to fold, by the class
/// of the operation.
fn binop_error(op: Binop) -> ErrorKind {
  match op {
    Binop::Add | Binop::Sub | Binop::Mul | Binop::Div | Binop::Rem |
    Binop::Range | Binop::Shl | Binop::Shr => ErrorKind::InvalidNumericExpression,
    Binop::And | Binop::Or | Binop::Xor |
    Binop::LogicalAnd | Binop::LogicalOr => ErrorKind::InvalidBooleanExpression,
    Binop::Union | Binop::Intersect | Binop::Difference |
    Binop::Subset | Binop::SubsetEq => ErrorKind::InvalidSetExpression,
    Binop::Append => ErrorKind::InvalidListExpression,
    _ => ErrorKind::InvalidBinaryExpression,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::Error;
  use crate::symbol::intern;
  use crate::types::{ast, FileSpan, ModuleId, Spanned};
  use crate::types::entity::NoLoader;

  fn sp<T>(k: T) -> Spanned<T> { Spanned { span: FileSpan::unknown(), k } }

  fn lit(n: i64) -> Expr { sp(ExprKind::Lit(Value::int(n))) }

  fn name(s: &str) -> Expr { sp(ExprKind::Name(None, intern(s))) }

  fn bin(op: Binop, a: Expr, b: Expr) -> Expr {
    sp(ExprKind::Binary(op, Box::new(a), Box::new(b)))
  }

  fn unit_with(consts: &[(&str, Expr)]) -> ast::SourceFile {
    ast::SourceFile {
      module: ModuleId(intern("test")),
      file: intern("test.whiley"),
      imports: vec![],
      decls: consts.iter().map(|(n, e)| sp(ast::Decl::Const(ast::ConstDecl {
        name: intern(n),
        value: e.clone(),
      }))).collect(),
    }
  }

  #[test]
  fn folds_through_names() {
    let unit = unit_with(&[
      ("A", bin(Binop::Add, name("B"), lit(1))),
      ("B", lit(2)),
    ]);
    let loader = NoLoader;
    let mut env = ModuleEnv::new(&loader, &unit);
    let a = NameId::new(env.module, intern("A"));
    let v = ConstEvaluator::new(&mut env).evaluate_name(a, &lit(0)).unwrap();
    assert_eq!(v, Value::int(3));
    // Memoised.
    assert_eq!(env.constant(a), Some(Value::int(3)));
  }

  #[test]
  fn detects_cycles() {
    let unit = unit_with(&[
      ("A", bin(Binop::Add, name("B"), lit(1))),
      ("B", bin(Binop::Add, name("A"), lit(1))),
    ]);
    let loader = NoLoader;
    let mut env = ModuleEnv::new(&loader, &unit);
    let a = NameId::new(env.module, intern("A"));
    let e = ConstEvaluator::new(&mut env).evaluate_name(a, &lit(0)).unwrap_err();
    let Error::Syntax(e) = e else { panic!("expected a syntax error") };
    assert!(matches!(e.kind, ErrorKind::CyclicConstant(_)));
  }

  #[test]
  fn rejects_non_constants() {
    let unit = unit_with(&[("A", sp(ExprKind::Invoke {
      name: intern("f"),
      receiver: None,
      args: vec![],
      synchronous: false,
    }))]);
    let loader = NoLoader;
    let mut env = ModuleEnv::new(&loader, &unit);
    let a = NameId::new(env.module, intern("A"));
    let e = ConstEvaluator::new(&mut env).evaluate_name(a, &lit(0)).unwrap_err();
    let Error::Syntax(e) = e else { panic!("expected a syntax error") };
    assert_eq!(e.kind, ErrorKind::NonConstantExpression);
  }

  #[test]
  fn folds_aggregates() {
    let unit = unit_with(&[("A", sp(ExprKind::RecordCon(vec![
      (intern("y"), lit(2)),
      (intern("x"), sp(ExprKind::ListCon(vec![lit(1), lit(2)]))),
    ])))]);
    let loader = NoLoader;
    let mut env = ModuleEnv::new(&loader, &unit);
    let a = NameId::new(env.module, intern("A"));
    let v = ConstEvaluator::new(&mut env).evaluate_name(a, &lit(0)).unwrap();
    let Value::Record(fields) = v else { panic!() };
    assert_eq!(fields[0].0, intern("x"));
    assert_eq!(fields[1].0, intern("y"));
  }

  #[test]
  fn division_by_zero_rejected() {
    let unit = unit_with(&[("A", bin(Binop::Div, lit(1), lit(0)))]);
    let loader = NoLoader;
    let mut env = ModuleEnv::new(&loader, &unit);
    let a = NameId::new(env.module, intern("A"));
    let e = ConstEvaluator::new(&mut env).evaluate_name(a, &lit(0)).unwrap_err();
    let Error::Syntax(e) = e else { panic!() };
    assert_eq!(e.kind, ErrorKind::InvalidNumericExpression);
  }
}
