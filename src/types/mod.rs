//! Types used in the stages of the compiler.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::ops::{Index, IndexMut};

use num::{BigInt, BigRational, One, Zero};

use crate::symbol::Symbol;

/// A trait for newtyped indices, mostly used by [`IdxVec`].
pub trait Idx: Copy + Eq {
  /// Convert the index into a `usize`.
  fn into_usize(self) -> usize;
  /// Convert a `usize` into an index.
  fn from_usize(_: usize) -> Self;
  /// Generate a fresh index from a counter.
  fn fresh(&mut self) -> Self {
    let n = *self;
    *self = Self::from_usize(self.into_usize() + 1);
    n
  }
}

impl Idx for u32 {
  fn into_usize(self) -> usize { self as usize }
  fn from_usize(n: usize) -> Self { n as u32 }
}

/// Declare a newtyped `u32` index implementing [`Idx`].
macro_rules! mk_id {
  ($($(#[$attr:meta])* $name:ident),* $(,)?) => {$(
    $(#[$attr])*
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
    pub struct $name(pub u32);

    impl $crate::types::Idx for $name {
      fn into_usize(self) -> usize { self.0 as usize }
      fn from_usize(n: usize) -> Self { Self(n as u32) }
    }

    impl From<usize> for $name {
      fn from(n: usize) -> Self { $crate::types::Idx::from_usize(n) }
    }
  )*}
}
pub(crate) use mk_id;

pub mod ast;
pub mod entity;
pub mod il;
pub mod ty;

/// A vector indexed by a newtyped index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IdxVec<I, T>(pub Vec<T>, std::marker::PhantomData<I>);

impl<I, T> Default for IdxVec<I, T> {
  fn default() -> Self { Self(vec![], std::marker::PhantomData) }
}

impl<I: Idx, T> IdxVec<I, T> {
  /// Construct a new empty [`IdxVec`].
  #[must_use] pub fn new() -> Self { Self::default() }

  /// The number of elements in the vector.
  #[must_use] pub fn len(&self) -> usize { self.0.len() }

  /// Returns true if the vector is empty.
  #[must_use] pub fn is_empty(&self) -> bool { self.0.is_empty() }

  /// Push a new value, returning its index.
  pub fn push(&mut self, val: T) -> I {
    let n = I::from_usize(self.0.len());
    self.0.push(val);
    n
  }

  /// An iterator over the indices and values of the vector.
  pub fn enum_iter(&self) -> impl Iterator<Item = (I, &T)> {
    self.0.iter().enumerate().map(|(i, t)| (I::from_usize(i), t))
  }
}

impl<I: Idx, T> Index<I> for IdxVec<I, T> {
  type Output = T;
  fn index(&self, i: I) -> &T { &self.0[i.into_usize()] }
}

impl<I: Idx, T> IndexMut<I> for IdxVec<I, T> {
  fn index_mut(&mut self, i: I) -> &mut T { &mut self.0[i.into_usize()] }
}

/// A source position: file, line and column. This is the only positional
/// attribute the front end copies from the AST onto emitted code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FileSpan {
  /// The (interned) name of the source file.
  pub file: Symbol,
  /// The 1-based source line.
  pub line: u32,
  /// The 1-based source column.
  pub col: u32,
}

impl FileSpan {
  /// A span for synthesised nodes that have no source position.
  #[must_use] pub fn unknown() -> Self {
    FileSpan { file: crate::symbol::intern("<unknown>"), line: 0, col: 0 }
  }
}

impl fmt::Display for FileSpan {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}:{}", self.file, self.line, self.col)
  }
}

/// A spanned value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Spanned<T> {
  /// The span of the value.
  pub span: FileSpan,
  /// The data (the `k` stands for `kind` because it's often a `*Kind` enum
  /// but it can be anything).
  pub k: T,
}

impl<T> Spanned<T> {
  /// Transform a `Spanned<T>` into `Spanned<U>` given `f: T -> U`.
  pub fn map_into<U>(self, f: impl FnOnce(T) -> U) -> Spanned<U> {
    Spanned { span: self.span, k: f(self.k) }
  }
}

/// A fully qualified module path, e.g. `std/lang`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(pub Symbol);

impl fmt::Display for ModuleId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { self.0.fmt(f) }
}

/// A fully qualified name: a module path plus a declaration name.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NameId {
  /// The module the name is declared in.
  pub module: ModuleId,
  /// The declaration name.
  pub name: Symbol,
}

impl NameId {
  /// Construct a name from a module and a declaration name.
  #[must_use] pub fn new(module: ModuleId, name: Symbol) -> Self { NameId { module, name } }
}

impl fmt::Display for NameId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}", self.module, self.name)
  }
}

/// Binary operations, as they appear in the surface syntax. Only the
/// value-producing subset ([`Binop::is_value_op`]) may appear on a
/// [`BinOp`](il::Op::BinOp) instruction; comparisons lower to
/// [`IfGoto`](il::Op::IfGoto) and the remainder lower to dedicated
/// aggregate instructions.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Binop {
  /// Addition, `x + y`.
  Add,
  /// Subtraction, `x - y`.
  Sub,
  /// Multiplication, `x * y`.
  Mul,
  /// Division, `x / y`. Integer division truncates.
  Div,
  /// Remainder, `x % y`.
  Rem,
  /// Integer range, `x .. y`, producing the list `[x, x+1, ..., y-1]`.
  Range,
  /// Boolean or bitwise AND.
  And,
  /// Boolean or bitwise OR.
  Or,
  /// Boolean or bitwise XOR.
  Xor,
  /// Shift left, `x << y`.
  Shl,
  /// Shift right, `x >> y`.
  Shr,
  /// Set union, `x ∪ y`.
  Union,
  /// Set intersection, `x ∩ y`.
  Intersect,
  /// Set difference, `x \ y`.
  Difference,
  /// List or string concatenation, `x ++ y`.
  Append,
  /// Equality, `x == y`.
  Eq,
  /// Disequality, `x != y`.
  Ne,
  /// Less than, `x < y`.
  Lt,
  /// Less or equal, `x <= y`.
  Le,
  /// Greater than, `x > y`.
  Gt,
  /// Greater or equal, `x >= y`.
  Ge,
  /// Element test, `x in y`.
  ElemOf,
  /// Strict subset, `x ⊂ y`.
  Subset,
  /// Subset or equal, `x ⊆ y`.
  SubsetEq,
  /// Short-circuit boolean AND, `x && y`. Lowered to control flow.
  LogicalAnd,
  /// Short-circuit boolean OR, `x || y`. Lowered to control flow.
  LogicalOr,
}

impl Binop {
  /// Return a string representation of the [`Binop`].
  #[must_use] pub fn to_str(self) -> &'static str {
    match self {
      Binop::Add => "+",
      Binop::Sub => "-",
      Binop::Mul => "*",
      Binop::Div => "/",
      Binop::Rem => "%",
      Binop::Range => "..",
      Binop::And => "&",
      Binop::Or => "|",
      Binop::Xor => "^",
      Binop::Shl => "<<",
      Binop::Shr => ">>",
      Binop::Union => "+",
      Binop::Intersect => "&",
      Binop::Difference => "-",
      Binop::Append => "++",
      Binop::Eq => "==",
      Binop::Ne => "!=",
      Binop::Lt => "<",
      Binop::Le => "<=",
      Binop::Gt => ">",
      Binop::Ge => ">=",
      Binop::ElemOf => "in",
      Binop::Subset => "<",
      Binop::SubsetEq => "<=",
      Binop::LogicalAnd => "&&",
      Binop::LogicalOr => "||",
    }
  }

  /// Returns true if this operation may appear on a `BinOp` instruction,
  /// i.e. it pops two values and pushes their combination.
  #[must_use] pub fn is_value_op(self) -> bool {
    matches!(self,
      Binop::Add | Binop::Sub | Binop::Mul | Binop::Div | Binop::Rem |
      Binop::Range | Binop::And | Binop::Or | Binop::Xor |
      Binop::Shl | Binop::Shr)
  }

  /// The comparison corresponding to this operation, if it is one.
  #[must_use] pub fn as_cmp(self) -> Option<Cmp> {
    match self {
      Binop::Eq => Some(Cmp::Eq),
      Binop::Ne => Some(Cmp::Ne),
      Binop::Lt => Some(Cmp::Lt),
      Binop::Le => Some(Cmp::Le),
      Binop::Gt => Some(Cmp::Gt),
      Binop::Ge => Some(Cmp::Ge),
      Binop::ElemOf => Some(Cmp::ElemOf),
      Binop::Subset => Some(Cmp::Subset),
      Binop::SubsetEq => Some(Cmp::SubsetEq),
      _ => None,
    }
  }

  /// Constant-fold this operation on two values. Returns `None` when the
  /// operation does not apply to the given operand kinds.
  #[must_use] pub fn apply(self, v1: &Value, v2: &Value) -> Option<Value> {
    use Value::*;
    match self {
      Binop::Add | Binop::Sub | Binop::Mul | Binop::Div | Binop::Rem =>
        self.apply_arith(v1, v2),
      Binop::Range => if let (Int(a), Int(b)) = (v1, v2) {
        let mut list = vec![];
        let mut i = a.clone();
        while i < *b {
          list.push(Int(i.clone()));
          i += 1;
        }
        Some(List(list))
      } else { None },
      Binop::And | Binop::LogicalAnd => match (v1, v2) {
        (Bool(a), Bool(b)) => Some(Bool(*a && *b)),
        (Int(a), Int(b)) if self == Binop::And => Some(Int(a & b)),
        _ => None,
      },
      Binop::Or | Binop::LogicalOr => match (v1, v2) {
        (Bool(a), Bool(b)) => Some(Bool(*a || *b)),
        (Int(a), Int(b)) if self == Binop::Or => Some(Int(a | b)),
        _ => None,
      },
      Binop::Xor => match (v1, v2) {
        (Bool(a), Bool(b)) => Some(Bool(*a ^ *b)),
        (Int(a), Int(b)) => Some(Int(a ^ b)),
        _ => None,
      },
      Binop::Shl => if let (Int(a), Int(b)) = (v1, v2) {
        Some(Int(a << usize::try_from(b).ok()?))
      } else { None },
      Binop::Shr => if let (Int(a), Int(b)) = (v1, v2) {
        Some(Int(a >> usize::try_from(b).ok()?))
      } else { None },
      Binop::Union => if let (Set(a), Set(b)) = (v1, v2) {
        Some(Set(a.union(b).cloned().collect()))
      } else { None },
      Binop::Intersect => if let (Set(a), Set(b)) = (v1, v2) {
        Some(Set(a.intersection(b).cloned().collect()))
      } else { None },
      Binop::Difference => if let (Set(a), Set(b)) = (v1, v2) {
        Some(Set(a.difference(b).cloned().collect()))
      } else { None },
      Binop::Append => match (v1, v2) {
        (List(a), List(b)) => Some(List(a.iter().chain(b).cloned().collect())),
        (Str(a), Str(b)) => Some(Str(format!("{a}{b}").into())),
        _ => None,
      },
      _ => self.as_cmp().and_then(|c| c.apply(v1, v2)).map(Bool),
    }
  }

  fn apply_arith(self, v1: &Value, v2: &Value) -> Option<Value> {
    use Value::*;
    match (v1, v2) {
      (Int(a), Int(b)) => Some(match self {
        Binop::Add => Int(a + b),
        Binop::Sub => Int(a - b),
        Binop::Mul => Int(a * b),
        Binop::Div => if b.is_zero() { return None } else { Int(a / b) },
        Binop::Rem => if b.is_zero() { return None } else { Int(a % b) },
        _ => return None,
      }),
      (Real(_), Real(_)) | (Real(_), Int(_)) | (Int(_), Real(_)) => {
        let a = v1.as_rational()?;
        let b = v2.as_rational()?;
        Some(match self {
          Binop::Add => Real(&*a + &*b),
          Binop::Sub => Real(&*a - &*b),
          Binop::Mul => Real(&*a * &*b),
          Binop::Div => if b.is_zero() { return None } else { Real(&*a / &*b) },
          _ => return None,
        })
      }
      _ => None,
    }
  }
}

impl fmt::Display for Binop {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { self.to_str().fmt(f) }
}

/// Unary operations in the surface syntax. None of these survive lowering:
/// negation becomes a subtraction from zero, logical NOT becomes control
/// flow, length becomes [`ListLength`](il::Op::ListLength) and dereference
/// becomes [`ProcLoad`](il::Op::ProcLoad).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Unop {
  /// Arithmetic negation, `-x`.
  Neg,
  /// Logical NOT, `!x`.
  Not,
  /// Length of a list, set, dictionary or string, `|x|`.
  Len,
  /// Dereference of an actor reference, `*x`.
  Deref,
}

impl Unop {
  /// Return a string representation of the [`Unop`].
  #[must_use] pub fn to_str(self) -> &'static str {
    match self {
      Unop::Neg => "-",
      Unop::Not => "!",
      Unop::Len => "|_|",
      Unop::Deref => "*",
    }
  }

  /// Constant-fold this operation on a value.
  #[must_use] pub fn apply(self, v: &Value) -> Option<Value> {
    match (self, v) {
      (Unop::Neg, Value::Int(n)) => Some(Value::Int(-n)),
      (Unop::Neg, Value::Real(r)) => Some(Value::Real(-r)),
      (Unop::Not, Value::Bool(b)) => Some(Value::Bool(!b)),
      (Unop::Len, Value::List(l)) => Some(Value::Int(l.len().into())),
      (Unop::Len, Value::Set(s)) => Some(Value::Int(s.len().into())),
      (Unop::Len, Value::Dict(d)) => Some(Value::Int(d.len().into())),
      (Unop::Len, Value::Str(s)) => Some(Value::Int(s.chars().count().into())),
      _ => None,
    }
  }
}

impl fmt::Display for Unop {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { self.to_str().fmt(f) }
}

/// Comparison operations, as they appear on [`IfGoto`](il::Op::IfGoto).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Cmp {
  /// Equal.
  Eq,
  /// Not equal.
  Ne,
  /// Less than.
  Lt,
  /// Less or equal.
  Le,
  /// Greater than.
  Gt,
  /// Greater or equal.
  Ge,
  /// Element of a list or set.
  ElemOf,
  /// Strict subset.
  Subset,
  /// Subset or equal.
  SubsetEq,
}

impl Cmp {
  /// Return a string representation of the [`Cmp`].
  #[must_use] pub fn to_str(self) -> &'static str {
    match self {
      Cmp::Eq => "==",
      Cmp::Ne => "!=",
      Cmp::Lt => "<",
      Cmp::Le => "<=",
      Cmp::Gt => ">",
      Cmp::Ge => ">=",
      Cmp::ElemOf => "in",
      Cmp::Subset => "sub",
      Cmp::SubsetEq => "subeq",
    }
  }

  /// The comparison that succeeds exactly when this one fails, if any.
  /// The set comparisons have no dual in the instruction set.
  #[must_use] pub fn negate(self) -> Option<Cmp> {
    match self {
      Cmp::Eq => Some(Cmp::Ne),
      Cmp::Ne => Some(Cmp::Eq),
      Cmp::Lt => Some(Cmp::Ge),
      Cmp::Le => Some(Cmp::Gt),
      Cmp::Gt => Some(Cmp::Le),
      Cmp::Ge => Some(Cmp::Lt),
      Cmp::ElemOf | Cmp::Subset | Cmp::SubsetEq => None,
    }
  }

  /// Constant-fold this comparison on two values.
  #[must_use] pub fn apply(self, v1: &Value, v2: &Value) -> Option<bool> {
    use Value::*;
    match self {
      Cmp::Eq => Some(v1 == v2),
      Cmp::Ne => Some(v1 != v2),
      Cmp::Lt | Cmp::Le | Cmp::Gt | Cmp::Ge => {
        let ord = match (v1, v2) {
          (Int(a), Int(b)) => a.cmp(b),
          (Str(a), Str(b)) => a.cmp(b),
          (Char(a), Char(b)) => a.cmp(b),
          (Real(_), Real(_)) | (Real(_), Int(_)) | (Int(_), Real(_)) =>
            v1.as_rational()?.cmp(&v2.as_rational()?),
          _ => return None,
        };
        Some(match self {
          Cmp::Lt => ord.is_lt(),
          Cmp::Le => ord.is_le(),
          Cmp::Gt => ord.is_gt(),
          Cmp::Ge => ord.is_ge(),
          _ => unreachable!(),
        })
      }
      Cmp::ElemOf => match v2 {
        List(l) => Some(l.contains(v1)),
        Set(s) => Some(s.contains(v1)),
        _ => None,
      },
      Cmp::Subset | Cmp::SubsetEq => if let (Set(a), Set(b)) = (v1, v2) {
        Some(a.is_subset(b) && (self == Cmp::SubsetEq || a != b))
      } else { None },
    }
  }
}

impl fmt::Display for Cmp {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { self.to_str().fmt(f) }
}

/// A constant value, as stored in the constant table and on
/// [`Const`](il::Op::Const) instructions. Values are totally ordered so
/// they can live in sets and dictionary keys.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Value {
  /// The null value.
  Null,
  /// A boolean.
  Bool(bool),
  /// A byte.
  Byte(u8),
  /// A character.
  Char(char),
  /// An unbounded integer.
  Int(BigInt),
  /// An unbounded rational.
  Real(BigRational),
  /// A string.
  Str(Box<str>),
  /// A list of values.
  List(Vec<Value>),
  /// A set of values.
  Set(BTreeSet<Value>),
  /// A tuple of values.
  Tuple(Vec<Value>),
  /// A dictionary.
  Dict(BTreeMap<Value, Value>),
  /// A record; fields are sorted by name. Use [`Value::record`] to build one.
  Record(Vec<(Symbol, Value)>),
  /// A reference to a named function, with its resolved type if known.
  Fun(NameId, Option<ty::Type>),
}

impl Value {
  /// Build an integer value.
  #[must_use] pub fn int(n: impl Into<BigInt>) -> Self { Value::Int(n.into()) }

  /// Build a record value. Fields are sorted by name.
  #[must_use] pub fn record(mut fields: Vec<(Symbol, Value)>) -> Self {
    fields.sort_by_key(|&(name, _)| name.as_str());
    Value::Record(fields)
  }

  /// View a numeric value as a rational.
  #[must_use] pub fn as_rational(&self) -> Option<std::borrow::Cow<'_, BigRational>> {
    match self {
      Value::Int(n) => Some(std::borrow::Cow::Owned(BigRational::from_integer(n.clone()))),
      Value::Real(r) => Some(std::borrow::Cow::Borrowed(r)),
      _ => None,
    }
  }

  /// The structural type of this value.
  #[must_use] pub fn type_of(&self) -> ty::Type {
    match self {
      Value::Null => ty::Type::null(),
      Value::Bool(_) => ty::Type::bool(),
      Value::Byte(_) => ty::Type::byte(),
      Value::Char(_) => ty::Type::char(),
      Value::Int(_) => ty::Type::int(),
      Value::Real(_) => ty::Type::real(),
      Value::Str(_) => ty::Type::string(),
      Value::List(vs) => ty::Type::list(&Self::join_types(vs.iter())),
      Value::Set(vs) => ty::Type::set(&Self::join_types(vs.iter())),
      Value::Tuple(vs) => {
        let tys = vs.iter().map(Value::type_of).collect::<Vec<_>>();
        ty::Type::tuple(&tys)
      }
      Value::Dict(d) => ty::Type::dict(
        &Self::join_types(d.keys()),
        &Self::join_types(d.values())),
      Value::Record(fields) => {
        let fields = fields.iter().map(|(name, v)| (*name, v.type_of())).collect::<Vec<_>>();
        ty::Type::record(false, &fields)
      }
      Value::Fun(_, Some(ty)) => ty.clone(),
      Value::Fun(_, None) => ty::Type::any(),
    }
  }

  fn join_types<'a>(vs: impl Iterator<Item = &'a Value>) -> ty::Type {
    let tys = vs.map(Value::type_of).collect::<Vec<_>>();
    match &*tys {
      [] => ty::Type::void(),
      [t] => t.clone(),
      tys => crate::algebra::union_many(tys),
    }
  }
}

impl fmt::Display for Value {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    use itertools::Itertools;
    match self {
      Value::Null => write!(f, "null"),
      Value::Bool(b) => b.fmt(f),
      Value::Byte(b) => write!(f, "{b:08b}b"),
      Value::Char(c) => write!(f, "'{c}'"),
      Value::Int(n) => n.fmt(f),
      Value::Real(r) => if r.denom().is_one() { write!(f, "{}.0", r.numer()) } else { r.fmt(f) },
      Value::Str(s) => write!(f, "{s:?}"),
      Value::List(vs) => write!(f, "[{}]", vs.iter().format(", ")),
      Value::Set(vs) => write!(f, "{{{}}}", vs.iter().format(", ")),
      Value::Tuple(vs) => write!(f, "({})", vs.iter().format(", ")),
      Value::Dict(d) => write!(f, "{{{}}}",
        d.iter().format_with(", ", |(k, v), f| f(&format_args!("{k}->{v}")))),
      Value::Record(fields) => write!(f, "{{{}}}",
        fields.iter().format_with(", ", |(name, v), f| f(&format_args!("{name}: {v}")))),
      Value::Fun(name, _) => write!(f, "&{name}"),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::symbol::intern;

  fn int(n: i64) -> Value { Value::int(n) }

  #[test]
  fn arith_folding() {
    assert_eq!(Binop::Add.apply(&int(2), &int(3)), Some(int(5)));
    assert_eq!(Binop::Div.apply(&int(7), &int(2)), Some(int(3)));
    assert_eq!(Binop::Div.apply(&int(1), &int(0)), None);
    let half = Value::Real(BigRational::new(1.into(), 2.into()));
    assert_eq!(Binop::Add.apply(&half, &half), Some(Value::Real(BigRational::one())));
    assert_eq!(Binop::Mul.apply(&half, &int(2)), Some(Value::Real(BigRational::one())));
  }

  #[test]
  fn range_folding() {
    assert_eq!(Binop::Range.apply(&int(1), &int(4)),
      Some(Value::List(vec![int(1), int(2), int(3)])));
    assert_eq!(Binop::Range.apply(&int(4), &int(4)), Some(Value::List(vec![])));
  }

  #[test]
  fn set_folding() {
    let s1 = Value::Set([int(1), int(2)].into_iter().collect());
    let s2 = Value::Set([int(2), int(3)].into_iter().collect());
    assert_eq!(Binop::Union.apply(&s1, &s2),
      Some(Value::Set([int(1), int(2), int(3)].into_iter().collect())));
    assert_eq!(Binop::Intersect.apply(&s1, &s2),
      Some(Value::Set([int(2)].into_iter().collect())));
    assert_eq!(Binop::Difference.apply(&s1, &s2),
      Some(Value::Set([int(1)].into_iter().collect())));
    assert_eq!(Cmp::SubsetEq.apply(&s1, &s1), Some(true));
    assert_eq!(Cmp::Subset.apply(&s1, &s1), Some(false));
  }

  #[test]
  fn mixed_comparisons() {
    assert_eq!(Cmp::Lt.apply(&int(1), &Value::Real(BigRational::new(3.into(), 2.into()))),
      Some(true));
    assert_eq!(Cmp::ElemOf.apply(&int(2), &Value::List(vec![int(1), int(2)])), Some(true));
    assert_eq!(Cmp::Lt.apply(&Value::Bool(true), &int(1)), None);
  }

  #[test]
  fn record_fields_sorted() {
    let r = Value::record(vec![(intern("y"), int(2)), (intern("x"), int(1))]);
    let Value::Record(fields) = &r else { panic!() };
    assert_eq!(fields[0].0, intern("x"));
    assert_eq!(fields[1].0, intern("y"));
  }
}
