//! Error types shared by every pass of the front end.
//!
//! A [`SyntaxError`] is a user-facing diagnostic: a kind, a message and the
//! source position of the offending AST node. An [`InternalFailure`] is a
//! distinct type for "this cannot happen" states; callers must propagate it,
//! never swallow it.

use thiserror::Error;

use crate::symbol::Symbol;
use crate::types::{FileSpan, NameId, ty::Type};

/// The kinds of user-facing errors the front end can report.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum ErrorKind {
  /// A name could not be resolved to a declaration or module.
  #[error("unable to resolve name `{0}`")]
  Resolve(String),
  /// A constant declaration refers to itself, directly or indirectly.
  #[error("cyclic constant declaration `{0}`")]
  CyclicConstant(Symbol),
  /// A type declaration refers to itself without an intervening constructor.
  #[error("type `{0}` is not well founded")]
  CyclicType(Symbol),
  /// A constant name was used where a type was expected.
  #[error("`{0}` is a constant, not a type")]
  InvalidConstantAsType(NameId),
  /// A function name was used where a type was expected.
  #[error("`{0}` is a function, not a type")]
  InvalidFunctionAsType(NameId),
  /// An expression form that cannot be evaluated at compile time appeared in
  /// a constant declaration.
  #[error("expression is not a compile-time constant")]
  NonConstantExpression,
  /// An expression used as a condition is not boolean.
  #[error("invalid boolean expression")]
  InvalidBooleanExpression,
  /// A binary operator was applied to operands it does not support.
  #[error("invalid binary expression")]
  InvalidBinaryExpression,
  /// A numeric operator was applied to a non-numeric operand.
  #[error("invalid numeric expression")]
  InvalidNumericExpression,
  /// A list operation was applied to a non-list operand.
  #[error("invalid list expression")]
  InvalidListExpression,
  /// A set operation was applied to a non-set operand.
  #[error("invalid set expression")]
  InvalidSetExpression,
  /// The left-hand side of an assignment is not an assignable location.
  #[error("invalid assignment target")]
  InvalidLValExpression,
  /// A tuple destructuring assignment has a non-variable component.
  #[error("invalid tuple assignment target")]
  InvalidTupleLVal,
  /// A variable was referenced that is not in scope.
  #[error("unknown variable `{0}`")]
  UnknownVariable(Symbol),
  /// A call names neither a function, a method nor a function-typed variable.
  #[error("unknown function or method `{0}`")]
  UnknownFunctionOrMethod(Symbol),
  /// A variable may be read before it has been assigned.
  #[error("variable `{0}` is possibly uninitialised")]
  VariablePossiblyUninitialised(Symbol),
  /// `break` or `continue` outside of any loop.
  #[error("break or continue outside of a loop")]
  BreakOutsideLoop,
  /// Two cases of a switch have the same constant value.
  #[error("duplicate case label")]
  DuplicateCaseLabel,
  /// A switch has more than one default clause.
  #[error("duplicate default label")]
  DuplicateDefaultLabel,
  /// A statement can never be reached.
  #[error("unreachable code")]
  UnreachableCode,
  /// A value of one type appeared where an incompatible type was required.
  #[error("expected type {expected}, found {found}")]
  SubtypeError {
    /// The type required by the context.
    expected: Type,
    /// The type actually found.
    found: Type,
  },
}

/// A user-facing diagnostic with a source position.
#[derive(Clone, Debug, PartialEq, Error)]
#[error("{span}: {kind}")]
pub struct SyntaxError {
  /// What went wrong.
  pub kind: ErrorKind,
  /// Where it went wrong.
  pub span: FileSpan,
}

impl SyntaxError {
  /// Construct an error from a kind and the span of the offending node.
  #[must_use] pub fn new(kind: ErrorKind, span: FileSpan) -> Self { SyntaxError { kind, span } }
}

/// An unexpected internal state. This is a bug in the compiler, not in the
/// program under compilation; it carries the source position that was being
/// processed so the report is actionable.
#[derive(Clone, Debug, PartialEq, Error)]
#[error("{span}: internal failure: {msg}")]
pub struct InternalFailure {
  /// A description of the broken invariant.
  pub msg: String,
  /// The source position being processed when the invariant broke.
  pub span: FileSpan,
}

/// Any failure of the front end.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum Error {
  /// A user-facing diagnostic.
  #[error(transparent)]
  Syntax(#[from] SyntaxError),
  /// A compiler bug.
  #[error(transparent)]
  Internal(#[from] InternalFailure),
}

impl Error {
  /// The source position of this error.
  #[must_use] pub fn span(&self) -> FileSpan {
    match self {
      Error::Syntax(e) => e.span,
      Error::Internal(e) => e.span,
    }
  }
}

/// The result type used throughout the front end.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Shorthand for failing with a [`SyntaxError`].
pub(crate) fn err<T>(kind: ErrorKind, span: FileSpan) -> Result<T> {
  Err(SyntaxError::new(kind, span).into())
}
