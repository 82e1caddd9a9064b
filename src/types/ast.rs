//! The abstract syntax tree consumed by the front end.
//!
//! The parser is an external collaborator: it produces these nodes with a
//! source position on every one. Dispatch over the tree is by exhaustive
//! match on the tagged kinds; there is no default case to fall through.

use crate::symbol::Symbol;
use crate::types::{Binop, ModuleId, Spanned, Unop, Value};

/// An unresolved type, as written in the source.
pub type UnresolvedType = Spanned<UnresolvedTypeKind>;

/// The kinds of unresolved types.
#[derive(Clone, Debug, PartialEq)]
pub enum UnresolvedTypeKind {
  /// The empty type `void`.
  Void,
  /// The universal type `any`.
  Any,
  /// The type of `null`.
  Null,
  /// The type `bool`.
  Bool,
  /// The type `byte`.
  Byte,
  /// The type `char`.
  Char,
  /// The type `int`.
  Int,
  /// The type `real`.
  Real,
  /// The type `string`.
  Str,
  /// A reference to a named type, optionally module-qualified.
  Named(Option<ModuleId>, Symbol),
  /// A list type `[T]`.
  List(Box<UnresolvedType>),
  /// A set type `{T}`.
  Set(Box<UnresolvedType>),
  /// A dictionary type `{K->V}`.
  Dict(Box<UnresolvedType>, Box<UnresolvedType>),
  /// A tuple type `(T1, ..., Tn)`.
  Tuple(Vec<UnresolvedType>),
  /// A record type `{T1 f1, ..., Tn fn}`.
  Record {
    /// Whether the record admits extra fields on subtypes.
    open: bool,
    /// The declared fields.
    fields: Vec<(Symbol, UnresolvedType)>,
  },
  /// A union type `T1 | ... | Tn`.
  Union(Vec<UnresolvedType>),
  /// A negation type `!T`.
  Negation(Box<UnresolvedType>),
  /// A function type `ret(params)`.
  Fun {
    /// The return type.
    ret: Box<UnresolvedType>,
    /// The parameter types.
    params: Vec<UnresolvedType>,
  },
  /// A method type `recv::ret(params)`.
  Meth {
    /// The receiver type, if the method is bound.
    receiver: Option<Box<UnresolvedType>>,
    /// The return type.
    ret: Box<UnresolvedType>,
    /// The parameter types.
    params: Vec<UnresolvedType>,
  },
  /// An actor type `process T`.
  Process(Box<UnresolvedType>),
  /// A reference type `ref T`.
  Ref(Box<UnresolvedType>),
}

/// An expression.
pub type Expr = Spanned<ExprKind>;

/// The comprehension kinds.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CompKind {
  /// `[e | x in xs, p]`, building a list.
  ListComp,
  /// `{e | x in xs, p}`, building a set.
  SetComp,
  /// `some {x in xs | p}`, true if any binding satisfies the condition.
  Some,
  /// `no {x in xs | p}`, true if no binding satisfies the condition.
  None,
}

/// The kinds of expressions.
#[derive(Clone, Debug, PartialEq)]
pub enum ExprKind {
  /// A literal constant.
  Lit(Value),
  /// A variable, named constant or function reference; which one is
  /// decided during lowering.
  Name(Option<ModuleId>, Symbol),
  /// The receiver of the enclosing method.
  This,
  /// A binary operation.
  Binary(Binop, Box<Expr>, Box<Expr>),
  /// A unary operation.
  Unary(Unop, Box<Expr>),
  /// A list constructor `[e1, ..., en]`.
  ListCon(Vec<Expr>),
  /// A set constructor `{e1, ..., en}`.
  SetCon(Vec<Expr>),
  /// A tuple constructor `(e1, ..., en)`.
  TupleCon(Vec<Expr>),
  /// A dictionary constructor `{k1->v1, ..., kn->vn}`.
  DictCon(Vec<(Expr, Expr)>),
  /// A record constructor `{f1: e1, ..., fn: en}`.
  RecordCon(Vec<(Symbol, Expr)>),
  /// An indexing operation `e[i]`.
  Access(Box<Expr>, Box<Expr>),
  /// A sub-list operation `e[i..j]`.
  SubList(Box<Expr>, Box<Expr>, Box<Expr>),
  /// A field access `e.f`.
  FieldAccess(Box<Expr>, Symbol),
  /// A direct or indirect call, or a message send if a receiver is given.
  Invoke {
    /// The callee name.
    name: Symbol,
    /// The receiver, for method calls and sends.
    receiver: Option<Box<Expr>>,
    /// The arguments.
    args: Vec<Expr>,
    /// Whether a send blocks for its result.
    synchronous: bool,
  },
  /// Start a new actor with the given initial state, `spawn e`.
  Spawn(Box<Expr>),
  /// A comprehension.
  Comprehension {
    /// The kind of comprehension.
    kind: CompKind,
    /// The element expression, for list and set comprehensions.
    value: Option<Box<Expr>>,
    /// The generators, innermost last.
    sources: Vec<(Symbol, Expr)>,
    /// The filter condition, if any.
    condition: Option<Box<Expr>>,
  },
  /// A runtime type test `e is T`.
  TypeTest(Box<Expr>, UnresolvedType),
  /// A coercion `(T) e`.
  Cast(UnresolvedType, Box<Expr>),
  /// A function reference `&name`.
  FunConst(Option<ModuleId>, Symbol),
}

/// A statement.
pub type Stmt = Spanned<StmtKind>;

/// One `case` (or `default`) clause of a switch.
#[derive(Clone, Debug, PartialEq)]
pub struct SwitchCase {
  /// The case value; `None` for the default clause.
  pub value: Option<Expr>,
  /// The clause body.
  pub body: Vec<Stmt>,
}

/// One `catch` clause.
#[derive(Clone, Debug, PartialEq)]
pub struct Catch {
  /// The type of exceptions this handler takes.
  pub ty: UnresolvedType,
  /// The variable the thrown value is bound to.
  pub name: Symbol,
  /// The handler body.
  pub body: Vec<Stmt>,
}

/// The kinds of statements.
#[derive(Clone, Debug, PartialEq)]
pub enum StmtKind {
  /// A local variable declaration, with an optional initialiser.
  VarDecl {
    /// The declared type.
    ty: UnresolvedType,
    /// The variable name.
    name: Symbol,
    /// The initialiser.
    init: Option<Expr>,
  },
  /// An assignment. The left-hand side is a variable, an access path into
  /// one, or a tuple of variables (destructuring).
  Assign {
    /// The assignment target.
    lhs: Expr,
    /// The assigned value.
    rhs: Expr,
  },
  /// A runtime assertion.
  Assert(Expr),
  /// Return from the function.
  Return(Option<Expr>),
  /// A conditional.
  If {
    /// The condition.
    cond: Expr,
    /// The true branch.
    then: Vec<Stmt>,
    /// The false branch.
    els: Vec<Stmt>,
  },
  /// A while loop.
  While {
    /// The continuation condition.
    cond: Expr,
    /// The loop invariant, if declared.
    invariant: Option<Expr>,
    /// The body.
    body: Vec<Stmt>,
  },
  /// A do-while loop.
  DoWhile {
    /// The continuation condition, tested after the body.
    cond: Expr,
    /// The loop invariant, if declared.
    invariant: Option<Expr>,
    /// The body.
    body: Vec<Stmt>,
  },
  /// Iteration over a collection.
  For {
    /// The bound variable.
    var: Symbol,
    /// The collection iterated over.
    source: Expr,
    /// The loop invariant, if declared.
    invariant: Option<Expr>,
    /// The body.
    body: Vec<Stmt>,
  },
  /// A switch on a value against constant cases.
  Switch {
    /// The scrutinee.
    subject: Expr,
    /// The cases, in source order.
    cases: Vec<SwitchCase>,
  },
  /// Exit the innermost loop or switch.
  Break,
  /// Re-enter the innermost loop.
  Continue,
  /// Raise an exception.
  Throw(Expr),
  /// A protected region with handlers.
  TryCatch {
    /// The protected statements.
    body: Vec<Stmt>,
    /// The handlers, in match order.
    handlers: Vec<Catch>,
  },
  /// No operation.
  Skip,
  /// An expression evaluated for its effect (a call or send).
  Expr(Expr),
}

/// A type declaration, `define name as T where p`.
#[derive(Clone, Debug, PartialEq)]
pub struct TypeDecl {
  /// The declared name.
  pub name: Symbol,
  /// The declared type.
  pub ty: UnresolvedType,
  /// The `where` predicate over `$`, if any.
  pub constraint: Option<Expr>,
}

/// A constant declaration, `define name as e`.
#[derive(Clone, Debug, PartialEq)]
pub struct ConstDecl {
  /// The declared name.
  pub name: Symbol,
  /// The defining expression.
  pub value: Expr,
}

/// Whether a declaration is a function or a method, and its receiver.
#[derive(Clone, Debug, PartialEq)]
pub enum FunKind {
  /// A pure function.
  Function,
  /// A method, with its receiver type if bound.
  Method(Option<UnresolvedType>),
}

/// A single parameter declaration.
#[derive(Clone, Debug, PartialEq)]
pub struct Param {
  /// The declared type.
  pub ty: UnresolvedType,
  /// The parameter name.
  pub name: Symbol,
}

/// A function or method declaration.
#[derive(Clone, Debug, PartialEq)]
pub struct FunDecl {
  /// The declared name.
  pub name: Symbol,
  /// Function or method.
  pub kind: FunKind,
  /// The parameters.
  pub params: Vec<Param>,
  /// The return type.
  pub ret: UnresolvedType,
  /// The precondition, over the parameters.
  pub requires: Option<Expr>,
  /// The postcondition, over `$` (the return value) and the parameters.
  pub ensures: Option<Expr>,
  /// The body.
  pub body: Vec<Stmt>,
}

/// The kinds of top-level declarations.
#[derive(Clone, Debug, PartialEq)]
pub enum Decl {
  /// A type declaration.
  Type(TypeDecl),
  /// A constant declaration.
  Const(ConstDecl),
  /// A function or method declaration.
  Fun(FunDecl),
}

/// One parsed compilation unit.
#[derive(Clone, Debug, PartialEq)]
pub struct SourceFile {
  /// The module this unit defines.
  pub module: ModuleId,
  /// The file the unit was parsed from.
  pub file: Symbol,
  /// The modules imported by this unit.
  pub imports: Vec<ModuleId>,
  /// The declarations, in source order.
  pub decls: Vec<Spanned<Decl>>,
}
