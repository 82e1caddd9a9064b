//! End-to-end tests: parsed declarations in, intermediate code out.

use wyc::algebra;
use wyc::intern;
use wyc::types::ast::{
  self, ConstDecl, Decl, Expr, ExprKind, FunDecl, FunKind, Param, Stmt, StmtKind, SwitchCase,
  TypeDecl, UnresolvedType, UnresolvedTypeKind,
};
use wyc::types::entity::NoLoader;
use wyc::types::il::{Module, Op};
use wyc::types::ty::Type;
use wyc::types::{Binop, FileSpan, ModuleId, Spanned, Value};
use wyc::{Compiler, Error};

fn sp<T>(k: T) -> Spanned<T> {
  Spanned { span: FileSpan::unknown(), k }
}

fn lit(n: i64) -> Expr { sp(ExprKind::Lit(Value::int(n))) }

fn var(s: &str) -> Expr { sp(ExprKind::Name(None, intern(s))) }

fn bin(op: Binop, a: Expr, b: Expr) -> Expr {
  sp(ExprKind::Binary(op, Box::new(a), Box::new(b)))
}

fn ut(k: UnresolvedTypeKind) -> UnresolvedType { sp(k) }

fn named(s: &str) -> UnresolvedType { ut(UnresolvedTypeKind::Named(None, intern(s))) }

fn record_ty(fields: &[(&str, UnresolvedTypeKind)]) -> UnresolvedType {
  ut(UnresolvedTypeKind::Record {
    open: false,
    fields: fields.iter().map(|(n, k)| (intern(n), ut(k.clone()))).collect(),
  })
}

fn compile(decls: Vec<Decl>) -> (Module, Vec<Error>) {
  let unit = ast::SourceFile {
    module: ModuleId(intern("main")),
    file: intern("main.whiley"),
    imports: vec![],
    decls: decls.into_iter().map(sp).collect(),
  };
  let loader = NoLoader;
  Compiler::new(&loader).compile(&unit)
}

/// `define nat as int where $ >= 0 ; nat f(nat x): return x`
#[test]
fn nat_constraint_weaves_into_pre_and_post() {
  let pred = bin(Binop::Ge, var("$"), lit(0));
  let (m, errors) = compile(vec![
    Decl::Type(TypeDecl {
      name: intern("nat"),
      ty: ut(UnresolvedTypeKind::Int),
      constraint: Some(pred),
    }),
    Decl::Fun(FunDecl {
      name: intern("f"),
      kind: FunKind::Function,
      params: vec![Param { ty: named("nat"), name: intern("x") }],
      ret: named("nat"),
      requires: None,
      ensures: None,
      body: vec![sp(StmtKind::Return(Some(var("x"))))],
    }),
  ]);
  assert!(errors.is_empty(), "{errors:?}");

  // The type declaration resolves to a plain int with a constraint block.
  let td = &m.types[0];
  assert_eq!(td.ty, Type::int());
  let c = td.constraint.as_ref().unwrap();
  assert!(c.entries.iter().any(|e| matches!(&e.op,
    Op::Fail(msg) if msg.contains("(nat)"))));

  // The parameter constraint lands in the precondition, the return
  // constraint in the postcondition.
  let f = &m.functions[0];
  let pre = f.precondition.as_ref().expect("f has a precondition");
  assert!(pre.entries.iter().any(|e| matches!(e.op, Op::Fail(_))));
  assert!(pre.validate().is_ok());
  let post = f.postcondition.as_ref().expect("f has a postcondition");
  assert!(post.entries.iter().any(|e| matches!(e.op, Op::Fail(_))));
  assert!(post.validate().is_ok());
  assert!(f.body.entries.iter().any(|e| matches!(e.op, Op::Return(_))));
}

/// The Point2D | Point3D union accepts a 2D point and rejects `{x:1}`.
#[test]
fn point_union_membership() {
  let (m, errors) = compile(vec![
    Decl::Type(TypeDecl {
      name: intern("Point2D"),
      ty: record_ty(&[("x", UnresolvedTypeKind::Int), ("y", UnresolvedTypeKind::Int)]),
      constraint: None,
    }),
    Decl::Type(TypeDecl {
      name: intern("Point3D"),
      ty: record_ty(&[
        ("x", UnresolvedTypeKind::Int),
        ("y", UnresolvedTypeKind::Int),
        ("z", UnresolvedTypeKind::Int),
      ]),
      constraint: None,
    }),
    Decl::Type(TypeDecl {
      name: intern("Point"),
      ty: ut(UnresolvedTypeKind::Union(vec![named("Point2D"), named("Point3D")])),
      constraint: None,
    }),
  ]);
  assert!(errors.is_empty(), "{errors:?}");
  let point = &m.types.iter().find(|t| t.name.name == intern("Point")).unwrap().ty;

  let p2 = Value::record(vec![
    (intern("x"), Value::int(1)),
    (intern("y"), Value::int(2)),
  ]);
  assert!(algebra::is_subtype(point, &p2.type_of()));

  let p1 = Value::record(vec![(intern("x"), Value::int(1))]);
  assert!(!algebra::is_subtype(point, &p1.type_of()));
}

/// `define LList as null | {int data, LList next}`; a concrete list value
/// inhabits the type, and the `next` field is the type itself.
#[test]
fn recursive_llist() {
  let rec = ut(UnresolvedTypeKind::Record {
    open: false,
    fields: vec![
      (intern("data"), ut(UnresolvedTypeKind::Int)),
      (intern("next"), named("LList")),
    ],
  });
  let (m, errors) = compile(vec![Decl::Type(TypeDecl {
    name: intern("LList"),
    ty: ut(UnresolvedTypeKind::Union(vec![ut(UnresolvedTypeKind::Null), rec])),
    constraint: None,
  })]);
  assert!(errors.is_empty(), "{errors:?}");
  let llist = &m.types[0].ty;
  assert!(llist.is_closed());

  // {data: 2, next: {data: 1, next: null}} : LList
  let v = Value::record(vec![
    (intern("data"), Value::int(2)),
    (intern("next"), Value::record(vec![
      (intern("data"), Value::int(1)),
      (intern("next"), Value::Null),
    ])),
  ]);
  assert!(algebra::is_subtype(llist, &v.type_of()));

  // Extracting the `next` field of the record branch gives back LList.
  let rec_branch = llist.branches().unwrap().into_iter()
    .find(|t| t.field(intern("next")).is_some()).unwrap();
  assert_eq!(rec_branch.field(intern("next")).unwrap(), *llist);
}

/// `x, y = (1, 2)` then `return x + y` compiles to a destructure and two
/// stores.
#[test]
fn destructuring_end_to_end() {
  let (m, errors) = compile(vec![Decl::Fun(FunDecl {
    name: intern("f"),
    kind: FunKind::Function,
    params: vec![],
    ret: ut(UnresolvedTypeKind::Int),
    requires: None,
    ensures: None,
    body: vec![
      sp(StmtKind::Assign {
        lhs: sp(ExprKind::TupleCon(vec![var("x"), var("y")])),
        rhs: sp(ExprKind::TupleCon(vec![lit(1), lit(2)])),
      }),
      sp(StmtKind::Return(Some(bin(Binop::Add, var("x"), var("y"))))),
    ],
  })]);
  assert!(errors.is_empty(), "{errors:?}");
  let body = &m.functions[0].body;
  assert!(body.validate().is_ok());
  assert!(body.entries.iter().any(|e| matches!(e.op, Op::Destructure)));
  assert_eq!(body.entries.iter().filter(|e| matches!(e.op, Op::Store(_))).count(), 2);
}

/// Duplicate switch cases are reported, and the rest of the unit still
/// compiles.
#[test]
fn duplicate_case_is_reported_but_compilation_continues() {
  let dup = Decl::Fun(FunDecl {
    name: intern("bad"),
    kind: FunKind::Function,
    params: vec![Param { ty: ut(UnresolvedTypeKind::Int), name: intern("x") }],
    ret: ut(UnresolvedTypeKind::Int),
    requires: None,
    ensures: None,
    body: vec![
      sp(StmtKind::Switch {
        subject: var("x"),
        cases: vec![
          SwitchCase { value: Some(lit(1)), body: vec![] },
          SwitchCase { value: Some(lit(1)), body: vec![] },
        ],
      }),
      sp(StmtKind::Return(Some(lit(0)))),
    ],
  });
  let good = Decl::Fun(FunDecl {
    name: intern("good"),
    kind: FunKind::Function,
    params: vec![],
    ret: ut(UnresolvedTypeKind::Int),
    requires: None,
    ensures: None,
    body: vec![sp(StmtKind::Return(Some(lit(7))))],
  });
  let (m, errors) = compile(vec![dup, good]);
  assert!(!errors.is_empty());
  assert!(m.functions.iter().any(|f| f.name.name == intern("good")));
}

/// Constants fold through other constants, and both land in the output
/// module.
#[test]
fn constants_fold_into_module() {
  let (m, errors) = compile(vec![
    Decl::Const(ConstDecl { name: intern("A"), value: bin(Binop::Add, var("B"), lit(1)) }),
    Decl::Const(ConstDecl { name: intern("B"), value: lit(41) }),
  ]);
  assert!(errors.is_empty(), "{errors:?}");
  let a = m.constants.iter().find(|c| c.name.name == intern("A")).unwrap();
  assert_eq!(a.value, Value::int(42));
}

/// A type test in a condition narrows via `IfType`, and the narrowed
/// static type is the least difference on the else path.
#[test]
fn type_test_narrowing() {
  let list_int = ut(UnresolvedTypeKind::List(Box::new(ut(UnresolvedTypeKind::Int))));
  let (m, errors) = compile(vec![Decl::Fun(FunDecl {
    name: intern("f"),
    kind: FunKind::Function,
    params: vec![Param {
      ty: ut(UnresolvedTypeKind::Union(vec![
        list_int.clone(), ut(UnresolvedTypeKind::Int)])),
      name: intern("e"),
    }],
    ret: ut(UnresolvedTypeKind::Int),
    requires: None,
    ensures: None,
    body: vec![
      sp(StmtKind::If {
        cond: sp(ExprKind::TypeTest(Box::new(var("e")), list_int)),
        then: vec![sp(StmtKind::Return(Some(
          sp(ExprKind::Unary(wyc::types::Unop::Len, Box::new(var("e")))))))],
        els: vec![],
      }),
      sp(StmtKind::Return(Some(lit(0)))),
    ],
  })]);
  assert!(errors.is_empty(), "{errors:?}");
  let body = &m.functions[0].body;
  let tested = body.entries.iter().find_map(|e| match &e.op {
    Op::IfType(_, ty, _) => Some(ty.clone()),
    _ => None,
  }).expect("no IfType emitted");
  assert_eq!(tested, Type::list(&Type::int()));

  // Flow typing: on the branch the static type narrows to [int]; on the
  // fall-through the least difference removes the list branch.
  let param = algebra::union(&Type::list(&Type::int()), &Type::int());
  assert_eq!(algebra::least_difference(&param, &tested), Type::int());
}

/// Cross-module references resolve through the loader.
#[test]
fn foreign_names_resolve_through_loader() {
  use wyc::types::entity::{LoadedModule, TableLoader};

  let lib = ModuleId(intern("lib"));
  let mut loaded = LoadedModule::default();
  loaded.types.insert(intern("temp"), (Type::int(), None));
  loaded.constants.insert(intern("zero"), Value::int(0));
  let mut loader = TableLoader::default();
  loader.modules.insert(lib, loaded);

  let unit = ast::SourceFile {
    module: ModuleId(intern("main")),
    file: intern("main.whiley"),
    imports: vec![lib],
    decls: vec![
      sp(Decl::Type(TypeDecl {
        name: intern("t"),
        ty: named("temp"),
        constraint: None,
      })),
      sp(Decl::Const(ConstDecl {
        name: intern("z"),
        value: var("zero"),
      })),
    ],
  };
  let (m, errors) = Compiler::new(&loader).compile(&unit);
  assert!(errors.is_empty(), "{errors:?}");
  assert_eq!(m.types[0].ty, Type::int());
  assert_eq!(m.constants[0].value, Value::int(0));
}
