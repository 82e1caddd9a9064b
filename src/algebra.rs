//! The type algebra: subtyping, canonicalisation and the boolean operations.
//!
//! Subtyping over (possibly cyclic) type graphs is decided coinductively: an
//! all-pairs boolean matrix over the node arrays starts out all-true and is
//! repeatedly refined by a local per-pair check until it reaches the greatest
//! fixed point. [`minimise`] then collapses nodes that are mutual subtypes,
//! prunes subsumed union branches and drops unreachable nodes, yielding the
//! canonical form on which structural equality decides type equivalence.

use bit_vec::BitVec;

use crate::types::Idx;
use crate::types::ty::{Node, NodeId, Type};

/// An `n × n` boolean matrix, `m[i][j]` meaning "node `i` is a supertype of
/// node `j`".
struct Matrix {
  n: usize,
  bits: BitVec,
}

impl Matrix {
  fn new(n: usize) -> Self {
    Matrix { n, bits: BitVec::from_elem(n * n, true) }
  }

  fn get(&self, i: NodeId, j: NodeId) -> bool {
    self.bits.get(i.into_usize() * self.n + j.into_usize()).expect("in range")
  }

  fn clear(&mut self, i: NodeId, j: NodeId) {
    self.bits.set(i.into_usize() * self.n + j.into_usize(), false);
  }
}

/// Compute the greatest fixed point of [`local_check`] over the node array.
fn fixpoint(nodes: &[Node]) -> Matrix {
  let n = nodes.len();
  let mut m = Matrix::new(n);
  loop {
    let mut changed = false;
    for i in 0..n {
      for j in 0..n {
        let (i, j) = (NodeId::from_usize(i), NodeId::from_usize(j));
        if m.get(i, j) && !local_check(nodes, i, j, &m) {
          m.clear(i, j);
          changed = true;
        }
      }
    }
    if !changed { return m }
  }
}

fn is_leaf_kind(n: &Node) -> bool {
  matches!(n, Node::Null | Node::Bool | Node::Byte | Node::Char |
    Node::Int | Node::Real | Node::Str)
}

/// Two leaves with no values in common. `int` and `real` overlap; `any` and
/// `void` are not leaves in this sense.
fn disjoint_leaves(a: &Node, b: &Node) -> bool {
  is_leaf_kind(a) && is_leaf_kind(b) &&
    std::mem::discriminant(a) != std::mem::discriminant(b) &&
    !matches!((a, b), (Node::Int, Node::Real) | (Node::Real, Node::Int))
}

/// One step of the subtype check: decide `i :> j` assuming the relation `m`
/// holds for all child pairs. Monotone in `m`, so the all-true start point
/// shrinks to the greatest fixed point.
fn local_check(nodes: &[Node], i: NodeId, j: NodeId, m: &Matrix) -> bool {
  let (a, b) = (&nodes[i.into_usize()], &nodes[j.into_usize()]);
  // The algebra is only defined on closed types.
  if matches!(a, Node::Label(_)) || matches!(b, Node::Label(_)) { return false }
  if i == j { return true }
  match (a, b) {
    (Node::Any, _) => true,
    (_, Node::Void) => true,
    // A union subtype needs every branch below i; combined with the next
    // arm this gives the for-all/exists rule when both sides are unions.
    (_, Node::Union(bs)) => bs.iter().all(|&c| m.get(i, c)),
    (Node::Union(cs), _) => cs.iter().any(|&c| m.get(c, j)),
    // An intersection subtype is below i whenever one of its branches is.
    (_, Node::Inter(bs)) => bs.iter().any(|&c| m.get(i, c)),
    (Node::Inter(cs), _) => cs.iter().all(|&c| m.get(c, j)),
    (Node::Not(na), Node::Not(nb)) => m.get(*nb, *na),
    (Node::Not(na), _) => disjoint_leaves(&nodes[na.into_usize()], b),
    (_, Node::Not(_)) => false,
    (Node::Real, Node::Int) => true,
    (Node::Null, Node::Null) | (Node::Bool, Node::Bool) | (Node::Byte, Node::Byte) |
    (Node::Char, Node::Char) | (Node::Int, Node::Int) | (Node::Real, Node::Real) |
    (Node::Str, Node::Str) => true,
    (Node::Set(x), Node::Set(y)) | (Node::List(x), Node::List(y)) |
    (Node::Ref(x), Node::Ref(y)) | (Node::Process(x), Node::Process(y)) =>
      m.get(*x, *y),
    (Node::Dict(k1, v1), Node::Dict(k2, v2)) => m.get(*k1, *k2) && m.get(*v1, *v2),
    (Node::Tuple(xs), Node::Tuple(ys)) =>
      xs.len() == ys.len() && xs.iter().zip(&**ys).all(|(&x, &y)| m.get(x, y)),
    // Function returns are covariant, parameters contravariant.
    (Node::Fun(xs), Node::Fun(ys)) => sig_check(xs, ys, m),
    (Node::Meth(r1, xs), Node::Meth(r2, ys)) => {
      let recv = match (r1, r2) {
        (None, None) => true,
        (Some(x), Some(y)) => m.get(*y, *x),
        _ => false,
      };
      recv && sig_check(xs, ys, m)
    }
    (Node::Record { open: o1, fields: f1 }, Node::Record { open: o2, fields: f2 }) =>
      record_check(*o1, f1, *o2, f2, m),
    (Node::Nominal(x), Node::Nominal(y)) => x == y,
    _ => false,
  }
}

fn sig_check(xs: &[NodeId], ys: &[NodeId], m: &Matrix) -> bool {
  xs.len() == ys.len() && m.get(xs[0], ys[0]) &&
    xs[1..].iter().zip(&ys[1..]).all(|(&p1, &p2)| m.get(p2, p1))
}

/// Record subtyping: every supertype field must be present in the subtype
/// with a covariant type (depth subtyping); extra subtype fields are only
/// admitted when the supertype is open (width subtyping).
fn record_check(o1: bool, f1: &[(crate::Symbol, NodeId)],
  o2: bool, f2: &[(crate::Symbol, NodeId)], m: &Matrix,
) -> bool {
  for &(name, c1) in f1 {
    match f2.iter().find(|&&(n, _)| n == name) {
      Some(&(_, c2)) => if !m.get(c1, c2) { return false },
      None => return false,
    }
  }
  if o1 { true } else { f1.len() == f2.len() && !o2 }
}

/// Concatenate the node arrays of two types, returning the combined array
/// and the root of the second.
fn combine(t1: &Type, t2: &Type) -> (Vec<Node>, NodeId) {
  let mut nodes = t1.nodes().to_vec();
  let off = nodes.len();
  for n in t2.nodes() {
    nodes.push(n.map_children(|c| NodeId::from_usize(c.into_usize() + off)));
  }
  (nodes, NodeId::from_usize(off))
}

/// Decide whether `sup :> sub`, i.e. every value of `sub` is a value of
/// `sup`.
#[must_use] pub fn is_subtype(sup: &Type, sub: &Type) -> bool {
  let (nodes, r2) = combine(sup, sub);
  fixpoint(&nodes).get(NodeId(0), r2)
}

/// Decide whether two types have the same values.
#[must_use] pub fn is_equivalent(t1: &Type, t2: &Type) -> bool {
  let (nodes, r2) = combine(t1, t2);
  let m = fixpoint(&nodes);
  m.get(NodeId(0), r2) && m.get(r2, NodeId(0))
}

struct Minimiser<'a> {
  nodes: &'a [Node],
  m: Matrix,
  rep: Vec<NodeId>,
  map: Vec<Option<NodeId>>,
  out: Vec<Node>,
}

impl<'a> Minimiser<'a> {
  fn new(t: &'a Type) -> Self {
    let nodes = t.nodes();
    let m = fixpoint(nodes);
    // Nodes that are mutual subtypes form an equivalence class; pick the
    // lowest index as representative.
    let rep = (0..nodes.len()).map(|i| {
      let i = NodeId::from_usize(i);
      (0..i.into_usize()).map(NodeId::from_usize)
        .find(|&j| m.get(i, j) && m.get(j, i))
        .unwrap_or(i)
    }).collect();
    Minimiser { nodes, m, rep, map: vec![None; nodes.len()], out: vec![] }
  }

  /// Collect the surviving branches of a union rooted at `i` (given by its
  /// representative): nested unions are inlined, self-branches dropped, and
  /// any branch subsumed by another is removed.
  fn union_branches(&self, i: NodeId, cs: &[NodeId]) -> Vec<NodeId> {
    let mut work = cs.to_vec();
    let mut flat = vec![];
    while let Some(c) = work.pop() {
      let c = self.rep[c.into_usize()];
      if c == i || flat.contains(&c) { continue }
      if let Node::Union(inner) = &self.nodes[c.into_usize()] {
        work.extend(inner.iter().copied());
      } else {
        flat.push(c);
      }
    }
    flat.reverse();
    let mut keep = vec![];
    'branch: for (n, &c) in flat.iter().enumerate() {
      for (n2, &c2) in flat.iter().enumerate() {
        if n == n2 { continue }
        // Drop c if some other branch subsumes it; on mutual subsumption
        // (equivalent branches) keep the first occurrence.
        if self.m.get(c2, c) && (!self.m.get(c, c2) || n2 < n) { continue 'branch }
      }
      keep.push(c);
    }
    keep
  }

  fn emit(&mut self, i: NodeId) -> NodeId {
    let i = self.rep[i.into_usize()];
    if let Some(n) = self.map[i.into_usize()] { return n }
    if let Node::Union(cs) = &self.nodes[i.into_usize()] {
      let keep = self.union_branches(i, cs);
      match keep.as_slice() {
        [] => {
          let n = NodeId::from_usize(self.out.len());
          self.map[i.into_usize()] = Some(n);
          self.out.push(Node::Void);
          return n
        }
        &[b] => {
          let n = self.emit(b);
          self.map[i.into_usize()] = Some(n);
          return n
        }
        _ => {
          let n = NodeId::from_usize(self.out.len());
          self.map[i.into_usize()] = Some(n);
          self.out.push(Node::Void);
          let children = keep.iter().map(|&b| self.emit(b)).collect();
          self.out[n.into_usize()] = Node::Union(children);
          return n
        }
      }
    }
    let n = NodeId::from_usize(self.out.len());
    self.map[i.into_usize()] = Some(n);
    self.out.push(Node::Void);
    let node = self.nodes[i.into_usize()].clone();
    let node = node.map_children(|c| self.emit(c));
    self.out[n.into_usize()] = node;
    n
  }
}

/// Canonicalise a closed type: merge equivalent nodes, flatten unions, drop
/// subsumed branches and prune unreachable nodes. Idempotent.
#[must_use] pub fn minimise(t: &Type) -> Type {
  debug_assert!(t.is_closed(), "cannot minimise an open type");
  if t.is_leaf() { return t.clone() }
  let mut min = Minimiser::new(t);
  let root = min.emit(NodeId(0));
  Type::from_nodes(min.out).extract(root)
}

/// The canonical union of two types; also their least upper bound.
#[must_use] pub fn union(t1: &Type, t2: &Type) -> Type {
  union_many(&[t1.clone(), t2.clone()])
}

/// The canonical union of any number of types.
#[must_use] pub fn union_many(ts: &[Type]) -> Type {
  minimise(&Type::union(ts))
}

/// The canonical complement of a type: `¬any = void`, `¬void = any`,
/// `¬¬t = t`, otherwise a negation node.
#[must_use] pub fn negate(t: &Type) -> Type {
  match *t.root() {
    Node::Any => Type::void(),
    Node::Void => Type::any(),
    Node::Not(c) => minimise(&t.extract(c)),
    _ => minimise(&Type::negation(t)),
  }
}

/// The canonical intersection of two types. Subsumption, unions and
/// same-kind compounds are handled structurally; mismatched constructors
/// are disjoint; the residue (negations, function pairs) falls back to
/// De Morgan, `t1 ∩ t2 = ¬(¬t1 ∪ ¬t2)`.
#[must_use] pub fn intersect(t1: &Type, t2: &Type) -> Type {
  if is_subtype(t2, t1) { return minimise(t1) }
  if is_subtype(t1, t2) { return minimise(t2) }
  if let Some(bs) = t1.branches() {
    return union_many(&bs.iter().map(|b| intersect(b, t2)).collect::<Vec<_>>())
  }
  if let Some(bs) = t2.branches() {
    return union_many(&bs.iter().map(|b| intersect(t1, b)).collect::<Vec<_>>())
  }
  match (t1.root(), t2.root()) {
    (Node::Set(_), Node::Set(_)) => Type::set(
      &intersect(&t1.element().expect("set"), &t2.element().expect("set"))),
    (Node::List(_), Node::List(_)) => Type::list(
      &intersect(&t1.element().expect("list"), &t2.element().expect("list"))),
    (Node::Ref(_), Node::Ref(_)) => Type::reference(
      &intersect(&t1.element().expect("ref"), &t2.element().expect("ref"))),
    (Node::Process(_), Node::Process(_)) => Type::process(
      &intersect(&t1.element().expect("process"), &t2.element().expect("process"))),
    (Node::Dict(_, _), Node::Dict(_, _)) => Type::dict(
      &intersect(&t1.key().expect("dict"), &t2.key().expect("dict")),
      &intersect(&t1.value().expect("dict"), &t2.value().expect("dict"))),
    (Node::Tuple(_), Node::Tuple(_)) => {
      let (xs, ys) = (t1.tuple_elements().expect("tuple"), t2.tuple_elements().expect("tuple"));
      if xs.len() != ys.len() { return Type::void() }
      let elems = xs.iter().zip(&ys).map(|(x, y)| intersect(x, y)).collect::<Vec<_>>();
      minimise(&Type::tuple(&elems))
    }
    (&Node::Record { open: o1, .. }, &Node::Record { open: o2, .. }) => {
      let (f1, f2) = (t1.fields().expect("record"), t2.fields().expect("record"));
      let mut fields = vec![];
      for (name, x) in &f1 {
        match f2.iter().find(|(n, _)| n == name) {
          Some((_, y)) => fields.push((*name, intersect(x, y))),
          // A field on one side only survives when the other record is open.
          None => if o2 { fields.push((*name, x.clone())) } else { return Type::void() },
        }
      }
      for (name, y) in &f2 {
        if f1.iter().all(|(n, _)| n != name) {
          if o1 { fields.push((*name, y.clone())) } else { return Type::void() }
        }
      }
      minimise(&Type::record(o1 && o2, &fields))
    }
    // Distinct constructive kinds share no values. `int ∩ real` was already
    // handled by the subsumption shortcut above.
    (a, b) if constructive(a) && constructive(b) &&
      std::mem::discriminant(a) != std::mem::discriminant(b) => Type::void(),
    _ => negate(&union(&negate(t1), &negate(t2))),
  }
}

/// Node kinds that denote a fixed constructor of values, so that two
/// distinct kinds are disjoint.
fn constructive(n: &Node) -> bool {
  is_leaf_kind(n) || matches!(n,
    Node::Set(_) | Node::List(_) | Node::Ref(_) | Node::Process(_) |
    Node::Dict(_, _) | Node::Tuple(_) | Node::Record { .. } |
    Node::Fun(_) | Node::Meth(_, _))
}

/// The least upper bound of two types.
#[must_use] pub fn least_upper_bound(t1: &Type, t2: &Type) -> Type {
  union(t1, t2)
}

/// The greatest lower bound of two types.
#[must_use] pub fn greatest_lower_bound(t1: &Type, t2: &Type) -> Type {
  intersect(t1, t2)
}

/// The least difference `t1 − t2`: a least upper bound of the values of
/// `t1` that are not values of `t2`. Sound but not complete (it may
/// over-approximate); used for flow typing after a successful type test.
#[must_use] pub fn least_difference(t1: &Type, t2: &Type) -> Type {
  if is_subtype(t2, t1) { return Type::void() }
  if let Some(bs) = t1.branches() {
    let keep = bs.into_iter().filter(|b| !is_subtype(t2, b)).collect::<Vec<_>>();
    return union_many(&keep)
  }
  minimise(t1)
}
