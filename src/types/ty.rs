//! The structural type graph.
//!
//! A [`Type`] is a non-empty flat array of [`Node`]s behind an `Rc`; node 0
//! is the root and edges are indices into the same array, so recursive types
//! like `X<null | {int data, X next}>` are ordinary arrays with back-edges
//! and never heap cycles. Structural equality is node-wise equality in array
//! order; once a type has been through [`minimise`](crate::algebra::minimise)
//! this coincides with graph isomorphism.
//!
//! Types under construction may contain [`Label`](Node::Label) placeholders;
//! the [`close`](Type::close) operation re-targets every matching label to
//! the root, which is how recursive types are tied. A *closed* type contains
//! no labels.

use std::fmt;
use std::rc::Rc;

use bitflags::bitflags;
use smallvec::SmallVec;

use crate::symbol::Symbol;
use crate::types::{mk_id, Idx, IdxVec, NameId};

mk_id! {
  /// The index of a node within a type graph.
  NodeId,
}

impl fmt::Display for NodeId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "#{}", self.0) }
}

bitflags! {
  /// Summary flags for a type graph, computed on construction.
  #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
  pub struct TypeFlags: u8 {
    /// The graph contains a [`Node::Label`]; the type is still open.
    const HAS_LABEL = 1;
    /// The graph contains a [`Node::Nominal`] placeholder.
    const HAS_NOMINAL = 2;
  }
}

/// A single node of a type graph. Child edges are [`NodeId`] indices into
/// the owning array.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Node {
  /// The empty type, subtype of everything.
  Void,
  /// The universal type, supertype of everything.
  Any,
  /// The type of `null`.
  Null,
  /// The type of booleans.
  Bool,
  /// The type of bytes.
  Byte,
  /// The type of characters.
  Char,
  /// The type of unbounded integers.
  Int,
  /// The type of rationals.
  Real,
  /// The type of strings.
  Str,
  /// `{T}`, a homogeneous set.
  Set(NodeId),
  /// `[T]`, a homogeneous list.
  List(NodeId),
  /// `ref T`, a reference cell.
  Ref(NodeId),
  /// `!T`, the complement of a type.
  Not(NodeId),
  /// `process T`, an actor whose state has the given type.
  Process(NodeId),
  /// `{K->V}`, a dictionary.
  Dict(NodeId, NodeId),
  /// A union of two or more branches. Canonical unions are flat and no
  /// branch subsumes another.
  Union(Box<[NodeId]>),
  /// An intersection of two or more branches. The algebra normalises these
  /// away (by De Morgan), but they may appear in surface syntax.
  Inter(Box<[NodeId]>),
  /// A tuple of two or more elements.
  Tuple(Box<[NodeId]>),
  /// A function type; element 0 is the return type, the rest are the
  /// parameters in order.
  Fun(Box<[NodeId]>),
  /// A method type: an optional receiver, then return and parameters as in
  /// [`Node::Fun`].
  Meth(Option<NodeId>, Box<[NodeId]>),
  /// A record. Fields are sorted by name; an *open* record admits
  /// additional fields on its subtypes.
  Record {
    /// Whether subtypes may carry extra fields.
    open: bool,
    /// The fields, sorted lexicographically by name.
    fields: Box<[(Symbol, NodeId)]>,
  },
  /// A named type, used across module boundaries and transiently while a
  /// recursive definition is being expanded.
  Nominal(NameId),
  /// A construction-time placeholder closed by [`Type::close`].
  Label(Symbol),
}

impl Node {
  /// Rewrite every child edge through `f`.
  #[must_use] pub fn map_children(&self, mut f: impl FnMut(NodeId) -> NodeId) -> Node {
    match *self {
      Node::Void | Node::Any | Node::Null | Node::Bool | Node::Byte |
      Node::Char | Node::Int | Node::Real | Node::Str |
      Node::Nominal(_) | Node::Label(_) => self.clone(),
      Node::Set(c) => Node::Set(f(c)),
      Node::List(c) => Node::List(f(c)),
      Node::Ref(c) => Node::Ref(f(c)),
      Node::Not(c) => Node::Not(f(c)),
      Node::Process(c) => Node::Process(f(c)),
      Node::Dict(k, v) => Node::Dict(f(k), f(v)),
      Node::Union(ref cs) => Node::Union(cs.iter().map(|&c| f(c)).collect()),
      Node::Inter(ref cs) => Node::Inter(cs.iter().map(|&c| f(c)).collect()),
      Node::Tuple(ref cs) => Node::Tuple(cs.iter().map(|&c| f(c)).collect()),
      Node::Fun(ref cs) => Node::Fun(cs.iter().map(|&c| f(c)).collect()),
      Node::Meth(recv, ref cs) =>
        Node::Meth(recv.map(&mut f), cs.iter().map(|&c| f(c)).collect()),
      Node::Record { open, ref fields } => Node::Record {
        open,
        fields: fields.iter().map(|&(name, c)| (name, f(c))).collect(),
      },
    }
  }

  /// Visit every child edge of this node.
  pub fn visit_children(&self, mut f: impl FnMut(NodeId)) {
    match *self {
      Node::Void | Node::Any | Node::Null | Node::Bool | Node::Byte |
      Node::Char | Node::Int | Node::Real | Node::Str |
      Node::Nominal(_) | Node::Label(_) => {}
      Node::Set(c) | Node::List(c) | Node::Ref(c) |
      Node::Not(c) | Node::Process(c) => f(c),
      Node::Dict(k, v) => { f(k); f(v) }
      Node::Union(ref cs) | Node::Inter(ref cs) |
      Node::Tuple(ref cs) | Node::Fun(ref cs) => for &c in &**cs { f(c) },
      Node::Meth(recv, ref cs) => {
        if let Some(r) = recv { f(r) }
        for &c in &**cs { f(c) }
      }
      Node::Record { ref fields, .. } => for &(_, c) in &**fields { f(c) },
    }
  }
}

/// The error returned by [`Type::close`] when no matching label exists.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct NoSuchLabel(pub Symbol);

impl fmt::Display for NoSuchLabel {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "no such label `{}`", self.0)
  }
}

/// A structural type: a non-empty flat node array with node 0 as root.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Type {
  nodes: Rc<[Node]>,
  flags: TypeFlags,
}

impl Type {
  pub(crate) fn from_nodes(nodes: Vec<Node>) -> Type {
    debug_assert!(!nodes.is_empty(), "a type has at least one node");
    let mut flags = TypeFlags::empty();
    for n in &nodes {
      match n {
        Node::Label(_) => flags |= TypeFlags::HAS_LABEL,
        Node::Nominal(_) => flags |= TypeFlags::HAS_NOMINAL,
        _ => {}
      }
    }
    Type { nodes: nodes.into(), flags }
  }

  fn leaf(n: Node) -> Type { Type::from_nodes(vec![n]) }

  /// The empty type `void`.
  #[must_use] pub fn void() -> Type { Type::leaf(Node::Void) }
  /// The universal type `any`.
  #[must_use] pub fn any() -> Type { Type::leaf(Node::Any) }
  /// The type of `null`.
  #[must_use] pub fn null() -> Type { Type::leaf(Node::Null) }
  /// The type `bool`.
  #[must_use] pub fn bool() -> Type { Type::leaf(Node::Bool) }
  /// The type `byte`.
  #[must_use] pub fn byte() -> Type { Type::leaf(Node::Byte) }
  /// The type `char`.
  #[must_use] pub fn char() -> Type { Type::leaf(Node::Char) }
  /// The type `int`.
  #[must_use] pub fn int() -> Type { Type::leaf(Node::Int) }
  /// The type `real`.
  #[must_use] pub fn real() -> Type { Type::leaf(Node::Real) }
  /// The type `string`.
  #[must_use] pub fn string() -> Type { Type::leaf(Node::Str) }
  /// A nominal placeholder for the given name.
  #[must_use] pub fn nominal(name: NameId) -> Type { Type::leaf(Node::Nominal(name)) }
  /// A recursion label, to be tied by [`Type::close`].
  #[must_use] pub fn label(name: Symbol) -> Type { Type::leaf(Node::Label(name)) }

  /// The set type `{element}`.
  #[must_use] pub fn set(element: &Type) -> Type {
    Type::wrap(Node::Set, element)
  }
  /// The list type `[element]`.
  #[must_use] pub fn list(element: &Type) -> Type {
    Type::wrap(Node::List, element)
  }
  /// The reference type `ref target`.
  #[must_use] pub fn reference(target: &Type) -> Type {
    Type::wrap(Node::Ref, target)
  }
  /// The complement type `!negated`.
  #[must_use] pub fn negation(negated: &Type) -> Type {
    Type::wrap(Node::Not, negated)
  }
  /// The actor type `process state`.
  #[must_use] pub fn process(state: &Type) -> Type {
    Type::wrap(Node::Process, state)
  }

  fn wrap(mk: fn(NodeId) -> Node, child: &Type) -> Type {
    let mut b = Builder::new();
    let c = b.splice(child);
    b.finish(mk(c))
  }

  /// The dictionary type `{key->value}`.
  #[must_use] pub fn dict(key: &Type, value: &Type) -> Type {
    let mut b = Builder::new();
    let k = b.splice(key);
    let v = b.splice(value);
    b.finish(Node::Dict(k, v))
  }

  /// The tuple type `(e1, ..., en)`.
  #[must_use] pub fn tuple(elements: &[Type]) -> Type {
    let mut b = Builder::new();
    let cs = elements.iter().map(|t| b.splice(t)).collect();
    b.finish(Node::Tuple(cs))
  }

  /// A union of the given branches. Branches that are themselves unions are
  /// inlined (one level suffices on canonical inputs); the result is *not*
  /// minimised, see [`crate::algebra::union`] for the canonical operation.
  #[must_use] pub fn union(branches: &[Type]) -> Type {
    match branches {
      [] => Type::void(),
      [t] => t.clone(),
      _ => {
        let mut b = Builder::new();
        let mut cs = SmallVec::<[NodeId; 4]>::new();
        for t in branches {
          if let Node::Union(inner) = t.root() {
            for &i in &**inner { cs.push(b.splice_from(t, i)) }
          } else {
            cs.push(b.splice(t))
          }
        }
        b.finish(Node::Union(cs.into_vec().into()))
      }
    }
  }

  /// An intersection of the given branches, with one level of inlining as
  /// for [`Type::union`].
  #[must_use] pub fn intersection(branches: &[Type]) -> Type {
    match branches {
      [] => Type::any(),
      [t] => t.clone(),
      _ => {
        let mut b = Builder::new();
        let mut cs = SmallVec::<[NodeId; 4]>::new();
        for t in branches {
          if let Node::Inter(inner) = t.root() {
            for &i in &**inner { cs.push(b.splice_from(t, i)) }
          } else {
            cs.push(b.splice(t))
          }
        }
        b.finish(Node::Inter(cs.into_vec().into()))
      }
    }
  }

  /// The function type `ret(params)`.
  #[must_use] pub fn function(ret: &Type, params: &[Type]) -> Type {
    let mut b = Builder::new();
    let mut cs = vec![b.splice(ret)];
    cs.extend(params.iter().map(|t| b.splice(t)));
    b.finish(Node::Fun(cs.into()))
  }

  /// The method type `receiver::ret(params)`.
  #[must_use] pub fn method(receiver: Option<&Type>, ret: &Type, params: &[Type]) -> Type {
    let mut b = Builder::new();
    let recv = receiver.map(|t| b.splice(t));
    let mut cs = vec![b.splice(ret)];
    cs.extend(params.iter().map(|t| b.splice(t)));
    b.finish(Node::Meth(recv, cs.into()))
  }

  /// The record type `{T1 f1, ..., Tn fn}`. Fields are sorted by name.
  #[must_use] pub fn record(open: bool, fields: &[(Symbol, Type)]) -> Type {
    let mut b = Builder::new();
    let mut fields = fields.iter()
      .map(|(name, t)| (*name, b.splice(t)))
      .collect::<Vec<_>>();
    fields.sort_by_key(|&(name, _)| name.as_str());
    b.finish(Node::Record { open, fields: fields.into() })
  }

  /// The nodes of this type. Node 0 is the root.
  #[must_use] pub fn nodes(&self) -> &[Node] { &self.nodes }

  /// The root node of this type.
  #[must_use] pub fn root(&self) -> &Node { &self.nodes[0] }

  /// The summary flags of this type.
  #[must_use] pub fn flags(&self) -> TypeFlags { self.flags }

  /// Returns true if this type is a single leaf node.
  #[must_use] pub fn is_leaf(&self) -> bool { self.nodes.len() == 1 }

  /// Returns true if this type contains no construction-time labels.
  #[must_use] pub fn is_closed(&self) -> bool { !self.flags.contains(TypeFlags::HAS_LABEL) }

  /// Extract the subgraph reachable from `root` as a fresh type, pruning
  /// everything unreachable and remapping edges into visit order.
  #[must_use] pub fn extract(&self, root: NodeId) -> Type {
    fn visit(nodes: &[Node], map: &mut [Option<NodeId>], order: &mut Vec<NodeId>, i: NodeId) {
      if map[i.into_usize()].is_some() { return }
      map[i.into_usize()] = Some(NodeId::from_usize(order.len()));
      order.push(i);
      nodes[i.into_usize()].visit_children(|c| visit(nodes, map, order, c));
    }
    let mut map = vec![None; self.nodes.len()];
    let mut order = vec![];
    visit(&self.nodes, &mut map, &mut order, root);
    let nodes = order.iter()
      .map(|&i| self.nodes[i.into_usize()]
        .map_children(|c| map[c.into_usize()].expect("reachable")))
      .collect();
    Type::from_nodes(nodes)
  }

  fn close_by(&self, mut is_target: impl FnMut(&Node) -> bool) -> Option<Type> {
    let mut remap = Vec::with_capacity(self.nodes.len());
    let mut matched = 0u32;
    for n in &*self.nodes {
      if is_target(n) {
        remap.push(NodeId(0));
        matched += 1;
      } else {
        remap.push(NodeId(u32::try_from(remap.len()).expect("overflow") - matched));
      }
    }
    if matched == 0 { return None }
    let mut nodes = Vec::with_capacity(self.nodes.len() - matched as usize);
    for n in &*self.nodes {
      if is_target(n) { continue }
      nodes.push(n.map_children(|c| remap[c.into_usize()]));
    }
    if nodes.is_empty() { return Some(Type::void()) }
    Some(Type::from_nodes(nodes))
  }

  /// Tie the recursive knot: every `Label(label)` node collapses onto the
  /// root and the array is compacted. Fails if no label matches.
  pub fn close(&self, label: Symbol) -> Result<Type, NoSuchLabel> {
    self.close_by(|n| matches!(n, Node::Label(l) if *l == label))
      .ok_or(NoSuchLabel(label))
  }

  /// As [`Type::close`], but over `Nominal(name)` placeholders; used by the
  /// resolver when a declaration turns out to be recursive. Returns `None`
  /// if the name does not occur.
  #[must_use] pub(crate) fn close_nominal(&self, name: NameId) -> Option<Type> {
    self.close_by(|n| matches!(n, Node::Nominal(m) if *m == name))
  }

  /// Returns true if the graph contains a `Nominal(name)` node.
  #[must_use] pub fn mentions(&self, name: NameId) -> bool {
    self.flags.contains(TypeFlags::HAS_NOMINAL) &&
      self.nodes.iter().any(|n| matches!(n, Node::Nominal(m) if *m == name))
  }

  /// Replace every `Nominal(name)` node with the root of `rep` (which may
  /// itself be recursive), pruning afterwards.
  #[must_use] pub fn substitute(&self, name: NameId, rep: &Type) -> Type {
    if !self.mentions(name) { return self.clone() }
    let off = self.nodes.len();
    let shift = |c: NodeId| NodeId::from_usize(c.into_usize() + off);
    let mut nodes = Vec::with_capacity(off + rep.nodes.len());
    for n in &*self.nodes {
      if matches!(n, Node::Nominal(m) if *m == name) {
        nodes.push(rep.nodes[0].map_children(shift));
      } else {
        nodes.push(n.clone());
      }
    }
    for n in &*rep.nodes {
      nodes.push(n.map_children(shift));
    }
    Type::from_nodes(nodes).extract(NodeId(0))
  }

  /// The element type of a set, list or actor reference.
  #[must_use] pub fn element(&self) -> Option<Type> {
    match *self.root() {
      Node::Set(c) | Node::List(c) | Node::Ref(c) | Node::Process(c) =>
        Some(self.extract(c)),
      Node::Str => Some(Type::char()),
      _ => None,
    }
  }

  /// The key type of a dictionary.
  #[must_use] pub fn key(&self) -> Option<Type> {
    if let Node::Dict(k, _) = *self.root() { Some(self.extract(k)) } else { None }
  }

  /// The value type of a dictionary.
  #[must_use] pub fn value(&self) -> Option<Type> {
    if let Node::Dict(_, v) = *self.root() { Some(self.extract(v)) } else { None }
  }

  /// The complemented type of a negation.
  #[must_use] pub fn negated(&self) -> Option<Type> {
    if let Node::Not(c) = *self.root() { Some(self.extract(c)) } else { None }
  }

  /// The fields of a record type, in name order.
  #[must_use] pub fn fields(&self) -> Option<Vec<(Symbol, Type)>> {
    if let Node::Record { ref fields, .. } = *self.root() {
      Some(fields.iter().map(|&(name, c)| (name, self.extract(c))).collect())
    } else { None }
  }

  /// The type of the given field of a record type.
  #[must_use] pub fn field(&self, name: Symbol) -> Option<Type> {
    if let Node::Record { ref fields, .. } = *self.root() {
      fields.iter().find(|&&(f, _)| f == name).map(|&(_, c)| self.extract(c))
    } else { None }
  }

  /// The element types of a tuple type.
  #[must_use] pub fn tuple_elements(&self) -> Option<Vec<Type>> {
    if let Node::Tuple(ref cs) = *self.root() {
      Some(cs.iter().map(|&c| self.extract(c)).collect())
    } else { None }
  }

  /// The branches of a union type.
  #[must_use] pub fn branches(&self) -> Option<Vec<Type>> {
    if let Node::Union(ref cs) = *self.root() {
      Some(cs.iter().map(|&c| self.extract(c)).collect())
    } else { None }
  }

  /// The return type of a function or method type.
  #[must_use] pub fn ret(&self) -> Option<Type> {
    match *self.root() {
      Node::Fun(ref cs) | Node::Meth(_, ref cs) => Some(self.extract(cs[0])),
      _ => None,
    }
  }

  /// The parameter types of a function or method type.
  #[must_use] pub fn params(&self) -> Option<Vec<Type>> {
    match *self.root() {
      Node::Fun(ref cs) | Node::Meth(_, ref cs) =>
        Some(cs[1..].iter().map(|&c| self.extract(c)).collect()),
      _ => None,
    }
  }

  /// The receiver type of a method type, if it has one.
  #[must_use] pub fn receiver(&self) -> Option<Type> {
    if let Node::Meth(Some(r), _) = *self.root() { Some(self.extract(r)) } else { None }
  }

  /// Returns true if this is a function or method type.
  #[must_use] pub fn is_callable(&self) -> bool {
    matches!(self.root(), Node::Fun(_) | Node::Meth(_, _))
  }
}

/// A builder accumulating a fresh node array. Slot 0 is reserved for the
/// root, which is supplied last by [`Builder::finish`].
pub(crate) struct Builder {
  nodes: IdxVec<NodeId, Node>,
}

impl Builder {
  pub(crate) fn new() -> Self {
    let mut nodes = IdxVec::new();
    nodes.push(Node::Void);
    Builder { nodes }
  }

  /// Copy the subgraph of `t` reachable from `root` into this builder,
  /// returning the new index of `root`.
  pub(crate) fn splice_from(&mut self, t: &Type, root: NodeId) -> NodeId {
    fn visit(b: &mut Builder, nodes: &[Node], map: &mut [Option<NodeId>], i: NodeId) -> NodeId {
      if let Some(n) = map[i.into_usize()] { return n }
      let n = b.nodes.push(Node::Void);
      map[i.into_usize()] = Some(n);
      let node = nodes[i.into_usize()].map_children(|c| visit(b, nodes, map, c));
      b.nodes[n] = node;
      n
    }
    let mut map = vec![None; t.nodes.len()];
    visit(self, &t.nodes, &mut map, root)
  }

  /// Copy all of `t` into this builder, returning the new index of its root.
  pub(crate) fn splice(&mut self, t: &Type) -> NodeId {
    self.splice_from(t, NodeId(0))
  }

  pub(crate) fn finish(mut self, root: Node) -> Type {
    self.nodes[NodeId(0)] = root;
    Type::from_nodes(self.nodes.0)
  }
}

impl fmt::Debug for Type {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "Type[{self}]")
  }
}

impl fmt::Display for Type {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    // Find the heads of back-edges so recursive graphs print as `Xn<...>`.
    fn find_heads(nodes: &[Node], state: &mut [u8], heads: &mut Vec<NodeId>, i: NodeId) {
      match state[i.into_usize()] {
        1 => {
          if !heads.contains(&i) { heads.push(i) }
          return
        }
        2 => return,
        _ => {}
      }
      state[i.into_usize()] = 1;
      nodes[i.into_usize()].visit_children(|c| find_heads(nodes, state, heads, c));
      state[i.into_usize()] = 2;
    }
    let mut state = vec![0; self.nodes.len()];
    let mut heads = vec![];
    find_heads(&self.nodes, &mut state, &mut heads, NodeId(0));
    let mut open = vec![false; self.nodes.len()];
    self.fmt_node(f, NodeId(0), &heads, &mut open, false)
  }
}

impl Type {
  fn fmt_node(&self, f: &mut fmt::Formatter<'_>, i: NodeId,
    heads: &[NodeId], open: &mut [bool], atom: bool,
  ) -> fmt::Result {
    let head = heads.iter().position(|&h| h == i);
    if let Some(n) = head {
      if open[i.into_usize()] { return write!(f, "X{n}") }
      open[i.into_usize()] = true;
      write!(f, "X{n}<")?;
    }
    let inner_atom = atom && head.is_none();
    let node = &self.nodes[i.into_usize()];
    let parens = inner_atom && matches!(node,
      Node::Union(_) | Node::Inter(_) | Node::Fun(_) | Node::Meth(_, _));
    if parens { write!(f, "(")? }
    match *node {
      Node::Void => write!(f, "void")?,
      Node::Any => write!(f, "any")?,
      Node::Null => write!(f, "null")?,
      Node::Bool => write!(f, "bool")?,
      Node::Byte => write!(f, "byte")?,
      Node::Char => write!(f, "char")?,
      Node::Int => write!(f, "int")?,
      Node::Real => write!(f, "real")?,
      Node::Str => write!(f, "string")?,
      Node::Set(c) => {
        write!(f, "{{")?;
        self.fmt_node(f, c, heads, open, false)?;
        write!(f, "}}")?
      }
      Node::List(c) => {
        write!(f, "[")?;
        self.fmt_node(f, c, heads, open, false)?;
        write!(f, "]")?
      }
      Node::Ref(c) => {
        write!(f, "ref ")?;
        self.fmt_node(f, c, heads, open, true)?
      }
      Node::Not(c) => {
        write!(f, "!")?;
        self.fmt_node(f, c, heads, open, true)?
      }
      Node::Process(c) => {
        write!(f, "process ")?;
        self.fmt_node(f, c, heads, open, true)?
      }
      Node::Dict(k, v) => {
        write!(f, "{{")?;
        self.fmt_node(f, k, heads, open, false)?;
        write!(f, "->")?;
        self.fmt_node(f, v, heads, open, false)?;
        write!(f, "}}")?
      }
      Node::Union(ref cs) => for (n, &c) in cs.iter().enumerate() {
        if n != 0 { write!(f, "|")? }
        self.fmt_node(f, c, heads, open, true)?
      },
      Node::Inter(ref cs) => for (n, &c) in cs.iter().enumerate() {
        if n != 0 { write!(f, "&")? }
        self.fmt_node(f, c, heads, open, true)?
      },
      Node::Tuple(ref cs) => {
        write!(f, "(")?;
        for (n, &c) in cs.iter().enumerate() {
          if n != 0 { write!(f, ",")? }
          self.fmt_node(f, c, heads, open, false)?
        }
        write!(f, ")")?
      }
      Node::Fun(ref cs) | Node::Meth(_, ref cs) => {
        if let Node::Meth(recv, _) = node {
          if let Some(r) = *recv { self.fmt_node(f, r, heads, open, true)? }
          write!(f, "::")?
        }
        self.fmt_node(f, cs[0], heads, open, true)?;
        write!(f, "(")?;
        for (n, &c) in cs[1..].iter().enumerate() {
          if n != 0 { write!(f, ",")? }
          self.fmt_node(f, c, heads, open, false)?
        }
        write!(f, ")")?
      }
      Node::Record { open: open_rec, ref fields } => {
        write!(f, "{{")?;
        for (n, &(name, c)) in fields.iter().enumerate() {
          if n != 0 { write!(f, ",")? }
          self.fmt_node(f, c, heads, open, true)?;
          write!(f, " {name}")?
        }
        if open_rec { write!(f, ",...")? }
        write!(f, "}}")?
      }
      Node::Nominal(name) => write!(f, "{}", name.name)?,
      Node::Label(l) => write!(f, "?{l}")?,
    }
    if parens { write!(f, ")")? }
    if head.is_some() {
      open[i.into_usize()] = false;
      write!(f, ">")?
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::symbol::intern;

  #[test]
  fn leaves_are_single_nodes() {
    assert!(Type::int().is_leaf());
    assert_eq!(Type::int(), Type::int());
    assert_ne!(Type::int(), Type::real());
  }

  #[test]
  fn union_inlines_child_unions() {
    let u1 = Type::union(&[Type::int(), Type::null()]);
    let u2 = Type::union(&[u1, Type::bool()]);
    let Node::Union(cs) = u2.root() else { panic!("expected a union") };
    assert_eq!(cs.len(), 3);
  }

  #[test]
  fn record_fields_sorted() {
    let r = Type::record(false, &[(intern("y"), Type::int()), (intern("x"), Type::bool())]);
    let fields = r.fields().unwrap();
    assert_eq!(fields[0].0, intern("x"));
    assert_eq!(fields[1].0, intern("y"));
    assert_eq!(r.field(intern("x")), Some(Type::bool()));
  }

  #[test]
  fn close_ties_the_knot() {
    // X<null | {int data, X next}>
    let x = intern("X");
    let rec = Type::record(false, &[
      (intern("data"), Type::int()),
      (intern("next"), Type::label(x)),
    ]);
    let open = Type::union(&[Type::null(), rec]);
    assert!(!open.is_closed());
    let closed = open.close(x).unwrap();
    assert!(closed.is_closed());
    // The `next` field of the record branch is the whole type again.
    let rec_branch = closed.branches().unwrap().into_iter()
      .find(|t| matches!(t.root(), Node::Record { .. })).unwrap();
    assert_eq!(rec_branch.field(intern("next")).unwrap(), closed);
  }

  #[test]
  fn close_without_label_fails() {
    let t = Type::list(&Type::int());
    assert_eq!(t.close(intern("X")), Err(NoSuchLabel(intern("X"))));
  }

  #[test]
  fn extract_prunes_unreachable() {
    let t = Type::dict(&Type::int(), &Type::bool());
    let v = t.value().unwrap();
    assert_eq!(v, Type::bool());
    assert!(v.is_leaf());
  }

  #[test]
  fn display_recursive() {
    let x = intern("X");
    let rec = Type::record(false, &[
      (intern("data"), Type::int()),
      (intern("next"), Type::label(x)),
    ]);
    let closed = Type::union(&[Type::null(), rec]).close(x).unwrap();
    assert_eq!(closed.to_string(), "X0<null|{int data,X0 next}>");
  }
}
