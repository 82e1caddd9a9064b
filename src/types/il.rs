//! The intermediate language: a stack-plus-slot three-address operation set
//! and the [`Block`] container.
//!
//! A block is an ordered list of [`Entry`]s, each bundling one [`Op`] with
//! the source position it was lowered from and an optional comment. Blocks
//! are *relabellable*: labels are block-local names, so embedding a block
//! into a larger one goes through [`Block::relabel`] to keep label
//! definitions unique, and constraint blocks are re-based onto fresh slots
//! with [`Block::shift`].
//!
//! Loop structure is expressed with bracketing operations: a
//! [`Loop`](Op::Loop) or [`ForAll`](Op::ForAll) opens a body that is closed
//! by the matching [`End`](Op::End); control reaching the `End` re-enters
//! the loop, and a branch *to* the end label exits past it.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

use bit_set::BitSet;

use crate::symbol::Symbol;
use crate::types::{mk_id, Binop, Cmp, FileSpan, ModuleId, NameId, Value};
use crate::types::ty::Type;

mk_id! {
  /// A stable index naming a local variable in a function activation.
  Slot,
}

impl fmt::Display for Slot {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "%{}", self.0) }
}

/// The slot a constraint block checks: constraint blocks are defined over
/// slot 0 and re-based with [`Block::shift`] when embedded.
pub const THIS_SLOT: Slot = Slot(0);

/// A block-local jump target. Fresh labels come from a process-wide counter
/// so that relabelling can never collide.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LabelId(u32);

static NEXT_LABEL: AtomicU32 = AtomicU32::new(0);

impl LabelId {
  /// Mint a label never used before.
  #[must_use] pub fn fresh() -> LabelId {
    LabelId(NEXT_LABEL.fetch_add(1, Ordering::Relaxed))
  }
}

impl fmt::Display for LabelId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "L{}", self.0) }
}

/// The operand direction of a binary aggregate operation: whether the
/// left, the right, or neither operand is a bare element to be lifted.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum OpDir {
  /// Both operands are aggregates.
  Uniform,
  /// The left operand is a bare element.
  Left,
  /// The right operand is a bare element.
  Right,
}

/// A single operation. The machine model is a value stack plus numbered
/// slots; operations pop their operands and push their result.
#[derive(Clone, Debug, PartialEq)]
pub enum Op {
  /// Push the value of a slot.
  Load(Slot),
  /// Pop a value into a slot.
  Store(Slot),
  /// Push a constant.
  Const(Value),
  /// Coerce the top of stack to the given type.
  Convert(Type),
  /// Pop a tuple and push its elements in order (so the last element ends
  /// up on top).
  Destructure,
  /// Pop two values and push the result of the operation. Only
  /// [`Binop::is_value_op`] operations are permitted here.
  BinOp(Binop),
  /// Pop `n` values and push a list (the first popped is the last element).
  NewList(u32),
  /// Pop `n` values and push a set.
  NewSet(u32),
  /// Pop `n` values and push a tuple.
  NewTuple(u32),
  /// Pop `n` key/value pairs and push a dictionary.
  NewDict(u32),
  /// Pop one value per field of the record type, in field name order, and
  /// push a record.
  NewRecord(Type),
  /// Pop two lists (or a list and an element, per the direction) and push
  /// their concatenation.
  ListAppend(OpDir),
  /// Pop an index and a list (or dictionary key) and push the element.
  ListLoad,
  /// Pop a list, set, dictionary or string and push its length.
  ListLength,
  /// Pop end, start and a list and push the sub-list.
  SubList,
  /// Pop a record and push the named field.
  FieldLoad(Symbol),
  /// Pop a tuple and push element `i`.
  TupleLoad(u32),
  /// Pop two sets (or a set and an element) and push their union.
  SetUnion(OpDir),
  /// Pop two sets and push their intersection.
  SetIntersect(OpDir),
  /// Pop two sets (or a set and an element) and push their difference.
  SetDifference(OpDir),
  /// Pop a value and the indices evaluated for the access path, and assign
  /// the value into the nested sub-location of the slot: `depth` counts the
  /// indexing operations on the stack and `fields` names the record fields
  /// traversed, outermost first.
  Update {
    /// The root local variable being updated.
    slot: Slot,
    /// How many evaluated indices the path consumes from the stack.
    depth: u32,
    /// The record fields traversed, outermost first.
    fields: Box<[Symbol]>,
  },
  /// Define a jump target. A label may be defined at most once per block.
  Label(LabelId),
  /// Unconditional branch.
  Goto(LabelId),
  /// Pop two values and branch if the comparison holds.
  IfGoto(Cmp, LabelId),
  /// Branch if the value in the slot is of the given type.
  IfType(Slot, Type, LabelId),
  /// Pop a value and dispatch on it.
  Switch {
    /// Where to go when no case matches.
    default: LabelId,
    /// The case values, each with its target.
    cases: Box<[(Value, LabelId)]>,
  },
  /// Pop a collection and iterate it, binding each element to the slot.
  /// The body extends to the matching [`End`](Op::End).
  ForAll {
    /// The slot each element is stored into.
    slot: Slot,
    /// The end label of the body; branch to it to exit early.
    end: LabelId,
    /// The slots modified inside the body.
    modified: BitSet,
  },
  /// An unconditional loop whose body extends to the matching
  /// [`End`](Op::End).
  Loop {
    /// The end label of the body; branch to it to exit.
    end: LabelId,
    /// The slots modified inside the body.
    modified: BitSet,
  },
  /// Close the innermost loop body labelled `l` (this defines `l`).
  End(LabelId),
  /// Open an assertion region extending to the given label.
  Assert(LabelId),
  /// Abort execution with a message.
  Fail(Box<str>),
  /// Call a named function; arguments are popped, the result is pushed if
  /// `retain`.
  Invoke {
    /// The function being called.
    name: NameId,
    /// The function signature.
    ty: Type,
    /// Whether the caller keeps the result.
    retain: bool,
  },
  /// Pop a function value and its arguments and call it.
  IndirectInvoke {
    /// The function signature.
    ty: Type,
    /// Whether the caller keeps the result.
    retain: bool,
  },
  /// Send a message to an actor: pop the receiver and arguments and invoke
  /// the named method on it.
  Send {
    /// The method being invoked.
    name: NameId,
    /// The method signature.
    ty: Type,
    /// Whether the sender blocks for the result.
    sync: bool,
    /// Whether the caller keeps the result (implies `sync`).
    retain: bool,
  },
  /// Pop a method value, a receiver and arguments and send.
  IndirectSend {
    /// The method signature.
    ty: Type,
    /// Whether the sender blocks for the result.
    sync: bool,
    /// Whether the caller keeps the result.
    retain: bool,
  },
  /// Pop a value and raise it as an exception.
  Throw,
  /// Open a protected region extending to `end`; a value raised inside it
  /// transfers to the first handler whose type matches, with the value on
  /// the stack.
  TryCatch {
    /// The label at which protection ends.
    end: LabelId,
    /// The handlers, in match order.
    handlers: Box<[(Type, LabelId)]>,
  },
  /// Return from the function, popping the result (of the given type, or
  /// void) if there is one.
  Return(Type),
  /// Pop an initial state and start a new actor, pushing its reference.
  Spawn,
  /// Pop an actor reference and push its current state.
  ProcLoad,
}

impl Op {
  /// Rewrite every slot through `f`.
  #[must_use] fn map_slots(&self, mut f: impl FnMut(Slot) -> Slot) -> Op {
    match *self {
      Op::Load(s) => Op::Load(f(s)),
      Op::Store(s) => Op::Store(f(s)),
      Op::IfType(s, ref ty, l) => Op::IfType(f(s), ty.clone(), l),
      Op::Update { slot, depth, ref fields } =>
        Op::Update { slot: f(slot), depth, fields: fields.clone() },
      Op::ForAll { slot, end, ref modified } => Op::ForAll {
        slot: f(slot),
        end,
        modified: modified.iter().map(|s| f(Slot(s as u32)).0 as usize).collect(),
      },
      Op::Loop { end, ref modified } => Op::Loop {
        end,
        modified: modified.iter().map(|s| f(Slot(s as u32)).0 as usize).collect(),
      },
      ref op => op.clone(),
    }
  }

  /// Rewrite every label reference (and definition) through `f`.
  #[must_use] fn map_labels(&self, mut f: impl FnMut(LabelId) -> LabelId) -> Op {
    match *self {
      Op::Label(l) => Op::Label(f(l)),
      Op::Goto(l) => Op::Goto(f(l)),
      Op::IfGoto(c, l) => Op::IfGoto(c, f(l)),
      Op::IfType(s, ref ty, l) => Op::IfType(s, ty.clone(), f(l)),
      Op::Switch { default, ref cases } => Op::Switch {
        default: f(default),
        cases: cases.iter().map(|&(ref v, l)| (v.clone(), f(l))).collect(),
      },
      Op::ForAll { slot, end, ref modified } =>
        Op::ForAll { slot, end: f(end), modified: modified.clone() },
      Op::Loop { end, ref modified } => Op::Loop { end: f(end), modified: modified.clone() },
      Op::End(l) => Op::End(f(l)),
      Op::Assert(l) => Op::Assert(f(l)),
      Op::TryCatch { end, ref handlers } => Op::TryCatch {
        end: f(end),
        handlers: handlers.iter().map(|&(ref ty, l)| (ty.clone(), f(l))).collect(),
      },
      ref op => op.clone(),
    }
  }

  /// Rewrite every embedded type through `f`.
  #[must_use] fn map_types(&self, mut f: impl FnMut(&Type) -> Type) -> Op {
    match *self {
      Op::Convert(ref ty) => Op::Convert(f(ty)),
      Op::NewRecord(ref ty) => Op::NewRecord(f(ty)),
      Op::IfType(s, ref ty, l) => Op::IfType(s, f(ty), l),
      Op::Invoke { name, ref ty, retain } => Op::Invoke { name, ty: f(ty), retain },
      Op::IndirectInvoke { ref ty, retain } => Op::IndirectInvoke { ty: f(ty), retain },
      Op::Send { name, ref ty, sync, retain } =>
        Op::Send { name, ty: f(ty), sync, retain },
      Op::IndirectSend { ref ty, sync, retain } =>
        Op::IndirectSend { ty: f(ty), sync, retain },
      Op::TryCatch { end, ref handlers } => Op::TryCatch {
        end,
        handlers: handlers.iter().map(|&(ref ty, l)| (f(ty), l)).collect(),
      },
      Op::Return(ref ty) => Op::Return(f(ty)),
      ref op => op.clone(),
    }
  }

  /// The slot this operation reads or writes directly, if any.
  #[must_use] pub fn slot(&self) -> Option<Slot> {
    match *self {
      Op::Load(s) | Op::Store(s) | Op::IfType(s, _, _) |
      Op::Update { slot: s, .. } | Op::ForAll { slot: s, .. } => Some(s),
      _ => None,
    }
  }

  /// Returns true if this operation defines the given label.
  #[must_use] pub fn defines(&self, l: LabelId) -> bool {
    matches!(*self, Op::Label(m) | Op::End(m) if m == l)
  }
}

/// One block entry: an operation plus its positional attributes.
#[derive(Clone, Debug, PartialEq)]
pub struct Entry {
  /// The operation.
  pub op: Op,
  /// The source position the operation was lowered from.
  pub span: Option<FileSpan>,
  /// An optional comment for diagnostics.
  pub comment: Option<Box<str>>,
}

/// An ordered sequence of operations, together with the number of input
/// slots the block consumes.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Block {
  /// The number of input slots; slots `[0, inputs)` are defined on entry.
  pub inputs: u32,
  /// The operations.
  pub entries: Vec<Entry>,
}

impl Block {
  /// A new empty block consuming the given number of input slots.
  #[must_use] pub fn new(inputs: u32) -> Block {
    Block { inputs, entries: vec![] }
  }

  /// Append an operation with a source position.
  pub fn push(&mut self, op: Op, span: FileSpan) {
    self.entries.push(Entry { op, span: Some(span), comment: None });
  }

  /// Append a synthesised operation with no source position.
  pub fn push_synth(&mut self, op: Op) {
    self.entries.push(Entry { op, span: None, comment: None });
  }

  /// Append all entries of another block.
  pub fn append(&mut self, other: Block) {
    self.entries.extend(other.entries);
  }

  /// The number of slots this block touches: one more than the highest slot
  /// index used, or the input count if that is higher.
  #[must_use] pub fn num_slots(&self) -> u32 {
    self.entries.iter()
      .filter_map(|e| e.op.slot())
      .map(|s| s.0 + 1)
      .max()
      .unwrap_or(0)
      .max(self.inputs)
  }

  /// Re-base the block onto slots `[k, k+n)`: every slot `s` becomes
  /// `s + k`. `shift(b, 0)` is the identity.
  #[must_use] pub fn shift(&self, k: u32) -> Block {
    Block {
      inputs: self.inputs + k,
      entries: self.entries.iter().map(|e| Entry {
        op: e.op.map_slots(|s| Slot(s.0 + k)),
        span: e.span,
        comment: e.comment.clone(),
      }).collect(),
    }
  }

  /// Rename every label defined in this block to a fresh one, rewriting
  /// internal references. References to labels defined elsewhere are left
  /// alone, so a relabelled block can be embedded without capture.
  #[must_use] pub fn relabel(&self) -> Block {
    let mut map = hashbrown::HashMap::new();
    for e in &self.entries {
      if let Op::Label(l) | Op::End(l) = e.op {
        map.entry(l).or_insert_with(LabelId::fresh);
      }
    }
    Block {
      inputs: self.inputs,
      entries: self.entries.iter().map(|e| Entry {
        op: e.op.map_labels(|l| map.get(&l).copied().unwrap_or(l)),
        span: e.span,
        comment: e.comment.clone(),
      }).collect(),
    }
  }

  /// Rewrite every type embedded in the block, replacing `Nominal(name)`
  /// placeholders by `rep`. Used when a recursive declaration is closed
  /// after its constraint block was synthesised.
  #[must_use] pub fn substitute_type(&self, name: NameId, rep: &Type) -> Block {
    Block {
      inputs: self.inputs,
      entries: self.entries.iter().map(|e| Entry {
        op: e.op.map_types(|t| t.substitute(name, rep)),
        span: e.span,
        comment: e.comment.clone(),
      }).collect(),
    }
  }

  /// Rewrite every [`Fail`](Op::Fail) into a branch to `target`. Used for
  /// union-type constraints, where failure of one branch must not be fatal.
  #[must_use] pub fn chain(&self, target: LabelId) -> Block {
    Block {
      inputs: self.inputs,
      entries: self.entries.iter().map(|e| Entry {
        op: if let Op::Fail(_) = e.op { Op::Goto(target) } else { e.op.clone() },
        span: e.span,
        comment: e.comment.clone(),
      }).collect(),
    }
  }

  /// Check the block invariants: every label is defined at most once and
  /// every branch targets a defined label.
  pub fn validate(&self) -> Result<(), String> {
    let mut defined = hashbrown::HashSet::new();
    for e in &self.entries {
      if let Op::Label(l) | Op::End(l) = e.op {
        if !defined.insert(l) {
          return Err(format!("label {l} defined twice"))
        }
      }
    }
    for e in &self.entries {
      let check = |l: LabelId| if defined.contains(&l) { Ok(()) } else {
        Err(format!("branch to undefined label {l}"))
      };
      match e.op {
        Op::Goto(l) | Op::IfGoto(_, l) | Op::IfType(_, _, l) | Op::Assert(l) => check(l)?,
        Op::ForAll { end, .. } | Op::Loop { end, .. } => check(end)?,
        Op::Switch { default, ref cases } => {
          check(default)?;
          for &(_, l) in &**cases { check(l)? }
        }
        Op::TryCatch { end, ref handlers } => {
          check(end)?;
          for &(_, l) in &**handlers { check(l)? }
        }
        _ => {}
      }
    }
    Ok(())
  }
}

impl fmt::Display for Op {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match *self {
      Op::Load(s) => write!(f, "load {s}"),
      Op::Store(s) => write!(f, "store {s}"),
      Op::Const(ref v) => write!(f, "const {v}"),
      Op::Convert(ref ty) => write!(f, "convert {ty}"),
      Op::Destructure => write!(f, "destructure"),
      Op::BinOp(op) => write!(f, "binop {op}"),
      Op::NewList(n) => write!(f, "newlist {n}"),
      Op::NewSet(n) => write!(f, "newset {n}"),
      Op::NewTuple(n) => write!(f, "newtuple {n}"),
      Op::NewDict(n) => write!(f, "newdict {n}"),
      Op::NewRecord(ref ty) => write!(f, "newrecord {ty}"),
      Op::ListAppend(dir) => write!(f, "append {dir:?}"),
      Op::ListLoad => write!(f, "listload"),
      Op::ListLength => write!(f, "listlength"),
      Op::SubList => write!(f, "sublist"),
      Op::FieldLoad(name) => write!(f, "fieldload {name}"),
      Op::TupleLoad(i) => write!(f, "tupleload {i}"),
      Op::SetUnion(dir) => write!(f, "union {dir:?}"),
      Op::SetIntersect(dir) => write!(f, "intersect {dir:?}"),
      Op::SetDifference(dir) => write!(f, "difference {dir:?}"),
      Op::Update { slot, depth, ref fields } => {
        write!(f, "update {slot} {depth}")?;
        for name in &**fields { write!(f, " .{name}")? }
        Ok(())
      }
      Op::Label(l) => write!(f, "{l}:"),
      Op::Goto(l) => write!(f, "goto {l}"),
      Op::IfGoto(c, l) => write!(f, "if {c} goto {l}"),
      Op::IfType(s, ref ty, l) => write!(f, "if {s} is {ty} goto {l}"),
      Op::Switch { default, ref cases } => {
        write!(f, "switch default {default}")?;
        for &(ref v, l) in &**cases { write!(f, ", {v} {l}")? }
        Ok(())
      }
      Op::ForAll { slot, end, .. } => write!(f, "forall {slot} {end}"),
      Op::Loop { end, .. } => write!(f, "loop {end}"),
      Op::End(l) => write!(f, "end {l}"),
      Op::Assert(l) => write!(f, "assert {l}"),
      Op::Fail(ref msg) => write!(f, "fail {msg:?}"),
      Op::Invoke { name, retain, .. } =>
        write!(f, "invoke {name}{}", if retain { "" } else { " void" }),
      Op::IndirectInvoke { retain, .. } =>
        write!(f, "indirectinvoke{}", if retain { "" } else { " void" }),
      Op::Send { name, sync, .. } =>
        write!(f, "send{} {name}", if sync { " sync" } else { "" }),
      Op::IndirectSend { sync, .. } =>
        write!(f, "indirectsend{}", if sync { " sync" } else { "" }),
      Op::Throw => write!(f, "throw"),
      Op::TryCatch { end, ref handlers } => {
        write!(f, "trycatch {end}")?;
        for &(ref ty, l) in &**handlers { write!(f, ", {ty} {l}")? }
        Ok(())
      }
      Op::Return(ref ty) => write!(f, "return {ty}"),
      Op::Spawn => write!(f, "spawn"),
      Op::ProcLoad => write!(f, "procload"),
    }
  }
}

impl fmt::Display for Block {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    writeln!(f, "block({} inputs)", self.inputs)?;
    for e in &self.entries {
      match e.op {
        Op::Label(_) | Op::End(_) => write!(f, "{}", e.op)?,
        _ => write!(f, "    {}", e.op)?,
      }
      if let Some(c) = &e.comment { write!(f, " ; {c}")? }
      writeln!(f)?
    }
    Ok(())
  }
}

/// The compiled form of one compilation unit.
#[derive(Clone, Debug, PartialEq)]
pub struct Module {
  /// The module path.
  pub id: ModuleId,
  /// The resolved type declarations.
  pub types: Vec<TypeDef>,
  /// The evaluated constant declarations.
  pub constants: Vec<ConstDef>,
  /// The lowered function and method declarations.
  pub functions: Vec<FunctionDef>,
}

/// A resolved type declaration.
#[derive(Clone, Debug, PartialEq)]
pub struct TypeDef {
  /// The declared name.
  pub name: NameId,
  /// The structural expansion of the declaration.
  pub ty: Type,
  /// The constraint block, if the type carries a `where` predicate or
  /// inherits one from a component.
  pub constraint: Option<Block>,
}

/// An evaluated constant declaration.
#[derive(Clone, Debug, PartialEq)]
pub struct ConstDef {
  /// The declared name.
  pub name: NameId,
  /// The folded value.
  pub value: Value,
}

/// A lowered function or method.
#[derive(Clone, Debug, PartialEq)]
pub struct FunctionDef {
  /// The declared name.
  pub name: NameId,
  /// The signature, a function or method type.
  pub ty: Type,
  /// The precondition over the parameter slots, if any.
  pub precondition: Option<Block>,
  /// The postcondition, over slot 0 bound to the return value and slots
  /// `>= 1` bound to shadow copies of the parameters.
  pub postcondition: Option<Block>,
  /// The body.
  pub body: Block,
  /// The source position of the declaration.
  pub span: FileSpan,
}

#[cfg(test)]
mod tests {
  use super::*;

  fn sample_block() -> Block {
    let l = LabelId::fresh();
    let mut b = Block::new(1);
    b.push_synth(Op::Load(Slot(0)));
    b.push_synth(Op::Const(Value::int(0)));
    b.push_synth(Op::IfGoto(Cmp::Ge, l));
    b.push_synth(Op::Fail("too small".into()));
    b.push_synth(Op::Label(l));
    b
  }

  #[test]
  fn shift_rebases_slots() {
    let b = sample_block();
    assert_eq!(b.shift(0).entries, b.entries);
    let b3 = b.shift(3);
    assert_eq!(b3.entries[0].op, Op::Load(Slot(3)));
    assert_eq!(b3.num_slots(), 4);
    assert_eq!(b.shift(2).shift(3).entries, b.shift(5).entries);
  }

  #[test]
  fn relabel_is_fresh_and_stable() {
    let b = sample_block();
    let r1 = b.relabel();
    let r2 = b.relabel();
    // Different labels each time...
    assert_ne!(r1.entries[2].op, r2.entries[2].op);
    // ...but the same shape: a second relabelling is itself a relabelling
    // of the first.
    let Op::IfGoto(_, l1) = r1.entries[2].op else { panic!() };
    assert_eq!(r1.entries[4].op, Op::Label(l1));
    assert!(r1.validate().is_ok());
    assert!(r2.validate().is_ok());
  }

  #[test]
  fn relabel_leaves_external_targets() {
    let ext = LabelId::fresh();
    let mut b = Block::new(0);
    b.push_synth(Op::Goto(ext));
    assert_eq!(b.relabel().entries[0].op, Op::Goto(ext));
  }

  #[test]
  fn chain_rewrites_fail() {
    let b = sample_block();
    let tgt = LabelId::fresh();
    let c = b.chain(tgt);
    assert_eq!(c.entries[3].op, Op::Goto(tgt));
    assert!(matches!(b.entries[3].op, Op::Fail(_)));
  }

  #[test]
  fn validate_rejects_duplicate_labels() {
    let l = LabelId::fresh();
    let mut b = Block::new(0);
    b.push_synth(Op::Label(l));
    b.push_synth(Op::Label(l));
    assert!(b.validate().is_err());
    let mut b2 = Block::new(0);
    b2.push_synth(Op::Goto(l));
    assert!(b2.validate().is_err());
  }

  #[test]
  fn modified_sets_shift() {
    let end = LabelId::fresh();
    let mut modified = BitSet::new();
    modified.insert(0);
    modified.insert(2);
    let mut b = Block::new(1);
    b.push_synth(Op::Loop { end, modified });
    b.push_synth(Op::End(end));
    let s = b.shift(2);
    let Op::Loop { ref modified, .. } = s.entries[0].op else { panic!() };
    assert!(modified.contains(2) && modified.contains(4));
    assert!(!modified.contains(0));
  }
}
