//! The global symbol interner.
//!
//! Identifiers, field names and file names are interned once and passed
//! around as plain `u32` indices. The interner leaks the backing strings so
//! that [`Symbol::as_str`] can hand out `&'static str` without holding a lock.

use std::fmt;
use std::sync::{LazyLock, Mutex};

use hashbrown::HashMap;

/// An interned string.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(u32);

impl Symbol {
  /// The symbol for `$`, the value under test in a type constraint.
  pub const THIS: Symbol = Symbol(0);

  /// Get the index of this symbol in the interner.
  #[must_use] pub fn into_usize(self) -> usize { self.0 as usize }

  /// Get the string corresponding to this symbol.
  #[must_use] pub fn as_str(self) -> &'static str {
    INTERNER.lock().expect("poisoned").strs[self.0 as usize]
  }
}

impl fmt::Display for Symbol {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { self.as_str().fmt(f) }
}

impl fmt::Debug for Symbol {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { self.as_str().fmt(f) }
}

/// The string interner, mapping between strings and [`Symbol`] indices.
#[derive(Default)]
pub struct Interner {
  names: HashMap<&'static str, Symbol>,
  strs: Vec<&'static str>,
}

impl Interner {
  /// Intern a string, returning the canonical symbol for it.
  pub fn intern(&mut self, s: &str) -> Symbol {
    if let Some(&sym) = self.names.get(s) { return sym }
    let n = u32::try_from(self.strs.len()).expect("interner overflow");
    let s: &'static str = Box::leak(s.to_owned().into_boxed_str());
    let sym = Symbol(n);
    self.strs.push(s);
    self.names.insert(s, sym);
    sym
  }
}

static INTERNER: LazyLock<Mutex<Interner>> = LazyLock::new(|| {
  let mut i = Interner::default();
  assert_eq!(i.intern("$"), Symbol::THIS);
  Mutex::new(i)
});

/// Intern a string in the global interner.
pub fn intern(s: &str) -> Symbol { INTERNER.lock().expect("poisoned").intern(s) }

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn intern_is_idempotent() {
    let a = intern("foo");
    let b = intern("foo");
    assert_eq!(a, b);
    assert_eq!(a.as_str(), "foo");
    assert_ne!(a, intern("bar"));
  }

  #[test]
  fn this_symbol() {
    assert_eq!(intern("$"), Symbol::THIS);
  }
}
