//! Ordered key→pointer collections.
//!
//! Three representations share one type: pure sequential (every key is
//! its positional index), pure keyed, and hybrid (sequential until the
//! first out-of-sequence key use, then permanently keyed). Entry
//! insertion, removal and finalization are guarded by an internal mutex
//! so two execution states sharing a group graph can touch the same
//! collection.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{anyhow, Result};

use crate::ptr::{Pointer, PointerRef};
use crate::util::fast_map::{fast_hash_map_new, FastHashMap};
use crate::val::Val;


/// Representation picked at construction. The only legal transition is
/// hybrid→keyed, and it is one-way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionMode {
    Sequential,
    Keyed,
    Hybrid,
}

/// Canonical entry key. Integral doubles and longs collapse to the same
/// integer so cross-type numeric keys match.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    Int(i64),
    Str(Arc<str>),
    Bool(bool),
    /// Non-integral double, keyed by bit pattern.
    Bits(u64),
}

impl Key {
    pub fn from_val(v: &Val) -> Result<Key> {
        match v {
            Val::Int(i) => Ok(Key::Int(*i as i64)),
            Val::Long(i) => Ok(Key::Int(*i)),
            Val::Double(d) => {
                if d.fract() == 0.0 && *d >= i64::MIN as f64 && *d <= i64::MAX as f64 {
                    Ok(Key::Int(*d as i64))
                } else {
                    Ok(Key::Bits(d.to_bits()))
                }
            }
            Val::Str(s) => Ok(Key::Str(s.clone())),
            Val::Bool(b) => Ok(Key::Bool(*b)),
            other => Err(anyhow!("Invalid collection key: {}", other.type_name())),
        }
    }

    pub fn to_val(&self) -> Val {
        match self {
            Key::Int(i) => {
                if let Ok(narrow) = i32::try_from(*i) {
                    Val::Int(narrow)
                } else {
                    Val::Long(*i)
                }
            }
            Key::Str(s) => Val::Str(s.clone()),
            Key::Bool(b) => Val::Bool(*b),
            Key::Bits(bits) => Val::Double(f64::from_bits(*bits)),
        }
    }
}

impl core::fmt::Display for Key {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Key::Int(i) => write!(f, "{i}"),
            Key::Str(s) => write!(f, "{}", s.as_ref()),
            Key::Bool(b) => write!(f, "{b}"),
            Key::Bits(bits) => write!(f, "{}", f64::from_bits(*bits)),
        }
    }
}

struct CollectionInner {
    /// Entry pointers in iteration order.
    entries: Vec<PointerRef>,
    /// Key → position in `entries`.
    index: FastHashMap<Key, usize>,
    /// True for keyed mode and for hybrids after conversion.
    is_map: bool,
}

pub struct Collection {
    mode: CollectionMode,
    inner: Mutex<CollectionInner>,
}

impl Collection {
    pub fn new(mode: CollectionMode) -> Collection {
        Collection {
            mode,
            inner: Mutex::new(CollectionInner {
                entries: Vec::new(),
                index: fast_hash_map_new(),
                is_map: mode == CollectionMode::Keyed,
            }),
        }
    }

    pub fn sequential() -> Arc<Collection> {
        Arc::new(Collection::new(CollectionMode::Sequential))
    }

    fn lock(&self) -> MutexGuard<'_, CollectionInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[inline]
    pub fn mode(&self) -> CollectionMode {
        self.mode
    }

    /// True once the collection uses keyed storage. Permanent for
    /// converted hybrids even if later accesses are sequential again.
    pub fn is_map(&self) -> bool {
        self.lock().is_map
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Look up or prepare the entry for `key`. A missing key yields an
    /// unset entry pointer; the entry joins the collection only when a
    /// value is first assigned through it, whether or not the caller
    /// asked to create it.
    pub fn get(self: &Arc<Self>, key: &Val, _create: bool) -> Result<PointerRef> {
        let key = Key::from_val(key)?;
        let mut inner = self.lock();
        if !inner.is_map {
            match key {
                Key::Int(i) if i >= 0 && (i as usize) < inner.entries.len() => {
                    return Ok(inner.entries[i as usize].clone());
                }
                Key::Int(i) if i as usize == inner.entries.len() => {
                    drop(inner);
                    return Ok(Pointer::entry(self, key));
                }
                _ => {
                    if self.mode == CollectionMode::Sequential {
                        return Err(anyhow!("Invalid key for sequential collection"));
                    }
                    // First out-of-sequence key use converts the hybrid.
                    inner.is_map = true;
                }
            }
        }
        if let Some(&pos) = inner.index.get(&key) {
            return Ok(inner.entries[pos].clone());
        }
        drop(inner);
        Ok(Pointer::entry(self, key))
    }

    pub fn get_at(&self, index: usize) -> Result<PointerRef> {
        let inner = self.lock();
        inner
            .entries
            .get(index)
            .cloned()
            .ok_or_else(|| anyhow!("Index out of range"))
    }

    /// Append a finalized entry holding `value` at the next sequential
    /// key.
    pub fn push_value(self: &Arc<Self>, value: Val) -> Result<()> {
        let mut inner = self.lock();
        let pos = inner.entries.len();
        let key = Key::Int(pos as i64);
        let ptr = Pointer::entry_with_value(self, key.clone(), value);
        inner.entries.push(ptr);
        inner.index.insert(key, pos);
        Ok(())
    }

    /// Insert a previously-unset entry pointer on its first assignment.
    pub(crate) fn finalize_entry(self: &Arc<Self>, key: Key, ptr: &PointerRef) -> Result<()> {
        let mut inner = self.lock();
        if let Some(&pos) = inner.index.get(&key) {
            inner.entries[pos] = ptr.clone();
            return Ok(());
        }
        if !inner.is_map {
            match key {
                Key::Int(i) if i as usize == inner.entries.len() => {}
                _ => return Err(anyhow!("Invalid key for sequential collection")),
            }
        }
        let pos = inner.entries.len();
        inner.entries.push(ptr.clone());
        inner.index.insert(key, pos);
        Ok(())
    }

    /// Remove the entry behind `ptr` and renumber trailing entries:
    /// positions always shift down by one; while sequential, keys shift
    /// with them.
    pub(crate) fn remove_entry(&self, ptr: &PointerRef) -> Result<()> {
        let mut inner = self.lock();
        let key = ptr
            .entry_key()
            .ok_or_else(|| anyhow!("Entry pointer has no key"))?;
        let pos = match inner.index.remove(&key) {
            Some(pos) => pos,
            None => return Ok(()), // never finalized; nothing to remove
        };
        inner.entries.remove(pos);
        if inner.is_map {
            for i in pos..inner.entries.len() {
                if let Some(k) = inner.entries[i].entry_key() {
                    inner.index.insert(k, i);
                }
            }
        } else {
            inner.index.clear();
            for i in 0..inner.entries.len() {
                let k = Key::Int(i as i64);
                inner.entries[i].set_entry_key(k.clone());
                inner.index.insert(k, i);
            }
        }
        Ok(())
    }

    /// Ordered (key, value) view; used for equality, display and
    /// serialization.
    pub fn snapshot(&self) -> Vec<(Key, Val)> {
        let inner = self.lock();
        inner
            .entries
            .iter()
            .enumerate()
            .map(|(i, entry)| {
                let key = entry.entry_key().unwrap_or(Key::Int(i as i64));
                (key, entry.value())
            })
            .collect()
    }

    pub(crate) fn entries_eq(&self, other: &Collection) -> bool {
        self.snapshot() == other.snapshot()
    }
}

impl core::fmt::Debug for Collection {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Collection")
            .field("mode", &self.mode)
            .field("entries", &self.snapshot())
            .finish()
    }
}
