//! Indirection cells over values.
//!
//! Every slot the engine works with (operand-stack cells, declared
//! variables, closure slots, collection entries) is a `Pointer`: an
//! immutable kind carrying identity and lifetime tags over a shared
//! mutable cell. Aliases clone the cell `Arc`, so assignment through one alias
//! is visible through all of them while teardown stays with the owning
//! frame or collection.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::collection::{Collection, Key};
use crate::group::GroupRef;
use crate::host::{PointerResolver, ResolveOp};
use crate::val::{Val, ValueProvider};


/// Pointer / group modifier bit-set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Modifiers(u8);

impl Modifiers {
    pub const NONE: Modifiers = Modifiers(0);
    /// The group cannot be cloned.
    pub const STATIC: Modifiers = Modifiers(1);
    /// The target cannot be invoked through this pointer.
    pub const EXECUTE_RESTRICTED: Modifiers = Modifiers(1 << 1);

    #[inline]
    pub const fn bits(self) -> u8 {
        self.0
    }

    #[inline]
    pub const fn from_bits(bits: u8) -> Modifiers {
        Modifiers(bits)
    }

    #[inline]
    pub const fn contains(self, other: Modifiers) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub const fn union(self, other: Modifiers) -> Modifiers {
        Modifiers(self.0 | other.0)
    }
}

/// Where a declared pointer's storage lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerLocation {
    Stack,
    Group,
    External,
}

#[derive(Debug, Clone)]
pub enum PointerKind {
    /// Transient operand-stack cell; value only.
    Plain,
    /// Declared variable on a frame's declared-variable stack.
    Stack {
        identifier: Arc<str>,
        /// Instruction index that created the pointer.
        origin: usize,
        /// Block nesting level at creation.
        depth: usize,
        /// Alias produced by a cross-frame merge; shares the source
        /// pointer's cell but never owns teardown.
        reference: bool,
    },
    /// Closure-scope or externally-resolved slot.
    Declared {
        location: PointerLocation,
        identifier: Arc<str>,
        /// Resolved through the external resolver instead of stored
        /// locally.
        dynamic: bool,
    },
    /// Backed by a collection key; unset until the first assignment
    /// finalizes the entry into the owning collection.
    Entry { owner: Weak<Collection> },
}

pub(crate) struct PtrState {
    value: Val,
    defined: bool,
    modifiers: Modifiers,
    entry_key: Option<Key>,
}

pub struct Pointer {
    kind: PointerKind,
    cell: Arc<RwLock<PtrState>>,
}

pub type PointerRef = Arc<Pointer>;

impl Pointer {
    fn with_state(kind: PointerKind, state: PtrState) -> PointerRef {
        Arc::new(Pointer {
            kind,
            cell: Arc::new(RwLock::new(state)),
        })
    }

    pub fn plain(value: Val) -> PointerRef {
        Self::with_state(
            PointerKind::Plain,
            PtrState {
                value,
                defined: true,
                modifiers: Modifiers::NONE,
                entry_key: None,
            },
        )
    }

    pub fn stack(identifier: Arc<str>, value: Val, origin: usize, depth: usize) -> PointerRef {
        Self::with_state(
            PointerKind::Stack {
                identifier,
                origin,
                depth,
                reference: false,
            },
            PtrState {
                value,
                defined: true,
                modifiers: Modifiers::NONE,
                entry_key: None,
            },
        )
    }

    /// A declared-but-unassigned ("void") stack pointer.
    pub fn stack_void(identifier: Arc<str>, origin: usize, depth: usize) -> PointerRef {
        Self::with_state(
            PointerKind::Stack {
                identifier,
                origin,
                depth,
                reference: false,
            },
            PtrState {
                value: Val::Null,
                defined: false,
                modifiers: Modifiers::NONE,
                entry_key: None,
            },
        )
    }

    /// Alias of a stack pointer: shares the source cell, carries its own
    /// origin and depth (the closure-capture mechanism).
    pub fn alias(source: &PointerRef, origin: usize, depth: usize) -> PointerRef {
        let identifier = source
            .identifier()
            .unwrap_or_else(|| Arc::from(""));
        Self::alias_named(source, identifier, origin, depth)
    }

    /// Alias rebound under a different name.
    pub fn alias_named(
        source: &PointerRef,
        identifier: Arc<str>,
        origin: usize,
        depth: usize,
    ) -> PointerRef {
        Arc::new(Pointer {
            kind: PointerKind::Stack {
                identifier,
                origin,
                depth,
                reference: true,
            },
            cell: Arc::clone(&source.cell),
        })
    }

    pub fn declared(
        location: PointerLocation,
        identifier: Arc<str>,
        dynamic: bool,
        value: Val,
    ) -> PointerRef {
        Self::with_state(
            PointerKind::Declared {
                location,
                identifier,
                dynamic,
            },
            PtrState {
                value,
                defined: true,
                modifiers: Modifiers::NONE,
                entry_key: None,
            },
        )
    }

    /// Unset entry pointer for `key`, to be finalized into `owner` on the
    /// first assignment.
    pub fn entry(owner: &Arc<Collection>, key: Key) -> PointerRef {
        Self::with_state(
            PointerKind::Entry {
                owner: Arc::downgrade(owner),
            },
            PtrState {
                value: Val::Null,
                defined: false,
                modifiers: Modifiers::NONE,
                entry_key: Some(key),
            },
        )
    }

    /// Already-populated entry pointer (used when a collection inserts a
    /// value directly).
    pub(crate) fn entry_with_value(owner: &Arc<Collection>, key: Key, value: Val) -> PointerRef {
        Self::with_state(
            PointerKind::Entry {
                owner: Arc::downgrade(owner),
            },
            PtrState {
                value,
                defined: true,
                modifiers: Modifiers::NONE,
                entry_key: Some(key),
            },
        )
    }

    fn read(&self) -> RwLockReadGuard<'_, PtrState> {
        self.cell.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, PtrState> {
        self.cell.write().unwrap_or_else(PoisonError::into_inner)
    }

    #[inline]
    pub fn kind(&self) -> &PointerKind {
        &self.kind
    }

    pub fn identifier(&self) -> Option<Arc<str>> {
        match &self.kind {
            PointerKind::Stack { identifier, .. } | PointerKind::Declared { identifier, .. } => {
                Some(identifier.clone())
            }
            _ => None,
        }
    }

    pub fn stack_origin(&self) -> Option<usize> {
        match &self.kind {
            PointerKind::Stack { origin, .. } => Some(*origin),
            _ => None,
        }
    }

    pub fn stack_depth(&self) -> Option<usize> {
        match &self.kind {
            PointerKind::Stack { depth, .. } => Some(*depth),
            _ => None,
        }
    }

    pub fn is_reference(&self) -> bool {
        matches!(&self.kind, PointerKind::Stack { reference: true, .. })
    }

    pub fn is_dynamic(&self) -> bool {
        matches!(&self.kind, PointerKind::Declared { dynamic: true, .. })
    }

    pub fn value(&self) -> Val {
        self.read().value.clone()
    }

    /// Write through the cell. Assigning to an unset entry pointer
    /// finalizes the entry into the owning collection first.
    pub fn set_value(self: &Arc<Self>, value: Val) -> Result<()> {
        let pending_entry = {
            let state = self.read();
            match (&self.kind, state.defined) {
                (PointerKind::Entry { owner }, false) => {
                    let key = state
                        .entry_key
                        .clone()
                        .ok_or_else(|| anyhow!("Entry pointer has no key"))?;
                    Some((owner.clone(), key))
                }
                _ => None,
            }
        };
        if let Some((owner, key)) = pending_entry {
            let collection = owner
                .upgrade()
                .ok_or_else(|| anyhow!("Collection is no longer available"))?;
            collection.finalize_entry(key, self)?;
        }
        let mut state = self.write();
        state.value = value;
        state.defined = true;
        Ok(())
    }

    /// True unless the slot is void, unset or undeclared. A pointer whose
    /// value is the null singleton is still defined.
    pub fn is_defined(&self) -> bool {
        self.read().defined
    }

    pub fn modifiers(&self) -> Modifiers {
        self.read().modifiers
    }

    pub fn set_modifiers(&self, modifiers: Modifiers) {
        self.write().modifiers = modifiers;
    }

    pub(crate) fn entry_key(&self) -> Option<Key> {
        self.read().entry_key.clone()
    }

    pub(crate) fn set_entry_key(&self, key: Key) {
        self.write().entry_key = Some(key);
    }

    /// Remove the slot this pointer stands for. Only declared and entry
    /// pointers support it.
    pub fn undeclare(
        self: &Arc<Self>,
        group: &GroupRef,
        resolver: &dyn PointerResolver,
        provider: &dyn ValueProvider,
    ) -> Result<()> {
        match &self.kind {
            PointerKind::Declared {
                identifier,
                dynamic,
                ..
            } => {
                if *dynamic {
                    resolver.resolve(group, identifier, ResolveOp::Delete, provider)?;
                }
                let mut state = self.write();
                state.defined = false;
                state.value = Val::Null;
                Ok(())
            }
            PointerKind::Entry { owner } => {
                let collection = owner
                    .upgrade()
                    .ok_or_else(|| anyhow!("Collection is no longer available"))?;
                collection.remove_entry(self)?;
                let mut state = self.write();
                state.defined = false;
                state.value = Val::Null;
                Ok(())
            }
            _ => Err(anyhow!("Cannot be undeclared.")),
        }
    }
}

impl core::fmt::Debug for Pointer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let state = self.read();
        f.debug_struct("Pointer")
            .field("kind", &self.kind)
            .field("value", &state.value)
            .field("defined", &state.defined)
            .finish()
    }
}
