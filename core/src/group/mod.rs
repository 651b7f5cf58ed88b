//! Instruction groups and action values.
//!
//! A group is the unit of loading and linking: an instruction stream
//! plus the pointer slots, named actions, dependencies and per-location
//! overrides that executions running the group share. Groups are always
//! handled behind `Arc`; interior state sits behind an `RwLock` so a
//! group graph can be read by several execution states at once.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, Result};
use once_cell::sync::OnceCell;

use crate::instr::Instruction;
use crate::ptr::{Modifiers, Pointer, PointerKind, PointerLocation, PointerRef};
use crate::util::fast_map::{fast_hash_map_new, FastHashMap};


pub type GroupRef = Arc<Group>;

/// Flags for [`Group::clone_state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GroupCopyFlags(u8);

impl GroupCopyFlags {
    pub const NONE: GroupCopyFlags = GroupCopyFlags(0);
    /// Carry the source group's modifiers onto the clone.
    pub const MODIFIERS: GroupCopyFlags = GroupCopyFlags(1);

    #[inline]
    pub const fn bits(self) -> u8 {
        self.0
    }

    #[inline]
    pub const fn from_bits(bits: u8) -> GroupCopyFlags {
        GroupCopyFlags(bits)
    }

    #[inline]
    pub const fn contains(self, other: GroupCopyFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

/// Flags for [`Group::merge`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GroupMergeFlags(u8);

impl GroupMergeFlags {
    pub const NONE: GroupMergeFlags = GroupMergeFlags(0);
    /// Names already present in the target are replaced instead of kept.
    pub const OVERRIDE_EXISTING: GroupMergeFlags = GroupMergeFlags(1);

    #[inline]
    pub const fn bits(self) -> u8 {
        self.0
    }

    #[inline]
    pub const fn from_bits(bits: u8) -> GroupMergeFlags {
        GroupMergeFlags(bits)
    }

    #[inline]
    pub const fn contains(self, other: GroupMergeFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

struct GroupInner {
    /// Append-only pointer slots; indices handed out stay stable.
    pointers: Vec<PointerRef>,
    pointer_index: FastHashMap<Arc<str>, usize>,
    actions: FastHashMap<Arc<str>, Arc<ActionValue>>,
    /// Position-addressed; indices baked into compiled instructions.
    dependencies: Vec<GroupRef>,
    dependency_index: FastHashMap<Arc<str>, usize>,
    /// Per-call-site action replacements, keyed by instruction index.
    overrides: FastHashMap<usize, Arc<ActionValue>>,
    modifiers: Modifiers,
}

pub struct Group {
    name: Arc<str>,
    instructions: Arc<[Instruction]>,
    inner: RwLock<GroupInner>,
}

impl Group {
    pub fn new(name: impl Into<Arc<str>>, instructions: Vec<Instruction>) -> GroupRef {
        Arc::new(Group {
            name: name.into(),
            instructions: instructions.into(),
            inner: RwLock::new(GroupInner {
                pointers: Vec::new(),
                pointer_index: fast_hash_map_new(),
                actions: fast_hash_map_new(),
                dependencies: Vec::new(),
                dependency_index: fast_hash_map_new(),
                overrides: fast_hash_map_new(),
                modifiers: Modifiers::NONE,
            }),
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, GroupInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, GroupInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    #[inline]
    pub fn name(&self) -> Arc<str> {
        self.name.clone()
    }

    #[inline]
    pub fn instructions(&self) -> Arc<[Instruction]> {
        self.instructions.clone()
    }

    pub fn modifiers(&self) -> Modifiers {
        self.read().modifiers
    }

    pub fn set_modifiers(&self, modifiers: Modifiers) {
        self.write().modifiers = modifiers;
    }

    /// Append a pointer slot, optionally binding it to a name, and return
    /// its stable index.
    pub fn add_pointer(&self, name: Option<Arc<str>>, ptr: PointerRef) -> usize {
        let mut inner = self.write();
        let index = inner.pointers.len();
        inner.pointers.push(ptr);
        if let Some(name) = name {
            inner.pointer_index.insert(name, index);
        }
        index
    }

    pub fn pointer_at(&self, index: usize) -> Result<PointerRef> {
        self.read()
            .pointers
            .get(index)
            .cloned()
            .ok_or_else(|| anyhow!("Index out of range"))
    }

    pub fn pointer_count(&self) -> usize {
        self.read().pointers.len()
    }

    pub fn slot_by_name(&self, name: &str) -> Result<PointerRef> {
        let inner = self.read();
        inner
            .pointer_index
            .get(name)
            .map(|&i| inner.pointers[i].clone())
            .ok_or_else(|| anyhow!("Unknown group member: {name}"))
    }

    pub fn set_action(&self, name: Arc<str>, action: Arc<ActionValue>) {
        self.write().actions.insert(name, action);
    }

    pub fn action_by_name(&self, name: &str) -> Result<Arc<ActionValue>> {
        self.read()
            .actions
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow!("Unknown group member: {name}"))
    }

    /// Link a dependency and return its stable index.
    pub fn add_dependency(&self, dependency: GroupRef) -> usize {
        let mut inner = self.write();
        let index = inner.dependencies.len();
        inner
            .dependency_index
            .insert(dependency.name.clone(), index);
        inner.dependencies.push(dependency);
        index
    }

    pub fn dependency_at(&self, index: usize) -> Result<GroupRef> {
        self.read()
            .dependencies
            .get(index)
            .cloned()
            .ok_or_else(|| anyhow!("Index out of range"))
    }

    pub fn dependency(&self, name: &str) -> Result<GroupRef> {
        let inner = self.read();
        inner
            .dependency_index
            .get(name)
            .map(|&i| inner.dependencies[i].clone())
            .ok_or_else(|| anyhow!("Group not found: {name}"))
    }

    /// Replace the action produced at `location` for future executions of
    /// this group.
    pub fn override_action(&self, location: usize, action: Arc<ActionValue>) {
        self.write().overrides.insert(location, action);
    }

    pub fn override_at(&self, location: usize) -> Option<Arc<ActionValue>> {
        self.read().overrides.get(&location).cloned()
    }

    /// Copy the group's linkable state into a fresh group sharing the same
    /// instruction stream. Pointer slots get fresh cells holding the
    /// current values; actions are rebound to the clone. Static groups
    /// refuse.
    pub fn clone_state(self: &Arc<Self>, flags: GroupCopyFlags) -> Result<GroupRef> {
        let source = self.read();
        if source.modifiers.contains(Modifiers::STATIC) {
            return Err(anyhow!("Cannot clone a static group"));
        }
        let clone = Arc::new(Group {
            name: self.name.clone(),
            instructions: self.instructions.clone(),
            inner: RwLock::new(GroupInner {
                pointers: Vec::new(),
                pointer_index: source.pointer_index.clone(),
                actions: fast_hash_map_new(),
                dependencies: source.dependencies.clone(),
                dependency_index: source.dependency_index.clone(),
                overrides: source.overrides.clone(),
                modifiers: if flags.contains(GroupCopyFlags::MODIFIERS) {
                    source.modifiers
                } else {
                    Modifiers::NONE
                },
            }),
        });
        {
            let mut target = clone.write();
            for ptr in &source.pointers {
                target.pointers.push(fresh_slot(ptr));
            }
            for (name, action) in &source.actions {
                target
                    .actions
                    .insert(name.clone(), Arc::new(action.rebind(clone.clone())));
            }
        }
        Ok(clone)
    }

    /// Fold `source`'s named pointers, actions and dependencies into this
    /// group.
    pub fn merge(&self, source: &Group, flags: GroupMergeFlags) -> Result<()> {
        let replace = flags.contains(GroupMergeFlags::OVERRIDE_EXISTING);
        let incoming = source.read();
        let mut inner = self.write();
        for (name, &pos) in &incoming.pointer_index {
            if !replace && inner.pointer_index.contains_key(name) {
                continue;
            }
            let index = inner.pointers.len();
            inner.pointers.push(incoming.pointers[pos].clone());
            inner.pointer_index.insert(name.clone(), index);
        }
        for (name, action) in &incoming.actions {
            if !replace && inner.actions.contains_key(name) {
                continue;
            }
            inner.actions.insert(name.clone(), action.clone());
        }
        for dep in &incoming.dependencies {
            let name = dep.name.clone();
            if !replace && inner.dependency_index.contains_key(&name) {
                continue;
            }
            let index = inner.dependencies.len();
            inner.dependencies.push(dep.clone());
            inner.dependency_index.insert(name, index);
        }
        for (&location, action) in &incoming.overrides {
            if !replace && inner.overrides.contains_key(&location) {
                continue;
            }
            inner.overrides.insert(location, action.clone());
        }
        Ok(())
    }
}

/// New cell for a cloned slot, preserving identity where the source slot
/// has one.
fn fresh_slot(source: &PointerRef) -> PointerRef {
    let value = source.value();
    match source.kind() {
        PointerKind::Declared {
            location,
            identifier,
            dynamic,
        } => Pointer::declared(*location, identifier.clone(), *dynamic, value),
        PointerKind::Stack { identifier, .. } => {
            Pointer::declared(PointerLocation::Group, identifier.clone(), false, value)
        }
        _ => Pointer::plain(value),
    }
}

impl core::fmt::Debug for Group {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Group")
            .field("name", &self.name)
            .field("instructions", &self.instructions.len())
            .field("pointers", &self.read().pointers.len())
            .finish()
    }
}

/// An invokable reference into a group: the frame entry location plus the
/// pointers captured when the action was created.
pub struct ActionValue {
    group: GroupRef,
    location: usize,
    name: Arc<str>,
    captured: Vec<PointerRef>,
    display: OnceCell<String>,
}

impl ActionValue {
    pub fn new(
        group: GroupRef,
        location: usize,
        name: impl Into<Arc<str>>,
        captured: Vec<PointerRef>,
    ) -> ActionValue {
        ActionValue {
            group,
            location,
            name: name.into(),
            captured,
            display: OnceCell::new(),
        }
    }

    #[inline]
    pub fn group(&self) -> &GroupRef {
        &self.group
    }

    #[inline]
    pub fn location(&self) -> usize {
        self.location
    }

    #[inline]
    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    #[inline]
    pub fn captured(&self) -> &[PointerRef] {
        &self.captured
    }

    /// Same entry point and captures, different owning group.
    fn rebind(&self, group: GroupRef) -> ActionValue {
        ActionValue {
            group,
            location: self.location,
            name: self.name.clone(),
            captured: self.captured.clone(),
            display: OnceCell::new(),
        }
    }

    /// Lazily-built `group.action` label used by display and
    /// serialization.
    pub fn display_name(&self) -> &str {
        self.display
            .get_or_init(|| format!("{}.{}", self.group.name(), self.name))
    }
}

impl core::fmt::Debug for ActionValue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ActionValue")
            .field("name", &self.display_name())
            .field("location", &self.location)
            .finish()
    }
}
