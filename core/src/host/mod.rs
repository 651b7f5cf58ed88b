//! Host-side seams: external pointer resolution and the hosted group
//! registry.
//!
//! Both are explicitly threaded shared state. The engine borrows them;
//! hosts decide how they are scoped and shared between executions.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use dashmap::DashMap;

use crate::group::GroupRef;
use crate::ptr::{Pointer, PointerLocation, PointerRef};
use crate::val::ValueProvider;

#[cfg(test)]
mod host_test;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveOp {
    /// Look up; must be idempotent.
    Get,
    /// Create if missing, then look up.
    Add,
    /// Remove the backing slot.
    Delete,
}

/// Resolves identifiers the running group does not define itself.
pub trait PointerResolver: Send + Sync {
    fn resolve(
        &self,
        group: &GroupRef,
        identifier: &str,
        op: ResolveOp,
        provider: &dyn ValueProvider,
    ) -> Result<PointerRef>;
}

/// Resolver for hosts with no external state. Every resolution fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullResolver;

impl PointerResolver for NullResolver {
    fn resolve(
        &self,
        _group: &GroupRef,
        identifier: &str,
        _op: ResolveOp,
        _provider: &dyn ValueProvider,
    ) -> Result<PointerRef> {
        Err(anyhow!("Cannot resolve pointer: {identifier}"))
    }
}

/// In-memory resolver backed by a concurrent map. Suitable for host
/// globals shared by several executions.
#[derive(Default)]
pub struct MapResolver {
    slots: DashMap<Arc<str>, PointerRef>,
}

impl MapResolver {
    pub fn new() -> MapResolver {
        MapResolver::default()
    }

    /// Pre-seed a slot from the host side.
    pub fn insert(&self, identifier: impl Into<Arc<str>>, ptr: PointerRef) {
        self.slots.insert(identifier.into(), ptr);
    }

    pub fn get(&self, identifier: &str) -> Option<PointerRef> {
        self.slots.get(identifier).map(|entry| entry.value().clone())
    }
}

impl PointerResolver for MapResolver {
    fn resolve(
        &self,
        _group: &GroupRef,
        identifier: &str,
        op: ResolveOp,
        provider: &dyn ValueProvider,
    ) -> Result<PointerRef> {
        match op {
            ResolveOp::Get => self
                .slots
                .get(identifier)
                .map(|entry| entry.value().clone())
                .ok_or_else(|| anyhow!("Cannot resolve pointer: {identifier}")),
            ResolveOp::Add => {
                let identifier: Arc<str> = Arc::from(identifier);
                Ok(self
                    .slots
                    .entry(identifier.clone())
                    .or_insert_with(|| {
                        Pointer::declared(
                            PointerLocation::External,
                            identifier,
                            true,
                            provider.null(),
                        )
                    })
                    .value()
                    .clone())
            }
            ResolveOp::Delete => self
                .slots
                .remove(identifier)
                .map(|(_, ptr)| ptr)
                .ok_or_else(|| anyhow!("Cannot resolve pointer: {identifier}")),
        }
    }
}

/// Shared name→group table for hosted linking between programs.
#[derive(Default)]
pub struct GroupRegistry {
    groups: DashMap<Arc<str>, GroupRef>,
}

impl GroupRegistry {
    pub fn new() -> GroupRegistry {
        GroupRegistry::default()
    }

    /// Publish under the group's own name, replacing any previous entry.
    pub fn publish(&self, group: GroupRef) {
        self.groups.insert(group.name(), group);
    }

    pub fn retrieve(&self, name: &str) -> Result<GroupRef> {
        self.groups
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| anyhow!("Group not found: {name}"))
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}
