//! Group linking, actions and invocation.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use tracing::debug;

use crate::exec::ExecutionState;
use crate::group::{ActionValue, GroupCopyFlags, GroupMergeFlags};
use crate::ptr::{Modifiers, Pointer};
use crate::val::Val;

use super::Engine;

impl Engine<'_> {
    pub(super) fn clone_group(
        &self,
        state: &mut ExecutionState,
        flags: GroupCopyFlags,
    ) -> Result<()> {
        let source = Self::expect_group(self.pop_val(state)?)?;
        let clone = source.clone_state(flags)?;
        self.push_val(state, self.provider.group(clone))
    }

    /// Pops source, then target; pushes the merged target back.
    pub(super) fn merge_group(
        &self,
        state: &mut ExecutionState,
        flags: GroupMergeFlags,
    ) -> Result<()> {
        let source = Self::expect_group(self.pop_val(state)?)?;
        let target = Self::expect_group(self.pop_val(state)?)?;
        target.merge(&source, flags)?;
        self.push_val(state, self.provider.group(target))
    }

    pub(super) fn add_dependency(&self, state: &mut ExecutionState) -> Result<()> {
        let dependency = Self::expect_group(self.pop_val(state)?)?;
        state.frame()?.group().add_dependency(dependency);
        Ok(())
    }

    pub(super) fn load_dependency(&self, state: &mut ExecutionState, index: usize) -> Result<()> {
        let dependency = state.frame()?.group().dependency_at(index)?;
        self.push_val(state, self.provider.group(dependency))
    }

    pub(super) fn publish_group(&self, state: &mut ExecutionState) -> Result<()> {
        let group = Self::expect_group(self.pop_val(state)?)?;
        debug!(target: "loam::engine", group = %group.name(), "publish");
        self.registry.publish(group);
        Ok(())
    }

    pub(super) fn retrieve_group(&self, state: &mut ExecutionState, name: &str) -> Result<()> {
        let group = self.registry.retrieve(name)?;
        self.push_val(state, self.provider.group(group))
    }

    /// Build an action over the current group, capturing the named stack
    /// pointers, and register it under its name.
    pub(super) fn new_action(
        &self,
        state: &mut ExecutionState,
        location: usize,
        name: &Arc<str>,
        captures: &[Arc<str>],
    ) -> Result<()> {
        let frame = state.frame()?;
        let mut captured = Vec::with_capacity(captures.len());
        for identifier in captures {
            let ptr = frame
                .lookup_stack(identifier)
                .ok_or_else(|| anyhow!("Cannot resolve pointer: {identifier}"))?;
            captured.push(ptr);
        }
        let group = frame.group().clone();
        let action = Arc::new(ActionValue::new(group.clone(), location, name.clone(), captured));
        group.set_action(name.clone(), action.clone());
        self.push_val(state, self.provider.action(action))
    }

    pub(super) fn override_action(&self, state: &mut ExecutionState, location: usize) -> Result<()> {
        let replacement = match self.pop_val(state)? {
            Val::Action(action) => action,
            _ => return Err(anyhow!("Value is not executable")),
        };
        state.frame()?.group().override_action(location, replacement);
        Ok(())
    }

    /// Pops the target before any validation, so a failed invocation
    /// still consumes its operand.
    pub(super) fn invoke(&self, state: &mut ExecutionState) -> Result<()> {
        let target = self.pop(state)?;
        if target.modifiers().contains(Modifiers::EXECUTE_RESTRICTED) {
            return Err(anyhow!("Execution is not allowed"));
        }
        let action = match target.value() {
            Val::Action(action) => action,
            _ => return Err(anyhow!("Value is not executable")),
        };
        // Single-level virtual dispatch through the owning group; an
        // override that is the action itself is ignored.
        let action = match action.group().override_at(action.location()) {
            Some(replacement) if !Arc::ptr_eq(&replacement, &action) => replacement,
            _ => action,
        };
        let seeded = action
            .captured()
            .iter()
            .map(|ptr| Pointer::alias(ptr, 0, 0))
            .collect();
        debug!(target: "loam::engine", action = action.display_name(), "invoke");
        state.push_frame(action.group().clone(), action.location(), seeded)
    }

    pub(super) fn get_modifiers(&self, state: &mut ExecutionState) -> Result<()> {
        let ptr = self.pop(state)?;
        let bits = match ptr.value() {
            Val::Group(group) => group.modifiers().bits(),
            _ => ptr.modifiers().bits(),
        };
        self.push_val(state, self.provider.int(bits as i32))
    }

    /// Pops the bit-set, then the target pointer. A group-valued target
    /// takes the modifiers on the group itself as well.
    pub(super) fn set_modifiers(&self, state: &mut ExecutionState) -> Result<()> {
        let bits = match self.pop_val(state)?.as_i64() {
            Some(bits) if (0..=u8::MAX as i64).contains(&bits) => bits as u8,
            _ => return Err(anyhow!("Invalid value for modifiers")),
        };
        let modifiers = Modifiers::from_bits(bits);
        let target = self.pop(state)?;
        target.set_modifiers(modifiers);
        if let Val::Group(group) = target.value() {
            group.set_modifiers(modifiers);
        }
        Ok(())
    }
}
