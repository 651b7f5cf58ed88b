//! Materialization, pointer creation, assignment and bulk transfers.

use std::sync::Arc;

use anyhow::{anyhow, Result};

use crate::exec::ExecutionState;
use crate::host::ResolveOp;
use crate::instr::{BindSource, PointerSpec};
use crate::ptr::{Pointer, PointerLocation, PointerRef};
use crate::val::Val;

use super::Engine;

impl Engine<'_> {
    pub(super) fn push_value(&self, state: &mut ExecutionState, value: &Val) -> Result<()> {
        self.push_val(state, value.clone())
    }

    /// Declare a void stack pointer; it reads as not defined until the
    /// first assignment through it.
    pub(super) fn declare_stack(
        &self,
        state: &mut ExecutionState,
        identifier: &Arc<str>,
    ) -> Result<()> {
        let origin = state.instruction_index();
        let frame = state.frame_mut()?;
        let depth = frame.block_depth();
        frame.declare_stack(Pointer::stack_void(identifier.clone(), origin, depth));
        Ok(())
    }

    pub(super) fn load_stack(&self, state: &mut ExecutionState, identifier: &str) -> Result<()> {
        let ptr = state
            .frame()?
            .lookup_stack(identifier)
            .ok_or_else(|| anyhow!("Cannot resolve pointer: {identifier}"))?;
        self.push(state, ptr)
    }

    pub(super) fn load_group(&self, state: &mut ExecutionState, index: usize) -> Result<()> {
        let ptr = state.frame()?.group().pointer_at(index)?;
        self.push(state, ptr)
    }

    pub(super) fn load_group_named(&self, state: &mut ExecutionState, name: &str) -> Result<()> {
        let ptr = state.frame()?.group().slot_by_name(name)?;
        self.push(state, ptr)
    }

    pub(super) fn load_dynamic(&self, state: &mut ExecutionState, identifier: &str) -> Result<()> {
        let group = state.frame()?.group().clone();
        let ptr = self
            .resolver
            .resolve(&group, identifier, ResolveOp::Get, self.provider)?;
        self.push(state, ptr)
    }

    /// Move the top `count` registers into the buffer, oldest first.
    pub(super) fn register_to_buffer(
        &self,
        state: &mut ExecutionState,
        count: usize,
    ) -> Result<()> {
        let mut moved = Vec::with_capacity(count);
        for _ in 0..count {
            moved.push(self.pop(state)?);
        }
        moved.reverse();
        for ptr in moved {
            state.push_buffer(ptr);
        }
        Ok(())
    }

    pub(super) fn buffer_to_register(&self, state: &mut ExecutionState) -> Result<()> {
        for ptr in state.drain_buffer() {
            self.push(state, ptr)?;
        }
        Ok(())
    }

    /// Declare a named stack pointer and leave it on the operand stack.
    pub(super) fn bind_stack(
        &self,
        state: &mut ExecutionState,
        identifier: &Arc<str>,
        source: &BindSource,
    ) -> Result<()> {
        let origin = state.instruction_index();
        let depth = state.frame()?.block_depth();
        let ptr = match source {
            BindSource::Value(value) => {
                Pointer::stack(identifier.clone(), value.clone(), origin, depth)
            }
            BindSource::Pointer => {
                let source = self.pop(state)?;
                Pointer::alias_named(&source, identifier.clone(), origin, depth)
            }
            BindSource::Register => {
                let value = self.pop_val(state)?;
                Pointer::stack(identifier.clone(), value, origin, depth)
            }
        };
        state.frame_mut()?.declare_stack(ptr.clone());
        self.push(state, ptr)
    }

    pub(super) fn bind_group(
        &self,
        state: &mut ExecutionState,
        identifier: &Arc<str>,
        source: &BindSource,
    ) -> Result<()> {
        let ptr = match source {
            BindSource::Value(value) => Pointer::declared(
                PointerLocation::Group,
                identifier.clone(),
                false,
                value.clone(),
            ),
            // Group slots may share an existing cell outright.
            BindSource::Pointer => self.pop(state)?,
            BindSource::Register => {
                let value = self.pop_val(state)?;
                Pointer::declared(PointerLocation::Group, identifier.clone(), false, value)
            }
        };
        let group = state.frame()?.group().clone();
        group.add_pointer(Some(identifier.clone()), ptr.clone());
        self.push(state, ptr)
    }

    pub(super) fn bind_dynamic(
        &self,
        state: &mut ExecutionState,
        identifier: &str,
        source: &BindSource,
    ) -> Result<()> {
        let value = match source {
            BindSource::Value(value) => value.clone(),
            BindSource::Pointer | BindSource::Register => self.pop_val(state)?,
        };
        let group = state.frame()?.group().clone();
        let target = self
            .resolver
            .resolve(&group, identifier, ResolveOp::Add, self.provider)?;
        target.set_value(value)?;
        self.push(state, target)
    }

    /// Pops source, then target; writes through the target cell.
    pub(super) fn assign(&self, state: &mut ExecutionState) -> Result<()> {
        let source = self.pop(state)?;
        let target = self.pop(state)?;
        target.set_value(source.value())
    }

    pub(super) fn bulk_load(
        &self,
        state: &mut ExecutionState,
        specs: &[PointerSpec],
    ) -> Result<()> {
        for spec in specs {
            let ptr = self.resolve_spec(state, spec, ResolveOp::Get)?;
            self.push(state, ptr)?;
        }
        Ok(())
    }

    /// Pops one value per spec (top of stack pairs with the last spec).
    pub(super) fn bulk_store(
        &self,
        state: &mut ExecutionState,
        specs: &[PointerSpec],
    ) -> Result<()> {
        let mut sources = Vec::with_capacity(specs.len());
        for _ in specs {
            sources.push(self.pop(state)?);
        }
        sources.reverse();
        for (spec, source) in specs.iter().zip(sources) {
            let target = self.resolve_spec(state, spec, ResolveOp::Add)?;
            target.set_value(source.value())?;
        }
        Ok(())
    }

    fn resolve_spec(
        &self,
        state: &mut ExecutionState,
        spec: &PointerSpec,
        op: ResolveOp,
    ) -> Result<PointerRef> {
        match spec {
            PointerSpec::Stack(identifier) => {
                if let Some(ptr) = state.frame()?.lookup_stack(identifier) {
                    return Ok(ptr);
                }
                if op == ResolveOp::Add {
                    let origin = state.instruction_index();
                    let frame = state.frame_mut()?;
                    let depth = frame.block_depth();
                    let ptr = Pointer::stack_void(identifier.clone(), origin, depth);
                    frame.declare_stack(ptr.clone());
                    return Ok(ptr);
                }
                Err(anyhow!("Cannot resolve pointer: {identifier}"))
            }
            PointerSpec::GroupSlot(index) => state.frame()?.group().pointer_at(*index),
            PointerSpec::Dynamic(identifier) => {
                let group = state.frame()?.group().clone();
                self.resolver.resolve(&group, identifier, op, self.provider)
            }
        }
    }

    /// An absent operand reads as not defined.
    pub(super) fn is_defined(&self, state: &mut ExecutionState) -> Result<()> {
        let defined = state
            .frame_mut()?
            .registers
            .pop()
            .is_some_and(|ptr| ptr.is_defined());
        self.push_val(state, self.provider.boolean(defined))
    }

    pub(super) fn undeclare(&self, state: &mut ExecutionState) -> Result<()> {
        let ptr = self.pop(state)?;
        let group = state.frame()?.group().clone();
        ptr.undeclare(&group, self.resolver, self.provider)
    }
}
