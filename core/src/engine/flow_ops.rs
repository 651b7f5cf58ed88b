//! Control flow, frames and scopes.

use anyhow::{anyhow, Result};
use tracing::debug;

use crate::exec::ExecutionState;
use crate::group::Group;
use crate::instr::{Instruction, Op};

use super::Engine;

impl Engine<'_> {
    /// Land on `target` after the driver's advance.
    pub(super) fn jump(&self, state: &mut ExecutionState, target: usize) -> Result<()> {
        state.set_instruction_index(target.wrapping_sub(1));
        Ok(())
    }

    pub(super) fn jump_if(
        &self,
        state: &mut ExecutionState,
        target: usize,
        when: bool,
    ) -> Result<()> {
        let condition = self.pop_val(state)?.truthy()?;
        if condition == when {
            self.jump(state, target)?;
        }
        Ok(())
    }

    pub(super) fn enter_frame(
        &self,
        state: &mut ExecutionState,
        location: usize,
        frameless: bool,
    ) -> Result<()> {
        if frameless {
            // Pure jump; the subroutine shares the caller's frame.
            return self.jump(state, location);
        }
        let group = state.frame()?.group().clone();
        state.push_frame(group, location, Vec::new())
    }

    pub(super) fn exit_frame(
        &self,
        state: &mut ExecutionState,
        target: Option<usize>,
    ) -> Result<()> {
        state.pop_frame()?;
        if let Some(target) = target {
            state.set_instruction_index(target.wrapping_sub(1));
        }
        Ok(())
    }

    /// Capture the body up to the matching end marker into a fresh group
    /// and execute it to populate the group's slots and actions. The
    /// appended feed-end sentinel hands the finished group back.
    pub(super) fn group_begin(
        &self,
        state: &mut ExecutionState,
        name: &std::sync::Arc<str>,
    ) -> Result<()> {
        let instructions = state.instructions().clone();
        let start = state.instruction_index();
        let mut nesting = 0usize;
        let mut end = None;
        for i in start + 1..instructions.len() {
            match &instructions[i].op {
                Op::GroupBegin { .. } => nesting += 1,
                Op::GroupEnd => {
                    if nesting == 0 {
                        end = Some(i);
                        break;
                    }
                    nesting -= 1;
                }
                _ => {}
            }
        }
        let end = end.ok_or_else(|| anyhow!("Unterminated group: {name}"))?;
        let mut body: Vec<Instruction> = instructions[start + 1..end].to_vec();
        body.push(Instruction::new(Op::FeedEnd));
        let group = Group::new(name.clone(), body);
        debug!(target: "loam::engine", group = %name, body = end - start - 1, "group begin");
        // Resume past the end marker once the body frame pops.
        state.set_instruction_index(end);
        state.push_frame(group, 0, Vec::new())
    }

    pub(super) fn feed_end(&self, state: &mut ExecutionState) -> Result<()> {
        let popped = state.pop_frame()?;
        if state.executable() {
            let value = self.provider.group(popped.group().clone());
            self.push_val(state, value)?;
        }
        Ok(())
    }

    pub(super) fn block_begin(&self, state: &mut ExecutionState) -> Result<()> {
        let frame = state.frame_mut()?;
        frame.enter_block();
        Ok(())
    }

    pub(super) fn block_end(&self, state: &mut ExecutionState) -> Result<()> {
        state.frame_mut()?.exit_block();
        Ok(())
    }

    pub(super) fn unstack_to_origin(&self, state: &mut ExecutionState, origin: usize) -> Result<()> {
        state.frame_mut()?.unstack_to_origin(origin);
        Ok(())
    }
}
