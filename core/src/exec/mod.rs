//! Frames and execution state.
//!
//! An `ExecutionState` owns a stack of frames plus the instruction
//! stream currently being driven. Pushing a frame suspends the current
//! stream into the frame below (its resume fields); popping restores
//! it. The engine only ever addresses the top frame.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use tracing::debug;

use crate::group::GroupRef;
use crate::instr::Instruction;
use crate::ptr::{Pointer, PointerRef};


pub struct Frame {
    pub(crate) group: GroupRef,
    /// Operand stack.
    pub(crate) registers: Vec<PointerRef>,
    /// Declared variables, in declaration order.
    pub(crate) stack_pointers: Vec<PointerRef>,
    /// Current block nesting level.
    pub(crate) block_depth: usize,
    /// Stream position to restore when the frame above pops.
    pub(crate) resume_index: usize,
    pub(crate) resume_instructions: Arc<[Instruction]>,
}

impl Frame {
    pub(crate) fn new(group: GroupRef, stack_pointers: Vec<PointerRef>) -> Frame {
        let resume_instructions = group.instructions();
        Frame {
            group,
            registers: Vec::new(),
            stack_pointers,
            block_depth: 0,
            resume_index: 0,
            resume_instructions,
        }
    }

    #[inline]
    pub fn group(&self) -> &GroupRef {
        &self.group
    }

    #[inline]
    pub fn block_depth(&self) -> usize {
        self.block_depth
    }

    pub fn register_count(&self) -> usize {
        self.registers.len()
    }

    pub fn stack_pointer_count(&self) -> usize {
        self.stack_pointers.len()
    }

    pub(crate) fn push_register(&mut self, ptr: PointerRef) {
        self.registers.push(ptr);
    }

    pub(crate) fn pop_register(&mut self) -> Result<PointerRef> {
        self.registers
            .pop()
            .ok_or_else(|| anyhow!("Operand stack is empty"))
    }

    pub(crate) fn clear_registers(&mut self) {
        self.registers.clear();
    }

    /// Most recent declaration wins.
    pub fn lookup_stack(&self, identifier: &str) -> Option<PointerRef> {
        self.stack_pointers
            .iter()
            .rev()
            .find(|p| p.identifier().as_deref() == Some(identifier))
            .cloned()
    }

    pub(crate) fn declare_stack(&mut self, ptr: PointerRef) {
        self.stack_pointers.push(ptr);
    }

    pub(crate) fn enter_block(&mut self) {
        self.block_depth += 1;
    }

    /// Drop declarations made inside the closing block, then leave it.
    pub(crate) fn exit_block(&mut self) {
        let depth = self.block_depth;
        self.stack_pointers
            .retain(|p| p.stack_depth().map_or(true, |d| d < depth));
        self.block_depth = depth.saturating_sub(1);
    }

    /// Tail removal of every declaration made at or after `origin`.
    pub(crate) fn unstack_to_origin(&mut self, origin: usize) {
        while let Some(last) = self.stack_pointers.last() {
            match last.stack_origin() {
                Some(o) if o >= origin => {
                    self.stack_pointers.pop();
                }
                _ => break,
            }
        }
    }
}

pub struct ExecutionState {
    frames: Vec<Frame>,
    instructions: Arc<[Instruction]>,
    /// Wrapping convention: handlers that redirect control set
    /// `target.wrapping_sub(1)` and the driver advances with
    /// `wrapping_add(1)`, so a target of 0 lands correctly.
    instruction_index: usize,
    /// Multi-value transfer channel surviving frame transitions.
    buffer: Vec<PointerRef>,
    executable: bool,
}

impl ExecutionState {
    pub fn new(group: GroupRef) -> ExecutionState {
        let instructions = group.instructions();
        ExecutionState {
            frames: vec![Frame::new(group, Vec::new())],
            instructions,
            instruction_index: 0,
            buffer: Vec::new(),
            executable: true,
        }
    }

    #[inline]
    pub fn executable(&self) -> bool {
        self.executable
    }

    pub fn set_executable(&mut self, executable: bool) {
        self.executable = executable;
    }

    #[inline]
    pub fn instruction_index(&self) -> usize {
        self.instruction_index
    }

    pub(crate) fn set_instruction_index(&mut self, index: usize) {
        self.instruction_index = index;
    }

    #[inline]
    pub(crate) fn instructions(&self) -> &Arc<[Instruction]> {
        &self.instructions
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn frame(&self) -> Result<&Frame> {
        self.frames
            .last()
            .ok_or_else(|| anyhow!("No active frame"))
    }

    pub(crate) fn frame_mut(&mut self) -> Result<&mut Frame> {
        self.frames
            .last_mut()
            .ok_or_else(|| anyhow!("No active frame"))
    }

    /// Suspend the current stream into the top frame and start `group`
    /// at `location`. `stack_pointers` seeds the new frame's declared
    /// variables (captured closure slots, usually).
    pub(crate) fn push_frame(
        &mut self,
        group: GroupRef,
        location: usize,
        stack_pointers: Vec<PointerRef>,
    ) -> Result<()> {
        let index = self.instruction_index;
        let instructions = self.instructions.clone();
        {
            let current = self.frame_mut()?;
            current.resume_index = index;
            current.resume_instructions = instructions;
        }
        debug!(
            target: "loam::exec",
            group = %group.name(),
            location,
            depth = self.frames.len() + 1,
            "push frame"
        );
        self.instructions = group.instructions();
        self.instruction_index = location.wrapping_sub(1);
        self.frames.push(Frame::new(group, stack_pointers));
        Ok(())
    }

    /// Pop the top frame, restoring the suspended stream below. Popping
    /// the last frame ends the execution.
    pub(crate) fn pop_frame(&mut self) -> Result<Frame> {
        let popped = self
            .frames
            .pop()
            .ok_or_else(|| anyhow!("No active frame"))?;
        debug!(
            target: "loam::exec",
            group = %popped.group.name(),
            depth = self.frames.len(),
            "pop frame"
        );
        if let Some(below) = self.frames.last() {
            self.instructions = below.resume_instructions.clone();
            self.instruction_index = below.resume_index;
        } else {
            self.executable = false;
        }
        Ok(popped)
    }

    /// Copy an ancestor frame's stacks into the current frame; `offset`
    /// counts frames up (1 is the immediate caller). Merged stack
    /// entries become reference aliases stamped with the current frame's
    /// origin and depth, so the callee sees the ancestor's variables as
    /// if locally declared while teardown stays with the owner.
    pub(crate) fn merge_frame(&mut self, registers: bool, stack: bool, offset: usize) -> Result<()> {
        let count = self.frames.len();
        if offset == 0 || offset >= count {
            return Err(anyhow!("No calling frame to merge"));
        }
        let origin = self.instruction_index;
        let (ancestors, current) = self.frames.split_at_mut(count - 1);
        let source = &ancestors[count - 1 - offset];
        let target = &mut current[0];
        if registers {
            target.registers.extend(source.registers.iter().cloned());
        }
        if stack {
            let depth = target.block_depth;
            for ptr in &source.stack_pointers {
                target.stack_pointers.push(Pointer::alias(ptr, origin, depth));
            }
        }
        Ok(())
    }

    pub(crate) fn push_buffer(&mut self, ptr: PointerRef) {
        self.buffer.push(ptr);
    }

    pub(crate) fn drain_buffer(&mut self) -> Vec<PointerRef> {
        std::mem::take(&mut self.buffer)
    }

    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }
}
