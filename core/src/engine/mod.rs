//! The dispatch engine.
//!
//! `Engine` borrows its host seams and drives an `ExecutionState`
//! through fetch/dispatch/advance. Dispatch is one exhaustive match;
//! handlers live in the sibling `*_ops` modules grouped by concern.
//! Errors propagate out of `run` and leave the state non-resumable in
//! any meaningful sense; hosts should discard it.

use anyhow::{anyhow, Result};
use tracing::trace;

use crate::exec::ExecutionState;
use crate::host::{GroupRegistry, PointerResolver};
use crate::instr::Op;
use crate::ptr::PointerRef;
use crate::val::{BinOp, UnaryOp, Val, ValueProvider};

mod bind_ops;
mod collection_ops;
mod flow_ops;
mod group_ops;
mod math_ops;

#[cfg(test)]
mod engine_test;

/// Per-run knobs. `max_instructions` lets a host time-box a run; the
/// state stays executable and a later `run` picks up where it stopped.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    pub max_instructions: Option<u64>,
}

pub struct Engine<'h> {
    provider: &'h dyn ValueProvider,
    resolver: &'h dyn PointerResolver,
    registry: &'h GroupRegistry,
}

impl<'h> Engine<'h> {
    pub fn new(
        provider: &'h dyn ValueProvider,
        resolver: &'h dyn PointerResolver,
        registry: &'h GroupRegistry,
    ) -> Engine<'h> {
        Engine {
            provider,
            resolver,
            registry,
        }
    }

    /// Drive until the state halts or its stream ends.
    pub fn run(&self, state: &mut ExecutionState) -> Result<()> {
        self.run_with(state, RunOptions::default())
    }

    pub fn run_with(&self, state: &mut ExecutionState, options: RunOptions) -> Result<()> {
        let mut executed: u64 = 0;
        while state.executable() {
            if let Some(max) = options.max_instructions {
                // An exhausted budget only pauses at an interruptible
                // instruction; protected spans run to their end.
                if executed >= max && Self::interruptible(state) {
                    break;
                }
            }
            self.step(state)?;
            executed += 1;
        }
        Ok(())
    }

    fn interruptible(state: &ExecutionState) -> bool {
        state
            .instructions()
            .get(state.instruction_index())
            .map_or(true, |i| i.interruptible)
    }

    /// Execute one instruction; the host's cooperative boundary.
    pub fn step(&self, state: &mut ExecutionState) -> Result<()> {
        let instructions = state.instructions().clone();
        let index = state.instruction_index();
        if index >= instructions.len() {
            // Running off the end of a stream behaves as an exit.
            state.pop_frame()?;
            state.set_instruction_index(state.instruction_index().wrapping_add(1));
            return Ok(());
        }
        let instruction = &instructions[index];
        trace!(target: "loam::engine", index, op = ?instruction.op, "exec");
        self.dispatch(state, &instruction.op).map_err(|err| {
            match instruction.position {
                Some(pos) => err.context(format!("at {}:{}", pos.line, pos.column)),
                None => err,
            }
        })?;
        state.set_instruction_index(state.instruction_index().wrapping_add(1));
        Ok(())
    }

    fn dispatch(&self, state: &mut ExecutionState, op: &Op) -> Result<()> {
        match op {
            // Markers are stable jump landings; executing one is a no-op.
            Op::Non | Op::LoopBegin | Op::CondBegin | Op::GroupEnd => Ok(()),

            Op::Jump { target } => self.jump(state, *target),
            Op::JumpIf { target } => self.jump_if(state, *target, true),
            Op::JumpIfNot { target } => self.jump_if(state, *target, false),
            Op::LoopEnd { target } | Op::CondEnd { target } => self.jump(state, *target),
            Op::Halt => {
                state.set_executable(false);
                Ok(())
            }

            Op::EnterFrame { location, frameless } => {
                self.enter_frame(state, *location, *frameless)
            }
            Op::ExitFrame { target } => self.exit_frame(state, *target),
            Op::GroupBegin { name } => self.group_begin(state, name),
            Op::FeedEnd => self.feed_end(state),
            Op::BlockBegin => self.block_begin(state),
            Op::BlockEnd => self.block_end(state),
            Op::UnstackToOrigin { origin } => self.unstack_to_origin(state, *origin),
            Op::MergeFrame {
                registers,
                stack,
                offset,
            } => state.merge_frame(*registers, *stack, *offset),

            Op::PushValue { value } => self.push_value(state, value),
            Op::DeclareStack { identifier } => self.declare_stack(state, identifier),
            Op::LoadStack { identifier } => self.load_stack(state, identifier),
            Op::LoadGroup { index } => self.load_group(state, *index),
            Op::LoadGroupNamed { name } => self.load_group_named(state, name),
            Op::LoadDynamic { identifier } => self.load_dynamic(state, identifier),
            Op::RegisterToBuffer { count } => self.register_to_buffer(state, *count),
            Op::BufferToRegister => self.buffer_to_register(state),

            Op::BindStack { identifier, source } => self.bind_stack(state, identifier, source),
            Op::BindGroup { identifier, source } => self.bind_group(state, identifier, source),
            Op::BindDynamic { identifier, source } => self.bind_dynamic(state, identifier, source),
            Op::Assign => self.assign(state),
            Op::BulkLoad { specs } => self.bulk_load(state, specs),
            Op::BulkStore { specs } => self.bulk_store(state, specs),

            Op::Add => self.binary_op(state, BinOp::Add),
            Op::Sub => self.binary_op(state, BinOp::Sub),
            Op::Mul => self.binary_op(state, BinOp::Mul),
            Op::Div => self.binary_op(state, BinOp::Div),
            Op::Rem => self.binary_op(state, BinOp::Rem),
            Op::BitAnd => self.binary_op(state, BinOp::BitAnd),
            Op::BitOr => self.binary_op(state, BinOp::BitOr),
            Op::Shl => self.binary_op(state, BinOp::Shl),
            Op::Shr => self.binary_op(state, BinOp::Shr),
            Op::Eq => self.binary_op(state, BinOp::Eq),
            Op::Ne => self.binary_op(state, BinOp::Ne),
            Op::Lt => self.binary_op(state, BinOp::Lt),
            Op::Le => self.binary_op(state, BinOp::Le),
            Op::Gt => self.binary_op(state, BinOp::Gt),
            Op::Ge => self.binary_op(state, BinOp::Ge),
            Op::And => self.binary_op(state, BinOp::And),
            Op::Or => self.binary_op(state, BinOp::Or),
            Op::Not => self.unary_op(state, UnaryOp::Not),
            Op::Neg => self.unary_op(state, UnaryOp::Neg),

            Op::NewCollection { mode } => self.new_collection(state, *mode),
            Op::GetKey { create } => self.get_key(state, *create),
            Op::GetIndex => self.get_index(state),
            Op::Size => self.size(state),

            Op::CloneGroup { flags } => self.clone_group(state, *flags),
            Op::MergeGroup { flags } => self.merge_group(state, *flags),
            Op::AddDependency => self.add_dependency(state),
            Op::LoadDependency { index } => self.load_dependency(state, *index),
            Op::PublishGroup => self.publish_group(state),
            Op::RetrieveGroup { name } => self.retrieve_group(state, name),
            Op::NewAction {
                location,
                name,
                captures,
            } => self.new_action(state, *location, name, captures),
            Op::OverrideAction { location } => self.override_action(state, *location),
            Op::Invoke => self.invoke(state),
            Op::GetModifiers => self.get_modifiers(state),
            Op::SetModifiers => self.set_modifiers(state),

            Op::IsDefined => self.is_defined(state),
            Op::Undeclare => self.undeclare(state),
            Op::ClearRegister => {
                state.frame_mut()?.clear_registers();
                Ok(())
            }
        }
    }

    fn pop(&self, state: &mut ExecutionState) -> Result<PointerRef> {
        state.frame_mut()?.pop_register()
    }

    fn pop_val(&self, state: &mut ExecutionState) -> Result<Val> {
        Ok(self.pop(state)?.value())
    }

    fn push(&self, state: &mut ExecutionState, ptr: PointerRef) -> Result<()> {
        state.frame_mut()?.push_register(ptr);
        Ok(())
    }

    fn push_val(&self, state: &mut ExecutionState, value: Val) -> Result<()> {
        self.push(state, crate::ptr::Pointer::plain(value))
    }

    fn expect_group(value: Val) -> Result<crate::group::GroupRef> {
        match value {
            Val::Group(g) => Ok(g),
            other => Err(anyhow!("Value is not a group: {}", other.type_name())),
        }
    }
}
