//! Arithmetic, comparison and logic dispatch.

use anyhow::Result;

use crate::exec::ExecutionState;
use crate::val::{binary, unary, BinOp, UnaryOp};

use super::Engine;

impl Engine<'_> {
    pub(super) fn binary_op(&self, state: &mut ExecutionState, op: BinOp) -> Result<()> {
        let rhs = self.pop_val(state)?;
        let lhs = self.pop_val(state)?;
        self.push_val(state, binary(op, &lhs, &rhs)?)
    }

    pub(super) fn unary_op(&self, state: &mut ExecutionState, op: UnaryOp) -> Result<()> {
        let value = self.pop_val(state)?;
        self.push_val(state, unary(op, &value)?)
    }
}
