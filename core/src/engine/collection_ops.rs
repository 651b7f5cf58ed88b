//! Collection construction and access.

use anyhow::{anyhow, Result};

use crate::collection::CollectionMode;
use crate::exec::ExecutionState;

use super::Engine;

impl Engine<'_> {
    pub(super) fn new_collection(
        &self,
        state: &mut ExecutionState,
        mode: CollectionMode,
    ) -> Result<()> {
        let value = self.provider.collection(mode);
        self.push_val(state, value)
    }

    /// Pops key, then target; pushes the entry pointer (unset when the
    /// key is missing).
    pub(super) fn get_key(&self, state: &mut ExecutionState, create: bool) -> Result<()> {
        let key = self.pop_val(state)?;
        let target = self.pop_val(state)?;
        let ptr = target.get_key(&key, create)?;
        self.push(state, ptr)
    }

    pub(super) fn get_index(&self, state: &mut ExecutionState) -> Result<()> {
        let index = self.pop_val(state)?;
        let target = self.pop_val(state)?;
        let index = match index.as_i64() {
            Some(i) if i >= 0 => i as usize,
            _ => return Err(anyhow!("Index out of range")),
        };
        let ptr = target.get_at(index)?;
        self.push(state, ptr)
    }

    pub(super) fn size(&self, state: &mut ExecutionState) -> Result<()> {
        let target = self.pop_val(state)?;
        let size = target.size()?;
        self.push_val(state, self.provider.long(size as i64))
    }
}
