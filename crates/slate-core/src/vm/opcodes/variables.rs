//! Global and local variable opcodes
//!
//! `SET_GLOBAL` and `SET_LOCAL` peek rather than pop: an assignment leaves
//! its value on the stack as the expression result.

use crate::vm::Vm;
use crate::{VmError, VmResult};

impl Vm {
    pub(in crate::vm) fn op_define_global(&mut self) -> VmResult<()> {
        let name = self.read_pool_string()?;
        let v = self.pop_value()?;
        self.heap.retain_value(v);
        if let Some(old) = self.globals.insert(name, v) {
            self.heap.release_value(old);
        }
        Ok(())
    }

    pub(in crate::vm) fn op_get_global(&mut self) -> VmResult<()> {
        let name = self.read_pool_string()?;
        let v = self
            .globals
            .get(&name)
            .copied()
            .ok_or_else(|| VmError::RuntimeError(format!("Undefined global '{}'.", name)))?;
        self.push(v)
    }

    pub(in crate::vm) fn op_set_global(&mut self) -> VmResult<()> {
        let name = self.read_pool_string()?;
        let v = self.peek(0)?;
        if !self.globals.contains_key(&name) {
            return Err(VmError::RuntimeError(format!(
                "Undefined global '{}'.",
                name
            )));
        }
        self.heap.retain_value(v);
        if let Some(old) = self.globals.insert(name, v) {
            self.heap.release_value(old);
        }
        Ok(())
    }

    pub(in crate::vm) fn op_get_local(&mut self) -> VmResult<()> {
        let slot = self.read_u16()? as usize;
        let pos = self.frame_base() + slot;
        let v = self
            .stack
            .get_at(pos)
            .map_err(|_| VmError::RuntimeError("Local slot out of range.".to_string()))?;
        self.push(v)
    }

    pub(in crate::vm) fn op_set_local(&mut self) -> VmResult<()> {
        let slot = self.read_u16()? as usize;
        let pos = self.frame_base() + slot;
        let v = self.peek(0)?;
        self.set_slot(pos, v)
            .map_err(|_| VmError::RuntimeError("Local slot out of range.".to_string()))
    }
}
