//! Jump opcodes
//!
//! Conditional jumps peek their operand; the compiler emits explicit `POP`s.
//! Short-circuit `&&`/`||` are compiled with these jumps, not with the
//! eager `AND`/`OR` opcodes.

use crate::vm::Vm;
use crate::{VmError, VmResult};

impl Vm {
    pub(in crate::vm) fn op_jump(&mut self) -> VmResult<()> {
        let offset = self.read_u16()? as usize;
        self.ip += offset;
        Ok(())
    }

    pub(in crate::vm) fn op_jump_if_false(&mut self) -> VmResult<()> {
        let offset = self.read_u16()? as usize;
        if !self.peek(0)?.is_truthy() {
            self.ip += offset;
        }
        Ok(())
    }

    pub(in crate::vm) fn op_jump_if_nil(&mut self) -> VmResult<()> {
        let offset = self.read_u16()? as usize;
        if self.peek(0)?.is_null() {
            self.ip += offset;
        }
        Ok(())
    }

    pub(in crate::vm) fn op_loop(&mut self) -> VmResult<()> {
        let offset = self.read_u16()? as usize;
        self.ip = self
            .ip
            .checked_sub(offset)
            .ok_or_else(|| VmError::RuntimeError("Loop offset out of range.".to_string()))?;
        Ok(())
    }

    pub(in crate::vm) fn op_optional_chain(&mut self) -> VmResult<()> {
        let offset = self.read_u16()? as usize;
        if self.peek(0)?.is_null() {
            self.ip += offset;
        }
        Ok(())
    }
}
