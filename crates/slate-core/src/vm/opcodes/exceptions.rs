//! Error-handling opcodes
//!
//! `TRY` records the call depth, stack depth, and catch target; `THROW`
//! surfaces the popped value as `VmError::Thrown`, which the dispatch loop
//! unwinds to the innermost handler (or out of `execute` when none is
//! active). Runtime errors from any handler take the same unwinding path as
//! explicit throws.

use crate::vm::{TryHandler, Vm};
use crate::{VmError, VmResult};

impl Vm {
    pub(in crate::vm) fn op_try(&mut self) -> VmResult<()> {
        let offset = self.read_u16()? as usize;
        self.try_handlers.push(TryHandler {
            frame_depth: self.frames.len(),
            stack_depth: self.stack.depth(),
            catch_ip: self.ip + offset,
            chunk: self.chunk.clone(),
        });
        Ok(())
    }

    pub(in crate::vm) fn op_end_try(&mut self) -> VmResult<()> {
        self.try_handlers
            .pop()
            .map(|_| ())
            .ok_or_else(|| VmError::RuntimeError("END_TRY without an active TRY.".to_string()))
    }

    pub(in crate::vm) fn op_throw(&mut self) -> VmResult<()> {
        let v = self.pop_value()?;
        Err(VmError::Thrown(v))
    }
}
