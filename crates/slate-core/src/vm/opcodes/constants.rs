//! Constant and stack-manipulation opcodes

use crate::object::Object;
use crate::value::Value;
use crate::vm::Vm;
use crate::{VmError, VmResult};
use slate_bytecode::Constant;

/// Materialize a pool constant as a runtime value
pub(in crate::vm) fn constant_to_value(c: &Constant) -> Value {
    match c {
        Constant::Null => Value::Null,
        Constant::Bool(b) => Value::Bool(*b),
        Constant::Int(i) => Value::Int(*i),
        Constant::Float(f) => Value::Float(*f),
    }
}

impl Vm {
    pub(in crate::vm) fn op_const(&mut self) -> VmResult<()> {
        let idx = self.read_u8()? as usize;
        let constant = self
            .chunk
            .constants
            .get(idx)
            .copied()
            .ok_or_else(|| VmError::RuntimeError(format!("Constant index {} out of range", idx)))?;
        self.push(constant_to_value(&constant))
    }

    pub(in crate::vm) fn op_string(&mut self) -> VmResult<()> {
        let s = self.read_pool_string()?;
        let r = self.heap.alloc(Object::Str(s));
        self.push_new(Value::Str(r))
    }

    pub(in crate::vm) fn op_dup(&mut self) -> VmResult<()> {
        let v = self.peek(0)?;
        self.push(v)
    }
}
