//! I/O opcodes

use crate::object::Object;
use crate::value::Value;
use crate::vm::Vm;
use crate::{VmError, VmResult};
use std::io::BufRead;

impl Vm {
    pub(in crate::vm) fn op_print(&mut self) -> VmResult<()> {
        let v = self.pop_value()?;
        let mut text = self.heap.value_to_string(v);
        text.push('\n');
        self.write_output(&text);
        Ok(())
    }

    pub(in crate::vm) fn op_read_line(&mut self) -> VmResult<()> {
        let mut line = String::new();
        std::io::stdin()
            .lock()
            .read_line(&mut line)
            .map_err(|e| VmError::RuntimeError(format!("Failed to read input: {}", e)))?;
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        let r = self.heap.alloc(Object::Str(line));
        self.push_new(Value::Str(r))
    }
}
