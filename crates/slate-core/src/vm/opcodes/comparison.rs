//! Comparison and logic opcodes

use crate::value::Value;
use crate::vm::Vm;
use crate::{VmError, VmResult};
use slate_bytecode::Opcode;
use std::cmp::Ordering;

impl Vm {
    pub(in crate::vm) fn op_equality(&mut self, negate: bool) -> VmResult<()> {
        let b = self.pop_value()?;
        let a = self.pop_value()?;

        let equal = if a.is_object() {
            match self.call_operator_overload(a, b, "==")? {
                Some(result) => result.is_truthy(),
                None => self.heap.values_equal(a, b),
            }
        } else {
            self.heap.values_equal(a, b)
        };
        self.push(Value::Bool(equal != negate))
    }

    pub(in crate::vm) fn op_ordering(&mut self, op: Opcode) -> VmResult<()> {
        let b = self.pop_value()?;
        let a = self.pop_value()?;

        let ordering = if let (Value::Int(x), Value::Int(y)) = (a, b) {
            Some(x.cmp(&y))
        } else if let (Some(fa), Some(fb)) = (a.try_as_float(), b.try_as_float()) {
            fa.partial_cmp(&fb)
        } else if a.is_string() && b.is_string() {
            let sa = self.heap.string_value(a).unwrap_or_default();
            let sb = self.heap.string_value(b).unwrap_or_default();
            Some(sa.cmp(sb))
        } else {
            let symbol = ordering_symbol(op);
            if let Some(result) = self.call_operator_overload(a, b, symbol)? {
                return self.push(Value::Bool(result.is_truthy()));
            }
            return Err(VmError::TypeError(
                "Operands must be numbers or strings for comparison.".to_string(),
            ));
        };

        let result = match ordering {
            Some(ord) => match op {
                Opcode::Lt => ord == Ordering::Less,
                Opcode::Gt => ord == Ordering::Greater,
                Opcode::Le => ord != Ordering::Greater,
                Opcode::Ge => ord != Ordering::Less,
                _ => unreachable!("non-ordering opcode routed to op_ordering"),
            },
            // NaN comparisons are uniformly false.
            None => false,
        };
        self.push(Value::Bool(result))
    }

    pub(in crate::vm) fn op_not(&mut self) -> VmResult<()> {
        let a = self.pop_value()?;
        self.push(Value::Bool(!a.is_truthy()))
    }

    pub(in crate::vm) fn op_logical(&mut self, op: Opcode) -> VmResult<()> {
        let b = self.pop_value()?;
        let a = self.pop_value()?;
        let result = match op {
            Opcode::And => a.is_truthy() && b.is_truthy(),
            Opcode::Or => a.is_truthy() || b.is_truthy(),
            _ => unreachable!("non-logical opcode routed to op_logical"),
        };
        self.push(Value::Bool(result))
    }
}

fn ordering_symbol(op: Opcode) -> &'static str {
    match op {
        Opcode::Lt => "<",
        Opcode::Gt => ">",
        Opcode::Le => "<=",
        Opcode::Ge => ">=",
        _ => unreachable!("non-ordering opcode"),
    }
}
