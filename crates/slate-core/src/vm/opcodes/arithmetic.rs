//! Arithmetic and bitwise opcodes
//!
//! Numeric promotion: if both operands are integers the result is an
//! integer, otherwise both coerce to float. `DIV` always yields float unless
//! both operands are integers, in which case it truncates. Non-numeric
//! object operands fall through to user-defined operator overloads.

use crate::object::Object;
use crate::value::Value;
use crate::vm::Vm;
use crate::{VmError, VmResult};
use slate_bytecode::Opcode;

impl Vm {
    pub(in crate::vm) fn op_add(&mut self) -> VmResult<()> {
        let b = self.pop_value()?;
        let a = self.pop_value()?;

        if let (Value::Int(x), Value::Int(y)) = (a, b) {
            return self.push(Value::Int(x.wrapping_add(y)));
        }
        if a.is_string() && b.is_string() {
            let joined = {
                let sa = self.heap.string_value(a).unwrap_or_default();
                let sb = self.heap.string_value(b).unwrap_or_default();
                format!("{}{}", sa, sb)
            };
            let r = self.heap.alloc(Object::Str(joined));
            return self.push_new(Value::Str(r));
        }
        match (a.try_as_float(), b.try_as_float()) {
            (Some(fa), Some(fb)) => self.push(Value::Float(fa + fb)),
            _ => {
                if let Some(result) = self.call_operator_overload(a, b, "+")? {
                    return self.push(result);
                }
                Err(VmError::TypeError(
                    "Operands must be numbers for addition.".to_string(),
                ))
            }
        }
    }

    pub(in crate::vm) fn op_sub(&mut self) -> VmResult<()> {
        let b = self.pop_value()?;
        let a = self.pop_value()?;

        if let (Value::Int(x), Value::Int(y)) = (a, b) {
            return self.push(Value::Int(x.wrapping_sub(y)));
        }
        match (a.try_as_float(), b.try_as_float()) {
            (Some(fa), Some(fb)) => self.push(Value::Float(fa - fb)),
            _ => {
                if let Some(result) = self.call_operator_overload(a, b, "-")? {
                    return self.push(result);
                }
                Err(VmError::TypeError(
                    "Operands must be numbers for subtraction.".to_string(),
                ))
            }
        }
    }

    pub(in crate::vm) fn op_mul(&mut self) -> VmResult<()> {
        let b = self.pop_value()?;
        let a = self.pop_value()?;

        if let (Value::Int(x), Value::Int(y)) = (a, b) {
            return self.push(Value::Int(x.wrapping_mul(y)));
        }
        match (a.try_as_float(), b.try_as_float()) {
            (Some(fa), Some(fb)) => self.push(Value::Float(fa * fb)),
            _ => {
                if let Some(result) = self.call_operator_overload(a, b, "*")? {
                    return self.push(result);
                }
                Err(VmError::TypeError(
                    "Operands must be numbers for multiplication.".to_string(),
                ))
            }
        }
    }

    pub(in crate::vm) fn op_div(&mut self) -> VmResult<()> {
        let b = self.pop_value()?;
        let a = self.pop_value()?;

        if let (Value::Int(x), Value::Int(y)) = (a, b) {
            if y == 0 {
                return Err(VmError::RuntimeError(
                    "Integer division by zero.".to_string(),
                ));
            }
            return self.push(Value::Int(x.wrapping_div(y)));
        }
        match (a.try_as_float(), b.try_as_float()) {
            (Some(fa), Some(fb)) => self.push(Value::Float(fa / fb)),
            _ => {
                if let Some(result) = self.call_operator_overload(a, b, "/")? {
                    return self.push(result);
                }
                Err(VmError::TypeError(
                    "Operands must be numbers for division.".to_string(),
                ))
            }
        }
    }

    pub(in crate::vm) fn op_mod(&mut self) -> VmResult<()> {
        let b = self.pop_value()?;
        let a = self.pop_value()?;

        if let (Value::Int(x), Value::Int(y)) = (a, b) {
            if y == 0 {
                return Err(VmError::RuntimeError("Integer modulo by zero.".to_string()));
            }
            return self.push(Value::Int(x.wrapping_rem(y)));
        }
        match (a.try_as_float(), b.try_as_float()) {
            (Some(fa), Some(fb)) => self.push(Value::Float(fa % fb)),
            _ => {
                if let Some(result) = self.call_operator_overload(a, b, "%")? {
                    return self.push(result);
                }
                Err(VmError::TypeError(
                    "Operands must be numbers for modulo.".to_string(),
                ))
            }
        }
    }

    pub(in crate::vm) fn op_neg(&mut self) -> VmResult<()> {
        let a = self.pop_value()?;
        match a {
            Value::Int(i) => self.push(Value::Int(i.wrapping_neg())),
            Value::Float(f) => self.push(Value::Float(-f)),
            _ => Err(VmError::TypeError(
                "Operand must be a number for negation.".to_string(),
            )),
        }
    }

    pub(in crate::vm) fn op_bit_not(&mut self) -> VmResult<()> {
        let a = self.pop_value()?;
        match a {
            Value::Int(i) => self.push(Value::Int(!i)),
            _ => Err(VmError::TypeError(
                "Operand must be an integer for bitwise operations.".to_string(),
            )),
        }
    }

    pub(in crate::vm) fn op_bitwise(&mut self, op: Opcode) -> VmResult<()> {
        let b = self.pop_value()?;
        let a = self.pop_value()?;
        let (Value::Int(x), Value::Int(y)) = (a, b) else {
            return Err(VmError::TypeError(
                "Operands must be integers for bitwise operations.".to_string(),
            ));
        };
        let result = match op {
            Opcode::BitAnd => x & y,
            Opcode::BitOr => x | y,
            Opcode::BitXor => x ^ y,
            Opcode::Shl => x.wrapping_shl(y as u32 & 63),
            Opcode::Shr => x.wrapping_shr(y as u32 & 63),
            _ => unreachable!("non-bitwise opcode routed to op_bitwise"),
        };
        self.push(Value::Int(result))
    }
}
