//! Closure and upvalue opcodes
//!
//! `CLOSURE` captures enclosing locals into open upvalues, deduplicating so
//! two closures over the same slot share one upvalue. An open upvalue holds
//! the absolute stack slot; it closes (copies the value inward) when the
//! slot's scope exits, which is also what breaks the only possible
//! reference cycle.

use crate::heap::ObjRef;
use crate::object::{ClosureObject, FunctionObject, Object, Upvalue};
use crate::value::Value;
use crate::vm::opcodes::constant_to_value;
use crate::vm::Vm;
use crate::{VmError, VmResult};

impl Vm {
    pub(in crate::vm) fn op_closure(&mut self) -> VmResult<()> {
        let idx = self.read_u16()? as usize;
        let proto = self
            .chunk
            .functions
            .get(idx)
            .cloned()
            .ok_or_else(|| {
                VmError::RuntimeError(format!("Function index {} out of range.", idx))
            })?;

        let mut defaults = Vec::with_capacity(proto.params.len());
        let mut has_default = Vec::with_capacity(proto.params.len());
        for d in &proto.param_defaults {
            has_default.push(d.has_default);
            let v = if let Some(s) = &d.string_value {
                Value::Str(self.heap.alloc(Object::Str(s.clone())))
            } else if let Some(c) = &d.value {
                constant_to_value(c)
            } else {
                Value::Null
            };
            defaults.push(v);
        }
        while defaults.len() < proto.params.len() {
            defaults.push(Value::Null);
            has_default.push(false);
        }

        let mut param_labels = proto.param_labels.clone();
        while param_labels.len() < proto.params.len() {
            param_labels.push(String::new());
        }

        let function = self.heap.alloc(Object::Function(FunctionObject {
            name: proto.name.clone(),
            params: proto.params.clone(),
            param_labels,
            defaults,
            has_default,
            chunk: proto.chunk.clone(),
            is_initializer: proto.is_initializer,
            is_override: proto.is_override,
        }));

        let enclosing = self.current_closure();
        let base = self.frame_base();

        let mut upvalues: Vec<ObjRef> = Vec::with_capacity(proto.upvalues.len());
        for uv in &proto.upvalues {
            let captured = if uv.is_local {
                Ok(self.capture_upvalue(base + uv.index as usize))
            } else {
                match enclosing {
                    Some(enc) => match self.heap.get(enc) {
                        Object::Closure(c) => {
                            match c.upvalues.get(uv.index as usize).copied() {
                                Some(r) => {
                                    self.heap.retain(r);
                                    Ok(r)
                                }
                                None => Err(VmError::RuntimeError(
                                    "Upvalue index out of range.".to_string(),
                                )),
                            }
                        }
                        _ => Err(VmError::RuntimeError(
                            "Active frame closure is corrupt.".to_string(),
                        )),
                    },
                    None => Err(VmError::RuntimeError(
                        "Upvalue refers to an enclosing closure, but none is active.".to_string(),
                    )),
                }
            };
            match captured {
                Ok(r) => upvalues.push(r),
                Err(e) => {
                    // Back out the partial closure so nothing leaks.
                    for r in upvalues {
                        self.heap.release(r);
                    }
                    self.heap.release(function);
                    return Err(e);
                }
            }
        }

        let closure = self
            .heap
            .alloc(Object::Closure(ClosureObject { function, upvalues }));
        self.push_new(Value::Obj(closure))
    }

    pub(in crate::vm) fn op_get_upvalue(&mut self) -> VmResult<()> {
        let idx = self.read_u16()? as usize;
        let uv = self.upvalue_at(idx)?;
        let v = match self.heap.get(uv) {
            Object::Upvalue(Upvalue::Open(slot)) => self.stack.get_at(*slot)?,
            Object::Upvalue(Upvalue::Closed(v)) => *v,
            _ => {
                return Err(VmError::RuntimeError(
                    "Upvalue handle is corrupt.".to_string(),
                ))
            }
        };
        self.push(v)
    }

    pub(in crate::vm) fn op_set_upvalue(&mut self) -> VmResult<()> {
        let idx = self.read_u16()? as usize;
        let uv = self.upvalue_at(idx)?;
        let v = self.peek(0)?;
        match self.heap.get(uv) {
            Object::Upvalue(Upvalue::Open(slot)) => {
                let slot = *slot;
                self.set_slot(slot, v)
            }
            Object::Upvalue(Upvalue::Closed(old)) => {
                let old = *old;
                self.heap.retain_value(v);
                *self.heap.get_mut(uv) = Object::Upvalue(Upvalue::Closed(v));
                self.heap.release_value(old);
                Ok(())
            }
            _ => Err(VmError::RuntimeError(
                "Upvalue handle is corrupt.".to_string(),
            )),
        }
    }

    pub(in crate::vm) fn op_close_upvalue(&mut self) -> VmResult<()> {
        let depth = self.stack.depth();
        if depth == 0 {
            return Err(VmError::StackUnderflow);
        }
        self.close_upvalues_from(depth - 1);
        self.pop_value()?;
        Ok(())
    }

    fn upvalue_at(&self, idx: usize) -> VmResult<ObjRef> {
        let closure = self.current_closure().ok_or_else(|| {
            VmError::RuntimeError("No closure active for upvalue access.".to_string())
        })?;
        match self.heap.get(closure) {
            Object::Closure(c) => c.upvalues.get(idx).copied().ok_or_else(|| {
                VmError::RuntimeError("Upvalue index out of range.".to_string())
            }),
            _ => Err(VmError::RuntimeError(
                "Active frame closure is corrupt.".to_string(),
            )),
        }
    }
}
