//! Array, map, and tuple opcodes

use crate::object::{Object, PropertyMap};
use crate::value::Value;
use crate::vm::Vm;
use crate::{VmError, VmResult};
use slate_bytecode::NO_LABEL;

impl Vm {
    pub(in crate::vm) fn op_array(&mut self) -> VmResult<()> {
        let n = self.read_u8()? as usize;
        let start = self
            .stack
            .depth()
            .checked_sub(n)
            .ok_or(VmError::StackUnderflow)?;

        let mut items = Vec::with_capacity(n);
        for i in 0..n {
            let v = self.stack.get_at(start + i)?;
            self.heap.retain_value(v);
            items.push(v);
        }
        self.truncate_stack(start);
        let r = self.heap.alloc(Object::Array(items));
        self.push_new(Value::Obj(r))
    }

    pub(in crate::vm) fn op_dict(&mut self) -> VmResult<()> {
        let n = self.read_u8()? as usize;
        let start = self
            .stack
            .depth()
            .checked_sub(n * 2)
            .ok_or(VmError::StackUnderflow)?;

        let mut map = PropertyMap::new();
        for i in 0..n {
            let key = self.stack.get_at(start + i * 2)?;
            let value = self.stack.get_at(start + i * 2 + 1)?;
            let key = self
                .heap
                .string_value(key)
                .ok_or_else(|| VmError::TypeError("Map keys must be strings.".to_string()))?
                .to_string();
            self.heap.retain_value(value);
            if let Some(old) = map.insert(key, value) {
                self.heap.release_value(old);
            }
        }
        self.truncate_stack(start);
        let r = self.heap.alloc(Object::Map(map));
        self.push_new(Value::Obj(r))
    }

    pub(in crate::vm) fn op_tuple(&mut self) -> VmResult<()> {
        let n = self.read_u8()? as usize;
        let mut labels = Vec::with_capacity(n);
        for _ in 0..n {
            let idx = self.read_u16()?;
            if idx == NO_LABEL {
                labels.push(None);
            } else {
                let label = self
                    .chunk
                    .string_at(idx as usize)
                    .map(str::to_string)
                    .ok_or_else(|| {
                        VmError::RuntimeError(format!("String index {} out of range", idx))
                    })?;
                labels.push(Some(label));
            }
        }

        let start = self
            .stack
            .depth()
            .checked_sub(n)
            .ok_or(VmError::StackUnderflow)?;
        let mut items = Vec::with_capacity(n);
        for i in 0..n {
            let v = self.stack.get_at(start + i)?;
            self.heap.retain_value(v);
            items.push(v);
        }
        self.truncate_stack(start);
        let r = self.heap.alloc(Object::Tuple { items, labels });
        self.push_new(Value::Obj(r))
    }

    pub(in crate::vm) fn op_get_subscript(&mut self) -> VmResult<()> {
        let index = self.pop_value()?;
        let container = self.pop_value()?;

        let Some(r) = container.as_object() else {
            return Err(VmError::TypeError(format!(
                "Value of type {} is not subscriptable.",
                container.type_name()
            )));
        };
        let v = match self.heap.get(r) {
            Object::Array(items) => {
                let i = index
                    .as_int()
                    .ok_or_else(|| VmError::TypeError("Array index must be an Int.".to_string()))?;
                if i < 0 || i as usize >= items.len() {
                    return Err(VmError::RuntimeError(format!(
                        "Array index {} out of range (count {}).",
                        i,
                        items.len()
                    )));
                }
                items[i as usize]
            }
            Object::Tuple { items, .. } => {
                let i = index
                    .as_int()
                    .ok_or_else(|| VmError::TypeError("Tuple index must be an Int.".to_string()))?;
                if i < 0 || i as usize >= items.len() {
                    return Err(VmError::RuntimeError(format!(
                        "Tuple index {} out of range (count {}).",
                        i,
                        items.len()
                    )));
                }
                items[i as usize]
            }
            Object::Map(map) => {
                let key = self
                    .heap
                    .string_value(index)
                    .ok_or_else(|| VmError::TypeError("Map key must be a String.".to_string()))?;
                map.get(key).unwrap_or(Value::Null)
            }
            other => {
                return Err(VmError::TypeError(format!(
                    "Value of type {} is not subscriptable.",
                    other.type_name()
                )))
            }
        };
        self.push(v)
    }

    pub(in crate::vm) fn op_set_subscript(&mut self) -> VmResult<()> {
        let value = self.pop_value()?;
        let index = self.pop_value()?;
        let container = self.pop_value()?;

        let Some(r) = container.as_object() else {
            return Err(VmError::TypeError(format!(
                "Value of type {} is not subscriptable.",
                container.type_name()
            )));
        };

        match self.heap.get(r) {
            Object::Array(items) => {
                let len = items.len();
                let i = index
                    .as_int()
                    .ok_or_else(|| VmError::TypeError("Array index must be an Int.".to_string()))?;
                if i < 0 || i as usize >= len {
                    return Err(VmError::RuntimeError(format!(
                        "Array index {} out of range (count {}).",
                        i, len
                    )));
                }
                self.heap.retain_value(value);
                let old = match self.heap.get_mut(r) {
                    Object::Array(items) => {
                        std::mem::replace(&mut items[i as usize], value)
                    }
                    _ => unreachable!("matched Array above"),
                };
                self.heap.release_value(old);
            }
            Object::Map(_) => {
                let key = self
                    .heap
                    .string_value(index)
                    .ok_or_else(|| VmError::TypeError("Map key must be a String.".to_string()))?
                    .to_string();
                self.heap.retain_value(value);
                let old = match self.heap.get_mut(r) {
                    Object::Map(map) => map.insert(key, value),
                    _ => unreachable!("matched Map above"),
                };
                if let Some(old) = old {
                    self.heap.release_value(old);
                }
            }
            other => {
                return Err(VmError::TypeError(format!(
                    "Value of type {} does not support subscript assignment.",
                    other.type_name()
                )))
            }
        }
        self.push(value)
    }

    pub(in crate::vm) fn op_get_tuple_index(&mut self) -> VmResult<()> {
        let i = self.read_u8()? as usize;
        let tuple = self.pop_value()?;
        let Some(r) = tuple.as_object() else {
            return Err(VmError::TypeError("Value is not a tuple.".to_string()));
        };
        let v = match self.heap.get(r) {
            Object::Tuple { items, .. } => items.get(i).copied().ok_or_else(|| {
                VmError::RuntimeError(format!(
                    "Tuple index {} out of range (count {}).",
                    i,
                    items.len()
                ))
            })?,
            _ => return Err(VmError::TypeError("Value is not a tuple.".to_string())),
        };
        self.push(v)
    }

    pub(in crate::vm) fn op_get_tuple_label(&mut self) -> VmResult<()> {
        let name = self.read_pool_string()?;
        let tuple = self.pop_value()?;
        let Some(r) = tuple.as_object() else {
            return Err(VmError::TypeError("Value is not a tuple.".to_string()));
        };
        let v = match self.heap.get(r) {
            Object::Tuple { items, labels } => labels
                .iter()
                .position(|l| l.as_deref() == Some(name.as_str()))
                .map(|i| items[i])
                .ok_or_else(|| {
                    VmError::RuntimeError(format!("Tuple has no element labeled '{}'.", name))
                })?,
            _ => return Err(VmError::TypeError("Value is not a tuple.".to_string())),
        };
        self.push(v)
    }
}
