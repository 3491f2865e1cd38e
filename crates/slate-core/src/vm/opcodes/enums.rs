//! Enum opcodes
//!
//! `ENUM_CASE` registers a case on the enum type sitting on top of the
//! stack. `MATCH_ENUM_CASE` and `GET_ASSOCIATED` peek the scrutinee so
//! switch compilation can test several cases against one value.

use crate::object::{EnumCaseDef, EnumTypeObject, Object};
use crate::value::Value;
use crate::vm::Vm;
use crate::{VmError, VmResult};

impl Vm {
    pub(in crate::vm) fn op_enum(&mut self) -> VmResult<()> {
        let name = self.read_pool_string()?;
        let r = self.heap.alloc(Object::EnumType(EnumTypeObject {
            name,
            cases: Vec::new(),
            methods: Vec::new(),
            computed: Vec::new(),
        }));
        self.push_new(Value::Obj(r))
    }

    pub(in crate::vm) fn op_enum_case(&mut self) -> VmResult<()> {
        let name = self.read_pool_string()?;
        let label_count = self.read_u8()? as usize;
        let mut assoc_labels = Vec::with_capacity(label_count);
        for _ in 0..label_count {
            let idx = self.read_u16()? as usize;
            let label = self
                .chunk
                .string_at(idx)
                .map(str::to_string)
                .ok_or_else(|| {
                    VmError::RuntimeError(format!("String index {} out of range", idx))
                })?;
            assoc_labels.push(label);
        }
        let has_raw = self.read_u8()? != 0;
        let raw = if has_raw {
            let v = self.pop_value()?;
            self.heap.retain_value(v);
            Some(v)
        } else {
            None
        };

        let target = self.peek(0)?;
        let Some(t) = target.as_object() else {
            return Err(VmError::TypeError(
                "ENUM_CASE requires an enum type on the stack.".to_string(),
            ));
        };
        match self.heap.get_mut(t) {
            Object::EnumType(e) => {
                e.cases.push(EnumCaseDef {
                    name,
                    raw,
                    assoc_labels,
                });
                Ok(())
            }
            _ => {
                if let Some(raw) = raw {
                    self.heap.release_value(raw);
                }
                Err(VmError::TypeError(
                    "ENUM_CASE requires an enum type on the stack.".to_string(),
                ))
            }
        }
    }

    pub(in crate::vm) fn op_match_enum_case(&mut self) -> VmResult<()> {
        let name = self.read_pool_string()?;
        let v = self.peek(0)?;
        let Some(r) = v.as_object() else {
            return Err(VmError::TypeError(
                "Switch pattern requires an enum case value.".to_string(),
            ));
        };
        let matches = match self.heap.get(r) {
            Object::EnumCase(case) => match self.heap.get(case.enum_type) {
                Object::EnumType(e) => e
                    .cases
                    .get(case.case_index)
                    .map(|def| def.name == name)
                    .unwrap_or(false),
                _ => false,
            },
            _ => {
                return Err(VmError::TypeError(
                    "Switch pattern requires an enum case value.".to_string(),
                ))
            }
        };
        self.push(Value::Bool(matches))
    }

    pub(in crate::vm) fn op_get_associated(&mut self) -> VmResult<()> {
        let i = self.read_u8()? as usize;
        let v = self.peek(0)?;
        let Some(r) = v.as_object() else {
            return Err(VmError::TypeError(
                "GET_ASSOCIATED requires an enum case value.".to_string(),
            ));
        };
        let value = match self.heap.get(r) {
            Object::EnumCase(case) => case.associated.get(i).copied().ok_or_else(|| {
                VmError::RuntimeError(format!(
                    "Associated value index {} out of range (count {}).",
                    i,
                    case.associated.len()
                ))
            })?,
            _ => {
                return Err(VmError::TypeError(
                    "GET_ASSOCIATED requires an enum case value.".to_string(),
                ))
            }
        };
        self.push(value)
    }
}
