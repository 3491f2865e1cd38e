//! Protocol and type-operation opcodes
//!
//! Protocol conformance is satisfied by a declared conformance anywhere in
//! the class chain, or structurally: the type provides every method and
//! property the protocol (and its inherited protocols) requires.

use crate::heap::ObjRef;
use crate::object::Object;
use crate::value::Value;
use crate::vm::{CastMode, Vm};
use crate::{VmError, VmResult};
use slate_bytecode::ProtocolDef;

impl Vm {
    pub(in crate::vm) fn op_protocol(&mut self) -> VmResult<()> {
        let idx = self.read_u16()? as usize;
        let def = self
            .chunk
            .protocols
            .get(idx)
            .cloned()
            .ok_or_else(|| {
                VmError::RuntimeError(format!("Protocol index {} out of range.", idx))
            })?;
        self.protocols.insert(def.name.clone(), def.clone());
        let r = self.heap.alloc(Object::Protocol(def));
        self.push_new(Value::Obj(r))
    }

    pub(in crate::vm) fn op_type_check(&mut self) -> VmResult<()> {
        let name = self.read_pool_string()?;
        let v = self.pop_value()?;
        let matches = self.type_matches(v, &name);
        self.push(Value::Bool(matches))
    }

    pub(in crate::vm) fn op_type_cast(&mut self, mode: CastMode) -> VmResult<()> {
        let name = self.read_pool_string()?;
        let v = self.pop_value()?;
        if self.type_matches(v, &name) {
            return self.push(v);
        }
        match mode {
            CastMode::Optional => self.push(Value::Null),
            CastMode::Unconditional | CastMode::Forced => Err(VmError::TypeError(format!(
                "Cannot cast value of type {} to '{}'.",
                self.heap.value_type_name(v),
                name
            ))),
        }
    }

    /// `is` semantics shared by the check and cast opcodes
    pub(in crate::vm) fn type_matches(&self, v: Value, name: &str) -> bool {
        match name {
            "Int" => return v.is_int(),
            "Float" => return v.is_float(),
            "Bool" => return v.is_bool(),
            "String" => return v.is_string(),
            "Null" => return v.is_null(),
            _ => {}
        }
        let Some(r) = v.as_object() else {
            return false;
        };
        match self.heap.get(r) {
            Object::Instance { class, .. } => self.class_matches(*class, name),
            Object::EnumCase(case) => match self.heap.get(case.enum_type) {
                Object::EnumType(e) => e.name == name,
                _ => false,
            },
            Object::Array(_) => name == "Array",
            Object::Map(_) => name == "Map",
            Object::Tuple { .. } => name == "Tuple",
            Object::Closure(_) | Object::Function(_) | Object::BoundMethod { .. } => {
                name == "Function"
            }
            Object::Native(n) => n.type_name == name,
            _ => false,
        }
    }

    fn class_matches(&self, class: ObjRef, name: &str) -> bool {
        let mut current = Some(class);
        while let Some(cr) = current {
            let Object::Class(c) = self.heap.get(cr) else {
                return false;
            };
            if c.name == name || c.protocols.iter().any(|p| p == name) {
                return true;
            }
            current = c.superclass;
        }
        match self.protocols.get(name) {
            Some(proto) => self.satisfies_protocol(class, proto),
            None => false,
        }
    }

    fn satisfies_protocol(&self, class: ObjRef, proto: &ProtocolDef) -> bool {
        let Object::Class(c) = self.heap.get(class) else {
            return false;
        };
        for req in &proto.method_requirements {
            if c.find_method(&req.name).is_none() {
                return false;
            }
        }
        for req in &proto.property_requirements {
            let stored = c.find_property(&req.name).is_some();
            let computed_ok = c
                .find_computed(&req.name)
                .map(|comp| !req.has_setter || comp.setter.is_some())
                .unwrap_or(false);
            if !stored && !computed_ok {
                return false;
            }
        }
        for inherited in &proto.inherited_protocols {
            match self.protocols.get(inherited) {
                Some(p) => {
                    if !self.satisfies_protocol(class, p) {
                        return false;
                    }
                }
                None => return false,
            }
        }
        true
    }
}
