//! Class definition, property access, and value-semantics opcodes
//!
//! Property lookup order on an instance: computed property (getter frame
//! arranged inline), stored field, then bound method. `INHERIT` copies
//! superclass members into the subclass at link time so later lookups never
//! walk the chain, and validates `override` flags while both method tables
//! are visible.

use crate::heap::ObjRef;
use crate::object::{
    ClassObject, ComputedDesc, MethodEntry, Object, PropertyDesc, TypeKind,
};
use crate::value::Value;
use crate::vm::Vm;
use crate::{VmError, VmResult};

enum PropertyAction {
    Push(Value),
    Bind(ObjRef),
    Accessor(ObjRef),
    MakeCase(usize),
    MakeConstructor(usize),
}

impl Vm {
    pub(in crate::vm) fn op_class(&mut self) -> VmResult<()> {
        let name = self.read_pool_string()?;
        let r = self
            .heap
            .alloc(Object::Class(ClassObject::new(name, TypeKind::Class)));
        self.push_new(Value::Obj(r))
    }

    pub(in crate::vm) fn op_struct(&mut self) -> VmResult<()> {
        let name = self.read_pool_string()?;
        let r = self
            .heap
            .alloc(Object::Class(ClassObject::new(name, TypeKind::Struct)));
        self.push_new(Value::Obj(r))
    }

    pub(in crate::vm) fn op_method(&mut self, is_mutating: bool) -> VmResult<()> {
        let name = self.read_pool_string()?;
        let closure = self.pop_value()?;
        let Some(method) = closure.as_object() else {
            return Err(VmError::TypeError("Method body must be a function.".to_string()));
        };
        let target = self.peek(0)?;
        let Some(t) = target.as_object() else {
            return Err(VmError::TypeError(
                "METHOD requires a type object on the stack.".to_string(),
            ));
        };

        self.heap.retain(method);
        let entry = MethodEntry {
            name,
            closure: method,
            is_mutating,
        };
        let replaced = match self.heap.get_mut(t) {
            Object::Class(c) => {
                if let Some(existing) = c.methods.iter_mut().find(|m| m.name == entry.name) {
                    let old = existing.closure;
                    *existing = entry;
                    Some(old)
                } else {
                    c.methods.push(entry);
                    None
                }
            }
            Object::EnumType(e) => {
                if let Some(existing) = e.methods.iter_mut().find(|m| m.name == entry.name) {
                    let old = existing.closure;
                    *existing = entry;
                    Some(old)
                } else {
                    e.methods.push(entry);
                    None
                }
            }
            _ => {
                self.heap.release(method);
                return Err(VmError::TypeError(
                    "METHOD requires a class, struct, or enum on the stack.".to_string(),
                ));
            }
        };
        if let Some(old) = replaced {
            self.heap.release(old);
        }
        Ok(())
    }

    pub(in crate::vm) fn op_struct_method(&mut self) -> VmResult<()> {
        let name_idx = self.read_u16()? as usize;
        let is_mutating = self.read_u8()? != 0;
        let name = self
            .chunk
            .string_at(name_idx)
            .map(str::to_string)
            .ok_or_else(|| {
                VmError::RuntimeError(format!("String index {} out of range", name_idx))
            })?;

        let closure = self.pop_value()?;
        let Some(method) = closure.as_object() else {
            return Err(VmError::TypeError("Method body must be a function.".to_string()));
        };
        let target = self.peek(0)?;
        let Some(t) = target.as_object() else {
            return Err(VmError::TypeError(
                "STRUCT_METHOD requires a struct type on the stack.".to_string(),
            ));
        };

        self.heap.retain(method);
        match self.heap.get_mut(t) {
            Object::Class(c) if c.kind == TypeKind::Struct => {
                c.methods.push(MethodEntry {
                    name,
                    closure: method,
                    is_mutating,
                });
                Ok(())
            }
            _ => {
                self.heap.release(method);
                Err(VmError::TypeError(
                    "STRUCT_METHOD requires a struct type on the stack.".to_string(),
                ))
            }
        }
    }

    pub(in crate::vm) fn op_define_property(&mut self) -> VmResult<()> {
        let name = self.read_pool_string()?;
        let default = self.pop_value()?;
        self.attach_property(PropertyDesc {
            name,
            default,
            will_set: None,
            did_set: None,
        })
    }

    pub(in crate::vm) fn op_define_property_with_observers(&mut self) -> VmResult<()> {
        let name = self.read_pool_string()?;
        let flags = self.read_u8()?;
        let did_set = if flags & 0b10 != 0 {
            self.pop_value()?.as_object()
        } else {
            None
        };
        let will_set = if flags & 0b01 != 0 {
            self.pop_value()?.as_object()
        } else {
            None
        };
        let default = self.pop_value()?;
        self.attach_property(PropertyDesc {
            name,
            default,
            will_set,
            did_set,
        })
    }

    fn attach_property(&mut self, desc: PropertyDesc) -> VmResult<()> {
        let target = self.peek(0)?;
        let Some(t) = target.as_object() else {
            return Err(VmError::TypeError(
                "DEFINE_PROPERTY requires a type object on the stack.".to_string(),
            ));
        };
        self.heap.retain_value(desc.default);
        if let Some(o) = desc.will_set {
            self.heap.retain(o);
        }
        if let Some(o) = desc.did_set {
            self.heap.retain(o);
        }
        match self.heap.get_mut(t) {
            Object::Class(c) => {
                c.properties.push(desc);
                Ok(())
            }
            _ => Err(VmError::TypeError(
                "DEFINE_PROPERTY requires a class or struct on the stack.".to_string(),
            )),
        }
    }

    pub(in crate::vm) fn op_define_computed_property(&mut self) -> VmResult<()> {
        let name = self.read_pool_string()?;
        let has_setter = self.read_u8()? != 0;
        let setter = if has_setter {
            self.pop_value()?.as_object()
        } else {
            None
        };
        let getter = self
            .pop_value()?
            .as_object()
            .ok_or_else(|| VmError::TypeError("Computed-property getter must be a function.".to_string()))?;

        let target = self.peek(0)?;
        let Some(t) = target.as_object() else {
            return Err(VmError::TypeError(
                "DEFINE_COMPUTED_PROPERTY requires a type object on the stack.".to_string(),
            ));
        };
        self.heap.retain(getter);
        if let Some(s) = setter {
            self.heap.retain(s);
        }
        let desc = ComputedDesc {
            name,
            getter,
            setter,
        };
        match self.heap.get_mut(t) {
            Object::Class(c) => {
                c.computed.push(desc);
                Ok(())
            }
            Object::EnumType(e) => {
                e.computed.push(desc);
                Ok(())
            }
            _ => Err(VmError::TypeError(
                "DEFINE_COMPUTED_PROPERTY requires a class, struct, or enum.".to_string(),
            )),
        }
    }

    pub(in crate::vm) fn op_inherit(&mut self) -> VmResult<()> {
        let superclass = self.pop_value()?;
        let subclass = self.peek(0)?;

        let sup = superclass
            .as_object()
            .filter(|r| matches!(self.heap.get(*r), Object::Class(c) if c.kind == TypeKind::Class))
            .ok_or_else(|| VmError::RuntimeError("Superclass must be a class.".to_string()))?;
        let sub = subclass
            .as_object()
            .filter(|r| matches!(self.heap.get(*r), Object::Class(c) if c.kind == TypeKind::Class))
            .ok_or_else(|| VmError::RuntimeError("Only classes can inherit.".to_string()))?;

        let (sub_name, sub_methods) = match self.heap.get(sub) {
            Object::Class(c) => (
                c.name.clone(),
                c.methods
                    .iter()
                    .map(|m| (m.name.clone(), m.closure))
                    .collect::<Vec<_>>(),
            ),
            _ => unreachable!("filtered above"),
        };
        let (sup_name, sup_methods, sup_properties, sup_computed, sup_protocols) =
            match self.heap.get(sup) {
                Object::Class(c) => (
                    c.name.clone(),
                    c.methods.clone(),
                    c.properties.clone(),
                    c.computed.clone(),
                    c.protocols.clone(),
                ),
                _ => unreachable!("filtered above"),
            };

        // Override validation while both method tables are visible.
        for (method_name, closure) in &sub_methods {
            if method_name == "init" {
                continue;
            }
            let is_override = match self.heap.get(*closure) {
                Object::Closure(c) => match self.heap.get(c.function) {
                    Object::Function(f) => f.is_override,
                    _ => false,
                },
                Object::Function(f) => f.is_override,
                _ => false,
            };
            let shadows = sup_methods.iter().any(|m| m.name == *method_name);
            if is_override && !shadows {
                return Err(VmError::RuntimeError(format!(
                    "Method '{}' in class '{}' is marked 'override' but '{}' has no method '{}'.",
                    method_name, sub_name, sup_name, method_name
                )));
            }
            if !is_override && shadows {
                return Err(VmError::RuntimeError(format!(
                    "Method '{}' in class '{}' shadows a method of '{}' without 'override'.",
                    method_name, sub_name, sup_name
                )));
            }
        }

        // Copy superclass members down so lookup never walks the chain.
        let mut inherited_methods = Vec::new();
        for m in &sup_methods {
            if m.name != "init" && !sub_methods.iter().any(|(n, _)| *n == m.name) {
                self.heap.retain(m.closure);
                inherited_methods.push(m.clone());
            }
        }
        let (existing_props, existing_computed) = match self.heap.get(sub) {
            Object::Class(c) => (
                c.properties.iter().map(|p| p.name.clone()).collect::<Vec<_>>(),
                c.computed.iter().map(|c| c.name.clone()).collect::<Vec<_>>(),
            ),
            _ => unreachable!("filtered above"),
        };
        let mut inherited_props = Vec::new();
        for p in &sup_properties {
            if !existing_props.contains(&p.name) {
                self.heap.retain_value(p.default);
                if let Some(o) = p.will_set {
                    self.heap.retain(o);
                }
                if let Some(o) = p.did_set {
                    self.heap.retain(o);
                }
                inherited_props.push(p.clone());
            }
        }
        let mut inherited_computed = Vec::new();
        for c in &sup_computed {
            if !existing_computed.contains(&c.name) {
                self.heap.retain(c.getter);
                if let Some(s) = c.setter {
                    self.heap.retain(s);
                }
                inherited_computed.push(c.clone());
            }
        }

        self.heap.retain(sup);
        match self.heap.get_mut(sub) {
            Object::Class(c) => {
                c.superclass = Some(sup);
                c.methods.extend(inherited_methods);
                // Inherited stored properties precede the subclass's own so
                // instance layout matches declaration order root-first.
                let own_props = std::mem::take(&mut c.properties);
                c.properties = inherited_props;
                c.properties.extend(own_props);
                c.computed.extend(inherited_computed);
                for p in sup_protocols {
                    if !c.protocols.contains(&p) {
                        c.protocols.push(p);
                    }
                }
                Ok(())
            }
            _ => unreachable!("filtered above"),
        }
    }

    pub(in crate::vm) fn op_get_property(&mut self) -> VmResult<()> {
        let name = self.read_pool_string()?;
        let receiver = self.pop_value()?;

        if let Value::Str(_) = receiver {
            if name == "count" {
                let len = self
                    .heap
                    .string_value(receiver)
                    .map(|s| s.chars().count())
                    .unwrap_or(0);
                return self.push(Value::Int(len as i64));
            }
            return Err(VmError::RuntimeError(format!(
                "String has no property '{}'.",
                name
            )));
        }

        let Some(r) = receiver.as_object() else {
            return Err(VmError::TypeError(format!(
                "Value of type {} has no properties.",
                receiver.type_name()
            )));
        };

        let action = match self.heap.get(r) {
            Object::Instance { class, fields } => {
                let type_name = match self.heap.get(*class) {
                    Object::Class(c) => c.name.clone(),
                    _ => "?".to_string(),
                };
                match self.heap.get(*class) {
                    Object::Class(c) => {
                        if let Some(comp) = c.find_computed(&name) {
                            PropertyAction::Accessor(comp.getter)
                        } else if let Some(v) = fields.get(&name) {
                            PropertyAction::Push(v)
                        } else if let Some(m) = c.find_method(&name) {
                            PropertyAction::Bind(m.closure)
                        } else {
                            return Err(VmError::RuntimeError(format!(
                                "Undefined property '{}' on {}.",
                                name, type_name
                            )));
                        }
                    }
                    _ => {
                        return Err(VmError::TypeError(
                            "Instance has a corrupt class handle.".to_string(),
                        ))
                    }
                }
            }
            Object::Map(map) => PropertyAction::Push(map.get(&name).unwrap_or(Value::Null)),
            Object::Array(items) => {
                if name == "count" {
                    PropertyAction::Push(Value::Int(items.len() as i64))
                } else {
                    return Err(VmError::RuntimeError(format!(
                        "Array has no property '{}'.",
                        name
                    )));
                }
            }
            Object::Tuple { items, labels } => {
                match labels
                    .iter()
                    .position(|l| l.as_deref() == Some(name.as_str()))
                {
                    Some(i) => PropertyAction::Push(items[i]),
                    None => {
                        return Err(VmError::RuntimeError(format!(
                            "Tuple has no element labeled '{}'.",
                            name
                        )))
                    }
                }
            }
            Object::EnumCase(case) => {
                let enum_type = case.enum_type;
                if name == "rawValue" {
                    match case.raw {
                        Some(v) => PropertyAction::Push(v),
                        None => {
                            return Err(VmError::RuntimeError(
                                "Enum case has no raw value.".to_string(),
                            ))
                        }
                    }
                } else {
                    let assoc = match self.heap.get(enum_type) {
                        Object::EnumType(e) => e
                            .cases
                            .get(case.case_index)
                            .and_then(|def| {
                                def.assoc_labels.iter().position(|l| *l == name)
                            })
                            .and_then(|i| case.associated.get(i).copied()),
                        _ => None,
                    };
                    if let Some(v) = assoc {
                        PropertyAction::Push(v)
                    } else {
                        let member = match self.heap.get(enum_type) {
                            Object::EnumType(e) => e
                                .computed
                                .iter()
                                .find(|c| c.name == name)
                                .map(|c| PropertyAction::Accessor(c.getter))
                                .or_else(|| {
                                    e.methods
                                        .iter()
                                        .find(|m| m.name == name)
                                        .map(|m| PropertyAction::Bind(m.closure))
                                }),
                            _ => None,
                        };
                        match member {
                            Some(a) => a,
                            None => {
                                return Err(VmError::RuntimeError(format!(
                                    "Undefined property '{}' on enum case.",
                                    name
                                )))
                            }
                        }
                    }
                }
            }
            Object::EnumType(e) => {
                match e.cases.iter().position(|c| c.name == name) {
                    Some(i) => {
                        if e.cases[i].assoc_labels.is_empty() {
                            PropertyAction::MakeCase(i)
                        } else {
                            PropertyAction::MakeConstructor(i)
                        }
                    }
                    None => {
                        return Err(VmError::RuntimeError(format!(
                            "Enum '{}' has no case '{}'.",
                            e.name, name
                        )))
                    }
                }
            }
            other => {
                return Err(VmError::TypeError(format!(
                    "Value of type {} has no properties.",
                    other.type_name()
                )))
            }
        };

        match action {
            PropertyAction::Push(v) => self.push(v),
            PropertyAction::Bind(method) => {
                self.heap.retain_value(receiver);
                self.heap.retain(method);
                let bound = self.heap.alloc(Object::BoundMethod { receiver, method });
                self.push_new(Value::Obj(bound))
            }
            PropertyAction::Accessor(getter) => self.begin_accessor_call(getter, receiver, None),
            PropertyAction::MakeCase(i) => {
                let raw = match self.heap.get(r) {
                    Object::EnumType(e) => e.cases[i].raw,
                    _ => None,
                };
                if let Some(raw) = raw {
                    self.heap.retain_value(raw);
                }
                self.heap.retain(r);
                let case = self.heap.alloc(Object::EnumCase(crate::object::EnumCaseObject {
                    enum_type: r,
                    case_index: i,
                    raw,
                    associated: Vec::new(),
                }));
                self.push_new(Value::Obj(case))
            }
            PropertyAction::MakeConstructor(i) => {
                self.heap.retain(r);
                let ctor = self.heap.alloc(Object::EnumConstructor {
                    enum_type: r,
                    case_index: i,
                });
                self.push_new(Value::Obj(ctor))
            }
        }
    }

    pub(in crate::vm) fn op_set_property(&mut self) -> VmResult<()> {
        let name = self.read_pool_string()?;
        let value = self.pop_value()?;
        let receiver = self.peek(0)?;

        let Some(r) = receiver.as_object() else {
            return Err(VmError::TypeError(
                "Property assignment on a non-object value.".to_string(),
            ));
        };

        match self.heap.get(r) {
            Object::Instance { class, fields } => {
                let class_ref = *class;
                let computed = match self.heap.get(class_ref) {
                    Object::Class(c) => c
                        .find_computed(&name)
                        .map(|comp| (comp.getter, comp.setter)),
                    _ => None,
                };
                if let Some((_getter, setter)) = computed {
                    let Some(setter) = setter else {
                        return Err(VmError::RuntimeError(format!(
                            "Cannot assign to read-only computed property '{}'.",
                            name
                        )));
                    };
                    self.pop_value()?;
                    return self.begin_accessor_call(setter, receiver, Some(value));
                }

                let (will_set, did_set) = match self.heap.get(class_ref) {
                    Object::Class(c) => c
                        .find_property(&name)
                        .map(|p| (p.will_set, p.did_set))
                        .unwrap_or((None, None)),
                    _ => (None, None),
                };
                let old = fields.get(&name).unwrap_or(Value::Null);

                // Observers run nested calls, which drain the cleanup
                // queue; keep everything this handler still touches alive.
                self.heap.retain_value(value);
                self.heap.retain_value(old);
                self.heap.retain_value(receiver);
                self.pop_value()?;

                let observer_result: VmResult<()> = (|| {
                    if let Some(w) = will_set {
                        self.call_value_nested(Value::Obj(w), &[receiver, value])?;
                    }

                    self.heap.retain_value(value);
                    let replaced = match self.heap.get_mut(r) {
                        Object::Instance { fields, .. } => fields.insert(name.clone(), value),
                        _ => unreachable!("matched Instance above"),
                    };
                    if let Some(replaced) = replaced {
                        self.heap.release_value(replaced);
                    }

                    if let Some(d) = did_set {
                        self.call_value_nested(Value::Obj(d), &[receiver, old])?;
                    }
                    Ok(())
                })();

                self.heap.release_value(receiver);
                self.heap.release_value(old);
                self.heap.release_value(value);
                observer_result?;

                self.push(value)
            }
            Object::Map(_) => {
                self.pop_value()?;
                self.heap.retain_value(value);
                let replaced = match self.heap.get_mut(r) {
                    Object::Map(map) => map.insert(name, value),
                    _ => unreachable!("matched Map above"),
                };
                if let Some(replaced) = replaced {
                    self.heap.release_value(replaced);
                }
                self.push(value)
            }
            _ => Err(VmError::TypeError(
                "Property assignment is only supported on instances and maps.".to_string(),
            )),
        }
    }

    pub(in crate::vm) fn op_super(&mut self) -> VmResult<()> {
        let name = self.read_pool_string()?;
        let receiver = self.pop_value()?;

        let Some(r) = receiver.as_object() else {
            return Err(VmError::TypeError(
                "'super' requires an instance receiver.".to_string(),
            ));
        };
        let class_ref = match self.heap.get(r) {
            Object::Instance { class, .. } => *class,
            _ => {
                return Err(VmError::TypeError(
                    "'super' requires an instance receiver.".to_string(),
                ))
            }
        };
        let (class_name, superclass) = match self.heap.get(class_ref) {
            Object::Class(c) => (c.name.clone(), c.superclass),
            _ => {
                return Err(VmError::TypeError(
                    "Instance has a corrupt class handle.".to_string(),
                ))
            }
        };
        let Some(sup) = superclass else {
            return Err(VmError::RuntimeError(format!(
                "Class '{}' has no superclass.",
                class_name
            )));
        };
        let method = match self.heap.get(sup) {
            Object::Class(c) => c.find_method(&name).map(|m| m.closure),
            _ => None,
        };
        let Some(method) = method else {
            return Err(VmError::RuntimeError(format!(
                "Superclass of '{}' has no method '{}'.",
                class_name, name
            )));
        };

        self.heap.retain_value(receiver);
        self.heap.retain(method);
        let bound = self.heap.alloc(Object::BoundMethod { receiver, method });
        self.push_new(Value::Obj(bound))
    }

    pub(in crate::vm) fn op_unwrap(&mut self) -> VmResult<()> {
        let v = self.pop_value()?;
        if v.is_null() {
            return Err(VmError::RuntimeError(
                "Unexpectedly found null while unwrapping an optional value.".to_string(),
            ));
        }
        self.push(v)
    }

    pub(in crate::vm) fn op_nil_coalesce(&mut self) -> VmResult<()> {
        let fallback = self.pop_value()?;
        let v = self.pop_value()?;
        self.push(if v.is_null() { fallback } else { v })
    }

    pub(in crate::vm) fn op_copy_value(&mut self) -> VmResult<()> {
        let v = self.pop_value()?;
        let copied = self.heap.deep_copy_value(v);
        if copied == v {
            self.push(v)
        } else {
            self.push_new(copied)
        }
    }

    /// Arrange a computed-property accessor call inline: the accessor's
    /// frame is pushed here and its `RETURN` delivers the result where the
    /// property value belongs.
    pub(in crate::vm) fn begin_accessor_call(
        &mut self,
        accessor: ObjRef,
        receiver: Value,
        new_value: Option<Value>,
    ) -> VmResult<()> {
        self.push(Value::Obj(accessor))?;
        self.push(receiver)?;
        let mut argc = 1;
        if let Some(v) = new_value {
            self.push(v)?;
            argc = 2;
        }
        let callee_index = self.stack.depth() - argc - 1;
        let pushed = self.call_value(callee_index, argc, None)?;
        if !pushed {
            return Err(VmError::TypeError(
                "Computed-property accessor must be a function.".to_string(),
            ));
        }
        Ok(())
    }
}
