//! Call, argument binding, and return opcodes
//!
//! The callee sits beneath its arguments; a pushed frame's base slot is the
//! slot of argument 0, so parameters are the frame's first locals. Callee
//! kinds: closures and bare functions, bound methods (receiver spliced in as
//! `self`), class and struct types (initializer protocol or memberwise
//! construction), enum-case constructors, and native functions.

use crate::heap::ObjRef;
use crate::native::NativeContext;
use crate::object::{EnumCaseObject, Object, PropertyMap, TypeKind};
use crate::stack::CallFrame;
use crate::value::Value;
use crate::vm::Vm;
use crate::{VmError, VmResult};
use slate_bytecode::NO_LABEL;

/// Argument labels for one call site; `None` = positional
type CallLabels = Vec<Option<String>>;

impl Vm {
    pub(in crate::vm) fn op_call(&mut self) -> VmResult<()> {
        let argc = self.read_u8()? as usize;
        let callee_index = self.callee_index(argc)?;
        self.call_value(callee_index, argc, None)?;
        Ok(())
    }

    pub(in crate::vm) fn op_call_named(&mut self) -> VmResult<()> {
        let argc = self.read_u8()? as usize;
        let mut labels: CallLabels = Vec::with_capacity(argc);
        for _ in 0..argc {
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
        let callee_index = self.callee_index(argc)?;
        self.call_value(callee_index, argc, Some(labels))?;
        Ok(())
    }

    fn callee_index(&self, argc: usize) -> VmResult<usize> {
        self.stack
            .depth()
            .checked_sub(argc + 1)
            .ok_or(VmError::StackUnderflow)
    }

    /// Invoke the value at `callee_index` with `argc` arguments above it.
    ///
    /// Returns true when a call frame was pushed (control transferred into
    /// bytecode); false when the call completed immediately and its result
    /// replaced the callee on the stack.
    pub(in crate::vm) fn call_value(
        &mut self,
        callee_index: usize,
        argc: usize,
        labels: Option<CallLabels>,
    ) -> VmResult<bool> {
        let callee = self.stack.get_at(callee_index)?;
        let Some(r) = callee.as_object() else {
            return Err(VmError::TypeError(format!(
                "Value of type {} is not callable.",
                callee.type_name()
            )));
        };

        match self.heap.get(r) {
            Object::Closure(c) => {
                let function = c.function;
                self.push_callable_frame(Some(r), function, callee_index, argc, labels)?;
                Ok(true)
            }
            Object::Function(_) => {
                self.push_callable_frame(None, r, callee_index, argc, labels)?;
                Ok(true)
            }
            Object::BoundMethod { receiver, method } => {
                let receiver = *receiver;
                let method = *method;
                let function = match self.heap.get(method) {
                    Object::Closure(c) => c.function,
                    _ => {
                        return Err(VmError::TypeError(
                            "Bound method does not wrap a function.".to_string(),
                        ))
                    }
                };
                // Splice the receiver in as `self`: the method closure
                // replaces the bound-method value and the receiver becomes
                // argument 0.
                self.heap.retain_value(receiver);
                self.set_slot(callee_index, Value::Obj(method))?;
                self.stack.insert_at(callee_index + 1, receiver)?;
                let labels = labels.map(|mut l| {
                    l.insert(0, None);
                    l
                });
                self.push_callable_frame(Some(method), function, callee_index, argc + 1, labels)?;
                Ok(true)
            }
            Object::Class(_) => self.instantiate(r, callee_index, argc, labels),
            Object::EnumConstructor {
                enum_type,
                case_index,
            } => {
                let enum_type = *enum_type;
                let case_index = *case_index;
                self.construct_enum_case(enum_type, case_index, callee_index, argc, labels)?;
                Ok(false)
            }
            Object::NativeFunction(nf) => {
                let func = nf.func.clone();
                let mut args = Vec::with_capacity(argc);
                for i in 0..argc {
                    args.push(self.stack.get_at(callee_index + 1 + i)?);
                }
                let result = {
                    let mut ctx = NativeContext::new(&mut self.heap);
                    func(&mut ctx, &args)
                }
                .map_err(|e| VmError::RuntimeError(e.0))?;
                self.truncate_stack(callee_index);
                self.push(result)?;
                Ok(false)
            }
            _ => Err(VmError::TypeError(
                "Can only call functions, methods, classes, and enum cases.".to_string(),
            )),
        }
    }

    /// Bind arguments against a function's parameter list and transfer
    /// control into its chunk.
    pub(in crate::vm) fn push_callable_frame(
        &mut self,
        closure: Option<ObjRef>,
        function: ObjRef,
        callee_index: usize,
        argc: usize,
        labels: Option<CallLabels>,
    ) -> VmResult<()> {
        let (name, params, param_labels, defaults, has_default, chunk, is_initializer) = {
            let f = match self.heap.get(function) {
                Object::Function(f) => f,
                _ => {
                    return Err(VmError::TypeError(
                        "Callee is not a function.".to_string(),
                    ))
                }
            };
            (
                f.name.clone(),
                f.params.clone(),
                f.param_labels.clone(),
                f.defaults.clone(),
                f.has_default.clone(),
                f.chunk.clone(),
                f.is_initializer,
            )
        };
        let param_count = params.len();

        match labels {
            None => {
                let required = has_default.iter().filter(|d| !**d).count();
                if argc < required || argc > param_count {
                    return Err(VmError::RuntimeError(format!(
                        "Function '{}' expects {} argument(s) ({} required), got {}.",
                        name, param_count, required, argc
                    )));
                }
                for i in argc..param_count {
                    if !has_default[i] {
                        return Err(VmError::RuntimeError(format!(
                            "Missing argument for parameter '{}' of '{}'.",
                            params[i], name
                        )));
                    }
                    self.push(defaults[i])?;
                }
            }
            Some(labels) => {
                let bound = self.bind_named_arguments(
                    &name,
                    &params,
                    &param_labels,
                    &defaults,
                    &has_default,
                    callee_index,
                    &labels,
                )?;
                // Rewrite the argument region into parameter order. Popped
                // stack references stay valid until the instruction ends.
                self.truncate_stack(callee_index + 1);
                for v in bound {
                    self.push(v)?;
                }
            }
        }

        self.frames.push(CallFrame {
            stack_base: callee_index + 1,
            return_ip: self.ip,
            return_chunk: self.chunk.clone(),
            function_name: name,
            closure,
            is_initializer,
        });
        self.chunk = chunk;
        self.ip = 0;
        Ok(())
    }

    /// Resolve labeled arguments to parameter positions: a label matches the
    /// parameter at its own index, or is placed by name when that is
    /// unambiguous. Missing parameters fill from defaults.
    #[allow(clippy::too_many_arguments)]
    fn bind_named_arguments(
        &mut self,
        name: &str,
        params: &[String],
        param_labels: &[String],
        defaults: &[Value],
        has_default: &[bool],
        callee_index: usize,
        labels: &[Option<String>],
    ) -> VmResult<Vec<Value>> {
        let param_count = params.len();
        let argc = labels.len();
        if argc > param_count {
            return Err(VmError::RuntimeError(format!(
                "Function '{}' expects {} argument(s), got {}.",
                name, param_count, argc
            )));
        }

        let mut slots: Vec<Option<Value>> = vec![None; param_count];
        for (j, label) in labels.iter().enumerate() {
            let v = self.stack.get_at(callee_index + 1 + j)?;
            match label {
                None => {
                    if slots[j].is_some() {
                        return Err(VmError::RuntimeError(format!(
                            "Duplicate argument for parameter '{}' of '{}'.",
                            params[j], name
                        )));
                    }
                    slots[j] = Some(v);
                }
                Some(l) => {
                    if param_labels.get(j).map(String::as_str) == Some(l.as_str())
                        && slots[j].is_none()
                    {
                        slots[j] = Some(v);
                        continue;
                    }
                    let candidates: Vec<usize> = param_labels
                        .iter()
                        .enumerate()
                        .filter(|(k, dl)| *dl == l && slots[*k].is_none())
                        .map(|(k, _)| k)
                        .collect();
                    match candidates.as_slice() {
                        [k] => slots[*k] = Some(v),
                        [] => {
                            if param_labels.iter().any(|dl| dl == l) {
                                return Err(VmError::RuntimeError(format!(
                                    "Duplicate argument label '{}' in call to '{}'.",
                                    l, name
                                )));
                            }
                            return Err(VmError::RuntimeError(format!(
                                "Unknown argument label '{}' in call to '{}'.",
                                l, name
                            )));
                        }
                        _ => {
                            return Err(VmError::RuntimeError(format!(
                                "Ambiguous argument label '{}' in call to '{}'.",
                                l, name
                            )));
                        }
                    }
                }
            }
        }

        let mut bound = Vec::with_capacity(param_count);
        for i in 0..param_count {
            match slots[i] {
                Some(v) => bound.push(v),
                None => {
                    if !has_default[i] {
                        return Err(VmError::RuntimeError(format!(
                            "Missing argument for parameter '{}' of '{}'.",
                            params[i], name
                        )));
                    }
                    bound.push(defaults[i]);
                }
            }
        }
        Ok(bound)
    }

    /// Instantiate a class or struct type
    fn instantiate(
        &mut self,
        class_ref: ObjRef,
        callee_index: usize,
        argc: usize,
        labels: Option<CallLabels>,
    ) -> VmResult<bool> {
        let (class_name, kind, init, prop_defaults) = {
            let c = match self.heap.get(class_ref) {
                Object::Class(c) => c,
                _ => unreachable!("caller matched Object::Class"),
            };
            (
                c.name.clone(),
                c.kind,
                c.find_method("init").map(|m| m.closure),
                c.properties
                    .iter()
                    .map(|p| (p.name.clone(), p.default))
                    .collect::<Vec<_>>(),
            )
        };

        // Populate stored fields from their defaults; struct-typed defaults
        // are copied so instances never share them.
        let mut fields = PropertyMap::new();
        for (pname, default) in &prop_defaults {
            let v = self.heap.deep_copy_value(*default);
            if v == *default {
                self.heap.retain_value(v);
            }
            fields.insert(pname.clone(), v);
        }
        self.heap.retain(class_ref);
        let instance = self.heap.alloc(Object::Instance {
            class: class_ref,
            fields,
        });

        if let Some(init) = init {
            let function = match self.heap.get(init) {
                Object::Closure(c) => c.function,
                _ => {
                    self.heap.release(instance);
                    return Err(VmError::TypeError(format!(
                        "Initializer of '{}' is not a function.",
                        class_name
                    )));
                }
            };
            self.set_slot(callee_index, Value::Obj(init))?;
            self.stack.insert_at(callee_index + 1, Value::Obj(instance))?;
            let labels = labels.map(|mut l| {
                l.insert(0, None);
                l
            });
            self.push_callable_frame(Some(init), function, callee_index, argc + 1, labels)?;
            return Ok(true);
        }

        if argc == 0 {
            self.set_slot_transfer(callee_index, Value::Obj(instance))?;
            return Ok(false);
        }

        if kind == TypeKind::Struct && argc <= prop_defaults.len() {
            // Memberwise initialization: arguments assign to stored
            // properties in declaration order, or by label.
            for i in 0..argc {
                let v = self.stack.get_at(callee_index + 1 + i)?;
                let pname = match labels.as_ref().and_then(|l| l[i].clone()) {
                    Some(label) => {
                        if !prop_defaults.iter().any(|(p, _)| *p == label) {
                            self.heap.release(instance);
                            return Err(VmError::RuntimeError(format!(
                                "Struct '{}' has no stored property '{}'.",
                                class_name, label
                            )));
                        }
                        label
                    }
                    None => prop_defaults[i].0.clone(),
                };
                self.heap.retain_value(v);
                let old = match self.heap.get_mut(instance) {
                    Object::Instance { fields, .. } => fields.insert(pname, v),
                    _ => unreachable!("instance allocated above"),
                };
                if let Some(old) = old {
                    self.heap.release_value(old);
                }
            }
            self.truncate_stack(callee_index);
            self.push_new(Value::Obj(instance))?;
            return Ok(false);
        }

        self.heap.release(instance);
        Err(VmError::RuntimeError(format!(
            "Type '{}' has no initializer taking {} argument(s).",
            class_name, argc
        )))
    }

    /// Build an enum case carrying associated values
    fn construct_enum_case(
        &mut self,
        enum_type: ObjRef,
        case_index: usize,
        callee_index: usize,
        argc: usize,
        labels: Option<CallLabels>,
    ) -> VmResult<()> {
        let (case_name, assoc_labels, raw) = {
            let e = match self.heap.get(enum_type) {
                Object::EnumType(e) => e,
                _ => {
                    return Err(VmError::TypeError(
                        "Enum constructor does not reference an enum type.".to_string(),
                    ))
                }
            };
            let def = e.cases.get(case_index).ok_or_else(|| {
                VmError::RuntimeError("Enum case index out of range.".to_string())
            })?;
            (def.name.clone(), def.assoc_labels.clone(), def.raw)
        };

        if argc != assoc_labels.len() {
            return Err(VmError::RuntimeError(format!(
                "Enum case '{}' expects {} associated value(s), got {}.",
                case_name,
                assoc_labels.len(),
                argc
            )));
        }

        let mut slots: Vec<Option<Value>> = vec![None; argc];
        for j in 0..argc {
            let v = self.stack.get_at(callee_index + 1 + j)?;
            let label = labels.as_ref().and_then(|l| l[j].clone());
            match label {
                None => slots[j] = Some(v),
                Some(l) => {
                    if assoc_labels.get(j).map(String::as_str) == Some(l.as_str())
                        && slots[j].is_none()
                    {
                        slots[j] = Some(v);
                        continue;
                    }
                    let candidates: Vec<usize> = assoc_labels
                        .iter()
                        .enumerate()
                        .filter(|(k, al)| **al == l && slots[*k].is_none())
                        .map(|(k, _)| k)
                        .collect();
                    match candidates.as_slice() {
                        [k] => slots[*k] = Some(v),
                        [] => {
                            return Err(VmError::RuntimeError(format!(
                                "Enum case '{}' has no associated value labeled '{}'.",
                                case_name, l
                            )));
                        }
                        _ => {
                            return Err(VmError::RuntimeError(format!(
                                "Ambiguous associated-value label '{}' for case '{}'.",
                                l, case_name
                            )));
                        }
                    }
                }
            }
        }

        let mut associated = Vec::with_capacity(argc);
        for (j, slot) in slots.into_iter().enumerate() {
            let v = slot.ok_or_else(|| {
                VmError::RuntimeError(format!(
                    "Missing associated value '{}' for case '{}'.",
                    assoc_labels[j], case_name
                ))
            })?;
            self.heap.retain_value(v);
            associated.push(v);
        }
        if let Some(raw) = raw {
            self.heap.retain_value(raw);
        }
        self.heap.retain(enum_type);
        let case = self.heap.alloc(Object::EnumCase(EnumCaseObject {
            enum_type,
            case_index,
            raw,
            associated,
        }));

        self.truncate_stack(callee_index);
        self.push_new(Value::Obj(case))
    }

    /// Return from the current function. Returns true when the root body
    /// returned (execution is complete).
    pub(in crate::vm) fn op_return(&mut self) -> VmResult<bool> {
        let mut result = self.pop_value()?;

        let Some(frame) = self.frames.pop() else {
            // Top-level return ends execution with the value.
            self.push(result)?;
            return Ok(true);
        };

        self.close_upvalues_from(frame.stack_base);

        if frame.is_initializer {
            // The constructed instance substitutes for the return value.
            result = self.stack.get_at(frame.stack_base)?;
        }
        self.heap.retain_value(result);

        // Drop the frame's locals and the callee slot beneath them.
        self.truncate_stack(frame.stack_base.saturating_sub(1));
        self.chunk = frame.return_chunk;
        self.ip = frame.return_ip;

        if let Err(e) = self.stack.push(result) {
            self.heap.release_value(result);
            return Err(e);
        }

        // Handlers installed by the returning frame are dead.
        let depth = self.frames.len();
        self.try_handlers.retain(|h| h.frame_depth <= depth);

        Ok(false)
    }
}
