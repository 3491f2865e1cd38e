//! Object heap with deterministic reference counting
//!
//! Objects live in a slot arena addressed by stable [`ObjRef`] handles. Every
//! object carries a strong refcount; [`Heap::alloc`] hands out count 1 to the
//! creator, and the VM's stack, globals, and containers each hold one strong
//! reference to whatever they store.
//!
//! A release that drops the count to zero does not destroy the object — it
//! enqueues the handle on the cleanup queue. The VM drains the queue after
//! the current instruction completes, so destructors never reenter the middle
//! of an instruction handler and a value popped then re-pushed within one
//! instruction is rescued by its new reference. Destruction releases the
//! object's owned handles, which may enqueue further releases; the drain
//! loops until the queue is empty.
//!
//! The only construct that could form a cycle is a closure captured by a
//! binding that the closure itself captures; the VM breaks it by closing the
//! upvalue to an owned value at scope exit, so no cycle collector exists.

use crate::object::{Object, PropertyMap, TypeKind, Upvalue};
use crate::value::Value;
use std::fmt;

/// Handle to a heap object
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjRef(u32);

impl ObjRef {
    /// Arena slot index
    #[inline]
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for ObjRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjRef({})", self.0)
    }
}

struct HeapEntry {
    refcount: u32,
    object: Object,
}

/// Maximum nesting rendered by `value_to_string` before eliding
const DISPLAY_DEPTH_LIMIT: usize = 8;

/// The object heap
pub struct Heap {
    entries: Vec<Option<HeapEntry>>,
    free: Vec<u32>,
    pending: Vec<ObjRef>,
    live: usize,
    allocated_total: u64,
}

impl Heap {
    /// Create an empty heap
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            free: Vec::new(),
            pending: Vec::new(),
            live: 0,
            allocated_total: 0,
        }
    }

    /// Allocate an object with refcount 1 (owned by the caller)
    pub fn alloc(&mut self, object: Object) -> ObjRef {
        self.live += 1;
        self.allocated_total += 1;
        let entry = HeapEntry {
            refcount: 1,
            object,
        };
        match self.free.pop() {
            Some(slot) => {
                self.entries[slot as usize] = Some(entry);
                ObjRef(slot)
            }
            None => {
                self.entries.push(Some(entry));
                ObjRef((self.entries.len() - 1) as u32)
            }
        }
    }

    /// Borrow an object
    ///
    /// # Panics
    ///
    /// Panics on a dangling handle; a dangling handle means the VM's
    /// refcount discipline was violated.
    pub fn get(&self, r: ObjRef) -> &Object {
        match self.entries.get(r.index()) {
            Some(Some(entry)) => &entry.object,
            _ => panic!("dangling heap handle {:?}", r),
        }
    }

    /// Mutably borrow an object
    ///
    /// # Panics
    ///
    /// Panics on a dangling handle.
    pub fn get_mut(&mut self, r: ObjRef) -> &mut Object {
        match self.entries.get_mut(r.index()) {
            Some(Some(entry)) => &mut entry.object,
            _ => panic!("dangling heap handle {:?}", r),
        }
    }

    /// Borrow an object if the handle is still live
    pub fn try_get(&self, r: ObjRef) -> Option<&Object> {
        match self.entries.get(r.index()) {
            Some(Some(entry)) => Some(&entry.object),
            _ => None,
        }
    }

    /// Current strong count of a live handle
    pub fn refcount(&self, r: ObjRef) -> u32 {
        match self.entries.get(r.index()) {
            Some(Some(entry)) => entry.refcount,
            _ => 0,
        }
    }

    /// Add a strong reference
    pub fn retain(&mut self, r: ObjRef) {
        if let Some(Some(entry)) = self.entries.get_mut(r.index()) {
            entry.refcount += 1;
        }
    }

    /// Drop a strong reference; at zero the handle joins the cleanup queue
    pub fn release(&mut self, r: ObjRef) {
        if let Some(Some(entry)) = self.entries.get_mut(r.index()) {
            debug_assert!(entry.refcount > 0, "release of zero-count object");
            entry.refcount = entry.refcount.saturating_sub(1);
            if entry.refcount == 0 {
                self.pending.push(r);
            }
        }
    }

    /// Retain the handle inside a value, if any
    pub fn retain_value(&mut self, v: Value) {
        if let Some(r) = v.as_handle() {
            self.retain(r);
        }
    }

    /// Release the handle inside a value, if any
    pub fn release_value(&mut self, v: Value) {
        if let Some(r) = v.as_handle() {
            self.release(r);
        }
    }

    /// Number of live objects
    pub fn live_count(&self) -> usize {
        self.live
    }

    /// Total allocations over the heap's lifetime
    pub fn allocated_total(&self) -> u64 {
        self.allocated_total
    }

    /// Whether the cleanup queue holds entries awaiting the next drain
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Destroy every queued object whose count is still zero, cascading
    /// releases of owned handles until the queue is empty.
    pub fn drain_pending(&mut self) {
        while let Some(r) = self.pending.pop() {
            let destroy = matches!(
                self.entries.get(r.index()),
                Some(Some(entry)) if entry.refcount == 0
            );
            if !destroy {
                // Rescued by a retain after enqueue, or already destroyed
                // via a duplicate queue entry.
                continue;
            }
            let entry = self.entries[r.index()]
                .take()
                .expect("destroy target checked above");
            self.free.push(r.index() as u32);
            self.live -= 1;
            self.release_children(entry.object);
        }
    }

    /// Release every strong reference the object owned
    fn release_children(&mut self, object: Object) {
        match object {
            Object::Str(_) | Object::Protocol(_) | Object::NativeFunction(_) => {}
            Object::Array(items) => {
                for v in items {
                    self.release_value(v);
                }
            }
            Object::Map(map) => {
                for v in map.values().collect::<Vec<_>>() {
                    self.release_value(v);
                }
            }
            Object::Tuple { items, .. } => {
                for v in items {
                    self.release_value(v);
                }
            }
            Object::Function(func) => {
                for v in func.defaults {
                    self.release_value(v);
                }
            }
            Object::Closure(closure) => {
                self.release(closure.function);
                for uv in closure.upvalues {
                    self.release(uv);
                }
            }
            Object::Upvalue(Upvalue::Closed(v)) => self.release_value(v),
            Object::Upvalue(Upvalue::Open(_)) => {}
            Object::Class(class) => {
                if let Some(sup) = class.superclass {
                    self.release(sup);
                }
                for m in class.methods {
                    self.release(m.closure);
                }
                for p in class.properties {
                    self.release_value(p.default);
                    if let Some(o) = p.will_set {
                        self.release(o);
                    }
                    if let Some(o) = p.did_set {
                        self.release(o);
                    }
                }
                for c in class.computed {
                    self.release(c.getter);
                    if let Some(s) = c.setter {
                        self.release(s);
                    }
                }
            }
            Object::Instance { class, fields } => {
                self.release(class);
                for v in fields.values().collect::<Vec<_>>() {
                    self.release_value(v);
                }
            }
            Object::EnumType(e) => {
                for case in e.cases {
                    if let Some(raw) = case.raw {
                        self.release_value(raw);
                    }
                }
                for m in e.methods {
                    self.release(m.closure);
                }
                for c in e.computed {
                    self.release(c.getter);
                    if let Some(s) = c.setter {
                        self.release(s);
                    }
                }
            }
            Object::EnumCase(case) => {
                self.release(case.enum_type);
                if let Some(raw) = case.raw {
                    self.release_value(raw);
                }
                for v in case.associated {
                    self.release_value(v);
                }
            }
            Object::EnumConstructor { enum_type, .. } => self.release(enum_type),
            Object::BoundMethod { receiver, method } => {
                self.release_value(receiver);
                self.release(method);
            }
            Object::Native(mut data) => {
                if let Some(notify) = data.release.take() {
                    notify(data.handle);
                }
            }
        }
    }

    // ========================================================================
    // Structure-aware value operations
    // ========================================================================

    /// Structural equality: primitives by content (int/float after numeric
    /// promotion), strings by content, other objects by handle identity.
    pub fn values_equal(&self, a: Value, b: Value) -> bool {
        match (a, b) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(x), Value::Bool(y)) => x == y,
            (Value::Int(x), Value::Int(y)) => x == y,
            (Value::Float(x), Value::Float(y)) => x == y,
            (Value::Int(x), Value::Float(y)) | (Value::Float(y), Value::Int(x)) => {
                x as f64 == y
            }
            (Value::Str(x), Value::Str(y)) => {
                if x == y {
                    return true;
                }
                match (self.get(x), self.get(y)) {
                    (Object::Str(sx), Object::Str(sy)) => sx == sy,
                    _ => false,
                }
            }
            (Value::Obj(x), Value::Obj(y)) => x == y,
            _ => false,
        }
    }

    /// Read string contents of a string value
    pub fn string_value(&self, v: Value) -> Option<&str> {
        match v {
            Value::Str(r) => match self.get(r) {
                Object::Str(s) => Some(s.as_str()),
                _ => None,
            },
            _ => None,
        }
    }

    /// Type name of a value, resolving instances to their type's name
    pub fn value_type_name(&self, v: Value) -> String {
        match v {
            Value::Obj(r) => match self.get(r) {
                Object::Instance { class, .. } => match self.get(*class) {
                    Object::Class(c) => c.name.clone(),
                    _ => "Instance".to_string(),
                },
                Object::EnumCase(case) => match self.get(case.enum_type) {
                    Object::EnumType(e) => e.name.clone(),
                    _ => "EnumCase".to_string(),
                },
                other => other.type_name().to_string(),
            },
            _ => v.type_name().to_string(),
        }
    }

    /// Render a value for `PRINT` and diagnostics
    pub fn value_to_string(&self, v: Value) -> String {
        self.render_value(v, 0)
    }

    fn render_value(&self, v: Value, depth: usize) -> String {
        if depth > DISPLAY_DEPTH_LIMIT {
            return "...".to_string();
        }
        match v {
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Str(r) => match self.get(r) {
                Object::Str(s) => s.clone(),
                _ => "<corrupt string>".to_string(),
            },
            Value::Obj(r) => self.render_object(r, depth),
        }
    }

    fn render_object(&self, r: ObjRef, depth: usize) -> String {
        match self.get(r) {
            Object::Str(s) => s.clone(),
            Object::Array(items) => {
                let rendered: Vec<String> = items
                    .iter()
                    .map(|v| self.render_value(*v, depth + 1))
                    .collect();
                format!("[{}]", rendered.join(", "))
            }
            Object::Map(map) => {
                if map.is_empty() {
                    return "[:]".to_string();
                }
                let rendered: Vec<String> = map
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k, self.render_value(v, depth + 1)))
                    .collect();
                format!("[{}]", rendered.join(", "))
            }
            Object::Tuple { items, labels } => {
                let rendered: Vec<String> = items
                    .iter()
                    .zip(labels.iter())
                    .map(|(v, label)| match label {
                        Some(l) => format!("{}: {}", l, self.render_value(*v, depth + 1)),
                        None => self.render_value(*v, depth + 1),
                    })
                    .collect();
                format!("({})", rendered.join(", "))
            }
            Object::Function(f) => format!("<fn {}>", f.name),
            Object::Closure(c) => match self.get(c.function) {
                Object::Function(f) => format!("<fn {}>", f.name),
                _ => "<fn>".to_string(),
            },
            Object::Upvalue(_) => "<upvalue>".to_string(),
            Object::Class(c) => match c.kind {
                TypeKind::Class => format!("<class {}>", c.name),
                TypeKind::Struct => format!("<struct {}>", c.name),
            },
            Object::Instance { class, fields } => {
                let name = match self.get(*class) {
                    Object::Class(c) => c.name.as_str(),
                    _ => "?",
                };
                let rendered: Vec<String> = fields
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k, self.render_value(v, depth + 1)))
                    .collect();
                format!("{}({})", name, rendered.join(", "))
            }
            Object::EnumType(e) => format!("<enum {}>", e.name),
            Object::EnumCase(case) => {
                let (enum_name, case_name) = match self.get(case.enum_type) {
                    Object::EnumType(e) => (
                        e.name.as_str(),
                        e.cases
                            .get(case.case_index)
                            .map(|c| c.name.as_str())
                            .unwrap_or("?"),
                    ),
                    _ => ("?", "?"),
                };
                if case.associated.is_empty() {
                    format!("{}.{}", enum_name, case_name)
                } else {
                    let rendered: Vec<String> = case
                        .associated
                        .iter()
                        .map(|v| self.render_value(*v, depth + 1))
                        .collect();
                    format!("{}.{}({})", enum_name, case_name, rendered.join(", "))
                }
            }
            Object::EnumConstructor {
                enum_type,
                case_index,
            } => {
                let name = match self.get(*enum_type) {
                    Object::EnumType(e) => e
                        .cases
                        .get(*case_index)
                        .map(|c| c.name.clone())
                        .unwrap_or_default(),
                    _ => String::new(),
                };
                format!("<case {}>", name)
            }
            Object::BoundMethod { method, .. } => match self.get(*method) {
                Object::Closure(c) => match self.get(c.function) {
                    Object::Function(f) => format!("<fn {}>", f.name),
                    _ => "<fn>".to_string(),
                },
                _ => "<fn>".to_string(),
            },
            Object::Protocol(p) => format!("<protocol {}>", p.name),
            Object::NativeFunction(n) => format!("<native fn {}>", n.name),
            Object::Native(n) => format!("<native {}>", n.type_name),
        }
    }

    /// Deep-copy a struct instance: struct-typed fields copy recursively,
    /// class-typed fields (and everything else) share. Non-struct values are
    /// returned unchanged with no count adjustment.
    ///
    /// The copy is returned with refcount 1, owned by the caller.
    pub fn deep_copy_value(&mut self, v: Value) -> Value {
        let Value::Obj(r) = v else { return v };
        let is_struct_instance = match self.get(r) {
            Object::Instance { class, .. } => {
                matches!(self.get(*class), Object::Class(c) if c.kind == TypeKind::Struct)
            }
            _ => false,
        };
        if !is_struct_instance {
            return v;
        }

        let (class, field_entries) = match self.get(r) {
            Object::Instance { class, fields } => (
                *class,
                fields.iter().map(|(k, v)| (k.to_string(), v)).collect::<Vec<_>>(),
            ),
            _ => unreachable!("checked above"),
        };

        let mut fields = PropertyMap::new();
        for (name, field) in field_entries {
            let copied = self.deep_copy_value(field);
            if copied == field {
                // Shared, so the copy holds its own reference.
                self.retain_value(copied);
            }
            fields.insert(name, copied);
        }

        self.retain(class);
        let copy = self.alloc(Object::Instance { class, fields });
        Value::Obj(copy)
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Heap {
    /// Hosts still get their release notifications when a heap is torn down
    /// wholesale with wrappers alive.
    fn drop(&mut self) {
        for entry in self.entries.iter_mut().flatten() {
            if let Object::Native(data) = &mut entry.object {
                if let Some(notify) = data.release.take() {
                    notify(data.handle);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::ClassObject;

    #[test]
    fn test_alloc_starts_at_one() {
        let mut heap = Heap::new();
        let r = heap.alloc(Object::Str("hi".into()));
        assert_eq!(heap.refcount(r), 1);
        assert_eq!(heap.live_count(), 1);
    }

    #[test]
    fn test_release_defers_destruction() {
        let mut heap = Heap::new();
        let r = heap.alloc(Object::Str("hi".into()));
        heap.release(r);

        // Still present until the queue drains.
        assert!(heap.has_pending());
        assert!(heap.try_get(r).is_some());

        heap.drain_pending();
        assert!(heap.try_get(r).is_none());
        assert_eq!(heap.live_count(), 0);
    }

    #[test]
    fn test_retain_rescues_pending_object() {
        let mut heap = Heap::new();
        let r = heap.alloc(Object::Str("hi".into()));
        heap.release(r);
        heap.retain(r);
        heap.drain_pending();

        assert!(heap.try_get(r).is_some());
        assert_eq!(heap.refcount(r), 1);
    }

    #[test]
    fn test_destruction_cascades_to_children() {
        let mut heap = Heap::new();
        let s = heap.alloc(Object::Str("inner".into()));
        let arr = heap.alloc(Object::Array(vec![Value::Str(s)]));

        // The array owns the string's only reference once we release ours.
        heap.retain(s);
        heap.release(s);
        heap.drain_pending();
        assert_eq!(heap.refcount(s), 1);

        heap.release(arr);
        heap.drain_pending();
        assert!(heap.try_get(arr).is_none());
        assert!(heap.try_get(s).is_none());
        assert_eq!(heap.live_count(), 0);
    }

    #[test]
    fn test_slot_reuse() {
        let mut heap = Heap::new();
        let a = heap.alloc(Object::Str("a".into()));
        heap.release(a);
        heap.drain_pending();

        let b = heap.alloc(Object::Str("b".into()));
        assert_eq!(a.index(), b.index());
        assert!(matches!(heap.get(b), Object::Str(s) if s == "b"));
    }

    #[test]
    fn test_values_equal_strings_by_content() {
        let mut heap = Heap::new();
        let a = heap.alloc(Object::Str("same".into()));
        let b = heap.alloc(Object::Str("same".into()));
        let c = heap.alloc(Object::Str("other".into()));

        assert!(heap.values_equal(Value::Str(a), Value::Str(b)));
        assert!(!heap.values_equal(Value::Str(a), Value::Str(c)));
    }

    #[test]
    fn test_values_equal_numeric_promotion() {
        let heap = Heap::new();
        assert!(heap.values_equal(Value::int(3), Value::float(3.0)));
        assert!(!heap.values_equal(Value::int(3), Value::float(3.5)));
        assert!(heap.values_equal(Value::null(), Value::null()));
        assert!(!heap.values_equal(Value::null(), Value::int(0)));
    }

    #[test]
    fn test_values_equal_objects_by_identity() {
        let mut heap = Heap::new();
        let a = heap.alloc(Object::Array(vec![]));
        let b = heap.alloc(Object::Array(vec![]));

        assert!(heap.values_equal(Value::Obj(a), Value::Obj(a)));
        assert!(!heap.values_equal(Value::Obj(a), Value::Obj(b)));
    }

    #[test]
    fn test_value_to_string_containers() {
        let mut heap = Heap::new();
        let s = heap.alloc(Object::Str("x".into()));
        let arr = heap.alloc(Object::Array(vec![
            Value::int(1),
            Value::Str(s),
            Value::null(),
        ]));

        assert_eq!(heap.value_to_string(Value::Obj(arr)), "[1, x, null]");

        let tup = heap.alloc(Object::Tuple {
            items: vec![Value::int(1), Value::int(2)],
            labels: vec![Some("x".into()), None],
        });
        assert_eq!(heap.value_to_string(Value::Obj(tup)), "(x: 1, 2)");
    }

    #[test]
    fn test_deep_copy_struct_instance() {
        let mut heap = Heap::new();
        let class = heap.alloc(Object::Class(ClassObject::new("P", TypeKind::Struct)));

        let mut fields = PropertyMap::new();
        fields.insert("x", Value::int(10));
        heap.retain(class);
        let original = heap.alloc(Object::Instance {
            class,
            fields,
        });

        let copy = heap.deep_copy_value(Value::Obj(original));
        let copy_ref = copy.as_object().unwrap();
        assert_ne!(copy_ref, original);

        // Mutating the copy leaves the original untouched.
        if let Object::Instance { fields, .. } = heap.get_mut(copy_ref) {
            fields.insert("x", Value::int(99));
        }
        match heap.get(original) {
            Object::Instance { fields, .. } => {
                assert_eq!(fields.get("x"), Some(Value::int(10)));
            }
            _ => panic!("expected instance"),
        }
    }

    #[test]
    fn test_deep_copy_shares_non_struct_values() {
        let mut heap = Heap::new();
        let class = heap.alloc(Object::Class(ClassObject::new("Box", TypeKind::Struct)));
        let shared = heap.alloc(Object::Array(vec![Value::int(1)]));

        let mut fields = PropertyMap::new();
        fields.insert("items", Value::Obj(shared));
        heap.retain(class);
        let original = heap.alloc(Object::Instance { class, fields });

        let before = heap.refcount(shared);
        let copy = heap.deep_copy_value(Value::Obj(original));
        assert_eq!(heap.refcount(shared), before + 1);

        match heap.get(copy.as_object().unwrap()) {
            Object::Instance { fields, .. } => {
                assert_eq!(fields.get("items"), Some(Value::Obj(shared)));
            }
            _ => panic!("expected instance"),
        }
    }

    #[test]
    fn test_native_release_notify_runs_once() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        let mut heap = Heap::new();
        let r = heap.alloc(Object::Native(crate::object::NativeData {
            handle: std::ptr::null_mut(),
            type_name: "Widget".into(),
            release: Some(Box::new(move |_| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
            })),
            engine_owned: false,
        }));

        heap.release(r);
        heap.drain_pending();
        heap.drain_pending();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
