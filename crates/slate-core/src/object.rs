//! Heap object model
//!
//! Every heap allocation is one [`Object`] variant. The VM only ever refers
//! to them through [`crate::heap::ObjRef`] handles; ownership edges between
//! objects (a closure's upvalues, an instance's fields, a class's methods)
//! each hold one strong reference, released by the heap when the owner is
//! destroyed.

use crate::heap::ObjRef;
use crate::native::NativeFn;
use crate::value::Value;
use slate_bytecode::Chunk;
use std::ffi::c_void;
use std::fmt;
use std::sync::Arc;

/// String-keyed map preserving insertion order
///
/// Used for map objects and instance fields; lookups scan, which is fine at
/// script field counts, and iteration order stays deterministic.
#[derive(Debug, Clone, Default)]
pub struct PropertyMap {
    entries: Vec<(String, Value)>,
}

impl PropertyMap {
    /// Create an empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up a value by key
    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| *v)
    }

    /// Insert or overwrite; returns the previous value when overwriting
    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        let key = key.into();
        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            let old = entry.1;
            entry.1 = value;
            Some(old)
        } else {
            self.entries.push((key, value));
            None
        }
    }

    /// Iterate entries in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Values in insertion order
    pub fn values(&self) -> impl Iterator<Item = Value> + '_ {
        self.entries.iter().map(|(_, v)| *v)
    }
}

/// Compiled function with its calling metadata
pub struct FunctionObject {
    /// Name for diagnostics
    pub name: String,
    /// Parameter names
    pub params: Vec<String>,
    /// Argument labels, parallel to `params`; empty = positional only
    pub param_labels: Vec<String>,
    /// Default values, parallel to `params`
    pub defaults: Vec<Value>,
    /// Default-presence flags, parallel to `params`
    pub has_default: Vec<bool>,
    /// Function body
    pub chunk: Arc<Chunk>,
    /// Whether this function is an initializer
    pub is_initializer: bool,
    /// Whether this method was declared `override`
    pub is_override: bool,
}

impl fmt::Debug for FunctionObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionObject")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("is_initializer", &self.is_initializer)
            .finish()
    }
}

/// Closure: a function plus its captured upvalues
#[derive(Debug)]
pub struct ClosureObject {
    /// Handle to the [`FunctionObject`]
    pub function: ObjRef,
    /// One upvalue handle per declared capture
    pub upvalues: Vec<ObjRef>,
}

/// Runtime state of an upvalue
#[derive(Debug, Clone, Copy)]
pub enum Upvalue {
    /// Refers to a live stack slot (absolute index)
    Open(usize),
    /// Owns the captured value after the slot left scope
    Closed(Value),
}

/// Whether a type object has reference or value semantics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    /// Reference semantics
    Class,
    /// Copy-on-assign value semantics
    Struct,
}

/// A method attached to a class, struct, or enum type
#[derive(Debug, Clone)]
pub struct MethodEntry {
    /// Method name
    pub name: String,
    /// Closure handle
    pub closure: ObjRef,
    /// Struct methods only: whether the method may reassign `self`
    pub is_mutating: bool,
}

/// Stored-property descriptor on a type object
#[derive(Debug, Clone)]
pub struct PropertyDesc {
    /// Property name
    pub name: String,
    /// Default value assigned at instantiation
    pub default: Value,
    /// Observer invoked with `(self, newValue)` before a write
    pub will_set: Option<ObjRef>,
    /// Observer invoked with `(self, oldValue)` after a write
    pub did_set: Option<ObjRef>,
}

/// Computed-property descriptor on a type object
#[derive(Debug, Clone)]
pub struct ComputedDesc {
    /// Property name
    pub name: String,
    /// Getter closure, called with `(self)`
    pub getter: ObjRef,
    /// Setter closure, called with `(self, newValue)`
    pub setter: Option<ObjRef>,
}

/// Class or struct type object
#[derive(Debug)]
pub struct ClassObject {
    /// Type name
    pub name: String,
    /// Reference or value semantics
    pub kind: TypeKind,
    /// Superclass handle (classes only)
    pub superclass: Option<ObjRef>,
    /// Methods; after `INHERIT`, includes copied-down superclass methods
    pub methods: Vec<MethodEntry>,
    /// Stored properties in declaration order
    pub properties: Vec<PropertyDesc>,
    /// Computed properties
    pub computed: Vec<ComputedDesc>,
    /// Names of conformed protocols
    pub protocols: Vec<String>,
}

impl ClassObject {
    /// Create an empty type object
    pub fn new(name: impl Into<String>, kind: TypeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            superclass: None,
            methods: Vec::new(),
            properties: Vec::new(),
            computed: Vec::new(),
            protocols: Vec::new(),
        }
    }

    /// Find a method by name
    pub fn find_method(&self, name: &str) -> Option<&MethodEntry> {
        self.methods.iter().find(|m| m.name == name)
    }

    /// Find a stored-property descriptor by name
    pub fn find_property(&self, name: &str) -> Option<&PropertyDesc> {
        self.properties.iter().find(|p| p.name == name)
    }

    /// Find a computed-property descriptor by name
    pub fn find_computed(&self, name: &str) -> Option<&ComputedDesc> {
        self.computed.iter().find(|c| c.name == name)
    }
}

/// One case declared on an enum type
#[derive(Debug, Clone)]
pub struct EnumCaseDef {
    /// Case name
    pub name: String,
    /// Optional raw value
    pub raw: Option<Value>,
    /// Labels of the associated values, in order
    pub assoc_labels: Vec<String>,
}

/// Enum type object
#[derive(Debug)]
pub struct EnumTypeObject {
    /// Enum name
    pub name: String,
    /// Declared cases in order
    pub cases: Vec<EnumCaseDef>,
    /// Methods
    pub methods: Vec<MethodEntry>,
    /// Computed properties
    pub computed: Vec<ComputedDesc>,
}

/// A constructed enum case value
#[derive(Debug)]
pub struct EnumCaseObject {
    /// Enum type handle
    pub enum_type: ObjRef,
    /// Index into the type's case table
    pub case_index: usize,
    /// Raw value copied from the case definition
    pub raw: Option<Value>,
    /// Associated values in label order
    pub associated: Vec<Value>,
}

/// Host data wrapped for script use
pub struct NativeData {
    /// Opaque host pointer
    pub handle: *mut c_void,
    /// Host-assigned type name
    pub type_name: String,
    /// Invoked when the VM-side wrapper is destroyed
    pub release: Option<Box<dyn FnOnce(*mut c_void)>>,
    /// Suppresses VM-initiated release of the host object
    pub engine_owned: bool,
}

impl fmt::Debug for NativeData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeData")
            .field("handle", &self.handle)
            .field("type_name", &self.type_name)
            .field("engine_owned", &self.engine_owned)
            .finish()
    }
}

/// Registered host callback exposed as a callable value
pub struct NativeFunctionObject {
    /// Registry name
    pub name: String,
    /// The callback
    pub func: NativeFn,
}

impl fmt::Debug for NativeFunctionObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeFunctionObject")
            .field("name", &self.name)
            .finish()
    }
}

/// Polymorphic heap object
#[derive(Debug)]
pub enum Object {
    /// Immutable string
    Str(String),
    /// Ordered sequence of values
    Array(Vec<Value>),
    /// String-keyed map, insertion order preserved
    Map(PropertyMap),
    /// Ordered values with optional labels
    Tuple {
        /// Elements in order
        items: Vec<Value>,
        /// Parallel labels; `None` = unlabeled
        labels: Vec<Option<String>>,
    },
    /// Compiled function
    Function(FunctionObject),
    /// Function plus captured upvalues
    Closure(ClosureObject),
    /// Mediates closure access to an enclosing variable
    Upvalue(Upvalue),
    /// Class or struct type
    Class(ClassObject),
    /// Instance of a class or struct
    Instance {
        /// Type handle
        class: ObjRef,
        /// Stored fields
        fields: PropertyMap,
    },
    /// Enum type
    EnumType(EnumTypeObject),
    /// Constructed enum case
    EnumCase(EnumCaseObject),
    /// Callable producing an enum case with associated values
    EnumConstructor {
        /// Enum type handle
        enum_type: ObjRef,
        /// Index into the type's case table
        case_index: usize,
    },
    /// Method bound to a receiver
    BoundMethod {
        /// The receiver spliced in as `self` at call time
        receiver: Value,
        /// Closure handle of the method
        method: ObjRef,
    },
    /// Protocol descriptor
    Protocol(slate_bytecode::ProtocolDef),
    /// Host callback
    NativeFunction(NativeFunctionObject),
    /// Wrapped host data
    Native(NativeData),
}

impl Object {
    /// Variant name for diagnostics and `is` checks
    pub fn type_name(&self) -> &str {
        match self {
            Object::Str(_) => "String",
            Object::Array(_) => "Array",
            Object::Map(_) => "Map",
            Object::Tuple { .. } => "Tuple",
            Object::Function(_) => "Function",
            Object::Closure(_) => "Function",
            Object::Upvalue(_) => "Upvalue",
            Object::Class(c) => &c.name,
            Object::Instance { .. } => "Instance",
            Object::EnumType(e) => &e.name,
            Object::EnumCase(_) => "EnumCase",
            Object::EnumConstructor { .. } => "EnumConstructor",
            Object::BoundMethod { .. } => "Function",
            Object::Protocol(p) => &p.name,
            Object::NativeFunction(_) => "NativeFunction",
            Object::Native(n) => &n.type_name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_property_map_insertion_order() {
        let mut map = PropertyMap::new();
        map.insert("b", Value::int(2));
        map.insert("a", Value::int(1));
        map.insert("c", Value::int(3));

        let keys: Vec<&str> = map.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_property_map_overwrite() {
        let mut map = PropertyMap::new();
        assert_eq!(map.insert("x", Value::int(1)), None);
        assert_eq!(map.insert("x", Value::int(2)), Some(Value::int(1)));
        assert_eq!(map.get("x"), Some(Value::int(2)));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_class_lookups() {
        let mut class = ClassObject::new("Point", TypeKind::Struct);
        class.properties.push(PropertyDesc {
            name: "x".into(),
            default: Value::int(0),
            will_set: None,
            did_set: None,
        });

        assert!(class.find_property("x").is_some());
        assert!(class.find_property("y").is_none());
        assert!(class.find_method("area").is_none());
        assert_eq!(class.kind, TypeKind::Struct);
    }
}
