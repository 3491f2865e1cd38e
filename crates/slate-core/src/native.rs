//! Native function bridge
//!
//! Maps names to host callbacks that scripts can invoke as ordinary calls.
//! The registry is per-VM state: two VMs in one process never observe each
//! other's registrations.

use crate::heap::Heap;
use crate::object::Object;
use crate::value::Value;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use thiserror::Error;

/// Error raised by a host callback; the VM rethrows it as a thrown value
#[derive(Debug, Error)]
#[error("{0}")]
pub struct NativeError(pub String);

impl NativeError {
    /// Create an error from any message
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// VM facilities available to a host callback during a call
pub struct NativeContext<'a> {
    heap: &'a mut Heap,
}

impl<'a> NativeContext<'a> {
    /// Wrap heap access for one native call
    pub(crate) fn new(heap: &'a mut Heap) -> Self {
        Self { heap }
    }

    /// Heap access for reading argument contents
    pub fn heap(&self) -> &Heap {
        self.heap
    }

    /// Allocate a string value. The returned handle is owned by the VM and
    /// stays alive through the end of the current instruction.
    pub fn make_string(&mut self, s: impl Into<String>) -> Value {
        let r = self.heap.alloc(Object::Str(s.into()));
        self.heap.release(r);
        Value::Str(r)
    }

    /// Read a string argument's contents
    pub fn get_string(&self, v: Value) -> Option<&str> {
        match v {
            Value::Str(r) => match self.heap.get(r) {
                Object::Str(s) => Some(s.as_str()),
                _ => None,
            },
            _ => None,
        }
    }
}

/// A native function handler
pub type NativeFn =
    Arc<dyn Fn(&mut NativeContext<'_>, &[Value]) -> Result<Value, NativeError> + Send + Sync>;

/// Registry of native functions indexed by symbolic name
pub struct NativeFunctionRegistry {
    handlers: FxHashMap<String, NativeFn>,
}

impl NativeFunctionRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            handlers: FxHashMap::default(),
        }
    }

    /// Register a native function by name, replacing any previous handler
    pub fn register(
        &mut self,
        name: &str,
        handler: impl Fn(&mut NativeContext<'_>, &[Value]) -> Result<Value, NativeError>
            + Send
            + Sync
            + 'static,
    ) {
        self.handlers.insert(name.to_string(), Arc::new(handler));
    }

    /// Remove a handler by name; returns whether one was registered
    pub fn unregister(&mut self, name: &str) -> bool {
        self.handlers.remove(name).is_some()
    }

    /// Get a handler by name
    pub fn get(&self, name: &str) -> Option<NativeFn> {
        self.handlers.get(name).cloned()
    }

    /// Check if a handler is registered
    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Number of registered handlers
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Check if the registry is empty
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl Default for NativeFunctionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_lookup() {
        let mut registry = NativeFunctionRegistry::new();
        assert!(registry.is_empty());

        registry.register("math.abs", |_ctx, args| {
            let n = args[0].as_int().ok_or_else(|| NativeError::new("expected Int"))?;
            Ok(Value::int(n.abs()))
        });

        assert!(registry.contains("math.abs"));
        assert_eq!(registry.len(), 1);
        assert!(registry.get("math.abs").is_some());
        assert!(registry.get("math.min").is_none());
    }

    #[test]
    fn test_unregister() {
        let mut registry = NativeFunctionRegistry::new();
        registry.register("f", |_ctx, _args| Ok(Value::null()));

        assert!(registry.unregister("f"));
        assert!(!registry.unregister("f"));
        assert!(!registry.contains("f"));
    }

    #[test]
    fn test_handler_invocation() {
        let mut registry = NativeFunctionRegistry::new();
        registry.register("double", |_ctx, args| {
            let n = args[0].as_int().ok_or_else(|| NativeError::new("expected Int"))?;
            Ok(Value::int(n * 2))
        });

        let handler = registry.get("double").unwrap();
        let mut heap = Heap::new();
        let mut ctx = NativeContext::new(&mut heap);
        let result = handler(&mut ctx, &[Value::int(21)]).unwrap();
        assert_eq!(result, Value::int(42));

        let err = handler(&mut ctx, &[Value::null()]).unwrap_err();
        assert_eq!(err.to_string(), "expected Int");
    }
}
