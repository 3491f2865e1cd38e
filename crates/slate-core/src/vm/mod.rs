//! Virtual machine execution
//!
//! A [`Vm`] is strictly single-threaded: one execution thread per instance,
//! and no opcode suspends except under a debug pause. The dispatch loop is a
//! single `match` over the opcode byte; handler methods are grouped by
//! opcode family under [`opcodes`].
//!
//! After every completed instruction the VM drains the heap's cleanup queue
//! and invokes the debug controller's instruction hook, which may park the
//! thread until an adapter resumes it.

pub mod opcodes;

use crate::debug::DebugController;
use crate::heap::{Heap, ObjRef};
use crate::native::{NativeContext, NativeFunctionRegistry};
use crate::object::{NativeData, NativeFunctionObject, Object, Upvalue};
use crate::stack::{CallFrame, Stack};
use crate::value::Value;
use crate::{VmError, VmResult};
use rustc_hash::FxHashMap;
use slate_bytecode::{Chunk, Opcode, ProtocolDef};
use std::ffi::c_void;
use std::sync::Arc;

/// Execution state of a VM
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmState {
    /// Executing instructions
    Running,
    /// Parked by the debug controller; resumes at the same instruction
    Paused,
    /// An uncaught thrown value terminated execution
    Faulted,
    /// `HALT` or end of code reached
    Halted,
}

/// An installed `TRY` handler
#[derive(Debug, Clone)]
pub(crate) struct TryHandler {
    /// Call depth at installation; unwinding pops frames back to this depth
    pub frame_depth: usize,
    /// Operand-stack depth restored before the thrown value is pushed
    pub stack_depth: usize,
    /// Catch target
    pub catch_ip: usize,
    /// Chunk the catch target lives in
    pub chunk: Arc<Chunk>,
}

/// Outcome of dispatching one instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StepOutcome {
    /// Keep executing
    Continue,
    /// `HALT` was executed or the root body returned
    Halted,
}

/// Sink receiving `PRINT` output; defaults to standard output
pub type OutputFn = Box<dyn FnMut(&str)>;
/// Sink receiving uncaught-error reports; defaults to standard error
pub type ErrorFn = Box<dyn FnMut(&str)>;

/// The SlateScript virtual machine
pub struct Vm {
    pub(crate) stack: Stack,
    pub(crate) frames: Vec<CallFrame>,
    pub(crate) heap: Heap,
    pub(crate) globals: FxHashMap<String, Value>,
    pub(crate) protocols: FxHashMap<String, ProtocolDef>,
    /// Open upvalues ordered by stack slot, descending
    pub(crate) open_upvalues: Vec<ObjRef>,
    pub(crate) try_handlers: Vec<TryHandler>,
    pub(crate) natives: NativeFunctionRegistry,
    pub(crate) chunk: Arc<Chunk>,
    pub(crate) ip: usize,
    pub(crate) state: VmState,
    pub(crate) debug: Option<Arc<DebugController>>,
    pub(crate) output: Option<OutputFn>,
    pub(crate) error_sink: Option<ErrorFn>,
}

impl Vm {
    /// Create a VM with the default stack limit
    pub fn new() -> Self {
        Self::with_stack(Stack::new())
    }

    /// Create a VM with a specific operand-stack slot limit
    pub fn with_stack_limit(max_slots: usize) -> Self {
        Self::with_stack(Stack::with_capacity(max_slots))
    }

    fn with_stack(stack: Stack) -> Self {
        Self {
            stack,
            frames: Vec::new(),
            heap: Heap::new(),
            globals: FxHashMap::default(),
            protocols: FxHashMap::default(),
            open_upvalues: Vec::new(),
            try_handlers: Vec::new(),
            natives: NativeFunctionRegistry::new(),
            chunk: Arc::new(Chunk::new()),
            ip: 0,
            state: VmState::Halted,
            debug: None,
            output: None,
            error_sink: None,
        }
    }

    // ========================================================================
    // Configuration & introspection
    // ========================================================================

    /// Install a debug controller invoked at every instruction boundary
    pub fn set_debug_controller(&mut self, controller: Arc<DebugController>) {
        self.debug = Some(controller);
    }

    /// Remove the debug controller
    pub fn clear_debug_controller(&mut self) {
        self.debug = None;
    }

    /// Redirect `PRINT` output
    pub fn set_output(&mut self, output: OutputFn) {
        self.output = Some(output);
    }

    /// Redirect uncaught-error reports
    pub fn set_error_sink(&mut self, sink: ErrorFn) {
        self.error_sink = Some(sink);
    }

    /// Current execution state
    pub fn state(&self) -> VmState {
        if let Some(dbg) = &self.debug {
            if dbg.is_paused() && self.state == VmState::Running {
                return VmState::Paused;
            }
        }
        self.state
    }

    /// Current instruction pointer
    pub fn current_ip(&self) -> usize {
        self.ip
    }

    /// Chunk currently executing
    pub fn current_chunk(&self) -> &Arc<Chunk> {
        &self.chunk
    }

    /// Live call frames, outermost first
    pub fn call_frames(&self) -> &[CallFrame] {
        &self.frames
    }

    /// Operand stack
    pub fn stack(&self) -> &Stack {
        &self.stack
    }

    /// Object heap
    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    /// Mutable heap access for embedders marshalling values
    pub fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    pub(crate) fn write_output(&mut self, text: &str) {
        match &mut self.output {
            Some(f) => f(text),
            None => print!("{}", text),
        }
    }

    fn emit_error(&mut self, message: &str) {
        match &mut self.error_sink {
            Some(f) => f(message),
            None => eprintln!("{}", message),
        }
    }

    // ========================================================================
    // Embedding surface
    // ========================================================================

    /// Read a global by name
    pub fn get_global(&self, name: &str) -> Option<Value> {
        self.globals.get(name).copied()
    }

    /// Write a global by name
    pub fn set_global(&mut self, name: &str, value: Value) {
        self.heap.retain_value(value);
        if let Some(old) = self.globals.insert(name.to_string(), value) {
            self.heap.release_value(old);
        }
    }

    /// Allocate a string value owned by the caller's surrounding operation
    ///
    /// The value stays alive until the next cleanup-queue drain unless it is
    /// stored somewhere that retains it.
    pub fn make_string(&mut self, s: impl Into<String>) -> Value {
        let r = self.heap.alloc(Object::Str(s.into()));
        self.heap.release(r);
        Value::Str(r)
    }

    /// Register a host function and expose it as a global of the same name
    pub fn register_native(
        &mut self,
        name: &str,
        handler: impl Fn(&mut NativeContext<'_>, &[Value]) -> Result<Value, crate::native::NativeError>
            + Send
            + Sync
            + 'static,
    ) {
        self.natives.register(name, handler);
        let func = self
            .natives
            .get(name)
            .expect("handler registered one line above");
        let r = self.heap.alloc(Object::NativeFunction(NativeFunctionObject {
            name: name.to_string(),
            func,
        }));
        self.set_global(name, Value::Obj(r));
        self.heap.release(r);
    }

    /// Unregister a host function and remove its global
    pub fn unregister_native(&mut self, name: &str) -> bool {
        let known = self.natives.unregister(name);
        if let Some(old) = self.globals.remove(name) {
            self.heap.release_value(old);
            self.heap.drain_pending();
        }
        known
    }

    /// Wrap a host pointer as a script value
    ///
    /// `engine_owned` suppresses VM-initiated release of the host object;
    /// `release` is notified when the VM-side wrapper is destroyed anyway.
    pub fn wrap_native(
        &mut self,
        handle: *mut c_void,
        type_name: &str,
        engine_owned: bool,
        release: Option<Box<dyn FnOnce(*mut c_void)>>,
    ) -> Value {
        let r = self.heap.alloc(Object::Native(NativeData {
            handle,
            type_name: type_name.to_string(),
            release,
            engine_owned,
        }));
        // Ownership stays with the VM until the value is stored or dropped.
        Value::Obj(r)
    }

    /// Call a named global function with the given arguments
    pub fn call_function(&mut self, name: &str, args: &[Value]) -> VmResult<Value> {
        let callee = self
            .get_global(name)
            .ok_or_else(|| VmError::RuntimeError(format!("Undefined global '{}'", name)))?;
        let result = self.call_value_nested(callee, args)?;
        // Keep the result alive past the drain below.
        self.heap.retain_value(result);
        self.heap.drain_pending();
        Ok(result)
    }

    // ========================================================================
    // Execution
    // ========================================================================

    /// Execute a compiled chunk to completion
    ///
    /// Returns the value left on top of the stack (or null), with a strong
    /// reference held by the VM so the caller can inspect it.
    pub fn execute(&mut self, chunk: &Arc<Chunk>) -> VmResult<Value> {
        // Clear any residue from a previous (possibly faulted) run. Open
        // upvalues close first so surviving closures keep their values.
        self.close_upvalues_from(0);
        self.truncate_stack(0);
        self.frames.clear();
        self.try_handlers.clear();
        self.heap.drain_pending();

        self.chunk = Arc::clone(chunk);
        self.ip = 0;
        self.state = VmState::Running;

        let debug = self.debug.clone();
        if let Some(dbg) = &debug {
            dbg.on_entry(self);
        }

        loop {
            if self.ip >= self.chunk.code.len() {
                self.state = VmState::Halted;
                break;
            }
            match self.step() {
                Ok(StepOutcome::Continue) => {}
                Ok(StepOutcome::Halted) => {
                    self.state = VmState::Halted;
                    break;
                }
                Err(err) => {
                    if let Err(fatal) = self.unwind(err) {
                        self.state = VmState::Faulted;
                        self.heap.drain_pending();
                        self.emit_error(&fatal.to_string());
                        return Err(fatal);
                    }
                }
            }
            self.heap.drain_pending();

            if let Some(dbg) = &debug {
                dbg.on_instruction(self, self.ip);
                if dbg.disconnect_requested() {
                    self.state = VmState::Halted;
                    break;
                }
            }
        }

        // Transfer the result's stack reference to the VM-held return value.
        let result = if self.stack.depth() > 0 {
            self.stack.pop()?
        } else {
            Value::Null
        };
        self.truncate_stack(0);
        self.heap.drain_pending();
        Ok(result)
    }

    /// Fetch, decode, and execute one instruction
    pub(crate) fn step(&mut self) -> VmResult<StepOutcome> {
        let byte = self.chunk.code[self.ip];
        let op = Opcode::from_u8(byte).ok_or(VmError::InvalidOpcode(byte))?;
        self.ip += 1;
        self.dispatch(op)
    }

    fn dispatch(&mut self, op: Opcode) -> VmResult<StepOutcome> {
        match op {
            Opcode::Nop => {}
            Opcode::Const => self.op_const()?,
            Opcode::Str => self.op_string()?,
            Opcode::Nil => self.push(Value::Null)?,
            Opcode::True => self.push(Value::Bool(true))?,
            Opcode::False => self.push(Value::Bool(false))?,
            Opcode::Pop => {
                self.pop_value()?;
            }
            Opcode::Dup => self.op_dup()?,

            Opcode::Add => self.op_add()?,
            Opcode::Sub => self.op_sub()?,
            Opcode::Mul => self.op_mul()?,
            Opcode::Div => self.op_div()?,
            Opcode::Mod => self.op_mod()?,
            Opcode::Neg => self.op_neg()?,
            Opcode::BitNot => self.op_bit_not()?,
            Opcode::BitAnd => self.op_bitwise(op)?,
            Opcode::BitOr => self.op_bitwise(op)?,
            Opcode::BitXor => self.op_bitwise(op)?,
            Opcode::Shl => self.op_bitwise(op)?,
            Opcode::Shr => self.op_bitwise(op)?,

            Opcode::Eq => self.op_equality(false)?,
            Opcode::Ne => self.op_equality(true)?,
            Opcode::Lt => self.op_ordering(op)?,
            Opcode::Gt => self.op_ordering(op)?,
            Opcode::Le => self.op_ordering(op)?,
            Opcode::Ge => self.op_ordering(op)?,
            Opcode::Not => self.op_not()?,
            Opcode::And => self.op_logical(op)?,
            Opcode::Or => self.op_logical(op)?,

            Opcode::DefineGlobal => self.op_define_global()?,
            Opcode::GetGlobal => self.op_get_global()?,
            Opcode::SetGlobal => self.op_set_global()?,
            Opcode::GetLocal => self.op_get_local()?,
            Opcode::SetLocal => self.op_set_local()?,

            Opcode::Jump => self.op_jump()?,
            Opcode::JumpIfFalse => self.op_jump_if_false()?,
            Opcode::JumpIfNil => self.op_jump_if_nil()?,
            Opcode::Loop => self.op_loop()?,

            Opcode::Closure => self.op_closure()?,
            Opcode::GetUpvalue => self.op_get_upvalue()?,
            Opcode::SetUpvalue => self.op_set_upvalue()?,
            Opcode::CloseUpvalue => self.op_close_upvalue()?,
            Opcode::Call => self.op_call()?,
            Opcode::CallNamed => self.op_call_named()?,
            Opcode::Return => {
                if self.op_return()? {
                    return Ok(StepOutcome::Halted);
                }
            }

            Opcode::Class => self.op_class()?,
            Opcode::Method => self.op_method(false)?,
            Opcode::DefineProperty => self.op_define_property()?,
            Opcode::DefineComputedProperty => self.op_define_computed_property()?,
            Opcode::DefinePropertyWithObservers => self.op_define_property_with_observers()?,
            Opcode::Inherit => self.op_inherit()?,

            Opcode::GetProperty => self.op_get_property()?,
            Opcode::SetProperty => self.op_set_property()?,
            Opcode::Super => self.op_super()?,
            Opcode::OptionalChain => self.op_optional_chain()?,
            Opcode::Unwrap => self.op_unwrap()?,
            Opcode::NilCoalesce => self.op_nil_coalesce()?,

            Opcode::Array => self.op_array()?,
            Opcode::Dict => self.op_dict()?,
            Opcode::Tuple => self.op_tuple()?,
            Opcode::GetSubscript => self.op_get_subscript()?,
            Opcode::SetSubscript => self.op_set_subscript()?,
            Opcode::GetTupleIndex => self.op_get_tuple_index()?,
            Opcode::GetTupleLabel => self.op_get_tuple_label()?,

            Opcode::Struct => self.op_struct()?,
            Opcode::StructMethod => self.op_struct_method()?,
            Opcode::CopyValue => self.op_copy_value()?,

            Opcode::Enum => self.op_enum()?,
            Opcode::EnumCase => self.op_enum_case()?,
            Opcode::MatchEnumCase => self.op_match_enum_case()?,
            Opcode::GetAssociated => self.op_get_associated()?,

            Opcode::Protocol => self.op_protocol()?,

            Opcode::TypeCheck => self.op_type_check()?,
            Opcode::TypeCast => self.op_type_cast(CastMode::Unconditional)?,
            Opcode::TypeCastOptional => self.op_type_cast(CastMode::Optional)?,
            Opcode::TypeCastForced => self.op_type_cast(CastMode::Forced)?,

            Opcode::Try => self.op_try()?,
            Opcode::EndTry => self.op_end_try()?,
            Opcode::Throw => self.op_throw()?,

            Opcode::ReadLine => self.op_read_line()?,
            Opcode::Print => self.op_print()?,

            Opcode::Halt => return Ok(StepOutcome::Halted),
        }
        Ok(StepOutcome::Continue)
    }

    // ========================================================================
    // Operand reading
    // ========================================================================

    pub(crate) fn read_u8(&mut self) -> VmResult<u8> {
        let byte = *self
            .chunk
            .code
            .get(self.ip)
            .ok_or(VmError::TruncatedInstruction(self.ip))?;
        self.ip += 1;
        Ok(byte)
    }

    pub(crate) fn read_u16(&mut self) -> VmResult<u16> {
        let lo = self.read_u8()?;
        let hi = self.read_u8()?;
        Ok(u16::from_le_bytes([lo, hi]))
    }

    /// Read a u16 string-pool index operand and resolve it
    pub(crate) fn read_pool_string(&mut self) -> VmResult<String> {
        let idx = self.read_u16()? as usize;
        self.chunk
            .string_at(idx)
            .map(str::to_string)
            .ok_or_else(|| VmError::RuntimeError(format!("String index {} out of range", idx)))
    }

    // ========================================================================
    // Stack discipline (refcount-aware wrappers)
    // ========================================================================

    /// Push a value the stack does not yet own: retains
    pub(crate) fn push(&mut self, v: Value) -> VmResult<()> {
        self.heap.retain_value(v);
        if let Err(e) = self.stack.push(v) {
            self.heap.release_value(v);
            return Err(e);
        }
        Ok(())
    }

    /// Push a freshly allocated value, transferring its creation reference
    pub(crate) fn push_new(&mut self, v: Value) -> VmResult<()> {
        if let Err(e) = self.stack.push(v) {
            self.heap.release_value(v);
            return Err(e);
        }
        Ok(())
    }

    /// Pop a value; its stack reference is released (deferred), so it stays
    /// usable until the current instruction completes
    pub(crate) fn pop_value(&mut self) -> VmResult<Value> {
        let v = self.stack.pop()?;
        self.heap.release_value(v);
        Ok(v)
    }

    pub(crate) fn peek(&self, n: usize) -> VmResult<Value> {
        self.stack.peek_n(n)
    }

    /// Overwrite a slot: retains the new value, releases the old
    pub(crate) fn set_slot(&mut self, pos: usize, v: Value) -> VmResult<()> {
        let old = self.stack.get_at(pos)?;
        self.heap.retain_value(v);
        self.stack.set_at(pos, v)?;
        self.heap.release_value(old);
        Ok(())
    }

    /// Overwrite a slot with a value whose reference is transferred in
    pub(crate) fn set_slot_transfer(&mut self, pos: usize, v: Value) -> VmResult<()> {
        let old = self.stack.get_at(pos)?;
        self.stack.set_at(pos, v)?;
        self.heap.release_value(old);
        Ok(())
    }

    /// Pop slots above `to`, releasing each
    pub(crate) fn truncate_stack(&mut self, to: usize) {
        while self.stack.depth() > to {
            if let Ok(v) = self.stack.pop() {
                self.heap.release_value(v);
            }
        }
    }

    /// Base slot of the current frame
    pub(crate) fn frame_base(&self) -> usize {
        self.frames.last().map(|f| f.stack_base).unwrap_or(0)
    }

    /// Closure of the current frame
    pub(crate) fn current_closure(&self) -> Option<ObjRef> {
        self.frames.last().and_then(|f| f.closure)
    }

    // ========================================================================
    // Upvalues
    // ========================================================================

    /// Find or create the open upvalue for a stack slot
    ///
    /// The returned handle carries one new strong reference for the caller
    /// (the capturing closure); the open list holds its own.
    pub(crate) fn capture_upvalue(&mut self, slot: usize) -> ObjRef {
        for &r in &self.open_upvalues {
            if let Object::Upvalue(Upvalue::Open(s)) = self.heap.get(r) {
                if *s == slot {
                    self.heap.retain(r);
                    return r;
                }
            }
        }

        let r = self.heap.alloc(Object::Upvalue(Upvalue::Open(slot)));
        self.heap.retain(r); // open-list reference

        // Keep the list ordered by slot, descending, so close-on-return can
        // stop at the first slot below the frame base.
        let insert_at = self
            .open_upvalues
            .iter()
            .position(|&other| match self.heap.get(other) {
                Object::Upvalue(Upvalue::Open(s)) => *s < slot,
                _ => false,
            })
            .unwrap_or(self.open_upvalues.len());
        self.open_upvalues.insert(insert_at, r);
        r
    }

    /// Close every open upvalue whose slot is at or above `base`: copy the
    /// slot's value inward and drop the upvalue from the open list.
    pub(crate) fn close_upvalues_from(&mut self, base: usize) {
        while let Some(&r) = self.open_upvalues.first() {
            let slot = match self.heap.get(r) {
                Object::Upvalue(Upvalue::Open(s)) => *s,
                _ => {
                    self.open_upvalues.remove(0);
                    self.heap.release(r);
                    continue;
                }
            };
            if slot < base {
                break;
            }
            let v = self.stack.get_at(slot).unwrap_or(Value::Null);
            self.heap.retain_value(v);
            *self.heap.get_mut(r) = Object::Upvalue(Upvalue::Closed(v));
            self.open_upvalues.remove(0);
            self.heap.release(r);
        }
    }

    // ========================================================================
    // Throw & unwind
    // ========================================================================

    /// Unwind `err` to the innermost catch handler, or surface it
    pub(crate) fn unwind(&mut self, err: VmError) -> Result<(), VmError> {
        self.unwind_within(err, 0)
    }

    /// Unwind only if the innermost handler sits at or above
    /// `min_frame_depth`; used by nested calls so a throw that crosses the
    /// nesting boundary propagates as an error instead.
    pub(crate) fn unwind_within(
        &mut self,
        err: VmError,
        min_frame_depth: usize,
    ) -> Result<(), VmError> {
        let handler_available = self
            .try_handlers
            .last()
            .map(|h| h.frame_depth >= min_frame_depth)
            .unwrap_or(false);

        let v = match err {
            VmError::Thrown(v) => {
                if !handler_available {
                    return Err(VmError::Uncaught(self.heap.value_to_string(v)));
                }
                v
            }
            other => {
                if !handler_available {
                    return Err(other);
                }
                let message = match &other {
                    VmError::TypeError(m) | VmError::RuntimeError(m) => m.clone(),
                    e => e.to_string(),
                };
                let r = self.heap.alloc(Object::Str(message));
                self.heap.release(r);
                Value::Str(r)
            }
        };

        self.transfer_to_handler(v)
    }

    fn transfer_to_handler(&mut self, v: Value) -> Result<(), VmError> {
        // Protect the thrown value across frame teardown.
        self.heap.retain_value(v);

        let handler = self
            .try_handlers
            .pop()
            .expect("caller verified a handler exists");

        while self.frames.len() > handler.frame_depth {
            let frame = self
                .frames
                .pop()
                .expect("loop condition guarantees a frame");
            self.close_upvalues_from(frame.stack_base);
        }

        self.truncate_stack(handler.stack_depth);
        self.chunk = handler.chunk;
        self.ip = handler.catch_ip;

        if let Err(e) = self.stack.push(v) {
            self.heap.release_value(v);
            return Err(e);
        }
        Ok(())
    }

    // ========================================================================
    // Nested synchronous calls (observers, operator overloads, embedding)
    // ========================================================================

    /// Call a callable value and run it to completion before returning
    ///
    /// The result is owned by the surrounding operation: it stays alive
    /// until the next cleanup-queue drain unless retained.
    pub(crate) fn call_value_nested(
        &mut self,
        callee: Value,
        args: &[Value],
    ) -> VmResult<Value> {
        let base_frames = self.frames.len();

        self.push(callee)?;
        for &a in args {
            self.push(a)?;
        }
        let callee_index = self.stack.depth() - args.len() - 1;

        let pushed_frame = self.call_value(callee_index, args.len(), None)?;
        if !pushed_frame {
            return self.pop_value();
        }

        while self.frames.len() > base_frames {
            if self.ip >= self.chunk.code.len() {
                return Err(VmError::RuntimeError(
                    "function body ran past the end of its chunk".to_string(),
                ));
            }
            match self.step() {
                Ok(StepOutcome::Continue) => {
                    self.heap.drain_pending();
                }
                Ok(StepOutcome::Halted) => {
                    return Err(VmError::RuntimeError(
                        "HALT executed inside a nested call".to_string(),
                    ));
                }
                Err(err) => self.unwind_within(err, base_frames + 1)?,
            }
        }

        self.pop_value()
    }

    /// Dispatch `+`, `<`, `==`, … to a user-defined method on the left
    /// operand's type descriptor
    pub(crate) fn call_operator_overload(
        &mut self,
        a: Value,
        b: Value,
        symbol: &str,
    ) -> VmResult<Option<Value>> {
        let Some(r) = a.as_object() else {
            return Ok(None);
        };
        let method = match self.heap.get(r) {
            Object::Instance { class, .. } => match self.heap.get(*class) {
                Object::Class(c) => c.find_method(symbol).map(|m| m.closure),
                _ => None,
            },
            Object::EnumCase(case) => match self.heap.get(case.enum_type) {
                Object::EnumType(e) => {
                    e.methods.iter().find(|m| m.name == symbol).map(|m| m.closure)
                }
                _ => None,
            },
            _ => None,
        };
        let Some(method) = method else {
            return Ok(None);
        };
        let result = self.call_value_nested(Value::Obj(method), &[a, b])?;
        Ok(Some(result))
    }
}

/// Cast behavior selector shared by the three cast opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CastMode {
    /// `as` — error on mismatch
    Unconditional,
    /// `as?` — null on mismatch
    Optional,
    /// `as!` — error on mismatch
    Forced,
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}
