//! C FFI bindings for the SlateScript VM
//!
//! A C-compatible embedding surface over [`slate_runtime::Session`]:
//! - ABI-stable types only; opaque pointers for VM objects
//! - Error handling via result codes and a per-context last-error string
//! - Manual memory management: everything created through this API has a
//!   matching destroy/free function
//!
//! Host callbacks registered here run on the VM's execution thread.

#![allow(clippy::missing_safety_doc)]

use slate_core::debug::DebugController;
use slate_core::{NativeError, Value};
use slate_runtime::{RuntimeError, Session};
use std::ffi::{c_char, c_void, CStr, CString};
use std::ptr;
use std::sync::Arc;

/// Result codes returned by every fallible entry point
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlateResult {
    /// Success
    Ok = 0,
    /// A null or malformed argument was passed
    InvalidArg = 1,
    /// Compilation failed (front-end embeddings)
    Compile = 2,
    /// Type checking failed (front-end embeddings)
    TypeCheck = 3,
    /// Script execution raised an uncaught error
    Runtime = 4,
    /// A named global or function does not exist
    NotFound = 5,
    /// Reading or decoding a program file failed
    Io = 6,
    /// Allocation failed
    OutOfMemory = 7,
}

/// Value kind discriminator for [`SlateValue`]
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlateValueKind {
    /// Null
    Null = 0,
    /// Boolean (`bool_val`)
    Bool = 1,
    /// 64-bit integer (`int_val`)
    Int = 2,
    /// 64-bit float (`float_val`)
    Float = 3,
    /// UTF-8 string (`string_val`)
    String = 4,
}

/// A marshalled value crossing the C boundary
///
/// String pointers returned by the API stay valid until the next call on
/// the same context.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct SlateValue {
    /// Which payload field is meaningful
    pub kind: SlateValueKind,
    /// Boolean payload (0 or 1)
    pub bool_val: i32,
    /// Integer payload
    pub int_val: i64,
    /// Float payload
    pub float_val: f64,
    /// String payload
    pub string_val: *const c_char,
}

impl SlateValue {
    fn null() -> Self {
        Self {
            kind: SlateValueKind::Null,
            bool_val: 0,
            int_val: 0,
            float_val: 0.0,
            string_val: ptr::null(),
        }
    }
}

/// Print callback: receives UTF-8 text and the registered user data
pub type SlatePrintFn = extern "C" fn(text: *const c_char, user_data: *mut c_void);
/// Error callback: receives the error message and the registered user data
pub type SlateErrorFn = extern "C" fn(message: *const c_char, user_data: *mut c_void);
/// Host function: reads `argc` values from `args`, writes the result into
/// `out`, returns 0 on success or non-zero to throw
pub type SlateNativeFn = extern "C" fn(
    args: *const SlateValue,
    argc: usize,
    user_data: *mut c_void,
    out: *mut SlateValue,
) -> i32;
/// Release notification for wrapped native pointers
pub type SlateReleaseFn = extern "C" fn(handle: *mut c_void, user_data: *mut c_void);
/// Debug event callback: stop reason and source line
pub type SlateDebugFn =
    extern "C" fn(reason: *const c_char, line: u32, user_data: *mut c_void);

/// Opaque handle to an embedding context
#[repr(C)]
pub struct SlateContext {
    _private: [u8; 0],
}

/// Opaque handle to a loaded script
#[repr(C)]
pub struct SlateScript {
    _private: [u8; 0],
}

struct ContextHandle {
    session: Session,
    debugger: Option<Arc<DebugController>>,
    last_error: CString,
    /// Keeps the most recently returned string payload alive
    string_hold: Option<CString>,
}

struct ScriptHandle {
    chunk: Arc<slate_bytecode::Chunk>,
}

/// Shares a raw user-data pointer with callbacks that run on the VM thread.
struct UserData(*mut c_void);
unsafe impl Send for UserData {}
unsafe impl Sync for UserData {}

unsafe fn context(ctx: *mut SlateContext) -> Option<&'static mut ContextHandle> {
    (ctx as *mut ContextHandle).as_mut()
}

unsafe fn c_str<'a>(s: *const c_char) -> Option<&'a str> {
    if s.is_null() {
        return None;
    }
    CStr::from_ptr(s).to_str().ok()
}

fn set_last_error(handle: &mut ContextHandle, message: &str) {
    handle.last_error =
        CString::new(message).unwrap_or_else(|_| CString::new("invalid error text").unwrap());
}

fn runtime_error_code(err: &RuntimeError) -> SlateResult {
    match err {
        RuntimeError::Io(_) => SlateResult::Io,
        RuntimeError::Bytecode(_) => SlateResult::Io,
        RuntimeError::Vm(_) => SlateResult::Runtime,
    }
}

fn marshal_in(handle: &mut ContextHandle, v: &SlateValue) -> Value {
    match v.kind {
        SlateValueKind::Null => Value::Null,
        SlateValueKind::Bool => Value::Bool(v.bool_val != 0),
        SlateValueKind::Int => Value::Int(v.int_val),
        SlateValueKind::Float => Value::Float(v.float_val),
        SlateValueKind::String => {
            let text = unsafe { c_str(v.string_val) }.unwrap_or("");
            handle.session.vm_mut().make_string(text)
        }
    }
}

fn marshal_out(handle: &mut ContextHandle, v: Value) -> SlateValue {
    let mut out = SlateValue::null();
    match v {
        Value::Null => {}
        Value::Bool(b) => {
            out.kind = SlateValueKind::Bool;
            out.bool_val = b as i32;
        }
        Value::Int(i) => {
            out.kind = SlateValueKind::Int;
            out.int_val = i;
        }
        Value::Float(f) => {
            out.kind = SlateValueKind::Float;
            out.float_val = f;
        }
        Value::Str(_) | Value::Obj(_) => {
            let text = handle.session.vm().heap().value_to_string(v);
            let c = CString::new(text).unwrap_or_default();
            out.kind = SlateValueKind::String;
            out.string_val = c.as_ptr();
            handle.string_hold = Some(c);
        }
    }
    out
}

// ============================================================================
// Context lifecycle
// ============================================================================

/// Create an embedding context. Destroy with [`slate_context_destroy`].
#[no_mangle]
pub unsafe extern "C" fn slate_context_new() -> *mut SlateContext {
    let handle = Box::new(ContextHandle {
        session: Session::new(),
        debugger: None,
        last_error: CString::default(),
        string_hold: None,
    });
    Box::into_raw(handle) as *mut SlateContext
}

/// Destroy a context and everything it owns
#[no_mangle]
pub unsafe extern "C" fn slate_context_destroy(ctx: *mut SlateContext) {
    if ctx.is_null() {
        return;
    }
    drop(Box::from_raw(ctx as *mut ContextHandle));
}

/// Last error message recorded on this context; valid until the next call
#[no_mangle]
pub unsafe extern "C" fn slate_last_error(ctx: *mut SlateContext) -> *const c_char {
    match context(ctx) {
        Some(handle) => handle.last_error.as_ptr(),
        None => ptr::null(),
    }
}

// ============================================================================
// Script loading & execution
// ============================================================================

/// Load a compiled `.ssasm` file. Returns null on failure (see
/// [`slate_last_error`]). Free with [`slate_script_free`].
#[no_mangle]
pub unsafe extern "C" fn slate_script_load_file(
    ctx: *mut SlateContext,
    path: *const c_char,
) -> *mut SlateScript {
    let Some(handle) = context(ctx) else {
        return ptr::null_mut();
    };
    let Some(path) = c_str(path) else {
        set_last_error(handle, "null or non-UTF-8 path");
        return ptr::null_mut();
    };
    match slate_runtime::load_program(path) {
        Ok(chunk) => Box::into_raw(Box::new(ScriptHandle { chunk })) as *mut SlateScript,
        Err(err) => {
            set_last_error(handle, &err.to_string());
            ptr::null_mut()
        }
    }
}

/// Load a compiled program from memory
#[no_mangle]
pub unsafe extern "C" fn slate_script_load_bytes(
    ctx: *mut SlateContext,
    bytes: *const u8,
    len: usize,
) -> *mut SlateScript {
    let Some(handle) = context(ctx) else {
        return ptr::null_mut();
    };
    if bytes.is_null() {
        set_last_error(handle, "null bytecode buffer");
        return ptr::null_mut();
    }
    let slice = std::slice::from_raw_parts(bytes, len);
    match slate_runtime::load_program_bytes(slice) {
        Ok(chunk) => Box::into_raw(Box::new(ScriptHandle { chunk })) as *mut SlateScript,
        Err(err) => {
            set_last_error(handle, &err.to_string());
            ptr::null_mut()
        }
    }
}

/// Free a loaded script
#[no_mangle]
pub unsafe extern "C" fn slate_script_free(script: *mut SlateScript) {
    if script.is_null() {
        return;
    }
    drop(Box::from_raw(script as *mut ScriptHandle));
}

/// Execute a script; on success writes the result value into `result`
#[no_mangle]
pub unsafe extern "C" fn slate_execute(
    ctx: *mut SlateContext,
    script: *mut SlateScript,
    result: *mut SlateValue,
) -> SlateResult {
    let Some(handle) = context(ctx) else {
        return SlateResult::InvalidArg;
    };
    let Some(script) = (script as *mut ScriptHandle).as_ref() else {
        set_last_error(handle, "null script");
        return SlateResult::InvalidArg;
    };

    handle.session.load_chunk(script.chunk.clone());
    match handle.session.run() {
        Ok(value) => {
            if !result.is_null() {
                *result = marshal_out(handle, value);
            }
            SlateResult::Ok
        }
        Err(err) => {
            let code = runtime_error_code(&err);
            set_last_error(handle, &err.to_string());
            code
        }
    }
}

/// Call a named global function with marshalled arguments
#[no_mangle]
pub unsafe extern "C" fn slate_call_function(
    ctx: *mut SlateContext,
    name: *const c_char,
    args: *const SlateValue,
    argc: usize,
    result: *mut SlateValue,
) -> SlateResult {
    let Some(handle) = context(ctx) else {
        return SlateResult::InvalidArg;
    };
    let Some(name) = c_str(name) else {
        set_last_error(handle, "null or non-UTF-8 function name");
        return SlateResult::InvalidArg;
    };
    if argc > 0 && args.is_null() {
        set_last_error(handle, "null argument array");
        return SlateResult::InvalidArg;
    }
    if handle.session.vm().get_global(name).is_none() {
        set_last_error(handle, &format!("global '{}' not found", name));
        return SlateResult::NotFound;
    }

    let raw_args = if argc == 0 {
        &[]
    } else {
        std::slice::from_raw_parts(args, argc)
    };
    let values: Vec<Value> = raw_args.iter().map(|a| marshal_in(handle, a)).collect();

    match handle.session.vm_mut().call_function(name, &values) {
        Ok(value) => {
            if !result.is_null() {
                *result = marshal_out(handle, value);
            }
            SlateResult::Ok
        }
        Err(err) => {
            set_last_error(handle, &err.to_string());
            SlateResult::Runtime
        }
    }
}

// ============================================================================
// Globals
// ============================================================================

/// Read a global into `out`
#[no_mangle]
pub unsafe extern "C" fn slate_get_global(
    ctx: *mut SlateContext,
    name: *const c_char,
    out: *mut SlateValue,
) -> SlateResult {
    let Some(handle) = context(ctx) else {
        return SlateResult::InvalidArg;
    };
    let (Some(name), false) = (c_str(name), out.is_null()) else {
        set_last_error(handle, "null name or output");
        return SlateResult::InvalidArg;
    };
    match handle.session.vm().get_global(name) {
        Some(value) => {
            *out = marshal_out(handle, value);
            SlateResult::Ok
        }
        None => {
            set_last_error(handle, &format!("global '{}' not found", name));
            SlateResult::NotFound
        }
    }
}

/// Write a global
#[no_mangle]
pub unsafe extern "C" fn slate_set_global(
    ctx: *mut SlateContext,
    name: *const c_char,
    value: SlateValue,
) -> SlateResult {
    let Some(handle) = context(ctx) else {
        return SlateResult::InvalidArg;
    };
    let Some(name) = c_str(name) else {
        set_last_error(handle, "null or non-UTF-8 global name");
        return SlateResult::InvalidArg;
    };
    let name = name.to_string();
    let v = marshal_in(handle, &value);
    handle.session.vm_mut().set_global(&name, v);
    SlateResult::Ok
}

// ============================================================================
// Host functions & callbacks
// ============================================================================

/// Register a host function callable from scripts under `name`
#[no_mangle]
pub unsafe extern "C" fn slate_register_function(
    ctx: *mut SlateContext,
    name: *const c_char,
    func: SlateNativeFn,
    user_data: *mut c_void,
) -> SlateResult {
    let Some(handle) = context(ctx) else {
        return SlateResult::InvalidArg;
    };
    let Some(name) = c_str(name) else {
        set_last_error(handle, "null or non-UTF-8 function name");
        return SlateResult::InvalidArg;
    };

    let user_data = UserData(user_data);
    handle.session.vm_mut().register_native(name, move |nctx, args| {
        let user_data = &user_data;
        let marshalled: Vec<SlateValue> = args
            .iter()
            .map(|v| {
                let mut out = SlateValue::null();
                match v {
                    Value::Null => {}
                    Value::Bool(b) => {
                        out.kind = SlateValueKind::Bool;
                        out.bool_val = *b as i32;
                    }
                    Value::Int(i) => {
                        out.kind = SlateValueKind::Int;
                        out.int_val = *i;
                    }
                    Value::Float(f) => {
                        out.kind = SlateValueKind::Float;
                        out.float_val = *f;
                    }
                    Value::Str(_) | Value::Obj(_) => {
                        // String contents are marshalled through a CString
                        // owned for the duration of the call below.
                        out.kind = SlateValueKind::String;
                    }
                }
                out
            })
            .collect();

        // Second pass for string payloads, keeping the CStrings alive
        // across the callback invocation.
        let mut holds: Vec<CString> = Vec::new();
        let mut marshalled = marshalled;
        for (slot, v) in marshalled.iter_mut().zip(args.iter()) {
            if slot.kind == SlateValueKind::String {
                let text = nctx.get_string(*v).unwrap_or_default().to_string();
                let c = CString::new(text).unwrap_or_default();
                slot.string_val = c.as_ptr();
                holds.push(c);
            }
        }

        let mut out = SlateValue::null();
        let status = func(marshalled.as_ptr(), marshalled.len(), user_data.0, &mut out);
        drop(holds);
        if status != 0 {
            return Err(NativeError::new(format!(
                "host function failed with status {}",
                status
            )));
        }
        Ok(match out.kind {
            SlateValueKind::Null => Value::Null,
            SlateValueKind::Bool => Value::Bool(out.bool_val != 0),
            SlateValueKind::Int => Value::Int(out.int_val),
            SlateValueKind::Float => Value::Float(out.float_val),
            SlateValueKind::String => {
                let text = c_str(out.string_val).unwrap_or("").to_string();
                nctx.make_string(text)
            }
        })
    });
    SlateResult::Ok
}

/// Unregister a previously registered host function
#[no_mangle]
pub unsafe extern "C" fn slate_unregister_function(
    ctx: *mut SlateContext,
    name: *const c_char,
) -> SlateResult {
    let Some(handle) = context(ctx) else {
        return SlateResult::InvalidArg;
    };
    let Some(name) = c_str(name) else {
        return SlateResult::InvalidArg;
    };
    if handle.session.vm_mut().unregister_native(name) {
        SlateResult::Ok
    } else {
        SlateResult::NotFound
    }
}

/// Route `print` output to a host callback
#[no_mangle]
pub unsafe extern "C" fn slate_set_print_callback(
    ctx: *mut SlateContext,
    callback: SlatePrintFn,
    user_data: *mut c_void,
) -> SlateResult {
    let Some(handle) = context(ctx) else {
        return SlateResult::InvalidArg;
    };
    let user_data = UserData(user_data);
    handle.session.vm_mut().set_output(Box::new(move |text| {
        if let Ok(c) = CString::new(text) {
            callback(c.as_ptr(), user_data.0);
        }
    }));
    SlateResult::Ok
}

/// Route uncaught-error reports to a host callback
#[no_mangle]
pub unsafe extern "C" fn slate_set_error_callback(
    ctx: *mut SlateContext,
    callback: SlateErrorFn,
    user_data: *mut c_void,
) -> SlateResult {
    let Some(handle) = context(ctx) else {
        return SlateResult::InvalidArg;
    };
    let user_data = UserData(user_data);
    handle
        .session
        .vm_mut()
        .set_error_sink(Box::new(move |message| {
            if let Ok(c) = CString::new(message) {
                callback(c.as_ptr(), user_data.0);
            }
        }));
    SlateResult::Ok
}

/// Wrap a host pointer and bind it to a global so scripts can pass it
/// around. `engine_owned` non-zero suppresses VM-initiated release of the
/// host object; `release` (optional) is notified when the VM-side wrapper
/// is destroyed.
#[no_mangle]
pub unsafe extern "C" fn slate_wrap_native(
    ctx: *mut SlateContext,
    global_name: *const c_char,
    handle_ptr: *mut c_void,
    type_name: *const c_char,
    engine_owned: i32,
    release: Option<SlateReleaseFn>,
    user_data: *mut c_void,
) -> SlateResult {
    let Some(handle) = context(ctx) else {
        return SlateResult::InvalidArg;
    };
    let (Some(global_name), Some(type_name)) = (c_str(global_name), c_str(type_name)) else {
        set_last_error(handle, "null name");
        return SlateResult::InvalidArg;
    };
    let global_name = global_name.to_string();
    let type_name = type_name.to_string();

    let user_data = UserData(user_data);
    let notify: Option<Box<dyn FnOnce(*mut c_void)>> = release.map(|cb| {
        Box::new(move |p: *mut c_void| cb(p, user_data.0)) as Box<dyn FnOnce(*mut c_void)>
    });

    let vm = handle.session.vm_mut();
    let value = vm.wrap_native(handle_ptr, &type_name, engine_owned != 0, notify);
    vm.set_global(&global_name, value);
    // The global now holds the wrapper's reference.
    vm.heap_mut().release_value(value);
    SlateResult::Ok
}

// ============================================================================
// Debugging
// ============================================================================

/// Enable debugging on this context; `stop_on_entry` non-zero pauses before
/// the first instruction
#[no_mangle]
pub unsafe extern "C" fn slate_enable_debug(
    ctx: *mut SlateContext,
    stop_on_entry: i32,
) -> SlateResult {
    let Some(handle) = context(ctx) else {
        return SlateResult::InvalidArg;
    };
    let controller = Arc::new(DebugController::new());
    controller.set_blocking(true);
    controller.set_break_at_entry(stop_on_entry != 0);
    handle.session.attach_debugger(controller.clone());
    handle.debugger = Some(controller);
    SlateResult::Ok
}

/// Install the debug event callback
#[no_mangle]
pub unsafe extern "C" fn slate_set_debug_callback(
    ctx: *mut SlateContext,
    callback: SlateDebugFn,
    user_data: *mut c_void,
) -> SlateResult {
    let Some(handle) = context(ctx) else {
        return SlateResult::InvalidArg;
    };
    let Some(controller) = &handle.debugger else {
        set_last_error(handle, "debugging not enabled");
        return SlateResult::InvalidArg;
    };
    let user_data = UserData(user_data);
    controller.set_callback(Box::new(move |event, frame| {
        let user_data = &user_data;
        if let Ok(reason) = CString::new(event.reason()) {
            callback(reason.as_ptr(), frame.line, user_data.0);
        }
    }));
    SlateResult::Ok
}

/// Add a breakpoint; an empty source matches any body. Returns 0 when
/// debugging is not enabled.
#[no_mangle]
pub unsafe extern "C" fn slate_debug_add_breakpoint(
    ctx: *mut SlateContext,
    line: u32,
    source: *const c_char,
) -> u32 {
    let Some(handle) = context(ctx) else {
        return 0;
    };
    let Some(controller) = &handle.debugger else {
        return 0;
    };
    controller.add_breakpoint(line, c_str(source).unwrap_or(""))
}

/// Remove a breakpoint by id
#[no_mangle]
pub unsafe extern "C" fn slate_debug_remove_breakpoint(
    ctx: *mut SlateContext,
    id: u32,
) -> SlateResult {
    match context(ctx).and_then(|h| h.debugger.as_ref().map(|d| d.remove_breakpoint(id))) {
        Some(true) => SlateResult::Ok,
        Some(false) => SlateResult::NotFound,
        None => SlateResult::InvalidArg,
    }
}

macro_rules! debug_control {
    ($(#[$doc:meta])* $name:ident, $method:ident) => {
        $(#[$doc])*
        #[no_mangle]
        pub unsafe extern "C" fn $name(ctx: *mut SlateContext) -> SlateResult {
            match context(ctx).and_then(|h| h.debugger.as_ref()) {
                Some(controller) => {
                    controller.$method();
                    SlateResult::Ok
                }
                None => SlateResult::InvalidArg,
            }
        }
    };
}

debug_control!(
    /// Resume a paused VM
    slate_debug_resume,
    resume
);
debug_control!(
    /// Step over: pause on the next line at the same or outer depth
    slate_debug_step_over,
    step_over
);
debug_control!(
    /// Step into: pause on the next line at any depth
    slate_debug_step_in,
    step_into
);
debug_control!(
    /// Step out: pause when the current frame returns
    slate_debug_step_out,
    step_out
);
debug_control!(
    /// Request a pause at the next instruction boundary
    slate_debug_pause,
    pause
);
debug_control!(
    /// Detach the debugger; a paused VM resumes and halts
    slate_debug_disconnect,
    disconnect
);

#[cfg(test)]
mod tests {
    use super::*;
    use slate_bytecode::{Chunk, Constant, Opcode};

    fn compile_answer() -> Vec<u8> {
        let mut chunk = Chunk::new();
        let k = chunk.add_constant(Constant::Int(42)) as u8;
        chunk.write_op(Opcode::Const, 1);
        chunk.write(k, 1);
        chunk.write_op(Opcode::Halt, 1);
        chunk.serialize()
    }

    #[test]
    fn test_context_lifecycle() {
        unsafe {
            let ctx = slate_context_new();
            assert!(!ctx.is_null());
            slate_context_destroy(ctx);
        }
    }

    #[test]
    fn test_execute_bytes() {
        unsafe {
            let ctx = slate_context_new();
            let bytes = compile_answer();
            let script = slate_script_load_bytes(ctx, bytes.as_ptr(), bytes.len());
            assert!(!script.is_null());

            let mut result = SlateValue::null();
            let status = slate_execute(ctx, script, &mut result);
            assert_eq!(status, SlateResult::Ok);
            assert_eq!(result.kind, SlateValueKind::Int);
            assert_eq!(result.int_val, 42);

            slate_script_free(script);
            slate_context_destroy(ctx);
        }
    }

    #[test]
    fn test_load_rejects_garbage() {
        unsafe {
            let ctx = slate_context_new();
            let garbage = b"definitely not bytecode";
            let script = slate_script_load_bytes(ctx, garbage.as_ptr(), garbage.len());
            assert!(script.is_null());
            let err = CStr::from_ptr(slate_last_error(ctx));
            assert!(!err.to_bytes().is_empty());
            slate_context_destroy(ctx);
        }
    }

    #[test]
    fn test_globals_roundtrip() {
        unsafe {
            let ctx = slate_context_new();
            let name = CString::new("answer").unwrap();

            let mut v = SlateValue::null();
            v.kind = SlateValueKind::Int;
            v.int_val = 41;
            assert_eq!(slate_set_global(ctx, name.as_ptr(), v), SlateResult::Ok);

            let mut out = SlateValue::null();
            assert_eq!(
                slate_get_global(ctx, name.as_ptr(), &mut out),
                SlateResult::Ok
            );
            assert_eq!(out.kind, SlateValueKind::Int);
            assert_eq!(out.int_val, 41);

            let missing = CString::new("missing").unwrap();
            assert_eq!(
                slate_get_global(ctx, missing.as_ptr(), &mut out),
                SlateResult::NotFound
            );
            slate_context_destroy(ctx);
        }
    }

    #[test]
    fn test_call_unknown_function_is_not_found() {
        unsafe {
            let ctx = slate_context_new();
            let name = CString::new("nope").unwrap();
            let status =
                slate_call_function(ctx, name.as_ptr(), ptr::null(), 0, ptr::null_mut());
            assert_eq!(status, SlateResult::NotFound);
            slate_context_destroy(ctx);
        }
    }
}
