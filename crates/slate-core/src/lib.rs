//! SlateScript VM core runtime
//!
//! This crate provides the virtual machine runtime:
//! - Tagged value representation
//! - Reference-counted object heap with deferred destruction
//! - Bytecode interpreter (stack machine, call mechanics, operator overloads)
//! - Debug controller (breakpoints, stepping, pause/resume rendezvous)
//! - Native-function bridge for host callbacks

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod debug;
pub mod heap;
pub mod native;
pub mod object;
pub mod stack;
pub mod value;
pub mod vm;

pub use debug::{
    Breakpoint, DebugController, DebugEvent, DebugFrame, DebugVariable, StepMode,
};
pub use heap::{Heap, ObjRef};
pub use native::{NativeContext, NativeError, NativeFn, NativeFunctionRegistry};
pub use object::Object;
pub use stack::{CallFrame, Stack};
pub use value::Value;
pub use vm::{Vm, VmState};

/// VM execution errors
#[derive(Debug, thiserror::Error)]
pub enum VmError {
    /// Operand stack exceeded its configured limit
    #[error("Stack overflow")]
    StackOverflow,

    /// Operand stack was popped while empty
    #[error("Stack underflow")]
    StackUnderflow,

    /// Unknown opcode byte in the instruction stream
    #[error("Invalid opcode: {0:#04x}")]
    InvalidOpcode(u8),

    /// Instruction pointer or operand ran past the end of the chunk
    #[error("Truncated instruction at offset {0}")]
    TruncatedInstruction(usize),

    /// Operand types did not fit the instruction
    #[error("Type error: {0}")]
    TypeError(String),

    /// General runtime failure; becomes a thrown value when a catch handler
    /// is active
    #[error("Runtime error: {0}")]
    RuntimeError(String),

    /// A value thrown by `THROW` (or an internal error converted to one)
    /// propagating toward the nearest catch handler
    #[error("uncaught thrown value")]
    Thrown(Value),

    /// A thrown value crossed the outermost frame without a catch handler
    #[error("Uncaught error: {0}")]
    Uncaught(String),
}

/// VM execution result
pub type VmResult<T> = Result<T, VmError>;
