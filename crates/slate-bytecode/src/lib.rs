//! SlateScript bytecode format
//!
//! This crate defines the compiled artifact shared by the front-end and the
//! virtual machine:
//! - The instruction set ([`Opcode`])
//! - The chunk model ([`Chunk`], function prototypes, protocol descriptors,
//!   debug info)
//! - The `.ssasm` binary serialization
//! - A disassembler for diagnostics

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod chunk;
pub mod disasm;
pub mod encoder;
pub mod opcode;

pub use chunk::{
    Chunk, Constant, DebugInfo, FunctionPrototype, LocalVarInfo, ParamDefault, ProtocolDef,
    ProtocolMethodReq, ProtocolPropertyReq, UpvalueInfo, NO_LABEL,
};
pub use disasm::{disassemble, disassemble_instruction};
pub use encoder::{BytecodeReader, BytecodeWriter, ChunkError, DecodeError, MAGIC, VERSION};
pub use opcode::Opcode;
