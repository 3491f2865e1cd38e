//! Runtime error types.

use slate_bytecode::ChunkError;
use slate_core::VmError;

/// Errors that can occur while loading or executing a program.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// File I/O error
    #[error("{0}")]
    Io(#[from] std::io::Error),

    /// Bytecode decoding error
    #[error("Bytecode error: {0}")]
    Bytecode(#[from] ChunkError),

    /// VM execution error
    #[error("{0}")]
    Vm(#[from] VmError),
}
