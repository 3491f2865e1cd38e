//! Compiled-program loading.

use crate::error::RuntimeError;
use slate_bytecode::Chunk;
use std::path::Path;
use std::sync::Arc;

/// File extension produced by the SlateScript compiler.
pub const PROGRAM_EXTENSION: &str = "ssasm";

/// Load a compiled program from a `.ssasm` file.
pub fn load_program(path: impl AsRef<Path>) -> Result<Arc<Chunk>, RuntimeError> {
    let bytes = std::fs::read(path)?;
    let chunk = Chunk::deserialize(&bytes)?;
    Ok(Arc::new(chunk))
}

/// Load a compiled program from an in-memory buffer.
pub fn load_program_bytes(bytes: &[u8]) -> Result<Arc<Chunk>, RuntimeError> {
    Ok(Arc::new(Chunk::deserialize(bytes)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use slate_bytecode::{Constant, Opcode};
    use std::io::Write;

    fn sample_chunk() -> Chunk {
        let mut chunk = Chunk::new();
        let k = chunk.add_constant(Constant::Int(7)) as u8;
        chunk.write_op(Opcode::Const, 1);
        chunk.write(k, 1);
        chunk.write_op(Opcode::Halt, 1);
        chunk
    }

    #[test]
    fn test_load_program_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&sample_chunk().serialize()).unwrap();

        let chunk = load_program(file.path()).unwrap();
        assert_eq!(chunk.code.len(), 3);
        assert_eq!(chunk.constants, vec![Constant::Int(7)]);
    }

    #[test]
    fn test_load_program_missing_file() {
        let err = load_program("/nonexistent/program.ssasm").unwrap_err();
        assert!(matches!(err, RuntimeError::Io(_)));
    }

    #[test]
    fn test_load_program_rejects_garbage() {
        let err = load_program_bytes(b"not bytecode at all").unwrap_err();
        assert!(matches!(err, RuntimeError::Bytecode(_)));
    }
}
