//! Execution sessions.
//!
//! A [`Session`] pairs one VM with its loaded program and keeps globals,
//! registered natives, and the debug controller alive across executions.

use crate::error::RuntimeError;
use crate::loader;
use slate_bytecode::Chunk;
use slate_core::debug::DebugController;
use slate_core::{Value, Vm};
use std::path::Path;
use std::sync::Arc;

/// One VM plus its loaded program.
pub struct Session {
    vm: Vm,
    program: Option<Arc<Chunk>>,
}

impl Session {
    /// Create a session with a fresh VM.
    pub fn new() -> Self {
        Self {
            vm: Vm::new(),
            program: None,
        }
    }

    /// The session's VM.
    pub fn vm(&self) -> &Vm {
        &self.vm
    }

    /// Mutable access to the session's VM.
    pub fn vm_mut(&mut self) -> &mut Vm {
        &mut self.vm
    }

    /// The loaded program, if any.
    pub fn program(&self) -> Option<&Arc<Chunk>> {
        self.program.as_ref()
    }

    /// Load a compiled program from disk.
    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<(), RuntimeError> {
        self.program = Some(loader::load_program(path)?);
        Ok(())
    }

    /// Load a compiled program from memory.
    pub fn load_bytes(&mut self, bytes: &[u8]) -> Result<(), RuntimeError> {
        self.program = Some(loader::load_program_bytes(bytes)?);
        Ok(())
    }

    /// Use an already-decoded program.
    pub fn load_chunk(&mut self, chunk: Arc<Chunk>) {
        self.program = Some(chunk);
    }

    /// Attach a debug controller before running.
    pub fn attach_debugger(&mut self, controller: Arc<DebugController>) {
        self.vm.set_debug_controller(controller);
    }

    /// Execute the loaded program and return its result value.
    pub fn run(&mut self) -> Result<Value, RuntimeError> {
        let program = self.program.clone().ok_or_else(|| {
            RuntimeError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no program loaded",
            ))
        })?;
        Ok(self.vm.execute(&program)?)
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slate_bytecode::{Constant, Opcode};

    #[test]
    fn test_run_without_program_fails() {
        let mut session = Session::new();
        assert!(session.run().is_err());
    }

    #[test]
    fn test_run_loaded_chunk() {
        let mut chunk = Chunk::new();
        let k = chunk.add_constant(Constant::Int(41)) as u8;
        chunk.write_op(Opcode::Const, 1);
        chunk.write(k, 1);
        let one = chunk.add_constant(Constant::Int(1)) as u8;
        chunk.write_op(Opcode::Const, 1);
        chunk.write(one, 1);
        chunk.write_op(Opcode::Add, 1);
        chunk.write_op(Opcode::Halt, 1);

        let mut session = Session::new();
        session.load_chunk(Arc::new(chunk));
        let result = session.run().unwrap();
        assert_eq!(result, Value::Int(42));
    }

    #[test]
    fn test_globals_persist_across_runs() {
        let mut define = Chunk::new();
        let k = define.add_constant(Constant::Int(7)) as u8;
        let name = define.add_string("seven") as u16;
        define.write_op(Opcode::Const, 1);
        define.write(k, 1);
        define.write_op(Opcode::DefineGlobal, 1);
        define.write_u16(name, 1);
        define.write_op(Opcode::Halt, 1);

        let mut read = Chunk::new();
        let name2 = read.add_string("seven") as u16;
        read.write_op(Opcode::GetGlobal, 1);
        read.write_u16(name2, 1);
        read.write_op(Opcode::Halt, 1);

        let mut session = Session::new();
        session.load_chunk(Arc::new(define));
        session.run().unwrap();
        session.load_chunk(Arc::new(read));
        assert_eq!(session.run().unwrap(), Value::Int(7));
    }
}
