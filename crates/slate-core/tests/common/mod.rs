//! Shared helpers for VM integration tests: a small chunk assembler and an
//! output-capturing runner.

use slate_bytecode::{Chunk, Constant, FunctionPrototype, Opcode};
use slate_core::{Value, Vm, VmError};
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

/// Hand assembler over a [`Chunk`]
pub struct Asm {
    pub chunk: Chunk,
    line: u32,
}

#[allow(dead_code)]
impl Asm {
    pub fn new() -> Self {
        Self {
            chunk: Chunk::new(),
            line: 1,
        }
    }

    /// Set the source line for subsequently written instructions
    pub fn line(&mut self, line: u32) -> &mut Self {
        self.line = line;
        self
    }

    pub fn op(&mut self, op: Opcode) -> &mut Self {
        self.chunk.write_op(op, self.line);
        self
    }

    pub fn u8(&mut self, v: u8) -> &mut Self {
        self.chunk.write(v, self.line);
        self
    }

    pub fn u16(&mut self, v: u16) -> &mut Self {
        self.chunk.write_u16(v, self.line);
        self
    }

    /// `CONST` with an integer pool constant
    pub fn int(&mut self, v: i64) -> &mut Self {
        let idx = self.chunk.add_constant(Constant::Int(v)) as u8;
        self.op(Opcode::Const).u8(idx)
    }

    /// `CONST` with a float pool constant
    pub fn float(&mut self, v: f64) -> &mut Self {
        let idx = self.chunk.add_constant(Constant::Float(v)) as u8;
        self.op(Opcode::Const).u8(idx)
    }

    /// `STRING` with a pooled literal
    pub fn string(&mut self, s: &str) -> &mut Self {
        let idx = self.chunk.add_string(s) as u16;
        self.op(Opcode::Str).u16(idx)
    }

    /// An opcode whose operand is a u16 string-pool index
    pub fn named(&mut self, op: Opcode, name: &str) -> &mut Self {
        let idx = self.chunk.add_string(name) as u16;
        self.op(op).u16(idx)
    }

    /// Emit a jump with a placeholder offset; patch with [`Asm::patch`]
    pub fn jump(&mut self, op: Opcode) -> usize {
        self.chunk.emit_jump(op, self.line)
    }

    /// Land the jump emitted at `operand_at` on the current position
    pub fn patch(&mut self, operand_at: usize) -> &mut Self {
        self.chunk.patch_jump(operand_at);
        self
    }

    /// `LOOP` back to an absolute code offset
    pub fn loop_to(&mut self, target: usize) -> &mut Self {
        let offset = (self.chunk.code.len() + 3 - target) as u16;
        self.op(Opcode::Loop).u16(offset)
    }

    /// Register a function prototype; returns its index for `CLOSURE`
    pub fn func(&mut self, proto: FunctionPrototype) -> u16 {
        self.chunk.add_function(proto) as u16
    }

    pub fn done(self) -> Arc<Chunk> {
        Arc::new(self.chunk)
    }
}

/// Prototype with positional-only parameters and no defaults
#[allow(dead_code)]
pub fn proto(name: &str, params: &[&str], body: Asm) -> FunctionPrototype {
    let mut p = FunctionPrototype::new(name, body.done());
    p.params = params.iter().map(|s| s.to_string()).collect();
    p.param_labels = vec![String::new(); p.params.len()];
    p.param_defaults = vec![Default::default(); p.params.len()];
    p
}

/// Execute a chunk, capturing `PRINT` output
#[allow(dead_code)]
pub fn run(chunk: &Arc<Chunk>) -> (Result<Value, VmError>, String) {
    let mut vm = Vm::new();
    let output = Rc::new(RefCell::new(String::new()));
    let sink = output.clone();
    vm.set_output(Box::new(move |text| {
        sink.borrow_mut().push_str(text);
    }));
    let result = vm.execute(chunk);
    let printed = output.borrow().clone();
    (result, printed)
}

/// Execute a chunk, returning the VM for post-run inspection
#[allow(dead_code)]
pub fn run_with_vm(chunk: &Arc<Chunk>) -> (Vm, Result<Value, VmError>, String) {
    let mut vm = Vm::new();
    let output = Rc::new(RefCell::new(String::new()));
    let sink = output.clone();
    vm.set_output(Box::new(move |text| {
        sink.borrow_mut().push_str(text);
    }));
    let result = vm.execute(chunk);
    let printed = output.borrow().clone();
    (vm, result, printed)
}
