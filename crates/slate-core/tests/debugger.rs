//! Debug-controller integration tests: breakpoints, stepping, rendezvous,
//! and stack inspection against a live VM on a worker thread.

mod common;

use common::{proto, Asm};
use slate_bytecode::{DebugInfo, LocalVarInfo, Opcode};
use slate_core::debug::{DebugController, DebugEvent};
use slate_core::Vm;
use std::sync::{Arc, Mutex};
use std::thread;

/// Root chunk on line 10 calling a three-line function body.
fn program_with_function() -> Asm {
    let mut body = Asm::new();
    body.line(1);
    body.int(1);
    body.op(Opcode::Pop);
    body.line(2);
    body.int(2);
    body.op(Opcode::Pop);
    body.line(3);
    body.op(Opcode::Nil);
    body.op(Opcode::Return);

    let mut asm = Asm::new();
    let f = asm.func(proto("f", &[], body));
    asm.line(10);
    asm.op(Opcode::Closure).u16(f);
    asm.named(Opcode::DefineGlobal, "f");
    asm.line(11);
    asm.named(Opcode::GetGlobal, "f");
    asm.op(Opcode::Call).u8(0);
    asm.op(Opcode::Pop);
    asm.line(12);
    asm.op(Opcode::Halt);
    asm
}

fn spawn_vm(
    controller: Arc<DebugController>,
    chunk: Arc<slate_bytecode::Chunk>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut vm = Vm::new();
        vm.set_output(Box::new(|_| {}));
        vm.set_debug_controller(controller);
        vm.execute(&chunk).unwrap();
    })
}

#[test]
fn breakpoint_then_step_over_keeps_depth() {
    let asm = program_with_function();
    let chunk = asm.done();

    let controller = Arc::new(DebugController::new());
    controller.set_blocking(true);
    controller.add_breakpoint(1, "");

    let events: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    controller.set_callback(Box::new(move |event, _frame| {
        sink.lock().unwrap().push(event.reason());
    }));

    let handle = spawn_vm(controller.clone(), chunk);

    // First stop: the breakpoint on line 1.
    controller.wait_until_paused();
    let depth_at_breakpoint = controller.stack_trace().len();
    assert_eq!(controller.stack_trace()[0].line, 1);

    // `next` must stop on line 2 with the reason `step` at the same depth.
    controller.step_over();
    controller.wait_until_paused();
    let trace = controller.stack_trace();
    assert_eq!(trace[0].line, 2);
    assert_eq!(trace.len(), depth_at_breakpoint);

    controller.resume();
    handle.join().unwrap();

    assert_eq!(*events.lock().unwrap(), vec!["breakpoint", "step"]);
}

#[test]
fn step_over_does_not_stop_inside_calls() {
    // Root line 11 performs the call; stepping over it must never pause
    // inside the function body (lines 1-3), only at the call depth.
    let asm = program_with_function();
    let chunk = asm.done();

    let controller = Arc::new(DebugController::new());
    controller.set_blocking(true);
    controller.add_breakpoint(11, "");

    let handle = spawn_vm(controller.clone(), chunk);

    controller.wait_until_paused();
    assert_eq!(controller.stack_trace()[0].line, 11);
    let depth = controller.stack_trace().len();

    // The call returns to the tail of line 11, so the first pause lands
    // back on the call line at the original depth.
    controller.step_over();
    controller.wait_until_paused();
    let trace = controller.stack_trace();
    assert_eq!(trace[0].line, 11);
    assert!(trace.len() <= depth);

    // A second step reaches line 12.
    controller.step_over();
    controller.wait_until_paused();
    assert_eq!(controller.stack_trace()[0].line, 12);

    controller.resume();
    handle.join().unwrap();
}

#[test]
fn step_into_descends_into_the_call() {
    let asm = program_with_function();
    let chunk = asm.done();

    let controller = Arc::new(DebugController::new());
    controller.set_blocking(true);
    controller.add_breakpoint(11, "");

    let handle = spawn_vm(controller.clone(), chunk);

    controller.wait_until_paused();
    let depth = controller.stack_trace().len();

    controller.step_into();
    controller.wait_until_paused();
    let trace = controller.stack_trace();
    assert_eq!(trace[0].line, 1);
    assert_eq!(trace[0].function_name, "f");
    assert_eq!(trace.len(), depth + 1);

    controller.resume();
    handle.join().unwrap();
}

#[test]
fn step_out_returns_to_the_caller() {
    let asm = program_with_function();
    let chunk = asm.done();

    let controller = Arc::new(DebugController::new());
    controller.set_blocking(true);
    controller.add_breakpoint(1, "");

    let handle = spawn_vm(controller.clone(), chunk);

    controller.wait_until_paused();
    let depth = controller.stack_trace().len();
    assert_eq!(controller.stack_trace()[0].function_name, "f");

    controller.step_out();
    controller.wait_until_paused();
    let trace = controller.stack_trace();
    assert!(trace.len() < depth);
    assert_eq!(trace[0].function_name, "<top-level>");

    controller.resume();
    handle.join().unwrap();
}

#[test]
fn breakpoint_does_not_retrigger_on_resume() {
    let asm = program_with_function();
    let chunk = asm.done();

    let controller = Arc::new(DebugController::new());
    controller.set_blocking(true);
    controller.add_breakpoint(2, "");

    let hits = Arc::new(Mutex::new(0usize));
    let sink = hits.clone();
    controller.set_callback(Box::new(move |event, _| {
        if event == DebugEvent::Breakpoint {
            *sink.lock().unwrap() += 1;
        }
    }));

    let handle = spawn_vm(controller.clone(), chunk);

    controller.wait_until_paused();
    controller.resume();
    handle.join().unwrap();

    assert_eq!(*hits.lock().unwrap(), 1);
}

#[test]
fn stop_on_entry_pauses_before_first_instruction() {
    let asm = program_with_function();
    let chunk = asm.done();

    let controller = Arc::new(DebugController::new());
    controller.set_blocking(true);
    controller.set_break_at_entry(true);

    let events: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    controller.set_callback(Box::new(move |event, _| {
        sink.lock().unwrap().push(event.reason());
    }));

    let handle = spawn_vm(controller.clone(), chunk);

    controller.wait_until_paused();
    assert_eq!(controller.stack_trace()[0].line, 10);

    controller.resume();
    handle.join().unwrap();
    assert_eq!(events.lock().unwrap().first().copied(), Some("entry"));
}

#[test]
fn pause_request_stops_reason_pause() {
    // A tight loop the adapter interrupts with an explicit pause.
    let mut asm = Asm::new();
    asm.line(1);
    asm.int(0); // slot 0: i
    let top = asm.chunk.code.len();
    asm.line(2);
    asm.op(Opcode::GetLocal).u16(0);
    asm.int(1);
    asm.op(Opcode::Add);
    asm.op(Opcode::SetLocal).u16(0);
    asm.op(Opcode::Pop);
    asm.line(3);
    asm.loop_to(top);

    let chunk = asm.done();
    let controller = Arc::new(DebugController::new());
    controller.set_blocking(true);

    let events: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    controller.set_callback(Box::new(move |event, _| {
        sink.lock().unwrap().push(event.reason());
    }));

    let controller_vm = controller.clone();
    let handle = thread::spawn(move || {
        let mut vm = Vm::new();
        vm.set_output(Box::new(|_| {}));
        vm.set_debug_controller(controller_vm);
        // The loop never terminates on its own; disconnect halts it.
        let _ = vm.execute(&chunk);
    });

    controller.pause();
    controller.wait_until_paused();
    assert_eq!(events.lock().unwrap().first().copied(), Some("pause"));

    controller.disconnect();
    handle.join().unwrap();
}

#[test]
fn locals_from_debug_info_respect_scope() {
    let mut body = Asm::new();
    body.line(1);
    body.int(7); // slot 0: total
    body.line(2);
    body.int(1);
    body.op(Opcode::Pop);
    body.line(3);
    body.op(Opcode::Nil);
    body.op(Opcode::Return);

    body.chunk.debug_info = Some(DebugInfo {
        source_file: "main.slate".to_string(),
        locals: vec![LocalVarInfo {
            name: "total".to_string(),
            slot: 0,
            // In scope once initialized (offset of the line-2 instruction).
            scope_start: 2,
            scope_end: 0,
        }],
    });

    let mut asm = Asm::new();
    let f = asm.func(proto("f", &[], body));
    asm.line(10);
    asm.op(Opcode::Closure).u16(f);
    asm.op(Opcode::Call).u8(0);
    asm.op(Opcode::Pop);
    asm.op(Opcode::Halt);

    let chunk = asm.done();
    let controller = Arc::new(DebugController::new());
    controller.set_blocking(true);
    controller.add_breakpoint(2, "");

    let handle = spawn_vm(controller.clone(), chunk);

    controller.wait_until_paused();
    let locals = controller.locals(0);
    assert_eq!(locals.len(), 1);
    assert_eq!(locals[0].name, "total");
    assert_eq!(locals[0].slot, 0);
    assert_eq!(locals[0].value, "7");
    assert_eq!(locals[0].type_name, "Int");

    controller.resume();
    handle.join().unwrap();
}

#[test]
fn anonymous_locals_without_debug_info() {
    let mut body = Asm::new();
    body.line(1);
    body.int(5);
    body.line(2);
    body.int(6);
    body.op(Opcode::Pop);
    body.line(3);
    body.op(Opcode::Nil);
    body.op(Opcode::Return);

    let mut asm = Asm::new();
    let f = asm.func(proto("f", &[], body));
    asm.line(10);
    asm.op(Opcode::Closure).u16(f);
    asm.op(Opcode::Call).u8(0);
    asm.op(Opcode::Pop);
    asm.op(Opcode::Halt);

    let chunk = asm.done();
    let controller = Arc::new(DebugController::new());
    controller.set_blocking(true);
    controller.add_breakpoint(2, "");

    let handle = spawn_vm(controller.clone(), chunk);

    controller.wait_until_paused();
    let locals = controller.locals(0);
    assert!(!locals.is_empty());
    assert_eq!(locals[0].name, "local_0");
    assert_eq!(locals[0].value, "5");

    controller.resume();
    handle.join().unwrap();
}

#[test]
fn stack_trace_is_innermost_first() {
    let asm = program_with_function();
    let chunk = asm.done();

    let controller = Arc::new(DebugController::new());
    controller.set_blocking(true);
    controller.add_breakpoint(1, "");

    let handle = spawn_vm(controller.clone(), chunk);

    controller.wait_until_paused();
    let trace = controller.stack_trace();
    assert_eq!(trace.len(), 2);
    assert_eq!(trace[0].function_name, "f");
    assert_eq!(trace[0].frame_index, 0);
    assert_eq!(trace[1].function_name, "<top-level>");
    assert_eq!(trace[1].line, 11);

    controller.resume();
    handle.join().unwrap();
}
