//! Debug controller
//!
//! Coordinates an external debug adapter with the execution thread. The VM
//! calls [`DebugController::on_instruction`] at every instruction boundary;
//! the controller decides whether to pause based on an explicit pause
//! request, a breakpoint on the current line, or the active step mode, in
//! that order.
//!
//! Synchronization is condvar ping-pong: in blocking mode the execution
//! thread parks on `resume_cv` while paused, and the adapter parks on
//! `pause_cv` in [`DebugController::wait_until_paused`]. Only the `paused`
//! and `pause_requested` flags are shared hot-path state; both are atomic.
//! The breakpoint table is guarded by a read-write lock so the adapter can
//! mutate it between a stopped event and the matching resume.

use crate::value::Value;
use crate::vm::Vm;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use slate_bytecode::Chunk;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};

/// A registered breakpoint
#[derive(Debug, Clone)]
pub struct Breakpoint {
    /// Controller-assigned id
    pub id: u32,
    /// Normalized source path; empty matches any body
    pub source_file: String,
    /// 1-based source line
    pub line: u32,
    /// Disabled breakpoints never match
    pub enabled: bool,
    /// Number of pauses this breakpoint caused
    pub hit_count: u32,
}

/// Stepping mode, set by the adapter and evaluated at line transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepMode {
    /// Only break at breakpoints
    None,
    /// Pause on the next line at the same or outer call depth
    Over,
    /// Pause on the next line at any depth
    Into,
    /// Pause when the current frame returns
    Out,
}

/// Why execution stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugEvent {
    /// Stop-on-entry before the first instruction
    Entry,
    /// A breakpoint matched
    Breakpoint,
    /// A step completed
    Step,
    /// An explicit pause request
    Pause,
}

impl DebugEvent {
    /// Stopped-event reason string for debug adapters
    pub fn reason(&self) -> &'static str {
        match self {
            DebugEvent::Entry => "entry",
            DebugEvent::Breakpoint => "breakpoint",
            DebugEvent::Step => "step",
            DebugEvent::Pause => "pause",
        }
    }
}

/// One local variable in a paused frame
#[derive(Debug, Clone)]
pub struct DebugVariable {
    /// Variable name, or `local_<i>` without debug info
    pub name: String,
    /// Slot relative to the frame base
    pub slot: u16,
    /// Rendered value
    pub value: String,
    /// Rendered type name
    pub type_name: String,
}

/// One frame of a paused stack trace
#[derive(Debug, Clone)]
pub struct DebugFrame {
    /// Function name, or `<top-level>`
    pub function_name: String,
    /// Source file of the frame's body
    pub source_file: String,
    /// Current line in the frame
    pub line: u32,
    /// Position in the trace, 0 = innermost
    pub frame_index: usize,
    /// Locals in scope at the frame's instruction pointer
    pub locals: Vec<DebugVariable>,
}

/// Event callback invoked on the execution thread at every pause
pub type DebugCallback = Box<dyn Fn(DebugEvent, &DebugFrame) + Send + Sync>;

#[derive(Default)]
struct BreakpointTable {
    /// line → breakpoint ids on that line
    by_line: FxHashMap<u32, Vec<u32>>,
    entries: FxHashMap<u32, Breakpoint>,
}

impl BreakpointTable {
    fn insert(&mut self, bp: Breakpoint) {
        self.by_line.entry(bp.line).or_default().push(bp.id);
        self.entries.insert(bp.id, bp);
    }

    fn remove(&mut self, id: u32) -> bool {
        let Some(bp) = self.entries.remove(&id) else {
            return false;
        };
        if let Some(ids) = self.by_line.get_mut(&bp.line) {
            ids.retain(|other| *other != id);
            if ids.is_empty() {
                self.by_line.remove(&bp.line);
            }
        }
        true
    }
}

/// Breakpoint table, step-mode state machine, and pause/resume rendezvous
pub struct DebugController {
    table: RwLock<BreakpointTable>,
    next_breakpoint_id: AtomicU32,

    step_mode: Mutex<StepMode>,
    /// Call depth captured at the last pause, compared by Over/Out
    step_frame_depth: AtomicUsize,
    /// Line captured at the last pause
    step_start_line: AtomicU32,
    /// Line of the previously hooked instruction, for transition detection
    prev_line: AtomicU32,
    /// One-shot: suppress the breakpoint on the current line after resume
    skip_bp_on_resume: AtomicBool,

    pause_requested: AtomicBool,
    paused: AtomicBool,
    blocking_mode: AtomicBool,
    disconnected: AtomicBool,
    break_at_entry: AtomicBool,

    rendezvous: Mutex<()>,
    pause_cv: Condvar,
    resume_cv: Condvar,

    callback: Mutex<Option<DebugCallback>>,
    /// Stack trace captured at the current pause, read by the adapter
    snapshot: Mutex<Vec<DebugFrame>>,
    /// Source reported for bodies compiled without debug info
    default_source: RwLock<String>,
}

impl DebugController {
    /// Create a controller with no breakpoints, non-blocking
    pub fn new() -> Self {
        Self {
            table: RwLock::new(BreakpointTable::default()),
            next_breakpoint_id: AtomicU32::new(1),
            step_mode: Mutex::new(StepMode::None),
            step_frame_depth: AtomicUsize::new(0),
            step_start_line: AtomicU32::new(0),
            prev_line: AtomicU32::new(0),
            skip_bp_on_resume: AtomicBool::new(false),
            pause_requested: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            blocking_mode: AtomicBool::new(false),
            disconnected: AtomicBool::new(false),
            break_at_entry: AtomicBool::new(false),
            rendezvous: Mutex::new(()),
            pause_cv: Condvar::new(),
            resume_cv: Condvar::new(),
            callback: Mutex::new(None),
            snapshot: Mutex::new(Vec::new()),
            default_source: RwLock::new(String::new()),
        }
    }

    // ========================================================================
    // Configuration
    // ========================================================================

    /// In blocking mode the execution thread parks while paused
    pub fn set_blocking(&self, blocking: bool) {
        self.blocking_mode.store(blocking, Ordering::SeqCst);
    }

    /// Install the single event callback
    pub fn set_callback(&self, callback: DebugCallback) {
        *self.callback.lock().unwrap() = Some(callback);
    }

    /// Remove the event callback
    pub fn clear_callback(&self) {
        *self.callback.lock().unwrap() = None;
    }

    /// Source path reported for bodies without debug info
    pub fn set_default_source_file(&self, path: &str) {
        *self.default_source.write() = normalize_path(path);
    }

    /// Pause before the first instruction of the next execution
    pub fn set_break_at_entry(&self, enabled: bool) {
        self.break_at_entry.store(enabled, Ordering::SeqCst);
    }

    // ========================================================================
    // Breakpoint management
    // ========================================================================

    /// Add a breakpoint; an empty source matches any body. Returns its id.
    pub fn add_breakpoint(&self, line: u32, source_file: &str) -> u32 {
        let id = self.next_breakpoint_id.fetch_add(1, Ordering::Relaxed);
        let source_file = if source_file.is_empty() {
            String::new()
        } else {
            normalize_path(source_file)
        };
        self.table.write().insert(Breakpoint {
            id,
            source_file,
            line,
            enabled: true,
            hit_count: 0,
        });
        id
    }

    /// Remove a breakpoint by id
    pub fn remove_breakpoint(&self, id: u32) -> bool {
        self.table.write().remove(id)
    }

    /// Enable or disable a breakpoint
    pub fn enable_breakpoint(&self, id: u32, enabled: bool) {
        if let Some(bp) = self.table.write().entries.get_mut(&id) {
            bp.enabled = enabled;
        }
    }

    /// Remove every breakpoint
    pub fn clear_all_breakpoints(&self) {
        let mut table = self.table.write();
        table.by_line.clear();
        table.entries.clear();
    }

    /// Replace all breakpoints of one source file; returns the new ids in
    /// line order. This is the `setBreakpoints` shape debug adapters send.
    pub fn set_breakpoints_for_source(&self, source_file: &str, lines: &[u32]) -> Vec<u32> {
        let normalized = normalize_path(source_file);
        let stale: Vec<u32> = {
            let table = self.table.read();
            table
                .entries
                .values()
                .filter(|bp| paths_equal(&bp.source_file, &normalized))
                .map(|bp| bp.id)
                .collect()
        };
        {
            let mut table = self.table.write();
            for id in stale {
                table.remove(id);
            }
        }
        lines
            .iter()
            .map(|line| self.add_breakpoint(*line, source_file))
            .collect()
    }

    /// Snapshot of every registered breakpoint
    pub fn breakpoints(&self) -> Vec<Breakpoint> {
        let mut all: Vec<Breakpoint> = self.table.read().entries.values().cloned().collect();
        all.sort_by_key(|bp| bp.id);
        all
    }

    // ========================================================================
    // Execution control (adapter side)
    // ========================================================================

    /// Resume running; the breakpoint on the current line is skipped once
    pub fn resume(&self) {
        self.release_paused(StepMode::None);
    }

    /// Step to the next line at the same or outer depth
    pub fn step_over(&self) {
        self.release_paused(StepMode::Over);
    }

    /// Step to the next line at any depth
    pub fn step_into(&self) {
        self.release_paused(StepMode::Into);
    }

    /// Run until the current frame returns
    pub fn step_out(&self) {
        self.release_paused(StepMode::Out);
    }

    /// Request a pause at the next instruction boundary
    pub fn pause(&self) {
        self.pause_requested.store(true, Ordering::SeqCst);
    }

    /// Detach: the VM halts at the next instruction boundary, resuming it
    /// first when paused
    pub fn disconnect(&self) {
        self.disconnected.store(true, Ordering::SeqCst);
        if self.is_paused() {
            self.resume();
        }
    }

    /// Whether a disconnect was requested
    pub fn disconnect_requested(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }

    /// Whether the execution thread is currently paused
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Block the calling (adapter) thread until the VM pauses
    pub fn wait_until_paused(&self) {
        let mut guard = self.rendezvous.lock().unwrap();
        while !self.paused.load(Ordering::SeqCst) {
            guard = self.pause_cv.wait(guard).unwrap();
        }
    }

    fn release_paused(&self, mode: StepMode) {
        *self.step_mode.lock().unwrap() = mode;
        // One-shot: without this the breakpoint on the current line would
        // re-trigger before execution actually advances.
        self.skip_bp_on_resume.store(true, Ordering::SeqCst);
        if mode == StepMode::None {
            self.pause_requested.store(false, Ordering::SeqCst);
        }
        let _guard = self.rendezvous.lock().unwrap();
        self.paused.store(false, Ordering::SeqCst);
        self.resume_cv.notify_all();
    }

    // ========================================================================
    // Inspection (valid while paused)
    // ========================================================================

    /// Stack trace captured at the current pause, innermost first
    pub fn stack_trace(&self) -> Vec<DebugFrame> {
        self.snapshot.lock().unwrap().clone()
    }

    /// Locals of one captured frame
    pub fn locals(&self, frame_index: usize) -> Vec<DebugVariable> {
        self.snapshot
            .lock()
            .unwrap()
            .get(frame_index)
            .map(|f| f.locals.clone())
            .unwrap_or_default()
    }

    // ========================================================================
    // VM-side hooks (execution thread only)
    // ========================================================================

    /// Called once before the first instruction of an execution
    pub fn on_entry(&self, vm: &Vm) {
        if self.break_at_entry.swap(false, Ordering::SeqCst) {
            self.enter_pause(vm, 0, vm.current_chunk().line_at(0), DebugEvent::Entry);
        }
    }

    /// Instruction-boundary hook: returns true when execution paused
    pub fn on_instruction(&self, vm: &Vm, ip: usize) -> bool {
        let chunk = vm.current_chunk();
        let line = chunk.line_at(ip);
        if line == 0 {
            // No line info; leave prev_line alone so the next mapped line
            // still registers as a transition.
            return false;
        }

        let line_changed = line != self.prev_line.load(Ordering::SeqCst);
        let step_mode = *self.step_mode.lock().unwrap();

        // Fast path: same line, nothing pending.
        if !line_changed
            && !self.pause_requested.load(Ordering::SeqCst)
            && step_mode == StepMode::None
        {
            return false;
        }

        self.prev_line.store(line, Ordering::SeqCst);
        if line_changed {
            self.skip_bp_on_resume.store(false, Ordering::SeqCst);
        }

        let mut should_pause = false;
        let mut event = DebugEvent::Breakpoint;

        if self.pause_requested.swap(false, Ordering::SeqCst) {
            should_pause = true;
            event = DebugEvent::Pause;
        }

        if !should_pause && !self.skip_bp_on_resume.load(Ordering::SeqCst) {
            let source = body_source(chunk, &self.default_source.read());
            if self.check_breakpoint(line, &source) {
                should_pause = true;
                event = DebugEvent::Breakpoint;
            }
        }

        if !should_pause && step_mode != StepMode::None && line_changed {
            let depth = vm.call_frames().len();
            let captured = self.step_frame_depth.load(Ordering::SeqCst);
            let hit = match step_mode {
                StepMode::Into => true,
                StepMode::Over => depth <= captured,
                StepMode::Out => depth < captured,
                StepMode::None => false,
            };
            if hit {
                should_pause = true;
                event = DebugEvent::Step;
                *self.step_mode.lock().unwrap() = StepMode::None;
            }
        }

        if should_pause {
            self.enter_pause(vm, ip, line, event);
            true
        } else {
            false
        }
    }

    fn enter_pause(&self, vm: &Vm, ip: usize, line: u32, event: DebugEvent) {
        // Capture the depth and line every subsequent step compares against.
        self.step_frame_depth
            .store(vm.call_frames().len(), Ordering::SeqCst);
        self.step_start_line.store(line, Ordering::SeqCst);
        self.prev_line.store(line, Ordering::SeqCst);

        let trace = self.build_stack_trace(vm, ip);
        *self.snapshot.lock().unwrap() = trace.clone();
        self.paused.store(true, Ordering::SeqCst);

        {
            let callback = self.callback.lock().unwrap();
            if let (Some(cb), Some(top)) = (callback.as_ref(), trace.first()) {
                cb(event, top);
            }
        }

        if self.blocking_mode.load(Ordering::SeqCst) {
            let mut guard = self.rendezvous.lock().unwrap();
            self.pause_cv.notify_all();
            while self.paused.load(Ordering::SeqCst) {
                guard = self.resume_cv.wait(guard).unwrap();
            }
        }
    }

    fn check_breakpoint(&self, line: u32, source: &str) -> bool {
        let hit_ids: Vec<u32> = {
            let table = self.table.read();
            let Some(ids) = table.by_line.get(&line) else {
                return false;
            };
            ids.iter()
                .filter(|id| {
                    table
                        .entries
                        .get(id)
                        .map(|bp| {
                            bp.enabled
                                && (bp.source_file.is_empty()
                                    || (!source.is_empty()
                                        && paths_equal(&bp.source_file, source)))
                        })
                        .unwrap_or(false)
                })
                .copied()
                .collect()
        };
        if hit_ids.is_empty() {
            return false;
        }
        let mut table = self.table.write();
        for id in hit_ids {
            if let Some(bp) = table.entries.get_mut(&id) {
                bp.hit_count += 1;
            }
        }
        true
    }

    /// Build the stack trace for the current execution point, innermost
    /// frame first, ending with the top-level body.
    fn build_stack_trace(&self, vm: &Vm, ip: usize) -> Vec<DebugFrame> {
        let frames = vm.call_frames();
        let default_source = self.default_source.read().clone();
        let mut trace = Vec::with_capacity(frames.len() + 1);

        for depth in (0..=frames.len()).rev() {
            let (chunk, ctx_ip) = if depth == frames.len() {
                (vm.current_chunk().clone(), ip)
            } else {
                (
                    frames[depth].return_chunk.clone(),
                    frames[depth].return_ip.saturating_sub(1),
                )
            };
            let (function_name, base) = if depth == 0 {
                ("<top-level>".to_string(), 0)
            } else {
                (
                    frames[depth - 1].function_name.clone(),
                    frames[depth - 1].stack_base,
                )
            };
            let region_end = if depth == frames.len() {
                vm.stack().depth()
            } else {
                frames[depth].stack_base.saturating_sub(1)
            };

            trace.push(DebugFrame {
                function_name,
                source_file: body_source(&chunk, &default_source),
                line: chunk.line_at(ctx_ip),
                frame_index: trace.len(),
                locals: collect_locals(vm, &chunk, ctx_ip, base, region_end),
            });
        }
        trace
    }
}

impl Default for DebugController {
    fn default() -> Self {
        Self::new()
    }
}

fn body_source(chunk: &Chunk, default_source: &str) -> String {
    chunk
        .debug_info
        .as_ref()
        .map(|d| d.source_file.as_str())
        .filter(|s| !s.is_empty())
        .map(normalize_path)
        .unwrap_or_else(|| default_source.to_string())
}

fn collect_locals(
    vm: &Vm,
    chunk: &Chunk,
    ip: usize,
    base: usize,
    region_end: usize,
) -> Vec<DebugVariable> {
    match &chunk.debug_info {
        Some(debug) => debug
            .locals
            .iter()
            .filter(|l| {
                (l.scope_start as usize) <= ip
                    && (l.scope_end == 0 || ip < l.scope_end as usize)
            })
            .filter_map(|l| {
                let v = vm.stack().get_at(base + l.slot as usize).ok()?;
                Some(DebugVariable {
                    name: l.name.clone(),
                    slot: l.slot,
                    value: vm.heap().value_to_string(v),
                    type_name: vm.heap().value_type_name(v),
                })
            })
            .collect(),
        None => {
            let end = region_end.min(vm.stack().depth());
            (base..end)
                .map(|slot| {
                    let v = vm.stack().get_at(slot).unwrap_or(Value::Null);
                    DebugVariable {
                        name: format!("local_{}", slot - base),
                        slot: (slot - base) as u16,
                        value: vm.heap().value_to_string(v),
                        type_name: vm.heap().value_type_name(v),
                    }
                })
                .collect()
        }
    }
}

/// Canonicalize a path for breakpoint matching
fn normalize_path(p: &str) -> String {
    match std::fs::canonicalize(p) {
        Ok(canonical) => canonical.to_string_lossy().into_owned(),
        Err(_) => p.replace('\\', "/"),
    }
}

#[cfg(windows)]
fn paths_equal(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.chars().zip(b.chars()).all(|(ca, cb)| {
        let ca = if ca == '/' { '\\' } else { ca };
        let cb = if cb == '/' { '\\' } else { cb };
        ca.eq_ignore_ascii_case(&cb)
    })
}

#[cfg(not(windows))]
fn paths_equal(a: &str, b: &str) -> bool {
    a == b
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_remove_breakpoint() {
        let controller = DebugController::new();

        let id = controller.add_breakpoint(5, "");
        assert_eq!(id, 1);
        assert_eq!(controller.breakpoints().len(), 1);

        assert!(controller.remove_breakpoint(id));
        assert!(!controller.remove_breakpoint(id));
        assert!(controller.breakpoints().is_empty());
    }

    #[test]
    fn test_breakpoint_line_matching() {
        let controller = DebugController::new();
        controller.add_breakpoint(3, "");

        assert!(controller.check_breakpoint(3, "anything"));
        assert!(!controller.check_breakpoint(4, "anything"));
    }

    #[test]
    fn test_breakpoint_source_matching() {
        let controller = DebugController::new();
        controller.add_breakpoint(3, "a/main.slate");

        // A source-specific breakpoint does not match an unknown body.
        assert!(!controller.check_breakpoint(3, ""));
        assert!(controller.check_breakpoint(3, "a/main.slate"));
        assert!(!controller.check_breakpoint(3, "b/other.slate"));
    }

    #[test]
    fn test_breakpoint_hit_count() {
        let controller = DebugController::new();
        let id = controller.add_breakpoint(7, "");

        assert!(controller.check_breakpoint(7, ""));
        assert!(controller.check_breakpoint(7, ""));
        let bp = controller
            .breakpoints()
            .into_iter()
            .find(|bp| bp.id == id)
            .unwrap();
        assert_eq!(bp.hit_count, 2);
    }

    #[test]
    fn test_disabled_breakpoint_never_matches() {
        let controller = DebugController::new();
        let id = controller.add_breakpoint(2, "");
        controller.enable_breakpoint(id, false);

        assert!(!controller.check_breakpoint(2, ""));

        controller.enable_breakpoint(id, true);
        assert!(controller.check_breakpoint(2, ""));
    }

    #[test]
    fn test_set_breakpoints_for_source_replaces() {
        let controller = DebugController::new();
        controller.add_breakpoint(1, "x.slate");
        controller.add_breakpoint(2, "x.slate");
        controller.add_breakpoint(9, "y.slate");

        let ids = controller.set_breakpoints_for_source("x.slate", &[4, 5]);
        assert_eq!(ids.len(), 2);

        let remaining = controller.breakpoints();
        assert_eq!(remaining.len(), 3);
        let lines: Vec<u32> = remaining.iter().map(|bp| bp.line).collect();
        assert!(lines.contains(&4));
        assert!(lines.contains(&5));
        assert!(lines.contains(&9));
        assert!(!lines.contains(&1));
    }

    #[test]
    fn test_resume_sets_skip_flag_and_clears_pause() {
        let controller = DebugController::new();
        controller.pause();
        assert!(controller.pause_requested.load(Ordering::SeqCst));

        controller.resume();
        assert!(!controller.pause_requested.load(Ordering::SeqCst));
        assert!(controller.skip_bp_on_resume.load(Ordering::SeqCst));
        assert_eq!(*controller.step_mode.lock().unwrap(), StepMode::None);
    }

    #[test]
    fn test_step_commands_set_modes() {
        let controller = DebugController::new();
        controller.step_over();
        assert_eq!(*controller.step_mode.lock().unwrap(), StepMode::Over);
        controller.step_into();
        assert_eq!(*controller.step_mode.lock().unwrap(), StepMode::Into);
        controller.step_out();
        assert_eq!(*controller.step_mode.lock().unwrap(), StepMode::Out);
    }

    #[test]
    fn test_disconnect_resumes_paused_vm() {
        let controller = DebugController::new();
        controller.paused.store(true, Ordering::SeqCst);

        controller.disconnect();
        assert!(controller.disconnect_requested());
        assert!(!controller.is_paused());
    }
}
