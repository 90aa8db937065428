//! Sampling profiler: installs a `SIGPROF` timer at a configurable rate, and
//! on each tick maps the sampled PC to a debug-map entry and increments the
//! corresponding AST node's `profile_samples`.
//!
//! Built directly on `libc::sigaction`/`setitimer` rather than a higher-level
//! wrapper crate. The signal handler needs process-wide access to the
//! profiler's state, which lives in a single `AtomicPtr`, null when not
//! profiling.

use std::sync::atomic::{AtomicPtr, AtomicU64, Ordering};

use crate::ast::{AstNode, Block};
use crate::debug_map::DebugMap;
use crate::error::SystemError;

/// Default sampling rate.
pub const DEFAULT_SAMPLE_RATE_HZ: u32 = 1000;

/// State the signal handler reads. Every field is either immutable for the
/// duration of profiling (`code_start`/`code_end`/`debug_map`) or written
/// only by the handler itself (`profile_samples` on the AST, via
/// `record`), so the handler never needs a lock.
struct ProfilerState {
    code_start: usize,
    code_end: usize,
    debug_map: *const DebugMap,
    /// The AST root, to resolve a `(line, column)` back to a node. Raw
    /// pointer because the handler runs without access to safe borrows.
    ast_root: *const Block,
    total_samples: AtomicU64,
}

// The handler only ever dereferences `debug_map`/`ast_root` for reads while
// `Profiler::start`'s caller keeps the referenced `Block`/`DebugMap` alive
// for as long as profiling runs (enforced by Profiler's lifetime borrow).
unsafe impl Send for ProfilerState {}
unsafe impl Sync for ProfilerState {}

static ACTIVE: AtomicPtr<ProfilerState> = AtomicPtr::new(std::ptr::null_mut());

/// A running (or stopped) profiler. Dropping it without calling `stop`
/// leaks the installed signal handler in place, so the driver always calls
/// `stop` explicitly before tearing down the AST/code buffer it points at.
pub struct Profiler {
    state: Box<ProfilerState>,
    rate_hz: u32,
}

impl Profiler {
    /// Install the `SIGPROF` handler and arm `ITIMER_PROF` at `rate_hz`.
    /// `code_range` is `[code_start, code_end)`, used to discard samples
    /// landing outside the JIT-compiled function.
    ///
    /// # Safety
    /// `ast_root` and `debug_map` must remain valid and unmoved for as long
    /// as the returned `Profiler` is alive; the caller (the driver) owns
    /// both for the duration of the JIT call this profiles.
    pub unsafe fn start(
        code_range: (usize, usize),
        debug_map: &DebugMap,
        ast_root: &Block,
        rate_hz: u32,
    ) -> Result<Self, SystemError> {
        let state = Box::new(ProfilerState {
            code_start: code_range.0,
            code_end: code_range.1,
            debug_map: debug_map as *const DebugMap,
            ast_root: ast_root as *const Block,
            total_samples: AtomicU64::new(0),
        });
        let state_ptr = Box::into_raw(state);

        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = handle_sigprof as usize;
        action.sa_flags = libc::SA_SIGINFO | libc::SA_RESTART;
        libc::sigemptyset(&mut action.sa_mask);

        if libc::sigaction(libc::SIGPROF, &action, std::ptr::null_mut()) != 0 {
            let _ = Box::from_raw(state_ptr); // reclaim before erroring out
            return Err(SystemError::SignalInstall(std::io::Error::last_os_error()));
        }

        ACTIVE.store(state_ptr, Ordering::SeqCst);

        let interval_us = 1_000_000 / rate_hz.max(1) as i64;
        let interval = libc::timeval {
            tv_sec: interval_us / 1_000_000,
            tv_usec: interval_us % 1_000_000,
        };
        let timer = libc::itimerval {
            it_interval: interval,
            it_value: interval,
        };
        if libc::setitimer(libc::ITIMER_PROF, &timer, std::ptr::null_mut()) != 0 {
            ACTIVE.store(std::ptr::null_mut(), Ordering::SeqCst);
            let _ = Box::from_raw(state_ptr);
            return Err(SystemError::TimerSetup(std::io::Error::last_os_error()));
        }

        Ok(Profiler {
            // SAFETY: state_ptr was produced by Box::into_raw above and is
            // uniquely owned again here; ACTIVE only ever aliases it for
            // reads from the signal handler.
            state: Box::from_raw(state_ptr),
            rate_hz,
        })
    }

    pub fn sample_rate_hz(&self) -> u32 {
        self.rate_hz
    }

    pub fn total_samples(&self) -> u64 {
        self.state.total_samples.load(Ordering::SeqCst)
    }

    /// Disable the timer and restore default `SIGPROF` handling. Idempotent:
    /// calling `stop` twice is harmless because the second call finds
    /// `ACTIVE` already cleared.
    pub fn stop(&mut self) {
        let disarm = libc::itimerval {
            it_interval: libc::timeval { tv_sec: 0, tv_usec: 0 },
            it_value: libc::timeval { tv_sec: 0, tv_usec: 0 },
        };
        unsafe {
            libc::setitimer(libc::ITIMER_PROF, &disarm, std::ptr::null_mut());
            libc::signal(libc::SIGPROF, libc::SIG_DFL);
        }
        ACTIVE.store(std::ptr::null_mut(), Ordering::SeqCst);
    }
}

impl Drop for Profiler {
    fn drop(&mut self) {
        self.stop();
    }
}

/// The `SIGPROF` handler. Async-signal-safe: no allocation, no locking, only
/// reads of fields fixed for the profiling session and a single atomic
/// increment plus a non-atomic `Cell` write on the sampled node. The
/// non-atomic write is sound because the main thread is suspended for the
/// handler's entire execution.
extern "C" fn handle_sigprof(
    _signum: libc::c_int,
    _info: *mut libc::siginfo_t,
    ctx: *mut libc::c_void,
) {
    let state_ptr = ACTIVE.load(Ordering::SeqCst);
    if state_ptr.is_null() {
        return;
    }
    // SAFETY: state_ptr is non-null only while a `Profiler` keeps the boxed
    // `ProfilerState` alive and its referents valid.
    let state = unsafe { &*state_ptr };

    let pc = match program_counter(ctx) {
        Some(pc) => pc,
        None => return,
    };
    if pc < state.code_start || pc >= state.code_end {
        return;
    }
    let pc_offset = pc - state.code_start;

    // SAFETY: debug_map/ast_root point at objects the caller of `start` kept
    // alive for the profiler's lifetime.
    let debug_map = unsafe { &*state.debug_map };
    let ast_root = unsafe { &*state.ast_root };

    if let Some(entry) = debug_map.nearest_preceding(pc_offset) {
        if let Some(node) = AstNode::find_by_location(ast_root, entry.line, entry.column) {
            node.profile_samples.set(node.profile_samples.get() + 1);
            state.total_samples.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Extract the program counter from the signal's `ucontext_t`. Linux-only;
/// the register slot differs by architecture.
#[cfg(target_arch = "x86_64")]
fn program_counter(ctx: *mut libc::c_void) -> Option<usize> {
    const REG_RIP: usize = 16;
    let ctx = ctx as *mut libc::ucontext_t;
    // SAFETY: called only from within the SIGPROF handler, where `ctx` is
    // the third argument the kernel provides to an SA_SIGINFO handler.
    unsafe { Some((*ctx).uc_mcontext.gregs[REG_RIP] as usize) }
}

#[cfg(target_arch = "aarch64")]
fn program_counter(ctx: *mut libc::c_void) -> Option<usize> {
    let ctx = ctx as *mut libc::ucontext_t;
    // SAFETY: same as the x86-64 arm; `pc` is glibc's aarch64 `mcontext_t`
    // field name for the saved program counter.
    unsafe { Some((*ctx).uc_mcontext.pc as usize) }
}

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
fn program_counter(_ctx: *mut libc::c_void) -> Option<usize> {
    None
}

/// Folded-stack output: one line per non-`Loop` node with a nonzero sample
/// count, prefixed by the semicolon-joined chain of enclosing `Loop` nodes
/// (outermost first), followed by the sample count.
pub fn write_folded_stacks<W: std::io::Write>(block: &Block, out: &mut W) -> std::io::Result<()> {
    let mut stack = Vec::new();
    let mut records = Vec::new();
    AstNode::folded_stacks(block, &mut stack, &mut records);

    for (frames, samples) in records {
        let rendered: Vec<String> = frames
            .iter()
            .map(|n| format!("@{}:{} {}", n.loc.line, n.loc.column, n.type_name()))
            .collect();
        writeln!(out, "{} {}", rendered.join(";"), samples)?;
    }
    Ok(())
}

/// Heat classification relative to the maximum sample count across all
/// nodes, for the heat-map tree view: HOT/WARM/COOL/LOW.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Heat {
    Hot,
    Warm,
    Cool,
    Low,
}

pub fn classify_heat(samples: u64, max_samples: u64) -> Heat {
    if max_samples == 0 {
        return Heat::Low;
    }
    let ratio = samples as f64 / max_samples as f64;
    if ratio >= 0.75 {
        Heat::Hot
    } else if ratio >= 0.5 {
        Heat::Warm
    } else if ratio >= 0.25 {
        Heat::Cool
    } else {
        Heat::Low
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heat_buckets_scale_to_the_maximum() {
        assert_eq!(classify_heat(100, 100), Heat::Hot);
        assert_eq!(classify_heat(60, 100), Heat::Warm);
        assert_eq!(classify_heat(30, 100), Heat::Cool);
        assert_eq!(classify_heat(1, 100), Heat::Low);
        assert_eq!(classify_heat(0, 0), Heat::Low);
    }
}
