use crate::debug;
use crate::memory::alloc::DEFAULT_RESERVATION_SIZE;

/// Maximum number of nested calls before a stack overflow is reported.
pub const DEFAULT_MAX_FRAMES: usize = 500;

/// Run-time settings of a VM. The logging flags default to the constants in
/// `debug`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub max_frames: usize,

    /// Size of each region the allocator requests from the system.
    pub reservation_size: usize,

    /// Total bytes the allocator may reserve, unbounded when `None`.
    pub heap_limit: Option<usize>,

    pub trace_execution: bool,
    pub trace_stack: bool,
    pub log_compiler: bool,
    pub log_compiled_code: bool,
    pub log_heap: bool,
    pub log_modules: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_frames: DEFAULT_MAX_FRAMES,
            reservation_size: DEFAULT_RESERVATION_SIZE,
            heap_limit: None,
            trace_execution: debug::TRACE_EXECUTION_INSTR,
            trace_stack: debug::TRACE_EXECUTION_STACK,
            log_compiler: debug::LOG_COMPILER,
            log_compiled_code: debug::LOG_COMPILED_CODE,
            log_heap: debug::LOG_HEAP,
            log_modules: debug::LOG_MODULES,
        }
    }
}
