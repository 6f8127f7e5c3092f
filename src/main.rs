#![warn(rust_2018_idioms)]

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process;

use clap::Parser;
use kestrel::config::{Config, DEFAULT_MAX_FRAMES};
use kestrel::vm::{InterpretResult, VMError, VM};

/// Exit code for invalid command line usage.
const EXIT_USAGE: i32 = 64;

#[derive(clap::Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Script to run, starts a REPL when omitted
    #[clap(value_parser)]
    pub file: Option<PathBuf>,

    /// Trace every executed instruction
    #[arg(long, default_value_t = false)]
    pub trace: bool,

    /// Print the stack before every instruction
    #[arg(long, default_value_t = false)]
    pub trace_stack: bool,

    /// Print the bytecode of every compiled function
    #[arg(long, default_value_t = false)]
    pub disassemble: bool,

    /// Log compiler progress
    #[arg(long, default_value_t = false)]
    pub log_compiler: bool,

    /// Log allocations and frees
    #[arg(long, default_value_t = false)]
    pub log_heap: bool,

    /// Log module loading
    #[arg(long, default_value_t = false)]
    pub log_modules: bool,

    /// Maximum call depth
    #[arg(long, default_value_t = DEFAULT_MAX_FRAMES)]
    pub max_frames: usize,

    /// Maximum number of bytes the heap may reserve
    #[arg(long)]
    pub heap_limit: Option<usize>,
}

impl Args {
    fn config(&self) -> Config {
        let defaults = Config::default();
        Config {
            max_frames: self.max_frames,
            heap_limit: self.heap_limit,
            trace_execution: self.trace || defaults.trace_execution,
            trace_stack: self.trace_stack || defaults.trace_stack,
            log_compiler: self.log_compiler || defaults.log_compiler,
            log_compiled_code: self.disassemble || defaults.log_compiled_code,
            log_heap: self.log_heap || defaults.log_heap,
            log_modules: self.log_modules || defaults.log_modules,
            ..defaults
        }
    }
}

fn main() {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            let code = if err.use_stderr() { EXIT_USAGE } else { 0 };
            let _ = err.print();
            process::exit(code);
        }
    };

    let mut vm = VM::with_config(args.config());
    let result = match &args.file {
        Some(path) => run_file(&mut vm, path),
        None => repl(&mut vm),
    };
    process::exit(result.exit_code());
}

fn run_file(vm: &mut VM, path: &Path) -> InterpretResult {
    let result = vm.load_module(path);
    // Compile and runtime errors are printed by the VM itself.
    if let Err(err @ VMError::Io { .. }) = &result {
        eprintln!("{}", err);
    }
    InterpretResult::from(&result)
}

/// Reads one line at a time. Errors are reported and the session goes on.
fn repl(vm: &mut VM) -> InterpretResult {
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("> ");
        if io::stdout().flush().is_err() {
            return InterpretResult::IoError;
        }

        match lines.next() {
            Some(Ok(line)) => {
                // Diagnostics are already printed by the VM.
                let _ = vm.interpret(&line);
            }
            Some(Err(err)) => {
                eprintln!("{}", err);
                return InterpretResult::IoError;
            }
            None => {
                println!();
                return InterpretResult::Ok;
            }
        }
    }
}
