use crate::compiler::CompileError;
use std::path::PathBuf;
use thiserror::Error;

mod call_frame;
pub mod instruction;
pub mod native;
mod stack;
pub mod value;
pub mod vm;

pub use call_frame::CallFrame;
pub use stack::Stack;
pub use vm::VM;

pub type Result<T> = std::result::Result<T, VMError>;

pub(crate) type RuntimeResult<T> = std::result::Result<T, RuntimeError>;

#[derive(Debug, Error)]
pub enum VMError {
    #[error("{}", .0)]
    CompileError(#[from] CompileError),

    #[error("{}", .error)]
    RuntimeError {
        error: RuntimeError,
        /// Innermost frame first.
        trace: Vec<String>,
    },

    #[error("Could not read '{}': {}", .path.display(), .source)]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuntimeError {
    #[error("{}", .0)]
    TypeError(String),

    #[error("Division by zero.")]
    DivisionByZero,

    #[error("Can only call functions and classes.")]
    NotCallable,

    #[error("Expected {} arguments but got {}.", .expected, .got)]
    Arity { expected: u8, got: u8 },

    #[error("Stack overflow.")]
    StackOverflow,

    #[error("Undefined variable '{}'.", .0)]
    UndefinedVariable(String),

    #[error("Undefined property '{}'.", .0)]
    UndefinedProperty(String),

    #[error("Only instances and tables have properties, got {}.", .0)]
    NoProperties(&'static str),

    #[error("Index {} out of bounds for length {}.", .index, .len)]
    IndexOutOfBounds { index: f64, len: usize },

    #[error("Cannot index {} with {}.", .target, .index)]
    InvalidIndex {
        target: &'static str,
        index: &'static str,
    },

    #[error("Could not import '{}': {}", .path, .reason)]
    Import { path: String, reason: String },

    #[error("Unknown opcode {}.", .0)]
    InvalidOpcode(u8),

    #[error("Trying to access empty stack.")]
    EmptyStack,

    #[error("Trying to access empty list of call frames.")]
    NoCallFrame,

    #[error("Instruction stream ended unexpectedly.")]
    EndOfCode,

    #[error("Could not write output: {}", .0)]
    Output(String),
}

/// Outcome of running a program, as reported to the embedding host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterpretResult {
    Ok,
    CompileError,
    RuntimeError,
    IoError,
}

impl InterpretResult {
    /// Process exit code for this outcome.
    pub fn exit_code(self) -> i32 {
        match self {
            InterpretResult::Ok => 0,
            InterpretResult::CompileError => 65,
            InterpretResult::RuntimeError => 70,
            InterpretResult::IoError => 74,
        }
    }
}

impl<T> From<&Result<T>> for InterpretResult {
    fn from(result: &Result<T>) -> Self {
        match result {
            Ok(_) => InterpretResult::Ok,
            Err(VMError::CompileError(_)) => InterpretResult::CompileError,
            Err(VMError::RuntimeError { .. }) => InterpretResult::RuntimeError,
            Err(VMError::Io { .. }) => InterpretResult::IoError,
        }
    }
}
