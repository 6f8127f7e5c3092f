pub mod chunk;
pub mod compiler;
mod rle;
mod scanner;
mod token;
mod util;

use thiserror::Error;

pub use compiler::Compiler;
pub use scanner::ScannerError;

pub type Result<T> = std::result::Result<T, CompileError>;

#[derive(Debug, Clone, Error)]
pub enum CompileError {
    #[error("{}", .0.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("\n"))]
    Failed(Vec<CompileError>),

    /// A diagnostic with its position, `at` is `" at 'lexeme'"`, `" at end"` or empty.
    #[error("[{}:{}:{}] Error{}: {}", .file, .line, .column, .at, .inner)]
    At {
        file: String,
        line: u64,
        column: u64,
        at: String,
        inner: Box<CompileError>,
    },

    #[error("{}", .0)]
    ScannerError(#[from] ScannerError),

    #[error("Invalid number literal: {}", .0)]
    ParseFloatError(#[from] std::num::ParseFloatError),

    #[error("{}", .0)]
    Expected(&'static str),

    #[error("Expect expression.")]
    ExpectExpression,

    #[error("Invalid assignment target.")]
    InvalidAssignment,

    #[error("Too many local variables in function.")]
    LocalCount,

    #[error("Too many closure variables in function.")]
    UpvalueCount,

    #[error("Too many constants in one chunk.")]
    ConstantCount,

    #[error("Can't have more than 255 parameters.")]
    ParameterCount,

    #[error("Can't have more than 255 arguments.")]
    ArgumentCount,

    #[error("Too many elements in a literal.")]
    ElementCount,

    #[error("Cannot jump more than 2^16 bytes.")]
    InvalidJump,

    #[error("Too many branches in one function.")]
    CaseCount,

    #[error("Variable '{}' already declared in this scope.", .0)]
    VariableAlreadyDeclared(String),

    #[error("Cannot read local variable in its own initializer.")]
    LocalInitializer,

    #[error("Cannot use 'this' outside of a class.")]
    InvalidThis,

    #[error("Cannot return from top-level code.")]
    ReturnFromScript,

    #[error("Cannot return a value from an initializer.")]
    ReturnFromInitializer,

    #[error("Invalid escape sequence '\\{}'.", .0)]
    InvalidEscape(char),

    #[error("Could not find token while parsing (should not happen)")]
    TokenNotFound,
}

impl CompileError {
    /// The located diagnostics contained in this error.
    pub fn diagnostics(&self) -> Vec<&CompileError> {
        match self {
            CompileError::Failed(errors) => errors.iter().flat_map(|e| e.diagnostics()).collect(),
            other => vec![other],
        }
    }
}
