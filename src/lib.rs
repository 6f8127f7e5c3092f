#![warn(rust_2018_idioms)]

//! A bytecode interpreter for a small class-based scripting language,
//! with its objects placed by a free-list allocator.

pub mod compiler;
pub mod config;
pub mod debug;
pub mod memory;
pub mod vm;

pub use config::Config;
pub use vm::{InterpretResult, VMError, VM};
