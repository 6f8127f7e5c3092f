use super::Key;
use crate::compiler::chunk::Chunk;
use crate::memory::Handle;
use std::fmt;

/// A compiled function. Immutable once the compiler hands it over.
#[derive(Debug)]
pub struct Function {
    /// `None` for the top-level script.
    pub name: Option<Handle<Key>>,
    pub arity: u8,
    pub chunk: Chunk,
    pub upvalue_count: usize,
}

impl Function {
    pub fn script() -> Self {
        Self {
            name: None,
            arity: 0,
            chunk: Chunk::new(),
            upvalue_count: 0,
        }
    }

    pub fn new(name: Handle<Key>) -> Self {
        Self {
            name: Some(name),
            arity: 0,
            chunk: Chunk::new(),
            upvalue_count: 0,
        }
    }

    pub fn function_name(&self) -> String {
        match &self.name {
            Some(name) => name.to_text(),
            None => "script".to_owned(),
        }
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "<fn {}>", name),
            None => write!(f, "<script>"),
        }
    }
}
