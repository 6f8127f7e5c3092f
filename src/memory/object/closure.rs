use super::{Function, Upvalue};
use crate::memory::Handle;
use std::fmt;

/// A function paired with the variables it captured.
pub struct Closure {
    pub function: Handle<Function>,
    pub upvalues: Vec<Handle<Upvalue>>,
}

impl Closure {
    pub fn new(function: Handle<Function>, upvalues: Vec<Handle<Upvalue>>) -> Self {
        debug_assert_eq!(function.upvalue_count, upvalues.len());
        Self { function, upvalues }
    }
}

impl fmt::Debug for Closure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Closure {{ function: {}, upvalues: {} }}",
            self.function.as_ref(),
            self.upvalues.len()
        )
    }
}

impl fmt::Display for Closure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.function.as_ref())
    }
}
