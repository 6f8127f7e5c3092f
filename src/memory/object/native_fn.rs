use std::fmt;

use super::Key;
use crate::{
    memory::{Handle, Heap},
    vm::value::Value,
};

/// Type all native functions are expected to have. A native that cannot
/// produce a result returns `Value::Null`.
pub type NativeFunction = fn(&Heap, &[Value]) -> Value;

/// A native function is a rust function that can be called from a script.
pub struct NativeFn {
    /// Name of the native function.
    pub name: Handle<Key>,

    /// Expected argument count, `None` accepts any number.
    pub arity: Option<u8>,

    /// The actual function to call.
    pub fun: NativeFunction,
}

impl NativeFn {
    pub fn new(name: Handle<Key>, arity: Option<u8>, fun: NativeFunction) -> Self {
        Self { name, arity, fun }
    }
}

impl fmt::Debug for NativeFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<native fn {}>", self.name)
    }
}

impl fmt::Display for NativeFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<native fn {}>", self.name)
    }
}
