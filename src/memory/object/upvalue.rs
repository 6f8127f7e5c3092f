use std::cell::RefCell;
use std::fmt;

use crate::vm::value::Value;

#[derive(Debug, Clone)]
pub enum UpvalueState {
    /// Points at a live stack slot.
    Open(usize),

    /// The slot was popped and the upvalue owns the value now.
    Closed(Value),
}

/// Holds a variable captured by one closure. While open, every upvalue on
/// the same slot reads and writes the stack, so the closures see each other's
/// writes. Once closed the upvalue owns its own copy.
pub struct Upvalue {
    state: RefCell<UpvalueState>,
}

impl Upvalue {
    pub fn new(slot: usize) -> Self {
        Self {
            state: RefCell::new(UpvalueState::Open(slot)),
        }
    }

    /// The stack slot while the upvalue is open.
    pub fn open_slot(&self) -> Option<usize> {
        match &*self.state.borrow() {
            UpvalueState::Open(slot) => Some(*slot),
            UpvalueState::Closed(_) => None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.open_slot().is_some()
    }

    /// Moves `value` into the upvalue. Closing happens exactly once.
    pub fn close(&self, value: Value) {
        debug_assert!(self.is_open(), "upvalue closed twice");
        self.state.replace(UpvalueState::Closed(value));
    }

    pub fn get(&self, stack: &[Value]) -> Value {
        match &*self.state.borrow() {
            UpvalueState::Open(slot) => stack[*slot].clone(),
            UpvalueState::Closed(value) => value.clone(),
        }
    }

    pub fn set(&self, stack: &mut [Value], value: Value) {
        let mut state = self.state.borrow_mut();
        match &mut *state {
            UpvalueState::Open(slot) => stack[*slot] = value,
            UpvalueState::Closed(closed) => *closed = value,
        }
    }
}

impl fmt::Debug for Upvalue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.state.borrow() {
            UpvalueState::Open(slot) => write!(f, "Upvalue::Open({})", slot),
            UpvalueState::Closed(_) => write!(f, "Upvalue::Closed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_reads_through_the_stack() {
        let mut stack = vec![Value::Number(1.0), Value::Number(2.0)];
        let upvalue = Upvalue::new(1);
        assert_eq!(upvalue.get(&stack).as_number(), Some(2.0));
        upvalue.set(&mut stack, Value::Number(5.0));
        assert_eq!(stack[1].as_number(), Some(5.0));
    }

    #[test]
    fn closed_owns_its_value() {
        let mut stack = vec![Value::Number(1.0)];
        let upvalue = Upvalue::new(0);
        upvalue.close(stack[0].clone());
        stack[0] = Value::Null;
        assert!(!upvalue.is_open());
        assert_eq!(upvalue.get(&stack).as_number(), Some(1.0));
        upvalue.set(&mut stack, Value::Number(3.0));
        assert_eq!(upvalue.get(&stack).as_number(), Some(3.0));
        assert!(stack[0].is_null());
    }
}
