use std::mem::size_of;

use super::{value::Value, RuntimeError, RuntimeResult};
use crate::memory::{Block, Heap};

const INITIAL_CAPACITY: usize = 256;

/// The execution stack. Its backing block is resized through the allocator
/// whenever the capacity doubles.
pub struct Stack {
    values: Vec<Value>,
    block: Block,
}

impl Stack {
    pub fn new(heap: &Heap) -> Self {
        Self {
            values: Vec::with_capacity(INITIAL_CAPACITY),
            block: Block::new(heap.allocator(), INITIAL_CAPACITY * size_of::<Value>()),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.values.capacity()
    }

    pub fn push(&mut self, value: Value) {
        if self.values.len() == self.values.capacity() {
            let capacity = (self.values.capacity() * 2).max(INITIAL_CAPACITY);
            self.values.reserve_exact(capacity - self.values.len());
            self.block.resize(capacity * size_of::<Value>());
        }
        self.values.push(value);
    }

    pub fn pop(&mut self) -> RuntimeResult<Value> {
        self.values.pop().ok_or(RuntimeError::EmptyStack)
    }

    /// Removes the top `n` values, returning them bottom first.
    pub fn popn(&mut self, n: usize) -> RuntimeResult<Vec<Value>> {
        if n > self.values.len() {
            return Err(RuntimeError::EmptyStack);
        }
        let at = self.values.len() - n;
        Ok(self.values.split_off(at))
    }

    /// The value `depth` slots below the top.
    pub fn peek(&self, depth: usize) -> RuntimeResult<&Value> {
        self.values
            .len()
            .checked_sub(depth + 1)
            .and_then(|index| self.values.get(index))
            .ok_or(RuntimeError::EmptyStack)
    }

    pub fn peek_mut(&mut self, depth: usize) -> RuntimeResult<&mut Value> {
        let index = self
            .values
            .len()
            .checked_sub(depth + 1)
            .ok_or(RuntimeError::EmptyStack)?;
        Ok(&mut self.values[index])
    }

    pub fn get(&self, index: usize) -> RuntimeResult<&Value> {
        self.values.get(index).ok_or(RuntimeError::EmptyStack)
    }

    pub fn set(&mut self, index: usize, value: Value) -> RuntimeResult<()> {
        let slot = self.values.get_mut(index).ok_or(RuntimeError::EmptyStack)?;
        let old = std::mem::replace(slot, value);
        old.free();
        Ok(())
    }

    pub fn truncate(&mut self, len: usize) {
        self.values.truncate(len);
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    pub fn as_slice(&self) -> &[Value] {
        &self.values
    }

    pub fn as_mut_slice(&mut self) -> &mut [Value] {
        &mut self.values
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Value> {
        self.values.iter()
    }
}
