use super::{value::Value, RuntimeError, RuntimeResult};
use crate::compiler::chunk::Chunk;
use crate::memory::{Closure, Function, Handle, Key};

/// One active call. A view into the shared stack: local slot `i` lives at
/// `stack_base + i`.
#[derive(Clone)]
pub struct CallFrame {
    pub closure: Handle<Closure>,
    pub(super) ip: usize,
    pub(super) stack_base: usize,
}

impl CallFrame {
    pub(super) fn new(closure: Handle<Closure>, stack_base: usize) -> Self {
        Self {
            closure,
            ip: 0,
            stack_base,
        }
    }

    pub(super) fn next_instruction(&mut self) -> RuntimeResult<u8> {
        let byte = self
            .chunk()
            .code
            .get(self.ip)
            .copied()
            .ok_or(RuntimeError::EndOfCode)?;
        self.ip += 1;
        Ok(byte)
    }

    pub(super) fn next_instruction_as_constant(&mut self) -> RuntimeResult<Value> {
        let index = self.next_instruction()? as usize;
        self.chunk()
            .constants
            .get(index)
            .cloned()
            .ok_or(RuntimeError::EndOfCode)
    }

    pub(super) fn next_instruction_as_key(&mut self) -> RuntimeResult<Handle<Key>> {
        match self.next_instruction_as_constant()? {
            Value::Key(key) => Ok(key),
            other => Err(RuntimeError::TypeError(format!(
                "Expected an identifier constant, got {}.",
                other.type_name()
            ))),
        }
    }

    /// Reads a big-endian 16-bit operand.
    pub(super) fn next_instruction_as_jump(&mut self) -> RuntimeResult<usize> {
        let b0 = self.next_instruction()? as usize;
        let b1 = self.next_instruction()? as usize;
        Ok(b0 << 8 | b1)
    }

    pub(super) fn function(&self) -> &Function {
        self.closure.function.as_ref()
    }

    pub(super) fn chunk(&self) -> &Chunk {
        &self.closure.function.chunk
    }

    /// Source line of the instruction executed last.
    pub(super) fn line(&self) -> u64 {
        self.chunk().line(self.ip.saturating_sub(1))
    }
}
