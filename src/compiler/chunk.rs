use super::rle::RLE;
use crate::vm::{instruction::*, value::Value};

/// Largest constant pool a chunk can address with a one-byte operand.
pub const MAX_CONSTANTS: usize = 256;

/// Instruction bytes, with per-byte line and column tables, the constant
/// pool and the absolute targets used by `OP_JMPL`.
#[derive(Debug, Default, Clone)]
pub struct Chunk {
    pub code: Vec<u8>,
    pub constants: Vec<Value>,
    pub lines: RLE<u64>,
    pub columns: RLE<u64>,
    pub cases: Vec<usize>,
}

impl Chunk {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(&mut self, op_code: OpCode, line: u64, column: u64) {
        self.write_byte(op_code.into(), line, column);
    }

    pub fn write_byte(&mut self, byte: u8, line: u64, column: u64) {
        self.code.push(byte);
        self.lines.push(line);
        self.columns.push(column);
    }

    pub fn write_index(&mut self, op_code: OpCode, index: u8, line: u64, column: u64) {
        self.write(op_code, line, column);
        self.write_byte(index, line, column);
    }

    /// Adds `constant` to the pool, returning its index, or `None` when the
    /// pool is full.
    pub fn add_constant(&mut self, constant: Value) -> Option<u8> {
        if self.constants.len() >= MAX_CONSTANTS {
            return None;
        }
        self.constants.push(constant);
        Some((self.constants.len() - 1) as u8)
    }

    /// Reserves a slot in the cases table, patched later with `patch_case`.
    pub fn add_case(&mut self) -> usize {
        self.cases.push(usize::MAX);
        self.cases.len() - 1
    }

    /// Points case `index` at the next instruction to be written.
    pub fn patch_case(&mut self, index: usize) {
        self.cases[index] = self.code.len();
    }

    pub fn line(&self, offset: usize) -> u64 {
        self.lines.get(offset).copied().unwrap_or(0)
    }

    pub fn column(&self, offset: usize) -> u64 {
        self.columns.get(offset).copied().unwrap_or(0)
    }

    pub fn read_constant(&self, offset: usize) -> Option<&Value> {
        self.code
            .get(offset + 1)
            .and_then(|index| self.constants.get(*index as usize))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_byte_has_a_line() {
        let mut chunk = Chunk::new();
        chunk.write_index(OpCode::Constant, 0, 1, 5);
        chunk.write(OpCode::Print, 2, 1);
        assert_eq!(chunk.line(0), 1);
        assert_eq!(chunk.line(1), 1);
        assert_eq!(chunk.line(2), 2);
        assert_eq!(chunk.column(1), 5);
    }

    #[test]
    fn constant_pool_is_bounded() {
        let mut chunk = Chunk::new();
        for i in 0..MAX_CONSTANTS {
            assert_eq!(chunk.add_constant(Value::Number(i as f64)), Some(i as u8));
        }
        assert_eq!(chunk.add_constant(Value::Null), None);
    }
}
