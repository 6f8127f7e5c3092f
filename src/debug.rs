use crate::compiler::chunk::Chunk;
use crate::vm::{instruction::OpCode, value::Value};

// Defaults for `Config`, the CLI can switch each of them on at run time.
pub const TRACE_EXECUTION_INSTR: bool = false;
pub const TRACE_EXECUTION_STACK: bool = false;
pub const LOG_COMPILER: bool = false;
pub const LOG_COMPILED_CODE: bool = false;
pub const LOG_HEAP: bool = false;
pub const LOG_MODULES: bool = false;

pub fn disassemble_chunk(chunk: &Chunk, name: &str) {
    println!("== {} ==", name);
    for line in disassemble_chunk_to_lines(chunk) {
        println!("{}", line);
    }
}

/// One line per instruction: offset, source line (or `|` when unchanged)
/// and the decoded instruction.
pub fn disassemble_chunk_to_lines(chunk: &Chunk) -> Vec<String> {
    let mut lines = Vec::new();
    let mut offset = 0;
    while offset < chunk.code.len() {
        let current_line = chunk.line(offset);
        let line = if offset > 0 && chunk.line(offset - 1) == current_line {
            "   |".to_owned()
        } else {
            format!("{:4}", current_line)
        };

        let (text, bytes) = disassemble_instruction(chunk, offset);
        lines.push(format!("{:04} {} {}", offset, line, text));
        offset += bytes;
    }
    lines
}

/// Decodes the instruction at `offset`, returning its text and its size in bytes.
pub fn disassemble_instruction(chunk: &Chunk, offset: usize) -> (String, usize) {
    let byte = match chunk.code.get(offset) {
        Some(byte) => *byte,
        None => return ("<end of chunk>".to_owned(), 1),
    };
    let op_code = match OpCode::try_from(byte) {
        Ok(op_code) => op_code,
        Err(byte) => return (format!("Unknown opcode {}", byte), 1),
    };

    let operand = |i: usize| chunk.code.get(offset + i).copied().unwrap_or(0);
    let jump = || (operand(1) as usize) << 8 | operand(2) as usize;

    let constant_instruction = || {
        let index = operand(1);
        match chunk.read_constant(offset) {
            Some(constant) => (format!("{:<16} {:4} '{}'", op_code.name(), index, constant), 2),
            None => (format!("{:<16} {:4} <missing>", op_code.name(), index), 2),
        }
    };

    match op_code {
        OpCode::Constant
        | OpCode::GetGlobal
        | OpCode::SetGlobal
        | OpCode::GlobalDef
        | OpCode::Class
        | OpCode::Field
        | OpCode::Method
        | OpCode::GetProp
        | OpCode::SetProp
        | OpCode::Import => constant_instruction(),
        OpCode::PopN
        | OpCode::GetLocal
        | OpCode::SetLocal
        | OpCode::GetUpvalue
        | OpCode::SetUpvalue
        | OpCode::Call
        | OpCode::AllocInstance
        | OpCode::Vector
        | OpCode::Table => (format!("{:<16} {:4}", op_code.name(), operand(1)), 2),
        OpCode::Jmp | OpCode::JmpF | OpCode::JmpT => (
            format!("{:<16} {:4} -> {}", op_code.name(), offset, offset + 3 + jump()),
            3,
        ),
        OpCode::Loop => (
            format!(
                "{:<16} {:4} -> {}",
                op_code.name(),
                offset,
                (offset + 3).saturating_sub(jump())
            ),
            3,
        ),
        OpCode::JmpL => {
            let case = jump();
            let target = chunk
                .cases
                .get(case)
                .map(|target| target.to_string())
                .unwrap_or_else(|| "?".to_owned());
            (format!("{:<16} {:4} -> {}", op_code.name(), case, target), 3)
        }
        OpCode::Invoke => {
            let name = chunk
                .read_constant(offset)
                .map(|name| name.to_string())
                .unwrap_or_default();
            (
                format!("{:<16} ({} args) {:4} '{}'", op_code.name(), operand(2), operand(1), name),
                3,
            )
        }
        OpCode::Closure => {
            let mut text = format!("{:<16} {:4}", op_code.name(), operand(1));
            let mut bytes = 2;
            if let Some(Value::Function(function)) = chunk.read_constant(offset) {
                text.push_str(&format!(" {}", function.as_ref()));
                for _ in 0..function.upvalue_count {
                    let kind = if operand(bytes) == 1 { "local" } else { "upvalue" };
                    text.push_str(&format!(
                        "\n{:04}    |                     {} {}",
                        offset + bytes,
                        kind,
                        operand(bytes + 1)
                    ));
                    bytes += 2;
                }
            }
            (text, bytes)
        }
        OpCode::Null
        | OpCode::True
        | OpCode::False
        | OpCode::Pop
        | OpCode::Add
        | OpCode::Sub
        | OpCode::Mul
        | OpCode::Div
        | OpCode::Mod
        | OpCode::Negate
        | OpCode::Not
        | OpCode::Eq
        | OpCode::Lt
        | OpCode::Gt
        | OpCode::Print
        | OpCode::CloseUpvalue
        | OpCode::Return
        | OpCode::GetIndex
        | OpCode::SetIndex => (op_code.name().to_owned(), 1),
    }
}
