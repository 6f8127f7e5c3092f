use std::convert::TryFrom;
use std::fmt;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    Constant,
    Null,
    True,
    False,
    Pop,
    PopN,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Negate,
    Not,
    Eq,
    Lt,
    Gt,
    Print,
    GetLocal,
    SetLocal,
    GetGlobal,
    SetGlobal,
    GlobalDef,
    GetUpvalue,
    SetUpvalue,
    CloseUpvalue,
    Jmp,
    JmpF,
    JmpT,
    JmpL,
    Loop,
    Call,
    Return,
    Closure,
    Class,
    Field,
    Method,
    AllocInstance,
    GetProp,
    SetProp,
    Invoke,
    Vector,
    Table,
    GetIndex,
    SetIndex,
    Import,
}

const OPCODES: [OpCode; 45] = [
    OpCode::Constant,
    OpCode::Null,
    OpCode::True,
    OpCode::False,
    OpCode::Pop,
    OpCode::PopN,
    OpCode::Add,
    OpCode::Sub,
    OpCode::Mul,
    OpCode::Div,
    OpCode::Mod,
    OpCode::Negate,
    OpCode::Not,
    OpCode::Eq,
    OpCode::Lt,
    OpCode::Gt,
    OpCode::Print,
    OpCode::GetLocal,
    OpCode::SetLocal,
    OpCode::GetGlobal,
    OpCode::SetGlobal,
    OpCode::GlobalDef,
    OpCode::GetUpvalue,
    OpCode::SetUpvalue,
    OpCode::CloseUpvalue,
    OpCode::Jmp,
    OpCode::JmpF,
    OpCode::JmpT,
    OpCode::JmpL,
    OpCode::Loop,
    OpCode::Call,
    OpCode::Return,
    OpCode::Closure,
    OpCode::Class,
    OpCode::Field,
    OpCode::Method,
    OpCode::AllocInstance,
    OpCode::GetProp,
    OpCode::SetProp,
    OpCode::Invoke,
    OpCode::Vector,
    OpCode::Table,
    OpCode::GetIndex,
    OpCode::SetIndex,
    OpCode::Import,
];

impl From<OpCode> for u8 {
    fn from(op_code: OpCode) -> u8 {
        op_code as u8
    }
}

impl TryFrom<u8> for OpCode {
    type Error = u8;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        OPCODES.get(byte as usize).copied().ok_or(byte)
    }
}

impl OpCode {
    pub fn name(&self) -> &'static str {
        match self {
            OpCode::Constant => "OP_CONSTANT",
            OpCode::Null => "OP_NULL",
            OpCode::True => "OP_TRUE",
            OpCode::False => "OP_FALSE",
            OpCode::Pop => "OP_POP",
            OpCode::PopN => "OP_POPN",
            OpCode::Add => "OP_ADD",
            OpCode::Sub => "OP_SUB",
            OpCode::Mul => "OP_MUL",
            OpCode::Div => "OP_DIV",
            OpCode::Mod => "OP_MOD",
            OpCode::Negate => "OP_NEGATE",
            OpCode::Not => "OP_NOT",
            OpCode::Eq => "OP_EQ",
            OpCode::Lt => "OP_LT",
            OpCode::Gt => "OP_GT",
            OpCode::Print => "OP_PRINT",
            OpCode::GetLocal => "OP_GET_LOCAL",
            OpCode::SetLocal => "OP_SET_LOCAL",
            OpCode::GetGlobal => "OP_GET_GLOBAL",
            OpCode::SetGlobal => "OP_SET_GLOBAL",
            OpCode::GlobalDef => "OP_GLOBAL_DEF",
            OpCode::GetUpvalue => "OP_GET_UPVALUE",
            OpCode::SetUpvalue => "OP_SET_UPVALUE",
            OpCode::CloseUpvalue => "OP_CLOSE_UPVALUE",
            OpCode::Jmp => "OP_JMP",
            OpCode::JmpF => "OP_JMPF",
            OpCode::JmpT => "OP_JMPT",
            OpCode::JmpL => "OP_JMPL",
            OpCode::Loop => "OP_LOOP",
            OpCode::Call => "OP_CALL",
            OpCode::Return => "OP_RETURN",
            OpCode::Closure => "OP_CLOSURE",
            OpCode::Class => "OP_CLASS",
            OpCode::Field => "OP_FIELD",
            OpCode::Method => "OP_METHOD",
            OpCode::AllocInstance => "OP_ALLOC_INSTANCE",
            OpCode::GetProp => "OP_GET_PROP",
            OpCode::SetProp => "OP_SET_PROP",
            OpCode::Invoke => "OP_INVOKE",
            OpCode::Vector => "OP_VECTOR",
            OpCode::Table => "OP_TABLE",
            OpCode::GetIndex => "OP_GET_INDEX",
            OpCode::SetIndex => "OP_SET_INDEX",
            OpCode::Import => "OP_IMPORT",
        }
    }

    /// Number of operand bytes following the opcode. `OP_CLOSURE` is also
    /// followed by one byte pair per captured variable.
    pub fn operand_bytes(&self) -> usize {
        match self {
            OpCode::Jmp
            | OpCode::JmpF
            | OpCode::JmpT
            | OpCode::JmpL
            | OpCode::Loop
            | OpCode::Invoke => 2,
            OpCode::Constant
            | OpCode::PopN
            | OpCode::GetLocal
            | OpCode::SetLocal
            | OpCode::GetGlobal
            | OpCode::SetGlobal
            | OpCode::GlobalDef
            | OpCode::GetUpvalue
            | OpCode::SetUpvalue
            | OpCode::Call
            | OpCode::Closure
            | OpCode::Class
            | OpCode::Field
            | OpCode::Method
            | OpCode::AllocInstance
            | OpCode::GetProp
            | OpCode::SetProp
            | OpCode::Vector
            | OpCode::Table
            | OpCode::Import => 1,
            _ => 0,
        }
    }

    /// Net change of the stack height, given the first operand byte where
    /// it matters. `None` for `OP_INVOKE`, whose argument count is the second
    /// operand, and for `OP_RETURN`, which unwinds the whole frame.
    pub fn stack_effect(&self, operand: u8) -> Option<i32> {
        let n = operand as i32;
        let effect = match self {
            OpCode::Constant
            | OpCode::Null
            | OpCode::True
            | OpCode::False
            | OpCode::GetLocal
            | OpCode::GetGlobal
            | OpCode::GetUpvalue
            | OpCode::Closure
            | OpCode::Class => 1,
            OpCode::Pop
            | OpCode::Add
            | OpCode::Sub
            | OpCode::Mul
            | OpCode::Div
            | OpCode::Mod
            | OpCode::Eq
            | OpCode::Lt
            | OpCode::Gt
            | OpCode::Print
            | OpCode::GlobalDef
            | OpCode::CloseUpvalue
            | OpCode::Field
            | OpCode::Method
            | OpCode::SetProp
            | OpCode::GetIndex => -1,
            OpCode::PopN => -n,
            OpCode::Call | OpCode::AllocInstance => -n,
            OpCode::Vector => 1 - n,
            OpCode::Table => 1 - 2 * n,
            OpCode::SetIndex => -2,
            OpCode::Negate
            | OpCode::Not
            | OpCode::SetLocal
            | OpCode::SetGlobal
            | OpCode::SetUpvalue
            | OpCode::Jmp
            | OpCode::JmpF
            | OpCode::JmpT
            | OpCode::JmpL
            | OpCode::Loop
            | OpCode::GetProp
            | OpCode::Import => 0,
            OpCode::Invoke | OpCode::Return => return None,
        };
        Some(effect)
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
