use std::fmt;

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub line: u64,
    pub column: u64,
    pub data: String,
}

impl Token {
    pub fn new(kind: TokenKind, data: String, line: u64, column: u64) -> Self {
        Self {
            kind,
            data,
            line,
            column,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TokenKind {
    // Single-character tokens.
    ParenLeft,
    ParenRight,
    BraceLeft,
    BraceRight,
    BracketLeft,
    BracketRight,
    Colon,
    Comma,
    Dot,
    Minus,
    Percent,
    Plus,
    Semicolon,
    Slash,
    Star,

    // One or two character tokens.
    Bang,
    BangEqual,
    Equal,
    EqualEqual,
    Greater,
    GreaterEqual,
    Less,
    LessEqual,

    // Literals.
    Identifier,
    String,
    Char,
    Number,

    // Keywords.
    And,
    Case,
    Class,
    Default,
    Elif,
    Else,
    False,
    For,
    Fun,
    If,
    Import,
    Null,
    Or,
    Print,
    Return,
    Switch,
    This,
    True,
    Var,
    While,

    EOF,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}
