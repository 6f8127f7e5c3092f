use super::token::{Token, TokenKind};
use super::util::StrCursor;
use radix_trie::Trie;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScannerError {
    #[error("Unterminated string.")]
    UnterminatedString { line: u64, column: u64 },

    #[error("Unterminated character literal.")]
    UnterminatedChar { line: u64, column: u64 },

    #[error("Unexpected character.")]
    InvalidCharacter { ch: char, line: u64, column: u64 },
}

impl ScannerError {
    pub fn line(&self) -> u64 {
        match self {
            ScannerError::UnterminatedString { line, .. }
            | ScannerError::UnterminatedChar { line, .. }
            | ScannerError::InvalidCharacter { line, .. } => *line,
        }
    }

    pub fn column(&self) -> u64 {
        match self {
            ScannerError::UnterminatedString { column, .. }
            | ScannerError::UnterminatedChar { column, .. }
            | ScannerError::InvalidCharacter { column, .. } => *column,
        }
    }
}

pub struct Scanner<'a> {
    source: &'a str,
    cursor: StrCursor<'a>,
    keywords: Trie<&'static str, TokenKind>,
    start: usize,
    start_line: u64,
    start_column: u64,
    line: u64,
    line_start: usize,
}

const KEYWORDS: [(&str, TokenKind); 20] = [
    ("and", TokenKind::And),
    ("case", TokenKind::Case),
    ("class", TokenKind::Class),
    ("default", TokenKind::Default),
    ("elif", TokenKind::Elif),
    ("else", TokenKind::Else),
    ("false", TokenKind::False),
    ("for", TokenKind::For),
    ("fun", TokenKind::Fun),
    ("if", TokenKind::If),
    ("import", TokenKind::Import),
    ("null", TokenKind::Null),
    ("or", TokenKind::Or),
    ("print", TokenKind::Print),
    ("return", TokenKind::Return),
    ("switch", TokenKind::Switch),
    ("this", TokenKind::This),
    ("true", TokenKind::True),
    ("var", TokenKind::Var),
    ("while", TokenKind::While),
];

impl<'a> Scanner<'a> {
    pub fn new(source: &'a str) -> Self {
        let mut keywords = Trie::new();
        for (word, kind) in KEYWORDS.iter() {
            keywords.insert(*word, *kind);
        }

        Self {
            source,
            cursor: StrCursor::new(source),
            keywords,
            start: 0,
            start_line: 1,
            start_column: 1,
            line: 1,
            line_start: 0,
        }
    }

    pub fn scan_token(&mut self) -> Result<Token, ScannerError> {
        self.skip_whitespace();
        self.start = self.cursor.index;
        self.start_line = self.line;
        self.start_column = self.column();

        let ch = match self.cursor.advance() {
            Some(ch) => ch,
            None => return Ok(self.create_token(TokenKind::EOF)),
        };

        let token = match ch {
            '(' => self.create_token(TokenKind::ParenLeft),
            ')' => self.create_token(TokenKind::ParenRight),
            '{' => self.create_token(TokenKind::BraceLeft),
            '}' => self.create_token(TokenKind::BraceRight),
            '[' => self.create_token(TokenKind::BracketLeft),
            ']' => self.create_token(TokenKind::BracketRight),
            ':' => self.create_token(TokenKind::Colon),
            ';' => self.create_token(TokenKind::Semicolon),
            ',' => self.create_token(TokenKind::Comma),
            '.' => self.create_token(TokenKind::Dot),
            '-' => self.create_token(TokenKind::Minus),
            '+' => self.create_token(TokenKind::Plus),
            '%' => self.create_token(TokenKind::Percent),
            '/' => self.create_token(TokenKind::Slash),
            '*' => self.create_token(TokenKind::Star),
            '!' => self.create_token_match('=', TokenKind::BangEqual, TokenKind::Bang),
            '=' => self.create_token_match('=', TokenKind::EqualEqual, TokenKind::Equal),
            '<' => self.create_token_match('=', TokenKind::LessEqual, TokenKind::Less),
            '>' => self.create_token_match('=', TokenKind::GreaterEqual, TokenKind::Greater),
            '"' => self.create_string_token()?,
            '\'' => self.create_char_token()?,
            ch if ch.is_ascii_digit() => self.create_digit_token(),
            ch if ch.is_alphabetic() || ch == '_' => self.create_identifier_token(),
            ch => {
                return Err(ScannerError::InvalidCharacter {
                    ch,
                    line: self.start_line,
                    column: self.start_column,
                })
            }
        };
        Ok(token)
    }

    fn column(&self) -> u64 {
        (self.cursor.index - self.line_start + 1) as u64
    }

    fn newline(&mut self) {
        self.line += 1;
        self.line_start = self.cursor.index;
    }

    fn match_token(&mut self, expected: char) -> bool {
        if self.cursor.peek() == Some(expected) {
            self.cursor.advance();
            true
        } else {
            false
        }
    }

    fn create_token(&self, kind: TokenKind) -> Token {
        let data = &self.source[self.start..self.cursor.index];
        Token::new(kind, data.to_owned(), self.start_line, self.start_column)
    }

    fn create_token_match(
        &mut self,
        matches: char,
        if_matches: TokenKind,
        otherwise: TokenKind,
    ) -> Token {
        if self.match_token(matches) {
            self.create_token(if_matches)
        } else {
            self.create_token(otherwise)
        }
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.cursor.peek() {
            match ch {
                '\n' => {
                    self.cursor.advance();
                    self.newline();
                }
                '/' if self.cursor.peek_next() == Some('/') => {
                    // Comment runs to the end of the line, the newline is handled above.
                    self.cursor.advance_when(|ch| ch != '\n');
                }
                ch if ch.is_whitespace() => {
                    self.cursor.advance();
                }
                _ => return,
            }
        }
    }

    fn create_identifier_token(&mut self) -> Token {
        self.cursor
            .advance_when(|ch| ch.is_alphanumeric() || ch == '_');

        let identifier = &self.source[self.start..self.cursor.index];
        match self.keywords.get(identifier) {
            Some(kind) => self.create_token(*kind),
            None => self.create_token(TokenKind::Identifier),
        }
    }

    fn create_digit_token(&mut self) -> Token {
        let check_digit = |ch: char| ch.is_ascii_digit();

        self.cursor.advance_when(check_digit);

        // Check for fractional part and scan that.
        if self.cursor.peek() == Some('.') {
            if let Some(ch) = self.cursor.peek_next() {
                if check_digit(ch) {
                    self.cursor.advance();
                    self.cursor.advance_when(check_digit);
                }
            }
        }

        self.create_token(TokenKind::Number)
    }

    fn create_string_token(&mut self) -> Result<Token, ScannerError> {
        loop {
            match self.cursor.advance() {
                Some('"') => break,
                Some('\\') => {
                    self.cursor.advance();
                }
                Some('\n') => self.newline(),
                Some(_) => {}
                None => {
                    return Err(ScannerError::UnterminatedString {
                        line: self.start_line,
                        column: self.start_column,
                    })
                }
            }
        }

        Ok(self.create_token(TokenKind::String))
    }

    fn create_char_token(&mut self) -> Result<Token, ScannerError> {
        let unterminated = ScannerError::UnterminatedChar {
            line: self.start_line,
            column: self.start_column,
        };
        match self.cursor.advance() {
            Some('\\') => {
                self.cursor.advance().ok_or_else(|| unterminated.clone())?;
            }
            Some('\'') | Some('\n') | None => return Err(unterminated),
            Some(_) => {}
        }
        if !self.match_token('\'') {
            return Err(unterminated);
        }
        Ok(self.create_token(TokenKind::Char))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        let mut scanner = Scanner::new(source);
        let mut kinds = Vec::new();
        loop {
            let token = scanner.scan_token().unwrap();
            kinds.push(token.kind);
            if token.kind == TokenKind::EOF {
                return kinds;
            }
        }
    }

    #[test]
    fn scans_keywords_and_punctuation() {
        assert_eq!(
            kinds("switch (x) { case 1: print x % 2; }"),
            vec![
                TokenKind::Switch,
                TokenKind::ParenLeft,
                TokenKind::Identifier,
                TokenKind::ParenRight,
                TokenKind::BraceLeft,
                TokenKind::Case,
                TokenKind::Number,
                TokenKind::Colon,
                TokenKind::Print,
                TokenKind::Identifier,
                TokenKind::Percent,
                TokenKind::Number,
                TokenKind::Semicolon,
                TokenKind::BraceRight,
                TokenKind::EOF,
            ]
        );
    }

    #[test]
    fn comments_end_at_the_newline() {
        assert_eq!(
            kinds("// nothing here\nnull // trailing\n"),
            vec![TokenKind::Null, TokenKind::EOF]
        );
    }

    #[test]
    fn tracks_lines_and_columns() {
        let mut scanner = Scanner::new("var a;\n  elif");
        for _ in 0..3 {
            scanner.scan_token().unwrap();
        }
        let token = scanner.scan_token().unwrap();
        assert_eq!(token.kind, TokenKind::Elif);
        assert_eq!((token.line, token.column), (2, 3));
    }

    #[test]
    fn char_literals() {
        let mut scanner = Scanner::new(r"'a' '\n'");
        assert_eq!(scanner.scan_token().unwrap().data, "'a'");
        assert_eq!(scanner.scan_token().unwrap().data, r"'\n'");
    }

    #[test]
    fn reports_unterminated_string_at_its_start() {
        let mut scanner = Scanner::new("print \"oops");
        scanner.scan_token().unwrap();
        assert_eq!(
            scanner.scan_token().unwrap_err(),
            ScannerError::UnterminatedString { line: 1, column: 7 }
        );
    }

    #[test]
    fn reports_invalid_characters() {
        let mut scanner = Scanner::new("@");
        assert!(matches!(
            scanner.scan_token(),
            Err(ScannerError::InvalidCharacter { ch: '@', .. })
        ));
    }
}
