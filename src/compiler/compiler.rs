use colored::*;
use std::collections::HashSet;

use super::{
    scanner::Scanner,
    token::{Token, TokenKind},
    CompileError, Result,
};
use crate::config::Config;
use crate::debug;
use crate::memory::{Function, Handle, Heap};
use crate::vm::{instruction::OpCode, value::Value};

/// Name of the hidden local holding the value a `switch` dispatches on.
const SWITCH_SUBJECT: &str = " switch";

#[derive(Debug)]
struct Local {
    name: String,

    // The level of nesting for this local, -1 while its initializer is compiled.
    depth: i64,

    // If any closure has captured this local and it needs to be closed over.
    is_captured: bool,
}

impl Local {
    fn new(name: String, depth: i64) -> Self {
        Self {
            name,
            depth,
            is_captured: false,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Upvalue {
    index: u8,
    is_local: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    Script,
    Function,
    Method,
    Initializer,
}

#[derive(Debug)]
struct FunctionState {
    function: Function,
    kind: FunctionKind,
    locals: Vec<Local>,
    scope_depth: i64,
    upvalues: Vec<Upvalue>,
    log: bool,
}

impl FunctionState {
    fn new(function: Function, kind: FunctionKind, log: bool) -> Self {
        // Slot 0 holds the callee, or the receiver inside methods.
        let slot_zero = match kind {
            FunctionKind::Method | FunctionKind::Initializer => "this",
            FunctionKind::Script | FunctionKind::Function => "",
        };
        Self {
            function,
            kind,
            locals: vec![Local::new(slot_zero.to_owned(), 0)],
            scope_depth: 0,
            upvalues: Vec::new(),
            log,
        }
    }

    fn emit_raw(&mut self, byte: u8, line: u64, column: u64) {
        if self.log {
            println!(
                "{}\t[EMIT]\t\t\t[BYTE]: {}",
                "[COMPILER]".blue().bold(),
                byte
            );
        }
        self.function.chunk.write_byte(byte, line, column);
    }

    fn emit_byte(&mut self, op_code: OpCode, line: u64, column: u64) {
        if self.log {
            println!("{}\t[EMIT]\t\t\t{}", "[COMPILER]".blue().bold(), op_code);
        }
        self.function.chunk.write(op_code, line, column);
    }

    fn emit_bytes(&mut self, op_code: OpCode, index: u8, line: u64, column: u64) {
        if self.log {
            println!(
                "{}\t[EMIT]\t\t\t{} -> {}",
                "[COMPILER]".blue().bold(),
                op_code,
                index
            );
        }
        self.function.chunk.write_index(op_code, index, line, column);
    }

    fn emit_return(&mut self, line: u64, column: u64) {
        if self.kind == FunctionKind::Initializer {
            self.emit_bytes(OpCode::GetLocal, 0, line, column);
        } else {
            self.emit_byte(OpCode::Null, line, column);
        }
        self.emit_byte(OpCode::Return, line, column);
    }

    fn emit_jump(&mut self, op_code: OpCode, line: u64, column: u64) -> usize {
        if self.log {
            println!("{}\t[EMIT JMP]\t\t{}", "[COMPILER]".blue().bold(), op_code);
        }
        self.function.chunk.write(op_code, line, column);
        self.function.chunk.write_byte(0xff, line, column);
        self.function.chunk.write_byte(0xff, line, column);
        self.function.chunk.code.len() - 2
    }

    /// Emits `OpCode::Loop` jumping backwards to `loop_start`.
    fn emit_loop(&mut self, loop_start: usize, line: u64, column: u64) -> Result<()> {
        self.emit_byte(OpCode::Loop, line, column);

        // Skip over the two operand bytes as well.
        let offset = self.function.chunk.code.len() - loop_start + 2;
        if offset > u16::MAX as usize {
            return Err(CompileError::InvalidJump);
        }
        self.emit_raw((offset >> 8) as u8, line, column);
        self.emit_raw((offset & 0xff) as u8, line, column);
        Ok(())
    }

    fn patch_jump(&mut self, offset: usize) -> Result<()> {
        // Adjust by -2 to account for the jump operand itself.
        let jump = self.function.chunk.code.len() - offset - 2;
        if jump > u16::MAX as usize {
            return Err(CompileError::InvalidJump);
        }
        self.function.chunk.code[offset] = (jump >> 8) as u8;
        self.function.chunk.code[offset + 1] = (jump & 0xff) as u8;
        Ok(())
    }

    fn resolve_local(&self, name: &str) -> Result<Option<u8>> {
        for (i, local) in self.locals.iter().enumerate().rev() {
            if local.name == name {
                if local.depth == -1 {
                    return Err(CompileError::LocalInitializer);
                }
                return Ok(Some(i as u8));
            }
        }
        Ok(None)
    }

    fn add_upvalue(&mut self, index: u8, is_local: bool) -> Result<u8> {
        if let Some(i) = self
            .upvalues
            .iter()
            .position(|upvalue| upvalue.index == index && upvalue.is_local == is_local)
        {
            return Ok(i as u8);
        }
        if self.upvalues.len() > u8::MAX as usize {
            return Err(CompileError::UpvalueCount);
        }
        self.upvalues.push(Upvalue { index, is_local });
        self.function.upvalue_count = self.upvalues.len();
        Ok((self.upvalues.len() - 1) as u8)
    }
}

/// Single-pass compiler from source text to a `Function` holding the
/// bytecode of the top-level script.
pub struct Compiler<'src> {
    scanner: Scanner<'src>,
    parser: Parser,
    heap: &'src Heap,
    file: String,

    current: FunctionState,
    enclosing: Vec<FunctionState>,
    class_depth: usize,

    // Global names declared as classes, calls to these emit `OP_ALLOC_INSTANCE`.
    class_names: HashSet<String>,
    // Code length right after loading a known class, so `call` can tell the
    // class is the callee.
    class_callee: Option<usize>,

    errors: Vec<CompileError>,
    log_compiler: bool,
    log_compiled_code: bool,
}

impl<'src> Compiler<'src> {
    pub fn new(source: &'src str, file: &str, heap: &'src Heap, config: &Config) -> Self {
        Self {
            scanner: Scanner::new(source),
            parser: Parser::new(),
            heap,
            file: file.to_owned(),
            current: FunctionState::new(Function::script(), FunctionKind::Script, config.log_compiler),
            enclosing: Vec::new(),
            class_depth: 0,
            class_names: HashSet::new(),
            class_callee: None,
            errors: Vec::new(),
            log_compiler: config.log_compiler,
            log_compiled_code: config.log_compiled_code,
        }
    }

    /// Compiles the whole source. All diagnostics are collected and returned
    /// together in `CompileError::Failed`.
    pub fn compile(mut self) -> Result<Function> {
        if self.log_compiler {
            println!("{}\tcompiling {}", "[COMPILER]".blue().bold(), self.file);
        }
        self.advance();

        while !self.match_token(TokenKind::EOF)? {
            self.decl()?;
        }
        self.emit_return();

        if !self.errors.is_empty() {
            return Err(CompileError::Failed(self.errors));
        }

        let function = self.current.function;
        if self.log_compiled_code {
            debug::disassemble_chunk(&function.chunk, &function.function_name());
        }
        Ok(function)
    }

    /// Scan for the next token. Scanner errors are recorded and skipped.
    fn advance(&mut self) {
        self.parser.previous = self.parser.current.take();

        loop {
            match self.scanner.scan_token() {
                Ok(token) => {
                    if self.log_compiler {
                        println!("{}\t[ADVANCE]\t\t{:?}", "[COMPILER]".blue(), token);
                    }
                    self.parser.current = Some(token);
                    return;
                }
                Err(err) => {
                    let error = CompileError::At {
                        file: self.file.clone(),
                        line: err.line(),
                        column: err.column(),
                        at: String::new(),
                        inner: Box::new(err.into()),
                    };
                    if self.log_compiler {
                        eprintln!("{}\t[ERROR]   {}", "[COMPILER]".red(), error);
                    }
                    self.errors.push(error);
                }
            }
        }
    }

    fn check(&self, kind: TokenKind) -> Result<bool> {
        Ok(self.parser.current()?.kind == kind)
    }

    fn match_token(&mut self, kind: TokenKind) -> Result<bool> {
        if self.check(kind)? {
            self.advance();
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn consume(&mut self, expected: TokenKind, message: &'static str) -> Result<()> {
        if self.check(expected)? {
            self.advance();
            Ok(())
        } else {
            Err(CompileError::Expected(message))
        }
    }

    /// Attaches a source position to `error`. Missing tokens are reported at
    /// the current token, everything else at the token just consumed.
    fn locate(&self, error: CompileError) -> CompileError {
        let token = match error {
            CompileError::Expected(_) => self.parser.current.as_ref(),
            _ => self.parser.previous.as_ref(),
        };
        let (line, column, at) = match token {
            Some(token) if token.kind == TokenKind::EOF => {
                (token.line, token.column, " at end".to_owned())
            }
            Some(token) => (token.line, token.column, format!(" at '{}'", token.data)),
            None => (0, 0, String::new()),
        };
        CompileError::At {
            file: self.file.clone(),
            line,
            column,
            at,
            inner: Box::new(error),
        }
    }

    fn decl(&mut self) -> Result<()> {
        if let Err(err) = self.declaration() {
            let err = self.locate(err);
            if self.log_compiler {
                eprintln!("{}\t[ERROR]   {}", "[COMPILER]".red(), err);
            }
            self.errors.push(err);
            self.synchronize()?;
        }
        Ok(())
    }

    fn synchronize(&mut self) -> Result<()> {
        // Skip tokens until something that looks like a statement boundary.
        loop {
            if self.parser.previous()?.kind == TokenKind::Semicolon {
                return Ok(());
            }

            match self.parser.current()?.kind {
                TokenKind::EOF
                | TokenKind::Class
                | TokenKind::Fun
                | TokenKind::Var
                | TokenKind::For
                | TokenKind::If
                | TokenKind::While
                | TokenKind::Switch
                | TokenKind::Import
                | TokenKind::Print
                | TokenKind::Return => return Ok(()),
                _ => {}
            }

            self.advance();
        }
    }

    fn position(&self) -> (u64, u64) {
        self.parser
            .previous
            .as_ref()
            .map(|token| (token.line, token.column))
            .unwrap_or((0, 0))
    }

    fn emit(&mut self, op_code: OpCode) {
        let (line, column) = self.position();
        self.current.emit_byte(op_code, line, column);
    }

    fn emit_with(&mut self, op_code: OpCode, operand: u8) {
        let (line, column) = self.position();
        self.current.emit_bytes(op_code, operand, line, column);
    }

    fn emit_raw(&mut self, byte: u8) {
        let (line, column) = self.position();
        self.current.emit_raw(byte, line, column);
    }

    fn emit_return(&mut self) {
        let (line, column) = self.position();
        self.current.emit_return(line, column);
    }

    fn emit_jump(&mut self, op_code: OpCode) -> usize {
        let (line, column) = self.position();
        self.current.emit_jump(op_code, line, column)
    }

    fn emit_loop(&mut self, loop_start: usize) -> Result<()> {
        let (line, column) = self.position();
        self.current.emit_loop(loop_start, line, column)
    }

    fn patch_jump(&mut self, offset: usize) -> Result<()> {
        self.current.patch_jump(offset)
    }

    /// Emits pops for `count` locals, folding runs into `OP_POPN`.
    fn emit_pops(&mut self, mut count: usize) {
        while count > 0 {
            let n = count.min(u8::MAX as usize);
            if n == 1 {
                self.emit(OpCode::Pop);
            } else {
                self.emit_with(OpCode::PopN, n as u8);
            }
            count -= n;
        }
    }

    fn add_case(&mut self) -> Result<u16> {
        let index = self.current.function.chunk.add_case();
        if index > u16::MAX as usize {
            return Err(CompileError::CaseCount);
        }
        Ok(index as u16)
    }

    fn emit_case_jump(&mut self, case: u16) {
        self.emit(OpCode::JmpL);
        self.emit_raw((case >> 8) as u8);
        self.emit_raw((case & 0xff) as u8);
    }

    fn patch_case(&mut self, case: u16) {
        self.current.function.chunk.patch_case(case as usize);
    }

    fn add_constant(&mut self, constant: Value) -> Result<u8> {
        self.current
            .function
            .chunk
            .add_constant(constant)
            .ok_or(CompileError::ConstantCount)
    }

    fn identifier_constant(&mut self, name: &str) -> Result<u8> {
        let key = self.heap.intern(name);
        let existing = self
            .current
            .function
            .chunk
            .constants
            .iter()
            .position(|constant| matches!(constant, Value::Key(k) if Handle::ptr_eq(k, &key)));
        match existing {
            Some(index) => Ok(index as u8),
            None => self.add_constant(Value::Key(key)),
        }
    }

    fn scope_enter(&mut self) {
        self.current.scope_depth += 1;
    }

    fn scope_leave(&mut self) {
        self.current.scope_depth -= 1;

        let mut pending = 0;
        while let Some(local) = self.current.locals.last() {
            if local.depth != -1 && local.depth <= self.current.scope_depth {
                break;
            }
            if local.is_captured {
                self.emit_pops(pending);
                pending = 0;
                self.emit(OpCode::CloseUpvalue);
            } else {
                pending += 1;
            }
            self.current.locals.pop();
        }
        self.emit_pops(pending);
    }

    fn parse_variable(&mut self, message: &'static str) -> Result<u8> {
        self.consume(TokenKind::Identifier, message)?;

        self.declare_variable()?;
        if self.current.scope_depth > 0 {
            return Ok(0);
        }

        let name = self.parser.previous()?.data.clone();
        self.identifier_constant(&name)
    }

    fn declare_variable(&mut self) -> Result<()> {
        // Global variables are implicitly declared.
        if self.current.scope_depth == 0 {
            return Ok(());
        }
        let name = self.parser.previous()?.data.clone();
        for local in self.current.locals.iter().rev() {
            if local.depth != -1 && local.depth < self.current.scope_depth {
                break;
            }
            if local.name == name {
                return Err(CompileError::VariableAlreadyDeclared(name));
            }
        }

        self.add_local(name)
    }

    fn add_local(&mut self, name: String) -> Result<()> {
        if self.current.locals.len() > u8::MAX as usize {
            return Err(CompileError::LocalCount);
        }
        self.current.locals.push(Local::new(name, -1));
        Ok(())
    }

    fn mark_local_initialized(&mut self) {
        if self.current.scope_depth == 0 {
            return;
        }
        let depth = self.current.scope_depth;
        if let Some(local) = self.current.locals.last_mut() {
            local.depth = depth;
        }
    }

    fn define_variable(&mut self, index: u8) {
        if self.current.scope_depth > 0 {
            self.mark_local_initialized();
        } else {
            self.emit_with(OpCode::GlobalDef, index);
        }
    }

    fn state_at(&mut self, index: usize) -> &mut FunctionState {
        if index == self.enclosing.len() {
            &mut self.current
        } else {
            &mut self.enclosing[index]
        }
    }

    /// Looks for `name` in the functions enclosing the state at `state_index`,
    /// threading an upvalue through every function in between.
    fn resolve_upvalue(&mut self, state_index: usize, name: &str) -> Result<Option<u8>> {
        if state_index == 0 {
            return Ok(None);
        }
        let enclosing = state_index - 1;

        if let Some(local) = self.state_at(enclosing).resolve_local(name)? {
            self.state_at(enclosing).locals[local as usize].is_captured = true;
            let index = self.state_at(state_index).add_upvalue(local, true)?;
            if self.log_compiler {
                println!(
                    "{}\t[UPVALUE]\t\t{} local {} -> {}",
                    "[COMPILER]".blue(),
                    name,
                    local,
                    index
                );
            }
            return Ok(Some(index));
        }

        if let Some(upvalue) = self.resolve_upvalue(enclosing, name)? {
            let index = self.state_at(state_index).add_upvalue(upvalue, false)?;
            return Ok(Some(index));
        }

        Ok(None)
    }

    fn named_variable(&mut self, name: &str, can_assign: bool) -> Result<()> {
        let mut global = false;
        let (arg, set_op, get_op) = if let Some(arg) = self.current.resolve_local(name)? {
            (arg, OpCode::SetLocal, OpCode::GetLocal)
        } else if let Some(arg) = self.resolve_upvalue(self.enclosing.len(), name)? {
            (arg, OpCode::SetUpvalue, OpCode::GetUpvalue)
        } else {
            global = true;
            let arg = self.identifier_constant(name)?;
            (arg, OpCode::SetGlobal, OpCode::GetGlobal)
        };

        if self.log_compiler {
            println!(
                "{}\t[NAMED VARIABLE]\t{} | CAN_ASSIGN: {}",
                "[COMPILER]".blue(),
                name,
                can_assign
            );
        }

        if can_assign && self.match_token(TokenKind::Equal)? {
            self.expression()?;
            self.emit_with(set_op, arg);
        } else {
            self.emit_with(get_op, arg);
            if global && self.class_names.contains(name) {
                self.class_callee = Some(self.current.function.chunk.code.len());
            }
        }
        Ok(())
    }

    fn declaration(&mut self) -> Result<()> {
        if self.match_token(TokenKind::Class)? {
            self.class_declaration()
        } else if self.match_token(TokenKind::Fun)? {
            self.fun_declaration()
        } else if self.match_token(TokenKind::Var)? {
            self.var_declaration()
        } else {
            self.statement()
        }
    }

    fn class_declaration(&mut self) -> Result<()> {
        self.consume(TokenKind::Identifier, "Expect class name.")?;
        let name = self.parser.previous()?.data.clone();
        let name_constant = self.identifier_constant(&name)?;
        self.declare_variable()?;

        self.emit_with(OpCode::Class, name_constant);
        self.define_variable(name_constant);
        if self.current.scope_depth == 0 {
            self.class_names.insert(name.clone());
        }

        self.class_depth += 1;
        let result = self.class_body(&name);
        self.class_depth -= 1;
        result
    }

    fn class_body(&mut self, name: &str) -> Result<()> {
        // Keep the class on the stack while fields and methods are attached.
        self.named_variable(name, false)?;
        self.class_callee = None;

        self.consume(TokenKind::BraceLeft, "Expect '{' before class body.")?;
        while !self.check(TokenKind::BraceRight)? && !self.check(TokenKind::EOF)? {
            if self.match_token(TokenKind::Var)? {
                self.field_declaration()?;
            } else {
                self.method()?;
            }
        }
        self.consume(TokenKind::BraceRight, "Expect '}' after class body.")?;
        self.emit(OpCode::Pop);
        Ok(())
    }

    fn field_declaration(&mut self) -> Result<()> {
        self.consume(TokenKind::Identifier, "Expect field name.")?;
        let name = self.parser.previous()?.data.clone();
        let constant = self.identifier_constant(&name)?;

        if self.match_token(TokenKind::Equal)? {
            self.expression()?;
        } else {
            self.emit(OpCode::Null);
        }
        self.consume(TokenKind::Semicolon, "Expect ';' after field declaration.")?;
        self.emit_with(OpCode::Field, constant);
        Ok(())
    }

    fn method(&mut self) -> Result<()> {
        self.consume(TokenKind::Identifier, "Expect method name.")?;
        let name = self.parser.previous()?.data.clone();
        let constant = self.identifier_constant(&name)?;

        let kind = if name == "init" {
            FunctionKind::Initializer
        } else {
            FunctionKind::Method
        };
        self.function(kind)?;
        self.emit_with(OpCode::Method, constant);
        Ok(())
    }

    fn fun_declaration(&mut self) -> Result<()> {
        let global = self.parse_variable("Expect function name.")?;
        self.mark_local_initialized();
        self.function(FunctionKind::Function)?;
        self.define_variable(global);
        Ok(())
    }

    fn var_declaration(&mut self) -> Result<()> {
        let global = self.parse_variable("Expect variable name.")?;

        if self.match_token(TokenKind::Equal)? {
            self.expression()?;
        } else {
            self.emit(OpCode::Null);
        }
        self.consume(
            TokenKind::Semicolon,
            "Expect ';' after variable declaration.",
        )?;

        self.define_variable(global);
        Ok(())
    }

    fn function(&mut self, kind: FunctionKind) -> Result<()> {
        let name = self.heap.intern(&self.parser.previous()?.data);
        let state = FunctionState::new(Function::new(name), kind, self.log_compiler);
        self.enclosing.push(std::mem::replace(&mut self.current, state));
        // Code offsets of one chunk mean nothing in another.
        self.class_callee = None;

        let body = self.function_body();
        self.class_callee = None;

        // Restore the enclosing function even when the body failed.
        let finished = match self.enclosing.pop() {
            Some(enclosing) => std::mem::replace(&mut self.current, enclosing),
            None => return Err(CompileError::TokenNotFound),
        };
        body?;

        let FunctionState {
            function, upvalues, ..
        } = finished;
        if self.log_compiled_code {
            debug::disassemble_chunk(&function.chunk, &function.function_name());
        }

        let function = self.heap.function(function);
        let index = self.add_constant(Value::Function(function))?;
        self.emit_with(OpCode::Closure, index);
        for upvalue in upvalues {
            self.emit_raw(upvalue.is_local as u8);
            self.emit_raw(upvalue.index);
        }
        Ok(())
    }

    fn function_body(&mut self) -> Result<()> {
        self.scope_enter();

        self.consume(TokenKind::ParenLeft, "Expect '(' after function name.")?;
        if !self.check(TokenKind::ParenRight)? {
            loop {
                if self.current.function.arity == u8::MAX {
                    return Err(CompileError::ParameterCount);
                }
                self.current.function.arity += 1;

                let parameter = self.parse_variable("Expect parameter name.")?;
                self.define_variable(parameter);

                if !self.match_token(TokenKind::Comma)? {
                    break;
                }
            }
        }
        self.consume(TokenKind::ParenRight, "Expect ')' after parameters.")?;

        self.consume(TokenKind::BraceLeft, "Expect '{' before function body.")?;
        self.block()?;

        // The frame is discarded on return, so the scope is not left explicitly.
        self.emit_return();
        Ok(())
    }

    fn statement(&mut self) -> Result<()> {
        match self.parser.current()?.kind {
            TokenKind::Print => {
                self.advance();
                self.print_statement()
            }
            TokenKind::If => {
                self.advance();
                self.if_statement()
            }
            TokenKind::Return => {
                self.advance();
                self.return_statement()
            }
            TokenKind::While => {
                self.advance();
                self.while_statement()
            }
            TokenKind::For => {
                self.advance();
                self.for_statement()
            }
            TokenKind::Switch => {
                self.advance();
                self.switch_statement()
            }
            TokenKind::Import => {
                self.advance();
                self.import_statement()
            }
            TokenKind::BraceLeft => {
                self.advance();
                self.scope_enter();
                let result = self.block();
                self.scope_leave();
                result
            }
            _ => self.expression_statement(),
        }
    }

    fn block(&mut self) -> Result<()> {
        while !self.check(TokenKind::BraceRight)? && !self.check(TokenKind::EOF)? {
            self.decl()?;
        }
        self.consume(TokenKind::BraceRight, "Expect '}' after block.")
    }

    fn print_statement(&mut self) -> Result<()> {
        self.expression()?;
        self.consume(TokenKind::Semicolon, "Expect ';' after value.")?;
        self.emit(OpCode::Print);
        Ok(())
    }

    fn expression_statement(&mut self) -> Result<()> {
        self.expression()?;
        self.consume(TokenKind::Semicolon, "Expect ';' after expression.")?;
        self.emit(OpCode::Pop);
        Ok(())
    }

    fn return_statement(&mut self) -> Result<()> {
        if self.current.kind == FunctionKind::Script {
            return Err(CompileError::ReturnFromScript);
        }

        if self.match_token(TokenKind::Semicolon)? {
            self.emit_return();
        } else {
            if self.current.kind == FunctionKind::Initializer {
                return Err(CompileError::ReturnFromInitializer);
            }
            self.expression()?;
            self.consume(TokenKind::Semicolon, "Expect ';' after return value.")?;
            self.emit(OpCode::Return);
        }
        Ok(())
    }

    /// `if`, any number of `elif` and an optional `else`. Every taken branch
    /// leaves through one shared `OP_JMPL` target.
    fn if_statement(&mut self) -> Result<()> {
        let end = self.add_case()?;
        self.conditional_branch(end)?;
        while self.match_token(TokenKind::Elif)? {
            self.conditional_branch(end)?;
        }
        if self.match_token(TokenKind::Else)? {
            self.statement()?;
        }
        self.patch_case(end);
        Ok(())
    }

    fn conditional_branch(&mut self, end: u16) -> Result<()> {
        self.consume(TokenKind::ParenLeft, "Expect '(' before condition.")?;
        self.expression()?;
        self.consume(TokenKind::ParenRight, "Expect ')' after condition.")?;

        let next = self.emit_jump(OpCode::JmpF);
        self.emit(OpCode::Pop);
        self.statement()?;
        self.emit_case_jump(end);

        self.patch_jump(next)?;
        self.emit(OpCode::Pop);
        Ok(())
    }

    fn while_statement(&mut self) -> Result<()> {
        let loop_start = self.current.function.chunk.code.len();
        self.consume(TokenKind::ParenLeft, "Expect '(' after 'while'.")?;
        self.expression()?;
        self.consume(TokenKind::ParenRight, "Expect ')' after condition.")?;

        let exit_jump = self.emit_jump(OpCode::JmpF);
        self.emit(OpCode::Pop);
        self.statement()?;
        self.emit_loop(loop_start)?;

        self.patch_jump(exit_jump)?;
        self.emit(OpCode::Pop);
        Ok(())
    }

    fn for_statement(&mut self) -> Result<()> {
        self.scope_enter();
        self.consume(TokenKind::ParenLeft, "Expect '(' after 'for'.")?;

        if self.match_token(TokenKind::Semicolon)? {
            // No initializer.
        } else if self.match_token(TokenKind::Var)? {
            self.var_declaration()?;
        } else {
            self.expression_statement()?;
        }

        let mut loop_start = self.current.function.chunk.code.len();
        let mut exit_jump = None;
        if !self.match_token(TokenKind::Semicolon)? {
            self.expression()?;
            self.consume(TokenKind::Semicolon, "Expect ';' after loop condition.")?;
            exit_jump = Some(self.emit_jump(OpCode::JmpF));
            self.emit(OpCode::Pop);
        }

        if !self.match_token(TokenKind::ParenRight)? {
            let body_jump = self.emit_jump(OpCode::Jmp);
            let increment_start = self.current.function.chunk.code.len();
            self.expression()?;
            self.emit(OpCode::Pop);
            self.consume(TokenKind::ParenRight, "Expect ')' after for clauses.")?;

            self.emit_loop(loop_start)?;
            loop_start = increment_start;
            self.patch_jump(body_jump)?;
        }

        self.statement()?;
        self.emit_loop(loop_start)?;

        if let Some(exit_jump) = exit_jump {
            self.patch_jump(exit_jump)?;
            self.emit(OpCode::Pop);
        }

        self.scope_leave();
        Ok(())
    }

    /// `switch (value) { case a: ... case b: ... default: ... }`. Cases are
    /// compared with `==` in order, the first match runs and nothing falls
    /// through.
    fn switch_statement(&mut self) -> Result<()> {
        self.consume(TokenKind::ParenLeft, "Expect '(' after 'switch'.")?;
        self.scope_enter();
        self.expression()?;
        self.consume(TokenKind::ParenRight, "Expect ')' after switch value.")?;

        self.add_local(SWITCH_SUBJECT.to_owned())?;
        self.mark_local_initialized();
        let subject = (self.current.locals.len() - 1) as u8;

        self.consume(TokenKind::BraceLeft, "Expect '{' before switch cases.")?;
        let end = self.add_case()?;

        while self.match_token(TokenKind::Case)? {
            self.emit_with(OpCode::GetLocal, subject);
            self.expression()?;
            self.consume(TokenKind::Colon, "Expect ':' after case value.")?;
            self.emit(OpCode::Eq);

            let next = self.emit_jump(OpCode::JmpF);
            self.emit(OpCode::Pop);
            self.case_body()?;
            self.emit_case_jump(end);

            self.patch_jump(next)?;
            self.emit(OpCode::Pop);
        }

        if self.match_token(TokenKind::Default)? {
            self.consume(TokenKind::Colon, "Expect ':' after 'default'.")?;
            self.case_body()?;
        }

        self.consume(TokenKind::BraceRight, "Expect '}' after switch cases.")?;
        self.patch_case(end);
        self.scope_leave();
        Ok(())
    }

    fn case_body(&mut self) -> Result<()> {
        self.scope_enter();
        while !self.check(TokenKind::Case)?
            && !self.check(TokenKind::Default)?
            && !self.check(TokenKind::BraceRight)?
            && !self.check(TokenKind::EOF)?
        {
            self.decl()?;
        }
        self.scope_leave();
        Ok(())
    }

    fn import_statement(&mut self) -> Result<()> {
        self.consume(TokenKind::String, "Expect module path string after 'import'.")?;
        let path = unescape(trim_quotes(&self.parser.previous()?.data))?;
        let constant = self.add_constant(Value::String(self.heap.string(&path)))?;
        self.consume(TokenKind::Semicolon, "Expect ';' after import.")?;
        self.emit_with(OpCode::Import, constant);
        Ok(())
    }

    fn expression(&mut self) -> Result<()> {
        self.parse_precedence(Precedence::Assignment)
    }

    fn parse_precedence(&mut self, precedence: Precedence) -> Result<()> {
        self.advance();
        let prefix = Self::get_rule(self.parser.previous()?.kind)
            .prefix
            .ok_or(CompileError::ExpectExpression)?;

        let can_assign = precedence <= Precedence::Assignment;
        prefix(self, can_assign)?;

        while precedence <= Self::get_rule(self.parser.current()?.kind).precedence {
            self.advance();
            let infix = Self::get_rule(self.parser.previous()?.kind)
                .infix
                .ok_or(CompileError::ExpectExpression)?;
            infix(self, can_assign)?;
        }

        if can_assign && self.match_token(TokenKind::Equal)? {
            return Err(CompileError::InvalidAssignment);
        }

        Ok(())
    }

    fn grouping(&mut self, _can_assign: bool) -> Result<()> {
        self.expression()?;
        self.consume(TokenKind::ParenRight, "Expect ')' after expression.")
    }

    fn number(&mut self, _can_assign: bool) -> Result<()> {
        let value: f64 = self.parser.previous()?.data.parse()?;
        let constant = self.add_constant(Value::Number(value))?;
        self.emit_with(OpCode::Constant, constant);
        Ok(())
    }

    fn string(&mut self, _can_assign: bool) -> Result<()> {
        let text = unescape(trim_quotes(&self.parser.previous()?.data))?;
        let constant = self.add_constant(Value::String(self.heap.string(&text)))?;
        self.emit_with(OpCode::Constant, constant);
        Ok(())
    }

    fn character(&mut self, _can_assign: bool) -> Result<()> {
        let text = unescape(trim_quotes(&self.parser.previous()?.data))?;
        let ch = text.chars().next().unwrap_or('\0');
        let constant = self.add_constant(Value::Char(ch))?;
        self.emit_with(OpCode::Constant, constant);
        Ok(())
    }

    fn literal(&mut self, _can_assign: bool) -> Result<()> {
        match self.parser.previous()?.kind {
            TokenKind::False => self.emit(OpCode::False),
            TokenKind::True => self.emit(OpCode::True),
            TokenKind::Null => self.emit(OpCode::Null),
            _ => return Err(CompileError::ExpectExpression),
        }
        Ok(())
    }

    fn variable(&mut self, can_assign: bool) -> Result<()> {
        let name = self.parser.previous()?.data.clone();
        self.named_variable(&name, can_assign)
    }

    fn this(&mut self, _can_assign: bool) -> Result<()> {
        if self.class_depth == 0 {
            return Err(CompileError::InvalidThis);
        }
        self.named_variable("this", false)
    }

    fn unary(&mut self, _can_assign: bool) -> Result<()> {
        let kind = self.parser.previous()?.kind;
        self.parse_precedence(Precedence::Unary)?;
        match kind {
            TokenKind::Minus => self.emit(OpCode::Negate),
            TokenKind::Bang => self.emit(OpCode::Not),
            _ => return Err(CompileError::ExpectExpression),
        }
        Ok(())
    }

    fn binary(&mut self, _can_assign: bool) -> Result<()> {
        let kind = self.parser.previous()?.kind;
        let rule = Self::get_rule(kind);
        self.parse_precedence(rule.precedence.higher())?;

        match kind {
            TokenKind::Plus => self.emit(OpCode::Add),
            TokenKind::Minus => self.emit(OpCode::Sub),
            TokenKind::Star => self.emit(OpCode::Mul),
            TokenKind::Slash => self.emit(OpCode::Div),
            TokenKind::Percent => self.emit(OpCode::Mod),
            TokenKind::EqualEqual => self.emit(OpCode::Eq),
            TokenKind::BangEqual => {
                self.emit(OpCode::Eq);
                self.emit(OpCode::Not);
            }
            TokenKind::Greater => self.emit(OpCode::Gt),
            TokenKind::GreaterEqual => {
                self.emit(OpCode::Lt);
                self.emit(OpCode::Not);
            }
            TokenKind::Less => self.emit(OpCode::Lt),
            TokenKind::LessEqual => {
                self.emit(OpCode::Gt);
                self.emit(OpCode::Not);
            }
            _ => return Err(CompileError::ExpectExpression),
        }
        Ok(())
    }

    fn and(&mut self, _can_assign: bool) -> Result<()> {
        let end_jump = self.emit_jump(OpCode::JmpF);
        self.emit(OpCode::Pop);
        self.parse_precedence(Precedence::And)?;
        self.patch_jump(end_jump)
    }

    fn or(&mut self, _can_assign: bool) -> Result<()> {
        let end_jump = self.emit_jump(OpCode::JmpT);
        self.emit(OpCode::Pop);
        self.parse_precedence(Precedence::Or)?;
        self.patch_jump(end_jump)
    }

    fn call(&mut self, _can_assign: bool) -> Result<()> {
        let allocates = self.class_callee.take() == Some(self.current.function.chunk.code.len());
        let arg_count = self.argument_list()?;
        if allocates {
            self.emit_with(OpCode::AllocInstance, arg_count);
        } else {
            self.emit_with(OpCode::Call, arg_count);
        }
        Ok(())
    }

    fn argument_list(&mut self) -> Result<u8> {
        let mut count: usize = 0;
        if !self.check(TokenKind::ParenRight)? {
            loop {
                self.expression()?;
                if count == u8::MAX as usize {
                    return Err(CompileError::ArgumentCount);
                }
                count += 1;
                if !self.match_token(TokenKind::Comma)? {
                    break;
                }
            }
        }
        self.consume(TokenKind::ParenRight, "Expect ')' after arguments.")?;
        Ok(count as u8)
    }

    fn dot(&mut self, can_assign: bool) -> Result<()> {
        self.consume(TokenKind::Identifier, "Expect property name after '.'.")?;
        let name = self.parser.previous()?.data.clone();
        let constant = self.identifier_constant(&name)?;

        if can_assign && self.match_token(TokenKind::Equal)? {
            self.expression()?;
            self.emit_with(OpCode::SetProp, constant);
        } else if self.match_token(TokenKind::ParenLeft)? {
            let arg_count = self.argument_list()?;
            self.emit_with(OpCode::Invoke, constant);
            self.emit_raw(arg_count);
        } else {
            self.emit_with(OpCode::GetProp, constant);
        }
        Ok(())
    }

    fn index(&mut self, can_assign: bool) -> Result<()> {
        self.expression()?;
        self.consume(TokenKind::BracketRight, "Expect ']' after index.")?;

        if can_assign && self.match_token(TokenKind::Equal)? {
            self.expression()?;
            self.emit(OpCode::SetIndex);
        } else {
            self.emit(OpCode::GetIndex);
        }
        Ok(())
    }

    fn vector(&mut self, _can_assign: bool) -> Result<()> {
        let mut count: usize = 0;
        if !self.check(TokenKind::BracketRight)? {
            loop {
                self.expression()?;
                if count == u8::MAX as usize {
                    return Err(CompileError::ElementCount);
                }
                count += 1;
                if !self.match_token(TokenKind::Comma)? {
                    break;
                }
            }
        }
        self.consume(TokenKind::BracketRight, "Expect ']' after vector elements.")?;
        self.emit_with(OpCode::Vector, count as u8);
        Ok(())
    }

    fn table(&mut self, _can_assign: bool) -> Result<()> {
        let mut count: usize = 0;
        if !self.check(TokenKind::BraceRight)? {
            loop {
                let name = if self.match_token(TokenKind::Identifier)? {
                    self.parser.previous()?.data.clone()
                } else {
                    self.consume(TokenKind::String, "Expect table key.")?;
                    unescape(trim_quotes(&self.parser.previous()?.data))?
                };
                let key = self.identifier_constant(&name)?;
                self.emit_with(OpCode::Constant, key);

                self.consume(TokenKind::Colon, "Expect ':' after table key.")?;
                self.expression()?;

                if count == u8::MAX as usize {
                    return Err(CompileError::ElementCount);
                }
                count += 1;
                if !self.match_token(TokenKind::Comma)? {
                    break;
                }
            }
        }
        self.consume(TokenKind::BraceRight, "Expect '}' after table entries.")?;
        self.emit_with(OpCode::Table, count as u8);
        Ok(())
    }

    #[rustfmt::skip]
    fn get_rule(kind: TokenKind) -> ParseRule<'src> {
        match kind {
            TokenKind::ParenLeft    => rule(Some(Self::grouping),  Some(Self::call),   Precedence::Call),
            TokenKind::BracketLeft  => rule(Some(Self::vector),    Some(Self::index),  Precedence::Call),
            TokenKind::BraceLeft    => rule(Some(Self::table),     None,               Precedence::None),
            TokenKind::Dot          => rule(None,                  Some(Self::dot),    Precedence::Call),
            TokenKind::Minus        => rule(Some(Self::unary),     Some(Self::binary), Precedence::Term),
            TokenKind::Plus         => rule(None,                  Some(Self::binary), Precedence::Term),
            TokenKind::Slash        => rule(None,                  Some(Self::binary), Precedence::Factor),
            TokenKind::Star         => rule(None,                  Some(Self::binary), Precedence::Factor),
            TokenKind::Percent      => rule(None,                  Some(Self::binary), Precedence::Factor),
            TokenKind::Bang         => rule(Some(Self::unary),     None,               Precedence::None),
            TokenKind::BangEqual    => rule(None,                  Some(Self::binary), Precedence::Equality),
            TokenKind::EqualEqual   => rule(None,                  Some(Self::binary), Precedence::Equality),
            TokenKind::Greater      => rule(None,                  Some(Self::binary), Precedence::Comparison),
            TokenKind::GreaterEqual => rule(None,                  Some(Self::binary), Precedence::Comparison),
            TokenKind::Less         => rule(None,                  Some(Self::binary), Precedence::Comparison),
            TokenKind::LessEqual    => rule(None,                  Some(Self::binary), Precedence::Comparison),
            TokenKind::Identifier   => rule(Some(Self::variable),  None,               Precedence::None),
            TokenKind::String       => rule(Some(Self::string),    None,               Precedence::None),
            TokenKind::Char         => rule(Some(Self::character), None,               Precedence::None),
            TokenKind::Number       => rule(Some(Self::number),    None,               Precedence::None),
            TokenKind::And          => rule(None,                  Some(Self::and),    Precedence::And),
            TokenKind::Or           => rule(None,                  Some(Self::or),     Precedence::Or),
            TokenKind::False        => rule(Some(Self::literal),   None,               Precedence::None),
            TokenKind::True         => rule(Some(Self::literal),   None,               Precedence::None),
            TokenKind::Null         => rule(Some(Self::literal),   None,               Precedence::None),
            TokenKind::This         => rule(Some(Self::this),      None,               Precedence::None),
            _                       => rule(None,                  None,               Precedence::None),
        }
    }
}

fn trim_quotes(literal: &str) -> &str {
    if literal.len() >= 2 {
        &literal[1..literal.len() - 1]
    } else {
        literal
    }
}

fn unescape(raw: &str) -> Result<String> {
    let mut text = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            text.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => text.push('\n'),
            Some('t') => text.push('\t'),
            Some('r') => text.push('\r'),
            Some('0') => text.push('\0'),
            Some('\\') => text.push('\\'),
            Some('"') => text.push('"'),
            Some('\'') => text.push('\''),
            Some(other) => return Err(CompileError::InvalidEscape(other)),
            None => return Err(CompileError::InvalidEscape(' ')),
        }
    }
    Ok(text)
}

type ParseFn<'src> = fn(&mut Compiler<'src>, bool) -> Result<()>;

struct ParseRule<'src> {
    prefix: Option<ParseFn<'src>>,
    infix: Option<ParseFn<'src>>,
    precedence: Precedence,
}

fn rule<'src>(
    prefix: Option<ParseFn<'src>>,
    infix: Option<ParseFn<'src>>,
    precedence: Precedence,
) -> ParseRule<'src> {
    ParseRule {
        prefix,
        infix,
        precedence,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
enum Precedence {
    None,
    Assignment, // =
    Or,         // or
    And,        // and
    Equality,   // ==, !=
    Comparison, // <, >, <=, >=
    Term,       // +, -
    Factor,     // *, /, %
    Unary,      // !, -
    Call,       // . () []
    Primary,
}

impl Precedence {
    fn higher(&self) -> Precedence {
        match self {
            Precedence::None => Precedence::Assignment,
            Precedence::Assignment => Precedence::Or,
            Precedence::Or => Precedence::And,
            Precedence::And => Precedence::Equality,
            Precedence::Equality => Precedence::Comparison,
            Precedence::Comparison => Precedence::Term,
            Precedence::Term => Precedence::Factor,
            Precedence::Factor => Precedence::Unary,
            Precedence::Unary => Precedence::Call,
            Precedence::Call => Precedence::Primary,
            Precedence::Primary => Precedence::Primary,
        }
    }
}

struct Parser {
    current: Option<Token>,
    previous: Option<Token>,
}

impl Parser {
    fn new() -> Self {
        Self {
            current: None,
            previous: None,
        }
    }

    fn previous(&self) -> Result<&Token> {
        self.previous.as_ref().ok_or(CompileError::TokenNotFound)
    }

    fn current(&self) -> Result<&Token> {
        self.current.as_ref().ok_or(CompileError::TokenNotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debug::disassemble_chunk_to_lines;

    fn compile(source: &str) -> Result<Function> {
        let heap = Heap::default();
        let compiler = Compiler::new(source, "test", &heap, &Config::default());
        compiler.compile()
    }

    fn opcodes(function: &Function) -> Vec<OpCode> {
        let code = &function.chunk.code;
        let mut ops = Vec::new();
        let mut offset = 0;
        while offset < code.len() {
            let op = OpCode::try_from(code[offset]).unwrap();
            ops.push(op);
            offset += 1 + op.operand_bytes();
            if op == OpCode::Closure {
                if let Some(Value::Function(inner)) = function.chunk.read_constant(offset - 2) {
                    offset += 2 * inner.upvalue_count;
                }
            }
        }
        ops
    }

    fn errors(source: &str) -> Vec<String> {
        match compile(source) {
            Ok(_) => Vec::new(),
            Err(err) => err.diagnostics().iter().map(|e| e.to_string()).collect(),
        }
    }

    #[test]
    fn simple_test() {
        let source = "(-1 + 2) * 3 - -4;";
        assert!(compile(source).is_ok());
    }

    #[test]
    fn print_emits_constants_in_source_order() {
        let function = compile("print(1 + 2 * 3);").unwrap();
        let constants: Vec<f64> = function
            .chunk
            .constants
            .iter()
            .filter_map(Value::as_number)
            .collect();
        assert_eq!(constants, vec![1.0, 2.0, 3.0]);
        assert_eq!(
            opcodes(&function),
            vec![
                OpCode::Constant,
                OpCode::Constant,
                OpCode::Constant,
                OpCode::Mul,
                OpCode::Add,
                OpCode::Print,
                OpCode::Null,
                OpCode::Return,
            ]
        );
    }

    #[test]
    fn compile_constants() {
        let source = r#"
        var beverage = "cafe au lait";
        var breakfast = "beignets with " + beverage;
        print breakfast;
        "#;
        assert!(compile(source).is_ok());
    }

    #[test]
    fn identifiers_share_one_constant() {
        let function = compile("var a = 1; a = a + a; print a;").unwrap();
        let keys = function
            .chunk
            .constants
            .iter()
            .filter(|c| matches!(c, Value::Key(_)))
            .count();
        assert_eq!(keys, 1);
    }

    #[test]
    fn compile_weird_assignments() {
        let errors = errors("a * b = c + d;");
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("Invalid assignment target."));
    }

    #[test]
    fn compile_assign_to_itself() {
        let source = r#"
        var a = 1;
        {
            var a = a;
        }"#;
        let errors = errors(source);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("own initializer"));
    }

    #[test]
    fn diagnostics_carry_file_line_and_column() {
        let errors = errors("var x = 1;\nvar = 2;");
        assert_eq!(
            errors,
            vec!["[test:2:5] Error at '=': Expect variable name.".to_owned()]
        );
    }

    #[test]
    fn errors_are_collected_after_synchronizing() {
        let errors = errors("var = 1;\nprint ;\nprint 1;\nreturn 2;");
        assert_eq!(errors.len(), 3);
        assert!(errors[2].contains("top-level"));
    }

    #[test]
    fn missing_token_at_end_of_input() {
        let errors = errors("print 1");
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("at end"));
    }

    #[test]
    fn scanner_errors_are_reported() {
        let errors = errors("var s = \"open;");
        assert!(errors[0].starts_with("[test:1:9] Error: Unterminated string."));
    }

    #[test]
    fn compile_if_elif_else() {
        let function = compile("if (1) print 1; elif (2) print 2; else print 3;").unwrap();
        assert_eq!(function.chunk.cases.len(), 1);
        assert!(opcodes(&function).contains(&OpCode::JmpL));
        assert_eq!(function.chunk.cases[0], function.chunk.code.len() - 2);
    }

    #[test]
    fn compile_switch() {
        let source = r#"
            switch (2) {
                case 1: print "one";
                case 2: var two = "two"; print two;
                default: print "many";
            }
        "#;
        let function = compile(source).unwrap();
        let ops = opcodes(&function);
        assert_eq!(ops.iter().filter(|op| **op == OpCode::JmpL).count(), 2);
        assert_eq!(ops.iter().filter(|op| **op == OpCode::Eq).count(), 2);
    }

    #[test]
    fn compile_and_or() {
        assert!(compile("print true and false;").is_ok());
        let function = compile("print true or false;").unwrap();
        assert!(opcodes(&function).contains(&OpCode::JmpT));
    }

    #[test]
    fn compile_loops() {
        assert!(compile("while (true) {}").is_ok());
        assert!(compile("for (var i = 0; i < 10; i = i + 1) {}").is_ok());
        assert!(compile("for (;;) {}").is_ok());
    }

    #[test]
    fn compile_fibonacci_rec() {
        let source = r#"
            fun fib(n) {
                if (n < 2) {
                    return n;
                }
                return fib(n-2) + fib(n-1);
            }
            print fib(20);
        "#;
        assert!(compile(source).is_ok());
    }

    #[test]
    fn block_locals_pop_together() {
        let function = compile("{ var a = 1; var b = 2; var c = 3; }").unwrap();
        let ops = opcodes(&function);
        assert!(ops.contains(&OpCode::PopN));
        assert!(!ops.contains(&OpCode::Pop));
    }

    #[test]
    fn captured_locals_are_closed() {
        let source = r#"
            fun makeClosure() {
                var local = "local";
                fun closure() {
                    print local;
                }
                return closure;
            }
            {
                var shared = 1;
                fun get() { return shared; }
            }
        "#;
        let function = compile(source).unwrap();
        assert!(opcodes(&function).contains(&OpCode::CloseUpvalue));
    }

    #[test]
    fn calling_a_declared_class_allocates() {
        let source = r#"
            class Point {
                var x = 0;
                var y = 0;
                init(x, y) { this.x = x; this.y = y; }
                sum() { return this.x + this.y; }
            }
            var p = Point(1, 2);
            print p.sum();
            fun make() { return 1; }
            make();
        "#;
        let function = compile(source).unwrap();
        let ops = opcodes(&function);
        assert_eq!(ops.iter().filter(|op| **op == OpCode::AllocInstance).count(), 1);
        assert_eq!(ops.iter().filter(|op| **op == OpCode::Call).count(), 1);
        assert_eq!(ops.iter().filter(|op| **op == OpCode::Field).count(), 2);
        assert_eq!(ops.iter().filter(|op| **op == OpCode::Method).count(), 2);
        assert!(ops.contains(&OpCode::Invoke));
    }

    #[test]
    fn nested_functions_do_not_inherit_the_class_callee() {
        for padding in 0..16 {
            let locals: String = (0..padding).map(|i| format!("var p{} = null; ", i)).collect();
            let source = format!("class Foo {{}} var x = Foo; fun f() {{ {} bar(); }}", locals);
            let function = compile(&source).unwrap();
            assert!(!opcodes(&function).contains(&OpCode::AllocInstance));

            let inner = function.chunk.constants.iter().find_map(|constant| match constant {
                Value::Function(inner) => Some(inner.clone()),
                _ => None,
            });
            let inner = inner.unwrap();
            assert!(opcodes(&inner).contains(&OpCode::Call));
            assert!(!opcodes(&inner).contains(&OpCode::AllocInstance));
        }
    }

    #[test]
    fn this_outside_class_is_an_error() {
        let errors = errors("print this;");
        assert!(errors[0].contains("'this' outside of a class"));
    }

    #[test]
    fn initializer_cannot_return_a_value() {
        let errors = errors("class A { init() { return 1; } }");
        assert!(errors[0].contains("initializer"));
    }

    #[test]
    fn collections_and_indexing() {
        let function = compile(r#"var v = [1, 2, 3]; v[0] = 'a'; var t = {x: 1, "y": 2}; print t.x;"#)
            .unwrap();
        let ops = opcodes(&function);
        assert!(ops.contains(&OpCode::Vector));
        assert!(ops.contains(&OpCode::SetIndex));
        assert!(ops.contains(&OpCode::Table));
        assert!(ops.contains(&OpCode::GetProp));
    }

    #[test]
    fn import_takes_a_string_path() {
        let function = compile(r#"import "lib/util.ks";"#).unwrap();
        assert!(opcodes(&function).contains(&OpCode::Import));
        assert!(compile("import util;").is_err());
    }

    #[test]
    fn statements_leave_the_stack_balanced() {
        let function =
            compile("var a = 1; print a + 2; { var b = [1, 2]; b[0] = {k: 3}; print b; } a = -a;")
                .unwrap();
        let code = &function.chunk.code;
        let mut height = 0;
        let mut offset = 0;
        while offset < code.len() {
            let op = OpCode::try_from(code[offset]).unwrap();
            if op == OpCode::Return {
                break;
            }
            let operand = code.get(offset + 1).copied().unwrap_or(0);
            height += op.stack_effect(operand).unwrap();
            offset += 1 + op.operand_bytes();
        }
        // Only the implicit return value is left.
        assert_eq!(height, 1);
    }

    #[test]
    fn disassembly_names_every_instruction() {
        let function = compile("var a = [1]; print a[0] % 2;").unwrap();
        let lines = disassemble_chunk_to_lines(&function.chunk);
        assert!(lines.iter().any(|line| line.contains("OP_VECTOR")));
        assert!(lines.iter().any(|line| line.contains("OP_MOD")));
    }
}
