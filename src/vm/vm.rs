use colored::*;
use std::collections::HashSet;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use super::{
    instruction::OpCode, native, value::Value, CallFrame, Result, RuntimeError, RuntimeResult,
    Stack, VMError,
};
use crate::compiler::Compiler;
use crate::config::Config;
use crate::debug;
use crate::memory::{
    Class, Closure, Function, Handle, Heap, Key, NativeFn, NativeFunction, Table, Upvalue,
};

/// One interpreter instance: its heap, stack, frames and globals.
pub struct VM {
    config: Config,
    stack: Stack,
    frames: Vec<CallFrame>,
    globals: Table,

    // Sorted by stack slot, lowest first.
    open_upvalues: Vec<Handle<Upvalue>>,

    natives: Vec<Handle<NativeFn>>,
    modules: HashSet<PathBuf>,
    // Directory of each module being loaded, imports resolve against the last one.
    module_dirs: Vec<PathBuf>,
    init_key: Handle<Key>,
    output: Box<dyn Write>,
    heap: Heap,
}

impl VM {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        let heap = Heap::new(&config);
        let mut vm = Self {
            stack: Stack::new(&heap),
            frames: Vec::new(),
            globals: heap.new_table(),
            open_upvalues: Vec::new(),
            natives: Vec::new(),
            modules: HashSet::new(),
            module_dirs: Vec::new(),
            init_key: heap.intern("init"),
            output: Box::new(io::stdout()),
            config,
            heap,
        };

        for (name, arity, fun) in native::NATIVES {
            vm.register_native(name, *arity, *fun);
        }
        vm
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Redirects `print` output, stdout by default.
    pub fn set_output(&mut self, output: Box<dyn Write>) {
        self.output = output;
    }

    pub fn natives(&self) -> &[Handle<NativeFn>] {
        &self.natives
    }

    /// Installs `fun` as the global `name`. Returns its index in `natives()`.
    pub fn register_native(&mut self, name: &str, arity: Option<u8>, fun: NativeFunction) -> usize {
        let native = self.heap.native(name, arity, fun);
        self.globals
            .insert(native.name.clone(), Value::Native(native.clone()));
        self.natives.push(native);
        self.natives.len() - 1
    }

    pub fn global(&self, name: &str) -> Option<Value> {
        self.globals.get(&self.heap.intern(name))
    }

    /// Compiles and runs `source` as a top-level script.
    pub fn interpret(&mut self, source: &str) -> Result<()> {
        let function = self.compile(source, "script")?;
        self.interpret_function(function)
    }

    /// Runs an already compiled top-level function.
    pub fn interpret_function(&mut self, function: Function) -> Result<()> {
        let closure = self.heap.closure(self.heap.function(function), Vec::new());
        let depth = self.frames.len();
        self.stack.push(Value::Closure(closure.clone()));

        match self.call(closure, 0).and_then(|()| self.run(depth)) {
            Ok(_) => Ok(()),
            Err(error) => Err(self.runtime_error(error)),
        }
    }

    /// Compiles and runs the file at `path`. Loading a file that already ran
    /// without errors does nothing.
    pub fn load_module(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let io_error = |source| VMError::Io {
            path: path.to_path_buf(),
            source,
        };

        let canonical = path.canonicalize().map_err(io_error)?;
        if self.modules.contains(&canonical) {
            self.log_module("already loaded", &canonical);
            return Ok(());
        }
        let source = fs::read_to_string(&canonical).map_err(io_error)?;
        self.log_module("loading", &canonical);

        let function = self.compile(&source, &path.display().to_string())?;
        self.modules.insert(canonical.clone());
        self.module_dirs.push(module_dir(&canonical));
        let result = self.interpret_function(function);
        self.module_dirs.pop();
        if result.is_err() {
            self.modules.remove(&canonical);
        }
        result
    }

    /// Calls the global function `name` with `args` and runs it to completion.
    pub fn call_global(&mut self, name: &str, args: Vec<Value>) -> Result<Value> {
        let callee = match self.global(name) {
            Some(callee) => callee,
            None => return Err(self.runtime_error(RuntimeError::UndefinedVariable(name.to_owned()))),
        };
        let argc = match u8::try_from(args.len()) {
            Ok(argc) => argc,
            Err(_) => {
                let error = RuntimeError::Arity {
                    expected: u8::MAX,
                    got: u8::MAX,
                };
                return Err(self.runtime_error(error));
            }
        };

        let depth = self.frames.len();
        let base = self.stack.len();
        self.stack.push(callee.clone());
        for arg in args {
            self.stack.push(arg);
        }

        let result = self.call_value(callee, argc).and_then(|()| {
            if self.frames.len() > depth {
                self.run(depth)
            } else {
                // Natives and initializer-less classes complete without a frame.
                self.stack.pop()
            }
        });
        match result {
            Ok(value) => {
                self.stack.truncate(base);
                Ok(value)
            }
            Err(error) => Err(self.runtime_error(error)),
        }
    }

    fn compile(&self, source: &str, file: &str) -> Result<Function> {
        let compiler = Compiler::new(source, file, &self.heap, &self.config);
        compiler.compile().map_err(|error| {
            for diagnostic in error.diagnostics() {
                eprintln!("{}", diagnostic);
            }
            VMError::from(error)
        })
    }

    /// Prints `error` with a trace of the active frames, innermost first,
    /// and resets the VM to a clean top-level state.
    fn runtime_error(&mut self, error: RuntimeError) -> VMError {
        let trace: Vec<String> = self
            .frames
            .iter()
            .rev()
            .map(|frame| match &frame.function().name {
                Some(name) => format!("[line {}] in {}()", frame.line(), name),
                None => format!("[line {}] in script", frame.line()),
            })
            .collect();

        eprintln!("{} {}", "[RUNTIME ERROR]".red().bold(), error);
        for line in trace.iter() {
            eprintln!("{}", line);
        }

        // Escaped closures keep the values they saw when the error unwound.
        self.close_upvalues(0);
        self.frames.clear();
        self.stack.clear();
        VMError::RuntimeError { error, trace }
    }

    fn log_module(&self, message: &str, path: &Path) {
        if self.config.log_modules {
            println!("{}\t{} {}", "[MODULE]".cyan(), message, path.display());
        }
    }

    fn frame(&self) -> RuntimeResult<&CallFrame> {
        self.frames.last().ok_or(RuntimeError::NoCallFrame)
    }

    fn frame_mut(&mut self) -> RuntimeResult<&mut CallFrame> {
        self.frames.last_mut().ok_or(RuntimeError::NoCallFrame)
    }

    fn read_byte(&mut self) -> RuntimeResult<u8> {
        self.frame_mut()?.next_instruction()
    }

    fn read_constant(&mut self) -> RuntimeResult<Value> {
        self.frame_mut()?.next_instruction_as_constant()
    }

    fn read_key(&mut self) -> RuntimeResult<Handle<Key>> {
        self.frame_mut()?.next_instruction_as_key()
    }

    fn read_jump(&mut self) -> RuntimeResult<usize> {
        self.frame_mut()?.next_instruction_as_jump()
    }

    /// Executes until the frame entered above `base_depth` returns, giving
    /// back its result.
    fn run(&mut self, base_depth: usize) -> RuntimeResult<Value> {
        loop {
            if let Some(result) = self.step(base_depth)? {
                return Ok(result);
            }
        }
    }

    fn step(&mut self, base_depth: usize) -> RuntimeResult<Option<Value>> {
        if self.config.trace_stack || self.config.trace_execution {
            self.trace()?;
        }

        let byte = self.read_byte()?;
        let instruction = OpCode::try_from(byte).map_err(RuntimeError::InvalidOpcode)?;

        match instruction {
            OpCode::Constant => {
                let constant = self.read_constant()?;
                self.stack.push(constant);
            }
            OpCode::Null => self.stack.push(Value::Null),
            OpCode::True => self.stack.push(Value::Bool(true)),
            OpCode::False => self.stack.push(Value::Bool(false)),
            OpCode::Pop => {
                self.stack.pop()?;
            }
            OpCode::PopN => {
                let count = self.read_byte()? as usize;
                self.stack.popn(count)?;
            }
            OpCode::Add => {
                let rhs = self.stack.pop()?;
                let lhs = self.stack.pop()?;
                let result = lhs.add(rhs, &self.heap)?;
                self.stack.push(result);
            }
            OpCode::Sub => self.op_arithmetic(|lhs, rhs| lhs - rhs, false)?,
            OpCode::Mul => self.op_arithmetic(|lhs, rhs| lhs * rhs, false)?,
            OpCode::Div => self.op_arithmetic(|lhs, rhs| lhs / rhs, true)?,
            OpCode::Mod => self.op_arithmetic(|lhs, rhs| lhs % rhs, true)?,
            OpCode::Negate => match self.stack.pop()? {
                Value::Number(value) => self.stack.push(Value::Number(-value)),
                other => {
                    return Err(RuntimeError::TypeError(format!(
                        "Operand must be a number, got {}.",
                        other.type_name()
                    )))
                }
            },
            OpCode::Not => {
                let value = self.stack.pop()?;
                self.stack.push(Value::Bool(value.is_falsey()));
            }
            OpCode::Eq => {
                let rhs = self.stack.pop()?;
                let lhs = self.stack.pop()?;
                self.stack.push(Value::Bool(lhs.equals(&rhs)?));
            }
            OpCode::Lt => {
                let rhs = self.stack.pop()?;
                let lhs = self.stack.pop()?;
                self.stack.push(Value::Bool(lhs.compare(&rhs)?.is_lt()));
            }
            OpCode::Gt => {
                let rhs = self.stack.pop()?;
                let lhs = self.stack.pop()?;
                self.stack.push(Value::Bool(lhs.compare(&rhs)?.is_gt()));
            }
            OpCode::Print => {
                let value = self.stack.pop()?;
                writeln!(self.output, "{}", value)
                    .map_err(|err| RuntimeError::Output(err.to_string()))?;
            }
            OpCode::GetLocal => {
                let slot = self.read_byte()? as usize + self.frame()?.stack_base;
                let value = self.stack.get(slot)?.clone();
                self.stack.push(value);
            }
            OpCode::SetLocal => {
                let slot = self.read_byte()? as usize + self.frame()?.stack_base;
                let value = self.stack.peek(0)?.clone();
                self.stack.set(slot, value)?;
            }
            OpCode::GetGlobal => {
                let name = self.read_key()?;
                let value = self
                    .globals
                    .get(&name)
                    .ok_or_else(|| RuntimeError::UndefinedVariable(name.to_text()))?;
                self.stack.push(value);
            }
            OpCode::SetGlobal => {
                let name = self.read_key()?;
                if !self.globals.contains(&name) {
                    return Err(RuntimeError::UndefinedVariable(name.to_text()));
                }
                let value = self.stack.peek(0)?.clone();
                self.globals.insert(name, value);
            }
            OpCode::GlobalDef => {
                let name = self.read_key()?;
                let value = self.stack.pop()?;
                self.globals.insert(name, value);
            }
            OpCode::GetUpvalue => {
                let upvalue = self.frame_upvalue()?;
                let value = upvalue.get(self.stack.as_slice());
                self.stack.push(value);
            }
            OpCode::SetUpvalue => {
                let upvalue = self.frame_upvalue()?;
                let value = self.stack.peek(0)?.clone();
                upvalue.set(self.stack.as_mut_slice(), value);
            }
            OpCode::CloseUpvalue => {
                let top = self.stack.len().saturating_sub(1);
                self.close_upvalues(top);
                self.stack.pop()?;
            }
            OpCode::Jmp => {
                let offset = self.read_jump()?;
                self.frame_mut()?.ip += offset;
            }
            OpCode::JmpF => {
                let offset = self.read_jump()?;
                if self.stack.peek(0)?.is_falsey() {
                    self.frame_mut()?.ip += offset;
                }
            }
            OpCode::JmpT => {
                let offset = self.read_jump()?;
                if !self.stack.peek(0)?.is_falsey() {
                    self.frame_mut()?.ip += offset;
                }
            }
            OpCode::JmpL => {
                let case = self.read_jump()?;
                let frame = self.frame_mut()?;
                let target = *frame
                    .chunk()
                    .cases
                    .get(case)
                    .ok_or(RuntimeError::EndOfCode)?;
                frame.ip = target;
            }
            OpCode::Loop => {
                let offset = self.read_jump()?;
                self.frame_mut()?.ip -= offset;
            }
            OpCode::Call => {
                let arg_count = self.read_byte()?;
                let callee = self.stack.peek(arg_count as usize)?.clone();
                self.call_value(callee, arg_count)?;
            }
            OpCode::AllocInstance => {
                let arg_count = self.read_byte()?;
                match self.stack.peek(arg_count as usize)?.clone() {
                    Value::Class(class) => self.instantiate(class, arg_count)?,
                    callee => self.call_value(callee, arg_count)?,
                }
            }
            OpCode::Return => {
                let result = self.stack.pop()?;
                let frame = self.frames.pop().ok_or(RuntimeError::NoCallFrame)?;
                self.close_upvalues(frame.stack_base);
                self.stack.truncate(frame.stack_base);

                if self.frames.len() == base_depth {
                    return Ok(Some(result));
                }
                self.stack.push(result);
            }
            OpCode::Closure => self.op_closure()?,
            OpCode::Class => {
                let name = self.read_key()?;
                self.stack.push(Value::Class(self.heap.class(name)));
            }
            OpCode::Field => {
                let name = self.read_key()?;
                let value = self.stack.pop()?;
                let class = self.class_on_top()?;
                class.fields.borrow_mut().insert(name, value);
            }
            OpCode::Method => {
                let name = self.read_key()?;
                let method = self.stack.pop()?;
                let closure = method.as_closure().ok_or_else(|| {
                    RuntimeError::TypeError(format!(
                        "Methods must be functions, got {}.",
                        method.type_name()
                    ))
                })?;
                let class = self.class_on_top()?;
                if name == self.init_key {
                    *class.initializer.borrow_mut() = Some(closure.clone());
                }
                class.methods.borrow_mut().insert(name, Value::Closure(closure));
            }
            OpCode::GetProp => {
                let name = self.read_key()?;
                let target = self.stack.pop()?;
                let value = get_property(&target, &name)?;
                self.stack.push(value);
            }
            OpCode::SetProp => {
                let name = self.read_key()?;
                let value = self.stack.pop()?;
                let target = self.stack.pop()?;
                set_property(&target, name, value.clone())?;
                self.stack.push(value);
            }
            OpCode::Invoke => {
                let name = self.read_key()?;
                let arg_count = self.read_byte()?;
                self.invoke(name, arg_count)?;
            }
            OpCode::Vector => {
                let count = self.read_byte()? as usize;
                let items = self.stack.popn(count)?;
                self.stack.push(Value::Vector(self.heap.vector(items)));
            }
            OpCode::Table => {
                let count = self.read_byte()? as usize;
                let mut entries = self.stack.popn(count * 2)?.into_iter();
                let mut table = self.heap.new_table();
                while let (Some(key), Some(value)) = (entries.next(), entries.next()) {
                    let key = key.as_key().ok_or_else(|| {
                        RuntimeError::TypeError(format!(
                            "Table keys must be identifiers, got {}.",
                            key.type_name()
                        ))
                    })?;
                    table.insert(key, value);
                }
                self.stack.push(Value::Table(self.heap.table(table)));
            }
            OpCode::GetIndex => {
                let index = self.stack.pop()?;
                let target = self.stack.pop()?;
                let value = self.get_index(&target, &index)?;
                self.stack.push(value);
            }
            OpCode::SetIndex => {
                let value = self.stack.pop()?;
                let index = self.stack.pop()?;
                let target = self.stack.pop()?;
                self.set_index(&target, &index, value.clone())?;
                self.stack.push(value);
            }
            OpCode::Import => {
                let path = self.read_constant()?;
                let path = path.as_text().ok_or_else(|| {
                    RuntimeError::TypeError(format!(
                        "Module path must be a string, got {}.",
                        path.type_name()
                    ))
                })?;
                self.import(&path)?;
            }
        }
        Ok(None)
    }

    fn trace(&self) -> RuntimeResult<()> {
        if self.config.trace_stack {
            let stack = self
                .stack
                .iter()
                .map(|value| format!("[{}]", value))
                .collect::<Vec<_>>()
                .join(" ");
            println!("\n{}\t\t{}", "[STACK]".yellow(), stack);
        }
        if self.config.trace_execution {
            let frame = self.frame()?;
            let (text, _) = debug::disassemble_instruction(frame.chunk(), frame.ip);
            println!("{}\t{:04}\t{}", "[Instruction]".green(), frame.ip, text);
        }
        Ok(())
    }

    fn op_arithmetic(&mut self, op: fn(f64, f64) -> f64, checks_zero: bool) -> RuntimeResult<()> {
        let rhs = self.stack.pop()?;
        let lhs = self.stack.pop()?;
        let result = lhs.arithmetic(rhs, op, checks_zero)?;
        self.stack.push(result);
        Ok(())
    }

    fn op_closure(&mut self) -> RuntimeResult<()> {
        let function = match self.read_constant()? {
            Value::Function(function) => function,
            other => {
                return Err(RuntimeError::TypeError(format!(
                    "Expected a function constant, got {}.",
                    other.type_name()
                )))
            }
        };

        let mut upvalues = Vec::with_capacity(function.upvalue_count);
        for _ in 0..function.upvalue_count {
            let is_local = self.read_byte()? == 1;
            let index = self.read_byte()? as usize;
            let upvalue = if is_local {
                let slot = self.frame()?.stack_base + index;
                self.capture_upvalue(slot)
            } else {
                self.frame()?
                    .closure
                    .upvalues
                    .get(index)
                    .cloned()
                    .ok_or(RuntimeError::EndOfCode)?
            };
            upvalues.push(upvalue);
        }

        let closure = self.heap.closure(function, upvalues);
        self.stack.push(Value::Closure(closure));
        Ok(())
    }

    fn frame_upvalue(&mut self) -> RuntimeResult<Handle<Upvalue>> {
        let slot = self.read_byte()? as usize;
        self.frame()?
            .closure
            .upvalues
            .get(slot)
            .cloned()
            .ok_or(RuntimeError::EndOfCode)
    }

    /// Opens a new upvalue on `slot` for one closure, in sorted position.
    /// Closures capturing the same slot share it through the stack until
    /// it is closed, then each keeps its own copy.
    fn capture_upvalue(&mut self, slot: usize) -> Handle<Upvalue> {
        let position = self
            .open_upvalues
            .partition_point(|upvalue| upvalue.open_slot().map_or(false, |open| open <= slot));
        let upvalue = self.heap.upvalue(slot);
        self.open_upvalues.insert(position, upvalue.clone());
        upvalue
    }

    /// Closes every open upvalue at or above stack slot `from`.
    fn close_upvalues(&mut self, from: usize) {
        while let Some(slot) = self.open_upvalues.last().and_then(|upvalue| upvalue.open_slot()) {
            if slot < from {
                break;
            }
            let value = self.stack.get(slot).map(Value::clone).unwrap_or_default();
            if let Some(upvalue) = self.open_upvalues.pop() {
                upvalue.close(value);
            }
        }
    }

    fn class_on_top(&self) -> RuntimeResult<Handle<Class>> {
        let top = self.stack.peek(0)?;
        top.as_class().ok_or_else(|| {
            RuntimeError::TypeError(format!("Expected a class, got {}.", top.type_name()))
        })
    }

    fn call_value(&mut self, callee: Value, arg_count: u8) -> RuntimeResult<()> {
        match callee {
            Value::Closure(closure) => self.call(closure, arg_count),
            Value::Native(native) => {
                if let Some(arity) = native.arity {
                    if arity != arg_count {
                        return Err(RuntimeError::Arity {
                            expected: arity,
                            got: arg_count,
                        });
                    }
                }

                let args_start = self.stack.len() - arg_count as usize;
                let result = (native.fun)(&self.heap, &self.stack.as_slice()[args_start..]);
                self.stack.truncate(args_start - 1);
                self.stack.push(result);
                Ok(())
            }
            Value::Class(class) => self.instantiate(class, arg_count),
            _ => Err(RuntimeError::NotCallable),
        }
    }

    fn call(&mut self, closure: Handle<Closure>, arg_count: u8) -> RuntimeResult<()> {
        let arity = closure.function.arity;
        if arg_count != arity {
            return Err(RuntimeError::Arity {
                expected: arity,
                got: arg_count,
            });
        }
        if self.frames.len() >= self.config.max_frames {
            return Err(RuntimeError::StackOverflow);
        }

        let stack_base = self.stack.len() - arg_count as usize - 1;
        self.frames.push(CallFrame::new(closure, stack_base));
        Ok(())
    }

    /// Replaces the class in the callee slot by a new instance and runs the
    /// initializer on it.
    fn instantiate(&mut self, class: Handle<Class>, arg_count: u8) -> RuntimeResult<()> {
        let instance = self.heap.instance(class.clone());
        let slot = self.stack.len() - arg_count as usize - 1;
        self.stack.set(slot, Value::Instance(instance))?;

        let initializer = class.initializer.borrow().clone();
        match initializer {
            Some(initializer) => self.call(initializer, arg_count),
            None if arg_count == 0 => Ok(()),
            None => Err(RuntimeError::Arity {
                expected: 0,
                got: arg_count,
            }),
        }
    }

    fn invoke(&mut self, name: Handle<Key>, arg_count: u8) -> RuntimeResult<()> {
        let receiver_slot = self.stack.len() - arg_count as usize - 1;
        let receiver = self.stack.peek(arg_count as usize)?.clone();

        match receiver {
            Value::Instance(instance) => {
                let field = instance.fields.borrow().get(&name);
                if let Some(field) = field {
                    self.stack.set(receiver_slot, field.clone())?;
                    return self.call_value(field, arg_count);
                }
                let method = instance
                    .class
                    .method(&name)
                    .ok_or_else(|| RuntimeError::UndefinedProperty(name.to_text()))?;
                self.call(method, arg_count)
            }
            Value::Table(table) => {
                let entry = table
                    .borrow()
                    .get(&name)
                    .ok_or_else(|| RuntimeError::UndefinedProperty(name.to_text()))?;
                self.stack.set(receiver_slot, entry.clone())?;
                self.call_value(entry, arg_count)
            }
            other => Err(RuntimeError::NoProperties(other.type_name())),
        }
    }

    fn get_index(&self, target: &Value, index: &Value) -> RuntimeResult<Value> {
        match (target, index) {
            (Value::Vector(vector), Value::Number(n)) => {
                let i = vector_index(*n, vector.len())?;
                vector.get(i).ok_or(RuntimeError::IndexOutOfBounds {
                    index: *n,
                    len: vector.len(),
                })
            }
            (Value::String(string), Value::Number(n)) => {
                let len = string.with_str(|s| s.chars().count());
                let i = vector_index(*n, len)?;
                string
                    .with_str(|s| s.chars().nth(i))
                    .map(Value::Char)
                    .ok_or(RuntimeError::IndexOutOfBounds { index: *n, len })
            }
            (Value::Table(table), Value::String(_) | Value::Key(_)) => {
                let key = self.index_key(index)?;
                Ok(table.borrow().get(&key).unwrap_or_default())
            }
            _ => Err(RuntimeError::InvalidIndex {
                target: target.type_name(),
                index: index.type_name(),
            }),
        }
    }

    fn set_index(&self, target: &Value, index: &Value, value: Value) -> RuntimeResult<()> {
        match (target, index) {
            (Value::Vector(vector), Value::Number(n)) => {
                let i = vector_index(*n, vector.len())?;
                if vector.set(i, value) {
                    Ok(())
                } else {
                    Err(RuntimeError::IndexOutOfBounds {
                        index: *n,
                        len: vector.len(),
                    })
                }
            }
            (Value::Table(table), Value::String(_) | Value::Key(_)) => {
                let key = self.index_key(index)?;
                table.borrow_mut().insert(key, value);
                Ok(())
            }
            _ => Err(RuntimeError::InvalidIndex {
                target: target.type_name(),
                index: index.type_name(),
            }),
        }
    }

    fn index_key(&self, index: &Value) -> RuntimeResult<Handle<Key>> {
        match index {
            Value::Key(key) => Ok(key.clone()),
            other => match other.as_text() {
                Some(text) => Ok(self.heap.intern(&text)),
                None => Err(RuntimeError::InvalidIndex {
                    target: "table",
                    index: other.type_name(),
                }),
            },
        }
    }

    /// Runs the module at `path`, relative to the importing module, as a
    /// nested frame. A module that completed is not run again.
    fn import(&mut self, path: &str) -> RuntimeResult<()> {
        let import_error = |reason: String| RuntimeError::Import {
            path: path.to_owned(),
            reason,
        };

        let dir = self
            .module_dirs
            .last()
            .cloned()
            .unwrap_or_else(|| PathBuf::from("."));
        let canonical = dir
            .join(path)
            .canonicalize()
            .map_err(|err| import_error(err.to_string()))?;
        if self.modules.contains(&canonical) {
            self.log_module("already loaded", &canonical);
            return Ok(());
        }

        let source = fs::read_to_string(&canonical).map_err(|err| import_error(err.to_string()))?;
        self.log_module("importing", &canonical);

        let function = self
            .compile(&source, path)
            .map_err(|_| import_error("Module failed to compile.".to_owned()))?;
        let closure = self.heap.closure(self.heap.function(function), Vec::new());

        let depth = self.frames.len();
        self.stack.push(Value::Closure(closure.clone()));
        self.call(closure, 0)?;

        // Marked before running, a cyclic import of this module is a no-op.
        self.modules.insert(canonical.clone());
        self.module_dirs.push(module_dir(&canonical));
        let result = self.run(depth);
        self.module_dirs.pop();
        if result.is_err() {
            self.modules.remove(&canonical);
        }
        result.map(|_| ())
    }
}

impl Default for VM {
    fn default() -> Self {
        Self::new()
    }
}

fn get_property(target: &Value, name: &Handle<Key>) -> RuntimeResult<Value> {
    match target {
        Value::Instance(instance) => instance
            .fields
            .borrow()
            .get(name)
            .ok_or_else(|| RuntimeError::UndefinedProperty(name.to_text())),
        Value::Table(table) => Ok(table.borrow().get(name).unwrap_or_default()),
        other => Err(RuntimeError::NoProperties(other.type_name())),
    }
}

fn set_property(target: &Value, name: Handle<Key>, value: Value) -> RuntimeResult<()> {
    match target {
        Value::Instance(instance) => {
            instance.fields.borrow_mut().insert(name, value);
            Ok(())
        }
        Value::Table(table) => {
            table.borrow_mut().insert(name, value);
            Ok(())
        }
        other => Err(RuntimeError::NoProperties(other.type_name())),
    }
}

fn vector_index(index: f64, len: usize) -> RuntimeResult<usize> {
    if index < 0.0 || index.fract() != 0.0 || index >= len as f64 {
        return Err(RuntimeError::IndexOutOfBounds { index, len });
    }
    Ok(index as usize)
}

fn module_dir(path: &Path) -> PathBuf {
    path.parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Collects everything the VM prints.
    #[derive(Clone, Default)]
    struct Output(Rc<RefCell<Vec<u8>>>);

    impl Write for Output {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Output {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.borrow()).into_owned()
        }
    }

    fn vm() -> (VM, Output) {
        let mut vm = VM::new();
        let output = Output::default();
        vm.set_output(Box::new(output.clone()));
        (vm, output)
    }

    fn run(source: &str) -> (Result<()>, String) {
        let (mut vm, output) = vm();
        let result = vm.interpret(source);
        (result, output.text())
    }

    fn output(source: &str) -> String {
        let (result, output) = run(source);
        if let Err(err) = result {
            panic!("unexpected error: {}", err);
        }
        output
    }

    fn runtime_error(source: &str) -> RuntimeError {
        match run(source).0 {
            Err(VMError::RuntimeError { error, .. }) => error,
            other => panic!("expected a runtime error, got {:?}", other),
        }
    }

    #[test]
    fn vm_raw_instructions() {
        use crate::compiler::chunk::Chunk;

        let add_constant = |chunk: &mut Chunk, value| {
            let index = chunk.add_constant(Value::Number(value)).unwrap();
            chunk.write_index(OpCode::Constant, index, 1, 1);
        };

        let mut chunk = Chunk::new();
        add_constant(&mut chunk, 1.2);
        add_constant(&mut chunk, 3.4);
        chunk.write(OpCode::Add, 1, 1);
        add_constant(&mut chunk, 5.6);
        chunk.write(OpCode::Div, 1, 1);
        chunk.write(OpCode::Negate, 1, 1);
        chunk.write(OpCode::Print, 1, 1);
        chunk.write(OpCode::Null, 1, 1);
        chunk.write(OpCode::Return, 1, 1);

        let mut fun = Function::script();
        fun.chunk = chunk;

        let (mut vm, output) = vm();
        assert!(vm.interpret_function(fun).is_ok());
        assert!(output.text().starts_with("-0.82"));
    }

    #[test]
    fn vm_arithmetic() {
        assert_eq!(output("print 1 + 2 * 3;"), "7\n");
        assert_eq!(output("print (-1 + 2) * 3 - -4;"), "7\n");
        assert_eq!(output("print 7 % 4;"), "3\n");
        assert_eq!(output("print !(5 - 4 > 3 * 2 == !null);"), "true\n");
    }

    #[test]
    fn vm_strings() {
        assert_eq!(output(r#"print "st" + "ri" + "ng";"#), "string\n");
        assert_eq!(output(r#"print "ab" + 'c';"#), "abc\n");
        assert_eq!(output(r#"print "abc" < "abd";"#), "true\n");
        assert_eq!(output(r#"print "a\tb";"#), "a\tb\n");
    }

    #[test]
    fn vm_constants() {
        let source = r#"
        var beverage = "cafe au lait";
        var breakfast = "beignets with " + beverage;
        print breakfast;
        "#;
        assert_eq!(output(source), "beignets with cafe au lait\n");
    }

    #[test]
    fn vm_locals() {
        let source = r#"
        {
            var a = 1;
            var b = a;
            b = b + 1;
            var c = a + b;
            a = 5;
            b = 10;
            print c;
            c = a + b;
            print c;
        }
        "#;
        assert_eq!(output(source), "3\n15\n");
    }

    #[test]
    fn stack_is_empty_after_interpret() {
        let (mut vm, _) = vm();
        let source = r#"
            var a = 1;
            { var b = 2; { var c = 3; print a + b + c; } }
            fun f(x) { var y = x; return y; }
            f(1);
            for (var i = 0; i < 3; i = i + 1) { var j = i; }
        "#;
        vm.interpret(source).unwrap();
        assert!(vm.stack.is_empty());
        assert!(vm.frames.is_empty());
    }

    #[test]
    fn vm_if_else_statement() {
        let source = r#"
        var a = 1;
        var b = 1;
        if (a == 1) {
            a = 10;
        } else {
            a = 20;
        }
        if (b == 2) {
            b = 100;
        } else {
            b = 200;
        }
        print a;
        print b;
        "#;
        assert_eq!(output(source), "10\n200\n");
    }

    #[test]
    fn vm_elif_chain() {
        let source = r#"
        fun grade(n) {
            if (n > 8) return "a";
            elif (n > 5) return "b";
            elif (n > 2) return "c";
            else return "d";
        }
        print grade(9);
        print grade(6);
        print grade(3);
        print grade(0);
        "#;
        assert_eq!(output(source), "a\nb\nc\nd\n");
    }

    #[test]
    fn vm_switch() {
        let source = r#"
        fun name(n) {
            var result;
            switch (n) {
                case 1: result = "one";
                case 2:
                    var two = "two";
                    result = two;
                default: result = "many";
            }
            return result;
        }
        print name(1);
        print name(2);
        print name(7);
        switch ("x") { case "y": print "no"; }
        "#;
        assert_eq!(output(source), "one\ntwo\nmany\n");
    }

    #[test]
    fn vm_and_or() {
        let source = r#"
        var a = true and false;
        var b = true or false;
        print a;
        print b;
        print a and b;
        print a or b;
        print null or "fallback";
        "#;
        assert_eq!(output(source), "false\ntrue\nfalse\ntrue\nfallback\n");
    }

    #[test]
    fn vm_loops() {
        let source = r#"
        var a = 0;
        while (a < 10) {
            a = a + 1;
        }
        print a;
        var sum = 0;
        for (var i = 0; i < 5; i = i + 1) {
            sum = sum + i;
        }
        print sum;
        "#;
        assert_eq!(output(source), "10\n10\n");
    }

    #[test]
    fn vm_fibonacci_rec() {
        let source = r#"
            fun fib(n) {
                if (n < 2) return n;
                return fib(n - 2) + fib(n - 1);
            }
            var start = clock();
            print fib(15);
            print clock() - start >= 0;
        "#;
        assert_eq!(output(source), "610\ntrue\n");
    }

    #[test]
    fn vm_closure_counter() {
        let source = r#"
        fun makeCounter() {
            var count = 0;
            fun increment() {
                count = count + 1;
                return count;
            }
            return increment;
        }
        var counter = makeCounter();
        print counter();
        print counter();
        var other = makeCounter();
        print other();
        "#;
        assert_eq!(output(source), "1\n2\n1\n");
    }

    #[test]
    fn captured_variables_are_shared_until_closed() {
        let source = r#"
        var get;
        var set;
        fun main() {
            var shared = 1;
            fun g() { return shared; }
            fun s(value) { shared = value; }
            get = g;
            set = s;
            s(5);
            print g();
            shared = 2;
            print g();
        }
        main();
        set(99);
        print get();
        "#;
        assert_eq!(output(source), "5\n2\n2\n");
    }

    #[test]
    fn escaped_closures_survive_a_runtime_error() {
        let (mut vm, output) = vm();
        let source = r#"
        var g;
        fun outer() {
            var x = 41;
            fun inner() { return x + 1; }
            g = inner;
            return 1 / 0;
        }
        outer();
        "#;
        assert!(matches!(
            vm.interpret(source),
            Err(VMError::RuntimeError { .. })
        ));
        assert!(vm.open_upvalues.is_empty());

        vm.interpret("print g();").unwrap();
        assert_eq!(output.text(), "42\n");
    }

    #[test]
    fn vm_closure_nested() {
        let source = r#"
        fun outer() {
            var x = "value";
            fun middle() {
                fun inner() {
                    print x;
                }
                return inner;
            }
            return middle;
        }
        var mid = outer();
        var in = mid();
        in();
        "#;
        assert_eq!(output(source), "value\n");
    }

    #[test]
    fn block_closures_see_closed_values() {
        let source = r#"
        var f;
        {
            var local = "block";
            fun show() { print local; }
            f = show;
        }
        f();
        "#;
        assert_eq!(output(source), "block\n");
    }

    #[test]
    fn vm_class_declaration() {
        let source = r#"
            class Brioche {}
            print Brioche;
            print Brioche();
        "#;
        assert_eq!(output(source), "<class Brioche>\n<Brioche instance>\n");
    }

    #[test]
    fn vm_class_properties() {
        let source = r#"
            class Pair {}
            var pair = Pair();
            pair.first = 1;
            pair.second = 2;
            print pair.first + pair.second;
        "#;
        assert_eq!(output(source), "3\n");
    }

    #[test]
    fn instances_have_independent_fields() {
        let source = r#"
        class Point {
            var x = 0;
            var y = 0;
            init(x, y) {
                this.x = x;
                this.y = y;
            }
            sum() { return this.x + this.y; }
        }
        var a = Point(1, 2);
        var b = Point(10, 20);
        a.x = 100;
        print a.sum();
        print b.sum();
        var alias = Point;
        print alias(3, 4).sum();
        "#;
        assert_eq!(output(source), "102\n30\n7\n");
    }

    #[test]
    fn field_defaults_are_copied() {
        let source = r#"
        class Box { var items = 0; }
        var a = Box();
        var b = Box();
        a.items = 5;
        print a.items;
        print b.items;
        "#;
        assert_eq!(output(source), "5\n0\n");
    }

    #[test]
    fn methods_reach_enclosing_this() {
        let source = r#"
        class Greeter {
            var name = "kestrel";
            greeter() {
                fun greet() { return "hello " + this.name; }
                return greet;
            }
        }
        var greet = Greeter().greeter();
        print greet();
        "#;
        assert_eq!(output(source), "hello kestrel\n");
    }

    #[test]
    fn initializer_arity_is_checked() {
        let error = runtime_error("class P { init(a) {} } P();");
        assert_eq!(error, RuntimeError::Arity { expected: 1, got: 0 });

        let error = runtime_error("class Q {} Q(1);");
        assert_eq!(error, RuntimeError::Arity { expected: 0, got: 1 });
    }

    #[test]
    fn function_arity_is_checked() {
        let error = runtime_error("fun f(a, b) {} f(1);");
        assert_eq!(error, RuntimeError::Arity { expected: 2, got: 1 });
    }

    #[test]
    fn deep_recursion_overflows() {
        let error = runtime_error("fun f(n) { return f(n + 1); } f(0);");
        assert_eq!(error, RuntimeError::StackOverflow);
    }

    #[test]
    fn runtime_errors_reset_the_vm() {
        let (mut vm, output) = vm();
        let result = vm.interpret("fun f() { return 1 / 0; } print f();");
        match result {
            Err(VMError::RuntimeError { error, trace }) => {
                assert_eq!(error, RuntimeError::DivisionByZero);
                assert_eq!(trace, vec!["[line 1] in f()", "[line 1] in script"]);
            }
            other => panic!("expected a runtime error, got {:?}", other),
        }
        assert!(vm.stack.is_empty());
        assert!(vm.frames.is_empty());

        vm.interpret("print 2;").unwrap();
        assert_eq!(output.text(), "2\n");
    }

    #[test]
    fn runtime_error_kinds() {
        assert_eq!(
            runtime_error("print missing;"),
            RuntimeError::UndefinedVariable("missing".to_owned())
        );
        assert_eq!(
            runtime_error("missing = 1;"),
            RuntimeError::UndefinedVariable("missing".to_owned())
        );
        assert_eq!(runtime_error("print 1 % 0;"), RuntimeError::DivisionByZero);
        assert_eq!(runtime_error("var x = 1; x();"), RuntimeError::NotCallable);
        assert!(matches!(
            runtime_error(r#"print 1 + "a";"#),
            RuntimeError::TypeError(_)
        ));
        assert!(matches!(
            runtime_error(r#"print 1 == "a";"#),
            RuntimeError::TypeError(_)
        ));
        assert_eq!(
            runtime_error("class A {} print A().nope;"),
            RuntimeError::UndefinedProperty("nope".to_owned())
        );
        assert_eq!(
            runtime_error("var n = 1; print n.x;"),
            RuntimeError::NoProperties("number")
        );
    }

    #[test]
    fn compile_errors_do_not_run() {
        let (result, output) = run("print 1; print ;");
        assert!(matches!(result, Err(VMError::CompileError(_))));
        assert!(output.is_empty());
    }

    #[test]
    fn vectors_and_tables() {
        let source = r#"
        var v = [1, 2, 3];
        v[0] = 10;
        print v[0] + v[2];
        print len(v);
        push(v, 'x');
        print v;
        print pop(v);
        var t = {name: "kestrel", "size": 2};
        t.size = t.size + 1;
        t["extra"] = true;
        print t.size;
        print t["name"];
        print t.unknown;
        print len(keys(t));
        print "abc"[1];
        "#;
        assert_eq!(
            output(source),
            "13\n3\n[10, 2, 3, 'x']\nx\n3\nkestrel\nnull\n3\nb\n"
        );
    }

    #[test]
    fn self_containing_containers_print() {
        let source = r#"
        var v = [1];
        push(v, v);
        print v;
        var t = {};
        t.me = t;
        print t;
        "#;
        assert_eq!(output(source), "[1, [...]]\n{me: {...}}\n");
    }

    #[test]
    fn runtime_keys_are_released_with_their_table() {
        let (mut vm, _) = vm();
        vm.interpret("var t = null;").unwrap();
        let baseline = vm.heap().stats();
        let keys = vm.heap().interned_keys();

        let source = r#"
        t = {};
        for (var i = 0; i < 500; i = i + 1) {
            t[str(i)] = i;
        }
        print len(keys(t));
        t = null;
        "#;
        vm.interpret(source).unwrap();
        assert_eq!(vm.heap().interned_keys(), keys);
        assert_eq!(vm.heap().stats().live_allocations, baseline.live_allocations);
        assert_eq!(vm.heap().stats().bytes_in_use, baseline.bytes_in_use);
    }

    #[test]
    fn index_errors() {
        assert_eq!(
            runtime_error("var v = [1]; print v[1];"),
            RuntimeError::IndexOutOfBounds { index: 1.0, len: 1 }
        );
        assert_eq!(
            runtime_error("print true[0];"),
            RuntimeError::InvalidIndex {
                target: "bool",
                index: "number"
            }
        );
    }

    #[test]
    fn table_entries_can_be_invoked() {
        let source = r#"
        fun double(x) { return x * 2; }
        var math = {double: double};
        print math.double(21);
        "#;
        assert_eq!(output(source), "42\n");
    }

    #[test]
    fn natives_and_type_names() {
        let source = r#"
        print type(1);
        print type("s");
        print type([]);
        print str(12) + "!";
        print len("four");
        print clock;
        "#;
        assert_eq!(
            output(source),
            "number\nstring\nvector\n12!\n4\n<native fn clock>\n"
        );
    }

    #[test]
    fn register_native_installs_a_global() {
        fn answer(_heap: &Heap, _args: &[Value]) -> Value {
            Value::Number(42.0)
        }

        let (mut vm, output) = vm();
        let index = vm.register_native("answer", Some(0), answer);
        assert_eq!(vm.natives()[index].name.to_text(), "answer");
        vm.interpret("print answer();").unwrap();
        assert_eq!(output.text(), "42\n");
    }

    #[test]
    fn call_global_runs_a_script_function() {
        let (mut vm, _) = vm();
        vm.interpret("fun add(a, b) { return a + b; } class C {}")
            .unwrap();

        let result = vm
            .call_global("add", vec![Value::Number(2.0), Value::Number(3.0)])
            .unwrap();
        assert_eq!(result.as_number(), Some(5.0));

        let instance = vm.call_global("C", Vec::new()).unwrap();
        assert_eq!(instance.to_string(), "<C instance>");

        let length = vm
            .call_global("len", vec![Value::String(vm.heap().string("abc"))])
            .unwrap();
        assert_eq!(length.as_number(), Some(3.0));

        assert!(vm.call_global("missing", Vec::new()).is_err());
        assert!(vm.stack.is_empty());
        assert_eq!(vm.global("add").map(|v| v.type_name()), Some("function"));
    }

    #[test]
    fn modules_load_once() {
        let dir = std::env::temp_dir().join(format!("kestrel-modules-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let module = dir.join("greeting.ks");
        fs::write(&module, "var greeting = \"hi\";\nprint \"loaded\";\n").unwrap();
        let main = dir.join("main.ks");
        fs::write(
            &main,
            "import \"greeting.ks\";\nimport \"greeting.ks\";\nprint greeting;\n",
        )
        .unwrap();

        let (mut vm, output) = vm();
        vm.load_module(&main).unwrap();
        vm.load_module(&module).unwrap();
        assert_eq!(output.text(), "loaded\nhi\n");
        assert!(vm.stack.is_empty());

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn failed_modules_can_be_loaded_again() {
        let dir = std::env::temp_dir().join(format!("kestrel-retry-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let broken = dir.join("broken.ks");
        let failing = dir.join("failing.ks");
        let main = dir.join("main.ks");
        let nested = dir.join("nested.ks");
        fs::write(&broken, "print ;").unwrap();
        fs::write(&failing, "print 1 / 0;").unwrap();
        fs::write(&main, "import \"nested.ks\";").unwrap();
        fs::write(&nested, "print ;").unwrap();

        let (mut vm, output) = vm();
        assert!(matches!(vm.load_module(&broken), Err(VMError::CompileError(_))));
        assert!(matches!(vm.load_module(&failing), Err(VMError::RuntimeError { .. })));
        assert!(vm.load_module(&main).is_err());

        fs::write(&broken, "print \"fixed\";").unwrap();
        fs::write(&failing, "print \"second\";").unwrap();
        fs::write(&nested, "print \"imported\";").unwrap();
        vm.load_module(&broken).unwrap();
        vm.load_module(&failing).unwrap();
        vm.load_module(&main).unwrap();
        vm.load_module(&main).unwrap();
        assert_eq!(output.text(), "fixed\nsecond\nimported\n");

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn missing_files_are_io_errors() {
        let (mut vm, _) = vm();
        let result = vm.load_module("/definitely/not/here.ks");
        assert!(matches!(result, Err(VMError::Io { .. })));

        let error = runtime_error(r#"import "/definitely/not/here.ks";"#);
        assert!(matches!(error, RuntimeError::Import { .. }));
    }

    #[test]
    fn heap_returns_to_baseline() {
        let (mut vm, _) = vm();
        let source = r#"
        {
            var s = "a" + "b";
            var v = [1, s, [2]];
            var t = {x: s, y: v};
            fun f() { return t; }
            f();
        }
        "#;
        vm.interpret(source).unwrap();
        let baseline = vm.heap().stats();
        vm.interpret(source).unwrap();
        assert_eq!(vm.heap().stats(), baseline);
    }

    fn chunk_with(constants: Vec<Value>, code: &[u8]) -> Function {
        let mut function = Function::script();
        for constant in constants {
            function.chunk.add_constant(constant).unwrap();
        }
        for byte in code {
            function.chunk.write_byte(*byte, 1, 1);
        }
        function
    }

    /// Runs the first instruction of `function` in a fresh frame, with `setup`
    /// pushed above the callee slot, and returns how much the stack grew.
    fn height_change(
        vm: &mut VM,
        function: Function,
        upvalues: Vec<Handle<Upvalue>>,
        setup: Vec<Value>,
    ) -> i32 {
        let closure = vm.heap.closure(vm.heap.function(function), upvalues);
        vm.stack.push(Value::Closure(closure.clone()));
        vm.call(closure, 0).unwrap();
        for value in setup {
            vm.stack.push(value);
        }

        let before = vm.stack.len() as i32;
        vm.step(0).unwrap();
        let change = vm.stack.len() as i32 - before;
        vm.frames.clear();
        vm.stack.clear();
        change
    }

    #[test]
    fn opcodes_change_the_stack_by_their_effect() {
        let dir = std::env::temp_dir().join(format!("kestrel-effects-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let module = dir.join("empty.ks");
        fs::write(&module, "").unwrap();

        let (mut vm, _) = vm();
        let heap = vm.heap().clone();
        let num = Value::Number;
        let key = |name: &str| Value::Key(heap.intern(name));
        let class = || Value::Class(heap.class(heap.intern("C")));
        let vector = || Value::Vector(heap.vector(vec![Value::Number(1.0)]));
        let table = || Value::Table(heap.table(heap.new_table()));
        let text = || Value::String(heap.string("ab"));

        vm.globals.insert(heap.intern("g"), Value::Null);
        let len = vm.global("len").unwrap();
        let method = Value::Closure(heap.closure(heap.function(Function::script()), Vec::new()));
        let function = Value::Function(heap.function(Function::script()));
        let mut entries = heap.new_table();
        entries.insert(heap.intern("len"), len.clone());
        let receiver = Value::Table(heap.table(entries));
        let upvalue = heap.upvalue(0);
        upvalue.close(num(1.0));
        let path = Value::String(heap.string(&module.display().to_string()));

        // Instruction, operand bytes, constants and the values pushed first.
        let cases: Vec<(OpCode, Vec<u8>, Vec<Value>, Vec<Value>)> = vec![
            (OpCode::Constant, vec![0], vec![num(1.0)], vec![]),
            (OpCode::Null, vec![], vec![], vec![]),
            (OpCode::True, vec![], vec![], vec![]),
            (OpCode::False, vec![], vec![], vec![]),
            (OpCode::Pop, vec![], vec![], vec![num(1.0)]),
            (OpCode::PopN, vec![2], vec![], vec![num(1.0), num(2.0)]),
            (OpCode::Add, vec![], vec![], vec![num(2.0), num(1.0)]),
            (OpCode::Sub, vec![], vec![], vec![num(2.0), num(1.0)]),
            (OpCode::Mul, vec![], vec![], vec![num(2.0), num(1.0)]),
            (OpCode::Div, vec![], vec![], vec![num(2.0), num(1.0)]),
            (OpCode::Mod, vec![], vec![], vec![num(2.0), num(1.0)]),
            (OpCode::Eq, vec![], vec![], vec![num(2.0), num(1.0)]),
            (OpCode::Lt, vec![], vec![], vec![num(2.0), num(1.0)]),
            (OpCode::Gt, vec![], vec![], vec![num(2.0), num(1.0)]),
            (OpCode::Negate, vec![], vec![], vec![num(1.0)]),
            (OpCode::Not, vec![], vec![], vec![num(1.0)]),
            (OpCode::Print, vec![], vec![], vec![num(1.0)]),
            (OpCode::GetLocal, vec![0], vec![], vec![]),
            (OpCode::SetLocal, vec![1], vec![], vec![num(1.0)]),
            (OpCode::GetGlobal, vec![0], vec![key("g")], vec![]),
            (OpCode::SetGlobal, vec![0], vec![key("g")], vec![num(1.0)]),
            (OpCode::GlobalDef, vec![0], vec![key("g")], vec![num(1.0)]),
            (OpCode::GetUpvalue, vec![0], vec![], vec![]),
            (OpCode::SetUpvalue, vec![0], vec![], vec![num(2.0)]),
            (OpCode::CloseUpvalue, vec![], vec![], vec![num(1.0)]),
            (OpCode::Jmp, vec![0, 0], vec![], vec![]),
            (OpCode::JmpF, vec![0, 0], vec![], vec![Value::Bool(true)]),
            (OpCode::JmpT, vec![0, 0], vec![], vec![Value::Bool(false)]),
            (OpCode::JmpL, vec![0, 0], vec![], vec![]),
            (OpCode::Loop, vec![0, 0], vec![], vec![]),
            (OpCode::Call, vec![1], vec![], vec![len.clone(), text()]),
            (OpCode::AllocInstance, vec![0], vec![], vec![class()]),
            (OpCode::AllocInstance, vec![1], vec![], vec![len.clone(), vector()]),
            (OpCode::Closure, vec![0], vec![function], vec![]),
            (OpCode::Class, vec![0], vec![key("C")], vec![]),
            (OpCode::Field, vec![0], vec![key("x")], vec![class(), num(1.0)]),
            (OpCode::Method, vec![0], vec![key("m")], vec![class(), method]),
            (OpCode::GetProp, vec![0], vec![key("x")], vec![table()]),
            (OpCode::SetProp, vec![0], vec![key("x")], vec![table(), num(1.0)]),
            (OpCode::Invoke, vec![0, 1], vec![key("len")], vec![receiver, text()]),
            (OpCode::Vector, vec![2], vec![], vec![num(1.0), num(2.0)]),
            (OpCode::Table, vec![1], vec![], vec![key("x"), num(1.0)]),
            (OpCode::GetIndex, vec![], vec![], vec![vector(), num(0.0)]),
            (OpCode::SetIndex, vec![], vec![], vec![vector(), num(0.0), num(5.0)]),
            (OpCode::Import, vec![0], vec![path], vec![]),
        ];

        let mut covered = Vec::new();
        for (instruction, operands, constants, setup) in cases {
            let mut code = vec![u8::from(instruction)];
            code.extend(&operands);
            let mut function = chunk_with(constants, &code);
            let mut upvalues = Vec::new();
            match instruction {
                OpCode::GetUpvalue | OpCode::SetUpvalue => {
                    function.upvalue_count = 1;
                    upvalues.push(upvalue.clone());
                }
                OpCode::JmpL => function.chunk.cases.push(code.len()),
                _ => {}
            }

            let expected = match instruction {
                // The argument count is the second operand.
                OpCode::Invoke => -(operands[1] as i32),
                _ => instruction
                    .stack_effect(operands.first().copied().unwrap_or(0))
                    .unwrap(),
            };
            let change = height_change(&mut vm, function, upvalues, setup);
            assert_eq!(change, expected, "{}", instruction);
            covered.push(instruction);
        }

        for byte in 0..=u8::MAX {
            if let Ok(instruction) = OpCode::try_from(byte) {
                assert!(
                    instruction == OpCode::Return || covered.contains(&instruction),
                    "{} has no case",
                    instruction
                );
            }
        }

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn calls_replace_callee_and_arguments_by_the_result() {
        let (mut vm, _) = vm();
        vm.interpret("fun add(a, b) { var sum = a + b; return sum; }")
            .unwrap();
        let add = vm.global("add").unwrap();

        let caller = chunk_with(Vec::new(), &[u8::from(OpCode::Call), 2]);
        let caller = vm.heap.closure(vm.heap.function(caller), Vec::new());
        vm.stack.push(Value::Closure(caller.clone()));
        vm.call(caller, 0).unwrap();
        vm.stack.push(Value::Number(9.0));
        vm.stack.push(add);
        vm.stack.push(Value::Number(2.0));
        vm.stack.push(Value::Number(3.0));

        let before = vm.stack.len();
        vm.step(0).unwrap();
        assert_eq!(vm.frames.len(), 2);
        while vm.frames.len() > 1 {
            assert!(vm.step(0).unwrap().is_none());
        }

        assert_eq!(vm.stack.len(), before - 3 + 1);
        assert_eq!(vm.stack.peek(0).unwrap().as_number(), Some(5.0));
        assert_eq!(vm.stack.peek(1).unwrap().as_number(), Some(9.0));
    }
}
