use std::cell::RefCell;
use std::cmp::Ordering;
use std::fmt;

use super::RuntimeError;
use crate::memory::{
    Address, Class, Closure, Function, Handle, Heap, Instance, Key, NativeFn, ObjString, Table,
    Vector,
};

/// A tagged runtime value. Scalars are stored inline, heap kinds hold a
/// handle; cloning a heap value copies the reference.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    Char(char),
    String(Handle<ObjString>),
    Key(Handle<Key>),
    Native(Handle<NativeFn>),
    Closure(Handle<Closure>),
    Function(Handle<Function>),
    Class(Handle<Class>),
    Instance(Handle<Instance>),
    Table(Handle<RefCell<Table>>),
    Vector(Handle<Vector>),
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::Char(_) => "char",
            Value::String(_) => "string",
            Value::Key(_) => "key",
            Value::Native(_) => "native",
            Value::Closure(_) | Value::Function(_) => "function",
            Value::Class(_) => "class",
            Value::Instance(_) => "instance",
            Value::Table(_) => "table",
            Value::Vector(_) => "vector",
        }
    }

    /// Releases this reference. The object itself goes back to the allocator
    /// once no other value refers to it.
    pub fn free(self) {
        drop(self)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_falsey(&self) -> bool {
        matches!(self, Value::Null | Value::Bool(false))
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_closure(&self) -> Option<Handle<Closure>> {
        match self {
            Value::Closure(closure) => Some(closure.clone()),
            _ => None,
        }
    }

    pub fn as_class(&self) -> Option<Handle<Class>> {
        match self {
            Value::Class(class) => Some(class.clone()),
            _ => None,
        }
    }

    pub fn as_key(&self) -> Option<Handle<Key>> {
        match self {
            Value::Key(key) => Some(key.clone()),
            _ => None,
        }
    }

    /// Text of strings and keys.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Value::String(string) => Some(string.to_text()),
            Value::Key(key) => Some(key.to_text()),
            _ => None,
        }
    }

    /// Equality per kind. `null` compares with anything, other mixed kinds
    /// are a type error.
    pub fn equals(&self, other: &Value) -> Result<bool, RuntimeError> {
        let equal = match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Null, _) | (_, Value::Null) => false,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Char(a), Value::Char(b)) => a == b,
            (Value::String(a), Value::String(b)) => a.text_eq(b),
            (Value::Key(a), Value::Key(b)) => a == b,
            (Value::String(_), Value::Key(_)) | (Value::Key(_), Value::String(_)) => {
                self.as_text() == other.as_text()
            }
            (Value::Native(a), Value::Native(b)) => Handle::ptr_eq(a, b),
            (Value::Closure(a), Value::Closure(b)) => Handle::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Handle::ptr_eq(a, b),
            (Value::Class(a), Value::Class(b)) => Handle::ptr_eq(a, b),
            (Value::Instance(a), Value::Instance(b)) => Handle::ptr_eq(a, b),
            (Value::Table(a), Value::Table(b)) => Handle::ptr_eq(a, b),
            (Value::Vector(a), Value::Vector(b)) => Handle::ptr_eq(a, b),
            _ => return Err(self.mismatch("compare", other)),
        };
        Ok(equal)
    }

    /// Ordering for numbers, chars and strings.
    pub fn compare(&self, other: &Value) -> Result<Ordering, RuntimeError> {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => a
                .partial_cmp(b)
                .ok_or_else(|| RuntimeError::TypeError("Cannot order NaN.".to_owned())),
            (Value::Char(a), Value::Char(b)) => Ok(a.cmp(b)),
            (Value::String(a), Value::String(b)) => {
                let a = a.to_text();
                Ok(b.with_str(|b| a.as_bytes().cmp(b.as_bytes())))
            }
            _ => Err(self.mismatch("order", other)),
        }
    }

    /// `+` consumes both operands. Strings concatenate with strings and chars.
    pub fn add(self, rhs: Value, heap: &Heap) -> Result<Value, RuntimeError> {
        let text = match (&self, &rhs) {
            (Value::Number(a), Value::Number(b)) => return Ok(Value::Number(a + b)),
            (Value::String(a), Value::String(b)) => a.to_text() + &b.to_text(),
            (Value::String(a), Value::Char(b)) => {
                let mut text = a.to_text();
                text.push(*b);
                text
            }
            (Value::Char(a), Value::String(b)) => {
                let mut text = a.to_string();
                text.push_str(&b.to_text());
                text
            }
            _ => {
                return Err(RuntimeError::TypeError(format!(
                    "Operands must be two numbers or strings, got {} and {}.",
                    self.type_name(),
                    rhs.type_name()
                )))
            }
        };
        self.free();
        rhs.free();
        Ok(Value::String(heap.string(&text)))
    }

    pub fn arithmetic(
        self,
        rhs: Value,
        op: fn(f64, f64) -> f64,
        checks_zero: bool,
    ) -> Result<Value, RuntimeError> {
        match (&self, &rhs) {
            (Value::Number(a), Value::Number(b)) => {
                if checks_zero && *b == 0.0 {
                    Err(RuntimeError::DivisionByZero)
                } else {
                    Ok(Value::Number(op(*a, *b)))
                }
            }
            _ => Err(RuntimeError::TypeError(format!(
                "Operands must be numbers, got {} and {}.",
                self.type_name(),
                rhs.type_name()
            ))),
        }
    }

    fn mismatch(&self, verb: &str, other: &Value) -> RuntimeError {
        RuntimeError::TypeError(format!(
            "Cannot {} {} with {}.",
            verb,
            self.type_name(),
            other.type_name()
        ))
    }

    /// Formats the value as an element of a vector or table, quoting text.
    /// `open` holds the containers being printed, a container met again is
    /// shown as `[...]` or `{...}`.
    fn fmt_nested(&self, f: &mut fmt::Formatter<'_>, open: &mut Vec<Address>) -> fmt::Result {
        match self {
            Value::String(string) => write!(f, "\"{}\"", string),
            Value::Char(ch) => write!(f, "'{}'", ch),
            Value::Vector(_) | Value::Table(_) => self.fmt_container(f, open),
            _ => write!(f, "{}", self),
        }
    }

    fn fmt_container(&self, f: &mut fmt::Formatter<'_>, open: &mut Vec<Address>) -> fmt::Result {
        match self {
            Value::Vector(vector) => {
                if open.contains(&vector.address()) {
                    return write!(f, "[...]");
                }
                open.push(vector.address());
                write!(f, "[")?;
                for (i, item) in vector.items().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    item.fmt_nested(f, open)?;
                }
                open.pop();
                write!(f, "]")
            }
            Value::Table(table) => {
                if open.contains(&table.address()) {
                    return write!(f, "{{...}}");
                }
                open.push(table.address());
                write!(f, "{{")?;
                for (i, (key, value)) in table.borrow().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: ", key)?;
                    value.fmt_nested(f, open)?;
                }
                open.pop();
                write!(f, "}}")
            }
            _ => write!(f, "{}", self),
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Number(v) => write!(f, "{}", v),
            Value::Char(v) => write!(f, "{}", v),
            Value::String(v) => write!(f, "{}", v),
            Value::Key(v) => write!(f, "{}", v),
            Value::Native(v) => write!(f, "{}", v.as_ref()),
            Value::Closure(v) => write!(f, "{}", v.as_ref()),
            Value::Function(v) => write!(f, "{}", v.as_ref()),
            Value::Class(v) => write!(f, "{}", v.as_ref()),
            Value::Instance(v) => write!(f, "{}", v.as_ref()),
            Value::Vector(_) | Value::Table(_) => self.fmt_container(f, &mut Vec::new()),
        }
    }
}
