//! Host functions installed as globals in every VM.
//!
//! A native never raises: when it cannot produce a result it returns `null`.

use std::time::{SystemTime, UNIX_EPOCH};

use super::value::Value;
use crate::memory::{Heap, NativeFunction};

/// Name, arity (`None` for variadic) and function of each default native.
pub const NATIVES: &[(&str, Option<u8>, NativeFunction)] = &[
    ("clock", Some(0), clock),
    ("len", Some(1), len),
    ("push", Some(2), push),
    ("pop", Some(1), pop),
    ("str", Some(1), to_str),
    ("type", Some(1), type_of),
    ("keys", Some(1), keys),
];

/// Seconds since the unix epoch.
fn clock(_heap: &Heap, _args: &[Value]) -> Value {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(time) => Value::Number(time.as_millis() as f64 / 1000f64),
        Err(_) => Value::Null,
    }
}

fn len(_heap: &Heap, args: &[Value]) -> Value {
    let len = match args.first() {
        Some(Value::String(string)) => string.with_str(|s| s.chars().count()),
        Some(Value::Key(key)) => key.with_str(|s| s.chars().count()),
        Some(Value::Vector(vector)) => vector.len(),
        Some(Value::Table(table)) => table.borrow().len(),
        _ => return Value::Null,
    };
    Value::Number(len as f64)
}

/// Appends to a vector and returns its new length.
fn push(_heap: &Heap, args: &[Value]) -> Value {
    match args {
        [Value::Vector(vector), value] => {
            vector.push(value.clone());
            Value::Number(vector.len() as f64)
        }
        _ => Value::Null,
    }
}

fn pop(_heap: &Heap, args: &[Value]) -> Value {
    match args.first() {
        Some(Value::Vector(vector)) => vector.pop().unwrap_or_default(),
        _ => Value::Null,
    }
}

fn to_str(heap: &Heap, args: &[Value]) -> Value {
    match args.first() {
        Some(value @ Value::String(_)) => value.clone(),
        Some(value) => Value::String(heap.string(&value.to_string())),
        None => Value::Null,
    }
}

fn type_of(heap: &Heap, args: &[Value]) -> Value {
    match args.first() {
        Some(value) => Value::String(heap.string(value.type_name())),
        None => Value::Null,
    }
}

/// The keys of a table as a vector, in table iteration order.
fn keys(heap: &Heap, args: &[Value]) -> Value {
    match args.first() {
        Some(Value::Table(table)) => {
            let keys = table.borrow().keys().into_iter().map(Value::Key).collect();
            Value::Vector(heap.vector(keys))
        }
        _ => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn len_counts_characters_and_elements() {
        let heap = Heap::default();
        let text = Value::String(heap.string("héllo"));
        assert_eq!(len(&heap, &[text]).as_number(), Some(5.0));

        let vector = Value::Vector(heap.vector(vec![Value::Null, Value::Null]));
        assert_eq!(len(&heap, &[vector]).as_number(), Some(2.0));

        assert!(len(&heap, &[Value::Number(1.0)]).is_null());
    }

    #[test]
    fn push_and_pop_work_on_vectors() {
        let heap = Heap::default();
        let vector = heap.vector(Vec::new());
        let args = [Value::Vector(vector.clone()), Value::Number(4.0)];
        assert_eq!(push(&heap, &args).as_number(), Some(1.0));
        assert_eq!(
            pop(&heap, &[Value::Vector(vector.clone())]).as_number(),
            Some(4.0)
        );
        assert!(pop(&heap, &[Value::Vector(vector)]).is_null());
    }

    #[test]
    fn wrong_arguments_give_null() {
        let heap = Heap::default();
        assert!(push(&heap, &[Value::Null, Value::Null]).is_null());
        assert!(keys(&heap, &[Value::Bool(true)]).is_null());
    }

    #[test]
    fn str_and_type_describe_values() {
        let heap = Heap::default();
        assert_eq!(to_str(&heap, &[Value::Number(2.5)]).to_string(), "2.5");
        assert_eq!(type_of(&heap, &[Value::Char('x')]).to_string(), "char");
    }

    #[test]
    fn keys_lists_table_entries() {
        let heap = Heap::default();
        let mut table = heap.new_table();
        table.insert(heap.intern("a"), Value::Number(1.0));
        let result = keys(&heap, &[Value::Table(heap.table(table))]);
        assert_eq!(result.to_string(), "[a]");
    }
}
