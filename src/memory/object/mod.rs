mod class;
mod closure;
mod function;
mod instance;
mod native_fn;
mod string;
mod upvalue;
mod vector;

pub use class::Class;
pub use closure::Closure;
pub use function::Function;
pub use instance::Instance;
pub use native_fn::{NativeFn, NativeFunction};
pub use string::{hash_bytes, Key, ObjString, Text};
pub use upvalue::{Upvalue, UpvalueState};
pub use vector::Vector;
