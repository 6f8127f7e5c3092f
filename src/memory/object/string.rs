use std::{fmt, mem::size_of};

use crate::memory::Handle;

/// 32-bit FNV-1a.
pub fn hash_bytes(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 2166136261;
    for byte in bytes {
        hash ^= *byte as u32;
        hash = hash.wrapping_mul(16777619);
    }
    hash
}

/// Objects whose UTF-8 bytes are stored in their block right after the
/// object footprint.
pub trait Text: Sized {
    fn byte_len(&self) -> usize;
    fn hash(&self) -> u32;
}

/// A runtime string value.
#[derive(Debug)]
pub struct ObjString {
    len: usize,
    hash: u32,
}

impl ObjString {
    pub(crate) fn new(text: &str) -> Self {
        Self {
            len: text.len(),
            hash: hash_bytes(text.as_bytes()),
        }
    }
}

impl Text for ObjString {
    fn byte_len(&self) -> usize {
        self.len
    }

    fn hash(&self) -> u32 {
        self.hash
    }
}

/// An interned identifier, used to look up globals, fields and methods.
#[derive(Debug)]
pub struct Key {
    len: usize,
    hash: u32,
}

impl Key {
    pub(crate) fn new(text: &str) -> Self {
        Self {
            len: text.len(),
            hash: hash_bytes(text.as_bytes()),
        }
    }
}

impl Text for Key {
    fn byte_len(&self) -> usize {
        self.len
    }

    fn hash(&self) -> u32 {
        self.hash
    }
}

impl<T: Text> Handle<T> {
    /// Calls `f` with the text stored in the object's block. The allocator is
    /// borrowed for the duration of the call, so `f` must not allocate.
    pub fn with_str<R>(&self, f: impl FnOnce(&str) -> R) -> R {
        self.block()
            .read(size_of::<T>(), self.byte_len(), |bytes| {
                f(std::str::from_utf8(bytes).unwrap_or(""))
            })
    }

    pub fn to_text(&self) -> String {
        self.with_str(|text| text.to_owned())
    }

    pub fn text_eq(&self, other: &Self) -> bool {
        if Handle::ptr_eq(self, other) {
            return true;
        }
        if self.hash() != other.hash() || self.byte_len() != other.byte_len() {
            return false;
        }
        let ours = self.to_text();
        other.with_str(|theirs| ours == theirs)
    }
}

impl PartialEq for Handle<Key> {
    fn eq(&self, other: &Self) -> bool {
        self.text_eq(other)
    }
}

impl Eq for Handle<Key> {}

impl fmt::Display for Handle<Key> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.with_str(|text| write!(f, "{}", text))
    }
}

impl fmt::Display for Handle<ObjString> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.with_str(|text| write!(f, "{}", text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Heap;

    #[test]
    fn fnv1a_known_values() {
        assert_eq!(hash_bytes(b""), 2166136261);
        assert_eq!(hash_bytes(b"a"), 0xe40c292c);
    }

    #[test]
    fn string_bytes_live_in_the_block() {
        let heap = Heap::default();
        let string = heap.string("hello, world");
        assert_eq!(string.to_text(), "hello, world");
        assert!(string.block().size() >= size_of::<ObjString>() + 12);
    }

    #[test]
    fn keys_compare_by_content() {
        let heap = Heap::default();
        let a = heap.key_uninterned("name");
        let b = heap.key_uninterned("name");
        let c = heap.key_uninterned("other");
        assert!(!Handle::ptr_eq(&a, &b));
        assert!(a == b);
        assert!(a != c);
    }
}
