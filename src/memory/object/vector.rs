use std::cell::{Ref, RefCell};
use std::fmt;
use std::mem::size_of;

use crate::memory::block::Block;
use crate::vm::value::Value;

/// A growable list of values. The element storage is accounted for in its
/// own block, resized through the allocator whenever the capacity changes.
pub struct Vector {
    items: RefCell<Vec<Value>>,
    storage: RefCell<Block>,
}

impl Vector {
    pub(crate) fn new(items: Vec<Value>, storage: Block) -> Self {
        let vector = Self {
            items: RefCell::new(items),
            storage: RefCell::new(storage),
        };
        vector.sync_storage();
        vector
    }

    pub fn len(&self) -> usize {
        self.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.borrow().is_empty()
    }

    pub fn get(&self, index: usize) -> Option<Value> {
        self.items.borrow().get(index).cloned()
    }

    /// Replaces the element at `index`, returning false when out of range.
    pub fn set(&self, index: usize, value: Value) -> bool {
        let old = {
            let mut items = self.items.borrow_mut();
            match items.get_mut(index) {
                Some(slot) => std::mem::replace(slot, value),
                None => return false,
            }
        };
        old.free();
        true
    }

    pub fn push(&self, value: Value) {
        self.items.borrow_mut().push(value);
        self.sync_storage();
    }

    pub fn pop(&self) -> Option<Value> {
        self.items.borrow_mut().pop()
    }

    pub fn items(&self) -> Ref<'_, Vec<Value>> {
        self.items.borrow()
    }

    fn sync_storage(&self) {
        let bytes = self.items.borrow().capacity().max(1) * size_of::<Value>();
        let mut storage = self.storage.borrow_mut();
        if storage.size() != bytes {
            storage.resize(bytes);
        }
    }
}

impl fmt::Debug for Vector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Vector {{ len: {} }}", self.len())
    }
}
