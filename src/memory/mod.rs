use std::{cell::RefCell, collections::HashMap, mem::size_of, rc::Rc};

pub mod alloc;
pub mod block;
mod object;
mod ptr;
pub mod table;

pub use alloc::{Address, Allocator};
pub use block::{Block, SharedAllocator};
pub use object::*;
pub use ptr::Handle;
use ptr::WeakHandle;
pub use table::Table;

use crate::config::Config;
use crate::vm::value::Value;

/// Snapshot of the allocator counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapStats {
    pub bytes_in_use: usize,
    pub bytes_reserved: usize,
    pub live_allocations: usize,
    pub reservations: usize,
}

const MIN_SWEEP_AT: usize = 64;

/// Keys by spelling. Entries are weak, a key is freed once no table,
/// constant or value uses it any more.
#[derive(Default)]
struct Interner {
    keys: HashMap<Box<str>, WeakHandle<Key>>,
    // Dead entries are swept when the map reaches this size.
    sweep_at: usize,
}

impl Interner {
    fn get(&self, name: &str) -> Option<Handle<Key>> {
        self.keys.get(name).and_then(WeakHandle::upgrade)
    }

    fn insert(&mut self, name: &str, key: &Handle<Key>) {
        if self.keys.len() >= self.sweep_at {
            self.keys.retain(|_, key| !key.is_dead());
            self.sweep_at = (self.keys.len() * 2).max(MIN_SWEEP_AT);
        }
        self.keys.insert(name.into(), Handle::downgrade(key));
    }

    fn live(&self) -> usize {
        self.keys.values().filter(|key| !key.is_dead()).count()
    }
}

/// Creates every heap object of a VM. Cloning the heap shares the allocator
/// and the key interner.
#[derive(Clone)]
pub struct Heap {
    allocator: SharedAllocator,
    keys: Rc<RefCell<Interner>>,
    log: bool,
}

impl Heap {
    pub fn new(config: &Config) -> Self {
        let mut allocator = Allocator::new(config.reservation_size, config.heap_limit);
        allocator.set_logging(config.log_heap);
        Self {
            allocator: Rc::new(RefCell::new(allocator)),
            keys: Rc::new(RefCell::new(Interner::default())),
            log: config.log_heap,
        }
    }

    pub fn allocator(&self) -> &SharedAllocator {
        &self.allocator
    }

    pub fn stats(&self) -> HeapStats {
        let allocator = self.allocator.borrow();
        HeapStats {
            bytes_in_use: allocator.bytes_in_use(),
            bytes_reserved: allocator.bytes_reserved(),
            live_allocations: allocator.live_allocations(),
            reservations: allocator.reservations(),
        }
    }

    /// Places `data` in a block sized to its footprint.
    pub fn alloc<T>(&self, data: T) -> Handle<T> {
        let block = Block::new(&self.allocator, size_of::<T>());
        Handle::new(block, data, self.log)
    }

    pub fn string(&self, text: &str) -> Handle<ObjString> {
        let block = Block::with_bytes(&self.allocator, size_of::<ObjString>(), text.as_bytes());
        Handle::new(block, ObjString::new(text), self.log)
    }

    /// Returns the live key spelled `name`, creating it when there is none.
    pub fn intern(&self, name: &str) -> Handle<Key> {
        let existing = self.keys.borrow().get(name);
        if let Some(key) = existing {
            return key;
        }
        let key = self.key_uninterned(name);
        self.keys.borrow_mut().insert(name, &key);
        key
    }

    /// Number of keys currently alive.
    pub fn interned_keys(&self) -> usize {
        self.keys.borrow().live()
    }

    pub(crate) fn key_uninterned(&self, name: &str) -> Handle<Key> {
        let block = Block::with_bytes(&self.allocator, size_of::<Key>(), name.as_bytes());
        Handle::new(block, Key::new(name), self.log)
    }

    pub fn function(&self, function: Function) -> Handle<Function> {
        self.alloc(function)
    }

    pub fn closure(
        &self,
        function: Handle<Function>,
        upvalues: Vec<Handle<Upvalue>>,
    ) -> Handle<Closure> {
        self.alloc(Closure::new(function, upvalues))
    }

    pub fn upvalue(&self, slot: usize) -> Handle<Upvalue> {
        self.alloc(Upvalue::new(slot))
    }

    pub fn class(&self, name: Handle<Key>) -> Handle<Class> {
        self.alloc(Class::new(name, self.new_table(), self.new_table()))
    }

    /// A new instance starting from a copy of the class field template.
    pub fn instance(&self, class: Handle<Class>) -> Handle<Instance> {
        let mut fields = self.new_table();
        fields.copy_from(&class.fields.borrow());
        self.alloc(Instance::new(class, fields))
    }

    pub fn new_table(&self) -> Table {
        Table::new(&self.allocator)
    }

    pub fn table(&self, table: Table) -> Handle<RefCell<Table>> {
        self.alloc(RefCell::new(table))
    }

    pub fn vector(&self, items: Vec<Value>) -> Handle<Vector> {
        let storage = Block::new(&self.allocator, items.capacity() * size_of::<Value>());
        self.alloc(Vector::new(items, storage))
    }

    pub fn native(&self, name: &str, arity: Option<u8>, fun: NativeFunction) -> Handle<NativeFn> {
        self.alloc(NativeFn::new(self.intern(name), arity, fun))
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new(&Config::default())
    }
}

impl std::fmt::Debug for Heap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Heap {{ {:?}, keys: {} }}", self.stats(), self.interned_keys())
    }
}
