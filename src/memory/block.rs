use colored::*;
use std::{cell::RefCell, fmt, rc::Rc};

use super::alloc::{Address, Allocator};

pub type SharedAllocator = Rc<RefCell<Allocator>>;

/// One allocation owned by a heap object. The bytes go back to the allocator
/// when the block is dropped.
pub struct Block {
    allocator: SharedAllocator,
    address: Address,
    size: usize,
}

fn out_of_memory(size: usize) -> ! {
    eprintln!(
        "{}\tout of memory while allocating {} bytes",
        "[HEAP]".red().bold(),
        size
    );
    std::process::abort()
}

impl Block {
    pub(crate) fn new(allocator: &SharedAllocator, size: usize) -> Self {
        let size = size.max(1);
        let address = allocator
            .borrow_mut()
            .allocate(size)
            .unwrap_or_else(|| out_of_memory(size));
        Self {
            allocator: Rc::clone(allocator),
            address,
            size,
        }
    }

    /// Allocates a block holding `header` bytes of footprint followed by `bytes`.
    pub(crate) fn with_bytes(allocator: &SharedAllocator, header: usize, bytes: &[u8]) -> Self {
        let block = Self::new(allocator, header + bytes.len());
        block.write(header, bytes);
        block
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Resizes the allocation, possibly moving it.
    pub(crate) fn resize(&mut self, new_size: usize) {
        let new_size = new_size.max(1);
        if new_size == self.size {
            return;
        }
        self.address = self
            .allocator
            .borrow_mut()
            .reallocate(self.address, self.size, new_size)
            .unwrap_or_else(|| out_of_memory(new_size));
        self.size = new_size;
    }

    pub(crate) fn write(&self, offset: usize, bytes: &[u8]) {
        self.allocator
            .borrow_mut()
            .bytes_mut(self.address.offset(offset), bytes.len())
            .copy_from_slice(bytes);
    }

    pub(crate) fn read<R>(&self, offset: usize, len: usize, f: impl FnOnce(&[u8]) -> R) -> R {
        let allocator = self.allocator.borrow();
        f(allocator.bytes(self.address.offset(offset), len))
    }
}

impl Drop for Block {
    fn drop(&mut self) {
        self.allocator.borrow_mut().free(self.address);
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Block {{ address: {}, size: {} }}", self.address, self.size)
    }
}
