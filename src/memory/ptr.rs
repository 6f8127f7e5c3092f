use colored::*;
use std::{
    fmt,
    ops::Deref,
    rc::{Rc, Weak},
};

use super::alloc::Address;
use super::block::Block;

/// The object together with the allocator block that backs it.
pub(crate) struct Allocated<T> {
    block: Block,
    data: T,
}

/// Shared handle to a heap object. Cloning copies the reference; the object
/// and its block are released when the last handle is dropped.
pub struct Handle<T> {
    ptr: Rc<Allocated<T>>,
}

impl<T> Handle<T> {
    pub(super) fn new(block: Block, data: T, log: bool) -> Self {
        if log {
            println!(
                "{}\tnew {} at {}",
                "[HEAP]".purple(),
                std::any::type_name::<T>(),
                block.address()
            );
        }
        Self {
            ptr: Rc::new(Allocated { block, data }),
        }
    }

    /// Returns a reference to the inner type `T`.
    pub fn as_ref(&self) -> &T {
        &self.ptr.data
    }

    pub fn block(&self) -> &Block {
        &self.ptr.block
    }

    pub fn address(&self) -> Address {
        self.ptr.block.address()
    }

    /// True when both handles refer to the same object.
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        Rc::ptr_eq(&this.ptr, &other.ptr)
    }

    pub fn ref_count(this: &Self) -> usize {
        Rc::strong_count(&this.ptr)
    }

    /// A reference that does not keep the object alive.
    pub(crate) fn downgrade(this: &Self) -> WeakHandle<T> {
        WeakHandle {
            ptr: Rc::downgrade(&this.ptr),
        }
    }
}

/// Non-owning counterpart of `Handle`.
pub(crate) struct WeakHandle<T> {
    ptr: Weak<Allocated<T>>,
}

impl<T> WeakHandle<T> {
    pub(crate) fn upgrade(&self) -> Option<Handle<T>> {
        self.ptr.upgrade().map(|ptr| Handle { ptr })
    }

    pub(crate) fn is_dead(&self) -> bool {
        self.ptr.strong_count() == 0
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        Self {
            ptr: Rc::clone(&self.ptr),
        }
    }
}

impl<T> Deref for Handle<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        self.as_ref()
    }
}

impl<T: fmt::Debug> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({}) {:?}", self.address(), self.as_ref())
    }
}
