use colored::*;
use std::fmt;

/// Bytes in the hidden header in front of every allocated payload.
const HEADER: usize = 8;

/// A free block must be able to hold its size and the link to the next free block.
const MIN_BLOCK: usize = 16;

const ALIGN: usize = 8;

/// Gap left between two reservations in the address space, so blocks from
/// different reservations are never contiguous.
const RESERVATION_GAP: usize = 64;

/// First address handed to a reservation. Everything below is unmapped which
/// keeps `Address::NULL` from ever pointing at real memory.
const FIRST_BASE: usize = 4096;

pub const DEFAULT_RESERVATION_SIZE: usize = 1 << 20;

/// An address in the allocator's linear address space. Payload addresses are
/// always 8-byte aligned.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address(usize);

impl Address {
    pub const NULL: Address = Address(0);

    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    pub fn offset(self, bytes: usize) -> Address {
        Address(self.0 + bytes)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

struct Reservation {
    base: usize,
    memory: Box<[u8]>,
}

impl Reservation {
    fn end(&self) -> usize {
        self.base + self.memory.len()
    }
}

/// First-fit free-list allocator.
///
/// Memory is requested in large reservations. Free blocks are kept in a
/// singly linked list sorted by address, threaded through the free bytes
/// themselves: `[size: u64][next: u64]`. Allocated blocks keep only the size
/// word in front of the payload.
pub struct Allocator {
    reservations: Vec<Reservation>,
    free_head: usize,
    next_base: usize,
    reservation_size: usize,
    heap_limit: Option<usize>,
    bytes_in_use: usize,
    bytes_reserved: usize,
    live_allocations: usize,
    log: bool,
}

fn align(size: usize) -> usize {
    (size + ALIGN - 1) & !(ALIGN - 1)
}

fn block_size_for(payload: usize) -> usize {
    align(payload + HEADER).max(MIN_BLOCK)
}

impl Allocator {
    pub fn new(reservation_size: usize, heap_limit: Option<usize>) -> Self {
        Self {
            reservations: Vec::new(),
            free_head: 0,
            next_base: FIRST_BASE,
            reservation_size: align(reservation_size.max(MIN_BLOCK)),
            heap_limit,
            bytes_in_use: 0,
            bytes_reserved: 0,
            live_allocations: 0,
            log: false,
        }
    }

    pub fn set_logging(&mut self, log: bool) {
        self.log = log;
    }

    /// Allocates `size` payload bytes. Returns `None` if a new reservation
    /// would exceed the heap limit.
    pub fn allocate(&mut self, size: usize) -> Option<Address> {
        let needed = block_size_for(size);
        let block = match self.take_first_fit(needed) {
            Some(block) => block,
            None => {
                if !self.reserve(needed) {
                    if self.log {
                        println!(
                            "{}\tallocation of {} bytes failed, limit {:?}",
                            "[HEAP]".red(),
                            size,
                            self.heap_limit
                        );
                    }
                    return None;
                }
                self.take_first_fit(needed)?
            }
        };

        let address = Address(block + HEADER);
        if self.log {
            println!(
                "{}\tallocate {} bytes at {} (block {})",
                "[HEAP]".purple(),
                size,
                address,
                self.read_word(block)
            );
        }
        Some(address)
    }

    /// Returns the block holding `address` to the free list. Freeing the null
    /// address does nothing.
    pub fn free(&mut self, address: Address) {
        if address.is_null() {
            return;
        }
        let block = address.0 - HEADER;
        let size = self.read_word(block);
        self.bytes_in_use -= size;
        self.live_allocations -= 1;
        if self.log {
            println!("{}\tfree {} ({} bytes)", "[HEAP]".purple(), address, size);
        }
        self.insert_free(block, size);
    }

    /// Resizes the allocation at `address` to hold `new_size` payload bytes,
    /// preserving the first `min(old_size, new_size)` bytes. A null address
    /// behaves like `allocate`; a zero size frees and yields the null address.
    pub fn reallocate(
        &mut self,
        address: Address,
        old_size: usize,
        new_size: usize,
    ) -> Option<Address> {
        if address.is_null() {
            return self.allocate(new_size);
        }
        if new_size == 0 {
            self.free(address);
            return Some(Address::NULL);
        }

        let block = address.0 - HEADER;
        let size = self.read_word(block);
        let needed = block_size_for(new_size);

        if needed <= size {
            if size - needed >= MIN_BLOCK {
                self.write_word(block, needed);
                self.bytes_in_use -= size - needed;
                self.insert_free(block + needed, size - needed);
            }
            return Some(address);
        }

        if let Some((prev, next_size, next_next)) = self.find_free(block + size) {
            let total = size + next_size;
            if total >= needed {
                self.set_next(prev, next_next);
                if total - needed >= MIN_BLOCK {
                    self.write_word(block, needed);
                    self.bytes_in_use += needed - size;
                    self.insert_free(block + needed, total - needed);
                } else {
                    self.write_word(block, total);
                    self.bytes_in_use += total - size;
                }
                if self.log {
                    println!(
                        "{}\tgrow {} in place to {} bytes",
                        "[HEAP]".purple(),
                        address,
                        new_size
                    );
                }
                return Some(address);
            }
        }

        let moved = self.allocate(new_size)?;
        let keep = old_size.min(new_size).min(size - HEADER);
        let payload = self.bytes(address, keep).to_vec();
        self.bytes_mut(moved, keep).copy_from_slice(&payload);
        self.free(address);
        Some(moved)
    }

    pub fn bytes(&self, address: Address, len: usize) -> &[u8] {
        let (index, offset) = self.locate(address.0);
        &self.reservations[index].memory[offset..offset + len]
    }

    pub fn bytes_mut(&mut self, address: Address, len: usize) -> &mut [u8] {
        let (index, offset) = self.locate(address.0);
        &mut self.reservations[index].memory[offset..offset + len]
    }

    /// Usable payload bytes of the allocation at `address`.
    pub fn capacity(&self, address: Address) -> usize {
        self.read_word(address.0 - HEADER) - HEADER
    }

    pub fn bytes_in_use(&self) -> usize {
        self.bytes_in_use
    }

    pub fn bytes_reserved(&self) -> usize {
        self.bytes_reserved
    }

    pub fn live_allocations(&self) -> usize {
        self.live_allocations
    }

    pub fn reservations(&self) -> usize {
        self.reservations.len()
    }

    /// Free blocks as `(block address, size)` pairs in list order.
    pub fn free_blocks(&self) -> Vec<(Address, usize)> {
        let mut blocks = Vec::new();
        let mut current = self.free_head;
        while current != 0 {
            blocks.push((Address(current), self.read_word(current)));
            current = self.read_word(current + 8);
        }
        blocks
    }

    fn take_first_fit(&mut self, needed: usize) -> Option<usize> {
        let mut prev = 0;
        let mut current = self.free_head;
        while current != 0 {
            let size = self.read_word(current);
            let next = self.read_word(current + 8);
            if size >= needed {
                let taken = if size - needed >= MIN_BLOCK {
                    let rest = current + needed;
                    self.write_word(rest, size - needed);
                    self.write_word(rest + 8, next);
                    self.set_next(prev, rest);
                    needed
                } else {
                    self.set_next(prev, next);
                    size
                };
                self.write_word(current, taken);
                self.bytes_in_use += taken;
                self.live_allocations += 1;
                return Some(current);
            }
            prev = current;
            current = next;
        }
        None
    }

    fn reserve(&mut self, needed: usize) -> bool {
        let size = self.reservation_size.max(align(needed));
        if let Some(limit) = self.heap_limit {
            if self.bytes_reserved + size > limit {
                return false;
            }
        }

        let base = self.next_base;
        self.next_base = base + size + RESERVATION_GAP;
        self.reservations.push(Reservation {
            base,
            memory: vec![0u8; size].into_boxed_slice(),
        });
        self.bytes_reserved += size;
        if self.log {
            println!(
                "{}\treserve {} bytes at {:#x}",
                "[HEAP]".purple(),
                size,
                base
            );
        }
        self.insert_free(base, size);
        true
    }

    /// Links a free block into the address-ordered list, merging it with
    /// free neighbours that touch it.
    fn insert_free(&mut self, block: usize, size: usize) {
        let mut prev = 0;
        let mut current = self.free_head;
        while current != 0 && current < block {
            prev = current;
            current = self.read_word(current + 8);
        }
        debug_assert_ne!(current, block, "block {:#x} freed twice", block);

        let (size, next) = if current != 0 && block + size == current {
            (size + self.read_word(current), self.read_word(current + 8))
        } else {
            (size, current)
        };
        self.write_word(block, size);
        self.write_word(block + 8, next);

        if prev != 0 && prev + self.read_word(prev) == block {
            let merged = self.read_word(prev) + size;
            self.write_word(prev, merged);
            self.write_word(prev + 8, next);
        } else {
            self.set_next(prev, block);
        }
    }

    fn find_free(&self, block: usize) -> Option<(usize, usize, usize)> {
        let mut prev = 0;
        let mut current = self.free_head;
        while current != 0 && current <= block {
            let next = self.read_word(current + 8);
            if current == block {
                return Some((prev, self.read_word(current), next));
            }
            prev = current;
            current = next;
        }
        None
    }

    fn set_next(&mut self, prev: usize, next: usize) {
        if prev == 0 {
            self.free_head = next;
        } else {
            self.write_word(prev + 8, next);
        }
    }

    fn locate(&self, address: usize) -> (usize, usize) {
        let index = self
            .reservations
            .partition_point(|reservation| reservation.base <= address);
        debug_assert!(index > 0, "address {:#x} is not mapped", address);
        let index = index - 1;
        let reservation = &self.reservations[index];
        debug_assert!(address < reservation.end());
        (index, address - reservation.base)
    }

    fn read_word(&self, address: usize) -> usize {
        let mut word = [0u8; 8];
        word.copy_from_slice(self.bytes(Address(address), 8));
        u64::from_le_bytes(word) as usize
    }

    fn write_word(&mut self, address: usize, value: usize) {
        self.bytes_mut(Address(address), 8)
            .copy_from_slice(&(value as u64).to_le_bytes());
    }
}

impl Default for Allocator {
    fn default() -> Self {
        Self::new(DEFAULT_RESERVATION_SIZE, None)
    }
}

impl fmt::Debug for Allocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Allocator")
            .field("reservations", &self.reservations.len())
            .field("bytes_reserved", &self.bytes_reserved)
            .field("bytes_in_use", &self.bytes_in_use)
            .field("live_allocations", &self.live_allocations)
            .finish()
    }
}
