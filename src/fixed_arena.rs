//! Fixed-capacity storage for the allocations a build keeps.
//!
//! A FixedArena is one memory block sized up front from an
//! [AliveCounts] table. Blocks are pushed onto it in request order and are
//! never popped individually: the whole block is returned when the arena
//! drops. Every size class has a quota, and a request beyond its quota is
//! refused rather than served from anywhere else.

use std::{alloc::Layout, cell::{Cell, RefCell}, ptr::NonNull};

use crate::{
    alive::{AliveCounts, SizeClass},
    config::BlockAlign,
    error::AllocError,
};

/// A bump allocated block with per-[SizeClass] quotas.
///
/// # Examples
///
/// ```rust
/// # use script_allocators::{alive::AliveCounts, config::BlockAlign, fixed_arena::FixedArena};
///
/// let mut counts = AliveCounts::new();
/// counts.add(4, 10, 1);
///
/// let arena = FixedArena::reserve(&counts, BlockAlign::default()).unwrap();
/// let block = arena.allocate::<u32>(10).unwrap();
/// unsafe { block.as_ptr().write(7) };
///
/// assert!(arena.allocate::<u32>(10).is_err());
/// assert_eq!(arena.bytes_used(), 48);
/// ```
pub struct FixedArena {
    block: NonNull<u8>,
    size: usize,
    align: BlockAlign,
    buffer_bytes_used: Cell<usize>,
    quotas: RefCell<Vec<(SizeClass, usize)>>,
}

impl FixedArena {
    /// Reserves room for every block of `counts`, each padded to `align`.
    pub fn reserve(counts: &AliveCounts, align: BlockAlign) -> Result<Self, AllocError> {
        let size = counts.total_bytes(align.bytes());
        let layout = Layout::from_size_align(size, align.bytes())
            .map_err(|_| AllocError::OutOfMemory { bytes: size })?;

        let block = if size == 0 {
            //nothing will ever be written, any well aligned address will do
            NonNull::new(align.bytes() as *mut u8)
        } else {
            NonNull::new(unsafe { std::alloc::alloc(layout) })
        }.ok_or(AllocError::OutOfMemory { bytes: size })?;

        Ok(FixedArena {
            block,
            size,
            align,
            buffer_bytes_used: Cell::new(0),
            quotas: RefCell::new(counts.iter().filter(|(_, blocks)| *blocks > 0).collect()),
        })
    }

    /// Takes one block of `count` values of `T` out of the quota of its class.
    pub fn allocate<T>(&self, count: usize) -> Result<NonNull<T>, AllocError> {
        let class = SizeClass::of::<T>(count);
        let exhausted = AllocError::Exhausted { element_size: class.element_size, count };

        if std::mem::align_of::<T>() > self.align.bytes() {
            return Err(AllocError::Alignment {
                align: std::mem::align_of::<T>(),
                limit: self.align.bytes(),
            });
        }

        {
            let mut quotas = self.quotas.borrow_mut();
            let Some((_, remaining)) = quotas.iter_mut().find(|(entry, _)| *entry == class) else {
                return Err(exhausted);
            };
            if *remaining == 0 {
                return Err(exhausted);
            }
            *remaining -= 1;
        }

        //every block is padded to the arena alignment, so the bump pointer
        //is already aligned for T; the padding is kept for consistency
        let used = self.buffer_bytes_used.get();
        let current = unsafe { self.block.as_ptr().add(used) };
        let padding = current.align_offset(std::mem::align_of::<T>());
        let offset = padding + class.padded_bytes(self.align.bytes());

        if used + offset > self.size {
            return Err(exhausted);
        }
        self.buffer_bytes_used.set(used + offset);

        Ok(unsafe { NonNull::new_unchecked(current.add(padding).cast::<T>()) })
    }

    /// Blocks of `class` still available.
    pub fn remaining(&self, class: SizeClass) -> usize {
        self.quotas.borrow()
            .iter()
            .find(|(entry, _)| *entry == class)
            .map_or(0, |(_, remaining)| *remaining)
    }

    /// Bytes handed out so far.
    pub fn bytes_used(&self) -> usize {
        self.buffer_bytes_used.get()
    }

    /// Total bytes reserved.
    pub fn capacity(&self) -> usize {
        self.size
    }

    /// `true` when `ptr` points inside the reserved block.
    pub fn contains<T>(&self, ptr: NonNull<T>) -> bool {
        let start = self.block.as_ptr() as usize;
        let address = ptr.as_ptr() as usize;
        self.size > 0 && address >= start && address < start + self.size
    }
}

impl Drop for FixedArena {
    fn drop(&mut self) {
        if self.size == 0 {
            return;
        }
        //reserve() already validated this layout
        if let Ok(layout) = Layout::from_size_align(self.size, self.align.bytes()) {
            unsafe { std::alloc::dealloc(self.block.as_ptr(), layout) };
        }
    }
}

impl std::fmt::Debug for FixedArena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FixedArena")
            .field("capacity", &self.size)
            .field("bytes_used", &self.bytes_used())
            .field("quotas", &*self.quotas.borrow())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn counts(entries: &[(usize, usize, usize)]) -> AliveCounts {
        let mut counts = AliveCounts::new();
        for &(element_size, count, blocks) in entries {
            counts.add(element_size, count, blocks);
        }
        counts
    }

    #[test]
    pub fn quota_per_class_test() {
        let arena = FixedArena::reserve(
            &counts(&[(8, 2, 2), (1, 5, 1)]),
            BlockAlign::default()
        ).unwrap();
        assert_eq!(arena.capacity(), 16 * 2 + 16);

        let first = arena.allocate::<u64>(2).unwrap();
        let second = arena.allocate::<u64>(2).unwrap();
        let bytes = arena.allocate::<u8>(5).unwrap();

        assert!(arena.contains(first) && arena.contains(second) && arena.contains(bytes));
        assert_ne!(first, second);
        assert_eq!(arena.remaining(SizeClass::of::<u64>(2)), 0);
        assert_eq!(
            arena.allocate::<u64>(2),
            Err(AllocError::Exhausted { element_size: 8, count: 2 })
        );
        assert_eq!(
            arena.allocate::<u64>(3),
            Err(AllocError::Exhausted { element_size: 8, count: 3 })
        );
        assert_eq!(arena.bytes_used(), arena.capacity());
    }

    #[test]
    pub fn blocks_are_aligned_test() {
        let arena = FixedArena::reserve(
            &counts(&[(1, 3, 1), (16, 1, 1), (8, 3, 1)]),
            BlockAlign::default()
        ).unwrap();

        let odd = arena.allocate::<u8>(3).unwrap();
        let wide = arena.allocate::<u128>(1).unwrap();
        let words = arena.allocate::<u64>(3).unwrap();

        assert_eq!(odd.as_ptr() as usize % 16, 0);
        assert_eq!(wide.as_ptr() as usize % std::mem::align_of::<u128>(), 0);
        assert_eq!(words.as_ptr() as usize % 8, 0);

        unsafe {
            wide.as_ptr().write(u128::MAX);
            words.as_ptr().add(2).write(5);
            assert_eq!(*wide.as_ptr(), u128::MAX);
        }
    }

    #[test]
    pub fn alignment_limit_test() {
        #[repr(align(64))]
        struct Wide(#[allow(dead_code)] u8);

        let arena = FixedArena::reserve(&counts(&[(64, 1, 1)]), BlockAlign::default()).unwrap();
        assert_eq!(
            arena.allocate::<Wide>(1),
            Err(AllocError::Alignment { align: 64, limit: 16 })
        );
    }

    #[test]
    pub fn empty_arena_test() {
        let arena = FixedArena::reserve(&AliveCounts::new(), BlockAlign::default()).unwrap();

        assert_eq!(arena.capacity(), 0);
        assert!(arena.allocate::<u8>(1).is_err());
    }
}
