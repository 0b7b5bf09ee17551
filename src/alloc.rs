//! The allocator contract shared by every pass, and the ordinary heap
//! allocator the initializer builds with.

use std::{alloc::Layout, fmt::Debug, ptr::NonNull};

use crate::{error::AllocError, identifier::Identifier};

/// Memory handed out by a [ScriptAlloc].
///
/// `handle` identifies the allocation to the allocator that issued it and
/// must be handed back on deallocation. Allocators that keep no script
/// return [Identifier::INVALID].
pub struct Allocation<T> {
    /// Start of `count` uninitialized elements.
    pub ptr: NonNull<T>,
    /// Handle of the recorded event.
    pub handle: Identifier,
}

impl<T> Clone for Allocation<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Allocation<T> {}

impl<T> Debug for Allocation<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Allocation")
            .field("ptr", &self.ptr)
            .field("handle", &self.handle)
            .finish()
    }
}

/// An allocator that containers are parameterized over.
///
/// The element type is a parameter of each call rather than of the
/// allocator, so one allocator handle serves every element type a
/// container needs.
///
/// # Safety
///
/// A successful [allocate](ScriptAlloc::allocate) must return memory valid
/// for reads and writes of `count` values of `T`, aligned for `T`, that
/// stays valid until it is handed back to
/// [deallocate](ScriptAlloc::deallocate) or the last clone of the allocator
/// is dropped.
pub unsafe trait ScriptAlloc: Clone {
    /// Allocates room for `count` values of `T`.
    fn allocate<T>(&self, count: usize) -> Result<Allocation<T>, AllocError>;

    /// Returns an allocation.
    ///
    /// # Safety
    ///
    /// `allocation` must come from [allocate](ScriptAlloc::allocate) on
    /// this allocator with the same `T` and `count`, and must not be used
    /// afterwards.
    unsafe fn deallocate<T>(&self, allocation: Allocation<T>, count: usize);
}

/// The ordinary, unrestricted allocator.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Heap;

unsafe impl ScriptAlloc for Heap {
    fn allocate<T>(&self, count: usize) -> Result<Allocation<T>, AllocError> {
        Ok(Allocation { ptr: heap_allocate::<T>(count)?, handle: Identifier::INVALID })
    }

    unsafe fn deallocate<T>(&self, allocation: Allocation<T>, count: usize) {
        heap_deallocate(allocation.ptr, count);
    }
}

pub(crate) fn layout_of<T>(count: usize) -> Result<Layout, AllocError> {
    Layout::array::<T>(count).map_err(|_| AllocError::Layout {
        count,
        element_size: std::mem::size_of::<T>(),
    })
}

/// Global allocator request for `count` values of `T`.
///
/// Zero sized requests get a dangling pointer.
pub(crate) fn heap_allocate<T>(count: usize) -> Result<NonNull<T>, AllocError> {
    let layout = layout_of::<T>(count)?;
    if layout.size() == 0 {
        return Ok(NonNull::dangling());
    }

    let block = unsafe { std::alloc::alloc(layout) };
    NonNull::new(block.cast::<T>()).ok_or(AllocError::OutOfMemory { bytes: layout.size() })
}

/// Frees memory from [heap_allocate].
///
/// # Safety
///
/// `ptr` must come from `heap_allocate::<T>(count)` and not be freed yet.
pub(crate) unsafe fn heap_deallocate<T>(ptr: NonNull<T>, count: usize) {
    let Ok(layout) = Layout::array::<T>(count) else {
        return;
    };
    if layout.size() == 0 {
        return;
    }

    std::alloc::dealloc(ptr.as_ptr().cast::<u8>(), layout);
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    pub fn heap_round_trip_test() {
        let allocation = Heap.allocate::<u64>(4).unwrap();
        assert_eq!(allocation.handle, Identifier::INVALID);
        assert_eq!(allocation.ptr.as_ptr() as usize % std::mem::align_of::<u64>(), 0);

        unsafe {
            for i in 0..4 {
                allocation.ptr.as_ptr().add(i).write(i as u64 * 3);
            }
            assert_eq!(*allocation.ptr.as_ptr().add(3), 9);
            Heap.deallocate(allocation, 4);
        }
    }

    #[test]
    pub fn zero_sized_request_test() {
        let allocation = Heap.allocate::<()>(12).unwrap();
        assert_eq!(allocation.ptr, NonNull::dangling());

        let empty = Heap.allocate::<u32>(0).unwrap();
        unsafe {
            Heap.deallocate(allocation, 12);
            Heap.deallocate(empty, 0);
        }
    }

    #[test]
    pub fn layout_overflow_test() {
        assert!(matches!(
            Heap.allocate::<u64>(usize::MAX),
            Err(AllocError::Layout { element_size: 8, .. })
        ));
    }
}
