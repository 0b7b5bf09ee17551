//! First pass: how many allocations does building a value perform?
//!
//! The value is rebuilt under [CountingAlloc]s that all bump one shared
//! counter. The rebuilt value is thrown away afterwards, only the count is
//! kept. It becomes the capacity of every script of the later passes.

use tracing::{debug, trace};

use crate::{
    alloc::{heap_allocate, heap_deallocate, Allocation, ScriptAlloc},
    error::{AllocError, BuildError},
    identifier::Identifier,
    rebind::{Pass, Rebind},
    shared_value::SharedValue,
};

/// Heap allocator that counts its successful allocations.
///
/// Every clone bumps the same counter.
#[derive(Clone, Debug)]
pub struct CountingAlloc {
    allocations: SharedValue<usize>,
    owner: Identifier,
}

impl CountingAlloc {
    /// A counter starting at zero.
    pub fn new() -> Self {
        CountingAlloc {
            allocations: SharedValue::new(0),
            owner: Identifier::INVALID,
        }
    }

    /// Allocations made through this allocator and every allocator sharing
    /// its counter.
    pub fn allocations(&self) -> usize {
        *self.allocations.borrow()
    }

    /// Always [Identifier::INVALID], counting does not tell owners apart.
    pub fn owner(&self) -> Identifier {
        self.owner
    }
}

impl Default for CountingAlloc {
    fn default() -> Self {
        CountingAlloc::new()
    }
}

unsafe impl ScriptAlloc for CountingAlloc {
    fn allocate<T>(&self, count: usize) -> Result<Allocation<T>, AllocError> {
        let ptr = heap_allocate::<T>(count)?;
        *self.allocations.borrow_mut() += 1;

        trace!(
            element = std::any::type_name::<T>(),
            count,
            total = self.allocations(),
            "counted allocation"
        );

        Ok(Allocation { ptr, handle: Identifier::INVALID })
    }

    unsafe fn deallocate<T>(&self, allocation: Allocation<T>, count: usize) {
        heap_deallocate(allocation.ptr, count);
    }
}

/// Hands every container the same counter.
#[derive(Debug, Default)]
pub struct CountingPass {
    counter: CountingAlloc,
}

impl CountingPass {
    /// A pass that has counted nothing yet.
    pub fn new() -> Self {
        CountingPass { counter: CountingAlloc::new() }
    }

    /// Allocations counted so far.
    pub fn allocations(&self) -> usize {
        self.counter.allocations()
    }
}

impl Pass for CountingPass {
    type Alloc = CountingAlloc;

    fn enter(&mut self, _level: usize) -> Result<CountingAlloc, BuildError> {
        Ok(self.counter.clone())
    }

    fn leave(&mut self, _alloc: &CountingAlloc, _level: usize) -> Result<(), BuildError> {
        Ok(())
    }
}

/// Number of allocations rebuilding `value` performs, nested containers
/// included.
///
/// # Examples
///
/// ```rust
/// # use script_allocators::{counting::count_allocations, vector::Vector};
///
/// let numbers: Vector<Vector<u8>> = (1..4).map(|n| (0..n).collect()).collect();
///
/// assert_eq!(count_allocations(numbers).unwrap(), 4);
/// ```
pub fn count_allocations<C>(value: C) -> Result<usize, BuildError>
where
    C : Rebind
{
    let mut pass = CountingPass::new();
    let rebound = value.rebind(&mut pass, 0)?;
    drop(rebound);

    let allocations = pass.allocations();
    debug!(allocations, "counting pass finished");

    Ok(allocations)
}
