//! Second pass: what exactly does building a value allocate, in which order,
//! and which of those allocations are freed again before it is done?
//!
//! Every container gets its own [Script] while it is being built. Once the
//! container is complete its script is merged into the script of the
//! container holding it, so the final script lists events chronologically
//! with each nested container's records forming a run of their own level.

use tracing::{debug, trace};

use crate::{
    alloc::{heap_allocate, heap_deallocate, Allocation, ScriptAlloc},
    error::{AllocError, BuildError},
    event::EventRecord,
    identifier::Identifier,
    rebind::{Pass, Rebind},
    script::Script,
    shared_value::SharedValue,
};

/// Heap allocator that records every request in a shared [Script].
///
/// Cloning shares the script and mints a new owner identifier for the clone.
#[derive(Debug)]
pub struct TranscriptAlloc {
    script: SharedValue<Script>,
    owner: Identifier,
}

impl TranscriptAlloc {
    /// An allocator recording into a fresh script of `capacity` records.
    pub fn new(capacity: usize) -> Self {
        TranscriptAlloc::sharing(&SharedValue::new(Script::new(capacity)))
    }

    fn sharing(script: &SharedValue<Script>) -> Self {
        let owner = script.borrow().next_owner();
        TranscriptAlloc { script: script.clone(), owner }
    }

    /// The owner identifier stamped on this allocator's records.
    pub fn owner(&self) -> Identifier {
        self.owner
    }

    /// A copy of everything recorded so far.
    pub fn script(&self) -> Script {
        self.script.borrow().clone()
    }
}

impl Clone for TranscriptAlloc {
    fn clone(&self) -> Self {
        TranscriptAlloc::sharing(&self.script)
    }
}

unsafe impl ScriptAlloc for TranscriptAlloc {
    fn allocate<T>(&self, count: usize) -> Result<Allocation<T>, AllocError> {
        let ptr = heap_allocate::<T>(count)?;

        let recorded = {
            let record = EventRecord::allocation::<T>(count, self.owner);
            self.script.borrow_mut().add_entry(record)
        };

        match recorded {
            Ok(handle) => {
                trace!(
                    element = std::any::type_name::<T>(),
                    count,
                    %handle,
                    owner = %self.owner,
                    "recorded allocation"
                );
                Ok(Allocation { ptr, handle })
            }
            Err(error) => {
                unsafe { heap_deallocate(ptr, count) };
                Err(error.into())
            }
        }
    }

    unsafe fn deallocate<T>(&self, allocation: Allocation<T>, count: usize) {
        heap_deallocate(allocation.ptr, count);

        let marked = self.script.borrow_mut().mark_deallocated(allocation.handle);
        trace!(handle = %allocation.handle, marked = marked.is_some(), "recorded deallocation");
    }
}

/// Gives every container a fresh script and merges it into its parent's
/// once the container is complete.
#[derive(Debug)]
pub struct TranscriptPass {
    capacity: usize,
    open: Vec<SharedValue<Script>>,
    result: Script,
}

impl TranscriptPass {
    /// A pass whose scripts hold up to `capacity` records.
    pub fn new(capacity: usize) -> Self {
        TranscriptPass {
            capacity,
            open: Vec::new(),
            result: Script::new(capacity),
        }
    }

    /// The merged, finalized script once the root container has been left.
    pub fn into_script(self) -> Script {
        self.result
    }
}

impl Pass for TranscriptPass {
    type Alloc = TranscriptAlloc;

    fn enter(&mut self, level: usize) -> Result<TranscriptAlloc, BuildError> {
        let mut script = Script::new(self.capacity);
        script.set_level(level);

        let script = SharedValue::new(script);
        let alloc = TranscriptAlloc::sharing(&script);
        self.open.push(script);

        Ok(alloc)
    }

    fn leave(&mut self, alloc: &TranscriptAlloc, level: usize) -> Result<(), BuildError> {
        let Some(script) = self.open.pop() else {
            return Ok(());
        };
        debug_assert!(script.ptr_eq(&alloc.script));

        let completed = script.borrow().clone();
        trace!(level, records = completed.len(), "container transcribed");

        match self.open.last() {
            Some(parent) => parent.borrow_mut().merge(&completed)?,
            None => {
                self.result.merge(&completed)?;
                self.result.finalize();
            }
        }

        Ok(())
    }
}

/// Rebuilds `value` under [TranscriptAlloc]s and returns the finalized
/// script of every allocation made, `capacity` records at most.
///
/// # Examples
///
/// ```rust
/// # use script_allocators::{transcript::transcribe, vector::Vector};
///
/// let script = transcribe(Vector::from_slice(&[1u32, 2, 3]), 1).unwrap();
///
/// assert_eq!(script.len(), 1);
/// assert_eq!(script.records()[0].count, 3);
/// assert_eq!(script.records()[0].element_size, 4);
/// assert!(script.records()[0].last_for_owner);
/// ```
pub fn transcribe<C>(value: C, capacity: usize) -> Result<Script, BuildError>
where
    C : Rebind
{
    let mut pass = TranscriptPass::new(capacity);
    let rebound = value.rebind(&mut pass, 0)?;
    drop(rebound);

    let script = pass.into_script();
    debug!(capacity, records = script.len(), "transcript pass finished");

    Ok(script)
}
