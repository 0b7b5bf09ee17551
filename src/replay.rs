//! Final pass: rebuild the value once more, serving every allocation the
//! script says survives from one fixed block reserved up front, and every
//! allocation it says is freed again from the heap.
//!
//! All allocators of one build share a [ReplayState] holding the recorded
//! script (the ethalon), the alive table and the fixed storage. While the
//! value is being built they also share a live script that the replayed
//! events are appended to and compared against the ethalon. An allocator
//! lets go of the live script as soon as every recorded event of its owner
//! has been reproduced; from then on it only serves requests from storage
//! of its own.

use std::{
    cell::{Cell, OnceCell, RefCell},
    fmt::Debug,
    rc::Rc,
};

use tracing::{debug, trace, warn};

use crate::{
    alive::AliveCounts,
    alloc::{heap_allocate, heap_deallocate, Allocation, ScriptAlloc},
    config::BuildConfig,
    counting::CountingAlloc,
    error::{AllocError, BuildError},
    event::EventRecord,
    fixed_arena::FixedArena,
    identifier::Identifier,
    rebind::{Pass, Rebind},
    script::Script,
    shared_value::SharedValue,
    transcript::TranscriptAlloc,
};

//rebound element types must have the same size in every pass, otherwise the
//recorded element sizes would not match the replayed ones
const _: () = assert!(
    std::mem::size_of::<CountingAlloc>() == std::mem::size_of::<ReplayAlloc>()
        && std::mem::size_of::<TranscriptAlloc>() == std::mem::size_of::<ReplayAlloc>()
        && std::mem::align_of::<CountingAlloc>() == std::mem::align_of::<ReplayAlloc>()
        && std::mem::align_of::<TranscriptAlloc>() == std::mem::align_of::<ReplayAlloc>()
);

/// Everything the allocators of one replayed build share.
pub struct ReplayState {
    ethalon: Script,
    alive: AliveCounts,
    arena: FixedArena,
    config: BuildConfig,
    unmatched: Cell<usize>,
    sealed: Cell<bool>,
}

impl ReplayState {
    /// The script the build is replayed against.
    pub fn ethalon(&self) -> &Script {
        &self.ethalon
    }

    /// The alive table the fixed storage was sized from.
    pub fn alive(&self) -> &AliveCounts {
        &self.alive
    }

    /// The shared fixed storage.
    pub fn arena(&self) -> &FixedArena {
        &self.arena
    }

    /// Deallocations that matched no replayed allocation.
    pub fn unmatched_deallocations(&self) -> usize {
        self.unmatched.get()
    }
}

impl Debug for ReplayState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplayState")
            .field("recorded", &self.ethalon.len())
            .field("arena", &self.arena)
            .field("unmatched", &self.unmatched.get())
            .field("sealed", &self.sealed.get())
            .finish()
    }
}

struct ReplayInstance {
    state: Rc<ReplayState>,
    live: RefCell<Option<SharedValue<Script>>>,
    private: OnceCell<FixedArena>,
}

impl ReplayInstance {
    fn release(&self) {
        *self.live.borrow_mut() = None;
    }

    /// Storage for requests made after release, sized for the blocks
    /// `owner` kept alive in the recorded build.
    fn private_arena(&self, owner: Identifier) -> Result<&FixedArena, AllocError> {
        if let Some(arena) = self.private.get() {
            return Ok(arena);
        }

        let owned = AliveCounts::for_owner(&self.state.ethalon, owner);
        let arena = FixedArena::reserve(&owned, self.state.config.align)?;
        Ok(self.private.get_or_init(|| arena))
    }

    /// Replays one allocation against the ethalon and reports whether its
    /// owner has now reproduced every recorded event.
    fn replay_allocation<T>(
        &self,
        live: &SharedValue<Script>,
        count: usize
    ) -> Result<(Allocation<T>, bool), AllocError> {
        let ethalon = &self.state.ethalon;
        let position = live.borrow().len();
        let expected = ethalon.info(position)
            .ok_or(AllocError::Overrun { recorded: ethalon.len() })?;

        let element_size = std::mem::size_of::<T>();
        if expected.count != count || expected.element_size != element_size {
            return Err(AllocError::Mismatch {
                position,
                expected_count: expected.count,
                expected_size: expected.element_size,
                count,
                element_size,
            });
        }

        let ptr = if expected.deallocated {
            heap_allocate::<T>(count)?
        } else {
            self.state.arena.allocate::<T>(count)?
        };

        let record = EventRecord::allocation::<T>(count, expected.owner);
        let added = live.borrow_mut().add_entry(record);
        let handle = match added {
            Ok(handle) => handle,
            Err(error) => {
                if expected.deallocated {
                    unsafe { heap_deallocate(ptr, count) };
                }
                return Err(error.into());
            }
        };

        trace!(
            element = std::any::type_name::<T>(),
            count,
            %handle,
            owner = %expected.owner,
            storage = if expected.deallocated { "heap" } else { "fixed" },
            "replayed allocation"
        );

        let finished = live.borrow().finished_for_owner(ethalon, expected.owner);
        Ok((Allocation { ptr, handle }, finished))
    }
}

/// The allocator of a replayed build.
///
/// Allocations recorded as surviving come from fixed storage sized for
/// exactly those blocks, the rest from the heap. Requests that diverge from
/// the recorded script fail with [AllocError::Overrun] or
/// [AllocError::Mismatch].
pub struct ReplayAlloc {
    instance: Box<ReplayInstance>,
    owner: Identifier,
}

impl ReplayAlloc {
    fn attach(state: &Rc<ReplayState>, live: Option<&SharedValue<Script>>) -> Self {
        let owner = live.map_or(Identifier::INVALID, |live| live.borrow().next_owner());

        ReplayAlloc {
            instance: Box::new(ReplayInstance {
                state: Rc::clone(state),
                live: RefCell::new(live.cloned()),
                private: OnceCell::new(),
            }),
            owner,
        }
    }

    /// Owner identifier handed out by the live script, or
    /// [Identifier::INVALID] when the allocator was never attached to one.
    pub fn owner(&self) -> Identifier {
        self.owner
    }

    /// `true` while this allocator still replays recorded events.
    pub fn is_replaying(&self) -> bool {
        self.instance.live.borrow().is_some()
    }

    /// State shared by every allocator of the build.
    pub fn state(&self) -> &ReplayState {
        &self.instance.state
    }
}

impl Clone for ReplayAlloc {
    fn clone(&self) -> Self {
        ReplayAlloc::attach(&self.instance.state, self.instance.live.borrow().as_ref())
    }
}

impl Debug for ReplayAlloc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplayAlloc")
            .field("owner", &self.owner)
            .field("replaying", &self.is_replaying())
            .finish()
    }
}

unsafe impl ScriptAlloc for ReplayAlloc {
    fn allocate<T>(&self, count: usize) -> Result<Allocation<T>, AllocError> {
        let instance = &self.instance;
        if instance.state.sealed.get() {
            instance.release();
        }

        let replayed = {
            let live = instance.live.borrow();
            let replayed = live.as_ref().map(|live| instance.replay_allocation::<T>(live, count));
            replayed
        };

        match replayed {
            Some(replayed) => {
                let (allocation, finished) = replayed?;
                if finished {
                    instance.release();
                }
                Ok(allocation)
            }
            None => {
                let ptr = instance.private_arena(self.owner)?.allocate::<T>(count)?;
                trace!(element = std::any::type_name::<T>(), count, storage = "private", "allocation");
                Ok(Allocation { ptr, handle: Identifier::INVALID })
            }
        }
    }

    unsafe fn deallocate<T>(&self, allocation: Allocation<T>, count: usize) {
        let instance = &self.instance;
        let state = &instance.state;

        let finished = {
            let live = instance.live.borrow();
            let Some(live) = live.as_ref() else {
                return;
            };

            let Some(position) = live.borrow().position_of(allocation.handle) else {
                state.unmatched.set(state.unmatched.get() + 1);
                warn!(handle = %allocation.handle, "deallocation matches no replayed allocation");
                return;
            };
            let Some(expected) = state.ethalon.get(position) else {
                return;
            };

            if expected.deallocated {
                heap_deallocate(allocation.ptr, count);
            }
            live.borrow_mut().mark_deallocated(allocation.handle);
            trace!(handle = %allocation.handle, "replayed deallocation");

            let finished = live.borrow().finished_for_owner(&state.ethalon, expected.owner);
            finished
        };

        if finished {
            instance.release();
        }
    }
}

/// Hands every container an allocator attached to the shared live script.
#[derive(Debug)]
pub struct ReplayPass {
    state: Rc<ReplayState>,
    live: Option<SharedValue<Script>>,
}

impl ReplayPass {
    /// A pass replaying `ethalon`, with fixed storage reserved for `alive`.
    pub fn new(ethalon: Script, alive: AliveCounts, config: BuildConfig) -> Result<Self, AllocError> {
        let arena = FixedArena::reserve(&alive, config.align)?;
        let live = (!ethalon.is_empty()).then(|| SharedValue::new(Script::new(ethalon.len())));

        debug!(
            recorded = ethalon.len(),
            fixed_bytes = arena.capacity(),
            blocks = alive.total_blocks(),
            "replay pass reserved fixed storage"
        );

        Ok(ReplayPass {
            state: Rc::new(ReplayState {
                ethalon,
                alive,
                arena,
                config,
                unmatched: Cell::new(0),
                sealed: Cell::new(false),
            }),
            live,
        })
    }

    /// Checks that the build reproduced the ethalon, then seals the state so
    /// later requests are served from per-allocator storage.
    pub fn finish(self) -> Result<(), BuildError> {
        let state = &self.state;
        let recorded = state.ethalon.len();

        if let Some(live) = &self.live {
            let live = live.borrow();
            if !live.all_finished(&state.ethalon) {
                return Err(BuildError::Incomplete { replayed: live.len(), recorded });
            }
        }

        let unmatched = state.unmatched.get();
        if state.config.strict_deallocation && unmatched > 0 {
            return Err(BuildError::UnmatchedDeallocation(unmatched));
        }

        state.sealed.set(true);
        debug!(recorded, fixed_bytes_used = state.arena.bytes_used(), "replay pass finished");

        Ok(())
    }
}

impl Pass for ReplayPass {
    type Alloc = ReplayAlloc;

    fn enter(&mut self, _level: usize) -> Result<ReplayAlloc, BuildError> {
        Ok(ReplayAlloc::attach(&self.state, self.live.as_ref()))
    }

    fn leave(&mut self, _alloc: &ReplayAlloc, _level: usize) -> Result<(), BuildError> {
        Ok(())
    }
}

/// Rebuilds `value` under [ReplayAlloc]s replaying `ethalon`.
pub fn replay<C>(
    value: C,
    ethalon: &Script,
    alive: &AliveCounts,
    config: BuildConfig
) -> Result<C::Rebound<ReplayAlloc>, BuildError>
where
    C : Rebind
{
    let mut pass = ReplayPass::new(ethalon.clone(), alive.clone(), config)?;
    let rebound = value.rebind(&mut pass, 0)?;
    pass.finish()?;

    Ok(rebound)
}

#[cfg(test)]
mod test {
    use super::*;

    use crate::vector::Vector;

    fn ethalon(records: &[(usize, bool)]) -> Script {
        let mut script = Script::new(records.len());
        for &(count, deallocated) in records {
            let handle = script.add_entry(
                EventRecord::allocation::<u32>(count, Identifier::first())
            ).unwrap();
            if deallocated {
                script.mark_deallocated(handle);
            }
        }
        script.finalize();
        script
    }

    fn pass(script: Script) -> ReplayPass {
        let alive = AliveCounts::tally(&script);
        ReplayPass::new(script, alive, BuildConfig::default()).unwrap()
    }

    #[test]
    pub fn surviving_blocks_are_fixed_test() {
        let mut pass = pass(ethalon(&[(4, true), (8, false)]));
        let alloc = pass.enter(0).unwrap();

        let first = alloc.allocate::<u32>(4).unwrap();
        let second = alloc.allocate::<u32>(8).unwrap();
        assert!(!alloc.state().arena().contains(first.ptr));
        assert!(alloc.state().arena().contains(second.ptr));
        assert!(alloc.is_replaying());

        unsafe { alloc.deallocate(first, 4) };
        assert!(!alloc.is_replaying());
        pass.finish().unwrap();

        //released allocators ignore deallocations of fixed blocks
        unsafe { alloc.deallocate(second, 8) };
        assert_eq!(alloc.state().unmatched_deallocations(), 0);
    }

    #[test]
    pub fn mismatch_test() {
        let mut pass = pass(ethalon(&[(4, false)]));
        let alloc = pass.enter(0).unwrap();

        assert_eq!(
            alloc.allocate::<u32>(5).map(|_| ()),
            Err(AllocError::Mismatch {
                position: 0,
                expected_count: 4,
                expected_size: 4,
                count: 5,
                element_size: 4,
            })
        );
        assert!(matches!(
            alloc.allocate::<u64>(4),
            Err(AllocError::Mismatch { expected_size: 4, element_size: 8, .. })
        ));
    }

    #[test]
    pub fn overrun_test() {
        let mut pass = pass(ethalon(&[(2, false)]));
        let alloc = pass.enter(0).unwrap();
        let copy = alloc.clone();

        alloc.allocate::<u32>(2).unwrap();
        assert!(!alloc.is_replaying());
        assert_eq!(
            copy.allocate::<u32>(2).map(|_| ()),
            Err(AllocError::Overrun { recorded: 1 })
        );
    }

    #[test]
    pub fn incomplete_test() {
        let mut pass = pass(ethalon(&[(2, false), (3, false)]));
        let alloc = pass.enter(0).unwrap();
        let copy = alloc.clone();
        alloc.allocate::<u32>(2).unwrap();

        assert_eq!(pass.finish(), Err(BuildError::Incomplete { replayed: 1, recorded: 2 }));
        drop(copy);
    }

    #[test]
    pub fn unmatched_deallocation_test() {
        let script = ethalon(&[(2, false), (2, false)]);
        let alive = AliveCounts::tally(&script);
        let mut pass = ReplayPass::new(script, alive, BuildConfig::default().strict()).unwrap();

        let alloc = pass.enter(0).unwrap();
        let first = alloc.allocate::<u32>(2).unwrap();
        unsafe {
            alloc.deallocate(Allocation { ptr: first.ptr, handle: Identifier::new(5) }, 2);
        }
        alloc.allocate::<u32>(2).unwrap();

        assert_eq!(alloc.state().unmatched_deallocations(), 1);
        assert_eq!(pass.finish(), Err(BuildError::UnmatchedDeallocation(1)));
    }

    #[test]
    pub fn sealed_state_serves_privately_test() {
        let mut pass = pass(ethalon(&[(2, false)]));
        let alloc = pass.enter(0).unwrap();
        let idle = alloc.clone();
        let first = alloc.allocate::<u32>(2).unwrap();
        assert!(!alloc.is_replaying());
        pass.finish().unwrap();

        //an owner that kept nothing alive gets no storage
        assert!(idle.is_replaying());
        assert!(matches!(idle.allocate::<u32>(2), Err(AllocError::Exhausted { element_size: 4, count: 2 })));
        assert!(!idle.is_replaying());

        let extra = alloc.allocate::<u32>(2).unwrap();
        assert_eq!(extra.handle, Identifier::INVALID);
        assert!(alloc.state().arena().contains(first.ptr));
        assert!(!alloc.state().arena().contains(extra.ptr));
        assert!(alloc.allocate::<u32>(2).is_err());
    }

    #[test]
    pub fn empty_ethalon_test() {
        let mut pass = pass(Script::new(0));
        let alloc = pass.enter(0).unwrap();

        assert_eq!(alloc.owner(), Identifier::INVALID);
        assert!(!alloc.is_replaying());
        assert!(alloc.allocate::<u8>(1).is_err());
        pass.finish().unwrap();
    }

    #[test]
    pub fn replay_vector_test() {
        let init = || Vector::from_slice(&[1i32, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
        let script = crate::transcript::transcribe(init(), 1).unwrap();
        let alive = AliveCounts::tally(&script);

        let built = replay(init(), &script, &alive, BuildConfig::default()).unwrap();
        let state = built.allocator().state();

        assert_eq!(built, [1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
        assert_eq!(state.arena().capacity(), 48);
        assert_eq!(state.arena().bytes_used(), 48);
        assert!(!built.allocator().is_replaying());
    }
}
