//! Errors raised while recording or replaying an allocation script.

use thiserror::Error;

/// A script was asked to hold more records than its capacity.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ScriptError {
    /// The counting pass undercounted the allocations of a build.
    #[error("script capacity of {capacity} events exceeded")]
    CapacityExceeded { capacity: usize },
}

/// Failure of a single allocation request.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocError {
    #[error("layout of {count} elements of {element_size} bytes overflows")]
    Layout { count: usize, element_size: usize },
    #[error("out of memory allocating {bytes} bytes")]
    OutOfMemory { bytes: usize },
    #[error("element alignment of {align} exceeds the fixed block alignment of {limit}")]
    Alignment { align: usize, limit: usize },
    /// Fixed storage has no block left for this size class.
    #[error("fixed storage exhausted for {count} elements of {element_size} bytes")]
    Exhausted { element_size: usize, count: usize },
    /// Replay asked for more allocations than were recorded.
    #[error("allocation requested after all {recorded} recorded events were replayed")]
    Overrun { recorded: usize },
    /// Replay diverged from the recorded script.
    #[error(
        "allocation {position} requested {count} x {element_size} bytes, \
         script recorded {expected_count} x {expected_size} bytes"
    )]
    Mismatch {
        position: usize,
        expected_count: usize,
        expected_size: usize,
        count: usize,
        element_size: usize,
    },
    #[error(transparent)]
    Script(#[from] ScriptError),
}

/// Failure of a whole build.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error(transparent)]
    Alloc(#[from] AllocError),
    #[error(transparent)]
    Script(#[from] ScriptError),
    /// Replay finished without reproducing every recorded event.
    #[error("replay finished after {replayed} of {recorded} recorded allocation events")]
    Incomplete { replayed: usize, recorded: usize },
    #[error("{0} deallocation(s) did not match any replayed allocation")]
    UnmatchedDeallocation(usize),
    #[error("initializer returned different values on two evaluations")]
    NonDeterministic,
}
