//! Running the passes in order.
//!
//! A build evaluates the initializer once per pass. The first evaluation is
//! rebuilt under counting allocators to size the script, the second under
//! recording allocators to produce it, and the last one under replay
//! allocators whose surviving blocks come from one fixed reservation.

use tracing::debug;

use crate::{
    alive::AliveCounts,
    config::BuildConfig,
    counting::count_allocations,
    error::BuildError,
    rebind::Rebind,
    replay::{replay, ReplayAlloc},
    script::Script,
    transcript::transcribe,
};

/// What a build produces: `C` with every allocator replaced by a
/// [ReplayAlloc].
pub type Built<C> = <C as Rebind>::Rebound<ReplayAlloc>;

/// The recorded outcome of the first two passes.
///
/// A plan can be replayed any number of times against initializers that
/// build the same value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Plan {
    capacity: usize,
    script: Script,
    alive: AliveCounts,
}

impl Plan {
    /// Number of allocations the build performs.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The finalized allocation script.
    pub fn script(&self) -> &Script {
        &self.script
    }

    /// Blocks that survive the build, by size class.
    pub fn alive(&self) -> &AliveCounts {
        &self.alive
    }
}

/// Builds values whose surviving allocations live in fixed storage.
///
/// # Examples
///
/// ```rust
/// # use script_allocators::{builder::Builder, config::BuildConfig, vector::Vector};
///
/// let builder = Builder::with_config(BuildConfig::default().strict());
/// let init = || (1..=10).collect::<Vector<i32>>();
///
/// let plan = builder.plan(&init).unwrap();
/// assert_eq!(plan.capacity(), 1);
/// assert_eq!(plan.alive().blocks(40), 1);
///
/// let built = builder.replay(&plan, &init).unwrap();
/// assert_eq!(built, [1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Builder {
    config: BuildConfig,
}

impl Builder {
    /// A builder with the default [BuildConfig].
    pub fn new() -> Self {
        Builder::default()
    }

    /// A builder using `config`.
    pub fn with_config(config: BuildConfig) -> Self {
        Builder { config }
    }

    /// The configuration replays run with.
    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    /// Allocations one evaluation of `init` performs when rebuilt.
    pub fn count<C, F>(&self, init: F) -> Result<usize, BuildError>
    where
        C : Rebind,
        F : Fn() -> C
    {
        count_allocations(init())
    }

    /// The finalized script of one evaluation of `init`, `capacity` records
    /// at most.
    pub fn transcribe<C, F>(&self, init: F, capacity: usize) -> Result<Script, BuildError>
    where
        C : Rebind,
        F : Fn() -> C
    {
        transcribe(init(), capacity)
    }

    /// Counts, transcribes and tallies `init`.
    pub fn plan<C, F>(&self, init: F) -> Result<Plan, BuildError>
    where
        C : Rebind,
        F : Fn() -> C
    {
        let capacity = self.count(&init)?;
        let script = self.transcribe(&init, capacity)?;
        let alive = AliveCounts::tally(&script);

        debug!(
            capacity,
            records = script.len(),
            blocks = alive.total_blocks(),
            fixed_bytes = alive.total_bytes(self.config.align.bytes()),
            "planned build"
        );

        Ok(Plan { capacity, script, alive })
    }

    /// Evaluates `init` once more and replays `plan` against it.
    pub fn replay<C, F>(&self, plan: &Plan, init: F) -> Result<Built<C>, BuildError>
    where
        C : Rebind,
        F : Fn() -> C
    {
        replay(init(), &plan.script, &plan.alive, self.config)
    }

    /// Plans and replays `init`.
    pub fn build<C, F>(&self, init: F) -> Result<Built<C>, BuildError>
    where
        C : Rebind,
        F : Fn() -> C
    {
        let plan = self.plan(&init)?;
        self.replay(&plan, init)
    }

    /// Fails with [BuildError::NonDeterministic] when two evaluations of
    /// `init` differ.
    pub fn ensure_deterministic<C, F>(&self, init: F) -> Result<(), BuildError>
    where
        C : PartialEq,
        F : Fn() -> C
    {
        if init() == init() {
            Ok(())
        } else {
            Err(BuildError::NonDeterministic)
        }
    }
}

/// Builds `init` with the default configuration.
///
/// # Examples
///
/// ```rust
/// # use script_allocators::{build, text::Text};
///
/// let text = build(|| Text::from("stored in fixed storage")).unwrap();
///
/// assert_eq!(text, "stored in fixed storage");
/// assert_eq!(text.allocator().state().arena().capacity(), 32);
/// ```
pub fn build<C, F>(init: F) -> Result<Built<C>, BuildError>
where
    C : Rebind,
    F : Fn() -> C
{
    Builder::new().build(init)
}
