//! Swapping the allocator of a container without touching its other type
//! parameters.
//!
//! A container is rebuilt under a new allocator by moving its items out and
//! constructing the rebound container from that move iterator plus the new
//! allocator. Items that are containers themselves are rebound first, one
//! level deeper, so a whole tree of containers switches allocators in one
//! walk. Which allocator each container receives is decided by the [Pass]
//! driving the walk.

use crate::{
    alloc::ScriptAlloc,
    error::{AllocError, BuildError},
};

/// A container built on a [ScriptAlloc].
pub trait Container: Sized {
    /// What the container yields when moved out of.
    type Item;
    /// The allocator the container is parameterized over.
    type Alloc: ScriptAlloc;
    /// Move iterator over the items.
    type Items: Iterator<Item = Self::Item>;

    /// The allocator backing this container.
    fn allocator(&self) -> &Self::Alloc;

    /// Moves every item out of the container.
    fn into_items(self) -> Self::Items;
}

/// The constructor shape a container needs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Construction {
    /// Items plus allocator.
    Sequential,
    /// Items, an initial bucket count, plus allocator.
    Bucketed {
        /// Initial bucket count.
        buckets: usize
    },
}

/// A container that can be built from a move iterator plus an allocator.
pub trait Construct: Container {
    /// Whether this container is hash keyed and takes a bucket count.
    const CONSTRUCTION: Construction;

    /// Builds the container from `items` under `alloc`.
    ///
    /// Bucketed containers read their initial bucket count from
    /// `construction`; sequential ones ignore it.
    fn construct_in<I>(
        items: I,
        construction: Construction,
        alloc: Self::Alloc
    ) -> Result<Self, AllocError>
    where
        I : IntoIterator<Item = Self::Item>;
}

/// Drives one walk over a tree of containers.
pub trait Pass {
    /// The allocator every container of this walk is rebound to.
    type Alloc: ScriptAlloc;

    /// Allocator for a container about to be built at `level`.
    fn enter(&mut self, level: usize) -> Result<Self::Alloc, BuildError>;

    /// The container built with `alloc` at `level` is complete.
    fn leave(&mut self, alloc: &Self::Alloc, level: usize) -> Result<(), BuildError>;
}

/// A value that can be moved under a different allocator.
///
/// Plain values rebind to themselves. Containers rebind to the same
/// container shape with `B` in place of their allocator.
pub trait Rebind: Sized {
    /// `Self` with its allocators replaced by `B`.
    type Rebound<B: ScriptAlloc>;

    /// Moves `self` under the allocators handed out by `pass`, starting at
    /// nesting depth `level`.
    fn rebind<P>(self, pass: &mut P, level: usize) -> Result<Self::Rebound<P::Alloc>, BuildError>
    where
        P : Pass;
}

/// Shorthand for the type `C` becomes under allocator `B`.
pub type RebindTo<C, B> = <C as Rebind>::Rebound<B>;

/// Rebuilds `value` as `R` under an allocator entered at `level`, moving
/// each item through `carry` one level deeper.
pub(crate) fn rebind_items<C, R, P, F>(
    value: C,
    pass: &mut P,
    level: usize,
    carry: F
) -> Result<R, BuildError>
where
    C : Container,
    R : Construct<Alloc = P::Alloc>,
    P : Pass,
    F : FnMut(C::Item, &mut P, usize) -> Result<R::Item, BuildError>
{
    let alloc = pass.enter(level)?;

    let mut items = Carry {
        items: value.into_items(),
        pass: &mut *pass,
        level: level + 1,
        carry,
        failure: None,
    };
    let rebound = R::construct_in(&mut items, R::CONSTRUCTION, alloc);
    let failure = items.failure.take();
    drop(items);

    if let Some(failure) = failure {
        return Err(failure);
    }
    let rebound = rebound?;

    pass.leave(rebound.allocator(), level)?;

    Ok(rebound)
}

/// Move iterator that rebinds every item on the way through and stops at
/// the first failure.
struct Carry<'p, I, P, F> {
    items: I,
    pass: &'p mut P,
    level: usize,
    carry: F,
    failure: Option<BuildError>,
}

impl<'p, I, P, F, T> Iterator for Carry<'p, I, P, F>
where
    I : Iterator,
    P : Pass,
    F : FnMut(I::Item, &mut P, usize) -> Result<T, BuildError>
{
    type Item = T;

    fn next(&mut self) -> Option<T> {
        if self.failure.is_some() {
            return None;
        }

        let item = self.items.next()?;
        match (self.carry)(item, &mut *self.pass, self.level) {
            Ok(item) => Some(item),
            Err(failure) => {
                self.failure = Some(failure);
                None
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.failure.is_some() {
            (0, Some(0))
        } else {
            self.items.size_hint()
        }
    }
}

macro_rules! rebind_as_itself {
    ($($plain:ty),* $(,)?) => {$(
        impl Rebind for $plain {
            type Rebound<B: ScriptAlloc> = $plain;

            fn rebind<P>(self, _pass: &mut P, _level: usize) -> Result<Self::Rebound<P::Alloc>, BuildError>
            where
                P : Pass
            {
                Ok(self)
            }
        }
    )*};
}

rebind_as_itself!(
    (), bool, char,
    u8, u16, u32, u64, u128, usize,
    i8, i16, i32, i64, i128, isize,
    f32, f64,
    &'static str,
);

impl<T> Rebind for Option<T>
where
    T : Rebind
{
    type Rebound<B: ScriptAlloc> = Option<T::Rebound<B>>;

    fn rebind<P>(self, pass: &mut P, level: usize) -> Result<Self::Rebound<P::Alloc>, BuildError>
    where
        P : Pass
    {
        self.map(|value| value.rebind(pass, level)).transpose()
    }
}

impl<T1, T2> Rebind for (T1, T2)
where
    T1 : Rebind,
    T2 : Rebind
{
    type Rebound<B: ScriptAlloc> = (T1::Rebound<B>, T2::Rebound<B>);

    fn rebind<P>(self, pass: &mut P, level: usize) -> Result<Self::Rebound<P::Alloc>, BuildError>
    where
        P : Pass
    {
        let (first, second) = self;
        Ok((first.rebind(pass, level)?, second.rebind(pass, level)?))
    }
}
