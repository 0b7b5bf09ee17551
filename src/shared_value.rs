//! A single-threaded shared-ownership wrapper used to let every allocator
//! created while building one value mutate the same payload.
//!
//! Cloning a [SharedValue] runs the payload's [ShareHook] before the new
//! reference exists; moving one does not. Scripts use the hook to mint a
//! fresh owner [Identifier](crate::identifier::Identifier) for every
//! allocator that starts sharing them.

use std::{cell::{Ref, RefCell, RefMut}, fmt::Debug, rc::Rc};

/// Runs whenever a [SharedValue] holding `Self` is cloned.
pub trait ShareHook {
    /// Called on the shared payload once per clone of its [SharedValue].
    fn on_share(&mut self) {}
}

impl ShareHook for usize {}

/// Reference counted, interior mutable payload.
///
/// The last reference to drop frees the payload.
///
/// # Examples
///
/// ```rust
/// # use script_allocators::shared_value::{SharedValue, ShareHook};
///
/// #[derive(Default)]
/// struct Shares(usize);
///
/// impl ShareHook for Shares {
///     fn on_share(&mut self) {
///         self.0 += 1;
///     }
/// }
///
/// let first = SharedValue::new(Shares::default());
/// let second = first.clone();
/// let third = second.clone();
///
/// assert_eq!(first.borrow().0, 2);
/// assert_eq!(third.ref_count(), 3);
/// ```
pub struct SharedValue<T>
where
    T : ShareHook
{
    inner: Rc<RefCell<T>>
}

impl<T> SharedValue<T>
where
    T : ShareHook
{
    /// Wraps `value` in a fresh control block with a reference count of one.
    pub fn new(value: T) -> Self {
        SharedValue { inner: Rc::new(RefCell::new(value)) }
    }

    /// Immutably borrows the payload.
    ///
    /// # Panics
    ///
    /// Panics if the payload is currently mutably borrowed.
    pub fn borrow(&self) -> Ref<'_, T> {
        self.inner.borrow()
    }

    /// Mutably borrows the payload.
    ///
    /// # Panics
    ///
    /// Panics if the payload is currently borrowed.
    pub fn borrow_mut(&self) -> RefMut<'_, T> {
        self.inner.borrow_mut()
    }

    /// Number of live references to the payload.
    pub fn ref_count(&self) -> usize {
        Rc::strong_count(&self.inner)
    }

    /// `true` when both references share one payload.
    pub fn ptr_eq(&self, other: &SharedValue<T>) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T> Clone for SharedValue<T>
where
    T : ShareHook
{
    fn clone(&self) -> Self {
        self.inner.borrow_mut().on_share();

        SharedValue { inner: Rc::clone(&self.inner) }
    }
}

impl<T> Default for SharedValue<T>
where
    T : ShareHook + Default
{
    fn default() -> Self {
        SharedValue::new(T::default())
    }
}

impl<T> Debug for SharedValue<T>
where
    T : ShareHook + Debug
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedValue")
            .field("refs", &self.ref_count())
            .field("value", &*self.inner.borrow())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[derive(Default, Debug)]
    struct Shares(usize);

    impl ShareHook for Shares {
        fn on_share(&mut self) {
            self.0 += 1;
        }
    }

    #[test]
    pub fn clone_runs_hook_test() {
        let shared = SharedValue::new(Shares::default());
        let copies: Vec<_> = (0..4).map(|_| shared.clone()).collect();

        assert_eq!(shared.borrow().0, 4);
        assert_eq!(shared.ref_count(), 5);
        assert!(copies.iter().all(|copy| copy.ptr_eq(&shared)));
    }

    #[test]
    pub fn move_skips_hook_test() {
        let shared = SharedValue::new(Shares::default());
        let moved = shared;
        let holder = vec![moved];

        assert_eq!(holder[0].borrow().0, 0);
        assert_eq!(holder[0].ref_count(), 1);
    }

    #[test]
    pub fn last_reference_frees_test() {
        let shared = SharedValue::new(Shares::default());
        let weak = Rc::downgrade(&shared.inner);
        let copy = shared.clone();

        drop(shared);
        assert!(weak.upgrade().is_some());
        assert_eq!(copy.ref_count(), 1);

        drop(copy);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    pub fn counter_payload_test() {
        let counter = SharedValue::new(0usize);
        let copy = counter.clone();
        *copy.borrow_mut() += 3;

        assert_eq!(*counter.borrow(), 3);
    }
}
