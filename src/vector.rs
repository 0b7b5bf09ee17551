//! A growable array parameterized over its [ScriptAlloc].

use std::{
    fmt::Debug,
    marker::PhantomData,
    mem::ManuallyDrop,
    ops::{Deref, DerefMut},
    ptr::NonNull,
};

use crate::{
    alloc::{Allocation, Heap, ScriptAlloc},
    error::{AllocError, BuildError},
    rebind::{rebind_items, Construct, Construction, Container, Pass, Rebind},
};

/// A contiguous growable array whose buffer comes from `A`.
///
/// Every method that may allocate returns the allocator's error instead of
/// aborting, so a vector built on fixed storage reports exhaustion.
///
/// # Examples
///
/// ```rust
/// # use script_allocators::{alloc::Heap, vector::Vector};
///
/// let mut vector = Vector::new_in(Heap);
/// vector.push(1).unwrap();
/// vector.push(2).unwrap();
///
/// assert_eq!(vector, [1, 2]);
/// assert_eq!(vector.capacity(), 4);
/// ```
pub struct Vector<T, A = Heap>
where
    A : ScriptAlloc
{
    buffer: Option<Allocation<T>>,
    capacity: usize,
    len: usize,
    alloc: A,
    phantom: PhantomData<T>,
}

impl<T, A> Vector<T, A>
where
    A : ScriptAlloc
{
    const MIN_CAPACITY: usize = 4;

    /// An empty vector that has not allocated yet.
    pub fn new_in(alloc: A) -> Self {
        Vector {
            buffer: None,
            capacity: 0,
            len: 0,
            alloc,
            phantom: PhantomData,
        }
    }

    /// An empty vector with room for exactly `capacity` elements.
    pub fn with_capacity_in(capacity: usize, alloc: A) -> Result<Self, AllocError> {
        let mut vector = Vector::new_in(alloc);
        if capacity > 0 {
            vector.reallocate(capacity)?;
        }
        Ok(vector)
    }

    /// A vector holding clones of `values`, allocated once.
    pub fn from_slice_in(values: &[T], alloc: A) -> Result<Self, AllocError>
    where
        T : Clone
    {
        let mut vector = Vector::with_capacity_in(values.len(), alloc)?;
        for value in values {
            vector.push(value.clone())?;
        }
        Ok(vector)
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.len
    }

    /// `true` when there are no elements.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of elements the current buffer holds.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The allocator backing the buffer.
    pub fn allocator(&self) -> &A {
        &self.alloc
    }

    /// The elements as a slice.
    pub fn as_slice(&self) -> &[T] {
        match self.buffer {
            Some(buffer) => unsafe { std::slice::from_raw_parts(buffer.ptr.as_ptr(), self.len) },
            None => &[],
        }
    }

    /// The elements as a mutable slice.
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        match self.buffer {
            Some(buffer) => unsafe { std::slice::from_raw_parts_mut(buffer.ptr.as_ptr(), self.len) },
            None => &mut [],
        }
    }

    /// Appends `value`, doubling the buffer when it is full.
    ///
    /// On failure `value` is dropped and the vector is unchanged.
    pub fn push(&mut self, value: T) -> Result<(), AllocError> {
        if self.len == self.capacity {
            self.reallocate(Self::MIN_CAPACITY.max(self.capacity * 2))?;
        }

        unsafe { self.end_ptr().write(value) };
        self.len += 1;

        Ok(())
    }

    /// Makes room for at least `additional` more elements.
    pub fn reserve(&mut self, additional: usize) -> Result<(), AllocError> {
        let needed = self.len + additional;
        if needed > self.capacity {
            self.reallocate(needed.max(self.capacity * 2))?;
        }
        Ok(())
    }

    /// Makes room for exactly `additional` more elements.
    pub fn reserve_exact(&mut self, additional: usize) -> Result<(), AllocError> {
        let needed = self.len + additional;
        if needed > self.capacity {
            self.reallocate(needed)?;
        }
        Ok(())
    }

    /// Removes the last element.
    pub fn pop(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }

        self.len -= 1;
        Some(unsafe { self.end_ptr().read() })
    }

    /// Shortens the vector to `len` elements, dropping the rest.
    pub fn truncate(&mut self, len: usize) {
        while self.len > len {
            drop(self.pop());
        }
    }

    /// Drops every element, keeping the buffer.
    pub fn clear(&mut self) {
        self.truncate(0);
    }

    /// Moves the elements into a buffer of exactly `len` elements.
    pub fn shrink_to_fit(&mut self) -> Result<(), AllocError> {
        if self.capacity == self.len {
            return Ok(());
        }

        if self.len == 0 {
            self.release_buffer();
            return Ok(());
        }
        self.reallocate(self.len)
    }

    /// A copy of the vector under a clone of its allocator.
    pub fn try_clone(&self) -> Result<Self, AllocError>
    where
        T : Clone
    {
        Vector::from_slice_in(self.as_slice(), self.alloc.clone())
    }

    /// Appends every item of `items`.
    pub fn try_extend<I>(&mut self, items: I) -> Result<(), AllocError>
    where
        I : IntoIterator<Item = T>
    {
        let items = items.into_iter();
        self.reserve(items.size_hint().0)?;
        for item in items {
            self.push(item)?;
        }
        Ok(())
    }

    unsafe fn end_ptr(&self) -> *mut T {
        match self.buffer {
            Some(buffer) => buffer.ptr.as_ptr().add(self.len),
            None => NonNull::dangling().as_ptr(),
        }
    }

    /// Moves the elements into a fresh buffer of `capacity` elements, then
    /// returns the old one.
    fn reallocate(&mut self, capacity: usize) -> Result<(), AllocError> {
        let fresh = self.alloc.allocate::<T>(capacity)?;

        if let Some(old) = self.buffer {
            unsafe {
                std::ptr::copy_nonoverlapping(old.ptr.as_ptr(), fresh.ptr.as_ptr(), self.len);
            }
        }
        self.release_buffer();

        self.buffer = Some(fresh);
        self.capacity = capacity;

        Ok(())
    }

    fn release_buffer(&mut self) {
        if let Some(old) = self.buffer.take() {
            unsafe { self.alloc.deallocate(old, self.capacity) };
        }
        self.capacity = 0;
    }
}

impl<T> Vector<T, Heap> {
    /// An empty heap vector.
    pub fn new() -> Self {
        Vector::new_in(Heap)
    }

    /// A heap vector holding clones of `values`.
    ///
    /// # Panics
    ///
    /// Panics if the allocation fails.
    pub fn from_slice(values: &[T]) -> Self
    where
        T : Clone
    {
        Vector::from_slice_in(values, Heap).expect("could not allocate memory")
    }
}

impl<T> Default for Vector<T, Heap> {
    fn default() -> Self {
        Vector::new()
    }
}

impl<T> FromIterator<T> for Vector<T, Heap> {
    fn from_iter<I>(items: I) -> Self
    where
        I : IntoIterator<Item = T>
    {
        Vector::construct_in(items, Construction::Sequential, Heap)
            .expect("could not allocate memory")
    }
}

impl<T, A> Drop for Vector<T, A>
where
    A : ScriptAlloc
{
    fn drop(&mut self) {
        unsafe { std::ptr::drop_in_place(self.as_mut_slice()) };
        self.len = 0;
        self.release_buffer();
    }
}

impl<T, A> Deref for Vector<T, A>
where
    A : ScriptAlloc
{
    type Target = [T];

    fn deref(&self) -> &[T] {
        self.as_slice()
    }
}

impl<T, A> DerefMut for Vector<T, A>
where
    A : ScriptAlloc
{
    fn deref_mut(&mut self) -> &mut [T] {
        self.as_mut_slice()
    }
}

impl<T, A> Debug for Vector<T, A>
where
    T : Debug,
    A : ScriptAlloc
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl<T, U, A, B> PartialEq<Vector<U, B>> for Vector<T, A>
where
    T : PartialEq<U>,
    A : ScriptAlloc,
    B : ScriptAlloc
{
    fn eq(&self, other: &Vector<U, B>) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl<T, A> Eq for Vector<T, A>
where
    T : Eq,
    A : ScriptAlloc
{}

impl<T, U, A> PartialEq<[U]> for Vector<T, A>
where
    T : PartialEq<U>,
    A : ScriptAlloc
{
    fn eq(&self, other: &[U]) -> bool {
        self.as_slice() == other
    }
}

impl<T, U, A, const N: usize> PartialEq<[U; N]> for Vector<T, A>
where
    T : PartialEq<U>,
    A : ScriptAlloc
{
    fn eq(&self, other: &[U; N]) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl<'a, T, A> IntoIterator for &'a Vector<T, A>
where
    A : ScriptAlloc
{
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.as_slice().iter()
    }
}

impl<T, A> IntoIterator for Vector<T, A>
where
    A : ScriptAlloc
{
    type Item = T;
    type IntoIter = IntoIter<T, A>;

    fn into_iter(self) -> IntoIter<T, A> {
        let this = ManuallyDrop::new(self);

        IntoIter {
            buffer: this.buffer,
            capacity: this.capacity,
            start: 0,
            end: this.len,
            alloc: unsafe { std::ptr::read(&this.alloc) },
            phantom: PhantomData,
        }
    }
}

/// Owning iterator over the elements of a [Vector].
pub struct IntoIter<T, A>
where
    A : ScriptAlloc
{
    buffer: Option<Allocation<T>>,
    capacity: usize,
    start: usize,
    end: usize,
    alloc: A,
    phantom: PhantomData<T>,
}

impl<T, A> IntoIter<T, A>
where
    A : ScriptAlloc
{
    /// The allocator the elements live in.
    pub fn allocator(&self) -> &A {
        &self.alloc
    }
}

impl<T, A> Iterator for IntoIter<T, A>
where
    A : ScriptAlloc
{
    type Item = T;

    fn next(&mut self) -> Option<T> {
        let buffer = self.buffer?;
        if self.start == self.end {
            return None;
        }

        let value = unsafe { buffer.ptr.as_ptr().add(self.start).read() };
        self.start += 1;
        Some(value)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.end - self.start;
        (remaining, Some(remaining))
    }
}

impl<T, A> DoubleEndedIterator for IntoIter<T, A>
where
    A : ScriptAlloc
{
    fn next_back(&mut self) -> Option<T> {
        let buffer = self.buffer?;
        if self.start == self.end {
            return None;
        }

        self.end -= 1;
        Some(unsafe { buffer.ptr.as_ptr().add(self.end).read() })
    }
}

impl<T, A> ExactSizeIterator for IntoIter<T, A>
where
    A : ScriptAlloc
{}

impl<T, A> Drop for IntoIter<T, A>
where
    A : ScriptAlloc
{
    fn drop(&mut self) {
        for value in self.by_ref() {
            drop(value);
        }
        if let Some(buffer) = self.buffer.take() {
            unsafe { self.alloc.deallocate(buffer, self.capacity) };
        }
    }
}

impl<T, A> Container for Vector<T, A>
where
    A : ScriptAlloc
{
    type Item = T;
    type Alloc = A;
    type Items = IntoIter<T, A>;

    fn allocator(&self) -> &A {
        &self.alloc
    }

    fn into_items(self) -> IntoIter<T, A> {
        self.into_iter()
    }
}

impl<T, A> Construct for Vector<T, A>
where
    A : ScriptAlloc
{
    const CONSTRUCTION: Construction = Construction::Sequential;

    /// Allocates once for the lower size hint of `items`, then grows as needed.
    fn construct_in<I>(items: I, _construction: Construction, alloc: A) -> Result<Self, AllocError>
    where
        I : IntoIterator<Item = T>
    {
        let items = items.into_iter();
        let mut vector = Vector::with_capacity_in(items.size_hint().0, alloc)?;
        for item in items {
            vector.push(item)?;
        }
        Ok(vector)
    }
}

impl<T, A> Rebind for Vector<T, A>
where
    T : Rebind,
    A : ScriptAlloc
{
    type Rebound<B: ScriptAlloc> = Vector<T::Rebound<B>, B>;

    fn rebind<P>(self, pass: &mut P, level: usize) -> Result<Self::Rebound<P::Alloc>, BuildError>
    where
        P : Pass
    {
        rebind_items::<Self, Self::Rebound<P::Alloc>, P, _>(self, pass, level, |item: T, pass: &mut P, level| item.rebind(pass, level))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use std::cell::RefCell;

    #[doc(hidden)]
    pub struct DropTest<'d>(&'d str, &'d RefCell<Vec<&'d str>>);

    impl<'d> Drop for DropTest<'d> {
        fn drop(&mut self) {
            let (value, dropped) = (self.0, self.1);

            dropped.borrow_mut().push(value);
        }
    }

    #[test]
    pub fn push_grows_by_doubling_test() {
        let mut vector = Vector::new();
        let mut capacities = vec![];
        for i in 0..9 {
            vector.push(i).unwrap();
            capacities.push(vector.capacity());
        }

        assert_eq!(capacities, vec![4, 4, 4, 4, 8, 8, 8, 8, 16]);
        assert_eq!(vector, [0, 1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    pub fn shrink_to_fit_test() {
        let mut vector: Vector<u16> = (0..5).collect();
        vector.reserve(20).unwrap();
        assert!(vector.capacity() >= 25);

        vector.shrink_to_fit().unwrap();
        assert_eq!(vector.capacity(), 5);
        assert_eq!(vector, [0, 1, 2, 3, 4]);

        vector.clear();
        vector.shrink_to_fit().unwrap();
        assert_eq!(vector.capacity(), 0);
        assert!(vector.is_empty());
    }

    #[test]
    pub fn construct_uses_size_hint_test() {
        let vector = Vector::construct_in(1..=10, Construction::Sequential, Heap).unwrap();

        assert_eq!(vector.capacity(), 10);
        assert_eq!(vector.len(), 10);
        assert_eq!(vector.first(), Some(&1));
    }

    #[test]
    pub fn pop_and_truncate_test() {
        let mut vector = Vector::from_slice(&["a", "b", "c", "d"]);

        assert_eq!(vector.pop(), Some("d"));
        vector.truncate(1);
        assert_eq!(vector, ["a"]);
        assert_eq!(vector.pop(), Some("a"));
        assert_eq!(vector.pop(), None);
    }

    #[test]
    pub fn drop_test() {
        let dropped = RefCell::new(vec![]);
        {
            let mut vector = Vector::new();
            vector.push(DropTest("first", &dropped)).unwrap();
            vector.push(DropTest("second", &dropped)).unwrap();
            vector.push(DropTest("third", &dropped)).unwrap();
        }

        assert_eq!(*dropped.borrow(), vec!["first", "second", "third"]);
    }

    #[test]
    pub fn into_iter_drops_rest_test() {
        let dropped = RefCell::new(vec![]);
        {
            let mut vector = Vector::new();
            vector.push(DropTest("first", &dropped)).unwrap();
            vector.push(DropTest("second", &dropped)).unwrap();
            vector.push(DropTest("third", &dropped)).unwrap();

            let mut items = vector.into_iter();
            assert_eq!(items.len(), 3);
            let last = items.next_back().unwrap();
            assert_eq!(last.0, "third");
            drop(last);
        }

        assert_eq!(*dropped.borrow(), vec!["third", "first", "second"]);
    }

    #[test]
    pub fn nested_equality_test() {
        let lhs: Vector<Vector<i32>> = (0..3).map(|i| (0..i).collect()).collect();
        let rhs: Vector<Vector<i32>> = (0..3).map(|i| (0..i).collect()).collect();

        assert_eq!(lhs, rhs);
        assert_eq!(lhs[2], [0, 1]);
        assert_eq!(format!("{:?}", lhs), "[[], [0], [0, 1]]");
    }

    #[test]
    pub fn try_clone_test() {
        let vector = Vector::from_slice(&[1u8, 2, 3]);
        let copy = vector.try_clone().unwrap();

        assert_eq!(vector, copy);
        assert_eq!(copy.capacity(), 3);
    }
}
