//! A growable UTF-8 string parameterized over its [ScriptAlloc].

use std::{
    fmt::{Debug, Display},
    hash::Hash,
    ops::Deref,
};

use crate::{
    alloc::{Heap, ScriptAlloc},
    error::{AllocError, BuildError},
    rebind::{rebind_items, Construct, Construction, Container, Pass, Rebind},
    vector::{self, Vector},
};

/// An owned string whose bytes live in a [Vector] under `A`.
///
/// Growth doubles the byte buffer, starting at eight bytes. Moving a text
/// out yields its chars.
///
/// # Examples
///
/// ```rust
/// # use script_allocators::{alloc::Heap, text::Text};
///
/// let mut text = Text::new_in(Heap);
/// text.push_str("hello world").unwrap();
/// text.erase(5, 6);
/// text.push('!').unwrap();
///
/// assert_eq!(text, "hello!");
/// assert_eq!(text.find("lo"), Some(3));
/// assert_eq!(text.capacity(), 11);
/// ```
pub struct Text<A = Heap>
where
    A : ScriptAlloc
{
    bytes: Vector<u8, A>,
}

impl<A> Text<A>
where
    A : ScriptAlloc
{
    const MIN_CAPACITY: usize = 8;

    /// An empty text that has not allocated yet.
    pub fn new_in(alloc: A) -> Self {
        Text { bytes: Vector::new_in(alloc) }
    }

    /// A copy of `value` in a buffer of exactly its length.
    pub fn from_str_in(value: &str, alloc: A) -> Result<Self, AllocError> {
        let mut text = Text { bytes: Vector::with_capacity_in(value.len(), alloc)? };
        text.push_str(value)?;
        Ok(text)
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// `true` for the empty text.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Bytes the buffer holds before it has to grow.
    pub fn capacity(&self) -> usize {
        self.bytes.capacity()
    }

    /// The allocator backing the buffer.
    pub fn allocator(&self) -> &A {
        self.bytes.allocator()
    }

    /// The text as a string slice.
    pub fn as_str(&self) -> &str {
        //only whole chars and strs are ever written
        unsafe { std::str::from_utf8_unchecked(self.bytes.as_slice()) }
    }

    /// The UTF-8 encoded bytes.
    pub fn as_bytes(&self) -> &[u8] {
        self.bytes.as_slice()
    }

    /// Appends one char.
    pub fn push(&mut self, value: char) -> Result<(), AllocError> {
        let mut encoded = [0; 4];
        self.push_str(value.encode_utf8(&mut encoded))
    }

    /// Appends `value`.
    pub fn push_str(&mut self, value: &str) -> Result<(), AllocError> {
        self.grow_for(value.len())?;
        for byte in value.bytes() {
            self.bytes.push(byte)?;
        }
        Ok(())
    }

    /// Removes `len` bytes starting at byte `start`, or everything after
    /// `start` when fewer remain.
    ///
    /// # Panics
    ///
    /// Panics if `start` or the end of the removed range does not lie on a
    /// char boundary.
    pub fn erase(&mut self, start: usize, len: usize) {
        let end = start.saturating_add(len).min(self.len());
        assert!(
            self.as_str().is_char_boundary(start) && self.as_str().is_char_boundary(end),
            "erase range {start}..{end} does not lie on char boundaries"
        );

        let total = self.len();
        self.bytes.copy_within(end..total, start);
        self.bytes.truncate(total - (end - start));
    }

    /// Byte index of the first occurrence of `pattern`.
    pub fn find(&self, pattern: &str) -> Option<usize> {
        self.as_str().find(pattern)
    }

    /// Empties the text, keeping the buffer.
    pub fn clear(&mut self) {
        self.bytes.clear();
    }

    /// Moves the bytes into a buffer of exactly their length.
    pub fn shrink_to_fit(&mut self) -> Result<(), AllocError> {
        self.bytes.shrink_to_fit()
    }

    /// A copy of the text under a clone of its allocator.
    pub fn try_clone(&self) -> Result<Self, AllocError> {
        Ok(Text { bytes: self.bytes.try_clone()? })
    }

    fn grow_for(&mut self, additional: usize) -> Result<(), AllocError> {
        let needed = self.len() + additional;
        if needed <= self.capacity() {
            return Ok(());
        }

        let target = Self::MIN_CAPACITY.max(self.capacity() * 2).max(needed);
        self.bytes.reserve_exact(target - self.len())
    }
}

impl Text<Heap> {
    /// An empty heap text.
    pub fn new() -> Self {
        Text::new_in(Heap)
    }
}

impl Default for Text<Heap> {
    fn default() -> Self {
        Text::new()
    }
}

impl From<&str> for Text<Heap> {
    /// # Panics
    ///
    /// Panics if the allocation fails.
    fn from(value: &str) -> Self {
        Text::from_str_in(value, Heap).expect("could not allocate memory")
    }
}

impl FromIterator<char> for Text<Heap> {
    fn from_iter<I>(chars: I) -> Self
    where
        I : IntoIterator<Item = char>
    {
        Text::construct_in(chars, Construction::Sequential, Heap)
            .expect("could not allocate memory")
    }
}

impl<A> Deref for Text<A>
where
    A : ScriptAlloc
{
    type Target = str;

    fn deref(&self) -> &str {
        self.as_str()
    }
}

impl<A> Display for Text<A>
where
    A : ScriptAlloc
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self.as_str(), f)
    }
}

impl<A> Debug for Text<A>
where
    A : ScriptAlloc
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Debug::fmt(self.as_str(), f)
    }
}

impl<A, B> PartialEq<Text<B>> for Text<A>
where
    A : ScriptAlloc,
    B : ScriptAlloc
{
    fn eq(&self, other: &Text<B>) -> bool {
        self.as_str() == other.as_str()
    }
}

impl<A> Eq for Text<A>
where
    A : ScriptAlloc
{}

impl<A> PartialEq<str> for Text<A>
where
    A : ScriptAlloc
{
    fn eq(&self, other: &str) -> bool {
        self.as_str() == other
    }
}

impl<'s, A> PartialEq<&'s str> for Text<A>
where
    A : ScriptAlloc
{
    fn eq(&self, other: &&'s str) -> bool {
        self.as_str() == *other
    }
}

impl<A> Hash for Text<A>
where
    A : ScriptAlloc
{
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.as_str().hash(state);
    }
}

/// Owning iterator over the chars of a [Text].
pub struct IntoChars<A>
where
    A : ScriptAlloc
{
    bytes: vector::IntoIter<u8, A>,
}

impl<A> Iterator for IntoChars<A>
where
    A : ScriptAlloc
{
    type Item = char;

    fn next(&mut self) -> Option<char> {
        let first = self.bytes.next()?;
        let width = match first.leading_ones() {
            0 => 1,
            2 => 2,
            3 => 3,
            _ => 4,
        };

        let mut encoded = [first, 0, 0, 0];
        for byte in encoded[1..width].iter_mut() {
            *byte = self.bytes.next()?;
        }
        std::str::from_utf8(&encoded[..width]).ok()?.chars().next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let (bytes, _) = self.bytes.size_hint();
        (bytes.div_ceil(4), Some(bytes))
    }
}

impl<A> Container for Text<A>
where
    A : ScriptAlloc
{
    type Item = char;
    type Alloc = A;
    type Items = IntoChars<A>;

    fn allocator(&self) -> &A {
        self.bytes.allocator()
    }

    fn into_items(self) -> IntoChars<A> {
        IntoChars { bytes: self.bytes.into_iter() }
    }
}

impl<A> Construct for Text<A>
where
    A : ScriptAlloc
{
    const CONSTRUCTION: Construction = Construction::Sequential;

    /// Pushes char by char, then trims the buffer to the final length.
    fn construct_in<I>(chars: I, _construction: Construction, alloc: A) -> Result<Self, AllocError>
    where
        I : IntoIterator<Item = char>
    {
        let mut text = Text::new_in(alloc);
        for value in chars {
            text.push(value)?;
        }
        text.shrink_to_fit()?;
        Ok(text)
    }
}

impl<A> Rebind for Text<A>
where
    A : ScriptAlloc
{
    type Rebound<B: ScriptAlloc> = Text<B>;

    fn rebind<P>(self, pass: &mut P, level: usize) -> Result<Self::Rebound<P::Alloc>, BuildError>
    where
        P : Pass
    {
        rebind_items::<Self, Self::Rebound<P::Alloc>, P, _>(self, pass, level, |value: char, pass: &mut P, level| value.rebind(pass, level))
    }
}
