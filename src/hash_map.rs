//! An open addressing hash map parameterized over its [ScriptAlloc].
//!
//! Entries live directly in a power of two array of slots and collisions
//! probe linearly. The slot array is replaced by one twice its size before
//! an insertion would push the load above three quarters.

use std::{
    borrow::Borrow,
    collections::hash_map::DefaultHasher,
    fmt::Debug,
    hash::{BuildHasher, BuildHasherDefault, Hash},
    marker::PhantomData,
    mem::ManuallyDrop,
};

use crate::{
    alloc::{Allocation, Heap, ScriptAlloc},
    error::{AllocError, BuildError},
    rebind::{rebind_items, Construct, Construction, Container, Pass, Rebind},
};

type Slot<K, V> = Option<(K, V)>;

/// Hasher used when none is given. Its keys are fixed, so every build of a
/// map visits its slots in the same order.
pub type DefaultHashBuilder = BuildHasherDefault<DefaultHasher>;

/// A hash map whose slot array comes from `A`.
///
/// # Examples
///
/// ```rust
/// # use script_allocators::hash_map::HashMap;
///
/// let mut ages: HashMap<&str, u32> = HashMap::new();
/// ages.insert("ada", 36).unwrap();
/// ages.insert("alan", 41).unwrap();
///
/// assert_eq!(ages.insert("ada", 37), Ok(Some(36)));
/// assert_eq!(ages.get("ada"), Some(&37));
/// assert_eq!(ages.len(), 2);
/// assert_eq!(ages.bucket_count(), 8);
/// ```
pub struct HashMap<K, V, S = DefaultHashBuilder, A = Heap>
where
    A : ScriptAlloc
{
    slots: Option<Allocation<Slot<K, V>>>,
    bucket_count: usize,
    len: usize,
    hasher: S,
    alloc: A,
    phantom: PhantomData<(K, V)>,
}

impl<K, V, S, A> HashMap<K, V, S, A>
where
    A : ScriptAlloc
{
    const MIN_BUCKETS: usize = 8;

    /// An empty map that has not allocated yet.
    pub fn with_hasher_in(hasher: S, alloc: A) -> Self {
        HashMap {
            slots: None,
            bucket_count: 0,
            len: 0,
            hasher,
            alloc,
            phantom: PhantomData,
        }
    }

    /// An empty map with `buckets` slots, rounded up to a power of two.
    pub fn with_buckets_in(buckets: usize, hasher: S, alloc: A) -> Result<Self, AllocError> {
        let mut map = HashMap::with_hasher_in(hasher, alloc);
        if buckets > 0 {
            let buckets = buckets.next_power_of_two();
            map.slots = Some(map.allocate_slots(buckets)?);
            map.bucket_count = buckets;
        }
        Ok(map)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.len
    }

    /// `true` when there are no entries.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of slots.
    pub fn bucket_count(&self) -> usize {
        self.bucket_count
    }

    /// The hash builder.
    pub fn hasher(&self) -> &S {
        &self.hasher
    }

    /// The allocator backing the slot array.
    pub fn allocator(&self) -> &A {
        &self.alloc
    }

    /// Iterates over the entries in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> + '_ {
        self.slots().iter().filter_map(|slot| slot.as_ref().map(|(key, value)| (key, value)))
    }

    /// Iterates over the keys in slot order.
    pub fn keys(&self) -> impl Iterator<Item = &K> + '_ {
        self.iter().map(|(key, _)| key)
    }

    /// Iterates over the values in slot order.
    pub fn values(&self) -> impl Iterator<Item = &V> + '_ {
        self.iter().map(|(_, value)| value)
    }

    /// Drops every entry, keeping the slot array.
    pub fn clear(&mut self) {
        for slot in self.slots_mut() {
            *slot = None;
        }
        self.len = 0;
    }

    fn slots(&self) -> &[Slot<K, V>] {
        match self.slots {
            Some(slots) => unsafe { std::slice::from_raw_parts(slots.ptr.as_ptr(), self.bucket_count) },
            None => &[],
        }
    }

    fn slots_mut(&mut self) -> &mut [Slot<K, V>] {
        match self.slots {
            Some(slots) => unsafe { std::slice::from_raw_parts_mut(slots.ptr.as_ptr(), self.bucket_count) },
            None => &mut [],
        }
    }

    fn allocate_slots(&self, buckets: usize) -> Result<Allocation<Slot<K, V>>, AllocError> {
        let slots = self.alloc.allocate::<Slot<K, V>>(buckets)?;
        for index in 0..buckets {
            unsafe { slots.ptr.as_ptr().add(index).write(None) };
        }
        Ok(slots)
    }
}

impl<K, V, S, A> HashMap<K, V, S, A>
where
    K : Hash + Eq,
    S : BuildHasher,
    A : ScriptAlloc
{
    /// Value stored under `key`.
    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K : Borrow<Q>,
        Q : Hash + Eq + ?Sized
    {
        let index = self.find(key)?;
        self.slots()[index].as_ref().map(|(_, value)| value)
    }

    /// Mutable access to the value stored under `key`.
    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K : Borrow<Q>,
        Q : Hash + Eq + ?Sized
    {
        let index = self.find(key)?;
        self.slots_mut()[index].as_mut().map(|(_, value)| value)
    }

    /// `true` when an entry for `key` exists.
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K : Borrow<Q>,
        Q : Hash + Eq + ?Sized
    {
        self.find(key).is_some()
    }

    /// Stores `value` under `key` and returns the value it replaced.
    ///
    /// A new key may first move every entry into a slot array twice as
    /// large. On failure `key` and `value` are dropped and the map is
    /// unchanged.
    pub fn insert(&mut self, key: K, value: V) -> Result<Option<V>, AllocError> {
        if let Some(index) = self.find(&key) {
            let replaced = self.slots_mut()[index].as_mut().map(|(_, existing)| std::mem::replace(existing, value));
            return Ok(replaced);
        }

        if (self.len + 1) * 4 > self.bucket_count * 3 {
            self.grow()?;
        }

        let index = self.vacant(&key);
        self.slots_mut()[index] = Some((key, value));
        self.len += 1;

        Ok(None)
    }

    /// Removes the entry for `key` and returns its value.
    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K : Borrow<Q>,
        Q : Hash + Eq + ?Sized
    {
        let mut hole = self.find(key)?;
        let (_, value) = self.slots_mut()[hole].take()?;
        self.len -= 1;

        //shift the rest of the probe run back so lookups never stop early
        let mask = self.bucket_count - 1;
        let mut index = (hole + 1) & mask;
        loop {
            let home = match &self.slots()[index] {
                Some((key, _)) => self.home(key),
                None => break,
            };
            if index.wrapping_sub(home) & mask >= index.wrapping_sub(hole) & mask {
                let moved = self.slots_mut()[index].take();
                self.slots_mut()[hole] = moved;
                hole = index;
            }
            index = (index + 1) & mask;
        }

        Some(value)
    }

    fn home<Q>(&self, key: &Q) -> usize
    where
        Q : Hash + ?Sized
    {
        self.hasher.hash_one(key) as usize & (self.bucket_count - 1)
    }

    fn find<Q>(&self, key: &Q) -> Option<usize>
    where
        K : Borrow<Q>,
        Q : Hash + Eq + ?Sized
    {
        if self.bucket_count == 0 {
            return None;
        }

        let mask = self.bucket_count - 1;
        let mut index = self.home(key);
        for _ in 0..self.bucket_count {
            match &self.slots()[index] {
                Some((existing, _)) if existing.borrow() == key => return Some(index),
                Some(_) => index = (index + 1) & mask,
                None => return None,
            }
        }

        None
    }

    /// First free slot on the probe run of `key`. The load factor keeps at
    /// least one slot free.
    fn vacant(&self, key: &K) -> usize {
        let mask = self.bucket_count - 1;
        let mut index = self.home(key);
        while self.slots()[index].is_some() {
            index = (index + 1) & mask;
        }
        index
    }

    fn grow(&mut self) -> Result<(), AllocError> {
        let buckets = Self::MIN_BUCKETS.max(self.bucket_count * 2);
        let fresh = self.allocate_slots(buckets)?;

        let old = self.slots.replace(fresh);
        let old_count = std::mem::replace(&mut self.bucket_count, buckets);

        if let Some(old) = old {
            for index in 0..old_count {
                if let Some((key, value)) = unsafe { old.ptr.as_ptr().add(index).read() } {
                    let slot = self.vacant(&key);
                    self.slots_mut()[slot] = Some((key, value));
                }
            }
            unsafe { self.alloc.deallocate(old, old_count) };
        }

        Ok(())
    }
}

impl<K, V> HashMap<K, V, DefaultHashBuilder, Heap> {
    /// An empty heap map with the default hasher.
    pub fn new() -> Self {
        HashMap::with_hasher_in(DefaultHashBuilder::default(), Heap)
    }
}

impl<K, V> Default for HashMap<K, V, DefaultHashBuilder, Heap> {
    fn default() -> Self {
        HashMap::new()
    }
}

impl<K, V, S> FromIterator<(K, V)> for HashMap<K, V, S, Heap>
where
    K : Hash + Eq,
    S : BuildHasher + Default
{
    fn from_iter<I>(entries: I) -> Self
    where
        I : IntoIterator<Item = (K, V)>
    {
        HashMap::construct_in(entries, Self::CONSTRUCTION, Heap)
            .expect("could not allocate memory")
    }
}

impl<K, V, S, A> Drop for HashMap<K, V, S, A>
where
    A : ScriptAlloc
{
    fn drop(&mut self) {
        if let Some(slots) = self.slots.take() {
            unsafe {
                std::ptr::drop_in_place(std::ptr::slice_from_raw_parts_mut(slots.ptr.as_ptr(), self.bucket_count));
                self.alloc.deallocate(slots, self.bucket_count);
            }
        }
    }
}

impl<K, V, S, A> Debug for HashMap<K, V, S, A>
where
    K : Debug,
    V : Debug,
    A : ScriptAlloc
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<K, V, W, S, T, A, B> PartialEq<HashMap<K, W, T, B>> for HashMap<K, V, S, A>
where
    K : Hash + Eq,
    V : PartialEq<W>,
    S : BuildHasher,
    T : BuildHasher,
    A : ScriptAlloc,
    B : ScriptAlloc
{
    fn eq(&self, other: &HashMap<K, W, T, B>) -> bool {
        self.len() == other.len()
            && self.iter().all(|(key, value)| other.get(key).is_some_and(|other| *value == *other))
    }
}

impl<K, V, S, A> Eq for HashMap<K, V, S, A>
where
    K : Hash + Eq,
    V : Eq,
    S : BuildHasher,
    A : ScriptAlloc
{}

impl<K, V, S, A> IntoIterator for HashMap<K, V, S, A>
where
    A : ScriptAlloc
{
    type Item = (K, V);
    type IntoIter = IntoIter<K, V, A>;

    fn into_iter(self) -> IntoIter<K, V, A> {
        let this = ManuallyDrop::new(self);
        drop(unsafe { std::ptr::read(&this.hasher) });

        IntoIter {
            slots: this.slots,
            bucket_count: this.bucket_count,
            index: 0,
            remaining: this.len,
            alloc: unsafe { std::ptr::read(&this.alloc) },
        }
    }
}

/// Owning iterator over the entries of a [HashMap], in slot order.
pub struct IntoIter<K, V, A>
where
    A : ScriptAlloc
{
    slots: Option<Allocation<Slot<K, V>>>,
    bucket_count: usize,
    index: usize,
    remaining: usize,
    alloc: A,
}

impl<K, V, A> Iterator for IntoIter<K, V, A>
where
    A : ScriptAlloc
{
    type Item = (K, V);

    fn next(&mut self) -> Option<(K, V)> {
        let slots = self.slots?;
        while self.index < self.bucket_count {
            let slot = unsafe { slots.ptr.as_ptr().add(self.index).read() };
            self.index += 1;
            if let Some(entry) = slot {
                self.remaining -= 1;
                return Some(entry);
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K, V, A> ExactSizeIterator for IntoIter<K, V, A>
where
    A : ScriptAlloc
{}

impl<K, V, A> Drop for IntoIter<K, V, A>
where
    A : ScriptAlloc
{
    fn drop(&mut self) {
        for entry in self.by_ref() {
            drop(entry);
        }
        if let Some(slots) = self.slots.take() {
            unsafe { self.alloc.deallocate(slots, self.bucket_count) };
        }
    }
}

impl<K, V, S, A> Container for HashMap<K, V, S, A>
where
    A : ScriptAlloc
{
    type Item = (K, V);
    type Alloc = A;
    type Items = IntoIter<K, V, A>;

    fn allocator(&self) -> &A {
        &self.alloc
    }

    fn into_items(self) -> IntoIter<K, V, A> {
        self.into_iter()
    }
}

impl<K, V, S, A> Construct for HashMap<K, V, S, A>
where
    K : Hash + Eq,
    S : BuildHasher + Default,
    A : ScriptAlloc
{
    const CONSTRUCTION: Construction = Construction::Bucketed { buckets: 0 };

    fn construct_in<I>(entries: I, construction: Construction, alloc: A) -> Result<Self, AllocError>
    where
        I : IntoIterator<Item = (K, V)>
    {
        let buckets = match construction {
            Construction::Bucketed { buckets } => buckets,
            Construction::Sequential => 0,
        };

        let entries = entries.into_iter();
        let mut map = HashMap::with_buckets_in(buckets, S::default(), alloc)?;

        //slots come before anything a value allocates
        if map.bucket_count == 0 && entries.size_hint().0 > 0 {
            map.grow()?;
        }
        for (key, value) in entries {
            map.insert(key, value)?;
        }
        Ok(map)
    }
}

impl<K, V, S, A> Rebind for HashMap<K, V, S, A>
where
    K : Hash + Eq,
    V : Rebind,
    S : BuildHasher + Default,
    A : ScriptAlloc
{
    type Rebound<B: ScriptAlloc> = HashMap<K, V::Rebound<B>, S, B>;

    /// Keys move over unchanged, values are rebound.
    fn rebind<P>(self, pass: &mut P, level: usize) -> Result<Self::Rebound<P::Alloc>, BuildError>
    where
        P : Pass
    {
        rebind_items::<Self, Self::Rebound<P::Alloc>, P, _>(self, pass, level, |(key, value): (K, V), pass: &mut P, level| {
            Ok((key, value.rebind(pass, level)?))
        })
    }
}
