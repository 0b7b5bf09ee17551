//! One row of an allocation [Script](crate::script::Script).

use std::fmt::Display;

use crate::identifier::Identifier;

/// Opaque identity of the element type an allocation was made for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TypeIdentity(&'static str);

impl TypeIdentity {
    /// Identity of `T`.
    pub fn of<T>() -> Self {
        TypeIdentity(std::any::type_name::<T>())
    }

    /// Placeholder identity for records that were never tied to a type.
    pub const fn unknown() -> Self {
        TypeIdentity("?")
    }

    /// Human readable type name.
    pub fn name(self) -> &'static str {
        self.0
    }
}

impl Default for TypeIdentity {
    fn default() -> Self {
        TypeIdentity::unknown()
    }
}

/// A single allocation event.
///
/// `handle` stands in for the allocation's address: it is the position the
/// record was stored at in the script that issued it, and is cleared once
/// the allocation is freed or the script is finalized.
#[derive(Clone, Copy, Debug, Default)]
pub struct EventRecord {
    /// Position handle of a live allocation, `None` once meaningless.
    pub handle: Option<Identifier>,
    /// Number of elements requested.
    pub count: usize,
    /// `size_of` the element type.
    pub element_size: usize,
    /// Allocator instance that made the request.
    pub owner: Identifier,
    /// Nesting depth of the container that made the request.
    pub level: usize,
    /// Set by `finalize` on the last record of each owner.
    pub last_for_owner: bool,
    /// The allocation was freed before construction finished.
    pub deallocated: bool,
    /// Element type of the allocation.
    pub type_identity: TypeIdentity,
}

impl EventRecord {
    /// A fresh record for `count` elements of `T` requested by `owner`.
    pub fn allocation<T>(count: usize, owner: Identifier) -> Self {
        EventRecord {
            handle: None,
            count,
            element_size: std::mem::size_of::<T>(),
            owner,
            level: 0,
            last_for_owner: false,
            deallocated: false,
            type_identity: TypeIdentity::of::<T>(),
        }
    }

    /// Same record carrying `handle`.
    pub fn with_handle(mut self, handle: Identifier) -> Self {
        self.handle = Some(handle);
        self
    }

    /// Bytes covered by the allocation.
    pub fn bytes(&self) -> usize {
        self.count * self.element_size
    }

    /// The record still occupies memory at the end of construction.
    pub fn is_alive(&self) -> bool {
        !self.deallocated
    }
}

impl PartialEq for EventRecord {
    fn eq(&self, other: &Self) -> bool {
        self.handle == other.handle
            && self.count == other.count
            && self.element_size == other.element_size
            && self.type_identity == other.type_identity
            && self.owner == other.owner
            && self.last_for_owner == other.last_for_owner
            && self.deallocated == other.deallocated
    }
}

impl Eq for EventRecord {}

impl Display for EventRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} x {} ({} bytes) owner {} level {}",
            self.count,
            self.type_identity.name(),
            self.bytes(),
            self.owner,
            self.level
        )?;
        if self.deallocated {
            write!(f, " freed")?;
        }
        if self.last_for_owner {
            write!(f, " last")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    pub fn allocation_record_test() {
        let record = EventRecord::allocation::<u64>(4, Identifier::new(2));

        assert_eq!(record.element_size, 8);
        assert_eq!(record.bytes(), 32);
        assert_eq!(record.type_identity, TypeIdentity::of::<u64>());
        assert!(record.is_alive());
        assert!(record.handle.is_none());
    }

    #[test]
    pub fn equality_ignores_level_test() {
        let mut lhs = EventRecord::allocation::<u8>(3, Identifier::first());
        let rhs = lhs;
        lhs.level = 4;

        assert_eq!(lhs, rhs);
    }

    #[test]
    pub fn equality_compares_handle_test() {
        let lhs = EventRecord::allocation::<u8>(3, Identifier::first())
            .with_handle(Identifier::new(0));
        let rhs = lhs.with_handle(Identifier::new(1));

        assert_ne!(lhs, rhs);
        assert_ne!(lhs, EventRecord { deallocated: true, ..lhs });
        assert_ne!(lhs, EventRecord { type_identity: TypeIdentity::of::<i8>(), ..lhs });
    }
}
