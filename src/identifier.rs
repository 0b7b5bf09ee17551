//! Monotonic identifiers used to tag allocator owners and to hand out
//! event handles (positions inside a [Script](crate::script::Script)).

use std::fmt::Display;

use crate::error::ScriptError;

/// A monotonically increasing tag with a reserved [INVALID](Identifier::INVALID) sentinel.
///
/// Identifiers name the allocator instance that owns a run of allocation
/// events, and double as stable handles to the position a record was
/// stored at.
///
/// # Examples
///
/// ```rust
/// # use script_allocators::identifier::Identifier;
///
/// let first = Identifier::first();
/// let second = Identifier::next(first);
///
/// assert!(first < second);
/// assert_eq!(second.raw(), 1);
/// assert!(!Identifier::INVALID.is_valid());
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Identifier(i32);

impl Identifier {
    /// The sentinel carried by allocators that were never attached to a script.
    pub const INVALID: Identifier = Identifier(-1);

    /// Wraps a raw value.
    pub const fn new(raw: i32) -> Self {
        Identifier(raw)
    }

    /// The first identifier handed out by a fresh script.
    pub const fn first() -> Self {
        Identifier(0)
    }

    /// The identifier following `current`.
    pub const fn next(current: Identifier) -> Self {
        Identifier(current.0 + 1)
    }

    /// Handle for the record stored at `index`.
    ///
    /// Positions past `i32::MAX` have no handle.
    pub fn from_index(index: usize) -> Result<Self, ScriptError> {
        i32::try_from(index)
            .map(Identifier)
            .map_err(|_| ScriptError::CapacityExceeded { capacity: i32::MAX as usize })
    }

    /// `false` only for [INVALID](Identifier::INVALID).
    pub const fn is_valid(self) -> bool {
        self.0 != Self::INVALID.0
    }

    /// The raw integer value.
    pub const fn raw(self) -> i32 {
        self.0
    }

    /// Shifts a script-local identifier into the range of the script
    /// it is merged into.
    pub(crate) const fn offset_by(self, offset: Identifier) -> Self {
        Identifier(self.0 + offset.0)
    }
}

impl Default for Identifier {
    fn default() -> Self {
        Identifier::INVALID
    }
}

impl Display for Identifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_valid() {
            write!(f, "#{}", self.0)
        } else {
            write!(f, "#invalid")
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    pub fn ordering_test() {
        let ids = [Identifier::INVALID, Identifier::first(), Identifier::new(7)];

        assert!(ids[0] < ids[1]);
        assert!(ids[1] < ids[2]);
        assert_eq!(Identifier::next(Identifier::new(7)), Identifier::new(8));
        assert_eq!(Identifier::next(Identifier::INVALID), Identifier::first());
    }

    #[test]
    pub fn default_is_invalid_test() {
        assert_eq!(Identifier::default(), Identifier::INVALID);
        assert_eq!(Identifier::default().to_string(), "#invalid");
        assert_eq!(Identifier::new(3).to_string(), "#3");
    }

    #[test]
    pub fn offset_test() {
        let local = Identifier::new(2);
        assert_eq!(local.offset_by(Identifier::new(5)), Identifier::new(7));
    }

    #[test]
    pub fn from_index_test() {
        assert_eq!(Identifier::from_index(4), Ok(Identifier::new(4)));
        assert_eq!(
            Identifier::from_index(i32::MAX as usize + 1),
            Err(ScriptError::CapacityExceeded { capacity: i32::MAX as usize })
        );
    }
}
