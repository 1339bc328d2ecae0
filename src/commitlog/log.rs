use std::convert::TryFrom;
use std::{fmt, io};

#[derive(Copy, Clone, PartialOrd, PartialEq, Ord, Eq, Hash)]
struct U64NonZero(u64);

impl U64NonZero {
    fn new(val: u64) -> Self {
        assert_ne!(val, 0);
        U64NonZero(val)
    }
}

/// Index is an index of an entry in the log; i.e. a log entry's index.
#[derive(Copy, Clone, PartialOrd, PartialEq, Ord, Eq, Hash)]
pub struct Index(U64NonZero);

impl Index {
    pub fn new(index: u64) -> Self {
        Index(U64NonZero::new(index))
    }

    pub fn new_usize(index: usize) -> Self {
        Self::new(index as u64)
    }

    /// Wire/disk formats use 0 to mean "no index".
    pub fn from_u64_or_none(index: u64) -> Option<Self> {
        if index == 0 {
            None
        } else {
            Some(Self::new(index))
        }
    }

    pub fn start_index() -> Self {
        Self::new(1)
    }

    pub fn as_u64(&self) -> u64 {
        self.0 .0
    }

    /// Only for indexes of our own log. Anything a peer sent goes through `checked_plus`.
    pub fn plus(&self, delta: u64) -> Index {
        Index::new(self.as_u64() + delta)
    }

    pub fn checked_plus(&self, delta: u64) -> Option<Index> {
        self.as_u64().checked_add(delta).map(Index::new)
    }

    pub fn checked_minus(&self, delta: u64) -> Option<Index> {
        self.as_u64().checked_sub(delta).and_then(Self::from_u64_or_none)
    }
}

impl fmt::Debug for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0 .0)
    }
}

impl fmt::Display for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0 .0)
    }
}

/// Log is an append only log intended for use as a replicated commit log in a database.
///
/// Log indexes entries starting from 1. There will be no entry existing at index 0. The first
/// entry is written at index 1.
///
/// Every mutating method must be durable by the time it returns `Ok`.
pub trait Log<E: Entry> {
    /// append() appends a log entry to the log at the next log entry index, then returns
    /// the log entry index that was just used to append the entry.
    fn append(&mut self, entry: E) -> Result<Index, io::Error>;

    /// Read log entry at specified index.
    fn read(&self, index: Index) -> Result<Option<E>, io::Error>;

    /// Deletes anything starting at `index` and later.
    fn truncate(&mut self, index: Index) -> Result<(), io::Error>;

    /// next_index returns the next index that will be used to append an entry.
    fn next_index(&self) -> Index;
}

/// Entries are stored as opaque bytes. Decoding can fail on corrupted storage, which callers treat
/// like any other IO failure.
pub trait Entry: Clone + Into<Vec<u8>> + TryFrom<Vec<u8>, Error = io::Error> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_arithmetic() {
        let one = Index::start_index();
        assert_eq!(one.as_u64(), 1);
        assert_eq!(one.plus(4), Index::new(5));
        assert_eq!(one.checked_minus(1), None);
        assert_eq!(Index::new(5).checked_minus(2), Some(Index::new(3)));
        assert_eq!(Index::new(5).checked_minus(9), None);
    }

    #[test]
    fn index_from_wire() {
        assert_eq!(Index::from_u64_or_none(0), None);
        assert_eq!(Index::from_u64_or_none(7), Some(Index::new(7)));
    }

    #[test]
    fn none_sorts_before_any_index() {
        let mut indexes = vec![Some(Index::new(3)), None, Some(Index::new(1))];
        indexes.sort();
        assert_eq!(indexes, vec![None, Some(Index::new(1)), Some(Index::new(3))]);
    }
}
