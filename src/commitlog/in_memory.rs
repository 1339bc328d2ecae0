use crate::commitlog::{Entry, Index, Log};
use std::io;
use std::marker::PhantomData;

// Nothing here survives a restart. Used when the application doesn't configure a storage
// directory, and by tests.
pub struct InMemoryLog<E: Entry> {
    // We don't *need* to convert these to bytes. We could just hold the original entry in memory,
    // but we want to exercise the conversion logic.
    log: Vec<Vec<u8>>,
    _pd: PhantomData<E>,
}

impl<E: Entry> InMemoryLog<E> {
    pub fn create() -> Result<Self, io::Error> {
        Ok(InMemoryLog {
            log: vec![],
            _pd: PhantomData::default(),
        })
    }

    fn vec_index(index: Index) -> usize {
        // Log API states that Index starts from 1.
        (index.as_u64() - 1) as usize
    }
}

impl<E: Entry> Log<E> for InMemoryLog<E> {
    fn append(&mut self, entry: E) -> Result<Index, io::Error> {
        self.log.push(entry.into());

        Ok(Index::new_usize(self.log.len()))
    }

    fn read(&self, index: Index) -> Result<Option<E>, io::Error> {
        let vec_index = Self::vec_index(index);
        match self.log.get(vec_index) {
            Some(bytes) => E::try_from(bytes.clone()).map(Some),
            None => Ok(None),
        }
    }

    fn truncate(&mut self, index: Index) -> Result<(), io::Error> {
        let vec_index = Self::vec_index(index);
        self.log.truncate(vec_index);
        Ok(())
    }

    fn next_index(&self) -> Index {
        Index::new_usize(self.log.len() + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commitlog::test_entry::TestEntry;

    #[test]
    fn append_read_truncate() {
        let mut log = InMemoryLog::<TestEntry>::create().unwrap();
        assert_eq!(log.next_index(), Index::start_index());
        assert_eq!(log.read(Index::start_index()).unwrap(), None);

        assert_eq!(log.append(TestEntry::from("a")).unwrap(), Index::new(1));
        assert_eq!(log.append(TestEntry::from("b")).unwrap(), Index::new(2));
        assert_eq!(log.append(TestEntry::from("c")).unwrap(), Index::new(3));
        assert_eq!(log.read(Index::new(2)).unwrap(), Some(TestEntry::from("b")));

        log.truncate(Index::new(2)).unwrap();
        assert_eq!(log.next_index(), Index::new(2));
        assert_eq!(log.read(Index::new(2)).unwrap(), None);
        assert_eq!(log.append(TestEntry::from("d")).unwrap(), Index::new(2));
        assert_eq!(log.read(Index::new(2)).unwrap(), Some(TestEntry::from("d")));
    }
}
