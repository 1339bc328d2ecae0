use crate::commitlog::Entry;
use std::convert::TryFrom;
use std::io;

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct TestEntry(Vec<u8>);

impl Entry for TestEntry {}

impl From<&str> for TestEntry {
    fn from(s: &str) -> Self {
        TestEntry(s.as_bytes().to_vec())
    }
}

impl TryFrom<Vec<u8>> for TestEntry {
    type Error = io::Error;

    fn try_from(bytes: Vec<u8>) -> Result<Self, Self::Error> {
        Ok(TestEntry(bytes))
    }
}

impl Into<Vec<u8>> for TestEntry {
    fn into(self) -> Vec<u8> {
        self.0
    }
}
