use crate::commitlog;
use crate::replica::Term;
use std::convert::TryFrom;
use std::io;

/// Byte representation:
///
/// ```text
/// |                                         1                           |
/// | 0 | 1 | 2 | 3 | 4 | 5 | 6 | 7 | 8 | 9 | 0 | 1 | 2 | 3 | 4 | 5 | ... |
/// +---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+-...-+
/// |Vrs|       Term (8 bytes, LE)      |   Data (variable size)      ... |
/// +---+-------------------------------+-----------------------------...-+
/// ```
///
/// * `Vrs` - version of the serialized payload
/// * `Term` - raft leadership term when this entry was created
/// * `Data` - app specific data payload
///
/// Not needed:
///
/// * Index is not needed, it's the entry's position in the underlying commitlog.
/// * Size/length of `Data` is not needed; the underlying commitlog will give us the correctly allocated array.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct WriteAheadLogEntry {
    pub term: Term,
    pub data: Vec<u8>,
}

const RAFT_LOG_ENTRY_FORMAT_VERSION: u8 = 1;
const HEADER_SIZE: usize = 9;

impl commitlog::Entry for WriteAheadLogEntry {}

impl TryFrom<Vec<u8>> for WriteAheadLogEntry {
    type Error = io::Error;

    fn try_from(bytes: Vec<u8>) -> Result<Self, Self::Error> {
        if bytes.len() < HEADER_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Log entry is {} bytes, shorter than its header", bytes.len()),
            ));
        }
        if bytes[0] != RAFT_LOG_ENTRY_FORMAT_VERSION {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Unknown log entry format version {}", bytes[0]),
            ));
        }

        let mut term_bytes = [0u8; 8];
        term_bytes.copy_from_slice(&bytes[1..HEADER_SIZE]);

        Ok(WriteAheadLogEntry {
            term: Term::new(u64::from_le_bytes(term_bytes)),
            data: bytes[HEADER_SIZE..].to_vec(),
        })
    }
}

impl Into<Vec<u8>> for WriteAheadLogEntry {
    fn into(self) -> Vec<u8> {
        let mut bytes: Vec<u8> = Vec::with_capacity(HEADER_SIZE + self.data.len());

        bytes.push(RAFT_LOG_ENTRY_FORMAT_VERSION);
        bytes.extend_from_slice(&self.term.as_u64().to_le_bytes());
        bytes.extend_from_slice(&self.data);

        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_layout() {
        let entry = WriteAheadLogEntry {
            term: Term::new(0x0102),
            data: b"hi".to_vec(),
        };
        let bytes: Vec<u8> = entry.clone().into();
        assert_eq!(bytes, vec![1, 0x02, 0x01, 0, 0, 0, 0, 0, 0, b'h', b'i']);
        assert_eq!(WriteAheadLogEntry::try_from(bytes).unwrap(), entry);
    }

    #[test]
    fn rejects_corrupt_bytes() {
        assert!(WriteAheadLogEntry::try_from(vec![1, 2, 3]).is_err());
        assert!(WriteAheadLogEntry::try_from(vec![9, 0, 0, 0, 0, 0, 0, 0, 0]).is_err());
    }
}
