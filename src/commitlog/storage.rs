use crate::commitlog::{Entry, Index, Log};
use std::convert::TryFrom;
use std::fs::{File, OpenOptions};
use std::io;
use std::io::{Read, Seek, SeekFrom, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

const RECORD_HEADER_SIZE: u64 = 4;

/// FileLog is a single-file durable log. Every record on disk is:
///
/// ```text
/// | 0 | 1 | 2 | 3 | 4 | ... |
/// +---+---+---+---+---+-...-+
/// | Data size (LE)| Data... |
/// +---------------+-----...-+
/// ```
///
/// Appends and truncations are fsynced before returning. The whole log is also held in memory, so
/// reads never touch disk. On open, a partially written trailing record (crash mid-append) is
/// discarded.
pub struct FileLog<E: Entry> {
    path: PathBuf,
    file: File,
    // Byte offset in `file` where each entry's record starts. `offsets[i]` is for Index(i + 1).
    offsets: Vec<u64>,
    entries: Vec<Vec<u8>>,
    end_offset: u64,
    _pd: PhantomData<E>,
}

impl<E: Entry> FileLog<E> {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, io::Error> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new().read(true).write(true).create(true).open(&path)?;

        let mut contents = Vec::new();
        file.read_to_end(&mut contents)?;

        let mut offsets = Vec::new();
        let mut entries = Vec::new();
        let mut cursor = 0usize;
        loop {
            let header_end = cursor + RECORD_HEADER_SIZE as usize;
            if header_end > contents.len() {
                break;
            }
            let mut size_bytes = [0u8; 4];
            size_bytes.copy_from_slice(&contents[cursor..header_end]);
            let data_end = header_end + u32::from_le_bytes(size_bytes) as usize;
            if data_end > contents.len() {
                break;
            }

            offsets.push(cursor as u64);
            entries.push(contents[header_end..data_end].to_vec());
            cursor = data_end;
        }

        let end_offset = cursor as u64;
        if end_offset != contents.len() as u64 {
            file.set_len(end_offset)?;
            file.sync_all()?;
        }

        Ok(FileLog {
            path,
            file,
            offsets,
            entries,
            end_offset,
            _pd: PhantomData::default(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn vec_index(index: Index) -> usize {
        (index.as_u64() - 1) as usize
    }
}

impl<E: Entry> Log<E> for FileLog<E> {
    fn append(&mut self, entry: E) -> Result<Index, io::Error> {
        let data: Vec<u8> = entry.into();
        let size = u32::try_from(data.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "log entry larger than 4GiB"))?;

        let mut record = Vec::with_capacity(RECORD_HEADER_SIZE as usize + data.len());
        record.extend_from_slice(&size.to_le_bytes());
        record.extend_from_slice(&data);

        self.file.seek(SeekFrom::Start(self.end_offset))?;
        self.file.write_all(&record)?;
        self.file.sync_data()?;

        // Only update in-memory state after the record is durable.
        self.offsets.push(self.end_offset);
        self.end_offset += record.len() as u64;
        self.entries.push(data);

        Ok(Index::new_usize(self.entries.len()))
    }

    fn read(&self, index: Index) -> Result<Option<E>, io::Error> {
        match self.entries.get(Self::vec_index(index)) {
            Some(bytes) => E::try_from(bytes.clone()).map(Some),
            None => Ok(None),
        }
    }

    fn truncate(&mut self, index: Index) -> Result<(), io::Error> {
        let vec_index = Self::vec_index(index);
        let new_end_offset = match self.offsets.get(vec_index) {
            Some(offset) => *offset,
            None => return Ok(()),
        };

        self.file.set_len(new_end_offset)?;
        self.file.sync_all()?;

        self.offsets.truncate(vec_index);
        self.entries.truncate(vec_index);
        self.end_offset = new_end_offset;

        Ok(())
    }

    fn next_index(&self) -> Index {
        Index::new_usize(self.entries.len() + 1)
    }
}
