//! A single log segment file.
//!
//! A segment covers a contiguous index range starting at its base index.
//! The file begins with a fixed header identifying the base, followed by
//! length-prefixed, checksummed entry frames:
//!
//! ```text
//! [magic: u32][base_index: u64][base_term: u64]
//! [len: u32][crc32: u32][payload; len bytes]  ... repeated
//! ```
//!
//! An in-memory offset index maps `base_index + i` to the file position of
//! frame `i`. The index is rebuilt on open by walking the frames; a torn
//! tail frame is cut off.

use std::fs::File;
use std::fs::OpenOptions;
use std::io::Read;
use std::io::Seek;
use std::io::SeekFrom;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use byteorder::LittleEndian;
use byteorder::ReadBytesExt;
use byteorder::WriteBytesExt;

use crate::entry::Entry;
use crate::error::ErrorSubject;
use crate::error::ErrorVerb;
use crate::error::StorageError;

const MAGIC: u32 = 0x534c_4f47;
pub(crate) const HEADER_SIZE: u64 = 4 + 8 + 8;
const FRAME_HEADER_SIZE: u64 = 4 + 4;

/// Capacity limits for a segment.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SegmentDescriptor {
    pub base_index: u64,
    /// Term of the entry preceding `base_index`, used for consistency
    /// checks when the segment is the start of the log.
    pub base_term: u64,
    pub max_entries: u64,
    pub max_bytes: u64,
}

pub(crate) struct Segment {
    pub descriptor: SegmentDescriptor,
    path: PathBuf,
    file: File,
    /// File position of each frame; slot `i` holds entry `base_index + i`.
    offsets: Vec<u64>,
    /// Current append position.
    size: u64,
    sealed: bool,
}

fn io_err(base: u64, verb: ErrorVerb) -> impl FnOnce(std::io::Error) -> StorageError {
    move |e| StorageError::from_io_error(ErrorSubject::Segment(base), verb, e)
}

impl Segment {
    /// File name for a segment with the given base index.
    pub fn file_name(base_index: u64) -> String {
        format!("{:020}.log", base_index)
    }

    /// Parse a base index out of a segment file name.
    pub fn parse_file_name(name: &str) -> Option<u64> {
        name.strip_suffix(".log")?.parse().ok()
    }

    /// Create an empty segment file.
    pub fn create(dir: &Path, descriptor: SegmentDescriptor) -> Result<Self, StorageError> {
        let path = dir.join(Self::file_name(descriptor.base_index));
        let mut file = OpenOptions::new()
            .create_new(true)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(io_err(descriptor.base_index, ErrorVerb::Write))?;

        file.write_u32::<LittleEndian>(MAGIC)
            .and_then(|_| file.write_u64::<LittleEndian>(descriptor.base_index))
            .and_then(|_| file.write_u64::<LittleEndian>(descriptor.base_term))
            .map_err(io_err(descriptor.base_index, ErrorVerb::Write))?;

        Ok(Self {
            descriptor,
            path,
            file,
            offsets: Vec::new(),
            size: HEADER_SIZE,
            sealed: false,
        })
    }

    /// Open an existing segment, rebuilding the offset index by walking
    /// frames. A torn or corrupt tail frame is truncated away; corruption
    /// before the tail is an error.
    pub fn open(path: PathBuf, max_entries: u64, max_bytes: u64) -> Result<Self, StorageError> {
        let base = Self::parse_file_name(
            path.file_name().and_then(|n| n.to_str()).unwrap_or_default(),
        )
        .ok_or_else(|| {
            StorageError::corrupt(ErrorSubject::Log, format!("bad segment name {:?}", path))
        })?;

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(io_err(base, ErrorVerb::Read))?;

        let file_len = file
            .metadata()
            .map_err(io_err(base, ErrorVerb::Read))?
            .len();

        if file_len < HEADER_SIZE {
            return Err(StorageError::corrupt(
                ErrorSubject::Segment(base),
                "segment shorter than header",
            ));
        }

        let magic = file
            .read_u32::<LittleEndian>()
            .map_err(io_err(base, ErrorVerb::Read))?;
        if magic != MAGIC {
            return Err(StorageError::corrupt(
                ErrorSubject::Segment(base),
                "bad segment magic",
            ));
        }
        let base_index = file
            .read_u64::<LittleEndian>()
            .map_err(io_err(base, ErrorVerb::Read))?;
        let base_term = file
            .read_u64::<LittleEndian>()
            .map_err(io_err(base, ErrorVerb::Read))?;

        if base_index != base {
            return Err(StorageError::corrupt(
                ErrorSubject::Segment(base),
                format!("header base {} does not match file name", base_index),
            ));
        }

        let mut offsets = Vec::new();
        let mut pos = HEADER_SIZE;
        while pos + FRAME_HEADER_SIZE <= file_len {
            let len = file
                .read_u32::<LittleEndian>()
                .map_err(io_err(base, ErrorVerb::Read))? as u64;
            let crc = file
                .read_u32::<LittleEndian>()
                .map_err(io_err(base, ErrorVerb::Read))?;

            if pos + FRAME_HEADER_SIZE + len > file_len {
                // Torn tail write.
                break;
            }

            let mut payload = vec![0u8; len as usize];
            file.read_exact(&mut payload)
                .map_err(io_err(base, ErrorVerb::Read))?;
            if crc32fast::hash(&payload) != crc {
                break;
            }

            offsets.push(pos);
            pos += FRAME_HEADER_SIZE + len;
        }

        if pos < file_len {
            tracing::warn!(
                segment = base,
                lost = file_len - pos,
                "truncating torn tail of segment"
            );
            file.set_len(pos).map_err(io_err(base, ErrorVerb::Write))?;
        }

        file.seek(SeekFrom::Start(pos))
            .map_err(io_err(base, ErrorVerb::Seek))?;

        let descriptor = SegmentDescriptor {
            base_index,
            base_term,
            max_entries,
            max_bytes,
        };
        Ok(Self {
            descriptor,
            path,
            file,
            offsets,
            size: pos,
            sealed: false,
        })
    }

    pub fn base_index(&self) -> u64 {
        self.descriptor.base_index
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Index of the last entry, or `base_index - 1` when empty.
    pub fn last_index(&self) -> u64 {
        self.descriptor.base_index + self.offsets.len() as u64 - 1
    }

    pub fn is_full(&self) -> bool {
        self.offsets.len() as u64 >= self.descriptor.max_entries
            || self.size >= self.descriptor.max_bytes
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Reopen for writing after a truncation made this the tail again.
    pub fn unseal(&mut self) {
        self.sealed = false;
    }

    /// Seal the segment: flush and mark immutable. Called before rolling a
    /// new tail.
    pub fn seal(&mut self) -> Result<(), StorageError> {
        self.flush()?;
        self.sealed = true;
        Ok(())
    }

    pub fn contains(&self, index: u64) -> bool {
        index >= self.descriptor.base_index && !self.is_empty() && index <= self.last_index()
    }

    /// Append an already-encoded entry. The caller guarantees the entry's
    /// index is `last_index() + 1`.
    pub fn append(&mut self, encoded: &[u8]) -> Result<(), StorageError> {
        debug_assert!(!self.sealed);
        let base = self.descriptor.base_index;

        self.file
            .seek(SeekFrom::Start(self.size))
            .map_err(io_err(base, ErrorVerb::Seek))?;
        self.file
            .write_u32::<LittleEndian>(encoded.len() as u32)
            .and_then(|_| self.file.write_u32::<LittleEndian>(crc32fast::hash(encoded)))
            .and_then(|_| self.file.write_all(encoded))
            .map_err(io_err(base, ErrorVerb::Write))?;

        self.offsets.push(self.size);
        self.size += FRAME_HEADER_SIZE + encoded.len() as u64;
        Ok(())
    }

    /// Read the entry at `index`, which must be within this segment.
    pub fn read(&mut self, index: u64) -> Result<Entry, StorageError> {
        let base = self.descriptor.base_index;
        let slot = (index - base) as usize;
        let offset = self.offsets[slot];

        self.file
            .seek(SeekFrom::Start(offset))
            .map_err(io_err(base, ErrorVerb::Seek))?;
        let len = self
            .file
            .read_u32::<LittleEndian>()
            .map_err(io_err(base, ErrorVerb::Read))? as usize;
        let crc = self
            .file
            .read_u32::<LittleEndian>()
            .map_err(io_err(base, ErrorVerb::Read))?;
        let mut payload = vec![0u8; len];
        self.file
            .read_exact(&mut payload)
            .map_err(io_err(base, ErrorVerb::Read))?;

        if crc32fast::hash(&payload) != crc {
            return Err(StorageError::corrupt(
                ErrorSubject::LogIndex(index),
                "entry checksum mismatch",
            ));
        }

        // Restore the append position for the next write.
        self.file
            .seek(SeekFrom::Start(self.size))
            .map_err(io_err(base, ErrorVerb::Seek))?;

        let entry: Entry = bincode::deserialize(&payload).map_err(|e| {
            StorageError::corrupt(ErrorSubject::LogIndex(index), format!("decode: {}", e))
        })?;
        Ok(entry)
    }

    /// Remove all entries with index greater than `index`. `index` may be
    /// `base_index - 1`, which empties the segment.
    pub fn truncate(&mut self, index: u64) -> Result<(), StorageError> {
        let base = self.descriptor.base_index;
        let keep = (index + 1).saturating_sub(base) as usize;
        if keep >= self.offsets.len() {
            return Ok(());
        }

        let new_size = if keep == 0 {
            HEADER_SIZE
        } else {
            self.offsets[keep]
        };
        self.file
            .set_len(new_size)
            .map_err(io_err(base, ErrorVerb::Write))?;
        self.offsets.truncate(keep);
        self.size = new_size;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), StorageError> {
        self.file
            .sync_data()
            .map_err(io_err(self.descriptor.base_index, ErrorVerb::Sync))
    }

    /// Delete the backing file. Consumes the segment.
    pub fn delete(self) -> Result<(), StorageError> {
        let base = self.descriptor.base_index;
        drop(self.file);
        std::fs::remove_file(&self.path).map_err(io_err(base, ErrorVerb::Delete))
    }
}
