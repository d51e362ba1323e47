//! The segmented replicated log.
//!
//! The log is an append-only sequence of [`Entry`] values with dense,
//! strictly increasing indices. It is stored as a series of segment files;
//! the tail segment is writable and is sealed and replaced once it reaches
//! its capacity limits. Older entries are discarded from either end:
//! `truncate` removes a conflicting suffix, `compact` raises the first
//! index after a snapshot has covered a prefix.
//!
//! The log has a single owner; all access goes through `&mut self`.

mod segment;

use std::path::Path;
use std::path::PathBuf;

use segment::Segment;
use segment::SegmentDescriptor;

use crate::entry::Entry;
use crate::error::ErrorSubject;
use crate::error::ErrorVerb;
use crate::error::StorageError;

pub struct Log {
    dir: PathBuf,
    max_entries: u64,
    max_bytes: u64,
    /// Ordered by base index; the last element is the writable tail.
    segments: Vec<Segment>,
    /// First readable index. May point into the middle of the oldest
    /// segment after a compaction that could not yet drop the whole file.
    first_index: u64,
    last_term: u64,
}

impl Log {
    /// Open the log in `dir`, recovering any existing segments.
    ///
    /// Recovery walks segment files in base-index order, rebuilds each
    /// offset index, cuts torn tail frames, and drops segments that no
    /// longer connect to their predecessor.
    pub fn open(dir: impl Into<PathBuf>, max_entries: u64, max_bytes: u64) -> Result<Self, StorageError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .map_err(|e| StorageError::from_io_error(ErrorSubject::Log, ErrorVerb::Write, e))?;

        let mut bases: Vec<u64> = std::fs::read_dir(&dir)
            .map_err(|e| StorageError::from_io_error(ErrorSubject::Log, ErrorVerb::Read, e))?
            .filter_map(|ent| ent.ok())
            .filter_map(|ent| Segment::parse_file_name(&ent.file_name().to_string_lossy()))
            .collect();
        bases.sort_unstable();

        let mut segments: Vec<Segment> = Vec::new();
        for base in bases {
            let seg = Segment::open(dir.join(Segment::file_name(base)), max_entries, max_bytes)?;

            if let Some(prev) = segments.last() {
                let expected = if prev.is_empty() {
                    prev.base_index()
                } else {
                    prev.last_index() + 1
                };
                if seg.base_index() != expected {
                    tracing::warn!(
                        segment = seg.base_index(),
                        expected,
                        "dropping disconnected log segment and its successors"
                    );
                    seg.delete()?;
                    continue;
                }
            }
            // Everything before the tail is immutable.
            if let Some(prev) = segments.last_mut() {
                prev.seal()?;
            }
            segments.push(seg);
        }

        let mut log = Self {
            dir,
            max_entries,
            max_bytes,
            segments,
            first_index: 1,
            last_term: 0,
        };

        if log.segments.is_empty() {
            log.roll(1, 0)?;
        }

        log.first_index = log.segments[0].base_index();
        log.last_term = match log.read_last()? {
            Some(e) => e.term,
            None => log.segments[0].descriptor.base_term,
        };
        Ok(log)
    }

    fn roll(&mut self, base_index: u64, base_term: u64) -> Result<(), StorageError> {
        if let Some(tail) = self.segments.last_mut() {
            tail.seal()?;
        }
        let descriptor = SegmentDescriptor {
            base_index,
            base_term,
            max_entries: self.max_entries,
            max_bytes: self.max_bytes,
        };
        self.segments.push(Segment::create(&self.dir, descriptor)?);
        Ok(())
    }

    fn read_last(&mut self) -> Result<Option<Entry>, StorageError> {
        let last = self.last_index();
        if last < self.segments[0].base_index() {
            return Ok(None);
        }
        let seg = self
            .segments
            .iter_mut()
            .rev()
            .find(|s| s.contains(last))
            .expect("tail segment must contain last index");
        seg.read(last).map(Some)
    }

    /// The first readable index. One greater than `last_index` when the
    /// log is empty.
    pub fn first_index(&self) -> u64 {
        self.first_index
    }

    /// The highest index written, or `first_index - 1` when empty.
    pub fn last_index(&self) -> u64 {
        let tail = self.segments.last().expect("log always has a tail segment");
        if tail.is_empty() {
            tail.base_index() - 1
        } else {
            tail.last_index()
        }
    }

    /// Term of the last entry, carried across compaction and restarts.
    pub fn last_term(&self) -> u64 {
        self.last_term
    }

    /// Append the next entry. The entry's index must be exactly
    /// `last_index() + 1`.
    pub fn append(&mut self, entry: &Entry) -> Result<u64, StorageError> {
        let next = self.last_index() + 1;
        if entry.index != next {
            return Err(StorageError::out_of_bounds(
                entry.index,
                self.first_index,
                self.last_index(),
            ));
        }

        if self.segments.last().expect("tail").is_full() {
            self.roll(next, self.last_term)?;
        }

        let encoded = bincode::serialize(entry).map_err(|e| {
            StorageError::new(
                ErrorSubject::LogIndex(entry.index),
                ErrorVerb::Write,
                anyerror::AnyError::error(e.to_string()),
            )
        })?;
        self.segments.last_mut().expect("tail").append(&encoded)?;
        self.last_term = entry.term;
        Ok(entry.index)
    }

    /// The entry at `index`, or `None` outside `[first_index, last_index]`.
    pub fn get(&mut self, index: u64) -> Result<Option<Entry>, StorageError> {
        if index < self.first_index || index > self.last_index() {
            return Ok(None);
        }
        let seg = match self.segments.iter_mut().rev().find(|s| s.contains(index)) {
            Some(s) => s,
            None => return Ok(None),
        };
        seg.read(index).map(Some)
    }

    /// The term of the entry at `index`, if readable.
    pub fn term(&mut self, index: u64) -> Result<Option<u64>, StorageError> {
        Ok(self.get(index)?.map(|e| e.term))
    }

    /// Entries in `[from, to]`, clamped to the readable range.
    pub fn entries(&mut self, from: u64, to: u64) -> Result<Vec<Entry>, StorageError> {
        let from = from.max(self.first_index);
        let to = to.min(self.last_index());
        let mut out = Vec::new();
        for index in from..=to {
            match self.get(index)? {
                Some(e) => out.push(e),
                None => break,
            }
        }
        Ok(out)
    }

    /// A batch starting at `from`, limited by entry count and encoded
    /// size. Always returns at least one entry when `from` is readable.
    pub fn batch(
        &mut self,
        from: u64,
        max_entries: u64,
        max_bytes: u64,
    ) -> Result<Vec<Entry>, StorageError> {
        let mut out = Vec::new();
        let mut bytes = 0u64;
        let last = self.last_index();
        let mut index = from.max(self.first_index);

        while index <= last && (out.len() as u64) < max_entries {
            let entry = match self.get(index)? {
                Some(e) => e,
                None => break,
            };
            bytes += bincode::serialized_size(&entry).unwrap_or(0);
            if !out.is_empty() && bytes > max_bytes {
                break;
            }
            out.push(entry);
            index += 1;
        }
        Ok(out)
    }

    /// Remove all entries with index greater than `index`.
    ///
    /// Used by followers to cut a conflicting suffix. The caller must not
    /// truncate below its commit index.
    pub fn truncate(&mut self, index: u64) -> Result<(), StorageError> {
        if index >= self.last_index() {
            return Ok(());
        }
        if index < self.first_index - 1 {
            return Err(StorageError::out_of_bounds(
                index,
                self.first_index,
                self.last_index(),
            ));
        }

        // Drop whole segments that start past the truncation point, then
        // cut the new tail.
        while self.segments.len() > 1
            && self.segments.last().expect("tail").base_index() > index
        {
            self.segments.pop().expect("checked").delete()?;
        }
        let tail = self.segments.last_mut().expect("tail");
        tail.truncate(index)?;
        tail.unseal();

        self.last_term = match self.read_last()? {
            Some(e) => e.term,
            None => self.segments[0].descriptor.base_term,
        };
        Ok(())
    }

    /// Raise `first_index` to `index + 1`, discarding older entries.
    ///
    /// Called after the state machine has applied through `index` and a
    /// snapshot covering it exists. Whole sealed segments below the new
    /// first index are deleted; a partially covered segment is kept and
    /// its older entries become unreadable.
    pub fn compact(&mut self, index: u64) -> Result<(), StorageError> {
        if index + 1 <= self.first_index {
            return Ok(());
        }
        if index > self.last_index() {
            return Err(StorageError::out_of_bounds(
                index,
                self.first_index,
                self.last_index(),
            ));
        }

        self.first_index = index + 1;

        while self.segments.len() > 1 {
            let first = &self.segments[0];
            if first.is_sealed() && !first.is_empty() && first.last_index() < self.first_index {
                self.segments.remove(0).delete()?;
            } else {
                break;
            }
        }
        Ok(())
    }

    /// Reset the log to start after a snapshot at `index`/`term`,
    /// discarding all current entries. Used when installing a snapshot
    /// that covers more than the local log.
    pub fn reset(&mut self, index: u64, term: u64) -> Result<(), StorageError> {
        while let Some(seg) = self.segments.pop() {
            seg.delete()?;
        }
        self.roll(index + 1, term)?;
        self.first_index = index + 1;
        self.last_term = term;
        Ok(())
    }

    /// Guarantee all prior appends are durable on return.
    pub fn flush(&mut self) -> Result<(), StorageError> {
        self.segments.last_mut().expect("tail").flush()
    }

    /// Directory this log lives in.
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    use super::*;
    use crate::entry::EntryPayload;

    fn entry(index: u64, term: u64) -> Entry {
        Entry::new(
            index,
            term,
            EntryPayload::Command {
                session: 1,
                sequence: index,
                operation: format!("op-{}", index).into_bytes(),
            },
        )
    }

    fn open(dir: &TempDir) -> Log {
        Log::open(dir.path(), 1024, 1024 * 1024).unwrap()
    }

    #[test]
    fn empty_log_bounds() {
        let dir = TempDir::new().unwrap();
        let log = open(&dir);

        assert_eq!(1, log.first_index());
        assert_eq!(0, log.last_index());
        assert_eq!(0, log.last_term());
    }

    #[test]
    fn append_assigns_dense_indices() {
        let dir = TempDir::new().unwrap();
        let mut log = open(&dir);

        for i in 1..=10 {
            assert_eq!(i, log.append(&entry(i, 1)).unwrap());
        }
        assert_eq!(10, log.last_index());
        assert_eq!(1, log.last_term());

        // A gap is rejected.
        let err = log.append(&entry(12, 1)).unwrap_err();
        assert!(err.to_string().contains("out of bounds"));
    }

    #[test]
    fn get_reads_back_appended_entries() {
        let dir = TempDir::new().unwrap();
        let mut log = open(&dir);

        for i in 1..=5 {
            log.append(&entry(i, 2)).unwrap();
        }

        let e = log.get(3).unwrap().unwrap();
        assert_eq!(3, e.index);
        assert_eq!(2, e.term);
        assert_eq!(None, log.get(0).unwrap());
        assert_eq!(None, log.get(6).unwrap());
    }

    #[test]
    fn truncate_cuts_suffix_and_restores_last_term() {
        let dir = TempDir::new().unwrap();
        let mut log = open(&dir);

        for i in 1..=3 {
            log.append(&entry(i, 1)).unwrap();
        }
        for i in 4..=6 {
            log.append(&entry(i, 2)).unwrap();
        }

        log.truncate(3).unwrap();
        assert_eq!(3, log.last_index());
        assert_eq!(1, log.last_term());

        // The log accepts new entries at the truncation point.
        log.append(&entry(4, 3)).unwrap();
        assert_eq!(3, log.get(4).unwrap().unwrap().term);
    }

    #[test]
    fn segments_roll_and_remain_readable() {
        let dir = TempDir::new().unwrap();
        let mut log = Log::open(dir.path(), 4, 1024 * 1024).unwrap();

        for i in 1..=10 {
            log.append(&entry(i, 1)).unwrap();
        }

        assert_eq!(10, log.last_index());
        for i in 1..=10 {
            assert_eq!(i, log.get(i).unwrap().unwrap().index);
        }
    }

    #[test]
    fn compact_drops_whole_sealed_segments() {
        let dir = TempDir::new().unwrap();
        let mut log = Log::open(dir.path(), 4, 1024 * 1024).unwrap();

        for i in 1..=12 {
            log.append(&entry(i, 1)).unwrap();
        }

        log.compact(8).unwrap();
        assert_eq!(9, log.first_index());
        assert_eq!(None, log.get(8).unwrap());
        assert_eq!(12, log.get(12).unwrap().unwrap().index);

        // Segment files below the first index are gone.
        let remaining: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|n| n.ends_with(".log"))
            .collect();
        assert!(remaining.len() < 3, "expected old segments deleted: {:?}", remaining);
    }

    #[test]
    fn recovery_restores_entries_and_bounds() {
        let dir = TempDir::new().unwrap();
        {
            let mut log = Log::open(dir.path(), 4, 1024 * 1024).unwrap();
            for i in 1..=9 {
                log.append(&entry(i, 3)).unwrap();
            }
            log.flush().unwrap();
        }

        let mut log = Log::open(dir.path(), 4, 1024 * 1024).unwrap();
        assert_eq!(1, log.first_index());
        assert_eq!(9, log.last_index());
        assert_eq!(3, log.last_term());
        assert_eq!(5, log.get(5).unwrap().unwrap().index);
    }

    #[test]
    fn recovery_cuts_torn_tail_frame() {
        let dir = TempDir::new().unwrap();
        let path;
        {
            let mut log = open(&dir);
            for i in 1..=3 {
                log.append(&entry(i, 1)).unwrap();
            }
            log.flush().unwrap();
            path = dir.path().join(segment::Segment::file_name(1));
        }

        // Chop bytes off the last frame.
        let len = std::fs::metadata(&path).unwrap().len();
        let f = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        f.set_len(len - 3).unwrap();
        drop(f);

        let mut log = open(&dir);
        assert_eq!(2, log.last_index());
        assert_eq!(2, log.get(2).unwrap().unwrap().index);
        assert_eq!(None, log.get(3).unwrap());

        // The log keeps working after the cut.
        log.append(&entry(3, 2)).unwrap();
        assert_eq!(3, log.last_index());
    }

    #[test]
    fn batch_respects_count_ceiling() {
        let dir = TempDir::new().unwrap();
        let mut log = open(&dir);
        for i in 1..=10 {
            log.append(&entry(i, 1)).unwrap();
        }

        let batch = log.batch(4, 3, u64::MAX).unwrap();
        assert_eq!(vec![4, 5, 6], batch.iter().map(|e| e.index).collect::<Vec<_>>());

        // A byte ceiling still yields at least one entry.
        let batch = log.batch(4, 10, 1).unwrap();
        assert_eq!(1, batch.len());
    }

    #[test]
    fn reset_moves_log_past_snapshot() {
        let dir = TempDir::new().unwrap();
        let mut log = open(&dir);
        for i in 1..=5 {
            log.append(&entry(i, 1)).unwrap();
        }

        log.reset(9000, 4).unwrap();
        assert_eq!(9001, log.first_index());
        assert_eq!(9000, log.last_index());
        assert_eq!(4, log.last_term());

        log.append(&entry(9001, 5)).unwrap();
        assert_eq!(9001, log.last_index());
    }
}
