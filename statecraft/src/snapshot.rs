//! Snapshot files.
//!
//! A snapshot captures the state machine through a log index. Files are
//! named `{index:020}-{term:020}.snapshot` and written atomically via a
//! temp file and rename. The install path streams chunks from a leader
//! into a temp file, validating that offsets arrive contiguously.
//!
//! File layout: `[magic: u32][meta_len: u32][bincode SnapshotMeta][data]`.

use std::fs::File;
use std::fs::OpenOptions;
use std::io::Read;
use std::io::Write;
use std::path::PathBuf;

use byteorder::LittleEndian;
use byteorder::ReadBytesExt;
use byteorder::WriteBytesExt;
use serde::Deserialize;
use serde::Serialize;

use crate::error::ErrorSubject;
use crate::error::ErrorVerb;
use crate::error::StorageError;

const MAGIC: u32 = 0x534e_4150;

/// Identity of a snapshot: the last log position it covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    pub index: u64,
    pub term: u64,
    /// Creation time, milliseconds since the Unix epoch.
    pub timestamp: u64,
}

struct PendingInstall {
    meta: SnapshotMeta,
    file: File,
    next_offset: u64,
}

pub struct SnapshotStore {
    dir: PathBuf,
    latest: Option<SnapshotMeta>,
    installing: Option<PendingInstall>,
}

fn io_err(verb: ErrorVerb) -> impl FnOnce(std::io::Error) -> StorageError {
    move |e| StorageError::from_io_error(ErrorSubject::Snapshot, verb, e)
}

fn file_name(meta: &SnapshotMeta) -> String {
    format!("{:020}-{:020}.snapshot", meta.index, meta.term)
}

fn parse_file_name(name: &str) -> Option<(u64, u64)> {
    let stem = name.strip_suffix(".snapshot")?;
    let (index, term) = stem.split_once('-')?;
    Some((index.parse().ok()?, term.parse().ok()?))
}

impl SnapshotStore {
    /// Open the store, locating the newest complete snapshot.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(io_err(ErrorVerb::Write))?;

        let mut latest: Option<SnapshotMeta> = None;
        for ent in std::fs::read_dir(&dir).map_err(io_err(ErrorVerb::Read))? {
            let ent = ent.map_err(io_err(ErrorVerb::Read))?;
            let name = ent.file_name().to_string_lossy().into_owned();
            if let Some((index, term)) = parse_file_name(&name) {
                if latest.map_or(true, |l| (index, term) > (l.index, l.term)) {
                    latest = Some(SnapshotMeta {
                        index,
                        term,
                        timestamp: 0,
                    });
                }
            }
        }

        // Read back the stored meta so the timestamp survives restarts.
        if let Some(l) = latest {
            let (meta, _) = read_snapshot(&dir.join(file_name(&l)))?;
            latest = Some(meta);
        }

        Ok(Self {
            dir,
            latest,
            installing: None,
        })
    }

    pub fn latest(&self) -> Option<&SnapshotMeta> {
        self.latest.as_ref()
    }

    /// Read the newest snapshot's data.
    pub fn read_latest(&self) -> Result<Option<(SnapshotMeta, Vec<u8>)>, StorageError> {
        match &self.latest {
            None => Ok(None),
            Some(meta) => read_snapshot(&self.dir.join(file_name(meta))).map(Some),
        }
    }

    /// Write a complete snapshot atomically and drop older ones.
    pub fn save(&mut self, meta: SnapshotMeta, data: &[u8]) -> Result<(), StorageError> {
        let tmp = self.dir.join(format!("{}.tmp", file_name(&meta)));
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp)
            .map_err(io_err(ErrorVerb::Write))?;
        write_header(&mut file, &meta)?;
        file.write_all(data).map_err(io_err(ErrorVerb::Write))?;
        file.sync_data().map_err(io_err(ErrorVerb::Sync))?;
        drop(file);

        std::fs::rename(&tmp, self.dir.join(file_name(&meta))).map_err(io_err(ErrorVerb::Write))?;
        self.latest = Some(meta);
        self.remove_older_than(meta);
        Ok(())
    }

    /// Begin receiving a streamed snapshot. Discards any prior partial
    /// install.
    pub fn begin_install(&mut self, meta: SnapshotMeta) -> Result<(), StorageError> {
        self.abort_install();

        let tmp = self.dir.join(format!("{}.tmp", file_name(&meta)));
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp)
            .map_err(io_err(ErrorVerb::Write))?;
        write_header(&mut file, &meta)?;

        self.installing = Some(PendingInstall {
            meta,
            file,
            next_offset: 0,
        });
        Ok(())
    }

    /// The offset the next chunk must start at, when an install is in
    /// progress for `meta`.
    pub fn install_offset(&self, meta: &SnapshotMeta) -> Option<u64> {
        self.installing
            .as_ref()
            .filter(|p| p.meta.index == meta.index && p.meta.term == meta.term)
            .map(|p| p.next_offset)
    }

    /// Append a chunk at `offset`. Returns the next expected offset.
    ///
    /// A chunk at a non-contiguous offset is rejected without touching the
    /// file; the leader retransmits from the returned offset.
    pub fn install_chunk(
        &mut self,
        meta: &SnapshotMeta,
        offset: u64,
        data: &[u8],
    ) -> Result<u64, StorageError> {
        let pending = match &mut self.installing {
            Some(p) if p.meta.index == meta.index && p.meta.term == meta.term => p,
            _ => {
                return Err(StorageError::corrupt(
                    ErrorSubject::Snapshot,
                    "chunk for a snapshot that is not being installed",
                ))
            }
        };

        if offset != pending.next_offset {
            return Ok(pending.next_offset);
        }

        pending.file.write_all(data).map_err(io_err(ErrorVerb::Write))?;
        pending.next_offset += data.len() as u64;
        Ok(pending.next_offset)
    }

    /// Seal a streamed snapshot: fsync, rename into place, drop older
    /// snapshots.
    pub fn complete_install(&mut self, meta: &SnapshotMeta) -> Result<(), StorageError> {
        let pending = match self.installing.take() {
            Some(p) if p.meta.index == meta.index && p.meta.term == meta.term => p,
            _ => {
                return Err(StorageError::corrupt(
                    ErrorSubject::Snapshot,
                    "completing a snapshot that is not being installed",
                ))
            }
        };

        pending.file.sync_data().map_err(io_err(ErrorVerb::Sync))?;
        drop(pending.file);

        let tmp = self.dir.join(format!("{}.tmp", file_name(&pending.meta)));
        std::fs::rename(&tmp, self.dir.join(file_name(&pending.meta)))
            .map_err(io_err(ErrorVerb::Write))?;
        self.latest = Some(pending.meta);
        self.remove_older_than(pending.meta);
        Ok(())
    }

    /// Drop any partial install.
    pub fn abort_install(&mut self) {
        if let Some(pending) = self.installing.take() {
            let tmp = self.dir.join(format!("{}.tmp", file_name(&pending.meta)));
            drop(pending.file);
            let _ = std::fs::remove_file(tmp);
        }
    }

    fn remove_older_than(&self, keep: SnapshotMeta) {
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return;
        };
        for ent in entries.filter_map(|e| e.ok()) {
            let name = ent.file_name().to_string_lossy().into_owned();
            if let Some((index, term)) = parse_file_name(&name) {
                if (index, term) < (keep.index, keep.term) {
                    let _ = std::fs::remove_file(ent.path());
                }
            }
        }
    }
}

fn write_header(file: &mut File, meta: &SnapshotMeta) -> Result<(), StorageError> {
    let encoded = bincode::serialize(meta).map_err(|e| {
        StorageError::new(
            ErrorSubject::Snapshot,
            ErrorVerb::Write,
            anyerror::AnyError::error(e.to_string()),
        )
    })?;
    file.write_u32::<LittleEndian>(MAGIC)
        .and_then(|_| file.write_u32::<LittleEndian>(encoded.len() as u32))
        .and_then(|_| file.write_all(&encoded))
        .map_err(io_err(ErrorVerb::Write))
}

fn read_snapshot(path: &std::path::Path) -> Result<(SnapshotMeta, Vec<u8>), StorageError> {
    let mut file = File::open(path).map_err(io_err(ErrorVerb::Read))?;
    let magic = file.read_u32::<LittleEndian>().map_err(io_err(ErrorVerb::Read))?;
    if magic != MAGIC {
        return Err(StorageError::corrupt(ErrorSubject::Snapshot, "bad snapshot magic"));
    }
    let meta_len = file.read_u32::<LittleEndian>().map_err(io_err(ErrorVerb::Read))?;
    let mut buf = vec![0u8; meta_len as usize];
    file.read_exact(&mut buf).map_err(io_err(ErrorVerb::Read))?;
    let meta: SnapshotMeta = bincode::deserialize(&buf)
        .map_err(|e| StorageError::corrupt(ErrorSubject::Snapshot, format!("decode: {}", e)))?;

    let mut data = Vec::new();
    file.read_to_end(&mut data).map_err(io_err(ErrorVerb::Read))?;
    Ok((meta, data))
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn meta(index: u64, term: u64) -> SnapshotMeta {
        SnapshotMeta {
            index,
            term,
            timestamp: 42,
        }
    }

    #[test]
    fn save_and_read_latest() {
        let dir = TempDir::new().unwrap();
        let mut store = SnapshotStore::open(dir.path()).unwrap();

        store.save(meta(100, 3), b"state-at-100").unwrap();

        let (m, data) = store.read_latest().unwrap().unwrap();
        assert_eq!(meta(100, 3), m);
        assert_eq!(b"state-at-100".as_slice(), data.as_slice());
    }

    #[test]
    fn newer_snapshot_replaces_older() {
        let dir = TempDir::new().unwrap();
        let mut store = SnapshotStore::open(dir.path()).unwrap();

        store.save(meta(100, 3), b"old").unwrap();
        store.save(meta(200, 3), b"new").unwrap();

        assert_eq!(Some(&meta(200, 3)), store.latest());
        // The old file is gone.
        let files: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".snapshot"))
            .collect();
        assert_eq!(1, files.len());
    }

    #[test]
    fn latest_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let mut store = SnapshotStore::open(dir.path()).unwrap();
            store.save(meta(100, 3), b"state").unwrap();
        }

        let store = SnapshotStore::open(dir.path()).unwrap();
        assert_eq!(Some(&meta(100, 3)), store.latest());
    }

    #[test]
    fn chunked_install_validates_offsets() {
        let dir = TempDir::new().unwrap();
        let mut store = SnapshotStore::open(dir.path()).unwrap();
        let m = meta(9000, 2);

        store.begin_install(m).unwrap();
        assert_eq!(5, store.install_chunk(&m, 0, b"hello").unwrap());

        // A replayed or out-of-order chunk is ignored and the expected
        // offset is returned.
        assert_eq!(5, store.install_chunk(&m, 0, b"hello").unwrap());
        assert_eq!(5, store.install_chunk(&m, 99, b"x").unwrap());

        assert_eq!(11, store.install_chunk(&m, 5, b" world").unwrap());
        store.complete_install(&m).unwrap();

        let (got, data) = store.read_latest().unwrap().unwrap();
        assert_eq!(m, got);
        assert_eq!(b"hello world".as_slice(), data.as_slice());
    }

    #[test]
    fn abort_install_removes_partial_file() {
        let dir = TempDir::new().unwrap();
        let mut store = SnapshotStore::open(dir.path()).unwrap();
        let m = meta(500, 1);

        store.begin_install(m).unwrap();
        store.install_chunk(&m, 0, b"partial").unwrap();
        store.abort_install();

        assert_eq!(None, store.latest());
        let tmp_files: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(tmp_files.is_empty());
    }
}
