//! Persistent server metadata: current term, granted vote, and the latest
//! committed cluster configuration.
//!
//! The store is a single file rewritten atomically (temp file + rename +
//! fsync) on every change. Writes are synchronous: `save_vote` must return
//! before the vote response leaves the server.
//!
//! Layout:
//!
//! ```text
//! [magic: u32][current_term: u64][voted: u8][voted_for: u64]
//! [configuration_index: u64][cfg_len: u32][bincode Configuration]
//! ```
//!
//! The vote is stored behind a presence flag rather than a sentinel id,
//! so every `u64` remains a valid member id.

use std::fs::File;
use std::fs::OpenOptions;
use std::io::Read;
use std::io::Write;
use std::path::PathBuf;

use byteorder::LittleEndian;
use byteorder::ReadBytesExt;
use byteorder::WriteBytesExt;

use crate::configuration::Configuration;
use crate::error::ErrorSubject;
use crate::error::ErrorVerb;
use crate::error::StorageError;
use crate::member::MemberId;

const MAGIC: u32 = 0x534d_4554;
const FILE_NAME: &str = "meta";

pub struct MetaStore {
    dir: PathBuf,
    current_term: u64,
    voted_for: Option<MemberId>,
    configuration: Configuration,
}

fn io_err(verb: ErrorVerb) -> impl FnOnce(std::io::Error) -> StorageError {
    move |e| StorageError::from_io_error(ErrorSubject::Meta, verb, e)
}

impl MetaStore {
    /// Open the store in `dir`, loading the record if one exists.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(io_err(ErrorVerb::Write))?;

        let path = dir.join(FILE_NAME);
        if !path.exists() {
            return Ok(Self {
                dir,
                current_term: 0,
                voted_for: None,
                configuration: Configuration::default(),
            });
        }

        let mut file = File::open(&path).map_err(io_err(ErrorVerb::Read))?;
        let magic = file.read_u32::<LittleEndian>().map_err(io_err(ErrorVerb::Read))?;
        if magic != MAGIC {
            return Err(StorageError::corrupt(ErrorSubject::Meta, "bad meta magic"));
        }
        let current_term = file.read_u64::<LittleEndian>().map_err(io_err(ErrorVerb::Read))?;
        let voted = file.read_u8().map_err(io_err(ErrorVerb::Read))?;
        let voted_for = file.read_u64::<LittleEndian>().map_err(io_err(ErrorVerb::Read))?;
        let _configuration_index = file.read_u64::<LittleEndian>().map_err(io_err(ErrorVerb::Read))?;
        let cfg_len = file.read_u32::<LittleEndian>().map_err(io_err(ErrorVerb::Read))?;
        let mut buf = vec![0u8; cfg_len as usize];
        file.read_exact(&mut buf).map_err(io_err(ErrorVerb::Read))?;
        let configuration: Configuration = bincode::deserialize(&buf)
            .map_err(|e| StorageError::corrupt(ErrorSubject::Meta, format!("decode: {}", e)))?;

        Ok(Self {
            dir,
            current_term,
            voted_for: (voted != 0).then_some(voted_for),
            configuration,
        })
    }

    pub fn current_term(&self) -> u64 {
        self.current_term
    }

    pub fn voted_for(&self) -> Option<MemberId> {
        self.voted_for
    }

    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    /// Persist a term and vote. Durable on return.
    pub fn save_vote(&mut self, term: u64, voted_for: Option<MemberId>) -> Result<(), StorageError> {
        self.current_term = term;
        self.voted_for = voted_for;
        self.persist()
    }

    /// Persist the committed configuration. Durable on return.
    pub fn save_configuration(&mut self, configuration: &Configuration) -> Result<(), StorageError> {
        self.configuration = configuration.clone();
        self.persist()
    }

    fn persist(&self) -> Result<(), StorageError> {
        let cfg = bincode::serialize(&self.configuration).map_err(|e| {
            StorageError::new(
                ErrorSubject::Meta,
                ErrorVerb::Write,
                anyerror::AnyError::error(e.to_string()),
            )
        })?;

        let tmp = self.dir.join(format!("{}.tmp", FILE_NAME));
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp)
            .map_err(io_err(ErrorVerb::Write))?;

        file.write_u32::<LittleEndian>(MAGIC)
            .and_then(|_| file.write_u64::<LittleEndian>(self.current_term))
            .and_then(|_| file.write_u8(self.voted_for.is_some() as u8))
            .and_then(|_| file.write_u64::<LittleEndian>(self.voted_for.unwrap_or(0)))
            .and_then(|_| file.write_u64::<LittleEndian>(self.configuration.index))
            .and_then(|_| file.write_u32::<LittleEndian>(cfg.len() as u32))
            .and_then(|_| file.write_all(&cfg))
            .map_err(io_err(ErrorVerb::Write))?;
        file.sync_data().map_err(io_err(ErrorVerb::Sync))?;
        drop(file);

        std::fs::rename(&tmp, self.dir.join(FILE_NAME)).map_err(io_err(ErrorVerb::Write))?;

        // Make the rename itself durable.
        if let Ok(d) = File::open(&self.dir) {
            let _ = d.sync_data();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use maplit::btreemap;
    use tempfile::TempDir;

    use super::*;
    use crate::member::Member;
    use crate::member::MemberType;

    #[test]
    fn pristine_store_defaults() {
        let dir = TempDir::new().unwrap();
        let meta = MetaStore::open(dir.path()).unwrap();

        assert_eq!(0, meta.current_term());
        assert_eq!(None, meta.voted_for());
        assert_eq!(0, meta.configuration().index);
    }

    #[test]
    fn vote_round_trips_across_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let mut meta = MetaStore::open(dir.path()).unwrap();
            meta.save_vote(7, Some(2)).unwrap();
        }

        let meta = MetaStore::open(dir.path()).unwrap();
        assert_eq!(7, meta.current_term());
        assert_eq!(Some(2), meta.voted_for());
    }

    #[test]
    fn vote_for_member_zero_is_not_lost() {
        let dir = TempDir::new().unwrap();
        {
            let mut meta = MetaStore::open(dir.path()).unwrap();
            meta.save_vote(5, Some(0)).unwrap();
        }

        // A vote for id 0 must survive a restart; forgetting it would
        // allow a second grant in the same term.
        let meta = MetaStore::open(dir.path()).unwrap();
        assert_eq!(5, meta.current_term());
        assert_eq!(Some(0), meta.voted_for());
    }

    #[test]
    fn cleared_vote_round_trips() {
        let dir = TempDir::new().unwrap();
        {
            let mut meta = MetaStore::open(dir.path()).unwrap();
            meta.save_vote(3, Some(1)).unwrap();
            meta.save_vote(4, None).unwrap();
        }

        let meta = MetaStore::open(dir.path()).unwrap();
        assert_eq!(4, meta.current_term());
        assert_eq!(None, meta.voted_for());
    }

    #[test]
    fn configuration_round_trips() {
        let dir = TempDir::new().unwrap();
        let cfg = Configuration::new(
            5,
            2,
            123,
            btreemap! {
                1 => Member::new(1, "127.0.0.1:9001", MemberType::Active),
                2 => Member::new(2, "127.0.0.1:9002", MemberType::Passive),
            },
        );

        {
            let mut meta = MetaStore::open(dir.path()).unwrap();
            meta.save_configuration(&cfg).unwrap();
        }

        let meta = MetaStore::open(dir.path()).unwrap();
        assert_eq!(&cfg, meta.configuration());
    }
}
