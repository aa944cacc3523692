//! Raft log and vote persisted in RocksDB.
//!
//! Vote, committed log id and appended entries are synced to the WAL before the call returns,
//! so a restarted replica never votes twice in a term and keeps every entry it acknowledged.

use std::fmt::Debug;
use std::ops::Bound;
use std::ops::RangeBounds;
use std::sync::Arc;

use anyerror::AnyError;
use byteorder::BigEndian;
use byteorder::ByteOrder;
use meta::StoreMeta;
use openraft::storage::LogFlushed;
use openraft::storage::LogState;
use openraft::storage::RaftLogStorage;
use openraft::Entry;
use openraft::ErrorSubject;
use openraft::ErrorVerb;
use openraft::LogId;
use openraft::RaftLogReader;
use openraft::StorageError;
use openraft::StorageIOError;
use openraft::Vote;
use rocksdb::ColumnFamily;
use rocksdb::Direction;
use rocksdb::IteratorMode;
use rocksdb::DB;

use crate::store::rocks::cf_handle;
use crate::store::rocks::CF_LOGS;
use crate::store::rocks::CF_META;
use crate::NodeId;
use crate::TypeConfig;

#[derive(Debug, Clone)]
pub struct RocksLogStore {
    db: Arc<DB>,
}

impl RocksLogStore {
    /// `db` must have been opened with [`open_db`](crate::store::rocks::open_db).
    pub fn new(db: Arc<DB>) -> Self {
        Self { db }
    }

    fn cf_meta(&self) -> Result<&ColumnFamily, StorageError<NodeId>> {
        cf_handle(&self.db, CF_META, ErrorSubject::Store)
    }

    fn cf_logs(&self) -> Result<&ColumnFamily, StorageError<NodeId>> {
        cf_handle(&self.db, CF_LOGS, ErrorSubject::Logs)
    }

    /// Get a store metadata.
    ///
    /// It returns `None` if the store does not have such a metadata stored.
    fn get_meta<M: StoreMeta>(&self) -> Result<Option<M::Value>, StorageError<NodeId>> {
        let bytes = self.db.get_cf(self.cf_meta()?, M::KEY).map_err(M::read_err)?;

        let Some(bytes) = bytes else {
            return Ok(None);
        };

        let t = serde_json::from_slice(&bytes).map_err(M::read_err)?;

        Ok(Some(t))
    }

    /// Save a store metadata and sync it to disk.
    fn put_meta<M: StoreMeta>(&self, value: &M::Value) -> Result<(), StorageError<NodeId>> {
        let json_value = serde_json::to_vec(value).map_err(|e| M::write_err(value, e))?;

        self.db.put_cf(self.cf_meta()?, M::KEY, json_value).map_err(|e| M::write_err(value, e))?;
        self.db.flush_wal(true).map_err(|e| M::write_err(value, e))?;

        Ok(())
    }

    fn decode_entry(key: &[u8], val: &[u8]) -> Result<(u64, Entry<TypeConfig>), StorageError<NodeId>> {
        let index = bin_to_id(key).ok_or_else(|| {
            let e = AnyError::error(format!("invalid log key of {} bytes", key.len()));
            StorageIOError::new(ErrorSubject::Logs, ErrorVerb::Read, e)
        })?;

        let entry: Entry<TypeConfig> = serde_json::from_slice(val).map_err(|e| StorageIOError::read_logs(&e))?;
        Ok((index, entry))
    }
}

impl RaftLogReader<TypeConfig> for RocksLogStore {
    async fn try_get_log_entries<RB: RangeBounds<u64> + Clone + Debug + Send>(
        &mut self,
        range: RB,
    ) -> Result<Vec<Entry<TypeConfig>>, StorageError<NodeId>> {
        let start = match range.start_bound() {
            Bound::Included(x) => id_to_bin(*x),
            Bound::Excluded(x) => id_to_bin(*x + 1),
            Bound::Unbounded => id_to_bin(0),
        };

        let mut res = Vec::new();

        let it = self.db.iterator_cf(self.cf_logs()?, IteratorMode::From(&start, Direction::Forward));
        for item in it {
            let (key, val) = item.map_err(|e| StorageIOError::read_logs(&e))?;

            let (index, entry) = Self::decode_entry(&key, &val)?;
            if !range.contains(&index) {
                break;
            }

            debug_assert_eq!(index, entry.log_id.index);
            res.push(entry);
        }
        Ok(res)
    }
}

impl RaftLogStorage<TypeConfig> for RocksLogStore {
    type LogReader = Self;

    async fn get_log_state(&mut self) -> Result<LogState<TypeConfig>, StorageError<NodeId>> {
        let last = self.db.iterator_cf(self.cf_logs()?, IteratorMode::End).next();

        let last_log_id = match last {
            None => None,
            Some(item) => {
                let (key, val) = item.map_err(|e| StorageIOError::read_logs(&e))?;
                let (_, entry) = Self::decode_entry(&key, &val)?;
                Some(entry.log_id)
            }
        };

        let last_purged_log_id = self.get_meta::<meta::LastPurged>()?;

        Ok(LogState {
            last_purged_log_id,
            last_log_id: last_log_id.or(last_purged_log_id),
        })
    }

    async fn save_committed(&mut self, committed: Option<LogId<NodeId>>) -> Result<(), StorageError<NodeId>> {
        self.put_meta::<meta::Committed>(&committed)
    }

    async fn read_committed(&mut self) -> Result<Option<LogId<NodeId>>, StorageError<NodeId>> {
        Ok(self.get_meta::<meta::Committed>()?.flatten())
    }

    #[tracing::instrument(level = "trace", skip(self))]
    async fn save_vote(&mut self, vote: &Vote<NodeId>) -> Result<(), StorageError<NodeId>> {
        self.put_meta::<meta::Vote>(vote)
    }

    async fn read_vote(&mut self) -> Result<Option<Vote<NodeId>>, StorageError<NodeId>> {
        self.get_meta::<meta::Vote>()
    }

    #[tracing::instrument(level = "trace", skip(self, entries, callback))]
    async fn append<I>(&mut self, entries: I, callback: LogFlushed<TypeConfig>) -> Result<(), StorageError<NodeId>>
    where I: IntoIterator<Item = Entry<TypeConfig>> + Send {
        let cf = self.cf_logs()?;

        for entry in entries {
            let value = serde_json::to_vec(&entry).map_err(|e| StorageIOError::write_logs(&e))?;
            self.db.put_cf(cf, id_to_bin(entry.log_id.index), value).map_err(|e| StorageIOError::write_logs(&e))?;
        }

        self.db.flush_wal(true).map_err(|e| StorageIOError::write_logs(&e))?;

        // If there is error, the callback will be dropped.
        callback.log_io_completed(Ok(()));
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn truncate(&mut self, log_id: LogId<NodeId>) -> Result<(), StorageError<NodeId>> {
        tracing::debug!("truncate: [{:?}, +oo)", log_id);

        let from = id_to_bin(log_id.index);
        let to = id_to_bin(u64::MAX);
        self.db.delete_range_cf(self.cf_logs()?, from, to).map_err(|e| StorageIOError::write_logs(&e))?;

        self.db.flush_wal(true).map_err(|e| StorageIOError::write_logs(&e))?;
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn purge(&mut self, log_id: LogId<NodeId>) -> Result<(), StorageError<NodeId>> {
        tracing::debug!("delete_log: [0, {:?}]", log_id);

        // Entries at and before the last purged log id are ignored once it is written, so the
        // deletion does not need to be in the same batch.
        self.put_meta::<meta::LastPurged>(&log_id)?;

        let from = id_to_bin(0);
        let to = id_to_bin(log_id.index + 1);
        self.db.delete_range_cf(self.cf_logs()?, from, to).map_err(|e| StorageIOError::write_logs(&e))?;

        Ok(())
    }

    async fn get_log_reader(&mut self) -> Self::LogReader {
        self.clone()
    }
}

/// Keys and values of the `meta` column family.
mod meta {
    use anyerror::AnyError;
    use openraft::ErrorSubject;
    use openraft::ErrorVerb;
    use openraft::LogId;
    use openraft::StorageError;
    use openraft::StorageIOError;

    use crate::NodeId;

    pub(crate) trait StoreMeta {
        /// The key used to store in rocksdb
        const KEY: &'static str;

        type Value: serde::Serialize + serde::de::DeserializeOwned;

        /// The subject this meta belongs to, embedded into the returned storage error.
        fn subject(v: Option<&Self::Value>) -> ErrorSubject<NodeId>;

        fn read_err(e: impl std::error::Error + 'static) -> StorageError<NodeId> {
            StorageIOError::new(Self::subject(None), ErrorVerb::Read, AnyError::new(&e)).into()
        }

        fn write_err(v: &Self::Value, e: impl std::error::Error + 'static) -> StorageError<NodeId> {
            StorageIOError::new(Self::subject(Some(v)), ErrorVerb::Write, AnyError::new(&e)).into()
        }
    }

    pub(crate) struct LastPurged {}
    pub(crate) struct Committed {}
    pub(crate) struct Vote {}

    impl StoreMeta for LastPurged {
        const KEY: &'static str = "last_purged_log_id";
        type Value = LogId<NodeId>;

        fn subject(_v: Option<&Self::Value>) -> ErrorSubject<NodeId> {
            ErrorSubject::Store
        }
    }

    impl StoreMeta for Committed {
        const KEY: &'static str = "committed";
        type Value = Option<LogId<NodeId>>;

        fn subject(_v: Option<&Self::Value>) -> ErrorSubject<NodeId> {
            ErrorSubject::Store
        }
    }

    impl StoreMeta for Vote {
        const KEY: &'static str = "vote";
        type Value = openraft::Vote<NodeId>;

        fn subject(_v: Option<&Self::Value>) -> ErrorSubject<NodeId> {
            ErrorSubject::Vote
        }
    }
}

/// Big-endian, so that the key order is the index order.
fn id_to_bin(id: u64) -> [u8; 8] {
    let mut buf = [0u8; 8];
    BigEndian::write_u64(&mut buf, id);
    buf
}

fn bin_to_id(buf: &[u8]) -> Option<u64> {
    if buf.len() != 8 {
        return None;
    }
    Some(BigEndian::read_u64(buf))
}
