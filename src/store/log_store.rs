//! In-memory raft log, used when a replica runs without `--data-dir`.
//!
//! Entries and the vote are lost when the process exits; the durable counterpart is
//! [`RocksLogStore`](crate::store::RocksLogStore).

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::ops::RangeBounds;
use std::sync::Arc;

use openraft::storage::LogFlushed;
use openraft::storage::LogState;
use openraft::storage::RaftLogStorage;
use openraft::Entry;
use openraft::LogId;
use openraft::RaftLogReader;
use openraft::StorageError;
use openraft::Vote;
use tokio::sync::RwLock;

use crate::NodeId;
use crate::TypeConfig;

#[derive(Debug, Default)]
struct LogData {
    /// Entries by index. Indexes up to `last_purged` are gone.
    entries: BTreeMap<u64, Entry<TypeConfig>>,

    last_purged: Option<LogId<NodeId>>,

    committed: Option<LogId<NodeId>>,

    vote: Option<Vote<NodeId>>,
}

/// The raft log and the vote of one replica, shared by the raft core and its log readers.
#[derive(Debug, Default)]
pub struct LogStore {
    inner: RwLock<LogData>,
}

impl RaftLogReader<TypeConfig> for Arc<LogStore> {
    async fn try_get_log_entries<RB: RangeBounds<u64> + Clone + Debug + Send>(
        &mut self,
        range: RB,
    ) -> Result<Vec<Entry<TypeConfig>>, StorageError<NodeId>> {
        let data = self.inner.read().await;
        Ok(data.entries.range(range).map(|(_, ent)| ent.clone()).collect())
    }
}

impl RaftLogStorage<TypeConfig> for Arc<LogStore> {
    type LogReader = Self;

    async fn get_log_state(&mut self) -> Result<LogState<TypeConfig>, StorageError<NodeId>> {
        let data = self.inner.read().await;

        let last_log_id = data.entries.values().next_back().map(|ent| ent.log_id).or(data.last_purged);

        Ok(LogState {
            last_purged_log_id: data.last_purged,
            last_log_id,
        })
    }

    async fn save_committed(&mut self, committed: Option<LogId<NodeId>>) -> Result<(), StorageError<NodeId>> {
        self.inner.write().await.committed = committed;
        Ok(())
    }

    async fn read_committed(&mut self) -> Result<Option<LogId<NodeId>>, StorageError<NodeId>> {
        Ok(self.inner.read().await.committed)
    }

    #[tracing::instrument(level = "trace", skip(self))]
    async fn save_vote(&mut self, vote: &Vote<NodeId>) -> Result<(), StorageError<NodeId>> {
        self.inner.write().await.vote = Some(*vote);
        Ok(())
    }

    async fn read_vote(&mut self) -> Result<Option<Vote<NodeId>>, StorageError<NodeId>> {
        Ok(self.inner.read().await.vote)
    }

    #[tracing::instrument(level = "trace", skip(self, entries, callback))]
    async fn append<I>(&mut self, entries: I, callback: LogFlushed<TypeConfig>) -> Result<(), StorageError<NodeId>>
    where I: IntoIterator<Item = Entry<TypeConfig>> + Send {
        {
            let mut data = self.inner.write().await;
            data.entries.extend(entries.into_iter().map(|ent| (ent.log_id.index, ent)));
        }

        // Nothing to flush: the entries are visible to readers once the lock is released.
        callback.log_io_completed(Ok(()));
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn truncate(&mut self, log_id: LogId<NodeId>) -> Result<(), StorageError<NodeId>> {
        let mut data = self.inner.write().await;

        let removed = data.entries.split_off(&log_id.index);
        tracing::debug!(since = %log_id, removed = removed.len(), "truncate log");

        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn purge(&mut self, log_id: LogId<NodeId>) -> Result<(), StorageError<NodeId>> {
        let mut data = self.inner.write().await;

        debug_assert!(data.last_purged <= Some(log_id));
        data.last_purged = Some(log_id);

        let kept = data.entries.split_off(&(log_id.index + 1));
        let purged = std::mem::replace(&mut data.entries, kept);
        tracing::debug!(upto = %log_id, purged = purged.len(), "purge log");

        Ok(())
    }

    async fn get_log_reader(&mut self) -> Self::LogReader {
        self.clone()
    }
}
