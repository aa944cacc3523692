use std::io::Cursor;
use std::io::Read;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use openraft::storage::RaftStateMachine;
use openraft::storage::Snapshot;
use openraft::BasicNode;
use openraft::Entry;
use openraft::EntryPayload;
use openraft::LogId;
use openraft::RaftSnapshotBuilder;
use openraft::SnapshotMeta;
use openraft::StorageError;
use openraft::StorageIOError;
use openraft::StoredMembership;
use rocksdb::DB;
use serde::Deserialize;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::command::Command;
use crate::command::Response;
use crate::model::Filament;
use crate::model::PrintJob;
use crate::model::Printer;
use crate::store::fleet::FleetState;
use crate::store::snapshot::FleetSnapshot;
use crate::store::snapshot::SnapshotError;
use crate::NodeId;
use crate::TypeConfig;

pub mod fleet;
pub mod log_store;
pub mod rocks;
pub mod rocks_log_store;
pub mod snapshot;

pub use log_store::LogStore;
pub use rocks::open_db;
pub use rocks_log_store::RocksLogStore;

#[derive(Debug)]
pub struct StoredSnapshot {
    pub meta: SnapshotMeta<NodeId, BasicNode>,

    /// The data of the state machine at the time of this snapshot.
    pub data: Vec<u8>,
}

/// Everything the state machine owns: the fleet plus the raft bookkeeping that has to be
/// snapshotted along with it.
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct StateMachineData {
    pub last_applied_log: Option<LogId<NodeId>>,

    pub last_membership: StoredMembership<NodeId, BasicNode>,

    pub fleet: FleetState,
}

/// The replicated state machine of a print farm replica.
///
/// The fleet state is only mutated by applying committed log entries or by restoring a
/// snapshot; the rest of the node gets read access through the accessor methods.
#[derive(Debug, Default)]
pub struct StateMachineStore {
    state_machine: RwLock<StateMachineData>,

    snapshot_idx: AtomicU64,

    /// The last built or received snapshot.
    current_snapshot: RwLock<Option<StoredSnapshot>>,

    /// Where snapshots are persisted. `None` keeps them in memory only.
    db: Option<Arc<DB>>,
}

/// Decodes and applies one entry payload; a malformed payload is skipped so that the log keeps
/// advancing on every replica.
fn apply_raw(fleet: &mut FleetState, raw: &[u8]) -> Response {
    let cmd = match Command::decode(raw) {
        Ok(cmd) => cmd,
        Err(e) => {
            tracing::warn!(error = %e, "skip malformed log entry");
            return Response::Malformed { reason: e.to_string() };
        }
    };

    tracing::debug!(%cmd, "apply command");

    let res = fleet.apply(cmd);
    if let Response::Rejected(ref rejection) = res {
        tracing::warn!(%rejection, "committed command rejected by state machine");
    }
    res
}

impl StateMachineStore {
    /// Opens a state machine whose snapshots are persisted in `db`.
    ///
    /// The state is rebuilt from the last persisted snapshot. Raft re-applies the committed
    /// entries after it when the node starts.
    pub fn open(db: Arc<DB>) -> Result<Self, StorageError<NodeId>> {
        let Some(stored) = rocks::load_snapshot(&db)? else {
            tracing::info!("no snapshot on disk, starting from an empty state");
            return Ok(Self {
                db: Some(db),
                ..Default::default()
            });
        };

        let data: StateMachineData = serde_json::from_slice(&stored.data)
            .map_err(|e| StorageIOError::read_snapshot(Some(stored.meta.signature()), &e))?;

        tracing::info!(
            snapshot_id = %stored.meta.snapshot_id,
            last_applied = ?data.last_applied_log,
            "restored state machine from snapshot on disk"
        );

        Ok(Self {
            state_machine: RwLock::new(data),
            snapshot_idx: AtomicU64::new(0),
            current_snapshot: RwLock::new(Some(stored)),
            db: Some(db),
        })
    }

    /// Makes `snapshot` the current one, writing it to disk first if this store has a database.
    async fn set_current_snapshot(&self, snapshot: StoredSnapshot) -> Result<(), StorageError<NodeId>> {
        if let Some(db) = &self.db {
            rocks::save_snapshot(db, &snapshot)?;
        }

        let mut current_snapshot = self.current_snapshot.write().await;
        *current_snapshot = Some(snapshot);
        Ok(())
    }

    /// Applies one encoded command outside of the raft log bookkeeping.
    pub async fn apply_command(&self, raw: &[u8]) -> Response {
        let mut sm = self.state_machine.write().await;
        apply_raw(&mut sm.fleet, raw)
    }

    /// Copies the current state. The lock is released before the copy is returned.
    pub async fn snapshot(&self) -> FleetSnapshot {
        let sm = self.state_machine.read().await;
        FleetSnapshot::new(sm.clone())
    }

    /// Replaces the whole state with one persisted by [`FleetSnapshot::persist`].
    ///
    /// The input is fully decoded before the live state is touched; on error the state is left
    /// as it was.
    pub async fn restore<R: Read>(&self, reader: R) -> Result<(), SnapshotError> {
        let restored: StateMachineData = serde_json::from_reader(reader)?;

        let mut sm = self.state_machine.write().await;
        *sm = restored;
        Ok(())
    }

    /// Runs `f` against the current fleet state under the read lock.
    pub async fn read<T>(&self, f: impl FnOnce(&FleetState) -> T) -> T {
        let sm = self.state_machine.read().await;
        f(&sm.fleet)
    }

    pub async fn printers(&self) -> Vec<Printer> {
        self.read(|fleet| fleet.printers.values().cloned().collect()).await
    }

    pub async fn filaments(&self) -> Vec<Filament> {
        self.read(|fleet| fleet.filaments.values().cloned().collect()).await
    }

    pub async fn print_jobs(&self) -> Vec<PrintJob> {
        self.read(|fleet| fleet.print_jobs.values().cloned().collect()).await
    }

    pub async fn last_applied_log(&self) -> Option<LogId<NodeId>> {
        self.state_machine.read().await.last_applied_log
    }
}

impl RaftSnapshotBuilder<TypeConfig> for Arc<StateMachineStore> {
    #[tracing::instrument(level = "trace", skip(self))]
    async fn build_snapshot(&mut self) -> Result<Snapshot<TypeConfig>, StorageError<NodeId>> {
        let snapshot = self.snapshot().await;

        let mut data = Vec::new();
        snapshot.persist(&mut data).map_err(|e| StorageIOError::write_snapshot(None, &e))?;

        let last_applied_log = snapshot.last_applied_log();
        let last_membership = snapshot.last_membership().clone();
        snapshot.release();

        let snapshot_idx = self.snapshot_idx.fetch_add(1, Ordering::Relaxed) + 1;

        let snapshot_id = if let Some(last) = last_applied_log {
            format!("{}-{}-{}", last.leader_id, last.index, snapshot_idx)
        } else {
            format!("--{}", snapshot_idx)
        };

        let meta = SnapshotMeta {
            last_log_id: last_applied_log,
            last_membership,
            snapshot_id,
        };

        tracing::info!(snapshot_id = %meta.snapshot_id, size = data.len(), "built snapshot");

        self.set_current_snapshot(StoredSnapshot {
            meta: meta.clone(),
            data: data.clone(),
        })
        .await?;

        Ok(Snapshot {
            meta,
            snapshot: Box::new(Cursor::new(data)),
        })
    }
}

impl RaftStateMachine<TypeConfig> for Arc<StateMachineStore> {
    type SnapshotBuilder = Self;

    async fn applied_state(
        &mut self,
    ) -> Result<(Option<LogId<NodeId>>, StoredMembership<NodeId, BasicNode>), StorageError<NodeId>> {
        let state_machine = self.state_machine.read().await;
        Ok((state_machine.last_applied_log, state_machine.last_membership.clone()))
    }

    #[tracing::instrument(level = "trace", skip(self, entries))]
    async fn apply<I>(&mut self, entries: I) -> Result<Vec<Response>, StorageError<NodeId>>
    where I: IntoIterator<Item = Entry<TypeConfig>> + Send {
        let mut res = Vec::new();

        let mut sm = self.state_machine.write().await;

        for entry in entries {
            tracing::debug!(%entry.log_id, "replicate to sm");

            sm.last_applied_log = Some(entry.log_id);

            match entry.payload {
                EntryPayload::Blank => res.push(Response::Noop),
                EntryPayload::Normal(ref raw) => res.push(apply_raw(&mut sm.fleet, &raw.0)),
                EntryPayload::Membership(ref mem) => {
                    sm.last_membership = StoredMembership::new(Some(entry.log_id), mem.clone());
                    res.push(Response::Noop)
                }
            };
        }
        Ok(res)
    }

    #[tracing::instrument(level = "trace", skip(self))]
    async fn begin_receiving_snapshot(&mut self) -> Result<Box<Cursor<Vec<u8>>>, StorageError<NodeId>> {
        Ok(Box::new(Cursor::new(Vec::new())))
    }

    #[tracing::instrument(level = "trace", skip(self, snapshot))]
    async fn install_snapshot(
        &mut self,
        meta: &SnapshotMeta<NodeId, BasicNode>,
        snapshot: Box<Cursor<Vec<u8>>>,
    ) -> Result<(), StorageError<NodeId>> {
        tracing::info!(
            { snapshot_size = snapshot.get_ref().len() },
            "decoding snapshot for installation"
        );

        let new_snapshot = StoredSnapshot {
            meta: meta.clone(),
            data: snapshot.into_inner(),
        };

        self.restore(new_snapshot.data.as_slice())
            .await
            .map_err(|e| StorageIOError::read_snapshot(Some(new_snapshot.meta.signature()), &e))?;

        self.set_current_snapshot(new_snapshot).await
    }

    #[tracing::instrument(level = "trace", skip(self))]
    async fn get_current_snapshot(&mut self) -> Result<Option<Snapshot<TypeConfig>>, StorageError<NodeId>> {
        match &*self.current_snapshot.read().await {
            Some(snapshot) => {
                let data = snapshot.data.clone();
                Ok(Some(Snapshot {
                    meta: snapshot.meta.clone(),
                    snapshot: Box::new(Cursor::new(data)),
                }))
            }
            None => Ok(None),
        }
    }

    async fn get_snapshot_builder(&mut self) -> Self::SnapshotBuilder {
        self.clone()
    }
}
