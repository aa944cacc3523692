//! On-disk layout of a replica under `--data-dir`.
//!
//! One RocksDB instance holds three column families:
//! - `meta`: vote, committed log id and last purged log id,
//! - `logs`: raft log entries keyed by big-endian index,
//! - `sm_meta`: the last snapshot of the state machine, meta and data written in one batch.
//!
//! The state machine itself stays in memory. On startup it is rebuilt from the snapshot in
//! `sm_meta` and raft re-applies the committed entries after it.

use std::io;
use std::path::Path;
use std::sync::Arc;

use anyerror::AnyError;
use openraft::BasicNode;
use openraft::ErrorSubject;
use openraft::ErrorVerb;
use openraft::SnapshotMeta;
use openraft::StorageError;
use openraft::StorageIOError;
use rocksdb::ColumnFamily;
use rocksdb::ColumnFamilyDescriptor;
use rocksdb::Options;
use rocksdb::WriteBatch;
use rocksdb::DB;

use crate::store::StoredSnapshot;
use crate::NodeId;

pub(crate) const CF_META: &str = "meta";
pub(crate) const CF_LOGS: &str = "logs";
pub(crate) const CF_SM_META: &str = "sm_meta";

const KEY_SNAPSHOT_META: &str = "snapshot_meta";
const KEY_SNAPSHOT_DATA: &str = "snapshot_data";

/// Opens, or creates, the database of a replica.
pub fn open_db<P: AsRef<Path>>(db_path: P) -> Result<Arc<DB>, io::Error> {
    let mut db_opts = Options::default();
    db_opts.create_missing_column_families(true);
    db_opts.create_if_missing(true);

    let meta = ColumnFamilyDescriptor::new(CF_META, Options::default());
    let logs = ColumnFamilyDescriptor::new(CF_LOGS, Options::default());
    let sm_meta = ColumnFamilyDescriptor::new(CF_SM_META, Options::default());

    let db = DB::open_cf_descriptors(&db_opts, db_path, vec![meta, logs, sm_meta])
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;

    Ok(Arc::new(db))
}

pub(crate) fn cf_handle<'a>(
    db: &'a DB,
    name: &str,
    subject: ErrorSubject<NodeId>,
) -> Result<&'a ColumnFamily, StorageError<NodeId>> {
    db.cf_handle(name).ok_or_else(|| {
        let e = AnyError::error(format!("column family `{}` not found", name));
        StorageIOError::new(subject, ErrorVerb::Read, e).into()
    })
}

/// Writes `snapshot` as the current snapshot and syncs the WAL.
pub(crate) fn save_snapshot(db: &DB, snapshot: &StoredSnapshot) -> Result<(), StorageError<NodeId>> {
    let signature = snapshot.meta.signature();

    let cf = cf_handle(db, CF_SM_META, ErrorSubject::Snapshot(Some(signature.clone())))?;
    let meta =
        serde_json::to_vec(&snapshot.meta).map_err(|e| StorageIOError::write_snapshot(Some(signature.clone()), &e))?;

    let mut batch = WriteBatch::default();
    batch.put_cf(cf, KEY_SNAPSHOT_META, meta);
    batch.put_cf(cf, KEY_SNAPSHOT_DATA, &snapshot.data);

    db.write(batch).map_err(|e| StorageIOError::write_snapshot(Some(signature.clone()), &e))?;
    db.flush_wal(true).map_err(|e| StorageIOError::write_snapshot(Some(signature), &e))?;
    Ok(())
}

/// Reads the snapshot written by [`save_snapshot`], if there is one.
pub(crate) fn load_snapshot(db: &DB) -> Result<Option<StoredSnapshot>, StorageError<NodeId>> {
    let cf = cf_handle(db, CF_SM_META, ErrorSubject::Snapshot(None))?;

    let meta = db.get_cf(cf, KEY_SNAPSHOT_META).map_err(|e| StorageIOError::read_snapshot(None, &e))?;
    let Some(meta) = meta else {
        return Ok(None);
    };

    let meta: SnapshotMeta<NodeId, BasicNode> =
        serde_json::from_slice(&meta).map_err(|e| StorageIOError::read_snapshot(None, &e))?;

    let data = db
        .get_cf(cf, KEY_SNAPSHOT_DATA)
        .map_err(|e| StorageIOError::read_snapshot(Some(meta.signature()), &e))?
        .unwrap_or_default();

    Ok(Some(StoredSnapshot { meta, data }))
}
