use std::io;
use std::io::Write;

use openraft::BasicNode;
use openraft::LogId;
use openraft::StoredMembership;

use crate::store::StateMachineData;
use crate::NodeId;

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("snapshot io error: {0}")]
    Io(#[from] io::Error),

    #[error("snapshot codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// A point-in-time copy of the state machine, detached from the live store.
///
/// Taking it only holds the store lock for the copy. Serializing it with [`persist`] does not
/// block `apply`.
///
/// [`persist`]: FleetSnapshot::persist
#[derive(Debug, Clone)]
pub struct FleetSnapshot {
    data: StateMachineData,
}

impl FleetSnapshot {
    pub(crate) fn new(data: StateMachineData) -> Self {
        Self { data }
    }

    pub fn last_applied_log(&self) -> Option<LogId<NodeId>> {
        self.data.last_applied_log
    }

    pub fn last_membership(&self) -> &StoredMembership<NodeId, BasicNode> {
        &self.data.last_membership
    }

    pub fn data(&self) -> &StateMachineData {
        &self.data
    }

    /// Serializes the copied state into `sink`.
    ///
    /// A write or flush failure is returned as is: the caller must not record this snapshot as
    /// built.
    pub fn persist<W: Write>(&self, mut sink: W) -> Result<(), SnapshotError> {
        serde_json::to_writer(&mut sink, &self.data)?;
        sink.flush()?;
        Ok(())
    }

    /// Discards the copy.
    pub fn release(self) {}
}
