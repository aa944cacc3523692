use std::sync::Arc;

use openraft::Config;

use crate::consensus::RaftConsensus;
use crate::coordinator::WriteCoordinator;
use crate::store::StateMachineStore;
use crate::NodeId;
use crate::Raft;

// Representation of a running replica. Shared by all HTTP handlers.
pub struct App {
    pub id: NodeId,
    pub addr: String,
    pub raft: Raft,
    pub state_machine_store: Arc<StateMachineStore>,
    pub coordinator: WriteCoordinator<RaftConsensus>,
    pub config: Arc<Config>,
}
