use anyerror::AnyError;
use openraft::error::ClientWriteError;
use openraft::error::RaftError;
use openraft::ServerState;

use crate::command::RawCommand;
use crate::command::Response;
use crate::coordinator::Consensus;
use crate::coordinator::ConsensusError;
use crate::coordinator::LeaderHint;
use crate::NodeId;
use crate::Raft;

/// [`Consensus`] backed by an `openraft` replica.
#[derive(Clone)]
pub struct RaftConsensus {
    id: NodeId,
    raft: Raft,
}

impl RaftConsensus {
    pub fn new(id: NodeId, raft: Raft) -> Self {
        Self { id, raft }
    }
}

impl Consensus for RaftConsensus {
    fn is_leader(&self) -> bool {
        let metrics = self.raft.metrics();
        let m = metrics.borrow();
        m.state == ServerState::Leader && m.current_leader == Some(self.id)
    }

    fn leader_hint(&self) -> LeaderHint {
        let metrics = self.raft.metrics();
        let m = metrics.borrow();

        let leader_id = m.current_leader;
        let leader_addr = leader_id
            .and_then(|id| m.membership_config.membership().get_node(&id).map(|node| node.addr.clone()));

        LeaderHint { leader_id, leader_addr }
    }

    async fn submit(&self, command: RawCommand) -> Result<Response, ConsensusError> {
        match self.raft.client_write(command).await {
            Ok(resp) => {
                tracing::debug!(log_id = %resp.log_id, "write applied");
                Ok(resp.data)
            }
            Err(RaftError::APIError(ClientWriteError::ForwardToLeader(fwd))) => {
                Err(ConsensusError::NotLeader(LeaderHint {
                    leader_id: fwd.leader_id,
                    leader_addr: fwd.leader_node.map(|node| node.addr),
                }))
            }
            Err(e) => Err(ConsensusError::Replication(AnyError::new(&e))),
        }
    }
}
