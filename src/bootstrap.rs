//! One-shot cluster formation from a single seed node.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::time::Duration;

use anyerror::AnyError;
use openraft::error::InitializeError;
use openraft::error::RaftError;
use openraft::BasicNode;
use openraft::ServerState;

use crate::config::Peer;
use crate::NodeId;
use crate::Raft;

#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error("failed to initialize cluster: {0}")]
    Initialize(AnyError),

    #[error("node {id} did not become leader: {source}")]
    NotElected { id: NodeId, source: AnyError },

    #[error("failed to add learner {id}: {source}")]
    AddLearner { id: NodeId, source: AnyError },

    #[error("failed to change membership to {members:?}: {source}")]
    ChangeMembership {
        members: BTreeSet<NodeId>,
        source: AnyError,
    },
}

/// Forms a cluster of this node and `peers`.
///
/// The node initializes itself as the only voter, waits up to `wait` to be elected, adds every
/// peer as a learner and then promotes all of them to voters. An already initialized node skips
/// the first step.
pub async fn bootstrap_cluster(
    raft: &Raft,
    id: NodeId,
    addr: String,
    peers: Vec<Peer>,
    wait: Duration,
) -> Result<(), BootstrapError> {
    let mut nodes = BTreeMap::new();
    nodes.insert(id, BasicNode { addr });

    match raft.initialize(nodes).await {
        Ok(()) => {
            tracing::info!(id, "initialized single-node cluster");
        }
        Err(RaftError::APIError(InitializeError::NotAllowed(e))) => {
            tracing::info!(id, reason = %e, "cluster already initialized, skip initialize");
        }
        Err(e) => return Err(BootstrapError::Initialize(AnyError::new(&e))),
    }

    raft.wait(Some(wait))
        .state(ServerState::Leader, "bootstrap: become leader")
        .await
        .map_err(|e| BootstrapError::NotElected {
            id,
            source: AnyError::new(&e),
        })?;

    let mut members = BTreeSet::new();
    members.insert(id);

    for peer in peers {
        tracing::info!(%peer, "bootstrap: add learner");

        let node = BasicNode {
            addr: peer.addr.clone(),
        };
        raft.add_learner(peer.id, node, true).await.map_err(|e| BootstrapError::AddLearner {
            id: peer.id,
            source: AnyError::new(&e),
        })?;

        members.insert(peer.id);
    }

    if members.len() > 1 {
        tracing::info!(?members, "bootstrap: change membership");

        raft.change_membership(members.clone(), false).await.map_err(|e| BootstrapError::ChangeMembership {
            members,
            source: AnyError::new(&e),
        })?;
    }

    tracing::info!(id, "bootstrap done");
    Ok(())
}
