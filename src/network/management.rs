use std::collections::BTreeMap;
use std::collections::BTreeSet;

use actix_web::get;
use actix_web::post;
use actix_web::web::Data;
use actix_web::web::Json;
use actix_web::Responder;
use openraft::error::Infallible;
use openraft::BasicNode;

use crate::app::App;
use crate::typ::RaftMetrics;
use crate::NodeId;

// --- Cluster management

/// Add a node as **Learner**.
///
/// A Learner receives log replication from the leader but does not vote.
/// This should be done before adding a node as a member into the cluster
/// (by calling `change-membership`)
#[post("/add-learner")]
pub async fn add_learner(app: Data<App>, Json((node_id, addr)): Json<(NodeId, String)>) -> impl Responder {
    tracing::info!(node_id, %addr, "add learner");

    Json(app.raft.add_learner(node_id, BasicNode { addr }, true).await)
}

/// Changes specified learners to members, or remove members.
#[post("/change-membership")]
pub async fn change_membership(app: Data<App>, Json(members): Json<BTreeSet<NodeId>>) -> impl Responder {
    tracing::info!(?members, "change membership");

    Json(app.raft.change_membership(members, false).await)
}

/// Initialize a single-node cluster if the `req` is empty vec.
/// Otherwise initialize a cluster with the `req` specified vec of node-id and node-address
#[post("/init")]
pub async fn init(app: Data<App>, Json(req): Json<Vec<(NodeId, String)>>) -> impl Responder {
    let nodes = if req.is_empty() {
        BTreeMap::from([(app.id, BasicNode { addr: app.addr.clone() })])
    } else {
        req.into_iter().map(|(id, addr)| (id, BasicNode { addr })).collect::<BTreeMap<_, _>>()
    };

    tracing::info!(?nodes, "initialize cluster");

    Json(app.raft.initialize(nodes).await)
}

/// Get the latest metrics of the cluster
#[get("/metrics")]
pub async fn metrics(app: Data<App>) -> impl Responder {
    let metrics = app.raft.metrics().borrow().clone();

    let res: Result<RaftMetrics, Infallible> = Ok(metrics);
    Json(res)
}

/// Remove a voter from the cluster, this node if no id is given.
///
/// Must be sent to the leader. The removed node stops receiving logs once the new membership is
/// committed.
#[post("/leave")]
pub async fn leave(app: Data<App>, req: Option<Json<NodeId>>) -> impl Responder {
    let node_id = req.map(|x| x.0).unwrap_or(app.id);

    let membership = app.raft.metrics().borrow().membership_config.clone();
    let voters = membership.membership().voter_ids().filter(|id| *id != node_id).collect::<BTreeSet<_>>();

    tracing::info!(node_id, ?voters, "remove node from cluster");

    Json(app.raft.change_membership(voters, false).await)
}
