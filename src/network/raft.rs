//! Endpoints serving raft RPC sent by the other replicas through [`super::Network`].

use actix_web::post;
use actix_web::web::Data;
use actix_web::web::Json;
use actix_web::Responder;
use openraft::raft::AppendEntriesRequest;
use openraft::raft::InstallSnapshotRequest;
use openraft::raft::VoteRequest;

use crate::app::App;
use crate::NodeId;
use crate::TypeConfig;

#[post("/raft-vote")]
pub async fn vote(app: Data<App>, Json(req): Json<VoteRequest<NodeId>>) -> impl Responder {
    tracing::debug!(to = app.id, vote = %req.vote, "recv vote request");
    Json(app.raft.vote(req).await)
}

#[post("/raft-append")]
pub async fn append(app: Data<App>, Json(req): Json<AppendEntriesRequest<TypeConfig>>) -> impl Responder {
    Json(app.raft.append_entries(req).await)
}

#[post("/raft-snapshot")]
pub async fn snapshot(app: Data<App>, Json(req): Json<InstallSnapshotRequest<TypeConfig>>) -> impl Responder {
    tracing::debug!(
        to = app.id,
        snapshot_id = %req.meta.snapshot_id,
        offset = req.offset,
        done = req.done,
        "recv snapshot chunk"
    );
    Json(app.raft.install_snapshot(req).await)
}
