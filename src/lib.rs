#![allow(clippy::uninlined_format_args)]

use std::io;
use std::io::Cursor;
use std::sync::Arc;

use actix_web::middleware;
use actix_web::middleware::Logger;
use actix_web::web;
use actix_web::web::Data;
use actix_web::HttpServer;
use openraft::BasicNode;

use crate::app::App;
use crate::command::RawCommand;
use crate::command::Response;
use crate::config::NodeOptions;
use crate::consensus::RaftConsensus;
use crate::coordinator::WriteCoordinator;
use crate::network::api;
use crate::network::management;
use crate::network::raft;
use crate::network::Network;
use crate::store::LogStore;
use crate::store::RocksLogStore;
use crate::store::StateMachineStore;

pub mod app;
pub mod bootstrap;
pub mod client;
pub mod command;
pub mod config;
pub mod consensus;
pub mod coordinator;
pub mod model;
pub mod network;
pub mod store;

pub type NodeId = u64;

openraft::declare_raft_types!(
    /// Declare the type configuration for the print farm state machine.
    pub TypeConfig:
        D = RawCommand,
        R = Response,
        NodeId = NodeId,
        Node = BasicNode,
        Entry = openraft::Entry<TypeConfig>,
        SnapshotData = Cursor<Vec<u8>>,
        AsyncRuntime = openraft::TokioRuntime
);

pub type Raft = openraft::Raft<TypeConfig>;

pub mod typ {
    use openraft::BasicNode;

    use crate::NodeId;
    use crate::TypeConfig;

    pub type RaftError<E = openraft::error::Infallible> = openraft::error::RaftError<NodeId, E>;
    pub type RPCError<E = openraft::error::Infallible> = openraft::error::RPCError<NodeId, BasicNode, RaftError<E>>;

    pub type ClientWriteError = openraft::error::ClientWriteError<NodeId, BasicNode>;
    pub type InitializeError = openraft::error::InitializeError<NodeId, BasicNode>;

    pub type ClientWriteResponse = openraft::raft::ClientWriteResponse<TypeConfig>;
    pub type RaftMetrics = openraft::RaftMetrics<NodeId, BasicNode>;
}

/// Starts a replica and serves its HTTP API until the server stops.
pub async fn start_raft_node(options: NodeOptions) -> io::Result<()> {
    let node_id = options.id;
    let http_addr = options.http_addr.clone();

    let config = options.raft_config().map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    let config = Arc::new(config);

    let network = Network::default();

    // With a data dir the log, the vote and the snapshots survive a restart; otherwise the
    // replica is rebuilt from its peers.
    let (raft, state_machine_store) = match &options.data_dir {
        Some(data_dir) => {
            tracing::info!(data_dir = %data_dir.display(), "open on-disk store");

            let db = store::open_db(data_dir)?;
            let log_store = RocksLogStore::new(db.clone());
            let state_machine_store = Arc::new(
                StateMachineStore::open(db).map_err(|e| io::Error::new(io::ErrorKind::Other, e))?,
            );

            let raft = Raft::new(node_id, config.clone(), network, log_store, state_machine_store.clone()).await;
            (raft, state_machine_store)
        }
        None => {
            tracing::warn!("no --data-dir given, raft state is kept in memory only");

            let log_store = Arc::new(LogStore::default());
            let state_machine_store = Arc::new(StateMachineStore::default());

            let raft = Raft::new(node_id, config.clone(), network, log_store, state_machine_store.clone()).await;
            (raft, state_machine_store)
        }
    };
    let raft = raft.map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;

    let coordinator = WriteCoordinator::new(
        RaftConsensus::new(node_id, raft.clone()),
        state_machine_store.clone(),
        options.write_timeout(),
    );

    if options.bootstrap {
        let raft = raft.clone();
        let addr = http_addr.clone();
        let peers = options.peers.clone();
        let wait = options.bootstrap_timeout();

        tokio::spawn(async move {
            if let Err(e) = bootstrap::bootstrap_cluster(&raft, node_id, addr, peers, wait).await {
                tracing::error!(error = %e, "cluster bootstrap failed");
            }
        });
    }

    let app_data = Data::new(App {
        id: node_id,
        addr: http_addr.clone(),
        raft,
        state_machine_store,
        coordinator,
        config,
    });

    let server = HttpServer::new(move || {
        actix_web::App::new()
            .wrap(Logger::default())
            .wrap(Logger::new("%a %{User-Agent}i"))
            .wrap(middleware::Compress::default())
            .app_data(app_data.clone())
            // raft internal RPC
            .service(raft::append)
            .service(raft::snapshot)
            .service(raft::vote)
            // admin API
            .service(management::init)
            .service(management::add_learner)
            .service(management::change_membership)
            .service(management::metrics)
            .service(management::leave)
            // application API
            .service(api::health)
            .service(web::scope("/api/v1").configure(api::configure))
            .configure(api::configure)
    });

    let x = server.bind(http_addr)?;

    x.run().await
}
