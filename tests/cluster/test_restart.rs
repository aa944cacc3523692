use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use maplit::btreemap;
use openraft::error::InitializeError;
use openraft::error::RaftError;
use openraft::BasicNode;
use raft_printfarm::bootstrap::bootstrap_cluster;
use raft_printfarm::command::Command;
use raft_printfarm::command::Response;
use raft_printfarm::config::NodeOptions;
use raft_printfarm::model::Printer;
use raft_printfarm::network::Network;
use raft_printfarm::store::open_db;
use raft_printfarm::store::RocksLogStore;
use raft_printfarm::store::StateMachineStore;
use raft_printfarm::Raft;

use crate::fixtures::init_test_env;

const ADDR: &str = "127.0.0.1:23001";

fn printer(id: &str) -> Printer {
    Printer {
        id: id.to_string(),
        company: "Voron".to_string(),
        model: "2.4".to_string(),
    }
}

/// Opens node 1 on `dir` the way `start_raft_node` does with `--data-dir`, without the HTTP
/// server.
async fn open_node(dir: &Path) -> anyhow::Result<(Raft, Arc<StateMachineStore>)> {
    // The database lock is released once the raft tasks of a previous instance have exited.
    let mut tries = 0;
    let db = loop {
        match open_db(dir) {
            Ok(db) => break db,
            Err(_) if tries < 50 => {
                tries += 1;
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            Err(e) => return Err(e.into()),
        }
    };

    let options = NodeOptions::parse_from([
        "printfarm-node",
        "--id",
        "1",
        "--http-addr",
        ADDR,
        "--heartbeat-interval",
        "100",
        "--election-timeout-min",
        "300",
        "--election-timeout-max",
        "600",
    ]);
    let config = Arc::new(options.raft_config()?);

    let state_machine_store = Arc::new(StateMachineStore::open(db.clone())?);
    let raft = Raft::new(1, config, Network::default(), RocksLogStore::new(db), state_machine_store.clone()).await?;

    Ok((raft, state_machine_store))
}

async fn create_printer(raft: &Raft, id: &str) -> anyhow::Result<()> {
    let resp = raft.client_write(Command::CreatePrinter(printer(id)).encode()?).await?;
    assert!(matches!(resp.data, Response::Printer(_)), "got: {:?}", resp.data);
    Ok(())
}

/// A replica restarted on the same data dir comes back with its fleet, its log and its vote,
/// and a seed restarted with bootstrap joins its old cluster instead of founding a new one.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_restart_keeps_state() -> anyhow::Result<()> {
    init_test_env();

    let dir = tempfile::TempDir::new()?;
    let timeout = Duration::from_secs(10);

    println!("=== first run: bootstrap, write, snapshot, write");
    let (raft, sm) = open_node(dir.path()).await?;
    bootstrap_cluster(&raft, 1, ADDR.to_string(), vec![], timeout).await?;

    create_printer(&raft, "p1").await?;

    // p1 is restored from the snapshot, p2 is re-applied from the log.
    raft.trigger().snapshot().await?;
    raft.wait(Some(timeout)).metrics(|m| m.snapshot.is_some(), "snapshot built").await?;

    create_printer(&raft, "p2").await?;

    let applied_before = sm.last_applied_log().await.map(|log_id| log_id.index);
    let term_before = raft.metrics().borrow().current_term;
    assert_eq!(2, sm.printers().await.len());

    raft.shutdown().await?;
    drop(raft);
    drop(sm);

    println!("=== second run on the same data dir");
    let (raft, sm) = open_node(dir.path()).await?;

    raft.wait(Some(timeout))
        .metrics(
            |m| m.last_applied.map(|log_id| log_id.index) >= applied_before,
            "committed entries re-applied",
        )
        .await?;

    assert_eq!(vec![printer("p1"), printer("p2")], sm.printers().await);
    assert!(raft.metrics().borrow().current_term >= term_before);

    let res = raft.initialize(btreemap! {1 => BasicNode::new(ADDR)}).await;
    assert!(
        matches!(res, Err(RaftError::APIError(InitializeError::NotAllowed(_)))),
        "got: {:?}",
        res
    );

    bootstrap_cluster(&raft, 1, ADDR.to_string(), vec![], timeout).await?;
    create_printer(&raft, "p3").await?;

    let ids = sm.printers().await.into_iter().map(|p| p.id).collect::<Vec<_>>();
    assert_eq!(vec!["p1", "p2", "p3"], ids);

    raft.shutdown().await?;
    Ok(())
}
