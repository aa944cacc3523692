use std::time::Duration;

use raft_printfarm::client::FleetClient;
use raft_printfarm::model::Printer;

use crate::fixtures::init_test_env;
use crate::fixtures::spawn_node;
use crate::fixtures::wait_for_voters;

fn get_addr(node_id: u64) -> String {
    format!("127.0.0.1:2200{}", node_id)
}

/// A node started with `--bootstrap` forms the cluster with its peers without any management
/// calls. Every node keeps its raft state on disk.
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_bootstrap() -> anyhow::Result<()> {
    init_test_env();

    let dirs = [tempfile::TempDir::new()?, tempfile::TempDir::new()?, tempfile::TempDir::new()?];
    let data_dir = |id: u64| dirs[id as usize - 1].path().display().to_string();

    spawn_node(2, &get_addr(2), &["--data-dir", &data_dir(2)]);
    spawn_node(3, &get_addr(3), &["--data-dir", &data_dir(3)]);

    tokio::time::sleep(Duration::from_millis(500)).await;

    let peer2 = format!("2={}", get_addr(2));
    let peer3 = format!("3={}", get_addr(3));
    spawn_node(1, &get_addr(1), &[
        "--data-dir",
        &data_dir(1),
        "--bootstrap",
        "--peer",
        &peer2,
        "--peer",
        &peer3,
    ]);

    let client = FleetClient::new(get_addr(1));
    wait_for_voters(&client, &[1, 2, 3], Duration::from_secs(15)).await?;

    println!("=== write through node 3, redirected to the leader");
    let client3 = FleetClient::new(get_addr(3)).with_max_redirects(1);
    let p = Printer {
        id: "p1".to_string(),
        company: "Bambu Lab".to_string(),
        model: "X1C".to_string(),
    };
    client3.create_printer(&p).await?;

    tokio::time::sleep(Duration::from_millis(1_000)).await;

    let client2 = FleetClient::new(get_addr(2));
    assert_eq!(vec![p], client2.list_printers().await?);

    Ok(())
}
