use std::collections::BTreeMap;
use std::time::Duration;

use maplit::btreemap;
use maplit::btreeset;
use openraft::BasicNode;
use openraft::ServerState;
use raft_printfarm::client::ClientError;
use raft_printfarm::client::FleetClient;
use raft_printfarm::model::Filament;
use raft_printfarm::model::JobStatus;
use raft_printfarm::model::PrintJob;
use raft_printfarm::model::Printer;
use reqwest::StatusCode;

use crate::fixtures::init_test_env;
use crate::fixtures::spawn_node;
use crate::fixtures::wait_for_voters;

fn get_addr(node_id: u64) -> String {
    format!("127.0.0.1:2100{}", node_id)
}

fn printer(id: &str) -> Printer {
    Printer {
        id: id.to_string(),
        company: "Prusa".to_string(),
        model: "MK4".to_string(),
    }
}

fn api_status<T: std::fmt::Debug>(res: Result<T, ClientError>) -> Option<StatusCode> {
    match res {
        Ok(x) => panic!("expect an API error, got: {:?}", x),
        Err(e) => e.status(),
    }
}

/// Setup a cluster of 3 nodes.
/// Run the print job lifecycle through the leader and read the result on every node.
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_cluster() -> anyhow::Result<()> {
    init_test_env();

    // --- Start 3 nodes in 3 threads.

    spawn_node(1, &get_addr(1), &[]);
    spawn_node(2, &get_addr(2), &[]);
    spawn_node(3, &get_addr(3), &[]);

    // Wait for server to start up.
    tokio::time::sleep(Duration::from_millis(500)).await;

    let client = FleetClient::new(get_addr(1)).with_timeout(Duration::from_secs(5));

    // --- 1. Initialize node 1 as a cluster of only one node.

    println!("=== init single node cluster");
    client.init().await?;

    // --- 2. Add node 2 and 3 as learners, then turn them into voters.

    println!("=== add-learner 2, 3");
    client.add_learner((2, get_addr(2))).await?;
    client.add_learner((3, get_addr(3))).await?;

    let x = client.metrics().await?;
    let nodes_in_cluster =
        x.membership_config.nodes().map(|(nid, node)| (*nid, node.clone())).collect::<BTreeMap<_, _>>();
    assert_eq!(
        btreemap! {
            1 => BasicNode::new("127.0.0.1:21001"),
            2 => BasicNode::new("127.0.0.1:21002"),
            3 => BasicNode::new("127.0.0.1:21003"),
        },
        nodes_in_cluster
    );

    println!("=== change-membership to 1,2,3");
    client.change_membership(&btreeset! {1,2,3}).await?;

    let x = client.metrics().await?;
    assert_eq!(&vec![btreeset![1, 2, 3]], x.membership_config.membership().get_joint_config());

    let health = client.health().await?;
    assert_eq!(1, health.node_id);
    assert_eq!(ServerState::Leader, health.state);
    assert_eq!(Some(1), health.current_leader);
    assert_eq!("printfarm", health.cluster_name);
    assert_eq!(Some(get_addr(1)), health.leader.leader_addr);

    // --- 3. The print job lifecycle, through the leader.

    println!("=== create printer, filament, print job");
    client.create_printer(&printer("p1")).await?;

    let f = client
        .create_filament(&Filament {
            id: "f1".to_string(),
            material: "PLA".to_string(),
            color: "red".to_string(),
            total_weight_g: 1000,
            remaining_weight_g: 0,
        })
        .await?;
    assert_eq!(1000, f.remaining_weight_g);

    let j = client
        .create_print_job(&PrintJob {
            id: "j1".to_string(),
            printer_id: "p1".to_string(),
            filament_id: "f1".to_string(),
            file_path: "/prints/benchy.gcode".to_string(),
            print_weight_g: 200,
            status: JobStatus::Running,
        })
        .await?;
    assert_eq!(JobStatus::Queued, j.status);

    println!("=== j1: running, done");
    client.update_job_status("j1", JobStatus::Running).await?;
    let u = client.update_job_status("j1", JobStatus::Done).await?;
    assert_eq!(JobStatus::Done, u.new_status);

    let filaments = client.list_filaments().await?;
    assert_eq!(800, filaments[0].remaining_weight_g);

    println!("=== j1 is done, can not run again");
    let res = client.update_job_status("j1", JobStatus::Running).await;
    assert_eq!(Some(StatusCode::BAD_REQUEST), api_status(res));

    println!("=== rejected writes");
    let res = client.create_printer(&printer("p1")).await;
    assert_eq!(Some(StatusCode::CONFLICT), api_status(res));

    let res = client.update_job_status("no-such-job", JobStatus::Running).await;
    assert_eq!(Some(StatusCode::NOT_FOUND), api_status(res));

    let res = client
        .create_print_job(&PrintJob {
            id: "j2".to_string(),
            printer_id: "p1".to_string(),
            filament_id: "f1".to_string(),
            file_path: "/prints/vase.gcode".to_string(),
            print_weight_g: 900,
            status: JobStatus::Queued,
        })
        .await;
    assert_eq!(Some(StatusCode::BAD_REQUEST), api_status(res));

    let resp = reqwest::Client::new()
        .post(format!("http://{}/print_jobs/j1/status?status=paused", get_addr(1)))
        .send()
        .await?;
    assert_eq!(StatusCode::BAD_REQUEST, resp.status());

    // --- 4. Wait for replication, then read on every node.

    tokio::time::sleep(Duration::from_millis(1_000)).await;

    for id in [2, 3] {
        println!("=== read on node {}", id);
        let c = FleetClient::new(get_addr(id));

        assert_eq!(vec![printer("p1")], c.list_printers().await?);
        assert_eq!(800, c.list_filaments().await?[0].remaining_weight_g);

        let jobs = c.list_print_jobs().await?;
        assert_eq!(1, jobs.len());
        assert_eq!(JobStatus::Done, jobs[0].status);
    }

    // --- 5. A write to a follower is refused with the leader's address.

    println!("=== write to follower without redirect");
    let client2 = FleetClient::new(get_addr(2)).without_redirect();
    let res = client2.create_printer(&printer("p2")).await;
    match res {
        Err(ClientError::Api { status, body }) => {
            assert_eq!(StatusCode::SERVICE_UNAVAILABLE, status);
            let leader = body.leader.unwrap();
            assert_eq!(Some(1), leader.leader_id);
            assert_eq!(Some(get_addr(1)), leader.leader_addr);
        }
        other => panic!("expect 503 from follower, got: {:?}", other),
    }
    assert_eq!(1, client2.list_printers().await?.len());

    println!("=== write to follower with redirect");
    let client3 = FleetClient::new(get_addr(3));
    client3.create_printer(&printer("p2")).await?;
    assert_eq!(get_addr(1), client3.target());
    assert_eq!(2, client.list_printers().await?.len());

    // --- 6. Remove node 3 from the cluster.

    println!("=== leave: node 3");
    client.leave(Some(3)).await?;
    wait_for_voters(&client, &[1, 2], Duration::from_secs(5)).await?;

    client.create_printer(&printer("p3")).await?;
    assert_eq!(3, client.list_printers().await?.len());

    Ok(())
}
