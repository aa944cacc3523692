use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use openraft::ConfigError;
use openraft::SnapshotPolicy;

use crate::config::NodeOptions;
use crate::config::Peer;

#[test]
fn test_defaults() -> anyhow::Result<()> {
    let opts = NodeOptions::try_parse_from(["printfarm-node", "--id", "1", "--http-addr", "127.0.0.1:21001"])?;

    assert_eq!(1, opts.id);
    assert_eq!(Duration::from_secs(5), opts.write_timeout());
    assert!(!opts.bootstrap);
    assert!(opts.peers.is_empty());
    assert_eq!(None, opts.data_dir);

    let config = opts.raft_config()?;
    assert_eq!(500, config.heartbeat_interval);
    assert_eq!(SnapshotPolicy::LogsSinceLast(5000), config.snapshot_policy);
    Ok(())
}

#[test]
fn test_bootstrap_peers() -> anyhow::Result<()> {
    let opts = NodeOptions::try_parse_from([
        "printfarm-node",
        "--id",
        "1",
        "--http-addr",
        "127.0.0.1:21001",
        "--bootstrap",
        "--peer",
        "2=127.0.0.1:21002",
        "--peer",
        "3 = 127.0.0.1:21003",
    ])?;

    assert!(opts.bootstrap);
    assert_eq!(
        vec![
            Peer {
                id: 2,
                addr: "127.0.0.1:21002".to_string()
            },
            Peer {
                id: 3,
                addr: "127.0.0.1:21003".to_string()
            },
        ],
        opts.peers
    );
    Ok(())
}

#[test]
fn test_invalid_peer() {
    let res = NodeOptions::try_parse_from(["printfarm-node", "--id", "1", "--http-addr", "a:1", "--peer", "two=b:2"]);
    assert!(res.is_err());

    let res = NodeOptions::try_parse_from(["printfarm-node", "--id", "1", "--http-addr", "a:1", "--peer", "2="]);
    assert!(res.is_err());
}

#[test]
fn test_invalid_election_timeout() -> anyhow::Result<()> {
    let opts = NodeOptions::try_parse_from([
        "printfarm-node",
        "--id",
        "1",
        "--http-addr",
        "a:1",
        "--election-timeout-min",
        "3000",
        "--election-timeout-max",
        "1000",
    ])?;

    let res = opts.raft_config();
    assert_eq!(Err(ConfigError::ElectionTimeout { min: 3000, max: 1000 }), res.map(|_| ()));
    Ok(())
}

#[test]
fn test_data_dir() -> anyhow::Result<()> {
    let opts = NodeOptions::try_parse_from([
        "printfarm-node",
        "--id",
        "2",
        "--http-addr",
        "127.0.0.1:21002",
        "--data-dir",
        "/var/lib/printfarm/node-2",
    ])?;

    assert_eq!(Some(PathBuf::from("/var/lib/printfarm/node-2")), opts.data_dir);
    Ok(())
}
