use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use clap::Parser;
use openraft::Config;
use openraft::ConfigError;
use openraft::SnapshotPolicy;

use crate::NodeId;

/// Command line and environment options of a replica.
#[derive(Parser, Clone, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct NodeOptions {
    #[clap(long, env = "PRINTFARM_NODE_ID")]
    pub id: NodeId,

    /// Address the HTTP API and the raft RPC listen on, e.g. `127.0.0.1:21001`.
    #[clap(long, env = "PRINTFARM_HTTP_ADDR")]
    pub http_addr: String,

    /// Directory of the on-disk raft log, vote and snapshots.
    ///
    /// Without it the replica keeps everything in memory and starts empty after a restart.
    #[clap(long, env = "PRINTFARM_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// How long a write waits for its log entry to be applied, in milliseconds.
    #[clap(long, env = "PRINTFARM_WRITE_TIMEOUT_MS", default_value = "5000")]
    pub write_timeout_ms: u64,

    #[clap(long, env = "PRINTFARM_HEARTBEAT_INTERVAL", default_value = "500")]
    pub heartbeat_interval: u64,

    #[clap(long, env = "PRINTFARM_ELECTION_TIMEOUT_MIN", default_value = "1500")]
    pub election_timeout_min: u64,

    #[clap(long, env = "PRINTFARM_ELECTION_TIMEOUT_MAX", default_value = "3000")]
    pub election_timeout_max: u64,

    /// Build a snapshot after this many log entries since the last one.
    #[clap(long, env = "PRINTFARM_SNAPSHOT_LOGS_SINCE_LAST", default_value = "5000")]
    pub snapshot_logs_since_last: u64,

    /// Initialize a new cluster from this node and add every `--peer` to it.
    #[clap(long, env = "PRINTFARM_BOOTSTRAP")]
    pub bootstrap: bool,

    /// How long bootstrap waits for this node to become leader, in milliseconds.
    #[clap(long, env = "PRINTFARM_BOOTSTRAP_TIMEOUT_MS", default_value = "10000")]
    pub bootstrap_timeout_ms: u64,

    /// A peer to add on bootstrap, as `<id>=<addr>`. Repeatable.
    #[clap(long = "peer", value_parser = parse_peer)]
    pub peers: Vec<Peer>,
}

impl NodeOptions {
    /// Builds and validates the raft configuration.
    pub fn raft_config(&self) -> Result<Config, ConfigError> {
        let config = Config {
            cluster_name: "printfarm".to_string(),
            heartbeat_interval: self.heartbeat_interval,
            election_timeout_min: self.election_timeout_min,
            election_timeout_max: self.election_timeout_max,
            snapshot_policy: SnapshotPolicy::LogsSinceLast(self.snapshot_logs_since_last),
            ..Default::default()
        };

        config.validate()
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn bootstrap_timeout(&self) -> Duration {
        Duration::from_millis(self.bootstrap_timeout_ms)
    }
}

/// Another replica of the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub id: NodeId,
    pub addr: String,
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.id, self.addr)
    }
}

impl FromStr for Peer {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (id, addr) = s.split_once('=').ok_or_else(|| format!("expect <id>=<addr>, got: {:?}", s))?;

        let id = id.trim().parse::<NodeId>().map_err(|e| format!("invalid node id {:?}: {}", id, e))?;

        let addr = addr.trim();
        if addr.is_empty() {
            return Err(format!("empty address for node {}", id));
        }

        Ok(Peer {
            id,
            addr: addr.to_string(),
        })
    }
}

fn parse_peer(s: &str) -> Result<Peer, String> {
    s.parse()
}

#[cfg(test)]
mod config_test;
