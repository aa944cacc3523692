use std::backtrace::Backtrace;
use std::panic::PanicHookInfo;
use std::thread;
use std::time::Duration;

use clap::Parser;
use raft_printfarm::client::FleetClient;
use raft_printfarm::config::NodeOptions;
use raft_printfarm::start_raft_node;
use raft_printfarm::NodeId;
use tokio::runtime::Runtime;
use tracing_subscriber::EnvFilter;

pub fn log_panic(panic: &PanicHookInfo) {
    let backtrace = format!("{:?}", Backtrace::force_capture());

    eprintln!("{}", panic);

    if let Some(location) = panic.location() {
        tracing::error!(
            message = %panic,
            backtrace = %backtrace,
            panic.file = location.file(),
            panic.line = location.line(),
            panic.column = location.column(),
        );
        eprintln!("{}:{}:{}", location.file(), location.line(), location.column());
    } else {
        tracing::error!(message = %panic, backtrace = %backtrace);
    }

    eprintln!("{}", backtrace);
}

/// Installs the panic hook and the logger. Every test in this binary calls it, only the first
/// one installs the logger.
pub fn init_test_env() {
    std::panic::set_hook(Box::new(|panic| {
        log_panic(panic);
    }));

    let _ = tracing_subscriber::fmt()
        .with_target(true)
        .with_thread_ids(true)
        .with_level(true)
        .with_ansi(false)
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}

/// Starts a node with the given extra command line arguments in its own thread and runtime.
pub fn spawn_node(id: NodeId, addr: &str, extra: &[&str]) {
    let mut args = vec![
        "printfarm-node".to_string(),
        "--id".to_string(),
        id.to_string(),
        "--http-addr".to_string(),
        addr.to_string(),
    ];
    args.extend(extra.iter().map(|s| s.to_string()));

    let options = NodeOptions::parse_from(args);

    thread::spawn(move || {
        let rt = Runtime::new().unwrap();
        let x = rt.block_on(start_raft_node(options));
        println!("node {} exited: {:?}", id, x);
    });
}

/// Polls `client` until the cluster has exactly `voters` as voters.
pub async fn wait_for_voters(client: &FleetClient, voters: &[NodeId], timeout: Duration) -> anyhow::Result<()> {
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        if let Ok(m) = client.metrics().await {
            let got = m.membership_config.membership().voter_ids().collect::<Vec<_>>();
            if got == voters {
                return Ok(());
            }
        }

        if tokio::time::Instant::now() > deadline {
            anyhow::bail!("voters did not become {:?} within {:?}", voters, timeout);
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}
