use clap::Parser;
use raft_printfarm::config::NodeOptions;
use raft_printfarm::start_raft_node;
use tracing_subscriber::EnvFilter;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Setup the logger
    tracing_subscriber::fmt()
        .with_target(true)
        .with_thread_ids(true)
        .with_level(true)
        .with_ansi(false)
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Parse the parameters passed by arguments and the environment.
    let options = NodeOptions::parse();

    tracing::info!(id = options.id, addr = %options.http_addr, bootstrap = options.bootstrap, "start node");

    start_raft_node(options).await
}
