use std::num::NonZeroUsize;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use chat::config::{
    display_location, HubConfig, SessionConfig, DEFAULT_OUTBOX_CAPACITY, MIN_OUTBOX_CAPACITY,
};
use chat::server::hub::Hub;
use chat::server::Server;

#[derive(Parser)]
#[command(name = "server", about = "Broadcast chat WebSocket server")]
struct Args {
    /// Address to listen on
    #[arg(long, env = "WS_BIND", default_value = "0.0.0.0:8000")]
    bind: String,

    /// Host shown to browsers on the landing page
    #[arg(long, env = "WS_HOST", default_value = "localhost")]
    host: String,

    /// Port shown to browsers on the landing page
    #[arg(long, env = "WS_PORT")]
    port: Option<String>,

    /// History lines kept for late joiners (0 = unbounded)
    #[arg(long, env = "WS_HISTORY_CAPACITY", default_value_t = 0)]
    history_capacity: usize,

    /// Frames queued per client before it is dropped as too slow
    #[arg(
        long,
        env = "WS_OUTBOX_CAPACITY",
        default_value_t = DEFAULT_OUTBOX_CAPACITY as u64,
        value_parser = clap::value_parser!(u64).range(MIN_OUTBOX_CAPACITY as u64..)
    )]
    outbox_capacity: u64,

    /// Milliseconds a single socket write may take
    #[arg(long, env = "WS_WRITE_TIMEOUT_MS", default_value_t = 10_000)]
    write_timeout_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let (hub, hub_task) = Hub::spawn(HubConfig {
        history_capacity: NonZeroUsize::new(args.history_capacity),
    });
    let location = display_location(&args.host, args.port.as_deref());
    let srv = Server::new(
        hub.clone(),
        &location,
        SessionConfig {
            outbox_capacity: usize::try_from(args.outbox_capacity)?,
            write_timeout: Duration::from_millis(args.write_timeout_ms),
        },
    );

    // Graceful shutdown on Ctrl-C
    let shutdown = async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("shutting down");
        hub.shutdown().await;
    };

    srv.listen_and_serve(&args.bind, shutdown).await?;
    hub_task.await?;
    Ok(())
}
