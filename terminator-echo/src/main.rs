use anyhow::Result;
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{info, warn};

use terminator_echo::{
    cli::{Cli, Command, LaunchArgs},
    client::ClientSession,
    config::{ClientConfig, ServerConfig},
    display, launcher,
    server::Server,
};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command.unwrap_or_else(|| Command::Launch(LaunchArgs::default())) {
        Command::Server(args) => {
            let server = Server::bind(&ServerConfig::from(args)).await?;
            let addr = server.local_addr()?;
            info!("server listening on {}", addr);
            if let Err(err) = server.run_until_ctrl_c().await {
                warn!("server exited with error: {err:?}");
                return Err(err);
            }
        }
        Command::Client(args) => {
            let (events_tx, events_rx) = mpsc::unbounded_channel();
            let session = ClientSession::new(ClientConfig::from(args)).with_events(events_tx);
            let renderer = tokio::spawn(display::render_events(events_rx));
            session.run_until_ctrl_c().await?;
            renderer.await??;
        }
        Command::Launch(args) => {
            let pids = launcher::launch_clients(args.count, args.server)?;
            info!(launched = pids.len(), "clients started");
        }
    }

    Ok(())
}
