use anyhow::Context;
use anyhow::Result;
use api_types::MAX_PLAYERS;
use br31_server::app_builder::ApplicationBuilder;
use br31_server::config::Cli;
use br31_server::config::Commands;
use br31_server::config::EndpointArgs;
use br31_server::config::ServeArgs;
use br31_server::coordinator::RunOutcome;
use br31_server::endpoints::Endpoints;
use clap::Parser;
use utils::logging;

/// Sets up global panic hooks.
fn setup_global_hooks() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        default_hook(panic_info);
        tracing::error!("Thread panicked: {}", panic_info);
    }));
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_global_hooks();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve(serve_args) => run_serve(*serve_args).await,
        Commands::Clean(endpoint_args) => run_clean(endpoint_args),
    }
}

async fn run_serve(serve_args: ServeArgs) -> Result<()> {
    let _guard = logging::init(serve_args.log_file.as_deref());

    tracing::info!("Starting br31 server {}", env!("CARGO_PKG_VERSION"));

    let mut coordinator = ApplicationBuilder::new(serve_args).build()?;
    let signals = shutdown_signal().context("failed to install signal handlers")?;

    match coordinator.run_until_terminal(signals).await {
        RunOutcome::Finished { loser, final_count } => {
            tracing::info!(loser, final_count, "Game finished");
        }
        RunOutcome::Aborted { count } => {
            tracing::info!(count, "Game aborted");
        }
    }

    coordinator.shutdown().await;
    Ok(())
}

/// Resolves on the first SIGTERM or SIGINT.
fn shutdown_signal() -> Result<impl std::future::Future<Output = ()>> {
    use tokio::signal::unix::signal;
    use tokio::signal::unix::SignalKind;

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    Ok(async move {
        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, initiating graceful shutdown");
            }
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT, initiating graceful shutdown");
            }
        }
    })
}

/// Takes ownership of every endpoint name and removes it again.
fn run_clean(args: EndpointArgs) -> Result<()> {
    let _guard = logging::init(None);

    let mut endpoints = Endpoints::new();
    endpoints
        .fifo(&args.request_fifo)
        .with_context(|| format!("failed to claim fifo {}", args.request_fifo.display()))?;
    endpoints
        .board(&args.board_id)
        .with_context(|| format!("failed to claim shared board {}", args.board_id))?;
    endpoints
        .semaphore(&args.server_semaphore())
        .context("failed to claim server semaphore")?;

    let mut players = args.semaphore_players.clone();
    players.extend(1..=MAX_PLAYERS);
    players.sort_unstable();
    players.dedup();
    for player_id in players {
        let name = args.player_semaphore(player_id);
        endpoints
            .semaphore(&name)
            .with_context(|| format!("failed to claim semaphore {name}"))?;
    }
    endpoints
        .queue(args.queue_key)
        .with_context(|| format!("failed to claim message queue {}", args.queue_key))?;

    tracing::info!(count = endpoints.len(), "Removing endpoints");
    endpoints.release();
    Ok(())
}
