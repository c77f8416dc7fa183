use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;

use fictiondl::client::GraphqlClient;
use fictiondl::config::Settings;
use fictiondl::pipeline::Assembler;
use fictiondl::queue::JobQueue;
use fictiondl::server::{self, AppState};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct AppArgs {
    #[arg(long, env = "FICTIONDL_ADDR", default_value = "127.0.0.1:3000")]
    addr: SocketAddr,

    /// Background refresh jobs allowed to run at once.
    #[arg(long, default_value_t = 1)]
    max_concurrency: usize,

    #[command(flatten)]
    settings: Settings,
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return std::process::ExitCode::FAILURE;
    }
    std::process::ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    fictiondl::logging::init_with_default("info,tower_http=debug")?;

    let args = AppArgs::parse();
    args.settings.validate()?;
    tracing::info!(
        addr = %args.addr,
        api_url = %args.settings.api_url,
        download_dir = %args.settings.download_dir.display(),
        "starting fictiondl-app"
    );

    let settings = Arc::new(args.settings);
    let client = Arc::new(GraphqlClient::new(&settings).context("build client")?);
    let state = AppState::new(
        Assembler::new(client, settings),
        JobQueue::new(args.max_concurrency),
    );
    let app = server::router(state);

    let listener = tokio::net::TcpListener::bind(args.addr)
        .await
        .map_err(|err| anyhow::anyhow!("bind {}: {err}", args.addr))?;
    tracing::info!(addr = %args.addr, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
