use std::panic;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::channel;
use tracing_subscriber::EnvFilter;

use crate::engine::docker::DockerEngine;
use crate::engine::traits::ContainerEngine;
use crate::messages::RequestEnvelope;
use crate::registry::CompilerRegistry;
use crate::router::EventRouter;
use crate::service::{CompilerService, TracingPublisher};
use crate::stubs::engine::{StubBehaviour, StubEngine};
use crate::workspace::WorkspaceManager;

mod constants;
mod domain;
mod engine;
mod messages;
mod registry;
mod router;
mod sandbox;
mod service;
mod stubs;
mod workspace;

const REQUEST_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Parser)]
#[command(about = "Runs untrusted code in ephemeral containers")]
struct Args {
    /// Root directory for per-execution workspaces.
    #[arg(long, default_value = "./temp")]
    workspace_root: PathBuf,

    /// Driver script copied into every workspace.
    #[arg(long, default_value = "./resources/script.sh")]
    driver_script: PathBuf,

    /// Replay container lifecycles in-process instead of talking to a
    /// real engine daemon.
    #[arg(long)]
    stub_engine: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    set_panic_hook();

    let args = Args::parse();

    let engine: Arc<dyn ContainerEngine> = if args.stub_engine {
        tracing::info!("using the stub container engine");
        Arc::new(StubEngine::new(StubBehaviour::default()))
    } else {
        Arc::new(DockerEngine::connect()?)
    };

    let router = Arc::new(EventRouter::new());
    router.clone().pump(engine.clone()).await?;

    let service = Arc::new(CompilerService::new(
        Arc::new(CompilerRegistry::with_default_profiles()),
        engine,
        router,
        WorkspaceManager::new(args.workspace_root, args.driver_script),
        Arc::new(TracingPublisher),
    ));

    let (requests_tx, requests_rx) = channel(REQUEST_CHANNEL_CAPACITY);
    let handler = service.handle_requests(requests_rx);

    tracing::info!("reading request envelopes from stdin");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<RequestEnvelope>(&line) {
            Ok(envelope) => {
                if requests_tx.send(envelope).await.is_err() {
                    break;
                }
            }
            Err(e) => tracing::error!("discarding malformed request: {e}"),
        }
    }

    drop(requests_tx);
    handler.await?;

    Ok(())
}

fn set_panic_hook() {
    panic::set_hook(Box::new(|panic_info| {
        tracing::error!(
            message = "panic occurred",
            panic = %panic_info
        );
    }));
}
