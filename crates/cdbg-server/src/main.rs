use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

mod dispatch;
mod rpc;

use dispatch::ServerState;
use rpc::RpcRequest;

#[derive(Parser)]
#[command(name = "cdbg-server", version, about = "Multi-session cdb.exe debugger orchestration server")]
struct Cli {
    /// Path to a TOML configuration file. Falls back to built-in defaults
    /// when omitted.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init()
        .ok();

    let cli = Cli::parse();

    let config = match cli.config {
        Some(path) => cdbg_config::CdbgConfig::load(&path)?,
        None => cdbg_config::CdbgConfig::default(),
    };

    let registry = cdbg_registry::SessionRegistry::new(config.clone());
    registry.spawn_cleanup_loop();

    let cache = cdbg_cache::ResultCache::new(config.cache.clone());
    cache.spawn_sweep_loop();

    let (output_tx, mut output_rx) = mpsc::unbounded_channel::<String>();
    let state = ServerState::new(registry.clone(), cache, output_tx);

    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(line) = output_rx.recv().await {
            if stdout.write_all(line.as_bytes()).await.is_err() {
                break;
            }
            if stdout.write_all(b"\n").await.is_err() {
                break;
            }
            let _ = stdout.flush().await;
        }
    });

    run_request_loop(state).await;

    drop(writer);
    registry.close_all().await;
    Ok(())
}

/// Reads one JSON-encoded [`RpcRequest`] per stdin line until EOF,
/// dispatching each to `state` and writing its response (or a parse error)
/// back through the shared output channel so responses interleave
/// correctly with asynchronous notifications.
async fn run_request_loop(state: Arc<ServerState>) {
    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "error reading request line");
                break;
            }
        };

        if line.trim().is_empty() {
            continue;
        }

        let state = state.clone();
        tokio::spawn(async move {
            match serde_json::from_str::<RpcRequest>(&line) {
                Ok(request) => {
                    let response = state.handle(request).await;
                    state.emit_response(response);
                }
                Err(e) => tracing::warn!(error = %e, "malformed request line"),
            }
        });
    }
}
