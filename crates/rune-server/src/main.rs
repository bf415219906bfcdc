//! Rune server entry point.
//!
//! Bootstraps the storage backend, consensus node, and seal manager, then
//! starts the Axum HTTP server with graceful shutdown. Startup follows the
//! vault lifecycle: open store → generate and print key shares (one-shot) →
//! optionally self-unseal → serve. Any failure before the listener binds
//! aborts the process.

use std::fs;
use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tracing::info;

use rune_core::Seal;
use rune_raft::{RaftConfig, RaftNode};
use rune_storage::{MemoryBackend, RedbStore, VaultStore};

use rune_server::config::{ReplicationMode, ServerConfig, StorageBackendType};
use rune_server::routes;
use rune_server::service::VaultService;
use rune_server::state::AppState;

use tower_http::trace::TraceLayer;

/// Filename of the secret store under the data directory.
const STORE_FILE: &str = "rune.db";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .init();

    info!(storage = ?config.storage_backend, replication = ?config.replication, "rune starting");

    // Bootstrap storage.
    let (store, redb_handle): (Arc<dyn VaultStore>, Option<RedbStore>) =
        match config.storage_backend {
            StorageBackendType::Memory => {
                info!("using in-memory storage (data will not persist)");
                (Arc::new(MemoryBackend::new()), None)
            }
            StorageBackendType::Redb => {
                fs::create_dir_all(&config.data_dir).with_context(|| {
                    format!("failed to create data directory {}", config.data_dir.display())
                })?;
                let path = config.data_dir.join(STORE_FILE);
                info!(path = %path.display(), "using redb storage");
                let store = RedbStore::open(&path).context("failed to open secret store")?;
                (Arc::new(store.clone()), Some(store))
            }
        };

    // Bootstrap the consensus node when replication is enabled.
    let raft = match config.replication {
        ReplicationMode::Raft => {
            let raft_config =
                RaftConfig::new(config.node_id.clone(), config.data_dir.join("raft"));
            let node = RaftNode::open(raft_config, Arc::clone(&store))
                .await
                .context("failed to open consensus node")?;
            Some(Arc::new(node))
        }
        ReplicationMode::None => None,
    };

    // Seal lifecycle: generate shares once, print them, optionally unseal.
    let seal = Arc::new(
        Seal::new(config.key_shares, config.key_threshold).context("invalid seal config")?,
    );
    let shares = seal
        .generate_keys()
        .await
        .context("failed to generate seal keys")?;
    print_unseal_shares(&shares);

    if config.auto_unseal {
        for share in shares.iter().take(usize::from(seal.threshold())) {
            seal.unseal(share).await.context("failed to unseal vault")?;
        }
        anyhow::ensure!(seal.is_unsealed().await, "vault failed to unseal");
        info!("vault is unsealed");
    } else {
        info!("vault is sealed; submit shares via POST /v1/sys/unseal");
    }

    let vault = Arc::new(VaultService::new(
        Arc::clone(&seal),
        store,
        raft.clone(),
    ));
    let state = Arc::new(AppState { seal, vault });
    let app = build_router(state);

    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.bind_addr))?;
    info!(addr = %config.bind_addr, "rune server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    // Drain the consensus worker, then release the store's file lock.
    if let Some(node) = raft {
        node.shutdown().await;
    }
    if let Some(store) = redb_handle {
        store.close();
    }

    info!("rune server stopped");
    Ok(())
}

/// Build the Axum router with all routes and middleware.
fn build_router(state: Arc<AppState>) -> Router {
    // Concurrency-limit the sys routes (unseal) to prevent share-stuffing
    // floods from starving the data plane.
    let sys_routes = Router::new()
        .nest("/v1/sys", routes::sys::router())
        .layer(tower::limit::ConcurrencyLimitLayer::new(10));

    Router::new()
        .merge(sys_routes)
        .nest("/v1/secret", routes::secrets::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Print the generated key shares to the operator console.
///
/// This is the only time the shares exist outside process memory; they are
/// never logged or persisted.
#[allow(clippy::print_stdout)]
fn print_unseal_shares(shares: &[String]) {
    println!("Unseal key shares — store each in a separate secure location.");
    println!("They will NOT be shown again.");
    for (i, share) in shares.iter().enumerate() {
        println!("  share {}: {}", i + 1, share);
    }
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let terminate = async {
        if let Ok(mut sig) =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            sig.recv().await;
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("shutdown signal received, stopping server");
}
