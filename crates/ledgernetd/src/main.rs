//! ledgernetd — Ledgernet peer-to-peer node daemon.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use ledgernet_core::config::LedgernetConfig;
use ledgernet_core::crypto::{Ed25519Crypto, NodeKeys, Signer};
use ledgernet_services::{
    BufferPool, Ledger, MemoryLedger, NetworkSettings, NodeContext, RequestDispatcher, Server,
    StaticDirectory,
};

mod api;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = LedgernetConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = LedgernetConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        LedgernetConfig::default()
    });
    tracing::info!(
        listen = %config.network.listen_addr,
        advertised = %config.network.tcp_address,
        position = config.network.node_position,
        "ledgernetd starting"
    );

    // Keypair
    let keys = match NodeKeys::load_or_generate(&config.identity.keypair_path) {
        Ok(keys) => keys,
        Err(e) => {
            tracing::error!(
                path = %config.identity.keypair_path.display(),
                error = %e,
                "no usable key material; votes and signed requests will fail"
            );
            NodeKeys::missing()
        }
    };
    if let Ok(public_key) = keys.public_key() {
        tracing::info!(public_key = hex::encode(public_key), "keypair ready");
    }

    // Shared state
    let ledger = Arc::new(MemoryLedger::new());
    let directory = Arc::new(StaticDirectory::from_config(&config.directory));
    tracing::info!(
        peers = config.directory.peers.len(),
        banned = config.directory.banned_positions.len(),
        "node directory loaded"
    );

    let ctx = Arc::new(NodeContext {
        settings: Arc::new(NetworkSettings::from_config(&config)),
        ledger: ledger.clone(),
        directory,
        crypto: Arc::new(Ed25519Crypto),
        signer: Arc::new(keys),
        pool: BufferPool::new(),
    });

    // Request dispatcher
    let dispatcher = Arc::new(RequestDispatcher::for_node(ctx.clone()));
    let server = Server::bind(
        &config.network.listen_addr,
        dispatcher,
        ctx.settings.session_timeout(),
    )
    .await
    .with_context(|| format!("failed to bind {}", config.network.listen_addr))?;

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // ── Spawn tasks ──────────────────────────────────────────────────────────

    let server_task = tokio::spawn(server.run(shutdown_tx.subscribe()));

    let height_printer = {
        let ctx = ctx.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(30));
            loop {
                interval.tick().await;
                let hosts = ctx.directory.hosts_except(&ctx.settings.tcp_address);
                if hosts.is_empty() {
                    continue;
                }
                let own = ctx.ledger.max_block_id().unwrap_or_default();
                match ctx
                    .client()
                    .host_with_max_block(&hosts, &CancellationToken::new())
                    .await
                {
                    Ok(best) => tracing::info!(
                        own,
                        best = best.block_id,
                        host = %best.host,
                        "chain height snapshot"
                    ),
                    Err(e) => tracing::warn!(own, error = %e, "chain height snapshot failed"),
                }
            }
        })
    };

    if !config.network.api_addr.is_empty() {
        let state = api::ApiState {
            ctx: ctx.clone(),
            ledger,
            shutdown: shutdown_tx.clone(),
        };
        let addr = config.network.api_addr.clone();
        tokio::spawn(async move {
            if let Err(e) = api::serve(state, &addr).await {
                tracing::error!(error = %e, "API server failed");
            }
        });
    }

    // ── Wait for exit ────────────────────────────────────────────────────────

    let mut shutdown_rx = shutdown_tx.subscribe();

    tokio::select! {
        _ = shutdown_rx.recv()  => tracing::info!("shutting down"),
        r = server_task         => tracing::error!("request dispatcher exited: {:?}", r),
        r = height_printer      => tracing::error!("height printer exited: {:?}", r),
    }

    Ok(())
}
