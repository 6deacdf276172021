//! Local HTTP API — node state as JSON plus a few operator actions.

use std::sync::Arc;

use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{extract::State, Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use ledgernet_core::vote::VoteMessage;
use ledgernet_services::voting::{collect_votes, QuorumPolicy};
use ledgernet_services::{ClientError, Ledger, MemoryLedger, NodeContext};

#[derive(Clone)]
pub struct ApiState {
    pub ctx: Arc<NodeContext>,
    pub ledger: Arc<MemoryLedger>,
    pub shutdown: broadcast::Sender<()>,
}

impl ApiState {
    fn peer_hosts(&self) -> Vec<String> {
        self.ctx.directory.hosts_except(&self.ctx.settings.tcp_address)
    }
}

type ApiResult<T> = Result<Json<T>, (StatusCode, String)>;

fn internal(e: impl std::fmt::Display) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

fn upstream(e: ClientError) -> (StatusCode, String) {
    match e {
        ClientError::NoPeersReachable | ClientError::NoHeightReported => {
            (StatusCode::SERVICE_UNAVAILABLE, e.to_string())
        }
        other => (StatusCode::BAD_GATEWAY, other.to_string()),
    }
}

// ── /status ──────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub node_position: i64,
    pub tcp_address: String,
    pub address: String,
    pub chain_height: i64,
    pub tip_hash: String,
    pub pending_blocks: usize,
    pub pending_txs: usize,
    pub peers: usize,
}

pub async fn handle_status(State(state): State<ApiState>) -> ApiResult<StatusResponse> {
    let tip = state.ledger.chain_tip().map_err(internal)?;
    let address = state
        .ctx
        .signer
        .public_key()
        .map(|pk| state.ctx.crypto.address_of(&pk))
        .unwrap_or_default();
    Ok(Json(StatusResponse {
        node_position: state.ctx.settings.node_position,
        tcp_address: state.ctx.settings.tcp_address.clone(),
        address,
        chain_height: tip.block_id,
        tip_hash: hex::encode(tip.hash),
        pending_blocks: state.ledger.pending_block_count(),
        pending_txs: state.ledger.pending_tx_count(),
        peers: state.ctx.directory.peers().len(),
    }))
}

// ── /peers ───────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct PeerEntry {
    pub position: i64,
    pub tcp_address: String,
    pub address: String,
    pub banned: bool,
}

pub async fn handle_peers(State(state): State<ApiState>) -> Json<Vec<PeerEntry>> {
    let mut peers: Vec<PeerEntry> = state
        .ctx
        .directory
        .peers()
        .into_iter()
        .map(|p| PeerEntry {
            banned: state.ctx.directory.is_banned(p.position),
            position: p.position,
            tcp_address: p.tcp_address,
            address: p.address,
        })
        .collect();
    peers.sort_by_key(|p| p.position);
    Json(peers)
}

// ── /peers/max-block ─────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct MaxBlockResponse {
    pub host: String,
    pub block_id: i64,
}

pub async fn handle_max_block(State(state): State<ApiState>) -> ApiResult<MaxBlockResponse> {
    let best = state
        .ctx
        .client()
        .host_with_max_block(&state.peer_hosts(), &CancellationToken::new())
        .await
        .map_err(upstream)?;
    Ok(Json(MaxBlockResponse {
        host: best.host,
        block_id: best.block_id,
    }))
}

// ── /vote ────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct VoteResponse {
    pub agree: i64,
    pub validators: usize,
    pub admitted: bool,
    pub broadcast_to: usize,
    pub responses: Vec<VoteMessage>,
}

/// Run a voting round for this node and broadcast the tally.
pub async fn handle_vote(State(state): State<ApiState>) -> ApiResult<VoteResponse> {
    let hosts = state.peer_hosts();
    let tally = collect_votes(&state.ctx, &hosts).await.map_err(upstream)?;
    let report = state
        .ctx
        .client()
        .broadcast_tally(&hosts, &tally)
        .await
        .map_err(upstream)?;

    let admitted = QuorumPolicy::TWO_THIRDS.admits(tally.agree_quantity, hosts.len());
    tracing::info!(
        agree = tally.agree_quantity,
        validators = hosts.len(),
        admitted,
        "voting round finished"
    );
    Ok(Json(VoteResponse {
        agree: tally.agree_quantity,
        validators: hosts.len(),
        admitted,
        broadcast_to: report.succeeded(),
        responses: tally.responses,
    }))
}

// ── /daemon/shutdown ─────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct ShutdownResponse {
    pub message: String,
}

pub async fn handle_shutdown(State(state): State<ApiState>) -> Json<ShutdownResponse> {
    tracing::info!("shutdown requested via API");
    let _ = state.shutdown.send(());
    Json(ShutdownResponse {
        message: "Shutdown initiated".to_string(),
    })
}

pub fn router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/status", get(handle_status))
        .route("/peers", get(handle_peers))
        .route("/peers/max-block", get(handle_max_block))
        .route("/vote", post(handle_vote))
        .route("/daemon/shutdown", post(handle_shutdown))
        .with_state(state);

    Router::new().nest("/api", api_routes).layer(cors)
}

pub async fn serve(state: ApiState, addr: &str) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(addr, "API listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}
