//! The wallet-facing REST surface (§6): submit transactions, read
//! balances/history, inspect the mempool. Routing/JSON shape belongs to
//! this crate; every rule it enforces before touching the mempool or
//! store is delegated to `ambercoin-chain`/`ambercoin-mempool`.

use std::net::SocketAddr;
use std::sync::Arc;

use ambercoin_chain::{ChainStore, PRIMARY_BRANCH};
use ambercoin_config::NodeConfig;
use ambercoin_core::Transaction;
use ambercoin_mempool::Mempool;
use ambercoin_network::{GossipMessage, InboundMessage};
use anyhow::Result;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::info;

#[derive(Clone)]
pub struct RpcState {
    pub chain: Arc<ChainStore>,
    pub mempool: Arc<dyn Mempool>,
    pub inbound_tx: mpsc::Sender<InboundMessage>,
}

pub async fn start_server(cfg: &NodeConfig, state: RpcState) -> Result<()> {
    let addr: SocketAddr = cfg.api.rest_addr.parse()?;
    let app = router(state);
    info!(%addr, "rpc: REST listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn router(state: RpcState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/blocks/:height", get(get_block_by_height))
        .route("/blocks/hash/:hash", get(get_block_by_hash))
        .route("/balance/:address", get(get_balance))
        .route("/history/:address", get(get_history))
        .route("/transactions", post(submit_transaction))
        .route("/transactions/:hash", get(get_transaction))
        .route("/mempool", get(get_mempool))
        .route("/mempool/:hash", get(get_unconfirmed_transaction))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn status(State(state): State<RpcState>) -> Response {
    match state.chain.get_height().await {
        Ok(height) => Json(json!({ "height": height })).into_response(),
        Err(err) => internal_error(err),
    }
}

async fn get_block_by_height(State(state): State<RpcState>, Path(height): Path<u64>) -> Response {
    match state.chain.get_block_header_by_height(height, PRIMARY_BRANCH).await {
        Ok(Some((header, branch, height))) => {
            Json(json!({ "header": header, "branch": branch, "height": height })).into_response()
        }
        Ok(None) => not_found("unknown height"),
        Err(err) => internal_error(err),
    }
}

async fn get_block_by_hash(State(state): State<RpcState>, Path(hash): Path<String>) -> Response {
    match state.chain.get_block_by_hash(&hash).await {
        Ok(Some(block)) => Json(block).into_response(),
        Ok(None) => not_found("unknown block"),
        Err(err) => internal_error(err),
    }
}

#[derive(Deserialize)]
struct AssetQuery {
    asset: Option<String>,
}

async fn get_balance(
    State(state): State<RpcState>,
    Path(address): Path<String>,
    Query(query): Query<AssetQuery>,
) -> Response {
    let asset = query.asset.unwrap_or_else(|| ambercoin_core::NATIVE_ASSET_ID.to_string());
    match state.chain.get_balance(&address, &asset, PRIMARY_BRANCH).await {
        Ok(balance) => Json(json!({ "address": address, "asset": asset, "balance": balance })).into_response(),
        Err(err) => internal_error(err),
    }
}

async fn get_history(State(state): State<RpcState>, Path(address): Path<String>) -> Response {
    match state.chain.get_transaction_history(&address, PRIMARY_BRANCH).await {
        Ok(transactions) => Json(json!({ "transactions": transactions })).into_response(),
        Err(err) => internal_error(err),
    }
}

async fn get_transaction(State(state): State<RpcState>, Path(hash): Path<String>) -> Response {
    match state.chain.get_transaction_by_hash(&hash).await {
        Ok(Some(tx)) => Json(tx).into_response(),
        Ok(None) => match state.mempool.get_unconfirmed_transaction(&hash).await {
            Ok(Some(tx)) => Json(tx).into_response(),
            Ok(None) => not_found("unknown transaction"),
            Err(err) => internal_error(err),
        },
        Err(err) => internal_error(err),
    }
}

async fn get_mempool(State(state): State<RpcState>) -> Response {
    match state.mempool.get_all_unconfirmed_transactions().await {
        Ok(transactions) => {
            let count = transactions.len();
            Json(json!({ "count": count, "transactions": transactions })).into_response()
        }
        Err(err) => internal_error(err),
    }
}

async fn get_unconfirmed_transaction(State(state): State<RpcState>, Path(hash): Path<String>) -> Response {
    match state.mempool.get_unconfirmed_transaction(&hash).await {
        Ok(Some(tx)) => Json(tx).into_response(),
        Ok(None) => not_found("unknown unconfirmed transaction"),
        Err(err) => internal_error(err),
    }
}

/// Mirrors the checks the gossip worker runs on a peer-pushed transaction
/// (`validate_transaction` in `ambercoin-network::worker`) plus the
/// tx_hash tamper check the wire format alone can't catch.
async fn submit_transaction(State(state): State<RpcState>, Json(tx): Json<Transaction>) -> Response {
    let mut recomputed = tx.clone();
    recomputed.recompute_hash();
    if recomputed.tx_hash != tx.tx_hash {
        return (StatusCode::NOT_ACCEPTABLE, Json(json!({ "error": "tx_hash does not match contents" })))
            .into_response();
    }
    if !tx.verify() {
        return (StatusCode::NOT_ACCEPTABLE, Json(json!({ "error": "bad signature" }))).into_response();
    }

    match state.chain.find_duplicate_transactions(&tx.tx_hash).await {
        Ok(true) => return (StatusCode::CONFLICT, Json(json!({ "error": "already confirmed" }))).into_response(),
        Ok(false) => {}
        Err(err) => return internal_error(err),
    }

    let balance = match state.chain.get_balance(&tx.source, &tx.asset, PRIMARY_BRANCH).await {
        Ok(balance) => balance,
        Err(err) => return internal_error(err),
    };
    if balance < tx.amount + tx.fee {
        return (StatusCode::BAD_REQUEST, Json(json!({ "error": "insufficient balance" }))).into_response();
    }

    match state.mempool.push_unconfirmed_transaction(tx.clone()).await {
        Ok(true) => {
            let _ = state
                .inbound_tx
                .send(InboundMessage {
                    sender: "local".into(),
                    self_originated: true,
                    message: GossipMessage::UnconfirmedTransaction { transaction: tx.clone() },
                })
                .await;
            (StatusCode::ACCEPTED, Json(json!({ "tx_hash": tx.tx_hash }))).into_response()
        }
        Ok(false) => (StatusCode::CONFLICT, Json(json!({ "error": "already in mempool" }))).into_response(),
        Err(err) => internal_error(err),
    }
}

fn not_found(msg: &str) -> Response {
    (StatusCode::NOT_FOUND, Json(json!({ "error": msg }))).into_response()
}

fn internal_error(err: impl std::fmt::Display) -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": err.to_string() }))).into_response()
}
