pub mod error;
mod ws;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use crash_engine::EngineHandle;
use crash_hub::HubHandle;
use crash_ledger::{Ledger, Page, PageParams};
use crash_oracle::PriceOracle;
use crash_types::{validate_player_id, validate_player_name, Asset, CoreError, Player, Round, Transaction, TransactionKind};
use error::ApiError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

/// Shared service handles every handler closes over. The same shape as
/// this workspace's API crate's `AppState`: a `Clone` struct of `Arc`s and
/// cheap-to-clone actor handles, never a lock held across an `.await`.
#[derive(Clone)]
pub struct AppState {
    pub engine: EngineHandle,
    pub ledger: Arc<Ledger>,
    pub oracle: Arc<PriceOracle>,
    pub hub: HubHandle,
}

pub async fn start_server(state: AppState, port: u16) {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_headers(Any)
        .allow_methods(Any);

    let app = Router::new()
        .route("/", get(root))
        .route("/players", post(create_player))
        .route("/players/:id/balance", get(get_balance))
        .route("/players/:id/history", get(get_history))
        .route("/players/:id/deposit", post(deposit))
        .route("/players/:id/withdraw", post(withdraw))
        .route("/wagers", post(place_wager))
        .route("/cashout", post(cash_out))
        .route("/round", get(current_round))
        .route("/rounds", get(round_history))
        .route("/rounds/:id", get(round_details))
        .route("/verify", post(verify_round))
        .route("/prices", get(get_prices))
        .route("/convert", post(convert))
        .route("/ws", get(ws::ws_handler))
        .layer(cors)
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "crash-api listening");

    let listener = tokio::net::TcpListener::bind(addr).await.expect("bind facade listener");
    axum::serve(listener, app).await.expect("facade server crashed");
}

async fn root() -> &'static str {
    "crash-api v1"
}

#[derive(Deserialize)]
struct CreatePlayerRequest {
    id: String,
    name: String,
    #[serde(default)]
    initial_balances: HashMap<Asset, Decimal>,
}

async fn create_player(
    State(state): State<AppState>,
    Json(req): Json<CreatePlayerRequest>,
) -> Result<Json<Player>, ApiError> {
    validate_player_id(&req.id)?;
    validate_player_name(&req.name)?;
    let player = state
        .ledger
        .create_player(req.id, req.name, req.initial_balances)
        .map_err(ledger_err)?;
    Ok(Json(player))
}

#[derive(Serialize)]
struct BalanceResponse {
    balances: HashMap<Asset, Decimal>,
    total_fiat: Decimal,
}

async fn get_balance(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<BalanceResponse>, ApiError> {
    let balances = state.ledger.balances(&id).map_err(ledger_err)?;
    let prices = state.oracle.prices(&Asset::ALL).await;
    let total_fiat = balances
        .iter()
        .map(|(asset, amount)| *amount * prices.get(asset).copied().unwrap_or(Decimal::ZERO))
        .sum();
    Ok(Json(BalanceResponse { balances, total_fiat }))
}

#[derive(Deserialize)]
struct HistoryQuery {
    #[serde(default)]
    offset: usize,
    #[serde(default = "default_limit")]
    limit: usize,
    kind: Option<TransactionKind>,
}

fn default_limit() -> usize {
    50
}

async fn get_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Page<Transaction>>, ApiError> {
    state.ledger.player(&id).map_err(ledger_err)?;
    let page = state.ledger.history(
        &id,
        query.kind,
        PageParams { offset: query.offset, limit: query.limit },
    );
    Ok(Json(page))
}

#[derive(Deserialize)]
struct AssetAmountRequest {
    asset: Asset,
    amount: Decimal,
}

async fn deposit(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<AssetAmountRequest>,
) -> Result<Json<Decimal>, ApiError> {
    if req.amount <= Decimal::ZERO {
        return Err(CoreError::validation("amount must be positive").into());
    }
    let price = state.oracle.price(req.asset).await;
    let balance = state
        .ledger
        .deposit(&id, req.asset, req.amount, price, crash_types::now_millis())
        .map_err(ledger_err)?;
    Ok(Json(balance))
}

async fn withdraw(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<AssetAmountRequest>,
) -> Result<Json<Decimal>, ApiError> {
    if req.amount <= Decimal::ZERO {
        return Err(CoreError::validation("amount must be positive").into());
    }
    let price = state.oracle.price(req.asset).await;
    let balance = state
        .ledger
        .withdraw(&id, req.asset, req.amount, price, crash_types::now_millis())
        .map_err(ledger_err)?;
    Ok(Json(balance))
}

#[derive(Deserialize)]
struct PlaceWagerRequest {
    player_id: String,
    stake_fiat: Decimal,
    asset: Asset,
}

#[derive(Serialize)]
struct PlaceWagerResponse {
    wager_id: uuid::Uuid,
    stake_asset: Decimal,
}

async fn place_wager(
    State(state): State<AppState>,
    Json(req): Json<PlaceWagerRequest>,
) -> Result<Json<PlaceWagerResponse>, ApiError> {
    let price = state.oracle.price(req.asset).await;
    let ack = state.engine.place_wager(req.player_id, req.stake_fiat, req.asset, price).await?;
    Ok(Json(PlaceWagerResponse { wager_id: ack.wager_id, stake_asset: ack.stake_asset }))
}

#[derive(Deserialize)]
struct CashOutRequest {
    player_id: String,
}

async fn cash_out(
    State(state): State<AppState>,
    Json(req): Json<CashOutRequest>,
) -> Result<Json<crash_engine::CashOutReceipt>, ApiError> {
    let receipt = state.engine.cash_out(req.player_id).await?;
    Ok(Json(receipt))
}

async fn current_round(State(state): State<AppState>) -> Result<Json<crash_engine::StateSnapshot>, ApiError> {
    Ok(Json(state.engine.snapshot_state().await?))
}

#[derive(Deserialize)]
struct PageQuery {
    #[serde(default)]
    offset: usize,
    #[serde(default = "default_limit")]
    limit: usize,
}

async fn round_history(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> Result<Json<Page<Round>>, ApiError> {
    let page = state
        .engine
        .round_history(PageParams { offset: query.offset, limit: query.limit })
        .await?;
    Ok(Json(page))
}

async fn round_details(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Round>, ApiError> {
    state
        .engine
        .round_details(id.clone())
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("unknown round: {id}")))
}

#[derive(Deserialize)]
struct VerifyRequest {
    round_id: String,
    seed_hex: String,
    claimed_crash: Decimal,
}

#[derive(Serialize)]
struct VerifyResponse {
    valid: bool,
    hash_hex: String,
    recomputed_crash: Decimal,
}

async fn verify_round(
    State(state): State<AppState>,
    Json(req): Json<VerifyRequest>,
) -> Result<Json<VerifyResponse>, ApiError> {
    let round = state
        .engine
        .round_details(req.round_id.clone())
        .await?
        .ok_or_else(|| ApiError::not_found(format!("unknown round: {}", req.round_id)))?;

    let seed_bytes = hex::decode(&req.seed_hex).map_err(|_| CoreError::validation("seed_hex is not valid hex"))?;
    let seed: [u8; 32] = seed_bytes
        .try_into()
        .map_err(|_| CoreError::validation("seed must be 32 bytes"))?;

    let recomputed_hash = crash_fairness::hash(&seed, round.number);
    let config = crash_types::EngineConfig::default();
    let recomputed_crash = crash_fairness::crash_point(&seed, round.number, config.max_crash);
    let valid = recomputed_hash == round.hash
        && round.crash_point == req.claimed_crash
        && crash_fairness::verify(&seed, round.number, req.claimed_crash, config.max_crash);

    Ok(Json(VerifyResponse {
        valid,
        hash_hex: hex::encode(recomputed_hash),
        recomputed_crash,
    }))
}

async fn get_prices(State(state): State<AppState>) -> Json<HashMap<Asset, Decimal>> {
    Json(state.oracle.prices(&Asset::ALL).await)
}

#[derive(Deserialize)]
#[serde(rename_all = "snake_case")]
enum ConvertDirection {
    FiatToAsset,
    AssetToFiat,
}

#[derive(Deserialize)]
struct ConvertRequest {
    amount: Decimal,
    direction: ConvertDirection,
    asset: Asset,
}

#[derive(Serialize)]
struct ConvertResponse {
    converted: Decimal,
    price_used: Decimal,
}

async fn convert(
    State(state): State<AppState>,
    Json(req): Json<ConvertRequest>,
) -> Result<Json<ConvertResponse>, ApiError> {
    if req.amount <= Decimal::ZERO {
        return Err(CoreError::validation("amount must be positive").into());
    }
    let price = state.oracle.price(req.asset).await;
    let converted = match req.direction {
        ConvertDirection::FiatToAsset => req.amount / price,
        ConvertDirection::AssetToFiat => req.amount * price,
    };
    Ok(Json(ConvertResponse { converted, price_used: price }))
}

fn ledger_err(err: crash_ledger::LedgerError) -> ApiError {
    use crash_ledger::LedgerError as E;
    match &err {
        E::UnknownPlayer(id) => ApiError::not_found(format!("unknown player: {id}")),
        E::InsufficientBalance { .. } => ApiError::Core(CoreError::funds(err.to_string())),
        _ => ApiError::Core(CoreError::validation(err.to_string())),
    }
}
