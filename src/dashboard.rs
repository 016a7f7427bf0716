//! Dashboard page, JSON snapshot and the HTTP routes for tokens, loans and
//! the lending pool.

use std::sync::{Arc, RwLock};

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::history::trend_heights;
use crate::lending::{HealthFactor, LendingError, LendingPool};
use crate::loan::{Loan, LoanDraft, LoanStage, LoanWorkflow, SwapQuote, WorkflowError};
use crate::metrics::{
    compare_networks, format_gwei, time_since_update, transfer_cost, FeeLevel, GasCost,
    NetworkComparison,
};
use crate::monitor::{CycleOutcome, FeeMonitor, MIN_REFRESH_INTERVAL_MS};
use crate::network::NetworkId;
use crate::price::UsdQuote;
use crate::snapshot::FeeSnapshot;
use crate::token::{LookupOutcome, TokenLookup, TokenLookupState, TokenSnapshot};

#[derive(Clone)]
pub struct AppState {
    pub monitor: Arc<FeeMonitor>,
    pub tokens: TokenLookup,
    pub loans: Arc<LoanWorkflow>,
    pub lending: Arc<RwLock<LendingPool>>,
    pub wallet_address: Option<String>,
}

impl AppState {
    pub fn new(
        monitor: Arc<FeeMonitor>,
        tokens: TokenLookup,
        loans: Arc<LoanWorkflow>,
        wallet_address: Option<String>,
    ) -> Self {
        Self {
            monitor,
            tokens,
            loans,
            lending: Arc::new(RwLock::new(LendingPool::default())),
            wallet_address,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkCard {
    pub network: NetworkId,
    pub name: String,
    pub chain_id: u64,
    pub explorer_url: String,
    pub fee_level: FeeLevel,
    pub effective_gwei: String,
    pub base_fee_gwei: String,
    pub priority_fee_gwei: String,
    pub transfer_cost: GasCost,
    pub updated: Option<String>,
    pub trend: Option<Vec<f64>>,
    pub snapshot: FeeSnapshot,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanView {
    pub stage: LoanStage,
    pub step: String,
    pub active: Option<Loan>,
    pub draft: LoanDraft,
    pub quote: Option<SwapQuote>,
    pub ledger: Vec<Loan>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LendingView {
    pub pool: LendingPool,
    pub utilization_pct: f64,
    pub max_borrowable: f64,
    pub available_to_borrow: f64,
    pub health_factor: HealthFactor,
    pub annual_return: f64,
    pub annual_interest: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardSnapshot {
    pub generated_at: i64,
    pub auto_refresh_interval_ms: Option<u64>,
    pub price: Option<UsdQuote>,
    pub networks: Vec<NetworkCard>,
    pub comparison: Option<NetworkComparison>,
    pub token: TokenLookupState,
    pub loan: LoanView,
    pub lending: LendingView,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct AutoRefreshRequest {
    pub enabled: bool,
    pub interval_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoRefreshStatus {
    pub running: bool,
    pub interval_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoanRequest {
    pub principal: String,
    pub collateral_amount: String,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct AmountRequest {
    pub amount: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

pub fn dashboard_router(state: AppState) -> Router {
    Router::new()
        .route("/dashboard", get(get_dashboard_html))
        .route("/dashboard/snapshot", get(get_dashboard_snapshot))
        .route("/dashboard/refresh", post(post_refresh))
        .route("/dashboard/auto-refresh", post(post_auto_refresh))
        .route("/tokens/{address}", get(get_token))
        .route("/loans", get(get_loans).post(post_loan))
        .route("/loans/swap", post(post_loan_swap))
        .route("/loans/ack", post(post_loan_ack))
        .route("/lending", get(get_lending))
        .route("/lending/lend", post(post_lend))
        .route("/lending/borrow", post(post_borrow))
        .with_state(state)
}

pub fn build_network_card(
    network: NetworkId,
    snapshot: FeeSnapshot,
    trend: Option<Vec<f64>>,
    usd_per_eth: f64,
    now_ms: i64,
) -> NetworkCard {
    let updated = snapshot
        .has_data()
        .then(|| time_since_update(now_ms, snapshot.captured_at));

    NetworkCard {
        network,
        name: network.display_name().to_string(),
        chain_id: network.chain_id(),
        explorer_url: network.explorer_url().to_string(),
        fee_level: FeeLevel::classify(snapshot.effective_price),
        effective_gwei: format_gwei(snapshot.effective_price),
        base_fee_gwei: format_gwei(snapshot.base_fee),
        priority_fee_gwei: format_gwei(snapshot.priority_fee),
        transfer_cost: transfer_cost(snapshot.effective_price, usd_per_eth),
        updated,
        trend,
        snapshot,
    }
}

pub fn build_loan_view(loans: &LoanWorkflow) -> LoanView {
    let stage = loans.stage();
    LoanView {
        stage,
        step: stage.step_label().to_string(),
        active: loans.active_loan(),
        draft: loans.draft(),
        quote: loans.swap_quote(),
        ledger: loans.recent_ledger(),
    }
}

pub fn build_lending_view(pool: &LendingPool) -> LendingView {
    LendingView {
        pool: pool.clone(),
        utilization_pct: pool.utilization_pct(),
        max_borrowable: pool.max_borrowable(),
        available_to_borrow: pool.available_to_borrow(),
        health_factor: pool.health_factor(),
        annual_return: pool.user_annual_return(),
        annual_interest: pool.user_annual_interest(),
    }
}

pub fn build_dashboard_snapshot(state: &AppState, now_ms: i64) -> DashboardSnapshot {
    let price = state.monitor.price_quote();
    let usd_per_eth = price.as_ref().map(|quote| quote.usd).unwrap_or(0.0);

    let networks: Vec<NetworkCard> = state
        .monitor
        .networks()
        .into_iter()
        .map(|network| {
            let snapshot = state
                .monitor
                .snapshot(network)
                .unwrap_or_else(|| FeeSnapshot::empty(now_ms));
            let trend = trend_heights(&state.monitor.history(network));
            build_network_card(network, snapshot, trend, usd_per_eth, now_ms)
        })
        .collect();

    let comparison = match networks.as_slice() {
        [a, b, ..] => compare_networks(
            (a.network, a.snapshot.effective_price),
            (b.network, b.snapshot.effective_price),
        ),
        _ => None,
    };

    DashboardSnapshot {
        generated_at: now_ms,
        auto_refresh_interval_ms: state.monitor.auto_refresh_interval_ms(),
        price,
        networks,
        comparison,
        token: state.tokens.state(),
        loan: build_loan_view(&state.loans),
        lending: build_lending_view(&read_pool(&state.lending)),
    }
}

pub fn render_dashboard_html(snapshot: &DashboardSnapshot) -> String {
    let generated = Utc
        .timestamp_millis_opt(snapshot.generated_at)
        .single()
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "-".to_string());

    let mut out = String::new();
    out.push_str("<!DOCTYPE html><html><head><meta charset=\"utf-8\">\n");
    out.push_str("<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n");
    if let Some(interval_ms) = snapshot.auto_refresh_interval_ms {
        let seconds = (interval_ms / 1000).max(1);
        out.push_str(&format!(
            "<meta http-equiv=\"refresh\" content=\"{seconds}\">\n"
        ));
    }
    out.push_str("<title>Gas Fee Monitor</title>\n");
    out.push_str("<style>:root{--bg:#f5f1e7;--bg2:#e9f0f2;--card:#ffffff;--ink:#182026;--muted:#5f6a73;--line:#d7dce1;--low:#1f8a4c;--medium:#b7791f;--high:#c53030;--bar:#24576b}*{box-sizing:border-box}body{margin:0;color:var(--ink);font-family:\"Space Grotesk\",\"Avenir Next\",\"Segoe UI\",sans-serif;background:linear-gradient(160deg,var(--bg),var(--bg2));min-height:100vh}.shell{max-width:1200px;margin:0 auto;padding:24px 18px 28px}.hero{background:linear-gradient(135deg,#102f3a 0%,#24576b 100%);color:#f7fbfc;border-radius:16px;padding:18px 20px}.hero h1{margin:0 0 8px;font-size:1.6rem}.hero-meta{display:flex;gap:16px;flex-wrap:wrap;font-size:.92rem;color:#dcebf0}.grid{display:grid;grid-template-columns:repeat(auto-fit,minmax(320px,1fr));gap:16px;margin-top:16px}.card{background:var(--card);border:1px solid #cbd4db;border-radius:16px;padding:16px;box-shadow:0 12px 28px rgba(26,35,42,.12)}.card h2{margin:0 0 10px;font-size:1.1rem}.fee-level{font-weight:700;text-transform:uppercase;font-size:.8rem}.fee-low{color:var(--low)}.fee-medium{color:var(--medium)}.fee-high{color:var(--high)}.fee-unknown{color:var(--muted)}.price{font-size:1.8rem;font-weight:700;margin:6px 0}dl{display:grid;grid-template-columns:auto 1fr;gap:4px 12px;margin:8px 0;font-size:.86rem}dt{color:var(--muted)}.error{color:var(--high);font-size:.84rem}.trend{display:flex;align-items:flex-end;gap:3px;height:60px;margin-top:10px}.trend span{flex:1;background:var(--bar);border-radius:3px 3px 0 0}table{width:100%;border-collapse:collapse;font-size:.84rem}td,th{padding:6px 8px;border-bottom:1px solid var(--line);text-align:left}</style>\n");
    out.push_str("</head><body><main class=\"shell\">\n");
    out.push_str("<section class=\"hero\"><h1>Gas Fee Monitor</h1><div class=\"hero-meta\">\n");
    match &snapshot.price {
        Some(quote) if quote.usd > 0.0 => {
            out.push_str(&format!("<span>ETH/USD: ${:.2}</span>", quote.usd))
        }
        _ => out.push_str("<span>ETH/USD: -</span>"),
    }
    out.push_str(&format!(
        "<span>Auto-refresh: {}</span>",
        match snapshot.auto_refresh_interval_ms {
            Some(ms) => format!("every {ms} ms"),
            None => "off".to_string(),
        }
    ));
    out.push_str(&format!(
        "<span>Generated: {}</span>",
        escape_html(&generated)
    ));
    out.push_str("</div></section>\n<div class=\"grid\">\n");

    for card in &snapshot.networks {
        render_network_card(&mut out, card);
    }
    out.push_str("</div>\n");

    if let Some(comparison) = &snapshot.comparison {
        out.push_str("<section class=\"card\" id=\"comparison\" style=\"margin-top:16px\">");
        out.push_str(&format!(
            "<h2>Comparison</h2><p>{} is cheaper by {:.3} Gwei ({:.1}%)</p></section>\n",
            escape_html(comparison.cheaper.display_name()),
            comparison.difference_gwei,
            comparison.percentage
        ));
    }

    out.push_str("<div class=\"grid\">\n");
    render_loan_card(&mut out, &snapshot.loan);
    render_lending_card(&mut out, &snapshot.lending);
    out.push_str("</div>\n</main></body></html>\n");
    out
}

fn render_network_card(out: &mut String, card: &NetworkCard) {
    let level = card.fee_level.as_str();
    out.push_str(&format!(
        "<section class=\"card network\" data-network=\"{}\">",
        card.network.as_str()
    ));
    out.push_str(&format!(
        "<h2>{} <small>#{}</small></h2>",
        escape_html(&card.name),
        card.chain_id
    ));
    out.push_str(&format!(
        "<span class=\"fee-level fee-{level}\">{level}</span>"
    ));
    out.push_str(&format!(
        "<div class=\"price\">{}</div>",
        escape_html(&card.effective_gwei)
    ));
    out.push_str("<dl>");
    push_definition(out, "Base fee", &card.base_fee_gwei);
    push_definition(out, "Priority fee", &card.priority_fee_gwei);
    push_definition(
        out,
        "Block",
        &card
            .snapshot
            .block_height
            .map(|height| height.to_string())
            .unwrap_or_else(|| "-".to_string()),
    );
    push_definition(
        out,
        "Transfer cost",
        &format!("{} ETH (${})", card.transfer_cost.eth, card.transfer_cost.usd),
    );
    push_definition(out, "Updated", card.updated.as_deref().unwrap_or("never"));
    out.push_str("</dl>");

    if card.snapshot.is_loading {
        out.push_str("<p class=\"loading\">Refreshing...</p>");
    }
    if let Some(error) = &card.snapshot.last_error {
        out.push_str(&format!("<p class=\"error\">{}</p>", escape_html(error)));
    }
    if let Some(heights) = &card.trend {
        out.push_str("<div class=\"trend\">");
        for height in heights {
            out.push_str(&format!("<span style=\"height:{height:.1}%\"></span>"));
        }
        out.push_str("</div>");
    }
    out.push_str(&format!(
        "<p><a target=\"_blank\" rel=\"noopener noreferrer\" href=\"{}\">Explorer</a></p>",
        escape_html(&card.explorer_url)
    ));
    out.push_str("</section>\n");
}

fn render_loan_card(out: &mut String, loan: &LoanView) {
    out.push_str("<section class=\"card\" id=\"loans\"><h2>Loan</h2>");
    out.push_str(&format!(
        "<p>Step: <b>{}</b></p>",
        escape_html(&loan.step)
    ));
    if let Some(quote) = &loan.quote {
        out.push_str(&format!(
            "<p>Estimated swap output: {:.6} (net after repay {:.6})</p>",
            quote.estimated_output, quote.net_after_repay
        ));
    }
    out.push_str("<table><thead><tr><th>Id</th><th>Principal</th><th>Collateral</th><th>Status</th></tr></thead><tbody>");
    for entry in &loan.ledger {
        let status = if entry.failure.is_some() {
            "failed"
        } else if entry.repaid {
            "repaid"
        } else {
            "open"
        };
        out.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{status}</td></tr>",
            escape_html(&entry.id),
            escape_html(&entry.principal),
            escape_html(&entry.collateral_amount)
        ));
    }
    out.push_str("</tbody></table></section>\n");
}

fn render_lending_card(out: &mut String, lending: &LendingView) {
    let health = match lending.health_factor {
        HealthFactor::Infinite => "∞".to_string(),
        HealthFactor::Ratio(ratio) => format!("{ratio:.2}"),
    };
    out.push_str("<section class=\"card\" id=\"lending\"><h2>Lending pool</h2><dl>");
    push_definition(out, "APY", &format!("{:.1}%", lending.pool.current_apy));
    push_definition(out, "Utilization", &format!("{:.1}%", lending.utilization_pct));
    push_definition(out, "Your deposits", &format!("{:.4}", lending.pool.user_lent));
    push_definition(out, "Your borrows", &format!("{:.4}", lending.pool.user_borrowed));
    push_definition(
        out,
        "Available to borrow",
        &format!("{:.4}", lending.available_to_borrow),
    );
    push_definition(out, "Health factor", &health);
    out.push_str("</dl></section>\n");
}

fn push_definition(out: &mut String, term: &str, value: &str) {
    out.push_str("<dt>");
    out.push_str(&escape_html(term));
    out.push_str("</dt><dd>");
    out.push_str(&escape_html(value));
    out.push_str("</dd>");
}

fn escape_html(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

fn read_pool(pool: &RwLock<LendingPool>) -> LendingPool {
    pool.read()
        .expect("lending pool lock should not be poisoned")
        .clone()
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorBody {
            error: message.into(),
        }),
    )
        .into_response()
}

fn workflow_error_response(err: WorkflowError) -> Response {
    let status = match err {
        WorkflowError::InvalidTransition { .. } => StatusCode::CONFLICT,
        _ => StatusCode::BAD_REQUEST,
    };
    warn!(
        component = "dashboard",
        event = "http.loans.rejected",
        error = %err
    );
    error_response(status, err.to_string())
}

fn lending_error_response(err: LendingError) -> Response {
    let status = match err {
        LendingError::NonPositiveAmount(_) => StatusCode::BAD_REQUEST,
        LendingError::InsufficientCollateral { .. } => StatusCode::UNPROCESSABLE_ENTITY,
    };
    warn!(
        component = "dashboard",
        event = "http.lending.rejected",
        error = %err
    );
    error_response(status, err.to_string())
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

async fn get_dashboard_html(State(state): State<AppState>) -> impl IntoResponse {
    info!(component = "dashboard", event = "http.dashboard.request");
    let snapshot = build_dashboard_snapshot(&state, now_ms());
    Html(render_dashboard_html(&snapshot))
}

async fn get_dashboard_snapshot(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = build_dashboard_snapshot(&state, now_ms());
    info!(
        component = "dashboard",
        event = "http.snapshot.request",
        networks = snapshot.networks.len()
    );
    Json(snapshot)
}

async fn post_refresh(State(state): State<AppState>) -> Json<Vec<CycleOutcome>> {
    info!(component = "dashboard", event = "http.refresh.request");
    Json(state.monitor.refresh_now().await)
}

async fn post_auto_refresh(
    State(state): State<AppState>,
    Json(request): Json<AutoRefreshRequest>,
) -> Response {
    info!(
        component = "dashboard",
        event = "http.auto_refresh.request",
        enabled = request.enabled,
        interval_ms = ?request.interval_ms
    );
    if let Some(interval_ms) = request.interval_ms.filter(|ms| *ms < MIN_REFRESH_INTERVAL_MS) {
        warn!(
            component = "dashboard",
            event = "http.auto_refresh.rejected",
            interval_ms
        );
        return error_response(
            StatusCode::BAD_REQUEST,
            format!("interval_ms must be at least {MIN_REFRESH_INTERVAL_MS}, got {interval_ms}"),
        );
    }
    state
        .monitor
        .set_auto_refresh(request.enabled, request.interval_ms);
    Json(AutoRefreshStatus {
        running: state.monitor.is_running(),
        interval_ms: state.monitor.auto_refresh_interval_ms(),
    })
    .into_response()
}

async fn get_token(State(state): State<AppState>, Path(address): Path<String>) -> Response {
    info!(
        component = "dashboard",
        event = "http.token.request",
        address = %address
    );
    match state
        .tokens
        .lookup(&address, state.wallet_address.as_deref())
        .await
    {
        LookupOutcome::Resolved(snapshot) => Json::<TokenSnapshot>(snapshot).into_response(),
        LookupOutcome::Superseded => {
            error_response(StatusCode::CONFLICT, "superseded by a newer lookup")
        }
        LookupOutcome::Cleared => error_response(
            StatusCode::BAD_REQUEST,
            format!("'{}' is not a token address", address.trim()),
        ),
    }
}

async fn get_loans(State(state): State<AppState>) -> Json<LoanView> {
    info!(component = "dashboard", event = "http.loans.request");
    Json(build_loan_view(&state.loans))
}

async fn post_loan(State(state): State<AppState>, Json(request): Json<LoanRequest>) -> Response {
    info!(component = "dashboard", event = "http.loans.submit");
    let collateral = state.tokens.current();
    match state.loans.submit(
        &request.principal,
        &request.collateral_amount,
        collateral.as_ref(),
    ) {
        Ok(loan) => (StatusCode::CREATED, Json(loan)).into_response(),
        Err(err) => workflow_error_response(err),
    }
}

async fn post_loan_swap(State(state): State<AppState>) -> Response {
    info!(component = "dashboard", event = "http.loans.swap");
    match state.loans.execute_swap() {
        Ok(()) => Json(build_loan_view(&state.loans)).into_response(),
        Err(err) => workflow_error_response(err),
    }
}

async fn post_loan_ack(State(state): State<AppState>) -> Response {
    info!(component = "dashboard", event = "http.loans.ack");
    match state.loans.acknowledge() {
        Ok(()) => Json(build_loan_view(&state.loans)).into_response(),
        Err(err) => workflow_error_response(err),
    }
}

async fn get_lending(State(state): State<AppState>) -> Json<LendingView> {
    info!(component = "dashboard", event = "http.lending.request");
    Json(build_lending_view(&read_pool(&state.lending)))
}

async fn post_lend(State(state): State<AppState>, Json(request): Json<AmountRequest>) -> Response {
    info!(
        component = "dashboard",
        event = "http.lending.lend",
        amount = request.amount
    );
    let result = {
        let mut pool = state
            .lending
            .write()
            .expect("lending pool lock should not be poisoned");
        pool.lend(request.amount).map(|()| build_lending_view(&pool))
    };
    match result {
        Ok(view) => Json(view).into_response(),
        Err(err) => lending_error_response(err),
    }
}

async fn post_borrow(
    State(state): State<AppState>,
    Json(request): Json<AmountRequest>,
) -> Response {
    info!(
        component = "dashboard",
        event = "http.lending.borrow",
        amount = request.amount
    );
    let result = {
        let mut pool = state
            .lending
            .write()
            .expect("lending pool lock should not be poisoned");
        pool.borrow(request.amount).map(|()| build_lending_view(&pool))
    };
    match result {
        Ok(view) => Json(view).into_response(),
        Err(err) => lending_error_response(err),
    }
}
