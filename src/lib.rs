//! Gas fee monitor core crate.
//!
//! Current implemented scope:
//! - failover fee polling across ordered RPC endpoints per network
//! - fee snapshots, bounded history and presentation derivations
//! - ERC-20 token lookup, simulated collateralized loans and lending pool
//! - axum dashboard and JSON routes

mod config;
mod dashboard;
mod fetcher;
mod history;
mod lending;
mod loan;
mod metrics;
mod monitor;
mod network;
mod observability;
mod price;
mod rpc;
mod snapshot;
mod token;

pub use config::{app_config_from_env, AppConfig, ConfigError, DEFAULT_SWAP_RATE};
pub use dashboard::{
    build_dashboard_snapshot, build_lending_view, build_loan_view, build_network_card,
    dashboard_router, render_dashboard_html, AmountRequest, AppState, AutoRefreshRequest,
    AutoRefreshStatus, DashboardSnapshot, ErrorBody, LendingView, LoanRequest, LoanView,
    NetworkCard,
};
pub use fetcher::{
    fetch_with_failover, FailoverConfig, FeeReading, FeeTransport, FetchError, FetchSuccess,
    TransportError, DEFAULT_OUTER_DEADLINE_MS, DEFAULT_PRIORITY_FEE_WEI,
};
pub use history::{trend_heights, HistoryBuffer, HistoryPoint, HISTORY_CAPACITY, MIN_BAR_HEIGHT_PCT};
pub use lending::{
    annual_borrow_interest, annual_lending_return, health_factor, max_borrowable, HealthFactor,
    LendingError, LendingPool, BORROW_SPREAD_PCT, COLLATERAL_FACTOR,
};
pub use loan::{
    parse_positive_amount, swap_quote, Loan, LoanDraft, LoanStage, LoanWorkflow, SwapQuote,
    WorkflowConfig, WorkflowError, LEDGER_APPEND_DELAY_MS, LEDGER_DISPLAY_LIMIT,
    SWAP_SETTLE_DELAY_MS,
};
pub use metrics::{
    compare_networks, format_gwei, time_since_update, transfer_cost, wei_to_gwei, FeeLevel,
    GasCost, NetworkComparison, TRANSFER_GAS_LIMIT,
};
pub use monitor::{
    CycleOutcome, FeeMonitor, MonitorConfig, DEFAULT_REFRESH_INTERVAL_MS, MIN_REFRESH_INTERVAL_MS,
};
pub use network::{
    default_endpoint_sets, Endpoint, EndpointError, EndpointSet, NetworkId, ALL_NETWORKS,
    DEFAULT_CONNECT_TIMEOUT_MS, LISK_SEPOLIA_RPC_URLS, SEPOLIA_RPC_URLS,
};
pub use observability::{
    init_logging, log_app_bind, log_app_config, log_app_start, log_monitor_configured,
    logging_config_from_env, LogFormat, LoggingConfig, LoggingInitError,
};
pub use price::{
    parse_eth_usd, CoinGeckoPriceSource, PriceError, PriceSource, PriceTracker, UsdQuote,
    COINGECKO_ETH_USD_URL, MIN_PRICE_REFRESH_MS, PRICE_FETCH_ERROR,
};
pub use rpc::{
    decode_string, decode_uint, parse_fee_reading, parse_quantity, JsonRpcTokenSource,
    JsonRpcTransport, RpcTransportConfig,
};
pub use snapshot::{FeeSnapshot, SnapshotStore};
pub use token::{
    format_units, is_address_shaped, LookupOutcome, TokenError, TokenLookup, TokenLookupState,
    TokenMetadata, TokenMetadataSource, TokenSnapshot, UNKNOWN_TOKEN_ERROR,
};
