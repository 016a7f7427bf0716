use std::sync::Arc;

use gaswatch::{
    app_config_from_env, dashboard_router, default_endpoint_sets, init_logging, log_app_bind,
    log_app_config, log_app_start, log_monitor_configured, logging_config_from_env, AppState,
    CoinGeckoPriceSource, EndpointSet, FeeMonitor, JsonRpcTokenSource, JsonRpcTransport,
    LoanWorkflow, MonitorConfig, NetworkId, PriceTracker, RpcTransportConfig, TokenLookup,
    WorkflowConfig,
};

const PRICE_REQUEST_TIMEOUT_MS: u64 = 8_000;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging_cfg = logging_config_from_env();
    init_logging(&logging_cfg)?;
    log_app_start(&logging_cfg);

    let cfg = app_config_from_env()?;
    log_app_config(&cfg);

    let price_source = CoinGeckoPriceSource::new(cfg.price_url.clone(), PRICE_REQUEST_TIMEOUT_MS)?;
    let endpoints = default_endpoint_sets();
    log_monitor_configured(&endpoints, cfg.auto_refresh, cfg.refresh_interval_ms);
    let monitor = Arc::new(FeeMonitor::with_price(
        endpoints,
        Arc::new(JsonRpcTransport::new(RpcTransportConfig::default())),
        MonitorConfig {
            refresh_interval_ms: cfg.refresh_interval_ms,
            ..MonitorConfig::default()
        },
        PriceTracker::new(Arc::new(price_source)),
    ));

    let token_endpoint = EndpointSet::defaults_for(NetworkId::LiskSepolia)
        .primary()
        .clone();
    let tokens = TokenLookup::new(Arc::new(JsonRpcTokenSource::new(
        JsonRpcTransport::new(RpcTransportConfig::default()),
        token_endpoint,
    )));
    let loans = Arc::new(LoanWorkflow::new(
        cfg.wallet_address.clone(),
        WorkflowConfig::new(cfg.swap_rate),
    ));

    if cfg.auto_refresh {
        monitor.start(cfg.refresh_interval_ms);
    } else {
        // One cycle so the dashboard has readings before the first manual refresh.
        tokio::join!(monitor.refresh_now(), monitor.refresh_price());
    }

    let app = dashboard_router(AppState::new(
        Arc::clone(&monitor),
        tokens,
        loans,
        cfg.wallet_address,
    ));
    let listener = tokio::net::TcpListener::bind(cfg.addr).await?;
    let bound_addr = listener.local_addr()?;

    log_app_bind(bound_addr);
    axum::serve(listener, app).await?;

    Ok(())
}
