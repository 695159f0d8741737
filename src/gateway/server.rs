use crate::core::config::{Credential, GatewayConfig};
use crate::core::errors::ExchangeError;
use crate::core::kernel::ws::WsConfig;
use crate::core::traits::ExchangeConnector;
use crate::exchanges::kraken::{build_connector, ChannelRegistry, KrakenUpstreamFactory};
use crate::gateway::manager::{SessionManager, SessionSettings};
use crate::gateway::router::EventRouter;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, Query, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Browser dev server allowed through CORS in development
const DEV_ORIGIN: &str = "http://localhost:3000";

/// Shared state for the HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<SessionManager>,
    pub connector: Arc<dyn ExchangeConnector>,
    pub max_message_size: usize,
}

impl AppState {
    pub fn new(
        manager: Arc<SessionManager>,
        connector: Arc<dyn ExchangeConnector>,
        max_message_size: usize,
    ) -> Self {
        Self {
            manager,
            connector,
            max_message_size,
        }
    }

    /// Wire up the production graph: REST connector, upstream factory,
    /// channel registry, event router and session manager.
    pub fn from_config(
        config: &GatewayConfig,
        credential: Option<Arc<Credential>>,
    ) -> Result<Self, ExchangeError> {
        let connector = build_connector(config.rest_base_url.clone(), credential)?;

        let ws_config = WsConfig {
            message_buffer_size: config.event_capacity,
            ..WsConfig::default()
        };
        let factory = Arc::new(KrakenUpstreamFactory::new(config.ws_url.clone(), ws_config));
        let router =
            EventRouter::with_default_handlers(factory, ChannelRegistry::with_default_channels());
        let manager = SessionManager::new(router, SessionSettings::from_config(config));

        Ok(Self::new(
            manager,
            Arc::new(connector),
            config.max_message_size,
        ))
    }
}

/// HTTP surface: the session socket and the REST passthrough routes
pub fn router(state: AppState, development: bool) -> Router {
    let app = Router::new()
        .route("/ws", get(ws_handler))
        .route("/api/chart", get(chart_handler))
        .route("/api/balance", get(balance_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    if development {
        app.layer(
            CorsLayer::new()
                .allow_origin(HeaderValue::from_static(DEV_ORIGIN))
                .allow_headers([header::ORIGIN, header::CONTENT_TYPE, header::ACCEPT]),
        )
    } else {
        app
    }
}

/// Serve `app` until `shutdown` resolves. Peer addresses are kept so the
/// socket route can identify sessions.
pub async fn serve<F>(listener: TcpListener, app: Router, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "Gateway listening");
    }
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> Response {
    let manager = Arc::clone(&state.manager);
    // One session per client address
    let identity = peer.ip().to_string();
    ws.max_message_size(state.max_message_size)
        .on_upgrade(move |socket| async move { manager.serve(identity, socket).await })
}

#[derive(Debug, Deserialize)]
struct ChartQuery {
    pair: Option<String>,
    interval: Option<String>,
}

async fn chart_handler(
    State(state): State<AppState>,
    Query(query): Query<ChartQuery>,
) -> Response {
    let Some(pair) = query.pair.filter(|pair| !pair.is_empty()) else {
        return (StatusCode::BAD_REQUEST, "pair is required").into_response();
    };
    let Some(interval) = query.interval.filter(|interval| !interval.is_empty()) else {
        return (StatusCode::BAD_REQUEST, "interval is required").into_response();
    };
    let Ok(interval) = interval.parse::<u16>() else {
        return (StatusCode::BAD_REQUEST, "interval needs to be an integer").into_response();
    };

    match state.connector.get_ohlc(&pair, interval).await {
        Ok(candles) => Json(candles).into_response(),
        Err(e) => {
            error!(%pair, interval, error = %e, "OHLC request failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "failed getting ohlc data").into_response()
        }
    }
}

async fn balance_handler(State(state): State<AppState>) -> Response {
    match state.connector.get_balance().await {
        Ok(balances) => Json(balances).into_response(),
        Err(e) => {
            error!(error = %e, "Balance request failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "failed getting balance").into_response()
        }
    }
}
