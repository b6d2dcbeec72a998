//! Application startup and lifecycle management.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    middleware::from_fn,
    routing::{get, patch, post},
    Router,
};
use secrecy::{ExposeSecret, Secret};
use service_core::error::AppError;
use service_core::middleware::{metrics_middleware, request_id_middleware, REQUEST_ID_HEADER};
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::trace::TraceLayer;

use crate::config::OrderConfig;
use crate::handlers::{self, callbacks, orders};
use crate::services::metrics::init_metrics;
use crate::services::{Database, InvoiceReconciler, XenditClient};
use crate::settlement::{OrderStore, SettlementCoordinator};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: SettlementCoordinator,
    pub store: Arc<dyn OrderStore>,
    pub callback_token: Secret<String>,
}

impl AppState {
    pub fn new(coordinator: SettlementCoordinator, callback_token: Secret<String>) -> Self {
        Self {
            store: coordinator.store().clone(),
            coordinator,
            callback_token,
        }
    }
}

/// Routes plus the request-id, metrics and tracing layers.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics))
        .route(
            "/orders",
            post(orders::create_order).get(orders::list_orders),
        )
        .route("/orders/:id", get(orders::get_order))
        .route("/orders/:id/status", patch(orders::update_status))
        .route("/orders/:id/reprice", post(orders::reprice_order))
        .route("/orders/:id/invoice", post(orders::issue_invoice))
        .route("/callbacks/invoice", post(callbacks::invoice_callback))
        // Route layer so the matched path is known when metrics are labelled.
        .route_layer(from_fn(metrics_middleware))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("unknown");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            }),
        )
        .layer(from_fn(request_id_middleware))
        .with_state(state)
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    state: AppState,
    reconciler: InvoiceReconciler,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: OrderConfig) -> Result<Self, AppError> {
        let database = Database::new(
            config.database.url.expose_secret(),
            config.database.max_connections,
            config.database.min_connections,
        )
        .await
        .map_err(|e| {
            tracing::error!("Failed to connect to PostgreSQL: {}", e);
            e
        })?;

        database.run_migrations().await.map_err(|e| {
            tracing::error!("Failed to run database migrations: {}", e);
            e
        })?;

        init_metrics();

        let invoices = XenditClient::new(config.invoice.clone()).map_err(|e| {
            tracing::error!("Failed to build invoice client: {}", e);
            AppError::ConfigError(e)
        })?;
        if invoices.is_configured() {
            tracing::info!(base_url = %config.invoice.api_base_url, "Invoice client initialized");
        } else {
            tracing::warn!("Invoice secret key not configured - invoice issuance will fail");
        }

        let database = Arc::new(database);
        let coordinator = SettlementCoordinator::new(
            database.clone(),
            database.clone(),
            database,
            Arc::new(invoices),
            config.invoice.settings(),
        );

        let reconciler = InvoiceReconciler::new(config.reconciler.clone(), coordinator.clone());
        let state = AppState::new(coordinator, config.invoice.callback_token.clone());

        let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!("Failed to bind TCP listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!("Order service listening on port {}", port);

        Ok(Self {
            port,
            listener,
            state,
            reconciler,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    /// Serve HTTP and run the invoice reconciler until a shutdown signal.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let reconciler_handle = self.reconciler.start();
        let router = build_router(self.state);

        let result = axum::serve(self.listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await;

        self.reconciler.shutdown();
        if let Some(handle) = reconciler_handle {
            if let Err(e) = handle.await {
                tracing::error!("Invoice reconciler task failed: {}", e);
            }
        }

        tracing::info!("Service shutdown complete");
        result
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
