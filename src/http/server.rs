//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Build the shared, read-only application state
//! - Create the Axum router with all handlers
//! - Wire up middleware (request id, tracing, timeout, body limit, access log)
//! - Serve until the shutdown signal, then drain

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderName;
use axum::{middleware, Router};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::BffConfig;
use crate::device::{DeviceClassifier, PatternClassifier};
use crate::error::StartupError;
use crate::http::middleware::access_log_middleware;
use crate::http::routes;
use crate::request::Forwarder;
use crate::security::{CsrfSigner, FingerprintBuilder, HmacCsrfSigner};
use crate::templates::TemplateEngine;

/// Request id header set on the way in and echoed on the way out.
pub const X_REQUEST_ID: &str = "x-request-id";

/// Application state injected into handlers. Everything here is built once
/// at startup and never mutated.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<BffConfig>,
    pub forwarder: Arc<Forwarder>,
    pub templates: Arc<dyn TemplateEngine>,
    pub csrf: Arc<dyn CsrfSigner>,
    pub classifier: Arc<dyn DeviceClassifier>,
    pub fingerprint: Arc<FingerprintBuilder>,
}

impl AppState {
    pub fn new(config: BffConfig, templates: Arc<dyn TemplateEngine>) -> Result<Self, StartupError> {
        let forwarder = Forwarder::new(&config.api, &config.timeouts)?;
        let csrf = HmacCsrfSigner::from_config(&config.csrf)?;
        let classifier = PatternClassifier::from_config(&config.device)?;
        let fingerprint = FingerprintBuilder::from_config(&config.fingerprint);

        Ok(Self {
            config: Arc::new(config),
            forwarder: Arc::new(forwarder),
            templates,
            csrf: Arc::new(csrf),
            classifier: Arc::new(classifier),
            fingerprint: Arc::new(fingerprint),
        })
    }
}

/// HTTP server for the web frontend.
pub struct BffServer {
    router: Router,
    config: Arc<BffConfig>,
}

impl BffServer {
    /// Create a new server with the given configuration and view engine.
    pub fn new(config: BffConfig, templates: Arc<dyn TemplateEngine>) -> Result<Self, StartupError> {
        let state = AppState::new(config, templates)?;
        let config = state.config.clone();
        let router = Self::build_router(state);
        Ok(Self { router, config })
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(state: AppState) -> Router {
        let request_id = HeaderName::from_static(X_REQUEST_ID);
        let config = state.config.clone();

        routes::routes()
            .layer(middleware::from_fn_with_state(state.clone(), access_log_middleware))
            .with_state(state)
            .layer(RequestBodyLimitLayer::new(config.security.max_body_size))
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(PropagateRequestIdLayer::new(request_id.clone()))
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::new(request_id, MakeRequestUuid))
    }

    /// Run the server, accepting connections on the given listener until
    /// `shutdown` fires.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            web = %self.config.web_base(),
            api = %self.config.api.host,
            "HTTP server starting"
        );

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &BffConfig {
        &self.config
    }
}
