//! Shared utilities for integration tests.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::body::Bytes;
use axum::extract::Request;
use axum::http::{header, HeaderMap, Method, StatusCode};
use axum::response::IntoResponse;
use axum::Router;
use serde_json::{Map, Value};
use tokio::net::TcpListener;

use web_bff::config::BffConfig;
use web_bff::templates::{TemplateEngine, TemplateError};
use web_bff::{BffServer, Shutdown};

/// A request as the mock upstream saw it.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: Method,
    pub path_and_query: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Recorded {
    pub fn path(&self) -> &str {
        self.path_and_query
            .split_once('?')
            .map_or(self.path_and_query.as_str(), |(path, _)| path)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

pub type Log = Arc<Mutex<Vec<Recorded>>>;

/// Start an upstream on an ephemeral port. `respond` maps each request to
/// `(status, json body)`.
pub async fn start_upstream<F>(respond: F) -> (SocketAddr, Log)
where
    F: Fn(&Recorded) -> (u16, String) + Send + Sync + 'static,
{
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let respond = Arc::new(respond);

    let app = Router::new().fallback({
        let log = log.clone();
        move |request: Request| {
            let log = log.clone();
            let respond = respond.clone();
            async move {
                let (parts, body) = request.into_parts();
                let body = axum::body::to_bytes(body, usize::MAX)
                    .await
                    .unwrap_or_default();
                let recorded = Recorded {
                    method: parts.method,
                    path_and_query: parts
                        .uri
                        .path_and_query()
                        .map(|pq| pq.to_string())
                        .unwrap_or_default(),
                    headers: parts.headers,
                    body,
                };

                let (status, text) = (respond.as_ref())(&recorded);
                log.lock().unwrap().push(recorded);

                (
                    StatusCode::from_u16(status).unwrap(),
                    [(header::CONTENT_TYPE, "application/json")],
                    text,
                )
                    .into_response()
            }
        }
    });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, log)
}

/// Renders `<name>\n<view model json>`.
pub struct EchoTemplates;

impl TemplateEngine for EchoTemplates {
    fn render(&self, name: &str, view: &Map<String, Value>) -> Result<Vec<u8>, TemplateError> {
        Ok(format!("{name}\n{}", serde_json::to_string(view)?).into_bytes())
    }
}

/// Split an [`EchoTemplates`] page into view name and view model.
pub fn view_of(page: &str) -> (String, Value) {
    let (name, json) = page.split_once('\n').expect("echo page");
    (name.to_string(), serde_json::from_str(json).expect("view model json"))
}

/// A running frontend. Dropping it stops the server.
pub struct Bff {
    pub addr: SocketAddr,
    shutdown: Shutdown,
}

impl Bff {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for Bff {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

/// Config pointing both upstream hosts at `upstream`.
pub fn config_for(upstream: SocketAddr) -> BffConfig {
    let mut config = BffConfig::default();
    config.dev_mode = true;
    config.api.host = upstream.to_string();
    config.api.image_host = upstream.to_string();
    config.api.app_token = "app-token".to_string();
    config.timeouts.upstream_secs = 5;
    config
}

/// Serve the frontend on an ephemeral port. The web domain is set to the
/// bound address so requests from the test client count as first-party.
pub async fn start_bff(mut config: BffConfig) -> Bff {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    config.web.domain = addr.to_string();

    let server = BffServer::new(config, Arc::new(EchoTemplates)).unwrap();
    let shutdown = Shutdown::new();
    let rx = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, rx).await;
    });

    Bff {
        addr,
        shutdown,
    }
}

/// Client that does not follow redirects.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .no_proxy()
        .build()
        .unwrap()
}
