//! HTTP front end of the agent registry.
//!
//! Serves the registry over HTTP/1.1 with hyper and runs the background
//! eviction sweep. Routing is a plain match on method and path segments;
//! unknown paths get 404, known paths with the wrong method get 405, and
//! every error body is `{"detail": "..."}`.

use super::{AgentDescriptor, AgentRegistry};
use crate::config::RegistrySettings;
use chrono::Utc;
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::header::{CONTENT_TYPE, HeaderValue};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use serde_json::{Value, json};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

/// Header carrying the per-request id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Service identity reported by `/`, `/health` and `/stats`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceInfo {
    /// Human-readable title.
    pub title: String,
    /// Service version.
    pub version: String,
    /// One-line description.
    pub description: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            title: "Agent Registry Service".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            description: "Centralized registry for agent discovery and health monitoring".to_string(),
        }
    }
}

type HttpResponse = Response<Full<Bytes>>;

/// Registry HTTP service.
#[derive(Debug)]
pub struct RegistryService {
    registry: Arc<AgentRegistry>,
    settings: RegistrySettings,
    info: ServiceInfo,
}

impl RegistryService {
    /// Creates a service over `registry`.
    #[must_use]
    pub fn new(registry: Arc<AgentRegistry>, settings: RegistrySettings) -> Self {
        Self { registry, settings, info: ServiceInfo::default() }
    }

    /// Returns the underlying registry.
    pub const fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    /// Binds a listener on `addr`.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn bind(addr: SocketAddr) -> std::io::Result<TcpListener> {
        TcpListener::bind(addr).await
    }

    /// Starts the periodic eviction sweep.
    ///
    /// The first sweep runs one interval after start; the task ends when
    /// `shutdown` flips to `true` or its sender is dropped.
    pub fn spawn_cleanup(&self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let registry = Arc::clone(&self.registry);
        let period = self.settings.cleanup_interval();
        let max_age = self.settings.cleanup_max_age();

        tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            info!(interval_secs = period.as_secs(), max_age_secs = max_age.as_secs(), "Registry cleanup task started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = registry.cleanup(max_age).await;
                        debug!(removed, "Registry cleanup sweep finished");
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            info!("Registry cleanup task stopping");
                            break;
                        }
                    }
                }
            }
        })
    }

    /// Accepts connections until `shutdown` flips to `true`.
    ///
    /// # Errors
    ///
    /// Never fails after the listener is bound; accept errors are logged.
    pub async fn serve(
        self: Arc<Self>,
        listener: TcpListener,
        mut shutdown: watch::Receiver<bool>,
    ) -> std::io::Result<()> {
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, "Agent registry service listening");
        }

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let service = Arc::clone(&self);
                            tokio::spawn(async move {
                                let handler = service_fn(move |req| {
                                    let service = Arc::clone(&service);
                                    async move { Ok::<_, Infallible>(service.handle_http(req).await) }
                                });
                                if let Err(e) = http1::Builder::new()
                                    .serve_connection(TokioIo::new(stream), handler)
                                    .await
                                {
                                    debug!(%peer, error = %e, "Connection closed with error");
                                }
                            });
                        }
                        Err(e) => error!(error = %e, "Error accepting connection"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Shutdown signal received, stopping registry service");
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Handles one HTTP request, logging it under a request-id span.
    pub async fn handle_http(&self, req: Request<Incoming>) -> HttpResponse {
        let request_id = Uuid::new_v4().to_string();
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        let span = info_span!("request", request_id = %request_id, method = %method, path = %path);

        async move {
            let started = Instant::now();
            let body = match req.into_body().collect().await {
                Ok(collected) => collected.to_bytes(),
                Err(e) => {
                    warn!(error = %e, "Failed to read request body");
                    Bytes::new()
                }
            };

            let (status, payload) = self.route(&method, &path, &body).await;
            info!(
                status = status.as_u16(),
                duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                "Request handled"
            );
            json_response(status, &payload, &request_id)
        }
        .instrument(span)
        .await
    }

    /// Routes a request to the matching registry operation.
    ///
    /// # Returns
    /// The status code and JSON body to send back
    pub async fn route(&self, method: &Method, path: &str, body: &[u8]) -> (StatusCode, Value) {
        let decoded: Result<Vec<_>, _> =
            path.trim_matches('/').split('/').filter(|s| !s.is_empty()).map(urlencoding::decode).collect();
        let Ok(decoded) = decoded else {
            return detail(StatusCode::BAD_REQUEST, "Path is not valid percent-encoded UTF-8");
        };
        let segments: Vec<&str> = decoded.iter().map(AsRef::as_ref).collect();

        match (method, segments.as_slice()) {
            (&Method::GET, []) => (StatusCode::OK, self.root()),
            (&Method::GET, ["health"]) => (StatusCode::OK, self.health().await),
            (&Method::POST, ["register"]) => self.register(body).await,
            (&Method::GET, ["discover"]) => self.discover().await,
            (&Method::GET, ["stats"]) => (StatusCode::OK, self.stats().await),
            (&Method::POST, ["heartbeat", agent_id]) => self.heartbeat(agent_id).await,
            (&Method::GET, ["agents", agent_id]) => self.get_agent(agent_id).await,
            (&Method::DELETE, ["agents", agent_id]) => self.unregister(agent_id).await,
            (_, [] | ["health" | "register" | "discover" | "stats"] | ["heartbeat" | "agents", _]) => {
                detail(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed")
            }
            _ => detail(StatusCode::NOT_FOUND, "Not found"),
        }
    }

    fn root(&self) -> Value {
        json!({
            "service": self.info.title,
            "version": self.info.version,
            "description": self.info.description,
            "endpoints": {
                "register": "POST /register",
                "discover": "GET /discover",
                "heartbeat": "POST /heartbeat/{agent_id}",
                "get_agent": "GET /agents/{agent_id}",
                "unregister": "DELETE /agents/{agent_id}",
                "stats": "GET /stats",
                "health": "GET /health",
            }
        })
    }

    async fn health(&self) -> Value {
        json!({
            "status": "healthy",
            "service": "agent-registry",
            "version": self.info.version,
            "registry_enabled": self.registry.is_enabled().await,
        })
    }

    async fn register(&self, body: &[u8]) -> (StatusCode, Value) {
        let descriptor: AgentDescriptor = match serde_json::from_slice(body) {
            Ok(descriptor) => descriptor,
            Err(e) => {
                return detail(StatusCode::BAD_REQUEST, &format!("Invalid agent descriptor: {e}"));
            }
        };

        let agent_id = descriptor.agent_id.clone();
        let name = descriptor.name.clone();
        if !self.registry.register(descriptor).await {
            return detail(StatusCode::INTERNAL_SERVER_ERROR, "Failed to register agent");
        }

        info!(agent_id = %agent_id, name = %name, "Agent registered via API");
        (
            StatusCode::OK,
            json!({
                "status": "registered",
                "agent_id": agent_id,
                "message": format!("Agent {name} successfully registered"),
            }),
        )
    }

    async fn discover(&self) -> (StatusCode, Value) {
        if !self.registry.is_enabled().await {
            return detail(StatusCode::INTERNAL_SERVER_ERROR, "Registry store unavailable");
        }
        let agents = self.registry.discover().await;
        let total = agents.len();
        (StatusCode::OK, json!({ "agents": agents, "total": total }))
    }

    async fn stats(&self) -> Value {
        json!({
            "registry_stats": self.registry.stats().await,
            "service_info": self.info,
        })
    }

    async fn heartbeat(&self, agent_id: &str) -> (StatusCode, Value) {
        if !self.registry.heartbeat(agent_id).await {
            return detail(StatusCode::NOT_FOUND, &format!("Agent {agent_id} not found"));
        }
        (
            StatusCode::OK,
            json!({
                "status": "received",
                "agent_id": agent_id,
                "timestamp": Utc::now().to_rfc3339(),
            }),
        )
    }

    async fn get_agent(&self, agent_id: &str) -> (StatusCode, Value) {
        match self.registry.get(agent_id).await {
            Some(agent) => (StatusCode::OK, json!(agent)),
            None => detail(StatusCode::NOT_FOUND, &format!("Agent {agent_id} not found")),
        }
    }

    async fn unregister(&self, agent_id: &str) -> (StatusCode, Value) {
        if !self.registry.unregister(agent_id).await {
            return detail(StatusCode::NOT_FOUND, &format!("Agent {agent_id} not found"));
        }
        (StatusCode::OK, json!({ "status": "unregistered", "agent_id": agent_id }))
    }
}

fn detail(status: StatusCode, message: &str) -> (StatusCode, Value) {
    (status, json!({ "detail": message }))
}

fn json_response(status: StatusCode, payload: &Value, request_id: &str) -> HttpResponse {
    let bytes = serde_json::to_vec(payload).unwrap_or_default();
    let mut response = Response::new(Full::new(Bytes::from(bytes)));
    *response.status_mut() = status;
    response.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if let Ok(value) = HeaderValue::from_str(request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}
