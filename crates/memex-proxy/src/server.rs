use crate::director;
use crate::error::ProxyError;
use crate::flush;
use crate::schema::SchemaDetector;
use crate::transport;
use crate::usage::UsageScanner;
use async_stream::stream;
use axum::body::{Body, HttpBody};
use axum::extract::{Request, State};
use axum::handler::Handler;
use axum::http::header::CONTENT_TYPE;
use axum::http::request::Parts;
use axum::http::{Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use memex_config::ProxyConfig;
use memex_core::{SchemaType, ScopeContext};
use memex_store::{AuditLog, Store};
use std::future::{Future, IntoFuture};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

/// Per-request context, attached by the scope middleware and read downstream.
#[derive(Debug, Clone)]
pub struct RequestMeta {
    pub scope: Option<Arc<ScopeContext>>,
    pub schema: SchemaType,
    pub started: Instant,
}

impl RequestMeta {
    pub fn new(scope: Option<Arc<ScopeContext>>) -> Self {
        Self {
            scope,
            schema: SchemaType::Unknown,
            started: Instant::now(),
        }
    }
}

struct ProxyState {
    client: reqwest::Client,
    detector: SchemaDetector,
    flush_interval: Duration,
    scope: Option<Arc<ScopeContext>>,
    /// Set only when auditing is enabled.
    audit_store: Option<Arc<Store>>,
}

impl ProxyState {
    fn audit_sink(&self, meta: &RequestMeta) -> Option<AuditSink> {
        Some(AuditSink {
            store: self.audit_store.clone()?,
            scope: meta.scope.clone()?,
        })
    }
}

pub struct ProxyServer {
    client: reqwest::Client,
    flush_interval: Duration,
    scope: Option<Arc<ScopeContext>>,
    store: Option<Arc<Store>>,
    audit: bool,
}

impl ProxyServer {
    pub fn new(config: &ProxyConfig, scope: Option<ScopeContext>) -> Result<Self, ProxyError> {
        Ok(Self {
            client: transport::build_client(config)?,
            flush_interval: config.flush_interval,
            scope: scope.map(Arc::new),
            store: None,
            audit: false,
        })
    }

    /// Attach the storage engine. With `audit` set, every completed request
    /// made under a scope appends an audit row.
    pub fn with_store(mut self, store: Arc<Store>, audit: bool) -> Self {
        self.store = Some(store);
        self.audit = audit;
        self
    }

    pub fn router(&self) -> Router {
        let state = Arc::new(ProxyState {
            client: self.client.clone(),
            detector: SchemaDetector::new(),
            flush_interval: self.flush_interval,
            scope: self.scope.clone(),
            audit_store: self.store.clone().filter(|_| self.audit),
        });

        let proxy = proxy_handler.layer(middleware::from_fn_with_state(
            state.clone(),
            attach_request_meta,
        ));

        // Only GET is answered locally; other methods on /healthz are proxied.
        Router::new()
            .route("/healthz", get(health_handler).fallback(proxy.clone()))
            .fallback(proxy)
            .with_state(state)
    }

    /// Serve until `shutdown` resolves, then stop accepting and give in-flight
    /// requests up to `grace` to finish.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F, grace: Duration) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = self.router();
        drop(self);

        let stop = Arc::new(Notify::new());
        let server = axum::serve(listener, app).with_graceful_shutdown({
            let stop = stop.clone();
            async move { stop.notified().await }
        });
        let mut server = std::pin::pin!(server.into_future());

        tokio::select! {
            result = &mut server => return result,
            _ = shutdown => {}
        }

        info!(grace_ms = grace.as_millis() as u64, "shutting down, draining in-flight requests");
        stop.notify_one();

        match tokio::time::timeout(grace, server).await {
            Ok(result) => result,
            Err(_) => {
                warn!("grace period elapsed with requests still in flight");
                Ok(())
            }
        }
    }
}

async fn health_handler() -> &'static str {
    "OK"
}

async fn attach_request_meta(
    State(state): State<Arc<ProxyState>>,
    mut request: Request,
    next: Next,
) -> Response {
    request
        .extensions_mut()
        .insert(RequestMeta::new(state.scope.clone()));
    next.run(request).await
}

async fn proxy_handler(State(state): State<Arc<ProxyState>>, request: Request) -> Response {
    let (mut parts, body) = request.into_parts();
    let mut meta = parts
        .extensions
        .remove::<RequestMeta>()
        .unwrap_or_else(|| RequestMeta::new(state.scope.clone()));
    meta.schema = state.detector.detect(parts.uri.path());

    let method = parts.method.clone();
    let path = parts.uri.path().to_string();
    debug!(method = %method, path = %path, schema = %meta.schema, "request started");

    match forward(&state, &meta, parts, body).await {
        Ok(response) => response,
        Err(e) => {
            error!(error = %e, method = %method, path = %path, "proxy request failed");
            debug!(
                method = %method,
                path = %path,
                schema = %meta.schema,
                status = e.status().as_u16(),
                duration_ms = meta.started.elapsed().as_millis() as u64,
                "request finished"
            );
            e.into_response()
        }
    }
}

async fn forward(
    state: &ProxyState,
    meta: &RequestMeta,
    parts: Parts,
    body: Body,
) -> Result<Response, ProxyError> {
    if parts.method == Method::CONNECT {
        return Err(ProxyError::InvalidTarget {
            target: parts.uri.to_string(),
            reason: "CONNECT tunnels are not supported".to_string(),
        });
    }

    let url = director::resolve_target(&parts.uri, &parts.headers)?;
    let path = parts.uri.path().to_string();
    let mut headers = parts.headers;
    director::sanitize_request_headers(&mut headers);

    let mut outbound = state
        .client
        .request(parts.method.clone(), url)
        .headers(headers);
    if !body.is_end_stream() {
        outbound = outbound.body(reqwest::Body::wrap_stream(body.into_data_stream()));
    }
    let upstream = outbound.send().await?;

    let status = upstream.status();
    let mut headers = upstream.headers().clone();
    director::strip_hop_by_hop(&mut headers);
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    let audit = state.audit_sink(meta);
    let completion = Completion {
        method: parts.method,
        path,
        schema: meta.schema,
        status,
        started: meta.started,
        usage: audit
            .as_ref()
            .and_then(|_| UsageScanner::new(meta.schema, content_type.as_deref())),
        audit,
    };

    let interval = flush::effective_interval(state.flush_interval, content_type.as_deref());
    let body = flush::coalesce(observe(upstream.bytes_stream(), completion), interval);

    let mut response = Response::new(Body::from_stream(body));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    Ok(response)
}

/// Pass upstream chunks through while `completion` watches them. The
/// completion record is dropped, and so finalized, when the client body ends
/// or is abandoned.
fn observe<S>(
    upstream: S,
    mut completion: Completion,
) -> impl Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static
where
    S: Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static,
{
    stream! {
        let mut upstream = Box::pin(upstream);
        while let Some(chunk) = upstream.next().await {
            match chunk {
                Ok(bytes) => {
                    completion.observe(&bytes);
                    yield Ok(bytes);
                }
                Err(e) => {
                    error!(error = %e, path = %completion.path, "upstream body failed mid-stream");
                    yield Err(e);
                    break;
                }
            }
        }
    }
}

struct AuditSink {
    store: Arc<Store>,
    scope: Arc<ScopeContext>,
}

struct Completion {
    method: Method,
    path: String,
    schema: SchemaType,
    status: StatusCode,
    started: Instant,
    usage: Option<UsageScanner>,
    audit: Option<AuditSink>,
}

impl Completion {
    fn observe(&mut self, chunk: &[u8]) {
        if let Some(scanner) = self.usage.as_mut() {
            scanner.observe(chunk);
        }
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        let elapsed = self.started.elapsed();
        debug!(
            method = %self.method,
            path = %self.path,
            schema = %self.schema,
            status = self.status.as_u16(),
            duration_ms = elapsed.as_millis() as u64,
            "request finished"
        );

        let Some(AuditSink { store, scope }) = self.audit.take() else {
            return;
        };
        let usage = self
            .usage
            .take()
            .map(UsageScanner::finish)
            .unwrap_or_default();

        let mut entry = AuditLog {
            timestamp: None,
            scope_id: scope.id.clone(),
            tokens_in: usage.input_tokens,
            tokens_out: usage.output_tokens,
            cost: 0.0,
            latency_ms: i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX),
        };

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(path = %self.path, "no runtime available, audit entry dropped");
            return;
        };
        runtime.spawn_blocking(move || {
            if let Err(e) = store.write_log(&mut entry) {
                error!(error = %e, scope_id = %entry.scope_id, "failed to write audit log");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_meta_starts_unknown() {
        let scope = Arc::new(ScopeContext::from_git_remote("https://github.com/braw-dev/memex"));
        let meta = RequestMeta::new(Some(scope.clone()));
        assert_eq!(meta.schema, SchemaType::Unknown);
        assert_eq!(meta.scope.as_deref(), Some(scope.as_ref()));
    }

    #[test]
    fn test_audit_requires_store_and_scope() {
        let config = ProxyConfig {
            respect_env_proxy: false,
            ..ProxyConfig::default()
        };
        let server = ProxyServer::new(&config, None).unwrap();
        assert!(server.store.is_none());
        assert!(!server.audit);

        let state = ProxyState {
            client: server.client.clone(),
            detector: SchemaDetector::new(),
            flush_interval: Duration::ZERO,
            scope: None,
            audit_store: None,
        };
        assert!(state.audit_sink(&RequestMeta::new(None)).is_none());
    }
}
