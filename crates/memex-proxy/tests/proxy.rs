use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::HeaderMap;
use axum::routing::{any, get, post};
use axum::Router;
use bytes::Bytes;
use futures::StreamExt;
use memex_config::ProxyConfig;
use memex_core::ScopeContext;
use memex_proxy::ProxyServer;
use memex_store::Store;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::time::timeout;

type SeenHeaders = Arc<Mutex<Option<HeaderMap>>>;

fn test_config() -> ProxyConfig {
    ProxyConfig {
        upstream_timeout: Duration::from_secs(5),
        idle_timeout: Duration::from_secs(5),
        respect_env_proxy: false,
        ..ProxyConfig::default()
    }
}

async fn spawn(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

async fn spawn_proxy(server: ProxyServer) -> SocketAddr {
    spawn(server.router()).await
}

fn proxied_client(proxy: SocketAddr) -> reqwest::Client {
    let proxy = reqwest::Proxy::http(format!("http://{proxy}"))
        .unwrap()
        .basic_auth("memex-user", "memex-secret");
    reqwest::Client::builder().proxy(proxy).build().unwrap()
}

fn direct_client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

async fn echo(State(seen): State<SeenHeaders>, headers: HeaderMap, body: String) -> ([(&'static str, &'static str); 1], String) {
    *seen.lock().unwrap() = Some(headers);
    ([("x-response", "yes")], format!("hello {body}"))
}

#[tokio::test]
async fn test_forwards_and_strips_proxy_headers() {
    let seen: SeenHeaders = Arc::default();
    let upstream = spawn(
        Router::new()
            .route("/v1/echo", post(echo))
            .with_state(seen.clone()),
    )
    .await;
    let proxy = spawn_proxy(ProxyServer::new(&test_config(), None).unwrap()).await;

    let response = proxied_client(proxy)
        .post(format!("http://{upstream}/v1/echo"))
        .header("x-test", "1")
        .body("world")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["x-response"], "yes");
    assert_eq!(response.text().await.unwrap(), "hello world");

    let headers = seen.lock().unwrap().clone().unwrap();
    assert_eq!(headers["x-test"], "1");
    assert_eq!(headers["host"], upstream.to_string().as_str());
    assert!(headers.get("proxy-authorization").is_none());
    assert!(headers.get("proxy-connection").is_none());
}

#[tokio::test]
async fn test_origin_form_request_uses_host_header() {
    let seen: SeenHeaders = Arc::default();
    let upstream = spawn(
        Router::new()
            .route("/v1/echo", post(echo))
            .with_state(seen.clone()),
    )
    .await;
    let proxy = spawn_proxy(ProxyServer::new(&test_config(), None).unwrap()).await;

    let response = direct_client()
        .post(format!("http://{proxy}/v1/echo"))
        .header("host", upstream.to_string())
        .body("origin")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "hello origin");
}

#[tokio::test]
async fn test_healthz_is_served_locally() {
    let proxy = spawn_proxy(ProxyServer::new(&test_config(), None).unwrap()).await;

    let response = direct_client()
        .get(format!("http://{proxy}/healthz"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "OK");
}

#[tokio::test]
async fn test_non_get_healthz_is_forwarded() {
    let upstream = spawn(Router::new().route("/healthz", any(|| async { "UPSTREAM" }))).await;
    let proxy = spawn_proxy(ProxyServer::new(&test_config(), None).unwrap()).await;

    let response = proxied_client(proxy)
        .post(format!("http://{upstream}/healthz"))
        .body("{}")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "UPSTREAM");
}

#[tokio::test]
async fn test_unreachable_upstream_is_bad_gateway() {
    let closed = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let proxy = spawn_proxy(ProxyServer::new(&test_config(), None).unwrap()).await;

    let response = proxied_client(proxy)
        .get(format!("http://{closed}/v1/messages"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 502);
    assert_eq!(response.text().await.unwrap(), "Bad Gateway");
}

#[tokio::test]
async fn test_request_without_host_is_bad_gateway() {
    let proxy = spawn_proxy(ProxyServer::new(&test_config(), None).unwrap()).await;

    let mut stream = TcpStream::connect(proxy).await.unwrap();
    stream
        .write_all(b"GET /v1/messages HTTP/1.0\r\n\r\n")
        .await
        .unwrap();
    let mut raw = Vec::new();
    timeout(Duration::from_secs(5), stream.read_to_end(&mut raw))
        .await
        .unwrap()
        .unwrap();

    let raw = String::from_utf8_lossy(&raw);
    assert!(raw.contains(" 502 "), "unexpected response: {raw}");
    assert!(raw.ends_with("Bad Gateway"));
}

#[tokio::test]
async fn test_event_stream_is_flushed_before_upstream_finishes() {
    let release = Arc::new(Notify::new());
    let upstream_release = release.clone();
    let upstream = spawn(Router::new().route(
        "/v1/messages",
        post(move || {
            let release = upstream_release.clone();
            async move {
                let events = async_stream::stream! {
                    yield Ok::<_, Infallible>(Bytes::from("event: ping\ndata: {\"type\":\"ping\"}\n\n"));
                    release.notified().await;
                    yield Ok(Bytes::from("event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n"));
                };
                ([(CONTENT_TYPE, "text/event-stream")], Body::from_stream(events))
            }
        }),
    ))
    .await;

    // A long flush interval must not delay server-sent events.
    let config = ProxyConfig {
        flush_interval: Duration::from_secs(30),
        ..test_config()
    };
    let proxy = spawn_proxy(ProxyServer::new(&config, None).unwrap()).await;

    let mut response = proxied_client(proxy)
        .post(format!("http://{upstream}/v1/messages"))
        .body("{}")
        .send()
        .await
        .unwrap();

    let first = timeout(Duration::from_secs(5), response.chunk())
        .await
        .expect("first event should arrive while the upstream is still open")
        .unwrap()
        .unwrap();
    assert!(first.starts_with(b"event: ping"));

    release.notify_one();
    let mut rest = Vec::new();
    while let Some(chunk) = response.chunk().await.unwrap() {
        rest.extend_from_slice(&chunk);
    }
    assert!(String::from_utf8_lossy(&rest).contains("message_stop"));
}

async fn collect_body(State(first): State<mpsc::UnboundedSender<Bytes>>, body: Body) -> String {
    let mut chunks = body.into_data_stream();
    let mut received = Vec::new();
    while let Some(Ok(chunk)) = chunks.next().await {
        if received.is_empty() {
            let _ = first.send(chunk.clone());
        }
        received.extend_from_slice(&chunk);
    }
    String::from_utf8_lossy(&received).into_owned()
}

#[tokio::test]
async fn test_request_body_reaches_upstream_before_client_finishes() {
    let (first_tx, mut first_rx) = mpsc::unbounded_channel();
    let upstream = spawn(
        Router::new()
            .route("/v1/messages", post(collect_body))
            .with_state(first_tx),
    )
    .await;
    let proxy = spawn_proxy(ProxyServer::new(&test_config(), None).unwrap()).await;

    let release = Arc::new(Notify::new());
    let client_release = release.clone();
    let body = async_stream::stream! {
        yield Ok::<_, Infallible>(Bytes::from("part1"));
        client_release.notified().await;
        yield Ok(Bytes::from("part2"));
    };
    let request = tokio::spawn(
        proxied_client(proxy)
            .post(format!("http://{upstream}/v1/messages"))
            .body(reqwest::Body::wrap_stream(body))
            .send(),
    );

    let first = timeout(Duration::from_secs(5), first_rx.recv())
        .await
        .expect("upstream should see the first chunk while the client is still sending")
        .unwrap();
    assert_eq!(first, "part1");

    release.notify_one();
    let response = request.await.unwrap().unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "part1part2");
}

#[tokio::test]
async fn test_cleartext_upstream_is_spoken_to_over_http1() {
    let upstream = spawn(Router::new().route(
        "/v1/version",
        get(|request: Request| async move { format!("{:?}", request.version()) }),
    ))
    .await;
    let proxy = spawn_proxy(ProxyServer::new(&test_config(), None).unwrap()).await;

    let response = proxied_client(proxy)
        .get(format!("http://{upstream}/v1/version"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.text().await.unwrap(), "HTTP/1.1");
}

#[tokio::test]
async fn test_upstream_timeout_is_bad_gateway() {
    let upstream = spawn(Router::new().route(
        "/v1/messages",
        post(|| async {
            tokio::time::sleep(Duration::from_secs(3)).await;
            "too late"
        }),
    ))
    .await;
    let config = ProxyConfig {
        upstream_timeout: Duration::from_millis(200),
        ..test_config()
    };
    let proxy = spawn_proxy(ProxyServer::new(&config, None).unwrap()).await;

    let response = timeout(
        Duration::from_secs(2),
        proxied_client(proxy)
            .post(format!("http://{upstream}/v1/messages"))
            .body("{}")
            .send(),
    )
    .await
    .expect("proxy should give up before the upstream answers")
    .unwrap();

    assert_eq!(response.status(), 502);
    assert_eq!(response.text().await.unwrap(), "Bad Gateway");
}

async fn anthropic_upstream() -> SocketAddr {
    spawn(Router::new().route(
        "/v1/messages",
        post(|| async {
            (
                [(CONTENT_TYPE, "application/json")],
                r#"{"id":"msg_1","type":"message","content":[],"usage":{"input_tokens":12,"output_tokens":34}}"#,
            )
        }),
    ))
    .await
}

#[tokio::test]
async fn test_completed_request_is_audited() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(Store::open(dir.path().join(".memex")).unwrap());
    let scope = ScopeContext::from_git_remote("git@github.com:braw-dev/memex.git");
    let scope_id = scope.id.clone();

    let upstream = anthropic_upstream().await;
    let server = ProxyServer::new(&test_config(), Some(scope))
        .unwrap()
        .with_store(store.clone(), true);
    let proxy = spawn_proxy(server).await;

    let response = proxied_client(proxy)
        .post(format!("http://{upstream}/v1/messages"))
        .body(r#"{"model":"claude","messages":[]}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    response.bytes().await.unwrap();

    let mut logs = Vec::new();
    for _ in 0..100 {
        logs = store.audit_logs_for_scope(&scope_id, 10).unwrap();
        if !logs.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].scope_id, scope_id);
    assert_eq!(logs[0].tokens_in, 12);
    assert_eq!(logs[0].tokens_out, 34);
    assert_eq!(logs[0].cost, 0.0);
    assert!(logs[0].latency_ms >= 0);
    assert!(logs[0].timestamp.is_some());
}

#[tokio::test]
async fn test_audit_disabled_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(Store::open(dir.path()).unwrap());
    let scope = ScopeContext::from_git_remote("https://github.com/braw-dev/memex");
    let scope_id = scope.id.clone();

    let upstream = anthropic_upstream().await;
    let server = ProxyServer::new(&test_config(), Some(scope))
        .unwrap()
        .with_store(store.clone(), false);
    let proxy = spawn_proxy(server).await;

    proxied_client(proxy)
        .post(format!("http://{upstream}/v1/messages"))
        .body("{}")
        .send()
        .await
        .unwrap()
        .bytes()
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(store.audit_logs_for_scope(&scope_id, 10).unwrap().is_empty());
}

#[tokio::test]
async fn test_serve_stops_on_shutdown_signal() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();

    let server = ProxyServer::new(&test_config(), None).unwrap();
    let handle = tokio::spawn(server.serve(
        listener,
        async move {
            let _ = stop_rx.await;
        },
        Duration::from_secs(1),
    ));

    {
        let client = direct_client();
        let response = client.get(format!("http://{addr}/healthz")).send().await.unwrap();
        assert_eq!(response.text().await.unwrap(), "OK");
    }

    stop_tx.send(()).unwrap();
    timeout(Duration::from_secs(5), handle)
        .await
        .expect("server should stop within the grace period")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_in_flight_request_completes_during_shutdown() {
    let upstream = spawn(Router::new().route(
        "/v1/slow",
        get(|| async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            "late"
        }),
    ))
    .await;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let server = ProxyServer::new(&test_config(), None).unwrap();
    let handle = tokio::spawn(server.serve(
        listener,
        async move {
            let _ = stop_rx.await;
        },
        Duration::from_secs(5),
    ));

    let request = tokio::spawn(async move {
        proxied_client(addr)
            .get(format!("http://{upstream}/v1/slow"))
            .send()
            .await?
            .text()
            .await
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    stop_tx.send(()).unwrap();

    assert_eq!(request.await.unwrap().unwrap(), "late");
    timeout(Duration::from_secs(5), handle)
        .await
        .expect("server should stop once the request has drained")
        .unwrap()
        .unwrap();
}
