use crate::error::ProxyError;
use memex_config::ProxyConfig;
use std::time::Duration;

/// Idle keep-alive connections retained per upstream host.
pub const POOL_MAX_IDLE_PER_HOST: usize = 100;
/// Bounds the TCP dial plus the TLS handshake.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
pub const TCP_KEEPALIVE: Duration = Duration::from_secs(30);

/// Build the process-wide upstream client.
///
/// Redirects are handed back to the caller untouched. TLS handshakes offer
/// `h2` and `http/1.1` over ALPN (the `native-tls-alpn` feature), so HTTPS
/// upstreams that accept it are spoken to over HTTP/2; cleartext upstreams
/// stay on HTTP/1.1. A zero `upstream_timeout` or `idle_timeout` disables
/// that bound.
pub fn build_client(config: &ProxyConfig) -> Result<reqwest::Client, ProxyError> {
    let mut builder = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
        .connect_timeout(CONNECT_TIMEOUT)
        .tcp_keepalive(TCP_KEEPALIVE);

    if !config.idle_timeout.is_zero() {
        builder = builder.pool_idle_timeout(config.idle_timeout);
    } else {
        builder = builder.pool_idle_timeout(None);
    }

    if !config.upstream_timeout.is_zero() {
        builder = builder.timeout(config.upstream_timeout);
    }

    if !config.respect_env_proxy {
        builder = builder.no_proxy();
    }

    Ok(builder.build()?)
}
