//! memex proxy - scope-isolated forward proxy for AI provider APIs.
//!
//! Every request passes through the same pipeline:
//! - the scope middleware attaches a [`RequestMeta`] carrying the project scope,
//! - the handler classifies the path into a provider schema,
//! - the director resolves the upstream URL and strips hop-by-hop headers,
//! - the pooled client forwards it and the body is streamed back under the
//!   configured flush policy,
//! - when a store is attached, token usage and latency land in the audit log
//!   once the response stream ends.
//!
//! Transport failures become `502 Bad Gateway`. `GET /healthz` bypasses the
//! pipeline.

pub mod director;
pub mod error;
pub mod flush;
pub mod schema;
pub mod server;
pub mod transport;
pub mod usage;

pub use error::ProxyError;
pub use schema::SchemaDetector;
pub use server::{ProxyServer, RequestMeta};
pub use usage::{TokenUsage, UsageScanner};
