//! Shared types for the memex proxy.
//!
//! - [`ScopeContext`]: the isolation boundary every cache entry and audit row
//!   is partitioned by, derived once per process by [`resolve_scope`].
//! - [`SchemaType`]: the AI-provider wire format inferred for a request.
//! - [`Sensitive`]: a wrapper that keeps secrets out of log output.

pub mod schema;
pub mod scope;
pub mod sensitive;

pub use schema::SchemaType;
pub use scope::{resolve as resolve_scope, ScopeContext, ScopeError, ScopeKind};
pub use sensitive::{Sensitive, REDACTED};
