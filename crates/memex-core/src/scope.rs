//! Scope resolution.
//!
//! A scope is the isolation boundary for cache entries and audit rows,
//! normally "the current project". It is derived from the working directory:
//!
//! 1. If the directory lives inside a git repository with an `origin` (or,
//!    failing that, `upstream`) remote, the remote URL is the scope ID.
//! 2. Otherwise the scope ID is the hex SHA-256 of the canonical path.
//!
//! The salt is a SHA-256 digest and is meant to be mixed into any cache-key
//! derivation so identical requests from different projects never collide.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Remotes consulted for a scope ID, in priority order.
const REMOTE_PRIORITY: &[&str] = &["origin", "upstream"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ScopeKind {
    GitRemote,
    PathHash,
}

impl ScopeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScopeKind::GitRemote => "GitRemote",
            ScopeKind::PathHash => "PathHash",
        }
    }
}

impl fmt::Display for ScopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Project boundary for the running process.
///
/// Resolved once at startup and shared read-only by every request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeContext {
    /// Git remote URL, or hex-encoded SHA-256 of the canonical path.
    pub id: String,
    pub kind: ScopeKind,
    /// SHA-256 of `id` for git remotes; the raw path digest for path hashes.
    pub salt: [u8; 32],
}

impl ScopeContext {
    pub fn from_git_remote(url: impl Into<String>) -> Self {
        let id = url.into();
        let salt = sha256(id.as_bytes());
        Self {
            id,
            kind: ScopeKind::GitRemote,
            salt,
        }
    }

    pub fn from_path(canonical: &Path) -> Self {
        let digest = sha256(canonical.as_os_str().as_encoded_bytes());
        Self {
            id: hex::encode(digest),
            kind: ScopeKind::PathHash,
            salt: digest,
        }
    }
}

impl fmt::Display for ScopeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.id, self.kind)
    }
}

#[derive(Debug, Error)]
pub enum ScopeError {
    #[error("failed to canonicalize {}: {source}", path.display())]
    Canonicalize {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Resolve the scope for `directory`.
///
/// Fails only when the directory cannot be canonicalized; every git-related
/// problem falls back to the path hash.
pub fn resolve(directory: impl AsRef<Path>) -> Result<ScopeContext, ScopeError> {
    let directory = directory.as_ref();
    let canonical = directory
        .canonicalize()
        .map_err(|source| ScopeError::Canonicalize {
            path: directory.to_path_buf(),
            source,
        })?;

    let scope = match git_remote_url(&canonical) {
        Some(url) => ScopeContext::from_git_remote(url),
        None => ScopeContext::from_path(&canonical),
    };

    debug!(scope_id = %scope.id, kind = %scope.kind, "scope resolved");
    Ok(scope)
}

fn git_remote_url(path: &Path) -> Option<String> {
    let repo = match git2::Repository::discover(path) {
        Ok(repo) => repo,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "no git repository for scope");
            return None;
        }
    };

    REMOTE_PRIORITY.iter().find_map(|name| {
        let remote = repo.find_remote(name).ok()?;
        remote.url().filter(|url| !url.is_empty()).map(str::to_string)
    })
}

fn sha256(bytes: &[u8]) -> [u8; 32] {
    Sha256::digest(bytes).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_origin_remote_wins() {
        let dir = TempDir::new().unwrap();
        let repo = git2::Repository::init(dir.path()).unwrap();
        repo.remote("upstream", "https://github.com/example/upstream.git")
            .unwrap();
        repo.remote("origin", "https://github.com/example/repo.git")
            .unwrap();

        let scope = resolve(dir.path()).unwrap();
        assert_eq!(scope.kind, ScopeKind::GitRemote);
        assert_eq!(scope.id, "https://github.com/example/repo.git");
        assert_eq!(
            scope.salt,
            sha256(b"https://github.com/example/repo.git")
        );
    }

    #[test]
    fn test_upstream_remote_fallback() {
        let dir = TempDir::new().unwrap();
        let repo = git2::Repository::init(dir.path()).unwrap();
        repo.remote("upstream", "git@github.com:example/upstream.git")
            .unwrap();

        let scope = resolve(dir.path()).unwrap();
        assert_eq!(scope.kind, ScopeKind::GitRemote);
        assert_eq!(scope.id, "git@github.com:example/upstream.git");
        assert_eq!(scope.salt, sha256(scope.id.as_bytes()));
    }

    #[test]
    fn test_other_remotes_are_ignored() {
        let dir = TempDir::new().unwrap();
        let repo = git2::Repository::init(dir.path()).unwrap();
        repo.remote("fork", "https://github.com/someone/fork.git")
            .unwrap();

        let scope = resolve(dir.path()).unwrap();
        assert_eq!(scope.kind, ScopeKind::PathHash);
    }

    #[test]
    fn test_nested_directory_finds_repository() {
        let dir = TempDir::new().unwrap();
        let repo = git2::Repository::init(dir.path()).unwrap();
        repo.remote("origin", "https://github.com/example/repo.git")
            .unwrap();
        let nested = dir.path().join("src").join("deep");
        std::fs::create_dir_all(&nested).unwrap();

        let scope = resolve(&nested).unwrap();
        assert_eq!(scope.kind, ScopeKind::GitRemote);
        assert_eq!(scope.id, "https://github.com/example/repo.git");
    }

    #[test]
    fn test_path_hash_without_repository() {
        let dir = TempDir::new().unwrap();
        let canonical = dir.path().canonicalize().unwrap();
        let digest = sha256(canonical.as_os_str().as_encoded_bytes());

        let scope = resolve(dir.path()).unwrap();
        assert_eq!(scope.kind, ScopeKind::PathHash);
        assert_eq!(scope.id, hex::encode(digest));
        assert_eq!(scope.salt, digest);
        assert_eq!(scope.id.len(), 64);
    }

    #[test]
    fn test_path_hash_is_deterministic() {
        let dir = TempDir::new().unwrap();
        let first = resolve(dir.path()).unwrap();
        let second = resolve(dir.path()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_relative_and_absolute_forms_agree() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("a");
        std::fs::create_dir_all(&nested).unwrap();

        let direct = resolve(&nested).unwrap();
        let dotted = resolve(nested.join("..").join("a")).unwrap();
        assert_eq!(direct.id, dotted.id);
    }

    #[test]
    fn test_missing_directory_is_an_error() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("does-not-exist");
        let err = resolve(&missing).unwrap_err();
        assert!(matches!(err, ScopeError::Canonicalize { .. }));
        assert!(err.to_string().contains("does-not-exist"));
    }

    #[test]
    fn test_display() {
        let scope = ScopeContext::from_git_remote("https://example.com/r.git");
        assert_eq!(scope.to_string(), "https://example.com/r.git (GitRemote)");
    }
}
