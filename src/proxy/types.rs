use std::time::Instant;

use rama::http::{Body, Method, Request};

use crate::module::RequestKind;

/// Cache status for request tracking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// Answered without touching the cache (list, rejected methods)
    Pass,
    /// Present on disk before any resolution
    Hit,
    /// Not on disk, even after resolution
    Miss,
    /// Served from disk after the backend fetched it
    Resolved,
    /// Steered to the concrete version the backend resolved
    Redirected,
    Error,
}

impl std::fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheStatus::Pass => write!(f, "pass"),
            CacheStatus::Hit => write!(f, "hit"),
            CacheStatus::Miss => write!(f, "miss"),
            CacheStatus::Resolved => write!(f, "resolved"),
            CacheStatus::Redirected => write!(f, "redirected"),
            CacheStatus::Error => write!(f, "error"),
        }
    }
}

/// Request context for tracking request lifecycle
pub struct RequestContext {
    pub start: Instant,
    pub method: Method,
    pub path: String,
    pub kind: RequestKind,
    pub cache: CacheStatus,
}

impl RequestContext {
    pub fn from_request(req: &Request<Body>) -> Self {
        Self {
            start: Instant::now(),
            method: req.method().clone(),
            path: req.uri().path().to_string(),
            kind: RequestKind::from_path(req.uri().path()),
            cache: CacheStatus::Pass,
        }
    }

    pub fn summary(&self) -> String {
        format!("{} {}", self.method.as_str(), self.path)
    }
}
