use rama::http::{Body, Request, header};
use tracing::{info, warn};

use crate::{
    module::{CoordinateError, ModuleCoordinate, RequestKind, escape_version, module_prefix},
    resolver::DownloadEvent,
};

const FORWARDED_PROTO: &str = "x-forwarded-proto";

/// `https:` when the client reached us over TLS, either directly (absolute
/// request URI) or through a terminating proxy that sets `X-Forwarded-Proto`.
pub fn request_scheme(req: &Request<Body>) -> &'static str {
    let forwarded_https = req
        .headers()
        .get(FORWARDED_PROTO)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .is_some_and(|proto| proto.trim().eq_ignore_ascii_case("https"));

    if forwarded_https || req.uri().scheme_str() == Some("https") {
        "https:"
    } else {
        "http:"
    }
}

pub fn request_host(req: &Request<Body>) -> Option<String> {
    req.headers()
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .filter(|host| !host.is_empty())
        .map(str::to_owned)
        .or_else(|| req.uri().authority().map(|authority| authority.to_string()))
}

/// First download of the effective module at a version other than the one
/// requested, in stderr order.
pub fn find_drift<'a>(
    downloads: &'a [DownloadEvent],
    effective_path: &str,
    requested_version: &str,
) -> Option<&'a DownloadEvent> {
    downloads
        .iter()
        .find(|event| event.module_path == effective_path && event.version != requested_version)
}

pub fn canonical_location(
    scheme: &str,
    host: &str,
    prefix: &str,
    version: &str,
    suffix: &str,
) -> Result<String, CoordinateError> {
    let version = escape_version(version)?;
    Ok(format!("{scheme}//{host}{prefix}/@v/{version}{suffix}"))
}

/// Location to steer the client to, when the backend resolved the requested
/// artifact to a different version. `/@latest` has no file suffix to carry
/// over and is never redirected.
pub fn version_redirect(
    req: &Request<Body>,
    url_path: &str,
    kind: RequestKind,
    requested: &ModuleCoordinate,
    effective_path: &str,
    downloads: &[DownloadEvent],
) -> Option<String> {
    let suffix = kind.suffix()?;
    let drift = find_drift(downloads, effective_path, &requested.version)?;
    let prefix = module_prefix(url_path)?;

    let Some(host) = request_host(req) else {
        warn!(
            module = %requested.path,
            resolved = %drift.version,
            "request carries no host, cannot redirect to resolved version"
        );
        return None;
    };

    match canonical_location(request_scheme(req), &host, prefix, &drift.version, suffix) {
        Ok(location) => {
            info!(
                module = %requested.path,
                requested = %requested.version,
                resolved = %drift.version,
                %location,
                "redirecting to resolved version"
            );
            Some(location)
        }
        Err(err) => {
            warn!(error = %err, module = %requested.path, "cannot build redirect location");
            None
        }
    }
}
