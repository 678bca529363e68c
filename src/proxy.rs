mod alias;
mod cache;
mod redirect;
mod response;
mod types;

use std::sync::Arc;

use anyhow::Result;
use percent_encoding::percent_decode_str;
use rama::{
    Service,
    error::BoxError,
    http::{Body, Method, Request, Response, StatusCode},
};
use tracing::{error, info, warn};

use crate::{
    config::Config,
    mirror,
    module::{ModuleCoordinate, ModuleRequest, RequestKind},
    resolver::{GoCommandBackend, ResolutionBackend},
};
use artery_adapter::FilesystemStorage;

// Re-export public types
pub use types::{CacheStatus, RequestContext};

/// Go module proxy: serves the download cache and resolves misses through
/// the configured backend.
pub struct ModuleProxy<B = GoCommandBackend> {
    config: Arc<Config>,
    storage: Arc<FilesystemStorage>,
    backend: Arc<B>,
}

impl<B> Clone for ModuleProxy<B> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            storage: self.storage.clone(),
            backend: self.backend.clone(),
        }
    }
}

impl<B: ResolutionBackend> ModuleProxy<B> {
    pub fn new(config: Arc<Config>, storage: Arc<FilesystemStorage>, backend: B) -> Self {
        Self {
            config,
            storage,
            backend: Arc::new(backend),
        }
    }

    async fn handle(&self, req: Request<Body>, ctx: &mut RequestContext) -> Result<Response<Body>> {
        let method = req.method().clone();
        if method != Method::GET && method != Method::HEAD {
            ctx.cache = CacheStatus::Pass;
            return response::respond_text(StatusCode::METHOD_NOT_ALLOWED, "method not allowed\n");
        }
        let head_only = method == Method::HEAD;

        let Ok(path) = percent_decode_str(req.uri().path()).decode_utf8() else {
            ctx.cache = CacheStatus::Error;
            return response::respond_text(StatusCode::BAD_REQUEST, "invalid path encoding\n");
        };
        let path = path.into_owned();

        if self.storage.exists(&path).await {
            ctx.cache = CacheStatus::Hit;
            return cache::serve_static(&self.storage, &path, head_only).await;
        }

        let request = match ModuleRequest::parse(&path) {
            Ok(request) => request,
            Err(err) => {
                ctx.cache = CacheStatus::Error;
                warn!(error = %err, path = %path, "rejecting module request");
                return response::respond_text(err.status(), &format!("{err}\n"));
            }
        };
        ctx.kind = request.kind;

        if request.kind == RequestKind::List {
            ctx.cache = CacheStatus::Pass;
            return response::respond_empty_list();
        }

        let mut resolved = false;
        if let Some(coordinate) = request
            .coordinate
            .as_ref()
            .filter(|_| request.kind.needs_resolution())
        {
            resolved = true;
            if let Some(location) = self.resolve(&req, &path, request.kind, coordinate).await {
                ctx.cache = CacheStatus::Redirected;
                return response::respond_redirect(&location);
            }
        }

        let resp = cache::serve_static(&self.storage, &path, head_only).await?;
        ctx.cache = match (resp.status() == StatusCode::OK, resolved) {
            (true, true) => CacheStatus::Resolved,
            (true, false) => CacheStatus::Hit,
            (false, _) => CacheStatus::Miss,
        };
        Ok(resp)
    }

    /// Runs the backend for the (mirrored) coordinate, reconciles the cache
    /// layout, and returns a redirect location when the requested version
    /// drifted. Backend failures only get logged: whatever is already cached
    /// under the path must stay servable.
    async fn resolve(
        &self,
        req: &Request<Body>,
        url_path: &str,
        kind: RequestKind,
        requested: &ModuleCoordinate,
    ) -> Option<String> {
        let effective = mirror::effective_path(&self.config.mirrors, &requested.path);
        let mirrored = effective.as_ref() != requested.path;
        if mirrored {
            info!(module = %requested.path, mirror = %effective, "mirror path");
        }
        let target = ModuleCoordinate::new(effective.as_ref(), requested.version.as_str());

        // Detached so a client hanging up does not kill the backend mid-fetch.
        let run = tokio::spawn({
            let backend = self.backend.clone();
            let target = target.clone();
            async move { backend.resolve(&target).await }
        });
        let outcome = match run.await {
            Ok(outcome) => outcome,
            Err(err) => Err(anyhow::Error::new(err).context("resolution task aborted")),
        };

        let location = match outcome {
            Ok(outcome) if outcome.succeeded() => redirect::version_redirect(
                req,
                url_path,
                kind,
                requested,
                &target.path,
                &outcome.downloads,
            ),
            Ok(outcome) => {
                warn!(
                    module = %target,
                    exit = %outcome.exit,
                    stderr = %outcome.stderr,
                    truncated = outcome.stderr_truncated,
                    "resolution backend failed"
                );
                None
            }
            Err(err) => {
                error!(module = %target, error = %format!("{err:#}"), "resolution backend did not run");
                None
            }
        };

        if mirrored {
            alias::link_mirrored(
                &self.storage,
                self.config.storage.link_mode,
                &requested.path,
                &target.path,
            )
            .await;
        }

        location
    }
}

impl<B: ResolutionBackend> Service<Request<Body>> for ModuleProxy<B> {
    type Output = Response<Body>;
    type Error = BoxError;

    async fn serve(&self, req: Request<Body>) -> Result<Self::Output, Self::Error> {
        let mut ctx = RequestContext::from_request(&req);

        let result = self.handle(req, &mut ctx).await;

        match &result {
            Ok(resp) => {
                let response_code = resp.status().as_u16();
                let duration_ms = ctx.start.elapsed().as_millis();
                info!(
                    summary = %ctx.summary(),
                    kind = %ctx.kind,
                    response_code,
                    duration_ms,
                    cache_status = %ctx.cache,
                    "request handled"
                );
            }
            Err(err) => {
                let duration_ms = ctx.start.elapsed().as_millis();
                error!(
                    summary = %ctx.summary(),
                    kind = %ctx.kind,
                    duration_ms,
                    cache_status = %ctx.cache,
                    error = %err,
                    "request failed"
                );
            }
        }

        result.map_err(|e| e.into())
    }
}
