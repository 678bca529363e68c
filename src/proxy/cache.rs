use anyhow::{Context, Result, anyhow};
use artery_adapter::FilesystemStorage;
use rama::http::{Body, Response, StatusCode, header};
use tokio::io::AsyncReadExt;

use super::response::respond_text;

/// Serves a file from the download cache, or 404 when there is none.
pub async fn serve_static(
    storage: &FilesystemStorage,
    path: &str,
    head_only: bool,
) -> Result<Response<Body>> {
    let Some(mut handle) = storage.open_read(path).await? else {
        return respond_text(StatusCode::NOT_FOUND, "not found\n");
    };

    let mut data = Vec::new();
    if !head_only {
        data.reserve(handle.size as usize);
        handle
            .file
            .read_to_end(&mut data)
            .await
            .with_context(|| format!("reading cached file {}", handle.path.display()))?;
    }

    build_static_response(path, handle.size, data)
}

fn build_static_response(path: &str, size: u64, data: Vec<u8>) -> Result<Response<Body>> {
    let mut builder = Response::builder().status(StatusCode::OK);
    {
        let headers = builder
            .headers_mut()
            .ok_or_else(|| anyhow!("failed to get headers for cached response"))?;
        headers.insert(
            header::CONTENT_LENGTH,
            header::HeaderValue::from_str(&size.to_string())?,
        );
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static(content_type(path)),
        );
        // A published module version never changes; everything else (list
        // files, arbitrary paths) may.
        if is_versioned_artifact(path) {
            headers.insert(
                header::CACHE_CONTROL,
                header::HeaderValue::from_static("public, max-age=31536000"),
            );
        }
    }

    builder.body(Body::from(data)).map_err(Into::into)
}

fn content_type(path: &str) -> &'static str {
    let name = path.rsplit('/').next().unwrap_or(path);
    match name.rsplit_once('.').map(|(_, ext)| ext) {
        Some("info") => "application/json",
        Some("mod") => "text/plain; charset=utf-8",
        Some("zip") => "application/zip",
        _ if name == "list" => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}

fn is_versioned_artifact(path: &str) -> bool {
    path.contains("/@v/")
        && [".info", ".mod", ".zip"]
            .iter()
            .any(|suffix| path.ends_with(suffix))
}
