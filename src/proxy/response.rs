use anyhow::Result;
use rama::http::{Body, Response, StatusCode, header};

/// Responds with plain text
pub fn respond_text(status: StatusCode, body: &str) -> Result<Response<Body>> {
    Response::builder()
        .status(status)
        .header(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("text/plain; charset=utf-8"),
        )
        .body(Body::from(body.to_owned()))
        .map_err(Into::into)
}

/// Answers `/@v/list` with "no versions known".
pub fn respond_empty_list() -> Result<Response<Body>> {
    Response::builder()
        .status(StatusCode::OK)
        .header(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("text/plain; charset=utf-8"),
        )
        .header(header::CONTENT_LENGTH, header::HeaderValue::from_static("0"))
        .header(header::CACHE_CONTROL, header::HeaderValue::from_static("no-store"))
        .body(Body::empty())
        .map_err(Into::into)
}

/// 302 Found pointing at `location`
pub fn respond_redirect(location: &str) -> Result<Response<Body>> {
    let body = format!("<a href=\"{location}\">Found</a>.\n");
    Response::builder()
        .status(StatusCode::FOUND)
        .header(header::LOCATION, header::HeaderValue::from_str(location)?)
        .header(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("text/html; charset=utf-8"),
        )
        .header(header::CACHE_CONTROL, header::HeaderValue::from_static("no-store"))
        .body(Body::from(body))
        .map_err(Into::into)
}
