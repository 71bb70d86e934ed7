use anyhow::{ensure, Result};
use axum::extract::Request;
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::http::HeaderValue;
use axum::middleware::{from_fn, Next};
use axum::response::{Html, Response};
use axum::routing::get_service;
use axum::Router;
use std::path::{Path, PathBuf};
use tower_http::services::{ServeDir, ServeFile};

const PLACEHOLDER_PAGE: &str = r#"<!doctype html>
<html lang="en">
  <head>
    <meta charset="utf-8" />
    <title>Meter Dashboard</title>
  </head>
  <body style="font-family: system-ui; margin: 2rem">
    <h1>Meter Dashboard</h1>
    <p>The charts are not bundled with this server. Point <code>--static-root</code> or
      <code>DASHBOARD_STATIC_ROOT</code> at the built front end.</p>
    <ul>
      <li><a href="/healthz">/healthz</a></li>
      <li><a href="/api/openapi.json">/api/openapi.json</a></li>
    </ul>
  </body>
</html>
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CachePolicy {
    /// Fingerprinted bundle output under `/static/`.
    Immutable,
    /// HTML shell; must pick up new bundle names on the next load.
    NoStore,
    Daily,
}

impl CachePolicy {
    fn for_asset(path: &str, content_type: &str) -> Self {
        if path.starts_with("/static/") {
            Self::Immutable
        } else if content_type.starts_with("text/html") {
            Self::NoStore
        } else {
            Self::Daily
        }
    }

    fn header_value(self) -> HeaderValue {
        HeaderValue::from_static(match self {
            Self::Immutable => "public, max-age=31536000, immutable",
            Self::NoStore => "no-store",
            Self::Daily => "public, max-age=86400",
        })
    }
}

async fn cache_headers(req: Request, next: Next) -> Response {
    let path = req.uri().path().to_owned();
    let mut response = next.run(req).await;
    if !response.headers().contains_key(CACHE_CONTROL) {
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();
        let policy = CachePolicy::for_asset(&path, content_type);
        response
            .headers_mut()
            .insert(CACHE_CONTROL, policy.header_value());
    }
    response
}

fn front_end(root: &Path) -> Result<Router> {
    ensure!(root.is_dir(), "static root {} is not a directory", root.display());
    // Client-side routes like /visualization resolve to the shell page.
    let assets = ServeDir::new(root)
        .append_index_html_on_directories(true)
        .not_found_service(ServeFile::new(root.join("index.html")));
    Ok(Router::new()
        .fallback_service(get_service(assets))
        .layer(from_fn(cache_headers)))
}

fn placeholder() -> Router {
    Router::new().fallback(|| async { Html(PLACEHOLDER_PAGE) })
}

/// Fallback for everything outside `/api` and `/healthz`.
pub fn service(static_root: Option<PathBuf>) -> Result<Router> {
    match static_root {
        Some(root) => front_end(&root),
        None => Ok(placeholder()),
    }
}
