use crate::config::Listener as ListenerConfig;
use crate::errors::{StoreError, WidgetError};
use crate::resolver::normalize_path;
use crate::response_cache::{CacheKey, CachedBody, CachedResponse};
use crate::service::{Lookup, Widget};
use axum::{
    Json, Router,
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, Uri, header},
    response::{IntoResponse, Response},
    routing::get,
};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{Duration, SystemTime};
use tokio::net::TcpListener;

const JSON_CONTENT_TYPE: &str = "application/json";
const EXPIRES_AT_HEADER: HeaderName = HeaderName::from_static("memcache-expires-at");

// Terminal outcomes are cached alongside successes.
const CACHEABLE: &[StatusCode] = &[StatusCode::OK, StatusCode::FORBIDDEN, StatusCode::NOT_FOUND];

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub fn router(widget: Widget) -> Router {
    Router::new()
        .route(
            "/{*path}",
            get(get_handler).delete(delete_handler).post(post_handler),
        )
        .with_state(widget)
}

pub async fn serve(listener: &ListenerConfig, widget: Widget) -> Result<(), ApiError> {
    let addr = format!("{}:{}", listener.host, listener.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(addr, "widget api listening");

    axum::serve(listener, router(widget)).await?;
    Ok(())
}

#[derive(Serialize)]
struct ApiErrorResponse {
    error_message: String,
}

#[derive(Deserialize, Debug, Default)]
struct DownloadParams {
    version: Option<String>,
    loader: Option<String>,
}

fn cache_key(headers: &HeaderMap, uri: &Uri) -> CacheKey {
    let host = headers
        .get(header::HOST)
        .and_then(|host| host.to_str().ok())
        .unwrap_or_default();
    let path = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| uri.path());
    CacheKey::new(host, path)
}

fn status_code(err: &WidgetError) -> StatusCode {
    match err {
        WidgetError::UpstreamNotFound => StatusCode::NOT_FOUND,
        WidgetError::UpstreamForbidden => StatusCode::FORBIDDEN,
        WidgetError::UpstreamTransient(_) => StatusCode::INTERNAL_SERVER_ERROR,
        WidgetError::Resolution(_) => StatusCode::NOT_FOUND,
        WidgetError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        WidgetError::QueueFull(_) => StatusCode::SERVICE_UNAVAILABLE,
        WidgetError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

fn error_body(err: &WidgetError) -> Value {
    serde_json::json!({ "error_message": err.to_string() })
}

impl IntoResponse for WidgetError {
    fn into_response(self) -> Response {
        let status = status_code(&self);
        if status.is_server_error() {
            tracing::warn!(error = %self, "request failed");
        }

        let body = Json(ApiErrorResponse {
            error_message: self.to_string(),
        });
        (status, body).into_response()
    }
}

fn insert_header(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        headers.insert(name, value);
    }
}

/// Writes a cached response back out, with its timing headers.
fn replay(ttl: Duration, cached: CachedResponse) -> Response {
    let mut response = match cached.body {
        CachedBody::Json(value) => Json(value).into_response(),
        CachedBody::Bytes(bytes) => Body::from(bytes).into_response(),
    };
    *response.status_mut() =
        StatusCode::from_u16(cached.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    let remaining = cached
        .expires_at
        .duration_since(SystemTime::now())
        .unwrap_or_default();
    let age = ttl.saturating_sub(remaining).as_secs();
    let expires_at =
        DateTime::<Utc>::from(cached.expires_at).to_rfc3339_opts(SecondsFormat::Secs, true);

    let headers = response.headers_mut();
    insert_header(headers, header::CONTENT_TYPE, &cached.content_type);
    insert_header(
        headers,
        header::CACHE_CONTROL,
        &format!("max-age={}, public", ttl.as_secs()),
    );
    headers.insert(header::AGE, HeaderValue::from(age));
    insert_header(headers, EXPIRES_AT_HEADER, &expires_at);
    response
}

async fn lookup_json(
    widget: &Widget,
    path: &str,
    params: &DownloadParams,
) -> Result<Value, WidgetError> {
    let value = match widget.lookup(path).await? {
        Lookup::Project(mut properties) => {
            properties.download = properties
                .select_download(params.version.as_deref(), params.loader.as_deref())
                .cloned();
            serde_json::to_value(&properties)
        }
        Lookup::Author(author) => serde_json::to_value(&author),
    };
    value.map_err(|err| StoreError::Backend(err.to_string()).into())
}

async fn get_handler(
    State(widget): State<Widget>,
    headers: HeaderMap,
    uri: Uri,
    Path(path): Path<String>,
    Query(params): Query<DownloadParams>,
) -> Response {
    let key = cache_key(&headers, &uri);
    let ttl = widget.cache().ttl();
    if let Some(cached) = widget.cache().get(&key) {
        return replay(ttl, cached);
    }

    let (status, body) = match lookup_json(&widget, &path, &params).await {
        Ok(body) => (StatusCode::OK, body),
        Err(err) => {
            let status = status_code(&err);
            if !CACHEABLE.contains(&status) {
                return err.into_response();
            }
            (status, error_body(&err))
        }
    };

    let expires_at = widget.cache().put(
        key,
        status.as_u16(),
        JSON_CONTENT_TYPE,
        CachedBody::Json(body.clone()),
    );
    replay(
        ttl,
        CachedResponse {
            status: status.as_u16(),
            content_type: JSON_CONTENT_TYPE.to_string(),
            body: CachedBody::Json(body),
            expires_at,
        },
    )
}

async fn delete_handler(State(widget): State<Widget>, headers: HeaderMap, uri: Uri) -> StatusCode {
    widget.cache().invalidate(&cache_key(&headers, &uri));
    StatusCode::ACCEPTED
}

async fn post_handler(State(widget): State<Widget>, Path(path): Path<String>) -> Response {
    let Ok(external_id) = normalize_path(&path).parse::<u64>() else {
        let body = Json(ApiErrorResponse {
            error_message: format!("not a project id: {path}"),
        });
        return (StatusCode::BAD_REQUEST, body).into_response();
    };

    match widget.sync_now(external_id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => err.into_response(),
    }
}
