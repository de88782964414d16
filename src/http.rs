//! HTTP routes.
//!
//! ```text
//! GET /thumbnails/{path}?pass=&imagecompress=
//! GET /lossy/{path}?pass=&imagecompress=&original=1   (or x-no-compression)
//! GET /files/{path}?pass=&zip=1
//! GET /stats
//! ```

use std::path::Path as FsPath;
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderValue, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use exn::ResultExt;
use serde::{Deserialize, Serialize};
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::error::{Error, ErrorKind, Result};
use crate::service::{Fetched, Opened, Service, Stats};

const NO_COMPRESSION: &str = "x-no-compression";

#[derive(Debug, Default, Deserialize)]
pub struct Params {
    pub pass: Option<String>,
    pub imagecompress: Option<String>,
    pub original: Option<String>,
    pub zip: Option<String>,
}
impl Params {
    fn is_set(flag: &Option<String>) -> bool {
        flag.as_deref() == Some("1")
    }
}

#[derive(Debug, Serialize)]
struct ListingEntry {
    name: String,
    kind: &'static str,
}

/// An error on its way out as a response.
pub struct Failure(Error);

impl From<Error> for Failure {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for Failure {
    fn into_response(self) -> Response {
        let kind = *self.0;
        match kind {
            ErrorKind::Internal | ErrorKind::Startup => tracing::error!(error = ?self.0, "Request failed"),
            _ => tracing::debug!(error = %self.0, "Request refused"),
        }
        (kind.status(), kind.to_string()).into_response()
    }
}

type Handled = std::result::Result<Response, Failure>;

pub fn router(service: Arc<Service>) -> Router {
    Router::new()
        .route("/thumbnails/{*path}", get(thumbnail))
        .route("/lossy/{*path}", get(lossy))
        .route("/files", get(files_root))
        .route("/files/", get(files_root))
        .route("/files/{*path}", get(files))
        .route("/stats", get(stats))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .with_state(service)
}

async fn thumbnail(State(service): State<Arc<Service>>, Path(path): Path<String>, Query(params): Query<Params>) -> Handled {
    let fetched =
        service.fetch_thumbnail(&path, params.imagecompress.as_deref(), params.pass.as_deref()).await?;
    fetched_response(fetched).await.map_err(Failure)
}

async fn lossy(
    State(service): State<Arc<Service>>,
    Path(path): Path<String>,
    Query(params): Query<Params>,
    headers: HeaderMap,
) -> Handled {
    let original = Params::is_set(&params.original) || headers.contains_key(NO_COMPRESSION);
    let fetched = service
        .fetch_lossy(&path, params.imagecompress.as_deref(), original, params.pass.as_deref())
        .await?;
    fetched_response(fetched).await.map_err(Failure)
}

async fn files_root(State(service): State<Arc<Service>>, Query(params): Query<Params>) -> Handled {
    files_at(&service, "", &params).await.map_err(Failure)
}

async fn files(State(service): State<Arc<Service>>, Path(path): Path<String>, Query(params): Query<Params>) -> Handled {
    files_at(&service, &path, &params).await.map_err(Failure)
}

async fn stats(State(service): State<Arc<Service>>) -> Json<Stats> {
    Json(service.stats())
}

async fn files_at(service: &Service, raw: &str, params: &Params) -> Result<Response> {
    let credential = params.pass.as_deref();
    if Params::is_set(&params.zip) {
        let archive = service.fetch_archive(raw, credential).await?;
        let mut response = stream_file(&archive).await?;
        let name = archive.file_name().map(|name| name.to_string_lossy().into_owned()).unwrap_or_default();
        if let Ok(disposition) = HeaderValue::from_str(&format!("attachment; filename=\"{name}\"")) {
            response.headers_mut().insert(header::CONTENT_DISPOSITION, disposition);
        }
        return Ok(response);
    }
    match service.open(raw, credential).await? {
        Opened::Directory(listed) => {
            let entries: Vec<_> = listed
                .into_iter()
                .map(|entry| ListingEntry { name: entry.name, kind: entry.class.as_str() })
                .collect();
            Ok(Json(entries).into_response())
        },
        Opened::File(path) => stream_file(&path).await,
    }
}

async fn fetched_response(fetched: Fetched) -> Result<Response> {
    match fetched {
        Fetched::Derived(derived) => Ok(([(header::CONTENT_TYPE, derived.content_type)], derived.bytes).into_response()),
        Fetched::Original(path) => stream_file(&path).await,
    }
}

async fn stream_file(path: &FsPath) -> Result<Response> {
    let file = match File::open(path).await {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => exn::bail!(ErrorKind::NotFound),
        Err(err) => return Err(err).or_raise(|| ErrorKind::Internal),
    };
    let meta = file.metadata().await.or_raise(|| ErrorKind::Internal)?;
    if !meta.is_file() {
        exn::bail!(ErrorKind::NotFound);
    }

    let mut response = Body::from_stream(ReaderStream::new(file)).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type(path)));
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(meta.len()));
    Ok(response)
}

fn content_type(path: &FsPath) -> &'static str {
    match trove_storage::extension(path).as_deref() {
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("avif") => "image/avif",
        Some("jxl") => "image/jxl",
        Some("heic") => "image/heic",
        Some("dng") => "image/x-adobe-dng",
        Some("mp3") => "audio/mpeg",
        Some("opus") => "audio/opus",
        Some("ogg") => "audio/ogg",
        Some("wav") => "audio/wav",
        Some("flac") => "audio/flac",
        Some("m4a") => "audio/mp4",
        Some("mp4" | "m4v") => "video/mp4",
        Some("mkv") => "video/x-matroska",
        Some("webm") => "video/webm",
        Some("txt") => "text/plain; charset=utf-8",
        Some("html" | "htm") => "text/html; charset=utf-8",
        Some("json") => "application/json",
        Some("pdf") => "application/pdf",
        Some("zip") => "application/zip",
        _ => "application/octet-stream",
    }
}
