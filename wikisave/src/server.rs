//! HTTP routes for the managed document and its archive.
//!
//! The document lives at `/`. GET and HEAD report the current fingerprint as
//! `ETag`; PUT replaces the document if `If-Match` (when given) still names
//! the current fingerprint. The archive, when served, is a read-only listing
//! under its own prefix.

use std::io;
use std::net::SocketAddr;
use std::path::Path as FsPath;
use std::sync::Arc;

use askama::Template;
use axum::{
    Router,
    body::{Body, Bytes},
    extract::{Path, State},
    http::{HeaderMap, HeaderName, StatusCode, header},
    response::{Html, IntoResponse, Redirect, Response},
    routing::get,
};
use futures_util::StreamExt;
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};
use wikisave_core::{Archiver, Error, StagedUpload, Wiki};

/// Value of the `Dav` header sent in reply to OPTIONS. Its presence tells
/// browser-side savers that PUT is supported here.
pub const DAV_MARKER: &str = "wikisave";

/// Methods accepted on the document path.
const ALLOWED_METHODS: &str = "GET, HEAD, PUT, OPTIONS";

/// Read size when streaming files to clients.
const READ_CHUNK_SIZE: usize = 64 * 1024;

/// Body chunks buffered between the connection and the staging file.
const UPLOAD_QUEUE_DEPTH: usize = 16;

// ==================
// Errors
// ==================

/// Failure of a single request.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Core(#[from] Error),

    #[error("Failed to receive request body: {0}")]
    Body(#[from] axum::Error),

    #[error("Failed to build response: {0}")]
    Http(#[from] axum::http::Error),

    #[error("Failed to render page: {0}")]
    Render(#[from] askama::Error),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl AppError {
    /// HTTP status for this failure.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Core(Error::PreconditionFailed { .. }) => StatusCode::PRECONDITION_FAILED,
            AppError::Core(Error::InvalidArchiveName { .. })
            | AppError::Core(Error::ArchiveEntryNotFound { .. }) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        match status {
            StatusCode::PRECONDITION_FAILED => info!(error = %self, "save rejected"),
            StatusCode::NOT_FOUND => debug!(error = %self, "not found"),
            _ => error!(error = %self, "request failed"),
        }
        (status, self.to_string()).into_response()
    }
}

/// Run a blocking core operation off the async worker threads.
async fn blocking<T, F>(f: F) -> Result<T, AppError>
where
    F: FnOnce() -> wikisave_core::Result<T> + Send + 'static,
    T: Send + 'static,
{
    Ok(tokio::task::spawn_blocking(f).await??)
}

// ==================
// Router
// ==================

/// Build the router for `wiki`.
///
/// When `archive_prefix` is given and the wiki archives, the archive is
/// browsable read-only under that prefix.
pub fn router(wiki: Arc<Wiki>, archive_prefix: Option<&str>) -> Router {
    let mut router = Router::new()
        .route(
            "/",
            get(get_document)
                .head(head_document)
                .put(put_document)
                .options(options_document),
        )
        .with_state(Arc::clone(&wiki));

    if let (Some(prefix), Some(archiver)) = (archive_prefix, wiki.archiver()) {
        router = router.merge(archive_routes(
            &normalize_prefix(prefix),
            Arc::new(archiver.clone()),
        ));
    }

    router.layer(TraceLayer::new_for_http())
}

/// Read-only routes over the archive directory, mounted at `prefix`.
fn archive_routes(prefix: &str, archiver: Arc<Archiver>) -> Router {
    let mut routes = Router::new()
        .route(prefix, get(list_archive))
        .route(&format!("{}:name", prefix), get(get_archive_entry));

    // `/old` -> `/old/`
    let bare = prefix.trim_end_matches('/');
    if !bare.is_empty() {
        let target = prefix.to_string();
        routes = routes.route(
            bare,
            get(move || {
                let target = target.clone();
                async move { Redirect::permanent(&target) }
            }),
        );
    }

    routes.with_state(archiver)
}

/// Make sure a URL prefix begins and ends with `/`.
pub fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim().trim_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        format!("/{}/", trimmed)
    }
}

/// Serve `router` on `addr` until interrupted.
pub async fn serve(addr: SocketAddr, router: Router) -> io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

// ==================
// Document Handlers
// ==================

fn header_str(headers: &HeaderMap, name: HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
}

/// Report the current fingerprint. Browser-side savers cannot see the ETag of
/// the page they were loaded from, so they ask for it here before saving.
async fn head_document(State(wiki): State<Arc<Wiki>>) -> Result<Response, AppError> {
    let fingerprint = blocking(move || Ok(wiki.current().fingerprint)).await?;
    Ok((StatusCode::OK, [(header::ETAG, fingerprint.etag())]).into_response())
}

async fn options_document() -> impl IntoResponse {
    (
        StatusCode::OK,
        [
            (HeaderName::from_static("dav"), DAV_MARKER),
            (header::ALLOW, ALLOWED_METHODS),
        ],
    )
}

async fn get_document(
    State(wiki): State<Arc<Wiki>>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let accept_encoding = header_str(&headers, header::ACCEPT_ENCODING);
    let if_none_match = header_str(&headers, header::IF_NONE_MATCH);
    let content_type = content_type(&wiki.config().document);
    let vary = wiki.compresses();

    let current = blocking(move || wiki.open_current(accept_encoding.as_deref())).await?;
    let etag = current.fingerprint.etag();

    let mut builder = Response::builder().header(header::ETAG, &etag);
    if vary {
        builder = builder.header(header::VARY, "accept-encoding");
    }

    if if_none_match.is_some_and(|tokens| none_match_hits(&tokens, &etag)) {
        return Ok(builder.status(StatusCode::NOT_MODIFIED).body(Body::empty())?);
    }

    if let Some(encoding) = current.encoding {
        builder = builder.header(header::CONTENT_ENCODING, encoding.token());
    }

    Ok(builder
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CONTENT_LENGTH, current.len)
        .body(file_body(current.file))?)
}

/// Whether an `If-None-Match` value names `etag`.
fn none_match_hits(if_none_match: &str, etag: &str) -> bool {
    if_none_match.split(',').map(str::trim).any(|token| {
        // Weak comparison: `W/"x"` matches `"x"`
        token == "*" || token.strip_prefix("W/").unwrap_or(token) == etag
    })
}

/// Every `If-Match` line joined into one list, or `None` when the header is
/// absent. Undecodable bytes are replaced rather than dropped, so a present
/// but malformed token can never match.
fn if_match(headers: &HeaderMap) -> Option<String> {
    let values: Vec<_> = headers
        .get_all(header::IF_MATCH)
        .iter()
        .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
        .collect();
    (!values.is_empty()).then(|| values.join(", "))
}

async fn put_document(
    State(wiki): State<Arc<Wiki>>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, AppError> {
    let if_match = if_match(&headers);

    info!("receiving upload");
    let staged = stage_body(&wiki, body).await?;
    info!(bytes = staged.len(), "upload received");

    let fingerprint = blocking(move || wiki.save(staged, if_match.as_deref())).await?;
    Ok((StatusCode::OK, [(header::ETAG, fingerprint.etag())]).into_response())
}

/// Stream a request body into a staging file next to the document.
///
/// The body is read on the async side and handed over a bounded channel to a
/// blocking task that writes and hashes it. No lock is held here.
async fn stage_body(wiki: &Arc<Wiki>, body: Body) -> Result<StagedUpload, AppError> {
    let (tx, mut rx) = mpsc::channel::<Bytes>(UPLOAD_QUEUE_DEPTH);

    let writer_wiki = Arc::clone(wiki);
    let writer = tokio::task::spawn_blocking(move || -> wikisave_core::Result<StagedUpload> {
        use std::io::Write;

        let mut staging = writer_wiki.staging()?;
        while let Some(chunk) = rx.blocking_recv() {
            staging.write_all(&chunk).map_err(Error::staging)?;
        }
        staging.finish()
    });

    let mut stream = body.into_data_stream();
    let mut failure = None;
    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(chunk) => {
                // A closed channel means the writer failed; its error is reported below
                if tx.send(chunk).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                failure = Some(e);
                break;
            }
        }
    }
    drop(tx);

    let staged = writer.await??;
    match failure {
        // Dropping the partial upload removes its staging file
        Some(e) => Err(AppError::Body(e)),
        None => Ok(staged),
    }
}

// ==================
// Archive Handlers
// ==================

/// HTML index of archive entries, oldest first.
#[derive(Template)]
#[template(path = "archive_listing.html")]
struct ArchiveListing {
    entries: Vec<String>,
}

async fn list_archive(State(archiver): State<Arc<Archiver>>) -> Result<Html<String>, AppError> {
    let entries = blocking(move || archiver.entries()).await?;
    Ok(Html(ArchiveListing { entries }.render()?))
}

async fn get_archive_entry(
    State(archiver): State<Arc<Archiver>>,
    Path(name): Path<String>,
) -> Result<Response, AppError> {
    let content_type = content_type(FsPath::new(&name));
    let (file, len) = blocking(move || {
        let file = archiver.open_entry(&name)?;
        let len = file.metadata()?.len();
        Ok((file, len))
    })
    .await?;

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CONTENT_LENGTH, len)
        .body(file_body(file))?)
}

// ==================
// Helper Functions
// ==================

/// Content type from a file name, looking past numeric suffixes such as `.1`.
fn content_type(path: &FsPath) -> &'static str {
    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or_default();

    let extension = name
        .rsplit('.')
        .find(|part| !part.is_empty() && !part.bytes().all(|b| b.is_ascii_digit()))
        .filter(|part| *part != name)
        .unwrap_or_default()
        .to_ascii_lowercase();

    match extension.as_str() {
        "html" | "htm" => "text/html; charset=utf-8",
        "txt" => "text/plain; charset=utf-8",
        "json" => "application/json",
        _ => "application/octet-stream",
    }
}

/// Stream an open file as a response body.
fn file_body(file: std::fs::File) -> Body {
    let file = tokio::fs::File::from_std(file);
    let stream = futures_util::stream::try_unfold(file, |mut file| async move {
        let mut buf = vec![0; READ_CHUNK_SIZE];
        let n = file.read(&mut buf).await?;
        buf.truncate(n);
        Ok::<_, io::Error>((n > 0).then(|| (Bytes::from(buf), file)))
    });
    Body::from_stream(stream)
}
