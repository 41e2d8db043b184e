use std::path::Path;
use std::sync::Arc;

use axum::{
    Json, Router,
    body::Body,
    extract::{DefaultBodyLimit, Multipart, Path as UrlPath, State},
    http::{HeaderMap, HeaderValue, Method, Request, StatusCode, header},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;
use tower::ServiceExt;
use tower_http::{
    services::{ServeDir, ServeFile},
    trace::TraceLayer,
};
use tracing::{error, warn};

use crate::cache::{DirectoryRole, ImageLibrary, JpegThumbnailer, ThumbnailCache};
use crate::config::AppConfig;
use crate::error::GalleryError;
use crate::uploads::{IncomingFile, SystemClock, UploadIngestor, UploadOutcome};

const GALLERY_HTML: &str = include_str!("../templates/gallery.html");

pub const LAST_UPLOAD_COOKIE: &str = "last_upload";
const UPLOAD_FIELD: &str = "files";

#[derive(Clone)]
pub struct AppState {
    pub library: Arc<ImageLibrary>,
    pub thumbnails: Arc<ThumbnailCache>,
    pub ingestor: Arc<UploadIngestor>,
}

impl AppState {
    pub fn from_config(config: &AppConfig) -> Self {
        let library = Arc::new(ImageLibrary::new(
            config.dataset_dir.clone(),
            config.uploads_dir.clone(),
        ));
        let thumbnails = Arc::new(ThumbnailCache::new(
            library.clone(),
            Arc::new(JpegThumbnailer::new(config.thumbnail)),
            config.thumbnail_naming,
        ));
        let ingestor = Arc::new(UploadIngestor::new(
            library.clone(),
            thumbnails.clone(),
            Arc::new(SystemClock),
        ));
        Self {
            library,
            thumbnails,
            ingestor,
        }
    }
}

pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    let uploads = ServeDir::new(state.library.root(DirectoryRole::Uploads));
    let originals =
        ServeDir::new(state.library.root(DirectoryRole::Dataset)).fallback(uploads.clone());
    Router::new()
        .route("/", get(gallery_page))
        .route("/api/images", get(list_images))
        .route("/api/last-upload", get(last_upload))
        .route("/thumbs/{which}/{*filename}", get(serve_thumbnail))
        .route(
            "/upload",
            post(handle_upload).layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .nest_service("/images", originals)
        .nest_service("/uploads", uploads)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Serialize)]
struct GalleryListing {
    dataset: Vec<String>,
    uploads: Vec<String>,
}

#[derive(Serialize)]
struct UploadResponse {
    saved: Vec<String>,
    results: Vec<UploadOutcome>,
}

#[derive(Serialize)]
struct LastUploadResponse {
    role: DirectoryRole,
    filename: String,
    image_url: String,
    thumbnail_url: String,
}

fn json_error(status: StatusCode, message: &str) -> Response {
    (status, Json(ErrorResponse { error: message.to_string() })).into_response()
}

fn not_found() -> Response {
    (StatusCode::NOT_FOUND, "Not found").into_response()
}

/// Streams `path` with `ServeFile`, so range and conditional headers of
/// the incoming request are honoured.
async fn serve_file(path: &Path, method: &Method, headers: &HeaderMap) -> Response {
    let mut request = Request::new(Body::empty());
    *request.method_mut() = method.clone();
    *request.headers_mut() = headers.clone();
    match ServeFile::new(path).oneshot(request).await {
        Ok(response) => response.into_response(),
        Err(never) => match never {},
    }
}

pub async fn gallery_page() -> Html<&'static str> {
    Html(GALLERY_HTML)
}

pub async fn list_images(State(state): State<AppState>) -> Response {
    let dataset = state.library.list_images(DirectoryRole::Dataset).await;
    let uploads = state.library.list_images(DirectoryRole::Uploads).await;
    match (dataset, uploads) {
        (Ok(dataset), Ok(uploads)) => Json(GalleryListing { dataset, uploads }).into_response(),
        (Err(err), _) | (_, Err(err)) => {
            error!("listing images failed: {err}");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "listing images failed")
        }
    }
}

/// Thumbnail for `which`/`filename`, or the original when no thumbnail
/// can be produced.
pub async fn serve_thumbnail(
    State(state): State<AppState>,
    UrlPath((which, filename)): UrlPath<(String, String)>,
    method: Method,
    headers: HeaderMap,
) -> Response {
    let Some(role) = DirectoryRole::from_url_segment(&which) else {
        return not_found();
    };
    let thumbnail = match state.thumbnails.get_or_create(role, &filename).await {
        Ok(thumbnail) => thumbnail,
        Err(GalleryError::SourceNotFound(_) | GalleryError::InvalidFilename(_)) => {
            return not_found();
        }
        Err(err) => {
            error!("thumbnail lookup failed: {err}");
            return json_error(StatusCode::INTERNAL_SERVER_ERROR, "thumbnail lookup failed");
        }
    };

    if let Some(path) = thumbnail.path() {
        let response = serve_file(path, &method, &headers).await;
        if response.status() != StatusCode::NOT_FOUND {
            return response;
        }
        warn!(thumbnail = %path.display(), "thumbnail vanished, serving original");
    }
    serve_file(thumbnail.source(), &method, &headers).await
}

pub async fn handle_upload(State(state): State<AppState>, mut multipart: Multipart) -> Response {
    let mut files = Vec::new();
    loop {
        match multipart.next_field().await {
            Ok(Some(field)) => {
                if field.name() != Some(UPLOAD_FIELD) {
                    continue;
                }
                let Some(file_name) = field
                    .file_name()
                    .map(str::to_string)
                    .filter(|name| !name.is_empty())
                else {
                    continue;
                };
                match field.bytes().await {
                    Ok(data) => files.push(IncomingFile::new(file_name, data.to_vec())),
                    Err(err) => {
                        return json_error(
                            StatusCode::BAD_REQUEST,
                            &format!("reading file failed: {err}"),
                        );
                    }
                }
            }
            Ok(None) => break,
            Err(err) => {
                return json_error(
                    StatusCode::BAD_REQUEST,
                    &format!("reading form failed: {err}"),
                );
            }
        }
    }

    let role = DirectoryRole::Uploads;
    let report = state.ingestor.ingest(role, files).await;
    let saved = report.saved();
    let last = report.last_saved().map(str::to_string);
    let mut response = Json(UploadResponse {
        saved,
        results: report.results,
    })
    .into_response();

    if let Some(last) = last {
        let cookie = format!(
            "{LAST_UPLOAD_COOKIE}={}/{last}; Path=/; HttpOnly; SameSite=Lax",
            role.url_segment()
        );
        match HeaderValue::from_str(&cookie) {
            Ok(value) => {
                response.headers_mut().insert(header::SET_COOKIE, value);
            }
            Err(err) => warn!("last upload cookie not set: {err}"),
        }
    }
    response
}

/// The most recent upload of this browser, remembered in a cookie.
pub async fn last_upload(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some((role, filename)) = read_last_upload_cookie(&headers) else {
        return json_error(StatusCode::NOT_FOUND, "no recent upload");
    };
    if state.library.resolve_source(role, &filename).await.is_err() {
        return json_error(StatusCode::NOT_FOUND, "recent upload no longer exists");
    }
    Json(LastUploadResponse {
        role,
        image_url: format!("/{}/{filename}", role.url_segment()),
        thumbnail_url: format!("/thumbs/{}/{filename}", role.url_segment()),
        filename,
    })
    .into_response()
}

fn read_last_upload_cookie(headers: &HeaderMap) -> Option<(DirectoryRole, String)> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == LAST_UPLOAD_COOKIE)
        .and_then(|(_, value)| {
            let (segment, filename) = value.split_once('/')?;
            let role = DirectoryRole::from_url_segment(segment)?;
            Some((role, filename.to_string()))
        })
}
