//! HTTP surface served by `fictiondl-app`.

use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use serde::Deserialize;
use tokio_util::io::ReaderStream;
use tower_http::trace::TraceLayer;

use crate::batch::{self, BatchReport};
use crate::error::Error;
use crate::formats::{BookDetail, ChapterDetail, ChapterSummary};
use crate::pipeline::{Assembler, DownloadRequest};
use crate::purchase::{self, PurchaseReport};
use crate::queue::JobQueue;
use crate::render::BookFormat;
use crate::tokens::{SweepReport, TokenLog};

#[derive(Clone)]
pub struct AppState {
    assembler: Assembler,
    queue: JobQueue,
}

impl AppState {
    pub fn new(assembler: Assembler, queue: JobQueue) -> Self {
        Self { assembler, queue }
    }

    fn token(&self, token: Option<&str>) -> Result<String, ApiError> {
        self.assembler
            .settings()
            .resolve_token(token)
            .ok_or_else(|| Error::bad_request("token is required").into())
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(welcome))
        .route("/healthz", get(|| async { "ok\n" }))
        .route("/api/getBookDetail/:book_id/:token", get(get_book_detail))
        .route("/api/getChapterDetail/:chapter_id/:token", get(get_chapter_detail))
        .route("/api/getChapterList/:book_id/:token", get(get_chapter_list))
        .route("/api/isAuthenticated/:token", get(is_authenticated))
        .route(
            "/api/getAvailableChapters/:book_id/:token",
            get(get_available_chapters),
        )
        .route("/api/downloadBook/:book_id", get(download_book))
        .route("/api/purchaseBook/:book_id", get(purchase_book))
        .route(
            "/api/purchaseBookToLibrary/:book_id",
            get(purchase_book_to_library),
        )
        .route("/api/generateEbooks", get(generate_ebooks))
        .route("/api/clearTokens", get(clear_tokens))
        .route("/api/regenerateLibraries", get(regenerate_libraries))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Maps [`Error`] onto a JSON error body with the matching status.
#[derive(Debug)]
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.0.status_code();
        if status.is_server_error() {
            tracing::error!(status = %status, error = %self.0, "request failed");
        }
        let body = serde_json::json!({
            "success": false,
            "message": self.0.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DownloadQuery {
    token: Option<String>,
    #[serde(rename = "bookType")]
    book_type: Option<String>,
    #[serde(rename = "isGen")]
    is_gen: Option<String>,
}

async fn welcome() -> String {
    format!("fictiondl {}\n", env!("CARGO_PKG_VERSION"))
}

async fn get_book_detail(
    State(state): State<AppState>,
    Path((book_id, token)): Path<(String, String)>,
) -> ApiResult<Json<BookDetail>> {
    let detail = state.assembler.client().fetch_book(&book_id, &token).await?;
    Ok(Json(detail))
}

async fn get_chapter_detail(
    State(state): State<AppState>,
    Path((chapter_id, token)): Path<(String, String)>,
) -> ApiResult<Json<ChapterDetail>> {
    let detail = state
        .assembler
        .client()
        .fetch_chapter(&chapter_id, &token)
        .await?;
    Ok(Json(detail))
}

async fn get_chapter_list(
    State(state): State<AppState>,
    Path((book_id, token)): Path<(String, String)>,
) -> ApiResult<Json<Vec<ChapterSummary>>> {
    let list = state
        .assembler
        .client()
        .fetch_chapter_list(&book_id, &token)
        .await?;
    Ok(Json(list))
}

async fn is_authenticated(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> ApiResult<Json<bool>> {
    match state.assembler.authorize(&token).await {
        Ok(_) => Ok(Json(true)),
        Err(Error::Unauthorized) => Ok(Json(false)),
        Err(err) => Err(err.into()),
    }
}

async fn get_available_chapters(
    State(state): State<AppState>,
    Path((book_id, token)): Path<(String, String)>,
) -> ApiResult<Json<Vec<ChapterSummary>>> {
    let chapters = state.assembler.available_chapters(&book_id, &token).await?;
    Ok(Json(chapters))
}

async fn download_book(
    State(state): State<AppState>,
    Path(book_id): Path<String>,
    Query(q): Query<DownloadQuery>,
) -> ApiResult<Response> {
    let token = state.token(q.token.as_deref())?;
    let format = match q.book_type.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
        Some(raw) => raw.parse::<BookFormat>().map_err(Error::bad_request)?,
        None => BookFormat::Epub,
    };
    let render = parse_flag(q.is_gen.as_deref(), true)?;

    let request = DownloadRequest {
        book_id: book_id.clone(),
        token,
        format,
        render,
    };

    if !render {
        state.assembler.authorize(&request.token).await?;
        let assembler = state.assembler.clone();
        let job_id = state.queue.submit(format!("refresh {book_id}"), async move {
            assembler
                .download_book(&request)
                .await
                .map(|_| ())
                .map_err(anyhow::Error::from)
        });
        let body = serde_json::json!({
            "success": true,
            "queued": true,
            "jobId": job_id.to_string(),
            "bookId": book_id,
        });
        return Ok((StatusCode::ACCEPTED, Json(body)).into_response());
    }

    let outcome = state.assembler.download_book(&request).await?;
    if !outcome.success {
        return Err(Error::Render(anyhow::anyhow!(outcome.detail)).into());
    }

    let file = tokio::fs::File::open(&outcome.book_path)
        .await
        .map_err(|err| {
            Error::Other(anyhow::Error::new(err).context(format!(
                "open rendered book: {}",
                outcome.book_path.display()
            )))
        })?;
    let body = axum::body::Body::from_stream(ReaderStream::new(file));

    let mut resp = Response::new(body);
    resp.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(format.content_type()),
    );
    let disposition = HeaderValue::from_str(&content_disposition(&outcome.book_name))
        .map_err(|err| Error::Other(anyhow::anyhow!("content disposition header: {err}")))?;
    resp.headers_mut()
        .insert(header::CONTENT_DISPOSITION, disposition);
    Ok(resp)
}

async fn purchase_book(
    State(state): State<AppState>,
    Path(book_id): Path<String>,
    Query(q): Query<TokenQuery>,
) -> ApiResult<Json<PurchaseReport>> {
    let token = state.token(q.token.as_deref())?;
    let report = purchase::purchase_all_chapters(&state.assembler, &book_id, &token).await?;
    Ok(Json(report))
}

async fn purchase_book_to_library(
    State(state): State<AppState>,
    Path(book_id): Path<String>,
    Query(q): Query<TokenQuery>,
) -> ApiResult<Json<PurchaseReport>> {
    let token = state.token(q.token.as_deref())?;
    let report =
        purchase::purchase_all_chapters_to_library(&state.assembler, &book_id, &token).await?;
    Ok(Json(report))
}

async fn generate_ebooks(
    State(state): State<AppState>,
    Query(q): Query<TokenQuery>,
) -> ApiResult<Json<BatchReport>> {
    let token = state.token(q.token.as_deref())?;
    let report = batch::generate_ebooks(&state.assembler, &token).await?;
    Ok(Json(report))
}

async fn clear_tokens(State(state): State<AppState>) -> ApiResult<Json<SweepReport>> {
    let log = TokenLog::new(&state.assembler.settings().token_dir);
    let report = log
        .clear_invalid(state.assembler.client())
        .await
        .map_err(Error::from)?;
    Ok(Json(report))
}

async fn regenerate_libraries(State(state): State<AppState>) -> ApiResult<Json<BatchReport>> {
    let report = batch::regenerate_libraries(&state.assembler).await?;
    Ok(Json(report))
}

fn parse_flag(raw: Option<&str>, default: bool) -> Result<bool, Error> {
    match raw.map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) if v.is_empty() => Ok(default),
        Some(v) if v == "true" || v == "1" => Ok(true),
        Some(v) if v == "false" || v == "0" => Ok(false),
        Some(v) => Err(Error::bad_request(format!("invalid isGen value: {v}"))),
    }
}

/// `attachment` disposition with an ASCII fallback and an RFC 5987 UTF-8 name.
fn content_disposition(file_name: &str) -> String {
    let fallback = file_name
        .chars()
        .map(|c| {
            if c.is_ascii_graphic() && c != '"' && c != '\\' || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect::<String>();
    format!(
        "attachment; filename=\"{fallback}\"; filename*=UTF-8''{}",
        percent_encode_rfc3986(file_name)
    )
}

fn percent_encode_rfc3986(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for &b in input.as_bytes() {
        let is_unreserved = matches!(
            b,
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~'
        );
        if is_unreserved {
            out.push(b as char);
        } else {
            out.push('%');
            out.push_str(&format!("{b:02X}"));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt as _;

    use super::*;
    use crate::config::Settings;
    use crate::test_support::FakeClient;

    fn app(dir: &std::path::Path, default_token: Option<&str>) -> Router {
        let client = Arc::new(
            FakeClient::new()
                .with_user("tok", "reader")
                .with_book("B1", "เรื่องสั้น", &[("a", false), ("b", false), ("c", true)]),
        );
        let settings = Arc::new(Settings {
            download_dir: dir.join("downloads"),
            export_dir: dir.join("exports"),
            token_dir: dir.join("tokens"),
            default_token: default_token.map(str::to_owned),
            ..Settings::default()
        });
        router(AppState::new(
            Assembler::new(client, settings),
            JobQueue::new(1),
        ))
    }

    async fn get(app: Router, uri: &str) -> anyhow::Result<(StatusCode, Response)> {
        let resp = app
            .oneshot(Request::builder().uri(uri).body(Body::empty())?)
            .await?;
        Ok((resp.status(), resp))
    }

    async fn json(resp: Response) -> anyhow::Result<serde_json::Value> {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    #[test]
    fn disposition_carries_utf8_name() {
        assert_eq!(
            content_disposition("ก b.epub"),
            "attachment; filename=\"_ b.epub\"; filename*=UTF-8''%E0%B8%81%20b.epub"
        );
    }

    #[test]
    fn flags_accept_common_spellings() {
        assert!(matches!(parse_flag(None, true), Ok(true)));
        assert!(matches!(parse_flag(Some("FALSE"), true), Ok(false)));
        assert!(matches!(parse_flag(Some("1"), false), Ok(true)));
        assert!(matches!(parse_flag(Some("maybe"), true), Err(Error::BadRequest(_))));
    }

    #[tokio::test]
    async fn healthz_and_welcome() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let (status, _) = get(app(temp.path(), None), "/healthz").await?;
        assert_eq!(status, StatusCode::OK);
        let (status, resp) = get(app(temp.path(), None), "/").await?;
        assert_eq!(status, StatusCode::OK);
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await?;
        assert!(String::from_utf8_lossy(&body).starts_with("fictiondl "));
        Ok(())
    }

    #[tokio::test]
    async fn errors_map_to_status_codes() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;

        let (status, _) = get(app(temp.path(), None), "/api/downloadBook/B1").await?;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = get(app(temp.path(), None), "/api/downloadBook/B1?token=bad").await?;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, resp) = get(app(temp.path(), None), "/api/getBookDetail/NOPE/tok").await?;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(
            json(resp).await?["message"],
            "no book found or invalid authentication code"
        );
        Ok(())
    }

    #[tokio::test]
    async fn download_streams_rendered_book() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let (status, resp) = get(
            app(temp.path(), Some("tok")),
            "/api/downloadBook/B1?bookType=docx&isGen=true",
        )
        .await?;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            resp.headers().get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok()),
            Some(BookFormat::Docx.content_type())
        );
        let disposition = resp
            .headers()
            .get(header::CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_owned();
        assert!(disposition.ends_with(&format!(
            "filename*=UTF-8''{}",
            percent_encode_rfc3986("เรื่องสั้น.docx")
        )));

        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await?;
        assert!(bytes.starts_with(b"PK"));
        Ok(())
    }

    #[tokio::test]
    async fn download_without_generation_is_accepted() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let (status, resp) =
            get(app(temp.path(), None), "/api/downloadBook/B1?token=tok&isGen=false").await?;
        assert_eq!(status, StatusCode::ACCEPTED);
        let body = json(resp).await?;
        assert_eq!(body["queued"], true);
        assert_eq!(body["bookId"], "B1");
        let job_id = body["jobId"].as_str().unwrap_or_default();
        assert!(uuid::Uuid::parse_str(job_id).is_ok(), "jobId {job_id}");
        Ok(())
    }

    #[tokio::test]
    async fn available_chapters_and_auth_check() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let (status, resp) =
            get(app(temp.path(), None), "/api/getAvailableChapters/B1/tok").await?;
        assert_eq!(status, StatusCode::OK);
        let body = json(resp).await?;
        let ids = body
            .as_array()
            .map(|a| a.iter().filter_map(|c| c["_id"].as_str()).collect::<Vec<_>>())
            .unwrap_or_default();
        assert_eq!(ids, ["a", "b"]);

        let (_, resp) = get(app(temp.path(), None), "/api/isAuthenticated/nobody").await?;
        assert_eq!(json(resp).await?, serde_json::json!(false));
        Ok(())
    }

    #[tokio::test]
    async fn auth_check_records_token_log() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let settings = Arc::new(Settings {
            download_dir: temp.path().join("downloads"),
            token_dir: temp.path().join("tokens"),
            save_token_log: true,
            ..Settings::default()
        });
        let client = Arc::new(FakeClient::new().with_user("tok", "reader"));
        let app = router(AppState::new(
            Assembler::new(client, settings),
            JobQueue::new(1),
        ));

        let (status, resp) = get(app.clone(), "/api/isAuthenticated/tok").await?;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json(resp).await?, serde_json::json!(true));
        let logged = std::fs::read_to_string(temp.path().join("tokens/reader.text"))?;
        assert!(logged.ends_with("TOKEN=tok"));

        let (_, resp) = get(app, "/api/isAuthenticated/other").await?;
        assert_eq!(json(resp).await?, serde_json::json!(false));
        Ok(())
    }

    #[tokio::test]
    async fn purchase_returns_report() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let (status, resp) = get(app(temp.path(), None), "/api/purchaseBook/B1?token=tok").await?;
        assert_eq!(status, StatusCode::OK);
        let body = json(resp).await?;
        assert_eq!(body["status"], "completed");
        assert_eq!(body["purchased"], 1);
        assert_eq!(body["halted"], false);
        Ok(())
    }
}
