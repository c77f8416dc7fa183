use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::config::Settings;
use crate::error::{Error, Result};
use crate::formats::{BookDetail, ChapterDetail, ChapterSummary, LibraryPage, UserProfile};
use crate::graphql;

#[async_trait]
pub trait ContentClient: Send + Sync {
    async fn fetch_book(&self, book_id: &str, token: &str) -> Result<BookDetail>;

    /// Chapter list with `order` assigned from list position (1-based).
    async fn fetch_chapter_list(&self, book_id: &str, token: &str) -> Result<Vec<ChapterSummary>>;

    async fn fetch_chapter(&self, chapter_id: &str, token: &str) -> Result<ChapterDetail>;

    /// `Ok(None)` when the token does not identify a user.
    async fn fetch_current_user(&self, token: &str) -> Result<Option<UserProfile>>;

    async fn authenticate(&self, token: &str) -> Result<bool> {
        if token.trim().is_empty() {
            return Ok(false);
        }
        Ok(self.fetch_current_user(token).await?.is_some())
    }

    /// Single attempt; `Ok(false)` when the platform returns no data.
    async fn purchase_chapter(&self, chapter_id: &str, amount: u64, token: &str) -> Result<bool>;

    async fn fetch_library_page(&self, token: &str, after: Option<&str>) -> Result<LibraryPage>;

    /// Follows the library cursor until the last page.
    async fn fetch_library_book_ids(&self, token: &str) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = self.fetch_library_page(token, cursor.as_deref()).await?;
            ids.extend(page.book_ids);
            match page.next_cursor {
                Some(next) if cursor.as_deref() != Some(next.as_str()) => cursor = Some(next),
                _ => break,
            }
        }
        Ok(ids)
    }

    async fn fetch_cover(&self, url: &str) -> Result<Vec<u8>>;
}

pub fn assign_orders(mut chapters: Vec<ChapterSummary>) -> Vec<ChapterSummary> {
    for (idx, chapter) in chapters.iter_mut().enumerate() {
        chapter.order = u32::try_from(idx + 1).unwrap_or(u32::MAX);
    }
    chapters
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Retry {
    Idempotent,
    Never,
}

#[derive(Debug, Clone)]
pub struct GraphqlClient {
    http: reqwest::Client,
    endpoint: String,
    max_attempts: u32,
    retry_delay: Duration,
}

impl GraphqlClient {
    pub fn new(settings: &Settings) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(settings.request_timeout())
            .user_agent(concat!("fictiondl/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("build http client")?;
        Ok(Self {
            http,
            endpoint: settings.api_url.clone(),
            max_attempts: settings.max_attempts.max(1),
            retry_delay: settings.retry_delay(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        query: &str,
        variables: serde_json::Value,
        token: &str,
        retry: Retry,
    ) -> Result<Option<T>> {
        let body = serde_json::json!({ "query": query, "variables": variables });
        let attempts = match retry {
            Retry::Idempotent => self.max_attempts,
            Retry::Never => 1,
        };

        let mut attempt = 1u32;
        let (status, raw) = loop {
            match self.post_once(&body, token).await {
                Ok(response) => break response,
                Err(err) if err.is_transient() && attempt < attempts => {
                    tracing::warn!(
                        operation,
                        attempt,
                        attempts,
                        error = %err,
                        "graphql request failed; retrying"
                    );
                    tokio::time::sleep(self.retry_delay * attempt).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        };

        let envelope: Envelope<T> = match serde_json::from_str(&raw) {
            Ok(envelope) => envelope,
            Err(err) if !status.is_success() => {
                tracing::debug!(operation, ?err, "graphql error body is not json");
                return Err(Error::permanent(format!(
                    "{operation} returned {status}: {}",
                    snippet(&raw)
                )));
            }
            Err(err) => {
                return Err(anyhow::Error::new(err)
                    .context(format!("parse {operation} response"))
                    .into());
            }
        };

        if envelope.data.is_none() && !envelope.errors.is_empty() {
            let messages = envelope
                .errors
                .iter()
                .map(|e| e.message.as_str())
                .collect::<Vec<_>>();
            tracing::debug!(operation, ?messages, "graphql returned errors without data");
        }
        Ok(envelope.data)
    }

    async fn post_once(
        &self,
        body: &serde_json::Value,
        token: &str,
    ) -> Result<(StatusCode, String)> {
        let response = self
            .http
            .post(&self.endpoint)
            .header(AUTHORIZATION, format!("JWT {token}"))
            .header(CONTENT_TYPE, "application/json")
            .json(body)
            .send()
            .await?;

        let status = response.status();
        let raw = response.text().await?;
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(Error::transient(format!(
                "POST {} returned {status}: {}",
                self.endpoint,
                snippet(&raw)
            )));
        }
        Ok((status, raw))
    }
}

#[async_trait]
impl ContentClient for GraphqlClient {
    async fn fetch_book(&self, book_id: &str, token: &str) -> Result<BookDetail> {
        let data: Option<BookData> = self
            .execute(
                "book",
                graphql::BOOK_DETAIL,
                graphql::book_detail_variables(book_id),
                token,
                Retry::Idempotent,
            )
            .await?;
        data.and_then(|d| d.book)
            .ok_or_else(|| Error::not_found("book"))
    }

    async fn fetch_chapter_list(&self, book_id: &str, token: &str) -> Result<Vec<ChapterSummary>> {
        let data: Option<ChapterListData> = self
            .execute(
                "chapterList",
                graphql::CHAPTER_LIST,
                graphql::chapter_list_variables(book_id),
                token,
                Retry::Idempotent,
            )
            .await?;
        let list = data
            .and_then(|d| d.chapter_list)
            .ok_or_else(|| Error::not_found("chapterList"))?;
        Ok(assign_orders(list.chapters))
    }

    async fn fetch_chapter(&self, chapter_id: &str, token: &str) -> Result<ChapterDetail> {
        let data: Option<ChapterData> = self
            .execute(
                "chapter",
                graphql::CHAPTER_DETAIL,
                graphql::chapter_detail_variables(chapter_id),
                token,
                Retry::Idempotent,
            )
            .await?;
        data.and_then(|d| d.chapter)
            .ok_or_else(|| Error::not_found("chapter"))
    }

    async fn fetch_current_user(&self, token: &str) -> Result<Option<UserProfile>> {
        if token.trim().is_empty() {
            return Ok(None);
        }
        let data: Option<UserData> = self
            .execute(
                "user",
                graphql::CURRENT_USER,
                graphql::current_user_variables(),
                token,
                Retry::Idempotent,
            )
            .await?;
        Ok(data
            .and_then(|d| d.user)
            .filter(|u| !u.username.trim().is_empty()))
    }

    async fn purchase_chapter(&self, chapter_id: &str, amount: u64, token: &str) -> Result<bool> {
        let data: Option<PurchaseData> = self
            .execute(
                "purchaseChapter",
                graphql::PURCHASE_CHAPTER,
                graphql::purchase_variables(chapter_id, amount),
                token,
                Retry::Never,
            )
            .await?;
        Ok(data
            .and_then(|d| d.purchase_chapter)
            .is_some_and(|v| !v.is_null()))
    }

    async fn fetch_library_page(&self, token: &str, after: Option<&str>) -> Result<LibraryPage> {
        let data: Option<LibraryData> = self
            .execute(
                "libraryBooks",
                graphql::USER_LIBRARY,
                graphql::library_variables(after),
                token,
                Retry::Idempotent,
            )
            .await?;
        let connection = data
            .and_then(|d| d.library_books)
            .ok_or_else(|| Error::not_found("library"))?;

        let book_ids = connection
            .edges
            .into_iter()
            .filter_map(|edge| edge.node.map(|node| node.id))
            .collect();
        let next_cursor = connection
            .page_info
            .filter(|info| info.has_next_page)
            .and_then(|info| info.end_cursor);
        Ok(LibraryPage {
            book_ids,
            next_cursor,
        })
    }

    async fn fetch_cover(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.http.get(url).send().await?.error_for_status()?;
        let bytes = response.bytes().await?;
        Ok(bytes.to_vec())
    }
}

fn snippet(raw: &str) -> String {
    const MAX: usize = 200;
    let trimmed = raw.trim();
    match trimmed.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_owned(),
    }
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphqlError>,
}

#[derive(Debug, Deserialize)]
struct GraphqlError {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct BookData {
    book: Option<BookDetail>,
}

#[derive(Debug, Deserialize)]
struct ChapterData {
    chapter: Option<ChapterDetail>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChapterListData {
    chapter_list: Option<ChapterListPayload>,
}

#[derive(Debug, Deserialize)]
struct ChapterListPayload {
    #[serde(default)]
    chapters: Vec<ChapterSummary>,
}

#[derive(Debug, Deserialize)]
struct UserData {
    user: Option<UserProfile>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PurchaseData {
    purchase_chapter: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LibraryData {
    library_books: Option<LibraryConnection>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LibraryConnection {
    #[serde(default)]
    edges: Vec<LibraryEdge>,
    #[serde(default)]
    page_info: Option<PageInfo>,
}

#[derive(Debug, Deserialize)]
struct LibraryEdge {
    node: Option<LibraryNode>,
}

#[derive(Debug, Deserialize)]
struct LibraryNode {
    #[serde(rename = "_id")]
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageInfo {
    #[serde(default)]
    has_next_page: bool,
    #[serde(default)]
    end_cursor: Option<String>,
}
