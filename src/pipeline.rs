use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use futures::future::join_all;

use crate::cache::ChapterCache;
use crate::client::ContentClient;
use crate::config::Settings;
use crate::content;
use crate::error::{Error, Result};
use crate::formats::{Book, BookDetail, Chapter, ChapterSummary, UserProfile};
use crate::paths::BookLayout;
use crate::project::{self, ProjectStore};
use crate::render::{self, BookFormat, CoverImage};
use crate::tokens::TokenLog;

#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub book_id: String,
    pub token: String,
    pub format: BookFormat,
    /// `false` refreshes cache and manifest without writing a document.
    pub render: bool,
}

impl DownloadRequest {
    pub fn refresh(book_id: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            book_id: book_id.into(),
            token: token.into(),
            format: BookFormat::Docx,
            render: false,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadOutcome {
    pub success: bool,
    pub detail: String,
    pub book_path: PathBuf,
    pub book_name: String,
    pub chapters: usize,
    pub fetched: usize,
    pub skipped: usize,
}

/// Runs the per-book download: auth, metadata, chapter list, cached or
/// fetched chapter bodies, manifest merge, optional render, manifest save.
#[derive(Clone)]
pub struct Assembler {
    client: Arc<dyn ContentClient>,
    settings: Arc<Settings>,
    token_log: Option<TokenLog>,
}

impl Assembler {
    pub fn new(client: Arc<dyn ContentClient>, settings: Arc<Settings>) -> Self {
        let token_log = settings
            .save_token_log
            .then(|| TokenLog::new(&settings.token_dir));
        Self {
            client,
            settings,
            token_log,
        }
    }

    pub fn client(&self) -> &dyn ContentClient {
        self.client.as_ref()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Resolves the caller's profile, failing with `Unauthorized` when the
    /// token does not identify a user.
    pub async fn authorize(&self, token: &str) -> Result<UserProfile> {
        if token.trim().is_empty() {
            return Err(Error::bad_request("token is required"));
        }
        let profile = self
            .client
            .fetch_current_user(token)
            .await?
            .ok_or(Error::Unauthorized)?;

        if let Some(log) = &self.token_log
            && let Err(err) = log.record(&profile, token).await
        {
            tracing::warn!(username = %profile.username, error = %err, "failed to record token");
        }
        Ok(profile)
    }

    pub async fn download_book(&self, request: &DownloadRequest) -> Result<DownloadOutcome> {
        let DownloadRequest {
            book_id,
            token,
            format,
            render: should_render,
        } = request;
        if book_id.trim().is_empty() {
            return Err(Error::bad_request("bookId is required"));
        }
        let profile = self.authorize(token).await?;
        tracing::info!(book_id = %book_id, user = %profile.username, "download started");

        let detail = self.client.fetch_book(book_id, token).await?;
        let layout = BookLayout::new(&self.settings.download_dir, &detail.title, &detail.id);
        layout.create_dirs().await?;

        let list = self.client.fetch_chapter_list(book_id, token).await?;
        let (free, locked): (Vec<_>, Vec<_>) =
            list.into_iter().partition(|c| !c.is_purchase_required);
        tracing::info!(
            book = %layout.name(),
            free = free.len(),
            locked = locked.len(),
            "chapter list fetched"
        );

        let cache = ChapterCache::new(layout.clone());
        let resolved = self.resolve_chapters(&cache, &free, token).await;

        let store = ProjectStore::new(&layout);
        let existing = match store.load().await {
            Ok(existing) => existing,
            Err(err) => {
                tracing::warn!(path = %store.path().display(), error = %format!("{err:#}"), "ignoring unreadable project");
                None
            }
        };
        let book = project::merge(existing, book_from_detail(&detail, &layout, resolved.chapters));

        let out_path = format.output_path(&book).to_path_buf();
        let display_title = match detail.title.trim() {
            "" => layout.name(),
            title => title,
        };
        let book_name = format!("{display_title}.{}", format.extension());
        let mut success = true;
        let mut detail_text = format!(
            "{} chapters ({} fetched, {} skipped, {} locked)",
            book.chapters.len(),
            resolved.fetched,
            resolved.skipped,
            locked.len()
        );

        if *should_render {
            let cover = self.fetch_cover(&book).await;
            match render::render_off_thread(book.clone(), *format, cover, out_path.clone()).await {
                Ok(()) => tracing::info!(path = %out_path.display(), "book rendered"),
                Err(err) => {
                    tracing::error!(path = %out_path.display(), error = %format!("{err:#}"), "render failed");
                    success = false;
                    detail_text = format!("render failed: {err:#}");
                }
            }
        }

        store.save(&book).await?;
        tracing::info!(book = %layout.name(), chapters = book.chapters.len(), "project saved");

        Ok(DownloadOutcome {
            success,
            detail: detail_text,
            book_path: out_path,
            book_name,
            chapters: book.chapters.len(),
            fetched: resolved.fetched,
            skipped: resolved.skipped,
        })
    }

    /// Chapters readable without purchase.
    pub async fn available_chapters(&self, book_id: &str, token: &str) -> Result<Vec<ChapterSummary>> {
        Ok(self.partitioned_chapters(book_id, token).await?.0)
    }

    /// Chapters that still require a purchase.
    pub async fn purchasable_chapters(&self, book_id: &str, token: &str) -> Result<Vec<ChapterSummary>> {
        Ok(self.partitioned_chapters(book_id, token).await?.1)
    }

    async fn partitioned_chapters(
        &self,
        book_id: &str,
        token: &str,
    ) -> Result<(Vec<ChapterSummary>, Vec<ChapterSummary>)> {
        if book_id.trim().is_empty() {
            return Err(Error::bad_request("bookId is required"));
        }
        self.authorize(token).await?;
        let list = self.client.fetch_chapter_list(book_id, token).await?;
        Ok(list.into_iter().partition(|c| !c.is_purchase_required))
    }

    async fn resolve_chapters(
        &self,
        cache: &ChapterCache,
        free: &[ChapterSummary],
        token: &str,
    ) -> Resolved {
        let mut out = Resolved::default();
        for group in free.chunks(self.settings.chapter_batch_size.max(1)) {
            let results = join_all(
                group
                    .iter()
                    .map(|summary| self.resolve_chapter(cache, summary, token)),
            )
            .await;

            for (summary, result) in group.iter().zip(results) {
                match result {
                    Ok((chapter, fetched)) => {
                        if fetched {
                            out.fetched += 1;
                        }
                        out.chapters.push(chapter);
                    }
                    Err(err) => {
                        tracing::warn!(
                            chapter_id = %summary.id,
                            order = summary.order,
                            error = %err,
                            "skipping chapter"
                        );
                        out.skipped += 1;
                    }
                }
            }
        }
        out
    }

    async fn resolve_chapter(
        &self,
        cache: &ChapterCache,
        summary: &ChapterSummary,
        token: &str,
    ) -> Result<(Chapter, bool)> {
        if cache.has(summary.order, &summary.id).await? {
            match cache.load(summary.order, &summary.id).await {
                Ok(Some(chapter)) => {
                    tracing::debug!(chapter_id = %summary.id, "cache hit");
                    return Ok((chapter, false));
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(chapter_id = %summary.id, error = %format!("{err:#}"), "unreadable cache record; refetching");
                }
            }
        }

        let detail = self.client.fetch_chapter(&summary.id, token).await?;
        let chapter = content::chapter_from_detail(summary, &detail)?;
        cache
            .store(&chapter)
            .await
            .with_context(|| format!("cache chapter {}", chapter.id))?;
        Ok((chapter, true))
    }

    async fn fetch_cover(&self, book: &Book) -> Option<CoverImage> {
        let url = book.cover_image.as_deref().filter(|u| !u.trim().is_empty())?;
        match self.client.fetch_cover(url).await {
            Ok(bytes) => {
                let cover = CoverImage::sniff(bytes);
                if cover.is_none() {
                    tracing::warn!(url, "cover is not a recognised image");
                }
                cover
            }
            Err(err) => {
                tracing::warn!(url, error = %err, "cover fetch failed");
                None
            }
        }
    }
}

#[derive(Debug, Default)]
struct Resolved {
    chapters: Vec<Chapter>,
    fetched: usize,
    skipped: usize,
}

fn book_from_detail(detail: &BookDetail, layout: &BookLayout, chapters: Vec<Chapter>) -> Book {
    let description_blocks = if detail.content_raw_state.is_null() {
        Vec::new()
    } else {
        content::blocks_from_raw_state(&detail.content_raw_state).unwrap_or_else(|reason| {
            tracing::debug!(book_id = %detail.id, reason = %reason, "book description is not rich text");
            Vec::new()
        })
    };

    Book {
        id: detail.id.clone(),
        title: detail.title.clone(),
        cover_image: detail.cover_image.clone(),
        description: detail.description.clone(),
        description_blocks,
        hashtags: detail.hashtags.clone(),
        author: detail.author(),
        translator: detail.translator(),
        chapters,
        book_path_epub: layout.epub_path(),
        book_path_word: layout.docx_path(),
    }
}
