//! Jobs that walk every known book: paged exports, local refresh, and
//! library regeneration from logged tokens.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use futures::future::join_all;

use crate::formats::Book;
use crate::fs_store;
use crate::paths::{self, BookLayout};
use crate::pipeline::{Assembler, DownloadRequest};
use crate::project::ProjectStore;
use crate::render::{self, BookFormat};
use crate::tokens::TokenLog;

pub const MISSING_CHAPTERS_FILE: &str = "missingChapters.txt";

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct BatchReport {
    pub status: &'static str,
    pub books: usize,
    pub failed: usize,
}

impl BatchReport {
    fn completed() -> Self {
        Self {
            status: "completed",
            ..Self::default()
        }
    }

    fn absorb(&mut self, other: BatchReport) {
        self.books += other.books;
        self.failed += other.failed;
    }
}

/// Inclusive `(from, to)` order windows of `size` chapters covering `1..=max_order`.
pub fn export_windows(max_order: u32, size: usize) -> Vec<(u32, u32)> {
    let size = u32::try_from(size.max(1)).unwrap_or(u32::MAX);
    let mut windows = Vec::new();
    let mut from = 1u32;
    while from <= max_order {
        let to = from.saturating_add(size - 1).min(max_order);
        windows.push((from, to));
        match to.checked_add(1) {
            Some(next) => from = next,
            None => break,
        }
    }
    windows
}

/// Writes every local book as EPUB files of `export_window` chapters each.
pub async fn generate_ebooks(assembler: &Assembler, token: &str) -> crate::error::Result<BatchReport> {
    assembler.authorize(token).await?;

    let books = local_books(&assembler.settings().download_dir).await?;
    let mut report = BatchReport::completed();
    for group in books.chunks(assembler.settings().book_batch_size.max(1)) {
        let results = join_all(group.iter().map(|book| export_or_refresh(assembler, book, token))).await;
        report.books += results.len();
        report.failed += results.into_iter().filter(|ok| !ok).count();
    }
    tracing::info!(books = report.books, failed = report.failed, "paged export completed");
    Ok(report)
}

/// Exports one book; on failure runs a single non-rendering refresh instead.
async fn export_or_refresh(assembler: &Assembler, book: &Book, token: &str) -> bool {
    let Err(err) = export_book(assembler, book, token).await else {
        return true;
    };
    tracing::warn!(book_id = %book.id, error = %format!("{err:#}"), "paged export failed; refreshing book");
    match assembler
        .download_book(&DownloadRequest::refresh(&book.id, token))
        .await
    {
        Ok(_) => true,
        Err(err) => {
            tracing::error!(book_id = %book.id, error = %err, "corrective refresh failed");
            false
        }
    }
}

async fn export_book(assembler: &Assembler, book: &Book, token: &str) -> anyhow::Result<()> {
    let settings = assembler.settings();
    let name = BookLayout::new(&settings.download_dir, &book.title, &book.id)
        .name()
        .to_owned();
    let out_dir = settings.export_dir.join(&name);
    tokio::fs::create_dir_all(&out_dir)
        .await
        .with_context(|| format!("create export dir: {}", out_dir.display()))?;

    let remote = assembler
        .client()
        .fetch_chapter_list(&book.id, token)
        .await
        .with_context(|| format!("fetch chapter list for {}", book.id))?;
    let have = book.chapters.iter().map(|c| c.id.as_str()).collect::<HashSet<_>>();
    let missing = remote
        .iter()
        .filter(|c| !have.contains(c.id.as_str()))
        .map(|c| {
            format!(
                "{}|{}|{}|{}\r\n",
                c.id,
                c.order,
                c.title,
                c.published_at.as_deref().unwrap_or_default()
            )
        })
        .collect::<String>();
    let missing_path = missing_chapters_path(&settings.export_dir, &name);
    fs_store::write_atomic(&missing_path, missing.as_bytes()).await?;

    let max_order = book.chapters.iter().map(|c| c.order).max().unwrap_or(0);
    for (from, to) in export_windows(max_order, settings.export_window) {
        let out_path = out_dir.join(format!("{name} {from}-{to}.epub"));
        if fs_store::exists(&out_path).await? {
            tracing::debug!(path = %out_path.display(), "export exists; skipping");
            continue;
        }
        let slice = book.window(from, to);
        if slice.chapters.is_empty() {
            continue;
        }
        match render::render_off_thread(slice, BookFormat::Epub, None, out_path.clone()).await {
            Ok(()) => tracing::info!(path = %out_path.display(), "window exported"),
            Err(err) => {
                tracing::error!(path = %out_path.display(), error = %format!("{err:#}"), "window export failed")
            }
        }
    }
    Ok(())
}

/// Re-runs the non-rendering download for every book with a local manifest.
pub async fn refresh_local_books(assembler: &Assembler, token: &str) -> crate::error::Result<BatchReport> {
    assembler.authorize(token).await?;
    let ids = local_books(&assembler.settings().download_dir)
        .await?
        .into_iter()
        .map(|b| b.id)
        .collect::<Vec<_>>();
    let report = refresh_books(assembler, &ids, token).await;
    tracing::info!(books = report.books, failed = report.failed, "local refresh completed");
    Ok(report)
}

/// Refreshes every library book of every logged token that still works.
pub async fn regenerate_libraries(assembler: &Assembler) -> crate::error::Result<BatchReport> {
    let log = TokenLog::new(&assembler.settings().token_dir);
    let mut report = BatchReport::completed();
    for logged in log.list().await? {
        let token = logged.token.as_str();
        match assembler.client().authenticate(token).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(path = %logged.path.display(), "token no longer valid; skipping");
                continue;
            }
            Err(err) => {
                tracing::warn!(path = %logged.path.display(), error = %err, "token check failed; skipping");
                continue;
            }
        }
        let ids = match assembler.client().fetch_library_book_ids(token).await {
            Ok(ids) => ids,
            Err(err) => {
                tracing::warn!(path = %logged.path.display(), error = %err, "library listing failed");
                continue;
            }
        };
        tracing::info!(path = %logged.path.display(), books = ids.len(), "regenerating library");
        report.absorb(refresh_books(assembler, &ids, token).await);
    }
    tracing::info!(books = report.books, failed = report.failed, "library regeneration completed");
    Ok(report)
}

async fn refresh_books(assembler: &Assembler, book_ids: &[String], token: &str) -> BatchReport {
    let mut report = BatchReport::completed();
    for group in book_ids.chunks(assembler.settings().book_batch_size.max(1)) {
        let results = join_all(group.iter().map(|id| refresh_with_retry(assembler, id, token))).await;
        report.books += results.len();
        report.failed += results.into_iter().filter(|ok| !ok).count();
    }
    report
}

/// One corrective re-run after a failure; returns whether either attempt succeeded.
async fn refresh_with_retry(assembler: &Assembler, book_id: &str, token: &str) -> bool {
    let request = DownloadRequest::refresh(book_id, token);
    match assembler.download_book(&request).await {
        Ok(_) => return true,
        Err(err) => tracing::warn!(book_id, error = %err, "book refresh failed; retrying once"),
    }
    match assembler.download_book(&request).await {
        Ok(_) => true,
        Err(err) => {
            tracing::error!(book_id, error = %err, "book refresh failed again");
            false
        }
    }
}

/// Manifests found under the download root; unreadable ones are logged and skipped.
pub async fn local_books(download_dir: &Path) -> anyhow::Result<Vec<Book>> {
    let mut books = Vec::new();
    for dir in paths::list_subdirs(download_dir).await? {
        let Some(store) = ProjectStore::find_in_book_dir(&dir).await? else {
            continue;
        };
        match store.load().await {
            Ok(Some(book)) => books.push(book),
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(path = %store.path().display(), error = %format!("{err:#}"), "skipping unreadable project")
            }
        }
    }
    Ok(books)
}

pub fn missing_chapters_path(export_dir: &Path, book_name: &str) -> PathBuf {
    export_dir.join(book_name).join(MISSING_CHAPTERS_FILE)
}
