use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::Context as _;

use crate::formats::{Book, Chapter};
use crate::fs_store;
use crate::paths::{BookLayout, PROJECT_EXTENSION};

/// Per-book manifest used as the merge base for incremental downloads.
#[derive(Debug, Clone)]
pub struct ProjectStore {
    path: PathBuf,
}

impl ProjectStore {
    pub fn new(layout: &BookLayout) -> Self {
        Self {
            path: layout.project_path(),
        }
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Locates the manifest inside an existing book directory.
    pub async fn find_in_book_dir(book_dir: &Path) -> anyhow::Result<Option<Self>> {
        let project_dir = book_dir.join("project");
        let mut entries = match tokio::fs::read_dir(&project_dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("read project dir: {}", project_dir.display()));
            }
        };

        let mut candidates = Vec::new();
        while let Some(entry) = entries.next_entry().await.context("list project dir")? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some(PROJECT_EXTENSION) {
                candidates.push(path);
            }
        }
        candidates.sort();
        Ok(candidates.into_iter().next().map(Self::at))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn load(&self) -> anyhow::Result<Option<Book>> {
        fs_store::read_json(&self.path)
            .await
            .with_context(|| format!("load project: {}", self.path.display()))
    }

    /// Overwrites the manifest in place.
    pub async fn save(&self, book: &Book) -> anyhow::Result<()> {
        fs_store::write_json_atomic(&self.path, book)
            .await
            .with_context(|| format!("save project: {}", self.path.display()))
    }
}

/// Unions `fresh` chapters with `existing` ones by chapter id and sorts by order.
///
/// When both sides hold the same id the fresh copy wins. The sort is stable,
/// so chapters sharing an order keep fresh-before-existing order.
pub fn merge_chapters(fresh: Vec<Chapter>, existing: Vec<Chapter>) -> Vec<Chapter> {
    let mut seen = HashSet::with_capacity(fresh.len() + existing.len());
    let mut merged = Vec::with_capacity(fresh.len() + existing.len());
    for chapter in fresh.into_iter().chain(existing) {
        if seen.insert(chapter.id.clone()) {
            merged.push(chapter);
        }
    }
    merged.sort_by_key(|c| c.order);
    merged
}

/// Merges a freshly assembled book with the previously saved manifest.
/// Book metadata always comes from `fresh`.
pub fn merge(existing: Option<Book>, mut fresh: Book) -> Book {
    let existing_chapters = existing.map(|b| b.chapters).unwrap_or_default();
    let fresh_chapters = std::mem::take(&mut fresh.chapters);
    fresh.chapters = merge_chapters(fresh_chapters, existing_chapters);
    fresh
}
