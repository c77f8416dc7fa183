//! In-memory [`ContentClient`] used by unit tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::client::{ContentClient, assign_orders};
use crate::error::{Error, Result};
use crate::formats::{
    BookDetail, ChapterDetail, ChapterSummary, LibraryPage, Price, Uploader, UserProfile,
};

#[derive(Default)]
pub struct FakeClient {
    users: HashMap<String, String>,
    books: HashMap<String, BookDetail>,
    chapter_lists: Mutex<HashMap<String, Vec<ChapterSummary>>>,
    chapters: HashMap<String, ChapterDetail>,
    failing_chapters: HashSet<String>,
    purchase_results: Mutex<VecDeque<bool>>,
    purchases: Mutex<Vec<String>>,
    libraries: HashMap<String, Vec<String>>,
    chapter_fetches: Mutex<HashMap<String, usize>>,
    book_fetches: Mutex<HashMap<String, usize>>,
}

impl FakeClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, token: &str, username: &str) -> Self {
        self.users.insert(token.to_owned(), username.to_owned());
        self
    }

    /// Adds a book; each chapter is `(id, locked)` and gets a one-block body.
    pub fn with_book(mut self, book_id: &str, title: &str, chapters: &[(&str, bool)]) -> Self {
        self.books.insert(
            book_id.to_owned(),
            BookDetail {
                id: book_id.to_owned(),
                title: title.to_owned(),
                cover_image: None,
                description: Some(format!("About {title}")),
                hashtags: vec!["fantasy".to_owned()],
                author_name: None,
                translator_name: None,
                user: Some(Uploader {
                    username: Some("uploader".to_owned()),
                    display_name: Some("Uploader".to_owned()),
                }),
                content_raw_state: serde_json::Value::Null,
            },
        );

        let summaries = chapters
            .iter()
            .map(|(id, locked)| ChapterSummary {
                id: (*id).to_owned(),
                title: format!("Title {id}"),
                is_purchase_required: *locked,
                published_at: None,
                price: locked.then(|| Price {
                    kind: Some("goldCoin".to_owned()),
                    gold_coin: 5,
                }),
                order: 0,
            })
            .collect::<Vec<_>>();
        if let Ok(mut lists) = self.chapter_lists.lock() {
            lists.insert(book_id.to_owned(), summaries);
        }

        for (id, _) in chapters {
            self.chapters.insert(
                (*id).to_owned(),
                ChapterDetail {
                    id: (*id).to_owned(),
                    title: format!("Title {id}"),
                    content_raw_state: serde_json::json!({
                        "blocks": [
                            { "text": format!("Body of {id}"), "type": "unstyled" },
                            { "text": "x", "type": "unstyled" },
                        ]
                    }),
                },
            );
        }
        self
    }

    pub fn with_failing_chapter(mut self, chapter_id: &str) -> Self {
        self.failing_chapters.insert(chapter_id.to_owned());
        self
    }

    pub fn with_malformed_chapter(mut self, chapter_id: &str) -> Self {
        if let Some(detail) = self.chapters.get_mut(chapter_id) {
            detail.content_raw_state = serde_json::json!({ "unexpected": true });
        }
        self
    }

    pub fn with_purchase_results(self, results: &[bool]) -> Self {
        if let Ok(mut queue) = self.purchase_results.lock() {
            queue.extend(results.iter().copied());
        }
        self
    }

    pub fn with_library(mut self, token: &str, book_ids: &[&str]) -> Self {
        self.libraries.insert(
            token.to_owned(),
            book_ids.iter().map(|id| (*id).to_owned()).collect(),
        );
        self
    }

    pub fn chapter_fetches(&self, chapter_id: &str) -> usize {
        self.chapter_fetches
            .lock()
            .map(|m| m.get(chapter_id).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    pub fn total_chapter_fetches(&self) -> usize {
        self.chapter_fetches
            .lock()
            .map(|m| m.values().sum())
            .unwrap_or(0)
    }

    pub fn book_fetches(&self, book_id: &str) -> usize {
        self.book_fetches
            .lock()
            .map(|m| m.get(book_id).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Drops a book's chapter list so listing it fails with `NotFound`.
    pub fn remove_chapter_list(&self, book_id: &str) {
        if let Ok(mut lists) = self.chapter_lists.lock() {
            lists.remove(book_id);
        }
    }

    pub fn purchases(&self) -> Vec<String> {
        self.purchases.lock().map(|p| p.clone()).unwrap_or_default()
    }

    fn check_token(&self, token: &str) -> Result<()> {
        if self.users.contains_key(token) {
            Ok(())
        } else {
            Err(Error::not_found("data"))
        }
    }
}

#[async_trait]
impl ContentClient for FakeClient {
    async fn fetch_book(&self, book_id: &str, token: &str) -> Result<BookDetail> {
        self.check_token(token)?;
        if let Ok(mut fetches) = self.book_fetches.lock() {
            *fetches.entry(book_id.to_owned()).or_default() += 1;
        }
        self.books
            .get(book_id)
            .cloned()
            .ok_or_else(|| Error::not_found("book"))
    }

    async fn fetch_chapter_list(&self, book_id: &str, token: &str) -> Result<Vec<ChapterSummary>> {
        self.check_token(token)?;
        let lists = self
            .chapter_lists
            .lock()
            .map_err(|_| Error::Other(anyhow::anyhow!("chapter list lock poisoned")))?;
        let list = lists
            .get(book_id)
            .cloned()
            .ok_or_else(|| Error::not_found("chapterList"))?;
        Ok(assign_orders(list))
    }

    async fn fetch_chapter(&self, chapter_id: &str, token: &str) -> Result<ChapterDetail> {
        self.check_token(token)?;
        if let Ok(mut fetches) = self.chapter_fetches.lock() {
            *fetches.entry(chapter_id.to_owned()).or_default() += 1;
        }
        if self.failing_chapters.contains(chapter_id) {
            return Err(Error::transient(format!("connection reset for {chapter_id}")));
        }
        self.chapters
            .get(chapter_id)
            .cloned()
            .ok_or_else(|| Error::not_found("chapter"))
    }

    async fn fetch_current_user(&self, token: &str) -> Result<Option<UserProfile>> {
        Ok(self.users.get(token).map(|username| UserProfile {
            id: None,
            username: username.clone(),
            display_name: Some(username.clone()),
            email: None,
            gold_coin: Some(100.0),
            tel: None,
            address: None,
        }))
    }

    async fn purchase_chapter(&self, chapter_id: &str, _amount: u64, token: &str) -> Result<bool> {
        self.check_token(token)?;
        let ok = self
            .purchase_results
            .lock()
            .ok()
            .and_then(|mut q| q.pop_front())
            .unwrap_or(true);
        if ok {
            if let Ok(mut purchases) = self.purchases.lock() {
                purchases.push(chapter_id.to_owned());
            }
            if let Ok(mut lists) = self.chapter_lists.lock() {
                for chapter in lists.values_mut().flatten() {
                    if chapter.id == chapter_id {
                        chapter.is_purchase_required = false;
                    }
                }
            }
        }
        Ok(ok)
    }

    async fn fetch_library_page(&self, token: &str, after: Option<&str>) -> Result<LibraryPage> {
        self.check_token(token)?;
        let ids = self.libraries.get(token).cloned().unwrap_or_default();
        // Two ids per page to exercise cursor following.
        let start = after.and_then(|c| c.parse::<usize>().ok()).unwrap_or(0);
        let end = (start + 2).min(ids.len());
        Ok(LibraryPage {
            book_ids: ids[start.min(end)..end].to_vec(),
            next_cursor: (end < ids.len()).then(|| end.to_string()),
        })
    }

    async fn fetch_cover(&self, url: &str) -> Result<Vec<u8>> {
        Err(Error::not_found(format!("cover {url}")))
    }
}
