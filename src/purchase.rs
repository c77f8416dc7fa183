use std::collections::HashSet;

use crate::error::{Error, Result};
use crate::formats::ChapterSummary;
use crate::paths::BookLayout;
use crate::pipeline::{Assembler, DownloadRequest};
use crate::project::ProjectStore;

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct PurchaseReport {
    pub status: &'static str,
    pub attempted: usize,
    pub purchased: usize,
    /// Set when a purchase failed and the remaining chapters were not tried.
    pub halted: bool,
}

/// Buys every locked chapter of the book, then refreshes the local copy.
pub async fn purchase_all_chapters(
    assembler: &Assembler,
    book_id: &str,
    token: &str,
) -> Result<PurchaseReport> {
    require_book_id(book_id)?;
    assembler.authorize(token).await?;

    let locked = assembler.purchasable_chapters(book_id, token).await?;
    let report = purchase_sequentially(assembler, &locked, token).await;
    refresh(assembler, book_id, token).await?;
    Ok(report)
}

/// Buys the locked chapters missing from the saved manifest, then refreshes.
/// Without a manifest nothing is bought.
pub async fn purchase_all_chapters_to_library(
    assembler: &Assembler,
    book_id: &str,
    token: &str,
) -> Result<PurchaseReport> {
    require_book_id(book_id)?;
    assembler.authorize(token).await?;

    let detail = assembler.client().fetch_book(book_id, token).await?;
    let layout = BookLayout::new(&assembler.settings().download_dir, &detail.title, &detail.id);
    let report = match ProjectStore::new(&layout).load().await? {
        Some(manifest) => {
            let owned = manifest
                .chapters
                .iter()
                .map(|c| c.id.as_str())
                .collect::<HashSet<_>>();
            let missing = assembler
                .purchasable_chapters(book_id, token)
                .await?
                .into_iter()
                .filter(|c| !owned.contains(c.id.as_str()))
                .collect::<Vec<_>>();
            purchase_sequentially(assembler, &missing, token).await
        }
        None => {
            tracing::warn!(book = %layout.name(), "no project for book; nothing purchased");
            PurchaseReport {
                status: "completed",
                attempted: 0,
                purchased: 0,
                halted: false,
            }
        }
    };

    refresh(assembler, book_id, token).await?;
    Ok(report)
}

// One at a time: every purchase spends the account balance.
async fn purchase_sequentially(
    assembler: &Assembler,
    chapters: &[ChapterSummary],
    token: &str,
) -> PurchaseReport {
    let mut report = PurchaseReport {
        status: "completed",
        attempted: 0,
        purchased: 0,
        halted: false,
    };

    for chapter in chapters {
        report.attempted += 1;
        let amount = chapter.price_amount();
        match assembler
            .client()
            .purchase_chapter(&chapter.id, amount, token)
            .await
        {
            Ok(true) => {
                tracing::info!(chapter_id = %chapter.id, order = chapter.order, amount, "chapter purchased");
                report.purchased += 1;
            }
            Ok(false) => {
                tracing::error!(chapter_id = %chapter.id, order = chapter.order, "purchase rejected; halting");
                report.halted = true;
                break;
            }
            Err(err) => {
                tracing::error!(chapter_id = %chapter.id, error = %err, "purchase failed; halting");
                report.halted = true;
                break;
            }
        }
    }
    report
}

async fn refresh(assembler: &Assembler, book_id: &str, token: &str) -> Result<()> {
    let outcome = assembler
        .download_book(&DownloadRequest::refresh(book_id, token))
        .await?;
    tracing::info!(book_id, chapters = outcome.chapters, "refreshed after purchase");
    Ok(())
}

fn require_book_id(book_id: &str) -> Result<()> {
    if book_id.trim().is_empty() {
        return Err(Error::bad_request("bookId is required"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Arc;

    use super::*;
    use crate::config::Settings;
    use crate::test_support::FakeClient;

    fn assembler(client: FakeClient, dir: &Path) -> (Assembler, Arc<FakeClient>) {
        let client = Arc::new(client);
        let settings = Arc::new(Settings {
            download_dir: dir.join("downloads"),
            ..Settings::default()
        });
        (Assembler::new(client.clone(), settings), client)
    }

    #[tokio::test]
    async fn second_failure_halts_after_one_purchase() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let fake = FakeClient::new()
            .with_user("tok", "reader")
            .with_book("B1", "Paid", &[("a", false), ("b", true), ("c", true), ("d", true)])
            .with_purchase_results(&[true, false]);
        let (assembler, client) = assembler(fake, temp.path());

        let report = purchase_all_chapters(&assembler, "B1", "tok").await?;
        assert_eq!(
            report,
            PurchaseReport {
                status: "completed",
                attempted: 2,
                purchased: 1,
                halted: true,
            }
        );
        assert_eq!(client.purchases(), ["b"]);

        // The refresh picked up the newly unlocked chapter.
        let manifest = ProjectStore::at(temp.path().join("downloads/Paid/project/Paid.fictionlog"))
            .load()
            .await?
            .ok_or_else(|| anyhow::anyhow!("manifest missing"))?;
        let ids = manifest.chapters.iter().map(|c| c.id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, ["a", "b"]);
        Ok(())
    }

    #[tokio::test]
    async fn to_library_without_manifest_buys_nothing_but_refreshes() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let fake = FakeClient::new()
            .with_user("tok", "reader")
            .with_book("B1", "Fresh", &[("a", false), ("b", true)]);
        let (assembler, client) = assembler(fake, temp.path());

        let report = purchase_all_chapters_to_library(&assembler, "B1", "tok").await?;
        assert_eq!(report.attempted, 0);
        assert!(client.purchases().is_empty());
        assert!(temp.path().join("downloads/Fresh/project/Fresh.fictionlog").exists());
        Ok(())
    }

    #[tokio::test]
    async fn to_library_skips_chapters_already_in_manifest() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let fake = FakeClient::new()
            .with_user("tok", "reader")
            .with_book("B1", "Lib", &[("a", false), ("b", true), ("c", true)]);
        let (assembler, client) = assembler(fake, temp.path());

        assembler.download_book(&DownloadRequest::refresh("B1", "tok")).await?;
        let layout = BookLayout::new(&temp.path().join("downloads"), "Lib", "B1");
        let store = ProjectStore::new(&layout);
        let mut manifest = store
            .load()
            .await?
            .ok_or_else(|| anyhow::anyhow!("manifest missing"))?;
        let mut owned = manifest.chapters[0].clone();
        owned.id = "b".to_owned();
        owned.order = 2;
        manifest.chapters.push(owned);
        store.save(&manifest).await?;

        let report = purchase_all_chapters_to_library(&assembler, "B1", "tok").await?;
        assert_eq!(report.purchased, 1);
        assert_eq!(client.purchases(), ["c"]);
        Ok(())
    }

    #[tokio::test]
    async fn unauthorized_purchase_is_rejected() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let (assembler, client) = assembler(
            FakeClient::new().with_book("B1", "X", &[("a", true)]),
            temp.path(),
        );
        let result = purchase_all_chapters(&assembler, "B1", "nobody").await;
        assert!(matches!(result, Err(Error::Unauthorized)));
        assert!(client.purchases().is_empty());
        Ok(())
    }
}
