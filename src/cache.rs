use anyhow::Context as _;

use crate::formats::Chapter;
use crate::fs_store;
use crate::paths::BookLayout;

/// Per-chapter cache inside a book directory.
///
/// The structured record under `raw/` is the only "already downloaded"
/// signal. Records are never invalidated.
#[derive(Debug, Clone)]
pub struct ChapterCache {
    layout: BookLayout,
}

impl ChapterCache {
    pub fn new(layout: BookLayout) -> Self {
        Self { layout }
    }

    pub async fn has(&self, order: u32, chapter_id: &str) -> anyhow::Result<bool> {
        fs_store::exists(&self.layout.chapter_record_path(order, chapter_id)).await
    }

    pub async fn load(&self, order: u32, chapter_id: &str) -> anyhow::Result<Option<Chapter>> {
        let path = self.layout.chapter_record_path(order, chapter_id);
        fs_store::read_json(&path)
            .await
            .with_context(|| format!("load cached chapter {chapter_id}"))
    }

    /// Writes the flattened text first and the record last, each atomically.
    pub async fn store(&self, chapter: &Chapter) -> anyhow::Result<()> {
        let text_path = self.layout.chapter_text_path(chapter.order, &chapter.id);
        fs_store::write_atomic(&text_path, chapter.data.as_bytes())
            .await
            .with_context(|| format!("write chapter text: {}", text_path.display()))?;

        let record_path = self.layout.chapter_record_path(chapter.order, &chapter.id);
        fs_store::write_json_atomic(&record_path, chapter)
            .await
            .with_context(|| format!("write chapter record: {}", record_path.display()))?;
        Ok(())
    }
}
