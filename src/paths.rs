use std::path::{Path, PathBuf};

use anyhow::Context as _;

pub const PROJECT_EXTENSION: &str = "fictionlog";

/// Makes a book title safe to use as a directory and file name.
pub fn clean_title(title: &str) -> String {
    let replaced = title
        .replace(':', "-")
        .replace("  ", " ")
        .replace(['/', '\\'], "-")
        .replace('?', "");

    replaced
        .chars()
        .filter(|&c| {
            ('\u{0E00}'..='\u{0E7F}').contains(&c)
                || c.is_ascii_alphanumeric()
                || matches!(c, ' ' | '(' | ')' | '[' | ']' | '!' | '+' | '-')
        })
        .collect::<String>()
        .trim()
        .to_owned()
}

/// Directory name for a book; falls back to the id when nothing of the title survives.
pub fn book_dir_name(title: &str, book_id: &str) -> String {
    let cleaned = clean_title(title);
    if cleaned.is_empty() {
        clean_title(book_id)
    } else {
        cleaned
    }
}

pub fn zero_pad(order: u32, width: usize) -> String {
    format!("{order:0width$}")
}

pub fn chapter_file_stem(order: u32, chapter_id: &str) -> String {
    format!("{}_{chapter_id}", zero_pad(order, 5))
}

/// On-disk layout of one downloaded book.
///
/// ```text
/// <download_dir>/<title>/<order>_<id>.txt          flattened text
/// <download_dir>/<title>/raw/<order>_<id>.txt      cache record
/// <download_dir>/<title>/project/<title>.fictionlog
/// <download_dir>/<title>/exports/<title>.{epub,docx}
/// ```
#[derive(Debug, Clone)]
pub struct BookLayout {
    book_dir: PathBuf,
    name: String,
}

impl BookLayout {
    pub fn new(download_dir: &Path, title: &str, book_id: &str) -> Self {
        let name = book_dir_name(title, book_id);
        Self {
            book_dir: download_dir.join(&name),
            name,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn book_dir(&self) -> &Path {
        &self.book_dir
    }

    pub fn raw_dir(&self) -> PathBuf {
        self.book_dir.join("raw")
    }

    pub fn project_dir(&self) -> PathBuf {
        self.book_dir.join("project")
    }

    pub fn exports_dir(&self) -> PathBuf {
        self.book_dir.join("exports")
    }

    pub fn project_path(&self) -> PathBuf {
        self.project_dir()
            .join(format!("{}.{PROJECT_EXTENSION}", self.name))
    }

    pub fn epub_path(&self) -> PathBuf {
        self.exports_dir().join(format!("{}.epub", self.name))
    }

    pub fn docx_path(&self) -> PathBuf {
        self.exports_dir().join(format!("{}.docx", self.name))
    }

    pub fn chapter_text_path(&self, order: u32, chapter_id: &str) -> PathBuf {
        self.book_dir
            .join(format!("{}.txt", chapter_file_stem(order, chapter_id)))
    }

    pub fn chapter_record_path(&self, order: u32, chapter_id: &str) -> PathBuf {
        self.raw_dir()
            .join(format!("{}.txt", chapter_file_stem(order, chapter_id)))
    }

    pub async fn create_dirs(&self) -> anyhow::Result<()> {
        for dir in [
            self.book_dir.clone(),
            self.exports_dir(),
            self.raw_dir(),
            self.project_dir(),
        ] {
            tokio::fs::create_dir_all(&dir)
                .await
                .with_context(|| format!("create book dir: {}", dir.display()))?;
        }
        Ok(())
    }
}

/// Immediate subdirectories of `dir`, sorted; a missing `dir` yields none.
pub async fn list_subdirs(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err).with_context(|| format!("read dir: {}", dir.display())),
    };

    let mut dirs = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .with_context(|| format!("list dir: {}", dir.display()))?
    {
        let file_type = entry.file_type().await.context("read entry type")?;
        if file_type.is_dir() {
            dirs.push(entry.path());
        }
    }
    dirs.sort();
    Ok(dirs)
}
