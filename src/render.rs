use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::Context as _;

use crate::formats::Book;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, clap::ValueEnum, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookFormat {
    #[default]
    Epub,
    Docx,
}

impl BookFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Epub => "epub",
            Self::Docx => "docx",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            Self::Epub => "application/epub+zip",
            Self::Docx => {
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            }
        }
    }

    /// The manifest path this format is rendered to.
    pub fn output_path(self, book: &Book) -> &Path {
        match self {
            Self::Epub => &book.book_path_epub,
            Self::Docx => &book.book_path_word,
        }
    }
}

impl std::str::FromStr for BookFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "epub" => Ok(Self::Epub),
            "docx" | "word" => Ok(Self::Docx),
            other => Err(format!("unsupported book type: {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RenderOptions {
    pub lang: String,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            lang: "th".to_owned(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CoverImage {
    pub bytes: Vec<u8>,
    pub media_type: &'static str,
    pub extension: &'static str,
}

impl CoverImage {
    /// Recognises PNG, JPEG, GIF and WebP by their magic bytes.
    pub fn sniff(bytes: Vec<u8>) -> Option<Self> {
        let (media_type, extension) = if bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
            ("image/png", "png")
        } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
            ("image/jpeg", "jpg")
        } else if bytes.starts_with(b"GIF8") {
            ("image/gif", "gif")
        } else if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
            ("image/webp", "webp")
        } else {
            return None;
        };
        Some(Self {
            bytes,
            media_type,
            extension,
        })
    }
}

/// Renders `book` synchronously; callers on the runtime go through `spawn_blocking`.
pub fn render_book(
    book: &Book,
    format: BookFormat,
    cover: Option<&CoverImage>,
    out_path: &Path,
    options: &RenderOptions,
) -> anyhow::Result<()> {
    match format {
        BookFormat::Epub => crate::epub::write_epub(book, cover, out_path, options),
        BookFormat::Docx => crate::docx::write_docx(book, out_path),
    }
}

/// Runs [`render_book`] on the blocking pool.
pub async fn render_off_thread(
    book: Book,
    format: BookFormat,
    cover: Option<CoverImage>,
    out_path: PathBuf,
) -> anyhow::Result<()> {
    tokio::task::spawn_blocking(move || {
        render_book(
            &book,
            format,
            cover.as_ref(),
            &out_path,
            &RenderOptions::default(),
        )
        .with_context(|| format!("render {}: {}", format.extension(), out_path.display()))
    })
    .await
    .context("join render task")?
}

/// Creates the parent directory, lets `write` fill a temp sibling, then renames it over `path`.
pub(crate) fn write_file_atomic<F>(path: &Path, write: F) -> anyhow::Result<()>
where
    F: FnOnce(File) -> anyhow::Result<()>,
{
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)
        .with_context(|| format!("create output dir: {}", parent.display()))?;

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("output");
    let tmp: PathBuf = parent.join(format!(".{file_name}.tmp.{}", uuid::Uuid::new_v4()));
    let file =
        File::create(&tmp).with_context(|| format!("create temp output: {}", tmp.display()))?;

    if let Err(err) = write(file) {
        let _ = std::fs::remove_file(&tmp);
        return Err(err);
    }
    if let Err(err) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(err).with_context(|| format!("rename output into place: {}", path.display()));
    }
    Ok(())
}
