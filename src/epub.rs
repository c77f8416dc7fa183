use std::fs::{self, File};
use std::io::Write as _;
use std::path::Path;

use anyhow::Context as _;
use chrono::Utc;
use zip::write::SimpleFileOptions;

use crate::content::xml_escape;
use crate::formats::{Book, Chapter};
use crate::render::{CoverImage, RenderOptions};

pub fn write_epub(
    book: &Book,
    cover: Option<&CoverImage>,
    out_path: &Path,
    options: &RenderOptions,
) -> anyhow::Result<()> {
    let lang = options.lang.trim();
    let lang = if lang.is_empty() { "und" } else { lang };

    let chapters = book
        .chapters
        .iter()
        .enumerate()
        .map(|(idx, chapter)| EpubChapter {
            // Orders can repeat after a merge; the position cannot.
            stem: format!("chapter-{:05}", idx + 1),
            title: chapter_title(chapter),
            body: chapter.data.clone(),
        })
        .collect::<Vec<_>>();

    let uuid = uuid::Uuid::new_v4();
    let modified = Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);

    let container_xml = render_container_xml();
    let css = default_style_css();
    let info_xhtml = render_info_xhtml(book, lang);
    let nav_xhtml = render_nav_xhtml(&book.title, lang, &chapters);
    let toc_ncx = render_toc_ncx(&book.title, uuid, &chapters);
    let content_opf = render_content_opf(book, lang, uuid, &modified, &chapters, cover);

    crate::render::write_file_atomic(out_path, |out_file: File| {
        let mut zip = zip::ZipWriter::new(out_file);

        // `mimetype` must be the first entry and stored uncompressed.
        let mimetype_options = SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Stored)
            .unix_permissions(0o644);
        zip.start_file("mimetype", mimetype_options)
            .context("epub start_file mimetype")?;
        zip.write_all(b"application/epub+zip")
            .context("epub write mimetype")?;

        let deflated = SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated)
            .unix_permissions(0o644);

        let entries = [
            ("META-INF/container.xml", container_xml.as_str()),
            ("OEBPS/content.opf", content_opf.as_str()),
            ("OEBPS/nav.xhtml", nav_xhtml.as_str()),
            ("OEBPS/toc.ncx", toc_ncx.as_str()),
            ("OEBPS/style.css", css),
            ("OEBPS/info.xhtml", info_xhtml.as_str()),
        ];
        for (name, contents) in entries {
            zip.start_file(name, deflated)
                .with_context(|| format!("epub start_file {name}"))?;
            zip.write_all(contents.as_bytes())
                .with_context(|| format!("epub write {name}"))?;
        }

        if let Some(cover) = cover {
            let name = format!("OEBPS/cover.{}", cover.extension);
            zip.start_file(name.as_str(), deflated)
                .context("epub start_file cover")?;
            zip.write_all(&cover.bytes).context("epub write cover")?;

            let cover_xhtml = render_cover_xhtml(&book.title, lang, cover);
            zip.start_file("OEBPS/cover.xhtml", deflated)
                .context("epub start_file cover.xhtml")?;
            zip.write_all(cover_xhtml.as_bytes())
                .context("epub write cover.xhtml")?;
        }

        for chapter in &chapters {
            let body = format!("<h1>{}</h1>\n{}", xml_escape(&chapter.title), chapter.body);
            let xhtml = wrap_xhtml_document(&chapter.title, lang, &body);
            zip.start_file(format!("OEBPS/{}.xhtml", chapter.stem), deflated)
                .with_context(|| format!("epub start_file chapter: {}", chapter.stem))?;
            zip.write_all(xhtml.as_bytes())
                .with_context(|| format!("epub write chapter: {}", chapter.stem))?;
        }

        zip.finish().context("epub finish zip")?;
        Ok(())
    })
}

#[derive(Debug)]
struct EpubChapter {
    stem: String,
    title: String,
    body: String,
}

fn chapter_title(chapter: &Chapter) -> String {
    if chapter.title.trim().is_empty() {
        format!("#{}", chapter.order)
    } else {
        chapter.title.trim().to_owned()
    }
}

fn render_container_xml() -> String {
    r#"<?xml version="1.0" encoding="UTF-8"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>
"#
    .to_string()
}

fn default_style_css() -> &'static str {
    r#"@charset "utf-8";

html { font-family: serif; }
body { margin: 0; padding: 0 1.2em; line-height: 1.8; }
h1 { text-align: center; margin: 1.5em 0 1em; }
p { text-indent: 2em; margin: 0 0 0.6em; text-align: justify; }
img.cover { display: block; max-width: 100%; height: auto; margin: 0 auto; }
.info p { text-indent: 0; }
.hashtags { font-size: 0.9em; color: #555; }
"#
}

fn render_info_xhtml(book: &Book, lang: &str) -> String {
    let mut body = String::new();
    body.push_str("<div class=\"info\">\n");
    body.push_str(&format!("<h1>{}</h1>\n", xml_escape(&book.title)));
    if !book.author.is_empty() {
        body.push_str(&format!("<p>{}</p>\n", xml_escape(&book.author)));
    }
    if !book.translator.is_empty() && book.translator != book.author {
        body.push_str(&format!("<p>{}</p>\n", xml_escape(&book.translator)));
    }
    if !book.description_blocks.is_empty() {
        body.push_str(&crate::content::flatten_blocks(&book.description_blocks));
        body.push('\n');
    } else if let Some(description) = book.description.as_deref() {
        for line in description.lines().filter(|l| !l.trim().is_empty()) {
            body.push_str(&format!("<p>{}</p>\n", xml_escape(line.trim())));
        }
    }
    if !book.hashtags.is_empty() {
        let tags = book
            .hashtags
            .iter()
            .map(|t| format!("#{}", xml_escape(t)))
            .collect::<Vec<_>>()
            .join(" ");
        body.push_str(&format!("<p class=\"hashtags\">{tags}</p>\n"));
    }
    body.push_str("</div>\n");
    wrap_xhtml_document(&book.title, lang, &body)
}

fn render_cover_xhtml(title: &str, lang: &str, cover: &CoverImage) -> String {
    let body = format!(
        "<img class=\"cover\" src=\"cover.{}\" alt=\"{}\" />\n",
        cover.extension,
        xml_escape(title)
    );
    wrap_xhtml_document(title, lang, &body)
}

fn render_nav_xhtml(title: &str, lang: &str, chapters: &[EpubChapter]) -> String {
    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
    out.push_str("<!DOCTYPE html>\n");
    out.push_str(&format!(
        "<html xmlns=\"http://www.w3.org/1999/xhtml\" xmlns:epub=\"http://www.idpf.org/2007/ops\" lang=\"{}\" xml:lang=\"{}\">\n",
        xml_escape(lang),
        xml_escape(lang)
    ));
    out.push_str("<head>\n");
    out.push_str(&format!("  <title>{}</title>\n", xml_escape(title)));
    out.push_str("  <meta charset=\"utf-8\" />\n");
    out.push_str("  <link rel=\"stylesheet\" type=\"text/css\" href=\"style.css\" />\n");
    out.push_str("</head>\n");
    out.push_str("<body>\n");
    out.push_str(&format!("  <h1>{}</h1>\n", xml_escape(title)));
    out.push_str("  <nav epub:type=\"toc\" id=\"toc\">\n");
    out.push_str("    <ol>\n");
    for ch in chapters {
        out.push_str(&format!(
            "      <li><a href=\"{}.xhtml\">{}</a></li>\n",
            xml_escape(&ch.stem),
            xml_escape(&ch.title)
        ));
    }
    out.push_str("    </ol>\n");
    out.push_str("  </nav>\n");
    out.push_str("</body>\n");
    out.push_str("</html>\n");
    out
}

fn render_toc_ncx(title: &str, uuid: uuid::Uuid, chapters: &[EpubChapter]) -> String {
    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
    out.push_str(
        "<!DOCTYPE ncx PUBLIC \"-//NISO//DTD ncx 2005-1//EN\" \"http://www.daisy.org/z3986/2005/ncx-2005-1.dtd\">\n",
    );
    out.push_str("<ncx xmlns=\"http://www.daisy.org/z3986/2005/ncx/\" version=\"2005-1\">\n");
    out.push_str("  <head>\n");
    out.push_str(&format!(
        "    <meta name=\"dtb:uid\" content=\"urn:uuid:{uuid}\" />\n"
    ));
    out.push_str("    <meta name=\"dtb:depth\" content=\"1\" />\n");
    out.push_str("    <meta name=\"dtb:totalPageCount\" content=\"0\" />\n");
    out.push_str("    <meta name=\"dtb:maxPageNumber\" content=\"0\" />\n");
    out.push_str("  </head>\n");
    out.push_str("  <docTitle><text>");
    out.push_str(&xml_escape(title));
    out.push_str("</text></docTitle>\n");
    out.push_str("  <navMap>\n");
    for (idx, ch) in chapters.iter().enumerate() {
        let play = idx + 1;
        out.push_str(&format!(
            "    <navPoint id=\"navPoint-{play}\" playOrder=\"{play}\">\n"
        ));
        out.push_str("      <navLabel><text>");
        out.push_str(&xml_escape(&ch.title));
        out.push_str("</text></navLabel>\n");
        out.push_str(&format!(
            "      <content src=\"{}.xhtml\" />\n",
            xml_escape(&ch.stem)
        ));
        out.push_str("    </navPoint>\n");
    }
    out.push_str("  </navMap>\n");
    out.push_str("</ncx>\n");
    out
}

fn render_content_opf(
    book: &Book,
    lang: &str,
    uuid: uuid::Uuid,
    modified: &str,
    chapters: &[EpubChapter],
    cover: Option<&CoverImage>,
) -> String {
    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
    out.push_str(&format!(
        "<package xmlns=\"http://www.idpf.org/2007/opf\" unique-identifier=\"bookid\" version=\"3.0\" xml:lang=\"{}\">\n",
        xml_escape(lang)
    ));
    out.push_str("  <metadata xmlns:dc=\"http://purl.org/dc/elements/1.1/\">\n");
    out.push_str(&format!(
        "    <dc:identifier id=\"bookid\">urn:uuid:{uuid}</dc:identifier>\n"
    ));
    out.push_str(&format!(
        "    <dc:title>{}</dc:title>\n",
        xml_escape(&book.title)
    ));
    out.push_str(&format!(
        "    <dc:language>{}</dc:language>\n",
        xml_escape(lang)
    ));
    if !book.author.is_empty() {
        out.push_str(&format!(
            "    <dc:creator>{}</dc:creator>\n",
            xml_escape(&book.author)
        ));
        out.push_str(&format!(
            "    <dc:publisher>{}</dc:publisher>\n",
            xml_escape(&book.author)
        ));
    }
    if let Some(description) = book.description.as_deref().filter(|d| !d.trim().is_empty()) {
        out.push_str(&format!(
            "    <dc:description>{}</dc:description>\n",
            xml_escape(description.trim())
        ));
    }
    if cover.is_some() {
        out.push_str("    <meta name=\"cover\" content=\"cover-image\" />\n");
    }
    out.push_str(&format!(
        "    <meta property=\"dcterms:modified\">{}</meta>\n",
        xml_escape(modified)
    ));
    out.push_str("  </metadata>\n");
    out.push_str("  <manifest>\n");
    out.push_str(
        "    <item id=\"nav\" href=\"nav.xhtml\" media-type=\"application/xhtml+xml\" properties=\"nav\" />\n",
    );
    out.push_str(
        "    <item id=\"ncx\" href=\"toc.ncx\" media-type=\"application/x-dtbncx+xml\" />\n",
    );
    out.push_str("    <item id=\"css\" href=\"style.css\" media-type=\"text/css\" />\n");
    out.push_str(
        "    <item id=\"info\" href=\"info.xhtml\" media-type=\"application/xhtml+xml\" />\n",
    );
    if let Some(cover) = cover {
        out.push_str(&format!(
            "    <item id=\"cover-image\" href=\"cover.{}\" media-type=\"{}\" properties=\"cover-image\" />\n",
            cover.extension, cover.media_type
        ));
        out.push_str(
            "    <item id=\"cover\" href=\"cover.xhtml\" media-type=\"application/xhtml+xml\" />\n",
        );
    }

    for ch in chapters {
        out.push_str(&format!(
            "    <item id=\"{}\" href=\"{}.xhtml\" media-type=\"application/xhtml+xml\" />\n",
            xml_escape(&ch.stem),
            xml_escape(&ch.stem)
        ));
    }

    out.push_str("  </manifest>\n");
    out.push_str("  <spine toc=\"ncx\">\n");
    if cover.is_some() {
        out.push_str("    <itemref idref=\"cover\" />\n");
    }
    out.push_str("    <itemref idref=\"info\" />\n");
    for ch in chapters {
        out.push_str(&format!(
            "    <itemref idref=\"{}\" />\n",
            xml_escape(&ch.stem)
        ));
    }
    out.push_str("  </spine>\n");
    out.push_str("</package>\n");
    out
}

fn wrap_xhtml_document(title: &str, lang: &str, body_html: &str) -> String {
    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
    out.push_str("<!DOCTYPE html>\n");
    out.push_str(&format!(
        "<html xmlns=\"http://www.w3.org/1999/xhtml\" lang=\"{}\" xml:lang=\"{}\">\n",
        xml_escape(lang),
        xml_escape(lang)
    ));
    out.push_str("<head>\n");
    out.push_str(&format!("  <title>{}</title>\n", xml_escape(title)));
    out.push_str("  <meta charset=\"utf-8\" />\n");
    out.push_str("  <link rel=\"stylesheet\" type=\"text/css\" href=\"style.css\" />\n");
    out.push_str("</head>\n");
    out.push_str("<body>\n");
    out.push_str(body_html);
    if !body_html.ends_with('\n') {
        out.push('\n');
    }
    out.push_str("</body>\n");
    out.push_str("</html>\n");
    out
}

/// Reads one entry of a written EPUB; used by tests and diagnostics.
pub fn read_entry(path: &Path, name: &str) -> anyhow::Result<String> {
    use std::io::Read as _;

    let file = fs::File::open(path).with_context(|| format!("open epub: {}", path.display()))?;
    let mut archive = zip::ZipArchive::new(file).context("open epub zip")?;
    let mut entry = archive
        .by_name(name)
        .with_context(|| format!("epub entry not found: {name}"))?;
    let mut out = String::new();
    entry
        .read_to_string(&mut out)
        .with_context(|| format!("read epub entry: {name}"))?;
    Ok(out)
}
