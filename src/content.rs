use crate::error::{Error, Result};
use crate::formats::{Chapter, ChapterDetail, ChapterSummary, TextBlock};

/// Blocks shorter than this (in characters) are source noise and dropped.
pub const MIN_BLOCK_CHARS: usize = 2;

/// Decodes a rich-text raw state into its block list, dropping noise blocks.
///
/// The platform delivers `contentRawState` either as an object or as a JSON
/// string holding that object. Anything without a `blocks` array of objects is
/// rejected.
pub fn blocks_from_raw_state(raw: &serde_json::Value) -> std::result::Result<Vec<TextBlock>, String> {
    let decoded;
    let raw = match raw {
        serde_json::Value::String(encoded) => {
            decoded = serde_json::from_str::<serde_json::Value>(encoded)
                .map_err(|err| format!("contentRawState string is not JSON: {err}"))?;
            &decoded
        }
        other => other,
    };

    let blocks = raw
        .get("blocks")
        .and_then(|b| b.as_array())
        .ok_or_else(|| "contentRawState has no `blocks` array".to_owned())?;

    let mut out = Vec::with_capacity(blocks.len());
    for (idx, block) in blocks.iter().enumerate() {
        let Some(obj) = block.as_object() else {
            return Err(format!("block {idx} is not an object"));
        };
        let text = match obj.get("text") {
            Some(serde_json::Value::String(text)) => text.clone(),
            Some(serde_json::Value::Null) | None => String::new(),
            Some(_) => return Err(format!("block {idx} text is not a string")),
        };
        let kind = obj
            .get("type")
            .and_then(|t| t.as_str())
            .unwrap_or("unstyled")
            .to_owned();
        out.push(TextBlock { text, kind });
    }

    Ok(filter_blocks(out))
}

pub fn filter_blocks(blocks: Vec<TextBlock>) -> Vec<TextBlock> {
    blocks
        .into_iter()
        .filter(|b| b.text.chars().count() >= MIN_BLOCK_CHARS)
        .collect()
}

/// Wraps every block in `<p>`, trimmed and XML-escaped.
pub fn flatten_blocks(blocks: &[TextBlock]) -> String {
    let mut out = String::new();
    for block in blocks {
        out.push_str("<p>");
        out.push_str(&xml_escape(block.text.trim()));
        out.push_str("</p>");
    }
    out
}

/// Builds the cached chapter from its list entry and fetched detail.
pub fn chapter_from_detail(summary: &ChapterSummary, detail: &ChapterDetail) -> Result<Chapter> {
    let blocks = blocks_from_raw_state(&detail.content_raw_state).map_err(|reason| {
        Error::MalformedChapter {
            chapter_id: summary.id.clone(),
            reason,
        }
    })?;
    let title = if detail.title.trim().is_empty() {
        summary.title.clone()
    } else {
        detail.title.clone()
    };

    Ok(Chapter {
        id: summary.id.clone(),
        order: summary.order,
        title,
        data: flatten_blocks(&blocks),
        blocks,
        is_purchase_required: summary.is_purchase_required,
        price: summary.price.clone(),
    })
}

pub fn xml_escape(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
