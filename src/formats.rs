use std::path::PathBuf;

use serde::{Deserialize, Deserializer, Serialize};

/// Chapter price as quoted by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Price {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, deserialize_with = "de_coin_amount")]
    pub gold_coin: u64,
}

/// One entry of a book's chapter list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChapterSummary {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub is_purchase_required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<Price>,
    /// 1-based position in the list as returned by the platform.
    #[serde(default)]
    pub order: u32,
}

impl ChapterSummary {
    pub fn price_amount(&self) -> u64 {
        self.price.as_ref().map(|p| p.gold_coin).unwrap_or(0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChapterDetail {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub title: String,
    /// Draft-style rich text: `{"blocks": [{"text": .., "type": ..}, ..]}`,
    /// sometimes delivered JSON-encoded inside a string.
    #[serde(default)]
    pub content_raw_state: serde_json::Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Uploader {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookDetail {
    #[serde(rename = "_id")]
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub cover_image: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "de_null_as_default")]
    pub hashtags: Vec<String>,
    #[serde(default)]
    pub author_name: Option<String>,
    #[serde(default)]
    pub translator_name: Option<String>,
    #[serde(default)]
    pub user: Option<Uploader>,
    #[serde(default)]
    pub content_raw_state: serde_json::Value,
}

impl BookDetail {
    /// Author display name; the uploader's display name stands in when the
    /// platform has none.
    pub fn author(&self) -> String {
        non_blank(self.author_name.as_deref())
            .or_else(|| self.uploader_name())
            .unwrap_or_default()
    }

    /// Translator display name with the same uploader fallback as [`Self::author`].
    pub fn translator(&self) -> String {
        non_blank(self.translator_name.as_deref())
            .or_else(|| self.uploader_name())
            .unwrap_or_default()
    }

    fn uploader_name(&self) -> Option<String> {
        self.user
            .as_ref()
            .and_then(|u| non_blank(u.display_name.as_deref()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    #[serde(rename = "_id", default)]
    pub id: Option<String>,
    pub username: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub gold_coin: Option<f64>,
    #[serde(default)]
    pub tel: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextBlock {
    pub text: String,
    #[serde(rename = "type", default)]
    pub kind: String,
}

/// A downloaded chapter, as kept in the cache and in the project manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chapter {
    #[serde(rename = "_id")]
    pub id: String,
    pub order: u32,
    pub title: String,
    /// Blocks flattened to `<p>` paragraphs.
    pub data: String,
    pub blocks: Vec<TextBlock>,
    #[serde(default)]
    pub is_purchase_required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<Price>,
}

/// A book with its chapters; persisted as the project manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Book {
    #[serde(rename = "_id")]
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub cover_image: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub description_blocks: Vec<TextBlock>,
    #[serde(default)]
    pub hashtags: Vec<String>,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub translator: String,
    pub chapters: Vec<Chapter>,
    pub book_path_epub: PathBuf,
    pub book_path_word: PathBuf,
}

impl Book {
    pub fn sort_chapters(&mut self) {
        self.chapters.sort_by_key(|c| c.order);
    }

    /// Copy of the book restricted to chapters whose order lies in `from..=to`.
    pub fn window(&self, from: u32, to: u32) -> Book {
        let mut out = self.clone();
        out.chapters.retain(|c| (from..=to).contains(&c.order));
        out
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LibraryPage {
    pub book_ids: Vec<String>,
    pub next_cursor: Option<String>,
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
}

fn de_null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Coin amounts arrive as integers, floats or numeric strings depending on
/// the endpoint.
fn de_coin_amount<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error as _;

    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    match value {
        None | Some(serde_json::Value::Null) => Ok(0),
        Some(serde_json::Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f.round() as u64))
            .ok_or_else(|| D::Error::custom(format!("invalid coin amount: {n}"))),
        Some(serde_json::Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|f| *f >= 0.0)
            .map(|f| f.round() as u64)
            .ok_or_else(|| D::Error::custom(format!("invalid coin amount: {s:?}"))),
        Some(other) => Err(D::Error::custom(format!("invalid coin amount: {other}"))),
    }
}
