//! Query texts sent to the platform's GraphQL endpoint.
//!
//! Every call builds its own variables value; nothing here is mutated.

use serde_json::{Value, json};

pub const CHAPTER_DETAIL: &str = r#"
query ChapterDetail($chapterId: ID!) {
  chapter(chapterId: $chapterId) {
    _id
    title
    contentRawState
    status
    publishedAt
    isPurchaseRequired
    purchased
    price {
      type
      goldCoin
    }
  }
}
"#;

pub const CHAPTER_LIST: &str = r#"
query ChapterListInChapterDetail($bookId: ID!, $filter: ChapterListFilter) {
  chapterList(bookId: $bookId, filter: $filter) {
    chapters {
      _id
      title
      isPurchaseRequired
      publishedAt
      status
      price {
        type
        goldCoin
      }
    }
  }
}
"#;

pub const BOOK_DETAIL: &str = r#"
query BookInBookDetail($bookId: ID!) {
  book(bookId: $bookId) {
    _id
    title
    authorName
    translatorName
    coverImage
    description
    contentRawState
    hashtags
    completed
    user {
      _id
      username
      displayName
    }
  }
}
"#;

pub const CURRENT_USER: &str = r#"
{
  user(owner: true) {
    _id
    username
    displayName
    email
    goldCoin
    tel
    address
  }
}
"#;

pub const PURCHASE_CHAPTER: &str = r#"
mutation PurchaseChapterInChapterDetail($chapterId: ID!, $input: PurchaseInput!) {
  purchaseChapter(chapterId: $chapterId, input: $input) {
    _id
    title
    isPurchaseRequired
  }
}
"#;

pub const USER_LIBRARY: &str = r#"
query LibraryBooks($filter: LibraryFilter) {
  libraryBooks(filter: $filter) {
    edges {
      node {
        _id
        title
      }
    }
    pageInfo {
      hasNextPage
      endCursor
    }
  }
}
"#;

pub const LIBRARY_PAGE_SIZE: u32 = 50;

pub fn chapter_detail_variables(chapter_id: &str) -> Value {
    json!({ "chapterId": chapter_id })
}

pub fn chapter_list_variables(book_id: &str) -> Value {
    json!({ "bookId": book_id })
}

pub fn book_detail_variables(book_id: &str) -> Value {
    json!({ "bookId": book_id })
}

pub fn current_user_variables() -> Value {
    json!({})
}

pub fn purchase_variables(chapter_id: &str, amount: u64) -> Value {
    json!({
        "chapterId": chapter_id,
        "input": { "coinType": "goldCoin", "amount": amount },
    })
}

pub fn library_variables(after: Option<&str>) -> Value {
    let mut filter = json!({ "limit": LIBRARY_PAGE_SIZE });
    if let Some(cursor) = after
        && let Some(obj) = filter.as_object_mut()
    {
        obj.insert("after".to_owned(), json!(cursor));
    }
    json!({ "filter": filter })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn purchase_variables_are_built_per_call() {
        let first = purchase_variables("c1", 300);
        let second = purchase_variables("c2", 5);
        assert_eq!(first["chapterId"], "c1");
        assert_eq!(first["input"]["amount"], 300);
        assert_eq!(second["chapterId"], "c2");
        assert_eq!(second["input"]["coinType"], "goldCoin");
    }

    #[test]
    fn library_variables_carry_cursor_only_when_present() {
        assert!(library_variables(None)["filter"].get("after").is_none());
        assert_eq!(library_variables(Some("cur"))["filter"]["after"], "cur");
    }
}
