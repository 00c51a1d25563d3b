//! List sources: the per-kind half of a crawl pass
//!
//! A `ListSource` knows how to build list URLs for an author, how to turn a list
//! response into a cursor plus excerpts, and whether an excerpt needs a second
//! request to get its full body. The pagination walk itself is shared
//! (see `machine.rs`).

use crate::crawl::parser::ParseError;
use crate::crawl::{ContentKind, CrawlContext, CrawlError};
use crate::fetch::Requester;
use async_trait::async_trait;
use chrono::{DateTime, Duration, FixedOffset, Offset, Utc};
use serde::Deserialize;
use serde_json::Value;

/// Partial item as returned by a list endpoint
#[derive(Debug, Clone, PartialEq)]
pub struct Excerpt {
    pub id: String,
    pub author_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// HTML body; may be truncated until the detail is fetched
    pub content: String,
    pub raw: Vec<u8>,
}

/// Pagination state of one list page
#[derive(Debug, Clone, PartialEq)]
pub struct Cursor {
    pub is_end: bool,
    /// Size of the remote collection; `None` when the platform does not report it
    pub total_count: Option<u64>,
    pub next_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ListPage {
    pub cursor: Cursor,
    pub items: Vec<Excerpt>,
}

#[async_trait]
pub trait ListSource: Send + Sync {
    fn kind(&self) -> ContentKind;

    /// Items the list endpoint returns for a full page
    fn page_size(&self) -> u32;

    /// First page of a forward pass
    fn list_url(&self, author: &str, offset: u64) -> String;

    /// First page of a backfill pass; `offset` is the number of stored items and
    /// `earliest` the creation time of the oldest one
    fn backfill_url(&self, author: &str, offset: u64, earliest: DateTime<Utc>) -> String;

    /// Parses one list response fetched at `offset`
    fn parse_list_page(&self, raw: &[u8], author: &str, offset: u64)
        -> Result<ListPage, ParseError>;

    /// Completes an excerpt; kinds whose list carries full bodies return it as is
    async fn fetch_detail(
        &self,
        _requester: &dyn Requester,
        excerpt: Excerpt,
        _ctx: &CrawlContext,
    ) -> Result<Excerpt, CrawlError> {
        Ok(excerpt)
    }
}

// ===== Q&A platform =====

#[derive(Debug, Deserialize)]
struct QaPage {
    #[serde(default)]
    paging: QaPaging,
    #[serde(default)]
    data: Vec<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct QaPaging {
    #[serde(default)]
    is_end: bool,
    #[serde(default)]
    totals: Option<u64>,
}

fn value_id(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

fn unix_time(secs: i64) -> Result<DateTime<Utc>, ParseError> {
    DateTime::from_timestamp(secs, 0).ok_or_else(|| ParseError::InvalidTime(secs.to_string()))
}

fn first_i64(value: &Value, keys: &[&str]) -> Option<i64> {
    keys.iter().find_map(|k| value.get(*k).and_then(Value::as_i64))
}

fn qa_excerpt(value: &Value, author: &str) -> Result<Excerpt, ParseError> {
    let id = value_id(value.get("id")).ok_or(ParseError::MissingField("id"))?;
    let created = first_i64(value, &["created_time", "created"])
        .ok_or(ParseError::MissingField("created_time"))?;
    let updated = first_i64(value, &["updated_time", "updated"]).unwrap_or(created);

    let content = ["content", "excerpt"]
        .iter()
        .find_map(|k| value.get(*k).and_then(Value::as_str))
        .unwrap_or_default()
        .to_string();

    let author_id = value
        .pointer("/author/url_token")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .unwrap_or(author)
        .to_string();

    Ok(Excerpt {
        id,
        author_id,
        created_at: unix_time(created)?,
        updated_at: unix_time(updated)?,
        content,
        raw: serde_json::to_vec(value)?,
    })
}

fn parse_qa_page(
    raw: &[u8],
    author: &str,
    offset: u64,
    next: impl Fn(u64) -> String,
) -> Result<ListPage, ParseError> {
    let page: QaPage = serde_json::from_slice(raw)?;
    let items = page
        .data
        .iter()
        .map(|v| qa_excerpt(v, author))
        .collect::<Result<Vec<_>, _>>()?;

    let is_end = page.paging.is_end;
    let next_url = if is_end {
        None
    } else {
        Some(next(offset + items.len() as u64))
    };

    Ok(ListPage {
        cursor: Cursor {
            is_end,
            total_count: page.paging.totals,
            next_url,
        },
        items,
    })
}

fn qa_list_url(base: &str, author: &str, segment: &str, offset: u64, limit: u32) -> String {
    format!(
        "{}/api/v4/members/{}/{}?offset={}&limit={}&sort_by=created",
        base.trim_end_matches('/'),
        author,
        segment,
        offset,
        limit
    )
}

/// Answers of one author
pub struct PostList {
    api_base: String,
    page_size: u32,
}

impl PostList {
    pub fn new(api_base: impl Into<String>, page_size: u32) -> Self {
        Self {
            api_base: api_base.into(),
            page_size,
        }
    }
}

#[async_trait]
impl ListSource for PostList {
    fn kind(&self) -> ContentKind {
        ContentKind::Post
    }

    fn page_size(&self) -> u32 {
        self.page_size
    }

    fn list_url(&self, author: &str, offset: u64) -> String {
        qa_list_url(&self.api_base, author, "answers", offset, self.page_size)
    }

    fn backfill_url(&self, author: &str, offset: u64, _earliest: DateTime<Utc>) -> String {
        self.list_url(author, offset)
    }

    fn parse_list_page(
        &self,
        raw: &[u8],
        author: &str,
        offset: u64,
    ) -> Result<ListPage, ParseError> {
        parse_qa_page(raw, author, offset, |o| self.list_url(author, o))
    }
}

/// Articles of one author; the list only carries excerpts
pub struct ArticleList {
    api_base: String,
    page_size: u32,
}

impl ArticleList {
    pub fn new(api_base: impl Into<String>, page_size: u32) -> Self {
        Self {
            api_base: api_base.into(),
            page_size,
        }
    }

    fn detail_url(&self, id: &str) -> String {
        format!("{}/api/v4/articles/{}", self.api_base.trim_end_matches('/'), id)
    }
}

#[async_trait]
impl ListSource for ArticleList {
    fn kind(&self) -> ContentKind {
        ContentKind::Article
    }

    fn page_size(&self) -> u32 {
        self.page_size
    }

    fn list_url(&self, author: &str, offset: u64) -> String {
        qa_list_url(&self.api_base, author, "articles", offset, self.page_size)
    }

    fn backfill_url(&self, author: &str, offset: u64, _earliest: DateTime<Utc>) -> String {
        self.list_url(author, offset)
    }

    fn parse_list_page(
        &self,
        raw: &[u8],
        author: &str,
        offset: u64,
    ) -> Result<ListPage, ParseError> {
        parse_qa_page(raw, author, offset, |o| self.list_url(author, o))
    }

    async fn fetch_detail(
        &self,
        requester: &dyn Requester,
        mut excerpt: Excerpt,
        ctx: &CrawlContext,
    ) -> Result<Excerpt, CrawlError> {
        let url = self.detail_url(&excerpt.id);
        let raw = requester.limit_raw(&url, ctx).await?;

        let detail: Value = serde_json::from_slice(&raw).map_err(|e| CrawlError::ParseItem {
            id: excerpt.id.clone(),
            source: e.into(),
        })?;

        if let Some(content) = detail.get("content").and_then(Value::as_str) {
            excerpt.content = content.to_string();
        }
        if let Some(updated) = first_i64(&detail, &["updated", "updated_time"]) {
            excerpt.updated_at = unix_time(updated).map_err(|source| CrawlError::ParseItem {
                id: excerpt.id.clone(),
                source,
            })?;
        }
        excerpt.raw = raw;

        Ok(excerpt)
    }
}

// ===== Paid community =====

const NOTE_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f%z";

#[derive(Debug, Deserialize)]
struct CommunityPage {
    #[serde(default)]
    resp_data: Option<TopicsData>,
}

#[derive(Debug, Deserialize)]
struct TopicsData {
    #[serde(default)]
    topics: Vec<Value>,
}

fn parse_note_time(s: &str) -> Result<DateTime<Utc>, ParseError> {
    DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f%z")
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| ParseError::InvalidTime(s.to_string()))
}

/// `end_time` query value: one millisecond before `t`, in the platform's zone
fn encode_end_time(t: DateTime<Utc>) -> String {
    let zone = FixedOffset::east_opt(8 * 3600).unwrap_or_else(|| Utc.fix());
    let shifted = (t - Duration::milliseconds(1)).with_timezone(&zone);
    url::form_urlencoded::byte_serialize(shifted.format(NOTE_TIME_FORMAT).to_string().as_bytes())
        .collect()
}

fn note_excerpt(topic: &Value, author: &str) -> Result<Excerpt, ParseError> {
    let id = value_id(topic.get("topic_id")).ok_or(ParseError::MissingField("topic_id"))?;
    let created = topic
        .get("create_time")
        .and_then(Value::as_str)
        .ok_or(ParseError::MissingField("create_time"))?;
    let created_at = parse_note_time(created)?;
    let updated_at = match topic.get("modify_time").and_then(Value::as_str) {
        Some(modified) => parse_note_time(modified)?,
        None => created_at,
    };

    let mut content = topic
        .pointer("/talk/text")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    if let Some(images) = topic.pointer("/talk/images").and_then(Value::as_array) {
        for image in images {
            if let Some(src) = image.pointer("/large/url").and_then(Value::as_str) {
                content.push_str(&format!("<img src=\"{}\">", src));
            }
        }
    }

    Ok(Excerpt {
        id,
        author_id: author.to_string(),
        created_at,
        updated_at,
        content,
        raw: serde_json::to_vec(topic)?,
    })
}

/// Topics of one paid group, paged by creation time
pub struct NoteList {
    api_base: String,
    page_size: u32,
}

impl NoteList {
    pub fn new(api_base: impl Into<String>, page_size: u32) -> Self {
        Self {
            api_base: api_base.into(),
            page_size,
        }
    }
}

#[async_trait]
impl ListSource for NoteList {
    fn kind(&self) -> ContentKind {
        ContentKind::Note
    }

    fn page_size(&self) -> u32 {
        self.page_size
    }

    fn list_url(&self, author: &str, _offset: u64) -> String {
        format!(
            "{}/v2/groups/{}/topics?scope=all&count={}",
            self.api_base.trim_end_matches('/'),
            author,
            self.page_size
        )
    }

    fn backfill_url(&self, author: &str, _offset: u64, earliest: DateTime<Utc>) -> String {
        format!(
            "{}&end_time={}",
            self.list_url(author, 0),
            encode_end_time(earliest)
        )
    }

    fn parse_list_page(
        &self,
        raw: &[u8],
        author: &str,
        _offset: u64,
    ) -> Result<ListPage, ParseError> {
        let page: CommunityPage = serde_json::from_slice(raw)?;
        let topics = page.resp_data.map(|d| d.topics).unwrap_or_default();
        let items = topics
            .iter()
            .map(|t| note_excerpt(t, author))
            .collect::<Result<Vec<_>, _>>()?;

        let is_end = items.len() < self.page_size as usize;
        let next_url = match items.last() {
            Some(last) if !is_end => Some(self.backfill_url(author, 0, last.created_at)),
            _ => None,
        };

        Ok(ListPage {
            cursor: Cursor {
                is_end,
                total_count: None,
                next_url,
            },
            items,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_post_list_page() {
        let source = PostList::new("https://qa.example.com/", 2);
        let raw = serde_json::json!({
            "paging": {"is_end": false, "totals": 7},
            "data": [
                {"id": 11, "created_time": 1_700_000_200, "updated_time": 1_700_000_300, "content": "<p>a</p>"},
                {"id": "12", "created_time": 1_700_000_100, "content": "<p>b</p>", "author": {"url_token": "bob"}}
            ]
        });

        let page = source
            .parse_list_page(raw.to_string().as_bytes(), "alice", 4)
            .unwrap();

        assert_eq!(page.cursor.total_count, Some(7));
        assert_eq!(
            page.cursor.next_url.as_deref(),
            Some("https://qa.example.com/api/v4/members/alice/answers?offset=6&limit=2&sort_by=created")
        );
        assert_eq!(page.items[0].id, "11");
        assert_eq!(page.items[0].updated_at.timestamp(), 1_700_000_300);
        assert_eq!(page.items[1].author_id, "bob");
        assert_eq!(page.items[1].updated_at, page.items[1].created_at);
    }

    #[test]
    fn test_missing_created_time() {
        let source = ArticleList::new("https://qa.example.com", 20);
        let raw = br#"{"paging": {"is_end": true}, "data": [{"id": 1}]}"#;

        let err = source.parse_list_page(raw, "alice", 0).unwrap_err();
        assert!(matches!(err, ParseError::MissingField("created_time")));
    }

    #[test]
    fn test_end_time_encoding() {
        let t = Utc.with_ymd_and_hms(2024, 1, 2, 2, 0, 0).unwrap();
        // 10:00:00.000 +0800 minus one millisecond
        assert_eq!(encode_end_time(t), "2024-01-02T09%3A59%3A59.999%2B0800");
    }

    #[test]
    fn test_note_page_short_page_is_end() {
        let source = NoteList::new("https://community.example.com", 20);
        let raw = serde_json::json!({
            "succeeded": true,
            "resp_data": {"topics": [{
                "topic_id": 99,
                "create_time": "2024-01-02T10:00:00.000+0800",
                "talk": {"text": "hello", "images": [{"large": {"url": "https://img.example.com/a.jpg"}}]}
            }]}
        });

        let page = source
            .parse_list_page(raw.to_string().as_bytes(), "g1", 0)
            .unwrap();

        assert!(page.cursor.is_end);
        assert_eq!(page.cursor.total_count, None);
        assert!(page.cursor.next_url.is_none());
        assert_eq!(
            page.items[0].created_at,
            Utc.with_ymd_and_hms(2024, 1, 2, 2, 0, 0).unwrap()
        );
        assert!(page.items[0]
            .content
            .contains("<img src=\"https://img.example.com/a.jpg\">"));
    }

    #[test]
    fn test_note_full_page_has_time_cursor() {
        let source = NoteList::new("https://community.example.com", 1);
        let raw = serde_json::json!({
            "succeeded": true,
            "resp_data": {"topics": [{"topic_id": 1, "create_time": "2024-01-02T10:00:00.000+0800"}]}
        });

        let page = source
            .parse_list_page(raw.to_string().as_bytes(), "g1", 0)
            .unwrap();

        assert_eq!(
            page.cursor.next_url.as_deref(),
            Some("https://community.example.com/v2/groups/g1/topics?scope=all&count=1&end_time=2024-01-02T09%3A59%3A59.999%2B0800")
        );
    }
}
