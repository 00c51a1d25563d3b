//! In-memory requester for crawl unit tests

use crate::crawl::CrawlContext;
use crate::fetch::{FetchError, MediaStream, Requester};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone)]
pub(crate) enum Canned {
    Body(Vec<u8>),
    Unreachable,
    NeedLogin,
    InvalidCookie,
    Panic,
}

/// Answers `limit_raw` from a url table and records every url asked for
#[derive(Default)]
pub(crate) struct FakeRequester {
    responses: Mutex<HashMap<String, Canned>>,
    calls: Mutex<Vec<String>>,
}

impl FakeRequester {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn on(&self, url: &str, canned: Canned) {
        self.responses
            .lock()
            .unwrap()
            .insert(url.to_string(), canned);
    }

    pub(crate) fn on_json(&self, url: &str, body: Value) {
        self.on(url, Canned::Body(body.to_string().into_bytes()));
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn called(&self, url: &str) -> bool {
        self.calls.lock().unwrap().iter().any(|c| c == url)
    }
}

#[async_trait]
impl Requester for FakeRequester {
    async fn limit_raw(&self, url: &str, _ctx: &CrawlContext) -> Result<Vec<u8>, FetchError> {
        self.calls.lock().unwrap().push(url.to_string());
        let canned = self.responses.lock().unwrap().get(url).cloned();

        match canned {
            Some(Canned::Body(body)) => Ok(body),
            Some(Canned::Unreachable) => Err(FetchError::Unreachable(url.to_string())),
            Some(Canned::NeedLogin) => Err(FetchError::NeedLogin),
            Some(Canned::InvalidCookie) => Err(FetchError::InvalidCookie),
            Some(Canned::Panic) => panic!("requester blew up on {}", url),
            None => Err(FetchError::Status {
                url: url.to_string(),
                status: 599,
            }),
        }
    }

    async fn stream(&self, url: &str, _ctx: &CrawlContext) -> Result<MediaStream, FetchError> {
        Err(FetchError::Unreachable(url.to_string()))
    }
}

/// Creation time of test item `n`; larger ids are newer
pub(crate) fn item_time(n: u64) -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000 + n as i64 * 100, 0).unwrap()
}

/// Q&A list payload holding the given item ids
pub(crate) fn qa_page(totals: Option<u64>, is_end: bool, ids: &[u64]) -> Value {
    let data: Vec<Value> = ids
        .iter()
        .map(|n| {
            serde_json::json!({
                "id": n,
                "created_time": item_time(*n).timestamp(),
                "content": format!("<p>item {}</p>", n),
            })
        })
        .collect();

    let mut paging = serde_json::json!({ "is_end": is_end });
    if let Some(totals) = totals {
        paging["totals"] = totals.into();
    }

    serde_json::json!({ "paging": paging, "data": data })
}
