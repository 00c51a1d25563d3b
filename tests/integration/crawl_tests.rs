//! Integration tests for crawl passes
//!
//! These tests use wiremock to stand in for the signing service and both
//! platform APIs, and run whole passes through the real requesters.

use rss_harvester::config::{CommunityPlatformConfig, QaPlatformConfig};
use rss_harvester::crawl::{
    ArticleList, BackfillOutcome, ContentKind, CrawlContext, Crawler, HtmlItemParser, ListSource,
    MediaSink, NoteList, PassOptions, PostList, StopReason,
};
use rss_harvester::fetch::{CommunityRequester, QaRequester};
use rss_harvester::objects::FsObjectStore;
use rss_harvester::signing::{CredentialKind, SigningPool};
use rss_harvester::storage::{
    ContentItem, CredentialStore, ItemStatus, ItemStore, SignerStore, SqliteStorage,
    SubscriptionStore,
};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const HOUR: Duration = Duration::from_secs(3600);

fn qa_config(api_base: &str) -> QaPlatformConfig {
    QaPlatformConfig {
        api_base: api_base.to_string(),
        page_size: 20,
        interval_ms: 5,
        jitter_ms: 0,
        max_retry: 3,
        signer_failure_streak: 3,
        request_timeout_ms: 5_000,
    }
}

/// Signing service mock, storage holding it and a Q&A session, and the requester
async fn qa_setup(platform: &MockServer) -> (MockServer, Arc<SqliteStorage>, Arc<QaRequester>) {
    let signer = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sign"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "signature": "abc"
        })))
        .mount(&signer)
        .await;

    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    storage.register_signer("s1", &signer.uri()).unwrap();
    storage
        .set_credential(CredentialKind::QaSession, "session", HOUR)
        .unwrap();

    let pool = SigningPool::load(storage.clone()).unwrap();
    let requester = QaRequester::new(
        reqwest::Client::new(),
        &qa_config(&platform.uri()),
        Arc::new(pool),
        storage.clone(),
    );
    (signer, storage, Arc::new(requester))
}

fn answer(id: u64, created: i64) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "created_time": created,
        "updated_time": created,
        "content": format!("<p>answer {}</p>", id),
    })
}

#[tokio::test]
async fn test_signed_pass_stops_at_stored_item() {
    let platform = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v4/members/alice/answers"))
        .and(query_param("offset", "0"))
        .and(header("x-zse-93", "101_3_3.0"))
        .and(header("x-zse-96", "2.0_abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "paging": {"is_end": false, "totals": 30},
            "data": [answer(3, 1_700_000_300), answer(2, 1_700_000_200), answer(1, 1_700_000_100)]
        })))
        .expect(1)
        .mount(&platform)
        .await;

    let (_signer, storage, requester) = qa_setup(&platform).await;
    let crawler = Crawler::new(requester, storage.clone(), Arc::new(HtmlItemParser));
    let source = PostList::new(platform.uri(), 20);

    let target = chrono::DateTime::from_timestamp(1_700_000_200, 0).unwrap();
    let report = crawler
        .run_pass(
            &source,
            "alice",
            PassOptions::forward(&source, "alice", Some(target)),
            &CrawlContext::detached("post:alice"),
        )
        .await
        .unwrap();

    assert_eq!(report.stop, StopReason::TargetReached);
    assert_eq!(report.saved, 1);
    let item = storage.get_item(ContentKind::Post, "3").unwrap().unwrap();
    assert_eq!(item.text, "answer 3");
    assert!(storage.get_item(ContentKind::Post, "2").unwrap().is_none());
}

#[tokio::test]
async fn test_article_detail_and_image_are_stored() {
    let platform = MockServer::start().await;
    let image_url = format!("{}/img/a.png", platform.uri());

    Mock::given(method("GET"))
        .and(path("/api/v4/members/alice/articles"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "paging": {"is_end": true, "totals": 1},
            "data": [{"id": 7, "created": 1_700_000_000, "excerpt": "<p>teaser</p>"}]
        })))
        .mount(&platform)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v4/articles/7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "content": format!("<p>full body</p><p><img src=\"{}\"></p>", image_url),
            "updated": 1_700_000_500
        })))
        .expect(1)
        .mount(&platform)
        .await;
    Mock::given(method("GET"))
        .and(path("/img/a.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![7u8; 64]))
        .expect(1)
        .mount(&platform)
        .await;

    let (_signer, storage, requester) = qa_setup(&platform).await;
    let objects_dir = tempfile::tempdir().unwrap();
    let objects = Arc::new(FsObjectStore::new(
        objects_dir.path(),
        "https://assets.example.com",
    ));
    let crawler = Crawler::new(requester.clone(), storage.clone(), Arc::new(HtmlItemParser))
        .with_media(MediaSink::new(requester, objects, Duration::from_secs(5)));
    let source = ArticleList::new(platform.uri(), 20);

    let report = crawler
        .run_pass(
            &source,
            "alice",
            PassOptions::forward(&source, "alice", None),
            &CrawlContext::detached("article:alice"),
        )
        .await
        .unwrap();

    assert_eq!(report.saved, 1);
    let item = storage.get_item(ContentKind::Article, "7").unwrap().unwrap();
    assert_eq!(item.status, ItemStatus::Completed);
    assert_eq!(item.updated_at.timestamp(), 1_700_000_500);
    assert_eq!(
        item.text,
        "full body\n\n![image](https://assets.example.com/article/7/0.png)"
    );

    let stored = std::fs::read(objects_dir.path().join("article/7/0.png")).unwrap();
    assert_eq!(stored.len(), 64);
}

#[tokio::test]
async fn test_note_backfill_retries_busy_and_finishes() {
    let platform = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v2/groups/g1/topics"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "succeeded": false, "code": 1059
        })))
        .up_to_n_times(1)
        .mount(&platform)
        .await;
    Mock::given(method("GET"))
        .and(path("/v2/groups/g1/topics"))
        .and(query_param("end_time", "2024-01-02T09:59:59.999+0800"))
        .and(header("cookie", "access_token=abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "succeeded": true,
            "resp_data": {"topics": [{
                "topic_id": 5,
                "create_time": "2024-01-01T08:00:00.000+0800",
                "talk": {"text": "older note"}
            }]}
        })))
        .expect(1)
        .mount(&platform)
        .await;

    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    storage
        .set_credential(CredentialKind::CommunityCookie, "access_token=abc", HOUR)
        .unwrap();
    let newest = chrono::DateTime::parse_from_rfc3339("2024-01-02T10:00:00+08:00")
        .unwrap()
        .with_timezone(&chrono::Utc);
    storage
        .save_item(&ContentItem {
            id: "9".to_string(),
            kind: ContentKind::Note,
            author_id: "g1".to_string(),
            created_at: newest,
            updated_at: newest,
            text: "newest note".to_string(),
            raw: Vec::new(),
            status: ItemStatus::Completed,
        })
        .unwrap();
    let sub = storage.add_subscription(ContentKind::Note, "g1").unwrap();

    let requester = CommunityRequester::new(
        reqwest::Client::new(),
        &CommunityPlatformConfig {
            api_base: platform.uri(),
            page_size: 20,
            interval_ms: 5,
            jitter_ms: 0,
            max_retry: 3,
            busy_backoff_ms: 10,
            request_timeout_ms: 5_000,
        },
        storage.clone(),
    );
    let crawler = Crawler::new(Arc::new(requester), storage.clone(), Arc::new(HtmlItemParser));
    let source = NoteList::new(platform.uri(), 20);
    assert_eq!(source.kind(), ContentKind::Note);

    let outcome = crawler
        .run_backfill(&source, storage.as_ref(), &sub, &CrawlContext::detached(&sub.key))
        .await
        .unwrap();

    assert!(matches!(outcome, BackfillOutcome::Walked { finished: true, .. }));
    let older = storage.get_item(ContentKind::Note, "5").unwrap().unwrap();
    assert_eq!(older.text, "older note");
    assert!(storage.get_subscription(&sub.key).unwrap().unwrap().finished);
}
