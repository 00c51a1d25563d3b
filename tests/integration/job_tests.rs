//! Integration tests for job runs
//!
//! Orchestrators are built from a TOML config exactly as the CLI builds them,
//! with wiremock servers standing in for the platform, the signing service and
//! the notification endpoint.

use rss_harvester::config::parse_config;
use rss_harvester::jobs::{JobError, JobOrchestrator, RunRequest, TaskType};
use rss_harvester::signing::CredentialKind;
use rss_harvester::storage::{
    CredentialStore, ItemStore, JobStatus, JobStore, SignerStore, SqliteStorage, SubscriptionStore,
};
use rss_harvester::ContentKind;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config_text(qa_base: &str, objects_root: &Path, bark: Option<&str>) -> String {
    let notify = bark
        .map(|url| format!("[notify]\nbark-url = \"{}\"\n", url))
        .unwrap_or_default();

    format!(
        r#"
[storage]
database-path = "unused.db"

[user-agent]
browser = "Mozilla/5.0 (test)"

[qa]
api-base = "{qa_base}"
page-size = 20
interval-ms = 5

[community]
api-base = "https://community.example.com"
interval-ms = 5

[objects]
root = "{root}"
assets-domain = "https://assets.example.com"

[crawl]
backfill = true

{notify}"#,
        qa_base = qa_base,
        root = objects_root.display(),
        notify = notify
    )
}

async fn signer_server() -> MockServer {
    let signer = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sign"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"signature": "sig"})),
        )
        .mount(&signer)
        .await;
    signer
}

fn orchestrator(
    text: &str,
    storage: &Arc<SqliteStorage>,
) -> JobOrchestrator<SqliteStorage> {
    let config = parse_config(text).unwrap();
    JobOrchestrator::from_config(&config, "hash-1", storage.clone(), TaskType::CrawlQa).unwrap()
}

#[tokio::test]
async fn test_run_crawls_and_backfills() {
    let platform = MockServer::start().await;
    let signer = signer_server().await;
    let objects = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/api/v4/members/alice/answers"))
        .and(query_param("offset", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "paging": {"is_end": true, "totals": 2},
            "data": [
                {"id": 2, "created_time": 1_700_000_200, "content": "<p>two</p>"},
                {"id": 1, "created_time": 1_700_000_100, "content": "<p>one</p>"}
            ]
        })))
        .mount(&platform)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v4/members/alice/answers"))
        .and(query_param("offset", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "paging": {"is_end": true, "totals": 2},
            "data": []
        })))
        .expect(1)
        .mount(&platform)
        .await;

    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    storage.register_signer("s1", &signer.uri()).unwrap();
    storage
        .set_credential(CredentialKind::QaSession, "session", Duration::from_secs(3600))
        .unwrap();
    let sub = storage.add_subscription(ContentKind::Post, "alice").unwrap();

    let orchestrator = orchestrator(&config_text(&platform.uri(), objects.path(), None), &storage);
    let outcome = orchestrator.run(&RunRequest::default()).await.unwrap();

    assert_eq!(outcome.status, JobStatus::Finished);
    assert_eq!(outcome.processed, vec![sub.key.clone()]);
    assert_eq!(storage.count_items(ContentKind::Post, "alice").unwrap(), 2);
    assert!(storage.get_subscription(&sub.key).unwrap().unwrap().finished);

    let job = storage.get_job(&outcome.job_id).unwrap().unwrap();
    assert_eq!(job.config_hash, "hash-1");
    assert_eq!(job.task_type, "crawl-qa");

    let signers = storage.load_signers().unwrap();
    assert!(signers[0].used_count > 1);
}

#[tokio::test]
async fn test_missing_session_halts_and_notifies() {
    let platform = MockServer::start().await;
    let signer = signer_server().await;
    let bark = MockServer::start().await;
    let objects = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path_regex("^/key/.+/.+$"))
        .respond_with(ResponseTemplate::new(200))
        .expect(2)
        .mount(&bark)
        .await;

    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    storage.register_signer("s1", &signer.uri()).unwrap();
    storage.add_subscription(ContentKind::Post, "alice").unwrap();
    storage.add_subscription(ContentKind::Article, "bob").unwrap();

    let text = config_text(
        &platform.uri(),
        objects.path(),
        Some(&format!("{}/key", bark.uri())),
    );
    let outcome = orchestrator(&text, &storage)
        .run(&RunRequest::default())
        .await
        .unwrap();

    assert_eq!(outcome.status, JobStatus::Error);
    assert!(outcome.halted);
    assert_eq!(outcome.errors, 1);
    assert!(outcome.processed.is_empty());
    assert!(platform.received_requests().await.unwrap().is_empty());
    assert!(storage.job_details(&outcome.job_id).unwrap().is_empty());
}

#[tokio::test]
async fn test_second_run_refused_while_running() {
    let objects = tempfile::tempdir().unwrap();
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    storage.create_job("job-1", "crawl-qa", "hash-0").unwrap();

    let text = config_text("https://qa.example.com", objects.path(), None);
    let err = orchestrator(&text, &storage)
        .run(&RunRequest::default())
        .await
        .unwrap_err();

    assert!(matches!(err, JobError::AlreadyRunning { task_type: TaskType::CrawlQa, .. }));
    assert_eq!(storage.list_jobs(None).unwrap().len(), 1);
    assert_eq!(
        storage.list_jobs(Some(JobStatus::Running)).unwrap()[0].id,
        "job-1"
    );
}

#[tokio::test]
async fn test_orphaned_job_resumed_before_first_tick() {
    let platform = MockServer::start().await;
    let signer = signer_server().await;
    let objects = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/api/v4/members/bob/answers"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "paging": {"is_end": true, "totals": 1},
            "data": [{"id": 5, "created_time": 1_700_000_500, "content": "<p>five</p>"}]
        })))
        .expect(1)
        .mount(&platform)
        .await;

    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    storage.register_signer("s1", &signer.uri()).unwrap();
    storage
        .set_credential(CredentialKind::QaSession, "session", Duration::from_secs(3600))
        .unwrap();
    storage.add_subscription(ContentKind::Post, "alice").unwrap();
    storage.add_subscription(ContentKind::Post, "bob").unwrap();
    storage.create_job("job-crashed", "crawl-qa", "hash-0").unwrap();
    storage.record_job_detail("job-crashed", "post:alice").unwrap();

    let mut text = config_text(&platform.uri(), objects.path(), None);
    text = text.replace("backfill = true", "backfill = false");
    let orchestrator = orchestrator(&text, &storage);

    let outcome = orchestrator.resume_running().await.unwrap().unwrap();

    assert_eq!(outcome.job_id, "job-crashed");
    assert_eq!(outcome.status, JobStatus::Finished);
    assert_eq!(outcome.processed, vec!["post:bob".to_string()]);
    assert_eq!(outcome.already_done, 1);
    assert!(storage.find_running_job("crawl-qa").unwrap().is_none());
    assert_eq!(storage.count_items(ContentKind::Post, "bob").unwrap(), 1);
}

#[tokio::test]
async fn test_signer_enabled_after_start_is_used_by_next_run() {
    let platform = MockServer::start().await;
    let signer = signer_server().await;
    let objects = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/api/v4/members/alice/answers"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "paging": {"is_end": true, "totals": 0},
            "data": []
        })))
        .mount(&platform)
        .await;

    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let record = storage.register_signer("s1", &signer.uri()).unwrap();
    storage.set_signer_available(&record.id, false).unwrap();
    storage
        .set_credential(CredentialKind::QaSession, "session", Duration::from_secs(3600))
        .unwrap();
    storage.add_subscription(ContentKind::Post, "alice").unwrap();

    let text = config_text(&platform.uri(), objects.path(), None);
    let orchestrator = orchestrator(&text, &storage);

    let first = orchestrator.run(&RunRequest::default()).await.unwrap();
    assert_eq!(first.status, JobStatus::Error);
    assert!(first.halted);

    // `signer enable` while the watch process keeps running
    storage.set_signer_available(&record.id, true).unwrap();

    let second = orchestrator.run(&RunRequest::default()).await.unwrap();
    assert_eq!(second.status, JobStatus::Finished);
    assert_eq!(second.processed, vec!["post:alice".to_string()]);
}
