//! Job orchestrator - one scheduled run of a task type
//!
//! A run moves through `Running` to `Finished` or `Error`:
//! 1. Refuse to start while another job of the task type is running, unless this
//!    run resumes that job
//! 2. Persist the job row before any crawling, then re-read the signing pool so
//!    services enabled since the last run are selectable
//! 3. Crawl the selected sources one at a time, appending a job detail per
//!    completed source
//! 4. Stop early on credential errors, evicting the credential and notifying
//! 5. Record the final status, also when a crawl panicked

use crate::config::Config;
use crate::crawl::{
    ArticleList, CrawlContext, Crawler, HtmlItemParser, ListSource, MediaSink, NoteList,
    PassOptions, PostList,
};
use crate::fetch::{build_http_client, CommunityRequester, FetchError, QaRequester, Requester};
use crate::jobs::{cut_sources, filter_sources, JobError, RunRequest, TaskType};
use crate::notify::{build_notifier, notice_with_log, Notifier};
use crate::objects::{FsObjectStore, ObjectStore};
use crate::signing::SigningPool;
use crate::storage::{
    CredentialStore, ItemStore, JobRecord, JobStatus, JobStore, SignerStore, Storage,
    Subscription, SubscriptionStore,
};
use crate::HarvestError;
use futures::FutureExt;
use std::any::Any;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::Instrument;
use uuid::Uuid;

/// Summary of a finished run
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub job_id: String,
    pub status: JobStatus,
    /// Sources completed by this invocation, in crawl order
    pub processed: Vec<String>,
    /// Sources skipped because the resumed job had already completed them
    pub already_done: usize,
    pub errors: u32,
    /// Set when a credential error ended the run early
    pub halted: bool,
}

#[derive(Debug, Default)]
struct Tally {
    processed: Vec<String>,
    already_done: usize,
    errors: u32,
    halted: bool,
}

/// Runs one task type over its subscriptions
pub struct JobOrchestrator<S: Storage> {
    storage: Arc<S>,
    crawler: Crawler,
    sources: Vec<Arc<dyn ListSource>>,
    notifier: Arc<dyn Notifier>,
    task: TaskType,
    config_hash: String,
    backfill: bool,
    signing_pool: Option<Arc<SigningPool>>,
}

impl<S: Storage + 'static> JobOrchestrator<S> {
    pub fn new(
        storage: Arc<S>,
        crawler: Crawler,
        task: TaskType,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            storage,
            crawler,
            sources: Vec::new(),
            notifier,
            task,
            config_hash: String::new(),
            backfill: false,
            signing_pool: None,
        }
    }

    /// Registers the list source used for subscriptions of its kind
    pub fn with_source(mut self, source: Arc<dyn ListSource>) -> Self {
        self.sources.push(source);
        self
    }

    pub fn with_backfill(mut self, backfill: bool) -> Self {
        self.backfill = backfill;
        self
    }

    pub fn with_config_hash(mut self, config_hash: impl Into<String>) -> Self {
        self.config_hash = config_hash.into();
        self
    }

    /// Signing pool refreshed from storage at the start of every run
    pub fn with_signing_pool(mut self, pool: Arc<SigningPool>) -> Self {
        self.signing_pool = Some(pool);
        self
    }

    /// Builds the orchestrator of `task` with the platform stack described by `config`
    ///
    /// Must be called inside a Tokio runtime: the platform's permit generator is
    /// spawned here.
    ///
    /// # Arguments
    ///
    /// * `config` - The loaded configuration
    /// * `config_hash` - Hash recorded on every job row
    /// * `storage` - The shared store
    /// * `task` - Which platform this orchestrator crawls
    ///
    /// # Returns
    ///
    /// * `Ok(JobOrchestrator)` - Ready to run
    /// * `Err(HarvestError)` - The HTTP client or the signer registry failed
    pub fn from_config(
        config: &Config,
        config_hash: &str,
        storage: Arc<S>,
        task: TaskType,
    ) -> Result<Self, HarvestError> {
        let client = build_http_client(&config.user_agent)?;
        let credentials: Arc<dyn CredentialStore> = storage.clone();

        let notifier = build_notifier(client.clone(), &config.notify);

        let requester: Arc<dyn Requester>;
        let mut signing_pool = None;
        let mut sources: Vec<Arc<dyn ListSource>> = Vec::new();
        match task {
            TaskType::CrawlQa => {
                let signers: Arc<dyn SignerStore> = storage.clone();
                let pool = Arc::new(SigningPool::load(signers)?);
                if pool.is_empty() {
                    tracing::warn!("No signing service registered, Q&A requests will fail");
                }
                requester = Arc::new(QaRequester::new(
                    client,
                    &config.qa,
                    pool.clone(),
                    credentials,
                ));
                signing_pool = Some(pool);
                sources.push(Arc::new(PostList::new(
                    &config.qa.api_base,
                    config.qa.page_size,
                )));
                sources.push(Arc::new(ArticleList::new(
                    &config.qa.api_base,
                    config.qa.page_size,
                )));
            }
            TaskType::CrawlCommunity => {
                requester = Arc::new(CommunityRequester::new(
                    client,
                    &config.community,
                    credentials,
                ));
                sources.push(Arc::new(NoteList::new(
                    &config.community.api_base,
                    config.community.page_size,
                )));
            }
        }

        let objects: Arc<dyn ObjectStore> = Arc::new(FsObjectStore::new(
            &config.objects.root,
            &config.objects.assets_domain,
        ));
        let items: Arc<dyn ItemStore> = storage.clone();
        let crawler = Crawler::new(requester.clone(), items, Arc::new(HtmlItemParser))
            .with_media(MediaSink::new(
                requester,
                objects,
                config.objects.download_timeout(),
            ));

        let mut orchestrator = Self::new(storage, crawler, task, notifier)
            .with_backfill(config.crawl.backfill)
            .with_config_hash(config_hash);
        for source in sources {
            orchestrator = orchestrator.with_source(source);
        }
        if let Some(pool) = signing_pool {
            orchestrator = orchestrator.with_signing_pool(pool);
        }
        Ok(orchestrator)
    }

    pub fn task(&self) -> TaskType {
        self.task
    }

    /// Runs the task once
    ///
    /// # Arguments
    ///
    /// * `req` - Resume flag and source selection
    ///
    /// # Returns
    ///
    /// * `Ok(RunOutcome)` - The run ended; its status says whether anything failed
    /// * `Err(JobError::AlreadyRunning)` - Another job of this task type is running
    /// * `Err(JobError)` - The job row could not be created or updated
    pub async fn run(&self, req: &RunRequest) -> Result<RunOutcome, JobError> {
        let job = self.start_job(req)?;
        tracing::info!("Job {} ({}) running", job.id, self.task);

        if let Some(pool) = &self.signing_pool {
            if let Err(e) = pool.refresh() {
                tracing::warn!("Keeping previous signing pool, refresh failed: {}", e);
            }
        }

        let result = AssertUnwindSafe(self.crawl_sources(&job.id, req))
            .catch_unwind()
            .await;

        let tally = match result {
            Ok(Ok(tally)) => tally,
            Ok(Err(e)) => {
                tracing::error!("Job {} aborted: {}", job.id, e);
                Tally {
                    errors: 1,
                    ..Tally::default()
                }
            }
            Err(payload) => {
                tracing::error!("Job {} panicked: {}", job.id, panic_message(payload.as_ref()));
                Tally {
                    errors: 1,
                    ..Tally::default()
                }
            }
        };

        let status = if tally.errors > 0 {
            JobStatus::Error
        } else {
            JobStatus::Finished
        };
        self.storage.update_job_status(&job.id, status)?;

        if status == JobStatus::Error {
            notice_with_log(
                self.notifier.as_ref(),
                &format!("{} crawl failed", self.task),
                &job.id,
            )
            .await;
        }

        tracing::info!(
            "Job {} {}: {} sources crawled, {} errors",
            job.id,
            status.to_db_string(),
            tally.processed.len(),
            tally.errors
        );

        Ok(RunOutcome {
            job_id: job.id,
            status,
            processed: tally.processed,
            already_done: tally.already_done,
            errors: tally.errors,
            halted: tally.halted,
        })
    }

    /// Resumes the job of this task type left running by an earlier process
    ///
    /// # Returns
    ///
    /// * `Ok(Some(RunOutcome))` - A running job was found and resumed
    /// * `Ok(None)` - Nothing was running
    /// * `Err(JobError)` - The job table could not be read or updated
    pub async fn resume_running(&self) -> Result<Option<RunOutcome>, JobError> {
        let Some(running) = self.storage.find_running_job(self.task.as_str())? else {
            return Ok(None);
        };
        tracing::warn!("Found orphaned job {} ({}), resuming", running.id, self.task);

        let req = RunRequest {
            resume: true,
            ..RunRequest::default()
        };
        self.run(&req).await.map(Some)
    }

    fn start_job(&self, req: &RunRequest) -> Result<JobRecord, JobError> {
        if let Some(running) = self.storage.find_running_job(self.task.as_str())? {
            if req.resume {
                tracing::info!("Resuming job {}", running.id);
                return Ok(running);
            }
            return Err(JobError::AlreadyRunning {
                task_type: self.task,
                job_id: running.id,
            });
        }

        let id = Uuid::new_v4().to_string();
        Ok(self
            .storage
            .create_job(&id, self.task.as_str(), &self.config_hash)?)
    }

    async fn crawl_sources(&self, job_id: &str, req: &RunRequest) -> Result<Tally, JobError> {
        let subs = self.storage.list_subscriptions(self.task.kinds())?;
        let subs = filter_sources(subs, &req.include, &req.exclude);
        let subs = cut_sources(subs, req.last_crawled.as_deref());
        let done: HashSet<String> = self.storage.job_details(job_id)?.into_iter().collect();

        tracing::info!("{} sources selected, {} already done", subs.len(), done.len());

        let mut tally = Tally::default();
        for sub in subs {
            if done.contains(&sub.key) {
                tracing::debug!("Skipping {}, done earlier in this job", sub.key);
                tally.already_done += 1;
                continue;
            }

            let ctx = CrawlContext::new(job_id, &sub.key);
            let span = ctx.span();
            match self.crawl_source(&sub, &ctx).instrument(span).await {
                Ok(()) => {
                    self.storage.record_job_detail(job_id, &sub.key)?;
                    tally.processed.push(sub.key);
                }
                Err(e) => {
                    tally.errors += 1;
                    if let Some(fetch) = e.as_fetch().filter(|f| f.is_auth_terminal()) {
                        tracing::error!("Stopping job {} at {}: {}", job_id, sub.key, fetch);
                        self.handle_terminal(fetch).await;
                        tally.halted = true;
                        break;
                    }
                    tracing::error!("Crawl of {} failed: {}", sub.key, e);
                }
            }
        }

        Ok(tally)
    }

    async fn crawl_source(&self, sub: &Subscription, ctx: &CrawlContext) -> Result<(), JobError> {
        let source = self
            .sources
            .iter()
            .find(|s| s.kind() == sub.kind)
            .ok_or(JobError::NoSourceForKind(sub.kind))?;

        let latest = self.storage.latest_item_time(sub.kind, &sub.author_id)?;
        let opts = PassOptions::forward(source.as_ref(), &sub.author_id, latest);
        self.crawler
            .run_pass(source.as_ref(), &sub.author_id, opts, ctx)
            .await?;

        if self.backfill {
            let backfill_ctx = ctx.next_pass();
            let span = backfill_ctx.span();
            self.crawler
                .run_backfill(source.as_ref(), self.storage.as_ref(), sub, &backfill_ctx)
                .instrument(span)
                .await?;
        }

        Ok(())
    }

    async fn handle_terminal(&self, error: &FetchError) {
        let title = match error.evicts() {
            Some(kind) => {
                match self.storage.del_credential(kind) {
                    Ok(()) => tracing::warn!("Evicted {} credential", kind),
                    Err(e) => tracing::error!("Failed to evict {} credential: {}", kind, e),
                }
                format!("Invalid {} credential", kind)
            }
            None => match error {
                FetchError::NoAvailableSigner => "No available signing service".to_string(),
                _ => "Need to update credentials".to_string(),
            },
        };

        notice_with_log(self.notifier.as_ref(), &title, &error.to_string()).await;
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawl::testing::{qa_page, Canned, FakeRequester};
    use crate::crawl::ContentKind;
    use crate::notify::RecordingNotifier;
    use crate::signing::CredentialKind;
    use crate::storage::SqliteStorage;
    use std::time::Duration;

    const BASE: &str = "https://qa.example.com";

    struct Fixture {
        storage: Arc<SqliteStorage>,
        requester: Arc<FakeRequester>,
        notifier: Arc<RecordingNotifier>,
        orchestrator: JobOrchestrator<SqliteStorage>,
    }

    fn fixture(authors: &[&str]) -> Fixture {
        let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
        for author in authors {
            storage.add_subscription(ContentKind::Post, author).unwrap();
        }
        let requester = Arc::new(FakeRequester::new());
        let notifier = Arc::new(RecordingNotifier::default());

        let crawler = Crawler::new(requester.clone(), storage.clone(), Arc::new(HtmlItemParser));
        let orchestrator =
            JobOrchestrator::new(storage.clone(), crawler, TaskType::CrawlQa, notifier.clone())
                .with_source(Arc::new(PostList::new(BASE, 20)));

        Fixture {
            storage,
            requester,
            notifier,
            orchestrator,
        }
    }

    fn list_url(author: &str) -> String {
        PostList::new(BASE, 20).list_url(author, 0)
    }

    fn serve(f: &Fixture, author: &str, ids: &[u64]) {
        f.requester
            .on_json(&list_url(author), qa_page(Some(ids.len() as u64), true, ids));
    }

    #[tokio::test]
    async fn test_successful_run_records_details() {
        let f = fixture(&["a", "b"]);
        serve(&f, "a", &[2, 1]);
        serve(&f, "b", &[3]);

        let outcome = f.orchestrator.run(&RunRequest::default()).await.unwrap();

        assert_eq!(outcome.status, JobStatus::Finished);
        assert_eq!(outcome.processed, vec!["post:a", "post:b"]);
        assert_eq!(
            f.storage.job_details(&outcome.job_id).unwrap(),
            vec!["post:a", "post:b"]
        );
        let job = f.storage.get_job(&outcome.job_id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Finished);
        assert!(f.notifier.titles().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_run_is_refused() {
        let f = fixture(&["a"]);
        let running = f.storage.create_job("job-1", "crawl-qa", "").unwrap();

        let err = f.orchestrator.run(&RunRequest::default()).await.unwrap_err();

        assert!(matches!(err, JobError::AlreadyRunning { ref job_id, .. } if *job_id == running.id));
        assert_eq!(f.storage.list_jobs(None).unwrap().len(), 1);
        assert!(f.requester.calls().is_empty());
    }

    #[tokio::test]
    async fn test_resume_skips_completed_sources() {
        let f = fixture(&["a", "b", "c"]);
        f.storage.create_job("job-1", "crawl-qa", "").unwrap();
        f.storage.record_job_detail("job-1", "post:a").unwrap();
        f.storage.record_job_detail("job-1", "post:b").unwrap();
        serve(&f, "c", &[1]);

        let outcome = f
            .orchestrator
            .run(&RunRequest {
                resume: true,
                ..RunRequest::default()
            })
            .await
            .unwrap();

        assert_eq!(outcome.job_id, "job-1");
        assert_eq!(outcome.processed, vec!["post:c"]);
        assert_eq!(outcome.already_done, 2);
        assert_eq!(f.requester.calls(), vec![list_url("c")]);
        assert_eq!(f.storage.list_jobs(None).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_credential_error_halts_and_evicts() {
        let f = fixture(&["a", "b"]);
        f.storage
            .set_credential(CredentialKind::QaSession, "z", Duration::from_secs(3600))
            .unwrap();
        f.requester.on(&list_url("a"), Canned::NeedLogin);
        serve(&f, "b", &[1]);

        let outcome = f.orchestrator.run(&RunRequest::default()).await.unwrap();

        assert_eq!(outcome.status, JobStatus::Error);
        assert!(outcome.halted);
        assert!(!f.requester.called(&list_url("b")));
        assert!(f
            .storage
            .get_credential(CredentialKind::QaSession)
            .unwrap()
            .is_none());
        assert_eq!(
            f.notifier.titles(),
            vec!["Invalid qa_session credential", "crawl-qa crawl failed"]
        );
    }

    #[tokio::test]
    async fn test_other_errors_continue_with_next_source() {
        let f = fixture(&["a", "b"]);
        // no canned response for "a": the fake answers with a bad status
        serve(&f, "b", &[1]);

        let outcome = f.orchestrator.run(&RunRequest::default()).await.unwrap();

        assert_eq!(outcome.status, JobStatus::Error);
        assert!(!outcome.halted);
        assert_eq!(outcome.errors, 1);
        assert_eq!(outcome.processed, vec!["post:b"]);
        assert_eq!(f.storage.job_details(&outcome.job_id).unwrap(), vec!["post:b"]);
    }

    #[tokio::test]
    async fn test_panic_marks_job_error() {
        let f = fixture(&["a"]);
        f.requester.on(&list_url("a"), Canned::Panic);

        let outcome = f.orchestrator.run(&RunRequest::default()).await.unwrap();

        assert_eq!(outcome.status, JobStatus::Error);
        let job = f.storage.get_job(&outcome.job_id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Error);
        assert!(f.storage.find_running_job("crawl-qa").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_include_filter_and_last_crawled() {
        let f = fixture(&["a", "b", "c"]);
        serve(&f, "c", &[1]);

        let outcome = f
            .orchestrator
            .run(&RunRequest {
                include: vec!["post:a".into(), "post:c".into()],
                last_crawled: Some("post:a".into()),
                ..RunRequest::default()
            })
            .await
            .unwrap();

        assert_eq!(outcome.processed, vec!["post:c"]);
        assert_eq!(f.requester.calls(), vec![list_url("c")]);
    }

    #[tokio::test]
    async fn test_resume_running_picks_up_orphaned_job() {
        let f = fixture(&["a", "b"]);
        f.storage.create_job("job-1", "crawl-qa", "").unwrap();
        f.storage.record_job_detail("job-1", "post:a").unwrap();
        serve(&f, "b", &[1]);

        let outcome = f.orchestrator.resume_running().await.unwrap().unwrap();

        assert_eq!(outcome.job_id, "job-1");
        assert_eq!(outcome.processed, vec!["post:b"]);
        assert_eq!(outcome.already_done, 1);
        assert_eq!(f.requester.calls(), vec![list_url("b")]);
        assert_eq!(
            f.storage.get_job("job-1").unwrap().unwrap().status,
            JobStatus::Finished
        );

        // the next scheduled run is no longer blocked
        serve(&f, "a", &[2]);
        let next = f.orchestrator.run(&RunRequest::default()).await.unwrap();
        assert_ne!(next.job_id, "job-1");
        assert_eq!(next.status, JobStatus::Finished);
    }

    #[tokio::test]
    async fn test_resume_running_without_job_does_nothing() {
        let f = fixture(&["a"]);

        assert!(f.orchestrator.resume_running().await.unwrap().is_none());
        assert!(f.requester.calls().is_empty());
        assert!(f.storage.list_jobs(None).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_run_refreshes_signing_pool() {
        let f = fixture(&["a"]);
        serve(&f, "a", &[1]);
        let signer = f.storage.register_signer("s1", "http://s1.local").unwrap();
        let pool = Arc::new(SigningPool::load(f.storage.clone()).unwrap());
        let entry = pool.select().unwrap();
        pool.mark_unavailable(&entry);

        f.storage.set_signer_available(&signer.id, true).unwrap();
        let orchestrator = f.orchestrator.with_signing_pool(pool.clone());
        orchestrator.run(&RunRequest::default()).await.unwrap();

        assert_eq!(pool.select().unwrap().slug, "s1");
    }
}
