//! Batch orchestration for prompt generation.
//!
//! The orchestrator fans a batch of image references out into one tokio task
//! per job. Every task pushes its provider calls through a shared
//! [`RateLimitedQueue`] wrapped in the retry executor, so the provider sees
//! one request at a time while backoff waits never hold up other jobs.
//! Job transitions are applied to a shared board and streamed to the caller
//! in the order they happened.

use super::policy::RateLimitPolicy;
use super::provider::{LlmProvider, LlmProviderFactory, LlmRequest, LlmResponse, ProviderKind};
use super::queue::RateLimitedQueue;
use super::retry;
use crate::config::{Config, PromptConfig};
use crate::error::{ConfigError, GenerateError};
use crate::fetch::ImageFetcher;
use crate::types::{Job, JobEvent, JobState, ProgressSnapshot};
use futures_util::future::BoxFuture;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, Notify};

/// A change the caller should render.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchUpdate {
    /// A job changed state; carries the job after the transition.
    Job(Job),
    /// Aggregate progress after a job finished.
    Progress(ProgressSnapshot),
}

/// Final state of every job in a batch, in submission order.
#[derive(Debug, Clone)]
pub struct BatchReport {
    pub jobs: Vec<Job>,
    pub progress: ProgressSnapshot,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.jobs
            .iter()
            .filter(|j| j.state == JobState::Completed)
            .count()
    }

    pub fn failed(&self) -> usize {
        self.jobs
            .iter()
            .filter(|j| j.state == JobState::Failed)
            .count()
    }
}

/// A batch described by provider choice and credential instead of a built provider.
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub references: Vec<String>,
    pub provider: ProviderKind,
    /// Takes precedence over the configured key
    pub api_key: Option<String>,
    /// Takes precedence over the configured model
    pub model: Option<String>,
    /// Spacing and retry policy for this batch. When absent, the configured
    /// policy is used, raised to the free-tier spacing for `:free` models.
    pub policy: Option<RateLimitPolicy>,
}

/// Jobs known to this orchestrator, across batches.
#[derive(Default)]
struct JobBoard {
    jobs: Mutex<HashMap<String, Job>>,
    /// Woken on every terminal transition
    settled: Notify,
}

impl JobBoard {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Job>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn get(&self, reference: &str) -> Option<Job> {
        self.lock().get(reference).cloned()
    }

    /// Apply `event` and publish the updated job while still holding the lock,
    /// so updates reach the caller in transition order.
    fn apply(&self, reference: &str, event: JobEvent, updates: &mpsc::UnboundedSender<BatchUpdate>) {
        let mut jobs = self.lock();
        let Some(job) = jobs.get_mut(reference) else {
            tracing::warn!("Event for unknown job {reference}");
            return;
        };
        if let Err(e) = job.apply(event) {
            tracing::warn!("{e}");
            return;
        }
        let terminal = job.state.is_terminal();
        let _ = updates.send(BatchUpdate::Job(job.clone()));
        drop(jobs);

        if terminal {
            self.settled.notify_waiters();
        }
    }

    /// Wait until the job for `reference` reaches a terminal state.
    async fn wait_settled(&self, reference: &str) -> Option<Job> {
        loop {
            let notified = self.settled.notified();
            match self.get(reference) {
                Some(job) if job.state.is_terminal() => return Some(job),
                None => return None,
                Some(_) => notified.await,
            }
        }
    }
}

/// Drives batches of image references through fetch, queue, retry and provider.
pub struct Orchestrator {
    policy: RateLimitPolicy,
    queue: Arc<RateLimitedQueue<LlmResponse>>,
    fetcher: Arc<dyn ImageFetcher>,
    prompt: PromptConfig,
    board: Arc<JobBoard>,
    /// Bumped by `cancel_pending_requests`; jobs dispatched under an older
    /// epoch stop enqueueing requests.
    cancel_epoch: Arc<AtomicU64>,
}

impl Orchestrator {
    /// Create an orchestrator that owns its own rate-limited queue.
    pub fn new(policy: RateLimitPolicy, fetcher: Arc<dyn ImageFetcher>) -> Self {
        let queue = Arc::new(RateLimitedQueue::new(policy.min_spacing()));
        Self {
            policy,
            queue,
            fetcher,
            prompt: PromptConfig::default(),
            board: Arc::new(JobBoard::default()),
            cancel_epoch: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Use a custom instruction and sampling settings.
    pub fn with_prompt(mut self, prompt: PromptConfig) -> Self {
        self.prompt = prompt;
        self
    }

    /// Record a prompt generated by an earlier run so batches skip it.
    pub fn seed_completed(&self, reference: impl Into<String>, prompt: impl Into<String>) {
        let job = Job::completed(reference, prompt);
        self.board.lock().insert(job.reference.clone(), job);
    }

    /// Current state of one job.
    pub fn job(&self, reference: &str) -> Option<Job> {
        self.board.get(reference)
    }

    /// Snapshot of every known job, sorted by reference.
    pub fn jobs(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.board.lock().values().cloned().collect();
        jobs.sort_by(|a, b| a.reference.cmp(&b.reference));
        jobs
    }

    /// Requests queued but not yet dispatched.
    pub fn pending_requests(&self) -> usize {
        self.queue.size()
    }

    /// Drop every queued request and stop dispatched jobs from queueing more.
    ///
    /// Requests already sent to the provider finish normally. Affected jobs
    /// end up `Failed` with a "queue cleared" reason. Returns the number of
    /// queued requests discarded.
    pub fn cancel_pending_requests(&self) -> usize {
        self.cancel_epoch.fetch_add(1, Ordering::SeqCst);
        self.queue.cancel_all()
    }

    /// Generate prompts for `references`.
    ///
    /// Duplicate references are collapsed. References already `Completed`
    /// are not sent again; `Failed` ones start over. A reference that another
    /// batch on this orchestrator is still working on is waited for rather
    /// than dispatched twice.
    ///
    /// `on_update` receives every job transition and a progress snapshot
    /// after each job finishes. Resolves once every job is `Completed` or
    /// `Failed`; failures are reported per job, never for the batch.
    pub async fn run_batch<F>(
        &self,
        references: &[String],
        provider: Arc<dyn LlmProvider>,
        on_update: F,
    ) -> BatchReport
    where
        F: FnMut(BatchUpdate),
    {
        self.run_batch_with_policy(references, provider, self.policy.clone(), on_update)
            .await
    }

    /// [`run_batch`](Self::run_batch) under `policy` instead of the
    /// orchestrator's own.
    ///
    /// Requests still share this orchestrator's queue, so dispatch stays one
    /// at a time across batches; each request of this batch waits at least
    /// `policy.min_spacing_ms` after the previous dispatch.
    pub async fn run_batch_with_policy<F>(
        &self,
        references: &[String],
        provider: Arc<dyn LlmProvider>,
        policy: RateLimitPolicy,
        mut on_update: F,
    ) -> BatchReport
    where
        F: FnMut(BatchUpdate),
    {
        let mut seen = HashSet::new();
        let batch: Vec<String> = references
            .iter()
            .filter(|r| seen.insert(r.as_str()))
            .cloned()
            .collect();

        let total = batch.len();
        // Captured before any task runs, so a cancel issued right after
        // dispatch still stops jobs that have not reached the queue yet.
        let epoch = self.cancel_epoch.load(Ordering::SeqCst);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut handles = Vec::new();
        let mut completed = 0usize;

        for reference in &batch {
            let claimed = {
                let mut jobs = self.board.lock();
                match jobs.get(reference).map(|j| j.state) {
                    Some(JobState::Completed) => {
                        tracing::debug!("Skipping {reference}: already completed");
                        completed += 1;
                        false
                    }
                    Some(JobState::Failed) | None => {
                        jobs.insert(reference.clone(), Job::new(reference.clone()));
                        true
                    }
                    Some(state) => {
                        tracing::warn!("{reference} is already {state} in another batch, waiting for it");
                        let board = self.board.clone();
                        let tx = tx.clone();
                        let reference = reference.clone();
                        handles.push((
                            reference.clone(),
                            tokio::spawn(async move {
                                if let Some(job) = board.wait_settled(&reference).await {
                                    let _ = tx.send(BatchUpdate::Job(job));
                                }
                            }),
                        ));
                        false
                    }
                }
            };
            if !claimed {
                continue;
            }

            self.board.apply(reference, JobEvent::Dispatched, &tx);
            let job = JobTask {
                reference: reference.clone(),
                policy: policy.clone(),
                queue: self.queue.clone(),
                fetcher: self.fetcher.clone(),
                provider: provider.clone(),
                prompt: self.prompt.clone(),
                board: self.board.clone(),
                updates: tx.clone(),
                cancel_epoch: self.cancel_epoch.clone(),
                epoch,
            };
            handles.push((reference.clone(), tokio::spawn(job.run())));
        }
        drop(tx);

        tracing::info!(
            "Generating prompts for {} of {total} image(s) via {}",
            total - completed,
            provider.name()
        );
        on_update(BatchUpdate::Progress(ProgressSnapshot::new(completed, total)));

        // Ends once every task has dropped its sender.
        while let Some(update) = rx.recv().await {
            let finished = matches!(&update, BatchUpdate::Job(job) if job.state.is_terminal());
            on_update(update);
            if finished {
                completed += 1;
                on_update(BatchUpdate::Progress(ProgressSnapshot::new(completed, total)));
            }
        }

        for (reference, handle) in handles {
            if let Err(e) = handle.await {
                tracing::error!("Job task for {reference} panicked: {e}");
                let (tx, mut rx) = mpsc::unbounded_channel();
                self.board
                    .apply(&reference, JobEvent::Failed(format!("internal error: {e}")), &tx);
                drop(tx);
                if let Some(update) = rx.recv().await {
                    on_update(update);
                    completed += 1;
                    on_update(BatchUpdate::Progress(ProgressSnapshot::new(completed, total)));
                }
            }
        }

        let jobs: Vec<Job> = {
            let board = self.board.lock();
            batch.iter().filter_map(|r| board.get(r).cloned()).collect()
        };
        let done = jobs.iter().filter(|j| j.state.is_terminal()).count();
        BatchReport {
            jobs,
            progress: ProgressSnapshot::new(done, total),
        }
    }

    /// Build the provider for `request` from `config`, then run the batch.
    ///
    /// Fails only when the policy is invalid or the provider cannot be
    /// created (missing credential).
    pub async fn run_request<F>(
        &self,
        config: &Config,
        request: &BatchRequest,
        on_update: F,
    ) -> Result<BatchReport, ConfigError>
    where
        F: FnMut(BatchUpdate),
    {
        let model =
            LlmProviderFactory::resolve_model(request.provider, config, request.model.as_deref());
        let policy = match &request.policy {
            Some(policy) => policy.clone(),
            None => LlmProviderFactory::policy_for(request.provider, &model, config),
        };
        policy.validate()?;

        let provider = LlmProviderFactory::create(
            request.provider,
            config,
            request.api_key.as_deref(),
            Some(&model),
        )?;
        Ok(self
            .run_batch_with_policy(&request.references, Arc::from(provider), policy, on_update)
            .await)
    }
}

type Attempt = BoxFuture<'static, Result<LlmResponse, GenerateError>>;

/// Everything one job's task needs, moved into the task.
struct JobTask {
    reference: String,
    policy: RateLimitPolicy,
    queue: Arc<RateLimitedQueue<LlmResponse>>,
    fetcher: Arc<dyn ImageFetcher>,
    provider: Arc<dyn LlmProvider>,
    prompt: PromptConfig,
    board: Arc<JobBoard>,
    updates: mpsc::UnboundedSender<BatchUpdate>,
    cancel_epoch: Arc<AtomicU64>,
    /// Cancel epoch when the batch dispatched this job
    epoch: u64,
}

impl JobTask {
    async fn run(self) {
        let result = retry::run_with_retry_notify(
            &self.policy,
            || {
                let attempt = (self.cancel_epoch.load(Ordering::SeqCst) == self.epoch).then(|| {
                    self.queue
                        .enqueue_spaced(self.policy.min_spacing(), self.attempt())
                });
                async move {
                    match attempt {
                        Some(pending) => pending.await,
                        None => Err(GenerateError::QueueCleared),
                    }
                }
            },
            |attempt, backoff| {
                self.board
                    .apply(&self.reference, JobEvent::Retrying { attempt, backoff }, &self.updates);
            },
        )
        .await;

        let event = match result {
            Ok(response) => {
                tracing::debug!(
                    "Generated prompt for {} in {}ms",
                    self.reference,
                    response.latency_ms
                );
                JobEvent::Succeeded(response.text)
            }
            Err(e) => {
                tracing::warn!("Failed to generate prompt for {}: {e}", self.reference);
                JobEvent::Failed(e.to_string())
            }
        };
        self.board.apply(&self.reference, event, &self.updates);
    }

    /// One fetch + provider call, run when the queue releases it.
    fn attempt(&self) -> impl FnOnce() -> Attempt + Send + 'static {
        let fetcher = self.fetcher.clone();
        let provider = self.provider.clone();
        let prompt = self.prompt.clone();
        let reference = self.reference.clone();
        move || {
            Box::pin(async move {
                let image = fetcher.fetch(&reference).await?;
                let request = LlmRequest::describe_image(image, &prompt);
                provider.generate(&request).await
            })
        }
    }
}
