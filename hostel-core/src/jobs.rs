//! The asynchronous request manager: deferred job submission, fingerprint
//! deduplication, a bounded worker pool, status polling, and cooperative
//! cancellation.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, OnceLock};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use http::Method;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::HttpError;
use crate::http::{HttpRequest, HttpResponse};
use crate::routing::BoxFuture;

// ── Rejection rules ─────────────────────────────────────────────────────────

/// A snapshot of a live job, handed to custom matchers.
#[derive(Clone, Debug)]
pub struct QueuedJobView {
    pub id: Uuid,
    pub verb: Method,
    pub path: String,
    pub created_at: DateTime<Utc>,
}

/// What a custom matcher decides about one live job.
pub enum MatcherVerdict {
    /// This job is unrelated; keep scanning.
    Unrelated,
    /// Reuse this job's id for the new request.
    Reuse,
    /// Refuse the new request outright (429).
    Reject,
}

pub type Matcher = Arc<dyn Fn(&HttpRequest, &QueuedJobView) -> MatcherVerdict + Send + Sync>;

/// How a deferred method deduplicates concurrent submissions.
#[derive(Clone)]
pub enum Rejection {
    /// Defer to the rule configured on the application options.
    Default,
    /// Every submission starts a new job.
    Never,
    /// One live job per `(verb, path)`.
    SamePath,
    /// One live job per `(verb, path, content hash)`.
    SameContent,
    /// One live job per `(verb, path, identity)`. Anonymous submissions are
    /// refused with 401.
    SameIdentity,
    /// The union of `SameContent` and `SameIdentity`.
    SameRequest,
    /// A user predicate scanned over the live jobs.
    Custom(Matcher),
}

impl std::fmt::Debug for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Rejection::Default => "Default",
            Rejection::Never => "Never",
            Rejection::SamePath => "SamePath",
            Rejection::SameContent => "SameContent",
            Rejection::SameIdentity => "SameIdentity",
            Rejection::SameRequest => "SameRequest",
            Rejection::Custom(_) => "Custom",
        };
        write!(f, "Rejection::{name}")
    }
}

/// The dedup key derived from a request under a rejection rule.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct Fingerprint {
    verb: String,
    path: String,
    content: Option<u64>,
    identity: Option<String>,
}

/// Compute the fingerprint for a request, or `None` under [`Rejection::Never`]
/// and custom matchers.
pub fn fingerprint_of(
    rule: &Rejection,
    request: &HttpRequest,
    identity_key: Option<&str>,
) -> Result<Option<Fingerprint>, HttpError> {
    let base = |content, identity: Option<String>| Fingerprint {
        verb: request.method().as_str().to_string(),
        path: request.path().to_string(),
        content,
        identity,
    };
    let content_hash = || {
        let mut hasher = DefaultHasher::new();
        request.body().map(|b| &b[..]).unwrap_or_default().hash(&mut hasher);
        hasher.finish()
    };
    match rule {
        // `Default` is resolved to the configured rule before reaching here.
        Rejection::Default | Rejection::Never | Rejection::Custom(_) => Ok(None),
        Rejection::SamePath => Ok(Some(base(None, None))),
        Rejection::SameContent => Ok(Some(base(Some(content_hash()), None))),
        Rejection::SameIdentity => match identity_key {
            Some(key) => Ok(Some(base(None, Some(key.to_string())))),
            None => Err(HttpError::Unauthorized),
        },
        Rejection::SameRequest => match identity_key {
            Some(key) => Ok(Some(base(Some(content_hash()), Some(key.to_string())))),
            None => Err(HttpError::Unauthorized),
        },
    }
}

// ── Jobs ────────────────────────────────────────────────────────────────────

/// Monotonic job states: `Queued → Running → {Done, Cancelled, Failed}`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum JobState {
    Queued,
    Running,
    Done,
    Cancelled,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Done | JobState::Cancelled | JobState::Failed)
    }
}

/// What a finished job task produced.
pub struct JobOutcome {
    /// The fully rendered response the next poll will deliver.
    pub response: HttpResponse,
    /// Whether the handler failed (the response carries the mapped error).
    pub failed: bool,
}

struct Job {
    id: Uuid,
    verb: Method,
    path: String,
    created_at: DateTime<Utc>,
    fingerprint: Option<Fingerprint>,
    state: Mutex<JobState>,
    token: CancellationToken,
    response: OnceLock<HttpResponse>,
}

impl Job {
    fn state(&self) -> JobState {
        *self.state.lock().unwrap()
    }

    fn view(&self) -> QueuedJobView {
        QueuedJobView {
            id: self.id,
            verb: self.verb.clone(),
            path: self.path.clone(),
            created_at: self.created_at,
        }
    }

    /// Queued → Running. Refused once the job left the queued state.
    fn mark_running(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        if *state == JobState::Queued {
            *state = JobState::Running;
            true
        } else {
            false
        }
    }

    fn finish(&self, outcome: JobOutcome) {
        let mut state = self.state.lock().unwrap();
        if state.is_terminal() {
            return;
        }
        *state = if outcome.failed {
            JobState::Failed
        } else {
            JobState::Done
        };
        let _ = self.response.set(outcome.response);
    }

    fn finish_cancelled(&self) {
        let mut state = self.state.lock().unwrap();
        if state.is_terminal() {
            return;
        }
        *state = JobState::Cancelled;
        let _ = self.response.set(cancelled_response());
    }
}

/// The rendered terminal form of a cancelled job.
fn cancelled_response() -> HttpResponse {
    HttpResponse::new(
        http::StatusCode::CONFLICT,
        http::HeaderMap::new(),
        bytes::Bytes::from_static(b"cancelled"),
    )
}

// ── Manager ─────────────────────────────────────────────────────────────────

struct WorkItem {
    job: Arc<Job>,
    task: BoxFuture<JobOutcome>,
}

/// What a poll observed.
pub enum PollOutcome {
    /// Still queued or running.
    Pending,
    /// The stored terminal response; the job has now been removed.
    Terminal(HttpResponse),
    /// No such job id.
    Unknown,
}

/// Owns the job table, the fingerprint index, and the bounded worker pool.
pub struct JobManager {
    jobs: DashMap<Uuid, Arc<Job>>,
    by_fingerprint: DashMap<Fingerprint, Uuid>,
    queue: mpsc::Sender<WorkItem>,
    shutdown: CancellationToken,
}

impl JobManager {
    /// Spawn `workers` pool tasks with a queue bounded at `queue_size`.
    ///
    /// Must be called inside a tokio runtime.
    pub fn start(workers: usize, queue_size: usize) -> Arc<JobManager> {
        let (tx, rx) = mpsc::channel::<WorkItem>(queue_size.max(1));
        let shutdown = CancellationToken::new();
        let manager = Arc::new(JobManager {
            jobs: DashMap::new(),
            by_fingerprint: DashMap::new(),
            queue: tx,
            shutdown,
        });

        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        for _ in 0..workers.max(1) {
            let rx = rx.clone();
            let shutdown = manager.shutdown.clone();
            tokio::spawn(async move {
                loop {
                    let item = {
                        let mut guard = rx.lock().await;
                        tokio::select! {
                            _ = shutdown.cancelled() => return,
                            item = guard.recv() => item,
                        }
                    };
                    let Some(item) = item else { return };
                    run_item(item).await;
                }
            });
        }
        manager
    }

    /// Submit a deferred request.
    ///
    /// With a fingerprint, an existing queued/running job with the same print
    /// is reused. A custom matcher may instead reuse or reject based on the
    /// live job set. Saturation of the bounded queue maps to 503.
    pub fn submit<F>(
        &self,
        request: &HttpRequest,
        rule: &Rejection,
        fingerprint: Option<Fingerprint>,
        make_task: F,
    ) -> Result<Uuid, HttpError>
    where
        F: FnOnce(CancellationToken) -> BoxFuture<JobOutcome>,
    {
        if let Rejection::Custom(matcher) = rule {
            for entry in self.jobs.iter() {
                let job = entry.value();
                if job.state().is_terminal() {
                    continue;
                }
                match matcher(request, &job.view()) {
                    MatcherVerdict::Reuse => return Ok(job.id),
                    MatcherVerdict::Reject => return Err(HttpError::TooManyRequests),
                    MatcherVerdict::Unrelated => {}
                }
            }
        }

        if let Some(print) = &fingerprint {
            // Hold the index entry while deciding, so two identical
            // submissions cannot both create a job.
            let entry = self.by_fingerprint.entry(print.clone());
            match entry {
                dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                    let existing = self.jobs.get(occupied.get());
                    if let Some(job) = existing {
                        if !job.state().is_terminal() {
                            return Ok(job.id);
                        }
                    }
                    let id = self.enqueue(request, fingerprint.clone(), make_task)?;
                    occupied.insert(id);
                    Ok(id)
                }
                dashmap::mapref::entry::Entry::Vacant(vacant) => {
                    let id = self.enqueue(request, fingerprint.clone(), make_task)?;
                    vacant.insert(id);
                    Ok(id)
                }
            }
        } else {
            self.enqueue(request, None, make_task)
        }
    }

    fn enqueue<F>(
        &self,
        request: &HttpRequest,
        fingerprint: Option<Fingerprint>,
        make_task: F,
    ) -> Result<Uuid, HttpError>
    where
        F: FnOnce(CancellationToken) -> BoxFuture<JobOutcome>,
    {
        let token = CancellationToken::new();
        let job = Arc::new(Job {
            id: Uuid::new_v4(),
            verb: request.method().clone(),
            path: request.path().to_string(),
            created_at: Utc::now(),
            fingerprint,
            state: Mutex::new(JobState::Queued),
            token: token.clone(),
            response: OnceLock::new(),
        });
        let task = make_task(token);
        let id = job.id;
        self.jobs.insert(id, job.clone());
        if self.queue.try_send(WorkItem { job, task }).is_err() {
            self.jobs.remove(&id);
            return Err(HttpError::ServiceUnavailable);
        }
        Ok(id)
    }

    /// Observe a job's state. Delivering a terminal response removes the job;
    /// its id is never reused.
    pub fn poll(&self, id: Uuid) -> PollOutcome {
        let Some(job) = self.jobs.get(&id).map(|j| j.clone()) else {
            return PollOutcome::Unknown;
        };
        if !job.state().is_terminal() {
            return PollOutcome::Pending;
        }
        let response = job
            .response
            .get()
            .cloned()
            .unwrap_or_else(cancelled_response);
        self.remove(&job);
        PollOutcome::Terminal(response)
    }

    /// Cancel a job. Queued jobs never run; running jobs observe their token
    /// at the next safe point. Returns the terminal response, which later
    /// polls keep receiving until one of them removes the job.
    pub fn cancel(&self, id: Uuid) -> Option<HttpResponse> {
        let job = self.jobs.get(&id).map(|j| j.clone())?;
        job.token.cancel();
        job.finish_cancelled();
        job.response.get().cloned()
    }

    /// The number of live (queued or running) jobs.
    pub fn live_count(&self) -> usize {
        self.jobs
            .iter()
            .filter(|e| !e.value().state().is_terminal())
            .count()
    }

    fn remove(&self, job: &Arc<Job>) {
        self.jobs.remove(&job.id);
        if let Some(print) = &job.fingerprint {
            // Only clear the index if it still points at this job.
            if let Some(current) = self.by_fingerprint.get(print).map(|e| *e) {
                if current == job.id {
                    self.by_fingerprint.remove(print);
                }
            }
        }
    }

    /// Cancel every live job and stop the workers.
    pub fn shutdown(&self) {
        for entry in self.jobs.iter() {
            entry.value().token.cancel();
        }
        self.shutdown.cancel();
    }
}

async fn run_item(item: WorkItem) {
    let job = item.job;
    if !job.mark_running() {
        // Cancelled while still queued.
        return;
    }
    let token = job.token.clone();
    tokio::select! {
        biased;
        _ = token.cancelled() => job.finish_cancelled(),
        outcome = item.task => job.finish(outcome),
    }
}
