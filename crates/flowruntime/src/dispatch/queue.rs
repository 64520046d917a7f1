use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flowcore::{DispatchError, ExecutionId, Value, WorkflowDefinition, WorkflowId};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;

/// A submitted run waiting for a worker. Carries the definition as it was
/// at submit time, so a recovered job runs without the workflow store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunJob {
    pub run_id: ExecutionId,
    pub workflow_id: WorkflowId,
    pub workflow: WorkflowDefinition,
    #[serde(default)]
    pub initial_input: Value,
    #[serde(default)]
    pub priority: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initiator: Option<String>,
    pub submitted_at: DateTime<Utc>,
    #[serde(default)]
    pub seq: u64,
}

impl RunJob {
    pub fn new(workflow: WorkflowDefinition, initial_input: Value) -> Self {
        Self {
            run_id: ExecutionId::new_v4(),
            workflow_id: workflow.id,
            workflow,
            initial_input,
            priority: 0,
            initiator: None,
            submitted_at: Utc::now(),
            seq: 0,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_run_id(mut self, run_id: ExecutionId) -> Self {
        self.run_id = run_id;
        self
    }

    pub fn with_initiator(mut self, initiator: impl Into<String>) -> Self {
        self.initiator = Some(initiator.into());
        self
    }
}

/// Heap entry: higher priority first, then submission order.
struct Queued(RunJob);

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Queued {}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Queued {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .priority
            .cmp(&other.0.priority)
            .then_with(|| other.0.seq.cmp(&self.0.seq))
    }
}

/// Storage behind the dispatch queue
#[async_trait]
pub trait QueueStore: Send + Sync {
    async fn push(&self, job: RunJob) -> Result<(), DispatchError>;

    /// Take the next job. It stays owed until acked.
    async fn pop(&self) -> Result<Option<RunJob>, DispatchError>;

    async fn ack(&self, run_id: ExecutionId) -> Result<(), DispatchError>;

    async fn pending(&self) -> usize;
}

#[derive(Default)]
struct HeapState {
    heap: BinaryHeap<Queued>,
    seq: u64,
}

impl HeapState {
    fn push(&mut self, mut job: RunJob) {
        self.seq += 1;
        job.seq = self.seq;
        self.heap.push(Queued(job));
    }
}

/// Process-local queue; lost on restart
#[derive(Default)]
pub struct MemoryQueueStore {
    state: Mutex<HeapState>,
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn push(&self, job: RunJob) -> Result<(), DispatchError> {
        self.state.lock().await.push(job);
        Ok(())
    }

    async fn pop(&self) -> Result<Option<RunJob>, DispatchError> {
        Ok(self.state.lock().await.heap.pop().map(|q| q.0))
    }

    async fn ack(&self, _run_id: ExecutionId) -> Result<(), DispatchError> {
        Ok(())
    }

    async fn pending(&self) -> usize {
        self.state.lock().await.heap.len()
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
enum JournalRecord {
    Enqueued { job: RunJob },
    #[serde(rename_all = "camelCase")]
    Acked { run_id: ExecutionId },
}

struct JournalState {
    heap: HeapState,
    file: File,
}

/// Append-only JSON-lines journal. Jobs popped but never acked (the process
/// died mid-run) are delivered again after reopening.
pub struct FileQueueStore {
    path: PathBuf,
    state: Mutex<JournalState>,
}

impl FileQueueStore {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, DispatchError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let mut outstanding: HashMap<ExecutionId, RunJob> = HashMap::new();
        match fs::read_to_string(&path).await {
            Ok(contents) => {
                for (line_no, line) in contents.lines().enumerate() {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<JournalRecord>(line) {
                        Ok(JournalRecord::Enqueued { job }) => {
                            outstanding.insert(job.run_id, job);
                        }
                        Ok(JournalRecord::Acked { run_id }) => {
                            outstanding.remove(&run_id);
                        }
                        Err(e) => {
                            // A torn final write is expected after a crash.
                            tracing::warn!(path = %path.display(), line = line_no + 1, error = %e, "skipping corrupt journal record");
                        }
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let mut jobs: Vec<RunJob> = outstanding.into_values().collect();
        jobs.sort_by_key(|j| j.seq);
        // Renumber before writing so the journal agrees with the heap.
        for (i, job) in jobs.iter_mut().enumerate() {
            job.seq = i as u64 + 1;
        }

        // Compact: rewrite the journal with only what is still owed.
        let mut compacted = String::new();
        for job in &jobs {
            compacted.push_str(&serde_json::to_string(&JournalRecord::Enqueued { job: job.clone() })?);
            compacted.push('\n');
        }
        let tmp = path.with_extension("compact");
        fs::write(&tmp, compacted).await?;
        fs::rename(&tmp, &path).await?;

        let mut heap = HeapState::default();
        for job in jobs {
            heap.push(job);
        }
        if !heap.heap.is_empty() {
            tracing::info!(path = %path.display(), pending = heap.heap.len(), "recovered queued runs");
        }

        let file = OpenOptions::new().create(true).append(true).open(&path).await?;
        Ok(Self {
            path,
            state: Mutex::new(JournalState { heap, file }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn append(file: &mut File, record: &JournalRecord) -> Result<(), DispatchError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        file.write_all(&line).await?;
        file.flush().await?;
        file.sync_data().await?;
        Ok(())
    }
}

#[async_trait]
impl QueueStore for FileQueueStore {
    async fn push(&self, job: RunJob) -> Result<(), DispatchError> {
        let mut state = self.state.lock().await;
        let seq = state.heap.seq + 1;
        let job = RunJob { seq, ..job };
        Self::append(&mut state.file, &JournalRecord::Enqueued { job: job.clone() }).await?;
        state.heap.push(job);
        Ok(())
    }

    async fn pop(&self) -> Result<Option<RunJob>, DispatchError> {
        Ok(self.state.lock().await.heap.heap.pop().map(|q| q.0))
    }

    async fn ack(&self, run_id: ExecutionId) -> Result<(), DispatchError> {
        let mut state = self.state.lock().await;
        Self::append(&mut state.file, &JournalRecord::Acked { run_id }).await
    }

    async fn pending(&self) -> usize {
        self.state.lock().await.heap.heap.len()
    }
}

/// Submission side of background dispatch: a store plus a wake-up signal
/// for idle workers.
pub struct DispatchQueue {
    store: Box<dyn QueueStore>,
    notify: Notify,
}

impl DispatchQueue {
    pub fn new(store: impl QueueStore + 'static) -> Self {
        Self {
            store: Box::new(store),
            notify: Notify::new(),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(MemoryQueueStore::new())
    }

    pub async fn submit(&self, job: RunJob) -> Result<ExecutionId, DispatchError> {
        let run_id = job.run_id;
        tracing::debug!(run_id = %run_id, workflow_id = %job.workflow_id, priority = job.priority, "run queued");
        self.store.push(job).await?;
        self.notify.notify_one();
        Ok(run_id)
    }

    /// Wait for the next job, or `None` once `shutdown` fires.
    pub async fn next(&self, shutdown: &CancellationToken) -> Option<RunJob> {
        loop {
            if shutdown.is_cancelled() {
                return None;
            }
            match self.store.pop().await {
                Ok(Some(job)) => return Some(job),
                Ok(None) => {}
                Err(e) => tracing::error!(error = %e, "failed to pop queued run"),
            }
            tokio::select! {
                _ = shutdown.cancelled() => return None,
                _ = self.notify.notified() => {}
            }
        }
    }

    pub async fn ack(&self, run_id: ExecutionId) {
        if let Err(e) = self.store.ack(run_id).await {
            tracing::error!(run_id = %run_id, error = %e, "failed to ack queued run");
        }
        // Another worker may be parked while jobs remain.
        self.notify.notify_one();
    }

    pub async fn pending(&self) -> usize {
        self.store.pending().await
    }
}
