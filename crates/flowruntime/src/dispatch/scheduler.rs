use super::cron::CronSchedule;
use super::queue::RunJob;
use crate::runtime::FlowRuntime;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use flowcore::{
    DispatchError, ExecutionId, FlowError, TriggerSpec, TriggerType, Value, WorkflowDefinition,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// When a time-based trigger fires next
#[derive(Debug, Clone)]
pub enum Schedule {
    Interval(ChronoDuration),
    Cron(CronSchedule),
}

impl Schedule {
    /// `None` for triggers that are not time based.
    pub fn from_trigger(trigger: &TriggerType) -> Result<Option<Self>, DispatchError> {
        match trigger {
            TriggerType::Interval { every_secs } if *every_secs > 0 => Ok(Some(Schedule::Interval(
                ChronoDuration::seconds(*every_secs as i64),
            ))),
            TriggerType::Cron { expression } => Ok(Some(Schedule::Cron(CronSchedule::parse(expression)?))),
            _ => Ok(None),
        }
    }

    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Schedule::Interval(every) => Some(after + *every),
            Schedule::Cron(cron) => cron.next_after(after),
        }
    }
}

/// Remembers when each trigger last fired, so restarts do not replay history
#[async_trait]
pub trait TriggerStateStore: Send + Sync {
    async fn last_fired(&self, trigger_id: Uuid) -> Option<DateTime<Utc>>;

    async fn set_last_fired(&self, trigger_id: Uuid, at: DateTime<Utc>) -> Result<(), DispatchError>;
}

#[derive(Default)]
pub struct MemoryTriggerState {
    fired: RwLock<HashMap<Uuid, DateTime<Utc>>>,
}

impl MemoryTriggerState {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TriggerStateStore for MemoryTriggerState {
    async fn last_fired(&self, trigger_id: Uuid) -> Option<DateTime<Utc>> {
        self.fired.read().await.get(&trigger_id).copied()
    }

    async fn set_last_fired(&self, trigger_id: Uuid, at: DateTime<Utc>) -> Result<(), DispatchError> {
        self.fired.write().await.insert(trigger_id, at);
        Ok(())
    }
}

/// Trigger state kept in a JSON file, rewritten on every change
pub struct FileTriggerState {
    path: PathBuf,
    fired: RwLock<HashMap<Uuid, DateTime<Utc>>>,
}

impl FileTriggerState {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, DispatchError> {
        let path = path.as_ref().to_path_buf();
        let fired = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            fired: RwLock::new(fired),
        })
    }
}

#[async_trait]
impl TriggerStateStore for FileTriggerState {
    async fn last_fired(&self, trigger_id: Uuid) -> Option<DateTime<Utc>> {
        self.fired.read().await.get(&trigger_id).copied()
    }

    async fn set_last_fired(&self, trigger_id: Uuid, at: DateTime<Utc>) -> Result<(), DispatchError> {
        let mut fired = self.fired.write().await;
        fired.insert(trigger_id, at);
        let bytes = serde_json::to_vec_pretty(&*fired)?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

/// Evaluates interval and cron triggers and enqueues runs when they fire.
///
/// However many windows were missed (the process was down, a tick was
/// slow), a trigger enqueues at most one catch-up run per evaluation and
/// its clock moves to "now".
pub struct TriggerScheduler {
    runtime: Arc<FlowRuntime>,
    state: Arc<dyn TriggerStateStore>,
    tick: Duration,
}

impl TriggerScheduler {
    pub fn new(runtime: Arc<FlowRuntime>, state: Arc<dyn TriggerStateStore>) -> Self {
        Self {
            runtime,
            state,
            tick: Duration::from_secs(1),
        }
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Evaluate every enabled time-based trigger once.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<Vec<ExecutionId>, FlowError> {
        let mut submitted = Vec::new();

        for workflow in self.runtime.persistence().list_workflows().await? {
            for trigger in workflow.triggers.iter().filter(|t| t.enabled) {
                let schedule = match Schedule::from_trigger(&trigger.trigger_type) {
                    Ok(Some(schedule)) => schedule,
                    Ok(None) => continue,
                    Err(e) => {
                        tracing::warn!(workflow_id = %workflow.id, trigger_id = %trigger.id, error = %e, "skipping invalid trigger");
                        continue;
                    }
                };

                if let Some(run_id) = self.evaluate(&workflow, trigger, &schedule, now).await? {
                    submitted.push(run_id);
                }
            }
        }
        Ok(submitted)
    }

    async fn evaluate(
        &self,
        workflow: &WorkflowDefinition,
        trigger: &TriggerSpec,
        schedule: &Schedule,
        now: DateTime<Utc>,
    ) -> Result<Option<ExecutionId>, FlowError> {
        let Some(last) = self.state.last_fired(trigger.id).await else {
            // First sighting: start the clock, do not fire for the past.
            self.state.set_last_fired(trigger.id, now).await?;
            return Ok(None);
        };

        match schedule.next_after(last) {
            Some(due) if due <= now => {
                let job = RunJob::new(workflow.clone(), Value::Null)
                    .with_initiator(format!("trigger:{}", trigger.id));
                // Advance first: a crash after this point loses one run
                // rather than replaying it.
                self.state.set_last_fired(trigger.id, now).await?;
                let run_id = self.runtime.submit(job).await?;
                tracing::info!(
                    workflow_id = %workflow.id,
                    trigger_id = %trigger.id,
                    run_id = %run_id,
                    due = %due,
                    "trigger fired"
                );
                Ok(Some(run_id))
            }
            _ => Ok(None),
        }
    }

    /// Run the scheduler until `shutdown` fires.
    pub fn spawn(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.tick);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            tracing::info!(tick_ms = self.tick.as_millis() as u64, "trigger scheduler started");
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = self.tick(Utc::now()).await {
                            tracing::error!(error = %e, "trigger evaluation failed");
                        }
                    }
                }
            }
            tracing::info!("trigger scheduler stopped");
        })
    }
}
