use flowcore::{EventType, ExecutionId, MonitorEvent, Value};
use futures::Stream;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(15);

type Channels = Mutex<HashMap<ExecutionId, Vec<Subscriber>>>;

struct Subscriber {
    id: u64,
    sender: mpsc::UnboundedSender<MonitorEvent>,
    shutdown: CancellationToken,
}

/// Per-run publish/subscribe channel for lifecycle events.
///
/// Delivery is best-effort and at-most-once per live subscriber: an event
/// published while nobody listens is gone, and late joiners get no replay.
pub struct ExecutionMonitor {
    channels: Arc<Channels>,
    firehose: broadcast::Sender<MonitorEvent>,
    heartbeat: Duration,
    next_id: AtomicU64,
}

impl ExecutionMonitor {
    pub fn new(heartbeat: Duration, buffer: usize) -> Self {
        let (firehose, _) = broadcast::channel(buffer.max(1));
        Self {
            channels: Arc::new(Mutex::new(HashMap::new())),
            firehose,
            heartbeat,
            next_id: AtomicU64::new(1),
        }
    }

    /// Attach to a run's events. The stream starts with `connected`, then
    /// carries the run's events interleaved with periodic `ping`s, and ends
    /// when the run is closed.
    ///
    /// Must be called from within a tokio runtime (the heartbeat is a task).
    pub fn subscribe(&self, run_id: ExecutionId) -> EventStream {
        let (sender, receiver) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let _ = sender.send(MonitorEvent::new(
            EventType::Connected,
            run_id,
            serde_json::json!({ "runId": run_id }),
        ));

        spawn_heartbeat(run_id, self.heartbeat, sender.clone(), shutdown.clone());

        self.channels.lock().entry(run_id).or_default().push(Subscriber {
            id,
            sender,
            shutdown: shutdown.clone(),
        });
        tracing::debug!(run_id = %run_id, subscriber = id, "monitor subscriber attached");

        EventStream {
            run_id,
            subscriber: id,
            receiver,
            shutdown,
            channels: Arc::downgrade(&self.channels),
        }
    }

    /// Fan an event out to the run's current subscribers.
    pub fn publish(&self, run_id: ExecutionId, event: EventType, data: Value) {
        let event = MonitorEvent::new(event, run_id, data);
        let _ = self.firehose.send(event.clone());

        let mut channels = self.channels.lock();
        let Some(subscribers) = channels.get_mut(&run_id) else {
            return;
        };
        subscribers.retain(|s| {
            let delivered = s.sender.send(event.clone()).is_ok();
            if !delivered {
                s.shutdown.cancel();
                tracing::debug!(run_id = %run_id, subscriber = s.id, "pruned closed subscriber");
            }
            delivered
        });
        if subscribers.is_empty() {
            channels.remove(&run_id);
        }
    }

    /// Tear down a run's channel; its subscribers' streams end.
    pub fn close(&self, run_id: ExecutionId) {
        let removed = self.channels.lock().remove(&run_id);
        if let Some(subscribers) = removed {
            tracing::debug!(run_id = %run_id, count = subscribers.len(), "closing monitor channel");
            for subscriber in subscribers {
                subscriber.shutdown.cancel();
            }
        }
    }

    pub fn subscriber_count(&self, run_id: ExecutionId) -> usize {
        self.channels
            .lock()
            .get(&run_id)
            .map(|subs| subs.iter().filter(|s| !s.sender.is_closed()).count())
            .unwrap_or(0)
    }

    /// Runs that currently have at least one subscriber attached.
    pub fn channel_count(&self) -> usize {
        self.channels.lock().len()
    }

    /// Every event of every run, for process-wide observers.
    pub fn tap(&self) -> broadcast::Receiver<MonitorEvent> {
        self.firehose.subscribe()
    }
}

impl Default for ExecutionMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_HEARTBEAT, 1000)
    }
}

fn spawn_heartbeat(
    run_id: ExecutionId,
    every: Duration,
    sender: mpsc::UnboundedSender<MonitorEvent>,
    shutdown: CancellationToken,
) {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let ping = MonitorEvent::new(EventType::Ping, run_id, Value::Null);
                    if sender.send(ping).is_err() {
                        break;
                    }
                }
            }
        }
    });
}

/// One subscriber's view of a run. Dropping it detaches the subscriber.
pub struct EventStream {
    run_id: ExecutionId,
    subscriber: u64,
    receiver: mpsc::UnboundedReceiver<MonitorEvent>,
    shutdown: CancellationToken,
    channels: Weak<Channels>,
}

impl EventStream {
    pub fn run_id(&self) -> ExecutionId {
        self.run_id
    }

    pub async fn recv(&mut self) -> Option<MonitorEvent> {
        self.receiver.recv().await
    }
}

impl Stream for EventStream {
    type Item = MonitorEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.shutdown.cancel();
        let Some(channels) = self.channels.upgrade() else {
            return;
        };
        let mut channels = channels.lock();
        if let Some(subscribers) = channels.get_mut(&self.run_id) {
            subscribers.retain(|s| s.id != self.subscriber);
            if subscribers.is_empty() {
                channels.remove(&self.run_id);
            }
        }
    }
}

/// Cheap handle for publishing into a run's channel.
#[derive(Clone)]
pub struct RunPublisher {
    monitor: Arc<ExecutionMonitor>,
    run_id: ExecutionId,
}

impl RunPublisher {
    pub fn new(monitor: Arc<ExecutionMonitor>, run_id: ExecutionId) -> Self {
        Self { monitor, run_id }
    }

    pub fn emit(&self, event: EventType, data: Value) {
        tracing::trace!(run_id = %self.run_id, event = %event, "publishing event");
        self.monitor.publish(self.run_id, event, data);
    }

    pub fn close(&self) {
        self.monitor.close(self.run_id);
    }
}
