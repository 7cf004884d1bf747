//! Per-conversation debounce and delayed-reply scheduling.
//!
//! Incoming private messages are accumulated per counterparty. The first
//! message of a burst opens a batch and schedules a flush after a randomized
//! delay; later messages ride along without extending that delay, which keeps
//! worst-case reply latency bounded no matter how long the burst goes on.
//! When the timer fires, the batch is drained in one unit, the persona model
//! produces a single reply, and the reply is sent with a typing pause.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Produces one in-character reply for a drained batch of messages.
///
/// `text` is the batch joined with newlines, in arrival order. May take
/// arbitrarily long; the scheduler never cancels a generation in flight.
#[async_trait]
pub trait ReplyGenerator: Send + Sync + 'static {
    async fn generate(&self, label: &str, text: &str) -> Result<String, String>;
}

/// Outbound side of the chat service.
#[async_trait]
pub trait ChatTransport: Send + Sync + 'static {
    /// Mark the conversation as read. Best-effort.
    async fn read_history(&self, chat_id: i64) -> Result<(), String>;

    /// Show a typing indicator. Best-effort.
    async fn send_typing(&self, chat_id: i64) -> Result<(), String>;

    /// Deliver a message. `notify = false` suppresses the recipient's
    /// notification. Returns the sent message id.
    async fn send_message(&self, chat_id: i64, text: &str, notify: bool) -> Result<i64, String>;
}

/// Inclusive delay window in milliseconds, sampled uniformly per use.
#[derive(Debug, Clone)]
pub struct DelayWindow {
    min_ms: u64,
    max_ms: u64,
}

impl DelayWindow {
    /// Invariant: `min_ms <= max_ms` (config validation enforces this for
    /// user-supplied windows).
    pub fn from_millis(min_ms: u64, max_ms: u64) -> Self {
        assert!(min_ms <= max_ms, "delay window is inverted");
        Self { min_ms, max_ms }
    }

    pub fn from_secs(min_secs: u64, max_secs: u64) -> Self {
        Self::from_millis(min_secs * 1000, max_secs * 1000)
    }

    fn sample(&self) -> Duration {
        let ms = rand::thread_rng().gen_range(self.min_ms..=self.max_ms);
        Duration::from_millis(ms)
    }
}

/// Scheduler tuning.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Delay between the first message of a burst and its flush.
    pub reply_delay: DelayWindow,
    /// Pause between the typing indicator and the actual send.
    pub typing_delay: DelayWindow,
    /// Cap on reply pipelines running at once, across all conversations.
    pub max_concurrent_flushes: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            reply_delay: DelayWindow::from_secs(10, 70),
            typing_delay: DelayWindow::from_secs(5, 15),
            max_concurrent_flushes: 8,
        }
    }
}

/// Messages accumulated for one conversation since its last flush.
struct PendingBatch {
    /// Arrival order, never reordered.
    fragments: Vec<String>,
    /// Handle to the scheduled flush task. Kept so the flush could be
    /// aborted if in-flight work ever needs shedding; dropping the handle
    /// does not cancel the task.
    #[allow(dead_code)]
    flush: JoinHandle<()>,
}

/// Coalesces bursts of messages per conversation into single delayed replies.
///
/// At most one flush task is scheduled per conversation with an open batch.
/// A batch is removed from the table the moment its flush starts draining,
/// before any fallible work, so a failed reply never wedges the conversation
/// and a new batch can open while the old reply is still being produced.
pub struct DebounceScheduler<G, T> {
    inner: Arc<SchedulerInner<G, T>>,
}

struct SchedulerInner<G, T> {
    pending: Mutex<HashMap<i64, PendingBatch>>,
    generator: Arc<G>,
    transport: Arc<T>,
    config: SchedulerConfig,
    flush_permits: Semaphore,
}

impl<G, T> Clone for DebounceScheduler<G, T> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<G: ReplyGenerator, T: ChatTransport> DebounceScheduler<G, T> {
    pub fn new(config: SchedulerConfig, generator: Arc<G>, transport: Arc<T>) -> Self {
        let flush_permits = Semaphore::new(config.max_concurrent_flushes);
        Self {
            inner: Arc::new(SchedulerInner {
                pending: Mutex::new(HashMap::new()),
                generator,
                transport,
                config,
                flush_permits,
            }),
        }
    }

    /// Record an inbound message for `chat_id`.
    ///
    /// Opens a batch and schedules its flush if none is open, otherwise
    /// appends to the open batch. The already-scheduled flush delay is never
    /// reset. `text` is trusted non-empty; the inbound wrapper filters empty
    /// payloads before they get here.
    pub async fn on_message(&self, chat_id: i64, text: String, label: String) {
        let mut pending = self.inner.pending.lock().await;
        match pending.entry(chat_id) {
            Entry::Occupied(mut open) => {
                let batch = open.get_mut();
                batch.fragments.push(text);
                debug!(
                    "Appended fragment for {} ({} pending)",
                    chat_id,
                    batch.fragments.len()
                );
            }
            Entry::Vacant(slot) => {
                let delay = self.inner.config.reply_delay.sample();
                debug!("Opened batch for {}, flush in {:?}", chat_id, delay);
                let scheduler = self.clone();
                let flush = tokio::spawn(async move {
                    sleep(delay).await;
                    if let Err(e) = scheduler.flush(chat_id, &label).await {
                        error!("Flush for {} failed: {}", chat_id, e);
                    }
                });
                slot.insert(PendingBatch {
                    fragments: vec![text],
                    flush,
                });
            }
        }
    }

    /// Drain the batch for `chat_id` and deliver one reply.
    ///
    /// Invoked only by the task scheduled in `on_message`. A missing batch
    /// is a clean no-op. The table entry is removed before the first
    /// fallible step; from that point a new batch may open for the same
    /// conversation independently of this flush's outcome.
    async fn flush(&self, chat_id: i64, label: &str) -> Result<(), String> {
        let joined = {
            let mut pending = self.inner.pending.lock().await;
            match pending.remove(&chat_id) {
                Some(batch) => batch.fragments.join("\n"),
                None => return Ok(()),
            }
        };

        let _permit = self
            .inner
            .flush_permits
            .acquire()
            .await
            .map_err(|_| "flush pool closed".to_string())?;

        if let Err(e) = self.inner.transport.read_history(chat_id).await {
            debug!("Read receipt for {} failed: {}", chat_id, e);
        }

        let reply = self.inner.generator.generate(label, &joined).await?;

        // The reply already exists at this point; the pause below is pure
        // typing simulation, not computation latency.
        if let Err(e) = self.inner.transport.send_typing(chat_id).await {
            warn!("Typing indicator for {} failed: {}", chat_id, e);
        }
        sleep(self.inner.config.typing_delay.sample()).await;

        self.inner
            .transport
            .send_message(chat_id, &reply, false)
            .await?;
        info!("Replied to {} ({} chars)", chat_id, reply.len());
        Ok(())
    }
}
