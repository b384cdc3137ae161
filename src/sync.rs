// Real-time sync channel
// Keeps one availability key fresh: push notifications while the stream holds,
// interval polling (only while visible) once it fails.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::availability::{AvailabilityCache, AvailabilityKey};
use crate::config::SyncConfig;
use crate::sse::NotificationSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncState {
    Disconnected,
    Connecting,
    Streaming,
    Polling,
}

/// Whether the hosting view is in the foreground. Polling is skipped while hidden.
#[derive(Debug, Clone)]
pub struct Visibility {
    sender: Arc<watch::Sender<bool>>,
}

impl Default for Visibility {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Visibility {
    pub fn new(visible: bool) -> Self {
        let (sender, _) = watch::channel(visible);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn set_visible(&self, visible: bool) {
        self.sender.send_replace(visible);
    }

    pub fn is_visible(&self) -> bool {
        *self.sender.borrow()
    }
}

/// State shared with the running task. Every update carries the generation it
/// was started under; updates from a torn-down run are dropped.
struct StateCell {
    sender: watch::Sender<SyncState>,
    generation: AtomicU64,
}

impl StateCell {
    fn set(&self, generation: u64, state: SyncState) -> bool {
        self.sender.send_if_modified(|current| {
            if self.generation.load(Ordering::SeqCst) != generation || *current == state {
                return false;
            }
            debug!(from = ?*current, to = ?state, "sync state changed");
            *current = state;
            true
        })
    }

    /// Starts a new generation and returns it.
    fn advance(&self, state: SyncState) -> u64 {
        let mut generation = 0;
        self.sender.send_modify(|current| {
            generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            *current = state;
        });
        generation
    }
}

struct Running {
    key: AvailabilityKey,
    task: JoinHandle<()>,
}

pub struct SyncChannel {
    availability: AvailabilityCache,
    source: Arc<dyn NotificationSource>,
    config: SyncConfig,
    visibility: Visibility,
    state: Arc<StateCell>,
    running: Mutex<Option<Running>>,
    last_booking_count: Mutex<Option<usize>>,
}

impl SyncChannel {
    pub fn new(
        availability: AvailabilityCache,
        source: Arc<dyn NotificationSource>,
        config: SyncConfig,
        visibility: Visibility,
    ) -> Self {
        let (sender, _) = watch::channel(SyncState::Disconnected);
        Self {
            availability,
            source,
            config,
            visibility,
            state: Arc::new(StateCell {
                sender,
                generation: AtomicU64::new(0),
            }),
            running: Mutex::new(None),
            last_booking_count: Mutex::new(None),
        }
    }

    pub fn state(&self) -> SyncState {
        *self.state.sender.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<SyncState> {
        self.state.sender.subscribe()
    }

    pub fn visibility(&self) -> &Visibility {
        &self.visibility
    }

    pub fn current_key(&self) -> Option<AvailabilityKey> {
        self.running.lock().as_ref().map(|running| running.key.clone())
    }

    /// Keep `key` in sync. Starting the key already being synced is a no-op;
    /// any other key tears the current run down first.
    pub fn start(&self, key: AvailabilityKey) {
        let mut running = self.running.lock();
        if running.as_ref().map_or(false, |r| r.key == key) {
            return;
        }
        if let Some(previous) = running.take() {
            self.tear_down(previous);
        }

        let generation = self.state.advance(SyncState::Connecting);
        info!(resource_type = %key.resource_type, date = %key.date, "sync starting");

        let task = tokio::spawn(run(
            generation,
            key.clone(),
            self.state.clone(),
            self.source.clone(),
            self.availability.clone(),
            self.config.clone(),
            self.visibility.clone(),
        ));
        *running = Some(Running { key, task });
    }

    /// Close the stream, clear the poll timer and ignore any fetch still in flight.
    pub fn stop(&self) {
        let previous = self.running.lock().take();
        match previous {
            Some(previous) => self.tear_down(previous),
            None => {
                self.state.advance(SyncState::Disconnected);
            }
        }
    }

    fn tear_down(&self, running: Running) {
        running.task.abort();
        self.availability.abandon(&running.key);
        self.state.advance(SyncState::Disconnected);
        info!(
            resource_type = %running.key.resource_type,
            date = %running.key.date,
            "sync stopped"
        );
    }

    /// Feed the size of the user's booking ledger after each read. The first
    /// observation only records the count; every later change revalidates the
    /// synced key once. Returns whether the count changed.
    pub fn observe_booking_count(&self, count: usize) -> bool {
        let changed = {
            let mut last = self.last_booking_count.lock();
            let changed = (*last).map_or(false, |previous| previous != count);
            *last = Some(count);
            changed
        };

        if changed {
            if let Some(key) = self.current_key() {
                debug!(count, "booking count changed, revalidating availability");
                self.availability.revalidate_in_background(&key);
            }
        }
        changed
    }

    pub fn reset_booking_count(&self) {
        *self.last_booking_count.lock() = None;
    }
}

impl Drop for SyncChannel {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            running.task.abort();
            self.availability.abandon(&running.key);
        }
    }
}

async fn run(
    generation: u64,
    key: AvailabilityKey,
    state: Arc<StateCell>,
    source: Arc<dyn NotificationSource>,
    availability: AvailabilityCache,
    config: SyncConfig,
    visibility: Visibility,
) {
    match source.open().await {
        Ok(mut stream) => {
            state.set(generation, SyncState::Streaming);
            loop {
                match stream.next().await {
                    Some(Ok(())) => {
                        debug!(resource_type = %key.resource_type, "availability changed upstream");
                        availability.revalidate_in_background(&key);
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "notification stream failed, falling back to polling");
                        break;
                    }
                    None => {
                        warn!("notification stream closed, falling back to polling");
                        break;
                    }
                }
            }
        }
        Err(e) => warn!(error = %e, "could not open notification stream, polling instead"),
    }

    if !state.set(generation, SyncState::Polling) {
        return;
    }
    availability.revalidate_in_background(&key);

    let period = config.poll_interval;
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        if visibility.is_visible() {
            availability.revalidate_in_background(&key);
        } else {
            debug!("hidden, skipping poll");
        }
    }
}
