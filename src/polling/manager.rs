//! Smart polling manager.
//!
//! Runs named recurring jobs. Each poll runs its callback, then arms a timer
//! for the next run; the delay is worked out at arm time from the base
//! interval, the error count, user activity and connectivity. While offline
//! no timers are armed at all and polls resume as soon as the network returns.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::activity::{ActivityMonitor, ActivitySignal, BLUR_GRACE};
use super::config::{PollConfig, PollConfigUpdate, DEFAULT_MAX_INTERVAL};

/// Idle users are polled no more often than this when the poll asks to slow down.
pub const INACTIVE_MIN_INTERVAL: Duration = Duration::from_secs(120);

/// Error backoff stops growing after this many consecutive errors.
const MAX_BACKOFF_EXPONENT: u32 = 5;

/// Observable state of one poll.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PollState {
    pub is_polling: bool,
    pub current_interval: Duration,
    pub error_count: u32,
    pub last_success_time: Option<DateTime<Utc>>,
    pub last_error_time: Option<DateTime<Utc>>,
}

impl PollState {
    fn new(interval: Duration) -> Self {
        Self {
            is_polling: true,
            current_interval: interval,
            error_count: 0,
            last_success_time: None,
            last_error_time: None,
        }
    }
}

/// Delay before the next run, or `None` when nothing should be armed (offline).
pub fn effective_interval(
    config: &PollConfig,
    state: &PollState,
    activity: &ActivityMonitor,
) -> Option<Duration> {
    if !activity.is_online() {
        return None;
    }

    let mut interval = state.current_interval;
    if config.pause_when_inactive && !activity.is_user_active() {
        interval = interval.saturating_mul(2).max(INACTIVE_MIN_INTERVAL);
    }

    if state.error_count > 0 {
        if let Some(multiplier) = config.backoff_multiplier {
            let cap = config.max_interval.unwrap_or(DEFAULT_MAX_INTERVAL);
            let factor = multiplier.powi(state.error_count.min(MAX_BACKOFF_EXPONENT) as i32);
            interval = Duration::try_from_secs_f64(interval.as_secs_f64() * factor)
                .unwrap_or(cap)
                .min(cap);
        }
    }

    Some(interval)
}

type PollCallback =
    Arc<dyn Fn(CancellationToken) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

struct PollEntry {
    /// Distinguishes this registration from earlier ones under the same key.
    epoch: u64,
    config: PollConfig,
    state: PollState,
    callback: PollCallback,
    timer: Option<JoinHandle<()>>,
    cancel: Option<CancellationToken>,
}

impl PollEntry {
    fn clear_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }

    fn cancel_in_flight(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
    }
}

impl Drop for PollEntry {
    fn drop(&mut self) {
        self.clear_timer();
        self.cancel_in_flight();
    }
}

struct State {
    polls: HashMap<String, PollEntry>,
    activity: ActivityMonitor,
    blur_timer: Option<JoinHandle<()>>,
    next_epoch: u64,
}

struct Inner {
    state: Mutex<State>,
}

/// Manager of named polls. Cheap to clone; clones share state.
///
/// Must be used from inside a tokio runtime.
#[derive(Clone)]
pub struct PollingManager {
    inner: Arc<Inner>,
}

impl Default for PollingManager {
    fn default() -> Self {
        Self::new()
    }
}

impl PollingManager {
    /// A manager that starts out online with an active user.
    pub fn new() -> Self {
        Self::with_activity(ActivityMonitor::default())
    }

    pub fn with_activity(activity: ActivityMonitor) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    polls: HashMap::new(),
                    activity,
                    blur_timer: None,
                    next_epoch: 0,
                }),
            }),
        }
    }

    /// Start (or replace) the poll named `config.key`.
    ///
    /// Runs the callback right away when online, then keeps rescheduling it.
    /// The callback gets a token that is cancelled when the run is superseded,
    /// the poll is stopped, or the network goes away.
    pub fn start_poll<F, Fut>(&self, config: PollConfig, callback: F)
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let callback: PollCallback = Arc::new(move |cancel| callback(cancel).boxed());
        let key = config.key.clone();
        let online = {
            let mut state = self.inner.lock();
            state.next_epoch += 1;
            let epoch = state.next_epoch;
            let entry = PollEntry {
                epoch,
                state: PollState::new(config.interval),
                config,
                callback,
                timer: None,
                cancel: None,
            };
            // Dropping the replaced entry disarms it
            state.polls.insert(key.clone(), entry);
            state.activity.is_online()
        };

        crate::log_debug!("poll {}: started", key);
        if online {
            self.inner.execute(&key);
        }
    }

    pub fn stop_poll(&self, key: &str) {
        let removed = self.inner.lock().polls.remove(key);
        if removed.is_some() {
            crate::log_debug!("poll {}: stopped", key);
        }
    }

    /// Stop scheduling without forgetting config or error counters.
    pub fn pause_poll(&self, key: &str) {
        let mut state = self.inner.lock();
        if let Some(entry) = state.polls.get_mut(key) {
            entry.state.is_polling = false;
            entry.clear_timer();
        }
    }

    /// Resume a paused poll; the next run comes after the effective interval.
    pub fn resume_poll(&self, key: &str) {
        let mut guard = self.inner.lock();
        let State {
            polls, activity, ..
        } = &mut *guard;
        let Some(entry) = polls.get_mut(key) else {
            return;
        };
        if entry.state.is_polling {
            return;
        }
        entry.state.is_polling = true;
        self.inner.arm_timer(key, entry, activity);
    }

    /// Run now, bypassing the timer. No-op for unknown or paused polls.
    pub fn trigger_immediate_poll(&self, key: &str) {
        self.inner.execute(key);
    }

    /// Merge `update` into the poll's config and reschedule if it is running.
    pub fn update_poll_config(&self, key: &str, update: PollConfigUpdate) {
        let mut guard = self.inner.lock();
        let State {
            polls, activity, ..
        } = &mut *guard;
        let Some(entry) = polls.get_mut(key) else {
            return;
        };
        let interval_changed = update.interval.is_some();
        entry.config.apply(update);
        if interval_changed && entry.state.error_count == 0 {
            entry.state.current_interval = entry.config.interval;
        }
        if entry.state.is_polling {
            self.inner.arm_timer(key, entry, activity);
        }
    }

    pub fn get_poll_state(&self, key: &str) -> Option<PollState> {
        self.inner
            .lock()
            .polls
            .get(key)
            .map(|entry| entry.state.clone())
    }

    pub fn get_poll_config(&self, key: &str) -> Option<PollConfig> {
        self.inner
            .lock()
            .polls
            .get(key)
            .map(|entry| entry.config.clone())
    }

    /// Keys of every registered poll, running or not.
    pub fn active_polls(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.inner.lock().polls.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn is_user_active(&self) -> bool {
        self.inner.lock().activity.is_user_active()
    }

    pub fn is_online(&self) -> bool {
        self.inner.lock().activity.is_online()
    }

    /// Feed an environment signal (input, focus, visibility, connectivity).
    pub fn handle_signal(&self, signal: ActivitySignal) {
        match signal {
            ActivitySignal::Input => self.inner.lock().activity.record_activity(),
            ActivitySignal::Focus | ActivitySignal::Visibility { visible: true } => {
                self.inner.on_focus()
            }
            ActivitySignal::Blur | ActivitySignal::Visibility { visible: false } => {
                self.inner.start_blur_timer()
            }
            ActivitySignal::Online => self.inner.on_online(),
            ActivitySignal::Offline => self.inner.on_offline(),
        }
    }

    /// Stop every poll and pending timer.
    pub fn dispose(&self) {
        let mut state = self.inner.lock();
        state.polls.clear();
        if let Some(timer) = state.blur_timer.take() {
            timer.abort();
        }
        crate::log_debug!("polling manager disposed");
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn execute(self: &Arc<Self>, key: &str) {
        let (epoch, callback, cancel) = {
            let mut state = self.lock();
            let Some(entry) = state.polls.get_mut(key) else {
                return;
            };
            if !entry.state.is_polling {
                return;
            }
            entry.clear_timer();
            entry.cancel_in_flight();
            let cancel = CancellationToken::new();
            entry.cancel = Some(cancel.clone());
            (entry.epoch, entry.callback.clone(), cancel)
        };

        let manager = self.clone();
        let key = key.to_string();
        tokio::spawn(async move {
            let result = callback(cancel.clone()).await;
            manager.finish(&key, epoch, &cancel, result);
        });
    }

    fn finish(
        self: &Arc<Self>,
        key: &str,
        epoch: u64,
        cancel: &CancellationToken,
        result: anyhow::Result<()>,
    ) {
        // Superseded runs (newer run, stop, offline) leave no trace
        if cancel.is_cancelled() {
            crate::log_debug!("poll {}: run superseded, result dropped", key);
            return;
        }

        let mut guard = self.lock();
        let State {
            polls, activity, ..
        } = &mut *guard;
        let Some(entry) = polls.get_mut(key) else {
            return;
        };
        if entry.epoch != epoch {
            return;
        }
        entry.cancel = None;

        match result {
            Ok(()) => {
                entry.state.error_count = 0;
                entry.state.current_interval = entry.config.interval;
                entry.state.last_success_time = Some(Utc::now());
            }
            Err(e) => {
                entry.state.error_count += 1;
                entry.state.last_error_time = Some(Utc::now());
                crate::log_warn!(
                    "poll {}: failed ({} in a row): {:#}",
                    key,
                    entry.state.error_count,
                    e
                );
                if entry.config.retry_on_error && entry.state.error_count > entry.config.max_retries
                {
                    crate::log_error!(
                        "poll {}: giving up after {} consecutive errors",
                        key,
                        entry.state.error_count
                    );
                    entry.state.is_polling = false;
                    entry.clear_timer();
                    return;
                }
            }
        }

        self.arm_timer(key, entry, activity);
    }

    fn arm_timer(self: &Arc<Self>, key: &str, entry: &mut PollEntry, activity: &ActivityMonitor) {
        entry.clear_timer();
        if !entry.state.is_polling {
            return;
        }
        let Some(delay) = effective_interval(&entry.config, &entry.state, activity) else {
            crate::log_debug!("poll {}: offline, not scheduling", key);
            return;
        };

        let manager = Arc::downgrade(self);
        let key = key.to_string();
        entry.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(manager) = manager.upgrade() {
                manager.execute(&key);
            }
        }));
    }

    fn on_focus(self: &Arc<Self>) {
        let keys: Vec<String> = {
            let mut state = self.lock();
            state.activity.record_activity();
            if let Some(timer) = state.blur_timer.take() {
                timer.abort();
            }
            if !state.activity.is_online() {
                return;
            }
            state
                .polls
                .iter()
                .filter(|(_, entry)| entry.config.immediate_on_focus && entry.state.is_polling)
                .map(|(key, _)| key.clone())
                .collect()
        };

        for key in keys {
            self.execute(&key);
        }
    }

    fn start_blur_timer(self: &Arc<Self>) {
        let mut state = self.lock();
        let marker = state.activity.blur_marker();
        if let Some(timer) = state.blur_timer.take() {
            timer.abort();
        }

        let manager = Arc::downgrade(self);
        state.blur_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(BLUR_GRACE).await;
            if let Some(manager) = manager.upgrade() {
                if manager.lock().activity.decay(marker) {
                    crate::log_debug!("polling: user inactive");
                }
            }
        }));
    }

    fn on_online(self: &Arc<Self>) {
        let keys: Vec<String> = {
            let mut state = self.lock();
            if !state.activity.set_online(true) {
                return;
            }
            state
                .polls
                .iter()
                .filter(|(_, entry)| entry.state.is_polling)
                .map(|(key, _)| key.clone())
                .collect()
        };

        crate::log_info!("polling: back online, resuming {} poll(s)", keys.len());
        for key in keys {
            self.execute(&key);
        }
    }

    fn on_offline(&self) {
        let mut state = self.lock();
        if !state.activity.set_online(false) {
            return;
        }
        for entry in state.polls.values_mut() {
            entry.clear_timer();
            entry.cancel_in_flight();
        }
        crate::log_info!("polling: offline, all polls dormant");
    }
}
