//! Polling hooks for Dioxus components.

use std::future::Future;

use dioxus::prelude::*;
use tokio_util::sync::CancellationToken;

use super::config::PollConfig;
use super::manager::{PollState, PollingManager};

/// Controls returned by [`use_smart_polling`].
#[derive(Clone)]
pub struct UsePoll {
    manager: PollingManager,
    key: String,
}

impl UsePoll {
    pub fn trigger(&self) {
        self.manager.trigger_immediate_poll(&self.key);
    }

    pub fn pause(&self) {
        self.manager.pause_poll(&self.key);
    }

    pub fn resume(&self) {
        self.manager.resume_poll(&self.key);
    }

    pub fn state(&self) -> Option<PollState> {
        self.manager.get_poll_state(&self.key)
    }
}

/// Start a poll when the component mounts and stop it when it unmounts.
///
/// The [`PollingManager`] comes from context. `config` and `callback` are only
/// read on the first render; use the returned handle or
/// [`PollingManager::update_poll_config`] to change them later.
pub fn use_smart_polling<F, Fut>(config: PollConfig, callback: F) -> UsePoll
where
    F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    let manager = use_context::<PollingManager>();
    let poll = use_hook(move || {
        let key = config.key.clone();
        manager.start_poll(config, callback);
        UsePoll { manager, key }
    });

    let on_drop = poll.clone();
    use_drop(move || on_drop.manager.stop_poll(&on_drop.key));

    poll
}
