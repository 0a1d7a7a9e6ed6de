//! User activity and connectivity tracking.

use std::time::Duration;

/// How long after a blur the user still counts as active.
pub const BLUR_GRACE: Duration = Duration::from_secs(5);

/// Environment signals fed to the polling manager by the UI layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivitySignal {
    /// Pointer, keyboard, scroll or touch input
    Input,
    Focus,
    Blur,
    Visibility { visible: bool },
    Online,
    Offline,
}

/// Process-wide activity state owned by one manager.
#[derive(Debug, Clone)]
pub struct ActivityMonitor {
    user_active: bool,
    online: bool,
    /// Bumped on every activity; a blur only decays if nothing happened since.
    seq: u64,
}

impl Default for ActivityMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}

impl ActivityMonitor {
    pub fn new(online: bool) -> Self {
        Self {
            user_active: true,
            online,
            seq: 0,
        }
    }

    pub fn is_user_active(&self) -> bool {
        self.user_active
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    pub fn record_activity(&mut self) {
        self.seq = self.seq.wrapping_add(1);
        self.user_active = true;
    }

    /// Marker to hand back to [`ActivityMonitor::decay`] once the grace period is over.
    pub fn blur_marker(&self) -> u64 {
        self.seq
    }

    /// Mark the user inactive unless there was activity after `marker` was taken.
    /// Returns true if the state changed.
    pub fn decay(&mut self, marker: u64) -> bool {
        if marker == self.seq && self.user_active {
            self.user_active = false;
            true
        } else {
            false
        }
    }

    /// Returns true if connectivity changed.
    pub fn set_online(&mut self, online: bool) -> bool {
        let changed = self.online != online;
        self.online = online;
        changed
    }
}
