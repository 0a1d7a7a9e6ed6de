//! Smart polling for REST-backed views.
//!
//! Views that cannot rely on push notifications register a poll with the
//! [`PollingManager`]. The manager owns scheduling; the UI layer only feeds it
//! [`ActivitySignal`]s (focus, blur, visibility, input, online/offline).
//!
//! ```rust,ignore
//! let polls = PollingManager::new();
//! polls.start_poll(PollConfig::dashboard("dashboard"), move |_cancel| {
//!     let api = api.clone();
//!     async move {
//!         api.refresh_dashboard().await?;
//!         Ok(())
//!     }
//! });
//!
//! // From the window's focus handler
//! polls.handle_signal(ActivitySignal::Focus);
//! ```

mod activity;
mod config;
mod manager;

#[cfg(feature = "dioxus")]
pub mod hooks;

pub use activity::{ActivityMonitor, ActivitySignal, BLUR_GRACE};
pub use config::{PollConfig, PollConfigUpdate, DEFAULT_MAX_INTERVAL};
pub use manager::{effective_interval, PollState, PollingManager, INACTIVE_MIN_INTERVAL};
