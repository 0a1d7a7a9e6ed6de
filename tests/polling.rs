mod support;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use quipflip_live::polling::{ActivityMonitor, PollConfigUpdate};
use quipflip_live::{ActivitySignal, PollConfig, PollingManager};
use support::{count, counter, settle};
use tokio::time::sleep;

/// Start `config` with a callback that counts runs and fails while `failing` is set.
fn start_counting(
    polls: &PollingManager,
    config: PollConfig,
    failing: Arc<AtomicBool>,
) -> Arc<AtomicUsize> {
    let runs = counter();
    let r = runs.clone();
    polls.start_poll(config, move |_cancel| {
        let runs = r.clone();
        let failing = failing.clone();
        async move {
            runs.fetch_add(1, Ordering::SeqCst);
            if failing.load(Ordering::SeqCst) {
                anyhow::bail!("server said no");
            }
            Ok(())
        }
    });
    runs
}

fn healthy() -> Arc<AtomicBool> {
    Arc::new(AtomicBool::new(false))
}

fn broken() -> Arc<AtomicBool> {
    Arc::new(AtomicBool::new(true))
}

#[tokio::test(start_paused = true)]
async fn runs_immediately_then_on_interval() {
    let polls = PollingManager::new();
    let runs = start_counting(&polls, PollConfig::new("p", Duration::from_secs(10)), healthy());
    settle().await;
    assert_eq!(count(&runs), 1);

    sleep(Duration::from_millis(9_900)).await;
    assert_eq!(count(&runs), 1);
    sleep(Duration::from_millis(200)).await;
    assert_eq!(count(&runs), 2);

    let state = polls.get_poll_state("p").unwrap();
    assert!(state.is_polling);
    assert_eq!(state.error_count, 0);
    assert!(state.last_success_time.is_some());
    assert!(state.last_error_time.is_none());
}

#[tokio::test(start_paused = true)]
async fn errors_stretch_the_interval_and_success_resets() {
    let polls = PollingManager::new();
    let failing = broken();
    let config = PollConfig::new("p", Duration::from_secs(10))
        .backoff_multiplier(2.0)
        .max_retries(10);
    let runs = start_counting(&polls, config, failing.clone());
    settle().await;
    assert_eq!(polls.get_poll_state("p").unwrap().error_count, 1);

    // 10s * 2^1
    sleep(Duration::from_millis(19_900)).await;
    assert_eq!(count(&runs), 1);
    sleep(Duration::from_millis(200)).await;
    assert_eq!(count(&runs), 2);

    let state = polls.get_poll_state("p").unwrap();
    assert_eq!(state.error_count, 2);
    assert!(state.last_error_time.is_some());

    failing.store(false, Ordering::SeqCst);
    polls.trigger_immediate_poll("p");
    settle().await;
    let state = polls.get_poll_state("p").unwrap();
    assert_eq!(count(&runs), 3);
    assert_eq!(state.error_count, 0);
    assert_eq!(state.current_interval, Duration::from_secs(10));
    assert!(state.last_success_time.is_some());

    sleep(Duration::from_millis(10_100)).await;
    assert_eq!(count(&runs), 4);
}

#[tokio::test(start_paused = true)]
async fn gives_up_after_max_retries() {
    let polls = PollingManager::new();
    let config = PollConfig::new("p", Duration::from_secs(1)).max_retries(2);
    let runs = start_counting(&polls, config, broken());

    sleep(Duration::from_secs(60)).await;

    assert_eq!(count(&runs), 3);
    let state = polls.get_poll_state("p").unwrap();
    assert!(!state.is_polling);
    assert_eq!(state.error_count, 3);
    assert_eq!(polls.active_polls(), vec!["p".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn without_retry_limit_errors_never_stop_the_poll() {
    let polls = PollingManager::new();
    let config = PollConfig::new("p", Duration::from_secs(1))
        .retry_on_error(false)
        .max_retries(0);
    let runs = start_counting(&polls, config, broken());

    sleep(Duration::from_millis(5_500)).await;

    assert_eq!(count(&runs), 6);
    let state = polls.get_poll_state("p").unwrap();
    assert!(state.is_polling);
    assert_eq!(state.error_count, 6);
}

#[tokio::test(start_paused = true)]
async fn offline_manager_waits_for_the_network() {
    let polls = PollingManager::with_activity(ActivityMonitor::new(false));
    let runs = start_counting(&polls, PollConfig::new("p", Duration::from_secs(10)), healthy());
    sleep(Duration::from_secs(60)).await;
    assert_eq!(count(&runs), 0);
    assert!(!polls.is_online());

    polls.handle_signal(ActivitySignal::Online);
    settle().await;
    assert_eq!(count(&runs), 1);

    sleep(Duration::from_millis(10_100)).await;
    assert_eq!(count(&runs), 2);
}

#[tokio::test(start_paused = true)]
async fn going_offline_disarms_every_timer() {
    let polls = PollingManager::new();
    let a = start_counting(&polls, PollConfig::new("a", Duration::from_secs(10)), healthy());
    let b = start_counting(&polls, PollConfig::new("b", Duration::from_secs(3)), healthy());
    settle().await;

    polls.handle_signal(ActivitySignal::Offline);
    sleep(Duration::from_secs(60)).await;
    assert_eq!((count(&a), count(&b)), (1, 1));

    polls.handle_signal(ActivitySignal::Online);
    settle().await;
    assert_eq!((count(&a), count(&b)), (2, 2));
}

#[tokio::test(start_paused = true)]
async fn going_offline_cancels_the_run_in_flight() {
    let polls = PollingManager::new();
    let saw_cancel = Arc::new(AtomicBool::new(false));
    let seen = saw_cancel.clone();
    polls.start_poll(PollConfig::new("slow", Duration::from_secs(30)), move |cancel| {
        let seen = seen.clone();
        async move {
            sleep(Duration::from_secs(5)).await;
            seen.store(cancel.is_cancelled(), Ordering::SeqCst);
            Ok::<_, anyhow::Error>(())
        }
    });
    settle().await;

    polls.handle_signal(ActivitySignal::Offline);
    sleep(Duration::from_secs(10)).await;

    assert!(saw_cancel.load(Ordering::SeqCst));
    assert!(polls.get_poll_state("slow").unwrap().last_success_time.is_none());
}

#[tokio::test(start_paused = true)]
async fn focus_runs_only_polls_that_ask_for_it() {
    let polls = PollingManager::new();
    let eager = start_counting(
        &polls,
        PollConfig::new("eager", Duration::from_secs(60)).immediate_on_focus(true),
        healthy(),
    );
    let quiet = start_counting(&polls, PollConfig::new("quiet", Duration::from_secs(60)), healthy());
    settle().await;

    polls.handle_signal(ActivitySignal::Visibility { visible: true });
    settle().await;
    assert_eq!((count(&eager), count(&quiet)), (2, 1));

    polls.handle_signal(ActivitySignal::Focus);
    settle().await;
    assert_eq!((count(&eager), count(&quiet)), (3, 1));
}

#[tokio::test(start_paused = true)]
async fn focus_skips_paused_polls() {
    let polls = PollingManager::new();
    let runs = start_counting(&polls, PollConfig::dashboard("d"), healthy());
    settle().await;
    polls.pause_poll("d");

    polls.handle_signal(ActivitySignal::Focus);
    settle().await;
    assert_eq!(count(&runs), 1);
}

#[tokio::test(start_paused = true)]
async fn pause_and_resume() {
    let polls = PollingManager::new();
    let runs = start_counting(&polls, PollConfig::new("p", Duration::from_secs(10)), healthy());
    settle().await;

    polls.pause_poll("p");
    sleep(Duration::from_secs(60)).await;
    assert_eq!(count(&runs), 1);
    assert!(!polls.get_poll_state("p").unwrap().is_polling);

    polls.trigger_immediate_poll("p");
    settle().await;
    assert_eq!(count(&runs), 1);

    polls.resume_poll("p");
    settle().await;
    assert_eq!(count(&runs), 1);
    sleep(Duration::from_millis(10_100)).await;
    assert_eq!(count(&runs), 2);
}

#[tokio::test(start_paused = true)]
async fn config_update_reschedules_without_running() {
    let polls = PollingManager::new();
    let runs = start_counting(&polls, PollConfig::new("p", Duration::from_secs(60)), healthy());
    settle().await;

    polls.update_poll_config(
        "p",
        PollConfigUpdate {
            interval: Some(Duration::from_secs(5)),
            ..Default::default()
        },
    );
    settle().await;
    assert_eq!(count(&runs), 1);

    sleep(Duration::from_millis(5_100)).await;
    assert_eq!(count(&runs), 2);
    assert_eq!(
        polls.get_poll_config("p").unwrap().interval,
        Duration::from_secs(5)
    );
    assert_eq!(
        polls.get_poll_state("p").unwrap().current_interval,
        Duration::from_secs(5)
    );
}

#[tokio::test(start_paused = true)]
async fn starting_an_existing_key_replaces_it() {
    let polls = PollingManager::new();
    let old = start_counting(&polls, PollConfig::new("p", Duration::from_secs(10)), healthy());
    settle().await;
    let new = start_counting(&polls, PollConfig::new("p", Duration::from_secs(10)), healthy());
    settle().await;

    sleep(Duration::from_millis(10_100)).await;
    assert_eq!(count(&old), 1);
    assert_eq!(count(&new), 2);
    assert_eq!(polls.active_polls(), vec!["p".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn stop_forgets_the_poll() {
    let polls = PollingManager::new();
    let runs = start_counting(&polls, PollConfig::new("p", Duration::from_secs(10)), healthy());
    settle().await;

    polls.stop_poll("p");
    sleep(Duration::from_secs(60)).await;

    assert_eq!(count(&runs), 1);
    assert!(polls.get_poll_state("p").is_none());
    assert!(polls.active_polls().is_empty());
    // Unknown keys are ignored
    polls.stop_poll("p");
    polls.trigger_immediate_poll("p");
}

#[tokio::test(start_paused = true)]
async fn superseded_run_is_cancelled() {
    let polls = PollingManager::new();
    let cancelled = counter();
    let c = cancelled.clone();
    polls.start_poll(PollConfig::new("p", Duration::from_secs(30)), move |cancel| {
        let cancelled = c.clone();
        async move {
            sleep(Duration::from_secs(1)).await;
            if cancel.is_cancelled() {
                cancelled.fetch_add(1, Ordering::SeqCst);
            }
            Ok::<_, anyhow::Error>(())
        }
    });
    settle().await;

    polls.trigger_immediate_poll("p");
    sleep(Duration::from_secs(2)).await;

    assert_eq!(count(&cancelled), 1);
    assert!(polls.get_poll_state("p").unwrap().last_success_time.is_some());
}

#[tokio::test(start_paused = true)]
async fn blur_makes_the_user_inactive_after_grace_period() {
    let polls = PollingManager::new();
    let runs = start_counting(&polls, PollConfig::dashboard("d"), healthy());
    settle().await;

    polls.handle_signal(ActivitySignal::Blur);
    sleep(Duration::from_secs(4)).await;
    assert!(polls.is_user_active());
    sleep(Duration::from_secs(2)).await;
    assert!(!polls.is_user_active());

    // The timer armed while active still fires at 30s
    sleep(Duration::from_secs(34)).await;
    assert_eq!(count(&runs), 2);

    // Then max(2 * 30s, 120s)
    sleep(Duration::from_secs(100)).await;
    assert_eq!(count(&runs), 2);
    sleep(Duration::from_secs(11)).await;
    assert_eq!(count(&runs), 3);
}

#[tokio::test(start_paused = true)]
async fn activity_during_grace_keeps_the_user_active() {
    let polls = PollingManager::new();

    polls.handle_signal(ActivitySignal::Visibility { visible: false });
    sleep(Duration::from_secs(2)).await;
    polls.handle_signal(ActivitySignal::Input);
    sleep(Duration::from_secs(10)).await;

    assert!(polls.is_user_active());
}

#[tokio::test(start_paused = true)]
async fn dispose_stops_everything() {
    let polls = PollingManager::new();
    let a = start_counting(&polls, PollConfig::round_timer("round"), healthy());
    let b = start_counting(&polls, PollConfig::balance("balance"), healthy());
    settle().await;
    assert_eq!(
        polls.get_poll_config("round").unwrap(),
        PollConfig::round_timer("round")
    );

    polls.dispose();
    sleep(Duration::from_secs(600)).await;

    assert_eq!((count(&a), count(&b)), (1, 1));
    assert!(polls.active_polls().is_empty());
}
