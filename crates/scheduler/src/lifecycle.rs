use std::sync::Arc;
use std::time::Duration;
use subnudge_core::{NudgeConfig, PageHost};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::session::{CycleStats, NudgeSession};

pub const SUPPRESS_STYLE_ID: &str = "subnudge-suppress-style";

const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Owns the startup sequence and the nudge loop for one page.
///
/// `start` spawns a single task that waits for the page, sets it up and then
/// runs [`NudgeSession::run_loop`]. `teardown` stops that task and undoes the
/// page changes.
pub struct NudgeController<H: PageHost + 'static> {
    host: Arc<H>,
    config: NudgeConfig,
    shutdown_tx: Option<broadcast::Sender<()>>,
    task: Option<JoinHandle<Option<CycleStats>>>,
}

impl<H: PageHost + 'static> NudgeController<H> {
    pub fn new(host: Arc<H>, config: NudgeConfig) -> Self {
        Self {
            host,
            config,
            shutdown_tx: None,
            task: None,
        }
    }

    pub fn is_started(&self) -> bool {
        self.task.is_some()
    }

    /// Returns `false` without doing anything if already started.
    pub fn start(&mut self) -> bool {
        if self.task.is_some() {
            debug!("Nudge controller already started");
            return false;
        }

        let (tx, rx) = broadcast::channel(1);
        let host = self.host.clone();
        let config = self.config.clone();
        self.task = Some(tokio::spawn(startup_and_run(host, config, rx)));
        self.shutdown_tx = Some(tx);
        true
    }

    /// Stop the loop, remove the injected style, release page objects.
    ///
    /// Returns the loop's counters if it got as far as running.
    pub async fn teardown(&mut self) -> Option<CycleStats> {
        let mut task = self.task.take()?;
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        let stats = match tokio::time::timeout(TEARDOWN_TIMEOUT, &mut task).await {
            Ok(Ok(stats)) => stats,
            Ok(Err(e)) => {
                warn!(error = %e, "Nudge task ended abnormally");
                None
            }
            Err(_) => {
                warn!("Nudge task did not stop in time, aborting");
                task.abort();
                None
            }
        };

        match self.host.remove_style(SUPPRESS_STYLE_ID).await {
            Ok(true) => debug!("Removed caption suppression style"),
            Ok(false) => {}
            Err(e) => debug!(error = %e, "Could not remove caption suppression style"),
        }
        if let Err(e) = self.host.release().await {
            debug!(error = %e, "Failed to release page objects");
        }

        match &stats {
            Some(s) => info!(
                ticks = s.ticks,
                started = s.started,
                restored = s.restored,
                restore_skipped = s.restore_skipped,
                failed = s.failed,
                "Nudge controller stopped"
            ),
            None => info!("Nudge controller stopped before the loop ran"),
        }
        stats
    }
}

impl<H: PageHost + 'static> Drop for NudgeController<H> {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn startup_and_run<H: PageHost>(
    host: Arc<H>,
    config: NudgeConfig,
    mut shutdown: broadcast::Receiver<()>,
) -> Option<CycleStats> {
    let session = tokio::select! {
        biased;
        _ = shutdown.recv() => {
            info!("Shutdown before the nudge loop started");
            return None;
        }
        session = prepare(host, config) => session,
    };
    Some(session.run_loop(shutdown).await)
}

/// Readiness, startup delay, video lookup, then one-time page setup.
async fn prepare<H: PageHost>(host: Arc<H>, config: NudgeConfig) -> NudgeSession<H> {
    let retry = config.video_retry();

    loop {
        match host.is_ready().await {
            Ok(true) => break,
            Ok(false) => {}
            Err(e) => debug!(error = %e, "Readiness check failed"),
        }
        tokio::time::sleep(retry).await;
    }
    debug!(delay_ms = config.startup_delay_ms, "Page ready, waiting before setup");
    tokio::time::sleep(config.startup_delay()).await;

    let video = wait_for_video(host.as_ref(), &config.video_selector, retry).await;
    info!(selector = %config.video_selector, "Video element found");

    if let Some(css) = config.suppress_css() {
        if let Err(e) = host.inject_style(SUPPRESS_STYLE_ID, &css).await {
            debug!(error = %e, "Could not inject caption suppression style");
        }
    }

    let mut session = NudgeSession::new(host, config).with_video(video);
    match session.discover_handle().await {
        Some(_) => info!("Player instance found"),
        None => info!("Player instance not found yet, will retry on each tick"),
    }
    session
}

async fn wait_for_video<H: PageHost>(host: &H, selector: &str, retry: Duration) -> H::Video {
    let mut attempts = 0u64;
    loop {
        attempts += 1;
        match host.find_video(selector).await {
            Ok(Some(video)) => return video,
            Ok(None) => debug!(attempts, "Video element not found, retrying"),
            Err(e) => debug!(attempts, error = %e, "Video lookup failed, retrying"),
        }
        tokio::time::sleep(retry).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeHost;
    use serde_json::json;

    async fn advance(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_double_start_creates_one_loop() {
        let host = Arc::new(FakeHost::with_player(7));
        let mut ctl = NudgeController::new(host.clone(), NudgeConfig::default());

        assert!(ctl.start());
        assert!(!ctl.start());
        assert!(ctl.is_started());

        // Loop starts at 3000 ms, ticks at 4000..=8000.
        advance(8_500).await;
        assert_eq!(host.state().playback_reads, 5);
        assert_eq!(host.state().find_video_calls, 1);

        let stats = ctl.teardown().await.unwrap();
        assert_eq!(stats.ticks, 5);
        assert!(!ctl.is_started());
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_without_start_is_noop() {
        let host = Arc::new(FakeHost::new());
        let mut ctl = NudgeController::new(host.clone(), NudgeConfig::default());
        assert!(ctl.teardown().await.is_none());
        assert!(ctl.teardown().await.is_none());
        assert_eq!(host.state().released, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_during_startup() {
        let host = Arc::new(FakeHost::with_player(7));
        let mut ctl = NudgeController::new(host.clone(), NudgeConfig::default());
        ctl.start();
        advance(1_000).await;

        assert!(ctl.teardown().await.is_none());
        assert_eq!(host.state().released, 1);

        advance(10_000).await;
        assert_eq!(host.state().find_video_calls, 0);
        assert!(host.state().styles.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_removes_style_and_stops_ticks() {
        let host = Arc::new(FakeHost::with_player(7));
        let mut ctl = NudgeController::new(host.clone(), NudgeConfig::default());
        ctl.start();

        advance(4_500).await;
        assert!(host.state().styles.contains_key(SUPPRESS_STYLE_ID));

        ctl.teardown().await.unwrap();
        assert!(host.state().styles.is_empty());
        assert_eq!(host.state().released, 1);

        let reads = host.state().playback_reads;
        advance(10_000).await;
        assert_eq!(host.state().playback_reads, reads);
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_mid_cycle_restores_track() {
        let host = Arc::new(FakeHost::with_player(7));
        host.set_playback(3.0, false, true);
        host.update(|s| s.track = json!({"languageCode": "en"}));
        let config = NudgeConfig {
            restore_delay_ms: 500,
            ..NudgeConfig::default()
        };
        let mut ctl = NudgeController::new(host.clone(), config);
        ctl.start();

        // First tick at 4000 clears; its restore is due at 4500.
        advance(4_100).await;
        assert_eq!(host.writes(), vec![json!({})]);

        let stats = ctl.teardown().await.unwrap();
        advance(2_000).await;
        assert_eq!(stats.restored, 1);
        assert_eq!(host.writes(), vec![json!({}), json!({"languageCode": "en"})]);
        assert_eq!(host.state().track, json!({"languageCode": "en"}));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_style_when_suppression_disabled() {
        let host = Arc::new(FakeHost::with_player(7));
        let config = NudgeConfig {
            suppress_selector: None,
            ..NudgeConfig::default()
        };
        let mut ctl = NudgeController::new(host.clone(), config);
        ctl.start();
        advance(4_500).await;
        assert!(host.state().styles.is_empty());
        ctl.teardown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_page_ready_and_video() {
        let host = Arc::new(FakeHost::with_player(7));
        host.update(|s| {
            s.ready = false;
            s.video_present = false;
        });
        let mut ctl = NudgeController::new(host.clone(), NudgeConfig::default());
        ctl.start();

        advance(5_000).await;
        assert_eq!(host.state().find_video_calls, 0);

        // Ready noticed at 6000, video polled from 9000 every 2000.
        host.update(|s| s.ready = true);
        advance(8_100).await;
        assert_eq!(host.state().find_video_calls, 3);
        assert_eq!(host.state().playback_reads, 0);

        host.update(|s| s.video_present = true);
        advance(2_000).await;
        assert_eq!(host.state().find_video_calls, 4);

        // Video found at 15000, first tick at 16000.
        advance(1_000).await;
        assert_eq!(host.state().playback_reads, 1);
        ctl.teardown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_english_track_end_to_end() {
        let host = Arc::new(FakeHost::with_player(7));
        host.set_playback(3.0, false, true);
        host.update(|s| s.track = json!({"languageCode": "en"}));

        let mut ctl = NudgeController::new(host.clone(), NudgeConfig::default());
        ctl.start();
        advance(4_500).await;
        assert_eq!(host.writes(), vec![json!({}), json!({"languageCode": "en"})]);

        let stats = ctl.teardown().await.unwrap();
        assert_eq!(stats.started, 1);
        assert_eq!(stats.restored, 1);
        assert_eq!(host.state().track, json!({"languageCode": "en"}));
    }
}
