use std::collections::BTreeMap;
use std::sync::Arc;
use subnudge_core::{NudgeConfig, PageHost};
use tokio::sync::broadcast;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::gate::SkipReason;
use crate::locator::{discard, HandleLocator};
use crate::refresh::CycleState;

/// Counters for one run of the loop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleStats {
    pub ticks: u64,
    pub started: u64,
    pub restored: u64,
    pub restore_skipped: u64,
    pub failed: u64,
    pub handle_invalidations: u64,
    pub skipped: BTreeMap<SkipReason, u64>,
}

impl CycleStats {
    pub fn skipped(&self, reason: SkipReason) -> u64 {
        self.skipped.get(&reason).copied().unwrap_or(0)
    }
}

/// All mutable state of the control loop for one page.
///
/// Owned by exactly one task; nothing in here is shared, so there are no
/// locks. The tick logic lives in `gate.rs`, the two-phase refresh in
/// `refresh.rs`.
pub struct NudgeSession<H: PageHost> {
    pub(crate) host: Arc<H>,
    pub(crate) config: NudgeConfig,
    pub(crate) video: Option<H::Video>,
    pub(crate) locator: HandleLocator<H>,
    pub(crate) cycle: CycleState<H::Handle>,
    pub(crate) stats: CycleStats,
}

impl<H: PageHost> NudgeSession<H> {
    pub fn new(host: Arc<H>, config: NudgeConfig) -> Self {
        let locator = HandleLocator::new(config.discovery.clone());
        Self {
            host,
            config,
            video: None,
            locator,
            cycle: CycleState::Idle,
            stats: CycleStats::default(),
        }
    }

    pub fn with_video(mut self, video: H::Video) -> Self {
        self.video = Some(video);
        self
    }

    pub fn video(&self) -> Option<&H::Video> {
        self.video.as_ref()
    }

    pub fn cycle(&self) -> &CycleState<H::Handle> {
        &self.cycle
    }

    pub fn stats(&self) -> &CycleStats {
        &self.stats
    }

    pub fn cached_handle(&self) -> Option<&H::Handle> {
        self.locator.cached()
    }

    /// Run discovery once outside a tick (used at startup).
    pub async fn discover_handle(&mut self) -> Option<H::Handle> {
        let video = self.video.clone()?;
        self.locator.locate(&self.host, &video).await
    }

    pub(crate) async fn invalidate_handle(&mut self) {
        if let Some(stale) = self.locator.invalidate() {
            self.stats.handle_invalidations += 1;
            debug!("Cleared cached player handle");
            discard(self.host.as_ref(), &stale).await;
        }
    }

    /// Forget the video reference; the next tick looks it up again.
    pub(crate) async fn drop_video(&mut self) {
        if let Some(video) = self.video.take() {
            if let Err(e) = self.host.discard_video(&video).await {
                debug!(error = %e, "Failed to discard video reference");
            }
        }
    }

    /// Tick every `interval`, run due restores, stop on `shutdown`.
    pub async fn run_loop(mut self, mut shutdown: broadcast::Receiver<()>) -> CycleStats {
        let period = self.config.interval();
        info!(
            interval_ms = self.config.interval_ms,
            restore_delay_ms = self.config.restore_delay_ms,
            threshold = self.config.speed_threshold,
            "Nudge loop started"
        );

        // First tick one period from now, like a plain interval timer.
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let restore_due = self.cycle.restore_due();
            tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    // A cleared track is not left behind; the restore's own
                    // checks still decide whether it writes.
                    if self.cycle.is_in_flight() {
                        self.complete_restore().await;
                    }
                    info!("Nudge loop shutting down");
                    break;
                }
                _ = sleep_until_due(restore_due) => {
                    self.complete_restore().await;
                }
                _ = interval.tick() => {
                    self.tick().await;
                }
            }
        }

        self.stats
    }
}

async fn sleep_until_due(due: Option<Instant>) {
    match due {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
