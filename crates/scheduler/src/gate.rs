//! Per-tick precondition check.
//!
//! Preconditions run cheapest-first and stop at the first one that fails:
//! cycle idle, video known, page visible, not paused, fast enough, handle
//! available. A failed precondition is never an error; the next tick simply
//! tries again.

use std::fmt;
use subnudge_core::{PageHost, PlaybackContext};
use tracing::debug;

use crate::session::NudgeSession;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SkipReason {
    CycleInFlight,
    NoVideo,
    Hidden,
    Paused,
    BelowThreshold,
    NoHandle,
    /// Reading playback state from the page failed.
    HostUnavailable,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CycleInFlight => "cycle_in_flight",
            Self::NoVideo => "no_video",
            Self::Hidden => "hidden",
            Self::Paused => "paused",
            Self::BelowThreshold => "below_threshold",
            Self::NoHandle => "no_handle",
            Self::HostUnavailable => "host_unavailable",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Skipped(SkipReason),
    /// Track cleared, restore scheduled.
    Started,
    /// The capture or clear step failed; the cycle is already over.
    Failed,
}

/// Visibility, pause and speed checks, in that order.
pub fn check_playback(ctx: &PlaybackContext, threshold: f64) -> Result<(), SkipReason> {
    if !ctx.visible {
        return Err(SkipReason::Hidden);
    }
    if ctx.paused {
        return Err(SkipReason::Paused);
    }
    if !ctx.is_fast(threshold) {
        return Err(SkipReason::BelowThreshold);
    }
    Ok(())
}

impl<H: PageHost> NudgeSession<H> {
    /// One timer tick: start a nudge cycle if every precondition holds.
    pub async fn tick(&mut self) -> TickOutcome {
        self.stats.ticks += 1;
        let outcome = match self.gate().await {
            Ok(handle) => self.begin_refresh(handle).await,
            Err(reason) => TickOutcome::Skipped(reason),
        };
        if let TickOutcome::Skipped(reason) = outcome {
            *self.stats.skipped.entry(reason).or_insert(0) += 1;
        }
        outcome
    }

    async fn gate(&mut self) -> Result<H::Handle, SkipReason> {
        if self.cycle.is_in_flight() {
            return Err(SkipReason::CycleInFlight);
        }

        let video = match self.video.clone() {
            Some(v) => v,
            None => self.reacquire_video().await.ok_or(SkipReason::NoVideo)?,
        };

        let ctx = match self.host.playback(&video).await {
            Ok(Some(ctx)) => ctx,
            Ok(None) => {
                debug!("Video element went away, will look it up again");
                self.drop_video().await;
                return Err(SkipReason::NoVideo);
            }
            Err(e) => {
                debug!(error = %e, "Could not read playback state");
                return Err(SkipReason::HostUnavailable);
            }
        };

        check_playback(&ctx, self.config.speed_threshold)?;

        let handle = match self.locator.locate(&self.host, &video).await {
            Some(h) => h,
            None => {
                debug!("Player instance not found for nudge cycle. Will retry next interval.");
                return Err(SkipReason::NoHandle);
            }
        };

        debug!(
            rate = %format!("{:.2}", ctx.playback_rate),
            "High speed, initiating caption toggle cycle"
        );
        Ok(handle)
    }

    async fn reacquire_video(&mut self) -> Option<H::Video> {
        match self.host.find_video(&self.config.video_selector).await {
            Ok(Some(v)) => {
                debug!("Video element re-acquired");
                self.video = Some(v.clone());
                Some(v)
            }
            Ok(None) => None,
            Err(e) => {
                debug!(error = %e, "Video lookup failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeHost, VIDEO};
    use serde_json::json;
    use std::sync::Arc;
    use subnudge_core::NudgeConfig;

    fn session(host: &Arc<FakeHost>) -> NudgeSession<FakeHost> {
        NudgeSession::new(host.clone(), NudgeConfig::default()).with_video(VIDEO)
    }

    #[test]
    fn test_check_playback_order() {
        let hidden_paused_slow = PlaybackContext { playback_rate: 1.0, paused: true, visible: false };
        assert_eq!(check_playback(&hidden_paused_slow, 2.7), Err(SkipReason::Hidden));

        let paused_slow = PlaybackContext { visible: true, ..hidden_paused_slow };
        assert_eq!(check_playback(&paused_slow, 2.7), Err(SkipReason::Paused));

        let slow = PlaybackContext { paused: false, ..paused_slow };
        assert_eq!(check_playback(&slow, 2.7), Err(SkipReason::BelowThreshold));

        let fast = PlaybackContext { playback_rate: 2.7, ..slow };
        assert_eq!(check_playback(&fast, 2.7), Ok(()));
    }

    #[tokio::test]
    async fn test_below_threshold_never_refreshes() {
        let host = Arc::new(FakeHost::with_player(7));
        host.update(|s| s.track = json!({"languageCode": "en"}));
        let mut s = session(&host);

        for rate in [0.0, 0.25, 1.0, 2.0, 2.5, 2.69] {
            host.set_playback(rate, false, true);
            for _ in 0..3 {
                assert_eq!(s.tick().await, TickOutcome::Skipped(SkipReason::BelowThreshold));
            }
        }
        assert!(host.writes().is_empty());
        assert!(host.state().probes.is_empty());
        assert_eq!(s.stats().started, 0);
        assert_eq!(s.stats().skipped(SkipReason::BelowThreshold), 18);
    }

    #[tokio::test]
    async fn test_one_cycle_per_tick_never_overlapping() {
        let host = Arc::new(FakeHost::with_player(7));
        host.set_playback(3.0, false, true);
        host.update(|s| s.track = json!({"languageCode": "en"}));
        let mut s = session(&host);

        assert_eq!(s.tick().await, TickOutcome::Started);
        // Ticks firing before the restore ran are dropped, not queued.
        assert_eq!(s.tick().await, TickOutcome::Skipped(SkipReason::CycleInFlight));
        assert_eq!(s.tick().await, TickOutcome::Skipped(SkipReason::CycleInFlight));
        assert_eq!(host.writes(), vec![json!({})]);

        s.complete_restore().await.unwrap();
        assert_eq!(s.tick().await, TickOutcome::Started);
        assert_eq!(s.stats().started, 2);
        assert_eq!(s.stats().skipped(SkipReason::CycleInFlight), 2);
    }

    #[tokio::test]
    async fn test_hidden_page_is_skipped_before_anything_else() {
        let host = Arc::new(FakeHost::with_player(7));
        host.set_playback(3.0, false, false);
        let mut s = session(&host);
        assert_eq!(s.tick().await, TickOutcome::Skipped(SkipReason::Hidden));

        host.set_playback(3.0, true, true);
        assert_eq!(s.tick().await, TickOutcome::Skipped(SkipReason::Paused));
        assert!(host.state().probes.is_empty());
    }

    #[tokio::test]
    async fn test_missing_handle_retried_every_tick() {
        let host = Arc::new(FakeHost::new());
        host.set_playback(3.0, false, true);
        let mut s = session(&host);

        for _ in 0..5 {
            assert_eq!(s.tick().await, TickOutcome::Skipped(SkipReason::NoHandle));
        }
        // Every strategy probed on every tick.
        assert_eq!(host.state().probes.len(), 5 * 4);
        assert!(host.writes().is_empty());
        assert!(!s.cycle().is_in_flight());

        // The page finishes booting its player.
        host.update(|st| {
            st.candidates.insert("global_object", vec![9]);
            st.callable.insert(9);
        });
        assert_eq!(s.tick().await, TickOutcome::Started);
    }

    #[tokio::test]
    async fn test_detached_video_is_reacquired() {
        let host = Arc::new(FakeHost::with_player(7));
        host.update(|st| st.playback = None);
        let mut s = session(&host);

        assert_eq!(s.tick().await, TickOutcome::Skipped(SkipReason::NoVideo));
        assert!(s.video().is_none());
        assert_eq!(host.state().discarded_videos, vec![VIDEO]);

        host.set_playback(1.0, false, true);
        assert_eq!(s.tick().await, TickOutcome::Skipped(SkipReason::BelowThreshold));
        assert_eq!(s.video(), Some(&VIDEO));
        assert_eq!(host.state().find_video_calls, 1);
    }

    #[tokio::test]
    async fn test_no_video_on_page() {
        let host = Arc::new(FakeHost::new());
        host.update(|st| st.video_present = false);
        let mut s = NudgeSession::new(host.clone(), NudgeConfig::default());
        assert_eq!(s.tick().await, TickOutcome::Skipped(SkipReason::NoVideo));
        assert_eq!(host.state().playback_reads, 0);
    }
}
