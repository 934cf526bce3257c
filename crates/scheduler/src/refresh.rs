//! The nudge cycle: clear the caption track, then put it back.
//!
//! Changing the active track makes the player drop its rendered caption
//! state and resync it with the current playback position. The cycle is a
//! small state machine:
//!
//! ```text
//! Idle --tick/begin_refresh--> ClearedPendingRestore --restore due--> Done
//!   ^                                                                  |
//!   +------------------------- (next tick) ----------------------------+
//! ```
//!
//! Only `ClearedPendingRestore` counts as "in flight". A failure at any step
//! ends the cycle in `Done(Failed)`, so the gate never stays blocked.

use serde_json::Value;
use subnudge_core::{CaptionTrackSelection, Error, PageHost};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::gate::TickOutcome;
use crate::session::NudgeSession;

pub const CAPTIONS_NAMESPACE: &str = "captions";
pub const TRACK_KEY: &str = "track";

/// Why a restore phase did not write the track back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreSkip {
    VideoGone,
    Paused,
    BelowThreshold,
    HandleUnusable,
    HostUnavailable,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// The captured selection (possibly `{}`) was written back.
    Restored { selection: CaptionTrackSelection },
    /// Conditions changed during the gap; nothing was written back.
    RestoreSkipped(RestoreSkip),
    Failed(String),
}

/// Second half of a cycle, waiting for its deadline.
#[derive(Debug, Clone)]
pub struct PendingRestore<Hd> {
    pub handle: Hd,
    /// `None` when no track was active before the clear.
    pub restore: Option<CaptionTrackSelection>,
    pub due: Instant,
}

#[derive(Debug, Clone)]
pub enum CycleState<Hd> {
    Idle,
    ClearedPendingRestore(PendingRestore<Hd>),
    Done(CycleOutcome),
}

impl<Hd> CycleState<Hd> {
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::ClearedPendingRestore(_))
    }

    pub fn restore_due(&self) -> Option<Instant> {
        match self {
            Self::ClearedPendingRestore(p) => Some(p.due),
            _ => None,
        }
    }

    pub fn last_outcome(&self) -> Option<&CycleOutcome> {
        match self {
            Self::Done(outcome) => Some(outcome),
            _ => None,
        }
    }
}

impl<H: PageHost> NudgeSession<H> {
    /// Capture and clear. On success the session is left in
    /// `ClearedPendingRestore` with a deadline `restore_delay` from now.
    pub(crate) async fn begin_refresh(&mut self, handle: H::Handle) -> TickOutcome {
        self.stats.started += 1;

        let current = match self
            .host
            .get_option(&handle, CAPTIONS_NAMESPACE, TRACK_KEY)
            .await
        {
            Ok(v) => CaptionTrackSelection::from_value(v),
            Err(e) => return self.fail_cycle(&handle, "read", e).await,
        };
        let restore = (!current.is_none() && current.has_track_identifier()).then_some(current);

        if let Err(e) = self
            .host
            .set_option(&handle, CAPTIONS_NAMESPACE, TRACK_KEY, &cleared_value())
            .await
        {
            return self.fail_cycle(&handle, "clear", e).await;
        }

        debug!(
            restore = ?restore.as_ref().and_then(|s| s.language_code()),
            "Captions cleared, restore scheduled"
        );
        self.cycle = CycleState::ClearedPendingRestore(PendingRestore {
            handle,
            restore,
            due: Instant::now() + self.config.restore_delay(),
        });
        TickOutcome::Started
    }

    /// Run the restore phase if one is pending. Whatever happens, the cycle
    /// ends in `Done`.
    pub async fn complete_restore(&mut self) -> Option<CycleOutcome> {
        let pending = match std::mem::replace(&mut self.cycle, CycleState::Idle) {
            CycleState::ClearedPendingRestore(p) => p,
            other => {
                self.cycle = other;
                return None;
            }
        };

        let outcome = self.restore(pending).await;
        match &outcome {
            CycleOutcome::Restored { selection } => {
                self.stats.restored += 1;
                debug!(language = ?selection.language_code(), "Caption track restored");
            }
            CycleOutcome::RestoreSkipped(why) => {
                self.stats.restore_skipped += 1;
                debug!(reason = ?why, "Conditions changed mid-cycle, restore skipped");
            }
            CycleOutcome::Failed(_) => {}
        }
        self.cycle = CycleState::Done(outcome.clone());
        Some(outcome)
    }

    async fn restore(&mut self, pending: PendingRestore<H::Handle>) -> CycleOutcome {
        let Some(video) = self.video.clone() else {
            return CycleOutcome::RestoreSkipped(RestoreSkip::VideoGone);
        };
        match self.host.playback(&video).await {
            Ok(Some(ctx)) if ctx.paused => return CycleOutcome::RestoreSkipped(RestoreSkip::Paused),
            Ok(Some(ctx)) if !ctx.is_fast(self.config.speed_threshold) => {
                return CycleOutcome::RestoreSkipped(RestoreSkip::BelowThreshold)
            }
            Ok(Some(_)) => {}
            Ok(None) => {
                self.drop_video().await;
                return CycleOutcome::RestoreSkipped(RestoreSkip::VideoGone);
            }
            Err(e) => {
                debug!(error = %e, "Could not re-read playback state before restore");
                return CycleOutcome::RestoreSkipped(RestoreSkip::HostUnavailable);
            }
        }

        match self.host.is_callable(&pending.handle).await {
            Ok(true) => {}
            _ => {
                self.invalidate_handle().await;
                return CycleOutcome::RestoreSkipped(RestoreSkip::HandleUnusable);
            }
        }

        let selection = pending.restore.unwrap_or_else(CaptionTrackSelection::none);
        match self
            .host
            .set_option(&pending.handle, CAPTIONS_NAMESPACE, TRACK_KEY, &selection.to_value())
            .await
        {
            Ok(()) => CycleOutcome::Restored { selection },
            Err(e) => {
                let outcome = self.record_failure(&pending.handle, "restore", e).await;
                CycleOutcome::Failed(outcome)
            }
        }
    }

    async fn fail_cycle(&mut self, handle: &H::Handle, step: &str, err: Error) -> TickOutcome {
        let msg = self.record_failure(handle, step, err).await;
        self.cycle = CycleState::Done(CycleOutcome::Failed(msg));
        TickOutcome::Failed
    }

    /// Log, count, and drop the cached handle if it no longer checks out.
    async fn record_failure(&mut self, handle: &H::Handle, step: &str, err: Error) -> String {
        warn!(step, error = %err, "Error during caption toggle");
        self.stats.failed += 1;
        let broken = err.is_stale() || !matches!(self.host.is_callable(handle).await, Ok(true));
        if broken {
            self.invalidate_handle().await;
        }
        format!("{} failed: {}", step, err)
    }
}

/// The JSON written by the clear step.
pub fn cleared_value() -> Value {
    CaptionTrackSelection::none().to_value()
}
