use subnudge_core::{DiscoveryStrategy, PageHost};
use tracing::debug;

/// Finds the player control object and keeps the last good one.
///
/// A handle is only returned after [`PageHost::is_callable`] confirms it, and
/// the cached one is re-checked on every call since the page can swap the
/// object out underneath us.
pub struct HandleLocator<H: PageHost> {
    strategies: Vec<DiscoveryStrategy>,
    cached: Option<H::Handle>,
}

impl<H: PageHost> HandleLocator<H> {
    pub fn new(strategies: Vec<DiscoveryStrategy>) -> Self {
        Self {
            strategies,
            cached: None,
        }
    }

    pub fn cached(&self) -> Option<&H::Handle> {
        self.cached.as_ref()
    }

    pub fn strategies(&self) -> &[DiscoveryStrategy] {
        &self.strategies
    }

    /// Drop the cached handle; the next `locate` rediscovers. The caller
    /// gets the old handle back to dispose of.
    pub fn invalidate(&mut self) -> Option<H::Handle> {
        self.cached.take()
    }

    /// Return a callable handle, or `None` if no strategy produced one.
    /// Never fails: host errors count as "nothing found".
    ///
    /// Every candidate other than the one returned is discarded, so a page
    /// that never yields a player does not accumulate references.
    pub async fn locate(&mut self, host: &H, video: &H::Video) -> Option<H::Handle> {
        if let Some(handle) = self.cached.as_ref() {
            match host.is_callable(handle).await {
                Ok(true) => return self.cached.clone(),
                Ok(false) => debug!("Cached player handle is no longer callable, rediscovering"),
                Err(e) => debug!(error = %e, "Cached player handle check failed, rediscovering"),
            }
            if let Some(stale) = self.cached.take() {
                discard(host, &stale).await;
            }
        }

        for strategy in &self.strategies {
            let candidates = match host.probe(strategy, video).await {
                Ok(c) => c,
                Err(e) => {
                    debug!(strategy = %strategy, error = %e, "Discovery strategy failed");
                    continue;
                }
            };
            let mut found = None;
            for candidate in candidates {
                if found.is_none() && matches!(host.is_callable(&candidate).await, Ok(true)) {
                    found = Some(candidate);
                } else {
                    discard(host, &candidate).await;
                }
            }
            if let Some(handle) = found {
                debug!(strategy = strategy.name(), "Found player instance");
                self.cached = Some(handle.clone());
                return Some(handle);
            }
        }

        debug!("Player instance not found this cycle");
        None
    }
}

pub(crate) async fn discard<H: PageHost>(host: &H, handle: &H::Handle) {
    if let Err(e) = host.discard_handle(handle).await {
        debug!(error = %e, "Failed to discard player candidate");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeHost;

    fn locator() -> HandleLocator<FakeHost> {
        HandleLocator::new(DiscoveryStrategy::default_chain())
    }

    #[tokio::test]
    async fn test_first_callable_candidate_wins_in_rank_order() {
        let host = FakeHost::new();
        host.update(|s| {
            // element_id yields an object without the API; video_property has
            // a dud and a real one; the global would also work.
            s.candidates.insert("element_id", vec![10]);
            s.candidates.insert("video_property", vec![20, 21]);
            s.candidates.insert("global_object", vec![40]);
            s.callable.extend([21, 40]);
        });

        let mut loc = locator();
        assert_eq!(loc.locate(&host, &1).await, Some(21));
        assert_eq!(loc.cached(), Some(&21));
        // lookup_by_element and global_object were never consulted
        assert_eq!(host.state().probes, vec!["element_id", "video_property"]);
    }

    #[tokio::test]
    async fn test_cached_handle_skips_discovery() {
        let host = FakeHost::with_player(7);
        let mut loc = locator();
        assert_eq!(loc.locate(&host, &1).await, Some(7));
        let probes_after_first = host.state().probes.len();

        assert_eq!(loc.locate(&host, &1).await, Some(7));
        assert_eq!(host.state().probes.len(), probes_after_first);
    }

    #[tokio::test]
    async fn test_stale_cache_forces_rediscovery() {
        let host = FakeHost::with_player(7);
        let mut loc = locator();
        assert_eq!(loc.locate(&host, &1).await, Some(7));

        // Navigation replaced the player object.
        host.update(|s| {
            s.callable.remove(&7);
            s.candidates.insert("element_id", vec![8]);
            s.callable.insert(8);
        });
        assert_eq!(loc.locate(&host, &1).await, Some(8));
        assert_eq!(loc.cached(), Some(&8));
    }

    #[tokio::test]
    async fn test_probe_errors_are_not_fatal() {
        let host = FakeHost::new();
        host.update(|s| {
            s.failing_probes.insert("element_id");
            s.candidates.insert("global_object", vec![40]);
            s.callable.insert(40);
        });
        let mut loc = locator();
        assert_eq!(loc.locate(&host, &1).await, Some(40));
    }

    #[tokio::test]
    async fn test_nothing_found_returns_none() {
        let host = FakeHost::new();
        let mut loc = locator();
        assert_eq!(loc.locate(&host, &1).await, None);
        assert!(loc.cached().is_none());
        assert_eq!(host.state().probes.len(), 4);
        assert!(loc.invalidate().is_none());
    }

    #[tokio::test]
    async fn test_rejected_candidates_are_discarded() {
        let host = FakeHost::new();
        host.update(|s| {
            s.candidates.insert("element_id", vec![10]);
            s.candidates.insert("video_property", vec![20, 21, 22]);
            s.callable.insert(21);
        });
        let mut loc = locator();
        assert_eq!(loc.locate(&host, &1).await, Some(21));
        // 22 was never checked but is still let go of.
        assert_eq!(host.state().discarded, vec![10, 20, 22]);
    }

    #[tokio::test]
    async fn test_repeated_misses_hold_no_references() {
        let host = FakeHost::new();
        host.update(|s| {
            s.candidates.insert("element_id", vec![10]);
            s.candidates.insert("lookup_by_element", vec![30]);
        });
        let mut loc = locator();
        for _ in 0..5 {
            assert_eq!(loc.locate(&host, &1).await, None);
        }
        let s = host.state();
        assert_eq!(s.discarded.len(), 10);
        assert_eq!(s.live_handles(), 0);
    }

    #[tokio::test]
    async fn test_stale_cached_handle_is_discarded() {
        let host = FakeHost::with_player(7);
        let mut loc = locator();
        loc.locate(&host, &1).await;
        host.update(|s| {
            s.callable.remove(&7);
        });
        assert_eq!(loc.locate(&host, &1).await, None);
        assert!(host.state().discarded.contains(&7));
    }
}
