//! The seam between the control loop and whatever page it is attached to.
//!
//! The loop never touches the page directly. Everything it needs (the video
//! element, the player control object, page visibility, style injection) goes
//! through [`PageHost`], so the same loop runs against a real browser tab over
//! CDP or a scripted fake in tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::error::Result;
use crate::types::PlaybackContext;

/// One named way of finding the player control object.
///
/// Strategies are tried in list order; each yields zero or more candidates
/// that are then checked with [`PageHost::is_callable`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum DiscoveryStrategy {
    /// `document.getElementById(id)` exposes the control surface itself.
    #[serde(rename_all = "camelCase")]
    ElementId { id: String },
    /// Enumerable properties of the video element whose names start with one
    /// of `prefixes`, in enumeration order.
    #[serde(rename_all = "camelCase")]
    VideoProperty { prefixes: Vec<String> },
    /// A page-global function (dot path from `window`) that maps an element to
    /// its player. Called with `#element_id`, or the video element if that id
    /// is absent.
    #[serde(rename_all = "camelCase")]
    LookupByElement { function: String, element_id: String },
    /// A page-global singleton reached by dot path from `window`.
    #[serde(rename_all = "camelCase")]
    GlobalObject { path: String },
}

impl DiscoveryStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ElementId { .. } => "element_id",
            Self::VideoProperty { .. } => "video_property",
            Self::LookupByElement { .. } => "lookup_by_element",
            Self::GlobalObject { .. } => "global_object",
        }
    }

    /// The chain used against YouTube's watch and embed pages.
    pub fn default_chain() -> Vec<Self> {
        vec![
            Self::ElementId {
                id: "movie_player".to_string(),
            },
            Self::VideoProperty {
                prefixes: vec![
                    "__yt".to_string(),
                    "yt$".to_string(),
                    "ytplayer$".to_string(),
                ],
            },
            Self::LookupByElement {
                function: "yt.player.getPlayerByElement".to_string(),
                element_id: "movie_player".to_string(),
            },
            Self::GlobalObject {
                path: "ytplayer".to_string(),
            },
        ]
    }
}

impl fmt::Display for DiscoveryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ElementId { id } => write!(f, "element_id(#{})", id),
            Self::VideoProperty { prefixes } => {
                write!(f, "video_property({})", prefixes.join("|"))
            }
            Self::LookupByElement { function, element_id } => {
                write!(f, "lookup_by_element({}, #{})", function, element_id)
            }
            Self::GlobalObject { path } => write!(f, "global_object({})", path),
        }
    }
}

/// Everything the control loop needs from the page.
///
/// Implementations must not panic; every failure is reported as an
/// [`Error`](crate::Error). A reference that no longer resolves should be
/// reported as [`Error::StaleReference`](crate::Error::StaleReference).
#[async_trait]
pub trait PageHost: Send + Sync {
    /// Reference to the video element.
    type Video: Clone + Send + Sync + fmt::Debug;
    /// Reference to a player control object.
    type Handle: Clone + Send + Sync + fmt::Debug;

    /// Whether the document has finished parsing (interactive or complete).
    async fn is_ready(&self) -> Result<bool>;

    async fn find_video(&self, selector: &str) -> Result<Option<Self::Video>>;

    /// Current playback state; `Ok(None)` when the element is gone or
    /// detached from the document.
    async fn playback(&self, video: &Self::Video) -> Result<Option<PlaybackContext>>;

    /// Candidates produced by one discovery strategy, unvalidated.
    async fn probe(
        &self,
        strategy: &DiscoveryStrategy,
        video: &Self::Video,
    ) -> Result<Vec<Self::Handle>>;

    /// True when both `getOption` and `setOption` are callable on `handle`.
    async fn is_callable(&self, handle: &Self::Handle) -> Result<bool>;

    async fn get_option(&self, handle: &Self::Handle, namespace: &str, key: &str) -> Result<Value>;

    async fn set_option(
        &self,
        handle: &Self::Handle,
        namespace: &str,
        key: &str,
        value: &Value,
    ) -> Result<()>;

    /// Insert (or replace) a `<style id=...>` element.
    async fn inject_style(&self, id: &str, css: &str) -> Result<()>;

    /// Remove the style element; `Ok(false)` if it was not there.
    async fn remove_style(&self, id: &str) -> Result<bool>;

    /// Let go of a handle the loop will not use again (a rejected candidate
    /// or a stale cached handle).
    async fn discard_handle(&self, _handle: &Self::Handle) -> Result<()> {
        Ok(())
    }

    /// Let go of a video reference the loop has dropped.
    async fn discard_video(&self, _video: &Self::Video) -> Result<()> {
        Ok(())
    }

    /// Drop any page-side resources held on behalf of the loop.
    async fn release(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_chain_order() {
        let names: Vec<_> = DiscoveryStrategy::default_chain()
            .iter()
            .map(|s| s.name())
            .collect();
        assert_eq!(
            names,
            vec!["element_id", "video_property", "lookup_by_element", "global_object"]
        );
    }

    #[test]
    fn test_strategy_serde_shape() {
        let s = DiscoveryStrategy::LookupByElement {
            function: "yt.player.getPlayerByElement".into(),
            element_id: "movie_player".into(),
        };
        let v = serde_json::to_value(&s).unwrap();
        assert_eq!(
            v,
            json!({"kind": "lookupByElement", "function": "yt.player.getPlayerByElement", "elementId": "movie_player"})
        );
        let back: DiscoveryStrategy =
            serde_json::from_value(json!({"kind": "globalObject", "path": "ytplayer"})).unwrap();
        assert_eq!(back.to_string(), "global_object(ytplayer)");
    }
}
