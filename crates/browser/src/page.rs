//! [`PageHost`] over CDP.
//!
//! Video elements and player handles are CDP remote objects. Every object
//! this module creates lives in the `subnudge` object group so teardown can
//! drop them in one call. Remote object ids die with their execution context,
//! which is how a handle from before a navigation shows up as stale.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use subnudge_core::{DiscoveryStrategy, Error, PageHost, PlaybackContext, Result};
use tracing::debug;

use super::cdp::CdpClient;

const OBJECT_GROUP: &str = "subnudge";

/// Protocol error fragments meaning "that reference is gone".
const STALE_MARKERS: [&str; 4] = [
    "Could not find object with given id",
    "Cannot find context with specified id",
    "Execution context was destroyed",
    "Inspected target navigated or closed",
];

const JS_PLAYBACK: &str = r#"function() {
    return {
        connected: this.isConnected === true,
        playbackRate: Number(this.playbackRate) || 0,
        paused: this.paused === true,
        visible: document.visibilityState === 'visible'
    };
}"#;

const JS_PROPERTY_NAMES: &str = r#"function(prefixes) {
    const out = [];
    for (const k in this) {
        if (prefixes.some(p => k.startsWith(p))) {
            try {
                const v = this[k];
                if (v && (typeof v === 'object' || typeof v === 'function')) out.push(k);
            } catch (_) {}
        }
    }
    return out;
}"#;

const JS_PROPERTY: &str = "function(k) { return this[k]; }";

const JS_LOOKUP_BY_ELEMENT: &str = r#"function(path, elementId) {
    const parts = path.split('.');
    let owner = window;
    for (let i = 0; i < parts.length - 1; i++) {
        owner = owner == null ? undefined : owner[parts[i]];
    }
    const fn = owner == null ? undefined : owner[parts[parts.length - 1]];
    if (typeof fn !== 'function') return null;
    return fn.call(owner, document.getElementById(elementId) || this) || null;
}"#;

const JS_IS_CALLABLE: &str = r#"function() {
    return typeof this.getOption === 'function' && typeof this.setOption === 'function';
}"#;

const JS_GET_OPTION: &str = r#"function(ns, key) {
    const v = this.getOption(ns, key);
    return v === undefined ? null : v;
}"#;

const JS_SET_OPTION: &str = r#"function(ns, key, value) {
    this.setOption(ns, key, value);
    return true;
}"#;

/// A CDP remote object id.
#[derive(Clone, PartialEq, Eq)]
pub struct RemoteRef(String);

impl RemoteRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for RemoteRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RemoteRef({})", self.0)
    }
}

/// The page behind one CDP connection.
pub struct CdpPage {
    cdp: Arc<CdpClient>,
}

impl CdpPage {
    pub fn new(cdp: Arc<CdpClient>) -> Self {
        Self { cdp }
    }

    async fn eval(&self, expression: &str, by_value: bool) -> Result<Value> {
        let resp = self
            .cdp
            .evaluate(expression, OBJECT_GROUP, by_value)
            .await
            .map_err(classify)?;
        remote_result(resp)
    }

    async fn call(&self, target: &RemoteRef, function: &str, args: &[Value], by_value: bool) -> Result<Value> {
        let resp = self
            .cdp
            .call_function_on(target.as_str(), function, args, OBJECT_GROUP, by_value)
            .await
            .map_err(classify)?;
        remote_result(resp)
    }

    /// A reference whose context is already gone has nothing left to free.
    async fn release_ref(&self, target: &RemoteRef) -> Result<()> {
        match self.cdp.release_object(target.as_str()).await.map_err(classify) {
            Err(e) if !e.is_stale() => Err(e),
            _ => Ok(()),
        }
    }
}

/// Map a protocol error string into the core error type.
pub fn classify(msg: String) -> Error {
    if STALE_MARKERS.iter().any(|m| msg.contains(m)) {
        Error::StaleReference(msg)
    } else if msg.contains("timed out") {
        Error::Timeout(msg)
    } else {
        Error::Cdp(msg)
    }
}

/// Extract the `RemoteObject` from a `Runtime.evaluate` / `callFunctionOn`
/// response, turning a thrown exception into [`Error::Host`].
pub fn remote_result(resp: Value) -> Result<Value> {
    if let Some(details) = resp.get("exceptionDetails") {
        let text = details
            .get("exception")
            .and_then(|e| e.get("description"))
            .and_then(|d| d.as_str())
            .or_else(|| details.get("text").and_then(|t| t.as_str()))
            .unwrap_or("uncaught exception");
        return Err(Error::Host(text.to_string()));
    }
    Ok(resp.get("result").cloned().unwrap_or(Value::Null))
}

/// The object id of a non-null remote object.
pub fn object_ref(remote: &Value) -> Option<RemoteRef> {
    if remote.get("subtype").and_then(|s| s.as_str()) == Some("null") {
        return None;
    }
    remote
        .get("objectId")
        .and_then(|v| v.as_str())
        .map(|s| RemoteRef(s.to_string()))
}

/// Resolve each named property to a remote object. A property whose getter
/// throws is skipped, not fatal to the rest.
async fn collect_property_refs<F, Fut>(names: Value, mut fetch: F) -> Vec<RemoteRef>
where
    F: FnMut(Value) -> Fut,
    Fut: Future<Output = Result<Value>>,
{
    let mut out = Vec::new();
    for name in names.as_array().into_iter().flatten() {
        let remote = match fetch(name.clone()).await {
            Ok(remote) => remote,
            Err(e) => {
                debug!(key = %name, error = %e, "Video property getter failed");
                continue;
            }
        };
        if let Some(r) = object_ref(&remote) {
            debug!(key = %name, "Candidate player property on video element");
            out.push(r);
        }
    }
    out
}

fn by_value(remote: Value) -> Value {
    remote.get("value").cloned().unwrap_or(Value::Null)
}

fn js_string(s: &str) -> String {
    Value::String(s.to_string()).to_string()
}

/// `window.a.b.c` as a null-safe expression.
fn global_path_expr(path: &str) -> String {
    format!(
        "(() => {{ let o = window; for (const p of {}.split('.')) {{ if (o == null) return null; o = o[p]; }} return (o && typeof o === 'object') ? o : null; }})()",
        js_string(path)
    )
}

#[async_trait]
impl PageHost for CdpPage {
    type Video = RemoteRef;
    type Handle = RemoteRef;

    async fn is_ready(&self) -> Result<bool> {
        let state = by_value(self.eval("document.readyState", true).await?);
        Ok(matches!(state.as_str(), Some("interactive") | Some("complete")))
    }

    async fn find_video(&self, selector: &str) -> Result<Option<RemoteRef>> {
        let expr = format!("document.querySelector({})", js_string(selector));
        Ok(object_ref(&self.eval(&expr, false).await?))
    }

    async fn playback(&self, video: &RemoteRef) -> Result<Option<PlaybackContext>> {
        let state = match self.call(video, JS_PLAYBACK, &[], true).await {
            Ok(remote) => by_value(remote),
            Err(e) if e.is_stale() => return Ok(None),
            Err(e) => return Err(e),
        };
        if !state.get("connected").and_then(|v| v.as_bool()).unwrap_or(false) {
            return Ok(None);
        }
        Ok(Some(PlaybackContext {
            playback_rate: state.get("playbackRate").and_then(|v| v.as_f64()).unwrap_or(0.0),
            paused: state.get("paused").and_then(|v| v.as_bool()).unwrap_or(true),
            visible: state.get("visible").and_then(|v| v.as_bool()).unwrap_or(false),
        }))
    }

    async fn probe(&self, strategy: &DiscoveryStrategy, video: &RemoteRef) -> Result<Vec<RemoteRef>> {
        match strategy {
            DiscoveryStrategy::ElementId { id } => {
                let expr = format!("document.getElementById({})", js_string(id));
                Ok(object_ref(&self.eval(&expr, false).await?).into_iter().collect())
            }
            DiscoveryStrategy::VideoProperty { prefixes } => {
                let names = by_value(self.call(video, JS_PROPERTY_NAMES, &[json!(prefixes)], true).await?);
                let refs = collect_property_refs(names, |name| async move {
                    self.call(video, JS_PROPERTY, &[name], false).await
                })
                .await;
                Ok(refs)
            }
            DiscoveryStrategy::LookupByElement { function, element_id } => {
                let remote = self
                    .call(video, JS_LOOKUP_BY_ELEMENT, &[json!(function), json!(element_id)], false)
                    .await?;
                Ok(object_ref(&remote).into_iter().collect())
            }
            DiscoveryStrategy::GlobalObject { path } => {
                Ok(object_ref(&self.eval(&global_path_expr(path), false).await?).into_iter().collect())
            }
        }
    }

    async fn is_callable(&self, handle: &RemoteRef) -> Result<bool> {
        match self.call(handle, JS_IS_CALLABLE, &[], true).await {
            Ok(remote) => Ok(by_value(remote).as_bool().unwrap_or(false)),
            Err(e) if e.is_stale() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn get_option(&self, handle: &RemoteRef, namespace: &str, key: &str) -> Result<Value> {
        let remote = self
            .call(handle, JS_GET_OPTION, &[json!(namespace), json!(key)], true)
            .await?;
        Ok(by_value(remote))
    }

    async fn set_option(&self, handle: &RemoteRef, namespace: &str, key: &str, value: &Value) -> Result<()> {
        self.call(handle, JS_SET_OPTION, &[json!(namespace), json!(key), value.clone()], true)
            .await?;
        Ok(())
    }

    async fn inject_style(&self, id: &str, css: &str) -> Result<()> {
        let expr = format!(
            "(() => {{ let s = document.getElementById({id}); if (!s) {{ s = document.createElement('style'); s.id = {id}; s.type = 'text/css'; (document.head || document.documentElement).appendChild(s); }} s.textContent = {css}; return true; }})()",
            id = js_string(id),
            css = js_string(css),
        );
        self.eval(&expr, true).await?;
        Ok(())
    }

    async fn remove_style(&self, id: &str) -> Result<bool> {
        let expr = format!(
            "(() => {{ const s = document.getElementById({}); if (!s) return false; s.remove(); return true; }})()",
            js_string(id)
        );
        Ok(by_value(self.eval(&expr, true).await?).as_bool().unwrap_or(false))
    }

    async fn discard_handle(&self, handle: &RemoteRef) -> Result<()> {
        self.release_ref(handle).await
    }

    async fn discard_video(&self, video: &RemoteRef) -> Result<()> {
        self.release_ref(video).await
    }

    async fn release(&self) -> Result<()> {
        self.cdp.release_object_group(OBJECT_GROUP).await.map_err(classify)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_result_maps_exception_to_host_error() {
        let resp = json!({
            "result": {"type": "object", "subtype": "error"},
            "exceptionDetails": {
                "text": "Uncaught",
                "exception": {"description": "TypeError: this.setOption is not a function"}
            }
        });
        match remote_result(resp) {
            Err(Error::Host(msg)) => assert!(msg.contains("setOption is not a function")),
            other => panic!("expected host error, got {:?}", other),
        }
    }

    #[test]
    fn test_remote_result_passes_value_through() {
        let resp = json!({"result": {"type": "object", "value": {"languageCode": "en"}}});
        let remote = remote_result(resp).unwrap();
        assert_eq!(by_value(remote), json!({"languageCode": "en"}));
    }

    #[test]
    fn test_object_ref_ignores_null() {
        assert!(object_ref(&json!({"type": "object", "subtype": "null", "value": null})).is_none());
        assert!(object_ref(&json!({"type": "undefined"})).is_none());
        let r = object_ref(&json!({"type": "object", "objectId": "7.1.3"})).unwrap();
        assert_eq!(r.as_str(), "7.1.3");
    }

    #[test]
    fn test_classify_stale_and_timeout() {
        let stale = classify(r#"CDP error: {"code":-32000,"message":"Could not find object with given id"}"#.to_string());
        assert!(stale.is_stale());
        assert!(matches!(
            classify("CDP command 'Runtime.evaluate' timed out after 30s".to_string()),
            Error::Timeout(_)
        ));
        assert!(matches!(classify("CDP connection closed".to_string()), Error::Cdp(_)));
    }

    #[tokio::test]
    async fn test_throwing_property_does_not_hide_the_rest() {
        let names = json!(["__ytA", "__ytB", "__ytC"]);
        let refs = collect_property_refs(names, |name| async move {
            match name.as_str() {
                Some("__ytA") => Err(Error::Host("getter threw".to_string())),
                Some("__ytB") => Ok(json!({"type": "number", "value": 3})),
                _ => Ok(json!({"type": "object", "objectId": "obj-c"})),
            }
        })
        .await;
        assert_eq!(refs, vec![RemoteRef("obj-c".to_string())]);
    }

    #[test]
    fn test_js_string_escapes() {
        assert_eq!(js_string(r#"a"b"#), r#""a\"b""#);
        assert!(global_path_expr("ytplayer").contains(r#""ytplayer".split('.')"#));
    }
}
