//! Browser session management.
//!
//! A session is one CDP connection to the page target the control loop runs
//! against, either inside a browser the user already started with
//! `--remote-debugging-port` or inside one we launched ourselves.

use super::cdp::CdpClient;
use serde::Deserialize;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use subnudge_core::types::any_match;
use subnudge_core::UrlPattern;
use tokio::process::{Child, Command};
use tracing::{debug, info};

/// Supported browser engines. Both speak CDP.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BrowserEngine {
    Chrome,
    Edge,
}

impl BrowserEngine {
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "edge" | "msedge" => Self::Edge,
            _ => Self::Chrome,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Chrome => "chrome",
            Self::Edge => "edge",
        }
    }
}

/// One entry of the DevTools `/json/list` endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageTarget {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub web_socket_debugger_url: Option<String>,
}

/// A CDP connection to one page, plus the browser process if we own it.
pub struct BrowserSession {
    pub debug_port: u16,
    pub target_id: String,
    /// URL of the page when the session was attached.
    pub url: String,
    pub cdp: Arc<CdpClient>,
    /// Present only for browsers started by [`BrowserSession::launch`].
    browser_process: Option<Child>,
}

impl BrowserSession {
    /// Attach to a running browser, waiting until a page whose URL matches
    /// `patterns` is open. Retries forever with `retry` backoff; cancel by
    /// dropping the future.
    pub async fn attach(
        host: &str,
        port: u16,
        patterns: &[UrlPattern],
        retry: Duration,
    ) -> Result<Self, String> {
        let mut announced = false;
        let target = loop {
            match list_targets(host, port).await {
                Ok(targets) => {
                    if let Some(t) = pick_page_target(&targets, patterns) {
                        break t;
                    }
                    if !announced {
                        info!(
                            port,
                            pages = targets.len(),
                            "No matching page open yet, waiting"
                        );
                        announced = true;
                    }
                }
                Err(e) => {
                    if !announced {
                        info!(port, error = %e, "DevTools endpoint not reachable yet, waiting");
                        announced = true;
                    } else {
                        debug!(port, error = %e, "DevTools endpoint still unreachable");
                    }
                }
            }
            tokio::time::sleep(retry).await;
        };

        Self::connect_target(port, target, None).await
    }

    /// Launch a browser with remote debugging enabled and open `url` in it.
    pub async fn launch(
        engine: BrowserEngine,
        headed: bool,
        user_data_dir: &Path,
        url: &str,
    ) -> Result<Self, String> {
        let browser_path = find_browser_binary(engine)
            .ok_or_else(|| format!("{} not found. Please install it.", engine.name()))?;

        std::fs::create_dir_all(user_data_dir)
            .map_err(|e| format!("Failed to create user data dir: {}", e))?;

        let debug_port = find_free_port().await?;
        let args = build_browser_args(debug_port, user_data_dir, headed);

        info!(
            port = debug_port,
            headed = headed,
            browser = engine.name(),
            "Launching browser"
        );

        let child = Command::new(&browser_path)
            .args(&args)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| format!("Failed to launch {}: {}", engine.name(), e))?;

        wait_for_cdp_ready("127.0.0.1", debug_port, 15).await?;

        let target = first_page_target("127.0.0.1", debug_port).await?;
        let mut session = Self::connect_target(debug_port, target, Some(child)).await?;

        session.cdp.navigate(url).await?;
        session.url = url.to_string();
        info!(url = %url, "Opened page");
        Ok(session)
    }

    async fn connect_target(
        port: u16,
        target: PageTarget,
        browser_process: Option<Child>,
    ) -> Result<Self, String> {
        let ws_url = target
            .web_socket_debugger_url
            .clone()
            .ok_or_else(|| format!("Target {} has no WebSocket URL (already attached?)", target.id))?;

        let cdp = CdpClient::connect(&ws_url).await?;
        cdp.enable_domain("Page").await?;
        cdp.enable_domain("Runtime").await?;

        info!(
            target = %target.id,
            url = %target.url,
            title = %target.title,
            "CDP connection established (page target)"
        );

        Ok(Self {
            debug_port: port,
            target_id: target.id,
            url: target.url,
            cdp: Arc::new(cdp),
            browser_process,
        })
    }

    pub fn owns_browser(&self) -> bool {
        self.browser_process.is_some()
    }

    /// Close the session. A browser we launched is shut down; an attached
    /// browser is left running.
    pub async fn close(&mut self) {
        if let Some(child) = self.browser_process.as_mut() {
            if let Err(e) = self.cdp.close_browser().await {
                debug!("CDP Browser.close failed (may already be closed): {}", e);
            }
            let _ = child.kill().await;
        }
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        if let Some(child) = self.browser_process.as_mut() {
            let _ = child.start_kill();
        }
    }
}

/// The first `page` target whose URL matches, in endpoint order.
pub fn pick_page_target(targets: &[PageTarget], patterns: &[UrlPattern]) -> Option<PageTarget> {
    targets
        .iter()
        .find(|t| t.kind == "page" && t.web_socket_debugger_url.is_some() && any_match(patterns, &t.url))
        .cloned()
}

/// Build Chromium command line arguments.
fn build_browser_args(debug_port: u16, user_data_dir: &Path, headed: bool) -> Vec<String> {
    let mut args = vec![
        format!("--remote-debugging-port={}", debug_port),
        format!("--user-data-dir={}", user_data_dir.display()),
        "--no-first-run".to_string(),
        "--no-default-browser-check".to_string(),
        "--disable-background-networking".to_string(),
        "--disable-sync".to_string(),
        "--disable-translate".to_string(),
        "--password-store=basic".to_string(),
    ];
    if !headed {
        args.push("--headless=new".to_string());
    }
    args.push("--window-size=1280,720".to_string());
    args.push("about:blank".to_string());
    args
}

/// Find a browser binary on the system for the given engine.
pub fn find_browser_binary(engine: BrowserEngine) -> Option<String> {
    let candidates = match engine {
        BrowserEngine::Chrome => {
            if cfg!(target_os = "macos") {
                vec![
                    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
                    "/Applications/Chromium.app/Contents/MacOS/Chromium",
                    "/Applications/Brave Browser.app/Contents/MacOS/Brave Browser",
                ]
            } else if cfg!(target_os = "linux") {
                vec![
                    "google-chrome", "google-chrome-stable",
                    "chromium", "chromium-browser",
                    "/usr/bin/google-chrome", "/usr/bin/chromium",
                ]
            } else {
                vec![
                    r"C:\Program Files\Google\Chrome\Application\chrome.exe",
                    r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
                ]
            }
        }
        BrowserEngine::Edge => {
            if cfg!(target_os = "macos") {
                vec!["/Applications/Microsoft Edge.app/Contents/MacOS/Microsoft Edge"]
            } else if cfg!(target_os = "linux") {
                vec!["microsoft-edge", "microsoft-edge-stable", "/usr/bin/microsoft-edge"]
            } else {
                vec![
                    r"C:\Program Files (x86)\Microsoft\Edge\Application\msedge.exe",
                    r"C:\Program Files\Microsoft\Edge\Application\msedge.exe",
                ]
            }
        }
    };

    for candidate in candidates {
        if Path::new(candidate).exists() {
            return Some(candidate.to_string());
        }
        if !candidate.contains('/') && !candidate.contains('\\') && which::which(candidate).is_ok() {
            return Some(candidate.to_string());
        }
    }
    None
}

/// List all available browser engines on the system.
pub fn list_available_browsers() -> Vec<(BrowserEngine, String)> {
    let mut result = Vec::new();
    for engine in [BrowserEngine::Chrome, BrowserEngine::Edge] {
        if let Some(path) = find_browser_binary(engine) {
            result.push((engine, path));
        }
    }
    result
}

/// Find a free TCP port.
async fn find_free_port() -> Result<u16, String> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .map_err(|e| format!("Failed to bind to find free port: {}", e))?;
    let port = listener
        .local_addr()
        .map_err(|e| format!("Failed to get local addr: {}", e))?
        .port();
    drop(listener);
    Ok(port)
}

/// Fetch `/json/list` from a DevTools endpoint.
pub async fn list_targets(host: &str, port: u16) -> Result<Vec<PageTarget>, String> {
    let url = format!("http://{}:{}/json/list", host, port);
    let resp = reqwest::get(&url)
        .await
        .map_err(|e| format!("GET {} failed: {}", url, e))?;
    resp.json::<Vec<PageTarget>>()
        .await
        .map_err(|e| format!("Bad /json/list response: {}", e))
}

/// Wait for Chrome's CDP endpoint to become available.
/// Polls /json/version until it responds, up to `timeout_secs`.
pub async fn wait_for_cdp_ready(host: &str, port: u16, timeout_secs: u64) -> Result<String, String> {
    let start = std::time::Instant::now();
    let timeout = Duration::from_secs(timeout_secs);
    let url = format!("http://{}:{}/json/version", host, port);

    loop {
        if start.elapsed() > timeout {
            return Err(format!(
                "Chrome CDP not ready after {}s on port {}",
                timeout_secs, port
            ));
        }

        if let Ok(resp) = reqwest::get(&url).await {
            if let Ok(body) = resp.json::<serde_json::Value>().await {
                if let Some(ws_url) = body.get("webSocketDebuggerUrl").and_then(|v| v.as_str()) {
                    return Ok(ws_url.to_string());
                }
            }
        }

        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

/// Retries a few times since the page target may not appear immediately.
async fn first_page_target(host: &str, port: u16) -> Result<PageTarget, String> {
    for attempt in 0..10 {
        if attempt > 0 {
            tokio::time::sleep(Duration::from_millis(300)).await;
        }
        let targets = match list_targets(host, port).await {
            Ok(t) => t,
            Err(_) => continue,
        };
        if let Some(t) = pick_page_target(&targets, &[]) {
            return Ok(t);
        }
    }
    Err("No page target found after retries".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn targets() -> Vec<PageTarget> {
        serde_json::from_value(json!([
            {
                "id": "A", "type": "service_worker", "title": "sw",
                "url": "https://www.youtube.com/watch?v=1",
                "webSocketDebuggerUrl": "ws://127.0.0.1:9222/devtools/page/A"
            },
            {
                "id": "B", "type": "page", "title": "Home",
                "url": "https://www.youtube.com/",
                "webSocketDebuggerUrl": "ws://127.0.0.1:9222/devtools/page/B"
            },
            {
                "id": "C", "type": "page", "title": "attached elsewhere",
                "url": "https://www.youtube.com/watch?v=2"
            },
            {
                "id": "D", "type": "page", "title": "Video",
                "url": "https://www.youtube.com/watch?v=3",
                "webSocketDebuggerUrl": "ws://127.0.0.1:9222/devtools/page/D"
            }
        ]))
        .unwrap()
    }

    #[test]
    fn test_pick_page_target_skips_non_pages_and_unattachable() {
        let patterns = vec![UrlPattern::new("*://www.youtube.com/watch*").unwrap()];
        let picked = pick_page_target(&targets(), &patterns).unwrap();
        assert_eq!(picked.id, "D");
    }

    #[test]
    fn test_pick_page_target_without_patterns_takes_first_page() {
        let picked = pick_page_target(&targets(), &[]).unwrap();
        assert_eq!(picked.id, "B");
    }

    #[test]
    fn test_browser_args_headless_flag() {
        let args = build_browser_args(9333, Path::new("/tmp/p"), false);
        assert!(args.contains(&"--remote-debugging-port=9333".to_string()));
        assert!(args.contains(&"--headless=new".to_string()));

        let headed = build_browser_args(9333, Path::new("/tmp/p"), true);
        assert!(!headed.iter().any(|a| a.starts_with("--headless")));
        assert_eq!(headed.last().map(String::as_str), Some("about:blank"));
    }

    #[test]
    fn test_engine_from_str() {
        assert_eq!(BrowserEngine::from_str("MSEdge"), BrowserEngine::Edge);
        assert_eq!(BrowserEngine::from_str("chromium"), BrowserEngine::Chrome);
    }
}
