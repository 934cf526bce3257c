use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use subnudge_browser::{BrowserEngine, BrowserSession, CdpPage};
use subnudge_core::types::any_match;
use subnudge_core::{Config, Paths, UrlPattern};
use subnudge_scheduler::NudgeController;
use tracing::{debug, info, warn};

const ATTACH_RETRY: Duration = Duration::from_secs(2);
const DEFAULT_LAUNCH_URL: &str = "https://www.youtube.com/";

/// Command-line overrides for `run`.
pub struct RunOptions {
    pub launch: bool,
    pub url: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub threshold: Option<f64>,
    pub interval_ms: Option<u64>,
    pub restore_delay_ms: Option<u64>,
}

impl RunOptions {
    fn apply(&self, config: &mut Config) {
        if let Some(host) = &self.host {
            config.browser.debug_host = host.clone();
        }
        if let Some(port) = self.port {
            config.browser.debug_port = port;
        }
        if let Some(t) = self.threshold {
            config.nudge.speed_threshold = t;
        }
        if let Some(ms) = self.interval_ms {
            config.nudge.interval_ms = ms;
        }
        if let Some(ms) = self.restore_delay_ms {
            config.nudge.restore_delay_ms = ms;
        }
    }
}

pub async fn run(opts: RunOptions) -> anyhow::Result<()> {
    let paths = Paths::new();
    let mut config = Config::load_or_default(&paths)?;
    opts.apply(&mut config);
    config.validate()?;
    let patterns = config.browser.patterns()?;

    let mut session = if opts.launch {
        let engine = BrowserEngine::from_str(&config.browser.engine);
        let profile_dir = paths.profile_dir(&config.browser.profile);
        let url = opts.url.as_deref().unwrap_or(DEFAULT_LAUNCH_URL);
        BrowserSession::launch(engine, config.browser.headed, &profile_dir, url)
            .await
            .map_err(anyhow::Error::msg)?
    } else {
        info!(
            host = %config.browser.debug_host,
            port = config.browser.debug_port,
            "Attaching to browser"
        );
        tokio::select! {
            session = BrowserSession::attach(
                &config.browser.debug_host,
                config.browser.debug_port,
                &patterns,
                ATTACH_RETRY,
            ) => session.map_err(anyhow::Error::msg)?,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted while waiting for a page");
                return Ok(());
            }
        }
    };

    let result = drive(&session, &config, &patterns).await;
    session.close().await;
    result
}

/// What a page-level navigation event means for the controller.
#[derive(Debug, PartialEq, Eq)]
enum PageChange {
    /// New document in the main frame; the old page is gone.
    Reload(String),
    /// Same document, new URL (history API navigation).
    SameDocument(String),
    Ignore,
}

fn classify_frame_navigated(params: &Value) -> PageChange {
    let frame = &params["frame"];
    if frame.get("parentId").is_some() {
        return PageChange::Ignore;
    }
    match frame["url"].as_str() {
        Some(url) => PageChange::Reload(url.to_string()),
        None => PageChange::Ignore,
    }
}

fn classify_same_document(params: &Value, main_frame_id: &str) -> PageChange {
    if params["frameId"].as_str() != Some(main_frame_id) {
        return PageChange::Ignore;
    }
    match params["url"].as_str() {
        Some(url) => PageChange::SameDocument(url.to_string()),
        None => PageChange::Ignore,
    }
}

async fn drive(
    session: &BrowserSession,
    config: &Config,
    patterns: &[UrlPattern],
) -> anyhow::Result<()> {
    let host = Arc::new(CdpPage::new(session.cdp.clone()));
    let mut navigated = session.cdp.subscribe_event("Page.frameNavigated").await;
    let mut within_document = session
        .cdp
        .subscribe_event("Page.navigatedWithinDocument")
        .await;

    let mut controller = NudgeController::new(host, config.nudge.clone());
    if any_match(patterns, &session.url) {
        controller.start();
    } else {
        info!(url = %session.url, "Page does not match, waiting for navigation");
    }

    loop {
        let change = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl-C, shutting down");
                break;
            }
            event = navigated.recv() => match event {
                Some(params) => classify_frame_navigated(&params),
                None => {
                    warn!("CDP connection closed");
                    break;
                }
            },
            event = within_document.recv() => match event {
                Some(params) => classify_same_document(&params, &session.target_id),
                None => {
                    warn!("CDP connection closed");
                    break;
                }
            },
        };

        match change {
            PageChange::Reload(url) => {
                controller.teardown().await;
                if any_match(patterns, &url) {
                    info!(url = %url, "Page loaded, starting");
                    controller.start();
                } else {
                    debug!(url = %url, "Navigated to a non-matching page");
                }
            }
            PageChange::SameDocument(url) => {
                let matches = any_match(patterns, &url);
                if matches && !controller.is_started() {
                    info!(url = %url, "Navigated to a matching page, starting");
                    controller.start();
                } else if !matches && controller.is_started() {
                    info!(url = %url, "Left matching page, stopping");
                    controller.teardown().await;
                }
            }
            PageChange::Ignore => {}
        }
    }

    controller.teardown().await;
    Ok(())
}
