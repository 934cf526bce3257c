use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::host::DiscoveryStrategy;
use crate::paths::Paths;
use crate::types::{compile_patterns, UrlPattern};

/// Control-loop tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NudgeConfig {
    /// Playback rate at or above which captions get refreshed.
    #[serde(default = "default_speed_threshold")]
    pub speed_threshold: f64,
    /// Period of the cycle gate.
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// Gap between clearing and restoring the caption track. 0 restores on
    /// the next loop turn.
    #[serde(default)]
    pub restore_delay_ms: u64,
    /// Grace period after the page reports ready, before looking for video.
    #[serde(default = "default_startup_delay_ms")]
    pub startup_delay_ms: u64,
    /// Backoff between readiness / video element polls.
    #[serde(default = "default_video_retry_ms")]
    pub video_retry_ms: u64,
    #[serde(default = "default_video_selector")]
    pub video_selector: String,
    /// Selector of the transient "captions changed" toast to hide. `null`
    /// disables the style injection.
    #[serde(default = "default_suppress_selector")]
    pub suppress_selector: Option<String>,
    #[serde(default = "DiscoveryStrategy::default_chain")]
    pub discovery: Vec<DiscoveryStrategy>,
}

fn default_speed_threshold() -> f64 {
    2.7
}

fn default_interval_ms() -> u64 {
    1000
}

fn default_startup_delay_ms() -> u64 {
    3000
}

fn default_video_retry_ms() -> u64 {
    2000
}

fn default_video_selector() -> String {
    "video.html5-main-video".to_string()
}

fn default_suppress_selector() -> Option<String> {
    Some(".caption-window.ytp-caption-window-top".to_string())
}

impl Default for NudgeConfig {
    fn default() -> Self {
        Self {
            speed_threshold: default_speed_threshold(),
            interval_ms: default_interval_ms(),
            restore_delay_ms: 0,
            startup_delay_ms: default_startup_delay_ms(),
            video_retry_ms: default_video_retry_ms(),
            video_selector: default_video_selector(),
            suppress_selector: default_suppress_selector(),
            discovery: DiscoveryStrategy::default_chain(),
        }
    }
}

impl NudgeConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn restore_delay(&self) -> Duration {
        Duration::from_millis(self.restore_delay_ms)
    }

    pub fn startup_delay(&self) -> Duration {
        Duration::from_millis(self.startup_delay_ms)
    }

    pub fn video_retry(&self) -> Duration {
        Duration::from_millis(self.video_retry_ms)
    }

    /// The CSS injected to hide the caption toast, if a selector is set.
    pub fn suppress_css(&self) -> Option<String> {
        let selector = self.suppress_selector.as_deref()?.trim();
        if selector.is_empty() {
            return None;
        }
        Some(format!(
            "{} {{\n  display: none !important;\n  visibility: hidden !important;\n  opacity: 0 !important;\n  width: 0 !important;\n  height: 0 !important;\n  margin: 0 !important;\n  padding: 0 !important;\n  border: none !important;\n}}\n",
            selector
        ))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserConfig {
    #[serde(default = "default_debug_host")]
    pub debug_host: String,
    /// Remote debugging port of an already running browser.
    #[serde(default = "default_debug_port")]
    pub debug_port: u16,
    /// Pages the loop attaches to.
    #[serde(default = "default_match_urls")]
    pub match_urls: Vec<String>,
    /// Engine used by `run --launch` ("chrome" or "edge").
    #[serde(default = "default_engine")]
    pub engine: String,
    #[serde(default = "default_headed")]
    pub headed: bool,
    /// Profile name under `~/.subnudge/profiles` for launched browsers.
    #[serde(default = "default_profile")]
    pub profile: String,
}

fn default_debug_host() -> String {
    "127.0.0.1".to_string()
}

fn default_debug_port() -> u16 {
    9222
}

fn default_match_urls() -> Vec<String> {
    vec![
        "*://www.youtube.com/watch*".to_string(),
        "*://www.youtube.com/embed/*".to_string(),
    ]
}

fn default_engine() -> String {
    "chrome".to_string()
}

fn default_headed() -> bool {
    true
}

fn default_profile() -> String {
    "default".to_string()
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            debug_host: default_debug_host(),
            debug_port: default_debug_port(),
            match_urls: default_match_urls(),
            engine: default_engine(),
            headed: default_headed(),
            profile: default_profile(),
        }
    }
}

impl BrowserConfig {
    pub fn patterns(&self) -> Result<Vec<UrlPattern>> {
        compile_patterns(&self.match_urls)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct LoggingConfig {
    #[serde(default)]
    pub verbose: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub nudge: NudgeConfig,
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn load_or_default(paths: &Paths) -> Result<Self> {
        let config_path = paths.config_file();
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let n = &self.nudge;
        if !n.speed_threshold.is_finite() || n.speed_threshold < 0.0 {
            return Err(Error::Validation(format!(
                "nudge.speedThreshold must be a non-negative number, got {}",
                n.speed_threshold
            )));
        }
        if n.interval_ms == 0 {
            return Err(Error::Validation("nudge.intervalMs must be > 0".to_string()));
        }
        if n.video_retry_ms == 0 {
            return Err(Error::Validation("nudge.videoRetryMs must be > 0".to_string()));
        }
        if n.video_selector.trim().is_empty() {
            return Err(Error::Validation("nudge.videoSelector is empty".to_string()));
        }
        if n.discovery.is_empty() {
            return Err(Error::Validation(
                "nudge.discovery needs at least one strategy".to_string(),
            ));
        }
        self.browser.patterns()?;
        Ok(())
    }
}
