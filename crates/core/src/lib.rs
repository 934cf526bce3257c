pub mod config;
pub mod error;
pub mod host;
pub mod paths;
pub mod types;

pub use config::{BrowserConfig, Config, LoggingConfig, NudgeConfig};
pub use error::{Error, Result};
pub use host::{DiscoveryStrategy, PageHost};
pub use paths::Paths;
pub use types::{CaptionTrackSelection, PlaybackContext, UrlPattern};
