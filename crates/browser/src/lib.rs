//! CDP-based host adapter.
//!
//! - `cdp`: Chrome DevTools Protocol client over WebSocket
//! - `session`: attach to (or launch) a browser and pick the page target
//! - `page`: `PageHost` implementation over remote JS objects

pub mod cdp;
pub mod page;
pub mod session;

pub use cdp::CdpClient;
pub use page::{CdpPage, RemoteRef};
pub use session::{BrowserEngine, BrowserSession, PageTarget};
