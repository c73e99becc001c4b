//! Browser driver: launches and controls Chrome/Chromium instances via
//! chromiumoxide, one per navigation session, each bound to its own
//! synthesized identity and optional proxy.

mod context;
mod errors;

pub use context::{BrowserContext, ChromiumContext, LaunchOptions};
pub use errors::BrowserError;
