//! Lines provider adapters.

mod http;
mod scripted;

pub use http::HttpLineFeed;
pub use scripted::ScriptedLineFeed;
