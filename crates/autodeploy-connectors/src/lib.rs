//! External-service adapters for the autodeploy pipeline.
//!
//! - [`DifyAnalyzer`]: requirement document to change plan
//! - [`McpMonitor`]: run progress as MCP sessions, stages and logs
//! - [`channels`]: chat webhook, SMTP email and enterprise-IM notifications

pub mod channels;
pub mod dify;
mod http;
pub mod mcp;
pub mod template;

pub use channels::{build_channel, build_notifier, ChatWebhook, EmailChannel, ImWebhook};
pub use dify::DifyAnalyzer;
pub use mcp::McpMonitor;
