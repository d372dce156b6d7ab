//! Agent backends implementing the `AgentCaller` port.

pub mod claude_code;
pub mod codex;
pub mod mock;
mod process;
pub mod registry;

pub use claude_code::{ClaudeCodeAgent, ClaudeCodeConfig};
pub use codex::{CodexAgent, CodexConfig};
pub use mock::{MockAgent, MockReply, RecordedCall};
pub use registry::AgentRegistry;
