//! Agent adapter implementations.

mod claude_adapter;
pub mod mock_agent;

pub use claude_adapter::ClaudeAdapter;
pub use mock_agent::MockAgent;
