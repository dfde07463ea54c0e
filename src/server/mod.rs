//! MCP server: tool catalogue plus the stdio loop

mod stdio;
mod tools;

pub use stdio::{call_result, handle_line, serve, serve_stdio};
pub use tools::{ToolServer, catalogue, has_tool};
