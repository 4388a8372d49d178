//! Terminal shell for Blaxel sandboxes.
//!
//! [`mcp`] speaks JSON-RPC to the sandbox over WebSocket or streamable HTTP,
//! [`sandbox`] wraps the process and filesystem tools, [`control_plane`]
//! resolves where a sandbox lives, and [`shell`] is the interactive state
//! machine driven by the binary's terminal loop.

pub mod control_plane;
pub mod mcp;
pub mod sandbox;
pub mod shell;
