//! MCP Protocol Layer
//!
//! Implements the Model Context Protocol server using rmcp 0.9 and exposes
//! session control and polling as MCP tools.

pub mod server;

pub use server::TermpollServer;
