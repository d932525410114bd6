//! HTTP API handlers.

pub mod mcp;
