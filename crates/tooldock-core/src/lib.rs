//! # tooldock-core
//!
//! Core types and abstractions for Tooldock - a client for tool servers that
//! speak the Model Context Protocol.
//!
//! This crate provides:
//! - Configuration system
//! - Agent-facing tool definitions and execution types
//! - Common error types

pub mod config;
pub mod error;
pub mod tool;

pub use config::Config;
pub use error::{Error, Result};
pub use tool::{ToolCall, ToolDefinition, ToolResult};
