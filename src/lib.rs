//! toolhost - tool-provider orchestration for a conversational agent.
//!
//! Three layers:
//! - [`bridge`]: wraps an external process as a tool provider over
//!   newline-delimited JSON-RPC 2.0 on stdio
//! - [`registry`]: unifies providers under one `provider__tool` namespace
//!   with structured failure isolation
//! - [`agent`]: the bounded tool-calling loop that lets a model use the
//!   catalog to answer a turn

pub mod agent;
pub mod bridge;
pub mod config;
pub mod error;
pub mod llm;
pub mod provider;
pub mod registry;
pub mod testing;

pub use error::Error;
