//! Shared types for the pxGrid client crates: configuration, the error
//! taxonomy, service nodes and structured trace events.

pub mod config;
pub mod error;
pub mod node;
pub mod trace;

pub use error::{Error, ErrorKind, Result};
pub use node::ServiceNode;
