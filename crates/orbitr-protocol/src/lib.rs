//! Orbitr Protocol - core event and finding types.
//!
//! Every event entering Orbitr is a [`StandardizedEvent`]; every expert
//! agent answers with zero or more [`AgentFinding`]s. Both travel as JSON
//! over the HTTP API, the realtime stream and the audit store.

pub mod constants;
pub mod error;
pub mod types;

pub use constants::*;
pub use error::*;
pub use types::*;
