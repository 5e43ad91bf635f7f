//! Orbitr server: HTTP API, realtime stream, background workers, the
//! workflow simulator and the operator console.

pub mod chat;
pub mod client;
pub mod config;
pub mod dispatcher;
pub mod feed;
pub mod http_server;
pub mod monitor;
pub mod operator_console;
pub mod rate_limit;
pub mod realtime;
pub mod reports;
pub mod simulation;
pub mod state;

pub use client::{ApiClient, ClientError};
pub use config::OrbitrConfig;
pub use http_server::HttpServer;
pub use state::AppState;
