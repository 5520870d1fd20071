//! Control daemon for a managed database service: a session-gated HTTP and
//! WebSocket gateway in front of a serialized start/stop/update state machine.

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod registry;
pub mod scheduler;
pub mod service;
pub mod utils;
