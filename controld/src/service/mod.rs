//! Handlers behind the session gate.

pub mod client;
pub mod config;
pub mod control;
