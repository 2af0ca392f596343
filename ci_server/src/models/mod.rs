//! Data models: inbound push events and build attempts.

pub mod build;
pub mod push;
