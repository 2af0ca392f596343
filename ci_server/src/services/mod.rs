//! Build services: process spawning, workspaces, execution, reporting, history.

pub mod build_service;
pub mod executor;
pub mod github_service;
pub mod history_store;
pub mod process;
pub mod workspace_service;
