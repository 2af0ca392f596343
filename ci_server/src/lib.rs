//! pushci: builds and tests every commit pushed to a GitHub repository.
//!
//! A push webhook becomes a [`models::build::BuildAttempt`] that is cloned,
//! compiled and tested in a throwaway workspace, reported back to GitHub as
//! a commit status, and appended to a JSON history file.

pub mod config;
pub mod error;
pub mod fakes;
pub mod metrics;
pub mod models;
pub mod routes;
pub mod services;
