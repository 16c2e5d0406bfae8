//! Flightboard - data access for aeronautical reference data and flight events
//!
//! - [orm]: alias grammar, filter compiler, ordering, change-tracking upserts
//!   and the generic [orm::Repository]
//! - [db]: entity declarations, connection handling and schema bootstrap
//! - [services]: typed payloads and queries, paging and cascading upserts

pub mod cli;
pub mod config;
pub mod db;
pub mod orm;
pub mod services;
