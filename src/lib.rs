// Library root for Groundwork

pub mod api;
pub mod auth;
pub mod config;
pub mod core;
pub mod metrics;
pub mod remote_config;
pub mod state;
pub mod tasks;
