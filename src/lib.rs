pub mod agent;
pub mod api;
pub mod callback;
pub mod config;
pub mod error;
pub mod jobs;
pub mod shutdown;
pub mod staging;
pub mod worker;
