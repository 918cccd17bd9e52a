pub mod agent;
pub mod classifier;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod shutdown;
