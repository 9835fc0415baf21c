pub mod app;
pub mod channels;
pub mod config;
pub mod git;
pub mod github;
pub mod notify;
pub mod provider;
pub mod server;
pub mod shared;
pub mod store;
pub mod task;
