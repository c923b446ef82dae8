pub mod config;
pub mod data;
pub mod engine;
pub mod error;
pub mod feed;
pub mod processing;
pub mod render;
pub mod server;
pub mod session;
pub mod style;
pub mod types;
