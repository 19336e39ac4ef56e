pub mod activities;
pub mod assistant;
pub mod clock;
pub mod config;
pub mod database;
pub mod error;
pub mod events;
pub mod http_client;
pub mod llm_client;
pub mod models;
pub mod progress;
pub mod runtime;
pub mod server;
