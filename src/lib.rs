pub mod chat;
pub mod citations;
pub mod config;
pub mod db;
pub mod ingest;
pub mod models;
pub mod ollama;
pub mod qdrant_store;
pub mod render;
pub mod retrieval;
pub mod server;

pub use config::AppConfig;
pub use server::run_server;
