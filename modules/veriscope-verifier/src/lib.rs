pub mod cache;
pub mod engine;
pub mod fetcher;
pub mod orchestrator;
pub mod service;
pub mod store;
