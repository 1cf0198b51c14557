pub mod api;
pub mod app;
pub mod config;
pub mod grpc;
pub mod ingest;
pub mod logging;
pub mod middleware;
pub mod persistence;
pub mod state;
pub mod subnet;
