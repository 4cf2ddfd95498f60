pub mod camera;
mod cv_utils;
mod routes;
mod server;

pub mod app;
pub mod config;
pub mod detection_client;
pub mod pipeline;
pub mod services;
pub mod signal;
pub mod speech;
pub mod telemetry;
pub mod voice;

pub use app::start_app;
