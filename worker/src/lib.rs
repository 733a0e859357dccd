pub mod axum_http;
pub mod billing_scheduler;
pub mod config;
pub mod usecases;
