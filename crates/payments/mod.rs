pub mod callback_signature;
pub mod credential_cache;
pub mod error_classifier;
pub mod errors;
pub mod gateway;
pub mod gateway_client;
