pub mod billing_runs;
pub mod gateway_callback;
pub mod internal_auth;
pub mod subscriptions_admin;
