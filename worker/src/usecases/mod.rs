pub mod billing_run;
pub mod checkout;
pub mod gateway_callback;
pub mod reactivation;
pub mod token_recovery;
