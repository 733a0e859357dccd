pub mod billing;
pub mod enums;
pub mod gateway;
pub mod notifications;
pub mod plans;
