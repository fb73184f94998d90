pub mod payment_request;
pub mod signal;
pub mod user;
