pub mod challenge;
pub mod credits;
pub mod dates;
pub mod pricing;
pub mod reference;
pub mod signal_model;
pub mod subscription;
