pub mod deal;
pub mod payment;
