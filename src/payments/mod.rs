pub mod gateway;
pub mod router;
pub mod types;
