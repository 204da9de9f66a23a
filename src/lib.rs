//! Payment intent and unique-amount reconciliation engine.
//!
//! Turns a wallet top-up or course/olympiad purchase request into a
//! provider-specific payment instruction and tracks the intent through its
//! lifecycle. For manual bank transfers and bot-mediated payments the
//! requested amount is perturbed so that each pending request is uniquely
//! identifiable by the exact sum that lands in the account.

pub mod api;
pub mod config;
pub mod database;
pub mod error;
pub mod health;
pub mod logging;
pub mod middleware;
pub mod payments;
pub mod services;
pub mod workers;
