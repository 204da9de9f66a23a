pub mod reconciliation;

pub use reconciliation::{ReconciliationConfig, ReconciliationWorker, Reconciler};
