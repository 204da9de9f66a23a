pub mod amount_allocator;
pub mod payment_orchestrator;
pub mod wallet_ledger;

pub use amount_allocator::AmountAllocator;
pub use payment_orchestrator::{InitiateOutcome, InitiateRequest, PaymentOrchestrator};
pub use wallet_ledger::WalletLedger;
