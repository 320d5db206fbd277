//! Transfer execution core
//!
//! Saga-driven money movement: ordered forward steps with inverse
//! compensations, per-step retry, and a durable state snapshot on the
//! transaction row after every transition.

pub mod coordinator;
pub mod phase;
pub mod saga;
pub mod service;
pub mod steps;

pub use coordinator::SagaCoordinator;
pub use phase::TransferPhase;
pub use saga::{SagaContext, SagaState, SagaStep};
pub use service::{TransferReceipt, TransferRequest, TransferService};
