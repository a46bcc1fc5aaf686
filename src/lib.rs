// ============================================================================
// orders-service - Tenant-scoped order lifecycle orchestration
// ============================================================================
//
// Draft -> confirmed -> closed, with request idempotency, optimistic
// concurrency control, and an at-least-once guarantee for the terminal
// event via the transactional outbox.
//
// ============================================================================

pub mod cache;
pub mod config;
pub mod context;
pub mod domain;
pub mod events;
pub mod http;
pub mod lifecycle;
pub mod metrics;
pub mod outbox;
pub mod store;
pub mod utils;

#[cfg(test)]
pub(crate) mod test_helpers;
