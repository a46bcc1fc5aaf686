// ============================================================================
// Order Domain - Aggregate, Cursor, and Error Taxonomy
// ============================================================================

pub mod cursor;
pub mod errors;
pub mod order;

pub use cursor::{Cursor, CursorDecodeError};
pub use errors::LifecycleError;
pub use order::{Order, OrderStatus, OutboxRecord};
