//! Operation spans with correlation IDs.
//!
//! Every gateway operation runs inside an `operation` span carrying a fresh
//! UUID v4 so all events emitted by the validator, cache, limiter, and
//! breaker for one call can be correlated.

use tracing::Span;
use uuid::Uuid;

/// Generate a new operation ID.
pub fn new_operation_id() -> Uuid {
    Uuid::new_v4()
}

/// Span for one gateway operation on `key`.
pub fn operation_span(op: &'static str, key: &str) -> Span {
    tracing::info_span!("operation", op, key = %key, operation_id = %new_operation_id())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_ids_are_unique_v4() {
        let a = new_operation_id();
        let b = new_operation_id();
        assert_ne!(a, b);
        assert_eq!(a.get_version_num(), 4);
    }
}
