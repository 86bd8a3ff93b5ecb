//! Cancellation token for capture loops.
//!
//! Replaces an interactive keypress quit: the capture loop polls the token
//! each iteration, and any holder of a clone (HTTP stop request, shutdown
//! handler) can fire it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Clone-safe cancellation flag shared between a capture loop and its
/// controllers.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Re-arm the token for a new capture session.
    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_unset() {
        assert!(!CancelToken::new().is_cancelled());
    }

    #[test]
    fn test_cancel_visible_through_clones() {
        let token = CancelToken::new();
        let other = token.clone();
        other.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_reset_rearms() {
        let token = CancelToken::new();
        token.cancel();
        token.reset();
        assert!(!token.is_cancelled());
    }
}
