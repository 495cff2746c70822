//! Cooperative cancellation for long-running analyses.
//!
//! Solvers poll the token at iteration boundaries; cancelling never
//! interrupts a factorization midway.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{VoltaError, VoltaResult};

/// Shared flag checked by solvers between iterations.
///
/// Clones observe the same flag, so a caller can keep one handle and pass
/// another into a study running on a worker thread.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// `Err(VoltaError::Cancelled)` once cancellation has been requested.
    pub fn check(&self) -> VoltaResult<()> {
        if self.is_cancelled() {
            Err(VoltaError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_state() {
        let token = CancellationToken::new();
        let worker = token.clone();
        assert!(worker.check().is_ok());
        token.cancel();
        assert!(matches!(worker.check(), Err(VoltaError::Cancelled)));
    }
}
