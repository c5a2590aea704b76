//! Cooperative cancellation token threaded through scan, checkout, and
//! remote-transfer loops. Cheap to clone and check; cancelling never
//! interrupts an in-flight syscall, it just stops the next loop iteration
//! from starting.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{Result, WalgitError};

#[derive(Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Convenience for loop bodies: `token.check()?;` at the top of each
    /// iteration turns a cancellation into a `WalgitError::Cancelled`.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(WalgitError::Cancelled)
        } else {
            Ok(())
        }
    }
}
