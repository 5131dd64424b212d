use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, Ordering};

/// Cloneable abort flag
///
/// Checked by the orchestrator at every state boundary; a row in flight is
/// always completed first.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    /// New, unset flag
    pub fn new() -> Self {
        Self::default()
    }

    /// Request an abort
    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether an abort was requested
    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub(crate) fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}
