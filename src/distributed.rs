//! Distributed training context.
//!
//! The trainer calls [`DistributedContext::no_sync`] around the first of its
//! two critic backward passes so that data-parallel wrappers skip one
//! gradient all-reduce per learn call. The single-process default makes every
//! hook a no-op.

use std::any::Any;

/// RAII guard suppressing cross-replica gradient synchronization while alive.
pub struct NoSyncGuard {
    _scope: Box<dyn Any>,
}

impl NoSyncGuard {
    /// Wrap a backend-specific scope object; synchronization resumes when the
    /// guard (and the scope it owns) is dropped.
    pub fn new(scope: Box<dyn Any>) -> Self {
        Self { _scope: scope }
    }

    /// A guard that suppresses nothing.
    pub fn noop() -> Self {
        Self { _scope: Box::new(()) }
    }
}

/// Hooks a data-parallel launcher provides to the trainer.
pub trait DistributedContext: Send + Sync {
    /// Begin a scope in which gradient synchronization is skipped.
    fn no_sync(&self) -> NoSyncGuard {
        NoSyncGuard::noop()
    }

    /// This replica's rank.
    fn rank(&self) -> usize {
        0
    }

    /// Total number of replicas.
    fn world_size(&self) -> usize {
        1
    }

    /// Whether this replica should perform side effects (checkpoint writes,
    /// logging).
    fn is_main(&self) -> bool {
        self.rank() == 0
    }
}

/// Trivial context for single-process training.
#[derive(Debug, Default, Clone, Copy)]
pub struct SingleProcess;

impl DistributedContext for SingleProcess {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_process_defaults() {
        let ctx = SingleProcess;
        assert_eq!(ctx.rank(), 0);
        assert_eq!(ctx.world_size(), 1);
        assert!(ctx.is_main());
        let _guard = ctx.no_sync();
    }
}
