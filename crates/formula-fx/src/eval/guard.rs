use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{FxError, FxResult};

const FREE: u64 = 0;

static NEXT_OWNER: AtomicU64 = AtomicU64::new(1);

/// Marks a region of interpreter state that only one logical evaluation may use at a time.
///
/// Entering an occupied region fails immediately with [`FxError::ConcurrentEvaluation`]; it never
/// waits. Overlapping evaluations on one engine are a host bug, not something to serialize.
#[derive(Clone, Debug, Default)]
pub struct SingleThreadedGuard {
    owner: Arc<AtomicU64>,
}

impl SingleThreadedGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enter(&self) -> FxResult<RegionGuard> {
        let id = NEXT_OWNER.fetch_add(1, Ordering::Relaxed);
        match self
            .owner
            .compare_exchange(FREE, id, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => Ok(RegionGuard {
                owner: Arc::clone(&self.owner),
                id,
            }),
            Err(current) => Err(FxError::ConcurrentEvaluation { owner: current }),
        }
    }

    pub fn is_entered(&self) -> bool {
        self.owner.load(Ordering::Acquire) != FREE
    }
}

/// Releases the region on drop.
#[derive(Debug)]
pub struct RegionGuard {
    owner: Arc<AtomicU64>,
    id: u64,
}

impl RegionGuard {
    pub fn owner_id(&self) -> u64 {
        self.id
    }
}

impl Drop for RegionGuard {
    fn drop(&mut self) {
        // Only the current owner may release.
        let _ = self
            .owner
            .compare_exchange(self.id, FREE, Ordering::AcqRel, Ordering::Acquire);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_entry_fails_fast_until_first_guard_drops() {
        let guard = SingleThreadedGuard::new();
        let first = guard.enter().unwrap();
        assert!(guard.is_entered());

        let err = guard.enter().unwrap_err();
        assert_eq!(
            err,
            FxError::ConcurrentEvaluation {
                owner: first.owner_id()
            }
        );

        drop(first);
        assert!(!guard.is_entered());
        assert!(guard.enter().is_ok());
    }
}
