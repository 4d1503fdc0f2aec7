//! Logical time source.
//!
//! The ledger never reads wall-clock time.  The host supplies a [`Clock`]
//! whose successive readings never decrease (typically a block height).

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{LedgerError, Result};
use crate::types::BlockHeight;

pub trait Clock {
    fn now(&self) -> BlockHeight;
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> BlockHeight {
        (**self).now()
    }
}

/// A clock frozen at a single height, e.g. the height of the block a
/// transaction executes in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedClock(pub BlockHeight);

impl Clock for FixedClock {
    fn now(&self) -> BlockHeight {
        self.0
    }
}

/// A clock moved explicitly by the host.  Used by tests and simulations.
#[derive(Debug, Default)]
pub struct ManualClock {
    height: AtomicU64,
}

impl ManualClock {
    pub fn new(start: BlockHeight) -> Self {
        Self {
            height: AtomicU64::new(start),
        }
    }

    /// Move forward by `blocks`, saturating at `u64::MAX`.  Returns the new height.
    pub fn advance(&self, blocks: u64) -> BlockHeight {
        let prev = self
            .height
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |h| {
                Some(h.saturating_add(blocks))
            })
            .unwrap_or_else(|h| h);
        prev.saturating_add(blocks)
    }

    /// Jump to `height`.  Moving backwards is rejected.
    pub fn set(&self, height: BlockHeight) -> Result<()> {
        self.height
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |h| {
                (height >= h).then_some(height)
            })
            .map(|_| ())
            .map_err(|current| {
                LedgerError::Validation(format!(
                    "clock may not move backwards (current {current}, requested {height})"
                ))
            })
    }
}

impl Clock for ManualClock {
    fn now(&self) -> BlockHeight {
        self.height.load(Ordering::SeqCst)
    }
}
