//! Caller identity and authorization predicates.
//!
//! Every mutating call receives a [`CallContext`]: who is calling and the
//! clock height the call executes at.  Authorization is checked with
//! [`require_caller`] before any state is touched.

use tracing::warn;

use crate::clock::Clock;
use crate::error::{LedgerError, Result};
use crate::types::{BlockHeight, Principal};

/// The environment of a single call.  `now` is read from the clock once, so
/// every timestamp written by one mutation is identical.
#[derive(Debug, Clone, Copy)]
pub struct CallContext<'a> {
    pub caller: &'a Principal,
    pub now: BlockHeight,
}

impl<'a> CallContext<'a> {
    pub fn new(caller: &'a Principal, clock: &dyn Clock) -> Self {
        Self {
            caller,
            now: clock.now(),
        }
    }

    pub fn at(caller: &'a Principal, now: BlockHeight) -> Self {
        Self { caller, now }
    }
}

/// Fails with `Unauthorized` unless the caller is exactly `required`.
pub fn require_caller(ctx: &CallContext<'_>, required: &Principal, action: &'static str) -> Result<()> {
    if ctx.caller != required {
        warn!(caller = %ctx.caller, action, "authorization rejected");
        return Err(LedgerError::Unauthorized {
            caller: ctx.caller.clone(),
            action,
        });
    }
    Ok(())
}
