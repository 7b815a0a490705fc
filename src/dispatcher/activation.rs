//! Single-active-view slot.
//!
//! Exactly one dispatcher reacts to input at a time. A view acquires the slot
//! on activation and holds the returned guard while it is the interactive
//! context; dropping the guard frees the slot. Slots are owned values, so
//! independent sessions (and tests) each get their own.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;

use super::{DispatchError, ViewScope};

/// Snapshot of the view that currently owns input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActiveView {
    pub scope: ViewScope,
    pub token: u64,
    /// When the view was activated (RFC 3339).
    pub since: String,
}

#[derive(Debug, Default)]
pub struct ActivationSlot {
    active: Mutex<Option<ActiveView>>,
    next_token: AtomicU64,
}

impl ActivationSlot {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Claim the slot. Fails if another view holds it.
    pub fn acquire(self: &Arc<Self>, scope: ViewScope) -> Result<ActivationGuard, DispatchError> {
        let mut active = self.active.lock().map_err(|_| DispatchError::LockPoisoned)?;
        if let Some(current) = active.as_ref() {
            return Err(DispatchError::SlotBusy {
                active: current.scope,
                requested: scope,
            });
        }
        let token = self.next_token.fetch_add(1, Ordering::Relaxed) + 1;
        *active = Some(ActiveView {
            scope,
            token,
            since: chrono::Utc::now().to_rfc3339(),
        });
        tracing::info!(scope = %scope, token, "View activated");
        Ok(ActivationGuard {
            slot: Arc::clone(self),
            token,
            scope,
        })
    }

    pub fn current(&self) -> Option<ActiveView> {
        self.active.lock().ok()?.clone()
    }

    pub fn is_busy(&self) -> bool {
        self.active.lock().map(|a| a.is_some()).unwrap_or(true)
    }

    fn holds(&self, token: u64) -> bool {
        self.active
            .lock()
            .map(|a| a.as_ref().is_some_and(|v| v.token == token))
            .unwrap_or(false)
    }

    fn release(&self, token: u64) {
        if let Ok(mut active) = self.active.lock() {
            if active.as_ref().is_some_and(|v| v.token == token) {
                *active = None;
            }
        }
    }
}

/// RAII activation token. Dropping it deactivates the view.
#[derive(Debug)]
pub struct ActivationGuard {
    slot: Arc<ActivationSlot>,
    token: u64,
    scope: ViewScope,
}

impl ActivationGuard {
    pub fn scope(&self) -> ViewScope {
        self.scope
    }

    /// Still the active view? False only if the slot was poisoned or reset.
    pub fn is_current(&self) -> bool {
        self.slot.holds(self.token)
    }
}

impl Drop for ActivationGuard {
    fn drop(&mut self) {
        self.slot.release(self.token);
        tracing::debug!(scope = %self.scope, token = self.token, "View deactivated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_is_refused() {
        let slot = ActivationSlot::new();
        let guard = slot.acquire(ViewScope::Triage).unwrap();
        let err = slot.acquire(ViewScope::Cases).unwrap_err();
        assert!(matches!(
            err,
            DispatchError::SlotBusy { active: ViewScope::Triage, requested: ViewScope::Cases }
        ));
        assert!(guard.is_current());
    }

    #[test]
    fn dropping_guard_frees_slot() {
        let slot = ActivationSlot::new();
        {
            let _guard = slot.acquire(ViewScope::Triage).unwrap();
            assert!(slot.is_busy());
        }
        assert!(!slot.is_busy());
        let cases = slot.acquire(ViewScope::Cases).unwrap();
        assert_eq!(slot.current().map(|v| v.scope), Some(ViewScope::Cases));
        assert_eq!(cases.scope(), ViewScope::Cases);
    }

    #[test]
    fn independent_slots_do_not_interfere() {
        let a = ActivationSlot::new();
        let b = ActivationSlot::new();
        let _ga = a.acquire(ViewScope::Triage).unwrap();
        assert!(b.acquire(ViewScope::Triage).is_ok());
    }
}
