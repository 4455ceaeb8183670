//! One-shot invalidation tokens.
//!
//! A `SwitchPoint` starts valid and can be invalidated exactly once. Inline caches
//! attach switch points to a linked fast path; when any of them flips, the cache
//! relinks on its next use.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

static NEXT_SWITCH_POINT_ID: AtomicU64 = AtomicU64::new(1);

/// One-shot valid -> invalidated token, cheap to clone and share across threads.
#[derive(Clone)]
pub struct SwitchPoint(Arc<SwitchPointInner>);

struct SwitchPointInner {
    id: u64,
    invalidated: AtomicBool,
}

impl SwitchPoint {
    /// Create a new valid switch point
    pub fn new() -> Self {
        Self(Arc::new(SwitchPointInner {
            id: NEXT_SWITCH_POINT_ID.fetch_add(1, Ordering::Relaxed),
            invalidated: AtomicBool::new(false),
        }))
    }

    /// Unique id, for diagnostics
    pub fn id(&self) -> u64 {
        self.0.id
    }

    /// Check if still valid
    #[inline]
    pub fn is_valid(&self) -> bool {
        !self.0.invalidated.load(Ordering::Acquire)
    }

    /// Check if already invalidated
    #[inline]
    pub fn has_been_invalidated(&self) -> bool {
        !self.is_valid()
    }

    /// Invalidate. Returns `true` if this call performed the transition.
    pub fn invalidate(&self) -> bool {
        !self.0.invalidated.swap(true, Ordering::AcqRel)
    }

    /// Invalidate a batch; returns how many were still valid.
    pub fn invalidate_all<'a>(points: impl IntoIterator<Item = &'a SwitchPoint>) -> usize {
        points
            .into_iter()
            .filter(|point| point.invalidate())
            .count()
    }

    /// Identity comparison
    pub fn ptr_eq(&self, other: &SwitchPoint) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Default for SwitchPoint {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for SwitchPoint {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for SwitchPoint {}

impl fmt::Debug for SwitchPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SwitchPoint")
            .field("id", &self.0.id)
            .field("valid", &self.is_valid())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_switch_point_is_one_shot() {
        let sp = SwitchPoint::new();
        assert!(sp.is_valid());
        assert!(sp.invalidate());
        assert!(!sp.is_valid());
        assert!(!sp.invalidate());
        assert!(sp.has_been_invalidated());
    }

    #[test]
    fn test_clones_share_state() {
        let sp = SwitchPoint::new();
        let copy = sp.clone();
        copy.invalidate();
        assert!(sp.has_been_invalidated());
        assert_eq!(sp, copy);
        assert_ne!(sp, SwitchPoint::new());
    }

    #[test]
    fn test_invalidate_all_counts_flips() {
        let a = SwitchPoint::new();
        let b = SwitchPoint::new();
        a.invalidate();
        assert_eq!(SwitchPoint::invalidate_all([&a, &b]), 1);
        assert!(b.has_been_invalidated());
    }
}
