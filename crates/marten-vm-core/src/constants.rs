//! Constant-value inline caching for global bindings.
//!
//! Many global bindings are assigned once and then only read. For those, a scope
//! read can be linked as a getter returning the captured value, guarded only by a
//! per-name switch point. Every assignment invalidates the switch point; a name is
//! given a fresh one at most `MAX_RETRIES` times before it is left to the ordinary
//! property getters for good.
//!
//! One cache is shared by all contexts of a runtime. When a second context comes
//! alive the cache is switched off permanently, since a constant captured from one
//! global would be wrong for the other.

use crate::error::PropertyError;
use crate::find::FindProperty;
use crate::key::PropertyKey;
use crate::linker::{CallSiteDescriptor, Guard, GuardedGetter, GuardedInvocation, GuardedSetter};
use crate::object::ObjectRef;
use crate::property::Getter;
use crate::property::accessor::SetAction;
use crate::switchpoint::SwitchPoint;
use crate::types::ValueType;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Invalidations after which a binding stops being linked as a constant
pub const MAX_RETRIES: u32 = 2;

/// Constant-linking record for one binding name
#[derive(Debug)]
struct Access {
    switch_point: SwitchPoint,
    invalidations: u32,
    guard_failed: bool,
}

impl Access {
    fn new() -> Self {
        Self {
            switch_point: SwitchPoint::new(),
            invalidations: 0,
            guard_failed: false,
        }
    }

    fn has_been_invalidated(&self) -> bool {
        self.switch_point.has_been_invalidated()
    }

    fn may_retry(&self) -> bool {
        self.invalidations < MAX_RETRIES
    }

    fn new_switch_point(&mut self) {
        debug_assert!(self.has_been_invalidated());
        self.switch_point = SwitchPoint::new();
    }

    /// Counted invalidation. A token that already flipped is not counted again.
    fn invalidate_once(&mut self) {
        if self.switch_point.invalidate() {
            self.invalidations += 1;
        }
    }

    fn invalidate_uncounted(&self) {
        self.switch_point.invalidate();
    }

    fn fail_guard(&mut self) {
        self.invalidate_once();
        self.guard_failed = true;
    }
}

/// Snapshot of one binding's record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessState {
    /// Counted invalidations so far
    pub invalidations: u32,
    /// Whether the current switch point is still valid
    pub is_valid: bool,
    /// Whether a receiver guard on a constant getter ever failed
    pub guard_failed: bool,
}

/// Shared constant cache for global bindings
pub struct GlobalConstants {
    map: Mutex<FxHashMap<PropertyKey, Access>>,
    invalidated_forever: AtomicBool,
}

impl GlobalConstants {
    /// Create an enabled, empty cache
    pub fn new() -> Self {
        Self {
            map: Mutex::new(FxHashMap::default()),
            invalidated_forever: AtomicBool::new(false),
        }
    }

    /// Check if caching was switched off for good
    pub fn is_disabled(&self) -> bool {
        self.invalidated_forever.load(Ordering::Acquire)
    }

    /// State of the record for `key`, if one exists
    pub fn access_state(&self, key: &PropertyKey) -> Option<AccessState> {
        self.map.lock().get(key).map(|access| AccessState {
            invalidations: access.invalidations,
            is_valid: !access.has_been_invalidated(),
            guard_failed: access.guard_failed,
        })
    }

    /// Number of tracked bindings
    pub fn len(&self) -> usize {
        self.map.lock().len()
    }

    /// Check if no bindings are tracked
    pub fn is_empty(&self) -> bool {
        self.map.lock().is_empty()
    }

    /// Invalidate every token without counting it against the retry budget.
    /// Used when a new global replaces the previous one.
    pub fn invalidate_all(&self) {
        if self.is_disabled() {
            return;
        }
        let map = self.map.lock();
        tracing::info!(
            bindings = map.len(),
            "new global created, invalidating constant call sites without counting"
        );
        for access in map.values() {
            access.invalidate_uncounted();
        }
    }

    /// Switch caching off forever and forget every record
    pub fn permanently_disable(&self) {
        if self
            .invalidated_forever
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        let mut map = self.map.lock();
        tracing::info!(
            bindings = map.len(),
            "second live global, disabling constant call sites permanently"
        );
        for access in map.values_mut() {
            access.invalidate_once();
        }
        map.clear();
    }

    /// Count one invalidation for `key` (e.g. the binding was deleted)
    pub fn delete(&self, key: &PropertyKey) {
        if self.is_disabled() {
            return;
        }
        if let Some(access) = self.map.lock().get_mut(key) {
            access.invalidate_once();
        }
    }

    /// Count one invalidation for `key` and, while retries remain, issue a fresh
    /// switch point so the binding may be linked as a constant again.
    pub(crate) fn invalidate_switch_point(&self, key: &PropertyKey) {
        if self.is_disabled() {
            return;
        }
        let mut map = self.map.lock();
        let Some(access) = map.get_mut(key) else {
            return;
        };
        if access.has_been_invalidated() {
            return;
        }
        tracing::debug!(key = %key, invalidations = access.invalidations, "invalidating constant");
        access.invalidate_once();
        if access.may_retry() {
            access.new_switch_point();
        } else {
            tracing::info!(key = %key, "constant relinked too often, giving up");
        }
    }

    /// Record that a receiver guard on a constant getter for `key` failed
    pub(crate) fn fail_guard(&self, key: &PropertyKey) {
        if let Some(access) = self.map.lock().get_mut(key) {
            access.fail_guard();
        }
    }

    /// Link a scope read of a global binding as a constant.
    ///
    /// Declines (`None`) when caching is off, the site is not a scope site, the
    /// owner is not the global object, the property is an accessor or a pending
    /// declaration, or the binding used up its retries.
    pub fn try_link_getter(
        &self,
        find: &FindProperty,
        receiver: &ObjectRef,
        desc: &CallSiteDescriptor,
    ) -> Option<GuardedGetter> {
        let property = find.property();
        if self.is_disabled()
            || !desc.is_scope()
            || !find.owner().is_global()
            || property.is_user_accessor()
            || property.needs_declaration()
        {
            return None;
        }
        let key = desc.name();
        let mut map = self.map.lock();
        let access = map.entry(key.clone()).or_insert_with(Access::new);
        if access.guard_failed || (access.has_been_invalidated() && !access.may_retry()) {
            tracing::debug!(key = %key, "constant getter declined, retries exhausted");
            return None;
        }
        if access.has_been_invalidated() {
            access.new_switch_point();
        }
        let switch_point = access.switch_point.clone();
        drop(map);

        let value = find.get_object_value().ok()?;
        let requested = desc.value_type();
        let getter = if desc.is_optimistic() && ValueType::of(&value).is_wider_than(requested) {
            let error = PropertyError::UnwarrantedOptimism {
                value,
                expected: requested,
            };
            Getter::throwing(key.clone(), error, requested)
        } else {
            Getter::constant(key.clone(), value, requested)
        };

        let guard = Some(Guard::identity(receiver));
        tracing::debug!(key = %key, switch_point = switch_point.id(), "linked constant getter");
        Some(
            GuardedInvocation::new(getter, guard)
                .with_switch_point(Some(switch_point))
                .with_switch_point(receiver.get_proto_switch_point(key, Some(find.owner()))),
        )
    }

    /// Wrap a global setter so each store invalidates the binding's constant.
    ///
    /// Declines when caching is off, the store does not target the global object,
    /// or the binding used up its retries.
    pub fn try_link_setter(
        self: &Arc<Self>,
        find: Option<&FindProperty>,
        receiver: &ObjectRef,
        invocation: &GuardedSetter,
        desc: &CallSiteDescriptor,
    ) -> Option<GuardedSetter> {
        let targets_global = match find {
            Some(find) => find.owner().is_global(),
            None => receiver.is_scope(),
        };
        if self.is_disabled() || !targets_global {
            return None;
        }
        let key = desc.name();
        let mut map = self.map.lock();
        let access = map.entry(key.clone()).or_insert_with(Access::new);
        if !access.may_retry() {
            tracing::debug!(key = %key, "constant setter declined, retries exhausted");
            return None;
        }
        if access.has_been_invalidated() {
            access.new_switch_point();
        }
        let switch_point = access.switch_point.clone();
        drop(map);

        let constants = self.clone();
        let setter = invocation
            .invocation()
            .clone()
            .map_action(|then| SetAction::InvalidateConstant {
                constants,
                then: Box::new(then),
            });
        tracing::debug!(key = %key, switch_point = switch_point.id(), "linked invalidating setter");
        Some(invocation.with_invocation(setter).with_switch_point(Some(switch_point)))
    }
}

impl Default for GlobalConstants {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for GlobalConstants {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GlobalConstants")
            .field("bindings", &self.len())
            .field("disabled", &self.is_disabled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str) -> PropertyKey {
        PropertyKey::from(name)
    }

    fn seed(constants: &GlobalConstants, name: &str) -> SwitchPoint {
        constants
            .map
            .lock()
            .entry(key(name))
            .or_insert_with(Access::new)
            .switch_point
            .clone()
    }

    #[test]
    fn test_invalidation_renews_until_budget_spent() {
        let constants = GlobalConstants::new();
        let first = seed(&constants, "x");

        constants.invalidate_switch_point(&key("x"));
        assert!(first.has_been_invalidated());
        let state = constants.access_state(&key("x")).unwrap();
        assert_eq!(state.invalidations, 1);
        assert!(state.is_valid);

        constants.invalidate_switch_point(&key("x"));
        let state = constants.access_state(&key("x")).unwrap();
        assert_eq!(state.invalidations, MAX_RETRIES);
        assert!(!state.is_valid);

        constants.invalidate_switch_point(&key("x"));
        assert_eq!(constants.access_state(&key("x")).unwrap().invalidations, MAX_RETRIES);
    }

    #[test]
    fn test_invalidate_all_is_uncounted() {
        let constants = GlobalConstants::new();
        let sp = seed(&constants, "x");
        constants.invalidate_all();
        assert!(sp.has_been_invalidated());
        let state = constants.access_state(&key("x")).unwrap();
        assert_eq!(state.invalidations, 0);
        assert!(!state.is_valid);
    }

    #[test]
    fn test_permanently_disable_clears() {
        let constants = GlobalConstants::new();
        let sp = seed(&constants, "x");
        constants.permanently_disable();
        assert!(sp.has_been_invalidated());
        assert!(constants.is_disabled());
        assert!(constants.is_empty());

        constants.delete(&key("x"));
        constants.invalidate_all();
        assert!(constants.access_state(&key("x")).is_none());
    }

    #[test]
    fn test_delete_counts_once() {
        let constants = GlobalConstants::new();
        seed(&constants, "x");
        constants.delete(&key("x"));
        constants.delete(&key("x"));
        assert_eq!(constants.access_state(&key("x")).unwrap().invalidations, 1);
        constants.delete(&key("missing"));
        assert!(constants.access_state(&key("missing")).is_none());
    }

    #[test]
    fn test_fail_guard() {
        let constants = GlobalConstants::new();
        seed(&constants, "x");
        constants.fail_guard(&key("x"));
        let state = constants.access_state(&key("x")).unwrap();
        assert!(state.guard_failed);
        assert_eq!(state.invalidations, 1);
    }
}
