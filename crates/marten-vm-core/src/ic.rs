//! Call-site inline caches.
//!
//! A `GetSite`/`SetSite` keeps the last `GuardedInvocation` the linker produced.
//! A hit (guard passes, no switch point invalidated) runs it directly; a miss
//! relinks. A site that relinks more than its threshold goes megamorphic and from
//! then on uses the uncached object operations.

use crate::convert::coerce;
use crate::error::{PropertyError, PropertyResult};
use crate::linker::{CallSiteDescriptor, GuardedInvocation, Linker};
use crate::object::ObjectRef;
use crate::property::{Getter, Setter};
use crate::value::Value;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// State of a call site
#[derive(Debug)]
pub enum CacheState<T> {
    /// Never linked
    Uninitialized,
    /// Linked invocation
    Linked(Arc<GuardedInvocation<T>>),
    /// Too many relinks, uncached from now on
    Megamorphic,
}

impl<T> CacheState<T> {
    /// Check if megamorphic
    pub fn is_megamorphic(&self) -> bool {
        matches!(self, CacheState::Megamorphic)
    }
}

/// Snapshot of a site's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Invocations served by the linked invocation
    pub hits: u64,
    /// Invocations that had to link
    pub misses: u64,
    /// Links after the first
    pub relinks: u64,
    /// Invocations on the uncached path
    pub slow_path: u64,
}

#[derive(Debug, Default)]
struct SiteCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    relinks: AtomicU64,
    slow_path: AtomicU64,
}

impl SiteCounters {
    #[inline]
    fn record(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            relinks: self.relinks.load(Ordering::Relaxed),
            slow_path: self.slow_path.load(Ordering::Relaxed),
        }
    }
}

/// Linking state shared by get and set sites
#[derive(Debug)]
struct Site<T> {
    desc: CallSiteDescriptor,
    linker: Linker,
    megamorphic_threshold: u64,
    state: Mutex<CacheState<T>>,
    counters: SiteCounters,
}

enum Lookup<T> {
    Hit(Arc<GuardedInvocation<T>>),
    Miss(Option<Arc<GuardedInvocation<T>>>),
    Megamorphic,
}

impl<T> Site<T> {
    fn new(desc: CallSiteDescriptor, linker: Linker, megamorphic_threshold: usize) -> Self {
        Self {
            desc,
            linker,
            megamorphic_threshold: megamorphic_threshold as u64,
            state: Mutex::new(CacheState::Uninitialized),
            counters: SiteCounters::default(),
        }
    }

    fn lookup(&self, receiver: &ObjectRef) -> Lookup<T> {
        let linked = match &*self.state.lock() {
            CacheState::Uninitialized => None,
            CacheState::Linked(linked) => Some(linked.clone()),
            CacheState::Megamorphic => return Lookup::Megamorphic,
        };
        match linked {
            Some(linked) if linked.is_valid_for(receiver) => {
                SiteCounters::record(&self.counters.hits);
                Lookup::Hit(linked)
            }
            stale => {
                SiteCounters::record(&self.counters.misses);
                Lookup::Miss(stale)
            }
        }
    }

    /// Install a fresh link. `false` once the site has gone megamorphic.
    fn install(&self, linked: Arc<GuardedInvocation<T>>) -> bool {
        let mut state = self.state.lock();
        match &*state {
            CacheState::Megamorphic => return false,
            CacheState::Linked(_) => {
                let relinks = self.counters.relinks.fetch_add(1, Ordering::Relaxed) + 1;
                if relinks > self.megamorphic_threshold {
                    *state = CacheState::Megamorphic;
                    tracing::warn!(
                        key = %self.desc.name(),
                        relinks,
                        "call site went megamorphic, using uncached path"
                    );
                    return false;
                }
                tracing::trace!(key = %self.desc.name(), relinks, "relinked call site");
            }
            CacheState::Uninitialized => {
                tracing::trace!(key = %self.desc.name(), "linked call site");
            }
        }
        *state = CacheState::Linked(linked);
        true
    }

    fn linked(&self) -> Option<Arc<GuardedInvocation<T>>> {
        match &*self.state.lock() {
            CacheState::Linked(linked) => Some(linked.clone()),
            _ => None,
        }
    }

    fn is_megamorphic(&self) -> bool {
        self.state.lock().is_megamorphic()
    }
}

/// Inline-cached property read
#[derive(Debug)]
pub struct GetSite {
    site: Site<Getter>,
}

impl GetSite {
    /// Unlinked site for `desc`
    pub fn new(desc: CallSiteDescriptor, linker: Linker, megamorphic_threshold: usize) -> Self {
        Self {
            site: Site::new(desc, linker, megamorphic_threshold),
        }
    }

    /// The site's descriptor
    pub fn descriptor(&self) -> &CallSiteDescriptor {
        &self.site.desc
    }

    /// Current counters
    pub fn stats(&self) -> CacheStats {
        self.site.counters.snapshot()
    }

    /// Check if the site gave up caching
    pub fn is_megamorphic(&self) -> bool {
        self.site.is_megamorphic()
    }

    /// The linked invocation, if any
    pub fn linked(&self) -> Option<Arc<GuardedInvocation<Getter>>> {
        self.site.linked()
    }

    /// Read the property from `receiver`
    pub fn get(&self, receiver: &ObjectRef) -> PropertyResult<Value> {
        let stale = match self.site.lookup(receiver) {
            Lookup::Hit(linked) => return linked.invocation().invoke(receiver),
            Lookup::Megamorphic => return self.slow_get(receiver),
            Lookup::Miss(stale) => stale,
        };
        if let Some(stale) = stale {
            if stale.invocation().is_constant() && !stale.has_been_invalidated() {
                if let Some(constants) = self.site.linker.constants() {
                    constants.fail_guard(self.site.desc.name());
                }
            }
        }

        let linked = Arc::new(self.site.linker.find_get_method(receiver, &self.site.desc)?);
        if !self.site.install(linked.clone()) {
            return self.slow_get(receiver);
        }
        linked.invocation().invoke(receiver)
    }

    fn slow_get(&self, receiver: &ObjectRef) -> PropertyResult<Value> {
        SiteCounters::record(&self.site.counters.slow_path);
        let desc = &self.site.desc;
        let key = desc.name();
        if desc.is_scope() && !receiver.has_property(key) {
            return Err(PropertyError::NotDefined(key.clone()));
        }
        Ok(coerce(receiver.get(key)?, desc.value_type()))
    }
}

/// Inline-cached property write
#[derive(Debug)]
pub struct SetSite {
    site: Site<Setter>,
}

impl SetSite {
    /// Unlinked site for `desc`
    pub fn new(desc: CallSiteDescriptor, linker: Linker, megamorphic_threshold: usize) -> Self {
        Self {
            site: Site::new(desc, linker, megamorphic_threshold),
        }
    }

    /// The site's descriptor
    pub fn descriptor(&self) -> &CallSiteDescriptor {
        &self.site.desc
    }

    /// Current counters
    pub fn stats(&self) -> CacheStats {
        self.site.counters.snapshot()
    }

    /// Check if the site gave up caching
    pub fn is_megamorphic(&self) -> bool {
        self.site.is_megamorphic()
    }

    /// The linked invocation, if any
    pub fn linked(&self) -> Option<Arc<GuardedInvocation<Setter>>> {
        self.site.linked()
    }

    /// Write `value` to the property of `receiver`
    pub fn set(&self, receiver: &ObjectRef, value: Value) -> PropertyResult<()> {
        match self.site.lookup(receiver) {
            Lookup::Hit(linked) => return linked.invocation().invoke(receiver, value),
            Lookup::Megamorphic => return self.slow_set(receiver, value),
            Lookup::Miss(_) => {}
        }
        let linked = Arc::new(self.site.linker.find_set_method(receiver, &self.site.desc)?);
        if !self.site.install(linked.clone()) {
            return self.slow_set(receiver, value);
        }
        linked.invocation().invoke(receiver, value)
    }

    fn slow_set(&self, receiver: &ObjectRef, value: Value) -> PropertyResult<()> {
        SiteCounters::record(&self.site.counters.slow_path);
        let desc = &self.site.desc;
        receiver.set_with_flags(desc.name(), value, desc.flags())
    }
}
