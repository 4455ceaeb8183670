//! VM runtime - the main entry point
//!
//! The runtime holds the configuration and the global constant cache shared by
//! every context it creates.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::constants::GlobalConstants;
use crate::context::VmContext;

/// The VM runtime
///
/// It is `Send + Sync` and can be shared across threads.
pub struct VmRuntime {
    /// Runtime configuration
    config: RuntimeConfig,
    /// Constant cache, `None` when disabled by configuration
    constants: Option<Arc<GlobalConstants>>,
    /// Contexts currently alive
    live_contexts: Arc<AtomicUsize>,
    /// Contexts ever created
    contexts_created: AtomicUsize,
}

/// Runtime configuration
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Store primitives unboxed next to object slots
    pub dual_fields: bool,
    /// Link global scope reads as constants
    pub global_constants: bool,
    /// Relinks after which a call site stops caching
    pub megamorphic_threshold: usize,
    /// Field slots of ordinary objects before spilling
    pub object_field_count: usize,
    /// Field slots of the global object before spilling
    pub global_field_count: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            dual_fields: true,
            global_constants: true,
            megamorphic_threshold: 8,
            object_field_count: 4,
            global_field_count: 0,
        }
    }
}

impl VmRuntime {
    /// Create a new runtime with default configuration
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    /// Create a new runtime with custom configuration
    pub fn with_config(config: RuntimeConfig) -> Self {
        let constants = config
            .global_constants
            .then(|| Arc::new(GlobalConstants::new()));
        Self {
            config,
            constants,
            live_contexts: Arc::new(AtomicUsize::new(0)),
            contexts_created: AtomicUsize::new(0),
        }
    }

    /// Create a new execution context.
    ///
    /// A second live context switches the constant cache off for good; a new
    /// context replacing a dropped one only invalidates what was cached.
    pub fn create_context(&self) -> VmContext {
        let live = self.live_contexts.fetch_add(1, Ordering::SeqCst);
        let created = self.contexts_created.fetch_add(1, Ordering::SeqCst);
        if let Some(constants) = &self.constants {
            if live > 0 {
                constants.permanently_disable();
            } else if created > 0 {
                constants.invalidate_all();
            }
        }
        VmContext::new(
            self.config.clone(),
            self.constants.clone(),
            self.live_contexts.clone(),
        )
    }

    /// Get runtime configuration
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// The shared constant cache, if enabled
    pub fn global_constants(&self) -> Option<&Arc<GlobalConstants>> {
        self.constants.as_ref()
    }

    /// Number of contexts currently alive
    pub fn live_contexts(&self) -> usize {
        self.live_contexts.load(Ordering::SeqCst)
    }
}

impl Default for VmRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for VmRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VmRuntime")
            .field("config", &self.config)
            .field("live_contexts", &self.live_contexts())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_creation() {
        let runtime = VmRuntime::new();
        assert_eq!(runtime.live_contexts(), 0);
        assert!(runtime.global_constants().is_some());
    }

    #[test]
    fn test_live_context_count() {
        let runtime = VmRuntime::new();
        let ctx = runtime.create_context();
        assert_eq!(runtime.live_contexts(), 1);
        drop(ctx);
        assert_eq!(runtime.live_contexts(), 0);
    }

    #[test]
    fn test_second_live_context_disables_constants() {
        let runtime = VmRuntime::new();
        let _first = runtime.create_context();
        assert!(!runtime.global_constants().unwrap().is_disabled());
        let _second = runtime.create_context();
        assert!(runtime.global_constants().unwrap().is_disabled());
    }

    #[test]
    fn test_replacing_context_keeps_constants_enabled() {
        let runtime = VmRuntime::new();
        drop(runtime.create_context());
        let _next = runtime.create_context();
        assert!(!runtime.global_constants().unwrap().is_disabled());
    }

    #[test]
    fn test_constants_can_be_switched_off() {
        let runtime = VmRuntime::with_config(RuntimeConfig {
            global_constants: false,
            ..RuntimeConfig::default()
        });
        assert!(runtime.global_constants().is_none());
        assert!(runtime.create_context().linker().constants().is_none());
    }

    #[test]
    fn test_runtime_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<VmRuntime>();
        assert_send_sync::<VmContext>();
    }
}
