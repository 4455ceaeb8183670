//! VM execution context
//!
//! A context owns one global object, the root shapes objects and scopes start
//! from, its builtin switch points and a linker for creating call sites.

use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::constants::GlobalConstants;
use crate::error::{PropertyError, PropertyResult};
use crate::ic::{GetSite, SetSite};
use crate::key::PropertyKey;
use crate::layout::ObjectLayout;
use crate::linker::{CallSiteDescriptor, Linker};
use crate::object::{JsObject, ObjectFlags, ObjectRef};
use crate::property::PropertyFlags;
use crate::runtime::RuntimeConfig;
use crate::shape::Shape;
use crate::switchpoint::SwitchPoint;
use crate::value::Value;

/// Execution context with its own global object
pub struct VmContext {
    config: RuntimeConfig,
    global: ObjectRef,
    object_prototype: ObjectRef,
    object_shape: Arc<Shape>,
    scope_shape: Arc<Shape>,
    linker: Linker,
    /// Builtin switch points by builtin name
    builtins: DashMap<String, SwitchPoint>,
    live_contexts: Arc<AtomicUsize>,
}

impl VmContext {
    /// Context sharing `constants` with its runtime. `live_contexts` was already
    /// incremented for this context and is decremented on drop.
    pub(crate) fn new(
        config: RuntimeConfig,
        constants: Option<Arc<GlobalConstants>>,
        live_contexts: Arc<AtomicUsize>,
    ) -> Self {
        let dual = config.dual_fields;
        let object_shape = Shape::new_map(ObjectLayout::new(
            &format!("JO{}", config.object_field_count),
            config.object_field_count,
            dual,
        ));
        let scope_shape = Shape::new_map(ObjectLayout::new(
            "Scope",
            config.object_field_count,
            dual,
        ));
        let global_shape = Shape::new_map(ObjectLayout::new(
            "Global",
            config.global_field_count,
            dual,
        ));

        let object_prototype = JsObject::with_flags(
            Shape::new_map(ObjectLayout::new("ObjectPrototype", 0, dual)),
            None,
            ObjectFlags::IS_BUILTIN,
        );
        let global = JsObject::new_global(
            global_shape,
            Some(object_prototype.clone()),
            constants.clone(),
        );

        tracing::debug!(
            dual_fields = dual,
            object_fields = config.object_field_count,
            global_fields = config.global_field_count,
            constants = constants.is_some(),
            "created context"
        );

        Self {
            config,
            global,
            object_prototype,
            object_shape,
            scope_shape,
            linker: Linker::new(constants),
            builtins: DashMap::new(),
            live_contexts,
        }
    }

    /// The global object
    pub fn global(&self) -> &ObjectRef {
        &self.global
    }

    /// `Object.prototype` of this context
    pub fn object_prototype(&self) -> &ObjectRef {
        &self.object_prototype
    }

    /// Configuration the context was created with
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Linker used by this context's call sites
    pub fn linker(&self) -> &Linker {
        &self.linker
    }

    /// Empty shape new objects start from
    pub fn root_shape(&self) -> &Arc<Shape> {
        &self.object_shape
    }

    /// Create an empty object inheriting from `Object.prototype`
    pub fn new_object(&self) -> ObjectRef {
        self.new_object_with_proto(Some(self.object_prototype.clone()))
    }

    /// Create an empty object with the given prototype
    pub fn new_object_with_proto(&self, proto: Option<ObjectRef>) -> ObjectRef {
        JsObject::new(self.object_shape.clone(), proto)
    }

    /// Create a scope object chained to `parent`, or to the global object
    pub fn new_scope(&self, parent: Option<&ObjectRef>) -> ObjectRef {
        let parent = parent.unwrap_or(&self.global).clone();
        JsObject::new_scope(self.scope_shape.clone(), parent)
    }

    /// Inline-cached read site
    pub fn get_site(&self, desc: CallSiteDescriptor) -> GetSite {
        GetSite::new(desc, self.linker.clone(), self.config.megamorphic_threshold)
    }

    /// Inline-cached write site
    pub fn set_site(&self, desc: CallSiteDescriptor) -> SetSite {
        SetSite::new(desc, self.linker.clone(), self.config.megamorphic_threshold)
    }

    /// Switch point for the builtin `name`, created on first use
    pub fn builtin_switch_point(&self, name: &str) -> SwitchPoint {
        self.builtins
            .entry(name.to_string())
            .or_insert_with(SwitchPoint::new)
            .clone()
    }

    /// Check that nothing overwrote or shadowed the builtin `name`
    pub fn is_builtin_intact(&self, name: &str) -> bool {
        self.builtins
            .get(name)
            .is_none_or(|switch_point| switch_point.is_valid())
    }

    /// Define `key` on `owner` as the builtin `name`
    pub fn define_builtin(
        &self,
        owner: &ObjectRef,
        name: &str,
        key: &PropertyKey,
        value: Value,
    ) -> PropertyResult<SwitchPoint> {
        owner.define_own_property(
            key,
            value,
            PropertyFlags::IS_BUILTIN | PropertyFlags::NOT_ENUMERABLE,
        )?;
        let property = owner.shape().find(key).ok_or_else(|| {
            PropertyError::internal(format!("builtin '{}' vanished after definition", name))
        })?;
        let switch_point = self.builtin_switch_point(name);
        property.set_builtin_switch_point(Some(switch_point.clone()));
        Ok(switch_point)
    }
}

impl Drop for VmContext {
    fn drop(&mut self) {
        self.live_contexts.fetch_sub(1, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for VmContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VmContext")
            .field("global", &self.global.shape().id())
            .field("builtins", &self.builtins.len())
            .finish()
    }
}
