//! Backing object layouts.
//!
//! A layout fixes how many in-object fields an object class has and whether those
//! fields (and the spill) keep a parallel primitive array for unboxed numbers.

use std::fmt;
use std::sync::Arc;

/// Description of a backing object class
pub struct ObjectLayout {
    name: Arc<str>,
    field_count: usize,
    dual_fields: bool,
}

impl ObjectLayout {
    /// Create a layout
    pub fn new(name: &str, field_count: usize, dual_fields: bool) -> Arc<Self> {
        Arc::new(Self {
            name: Arc::from(name),
            field_count,
            dual_fields,
        })
    }

    /// Layout name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of in-object fields
    pub fn field_count(&self) -> usize {
        self.field_count
    }

    /// Whether primitive values are stored unboxed next to the generic slots
    pub fn uses_dual_fields(&self) -> bool {
        self.dual_fields
    }
}

impl fmt::Debug for ObjectLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}(fields={}, dual={})",
            self.name, self.field_count, self.dual_fields
        )
    }
}
