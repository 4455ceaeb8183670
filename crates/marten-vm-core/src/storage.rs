//! Per-instance property storage.
//!
//! Each object owns a fixed block of fields (sized by its layout) and a spill array
//! grown on demand. In dual-field layouts both areas carry a parallel primitive
//! array holding unboxed numbers. Primitive slots are self-describing, so a read
//! never depends on which representation the reader expected; the representation
//! only decides where a write lands.

use crate::convert::fits;
use crate::error::WideningRefused;
use crate::layout::ObjectLayout;
use crate::property::spill::spill_allocation_length;
use crate::property::user_accessor::Accessors;
use crate::types::ValueType;
use crate::value::Value;
use std::sync::Arc;

/// Which storage area a slot index addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageArea {
    /// In-object field
    Field,
    /// Spill array
    Spill,
}

/// Unboxed numeric slot
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) enum Primitive {
    /// Value lives in the generic slot
    #[default]
    Empty,
    Int(i32),
    Long(i64),
    Double(f64),
}

impl Primitive {
    fn pack(value: &Value, repr: ValueType) -> Option<Primitive> {
        match repr {
            ValueType::Int => value.as_int32().map(Primitive::Int),
            ValueType::Long => value.as_number().map(|n| Primitive::Long(n as i64)),
            ValueType::Double => value.as_number().map(Primitive::Double),
            ValueType::Undefined | ValueType::Object => None,
        }
    }

    fn to_value(self) -> Option<Value> {
        match self {
            Primitive::Empty => None,
            Primitive::Int(n) => Some(Value::int32(n)),
            Primitive::Long(n) => Some(Value::number(n as f64)),
            Primitive::Double(n) => Some(Value::number(n)),
        }
    }
}

/// Field and spill storage of one object
pub struct ObjectStorage {
    dual: bool,
    fields: Vec<Value>,
    primitive_fields: Vec<Primitive>,
    spill: Vec<Value>,
    primitive_spill: Vec<Primitive>,
    accessors: Vec<Option<Arc<Accessors>>>,
}

impl ObjectStorage {
    /// Allocate storage for `layout`
    pub fn new(layout: &ObjectLayout) -> Self {
        let dual = layout.uses_dual_fields();
        let field_count = layout.field_count();
        Self {
            dual,
            fields: vec![Value::Undefined; field_count],
            primitive_fields: if dual {
                vec![Primitive::Empty; field_count]
            } else {
                Vec::new()
            },
            spill: Vec::new(),
            primitive_spill: Vec::new(),
            accessors: Vec::new(),
        }
    }

    /// Current spill capacity
    pub fn spill_capacity(&self) -> usize {
        self.spill.len()
    }

    /// Grow the spill so that `slot` is addressable
    pub fn ensure_spill_size(&mut self, slot: usize) {
        if slot < self.spill.len() {
            return;
        }
        let length = spill_allocation_length(slot);
        self.spill.resize(length, Value::Undefined);
        if self.dual {
            self.primitive_spill.resize(length, Primitive::Empty);
        }
        self.accessors.resize(length, None);
    }

    fn ensure_field_size(&mut self, slot: usize) {
        if slot < self.fields.len() {
            return;
        }
        self.fields.resize(slot + 1, Value::Undefined);
        if self.dual {
            self.primitive_fields.resize(slot + 1, Primitive::Empty);
        }
    }

    fn area(&self, area: StorageArea) -> (&[Value], &[Primitive]) {
        match area {
            StorageArea::Field => (&self.fields, &self.primitive_fields),
            StorageArea::Spill => (&self.spill, &self.primitive_spill),
        }
    }

    fn area_mut(&mut self, area: StorageArea, slot: usize) -> (&mut [Value], &mut [Primitive]) {
        match area {
            StorageArea::Field => {
                self.ensure_field_size(slot);
                (&mut self.fields, &mut self.primitive_fields)
            }
            StorageArea::Spill => {
                self.ensure_spill_size(slot);
                (&mut self.spill, &mut self.primitive_spill)
            }
        }
    }

    /// Read a slot
    pub fn read(&self, area: StorageArea, slot: usize) -> Value {
        let (objects, primitives) = self.area(area);
        if let Some(value) = primitives.get(slot).and_then(|p| p.to_value()) {
            return value;
        }
        objects.get(slot).cloned().unwrap_or_default()
    }

    /// Write a slot in representation `repr`.
    pub(crate) fn write(
        &mut self,
        area: StorageArea,
        slot: usize,
        repr: ValueType,
        value: Value,
    ) -> Result<(), WideningRefused> {
        if !fits(&value, repr) {
            return Err(WideningRefused);
        }
        let dual = self.dual;
        let (objects, primitives) = self.area_mut(area, slot);
        if dual && repr.is_primitive() {
            primitives[slot] = Primitive::pack(&value, repr).ok_or(WideningRefused)?;
            objects[slot] = Value::Undefined;
        } else {
            objects[slot] = value;
            if let Some(primitive) = primitives.get_mut(slot) {
                *primitive = Primitive::Empty;
            }
        }
        Ok(())
    }

    /// Reset a slot to `undefined` (used when a property is deleted)
    pub fn erase(&mut self, area: StorageArea, slot: usize) {
        let (objects, primitives) = self.area_mut(area, slot);
        objects[slot] = Value::Undefined;
        if let Some(primitive) = primitives.get_mut(slot) {
            *primitive = Primitive::Empty;
        }
        if area == StorageArea::Spill {
            self.accessors[slot] = None;
        }
    }

    /// Accessor pair stored at spill `slot`
    pub(crate) fn accessors(&self, slot: usize) -> Option<Arc<Accessors>> {
        self.accessors.get(slot).cloned().flatten()
    }

    /// Store an accessor pair at spill `slot`
    pub(crate) fn set_accessors(&mut self, slot: usize, accessors: Option<Arc<Accessors>>) {
        self.ensure_spill_size(slot);
        self.accessors[slot] = accessors;
    }
}
