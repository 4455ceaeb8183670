//! # Marten VM Core
//!
//! Property storage and inline-cache dispatch for the Marten JavaScript VM.
//!
//! Objects keep their values in numbered slots described by an immutable `Shape`.
//! Call sites link a property access once into a guarded getter or setter and
//! reuse it for as long as the receiver's shape matches and no switch point has
//! been invalidated.
//!
//! ## Design Principles
//!
//! - **Thread-safe**: Objects are `Send + Sync`; shape changes are compare-and-swap
//! - **Immutable shapes**: Adding, removing or widening a property derives a new shape
//! - **Dual fields**: Numbers stay unboxed in a primitive slot next to the object slot
//! - **Switch points**: Prototype edits and builtin overwrites invalidate linked sites

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod constants;
pub mod context;
pub mod convert;
pub mod error;
pub mod find;
pub mod ic;
pub mod key;
pub mod layout;
pub mod linker;
pub mod listeners;
pub mod object;
pub mod property;
pub mod runtime;
mod set_method;
pub mod shape;
pub mod storage;
pub mod switchpoint;
pub mod table;
pub mod types;
pub mod value;

pub use constants::GlobalConstants;
pub use context::VmContext;
pub use error::{PropertyError, PropertyResult};
pub use ic::{CacheStats, GetSite, SetSite};
pub use key::{PropertyKey, Symbol};
pub use linker::{CallSiteDescriptor, CallSiteFlags, Guard, GuardedInvocation, Linker};
pub use object::{JsObject, ObjectRef};
pub use property::{Property, PropertyFlags};
pub use runtime::{RuntimeConfig, VmRuntime};
pub use shape::Shape;
pub use switchpoint::SwitchPoint;
pub use types::ValueType;
pub use value::{JsFunction, Value};
