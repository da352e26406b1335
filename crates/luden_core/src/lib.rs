//! # luden_core - Component Reflection
//!
//! Runtime type descriptions for component types, so that generic engine
//! code (inspectors, serializers, undo stacks) can construct, enumerate and
//! edit components it was not compiled against.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐   register   ┌──────────────────┐
//! │ TypeDescriptor   │─────────────▶│  TypeRegistry    │
//! │ (ctors + props)  │              │  (by name)       │
//! └──────────────────┘              └────────┬─────────┘
//!                                            │ construct / get / set / enumerate
//!                                            ▼
//!                                   ┌──────────────────┐
//!                                   │ Instance         │
//!                                   │ (boxed, tagged)  │
//!                                   └──────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use luden_core::prelude::*;
//!
//! let mut registry = TypeRegistry::new();
//! register_builtin_components(&mut registry)?;
//!
//! let mut health = registry.construct("CHealth", &[Value::Int(100), Value::Int(100)])?;
//! registry.set_property(&mut health, "current", Value::Int(40))?;
//! assert_eq!(registry.get_property(&health, "current")?, Value::Int(40));
//! ```

pub mod components;
pub mod descriptor;
pub mod error;
pub mod id;
pub mod math;
pub mod type_registry;
pub mod value;

pub use components::register_builtin_components;
pub use descriptor::{
    ConstructorSignature, Instance, Properties, PropertyAccessor, TypeDescriptor,
    TypeDescriptorBuilder,
};
pub use error::{ReflectionError, RegistryError};
pub use id::EntityId;
pub use math::Vec2;
pub use type_registry::TypeRegistry;
pub use value::{Reflect, Value, ValueType};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::components::*;
    pub use crate::descriptor::{Instance, PropertyAccessor, TypeDescriptor};
    pub use crate::error::{ReflectionError, RegistryError};
    pub use crate::id::EntityId;
    pub use crate::math::Vec2;
    pub use crate::type_registry::TypeRegistry;
    pub use crate::value::{Reflect, Value, ValueType};
}
