//! Component reflection registry
//!
//! Maps type names to [`TypeDescriptor`]s. Registration takes `&mut self` and
//! happens before the registry is shared; every read takes `&self`.

use crate::descriptor::{Instance, Properties, TypeDescriptor};
use crate::error::{ReflectionError, RegistryError};
use crate::value::Value;
use std::any::{Any, TypeId};
use std::collections::{BTreeMap, HashMap};

/// Registry of reflected component types
#[derive(Default)]
pub struct TypeRegistry {
    by_name: BTreeMap<String, TypeDescriptor>,
    by_type: HashMap<TypeId, String>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a descriptor.
    ///
    /// Registering a structurally identical descriptor again is a no-op and
    /// the first registration is kept.
    pub fn register(&mut self, descriptor: TypeDescriptor) -> Result<(), RegistryError> {
        if let Some(existing) = self.by_name.get(descriptor.name()) {
            if *existing == descriptor {
                log::debug!("Type '{}' already registered, skipping", descriptor.name());
                return Ok(());
            }
            return Err(RegistryError::DuplicateType(descriptor.name().to_string()));
        }

        log::debug!(
            "Registered type '{}' ({} constructors, {} properties)",
            descriptor.name(),
            descriptor.constructors().len(),
            descriptor.property_count()
        );

        self.by_type
            .entry(descriptor.type_id())
            .or_insert_with(|| descriptor.name().to_string());
        self.by_name.insert(descriptor.name().to_string(), descriptor);
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Option<&TypeDescriptor> {
        self.by_name.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Registered name of a Rust type
    pub fn name_of<T: Any>(&self) -> Option<&str> {
        self.by_type.get(&TypeId::of::<T>()).map(String::as_str)
    }

    /// Descriptor of the type an instance was constructed as
    pub fn instance_type(&self, instance: &Instance) -> Option<&TypeDescriptor> {
        self.lookup(instance.type_name())
    }

    /// Construct through the first declared overload accepting `args`
    pub fn construct(&self, name: &str, args: &[Value]) -> Result<Instance, ReflectionError> {
        let descriptor = self.descriptor(name)?;

        descriptor
            .constructors()
            .iter()
            .filter(|ctor| ctor.matches(args))
            .find_map(|ctor| ctor.invoke(args))
            .map(|object| Instance::new(name, object))
            .ok_or_else(|| ReflectionError::NoMatchingConstructor {
                type_name: name.to_string(),
                arguments: args.iter().map(|a| a.type_name().to_string()).collect(),
            })
    }

    pub fn get_property(
        &self,
        instance: &Instance,
        property: &str,
    ) -> Result<Value, ReflectionError> {
        let descriptor = self.checked_descriptor(instance)?;
        let accessor = descriptor
            .property(property)
            .ok_or_else(|| ReflectionError::unknown_property(descriptor.name(), property))?;

        accessor.get(instance.object()).ok_or_else(|| {
            ReflectionError::type_mismatch(
                property,
                accessor.value_type(),
                descriptor.rust_type_name(),
            )
        })
    }

    pub fn set_property(
        &self,
        instance: &mut Instance,
        property: &str,
        value: Value,
    ) -> Result<(), ReflectionError> {
        let descriptor = self.checked_descriptor(instance)?;
        let accessor = descriptor
            .property(property)
            .ok_or_else(|| ReflectionError::unknown_property(descriptor.name(), property))?;

        if accessor.is_read_only() {
            return Err(ReflectionError::ReadOnly {
                type_name: descriptor.name().to_string(),
                property: property.to_string(),
            });
        }

        if !accessor.value_type().accepts(&value) || !accessor.set(instance.object_mut(), &value) {
            return Err(ReflectionError::type_mismatch(
                property,
                accessor.value_type(),
                value.type_name(),
            ));
        }

        Ok(())
    }

    /// Properties of a type, from the first one on every call
    pub fn enumerate(&self, name: &str) -> Result<Properties<'_>, ReflectionError> {
        Ok(self.descriptor(name)?.properties())
    }

    /// All descriptors, ordered by name
    pub fn iter(&self) -> impl Iterator<Item = &TypeDescriptor> {
        self.by_name.values()
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    fn descriptor(&self, name: &str) -> Result<&TypeDescriptor, ReflectionError> {
        self.lookup(name)
            .ok_or_else(|| ReflectionError::UnknownType(name.to_string()))
    }

    fn checked_descriptor(&self, instance: &Instance) -> Result<&TypeDescriptor, ReflectionError> {
        let descriptor = self.descriptor(instance.type_name())?;
        if !descriptor.describes(instance.object()) {
            return Err(ReflectionError::TypeMismatch {
                context: instance.type_name().to_string(),
                expected: descriptor.rust_type_name().to_string(),
                found: "foreign instance".to_string(),
            });
        }
        Ok(descriptor)
    }
}
