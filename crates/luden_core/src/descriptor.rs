//! Type descriptors: the reflected shape of a component type
//!
//! A [`TypeDescriptor`] lists the constructor overloads and the properties of
//! one Rust type. Descriptors are built once through
//! [`TypeDescriptor::builder`] and are immutable afterwards.

use crate::value::{Reflect, Value, ValueType};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Type-erased component value
pub type BoxedObject = Box<dyn Any + Send + Sync>;

type ConstructFn = dyn Fn(&[Value]) -> Option<BoxedObject> + Send + Sync;
type GetterFn = dyn Fn(&dyn Any) -> Option<Value> + Send + Sync;
type SetterFn = dyn Fn(&mut dyn Any, &Value) -> bool + Send + Sync;

/// A constructed component, tagged with its registered type name
pub struct Instance {
    type_name: String,
    object: BoxedObject,
}

impl Instance {
    /// Wrap an already constructed object
    pub fn new(type_name: impl Into<String>, object: BoxedObject) -> Self {
        Self {
            type_name: type_name.into(),
            object,
        }
    }

    /// Registered type name
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.object.downcast_ref::<T>()
    }

    pub fn downcast_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.object.downcast_mut::<T>()
    }

    /// Take the concrete value out; gives the instance back on a type mismatch
    pub fn into_inner<T: Any>(self) -> Result<T, Self> {
        let Instance { type_name, object } = self;
        match object.downcast::<T>() {
            Ok(value) => Ok(*value),
            Err(object) => Err(Instance { type_name, object }),
        }
    }

    pub(crate) fn object(&self) -> &dyn Any {
        &*self.object
    }

    pub(crate) fn object_mut(&mut self) -> &mut dyn Any {
        &mut *self.object
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("type_name", &self.type_name)
            .finish_non_exhaustive()
    }
}

/// One constructor overload
#[derive(Clone)]
pub struct ConstructorSignature {
    params: Vec<ValueType>,
    invoke: Arc<ConstructFn>,
}

impl ConstructorSignature {
    /// Create from parameter types and a thunk.
    ///
    /// The thunk may return `None` when an argument is assignable but does
    /// not convert (an out-of-range integer); construction then moves on to
    /// the next overload.
    pub fn new(
        params: Vec<ValueType>,
        invoke: impl Fn(&[Value]) -> Option<BoxedObject> + Send + Sync + 'static,
    ) -> Self {
        Self {
            params,
            invoke: Arc::new(invoke),
        }
    }

    /// Parameter types in order
    pub fn params(&self) -> &[ValueType] {
        &self.params
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }

    /// Check arity and assignability of every argument
    pub fn matches(&self, args: &[Value]) -> bool {
        args.len() == self.params.len()
            && self
                .params
                .iter()
                .zip(args)
                .all(|(param, arg)| param.accepts(arg))
    }

    /// Run the thunk
    pub fn invoke(&self, args: &[Value]) -> Option<BoxedObject> {
        (self.invoke)(args)
    }
}

impl fmt::Debug for ConstructorSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ConstructorSignature")
            .field(&self.params)
            .finish()
    }
}

/// Named, typed accessor for one property
#[derive(Clone)]
pub struct PropertyAccessor {
    name: String,
    value_type: ValueType,
    getter: Arc<GetterFn>,
    setter: Option<Arc<SetterFn>>,
    default: Option<Value>,
}

impl PropertyAccessor {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value_type(&self) -> &ValueType {
        &self.value_type
    }

    /// No setter was registered
    pub fn is_read_only(&self) -> bool {
        self.setter.is_none()
    }

    /// Editor default, if one was declared
    pub fn default_value(&self) -> Option<&Value> {
        self.default.as_ref()
    }

    /// Read from a concrete object; `None` if the object has the wrong type
    pub fn get(&self, object: &dyn Any) -> Option<Value> {
        (self.getter)(object)
    }

    /// Write to a concrete object.
    ///
    /// Returns false when the property is read-only, the object has the
    /// wrong type or the value does not convert.
    pub fn set(&self, object: &mut dyn Any, value: &Value) -> bool {
        match &self.setter {
            Some(setter) => setter(object, value),
            None => false,
        }
    }
}

impl fmt::Debug for PropertyAccessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyAccessor")
            .field("name", &self.name)
            .field("value_type", &self.value_type)
            .field("read_only", &self.is_read_only())
            .field("default", &self.default)
            .finish()
    }
}

/// Restartable iterator over the properties of a type, in declaration order
#[derive(Clone)]
pub struct Properties<'a> {
    inner: std::slice::Iter<'a, PropertyAccessor>,
}

impl<'a> Iterator for Properties<'a> {
    type Item = &'a PropertyAccessor;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for Properties<'_> {}

/// Reflected description of a component type
#[derive(Clone)]
pub struct TypeDescriptor {
    name: String,
    type_id: TypeId,
    rust_type_name: &'static str,
    constructors: Vec<ConstructorSignature>,
    properties: Vec<PropertyAccessor>,
    index: HashMap<String, usize>,
}

impl TypeDescriptor {
    /// Start describing `T` under `name`
    pub fn builder<T: Any + Send + Sync>(name: impl Into<String>) -> TypeDescriptorBuilder<T> {
        TypeDescriptorBuilder {
            name: name.into(),
            constructors: Vec::new(),
            properties: Vec::new(),
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `TypeId` of the described Rust type
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn rust_type_name(&self) -> &'static str {
        self.rust_type_name
    }

    /// Constructor overloads in declaration order
    pub fn constructors(&self) -> &[ConstructorSignature] {
        &self.constructors
    }

    /// Iterate properties from the first one
    pub fn properties(&self) -> Properties<'_> {
        Properties {
            inner: self.properties.iter(),
        }
    }

    pub fn property(&self, name: &str) -> Option<&PropertyAccessor> {
        self.index.get(name).map(|&i| &self.properties[i])
    }

    pub fn property_count(&self) -> usize {
        self.properties.len()
    }

    /// Whether the object behind `object` is of the described type
    pub fn describes(&self, object: &dyn Any) -> bool {
        object.type_id() == self.type_id
    }
}

/// Structural equality: same name, same Rust type, same ordered constructor
/// parameter lists and same ordered (name, type, writable) properties.
/// Defaults are metadata and do not take part.
impl PartialEq for TypeDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.type_id == other.type_id
            && self.constructors.len() == other.constructors.len()
            && self
                .constructors
                .iter()
                .zip(&other.constructors)
                .all(|(a, b)| a.params == b.params)
            && self.properties.len() == other.properties.len()
            && self.properties.iter().zip(&other.properties).all(|(a, b)| {
                a.name == b.name
                    && a.value_type == b.value_type
                    && a.is_read_only() == b.is_read_only()
            })
    }
}

impl fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeDescriptor")
            .field("name", &self.name)
            .field("rust_type", &self.rust_type_name)
            .field("constructors", &self.constructors)
            .field("properties", &self.properties)
            .finish()
    }
}

/// Builder for [`TypeDescriptor`]
pub struct TypeDescriptorBuilder<T> {
    name: String,
    constructors: Vec<ConstructorSignature>,
    properties: Vec<PropertyAccessor>,
    _marker: PhantomData<fn() -> T>,
}

macro_rules! typed_constructor {
    ($(#[$meta:meta])* $fn_name:ident, $($arg:ident : $idx:tt),+) => {
        $(#[$meta])*
        pub fn $fn_name<$($arg: Reflect),+>(
            self,
            construct: impl Fn($($arg),+) -> T + Send + Sync + 'static,
        ) -> Self {
            self.constructor_raw(vec![$(<$arg as Reflect>::value_type()),+], move |args| {
                Some(construct($(<$arg as Reflect>::from_value(args.get($idx)?)?),+))
            })
        }
    };
}

impl<T: Any + Send + Sync> TypeDescriptorBuilder<T> {
    /// Zero-argument constructor through `Default`
    pub fn default_constructor(self) -> Self
    where
        T: Default,
    {
        self.constructor_raw(Vec::new(), |_| Some(T::default()))
    }

    /// Constructor with explicit parameter types and an untyped thunk
    pub fn constructor_raw(
        mut self,
        params: Vec<ValueType>,
        construct: impl Fn(&[Value]) -> Option<T> + Send + Sync + 'static,
    ) -> Self {
        self.constructors.push(ConstructorSignature::new(params, move |args| {
            construct(args).map(|object| Box::new(object) as BoxedObject)
        }));
        self
    }

    typed_constructor!(
        /// One-argument constructor
        constructor1, A: 0
    );
    typed_constructor!(
        /// Two-argument constructor
        constructor2, A: 0, B: 1
    );
    typed_constructor!(constructor3, A: 0, B: 1, C: 2);
    typed_constructor!(constructor4, A: 0, B: 1, C: 2, D: 3);

    /// Read-write property backed by a field
    pub fn property<V: Reflect>(
        self,
        name: impl Into<String>,
        get: impl Fn(&T) -> &V + Send + Sync + 'static,
        get_mut: impl Fn(&mut T) -> &mut V + Send + Sync + 'static,
    ) -> Self {
        self.property_with(
            name,
            move |object: &T| get(object).to_value(),
            move |object: &mut T, value: V| *get_mut(object) = value,
        )
    }

    /// Read-only property backed by a field
    pub fn read_only_property<V: Reflect>(
        self,
        name: impl Into<String>,
        get: impl Fn(&T) -> &V + Send + Sync + 'static,
    ) -> Self {
        let getter = move |object: &dyn Any| object.downcast_ref::<T>().map(|o| get(o).to_value());
        self.push_property(PropertyAccessor {
            name: name.into(),
            value_type: V::value_type(),
            getter: Arc::new(getter),
            setter: None,
            default: None,
        })
    }

    /// Property with a computed getter and a custom setter
    pub fn property_with<V: Reflect>(
        self,
        name: impl Into<String>,
        get: impl Fn(&T) -> Value + Send + Sync + 'static,
        set: impl Fn(&mut T, V) + Send + Sync + 'static,
    ) -> Self {
        let getter = move |object: &dyn Any| object.downcast_ref::<T>().map(|o| get(o));
        let setter = move |object: &mut dyn Any, value: &Value| {
            match (object.downcast_mut::<T>(), V::from_value(value)) {
                (Some(object), Some(value)) => {
                    set(object, value);
                    true
                }
                _ => false,
            }
        };
        self.push_property(PropertyAccessor {
            name: name.into(),
            value_type: V::value_type(),
            getter: Arc::new(getter),
            setter: Some(Arc::new(setter)),
            default: None,
        })
    }

    /// Attach an editor default to the most recently added property
    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        if let Some(last) = self.properties.last_mut() {
            last.default = Some(value.into());
        }
        self
    }

    fn push_property(mut self, accessor: PropertyAccessor) -> Self {
        match self.properties.iter().position(|p| p.name == accessor.name) {
            Some(existing) => self.properties[existing] = accessor,
            None => self.properties.push(accessor),
        }
        self
    }

    pub fn build(self) -> TypeDescriptor {
        let index = self
            .properties
            .iter()
            .enumerate()
            .map(|(i, p)| (p.name.clone(), i))
            .collect();

        TypeDescriptor {
            name: self.name,
            type_id: TypeId::of::<T>(),
            rust_type_name: std::any::type_name::<T>(),
            constructors: self.constructors,
            properties: self.properties,
            index,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Counter {
        count: i32,
        label: String,
    }

    fn counter_descriptor() -> TypeDescriptor {
        TypeDescriptor::builder::<Counter>("Counter")
            .default_constructor()
            .constructor1(|count: i32| Counter {
                count,
                label: String::new(),
            })
            .property("count", |c| &c.count, |c| &mut c.count)
            .default_value(0)
            .read_only_property("label", |c| &c.label)
            .build()
    }

    #[test]
    fn test_builder_shape() {
        let descriptor = counter_descriptor();

        assert_eq!(descriptor.name(), "Counter");
        assert_eq!(descriptor.constructors().len(), 2);
        assert_eq!(descriptor.constructors()[1].params(), &[ValueType::Int]);
        assert_eq!(descriptor.property_count(), 2);
        assert!(descriptor.property("label").unwrap().is_read_only());
        assert_eq!(
            descriptor.property("count").unwrap().default_value(),
            Some(&Value::Int(0))
        );
    }

    #[test]
    fn test_constructor_thunk() {
        let descriptor = counter_descriptor();
        let ctor = &descriptor.constructors()[1];

        assert!(ctor.matches(&[Value::Int(5)]));
        assert!(!ctor.matches(&[Value::Float(5.0)]));
        assert!(!ctor.matches(&[]));

        let object = ctor.invoke(&[Value::Int(5)]).unwrap();
        assert_eq!(object.downcast_ref::<Counter>().unwrap().count, 5);

        // Assignable but out of range for i32
        assert!(ctor.invoke(&[Value::Int(i64::MAX)]).is_none());
    }

    #[test]
    fn test_accessors() {
        let descriptor = counter_descriptor();
        let mut counter = Counter::default();
        let count = descriptor.property("count").unwrap();

        assert!(count.set(&mut counter, &Value::Int(9)));
        assert_eq!(count.get(&counter), Some(Value::Int(9)));
        assert!(!count.set(&mut counter, &Value::from("nine")));

        let label = descriptor.property("label").unwrap();
        assert!(!label.set(&mut counter, &Value::from("x")));

        let wrong: i32 = 0;
        assert_eq!(count.get(&wrong), None);
    }

    #[test]
    fn test_structural_equality_ignores_defaults() {
        let a = counter_descriptor();
        let b = TypeDescriptor::builder::<Counter>("Counter")
            .default_constructor()
            .constructor1(|count: i32| Counter {
                count,
                label: String::new(),
            })
            .property("count", |c| &c.count, |c| &mut c.count)
            .default_value(42)
            .read_only_property("label", |c| &c.label)
            .build();
        let c = TypeDescriptor::builder::<Counter>("Counter")
            .default_constructor()
            .property("count", |c| &c.count, |c| &mut c.count)
            .build();

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_properties_restartable() {
        let descriptor = counter_descriptor();
        let first = descriptor.properties();
        let names: Vec<_> = first.clone().map(|p| p.name().to_string()).collect();
        let again: Vec<_> = first.map(|p| p.name().to_string()).collect();

        assert_eq!(names, vec!["count", "label"]);
        assert_eq!(names, again);
        assert_eq!(descriptor.properties().len(), 2);
    }

    #[test]
    fn test_instance_into_inner() {
        let instance = Instance::new("Counter", Box::new(Counter::default()));
        let instance = instance.into_inner::<i32>().unwrap_err();
        assert_eq!(instance.type_name(), "Counter");
        assert!(instance.into_inner::<Counter>().is_ok());
    }
}
