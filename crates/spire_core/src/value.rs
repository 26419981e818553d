//! Type-erased subjects and products.
//!
//! A [`Value`] wraps any immutable, hashable Rust value behind an `Arc` and
//! remembers its concrete [`TypeTag`]. Equality and hashing look at the type
//! first and then delegate to the wrapped value, so two values are equal only
//! when they have the same concrete type and compare equal.

use std::any::{Any, TypeId};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::error::{EngineError, EngineResult};

/// Bound for anything that can travel through the engine as a subject or product.
pub trait ValueType: Any + Clone + fmt::Debug + Eq + Hash + Send + Sync {}

impl<T> ValueType for T where T: Any + Clone + fmt::Debug + Eq + Hash + Send + Sync {}

/// Nominal type tag for products and subjects
///
/// Compares by `TypeId`; the name is kept for diagnostics and for
/// deterministic ordering in listings.
#[derive(Clone, Copy)]
pub struct TypeTag {
    id: TypeId,
    name: &'static str,
}

impl TypeTag {
    /// Tag for the type `T`
    #[must_use]
    pub fn of<T: Any + ?Sized>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// Fully qualified type name
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Last path segment of the type name, without generic arguments
    #[must_use]
    pub fn short_name(&self) -> &'static str {
        let base = self.name.split('<').next().unwrap_or(self.name);
        base.rsplit("::").next().unwrap_or(base)
    }

    /// Check whether this tag names `T`
    #[must_use]
    pub fn is<T: Any + ?Sized>(&self) -> bool {
        self.id == TypeId::of::<T>()
    }
}

impl PartialEq for TypeTag {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeTag {}

impl Hash for TypeTag {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl PartialOrd for TypeTag {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TypeTag {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name.cmp(other.name).then_with(|| self.id.cmp(&other.id))
    }
}

impl fmt::Debug for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.short_name())
    }
}

/// Object-safe view of a [`ValueType`].
trait DynValue: Any + Send + Sync + fmt::Debug {
    fn as_any(&self) -> &dyn Any;
    fn dyn_eq(&self, other: &dyn Any) -> bool;
    fn dyn_hash(&self, state: &mut dyn Hasher);
}

impl<T: ValueType> DynValue for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn dyn_eq(&self, other: &dyn Any) -> bool {
        other.downcast_ref::<T>().is_some_and(|other| other == self)
    }

    fn dyn_hash(&self, mut state: &mut dyn Hasher) {
        self.hash(&mut state);
    }
}

/// An immutable, type-erased subject or product
#[derive(Clone)]
pub struct Value {
    tag: TypeTag,
    inner: Arc<dyn DynValue>,
}

impl Value {
    /// Wrap a concrete value
    #[must_use]
    pub fn new<T: ValueType>(value: T) -> Self {
        Self {
            tag: TypeTag::of::<T>(),
            inner: Arc::new(value),
        }
    }

    /// Concrete runtime type of the wrapped value
    #[must_use]
    pub const fn type_tag(&self) -> TypeTag {
        self.tag
    }

    /// Check the concrete type
    #[must_use]
    pub fn is<T: Any>(&self) -> bool {
        self.tag.is::<T>()
    }

    /// Borrow the wrapped value if it is a `T`
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.as_any().downcast_ref::<T>()
    }

    /// Borrow the wrapped value as a `T`
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::TypeMismatch`] if the value is of another type
    pub fn try_as<T: Any>(&self) -> EngineResult<&T> {
        self.downcast_ref::<T>()
            .ok_or_else(|| EngineError::type_mismatch(TypeTag::of::<T>(), self.tag))
    }

    /// Clone the wrapped value out as a `T`
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::TypeMismatch`] if the value is of another type
    pub fn cloned<T: ValueType>(&self) -> EngineResult<T> {
        self.try_as::<T>().cloned()
    }

    /// Check whether both handles point at the same allocation
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.tag == other.tag && self.inner.dyn_eq(other.inner.as_any())
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.tag.hash(state);
        self.inner.dyn_hash(state);
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.inner, f)
    }
}
