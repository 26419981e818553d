//! Requests issued by rule bodies.

use std::any::Any;
use std::fmt;

use spire_core::{Key, TypeTag, Value, ValueType};

/// A request for `product` computed from `subject`
///
/// The optional explicit subject type is used for rule lookup in place of the
/// subject's runtime type, e.g. to route a concrete target through a union
/// capability. It is not part of the cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Get {
    product: TypeTag,
    subject: Value,
    subject_type: Option<TypeTag>,
}

impl Get {
    /// Request a `P` for a concrete subject
    #[must_use]
    pub fn new<P: Any>(subject: impl ValueType) -> Self {
        Self::for_value::<P>(Value::new(subject))
    }

    /// Request a `P` for an already type-erased subject
    #[must_use]
    pub fn for_value<P: Any>(subject: Value) -> Self {
        Self::from_parts(TypeTag::of::<P>(), subject)
    }

    /// Request from raw parts
    #[must_use]
    pub const fn from_parts(product: TypeTag, subject: Value) -> Self {
        Self {
            product,
            subject,
            subject_type: None,
        }
    }

    /// Look up rules as if the subject were a `T`
    #[must_use]
    pub fn as_type<T: Any>(mut self) -> Self {
        self.subject_type = Some(TypeTag::of::<T>());
        self
    }

    /// Requested product type
    #[must_use]
    pub const fn product(&self) -> TypeTag {
        self.product
    }

    /// Subject value
    #[must_use]
    pub const fn subject(&self) -> &Value {
        &self.subject
    }

    /// Explicit subject type, if any
    #[must_use]
    pub const fn explicit_subject_type(&self) -> Option<TypeTag> {
        self.subject_type
    }

    /// Subject type used for rule lookup: the explicit one, else the runtime type
    #[must_use]
    pub fn subject_type(&self) -> TypeTag {
        self.subject_type.unwrap_or_else(|| self.subject.type_tag())
    }

    /// Signature this request is checked against
    #[must_use]
    pub fn signature(&self) -> GetSignature {
        GetSignature::new(self.product, self.subject_type())
    }

    /// Cache key of the requested computation
    #[must_use]
    pub fn key(&self) -> Key {
        Key::new(self.product, self.subject.clone())
    }
}

/// Declared shape of a request: product type and subject type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GetSignature {
    /// Product type
    pub product: TypeTag,
    /// Subject type
    pub subject: TypeTag,
}

impl GetSignature {
    /// Create a signature
    #[must_use]
    pub const fn new(product: TypeTag, subject: TypeTag) -> Self {
        Self { product, subject }
    }

    /// Signature for a `P` computed from an `S`
    #[must_use]
    pub fn of<P: Any, S: Any>() -> Self {
        Self::new(TypeTag::of::<P>(), TypeTag::of::<S>())
    }
}

impl fmt::Display for GetSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Get({}, {})", self.product, self.subject)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq, Hash)]
    struct Address(String);

    #[derive(Debug, Clone, PartialEq, Eq, Hash)]
    struct TestResult;

    struct TestTarget;

    #[test]
    fn test_get_uses_runtime_type() {
        let get = Get::new::<TestResult>(Address("src/app".to_string()));
        assert_eq!(get.product(), TypeTag::of::<TestResult>());
        assert_eq!(get.subject_type(), TypeTag::of::<Address>());
        assert_eq!(get.explicit_subject_type(), None);
        assert_eq!(get.signature(), GetSignature::of::<TestResult, Address>());
    }

    #[test]
    fn test_get_explicit_type_overrides_lookup_not_key() {
        let plain = Get::new::<TestResult>(Address("src/app".to_string()));
        let cast = plain.clone().as_type::<TestTarget>();
        assert_eq!(cast.subject_type(), TypeTag::of::<TestTarget>());
        assert_eq!(cast.signature(), GetSignature::of::<TestResult, TestTarget>());
        assert_eq!(plain.key(), cast.key());
    }

    #[test]
    fn test_signature_display() {
        let sig = GetSignature::of::<TestResult, Address>();
        assert_eq!(sig.to_string(), "Get(TestResult, Address)");
    }
}
