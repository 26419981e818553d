//! Cache keys.

use std::fmt;

use crate::value::{TypeTag, Value};

/// Identity of a computation: a product type requested for a subject
///
/// Two requests with equal keys share one computation per run.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Key {
    product: TypeTag,
    subject: Value,
}

impl Key {
    /// Create a key
    #[must_use]
    pub const fn new(product: TypeTag, subject: Value) -> Self {
        Self { product, subject }
    }

    /// Requested product type
    #[must_use]
    pub const fn product(&self) -> TypeTag {
        self.product
    }

    /// Subject the product is computed for
    #[must_use]
    pub const fn subject(&self) -> &Value {
        &self.subject
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({:?})", self.product, self.subject)
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({self})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[derive(Debug, Clone, PartialEq, Eq, Hash)]
    struct Address(String);

    #[derive(Debug, Clone, PartialEq, Eq, Hash)]
    struct TestResult;

    #[derive(Debug, Clone, PartialEq, Eq, Hash)]
    struct Classpath;

    fn address(s: &str) -> Value {
        Value::new(Address(s.to_string()))
    }

    #[test]
    fn test_key_display() {
        let key = Key::new(TypeTag::of::<TestResult>(), address("src/app"));
        assert_eq!(key.to_string(), "TestResult(Address(\"src/app\"))");
    }

    #[test]
    fn test_key_identity() {
        let a = Key::new(TypeTag::of::<TestResult>(), address("src/app"));
        let b = Key::new(TypeTag::of::<TestResult>(), address("src/app"));
        let c = Key::new(TypeTag::of::<Classpath>(), address("src/app"));
        assert_eq!(a, b);
        assert_ne!(a, c);

        let mut map = HashMap::new();
        map.insert(a, 1);
        assert_eq!(map.get(&b), Some(&1));
        assert_eq!(map.get(&c), None);
    }
}
