//! Rule registrations.
//!
//! A rule is a named, suspendable computation of one product type from one
//! subject type. Bodies are async closures: every `.await` on a request made
//! through the [`RuleContext`] is a point where the engine parks the body until
//! the requested inputs exist.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use spire_core::{EngineError, EngineResult, TypeTag, Value, ValueType};

use crate::context::RuleContext;
use crate::get::GetSignature;

/// Future returned by a type-erased rule body
pub type RuleFuture = BoxFuture<'static, EngineResult<Value>>;

/// Type-erased rule body
pub type RuleBody = Arc<dyn Fn(RuleContext, Value) -> RuleFuture + Send + Sync>;

/// How a rule is found by the catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleKind {
    /// Looked up by exact (product, subject type) signature
    Direct,
    /// Implements a union capability for one concrete subject type
    UnionMember {
        /// The union capability (also the rule's product type)
        capability: TypeTag,
    },
}

/// A registered rule
#[derive(Clone)]
pub struct Rule {
    name: Arc<str>,
    product: TypeTag,
    subject: TypeTag,
    kind: RuleKind,
    gets: Arc<[GetSignature]>,
    body: RuleBody,
}

impl Rule {
    /// Start building a rule computing a `P` from an `S`
    #[must_use]
    pub fn builder<P: ValueType, S: ValueType>(name: impl Into<String>) -> RuleBuilder<P, S> {
        RuleBuilder::new(name.into(), RuleKind::Direct)
    }

    /// Start building a member of the union capability `C` for subjects of type `S`
    #[must_use]
    pub fn union_member<C: ValueType, S: ValueType>(name: impl Into<String>) -> RuleBuilder<C, S> {
        RuleBuilder::new(
            name.into(),
            RuleKind::UnionMember {
                capability: TypeTag::of::<C>(),
            },
        )
    }

    /// Rule name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Shared rule name
    #[must_use]
    pub fn shared_name(&self) -> Arc<str> {
        Arc::clone(&self.name)
    }

    /// Product type
    #[must_use]
    pub const fn product(&self) -> TypeTag {
        self.product
    }

    /// Subject type
    #[must_use]
    pub const fn subject(&self) -> TypeTag {
        self.subject
    }

    /// Registration kind
    #[must_use]
    pub const fn kind(&self) -> RuleKind {
        self.kind
    }

    /// Whether this rule is a union member
    #[must_use]
    pub const fn is_union_member(&self) -> bool {
        matches!(self.kind, RuleKind::UnionMember { .. })
    }

    /// (product, subject type) signature
    #[must_use]
    pub const fn signature(&self) -> GetSignature {
        GetSignature::new(self.product, self.subject)
    }

    /// Requests this rule declares it may issue
    #[must_use]
    pub fn gets(&self) -> &[GetSignature] {
        &self.gets
    }

    /// Shared declared requests
    #[must_use]
    pub fn shared_gets(&self) -> Arc<[GetSignature]> {
        Arc::clone(&self.gets)
    }

    /// Check whether a request signature was declared
    #[must_use]
    pub fn declares(&self, signature: &GetSignature) -> bool {
        self.gets.contains(signature)
    }

    /// Start the rule body for `subject`
    #[must_use]
    pub fn invoke(&self, ctx: RuleContext, subject: Value) -> RuleFuture {
        (self.body)(ctx, subject)
    }
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule")
            .field("name", &self.name)
            .field("product", &self.product)
            .field("subject", &self.subject)
            .field("kind", &self.kind)
            .field("gets", &self.gets)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            RuleKind::Direct => write!(f, "{} ({} <- {})", self.name, self.product, self.subject),
            RuleKind::UnionMember { capability } => write!(
                f,
                "{} ({} <- {}, union member of {})",
                self.name, self.product, self.subject, capability
            ),
        }
    }
}

/// Typed builder for [`Rule`]
pub struct RuleBuilder<P, S> {
    name: String,
    kind: RuleKind,
    gets: Vec<GetSignature>,
    _marker: PhantomData<fn(S) -> P>,
}

impl<P: ValueType, S: ValueType> RuleBuilder<P, S> {
    fn new(name: String, kind: RuleKind) -> Self {
        Self {
            name,
            kind,
            gets: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// Declare that the body may request a `GP` for a subject looked up as `GS`
    #[must_use]
    pub fn get<GP: Any, GS: Any>(mut self) -> Self {
        let signature = GetSignature::of::<GP, GS>();
        if !self.gets.contains(&signature) {
            self.gets.push(signature);
        }
        self
    }

    /// Finish the rule with its body
    pub fn body<F, Fut>(self, body: F) -> Rule
    where
        F: Fn(RuleContext, S) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = EngineResult<P>> + Send + 'static,
    {
        let body = Arc::new(body);
        let erased: RuleBody = Arc::new(move |ctx: RuleContext, subject: Value| -> RuleFuture {
            let body = Arc::clone(&body);
            async move {
                let subject = subject.cloned::<S>()?;
                let product = (*body)(ctx, subject).await?;
                Ok::<_, EngineError>(Value::new(product))
            }
            .boxed()
        });

        Rule {
            name: Arc::from(self.name),
            product: TypeTag::of::<P>(),
            subject: TypeTag::of::<S>(),
            kind: self.kind,
            gets: Arc::from(self.gets),
            body: erased,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq, Hash)]
    struct Address(String);

    #[derive(Debug, Clone, PartialEq, Eq, Hash)]
    struct Classpath(Vec<String>);

    #[derive(Debug, Clone, PartialEq, Eq, Hash)]
    struct Sources(Vec<String>);

    fn classpath_rule() -> Rule {
        Rule::builder::<Classpath, Address>("classpath")
            .get::<Sources, Address>()
            .get::<Sources, Address>()
            .body(|_ctx, address: Address| async move { Ok(Classpath(vec![address.0])) })
    }

    #[test]
    fn test_builder_records_signature() {
        let rule = classpath_rule();
        assert_eq!(rule.name(), "classpath");
        assert_eq!(rule.signature(), GetSignature::of::<Classpath, Address>());
        assert_eq!(rule.kind(), RuleKind::Direct);
        assert!(!rule.is_union_member());
    }

    #[test]
    fn test_builder_dedups_declared_gets() {
        let rule = classpath_rule();
        assert_eq!(rule.gets(), &[GetSignature::of::<Sources, Address>()]);
        assert!(rule.declares(&GetSignature::of::<Sources, Address>()));
        assert!(!rule.declares(&GetSignature::of::<Classpath, Address>()));
    }

    #[test]
    fn test_union_member_kind() {
        let rule = Rule::union_member::<Classpath, Sources>("sources_classpath")
            .body(|_ctx, sources: Sources| async move { Ok(Classpath(sources.0)) });
        assert!(rule.is_union_member());
        assert_eq!(
            rule.kind(),
            RuleKind::UnionMember {
                capability: TypeTag::of::<Classpath>()
            }
        );
        assert!(rule.to_string().contains("union member of Classpath"));
    }
}
