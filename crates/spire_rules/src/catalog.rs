//! Immutable rule catalog.
//!
//! The catalog is built once, validated eagerly, and then shared read-only by
//! every resolution of a run. Direct rules are indexed by their exact
//! (product, subject type) signature; union members live in the
//! [`UnionResolver`].

use indexmap::{IndexMap, IndexSet};
use spire_core::{EngineError, EngineResult, TypeTag, ValueType};
use tracing::{debug, warn};

use crate::get::{Get, GetSignature};
use crate::rule::Rule;
use crate::union::UnionResolver;

/// Collects registrations before validation
#[derive(Debug, Default)]
pub struct CatalogBuilder {
    unions: IndexSet<TypeTag>,
    rules: Vec<Rule>,
}

impl CatalogBuilder {
    /// Create an empty builder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare `C` as a union capability
    #[must_use]
    pub fn union<C: ValueType>(mut self) -> Self {
        self.unions.insert(TypeTag::of::<C>());
        self
    }

    /// Register a rule or union member
    #[must_use]
    pub fn rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Register several rules
    #[must_use]
    pub fn rules(mut self, rules: impl IntoIterator<Item = Rule>) -> Self {
        self.rules.extend(rules);
        self
    }

    /// Validate all registrations and freeze them into a [`Catalog`]
    ///
    /// # Errors
    ///
    /// - [`EngineError::Configuration`] for duplicate direct signatures,
    ///   members of undeclared unions, and declared requests nothing can satisfy
    /// - [`EngineError::AmbiguousUnion`] for two members of one union handling
    ///   the same concrete type
    pub fn build(self) -> EngineResult<Catalog> {
        let mut direct: IndexMap<GetSignature, Rule> = IndexMap::new();
        let mut unions = UnionResolver::new();
        for capability in &self.unions {
            unions.declare(*capability);
        }

        for rule in self.rules {
            if rule.is_union_member() {
                unions.add_member(rule)?;
                continue;
            }
            let signature = rule.signature();
            if let Some(existing) = direct.get(&signature) {
                return Err(EngineError::configuration(format!(
                    "rules {} and {} both compute {} for {}",
                    existing.name(),
                    rule.name(),
                    signature.product,
                    signature.subject
                )));
            }
            direct.insert(signature, rule);
        }

        unions.validate()?;

        let catalog = Catalog { direct, unions };
        catalog.validate_gets()?;

        for capability in catalog.unions.capabilities() {
            if catalog.unions.members(capability).next().is_none() {
                warn!(capability = %capability, "union has no members");
            }
        }
        debug!(
            rules = catalog.direct.len(),
            unions = catalog.unions.capabilities().count(),
            "rule catalog built"
        );

        Ok(catalog)
    }
}

/// Validated, immutable registry of rules
#[derive(Debug, Clone)]
pub struct Catalog {
    direct: IndexMap<GetSignature, Rule>,
    unions: UnionResolver,
}

impl Catalog {
    /// Start building a catalog
    #[must_use]
    pub fn builder() -> CatalogBuilder {
        CatalogBuilder::new()
    }

    /// Direct rule for an exact (product, subject type) signature
    #[must_use]
    pub fn lookup(&self, product: TypeTag, subject_type: TypeTag) -> Option<&Rule> {
        self.direct.get(&GetSignature::new(product, subject_type))
    }

    /// Rule that will compute `get`
    ///
    /// Exact signature first (using the explicit subject type when given),
    /// then union dispatch on the subject's runtime type.
    ///
    /// # Errors
    ///
    /// - [`EngineError::NoRule`] when nothing matches and the product is not a union
    /// - [`EngineError::UnhandledType`] / [`EngineError::AmbiguousUnion`] from union dispatch
    pub fn select(&self, get: &Get) -> EngineResult<&Rule> {
        let subject_type = get.subject_type();
        if let Some(rule) = self.lookup(get.product(), subject_type) {
            return Ok(rule);
        }
        if self.unions.is_union(get.product()) {
            return self.unions.resolve(get.product(), get.subject());
        }
        Err(EngineError::no_rule(get.product(), subject_type))
    }

    /// Check whether `product` is a union capability
    #[must_use]
    pub fn is_union(&self, product: TypeTag) -> bool {
        self.unions.is_union(product)
    }

    /// Union dispatch table
    #[must_use]
    pub const fn unions(&self) -> &UnionResolver {
        &self.unions
    }

    /// All rules: direct rules in registration order, then union members
    pub fn rules(&self) -> impl Iterator<Item = &Rule> + '_ {
        self.direct.values().chain(
            self.unions
                .capabilities()
                .flat_map(move |capability| self.unions.members(capability)),
        )
    }

    /// Number of registered rules, union members included
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules().count()
    }

    /// Check if no rules are registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every declared request must be satisfiable by a direct rule or a union
    fn validate_gets(&self) -> EngineResult<()> {
        for rule in self.rules() {
            for signature in rule.gets() {
                let satisfiable = self.direct.contains_key(signature)
                    || self.unions.is_union(signature.product);
                if !satisfiable {
                    return Err(EngineError::configuration(format!(
                        "rule {} declares {} but no rule computes {} for {}",
                        rule.name(),
                        signature,
                        signature.product,
                        signature.subject
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spire_core::Value;

    #[derive(Debug, Clone, PartialEq, Eq, Hash)]
    struct Address(String);

    #[derive(Debug, Clone, PartialEq, Eq, Hash)]
    struct HydratedTarget(String);

    #[derive(Debug, Clone, PartialEq, Eq, Hash)]
    struct TestResult(bool);

    #[derive(Debug, Clone, PartialEq, Eq, Hash)]
    struct PythonTests;

    #[derive(Debug, Clone, PartialEq, Eq, Hash)]
    struct Classpath;

    struct TestTarget;

    fn hydrate(name: &str) -> Rule {
        Rule::builder::<HydratedTarget, Address>(name)
            .body(|_ctx, address: Address| async move { Ok(HydratedTarget(address.0)) })
    }

    fn pytest() -> Rule {
        Rule::union_member::<TestResult, PythonTests>("run_pytest")
            .body(|_ctx, _tests: PythonTests| async move { Ok(TestResult(true)) })
    }

    fn coordinator_of_tests() -> Rule {
        Rule::builder::<TestResult, HydratedTarget>("coordinator_of_tests")
            .get::<TestResult, TestTarget>()
            .body(|_ctx, _target: HydratedTarget| async move { Ok(TestResult(true)) })
    }

    #[test]
    fn test_build_and_lookup() {
        let catalog = Catalog::builder().rule(hydrate("hydrate")).build().unwrap();
        let rule = catalog
            .lookup(TypeTag::of::<HydratedTarget>(), TypeTag::of::<Address>())
            .unwrap();
        assert_eq!(rule.name(), "hydrate");
        assert!(catalog
            .lookup(TypeTag::of::<Classpath>(), TypeTag::of::<Address>())
            .is_none());
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn test_duplicate_signature_rejected() {
        let err = Catalog::builder()
            .rule(hydrate("hydrate_a"))
            .rule(hydrate("hydrate_b"))
            .build()
            .unwrap_err();
        match err {
            EngineError::Configuration { reason } => {
                assert!(reason.contains("hydrate_a"));
                assert!(reason.contains("hydrate_b"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_select_direct_then_union() {
        let catalog = Catalog::builder()
            .union::<TestResult>()
            .rule(pytest())
            .rule(coordinator_of_tests())
            .build()
            .unwrap();

        let direct = catalog
            .select(&Get::new::<TestResult>(HydratedTarget("a".to_string())))
            .unwrap();
        assert_eq!(direct.name(), "coordinator_of_tests");

        let cast = Get::new::<TestResult>(PythonTests).as_type::<TestTarget>();
        assert_eq!(catalog.select(&cast).unwrap().name(), "run_pytest");

        let plain = Get::new::<TestResult>(PythonTests);
        assert_eq!(catalog.select(&plain).unwrap().name(), "run_pytest");
    }

    #[test]
    fn test_select_no_rule() {
        let catalog = Catalog::builder().rule(hydrate("hydrate")).build().unwrap();
        let err = catalog
            .select(&Get::new::<Classpath>(Address("a".to_string())))
            .unwrap_err();
        assert_eq!(
            err,
            EngineError::NoRule {
                product: "Classpath".to_string(),
                subject_type: "Address".to_string(),
            }
        );
    }

    #[test]
    fn test_select_union_unhandled_type() {
        let catalog = Catalog::builder()
            .union::<TestResult>()
            .rule(pytest())
            .build()
            .unwrap();
        let err = catalog
            .select(&Get::for_value::<TestResult>(Value::new(Address("a".to_string()))))
            .unwrap_err();
        assert!(matches!(err, EngineError::UnhandledType { .. }));
    }

    #[test]
    fn test_ambiguous_union_rejected_at_build() {
        let err = Catalog::builder()
            .union::<TestResult>()
            .rule(pytest())
            .rule(pytest())
            .build()
            .unwrap_err();
        assert!(matches!(err, EngineError::AmbiguousUnion { .. }));
    }

    #[test]
    fn test_member_of_undeclared_union_rejected() {
        let err = Catalog::builder().rule(pytest()).build().unwrap_err();
        assert!(matches!(err, EngineError::Configuration { .. }));
    }

    #[test]
    fn test_unsatisfiable_declared_get_rejected() {
        let rule = Rule::builder::<Classpath, Address>("classpath")
            .get::<HydratedTarget, Address>()
            .body(|_ctx, _address: Address| async move { Ok(Classpath) });
        let err = Catalog::builder().rule(rule).build().unwrap_err();
        match err {
            EngineError::Configuration { reason } => {
                assert!(reason.contains("Get(HydratedTarget, Address)"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_rules_listing_order() {
        let catalog = Catalog::builder()
            .union::<TestResult>()
            .rule(pytest())
            .rule(hydrate("hydrate"))
            .rule(coordinator_of_tests())
            .build()
            .unwrap();
        let names: Vec<&str> = catalog.rules().map(Rule::name).collect();
        assert_eq!(names, vec!["hydrate", "coordinator_of_tests", "run_pytest"]);
    }
}
