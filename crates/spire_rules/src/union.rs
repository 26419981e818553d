//! Union capability dispatch.
//!
//! A union capability is a product type implemented by several member rules,
//! one per concrete subject type. The resolver is a dispatch table built once
//! from the catalog's registrations and picks the member by the subject's
//! runtime [`TypeTag`].

use indexmap::{IndexMap, IndexSet};
use spire_core::{EngineError, EngineResult, TypeTag, Value};

use crate::rule::{Rule, RuleKind};

/// Dispatch table: capability -> concrete subject type -> member rules
#[derive(Debug, Clone, Default)]
pub struct UnionResolver {
    capabilities: IndexSet<TypeTag>,
    members: IndexMap<TypeTag, IndexMap<TypeTag, Vec<Rule>>>,
}

impl UnionResolver {
    /// Create an empty resolver
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare `capability` as a union
    pub fn declare(&mut self, capability: TypeTag) {
        self.capabilities.insert(capability);
        self.members.entry(capability).or_default();
    }

    /// Add a member rule
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the rule is not a union member or its
    /// capability was never declared
    pub fn add_member(&mut self, rule: Rule) -> EngineResult<()> {
        let RuleKind::UnionMember { capability } = rule.kind() else {
            return Err(EngineError::configuration(format!(
                "rule {} is not a union member",
                rule.name()
            )));
        };
        if !self.capabilities.contains(&capability) {
            return Err(EngineError::configuration(format!(
                "rule {} is a member of {}, which is not declared as a union",
                rule.name(),
                capability
            )));
        }
        self.members
            .entry(capability)
            .or_default()
            .entry(rule.subject())
            .or_default()
            .push(rule);
        Ok(())
    }

    /// Check whether `product` is a declared union capability
    #[must_use]
    pub fn is_union(&self, product: TypeTag) -> bool {
        self.capabilities.contains(&product)
    }

    /// Declared capabilities, in declaration order
    pub fn capabilities(&self) -> impl Iterator<Item = TypeTag> + '_ {
        self.capabilities.iter().copied()
    }

    /// Members of `capability`, in registration order
    pub fn members(&self, capability: TypeTag) -> impl Iterator<Item = &Rule> + '_ {
        self.members
            .get(&capability)
            .into_iter()
            .flat_map(|by_type| by_type.values().flatten())
    }

    /// Pick the member of `capability` for the subject's concrete type
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnhandledType`] when no member matches, and
    /// [`EngineError::AmbiguousUnion`] when several do
    pub fn resolve(&self, capability: TypeTag, subject: &Value) -> EngineResult<&Rule> {
        let concrete = subject.type_tag();
        let candidates = self
            .members
            .get(&capability)
            .and_then(|by_type| by_type.get(&concrete))
            .map(Vec::as_slice)
            .unwrap_or_default();

        match candidates {
            [] => Err(EngineError::unhandled_type(capability, concrete)),
            [rule] => Ok(rule),
            many => Err(Self::ambiguous(capability, concrete, many)),
        }
    }

    /// Report every (capability, concrete type) pair with more than one member
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::AmbiguousUnion`] for the first ambiguous pair
    pub fn validate(&self) -> EngineResult<()> {
        for (capability, by_type) in &self.members {
            for (concrete, rules) in by_type {
                if rules.len() > 1 {
                    return Err(Self::ambiguous(*capability, *concrete, rules));
                }
            }
        }
        Ok(())
    }

    fn ambiguous(capability: TypeTag, concrete: TypeTag, rules: &[Rule]) -> EngineError {
        EngineError::AmbiguousUnion {
            capability: capability.to_string(),
            subject_type: concrete.to_string(),
            candidates: rules.iter().map(|rule| rule.name().to_string()).collect(),
        }
    }
}
