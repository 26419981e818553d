//! SPIRE Rules
//!
//! Rule registration, the immutable rule catalog, union dispatch, and the
//! request protocol rule bodies use to ask the engine for their inputs.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod catalog;
pub mod context;
pub mod get;
pub mod rule;
pub mod union;

pub use catalog::{Catalog, CatalogBuilder};
pub use context::{Resolve, RuleContext};
pub use get::{Get, GetSignature};
pub use rule::{Rule, RuleBody, RuleBuilder, RuleFuture, RuleKind};
pub use union::UnionResolver;
