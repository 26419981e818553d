//! SPIRE Core Types
//!
//! This crate contains pure types and logic with no I/O.
//! Subjects and products are type-erased values tagged with their concrete
//! type, so the engine can memoize and dispatch on them without knowing
//! the rule authors' types.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod exit;
pub mod id;
pub mod key;
pub mod value;

// Re-exports
pub use error::{EngineError, EngineResult};
pub use exit::ExitCode;
pub use id::RunId;
pub use key::Key;
pub use value::{TypeTag, Value, ValueType};
