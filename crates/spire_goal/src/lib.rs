//! SPIRE Goals
//!
//! Top-level entry points of a run. A goal requests the products it needs
//! for every root subject, reports them on the console in root order, and
//! reduces the outcome to a single exit code.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod console;
pub mod driver;
pub mod testing;

pub use console::{BufferedConsole, Console, StdConsole};
pub use driver::{Goal, GoalBody, GoalContext, GoalDriver, GoalFuture, GoalRule};
pub use testing::{Address, HydratedTarget, Status, Test, TestResult, TestTarget};
