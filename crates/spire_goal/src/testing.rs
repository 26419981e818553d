//! The built-in `test` goal.
//!
//! Test execution is reached through the `TestTarget` union: each hydrated
//! target carries an adaptor value, and whichever union member handles the
//! adaptor's concrete type runs its tests. The goal itself only aggregates.

use std::fmt;

use spire_core::{EngineResult, ExitCode, Value, ValueType};
use spire_rules::{CatalogBuilder, Get, Rule};
use tracing::debug;

use crate::driver::{Goal, GoalContext, GoalRule};

/// Width of the address column in the results table
const ADDRESS_WIDTH: usize = 80;
/// Width of the status column in the results table
const STATUS_WIDTH: usize = 10;

/// Build target address, e.g. `src/python/app:tests`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(String);

impl Address {
    /// Create an address
    #[must_use]
    pub fn new(spec: impl Into<String>) -> Self {
        Self(spec.into())
    }

    /// Address as written
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

/// Outcome of one target's tests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// Tests passed
    Success,
    /// Tests failed or could not run
    Failure,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
        })
    }
}

/// Result of running one target's tests
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TestResult {
    /// Pass or fail
    pub status: Status,
    /// Captured output of the test run
    pub stdout: String,
}

impl TestResult {
    /// Passing result
    #[must_use]
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            status: Status::Success,
            stdout: stdout.into(),
        }
    }

    /// Failing result
    #[must_use]
    pub fn failure(stdout: impl Into<String>) -> Self {
        Self {
            status: Status::Failure,
            stdout: stdout.into(),
        }
    }
}

/// Union of target adaptors that know how to run their tests
///
/// Never instantiated; only used as the subject type of a request.
#[derive(Debug)]
pub enum TestTarget {}

/// A target loaded from the build graph
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HydratedTarget {
    address: Address,
    adaptor: Value,
}

impl HydratedTarget {
    /// Wrap a typed adaptor
    #[must_use]
    pub fn new(address: Address, adaptor: impl ValueType) -> Self {
        Self::from_value(address, Value::new(adaptor))
    }

    /// Wrap an already erased adaptor
    #[must_use]
    pub const fn from_value(address: Address, adaptor: Value) -> Self {
        Self { address, adaptor }
    }

    /// Target address
    #[must_use]
    pub const fn address(&self) -> &Address {
        &self.address
    }

    /// Kind-specific adaptor
    #[must_use]
    pub const fn adaptor(&self) -> &Value {
        &self.adaptor
    }
}

/// Product of the `test` goal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Test {
    exit_code: ExitCode,
}

impl Test {
    /// Goal product carrying `exit_code`
    #[must_use]
    pub const fn new(exit_code: ExitCode) -> Self {
        Self { exit_code }
    }
}

impl Goal for Test {
    const NAME: &'static str = "test";

    fn exit_code(&self) -> ExitCode {
        self.exit_code
    }
}

/// `TestResult` for an address: hydrate the target, then test it
#[must_use]
pub fn test_result_for_address() -> Rule {
    Rule::builder::<TestResult, Address>("test_result_for_address")
        .get::<HydratedTarget, Address>()
        .get::<TestResult, HydratedTarget>()
        .body(|ctx, address: Address| async move {
            let target: HydratedTarget = ctx.get(Get::new::<HydratedTarget>(address)).await?;
            ctx.get::<TestResult>(Get::new::<TestResult>(target)).await
        })
}

/// `TestResult` for a hydrated target, dispatched on the adaptor through the
/// `TestTarget` union
///
/// An adaptor kind with no registered member fails with an unhandled type
/// error.
#[must_use]
pub fn coordinator_of_tests() -> Rule {
    Rule::builder::<TestResult, HydratedTarget>("coordinator_of_tests")
        .get::<TestResult, TestTarget>()
        .body(|ctx, target: HydratedTarget| async move {
            let get = Get::for_value::<TestResult>(target.adaptor().clone()).as_type::<TestTarget>();
            ctx.get::<TestResult>(get).await
        })
}

/// The `test` goal
#[must_use]
pub fn fast_test() -> GoalRule {
    GoalRule::console_rule::<Test, _, _>("Runs tests", |goal: GoalContext| async move {
        let gets = goal
            .roots()
            .iter()
            .map(|root| Get::for_value::<TestResult>(root.clone()))
            .collect();
        let outcomes = goal.rules().get_settled(gets).await;
        let results = settle(&goal, outcomes)?;
        Ok(Test::new(report(&goal, &results)))
    })
}

/// Declare the `TestResult` union and register the test rules
#[must_use]
pub fn register(builder: CatalogBuilder) -> CatalogBuilder {
    builder
        .union::<TestResult>()
        .rule(test_result_for_address())
        .rule(coordinator_of_tests())
}

/// Pair each root with its result; rule failures become failed results,
/// structural errors fail the goal
fn settle(
    goal: &GoalContext,
    outcomes: Vec<EngineResult<Value>>,
) -> EngineResult<Vec<(String, TestResult)>> {
    if let Some(err) = outcomes
        .iter()
        .filter_map(|outcome| outcome.as_ref().err())
        .find(|err| err.is_structural())
    {
        return Err(err.clone());
    }

    goal.roots()
        .iter()
        .zip(outcomes)
        .map(|(root, outcome)| -> EngineResult<(String, TestResult)> {
            let result = match outcome {
                Ok(value) => value.cloned::<TestResult>()?,
                Err(err) => {
                    debug!(root = ?root, error = %err, "test run failed");
                    goal.console().print_stderr(&err.to_string());
                    TestResult::failure(String::new())
                }
            };
            Ok((describe(root), result))
        })
        .collect()
}

/// Write captured output and the results table; returns the exit code
fn report(goal: &GoalContext, results: &[(String, TestResult)]) -> ExitCode {
    let console = goal.console();

    let mut wrote_any_stdout = false;
    for (_, result) in results {
        if result.stdout.is_empty() {
            continue;
        }
        wrote_any_stdout = true;
        console.write_stdout(&result.stdout);
        if !result.stdout.ends_with('\n') {
            console.write_stdout("\n");
        }
    }
    if wrote_any_stdout {
        console.write_stdout("\n");
    }

    for (address, result) in results {
        console.print_stdout(&format!(
            "{:address_width$}.....{:>status_width$}",
            address,
            result.status,
            address_width = ADDRESS_WIDTH,
            status_width = STATUS_WIDTH,
        ));
    }

    let any_failed = results
        .iter()
        .any(|(_, result)| result.status == Status::Failure);
    if any_failed {
        console.print_stderr("Tests failed");
    }
    ExitCode::from_success(!any_failed)
}

fn describe(root: &Value) -> String {
    root.downcast_ref::<Address>()
        .map_or_else(|| format!("{root:?}"), ToString::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use spire_core::EngineError;
    use spire_engine::{Coordinator, EngineConfig};
    use spire_rules::Catalog;

    use crate::console::BufferedConsole;
    use crate::driver::GoalDriver;

    #[derive(Debug, Clone, PartialEq, Eq, Hash)]
    struct PythonTests {
        passed: bool,
        stdout: String,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Hash)]
    struct Resources;

    fn hydrate_rule() -> Rule {
        Rule::builder::<HydratedTarget, Address>("hydrate").body(|_ctx, address: Address| async move {
            let name = address.as_str().to_string();
            if name.contains("slow") {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            if name.ends_with(":resources") {
                return Ok(HydratedTarget::new(address, Resources));
            }
            if name.ends_with(":broken") {
                return Err(EngineError::failed("BUILD file could not be parsed"));
            }
            let passed = !name.contains("failing");
            let stdout = if name.contains("quiet") {
                String::new()
            } else {
                format!("ran tests for {name}")
            };
            Ok(HydratedTarget::new(address, PythonTests { passed, stdout }))
        })
    }

    fn run_pytest() -> Rule {
        Rule::union_member::<TestResult, PythonTests>("run_pytest").body(|_ctx, tests: PythonTests| async move {
            Ok(if tests.passed {
                TestResult::success(tests.stdout)
            } else {
                TestResult::failure(tests.stdout)
            })
        })
    }

    fn driver() -> GoalDriver {
        let catalog = register(Catalog::builder())
            .rule(hydrate_rule())
            .rule(run_pytest())
            .build()
            .unwrap();
        let coordinator = Coordinator::new(Arc::new(catalog), EngineConfig::default());
        GoalDriver::new(coordinator).goal(fast_test()).unwrap()
    }

    fn roots(addresses: &[&str]) -> Vec<Value> {
        addresses
            .iter()
            .map(|address| Value::new(Address::new(*address)))
            .collect()
    }

    fn row(address: &str, status: &str) -> String {
        format!("{address:80}.....{status:>10}\n")
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_mixed_results_fail_in_root_order() {
        let console = Arc::new(BufferedConsole::new());
        let code = driver()
            .run(
                "test",
                roots(&["src/a:slow_quiet", "src/b:failing_quiet", "src/c:quiet"]),
                console.clone(),
            )
            .await
            .unwrap();

        assert_eq!(code, ExitCode::FAILURE);
        let expected = [
            row("src/a:slow_quiet", "SUCCESS"),
            row("src/b:failing_quiet", "FAILURE"),
            row("src/c:quiet", "SUCCESS"),
        ]
        .concat();
        assert_eq!(console.stdout(), expected);
        assert_eq!(console.stderr(), "Tests failed\n");
    }

    #[tokio::test]
    async fn test_all_success() {
        let console = Arc::new(BufferedConsole::new());
        let code = driver()
            .run("test", roots(&["src/a:quiet", "src/b:quiet", "src/c:quiet"]), console.clone())
            .await
            .unwrap();

        assert_eq!(code, ExitCode::SUCCESS);
        assert_eq!(console.stdout().lines().count(), 3);
        assert!(console.stderr().is_empty());
    }

    #[tokio::test]
    async fn test_stdout_written_before_table() {
        let console = Arc::new(BufferedConsole::new());
        let code = driver()
            .run("test", roots(&["src/a:slow", "src/b", "src/c:quiet"]), console.clone())
            .await
            .unwrap();

        assert_eq!(code, ExitCode::SUCCESS);
        let expected = [
            "ran tests for src/a:slow\n".to_string(),
            "ran tests for src/b\n".to_string(),
            "\n".to_string(),
            row("src/a:slow", "SUCCESS"),
            row("src/b", "SUCCESS"),
            row("src/c:quiet", "SUCCESS"),
        ]
        .concat();
        assert_eq!(console.stdout(), expected);
    }

    #[tokio::test]
    async fn test_rule_failure_reported_as_failure() {
        let console = Arc::new(BufferedConsole::new());
        let code = driver()
            .run("test", roots(&["src/a:quiet", "src/b:broken"]), console.clone())
            .await
            .unwrap();

        assert_eq!(code, ExitCode::FAILURE);
        assert!(console.stdout().contains(&row("src/b:broken", "FAILURE")));
        let stderr = console.stderr();
        assert!(stderr.contains("BUILD file could not be parsed"));
        assert!(stderr.ends_with("Tests failed\n"));
    }

    #[tokio::test]
    async fn test_adaptor_outside_union_fails_goal() {
        let console = Arc::new(BufferedConsole::new());
        let err = driver()
            .run("test", roots(&["src/a:quiet", "src/r:resources"]), console.clone())
            .await
            .unwrap_err();

        assert_eq!(
            err,
            EngineError::UnhandledType {
                capability: "TestResult".to_string(),
                subject_type: "Resources".to_string(),
            }
        );
        assert!(console.stdout().is_empty());
    }

    #[test]
    fn test_status_display_pads() {
        assert_eq!(format!("{:>10}", Status::Success), "   SUCCESS");
        assert_eq!(format!("{:<8}|", Address::new("a:b")), "a:b     |");
    }
}
