//! Target manifests.
//!
//! A manifest is a JSON file listing the targets of a workspace and what
//! running their tests yields. It stands in for the build graph and the
//! process sandbox: hydration reads the manifest instead of BUILD files,
//! and the test members return the recorded outcome instead of spawning
//! a test runner.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use color_eyre::Result;
use color_eyre::eyre::{WrapErr, bail};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use spire_core::{EngineError, Value};
use spire_goal::testing;
use spire_goal::{Address, HydratedTarget, TestResult};
use spire_rules::{Catalog, Rule};

/// Kind of a target, selecting its adaptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    /// Python test sources run with pytest
    PythonTests,
    /// Java test sources run with JUnit
    JunitTests,
    /// Plain resources; nothing to test
    Resources,
}

/// One target entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSpec {
    /// Target address
    pub address: String,
    /// Target kind
    pub kind: TargetKind,
    /// Whether the recorded test run passed
    #[serde(default = "default_passed")]
    pub passed: bool,
    /// Recorded test output
    #[serde(default)]
    pub stdout: String,
}

const fn default_passed() -> bool {
    true
}

/// Recorded outcome of a test run
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Recorded {
    passed: bool,
    stdout: String,
}

impl Recorded {
    fn result(&self) -> TestResult {
        if self.passed {
            TestResult::success(self.stdout.clone())
        } else {
            TestResult::failure(self.stdout.clone())
        }
    }
}

/// Adaptor of a `python_tests` target
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PythonTests(Recorded);

/// Adaptor of a `junit_tests` target
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JunitTests(Recorded);

/// Adaptor of a `resources` target
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Resources;

/// Parsed manifest
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Manifest {
    /// Targets, in file order
    pub targets: Vec<TargetSpec>,
}

impl Manifest {
    /// Read and validate a manifest file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not a valid manifest,
    /// or lists an address twice
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .wrap_err_with(|| format!("failed to read manifest {}", path.display()))?;
        let manifest: Self = serde_json::from_str(&text)
            .wrap_err_with(|| format!("failed to parse manifest {}", path.display()))?;
        manifest.index()?;
        Ok(manifest)
    }

    /// Root subjects for `addresses`, or for every target when none are given
    ///
    /// # Errors
    ///
    /// Returns an error for an address the manifest does not list
    pub fn roots(&self, addresses: &[String]) -> Result<Vec<Value>> {
        if addresses.is_empty() {
            return Ok(self
                .targets
                .iter()
                .map(|target| Value::new(Address::new(target.address.clone())))
                .collect());
        }
        let index = self.index()?;
        addresses
            .iter()
            .map(|address| {
                let address = Address::new(address.clone());
                if !index.contains_key(&address) {
                    bail!("no target {address} in manifest");
                }
                Ok(Value::new(address))
            })
            .collect()
    }

    /// Rule catalog for this manifest: the test rules, hydration from the
    /// manifest, and one test member per testable kind
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog does not validate
    pub fn catalog(&self) -> Result<Catalog> {
        let catalog = testing::register(Catalog::builder())
            .rule(hydrate_target(Arc::new(self.index()?)))
            .rule(run_python_tests())
            .rule(run_junit_tests())
            .build()?;
        Ok(catalog)
    }

    fn index(&self) -> Result<IndexMap<Address, TargetSpec>> {
        let mut index = IndexMap::with_capacity(self.targets.len());
        for target in &self.targets {
            let address = Address::new(target.address.clone());
            if index.insert(address, target.clone()).is_some() {
                bail!("target {} is listed twice", target.address);
            }
        }
        Ok(index)
    }
}

fn hydrate_target(targets: Arc<IndexMap<Address, TargetSpec>>) -> Rule {
    Rule::builder::<HydratedTarget, Address>("hydrate_target").body(move |_ctx, address: Address| {
        let found = targets.get(&address).cloned();
        async move {
            let target = found.ok_or_else(|| EngineError::failed(format!("no target at {address}")))?;
            Ok(adapt(address, &target))
        }
    })
}

fn adapt(address: Address, target: &TargetSpec) -> HydratedTarget {
    let recorded = Recorded {
        passed: target.passed,
        stdout: target.stdout.clone(),
    };
    match target.kind {
        TargetKind::PythonTests => HydratedTarget::new(address, PythonTests(recorded)),
        TargetKind::JunitTests => HydratedTarget::new(address, JunitTests(recorded)),
        TargetKind::Resources => HydratedTarget::new(address, Resources),
    }
}

fn run_python_tests() -> Rule {
    Rule::union_member::<TestResult, PythonTests>("run_python_tests")
        .body(|_ctx, tests: PythonTests| async move { Ok::<_, EngineError>(tests.0.result()) })
}

fn run_junit_tests() -> Rule {
    Rule::union_member::<TestResult, JunitTests>("run_junit_tests")
        .body(|_ctx, tests: JunitTests| async move { Ok::<_, EngineError>(tests.0.result()) })
}
