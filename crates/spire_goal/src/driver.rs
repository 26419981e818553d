//! Goal driver.
//!
//! Goals are console rules: async bodies that receive the console, the root
//! subjects of the invocation, and a [`RuleContext`] for issuing requests.
//! The driver looks a goal up by name, runs it under a run span, and hands
//! back its exit code.

use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use indexmap::IndexMap;
use spire_core::{EngineError, EngineResult, ExitCode, Value, ValueType};
use spire_engine::Coordinator;
use spire_rules::RuleContext;
use tracing::{Instrument, error, info, info_span};

use crate::console::Console;

/// Future returned by a type-erased goal body
pub type GoalFuture = BoxFuture<'static, EngineResult<ExitCode>>;

/// Type-erased goal body
pub type GoalBody = Arc<dyn Fn(GoalContext) -> GoalFuture + Send + Sync>;

/// Product of a goal's console rule
pub trait Goal: ValueType {
    /// Name the goal is invoked by
    const NAME: &'static str;

    /// Exit code the run should end with
    fn exit_code(&self) -> ExitCode;
}

/// Everything a goal body can reach
#[derive(Clone)]
pub struct GoalContext {
    console: Arc<dyn Console>,
    roots: Arc<[Value]>,
    rules: RuleContext,
}

impl GoalContext {
    /// Create a context
    #[must_use]
    pub fn new(console: Arc<dyn Console>, roots: Vec<Value>, rules: RuleContext) -> Self {
        Self {
            console,
            roots: Arc::from(roots),
            rules,
        }
    }

    /// Console to report on
    #[must_use]
    pub fn console(&self) -> &dyn Console {
        &*self.console
    }

    /// Root subjects, in invocation order
    #[must_use]
    pub fn roots(&self) -> &[Value] {
        &self.roots
    }

    /// Request handle
    #[must_use]
    pub const fn rules(&self) -> &RuleContext {
        &self.rules
    }
}

impl std::fmt::Debug for GoalContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoalContext")
            .field("roots", &self.roots)
            .finish_non_exhaustive()
    }
}

/// A named goal
#[derive(Clone)]
pub struct GoalRule {
    name: String,
    description: String,
    body: GoalBody,
}

impl GoalRule {
    /// Goal from an erased body
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>, body: GoalBody) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            body,
        }
    }

    /// Goal whose body produces the goal product `G`
    pub fn console_rule<G, F, Fut>(description: impl Into<String>, body: F) -> Self
    where
        G: Goal,
        F: Fn(GoalContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = EngineResult<G>> + Send + 'static,
    {
        let body = Arc::new(body);
        let erased: GoalBody = Arc::new(move |ctx: GoalContext| -> GoalFuture {
            let body = Arc::clone(&body);
            async move {
                let goal = (*body)(ctx).await?;
                Ok::<_, EngineError>(goal.exit_code())
            }
            .boxed()
        });
        Self::new(G::NAME, description, erased)
    }

    /// Goal name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// One-line description
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }
}

impl std::fmt::Debug for GoalRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoalRule")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// Runs goals against one coordinator
#[derive(Debug)]
pub struct GoalDriver {
    coordinator: Coordinator,
    goals: IndexMap<String, GoalRule>,
}

impl GoalDriver {
    /// Create a driver with no goals
    #[must_use]
    pub fn new(coordinator: Coordinator) -> Self {
        Self {
            coordinator,
            goals: IndexMap::new(),
        }
    }

    /// Register a goal
    ///
    /// # Errors
    ///
    /// Returns a configuration error if a goal with the same name exists
    pub fn goal(mut self, goal: GoalRule) -> EngineResult<Self> {
        if self.goals.contains_key(goal.name()) {
            return Err(EngineError::configuration(format!(
                "goal {} is registered twice",
                goal.name()
            )));
        }
        self.goals.insert(goal.name().to_string(), goal);
        Ok(self)
    }

    /// Registered goals, in registration order
    pub fn goals(&self) -> impl Iterator<Item = &GoalRule> + '_ {
        self.goals.values()
    }

    /// Coordinator the goals run against
    #[must_use]
    pub const fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    /// Run the goal called `name` for `roots`
    ///
    /// The run ends with the goal: cached results are dropped and an abort is
    /// lifted, so the next call starts from an empty cache.
    ///
    /// # Errors
    ///
    /// - [`EngineError::UnknownGoal`] if no goal has that name
    /// - any structural error raised while the goal resolves its requests
    pub async fn run(
        &self,
        name: &str,
        roots: Vec<Value>,
        console: Arc<dyn Console>,
    ) -> EngineResult<ExitCode> {
        let goal = self.goals.get(name).ok_or_else(|| EngineError::UnknownGoal {
            name: name.to_string(),
        })?;
        let span = info_span!("run", run_id = %self.coordinator.run_id(), goal = name);

        async {
            info!(roots = roots.len(), "goal started");
            let ctx = GoalContext::new(Arc::clone(&console), roots, self.coordinator.context());
            let result = (goal.body)(ctx).await;
            console.flush();
            self.coordinator.finish();
            match &result {
                Ok(code) => info!(exit_code = code.code(), "goal finished"),
                Err(err) => error!(error = %err, "goal failed"),
            }
            result
        }
        .instrument(span)
        .await
    }
}
