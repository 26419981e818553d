//! Request protocol between rule bodies and the engine.
//!
//! Rule bodies never see the engine directly: they hold a [`RuleContext`]
//! which forwards requests to whatever implements [`Resolve`], tagging each
//! request with the key of the invocation that issued it.

use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::{self, BoxFuture, join_all, try_join_all};
use spire_core::{EngineError, EngineResult, Key, Value, ValueType};

use crate::get::{Get, GetSignature};
use crate::rule::Rule;

/// Something that can resolve requests, normally the engine's coordinator
#[async_trait]
pub trait Resolve: Send + Sync {
    /// Claim `get` on behalf of the invocation computing `requester` and
    /// return a future for its outcome
    ///
    /// The computation for the key is started or joined before this returns,
    /// whether or not the returned future is ever polled. `requester` is
    /// `None` for requests issued from outside any rule.
    fn claim(&self, requester: Option<Key>, get: Get) -> BoxFuture<'static, EngineResult<Value>>;

    /// Claim `get` and wait for its outcome
    async fn resolve(&self, requester: Option<Key>, get: Get) -> EngineResult<Value> {
        self.claim(requester, get).await
    }
}

struct Origin {
    rule: Arc<str>,
    key: Key,
    gets: Arc<[GetSignature]>,
    enforce_declared: bool,
}

/// Handle a rule body uses to request its inputs
#[derive(Clone)]
pub struct RuleContext {
    resolver: Arc<dyn Resolve>,
    origin: Option<Arc<Origin>>,
}

impl RuleContext {
    /// Context for requests issued from outside any rule
    #[must_use]
    pub fn root(resolver: Arc<dyn Resolve>) -> Self {
        Self {
            resolver,
            origin: None,
        }
    }

    /// Context for an invocation of `rule` computing `key`
    #[must_use]
    pub fn for_rule(
        resolver: Arc<dyn Resolve>,
        rule: &Rule,
        key: Key,
        enforce_declared: bool,
    ) -> Self {
        Self {
            resolver,
            origin: Some(Arc::new(Origin {
                rule: rule.shared_name(),
                key,
                gets: rule.shared_gets(),
                enforce_declared,
            })),
        }
    }

    /// Key of the invocation this context belongs to
    #[must_use]
    pub fn key(&self) -> Option<&Key> {
        self.origin.as_ref().map(|origin| &origin.key)
    }

    /// Name of the rule this context belongs to
    #[must_use]
    pub fn rule_name(&self) -> Option<&str> {
        self.origin.as_ref().map(|origin| &*origin.rule)
    }

    /// Request a single value and suspend until it is resolved
    ///
    /// # Errors
    ///
    /// Returns the cached failure of the requested key, or a structural error
    /// if the request is undeclared or cannot be satisfied
    pub async fn request(&self, get: Get) -> EngineResult<Value> {
        self.claim(get).await
    }

    /// Request a single value and downcast it to `P`
    ///
    /// # Errors
    ///
    /// As [`RuleContext::request`], plus a type mismatch if the product is not a `P`
    pub async fn get<P: ValueType>(&self, get: Get) -> EngineResult<P> {
        self.request(get).await?.cloned::<P>()
    }

    /// Request a batch; results are delivered in request order
    ///
    /// Every request is started before any is awaited. The first failure fails
    /// the whole batch; work already started for the other requests keeps
    /// running and still populates the cache.
    ///
    /// # Errors
    ///
    /// Returns the first failure among the requests
    pub async fn get_all(&self, gets: Vec<Get>) -> EngineResult<Vec<Value>> {
        let pending: Vec<_> = gets.into_iter().map(|get| self.claim(get)).collect();
        try_join_all(pending).await
    }

    /// Request a batch of `P`s; results are delivered in request order
    ///
    /// # Errors
    ///
    /// As [`RuleContext::get_all`], plus a type mismatch if a product is not a `P`
    pub async fn get_all_as<P: ValueType>(&self, gets: Vec<Get>) -> EngineResult<Vec<P>> {
        self.get_all(gets)
            .await?
            .iter()
            .map(Value::cloned::<P>)
            .collect()
    }

    /// Request a batch without short-circuiting: one outcome per request, in
    /// request order
    pub async fn get_settled(&self, gets: Vec<Get>) -> Vec<EngineResult<Value>> {
        let pending: Vec<_> = gets.into_iter().map(|get| self.claim(get)).collect();
        join_all(pending).await
    }

    fn claim(&self, get: Get) -> BoxFuture<'static, EngineResult<Value>> {
        if let Err(err) = self.check_declared(&get) {
            return future::ready(Err(err)).boxed();
        }
        let requester = self.origin.as_ref().map(|origin| origin.key.clone());
        self.resolver.claim(requester, get)
    }

    fn check_declared(&self, get: &Get) -> EngineResult<()> {
        let Some(origin) = &self.origin else {
            return Ok(());
        };
        if !origin.enforce_declared {
            return Ok(());
        }
        let signature = get.signature();
        if origin.gets.contains(&signature) {
            Ok(())
        } else {
            Err(EngineError::UndeclaredRequest {
                rule: origin.rule.to_string(),
                product: signature.product.to_string(),
                subject_type: signature.subject.to_string(),
            })
        }
    }
}

impl std::fmt::Debug for RuleContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleContext")
            .field("rule", &self.rule_name())
            .field("key", &self.key())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq, Eq, Hash)]
    struct Address(String);

    #[derive(Debug, Clone, PartialEq, Eq, Hash)]
    struct Sources(String);

    #[derive(Debug, Clone, PartialEq, Eq, Hash)]
    struct Classpath;

    /// Echoes `Sources(address)` and records who asked.
    #[derive(Default)]
    struct Echo {
        requesters: Mutex<Vec<Option<Key>>>,
    }

    impl Echo {
        fn echo(&self, requester: Option<Key>, get: &Get) -> EngineResult<Value> {
            self.requesters.lock().unwrap().push(requester);
            let address = get.subject().try_as::<Address>()?;
            if address.0 == "missing" {
                return Err(EngineError::failed("no such target"));
            }
            Ok(Value::new(Sources(address.0.clone())))
        }
    }

    impl Resolve for Echo {
        fn claim(&self, requester: Option<Key>, get: Get) -> BoxFuture<'static, EngineResult<Value>> {
            future::ready(self.echo(requester, &get)).boxed()
        }
    }

    fn rule() -> Rule {
        Rule::builder::<Classpath, Address>("classpath")
            .get::<Sources, Address>()
            .body(|_ctx, _address: Address| async move { Ok(Classpath) })
    }

    fn key() -> Key {
        Key::new(spire_core::TypeTag::of::<Classpath>(), Value::new(Address("a".to_string())))
    }

    #[tokio::test]
    async fn test_root_context_is_unrestricted() {
        let echo = Arc::new(Echo::default());
        let ctx = RuleContext::root(echo.clone());

        let sources: Sources = ctx.get(Get::new::<Sources>(Address("a".to_string()))).await.unwrap();
        assert_eq!(sources, Sources("a".to_string()));
        assert_eq!(echo.requesters.lock().unwrap().as_slice(), &[None]);
        assert!(ctx.rule_name().is_none());
    }

    #[tokio::test]
    async fn test_rule_context_tags_requester() {
        let echo = Arc::new(Echo::default());
        let ctx = RuleContext::for_rule(echo.clone(), &rule(), key(), true);

        ctx.request(Get::new::<Sources>(Address("b".to_string()))).await.unwrap();
        assert_eq!(echo.requesters.lock().unwrap().as_slice(), &[Some(key())]);
        assert_eq!(ctx.rule_name(), Some("classpath"));
    }

    #[tokio::test]
    async fn test_undeclared_request_rejected() {
        let echo = Arc::new(Echo::default());
        let ctx = RuleContext::for_rule(echo.clone(), &rule(), key(), true);

        let err = ctx
            .request(Get::new::<Classpath>(Address("b".to_string())))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::UndeclaredRequest { ref rule, .. } if rule == "classpath"));
        assert!(echo.requesters.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_undeclared_request_allowed_when_not_enforced() {
        let echo = Arc::new(Echo::default());
        let ctx = RuleContext::for_rule(echo, &rule(), key(), false);

        let result = ctx.request(Get::new::<Classpath>(Address("b".to_string()))).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_get_all_preserves_order() {
        let ctx = RuleContext::root(Arc::new(Echo::default()));
        let gets = ["x", "y", "z"]
            .iter()
            .map(|s| Get::new::<Sources>(Address(s.to_string())))
            .collect();

        let sources: Vec<Sources> = ctx.get_all_as(gets).await.unwrap();
        assert_eq!(
            sources,
            vec![
                Sources("x".to_string()),
                Sources("y".to_string()),
                Sources("z".to_string())
            ]
        );
    }

    #[tokio::test]
    async fn test_get_all_fails_on_any_failure() {
        let ctx = RuleContext::root(Arc::new(Echo::default()));
        let gets = ["x", "missing", "z"]
            .iter()
            .map(|s| Get::new::<Sources>(Address(s.to_string())))
            .collect();

        assert!(ctx.get_all(gets).await.is_err());
    }

    #[tokio::test]
    async fn test_get_all_claims_every_request_before_failing() {
        let echo = Arc::new(Echo::default());
        let ctx = RuleContext::for_rule(echo.clone(), &rule(), key(), true);
        let gets = vec![
            Get::new::<Classpath>(Address("undeclared".to_string())),
            Get::new::<Sources>(Address("missing".to_string())),
            Get::new::<Sources>(Address("y".to_string())),
            Get::new::<Sources>(Address("z".to_string())),
        ];

        let err = ctx.get_all(gets).await.unwrap_err();
        assert!(matches!(err, EngineError::UndeclaredRequest { .. }));
        assert_eq!(echo.requesters.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_get_settled_reports_each() {
        let ctx = RuleContext::root(Arc::new(Echo::default()));
        let gets = ["x", "missing", "z"]
            .iter()
            .map(|s| Get::new::<Sources>(Address(s.to_string())))
            .collect();

        let outcomes = ctx.get_settled(gets).await;
        assert_eq!(outcomes.len(), 3);
        assert!(outcomes[0].is_ok());
        assert!(outcomes[1].is_err());
        assert!(outcomes[2].is_ok());
    }
}
