//! Transport decorator that applies fault injection rules.

use std::sync::{Arc, RwLock};

use futures_util::future::BoxFuture;
use tracing::debug;

use crate::transport::{Endpoint, StoreRequest, StoreResponse, Transport, TransportError};

use super::errors::{FaultError, FaultResult};
use super::rule::FaultInjectionRule;

/// Wraps any transport; the first rule that hits a request decides its fate.
pub struct FaultInjectingTransport {
    inner: Arc<dyn Transport>,
    rules: RwLock<Vec<Arc<FaultInjectionRule>>>,
}

impl FaultInjectingTransport {
    pub fn new(inner: Arc<dyn Transport>) -> Self {
        Self {
            inner,
            rules: RwLock::new(Vec::new()),
        }
    }

    /// Register a rule and return a handle for toggling it at runtime.
    pub fn add_rule(&self, rule: FaultInjectionRule) -> FaultResult<Arc<FaultInjectionRule>> {
        let rule = Arc::new(rule);
        let mut rules = self
            .rules
            .write()
            .map_err(|_| FaultError::RulesUnavailable(rule.id().to_string()))?;
        if rules.iter().any(|r| r.id() == rule.id()) {
            return Err(FaultError::DuplicateRule(rule.id().to_string()));
        }
        rules.push(rule.clone());
        Ok(rule)
    }

    pub fn remove_rule(&self, id: &str) -> Option<Arc<FaultInjectionRule>> {
        let mut rules = self.rules.write().ok()?;
        let pos = rules.iter().position(|r| r.id() == id)?;
        Some(rules.remove(pos))
    }

    pub fn rules(&self) -> Vec<Arc<FaultInjectionRule>> {
        self.rules.read().map(|r| r.clone()).unwrap_or_default()
    }

    fn hit(&self, endpoint: &Endpoint, request: &StoreRequest) -> Option<Arc<FaultInjectionRule>> {
        let rules = self.rules.read().ok()?;
        rules.iter().find(|r| r.try_hit(endpoint, request)).cloned()
    }
}

impl Transport for FaultInjectingTransport {
    fn invoke<'a>(
        &'a self,
        endpoint: &'a Endpoint,
        request: &'a StoreRequest,
    ) -> BoxFuture<'a, Result<StoreResponse, TransportError>> {
        Box::pin(async move {
            let rule = match self.hit(endpoint, request) {
                Some(rule) => rule,
                None => return self.inner.invoke(endpoint, request).await,
            };
            debug!(
                rule = rule.id(),
                region = %endpoint.region,
                operation = request.operation_type.as_str(),
                "injecting fault"
            );

            let result = rule.result();
            if let Some(delay) = result.delay {
                tokio::time::sleep(delay).await;
            }
            match result.to_failure(endpoint, rule.id()) {
                Some(failure) => failure,
                None => self.inner.invoke(endpoint, request).await,
            }
        })
    }
}
