pub mod external;
pub mod mock;

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

use crate::models::SendRequest;
use external::ExternalApiCheck;

/// A policy check run against a prompt.
///
/// `Ok(false)` is a conclusive rejection. `Err` means the check could not
/// reach a decision. Implementations are shared by every worker of every
/// run, so they must be stateless or synchronize internally.
#[async_trait]
pub trait Check: Send + Sync {
    /// Task type this check answers to.
    fn name(&self) -> &str;
    async fn evaluate(&self, request: &SendRequest) -> Result<bool>;
}

/// Maps task types to checks. Immutable once built, so lookups never lock.
#[derive(Clone, Default)]
pub struct CheckRegistry {
    checks: HashMap<String, Arc<dyn Check>>,
}

impl CheckRegistry {
    pub fn builder() -> CheckRegistryBuilder {
        CheckRegistryBuilder::default()
    }

    pub fn get(&self, task_type: &str) -> Option<Arc<dyn Check>> {
        self.checks.get(task_type).cloned()
    }

    pub fn contains(&self, task_type: &str) -> bool {
        self.checks.contains_key(task_type)
    }

    /// Registered task types, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.checks.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }
}

impl FromIterator<Arc<dyn Check>> for CheckRegistry {
    fn from_iter<I: IntoIterator<Item = Arc<dyn Check>>>(iter: I) -> Self {
        iter.into_iter()
            .fold(CheckRegistry::builder(), |b, check| b.register(check))
            .build()
    }
}

/// The checks a stock deployment serves.
pub fn default_registry(external_api_url: &str) -> CheckRegistry {
    CheckRegistry::builder()
        .register(Arc::new(ExternalApiCheck::new(external_api_url)))
        .build()
}

/// Collects checks before the registry is frozen.
#[derive(Default)]
pub struct CheckRegistryBuilder {
    checks: HashMap<String, Arc<dyn Check>>,
}

impl CheckRegistryBuilder {
    /// Later registrations under the same name replace earlier ones.
    pub fn register(mut self, check: Arc<dyn Check>) -> Self {
        let name = check.name().to_string();
        if self.checks.insert(name.clone(), check).is_some() {
            warn!(task_type = %name, "check registered twice, keeping the last one");
        }
        self
    }

    pub fn build(self) -> CheckRegistry {
        CheckRegistry {
            checks: self.checks,
        }
    }
}
