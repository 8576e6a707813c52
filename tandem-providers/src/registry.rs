//! Registry of the adapters available to the engine.

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};
use tandem_types::{ServicePair, SyncMode};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{ProviderError, ProviderResult};
use crate::provider::{ServiceCategory, ServiceInfo, ServiceProvider};

/// Outcome of one adapter's health check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceHealth {
    pub service: String,
    pub healthy: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Adapters keyed by name.
///
/// Registration normally happens once at startup; lookups may run
/// concurrently from every worker.
#[derive(Default)]
pub struct ServiceRegistry {
    providers: RwLock<BTreeMap<String, Arc<dyn ServiceProvider>>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an adapter. Fails with `DuplicateService` if the name is taken.
    pub fn register(&self, provider: Arc<dyn ServiceProvider>) -> ProviderResult<()> {
        let name = provider.name().to_string();
        let mut providers = self.providers.write().unwrap_or_else(PoisonError::into_inner);
        if providers.contains_key(&name) {
            return Err(ProviderError::DuplicateService(name));
        }
        info!(service = %name, "registered service provider");
        providers.insert(name, provider);
        Ok(())
    }

    /// Looks up an adapter. Fails with `ServiceUnavailable` if it is not registered.
    pub fn get(&self, name: &str) -> ProviderResult<Arc<dyn ServiceProvider>> {
        self.providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| ProviderError::ServiceUnavailable(name.to_string()))
    }

    pub fn is_service_available(&self, name: &str) -> bool {
        self.providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// All registered services, sorted by name.
    pub fn list_services(&self) -> Vec<ServiceInfo> {
        self.snapshot().iter().map(|p| p.info()).collect()
    }

    pub fn services_by_category(&self, category: ServiceCategory) -> Vec<ServiceInfo> {
        self.list_services()
            .into_iter()
            .filter(|info| info.category == category)
            .collect()
    }

    /// Every ordered pair of distinct same-category services, in every mode.
    pub fn supported_pairs(&self) -> Vec<ServicePair> {
        let services = self.list_services();
        let mut pairs = Vec::new();
        for source in &services {
            for target in &services {
                if source.name == target.name || source.category != target.category {
                    continue;
                }
                for mode in SyncMode::ALL {
                    pairs.push(ServicePair::new(&source.name, &target.name, mode));
                }
            }
        }
        pairs
    }

    /// Runs every adapter's health check concurrently.
    pub async fn health_report(&self, cancel: &CancellationToken) -> Vec<ServiceHealth> {
        let providers = self.snapshot();
        let checks = providers.iter().map(|provider| async move {
            let service = provider.name().to_string();
            match provider.health_check(cancel).await {
                Ok(()) => ServiceHealth {
                    service,
                    healthy: true,
                    error: None,
                },
                Err(e) => {
                    warn!(service = %service, error = %e, "health check failed");
                    ServiceHealth {
                        service,
                        healthy: false,
                        error: Some(e.to_string()),
                    }
                }
            }
        });
        join_all(checks).await
    }

    pub fn len(&self) -> usize {
        self.providers.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clones the adapter handles so no lock is held across awaits.
    fn snapshot(&self) -> Vec<Arc<dyn ServiceProvider>> {
        self.providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = self
            .providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        f.debug_struct("ServiceRegistry").field("services", &names).finish()
    }
}
