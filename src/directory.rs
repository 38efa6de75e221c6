use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;

use crate::{
    domain::{AgentAddress, ServiceType},
    error::DirectoryError,
};

/// Resolves a capability tag to the agents currently advertising it.
#[async_trait]
pub trait Directory: Send + Sync + 'static {
    async fn lookup(&self, service: &ServiceType) -> Result<Vec<AgentAddress>, DirectoryError>;
}

#[async_trait]
impl<D: Directory + ?Sized> Directory for Arc<D> {
    async fn lookup(&self, service: &ServiceType) -> Result<Vec<AgentAddress>, DirectoryError> {
        (**self).lookup(service).await
    }
}

/// In-memory yellow pages.
///
/// Agents register the services they offer; lookups return registered agents in
/// address order. An outage can be simulated with [`Registry::set_available`].
#[derive(Debug, Clone)]
pub struct Registry {
    entries: Arc<Mutex<BTreeMap<AgentAddress, BTreeSet<ServiceType>>>>,
    available: Arc<AtomicBool>,
}

impl Default for Registry {
    fn default() -> Self {
        Self {
            entries: Arc::default(),
            available: Arc::new(AtomicBool::new(true)),
        }
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `services` to what `address` advertises.
    pub fn register(&self, address: AgentAddress, services: impl IntoIterator<Item = ServiceType>) {
        let mut entries = self.entries();
        entries.entry(address).or_default().extend(services);
    }

    /// Withdraws every advertisement of `address`.
    pub fn deregister(&self, address: &AgentAddress) -> bool {
        self.entries().remove(address).is_some()
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn search(&self, service: &ServiceType) -> Vec<AgentAddress> {
        self.entries()
            .iter()
            .filter(|(_, offered)| offered.contains(service))
            .map(|(address, _)| address.clone())
            .collect()
    }

    fn entries(&self) -> MutexGuard<'_, BTreeMap<AgentAddress, BTreeSet<ServiceType>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Directory for Registry {
    async fn lookup(&self, service: &ServiceType) -> Result<Vec<AgentAddress>, DirectoryError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(DirectoryError::Unavailable(format!(
                "registry offline while searching '{service}'"
            )));
        }
        Ok(self.search(service))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selling() -> ServiceType {
        ServiceType::default()
    }

    #[tokio::test]
    async fn test_lookup_returns_only_matching_agents_in_address_order() {
        // Arrange
        let registry = Registry::new();
        registry.register("seller-b".into(), [selling()]);
        registry.register("seller-a".into(), [selling(), ServiceType::from("book-lending")]);
        registry.register("lender".into(), [ServiceType::from("book-lending")]);

        // Act
        let found = registry.lookup(&selling()).await.expect("registry is up");

        // Assert
        assert_eq!(
            found,
            vec![AgentAddress::from("seller-a"), AgentAddress::from("seller-b")]
        );
    }

    #[tokio::test]
    async fn test_deregistered_agents_disappear_from_lookup() {
        let registry = Registry::new();
        registry.register("seller-a".into(), [selling()]);

        assert!(registry.deregister(&"seller-a".into()));
        assert!(!registry.deregister(&"seller-a".into()));
        assert!(registry.lookup(&selling()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unavailable_registry_fails_lookup() {
        let registry = Registry::new();
        registry.register("seller-a".into(), [selling()]);
        registry.set_available(false);

        let err = registry.lookup(&selling()).await.unwrap_err();
        assert!(matches!(err, DirectoryError::Unavailable(_)));

        registry.set_available(true);
        assert_eq!(registry.lookup(&selling()).await.unwrap().len(), 1);
    }
}
