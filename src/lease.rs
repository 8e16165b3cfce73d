//! Exclusive-use leases on robot resources.
//!
//! A mission must hold a lease on every resource its remote nodes act on
//! before the first tick. The [`LeaseSet`] owned by the runner acquires them
//! all or none, renews them every tick and gives them back on stop.

use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use crate::error::{EngineError, LeaseError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub resource: String,
    pub owner: String,
    /// Bumped by the provider on every acquisition, so a stale lease is
    /// distinguishable from a fresh one for the same resource.
    pub sequence: u64,
}

pub trait LeaseProvider: Send {
    fn acquire(&mut self, resource: &str, owner: &str) -> Result<Lease, LeaseError>;
    /// Keeps a held lease alive.
    fn retain(&mut self, lease: &Lease) -> Result<(), LeaseError>;
    fn release(&mut self, lease: &Lease);
}

#[derive(Debug, Default)]
struct Registry {
    holders: HashMap<String, (String, u64)>,
    sequence: u64,
}

/// In-process lease authority. Clones share one registry, so two runners
/// given clones of the same provider contend for the same resources.
#[derive(Debug, Clone, Default)]
pub struct LocalLeaseProvider(Arc<Mutex<Registry>>);

impl LocalLeaseProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes a resource away from whoever holds it.
    pub fn revoke(&self, resource: &str) {
        self.0.lock().holders.remove(resource);
    }

    pub fn holder(&self, resource: &str) -> Option<String> {
        self.0
            .lock()
            .holders
            .get(resource)
            .map(|(owner, _)| owner.clone())
    }
}

impl LeaseProvider for LocalLeaseProvider {
    fn acquire(&mut self, resource: &str, owner: &str) -> Result<Lease, LeaseError> {
        let mut registry = self.0.lock();
        if let Some((holder, _)) = registry.holders.get(resource) {
            if holder != owner {
                return Err(LeaseError::Unavailable {
                    resource: resource.to_owned(),
                    holder: holder.clone(),
                });
            }
        }
        registry.sequence += 1;
        let sequence = registry.sequence;
        registry
            .holders
            .insert(resource.to_owned(), (owner.to_owned(), sequence));
        Ok(Lease {
            resource: resource.to_owned(),
            owner: owner.to_owned(),
            sequence,
        })
    }

    fn retain(&mut self, lease: &Lease) -> Result<(), LeaseError> {
        match self.0.lock().holders.get(&lease.resource) {
            Some((owner, sequence)) if *owner == lease.owner && *sequence == lease.sequence => {
                Ok(())
            }
            _ => Err(LeaseError::Revoked(lease.resource.clone())),
        }
    }

    fn release(&mut self, lease: &Lease) {
        let mut registry = self.0.lock();
        if let Some((owner, sequence)) = registry.holders.get(&lease.resource) {
            if *owner == lease.owner && *sequence == lease.sequence {
                registry.holders.remove(&lease.resource);
            }
        }
    }
}

/// Leases held on behalf of one mission.
pub struct LeaseSet {
    provider: Box<dyn LeaseProvider>,
    owner: String,
    held: BTreeMap<String, Lease>,
}

impl std::fmt::Debug for LeaseSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaseSet")
            .field("owner", &self.owner)
            .field("held", &self.held.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl LeaseSet {
    pub fn new(provider: impl LeaseProvider + 'static, owner: impl Into<String>) -> Self {
        Self {
            provider: Box::new(provider),
            owner: owner.into(),
            held: BTreeMap::new(),
        }
    }

    /// Acquires every resource not already held. On failure, leases acquired
    /// by this call are released again and nothing changes.
    pub fn acquire_all(&mut self, resources: &BTreeSet<String>) -> Result<(), LeaseError> {
        let mut acquired = vec![];
        for resource in resources {
            if self.held.contains_key(resource) {
                continue;
            }
            match self.provider.acquire(resource, &self.owner) {
                Ok(lease) => acquired.push(lease),
                Err(e) => {
                    for lease in &acquired {
                        self.provider.release(lease);
                    }
                    return Err(e);
                }
            }
        }
        for lease in acquired {
            log::info!("Acquired lease on {:?}", lease.resource);
            self.held.insert(lease.resource.clone(), lease);
        }
        Ok(())
    }

    /// Renews every held lease. A lease that cannot be retained is dropped
    /// and acquired again; failures to do so are returned but leave the set
    /// usable. Only inconsistent bookkeeping is an error.
    pub fn retain_all(&mut self) -> Result<Vec<LeaseError>, EngineError> {
        let mut failures = vec![];
        let resources: Vec<String> = self.held.keys().cloned().collect();
        for resource in resources {
            let Some(lease) = self.held.get(&resource) else {
                continue;
            };
            if lease.resource != resource || lease.owner != self.owner {
                return Err(EngineError::LeaseBookkeeping(format!(
                    "lease filed under {resource:?} is {:?} owned by {:?}",
                    lease.resource, lease.owner
                )));
            }
            if let Err(e) = self.provider.retain(lease) {
                log::warn!("{e}; reacquiring");
                self.held.remove(&resource);
                match self.provider.acquire(&resource, &self.owner) {
                    Ok(lease) => {
                        self.held.insert(resource, lease);
                    }
                    Err(e) => failures.push(e),
                }
            }
        }
        Ok(failures)
    }

    /// Resources that were required but are not held at the moment.
    pub fn missing<'a>(&self, resources: &'a BTreeSet<String>) -> Vec<&'a str> {
        resources
            .iter()
            .filter(|r| !self.held.contains_key(*r))
            .map(String::as_str)
            .collect()
    }

    pub fn release_all(&mut self) {
        for (resource, lease) in std::mem::take(&mut self.held) {
            self.provider.release(&lease);
            log::info!("Released lease on {resource:?}");
        }
    }

    pub fn held(&self) -> impl Iterator<Item = &str> {
        self.held.keys().map(String::as_str)
    }

    pub fn is_held(&self, resource: &str) -> bool {
        self.held.contains_key(resource)
    }
}

impl Drop for LeaseSet {
    fn drop(&mut self) {
        self.release_all();
    }
}

#[cfg(test)]
mod test;
