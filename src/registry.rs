//! # Registry
//!
//! Shared directory of resource snapshots. Resources publish their own record
//! on every transition; actors read it to discover vacancies.
//!
//! The registry holds no business logic. Snapshots returned by
//! [`Registry::list_vacant`] are consistent per entry but may be stale with
//! respect to transitions that land after the scan, so callers must tolerate
//! losing a claim race.
//!
//! Records are kept in first-insertion order: an upsert keeps the position the
//! id was first published at, and every snapshot is returned in ascending
//! order of that position. Actors rely on this for deterministic tie-breaks.
//!
//! Next to the records the registry keeps an address book that resolves an id
//! to the mailbox of the live resource. Addresses are weak: they never keep a
//! resource running, and a resource retires both its record and its address
//! when its task ends.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tracing::trace;

use crate::resource::{ResourceAddress, ResourceHandle};
use crate::types::{ActorId, Attributes, ResourceId, ResourceStatus};

/// Latest published snapshot of a resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub id: ResourceId,
    pub attributes: Attributes,
    pub status: ResourceStatus,
}

impl ResourceRecord {
    pub fn is_vacant(&self) -> bool {
        self.status.is_vacant()
    }
}

struct Slot {
    seq: u64,
    record: ResourceRecord,
}

#[derive(Default)]
pub struct Registry {
    records: DashMap<ResourceId, Slot>,
    addresses: DashMap<ResourceId, ResourceAddress>,
    next_seq: AtomicU64,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("records", &self.records.len())
            .field("addresses", &self.addresses.len())
            .finish()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert the record for `id`, replacing attributes and status.
    pub fn put(&self, id: &ResourceId, attributes: Attributes, status: ResourceStatus) {
        trace!(resource_id = %id, status = %status, "Registry put");
        match self.records.entry(id.clone()) {
            Entry::Occupied(mut slot) => {
                let record = &mut slot.get_mut().record;
                record.attributes = attributes;
                record.status = status;
            }
            Entry::Vacant(slot) => {
                let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
                slot.insert(Slot {
                    seq,
                    record: ResourceRecord {
                        id: id.clone(),
                        attributes,
                        status,
                    },
                });
            }
        }
    }

    pub fn get(&self, id: &ResourceId) -> RegistryResult<ResourceRecord> {
        self.records
            .get(id)
            .map(|slot| slot.record.clone())
            .ok_or_else(|| RegistryError::NotFound {
                resource_id: id.clone(),
            })
    }

    /// Vacant records in first-insertion order.
    pub fn list_vacant(&self) -> Vec<ResourceRecord> {
        self.snapshot(|record| record.is_vacant())
    }

    /// Every record in first-insertion order.
    pub fn records(&self) -> Vec<ResourceRecord> {
        self.snapshot(|_| true)
    }

    fn snapshot(&self, keep: impl Fn(&ResourceRecord) -> bool) -> Vec<ResourceRecord> {
        let mut selected: Vec<(u64, ResourceRecord)> = self
            .records
            .iter()
            .filter(|slot| keep(&slot.record))
            .map(|slot| (slot.seq, slot.record.clone()))
            .collect();
        selected.sort_by_key(|(seq, _)| *seq);
        selected.into_iter().map(|(_, record)| record).collect()
    }

    /// Ids of every resource currently published as held by `actor_id`.
    pub fn occupied_by(&self, actor_id: &ActorId) -> Vec<ResourceId> {
        self.snapshot(|record| record.status.occupant() == Some(actor_id))
            .into_iter()
            .map(|record| record.id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Make the mailbox of a live resource resolvable by id. An id stays
    /// bound until its resource retires, so it can name one resource at a
    /// time.
    pub fn register_address(&self, handle: &ResourceHandle) -> RegistryResult<()> {
        match self.addresses.entry(handle.id().clone()) {
            Entry::Occupied(_) => Err(RegistryError::AlreadyRegistered {
                resource_id: handle.id().clone(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(handle.downgrade());
                Ok(())
            }
        }
    }

    /// Resolve `id` to a handle, or `None` once nothing keeps the resource
    /// alive.
    pub fn address(&self, id: &ResourceId) -> Option<ResourceHandle> {
        self.addresses.get(id).and_then(|entry| entry.value().upgrade())
    }

    /// Forget a resource whose task has ended.
    pub fn retire(&self, id: &ResourceId) {
        trace!(resource_id = %id, "Registry retire");
        self.records.remove(id);
        self.addresses.remove(id);
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistryError {
    #[error("Resource not found: {resource_id}")]
    NotFound { resource_id: ResourceId },
    #[error("Resource already registered: {resource_id}")]
    AlreadyRegistered { resource_id: ResourceId },
}

pub type RegistryResult<T> = Result<T, RegistryError>;
