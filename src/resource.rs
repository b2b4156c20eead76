//! # Resource
//!
//! A resource is a single-occupant entity with fixed attributes. Each one runs
//! as its own task and drains a mailbox one command at a time, which is what
//! makes the occupy check-and-set atomic: two claims on the same resource can
//! never interleave.
//!
//! ```text
//!            occupy(a) ─────────────▶ Occupied(a)
//!   Vacant ◀──────────── vacate() ──────────┘
//! ```
//!
//! Every transition is written to the [`Registry`] before the caller gets a
//! reply. `occupy` and `status` are request/reply; `vacate` only enqueues the
//! command, so a registry read issued right after a vacate may still see the
//! old occupant until the resource gets to it.
//!
//! The registry only keeps a weak address. A resource task ends once every
//! [`ResourceHandle`] is gone or a shutdown is requested, and on the way out
//! it retires its record and address from the registry.

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ResourceConfig;
use crate::event_bus::{EventBus, MarketEventKind};
use crate::registry::Registry;
use crate::types::{ActorId, Attributes, ResourceId, ResourceStatus};
use crate::MarketResult;

/// Reply to a claim attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum OccupyOutcome {
    Acquired,
    AlreadyOccupied,
}

/// Authoritative state of a resource at the moment it answered.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceSnapshot {
    pub id: ResourceId,
    pub attributes: Attributes,
    pub occupant: Option<ActorId>,
}

impl ResourceSnapshot {
    pub fn status(&self) -> ResourceStatus {
        match &self.occupant {
            Some(actor_id) => ResourceStatus::Occupied(actor_id.clone()),
            None => ResourceStatus::Vacant,
        }
    }
}

#[derive(Debug)]
enum Command {
    Occupy {
        caller: ActorId,
        reply: oneshot::Sender<OccupyOutcome>,
    },
    Vacate,
    Status {
        reply: oneshot::Sender<ResourceSnapshot>,
    },
    Shutdown,
}

/// Mailbox address of a running resource.
#[derive(Debug, Clone)]
pub struct ResourceHandle {
    id: ResourceId,
    sender: mpsc::Sender<Command>,
}

impl ResourceHandle {
    pub fn id(&self) -> &ResourceId {
        &self.id
    }

    /// Claim the resource for `caller`.
    #[tracing::instrument(skip(self), fields(resource_id = %self.id), level = "debug")]
    pub async fn occupy(&self, caller: &ActorId) -> ResourceResult<OccupyOutcome> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Occupy {
            caller: caller.clone(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| ResourceError::ReplyDropped {
            resource_id: self.id.clone(),
        })
    }

    /// Release the resource regardless of who holds it.
    ///
    /// Returns once the command is queued, not once it has been applied.
    pub async fn vacate(&self) -> ResourceResult<()> {
        self.send(Command::Vacate).await
    }

    pub async fn status(&self) -> ResourceResult<ResourceSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Status { reply }).await?;
        rx.await.map_err(|_| ResourceError::ReplyDropped {
            resource_id: self.id.clone(),
        })
    }

    /// Stop the resource task after the commands already queued.
    pub async fn shutdown(&self) -> ResourceResult<()> {
        self.send(Command::Shutdown).await
    }

    /// True once the resource task has stopped reading its mailbox.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    pub(crate) fn downgrade(&self) -> ResourceAddress {
        ResourceAddress {
            id: self.id.clone(),
            sender: self.sender.downgrade(),
        }
    }

    /// A handle whose resource grants every claim but never answers `status`.
    #[cfg(test)]
    pub(crate) fn unresponsive(id: ResourceId) -> Self {
        let (sender, mut inbox) = mpsc::channel(16);
        tokio::spawn(async move {
            let mut parked = vec![];
            while let Some(command) = inbox.recv().await {
                match command {
                    Command::Occupy { reply, .. } => {
                        let _ = reply.send(OccupyOutcome::Acquired);
                    }
                    Command::Status { reply } => parked.push(reply),
                    Command::Vacate => {}
                    Command::Shutdown => break,
                }
            }
        });
        Self { id, sender }
    }

    async fn send(&self, command: Command) -> ResourceResult<()> {
        self.sender
            .send(command)
            .await
            .map_err(|_| ResourceError::MailboxClosed {
                resource_id: self.id.clone(),
            })
    }
}

/// Address book entry. Does not keep the resource task alive.
pub(crate) struct ResourceAddress {
    id: ResourceId,
    sender: mpsc::WeakSender<Command>,
}

impl ResourceAddress {
    pub(crate) fn upgrade(&self) -> Option<ResourceHandle> {
        self.sender.upgrade().map(|sender| ResourceHandle {
            id: self.id.clone(),
            sender,
        })
    }
}

pub struct Resource {
    id: ResourceId,
    attributes: Attributes,
    occupant: Option<ActorId>,
    registry: Arc<Registry>,
    event_bus: Arc<EventBus>,
    inbox: mpsc::Receiver<Command>,
}

impl Resource {
    /// Create a resource with a generated id and start its task.
    pub fn spawn(
        attributes: Attributes,
        registry: Arc<Registry>,
        event_bus: Arc<EventBus>,
        config: &ResourceConfig,
    ) -> MarketResult<ResourceHandle> {
        let (handle, _task) =
            Self::start(ResourceId::generate(), attributes, registry, event_bus, config)?;
        Ok(handle)
    }

    /// Create a resource under `id`, publish it as vacant and start its task.
    ///
    /// The record is in the registry by the time this returns.
    pub fn start(
        id: ResourceId,
        attributes: Attributes,
        registry: Arc<Registry>,
        event_bus: Arc<EventBus>,
        config: &ResourceConfig,
    ) -> MarketResult<(ResourceHandle, JoinHandle<()>)> {
        config.validate()?;
        let (sender, inbox) = mpsc::channel(config.mailbox_capacity);
        let handle = ResourceHandle {
            id: id.clone(),
            sender,
        };

        let resource = Self {
            id,
            attributes,
            occupant: None,
            registry,
            event_bus,
            inbox,
        };

        resource.registry.register_address(&handle)?;
        resource.publish();
        resource.event_bus.publish(MarketEventKind::ResourceCreated {
            resource_id: resource.id.clone(),
        });
        info!(resource_id = %resource.id, attributes = ?resource.attributes, "Resource created");

        let task = tokio::spawn(resource.run());
        Ok((handle, task))
    }

    async fn run(mut self) {
        while let Some(command) = self.inbox.recv().await {
            match command {
                Command::Occupy { caller, reply } => {
                    let outcome = self.occupy(&caller);
                    if reply.send(outcome).is_err() && outcome == OccupyOutcome::Acquired {
                        // the claimant can no longer learn it holds us
                        warn!(
                            resource_id = %self.id,
                            actor_id = %caller,
                            "Claimant went away before the reply, releasing"
                        );
                        self.vacate();
                    }
                }
                Command::Vacate => self.vacate(),
                Command::Status { reply } => {
                    let _ = reply.send(self.snapshot());
                }
                Command::Shutdown => break,
            }
        }
        self.registry.retire(&self.id);
        self.event_bus.publish(MarketEventKind::ResourceRetired {
            resource_id: self.id.clone(),
        });
        debug!(resource_id = %self.id, "Resource task finished");
    }

    fn occupy(&mut self, caller: &ActorId) -> OccupyOutcome {
        if let Some(holder) = &self.occupant {
            debug!(
                resource_id = %self.id,
                requester = %caller,
                holder = %holder,
                "Claim denied, already occupied"
            );
            self.event_bus.publish(MarketEventKind::ClaimRejected {
                resource_id: self.id.clone(),
                actor_id: caller.clone(),
                holder: holder.clone(),
            });
            return OccupyOutcome::AlreadyOccupied;
        }

        self.occupant = Some(caller.clone());
        self.publish();
        self.event_bus.publish(MarketEventKind::ResourceOccupied {
            resource_id: self.id.clone(),
            actor_id: caller.clone(),
        });
        debug!(resource_id = %self.id, actor_id = %caller, "Resource occupied");
        OccupyOutcome::Acquired
    }

    fn vacate(&mut self) {
        let previous = self.occupant.take();
        self.publish();
        self.event_bus.publish(MarketEventKind::ResourceVacated {
            resource_id: self.id.clone(),
            previous: previous.clone(),
        });
        debug!(resource_id = %self.id, previous = ?previous, "Resource vacated");
    }

    fn snapshot(&self) -> ResourceSnapshot {
        ResourceSnapshot {
            id: self.id.clone(),
            attributes: self.attributes.clone(),
            occupant: self.occupant.clone(),
        }
    }

    fn publish(&self) {
        self.registry
            .put(&self.id, self.attributes.clone(), self.snapshot().status());
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResourceError {
    #[error("Mailbox closed for resource {resource_id}")]
    MailboxClosed { resource_id: ResourceId },
    #[error("Resource {resource_id} dropped the reply")]
    ReplyDropped { resource_id: ResourceId },
}

pub type ResourceResult<T> = Result<T, ResourceError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RegistryError;
    use crate::types::attributes;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn setup() -> (Arc<Registry>, Arc<EventBus>) {
        (Arc::new(Registry::new()), Arc::new(EventBus::new(64)))
    }

    fn spawn_named(
        name: &str,
        q: f64,
        registry: &Arc<Registry>,
        bus: &Arc<EventBus>,
    ) -> ResourceHandle {
        Resource::start(
            ResourceId::from(name),
            attributes([("quality", q)]),
            registry.clone(),
            bus.clone(),
            &ResourceConfig::default(),
        )
        .unwrap()
        .0
    }

    #[tokio::test]
    async fn test_created_vacant_and_published() {
        let (registry, bus) = setup();
        let handle = spawn_named("r1", 0.5, &registry, &bus);

        let record = registry.get(handle.id()).unwrap();
        assert!(record.is_vacant());
        assert_eq!(record.attributes, attributes([("quality", 0.5)]));
        assert!(registry.address(handle.id()).is_some());

        let snapshot = handle.status().await.unwrap();
        assert_eq!(snapshot.occupant, None);
    }

    #[tokio::test]
    async fn test_occupy_publishes_before_reply() {
        let (registry, bus) = setup();
        let handle = spawn_named("r1", 0.5, &registry, &bus);
        let actor = ActorId::from("a1");

        assert_eq!(handle.occupy(&actor).await.unwrap(), OccupyOutcome::Acquired);
        assert_eq!(
            registry.get(handle.id()).unwrap().status,
            ResourceStatus::Occupied(actor.clone())
        );
        assert_eq!(handle.status().await.unwrap().occupant, Some(actor));
    }

    #[tokio::test]
    async fn test_second_claim_rejected_even_for_same_caller() {
        let (registry, bus) = setup();
        let handle = spawn_named("r1", 0.5, &registry, &bus);
        let a1 = ActorId::from("a1");
        let a2 = ActorId::from("a2");

        assert_eq!(handle.occupy(&a1).await.unwrap(), OccupyOutcome::Acquired);
        assert_eq!(
            handle.occupy(&a1).await.unwrap(),
            OccupyOutcome::AlreadyOccupied
        );
        assert_eq!(
            handle.occupy(&a2).await.unwrap(),
            OccupyOutcome::AlreadyOccupied
        );
        assert_eq!(handle.status().await.unwrap().occupant, Some(a1));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_racing_claims_single_winner() {
        let (registry, bus) = setup();
        let handle = spawn_named("contested", 1.0, &registry, &bus);

        let claims = (0..16).map(|i| {
            let handle = handle.clone();
            tokio::spawn(async move {
                let actor = ActorId::from(format!("a{}", i));
                (actor.clone(), handle.occupy(&actor).await.unwrap())
            })
        });
        let results = futures::future::join_all(claims).await;

        let winners: Vec<ActorId> = results
            .into_iter()
            .map(|r| r.unwrap())
            .filter(|(_, outcome)| *outcome == OccupyOutcome::Acquired)
            .map(|(actor, _)| actor)
            .collect();
        assert_eq!(winners.len(), 1);
        assert_eq!(
            handle.status().await.unwrap().occupant.as_ref(),
            Some(&winners[0])
        );
    }

    #[tokio::test]
    async fn test_vacate_is_idempotent() {
        let (registry, bus) = setup();
        let handle = spawn_named("r1", 0.5, &registry, &bus);

        handle.vacate().await.unwrap();
        handle.vacate().await.unwrap();
        assert_eq!(handle.status().await.unwrap().occupant, None);
        assert!(registry.get(handle.id()).unwrap().is_vacant());
    }

    #[tokio::test]
    async fn test_vacate_releases_any_occupant() {
        let (registry, bus) = setup();
        let handle = spawn_named("r1", 0.5, &registry, &bus);
        handle.occupy(&ActorId::from("a1")).await.unwrap();

        handle.vacate().await.unwrap();
        // status is queued behind the vacate, so it observes the release
        assert_eq!(handle.status().await.unwrap().occupant, None);
        assert!(registry.get(handle.id()).unwrap().is_vacant());
        assert_eq!(
            handle.occupy(&ActorId::from("a2")).await.unwrap(),
            OccupyOutcome::Acquired
        );
    }

    #[tokio::test]
    async fn test_vacate_returns_before_registry_write() {
        // current-thread runtime: the resource task cannot run until we yield
        let (registry, bus) = setup();
        let handle = spawn_named("r1", 0.5, &registry, &bus);
        let a1 = ActorId::from("a1");
        handle.occupy(&a1).await.unwrap();

        handle.vacate().await.unwrap();
        assert_eq!(
            registry.get(handle.id()).unwrap().status,
            ResourceStatus::Occupied(a1)
        );

        assert_eq!(handle.status().await.unwrap().occupant, None);
        assert!(registry.get(handle.id()).unwrap().is_vacant());
    }

    #[tokio::test]
    async fn test_dropping_last_handle_retires_resource() {
        let (registry, bus) = setup();
        let mut rx = bus.subscribe();
        let (handle, task) = Resource::start(
            ResourceId::from("r1"),
            attributes([("quality", 0.5)]),
            registry.clone(),
            bus.clone(),
            &ResourceConfig::default(),
        )
        .unwrap();
        // the address book alone does not keep it running
        assert!(registry.address(handle.id()).is_some());
        drop(handle);

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert!(registry.is_empty());
        assert!(registry.address(&ResourceId::from("r1")).is_none());
        assert!(rx.drain().iter().any(|e| e.kind
            == MarketEventKind::ResourceRetired {
                resource_id: ResourceId::from("r1")
            }));

        // the id is free again
        let again = spawn_named("r1", 0.7, &registry, &bus);
        assert!(registry.get(again.id()).unwrap().is_vacant());
    }

    #[tokio::test]
    async fn test_transition_events() {
        let (registry, bus) = setup();
        let mut rx = bus.subscribe();
        let handle = spawn_named("r1", 0.5, &registry, &bus);
        let a1 = ActorId::from("a1");
        handle.occupy(&a1).await.unwrap();
        handle.occupy(&ActorId::from("a2")).await.unwrap();
        handle.vacate().await.unwrap();
        handle.status().await.unwrap();

        let kinds: Vec<MarketEventKind> = rx.drain().into_iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                MarketEventKind::ResourceCreated {
                    resource_id: ResourceId::from("r1")
                },
                MarketEventKind::ResourceOccupied {
                    resource_id: ResourceId::from("r1"),
                    actor_id: a1.clone()
                },
                MarketEventKind::ClaimRejected {
                    resource_id: ResourceId::from("r1"),
                    actor_id: ActorId::from("a2"),
                    holder: a1.clone()
                },
                MarketEventKind::ResourceVacated {
                    resource_id: ResourceId::from("r1"),
                    previous: Some(a1)
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_shutdown_closes_mailbox() {
        let (registry, bus) = setup();
        let (handle, task) = Resource::start(
            ResourceId::from("r1"),
            Attributes::new(),
            registry.clone(),
            bus,
            &ResourceConfig::default(),
        )
        .unwrap();

        handle.shutdown().await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(
            handle.status().await,
            Err(ResourceError::MailboxClosed {
                resource_id: ResourceId::from("r1")
            })
        );
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected() {
        let (registry, bus) = setup();
        let first = spawn_named("r1", 0.5, &registry, &bus);
        first.occupy(&ActorId::from("a1")).await.unwrap();

        let second = Resource::start(
            ResourceId::from("r1"),
            attributes([("quality", 0.1)]),
            registry.clone(),
            bus.clone(),
            &ResourceConfig::default(),
        );
        assert!(matches!(
            second,
            Err(crate::Error::Registry(RegistryError::AlreadyRegistered { .. }))
        ));
        // the live resource's record is untouched
        let record = registry.get(first.id()).unwrap();
        assert_eq!(record.status, ResourceStatus::Occupied(ActorId::from("a1")));
        assert_eq!(record.attributes, attributes([("quality", 0.5)]));
    }

    #[tokio::test]
    async fn test_zero_capacity_rejected() {
        let (registry, bus) = setup();
        let result = Resource::spawn(
            Attributes::new(),
            registry.clone(),
            bus,
            &ResourceConfig {
                mailbox_capacity: 0,
            },
        );
        assert!(result.is_err());
        assert!(registry.is_empty());
    }
}
