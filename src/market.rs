//! # Market
//!
//! Owns one [`Registry`] and one [`EventBus`] and wires every resource and
//! actor it creates to them. Nothing here takes part in the claim protocol;
//! the market only keeps handles so the whole population can be inspected
//! and shut down together.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::actor::{Actor, ActorError, ActorHandle, ActorView};
use crate::config::{ActorConfig, MarketConfig};
use crate::event_bus::{EventBus, EventReceiver};
use crate::registry::Registry;
use crate::resource::{Resource, ResourceHandle};
use crate::scoring::{SharedSatisfaction, SharedUtility};
use crate::types::{ActorId, Attributes, ResourceId};
use crate::{Error, MarketResult};

struct RunningResource {
    handle: ResourceHandle,
    task: JoinHandle<()>,
}

pub struct Market {
    config: MarketConfig,
    registry: Arc<Registry>,
    event_bus: Arc<EventBus>,
    resources: DashMap<ResourceId, RunningResource>,
    actors: DashMap<ActorId, ActorHandle>,
}

impl Market {
    pub fn new(config: MarketConfig) -> MarketResult<Self> {
        config.validate()?;
        info!(
            event_buffer_size = config.event_buffer_size,
            interval_ms = config.actor.interval.as_millis() as u64,
            "Creating market"
        );
        Ok(Self {
            registry: Arc::new(Registry::new()),
            event_bus: Arc::new(EventBus::new(config.event_buffer_size)),
            resources: DashMap::new(),
            actors: DashMap::new(),
            config,
        })
    }

    pub fn config(&self) -> &MarketConfig {
        &self.config
    }

    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    pub fn event_bus(&self) -> Arc<EventBus> {
        self.event_bus.clone()
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.event_bus.subscribe()
    }

    pub fn add_resource(&self, attributes: Attributes) -> MarketResult<ResourceHandle> {
        self.add_resource_with_id(ResourceId::generate(), attributes)
    }

    pub fn add_resource_with_id(
        &self,
        id: ResourceId,
        attributes: Attributes,
    ) -> MarketResult<ResourceHandle> {
        let (handle, task) = Resource::start(
            id,
            attributes,
            self.registry.clone(),
            self.event_bus.clone(),
            &self.config.resource,
        )?;
        self.resources.insert(
            handle.id().clone(),
            RunningResource {
                handle: handle.clone(),
                task,
            },
        );
        Ok(handle)
    }

    pub fn resource(&self, id: &ResourceId) -> Option<ResourceHandle> {
        self.resources.get(id).map(|entry| entry.handle.clone())
    }

    /// Spawn an actor using the market's default actor configuration.
    pub fn add_actor(
        &self,
        utility: SharedUtility,
        satisfaction: SharedSatisfaction,
    ) -> MarketResult<ActorId> {
        self.add_actor_with_config(utility, satisfaction, self.config.actor.clone())
    }

    pub fn add_actor_with_config(
        &self,
        utility: SharedUtility,
        satisfaction: SharedSatisfaction,
        config: ActorConfig,
    ) -> MarketResult<ActorId> {
        let actor = Actor::new(
            self.registry.clone(),
            self.event_bus.clone(),
            utility,
            satisfaction,
            config,
        )?;
        let id = actor.id().clone();
        self.actors.insert(id.clone(), actor.spawn());
        Ok(id)
    }

    pub async fn actor_snapshot(&self, id: &ActorId) -> Option<ActorView> {
        // don't hold the map entry across the await
        let view = self.actors.get(id)?.view();
        let snapshot = view.read().await.clone();
        Some(snapshot)
    }

    pub fn actor_ids(&self) -> Vec<ActorId> {
        self.actors.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    pub fn actor_count(&self) -> usize {
        self.actors.len()
    }

    /// Stop one actor; it releases whatever it holds first.
    #[tracing::instrument(skip(self), level = "debug")]
    pub async fn stop_actor(&self, id: &ActorId) -> MarketResult<ActorView> {
        let (_, handle) = self
            .actors
            .remove(id)
            .ok_or_else(|| Error::internal(format!("Actor not found: {}", id)))?;
        Ok(handle.stop(self.config.shutdown_timeout).await?)
    }

    /// Stop every actor, then every resource.
    ///
    /// Actors go first so their releases are applied before the resources
    /// stop reading their mailboxes. Each resource retires from the registry
    /// as its task ends, so the registry is empty afterwards.
    #[tracing::instrument(skip(self), level = "debug")]
    pub async fn shutdown(&self) -> MarketResult<()> {
        info!(
            actors = self.actors.len(),
            resources = self.resources.len(),
            "Shutting down market"
        );

        let actor_ids = self.actor_ids();
        let handles: Vec<ActorHandle> = actor_ids
            .iter()
            .filter_map(|id| self.actors.remove(id).map(|(_, handle)| handle))
            .collect();
        let stop_timeout = self.config.shutdown_timeout;
        let results =
            futures::future::join_all(handles.into_iter().map(|h| h.stop(stop_timeout))).await;
        let mut first_error: Option<ActorError> = None;
        for result in results {
            if let Err(e) = result {
                warn!(error = %e, "Actor did not stop cleanly");
                first_error.get_or_insert(e);
            }
        }

        let resource_ids: Vec<ResourceId> = self
            .resources
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        for id in resource_ids {
            let Some((_, running)) = self.resources.remove(&id) else {
                continue;
            };
            if let Err(e) = running.handle.shutdown().await {
                warn!(resource_id = %id, error = %e, "Resource already stopped");
            }
            if timeout(stop_timeout, running.task).await.is_err() {
                warn!(resource_id = %id, "Resource task did not finish in time");
            }
        }

        info!("Market shutdown completed");
        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }
}
