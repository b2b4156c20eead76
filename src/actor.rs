//! # Actor
//!
//! An actor is an autonomous tenant. It runs its own task and wakes up once
//! per interval to decide whether to stay where it is or move.
//!
//! ## Tick
//!
//! Each tick runs these steps in order:
//!
//! 1. Exit check: with probability `exit_probability` the actor releases what
//!    it holds and stops for good.
//! 2. Dwell update: a held resource ages by one tick.
//! 3. Search decision: a resourceless actor always searches; a tenant searches
//!    only when its satisfaction score is negative.
//! 4. Search and claim: the best vacancy by utility is claimed. Ties go to the
//!    vacancy published first. A vacancy whose resource can no longer be
//!    reached is passed over for the next best. Losing the race is not an
//!    error; the actor tries again next tick.
//! 5. Chain release: after a new resource is secured, the previous one is
//!    vacated. The actor briefly holds both; it never holds neither while
//!    switching.
//!
//! [`Actor::tick`] runs a single step and is what the spawned loop calls, so
//! tests can drive an actor without timers.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{RwLock, broadcast};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::MarketResult;
use crate::config::ActorConfig;
use crate::event_bus::{EventBus, MarketEventKind};
use crate::registry::{Registry, ResourceRecord};
use crate::resource::{OccupyOutcome, ResourceHandle};
use crate::scoring::{SharedSatisfaction, SharedUtility, Utility};
use crate::types::{ActorId, Attributes, ResourceId};

/// The resource an actor currently holds, as seen from outside.
#[derive(Debug, Clone, PartialEq)]
pub struct Holding {
    pub resource_id: ResourceId,
    pub dwell_ticks: u64,
    pub attributes: Attributes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum ActorLifecycle {
    Running,
    Exited,
    Stopped,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActorView {
    pub id: ActorId,
    pub lifecycle: ActorLifecycle,
    pub ticks: u64,
    pub holding: Option<Holding>,
}

/// What a single tick did.
#[derive(Debug, Clone, PartialEq, strum::Display)]
pub enum TickOutcome {
    Exited {
        released: Option<ResourceId>,
    },
    /// Holding a resource and not searching.
    Satisfied,
    /// Nothing vacant that is still reachable.
    NoVacancy,
    /// The chosen vacancy was taken by someone else first.
    Contended {
        resource_id: ResourceId,
    },
    /// The claim was sent but no answer came back.
    Unreachable {
        resource_id: ResourceId,
    },
    Acquired {
        resource_id: ResourceId,
        released: Option<ResourceId>,
    },
}

struct Tenure {
    address: ResourceHandle,
    dwell_ticks: u64,
    attributes: Attributes,
}

impl Tenure {
    fn view(&self) -> Holding {
        Holding {
            resource_id: self.address.id().clone(),
            dwell_ticks: self.dwell_ticks,
            attributes: self.attributes.clone(),
        }
    }
}

pub struct Actor {
    id: ActorId,
    registry: Arc<Registry>,
    event_bus: Arc<EventBus>,
    utility: SharedUtility,
    satisfaction: SharedSatisfaction,
    config: ActorConfig,
    rng: StdRng,
    tenure: Option<Tenure>,
    ticks: u64,
    lifecycle: ActorLifecycle,
    view: Arc<RwLock<ActorView>>,
}

impl Actor {
    /// Build an actor with a generated id. Invalid parameters are rejected
    /// here rather than at tick time.
    pub fn new(
        registry: Arc<Registry>,
        event_bus: Arc<EventBus>,
        utility: SharedUtility,
        satisfaction: SharedSatisfaction,
        config: ActorConfig,
    ) -> MarketResult<Self> {
        Self::with_id(
            ActorId::generate(),
            registry,
            event_bus,
            utility,
            satisfaction,
            config,
        )
    }

    pub fn with_id(
        id: ActorId,
        registry: Arc<Registry>,
        event_bus: Arc<EventBus>,
        utility: SharedUtility,
        satisfaction: SharedSatisfaction,
        config: ActorConfig,
    ) -> MarketResult<Self> {
        config.validate()?;
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let view = Arc::new(RwLock::new(ActorView {
            id: id.clone(),
            lifecycle: ActorLifecycle::Running,
            ticks: 0,
            holding: None,
        }));

        Ok(Self {
            id,
            registry,
            event_bus,
            utility,
            satisfaction,
            config,
            rng,
            tenure: None,
            ticks: 0,
            lifecycle: ActorLifecycle::Running,
            view,
        })
    }

    pub fn id(&self) -> &ActorId {
        &self.id
    }

    pub fn holding(&self) -> Option<Holding> {
        self.tenure.as_ref().map(Tenure::view)
    }

    pub fn lifecycle(&self) -> ActorLifecycle {
        self.lifecycle
    }

    /// Start the periodic loop on its own task.
    pub fn spawn(self) -> ActorHandle {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let id = self.id.clone();
        let view = self.view.clone();
        let registry = self.registry.clone();
        let task = tokio::spawn(self.run(shutdown_rx));
        ActorHandle {
            id,
            view,
            registry,
            shutdown_tx,
            task,
        }
    }

    /// Tick every interval until the actor exits or a shutdown arrives.
    ///
    /// A shutdown only interrupts the wait between ticks, never a tick.
    pub async fn run(mut self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(actor_id = %self.id, interval_ms = self.config.interval.as_millis() as u64, "Actor started");
        self.event_bus.publish(MarketEventKind::ActorStarted {
            actor_id: self.id.clone(),
        });

        loop {
            tokio::select! {
                Ok(()) = shutdown_rx.recv() => {
                    self.stop().await;
                    break;
                }
                _ = tokio::time::sleep(self.config.interval) => {
                    let outcome = self.tick().await;
                    debug!(actor_id = %self.id, tick = self.ticks, outcome = %outcome, "Tick completed");
                    if matches!(outcome, TickOutcome::Exited { .. }) {
                        break;
                    }
                }
            }
        }
    }

    /// Run one tick. Once the actor has left the market every further call
    /// is a no-op reporting `Exited`.
    pub async fn tick(&mut self) -> TickOutcome {
        if self.lifecycle != ActorLifecycle::Running {
            return TickOutcome::Exited { released: None };
        }
        self.ticks += 1;

        let draw: f64 = self.rng.gen_range(0.0..1.0);
        if draw < self.config.exit_probability {
            let released = self.release_held().await;
            self.lifecycle = ActorLifecycle::Exited;
            info!(actor_id = %self.id, released = ?released, "Actor exited");
            self.event_bus.publish(MarketEventKind::ActorExited {
                actor_id: self.id.clone(),
                released: released.clone(),
            });
            self.refresh_view().await;
            return TickOutcome::Exited { released };
        }

        if let Some(tenure) = self.tenure.as_mut() {
            tenure.dwell_ticks += 1;
        }

        let should_search = match &self.tenure {
            None => true,
            Some(tenure) => {
                self.satisfaction
                    .score(&tenure.attributes, tenure.dwell_ticks)
                    < 0.0
            }
        };

        let outcome = if should_search {
            self.search().await
        } else {
            TickOutcome::Satisfied
        };
        self.refresh_view().await;
        outcome
    }

    async fn search(&mut self) -> TickOutcome {
        let vacancies = self.registry.list_vacant();
        let held = self.tenure.as_ref().map(|t| t.address.id().clone());
        let ranked = rank_vacancies(&vacancies, held.as_ref(), self.utility.as_ref());

        // one claim per tick, sent to the best vacancy that is still alive
        let Some(address) = ranked.into_iter().find_map(|record| {
            match self.registry.address(&record.id) {
                Some(address) if !address.is_closed() => Some(address),
                _ => {
                    debug!(actor_id = %self.id, resource_id = %record.id, "Skipping retired vacancy");
                    None
                }
            }
        }) else {
            debug!(actor_id = %self.id, "No vacancy to claim");
            return TickOutcome::NoVacancy;
        };
        let resource_id = address.id().clone();

        match address.occupy(&self.id).await {
            Ok(OccupyOutcome::Acquired) => self.acquire(address).await,
            Ok(OccupyOutcome::AlreadyOccupied) => {
                debug!(actor_id = %self.id, resource_id = %resource_id, "Lost claim race");
                TickOutcome::Contended { resource_id }
            }
            Err(e) => {
                warn!(actor_id = %self.id, resource_id = %resource_id, error = %e, "Claim failed");
                TickOutcome::Unreachable { resource_id }
            }
        }
    }

    /// The new resource is ours; let go of the old one, then cache what we got.
    async fn acquire(&mut self, address: ResourceHandle) -> TickOutcome {
        let resource_id = address.id().clone();
        let released = self.release_held().await;

        let attributes = match tokio::time::timeout(self.config.status_timeout(), address.status())
            .await
        {
            Ok(Ok(snapshot)) => snapshot.attributes,
            Ok(Err(e)) => {
                warn!(actor_id = %self.id, resource_id = %resource_id, error = %e, "Status fetch failed, caching no attributes");
                Attributes::new()
            }
            Err(_) => {
                warn!(actor_id = %self.id, resource_id = %resource_id, "Status fetch timed out, caching no attributes");
                Attributes::new()
            }
        };

        self.tenure = Some(Tenure {
            address,
            dwell_ticks: 0,
            attributes,
        });

        match &released {
            Some(from) => {
                info!(actor_id = %self.id, from = %from, to = %resource_id, "Actor switched resource");
                self.event_bus.publish(MarketEventKind::ActorSwitched {
                    actor_id: self.id.clone(),
                    from: from.clone(),
                    to: resource_id.clone(),
                });
            }
            None => info!(actor_id = %self.id, resource_id = %resource_id, "Actor acquired resource"),
        }

        TickOutcome::Acquired {
            resource_id,
            released,
        }
    }

    async fn release_held(&mut self) -> Option<ResourceId> {
        let tenure = self.tenure.take()?;
        let resource_id = tenure.address.id().clone();
        if let Err(e) = tenure.address.vacate().await {
            warn!(actor_id = %self.id, resource_id = %resource_id, error = %e, "Release failed");
        }
        Some(resource_id)
    }

    async fn stop(&mut self) {
        let released = self.release_held().await;
        self.lifecycle = ActorLifecycle::Stopped;
        info!(actor_id = %self.id, released = ?released, "Actor stopped");
        self.event_bus.publish(MarketEventKind::ActorStopped {
            actor_id: self.id.clone(),
            released,
        });
        self.refresh_view().await;
    }

    async fn refresh_view(&self) {
        let mut view = self.view.write().await;
        view.lifecycle = self.lifecycle;
        view.ticks = self.ticks;
        view.holding = self.holding();
    }
}

/// Candidates by descending utility. The sort is stable, so equal scores
/// keep registry order and the earliest record wins a tie. NaN scores and the
/// resource already held are never candidates.
fn rank_vacancies<'a>(
    vacancies: &'a [ResourceRecord],
    exclude: Option<&ResourceId>,
    utility: &dyn Utility,
) -> Vec<&'a ResourceRecord> {
    let mut scored: Vec<(&ResourceRecord, f64)> = vacancies
        .iter()
        .filter(|record| exclude != Some(&record.id))
        .map(|record| (record, utility.score(&record.attributes)))
        .filter(|(_, score)| !score.is_nan())
        .collect();
    scored.sort_by(|a, b| b.1.total_cmp(&a.1));
    scored.into_iter().map(|(record, _)| record).collect()
}

/// Handle to a spawned actor.
pub struct ActorHandle {
    id: ActorId,
    view: Arc<RwLock<ActorView>>,
    registry: Arc<Registry>,
    shutdown_tx: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

impl ActorHandle {
    pub fn id(&self) -> &ActorId {
        &self.id
    }

    pub async fn snapshot(&self) -> ActorView {
        self.view.read().await.clone()
    }

    pub(crate) fn view(&self) -> Arc<RwLock<ActorView>> {
        self.view.clone()
    }

    /// Ask the actor to release what it holds and stop, waiting at most
    /// `timeout` for it to do so.
    ///
    /// On timeout the task is aborted and every resource still published as
    /// held by this actor is vacated from here. A claim still queued at the
    /// resource rolls itself back once it finds the claimant gone.
    #[tracing::instrument(skip(self), fields(actor_id = %self.id), level = "debug")]
    pub async fn stop(mut self, timeout: Duration) -> ActorResult<ActorView> {
        // fails only when the loop has already ended
        let _ = self.shutdown_tx.send(());
        match tokio::time::timeout(timeout, &mut self.task).await {
            Ok(Ok(())) => Ok(self.snapshot().await),
            Ok(Err(e)) => Err(ActorError::Join {
                actor_id: self.id.clone(),
                message: e.to_string(),
            }),
            Err(_) => {
                self.task.abort();
                // the loop must be gone before sweeping or it could claim again
                let _ = (&mut self.task).await;
                self.release_orphans().await;
                Err(ActorError::ShutdownTimeout {
                    actor_id: self.id.clone(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Wait for the actor to leave on its own.
    pub async fn join(self) -> ActorResult<ActorView> {
        self.task.await.map_err(|e| ActorError::Join {
            actor_id: self.id.clone(),
            message: e.to_string(),
        })?;
        let view = self.view.read().await.clone();
        Ok(view)
    }

    async fn release_orphans(&self) {
        for resource_id in self.registry.occupied_by(&self.id) {
            let Some(address) = self.registry.address(&resource_id) else {
                continue;
            };
            warn!(actor_id = %self.id, resource_id = %resource_id, "Releasing resource of aborted actor");
            if let Err(e) = address.vacate().await {
                warn!(actor_id = %self.id, resource_id = %resource_id, error = %e, "Release failed");
            }
        }
        let mut view = self.view.write().await;
        view.lifecycle = ActorLifecycle::Stopped;
        view.holding = None;
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ActorError {
    #[error("Shutdown timeout for actor {actor_id} exceeded: {timeout_ms}ms")]
    ShutdownTimeout { actor_id: ActorId, timeout_ms: u64 },
    #[error("Actor {actor_id} task failed: {message}")]
    Join { actor_id: ActorId, message: String },
}

pub type ActorResult<T> = Result<T, ActorError>;
