//! # Tenancy: a decentralized resource market
//!
//! Independent [`actor`]s compete for exclusive occupancy of [`resource`]s.
//! Nobody schedules the market: every actor wakes on its own interval, looks
//! at the shared [`registry`] for vacancies, and tries to claim the one it
//! likes best. Resources settle those claims one at a time, so at most one
//! actor holds a resource at any moment.
//!
//! ## Components
//!
//! - Registry ([`registry`]): directory of the latest snapshot each resource
//!   published. It holds no business logic.
//! - Resource ([`resource`]): owns its occupancy state behind a mailbox and
//!   arbitrates claims first come, first served.
//! - Actor ([`actor`]): periodic decision loop of exit, evaluate and search.
//!   Scores come from caller supplied strategies ([`scoring`]).
//! - Events ([`event_bus`]): broadcast of market transitions for observers.
//! - Market ([`market`]): owns one registry and one bus, spawns resources and
//!   actors against them and shuts the population down.
//!
//! ## Claim Protocol
//!
//! ```text
//! Actor --list_vacant--> Registry
//! Actor --occupy-------> Resource --put(Occupied)--> Registry
//! Actor <--Acquired----- Resource
//! Actor --vacate-------> old Resource --put(Vacant)--> Registry
//! ```
//!
//! A resource publishes its new status before it answers the claimant, so an
//! actor never observes "acquired" while the registry still lists the
//! resource as vacant.

pub mod actor;
pub mod config;
pub mod error;
pub mod event_bus;
pub mod market;
pub mod registry;
pub mod resource;
pub mod scoring;
pub mod types;

// Re-exports
pub use actor::{Actor, ActorHandle, ActorLifecycle, ActorView, Holding, TickOutcome};
pub use config::{ActorConfig, MarketConfig, ResourceConfig};
pub use error::*;
pub use event_bus::{EventBus, EventReceiver, MarketEvent, MarketEventKind};
pub use market::Market;
pub use registry::{Registry, ResourceRecord};
pub use resource::{OccupyOutcome, Resource, ResourceHandle, ResourceSnapshot};
pub use scoring::{Satisfaction, SharedSatisfaction, SharedUtility, Utility};
pub use types::*;
