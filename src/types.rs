//! Identifiers and value types shared by the registry, resources and actors.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Named numeric attributes of a resource (e.g. `quality`).
pub type Attributes = HashMap<String, f64>;

macro_rules! string_id {
    ($name:ident, $prefix:literal) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            /// Generate a fresh random id.
            pub fn generate() -> Self {
                Self(format!(concat!($prefix, "-{}"), Uuid::new_v4().simple()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(ResourceId, "resource");
string_id!(ActorId, "actor");

/// Occupancy of a resource as last published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceStatus {
    Vacant,
    Occupied(ActorId),
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceStatus::Vacant => f.write_str("Vacant"),
            ResourceStatus::Occupied(actor_id) => write!(f, "Occupied({})", actor_id),
        }
    }
}

impl ResourceStatus {
    pub fn is_vacant(&self) -> bool {
        matches!(self, ResourceStatus::Vacant)
    }

    pub fn occupant(&self) -> Option<&ActorId> {
        match self {
            ResourceStatus::Vacant => None,
            ResourceStatus::Occupied(actor_id) => Some(actor_id),
        }
    }
}

/// Build an [`Attributes`] map from `(name, value)` pairs.
pub fn attributes<I, K>(pairs: I) -> Attributes
where
    I: IntoIterator<Item = (K, f64)>,
    K: Into<String>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v)).collect()
}
