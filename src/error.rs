use thiserror::Error;

use crate::actor::ActorError;
use crate::config::ConfigError;
use crate::registry::RegistryError;
use crate::resource::ResourceError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),
    #[error("Resource error: {0}")]
    Resource(#[from] ResourceError),
    #[error("Actor error: {0}")]
    Actor(#[from] ActorError),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type MarketResult<T> = Result<T, Error>;

impl Error {
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Error::Internal(message.into())
    }
}
