use thiserror::Error;

use crate::config::ConfigError;
use crate::daemon::ipc::IpcError;
use crate::daemon::registry::{RegistryError, SpawnError};
use crate::model::StateError;
use crate::store::StoreError;
use crate::sync::remote::ConnectionError;
use crate::workspace::ResolverError;

/// Crate-level convenience error.
///
/// A thin wrapper over the per-capability errors; each component owns its
/// own taxonomy and this enum only routes them.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Resolver(#[from] ResolverError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Spawn(#[from] SpawnError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Ipc(#[from] IpcError),
}
