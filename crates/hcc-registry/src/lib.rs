//! Entity registry.
//!
//! Configuration is assembled in no particular order: a zone may ask for its
//! sensor before the sensor is registered. An [`EntityProvider`] collects one
//! kind of entity, replays every registration to late subscribers and lets
//! consumers wait, for a bounded time, for an entity to show up.

pub mod error;
pub mod provider;

pub use error::{RegistryError, RegistryResult};
pub use provider::{DEFAULT_DISCOVERY_TIMEOUT, EntityProvider};
