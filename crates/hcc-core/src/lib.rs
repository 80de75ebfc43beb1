//! hcc-core: shared foundation for the home climate control crates.
//!
//! Contains:
//! - signal (timestamped value-or-error envelope threaded through every stage)
//! - flux (stream plumbing: pipelines, subscriptions, multicast, signal hub)
//! - hvac (operating mode and unit command vocabulary)
//! - numeric (Real + tolerances + float helpers)
//! - error (shared error types)

pub mod error;
pub mod flux;
pub mod hvac;
pub mod numeric;
pub mod signal;

pub use error::{CoreError, CoreResult};
pub use flux::{Flux, Multicast, Pipeline, SignalHub, SignalSource, Subscription};
pub use hvac::{HvacCommand, HvacMode};
pub use numeric::*;
pub use signal::{Signal, SignalError, SignalStatus, Timestamp};

/// Anything with a stable, configuration-derived address.
pub trait Addressable {
    fn address(&self) -> &str;
}
