//! Wardgate Services — approved-request execution.
//!
//! The [`Executor`] owns the static tool→service map and a registry of
//! [`ServiceHandler`](wardgate_core::ServiceHandler) implementations. It
//! only ever sees requests the policy (or a human) already approved.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod executor;
pub mod homeassistant;

pub use executor::Executor;
pub use homeassistant::HomeAssistantService;
