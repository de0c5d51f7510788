//! fleetwatch: identity reconciliation and status tracking for polled
//! remote instances.
//!
//! A fixed set of targets (see [`registry`]) is polled by the [`poller`].
//! Each target's durable id is resolved lazily through [`identity`], the
//! latest status per instance lives in the [`store`], and newly resolved
//! identities are broadcast through a [`notify`] sink.

#[cfg(feature = "api")]
pub mod api;
pub mod config;
pub mod identity;
pub mod notify;
pub mod poller;
pub mod registry;
pub mod store;
pub mod util;
