//! Poll engine
//!
//! Periodically resolves target identities and records each target's
//! online/offline status in the [`StateStore`](crate::store::StateStore).

mod engine;
pub mod payload;

pub use engine::{
    MIN_POLL_INTERVAL, MIN_REQUEST_TIMEOUT, PollEngine, PollerHandle, STOP_GRACE,
};
pub use payload::{MetricsError, PayloadDefaults, PollOutcome, normalize_metrics};
