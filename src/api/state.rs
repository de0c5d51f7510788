//! Shared state for API handlers

use std::sync::Arc;

use crate::store::StateStore;

#[derive(Clone)]
pub struct ApiState {
    /// Store written by the poller; handlers only read from it
    pub store: Arc<StateStore>,

    /// Number of configured targets
    pub targets: usize,
}

impl ApiState {
    pub fn new(store: Arc<StateStore>, targets: usize) -> Self {
        Self { store, targets }
    }
}
