//! Capacity gate — per-instance admission against a session maximum.
//!
//! The count comes from the shared store and the subsequent `add` is a
//! separate call, so a burst of concurrent page loads can overshoot the
//! maximum by the number of racing requests. This is a soft limit.

use std::sync::Arc;

use crate::error::StoreError;
use crate::store::SessionStore;

/// Outcome of a capacity check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacityCheck {
    pub active: usize,
    pub max: usize,
}

impl CapacityCheck {
    pub fn admitted(&self) -> bool {
        self.active < self.max
    }
}

#[derive(Clone)]
pub struct CapacityGate {
    store: Arc<dyn SessionStore>,
}

impl CapacityGate {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }

    /// Whether `instance_id` may take one more session.
    pub fn admit(&self, instance_id: &str, max_per_instance: usize) -> Result<bool, StoreError> {
        Ok(self.check(instance_id, max_per_instance)?.admitted())
    }

    pub fn check(
        &self,
        instance_id: &str,
        max_per_instance: usize,
    ) -> Result<CapacityCheck, StoreError> {
        Ok(CapacityCheck {
            active: self.store.count_for_instance(instance_id)?,
            max: max_per_instance,
        })
    }
}
