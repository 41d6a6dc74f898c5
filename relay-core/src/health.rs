//! Component health for the status command.
//!
//! Each subsystem reports one [`HealthCheck`]. The status carries the data an
//! operator acts on (how many records are stuck, why a component is off)
//! instead of free text alone.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Where a component stands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    /// Serving, but `pending` records have not reached the store yet.
    Lagging { pending: usize },
    /// Not doing its job at all; `reason` says why.
    Offline { reason: String },
}

/// One component's report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheck {
    pub component: String,
    pub status: HealthStatus,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, serde_json::Value>,
}

impl HealthCheck {
    fn new(component: impl Into<String>, status: HealthStatus) -> Self {
        Self {
            component: component.into(),
            status,
            details: BTreeMap::new(),
        }
    }

    pub fn healthy(component: impl Into<String>) -> Self {
        Self::new(component, HealthStatus::Healthy)
    }

    /// Serving with `pending` unpersisted records.
    pub fn lagging(component: impl Into<String>, pending: usize) -> Self {
        Self::new(component, HealthStatus::Lagging { pending })
    }

    pub fn offline(component: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(
            component,
            HealthStatus::Offline {
                reason: reason.into(),
            },
        )
    }

    /// Attach a detail shown next to the status.
    pub fn with_detail(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.details.insert(key.into(), value);
        self
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }

    /// Healthy or lagging: requests are still being served.
    pub fn is_serving(&self) -> bool {
        !matches!(self.status, HealthStatus::Offline { .. })
    }
}
