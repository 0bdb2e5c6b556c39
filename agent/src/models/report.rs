//! Per-cycle update results and the version report sent to the backend

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::service::ServiceName;

/// Outcome of one service within a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateStatus {
    /// Remote version equals the recorded one
    Unchanged,

    /// A new version was confirmed running and recorded
    Updated,

    /// Some step failed; the recorded version was left as is
    Failed,

    /// Self-replacement handed off, confirmed by the next agent instance.
    /// Only used for the agent, in a report without a device entry.
    Pending,
}

/// Report line for one service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceReport {
    #[serde(rename = "service_name")]
    pub service: ServiceName,

    /// Version observed (remote digest when known, recorded version otherwise)
    pub version: Option<String>,

    pub status: UpdateStatus,

    pub observed_at: DateTime<Utc>,
}

/// Outcome of one orchestration cycle. Consumed by the report step.
#[derive(Debug, Clone)]
pub struct UpdateCycleResult {
    pub cycle_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub services: Vec<ServiceReport>,
}

impl UpdateCycleResult {
    pub fn new(cycle_id: Uuid) -> Self {
        Self {
            cycle_id,
            started_at: Utc::now(),
            finished_at: None,
            services: Vec::new(),
        }
    }

    pub fn record(&mut self, service: ServiceName, version: Option<String>, status: UpdateStatus) {
        self.services.push(ServiceReport {
            service,
            version,
            status,
            observed_at: Utc::now(),
        });
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn get(&self, service: ServiceName) -> Option<&ServiceReport> {
        self.services.iter().find(|r| r.service == service)
    }

    pub fn status_of(&self, service: ServiceName) -> Option<UpdateStatus> {
        self.get(service).map(|r| r.status)
    }

    pub fn any_updated(&self) -> bool {
        self.services.iter().any(|r| r.status == UpdateStatus::Updated)
    }
}
