// libs/slot-cell/src/services/reaper.rs
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::{ReapReport, SlotError};
use crate::services::retry::retry_transient_once;
use crate::services::store::{Occupancy, SlotFilter, SlotStore};

/// Deletes never-booked slots whose start time has passed.
pub struct StaleSlotReaper {
    store: Arc<dyn SlotStore>,
}

impl StaleSlotReaper {
    pub fn new(store: Arc<dyn SlotStore>) -> Self {
        Self { store }
    }

    pub async fn reap(&self, practitioner_id: Uuid) -> Result<ReapReport, SlotError> {
        self.reap_before(practitioner_id, Utc::now()).await
    }

    /// Unbooked rows of any status qualify, which covers auto-suspended
    /// ghosts left behind by a deleted cause. Booked rows never do.
    pub async fn reap_before(&self, practitioner_id: Uuid, now: DateTime<Utc>) -> Result<ReapReport, SlotError> {
        debug!("Reaping stale slots for practitioner {} before {}", practitioner_id, now);

        let stale = SlotFilter {
            practitioner_id: Some(practitioner_id),
            starts_before: Some(now),
            ..SlotFilter::default()
        }
        .with_occupancy(Occupancy::Unbooked);

        let deleted = retry_transient_once("reap", || self.store.delete_where(&stale))
            .await
            .map_err(|e| {
                warn!("Reap for practitioner {} failed: {}", practitioner_id, e);
                SlotError::from(e)
            })?;

        let report = ReapReport {
            deleted: deleted.len(),
            ghost_suspensions: deleted.iter().filter(|s| s.is_suspended()).count(),
        };

        if report.deleted > 0 {
            info!("Reaped {} stale slots ({} suspended ghosts) for practitioner {}",
                  report.deleted, report.ghost_suspensions, practitioner_id);
        }
        Ok(report)
    }
}
