// libs/slot-cell/src/services/conflict.rs
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::{
    AvailabilityQuery, ConflictCheckResponse, Slot, SlotError, SlotStatus, TimeRange,
};
use crate::services::store::{Occupancy, SlotFilter, SlotStore};

/// Half-open overlap: touching endpoints do not overlap.
pub fn overlaps(a: &TimeRange, b: &TimeRange) -> bool {
    a.start < b.end && b.start < a.end
}

pub struct ConflictDetectionService {
    store: Arc<dyn SlotStore>,
}

impl ConflictDetectionService {
    pub fn new(store: Arc<dyn SlotStore>) -> Self {
        Self { store }
    }

    /// Non-cancelled slots of the same (practitioner, service) overlapping the range.
    pub async fn check_conflicts(
        &self,
        practitioner_id: Uuid,
        service_id: Uuid,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        exclude_slot_id: Option<Uuid>,
    ) -> Result<ConflictCheckResponse, SlotError> {
        let range = TimeRange::new(start_time, end_time)?;
        debug!("Checking conflicts for practitioner {} service {} from {} to {}",
               practitioner_id, service_id, start_time, end_time);

        let filter = SlotFilter {
            practitioner_id: Some(practitioner_id),
            service_id: Some(service_id),
            exclude_id: exclude_slot_id,
            ..SlotFilter::default()
        }
        .with_status_not_in(&[SlotStatus::Cancelled])
        .overlapping(range);

        let conflicting_slots = self.store.query(&filter).await?;
        let has_conflict = !conflicting_slots.is_empty();

        if has_conflict {
            warn!("Conflict detected for practitioner {} - {} overlapping slots",
                  practitioner_id, conflicting_slots.len());
        }

        Ok(ConflictCheckResponse {
            has_conflict,
            conflicting_slots,
        })
    }

    pub async fn has_conflict(
        &self,
        practitioner_id: Uuid,
        service_id: Uuid,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        exclude_slot_id: Option<Uuid>,
    ) -> Result<bool, SlotError> {
        Ok(self
            .check_conflicts(practitioner_id, service_id, start_time, end_time, exclude_slot_id)
            .await?
            .has_conflict)
    }

    /// Bookable slots: unbooked, pending, starting inside the window and not yet started.
    pub async fn available_slots(&self, query: &AvailabilityQuery) -> Result<Vec<Slot>, SlotError> {
        if query.from >= query.to {
            return Err(SlotError::ValidationFailed(
                "availability window must end after it starts".to_string(),
            ));
        }

        let earliest = query.from.max(Utc::now());
        let filter = SlotFilter {
            practitioner_id: Some(query.practitioner_id),
            service_id: query.service_id,
            starts_at_or_after: Some(earliest),
            starts_before: Some(query.to),
            ..SlotFilter::default()
        }
        .with_occupancy(Occupancy::Unbooked)
        .with_status_in(&[SlotStatus::Pending]);

        let slots = self.store.query(&filter).await?;
        debug!("Found {} available slots for practitioner {}", slots.len(), query.practitioner_id);
        Ok(slots)
    }
}
