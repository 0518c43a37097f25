// libs/slot-cell/src/services/booking.rs
use std::sync::Arc;

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use shared_models::auth::ActorRole;

use crate::models::{
    AlternativeAction, AvailabilityQuery, BookSlotRequest, BookingOutcome, CancelSlotRequest,
    ConflictCheckRequest, ConflictCheckResponse, CreateSlotRequest, EditSlotRequest, NewSlot,
    PaymentStatus, SchedulingRules, Slot, SlotError, SlotStatus, TimeRange,
};
use crate::services::conflict::ConflictDetectionService;
use crate::services::ledger::PaymentLedger;
use crate::services::lifecycle::SlotLifecycleService;
use crate::services::notification::{Notification, NotificationService, TemplateKind};
use crate::services::store::{Occupancy, SlotFilter, SlotPatch, SlotStore};
use crate::services::suspension::SuspensionCoordinator;

/// Primary slot transitions. Each is a single conditional write; the
/// involuntary effects on other slots are reported, never raised.
pub struct SlotBookingService {
    store: Arc<dyn SlotStore>,
    conflicts: ConflictDetectionService,
    lifecycle: SlotLifecycleService,
    suspension: SuspensionCoordinator,
    notifications: NotificationService,
    ledger: Arc<dyn PaymentLedger>,
    rules: SchedulingRules,
}

impl SlotBookingService {
    pub fn new(
        store: Arc<dyn SlotStore>,
        notifications: NotificationService,
        ledger: Arc<dyn PaymentLedger>,
        rules: SchedulingRules,
    ) -> Self {
        Self {
            conflicts: ConflictDetectionService::new(store.clone()),
            lifecycle: SlotLifecycleService::new(),
            suspension: SuspensionCoordinator::new(store.clone(), notifications.clone()),
            store,
            notifications,
            ledger,
            rules,
        }
    }

    // ==========================================================================
    // READS
    // ==========================================================================

    pub async fn get_slot(&self, slot_id: Uuid) -> Result<Slot, SlotError> {
        debug!("Fetching slot {}", slot_id);

        self.store
            .get(slot_id)
            .await?
            .ok_or_else(|| SlotError::NotFound(format!("slot {}", slot_id)))
    }

    pub async fn check_conflict(&self, request: &ConflictCheckRequest) -> Result<ConflictCheckResponse, SlotError> {
        self.conflicts
            .check_conflicts(
                request.practitioner_id,
                request.service_id,
                request.start_time,
                request.end_time,
                request.exclude_slot_id,
            )
            .await
    }

    pub async fn available_slots(&self, query: &AvailabilityQuery) -> Result<Vec<Slot>, SlotError> {
        self.conflicts.available_slots(query).await
    }

    // ==========================================================================
    // CREATE
    // ==========================================================================

    pub async fn create_slot(&self, request: CreateSlotRequest) -> Result<Slot, SlotError> {
        let range = TimeRange::new(request.start_time, request.end_time)?;
        validate_price(request.custom_price)?;

        if self
            .conflicts
            .has_conflict(request.practitioner_id, request.service_id, range.start, range.end, None)
            .await?
        {
            return Err(SlotError::ConflictDetected);
        }

        let row = NewSlot {
            notes: request.notes,
            custom_price: request.custom_price,
            ..NewSlot::available(request.practitioner_id, request.service_id, range)
        };

        let slot = self
            .store
            .insert_batch(std::slice::from_ref(&row))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| SlotError::Database("insert returned no row".to_string()))?;

        info!("Created slot {} for practitioner {}", slot.id, slot.practitioner_id);
        Ok(slot)
    }

    // ==========================================================================
    // BOOK
    // ==========================================================================

    pub async fn book(&self, slot_id: Uuid, request: BookSlotRequest) -> Result<BookingOutcome, SlotError> {
        info!("Booking slot {} for client {}", slot_id, request.client_id);

        if request.payment_status == PaymentStatus::Refunded {
            return Err(SlotError::ValidationFailed("a new booking cannot be refunded".to_string()));
        }
        validate_price(request.custom_price)?;

        let before = self.get_slot(slot_id).await?;
        if before.is_booked() {
            return Err(SlotError::AlreadyBooked);
        }
        if self.lifecycle.is_terminal(before.status) {
            return Err(SlotError::InvalidTransition {
                from: before.status,
                to: SlotStatus::Confirmed,
            });
        }

        let beneficiary = request.beneficiary.clone();
        let patch = SlotPatch {
            client_id: Some(Some(request.client_id)),
            status: Some(SlotStatus::Confirmed),
            payment_status: Some(request.payment_status),
            beneficiary_name: beneficiary.as_ref().map(|b| Some(b.name.clone())),
            beneficiary_email: beneficiary.as_ref().map(|b| b.email.clone()),
            beneficiary_phone: beneficiary.as_ref().map(|b| b.phone.clone()),
            notes: request.notes.clone().map(Some),
            custom_price: request.custom_price.map(Some),
            ..SlotPatch::default()
        };

        let after = self
            .write_guarded(&before, Occupancy::Unbooked, &patch, SlotStatus::Confirmed)
            .await?;

        let outcome = self.commit_transition(&before, after).await;

        if request.awaiting_payment {
            debug!("Slot {} awaits payment, confirmation deferred", slot_id);
        } else {
            self.notify_parties(TemplateKind::Confirmation, &outcome.slot).await;
        }

        info!("Slot {} booked by client {}", slot_id, request.client_id);
        Ok(outcome)
    }

    // ==========================================================================
    // EDIT
    // ==========================================================================

    pub async fn edit_slot(&self, slot_id: Uuid, request: EditSlotRequest) -> Result<BookingOutcome, SlotError> {
        debug!("Editing slot {}", slot_id);

        let before = self.get_slot(slot_id).await?;
        let target_status = request.status.unwrap_or(before.status);

        if target_status == SlotStatus::Cancelled && before.status != SlotStatus::Cancelled {
            return Err(SlotError::ValidationFailed(
                "slots are cancelled through the cancel operation".to_string(),
            ));
        }
        self.lifecycle.validate_status_transition(before.status, target_status)?;

        if target_status == SlotStatus::Confirmed && !before.is_booked() {
            return Err(SlotError::ValidationFailed("only a booked slot can be confirmed".to_string()));
        }
        if !before.is_booked() && request.payment_status.is_some_and(|p| p != PaymentStatus::Unpaid) {
            return Err(SlotError::ValidationFailed(
                "an unbooked slot can only be unpaid".to_string(),
            ));
        }
        if request.moves_slot() && self.lifecycle.is_terminal(before.status) {
            return Err(SlotError::ValidationFailed(format!(
                "a {} slot cannot be moved",
                before.status
            )));
        }
        validate_price(request.custom_price)?;

        let practitioner_id = request.practitioner_id.unwrap_or(before.practitioner_id);
        let service_id = request.service_id.unwrap_or(before.service_id);
        let range = TimeRange::new(
            request.start_time.unwrap_or(before.start_time),
            request.end_time.unwrap_or(before.end_time),
        )?;

        if request.moves_slot() {
            if before.status == SlotStatus::Confirmed && self.rules.trust_operator_service_edits {
                debug!("Trusted operator edit of confirmed slot {}, skipping conflict check", slot_id);
            } else if self
                .conflicts
                .has_conflict(practitioner_id, service_id, range.start, range.end, Some(slot_id))
                .await?
            {
                return Err(SlotError::ConflictDetected);
            }
        }

        let patch = SlotPatch {
            practitioner_id: request.practitioner_id,
            service_id: request.service_id,
            start_time: request.start_time,
            end_time: request.end_time,
            status: request.status,
            payment_status: request.payment_status,
            notes: request.notes.clone().map(Some),
            custom_price: request.custom_price.map(Some),
            ..SlotPatch::default()
        };

        let after = self
            .write_guarded(&before, occupancy_of(&before), &patch, target_status)
            .await?;

        let outcome = self.commit_transition(&before, after).await;

        if before.status != SlotStatus::Confirmed && outcome.slot.status == SlotStatus::Confirmed {
            self.notify_parties(TemplateKind::Confirmation, &outcome.slot).await;
        }

        info!("Slot {} edited ({} -> {})", slot_id, before.status, outcome.slot.status);
        Ok(outcome)
    }

    // ==========================================================================
    // CANCEL
    // ==========================================================================

    /// Paid (or keep-history) bookings are retained as `cancelled`; unpaid
    /// bookings are released back to `pending`. An unbooked slot is always
    /// released, so it stays available; use `delete_slot` to withdraw it.
    pub async fn cancel(
        &self,
        slot_id: Uuid,
        actor: ActorRole,
        request: CancelSlotRequest,
    ) -> Result<BookingOutcome, SlotError> {
        info!("Cancelling slot {} as {:?}", slot_id, actor);

        let before = self.get_slot(slot_id).await?;
        if self.lifecycle.is_terminal(before.status) {
            return Err(SlotError::InvalidTransition {
                from: before.status,
                to: SlotStatus::Cancelled,
            });
        }

        let linked = self.ledger.has_linked_transaction(slot_id).await.map_err(|e| {
            error!("Payment ledger check failed for slot {}: {}", slot_id, e);
            SlotError::from(e)
        })?;
        if linked && !actor.is_privileged() {
            warn!("Slot {} has a settled transaction; {:?} may move it instead", slot_id, actor);
            return Err(SlotError::HasLinkedTransaction {
                alternative: AlternativeAction::MoveSlot,
            });
        }

        let retain = before.is_booked() && (before.payment_status == PaymentStatus::Paid || request.keep_history);

        let (patch, target) = if retain {
            (
                SlotPatch {
                    status: Some(SlotStatus::Cancelled),
                    cancellation_reason: Some(request.reason.clone()),
                    ..SlotPatch::default()
                },
                SlotStatus::Cancelled,
            )
        } else {
            (
                SlotPatch {
                    client_id: Some(None),
                    status: Some(SlotStatus::Pending),
                    payment_status: Some(PaymentStatus::Unpaid),
                    beneficiary_name: Some(None),
                    beneficiary_email: Some(None),
                    beneficiary_phone: Some(None),
                    cancellation_reason: Some(None),
                    ..SlotPatch::default()
                },
                SlotStatus::Pending,
            )
        };

        let after = self
            .write_guarded(&before, occupancy_of(&before), &patch, target)
            .await?;

        let outcome = self.commit_transition(&before, after).await;

        if before.is_booked() {
            // The pre-cancel row still names the client on release.
            self.notify_parties(TemplateKind::Cancellation, &before).await;
        }

        info!("Slot {} cancelled ({})", slot_id, if retain { "retained" } else { "released" });
        Ok(outcome)
    }

    // ==========================================================================
    // COMPLETE
    // ==========================================================================

    pub async fn complete(&self, slot_id: Uuid) -> Result<BookingOutcome, SlotError> {
        let before = self.get_slot(slot_id).await?;
        if self.lifecycle.is_terminal(before.status) {
            return Err(SlotError::InvalidTransition {
                from: before.status,
                to: SlotStatus::Completed,
            });
        }

        let patch = SlotPatch {
            status: Some(SlotStatus::Completed),
            ..SlotPatch::default()
        };

        let after = self
            .write_guarded(&before, occupancy_of(&before), &patch, SlotStatus::Completed)
            .await?;

        info!("Slot {} completed", slot_id);
        Ok(self.commit_transition(&before, after).await)
    }

    // ==========================================================================
    // DELETE
    // ==========================================================================

    pub async fn delete_slot(&self, slot_id: Uuid, actor: ActorRole) -> Result<BookingOutcome, SlotError> {
        if !actor.is_operator() {
            return Err(SlotError::Forbidden("only operators can delete slots".to_string()));
        }

        let before = self.get_slot(slot_id).await?;
        if before.is_booked() && !actor.is_privileged() {
            return Err(SlotError::Forbidden("booked slots can only be deleted by an admin".to_string()));
        }

        let guard = SlotFilter::by_id(slot_id)
            .with_occupancy(occupancy_of(&before))
            .with_status_in(&[before.status]);

        let deleted = match self.store.delete_where(&guard).await?.into_iter().next() {
            Some(slot) => slot,
            None => return Err(self.lost_race(&before, before.status).await),
        };

        let side_effects = self.suspension.on_deleted(&deleted).await;

        if deleted.is_booked() {
            self.notify_parties(TemplateKind::Cancellation, &deleted).await;
        }

        info!("Deleted slot {} ({})", slot_id, deleted.status);
        Ok(BookingOutcome {
            slot: deleted,
            side_effects,
        })
    }

    // ==========================================================================
    // SHARED
    // ==========================================================================

    /// The one place a committed before/after pair reaches the suspension
    /// coordinator.
    async fn commit_transition(&self, before: &Slot, after: Slot) -> BookingOutcome {
        let side_effects = self.suspension.on_transition(before, &after).await;

        if !side_effects.is_complete() {
            warn!("Slot {} committed with an incomplete sweep: {:?}", after.id, side_effects);
        }

        BookingOutcome {
            slot: after,
            side_effects,
        }
    }

    /// Conditional update that only lands if the row still has the status
    /// and occupancy that were read.
    async fn write_guarded(
        &self,
        before: &Slot,
        occupancy: Occupancy,
        patch: &SlotPatch,
        target: SlotStatus,
    ) -> Result<Slot, SlotError> {
        let guard = SlotFilter::by_id(before.id)
            .with_occupancy(occupancy)
            .with_status_in(&[before.status]);

        let updated = self.store.update_where(&guard, patch).await.map_err(|e| {
            error!("Write to slot {} failed: {}", before.id, e);
            SlotError::from(e)
        })?;

        match updated.into_iter().next() {
            Some(slot) => Ok(slot),
            None => Err(self.lost_race(before, target).await),
        }
    }

    /// Explains a failed guard from a fresh read of the row.
    async fn lost_race(&self, before: &Slot, target: SlotStatus) -> SlotError {
        match self.store.get(before.id).await {
            Ok(None) => SlotError::NotFound(format!("slot {}", before.id)),
            Ok(Some(current)) if current.is_booked() && !before.is_booked() => SlotError::AlreadyBooked,
            Ok(Some(current)) => SlotError::InvalidTransition {
                from: current.status,
                to: target,
            },
            Err(e) => e.into(),
        }
    }

    async fn notify_parties(&self, template: TemplateKind, slot: &Slot) {
        let dispatched = self
            .notifications
            .dispatch_all(Notification::for_parties(template, slot))
            .await;
        debug!("Dispatched {} {:?} notices for slot {}", dispatched, template, slot.id);
    }
}

fn occupancy_of(slot: &Slot) -> Occupancy {
    if slot.is_booked() {
        Occupancy::Booked
    } else {
        Occupancy::Unbooked
    }
}

fn validate_price(price: Option<f64>) -> Result<(), SlotError> {
    match price {
        Some(p) if !p.is_finite() || p < 0.0 => {
            Err(SlotError::ValidationFailed("custom price must be a non-negative amount".to_string()))
        }
        _ => Ok(()),
    }
}
