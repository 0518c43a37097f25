// libs/slot-cell/src/services/suspension.rs
use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::{Slot, SlotStatus, SweepReport};
use crate::services::lifecycle::{ConfirmationChange, SlotLifecycleService};
use crate::services::notification::{Notification, NotificationService, Recipient, TemplateKind};
use crate::services::retry::retry_transient_once;
use crate::services::store::{SlotFilter, SlotPatch, SlotStore, SuspensionFilter};

pub const SUSPENSION_REASON: &str = "suspended: overlapping booking confirmed";

/// Collapses overlapping different-service slots of one practitioner to the
/// confirmed winner, and undoes it when the winner stops being confirmed.
pub struct SuspensionCoordinator {
    store: Arc<dyn SlotStore>,
    notifications: NotificationService,
    lifecycle: SlotLifecycleService,
}

impl SuspensionCoordinator {
    pub fn new(store: Arc<dyn SlotStore>, notifications: NotificationService) -> Self {
        Self {
            store,
            notifications,
            lifecycle: SlotLifecycleService::new(),
        }
    }

    /// Single entry point for every mutator: decides which passes a
    /// before/after pair of the same slot requires.
    pub async fn on_transition(&self, before: &Slot, after: &Slot) -> SweepReport {
        // Completion keeps the suspensions it caused.
        if after.status == SlotStatus::Completed {
            return SweepReport::default();
        }

        match self.lifecycle.confirmation_change(before.status, after.status) {
            ConfirmationChange::Entered => self.suspend_competitors(after).await,
            ConfirmationChange::Left => self.reactivate_suspended_by(after.id).await,
            ConfirmationChange::Unchanged if after.status == SlotStatus::Confirmed && moved(before, after) => {
                debug!("Confirmed slot {} moved, re-anchoring suspensions", after.id);
                let mut report = self.reactivate_suspended_by(after.id).await;
                report.merge(self.suspend_competitors(after).await);
                report
            }
            ConfirmationChange::Unchanged => SweepReport::default(),
        }
    }

    pub async fn on_deleted(&self, deleted: &Slot) -> SweepReport {
        if deleted.status == SlotStatus::Confirmed {
            self.reactivate_suspended_by(deleted.id).await
        } else {
            SweepReport::default()
        }
    }

    /// Suspend pass for a slot that just became confirmed.
    pub async fn suspend_competitors(&self, confirmed: &Slot) -> SweepReport {
        let mut report = SweepReport::default();

        let eligible = SlotFilter {
            practitioner_id: Some(confirmed.practitioner_id),
            exclude_service_id: Some(confirmed.service_id),
            exclude_id: Some(confirmed.id),
            ..SlotFilter::default()
        }
        .with_status_not_in(&[SlotStatus::Cancelled, SlotStatus::Completed])
        .overlapping(confirmed.range());

        let matches = match retry_transient_once("suspend query", || self.store.query(&eligible)).await {
            Ok(matches) => matches,
            Err(e) => {
                warn!("Suspend pass for slot {} could not list competitors: {}", confirmed.id, e);
                report.failed += 1;
                return report;
            }
        };
        report.matched = matches.len();

        let patch = SlotPatch {
            status: Some(SlotStatus::Cancelled),
            suspended_by: Some(Some(confirmed.id)),
            cancellation_reason: Some(Some(SUSPENSION_REASON.to_string())),
            ..SlotPatch::default()
        };

        for competitor in matches {
            let guard = SlotFilter {
                ids: Some(vec![competitor.id]),
                ..eligible.clone()
            };

            match retry_transient_once("suspend slot", || self.store.update_where(&guard, &patch)).await {
                Ok(rows) => {
                    let Some(suspended) = rows.into_iter().next() else {
                        debug!("Slot {} no longer eligible for suspension", competitor.id);
                        continue;
                    };
                    report.suspended += 1;

                    if let Some(client_id) = suspended.client_id {
                        let notice = Notification::new(Recipient::Client(client_id), TemplateKind::Suspension, &suspended);
                        self.notifications.dispatch(notice).await;
                        report.notified += 1;
                    }
                }
                Err(e) => {
                    warn!("Failed to suspend slot {} for confirmed slot {}: {}", competitor.id, confirmed.id, e);
                    report.failed += 1;
                }
            }
        }

        if report.is_complete() {
            info!("Suspend pass for slot {}: {} of {} competitors suspended",
                  confirmed.id, report.suspended, report.matched);
        } else {
            warn!("Suspend pass for slot {} incomplete: {} suspended, {} failed of {}",
                  confirmed.id, report.suspended, report.failed, report.matched);
        }
        report
    }

    /// Reactivate pass for a slot that stopped being confirmed.
    pub async fn reactivate_suspended_by(&self, cause_id: Uuid) -> SweepReport {
        let mut report = SweepReport::default();

        let suspended = SlotFilter {
            suspension: SuspensionFilter::By(cause_id),
            ..SlotFilter::default()
        }
        .with_status_in(&[SlotStatus::Cancelled]);

        let matches = match retry_transient_once("reactivate query", || self.store.query(&suspended)).await {
            Ok(matches) => matches,
            Err(e) => {
                warn!("Reactivate pass for slot {} could not list suspended slots: {}", cause_id, e);
                report.failed += 1;
                return report;
            }
        };
        report.matched = matches.len();

        let patch = SlotPatch {
            status: Some(SlotStatus::Pending),
            suspended_by: Some(None),
            cancellation_reason: Some(None),
            ..SlotPatch::default()
        };

        for slot in matches {
            let guard = SlotFilter {
                ids: Some(vec![slot.id]),
                ..suspended.clone()
            };

            match retry_transient_once("reactivate slot", || self.store.update_where(&guard, &patch)).await {
                Ok(rows) => {
                    let Some(reactivated) = rows.into_iter().next() else {
                        continue;
                    };
                    report.reactivated += 1;

                    if let Some(client_id) = reactivated.client_id {
                        let notice = Notification::new(Recipient::Client(client_id), TemplateKind::Reactivation, &reactivated);
                        self.notifications.dispatch(notice).await;
                        report.notified += 1;
                    }
                }
                Err(e) => {
                    warn!("Failed to reactivate slot {} suspended by {}: {}", slot.id, cause_id, e);
                    report.failed += 1;
                }
            }
        }

        if report.matched > 0 {
            info!("Reactivate pass for slot {}: {} of {} slots reactivated",
                  cause_id, report.reactivated, report.matched);
        }
        report
    }
}

fn moved(before: &Slot, after: &Slot) -> bool {
    before.practitioner_id != after.practitioner_id
        || before.service_id != after.service_id
        || before.start_time != after.start_time
        || before.end_time != after.end_time
}
