// libs/slot-cell/src/services/lifecycle.rs
use tracing::{debug, warn};

use crate::models::{SlotError, SlotStatus};

/// What a status change means for the slots competing with this one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationChange {
    Entered,
    Left,
    Unchanged,
}

#[derive(Default)]
pub struct SlotLifecycleService;

impl SlotLifecycleService {
    pub fn new() -> Self {
        Self
    }

    /// Validate that an operator-driven status transition is allowed.
    pub fn validate_status_transition(
        &self,
        current_status: SlotStatus,
        new_status: SlotStatus,
    ) -> Result<(), SlotError> {
        debug!("Validating status transition from {} to {}", current_status, new_status);

        if current_status == new_status {
            return Ok(());
        }

        if !self.get_valid_transitions(current_status).contains(&new_status) {
            warn!("Invalid status transition attempted: {} -> {}", current_status, new_status);
            return Err(SlotError::InvalidTransition {
                from: current_status,
                to: new_status,
            });
        }

        Ok(())
    }

    /// Reactivation (`cancelled -> pending`) is reserved to the suspension
    /// coordinator and does not appear here.
    pub fn get_valid_transitions(&self, current_status: SlotStatus) -> Vec<SlotStatus> {
        match current_status {
            SlotStatus::Pending => vec![
                SlotStatus::Confirmed,
                SlotStatus::Cancelled,
                SlotStatus::Completed,
            ],
            SlotStatus::Confirmed => vec![
                SlotStatus::Pending,
                SlotStatus::Cancelled,
                SlotStatus::Completed,
            ],
            SlotStatus::Cancelled => vec![],
            SlotStatus::Completed => vec![],
        }
    }

    pub fn is_terminal(&self, status: SlotStatus) -> bool {
        self.get_valid_transitions(status).is_empty()
    }

    pub fn confirmation_change(&self, before: SlotStatus, after: SlotStatus) -> ConfirmationChange {
        match (before == SlotStatus::Confirmed, after == SlotStatus::Confirmed) {
            (false, true) => ConfirmationChange::Entered,
            (true, false) => ConfirmationChange::Left,
            _ => ConfirmationChange::Unchanged,
        }
    }
}
