// libs/slot-cell/src/models.rs
use std::fmt;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use shared_config::AppConfig;

// ==============================================================================
// CORE SLOT MODELS
// ==============================================================================

/// One bookable interval for one practitioner and one service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Slot {
    pub id: Uuid,
    pub practitioner_id: Uuid,
    pub service_id: Uuid,
    pub client_id: Option<Uuid>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: SlotStatus,
    pub payment_status: PaymentStatus,
    /// Set only when another slot's confirmation auto-cancelled this one.
    #[serde(default)]
    pub suspended_by: Option<Uuid>,
    #[serde(default)]
    pub cancellation_reason: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub beneficiary_name: Option<String>,
    #[serde(default)]
    pub beneficiary_email: Option<String>,
    #[serde(default)]
    pub beneficiary_phone: Option<String>,
    #[serde(default)]
    pub custom_price: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Slot {
    pub fn range(&self) -> TimeRange {
        TimeRange {
            start: self.start_time,
            end: self.end_time,
        }
    }

    pub fn is_booked(&self) -> bool {
        self.client_id.is_some()
    }

    pub fn is_suspended(&self) -> bool {
        self.status == SlotStatus::Cancelled && self.suspended_by.is_some()
    }

    pub fn duration_minutes(&self) -> i64 {
        (self.end_time - self.start_time).num_minutes()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SlotStatus {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
}

impl SlotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SlotStatus::Pending => "pending",
            SlotStatus::Confirmed => "confirmed",
            SlotStatus::Cancelled => "cancelled",
            SlotStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for SlotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Unpaid,
    Paid,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Unpaid => "unpaid",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Refunded => "refunded",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, SlotError> {
        if start >= end {
            return Err(SlotError::ValidationFailed(format!(
                "start time {} must be before end time {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    pub fn minutes(start: DateTime<Utc>, minutes: i64) -> Result<Self, SlotError> {
        let end = Duration::try_minutes(minutes)
            .and_then(|d| start.checked_add_signed(d))
            .ok_or_else(|| SlotError::ValidationFailed(format!("{} minutes is out of range", minutes)))?;
        Self::new(start, end)
    }
}

/// Row payload for inserts; the store assigns nothing, ids are client-generated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewSlot {
    pub id: Uuid,
    pub practitioner_id: Uuid,
    pub service_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: SlotStatus,
    pub payment_status: PaymentStatus,
    pub notes: Option<String>,
    pub custom_price: Option<f64>,
}

impl NewSlot {
    pub fn available(practitioner_id: Uuid, service_id: Uuid, range: TimeRange) -> Self {
        Self {
            id: Uuid::new_v4(),
            practitioner_id,
            service_id,
            start_time: range.start,
            end_time: range.end,
            status: SlotStatus::Pending,
            payment_status: PaymentStatus::Unpaid,
            notes: None,
            custom_price: None,
        }
    }

    pub fn into_slot(self, now: DateTime<Utc>) -> Slot {
        Slot {
            id: self.id,
            practitioner_id: self.practitioner_id,
            service_id: self.service_id,
            client_id: None,
            start_time: self.start_time,
            end_time: self.end_time,
            status: self.status,
            payment_status: self.payment_status,
            suspended_by: None,
            cancellation_reason: None,
            notes: self.notes,
            beneficiary_name: None,
            beneficiary_email: None,
            beneficiary_phone: None,
            custom_price: self.custom_price,
            created_at: now,
            updated_at: now,
        }
    }
}

// ==============================================================================
// REQUEST MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSlotRequest {
    pub practitioner_id: Uuid,
    pub service_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub notes: Option<String>,
    pub custom_price: Option<f64>,
}

/// Someone other than the paying client who attends the session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Beneficiary {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookSlotRequest {
    pub client_id: Uuid,
    #[serde(default = "default_payment_status")]
    pub payment_status: PaymentStatus,
    /// Payment was started but not yet settled; the payment collaborator
    /// sends the confirmation once it is.
    #[serde(default)]
    pub awaiting_payment: bool,
    pub beneficiary: Option<Beneficiary>,
    pub notes: Option<String>,
    pub custom_price: Option<f64>,
}

fn default_payment_status() -> PaymentStatus {
    PaymentStatus::Unpaid
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EditSlotRequest {
    pub practitioner_id: Option<Uuid>,
    pub service_id: Option<Uuid>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: Option<SlotStatus>,
    pub payment_status: Option<PaymentStatus>,
    pub notes: Option<String>,
    pub custom_price: Option<f64>,
}

impl EditSlotRequest {
    pub fn status(status: SlotStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn moves_slot(&self) -> bool {
        self.practitioner_id.is_some()
            || self.service_id.is_some()
            || self.start_time.is_some()
            || self.end_time.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelSlotRequest {
    /// Retain client data and mark `cancelled` even when unpaid.
    #[serde(default)]
    pub keep_history: bool,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictCheckRequest {
    pub practitioner_id: Uuid,
    pub service_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub exclude_slot_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailabilityQuery {
    pub practitioner_id: Uuid,
    pub service_id: Option<Uuid>,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

// ==============================================================================
// GENERATION MODELS
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DayTemplate {
    pub weekday: Weekday,
    pub enabled: bool,
    #[serde(default)]
    pub windows: Vec<TimeWindow>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WeeklyTemplate {
    pub days: Vec<DayTemplate>,
}

impl WeeklyTemplate {
    /// Enabled windows for a weekday; empty if the day is disabled or absent.
    pub fn windows_for(&self, weekday: Weekday) -> impl Iterator<Item = &TimeWindow> {
        self.days
            .iter()
            .filter(move |day| day.enabled && day.weekday == weekday)
            .flat_map(|day| day.windows.iter())
    }

    pub fn has_enabled_days(&self) -> bool {
        self.days.iter().any(|day| day.enabled && !day.windows.is_empty())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceOffering {
    pub id: Uuid,
    pub duration_minutes: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GenerationMode {
    /// Delete unbooked slots in range first.
    Replace,
    Append,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateSlotsRequest {
    pub practitioner_id: Uuid,
    pub template: WeeklyTemplate,
    pub services: Vec<ServiceOffering>,
    #[serde(default)]
    pub gap_minutes: i64,
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub mode: GenerationMode,
    /// Offset of the practitioner's wall clock from UTC.
    #[serde(default)]
    pub utc_offset_minutes: i32,
}

/// A planned slot before it is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotCandidate {
    pub service_id: Uuid,
    pub range: TimeRange,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerationReport {
    pub created: usize,
    pub skipped_overlaps: usize,
    pub replaced: usize,
    pub slots: Vec<Slot>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum GenerationOutcome {
    Generated(GenerationReport),
    NothingToGenerate { reason: String },
}

// ==============================================================================
// RESPONSE MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictCheckResponse {
    pub has_conflict: bool,
    pub conflicting_slots: Vec<Slot>,
}

/// Summary of involuntary changes a transition caused on other slots.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SweepReport {
    pub matched: usize,
    pub suspended: usize,
    pub reactivated: usize,
    pub failed: usize,
    /// Notices handed off for delivery; delivery itself is not awaited.
    pub notified: usize,
}

impl SweepReport {
    pub fn is_complete(&self) -> bool {
        self.failed == 0
    }

    pub fn merge(&mut self, other: SweepReport) {
        self.matched += other.matched;
        self.suspended += other.suspended;
        self.reactivated += other.reactivated;
        self.failed += other.failed;
        self.notified += other.notified;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingOutcome {
    pub slot: Slot,
    pub side_effects: SweepReport,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReapReport {
    pub deleted: usize,
    pub ghost_suspensions: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AlternativeAction {
    /// Move the slot's time instead of cancelling it.
    MoveSlot,
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SlotError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Slot is already booked")]
    AlreadyBooked,

    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition { from: SlotStatus, to: SlotStatus },

    #[error("Slot has a linked payment transaction")]
    HasLinkedTransaction { alternative: AlternativeAction },

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Slot overlaps an existing slot for the same service")]
    ConflictDetected,

    #[error("Not permitted: {0}")]
    Forbidden(String),

    #[error("Backing store unavailable: {0}")]
    BackingStoreUnavailable(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl SlotError {
    pub fn is_transient(&self) -> bool {
        matches!(self, SlotError::BackingStoreUnavailable(_))
    }
}

// ==============================================================================
// RULES
// ==============================================================================

#[derive(Debug, Clone)]
pub struct SchedulingRules {
    pub generation_batch_size: usize,
    pub max_generation_days: i64,
    /// Skip same-service conflict validation when an operator moves a
    /// confirmed slot. Pending product decision.
    pub trust_operator_service_edits: bool,
    pub notification_timeout: StdDuration,
}

impl Default for SchedulingRules {
    fn default() -> Self {
        Self {
            generation_batch_size: 200,
            max_generation_days: 366,
            trust_operator_service_edits: true,
            notification_timeout: StdDuration::from_secs(3),
        }
    }
}

impl SchedulingRules {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            generation_batch_size: config.generation_batch_size.max(1),
            max_generation_days: config.max_generation_days,
            trust_operator_service_edits: config.trust_operator_service_edits,
            notification_timeout: StdDuration::from_millis(config.notification_timeout_ms),
        }
    }
}
