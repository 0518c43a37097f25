// libs/slot-cell/src/services/store.rs
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use shared_database::DatabaseError;

use crate::models::{NewSlot, PaymentStatus, Slot, SlotError, SlotStatus, TimeRange};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("backing store unavailable: {0}")]
    Unavailable(String),

    #[error("backing store call exceeded {0:?}")]
    Timeout(Duration),

    #[error("backing store rejected the request: {0}")]
    Rejected(String),

    #[error("failed to decode slot row: {0}")]
    Decode(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Timeout(_))
    }
}

impl From<DatabaseError> for StoreError {
    fn from(e: DatabaseError) -> Self {
        if e.is_transient() {
            StoreError::Unavailable(e.to_string())
        } else {
            match e {
                DatabaseError::Decode(msg) => StoreError::Decode(msg),
                other => StoreError::Rejected(other.to_string()),
            }
        }
    }
}

impl From<StoreError> for SlotError {
    fn from(e: StoreError) -> Self {
        if e.is_transient() {
            SlotError::BackingStoreUnavailable(e.to_string())
        } else {
            SlotError::Database(e.to_string())
        }
    }
}

// ==============================================================================
// FILTERS AND PATCHES
// ==============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Occupancy {
    #[default]
    Any,
    Booked,
    Unbooked,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SuspensionFilter {
    #[default]
    Any,
    By(Uuid),
    Set,
}

/// Conjunction of row predicates shared by every store backend.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SlotFilter {
    pub ids: Option<Vec<Uuid>>,
    pub exclude_id: Option<Uuid>,
    pub practitioner_id: Option<Uuid>,
    pub service_id: Option<Uuid>,
    pub exclude_service_id: Option<Uuid>,
    pub occupancy: Occupancy,
    pub status_in: Option<Vec<SlotStatus>>,
    pub status_not_in: Option<Vec<SlotStatus>>,
    pub suspension: SuspensionFilter,
    pub starts_before: Option<DateTime<Utc>>,
    pub starts_at_or_after: Option<DateTime<Utc>>,
    pub overlapping: Option<TimeRange>,
}

impl SlotFilter {
    pub fn by_id(id: Uuid) -> Self {
        Self {
            ids: Some(vec![id]),
            ..Self::default()
        }
    }

    pub fn for_practitioner(practitioner_id: Uuid) -> Self {
        Self {
            practitioner_id: Some(practitioner_id),
            ..Self::default()
        }
    }

    pub fn with_status_in(mut self, statuses: &[SlotStatus]) -> Self {
        self.status_in = Some(statuses.to_vec());
        self
    }

    pub fn with_status_not_in(mut self, statuses: &[SlotStatus]) -> Self {
        self.status_not_in = Some(statuses.to_vec());
        self
    }

    pub fn with_occupancy(mut self, occupancy: Occupancy) -> Self {
        self.occupancy = occupancy;
        self
    }

    pub fn overlapping(mut self, range: TimeRange) -> Self {
        self.overlapping = Some(range);
        self
    }

    pub fn matches(&self, slot: &Slot) -> bool {
        if let Some(ids) = &self.ids {
            if !ids.contains(&slot.id) {
                return false;
            }
        }
        if self.exclude_id == Some(slot.id) {
            return false;
        }
        if self.practitioner_id.is_some_and(|p| p != slot.practitioner_id) {
            return false;
        }
        if self.service_id.is_some_and(|s| s != slot.service_id) {
            return false;
        }
        if self.exclude_service_id == Some(slot.service_id) {
            return false;
        }
        match self.occupancy {
            Occupancy::Any => {}
            Occupancy::Booked if slot.client_id.is_none() => return false,
            Occupancy::Unbooked if slot.client_id.is_some() => return false,
            _ => {}
        }
        if let Some(statuses) = &self.status_in {
            if !statuses.contains(&slot.status) {
                return false;
            }
        }
        if let Some(statuses) = &self.status_not_in {
            if statuses.contains(&slot.status) {
                return false;
            }
        }
        match self.suspension {
            SuspensionFilter::Any => {}
            SuspensionFilter::By(id) if slot.suspended_by != Some(id) => return false,
            SuspensionFilter::Set if slot.suspended_by.is_none() => return false,
            _ => {}
        }
        if self.starts_before.is_some_and(|t| slot.start_time >= t) {
            return false;
        }
        if self.starts_at_or_after.is_some_and(|t| slot.start_time < t) {
            return false;
        }
        if let Some(range) = &self.overlapping {
            if !crate::services::conflict::overlaps(range, &slot.range()) {
                return false;
            }
        }
        true
    }
}

/// Partial row update. `Some(None)` clears a nullable column.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SlotPatch {
    pub practitioner_id: Option<Uuid>,
    pub service_id: Option<Uuid>,
    pub client_id: Option<Option<Uuid>>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: Option<SlotStatus>,
    pub payment_status: Option<PaymentStatus>,
    pub suspended_by: Option<Option<Uuid>>,
    pub cancellation_reason: Option<Option<String>>,
    pub notes: Option<Option<String>>,
    pub beneficiary_name: Option<Option<String>>,
    pub beneficiary_email: Option<Option<String>>,
    pub beneficiary_phone: Option<Option<String>>,
    pub custom_price: Option<Option<f64>>,
}

impl SlotPatch {
    pub fn apply(&self, slot: &mut Slot, now: DateTime<Utc>) {
        if let Some(v) = self.practitioner_id {
            slot.practitioner_id = v;
        }
        if let Some(v) = self.service_id {
            slot.service_id = v;
        }
        if let Some(v) = self.client_id {
            slot.client_id = v;
        }
        if let Some(v) = self.start_time {
            slot.start_time = v;
        }
        if let Some(v) = self.end_time {
            slot.end_time = v;
        }
        if let Some(v) = self.status {
            slot.status = v;
        }
        if let Some(v) = self.payment_status {
            slot.payment_status = v;
        }
        if let Some(v) = self.suspended_by {
            slot.suspended_by = v;
        }
        if let Some(v) = &self.cancellation_reason {
            slot.cancellation_reason = v.clone();
        }
        if let Some(v) = &self.notes {
            slot.notes = v.clone();
        }
        if let Some(v) = &self.beneficiary_name {
            slot.beneficiary_name = v.clone();
        }
        if let Some(v) = &self.beneficiary_email {
            slot.beneficiary_email = v.clone();
        }
        if let Some(v) = &self.beneficiary_phone {
            slot.beneficiary_phone = v.clone();
        }
        if let Some(v) = self.custom_price {
            slot.custom_price = v;
        }
        slot.updated_at = now;
    }

    /// PostgREST body for a PATCH.
    pub fn to_json(&self, now: DateTime<Utc>) -> Value {
        let mut body = Map::new();

        if let Some(v) = self.practitioner_id {
            body.insert("practitioner_id".to_string(), json!(v));
        }
        if let Some(v) = self.service_id {
            body.insert("service_id".to_string(), json!(v));
        }
        if let Some(v) = self.client_id {
            body.insert("client_id".to_string(), json!(v));
        }
        if let Some(v) = self.start_time {
            body.insert("start_time".to_string(), json!(v.to_rfc3339()));
        }
        if let Some(v) = self.end_time {
            body.insert("end_time".to_string(), json!(v.to_rfc3339()));
        }
        if let Some(v) = self.status {
            body.insert("status".to_string(), json!(v));
        }
        if let Some(v) = self.payment_status {
            body.insert("payment_status".to_string(), json!(v));
        }
        if let Some(v) = self.suspended_by {
            body.insert("suspended_by".to_string(), json!(v));
        }
        if let Some(v) = &self.cancellation_reason {
            body.insert("cancellation_reason".to_string(), json!(v));
        }
        if let Some(v) = &self.notes {
            body.insert("notes".to_string(), json!(v));
        }
        if let Some(v) = &self.beneficiary_name {
            body.insert("beneficiary_name".to_string(), json!(v));
        }
        if let Some(v) = &self.beneficiary_email {
            body.insert("beneficiary_email".to_string(), json!(v));
        }
        if let Some(v) = &self.beneficiary_phone {
            body.insert("beneficiary_phone".to_string(), json!(v));
        }
        if let Some(v) = self.custom_price {
            body.insert("custom_price".to_string(), json!(v));
        }

        body.insert("updated_at".to_string(), json!(now.to_rfc3339()));
        Value::Object(body)
    }
}

// ==============================================================================
// STORE CONTRACT
// ==============================================================================

#[async_trait]
pub trait SlotStore: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Option<Slot>, StoreError>;

    async fn query(&self, filter: &SlotFilter) -> Result<Vec<Slot>, StoreError>;

    async fn insert_batch(&self, slots: &[NewSlot]) -> Result<Vec<Slot>, StoreError>;

    /// Atomically applies `patch` to every row still matching `filter` and
    /// returns the updated rows. An empty result means the precondition failed.
    async fn update_where(&self, filter: &SlotFilter, patch: &SlotPatch) -> Result<Vec<Slot>, StoreError>;

    async fn delete_where(&self, filter: &SlotFilter) -> Result<Vec<Slot>, StoreError>;
}

// ==============================================================================
// IN-MEMORY BACKEND
// ==============================================================================

#[derive(Default)]
pub struct InMemorySlotStore {
    rows: RwLock<HashMap<Uuid, Slot>>,
}

impl InMemorySlotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a fully-formed row, bypassing insert defaults.
    pub async fn put(&self, slot: Slot) {
        self.rows.write().await.insert(slot.id, slot);
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }
}

#[async_trait]
impl SlotStore for InMemorySlotStore {
    async fn get(&self, id: Uuid) -> Result<Option<Slot>, StoreError> {
        Ok(self.rows.read().await.get(&id).cloned())
    }

    async fn query(&self, filter: &SlotFilter) -> Result<Vec<Slot>, StoreError> {
        let rows = self.rows.read().await;
        let mut matched: Vec<Slot> = rows.values().filter(|s| filter.matches(s)).cloned().collect();
        matched.sort_by_key(|s| (s.start_time, s.id));
        Ok(matched)
    }

    async fn insert_batch(&self, slots: &[NewSlot]) -> Result<Vec<Slot>, StoreError> {
        let now = Utc::now();
        let mut rows = self.rows.write().await;

        if let Some(dup) = slots.iter().find(|s| rows.contains_key(&s.id)) {
            return Err(StoreError::Rejected(format!("duplicate slot id {}", dup.id)));
        }

        let inserted: Vec<Slot> = slots.iter().cloned().map(|s| s.into_slot(now)).collect();
        for slot in &inserted {
            rows.insert(slot.id, slot.clone());
        }
        debug!("Inserted {} slots in memory", inserted.len());
        Ok(inserted)
    }

    async fn update_where(&self, filter: &SlotFilter, patch: &SlotPatch) -> Result<Vec<Slot>, StoreError> {
        let now = Utc::now();
        let mut rows = self.rows.write().await;
        let mut updated = Vec::new();

        for slot in rows.values_mut().filter(|s| filter.matches(s)) {
            patch.apply(slot, now);
            updated.push(slot.clone());
        }

        updated.sort_by_key(|s| (s.start_time, s.id));
        Ok(updated)
    }

    async fn delete_where(&self, filter: &SlotFilter) -> Result<Vec<Slot>, StoreError> {
        let mut rows = self.rows.write().await;
        let ids: Vec<Uuid> = rows.values().filter(|s| filter.matches(s)).map(|s| s.id).collect();

        let mut deleted: Vec<Slot> = ids.iter().filter_map(|id| rows.remove(id)).collect();
        deleted.sort_by_key(|s| (s.start_time, s.id));
        Ok(deleted)
    }
}

// ==============================================================================
// TIMEOUT DECORATOR
// ==============================================================================

/// Bounds every call on the wrapped store; an elapsed deadline is transient.
pub struct BoundedSlotStore {
    inner: Arc<dyn SlotStore>,
    timeout: Duration,
}

impl BoundedSlotStore {
    pub fn new(inner: Arc<dyn SlotStore>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    async fn bounded<T, F>(&self, op: &str, fut: F) -> Result<T, StoreError>
    where
        F: std::future::Future<Output = Result<T, StoreError>> + Send,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                warn!("Slot store {} timed out after {:?}", op, self.timeout);
                Err(StoreError::Timeout(self.timeout))
            }
        }
    }
}

#[async_trait]
impl SlotStore for BoundedSlotStore {
    async fn get(&self, id: Uuid) -> Result<Option<Slot>, StoreError> {
        self.bounded("get", self.inner.get(id)).await
    }

    async fn query(&self, filter: &SlotFilter) -> Result<Vec<Slot>, StoreError> {
        self.bounded("query", self.inner.query(filter)).await
    }

    async fn insert_batch(&self, slots: &[NewSlot]) -> Result<Vec<Slot>, StoreError> {
        self.bounded("insert", self.inner.insert_batch(slots)).await
    }

    async fn update_where(&self, filter: &SlotFilter, patch: &SlotPatch) -> Result<Vec<Slot>, StoreError> {
        self.bounded("update", self.inner.update_where(filter, patch)).await
    }

    async fn delete_where(&self, filter: &SlotFilter) -> Result<Vec<Slot>, StoreError> {
        self.bounded("delete", self.inner.delete_where(filter)).await
    }
}
