// libs/slot-cell/src/services/supabase_store.rs
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, error};
use uuid::Uuid;

use shared_database::SupabaseClient;

use crate::models::{NewSlot, Slot, SlotStatus};
use crate::services::store::{Occupancy, SlotFilter, SlotPatch, SlotStore, StoreError, SuspensionFilter};

const SLOTS_PATH: &str = "/rest/v1/slots";

/// Slot store backed by the hosted PostgREST `slots` table.
pub struct SupabaseSlotStore {
    supabase: Arc<SupabaseClient>,
}

impl SupabaseSlotStore {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    fn path_for(filter: &SlotFilter) -> String {
        let query_parts = filter_query(filter);
        if query_parts.is_empty() {
            SLOTS_PATH.to_string()
        } else {
            format!("{}?{}", SLOTS_PATH, query_parts.join("&"))
        }
    }

    fn parse_rows(rows: Vec<Value>) -> Result<Vec<Slot>, StoreError> {
        rows.into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<Slot>, _>>()
            .map_err(|e| {
                error!("Failed to parse slot rows: {}", e);
                StoreError::Decode(e.to_string())
            })
    }
}

fn encode_time(time: DateTime<Utc>) -> String {
    urlencoding::encode(&time.to_rfc3339_opts(SecondsFormat::Micros, true)).into_owned()
}

fn status_list(statuses: &[SlotStatus]) -> String {
    statuses.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(",")
}

/// Renders a filter as PostgREST query parameters; repeated columns are ANDed.
pub fn filter_query(filter: &SlotFilter) -> Vec<String> {
    let mut query_parts = Vec::new();

    if let Some(ids) = &filter.ids {
        let ids: Vec<String> = ids.iter().map(Uuid::to_string).collect();
        query_parts.push(format!("id=in.({})", ids.join(",")));
    }
    if let Some(id) = filter.exclude_id {
        query_parts.push(format!("id=neq.{}", id));
    }
    if let Some(practitioner_id) = filter.practitioner_id {
        query_parts.push(format!("practitioner_id=eq.{}", practitioner_id));
    }
    if let Some(service_id) = filter.service_id {
        query_parts.push(format!("service_id=eq.{}", service_id));
    }
    if let Some(service_id) = filter.exclude_service_id {
        query_parts.push(format!("service_id=neq.{}", service_id));
    }
    match filter.occupancy {
        Occupancy::Any => {}
        Occupancy::Booked => query_parts.push("client_id=not.is.null".to_string()),
        Occupancy::Unbooked => query_parts.push("client_id=is.null".to_string()),
    }
    if let Some(statuses) = &filter.status_in {
        query_parts.push(format!("status=in.({})", status_list(statuses)));
    }
    if let Some(statuses) = &filter.status_not_in {
        query_parts.push(format!("status=not.in.({})", status_list(statuses)));
    }
    match filter.suspension {
        SuspensionFilter::Any => {}
        SuspensionFilter::By(id) => query_parts.push(format!("suspended_by=eq.{}", id)),
        SuspensionFilter::Set => query_parts.push("suspended_by=not.is.null".to_string()),
    }
    if let Some(before) = filter.starts_before {
        query_parts.push(format!("start_time=lt.{}", encode_time(before)));
    }
    if let Some(after) = filter.starts_at_or_after {
        query_parts.push(format!("start_time=gte.{}", encode_time(after)));
    }
    if let Some(range) = &filter.overlapping {
        query_parts.push(format!("start_time=lt.{}", encode_time(range.end)));
        query_parts.push(format!("end_time=gt.{}", encode_time(range.start)));
    }

    query_parts
}

fn matches_nothing(filter: &SlotFilter) -> bool {
    filter.ids.as_ref().is_some_and(|ids| ids.is_empty())
}

fn guard_bulk_mutation(filter: &SlotFilter, op: &str) -> Result<(), StoreError> {
    if filter_query(filter).is_empty() {
        return Err(StoreError::Rejected(format!("refusing unfiltered {} on slots", op)));
    }
    Ok(())
}

#[async_trait]
impl SlotStore for SupabaseSlotStore {
    async fn get(&self, id: Uuid) -> Result<Option<Slot>, StoreError> {
        let path = format!("{}?id=eq.{}", SLOTS_PATH, id);
        let result: Vec<Value> = self.supabase.request(Method::GET, &path, None, None).await?;

        Ok(Self::parse_rows(result)?.into_iter().next())
    }

    async fn query(&self, filter: &SlotFilter) -> Result<Vec<Slot>, StoreError> {
        if matches_nothing(filter) {
            return Ok(vec![]);
        }

        let mut path = Self::path_for(filter);
        path.push_str(if path.contains('?') { "&" } else { "?" });
        path.push_str("order=start_time.asc");
        debug!("Querying slots: {}", path);

        let result: Vec<Value> = self.supabase.request(Method::GET, &path, None, None).await?;
        Self::parse_rows(result)
    }

    async fn insert_batch(&self, slots: &[NewSlot]) -> Result<Vec<Slot>, StoreError> {
        if slots.is_empty() {
            return Ok(vec![]);
        }

        let result = self
            .supabase
            .request_returning(Method::POST, SLOTS_PATH, Some(json!(slots)))
            .await?;

        let inserted = Self::parse_rows(result)?;
        if inserted.len() != slots.len() {
            return Err(StoreError::Rejected(format!(
                "expected {} inserted slots, store returned {}",
                slots.len(),
                inserted.len()
            )));
        }
        Ok(inserted)
    }

    async fn update_where(&self, filter: &SlotFilter, patch: &SlotPatch) -> Result<Vec<Slot>, StoreError> {
        if matches_nothing(filter) {
            return Ok(vec![]);
        }
        guard_bulk_mutation(filter, "update")?;

        let path = Self::path_for(filter);
        let result = self
            .supabase
            .request_returning(Method::PATCH, &path, Some(patch.to_json(Utc::now())))
            .await?;

        Self::parse_rows(result)
    }

    async fn delete_where(&self, filter: &SlotFilter) -> Result<Vec<Slot>, StoreError> {
        if matches_nothing(filter) {
            return Ok(vec![]);
        }
        guard_bulk_mutation(filter, "delete")?;

        let path = Self::path_for(filter);
        let result = self.supabase.request_returning(Method::DELETE, &path, None).await?;

        Self::parse_rows(result)
    }
}
