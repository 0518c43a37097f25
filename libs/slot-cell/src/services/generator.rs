// libs/slot-cell/src/services/generator.rs
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::models::{
    GenerateSlotsRequest, GenerationMode, GenerationOutcome, GenerationReport, NewSlot,
    SchedulingRules, Slot, SlotCandidate, SlotError, SlotStatus, TimeRange,
};
use crate::services::conflict::overlaps;
use crate::services::retry::retry_transient_once;
use crate::services::store::{Occupancy, SlotFilter, SlotStore, StoreError};

/// Longest service duration or gap a template may ask for.
const MAX_SLOT_MINUTES: i64 = 24 * 60;
/// Widest fixed offset in use (UTC-14:00 to UTC+14:00).
const MAX_UTC_OFFSET_MINUTES: i32 = 14 * 60;

/// Expands a weekly template into concrete slots and writes them as one unit.
pub struct SlotGeneratorService {
    store: Arc<dyn SlotStore>,
    rules: SchedulingRules,
}

impl SlotGeneratorService {
    pub fn new(store: Arc<dyn SlotStore>, rules: SchedulingRules) -> Self {
        Self { store, rules }
    }

    pub async fn generate(&self, request: &GenerateSlotsRequest) -> Result<GenerationOutcome, SlotError> {
        info!("Generating slots for practitioner {} from {} to {} ({:?})",
              request.practitioner_id, request.from, request.to, request.mode);

        validate_range(request, self.rules.max_generation_days)?;

        if request.services.is_empty() {
            return Ok(nothing("no services selected"));
        }
        if !request.template.has_enabled_days() {
            return Ok(nothing("no enabled days in the weekly template"));
        }

        let candidates = plan_slots(request, self.rules.max_generation_days)?;
        if candidates.is_empty() {
            return Ok(nothing("availability windows are shorter than every service duration"));
        }

        let offset = utc_offset(request.utc_offset_minutes)?;
        let range_start = local_to_utc(&offset, request.from, NaiveTime::MIN)?;
        let day_after = request
            .to
            .succ_opt()
            .ok_or_else(|| SlotError::ValidationFailed(format!("{} is out of range", request.to)))?;
        let range_end = local_to_utc(&offset, day_after, NaiveTime::MIN)?;

        // Replace mode removes these only once every new row is in, so a
        // failed run leaves the previous availability untouched.
        let outgoing: Vec<Slot> = match request.mode {
            GenerationMode::Replace => {
                self.store
                    .query(&replaceable(request.practitioner_id, range_start, range_end))
                    .await?
            }
            GenerationMode::Append => Vec::new(),
        };

        let outgoing_ids: HashSet<Uuid> = outgoing.iter().map(|s| s.id).collect();
        let existing: Vec<Slot> = self
            .store
            .query(
                &SlotFilter::for_practitioner(request.practitioner_id)
                    .with_status_not_in(&[SlotStatus::Cancelled])
                    .overlapping(TimeRange::new(range_start, range_end)?),
            )
            .await?
            .into_iter()
            .filter(|slot| !outgoing_ids.contains(&slot.id))
            .collect();

        let (to_insert, skipped_overlaps) = drop_same_service_overlaps(candidates, &existing);
        if skipped_overlaps > 0 {
            debug!("Skipped {} candidates overlapping existing slots", skipped_overlaps);
        }

        let rows: Vec<NewSlot> = to_insert
            .into_iter()
            .map(|c| NewSlot::available(request.practitioner_id, c.service_id, c.range))
            .collect();

        let slots = self.insert_as_unit(&rows).await?;

        let replaced = match self.delete_unbooked(&ids_of(&outgoing)).await {
            Ok(deleted) => deleted.len(),
            Err(e) => {
                error!("Replace mode could not remove {} old slots: {}", outgoing.len(), e);
                self.compensate(&slots).await;
                return Err(e.into());
            }
        };
        if replaced > 0 {
            debug!("Replace mode removed {} unbooked slots", replaced);
        }

        info!("Generated {} slots for practitioner {} ({} replaced, {} skipped)",
              slots.len(), request.practitioner_id, replaced, skipped_overlaps);

        Ok(GenerationOutcome::Generated(GenerationReport {
            created: slots.len(),
            skipped_overlaps,
            replaced,
            slots,
        }))
    }

    /// Chunked insert; a failing chunk rolls back the chunks before it.
    async fn insert_as_unit(&self, rows: &[NewSlot]) -> Result<Vec<Slot>, SlotError> {
        let mut inserted: Vec<Slot> = Vec::with_capacity(rows.len());

        for chunk in rows.chunks(self.batch_size()) {
            match self.store.insert_batch(chunk).await {
                Ok(mut slots) => inserted.append(&mut slots),
                Err(e) => {
                    error!("Slot generation batch failed after {} rows: {}", inserted.len(), e);
                    self.compensate(&inserted).await;
                    return Err(e.into());
                }
            }
        }

        Ok(inserted)
    }

    async fn compensate(&self, inserted: &[Slot]) {
        if inserted.is_empty() {
            return;
        }

        match self.delete_unbooked(&ids_of(inserted)).await {
            Ok(deleted) => info!("Rolled back {} slots from failed generation", deleted.len()),
            Err(e) => warn!("Could not roll back {} generated slots: {}", inserted.len(), e),
        }
    }

    /// Deletes the listed slots that are still unbooked, one batch of ids
    /// per request so the id list stays within URL limits.
    async fn delete_unbooked(&self, ids: &[Uuid]) -> Result<Vec<Slot>, StoreError> {
        let mut deleted = Vec::with_capacity(ids.len());

        for chunk in ids.chunks(self.batch_size()) {
            let filter = SlotFilter {
                ids: Some(chunk.to_vec()),
                ..SlotFilter::default()
            }
            .with_occupancy(Occupancy::Unbooked);

            let mut rows = retry_transient_once("generation delete", || self.store.delete_where(&filter)).await?;
            deleted.append(&mut rows);
        }

        Ok(deleted)
    }

    fn batch_size(&self) -> usize {
        self.rules.generation_batch_size.max(1)
    }
}

/// Unbooked slots of the practitioner starting inside the generated range.
fn replaceable(practitioner_id: Uuid, range_start: DateTime<Utc>, range_end: DateTime<Utc>) -> SlotFilter {
    SlotFilter {
        starts_at_or_after: Some(range_start),
        starts_before: Some(range_end),
        ..SlotFilter::for_practitioner(practitioner_id)
    }
    .with_occupancy(Occupancy::Unbooked)
}

fn ids_of(slots: &[Slot]) -> Vec<Uuid> {
    slots.iter().map(|s| s.id).collect()
}

fn nothing(reason: &str) -> GenerationOutcome {
    info!("Nothing to generate: {}", reason);
    GenerationOutcome::NothingToGenerate {
        reason: reason.to_string(),
    }
}

fn validate_range(request: &GenerateSlotsRequest, max_days: i64) -> Result<(), SlotError> {
    if request.from > request.to {
        return Err(SlotError::ValidationFailed(format!(
            "date range starts {} after it ends {}",
            request.from, request.to
        )));
    }

    let days = (request.to - request.from).num_days() + 1;
    if days > max_days {
        return Err(SlotError::ValidationFailed(format!(
            "date range covers {} days, the limit is {}",
            days, max_days
        )));
    }

    if request.gap_minutes < 0 {
        return Err(SlotError::ValidationFailed("gap between slots cannot be negative".to_string()));
    }
    if request.gap_minutes > MAX_SLOT_MINUTES {
        return Err(SlotError::ValidationFailed(format!(
            "gap of {} minutes exceeds {} minutes",
            request.gap_minutes, MAX_SLOT_MINUTES
        )));
    }

    if !(-MAX_UTC_OFFSET_MINUTES..=MAX_UTC_OFFSET_MINUTES).contains(&request.utc_offset_minutes) {
        return Err(SlotError::ValidationFailed(format!(
            "UTC offset of {} minutes exceeds {} minutes",
            request.utc_offset_minutes, MAX_UTC_OFFSET_MINUTES
        )));
    }

    Ok(())
}

fn utc_offset(minutes: i32) -> Result<FixedOffset, SlotError> {
    minutes
        .checked_mul(60)
        .and_then(FixedOffset::east_opt)
        .ok_or_else(|| SlotError::ValidationFailed(format!("invalid UTC offset of {} minutes", minutes)))
}

fn local_to_utc(offset: &FixedOffset, date: NaiveDate, time: NaiveTime) -> Result<DateTime<Utc>, SlotError> {
    offset
        .from_local_datetime(&date.and_time(time))
        .single()
        .map(|t| t.with_timezone(&Utc))
        .ok_or_else(|| SlotError::ValidationFailed(format!("{} {} is not a valid local time", date, time)))
}

/// Plans every slot for the request without touching the store.
///
/// Each service runs its own sequence through each window, so different
/// services deliberately overlap in time.
pub fn plan_slots(request: &GenerateSlotsRequest, max_days: i64) -> Result<Vec<SlotCandidate>, SlotError> {
    validate_range(request, max_days)?;

    if let Some(service) = request
        .services
        .iter()
        .find(|s| s.duration_minutes <= 0 || s.duration_minutes > MAX_SLOT_MINUTES)
    {
        return Err(SlotError::ValidationFailed(format!(
            "service {} duration of {} minutes is outside 1..={}",
            service.id, service.duration_minutes, MAX_SLOT_MINUTES
        )));
    }

    let offset = utc_offset(request.utc_offset_minutes)?;
    let gap = Duration::minutes(request.gap_minutes);
    let mut candidates = Vec::new();

    for date in request.from.iter_days().take_while(|d| *d <= request.to) {
        for window in request.template.windows_for(date.weekday()) {
            if window.start >= window.end {
                return Err(SlotError::ValidationFailed(format!(
                    "availability window {}-{} on {} is empty",
                    window.start, window.end, date.weekday()
                )));
            }

            let window_start = local_to_utc(&offset, date, window.start)?;
            let window_end = local_to_utc(&offset, date, window.end)?;

            for service in &request.services {
                let duration = Duration::minutes(service.duration_minutes);
                let step = duration + gap;
                let mut cursor = window_start;

                loop {
                    let end = advance(cursor, duration)?;
                    if end > window_end {
                        break;
                    }
                    candidates.push(SlotCandidate {
                        service_id: service.id,
                        range: TimeRange::new(cursor, end)?,
                    });
                    cursor = advance(cursor, step)?;
                }
            }
        }
    }

    Ok(candidates)
}

fn advance(cursor: DateTime<Utc>, by: Duration) -> Result<DateTime<Utc>, SlotError> {
    cursor
        .checked_add_signed(by)
        .ok_or_else(|| SlotError::ValidationFailed(format!("{} is out of range", cursor)))
}

/// Keeps candidates that overlap neither a surviving slot nor an earlier
/// candidate of the same service; returns them with the skipped count.
pub fn drop_same_service_overlaps(
    mut candidates: Vec<SlotCandidate>,
    existing: &[Slot],
) -> (Vec<SlotCandidate>, usize) {
    let mut taken: HashMap<Uuid, Vec<TimeRange>> = HashMap::new();
    for slot in existing.iter().filter(|s| s.status != SlotStatus::Cancelled) {
        taken.entry(slot.service_id).or_default().push(slot.range());
    }

    candidates.sort_by_key(|c| (c.service_id, c.range.start));

    let before = candidates.len();
    let kept: Vec<SlotCandidate> = candidates
        .into_iter()
        .filter(|candidate| {
            let ranges = taken.entry(candidate.service_id).or_default();
            if ranges.iter().any(|r| overlaps(r, &candidate.range)) {
                return false;
            }
            ranges.push(candidate.range);
            true
        })
        .collect();

    let skipped = before - kept.len();
    (kept, skipped)
}
