#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use uuid::Uuid;

use slot_cell::models::{
    BookSlotRequest, NewSlot, PaymentStatus, SchedulingRules, Slot, TimeRange,
};
use slot_cell::services::ledger::{NoPaymentLedger, PaymentLedger};
use slot_cell::services::notification::{NotificationDispatcher, TracingNotifier};
use slot_cell::services::store::{InMemorySlotStore, SlotStore};
use slot_cell::SlotEngine;

/// Tomorrow at `hour:minute` UTC, so availability filters never treat it as past.
pub fn tomorrow_at(hour: u32, minute: u32) -> DateTime<Utc> {
    let date = (Utc::now() + ChronoDuration::days(1)).date_naive();
    Utc.from_utc_datetime(&date.and_hms_opt(hour, minute, 0).unwrap())
}

pub fn open_slot(practitioner_id: Uuid, service_id: Uuid, start: DateTime<Utc>, minutes: i64) -> Slot {
    NewSlot::available(practitioner_id, service_id, TimeRange::minutes(start, minutes).unwrap())
        .into_slot(Utc::now())
}

pub async fn seed(store: &InMemorySlotStore, practitioner_id: Uuid, service_id: Uuid, start: DateTime<Utc>, minutes: i64) -> Slot {
    let slot = open_slot(practitioner_id, service_id, start, minutes);
    store.put(slot.clone()).await;
    slot
}

pub fn book_request(client_id: Uuid, payment_status: PaymentStatus) -> BookSlotRequest {
    BookSlotRequest {
        client_id,
        payment_status,
        awaiting_payment: false,
        beneficiary: None,
        notes: None,
        custom_price: None,
    }
}

pub fn rules() -> SchedulingRules {
    SchedulingRules {
        notification_timeout: Duration::from_millis(200),
        ..SchedulingRules::default()
    }
}

pub fn engine_over(store: Arc<dyn SlotStore>) -> SlotEngine {
    engine_with(store, Arc::new(TracingNotifier), Arc::new(NoPaymentLedger))
}

pub fn engine_with(
    store: Arc<dyn SlotStore>,
    dispatcher: Arc<dyn NotificationDispatcher>,
    ledger: Arc<dyn PaymentLedger>,
) -> SlotEngine {
    SlotEngine::with_collaborators(store, dispatcher, ledger, rules())
}
