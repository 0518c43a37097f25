use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use chrono::Utc;
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use shared_database::SupabaseClient;
use shared_utils::test_utils::{MockSupabaseResponses, TestConfig};
use slot_cell::models::{NewSlot, PaymentStatus, SlotError, SlotStatus, TimeRange};
use slot_cell::services::ledger::{PaymentLedger, SupabasePaymentLedger};
use slot_cell::services::notification::{
    Notification, NotificationDispatcher, NotificationError, TemplateKind, WebhookNotifier,
};
use slot_cell::services::store::{SlotStore, StoreError};
use slot_cell::services::supabase_store::SupabaseSlotStore;

mod common;
use common::*;

fn client_for(server: &MockServer) -> Arc<SupabaseClient> {
    Arc::new(SupabaseClient::new(&TestConfig::with_supabase(&server.uri()).to_app_config()))
}

#[tokio::test]
async fn get_decodes_a_slot_row() {
    let server = MockServer::start().await;
    let (id, practitioner, service) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    let start = tomorrow_at(10, 0);

    Mock::given(method("GET"))
        .and(path("/rest/v1/slots"))
        .and(query_param("id", format!("eq.{}", id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::slot_row(id, practitioner, service, start, 45)
        ])))
        .mount(&server)
        .await;

    let store = SupabaseSlotStore::new(client_for(&server));
    let slot = store.get(id).await.unwrap().unwrap();

    assert_eq!(slot.practitioner_id, practitioner);
    assert_eq!(slot.duration_minutes(), 45);
    assert_eq!(slot.status, SlotStatus::Pending);
    assert_eq!(slot.suspended_by, None);
}

#[tokio::test]
async fn lost_conditional_update_is_reported_as_already_booked() {
    let server = MockServer::start().await;
    let (id, practitioner, service) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    let start = tomorrow_at(10, 0);

    // First read sees the slot open; the re-read after the failed guard sees it taken.
    Mock::given(method("GET"))
        .and(path("/rest/v1/slots"))
        .and(query_param("id", format!("eq.{}", id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::slot_row(id, practitioner, service, start, 60)
        ])))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/slots"))
        .and(query_param("id", format!("eq.{}", id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::booked_slot_row(id, practitioner, service, Uuid::new_v4(), start, 60)
        ])))
        .mount(&server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/slots"))
        .and(query_param("id", format!("in.({})", id)))
        .and(query_param("client_id", "is.null"))
        .and(query_param("status", "in.(pending)"))
        .and(header("Prefer", "return=representation"))
        .and(body_partial_json(json!({ "status": "confirmed" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let engine = engine_over(Arc::new(SupabaseSlotStore::new(client_for(&server))));
    let err = engine
        .booking
        .book(id, book_request(Uuid::new_v4(), PaymentStatus::Unpaid))
        .await
        .unwrap_err();

    assert_eq!(err, SlotError::AlreadyBooked);
}

#[tokio::test]
async fn short_insert_representation_is_rejected() {
    let server = MockServer::start().await;
    let practitioner = Uuid::new_v4();
    let service = Uuid::new_v4();
    let rows: Vec<NewSlot> = (0..2)
        .map(|i| {
            let start = tomorrow_at(9 + i, 0);
            NewSlot::available(practitioner, service, TimeRange::minutes(start, 60).unwrap())
        })
        .collect();

    Mock::given(method("POST"))
        .and(path("/rest/v1/slots"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([
            MockSupabaseResponses::slot_row(rows[0].id, practitioner, service, rows[0].start_time, 60)
        ])))
        .mount(&server)
        .await;

    let store = SupabaseSlotStore::new(client_for(&server));
    let err = store.insert_batch(&rows).await.unwrap_err();
    assert_matches!(err, StoreError::Rejected(_));
}

#[tokio::test]
async fn server_errors_surface_as_backing_store_unavailable() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/slots"))
        .respond_with(ResponseTemplate::new(503).set_body_json(
            MockSupabaseResponses::error_response("upstream unavailable", "503"),
        ))
        .mount(&server)
        .await;

    let engine = engine_over(Arc::new(SupabaseSlotStore::new(client_for(&server))));
    let err = engine.booking.get_slot(Uuid::new_v4()).await.unwrap_err();

    assert_matches!(err, SlotError::BackingStoreUnavailable(_));
    assert!(err.is_transient());
}

#[tokio::test]
async fn ledger_detects_settled_transactions() {
    let server = MockServer::start().await;
    let linked = Uuid::new_v4();
    let unlinked = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/payment_transactions"))
        .and(query_param("slot_id", format!("eq.{}", linked)))
        .and(query_param("status", "eq.settled"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "id": Uuid::new_v4() }])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/payment_transactions"))
        .and(query_param("slot_id", format!("eq.{}", unlinked)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let ledger = SupabasePaymentLedger::new(client_for(&server));
    assert!(ledger.has_linked_transaction(linked).await.unwrap());
    assert!(!ledger.has_linked_transaction(unlinked).await.unwrap());
}

#[tokio::test]
async fn webhook_notifier_classifies_failures() {
    let server = MockServer::start().await;
    let slot = open_slot(Uuid::new_v4(), Uuid::new_v4(), tomorrow_at(10, 0), 60);
    let notice = Notification::for_parties(TemplateKind::Reminder, &slot).remove(0);

    Mock::given(method("POST"))
        .and(path("/ok"))
        .and(body_partial_json(json!({ "template": "reminder" })))
        .respond_with(ResponseTemplate::new(202))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/down"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/bad"))
        .respond_with(ResponseTemplate::new(422))
        .mount(&server)
        .await;

    let ok = WebhookNotifier::new(format!("{}/ok", server.uri()));
    let down = WebhookNotifier::new(format!("{}/down", server.uri()));
    let bad = WebhookNotifier::new(format!("{}/bad", server.uri()));

    assert!(ok.dispatch(&notice).await.is_ok());
    assert_matches!(down.dispatch(&notice).await, Err(NotificationError::Transient(_)));
    assert_matches!(bad.dispatch(&notice).await, Err(NotificationError::Rejected(_)));
}

#[tokio::test]
async fn slow_store_times_out_through_the_bounded_decorator() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/slots"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])).set_delay(Duration::from_millis(500)))
        .mount(&server)
        .await;

    let inner: Arc<dyn SlotStore> = Arc::new(SupabaseSlotStore::new(client_for(&server)));
    let bounded = slot_cell::services::store::BoundedSlotStore::new(inner, Duration::from_millis(50));

    let started = Utc::now();
    let err = bounded.get(Uuid::new_v4()).await.unwrap_err();
    assert_eq!(err, StoreError::Timeout(Duration::from_millis(50)));
    assert!(Utc::now() - started < chrono::Duration::milliseconds(450));
}
