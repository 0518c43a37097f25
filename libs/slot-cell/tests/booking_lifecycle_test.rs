use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use assert_matches::assert_matches;
use async_trait::async_trait;
use mockall::mock;
use mockall::predicate::eq;
use uuid::Uuid;

use shared_models::auth::ActorRole;
use slot_cell::models::{
    AlternativeAction, Beneficiary, CancelSlotRequest, CreateSlotRequest, EditSlotRequest,
    PaymentStatus, SchedulingRules, SlotError, SlotStatus,
};
use slot_cell::services::ledger::{NoPaymentLedger, PaymentLedger};
use slot_cell::services::notification::{
    Notification, NotificationDispatcher, NotificationError, Recipient, TemplateKind, TracingNotifier,
};
use slot_cell::services::store::{InMemorySlotStore, SlotStore, StoreError};
use slot_cell::SlotEngine;

mod common;
use common::*;

mock! {
    pub Ledger {}

    #[async_trait]
    impl PaymentLedger for Ledger {
        async fn has_linked_transaction(&self, slot_id: Uuid) -> Result<bool, StoreError>;
    }
}

mock! {
    pub Dispatcher {}

    #[async_trait]
    impl NotificationDispatcher for Dispatcher {
        async fn dispatch(&self, notification: &Notification) -> Result<(), NotificationError>;
    }
}

fn keep_history(keep: bool) -> CancelSlotRequest {
    CancelSlotRequest {
        keep_history: keep,
        reason: Some("client request".to_string()),
    }
}

#[tokio::test]
async fn unpaid_cancellation_releases_the_slot() {
    let store = Arc::new(InMemorySlotStore::new());
    let slot = seed(&store, Uuid::new_v4(), Uuid::new_v4(), tomorrow_at(10, 0), 60).await;
    let engine = engine_over(store.clone());

    let mut request = book_request(Uuid::new_v4(), PaymentStatus::Unpaid);
    request.beneficiary = Some(Beneficiary {
        name: "Ada".to_string(),
        email: Some("ada@example.com".to_string()),
        phone: None,
    });
    engine.booking.book(slot.id, request).await.unwrap();

    let outcome = engine
        .booking
        .cancel(slot.id, ActorRole::Client, keep_history(false))
        .await
        .unwrap();

    assert_eq!(outcome.slot.client_id, None);
    assert_eq!(outcome.slot.status, SlotStatus::Pending);
    assert_eq!(outcome.slot.payment_status, PaymentStatus::Unpaid);
    assert_eq!(outcome.slot.beneficiary_name, None);
    assert_eq!(outcome.slot.beneficiary_email, None);

    // Bookable again.
    engine
        .booking
        .book(slot.id, book_request(Uuid::new_v4(), PaymentStatus::Unpaid))
        .await
        .unwrap();
}

#[tokio::test]
async fn paid_cancellation_retains_the_client_for_audit() {
    let store = Arc::new(InMemorySlotStore::new());
    let slot = seed(&store, Uuid::new_v4(), Uuid::new_v4(), tomorrow_at(10, 0), 60).await;
    let engine = engine_over(store.clone());
    let client_id = Uuid::new_v4();

    engine
        .booking
        .book(slot.id, book_request(client_id, PaymentStatus::Paid))
        .await
        .unwrap();

    let outcome = engine
        .booking
        .cancel(slot.id, ActorRole::Admin, keep_history(false))
        .await
        .unwrap();

    assert_eq!(outcome.slot.client_id, Some(client_id));
    assert_eq!(outcome.slot.status, SlotStatus::Cancelled);
    assert_eq!(outcome.slot.cancellation_reason.as_deref(), Some("client request"));

    let err = engine
        .booking
        .book(slot.id, book_request(Uuid::new_v4(), PaymentStatus::Unpaid))
        .await
        .unwrap_err();
    assert_eq!(err, SlotError::AlreadyBooked);
}

#[tokio::test]
async fn keep_history_flag_retains_an_unpaid_booking() {
    let store = Arc::new(InMemorySlotStore::new());
    let slot = seed(&store, Uuid::new_v4(), Uuid::new_v4(), tomorrow_at(10, 0), 60).await;
    let engine = engine_over(store.clone());
    let client_id = Uuid::new_v4();

    engine
        .booking
        .book(slot.id, book_request(client_id, PaymentStatus::Unpaid))
        .await
        .unwrap();
    let outcome = engine
        .booking
        .cancel(slot.id, ActorRole::Practitioner, keep_history(true))
        .await
        .unwrap();

    assert_eq!(outcome.slot.status, SlotStatus::Cancelled);
    assert_eq!(outcome.slot.client_id, Some(client_id));
}

#[tokio::test]
async fn identical_same_service_slots_book_independently() {
    let store = Arc::new(InMemorySlotStore::new());
    let practitioner = Uuid::new_v4();
    let service = Uuid::new_v4();
    let first = seed(&store, practitioner, service, tomorrow_at(10, 0), 60).await;
    let second = seed(&store, practitioner, service, tomorrow_at(10, 0), 60).await;
    let engine = engine_over(store.clone());

    let a = engine
        .booking
        .book(first.id, book_request(Uuid::new_v4(), PaymentStatus::Unpaid))
        .await
        .unwrap();
    let b = engine
        .booking
        .book(second.id, book_request(Uuid::new_v4(), PaymentStatus::Unpaid))
        .await
        .unwrap();

    assert_eq!(a.slot.status, SlotStatus::Confirmed);
    assert_eq!(b.slot.status, SlotStatus::Confirmed);
    // Same service never suspends its own kind.
    assert_eq!(a.side_effects.matched, 0);
    assert_eq!(b.side_effects.matched, 0);
}

#[tokio::test]
async fn booking_missing_or_cancelled_slots_is_rejected() {
    let store = Arc::new(InMemorySlotStore::new());
    let mut cancelled = open_slot(Uuid::new_v4(), Uuid::new_v4(), tomorrow_at(10, 0), 60);
    cancelled.status = SlotStatus::Cancelled;
    store.put(cancelled.clone()).await;
    let engine = engine_over(store.clone());

    let missing = engine
        .booking
        .book(Uuid::new_v4(), book_request(Uuid::new_v4(), PaymentStatus::Unpaid))
        .await;
    assert_matches!(missing, Err(SlotError::NotFound(_)));

    let err = engine
        .booking
        .book(cancelled.id, book_request(Uuid::new_v4(), PaymentStatus::Unpaid))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        SlotError::InvalidTransition {
            from: SlotStatus::Cancelled,
            to: SlotStatus::Confirmed
        }
    );
}

#[tokio::test]
async fn concurrent_bookings_have_exactly_one_winner() {
    let store = Arc::new(InMemorySlotStore::new());
    let slot = seed(&store, Uuid::new_v4(), Uuid::new_v4(), tomorrow_at(10, 0), 60).await;
    let engine = Arc::new(engine_over(store.clone()));
    let slot_id = slot.id;

    let attempts: Vec<_> = (0..8)
        .map(|_| {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine
                    .booking
                    .book(slot_id, book_request(Uuid::new_v4(), PaymentStatus::Unpaid))
                    .await
            })
        })
        .collect();

    let mut winners = 0;
    for attempt in attempts {
        match attempt.await.unwrap() {
            Ok(_) => winners += 1,
            Err(e) => assert_eq!(e, SlotError::AlreadyBooked),
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test]
async fn create_rejects_same_service_overlap_but_allows_touching() {
    let store = Arc::new(InMemorySlotStore::new());
    let practitioner = Uuid::new_v4();
    let service = Uuid::new_v4();
    seed(&store, practitioner, service, tomorrow_at(10, 0), 60).await;
    let engine = engine_over(store.clone());

    let overlapping = CreateSlotRequest {
        practitioner_id: practitioner,
        service_id: service,
        start_time: tomorrow_at(10, 30),
        end_time: tomorrow_at(11, 30),
        notes: None,
        custom_price: None,
    };
    assert_matches!(engine.booking.create_slot(overlapping.clone()).await, Err(SlotError::ConflictDetected));

    let touching = CreateSlotRequest {
        start_time: tomorrow_at(11, 0),
        end_time: tomorrow_at(12, 0),
        ..overlapping.clone()
    };
    let created = engine.booking.create_slot(touching).await.unwrap();
    assert_eq!(created.status, SlotStatus::Pending);

    let other_service = CreateSlotRequest {
        service_id: Uuid::new_v4(),
        ..overlapping
    };
    assert!(engine.booking.create_slot(other_service).await.is_ok());
}

#[tokio::test]
async fn moving_a_pending_slot_onto_a_sibling_conflicts() {
    let store = Arc::new(InMemorySlotStore::new());
    let practitioner = Uuid::new_v4();
    let service = Uuid::new_v4();
    seed(&store, practitioner, service, tomorrow_at(10, 0), 60).await;
    let movable = seed(&store, practitioner, service, tomorrow_at(12, 0), 60).await;
    let engine = engine_over(store.clone());

    let edit = EditSlotRequest {
        start_time: Some(tomorrow_at(10, 30)),
        end_time: Some(tomorrow_at(11, 30)),
        ..EditSlotRequest::default()
    };
    assert_matches!(engine.booking.edit_slot(movable.id, edit).await, Err(SlotError::ConflictDetected));
}

#[tokio::test]
async fn edit_rejects_cancelled_as_a_target_status() {
    let store = Arc::new(InMemorySlotStore::new());
    let slot = seed(&store, Uuid::new_v4(), Uuid::new_v4(), tomorrow_at(10, 0), 60).await;
    let engine = engine_over(store.clone());

    let err = engine
        .booking
        .edit_slot(slot.id, EditSlotRequest::status(SlotStatus::Cancelled))
        .await
        .unwrap_err();
    assert_matches!(err, SlotError::ValidationFailed(_));
}

#[tokio::test]
async fn linked_transaction_blocks_non_privileged_cancel() {
    let store = Arc::new(InMemorySlotStore::new());
    let slot = seed(&store, Uuid::new_v4(), Uuid::new_v4(), tomorrow_at(10, 0), 60).await;

    let mut ledger = MockLedger::new();
    ledger
        .expect_has_linked_transaction()
        .with(eq(slot.id))
        .times(2)
        .returning(|_| Ok(true));

    let engine = engine_with(store.clone(), Arc::new(TracingNotifier), Arc::new(ledger));
    engine
        .booking
        .book(slot.id, book_request(Uuid::new_v4(), PaymentStatus::Paid))
        .await
        .unwrap();

    let err = engine
        .booking
        .cancel(slot.id, ActorRole::Practitioner, keep_history(false))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        SlotError::HasLinkedTransaction {
            alternative: AlternativeAction::MoveSlot
        }
    );
    assert_eq!(store.get(slot.id).await.unwrap().unwrap().status, SlotStatus::Confirmed);

    let outcome = engine
        .booking
        .cancel(slot.id, ActorRole::Admin, keep_history(false))
        .await
        .unwrap();
    assert_eq!(outcome.slot.status, SlotStatus::Cancelled);
}

#[tokio::test]
async fn ledger_outage_fails_the_cancel() {
    let store = Arc::new(InMemorySlotStore::new());
    let slot = seed(&store, Uuid::new_v4(), Uuid::new_v4(), tomorrow_at(10, 0), 60).await;

    let mut ledger = MockLedger::new();
    ledger
        .expect_has_linked_transaction()
        .returning(|_| Err(StoreError::Unavailable("ledger down".to_string())));

    let engine = engine_with(store.clone(), Arc::new(TracingNotifier), Arc::new(ledger));
    engine
        .booking
        .book(slot.id, book_request(Uuid::new_v4(), PaymentStatus::Unpaid))
        .await
        .unwrap();

    let err = engine
        .booking
        .cancel(slot.id, ActorRole::Admin, keep_history(false))
        .await
        .unwrap_err();
    assert_matches!(err, SlotError::BackingStoreUnavailable(_));
    assert!(store.get(slot.id).await.unwrap().unwrap().is_booked());
}

#[tokio::test]
async fn booking_notifies_client_and_practitioner() {
    let store = Arc::new(InMemorySlotStore::new());
    let practitioner = Uuid::new_v4();
    let slot = seed(&store, practitioner, Uuid::new_v4(), tomorrow_at(10, 0), 60).await;
    let client_id = Uuid::new_v4();

    let mut dispatcher = MockDispatcher::new();
    dispatcher
        .expect_dispatch()
        .withf(move |n: &Notification| {
            n.template == TemplateKind::Confirmation && n.recipient == Recipient::Client(client_id)
        })
        .times(1)
        .returning(|_| Ok(()));
    dispatcher
        .expect_dispatch()
        .withf(move |n: &Notification| {
            n.template == TemplateKind::Confirmation && n.recipient == Recipient::Practitioner(practitioner)
        })
        .times(1)
        .returning(|_| Ok(()));

    let engine = engine_with(store.clone(), Arc::new(dispatcher), Arc::new(NoPaymentLedger));
    engine
        .booking
        .book(slot.id, book_request(client_id, PaymentStatus::Unpaid))
        .await
        .unwrap();
    engine.notifications.settled().await;
}

#[tokio::test]
async fn awaiting_payment_defers_the_confirmation() {
    let store = Arc::new(InMemorySlotStore::new());
    let slot = seed(&store, Uuid::new_v4(), Uuid::new_v4(), tomorrow_at(10, 0), 60).await;

    let calls = Arc::new(AtomicUsize::new(0));
    let counted = calls.clone();
    let mut dispatcher = MockDispatcher::new();
    dispatcher.expect_dispatch().returning(move |_| {
        counted.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    let engine = engine_with(store.clone(), Arc::new(dispatcher), Arc::new(NoPaymentLedger));
    let mut request = book_request(Uuid::new_v4(), PaymentStatus::Unpaid);
    request.awaiting_payment = true;

    let outcome = engine.booking.book(slot.id, request).await.unwrap();
    engine.notifications.settled().await;

    assert_eq!(outcome.slot.status, SlotStatus::Confirmed);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn failing_notifications_never_fail_the_booking() {
    let store = Arc::new(InMemorySlotStore::new());
    let slot = seed(&store, Uuid::new_v4(), Uuid::new_v4(), tomorrow_at(10, 0), 60).await;

    let mut dispatcher = MockDispatcher::new();
    // Transient failures are retried once per notice.
    dispatcher
        .expect_dispatch()
        .times(4)
        .returning(|_| Err(NotificationError::Transient("smtp down".to_string())));

    let engine = engine_with(store.clone(), Arc::new(dispatcher), Arc::new(NoPaymentLedger));
    let outcome = engine
        .booking
        .book(slot.id, book_request(Uuid::new_v4(), PaymentStatus::Unpaid))
        .await
        .unwrap();
    assert!(outcome.slot.is_booked());
    engine.notifications.settled().await;
}

/// Never answers, like an endpoint that accepts the connection and hangs.
struct StalledDispatcher;

#[async_trait]
impl NotificationDispatcher for StalledDispatcher {
    async fn dispatch(&self, _notification: &Notification) -> Result<(), NotificationError> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(())
    }
}

#[tokio::test]
async fn stalled_notifications_do_not_delay_the_booking() {
    let store = Arc::new(InMemorySlotStore::new());
    let practitioner = Uuid::new_v4();
    let start = tomorrow_at(10, 0);
    let slot = seed(&store, practitioner, Uuid::new_v4(), start, 60).await;

    // A booked competitor of another service, so the suspend pass notifies too.
    let mut competitor = open_slot(practitioner, Uuid::new_v4(), start, 60);
    competitor.client_id = Some(Uuid::new_v4());
    store.put(competitor.clone()).await;

    let slow_notices = SchedulingRules {
        notification_timeout: Duration::from_secs(2),
        ..rules()
    };
    let engine = SlotEngine::with_collaborators(
        store.clone(),
        Arc::new(StalledDispatcher),
        Arc::new(NoPaymentLedger),
        slow_notices,
    );

    let started = Instant::now();
    let outcome = engine
        .booking
        .book(slot.id, book_request(Uuid::new_v4(), PaymentStatus::Unpaid))
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(outcome.side_effects.suspended, 1);
    assert_eq!(outcome.side_effects.notified, 1);
}

#[tokio::test]
async fn complete_is_terminal() {
    let store = Arc::new(InMemorySlotStore::new());
    let slot = seed(&store, Uuid::new_v4(), Uuid::new_v4(), tomorrow_at(10, 0), 60).await;
    let engine = engine_over(store.clone());

    engine
        .booking
        .book(slot.id, book_request(Uuid::new_v4(), PaymentStatus::Paid))
        .await
        .unwrap();
    let done = engine.booking.complete(slot.id).await.unwrap();
    assert_eq!(done.slot.status, SlotStatus::Completed);

    assert_matches!(
        engine.booking.cancel(slot.id, ActorRole::Admin, keep_history(false)).await,
        Err(SlotError::InvalidTransition { from: SlotStatus::Completed, to: SlotStatus::Cancelled })
    );
    assert_matches!(
        engine.booking.edit_slot(slot.id, EditSlotRequest::status(SlotStatus::Pending)).await,
        Err(SlotError::InvalidTransition { .. })
    );
}
