// libs/slot-cell/src/services/engine.rs
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use shared_config::{AppConfig, SlotStoreBackend};
use shared_database::SupabaseClient;

use crate::models::SchedulingRules;
use crate::services::booking::SlotBookingService;
use crate::services::generator::SlotGeneratorService;
use crate::services::ledger::{NoPaymentLedger, PaymentLedger, SupabasePaymentLedger};
use crate::services::notification::{
    NotificationDispatcher, NotificationService, TracingNotifier, WebhookNotifier,
};
use crate::services::reaper::StaleSlotReaper;
use crate::services::store::{BoundedSlotStore, InMemorySlotStore, SlotStore};
use crate::services::supabase_store::SupabaseSlotStore;

/// Every slot operation wired to one shared store.
pub struct SlotEngine {
    pub booking: SlotBookingService,
    pub generator: SlotGeneratorService,
    pub reaper: StaleSlotReaper,
    pub notifications: NotificationService,
}

impl SlotEngine {
    pub fn from_config(config: &AppConfig) -> Self {
        let timeout = Duration::from_millis(config.store_timeout_ms);

        let (store, ledger): (Arc<dyn SlotStore>, Arc<dyn PaymentLedger>) = match config.slot_store_backend {
            SlotStoreBackend::Supabase => {
                let supabase = Arc::new(SupabaseClient::new(config));
                (
                    Arc::new(SupabaseSlotStore::new(supabase.clone())),
                    Arc::new(SupabasePaymentLedger::new(supabase)),
                )
            }
            SlotStoreBackend::Memory => (Arc::new(InMemorySlotStore::new()), Arc::new(NoPaymentLedger)),
        };

        let dispatcher: Arc<dyn NotificationDispatcher> = match &config.notification_webhook_url {
            Some(url) => Arc::new(WebhookNotifier::new(url.clone())),
            None => Arc::new(TracingNotifier),
        };

        info!("Slot engine using {:?} store with {:?} timeout", config.slot_store_backend, timeout);

        Self::with_collaborators(
            Arc::new(BoundedSlotStore::new(store, timeout)),
            dispatcher,
            ledger,
            SchedulingRules::from_config(config),
        )
    }

    pub fn with_collaborators(
        store: Arc<dyn SlotStore>,
        dispatcher: Arc<dyn NotificationDispatcher>,
        ledger: Arc<dyn PaymentLedger>,
        rules: SchedulingRules,
    ) -> Self {
        let notifications = NotificationService::new(dispatcher, rules.notification_timeout);

        Self {
            booking: SlotBookingService::new(store.clone(), notifications.clone(), ledger, rules.clone()),
            generator: SlotGeneratorService::new(store.clone(), rules),
            reaper: StaleSlotReaper::new(store),
            notifications,
        }
    }
}
