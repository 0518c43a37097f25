// libs/slot-cell/src/services/ledger.rs
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use shared_database::SupabaseClient;

use crate::services::store::StoreError;

/// Read-only view of the external payment ledger.
#[async_trait]
pub trait PaymentLedger: Send + Sync {
    async fn has_linked_transaction(&self, slot_id: Uuid) -> Result<bool, StoreError>;
}

/// Ledger for deployments without payment integration.
pub struct NoPaymentLedger;

#[async_trait]
impl PaymentLedger for NoPaymentLedger {
    async fn has_linked_transaction(&self, _slot_id: Uuid) -> Result<bool, StoreError> {
        Ok(false)
    }
}

pub struct SupabasePaymentLedger {
    supabase: Arc<SupabaseClient>,
}

impl SupabasePaymentLedger {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }
}

#[async_trait]
impl PaymentLedger for SupabasePaymentLedger {
    async fn has_linked_transaction(&self, slot_id: Uuid) -> Result<bool, StoreError> {
        let path = format!(
            "/rest/v1/payment_transactions?slot_id=eq.{}&status=eq.settled&select=id&limit=1",
            slot_id
        );

        let rows: Vec<Value> = self.supabase.request(Method::GET, &path, None, None).await?;
        debug!("Slot {} has {} settled transactions", slot_id, rows.len());

        Ok(!rows.is_empty())
    }
}
