// libs/slot-cell/src/services/retry.rs
use std::future::Future;

use tracing::warn;

use crate::services::store::StoreError;

/// Runs a secondary-effect store call, retrying exactly once on a transient failure.
pub async fn retry_transient_once<T, F, Fut>(label: &str, mut op: F) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    match op().await {
        Err(e) if e.is_transient() => {
            warn!("{} failed transiently ({}), retrying once", label, e);
            op().await
        }
        other => other,
    }
}
