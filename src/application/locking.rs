use crate::domain::ports::Locker;
use crate::error::{AppError, Result};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

pub const ORDER_CREATE_KEY: &str = "orders:create";

pub fn order_key(order_id: Uuid) -> String {
    format!("order:{order_id}")
}

pub fn quote_key(outlet_id: Uuid) -> String {
    format!("quote:calculate:{outlet_id}")
}

pub fn payment_create_key(payment_order_id: &str) -> String {
    format!("payment:create:{payment_order_id}")
}

pub fn payment_key(payment_order_id: &str) -> String {
    format!("payment:{payment_order_id}")
}

/// Runs `work` while holding the lease on `key`.
///
/// A held key fails fast with [`AppError::Busy`]; nothing is queued or retried.
/// The lease is released whether or not `work` succeeds.
pub async fn with_lock<T, F, Fut>(locker: &dyn Locker, key: &str, ttl: Duration, work: F) -> Result<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let Some(lease) = locker.try_acquire(key, ttl).await? else {
        warn!(key, "resource busy");
        return Err(AppError::Busy {
            key: key.to_string(),
        });
    };
    debug!(key, "lease acquired");

    let outcome = work().await;

    if let Err(e) = lease.release().await {
        warn!(key, error = %e, "failed to release lease, it will expire");
    }
    outcome
}
