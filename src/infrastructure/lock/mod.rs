//! Lock coordinator implementations behind the `Locker` port.

pub mod memory;
#[cfg(feature = "lock-redis")]
pub mod remote;

use crate::domain::ports::LockerRef;
use memory::MemoryLocker;
use std::sync::Arc;
use tracing::{info, warn};

/// Picks the networked coordinator when one is configured and reachable,
/// otherwise process-local leases.
pub async fn select_locker(redis_url: Option<&str>) -> LockerRef {
    let Some(url) = redis_url.filter(|u| !u.trim().is_empty()) else {
        info!("no lock coordinator configured, using in-memory leases");
        return Arc::new(MemoryLocker::new());
    };

    #[cfg(feature = "lock-redis")]
    {
        match remote::RedisLocker::connect(url).await {
            Ok(locker) => {
                info!("using redis lock coordinator");
                Arc::new(locker)
            }
            Err(e) => {
                warn!(error = %e, "redis unreachable, falling back to in-memory leases");
                Arc::new(MemoryLocker::new())
            }
        }
    }

    #[cfg(not(feature = "lock-redis"))]
    {
        let _ = url;
        warn!("REDIS_URL set but 'lock-redis' feature is not enabled, using in-memory leases");
        Arc::new(MemoryLocker::new())
    }
}
