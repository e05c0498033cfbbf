use crate::domain::ports::{Lease, Locker};
use crate::error::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

#[derive(Debug, Clone, Copy)]
struct Holder {
    token: Uuid,
    expires_at: Instant,
}

/// Process-local leases backed by a concurrent map.
///
/// Gives no guarantee across processes. Expired entries are taken over lazily
/// by the next acquirer.
#[derive(Debug, Default, Clone)]
pub struct MemoryLocker {
    held: Arc<DashMap<String, Holder>>,
}

impl MemoryLocker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_held(&self, key: &str) -> bool {
        self.held
            .get(key)
            .is_some_and(|h| h.expires_at > Instant::now())
    }
}

#[async_trait]
impl Locker for MemoryLocker {
    async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<Option<Box<dyn Lease>>> {
        let now = Instant::now();
        let holder = Holder {
            token: Uuid::new_v4(),
            expires_at: now + ttl,
        };

        let acquired = match self.held.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                if entry.get().expires_at <= now {
                    entry.insert(holder);
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(holder);
                true
            }
        };

        if !acquired {
            return Ok(None);
        }
        Ok(Some(Box::new(MemoryLease {
            held: Arc::clone(&self.held),
            key: key.to_string(),
            token: holder.token,
        })))
    }
}

struct MemoryLease {
    held: Arc<DashMap<String, Holder>>,
    key: String,
    token: Uuid,
}

#[async_trait]
impl Lease for MemoryLease {
    fn key(&self) -> &str {
        &self.key
    }

    async fn release(self: Box<Self>) -> Result<()> {
        // A lease that expired and was re-acquired belongs to someone else now.
        self.held.remove_if(&self.key, |_, h| h.token == self.token);
        Ok(())
    }
}
