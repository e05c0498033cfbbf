use crate::domain::ports::{Lease, Locker};
use crate::error::{AppError, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::time::Duration;
use uuid::Uuid;

/// Deletes the key only while it still holds our token.
const RELEASE_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("del", KEYS[1])
else
    return 0
end
"#;

fn lock_error(err: redis::RedisError) -> AppError {
    AppError::Lock(Box::new(err))
}

/// Leases shared by every process pointed at the same Redis.
///
/// Acquire is `SET key token NX PX ttl`; release is a token-checked delete.
#[derive(Clone)]
pub struct RedisLocker {
    conn: ConnectionManager,
}

impl RedisLocker {
    /// Connects and pings, so an unreachable coordinator fails here.
    ///
    /// # Arguments
    ///
    /// * `url` - A `redis://` connection URL.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(lock_error)?;
        let mut conn = ConnectionManager::new(client).await.map_err(lock_error)?;
        let _pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(lock_error)?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl Locker for RedisLocker {
    async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<Option<Box<dyn Lease>>> {
        let mut conn = self.conn.clone();
        let token = Uuid::new_v4().to_string();
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);

        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(&token)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await
            .map_err(lock_error)?;

        Ok(reply.map(|_| {
            Box::new(RedisLease {
                conn,
                key: key.to_string(),
                token,
            }) as Box<dyn Lease>
        }))
    }
}

struct RedisLease {
    conn: ConnectionManager,
    key: String,
    token: String,
}

#[async_trait]
impl Lease for RedisLease {
    fn key(&self) -> &str {
        &self.key
    }

    async fn release(self: Box<Self>) -> Result<()> {
        let mut conn = self.conn.clone();
        let _deleted: i64 = redis::Script::new(RELEASE_SCRIPT)
            .key(&self.key)
            .arg(&self.token)
            .invoke_async(&mut conn)
            .await
            .map_err(lock_error)?;
        Ok(())
    }
}
