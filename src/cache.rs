use redis::aio::ConnectionManager;

/// Redis wrapper for the rate-limit counters. Held as `Option<RedisCache>` in
/// app state; a missing or failing cache never blocks a request.
#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
    rate_limit_per_minute: u32,
}

impl RedisCache {
    pub async fn connect(
        url: &str,
        rate_limit_per_minute: u32,
    ) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self {
            conn,
            rate_limit_per_minute,
        })
    }

    pub async fn ping(&self) -> bool {
        let mut conn = self.conn.clone();
        let pong: Result<String, redis::RedisError> =
            redis::cmd("PING").query_async(&mut conn).await;
        pong.is_ok()
    }

    /// Fixed 60-second window per client key. Returns true if the request is
    /// allowed; any Redis failure allows the request (fail open).
    pub async fn check_rate_limit(&self, client_key: &str) -> bool {
        let mut conn = self.conn.clone();
        let key = format!("rate:{client_key}");

        let count: Result<Option<u32>, redis::RedisError> =
            redis::cmd("GET").arg(&key).query_async(&mut conn).await;

        match count {
            Ok(Some(n)) if n >= self.rate_limit_per_minute => return false,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("Rate limit check failed, allowing request: {}", e);
                return true;
            }
        }

        let incr: Result<(), redis::RedisError> = redis::pipe()
            .atomic()
            .incr(&key, 1)
            .ignore()
            .expire(&key, 60)
            .ignore()
            .query_async(&mut conn)
            .await;

        if let Err(e) = incr {
            tracing::warn!("Rate limit increment failed, allowing request: {}", e);
        }

        true
    }
}
