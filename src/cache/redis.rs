use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;

use super::{CacheError, IdempotencyCache, IdempotencyRecord};
use crate::context::RequestContext;

// ============================================================================
// Redis Idempotency Cache
// ============================================================================
//
// Records live under `idemp:{tenant}:{key}` as JSON with a TTL. The
// reservation primitive is SET NX EX, which is atomic on the server side.
//
// ============================================================================

#[derive(Clone)]
pub struct RedisIdempotencyCache {
    conn: MultiplexedConnection,
    op_timeout: Duration,
}

impl RedisIdempotencyCache {
    pub async fn connect(url: &str, op_timeout: Duration) -> Result<Self, CacheError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self { conn, op_timeout })
    }

    fn cache_key(tenant_id: &str, key: &str) -> String {
        format!("idemp:{}:{}", tenant_id, key)
    }
}

async fn timed<T, F>(limit: Duration, fut: F) -> Result<T, CacheError>
where
    F: Future<Output = redis::RedisResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(CacheError::Timeout),
    }
}

#[async_trait]
impl IdempotencyCache for RedisIdempotencyCache {
    async fn get(
        &self,
        ctx: &RequestContext,
        tenant_id: &str,
        key: &str,
    ) -> Result<Option<IdempotencyRecord>, CacheError> {
        let cache_key = Self::cache_key(tenant_id, key);
        let mut conn = self.conn.clone();

        let raw: Option<String> = timed(
            self.op_timeout,
            redis::cmd("GET").arg(&cache_key).query_async(&mut conn),
        )
        .await?;
        tracing::debug!(
            trace_id = %ctx.trace_id,
            cache_key = %cache_key,
            hit = raw.is_some(),
            "Idempotency cache lookup"
        );

        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn set(
        &self,
        _ctx: &RequestContext,
        tenant_id: &str,
        key: &str,
        record: &IdempotencyRecord,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let cache_key = Self::cache_key(tenant_id, key);
        let json = serde_json::to_string(record)?;
        let mut conn = self.conn.clone();

        timed(
            self.op_timeout,
            redis::cmd("SETEX")
                .arg(&cache_key)
                .arg(ttl.as_secs().max(1))
                .arg(json)
                .query_async::<()>(&mut conn),
        )
        .await?;

        Ok(())
    }

    async fn set_if_absent(
        &self,
        ctx: &RequestContext,
        tenant_id: &str,
        key: &str,
        record: &IdempotencyRecord,
        ttl: Duration,
    ) -> Result<bool, CacheError> {
        let cache_key = Self::cache_key(tenant_id, key);
        let json = serde_json::to_string(record)?;
        let mut conn = self.conn.clone();

        // SET NX EX: one winner per key, expiry set atomically with the value.
        let reply: Option<String> = timed(
            self.op_timeout,
            redis::cmd("SET")
                .arg(&cache_key)
                .arg(json)
                .arg("NX")
                .arg("EX")
                .arg(ttl.as_secs().max(1))
                .query_async(&mut conn),
        )
        .await?;

        let reserved = reply.is_some();
        tracing::debug!(
            trace_id = %ctx.trace_id,
            cache_key = %cache_key,
            reserved = reserved,
            "Idempotency reservation attempt"
        );

        Ok(reserved)
    }

    async fn remove(
        &self,
        _ctx: &RequestContext,
        tenant_id: &str,
        key: &str,
    ) -> Result<(), CacheError> {
        let cache_key = Self::cache_key(tenant_id, key);
        let mut conn = self.conn.clone();

        timed(
            self.op_timeout,
            redis::cmd("DEL").arg(&cache_key).query_async::<()>(&mut conn),
        )
        .await?;
        Ok(())
    }
}
