use anyhow::{Context, Result, anyhow};
use redis::Commands;
use serde_json::Value;
use std::sync::Mutex;
use tracing::info;

use super::{CacheStore, decode_entry};

/// Shared store on a Redis server. Each worker opens its own connection.
pub struct RedisStore {
    connection: Mutex<redis::Connection>,
}

impl RedisStore {
    pub fn connect(url: &str) -> Result<Self> {
        let client =
            redis::Client::open(url).with_context(|| format!("invalid redis url: {}", url))?;
        let mut connection = client
            .get_connection()
            .with_context(|| format!("failed to connect to redis: {}", url))?;
        let _: String = redis::cmd("PING")
            .query(&mut connection)
            .with_context(|| "redis did not answer PING")?;
        info!("connected to shared cache");
        Ok(Self {
            connection: Mutex::new(connection),
        })
    }
}

impl CacheStore for RedisStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        let mut connection = self
            .connection
            .lock()
            .map_err(|_| anyhow!("redis connection lock poisoned"))?;
        let raw: Option<String> = connection
            .get(key)
            .with_context(|| format!("redis GET failed: {}", key))?;
        let Some(raw) = raw else {
            return Ok(None);
        };
        Ok(decode_entry(&raw, key))
    }

    fn set(&self, key: &str, value: &Value) -> Result<()> {
        let encoded = serde_json::to_string(value)?;
        let mut connection = self
            .connection
            .lock()
            .map_err(|_| anyhow!("redis connection lock poisoned"))?;
        let _: () = connection
            .set(key, encoded)
            .with_context(|| format!("redis SET failed: {}", key))?;
        Ok(())
    }
}
