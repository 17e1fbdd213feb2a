use anyhow::Result;
use async_trait::async_trait;
use redis::{AsyncCommands, aio::ConnectionManager};
use service::{KvError, KvStore};

/// Redis backed implementation of the directory's key-value
/// collaborator.
///
/// The managed connection reconnects on its own after transient
/// failures; individual operations that fail while the server is
/// unreachable surface as [`KvError`] and are absorbed upstream as a
/// directory miss.
pub struct RedisStore {
    connection: ConnectionManager,
}

impl RedisStore {
    /// Connect to the redis instance named by `uri`.
    ///
    /// A malformed URI fails construction before any network access.
    pub async fn new(uri: &str) -> Result<Self> {
        let client = redis::Client::open(uri)?;

        Ok(Self {
            connection: client.get_connection_manager().await?,
        })
    }
}

#[async_trait]
impl KvStore for RedisStore {
    async fn set(&self, key: &str, value: &str) -> Result<(), KvError> {
        let mut connection = self.connection.clone();

        connection
            .set::<_, _, ()>(key, value)
            .await
            .map_err(|e| KvError(e.to_string()))
    }

    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let mut connection = self.connection.clone();

        connection
            .get::<_, Option<String>>(key)
            .await
            .map_err(|e| KvError(e.to_string()))
    }
}
