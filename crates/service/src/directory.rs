use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use dashmap::DashMap;

use crate::KvStore;

#[derive(Debug)]
pub enum DirectoryError {
    /// The persistent collaborator is unreachable. Callers treat this
    /// as a dropped or delayed packet, not as a fatal error.
    Unavailable,
}

impl std::error::Error for DirectoryError {}

impl std::fmt::Display for DirectoryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// The network origin and liveness of one media stream.
///
/// `last_seen` is a tick from the directory's internal monotonic
/// counter, not wall clock time; it only orders entries against each
/// other. Entries are never expired by the directory itself, expiry
/// policy belongs to an external layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoutingEntry {
    pub endpoint: SocketAddr,
    pub last_seen: u64,
}

/// Concurrent mapping from stream identifier (SSRC) to its current
/// network origin.
///
/// The map is sharded, so operations on distinct streams only contend
/// on their shard while updates to the same stream are strictly
/// serialized. An optional [`KvStore`] collaborator persists the
/// mapping across processes: records write through to it and lookups
/// fall back to it on a local miss.
pub struct RoutingDirectory {
    entries: DashMap<u32, RoutingEntry, ahash::RandomState>,
    clock: AtomicU64,
    store: Option<Arc<dyn KvStore>>,
}

impl RoutingDirectory {
    pub fn new(store: Option<Arc<dyn KvStore>>) -> Self {
        Self {
            entries: DashMap::with_capacity_and_hasher(1024, ahash::RandomState::new()),
            clock: AtomicU64::new(0),
            store,
        }
    }

    /// Record the origin of a stream.
    ///
    /// Idempotent upsert with last-writer-wins semantics: a stream
    /// that roams to a new origin has its entry updated in place, not
    /// recreated.
    ///
    /// # Test
    ///
    /// ```
    /// use pollster::FutureExt;
    /// use quic_bridge_service::directory::RoutingDirectory;
    ///
    /// let directory = RoutingDirectory::new(None);
    ///
    /// let first = "127.0.0.1:5000".parse().unwrap();
    /// let second = "127.0.0.1:6000".parse().unwrap();
    ///
    /// directory.record(0x12345678, first).block_on().unwrap();
    /// directory.record(0x12345678, second).block_on().unwrap();
    ///
    /// let entry = directory.lookup(0x12345678).block_on().unwrap().unwrap();
    ///
    /// assert_eq!(entry.endpoint, second);
    /// assert_eq!(directory.len(), 1);
    /// ```
    pub async fn record(&self, ssrc: u32, endpoint: SocketAddr) -> Result<(), DirectoryError> {
        let last_seen = self.clock.fetch_add(1, Ordering::Relaxed) + 1;

        self.entries
            .entry(ssrc)
            .and_modify(|it| {
                it.endpoint = endpoint;
                it.last_seen = last_seen;
            })
            .or_insert(RoutingEntry {
                endpoint,
                last_seen,
            });

        if let Some(store) = &self.store {
            store
                .set(&ssrc.to_string(), &endpoint.to_string())
                .await
                .map_err(|_| DirectoryError::Unavailable)?;
        }

        Ok(())
    }

    /// Resolve the origin of a stream.
    ///
    /// A stream that was never recorded is a defined miss, not an
    /// error. When the collaborator resolves a stream that the local
    /// map has not seen, the local map is warmed with it.
    ///
    /// # Test
    ///
    /// ```
    /// use pollster::FutureExt;
    /// use quic_bridge_service::directory::RoutingDirectory;
    ///
    /// let directory = RoutingDirectory::new(None);
    ///
    /// assert!(directory.lookup(0xffffffff).block_on().unwrap().is_none());
    /// ```
    pub async fn lookup(&self, ssrc: u32) -> Result<Option<RoutingEntry>, DirectoryError> {
        if let Some(it) = self.entries.get(&ssrc) {
            return Ok(Some(*it));
        }

        let Some(store) = &self.store else {
            return Ok(None);
        };

        let Some(value) = store
            .get(&ssrc.to_string())
            .await
            .map_err(|_| DirectoryError::Unavailable)?
        else {
            return Ok(None);
        };

        // Another process recorded this stream; a value that does not
        // parse back to an endpoint is treated as a miss.
        let Ok(endpoint) = value.parse() else {
            return Ok(None);
        };

        let last_seen = self.clock.fetch_add(1, Ordering::Relaxed) + 1;
        let entry = *self.entries.entry(ssrc).or_insert(RoutingEntry {
            endpoint,
            last_seen,
        });

        Ok(Some(entry))
    }

    /// The most recently seen stream, if any.
    ///
    /// # Test
    ///
    /// ```
    /// use pollster::FutureExt;
    /// use quic_bridge_service::directory::RoutingDirectory;
    ///
    /// let directory = RoutingDirectory::new(None);
    ///
    /// assert!(directory.latest().is_none());
    ///
    /// directory.record(1, "127.0.0.1:5000".parse().unwrap()).block_on().unwrap();
    /// directory.record(2, "127.0.0.1:6000".parse().unwrap()).block_on().unwrap();
    /// directory.record(1, "127.0.0.1:7000".parse().unwrap()).block_on().unwrap();
    ///
    /// assert_eq!(directory.latest().unwrap().0, 1);
    /// ```
    pub fn latest(&self) -> Option<(u32, RoutingEntry)> {
        self.entries
            .iter()
            .max_by_key(|it| it.value().last_seen)
            .map(|it| (*it.key(), *it.value()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
