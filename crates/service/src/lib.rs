//! ## Gateway session services
//!
//! The pieces of the gateway that sit between the packet codec and the
//! network adapters: the routing directory, which remembers where each
//! media stream came from, and the translator, which converts between
//! RTP payloads and the opaque byte payloads carried over QUIC.
//!
//! Everything in this crate is safe to call from whichever threads the
//! I/O reactor uses; the owning process decides how the pieces are
//! wired together.

pub mod directory;
pub mod translator;

use async_trait::async_trait;

/// The backing store of the key-value collaborator failed.
#[derive(Debug)]
pub struct KvError(pub String);

impl std::error::Error for KvError {}

impl std::fmt::Display for KvError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A generic string key-value collaborator.
///
/// Backs the routing directory's optional cross-process persistence
/// of the stream to endpoint mapping. No transactional or expiry
/// semantics are required of an implementation; failures are treated
/// by callers as a dropped or delayed packet, never as fatal.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn set(&self, key: &str, value: &str) -> Result<(), KvError>;
    async fn get(&self, key: &str) -> Result<Option<String>, KvError>;
}
