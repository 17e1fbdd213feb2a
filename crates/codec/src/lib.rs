//! ## Real-time Transport Protocol (RTP)
//!
//! [RFC3550]: https://tools.ietf.org/html/rfc3550
//! [RFC3711]: https://tools.ietf.org/html/rfc3711
//!
//! RTP provides end-to-end network transport functions suitable for
//! applications transmitting real-time data, such as audio, video or
//! simulation data, over multicast or unicast network services.  RTP
//! does not address resource reservation and does not guarantee
//! quality-of-service for real-time services.  [RFC3550] defines RTP
//! itself; the Secure Real-time Transport Protocol [RFC3711] adds
//! per-packet confidentiality, message authentication and replay
//! protection on top of it.
//!
//! This crate contains only the packet layer: parsing and construction
//! of RTP packets and the SRTP protect/unprotect primitives. It
//! performs no I/O.

pub mod rtp;
pub mod srtp;

use std::array::TryFromSliceError;

#[derive(Debug)]
pub enum Error {
    /// The buffer does not contain a well-formed RTP packet.
    Malformed,
    /// The payload does not fit into a single RTP packet.
    PayloadTooLarge,
    /// The key material is not a 60 character hex string.
    InvalidKey,
    /// SRTP authentication or replay check failed.
    CryptoFailure,
    TryFromSliceError(TryFromSliceError),
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl From<TryFromSliceError> for Error {
    fn from(value: TryFromSliceError) -> Self {
        Self::TryFromSliceError(value)
    }
}
