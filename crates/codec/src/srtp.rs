use std::collections::HashMap;

use aes::cipher::{KeyIvInit, StreamCipher};
use hmac::{Hmac, Mac};
use sha1::Sha1;
use zeroize::Zeroizing;

use super::{
    Error,
    rtp::{FIXED_HEADER_SIZE, RtpPacket},
};

type Aes128Ctr = ctr::Ctr128BE<aes::Aes128>;
type HmacSha1 = Hmac<Sha1>;

/// HMAC-SHA1-80 authentication tag size (80 bits).
pub const AUTH_TAG_SIZE: usize = 10;

/// Master key (16 bytes) plus master salt (14 bytes).
pub const KEY_MATERIAL_SIZE: usize = 30;

const MASTER_KEY_SIZE: usize = 16;
const MASTER_SALT_SIZE: usize = 14;
const RTCP_HEADER_SIZE: usize = 8;
const REPLAY_WINDOW: u64 = 64;

// RFC 3711 section 4.3.1 key derivation labels.
const LABEL_RTP_CIPHER: u8 = 0x00;
const LABEL_RTP_AUTH: u8 = 0x01;
const LABEL_RTP_SALT: u8 = 0x02;
const LABEL_RTCP_CIPHER: u8 = 0x03;
const LABEL_RTCP_AUTH: u8 = 0x04;
const LABEL_RTCP_SALT: u8 = 0x05;

/// Session keys derived from the master secret for one direction of
/// one protocol (RTP or RTCP). Zeroed when the session is dropped.
struct SessionKeys {
    cipher: Zeroizing<[u8; MASTER_KEY_SIZE]>,
    auth: Zeroizing<[u8; 20]>,
    salt: Zeroizing<[u8; MASTER_SALT_SIZE]>,
}

impl SessionKeys {
    fn derive(master_key: &[u8; MASTER_KEY_SIZE], master_salt: &[u8; MASTER_SALT_SIZE], labels: [u8; 3]) -> Self {
        Self {
            cipher: prf(master_key, master_salt, labels[0]),
            auth: prf(master_key, master_salt, labels[1]),
            salt: prf(master_key, master_salt, labels[2]),
        }
    }
}

/// AES-CM key derivation PRF (RFC 3711 section 4.3.1) with a zero key
/// derivation rate: the keystream over a zero block with the label
/// folded into byte 7 of the salt.
fn prf<const N: usize>(
    master_key: &[u8; MASTER_KEY_SIZE],
    master_salt: &[u8; MASTER_SALT_SIZE],
    label: u8,
) -> Zeroizing<[u8; N]> {
    let mut iv = [0u8; 16];
    iv[..MASTER_SALT_SIZE].copy_from_slice(master_salt);
    iv[7] ^= label;

    let mut output = Zeroizing::new([0u8; N]);
    Aes128Ctr::new(master_key.into(), (&iv).into()).apply_keystream(&mut *output);
    output
}

/// Replay and rollover tracking for one inbound stream.
///
/// The packet index is the 48-bit `ROC || SEQ` value from RFC 3711
/// section 3.3.1; a sliding bitmask window over the most recent
/// indices rejects late duplicates.
#[derive(Default)]
struct StreamState {
    highest: u64,
    window: u64,
    primed: bool,
}

impl StreamState {
    /// Guess the full packet index for a received sequence number,
    /// accounting for 16-bit wrap in either direction.
    fn estimate_index(&self, seq: u16) -> u64 {
        if !self.primed {
            return seq as u64;
        }

        let roc = (self.highest >> 16) as u32;
        let diff = seq as i32 - (self.highest & 0xFFFF) as i32;
        let roc = if diff < -0x7FFF {
            roc.wrapping_add(1)
        } else if diff > 0x7FFF {
            roc.checked_sub(1).unwrap_or(0)
        } else {
            roc
        };

        (roc as u64) << 16 | seq as u64
    }

    fn replayed(&self, index: u64) -> bool {
        if !self.primed || index > self.highest {
            return false;
        }

        let delta = self.highest - index;
        delta >= REPLAY_WINDOW || self.window >> delta & 1 == 1
    }

    fn update(&mut self, index: u64) {
        if !self.primed {
            self.primed = true;
            self.highest = index;
            self.window = 1;
        } else if index > self.highest {
            let shift = index - self.highest;
            self.window = if shift >= REPLAY_WINDOW {
                1
            } else {
                self.window << shift | 1
            };

            self.highest = index;
        } else {
            self.window |= 1 << (self.highest - index);
        }
    }
}

/// One SRTP cryptographic session (AES-CM-128 / HMAC-SHA1-80).
///
/// A session is bound to a single master secret for its whole
/// lifetime and accepts any inbound SSRC, creating per-stream replay
/// state on first sight. Key material lives in [`Zeroizing`] buffers
/// and is wiped when the owning listener drops the session.
pub struct SrtpSession {
    rtp: SessionKeys,
    rtcp: SessionKeys,
    inbound: HashMap<u32, StreamState>,
    outbound: HashMap<u32, u32>,
    rtcp_inbound: HashMap<u32, StreamState>,
    rtcp_outbound: HashMap<u32, u32>,
}

impl SrtpSession {
    /// Create a session from hex encoded key material.
    ///
    /// The key must be exactly 60 hex characters, decoding to the 30
    /// byte master key plus master salt of the AES-CM-128 /
    /// HMAC-SHA1-80 suite. Anything else fails with
    /// [`Error::InvalidKey`] and no session is constructed.
    ///
    /// # Test
    ///
    /// ```
    /// use quic_bridge_codec::srtp::SrtpSession;
    ///
    /// let key = "0123456789abcdef0123456789abcdef0123456789abcdef012345678901";
    ///
    /// assert!(SrtpSession::open(key).is_ok());
    /// assert!(SrtpSession::open(&key[..59]).is_err());
    /// assert!(SrtpSession::open(&format!("{}ab", key)).is_err());
    /// assert!(SrtpSession::open(&key.replace('0', "x")).is_err());
    /// ```
    pub fn open(key_hex: &str) -> Result<Self, Error> {
        if key_hex.len() != 2 * KEY_MATERIAL_SIZE {
            return Err(Error::InvalidKey);
        }

        let material = Zeroizing::new(hex::decode(key_hex).map_err(|_| Error::InvalidKey)?);

        let mut master_key = Zeroizing::new([0u8; MASTER_KEY_SIZE]);
        let mut master_salt = Zeroizing::new([0u8; MASTER_SALT_SIZE]);
        master_key.copy_from_slice(&material[..MASTER_KEY_SIZE]);
        master_salt.copy_from_slice(&material[MASTER_KEY_SIZE..]);

        Ok(Self {
            rtp: SessionKeys::derive(
                &master_key,
                &master_salt,
                [LABEL_RTP_CIPHER, LABEL_RTP_AUTH, LABEL_RTP_SALT],
            ),
            rtcp: SessionKeys::derive(
                &master_key,
                &master_salt,
                [LABEL_RTCP_CIPHER, LABEL_RTCP_AUTH, LABEL_RTCP_SALT],
            ),
            inbound: HashMap::new(),
            outbound: HashMap::new(),
            rtcp_inbound: HashMap::new(),
            rtcp_outbound: HashMap::new(),
        })
    }

    /// Encrypt and authenticate an RTP packet.
    ///
    /// This is the peer side of [`SrtpSession::unprotect`]: header in
    /// the clear, payload run through the AES-CM keystream, a 10 byte
    /// tag over packet and rollover counter appended.
    ///
    /// # Test
    ///
    /// ```
    /// use quic_bridge_codec::srtp::SrtpSession;
    ///
    /// let key = "0123456789abcdef0123456789abcdef0123456789abcdef012345678901";
    /// let packet = [
    ///     0x80u8, 0x60, 0x00, 0x64, 0x00, 0x00, 0x00, 0xa0, 0x12, 0x34, 0x56,
    ///     0x78, 0x01, 0x02, 0x03, 0x04,
    /// ];
    ///
    /// let mut sender = SrtpSession::open(key).unwrap();
    /// let mut receiver = SrtpSession::open(key).unwrap();
    ///
    /// let mut protected = sender.protect(&packet).unwrap();
    ///
    /// assert_eq!(protected.len(), packet.len() + 10);
    /// assert_ne!(&protected[12..16], &packet[12..16]);
    ///
    /// let len = receiver.unprotect(&mut protected).unwrap();
    ///
    /// assert_eq!(&protected[..len], &packet[..]);
    /// ```
    pub fn protect(&mut self, packet: &[u8]) -> Result<Vec<u8>, Error> {
        let view = RtpPacket::decode(packet)?;
        let header_len = view.header_len();
        let seq = view.header.sequence_number;
        let ssrc = view.header.ssrc;

        let roc = *self.outbound.entry(ssrc).or_insert(0);
        let index = (roc as u64) << 16 | seq as u64;

        let mut out = Vec::with_capacity(packet.len() + AUTH_TAG_SIZE);
        out.extend_from_slice(packet);

        let iv = build_iv(&self.rtp.salt, ssrc, index);
        Aes128Ctr::new((&*self.rtp.cipher).into(), (&iv).into())
            .apply_keystream(&mut out[header_len..]);

        let mut mac = HmacSha1::new_from_slice(&*self.rtp.auth).map_err(|_| Error::CryptoFailure)?;
        mac.update(&out);
        mac.update(&roc.to_be_bytes());
        out.extend_from_slice(&mac.finalize().into_bytes()[..AUTH_TAG_SIZE]);

        if seq == u16::MAX {
            if let Some(it) = self.outbound.get_mut(&ssrc) {
                *it = it.wrapping_add(1);
            }
        }

        Ok(out)
    }

    /// Authenticate and decrypt an SRTP packet in place.
    ///
    /// Returns the plaintext length, which is the input length minus
    /// the authentication tag. Fails with [`Error::CryptoFailure`] on
    /// a tag mismatch or a replayed packet; the caller is expected to
    /// drop the packet and keep receiving.
    ///
    /// # Test
    ///
    /// ```
    /// use quic_bridge_codec::srtp::SrtpSession;
    ///
    /// let key = "0123456789abcdef0123456789abcdef0123456789abcdef012345678901";
    /// let packet = [
    ///     0x80u8, 0x60, 0x00, 0x64, 0x00, 0x00, 0x00, 0xa0, 0x12, 0x34, 0x56,
    ///     0x78, 0x01, 0x02, 0x03, 0x04,
    /// ];
    ///
    /// let mut sender = SrtpSession::open(key).unwrap();
    /// let mut receiver = SrtpSession::open(key).unwrap();
    ///
    /// let protected = sender.protect(&packet).unwrap();
    ///
    /// // A bit flip in the payload fails authentication.
    /// {
    ///     let mut tampered = protected.clone();
    ///     tampered[13] ^= 1;
    ///     assert!(receiver.unprotect(&mut tampered).is_err());
    /// }
    ///
    /// assert!(receiver.unprotect(&mut protected.clone()).is_ok());
    ///
    /// // The same packet again is a replay.
    /// assert!(receiver.unprotect(&mut protected.clone()).is_err());
    /// ```
    pub fn unprotect(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        if buf.len() < FIXED_HEADER_SIZE + AUTH_TAG_SIZE {
            return Err(Error::CryptoFailure);
        }

        let tag_offset = buf.len() - AUTH_TAG_SIZE;
        let seq = u16::from_be_bytes(buf[2..4].try_into()?);
        let ssrc = u32::from_be_bytes(buf[8..12].try_into()?);

        // Any inbound SSRC is accepted, tracking state is created on
        // first sight of a stream.
        let index = {
            let stream = self.inbound.entry(ssrc).or_default();
            let index = stream.estimate_index(seq);
            if stream.replayed(index) {
                return Err(Error::CryptoFailure);
            }

            index
        };

        let mut mac = HmacSha1::new_from_slice(&*self.rtp.auth).map_err(|_| Error::CryptoFailure)?;
        mac.update(&buf[..tag_offset]);
        mac.update(&((index >> 16) as u32).to_be_bytes());
        mac.verify_truncated_left(&buf[tag_offset..])
            .map_err(|_| Error::CryptoFailure)?;

        // Only bytes after the full header (CSRC list and extension
        // included) are encrypted.
        let header_len = RtpPacket::decode(&buf[..tag_offset])
            .map_err(|_| Error::CryptoFailure)?
            .header_len();

        if let Some(stream) = self.inbound.get_mut(&ssrc) {
            stream.update(index);
        }

        let iv = build_iv(&self.rtp.salt, ssrc, index);
        Aes128Ctr::new((&*self.rtp.cipher).into(), (&iv).into())
            .apply_keystream(&mut buf[header_len..tag_offset]);

        Ok(tag_offset)
    }

    /// Encrypt and authenticate an RTCP packet (RFC 3711 section 3.4).
    ///
    /// Output layout is `header || encrypted payload || E+index ||
    /// tag`; the E bit is always set since the suite encrypts.
    ///
    /// # Test
    ///
    /// ```
    /// use quic_bridge_codec::srtp::SrtpSession;
    ///
    /// let key = "0123456789abcdef0123456789abcdef0123456789abcdef012345678901";
    /// // A minimal receiver report.
    /// let packet = [
    ///     0x80u8, 0xc9, 0x00, 0x01, 0x12, 0x34, 0x56, 0x78, 0xde, 0xad, 0xbe,
    ///     0xef,
    /// ];
    ///
    /// let mut sender = SrtpSession::open(key).unwrap();
    /// let mut receiver = SrtpSession::open(key).unwrap();
    ///
    /// let mut protected = sender.protect_rtcp(&packet).unwrap();
    ///
    /// assert_eq!(protected.len(), packet.len() + 14);
    ///
    /// let len = receiver.unprotect_rtcp(&mut protected).unwrap();
    ///
    /// assert_eq!(&protected[..len], &packet[..]);
    /// ```
    pub fn protect_rtcp(&mut self, packet: &[u8]) -> Result<Vec<u8>, Error> {
        if packet.len() < RTCP_HEADER_SIZE {
            return Err(Error::Malformed);
        }

        let ssrc = u32::from_be_bytes(packet[4..8].try_into()?);
        let counter = self.rtcp_outbound.entry(ssrc).or_insert(0);
        let index = *counter;
        *counter = (*counter + 1) & 0x7FFF_FFFF;

        let mut out = Vec::with_capacity(packet.len() + 4 + AUTH_TAG_SIZE);
        out.extend_from_slice(packet);

        let iv = build_rtcp_iv(&self.rtcp.salt, ssrc, index);
        Aes128Ctr::new((&*self.rtcp.cipher).into(), (&iv).into())
            .apply_keystream(&mut out[RTCP_HEADER_SIZE..]);

        out.extend_from_slice(&(0x8000_0000 | index).to_be_bytes());

        let mut mac = HmacSha1::new_from_slice(&*self.rtcp.auth).map_err(|_| Error::CryptoFailure)?;
        mac.update(&out);
        out.extend_from_slice(&mac.finalize().into_bytes()[..AUTH_TAG_SIZE]);

        Ok(out)
    }

    /// Authenticate and decrypt an SRTCP packet in place, returning
    /// the plaintext length (index field and tag stripped).
    pub fn unprotect_rtcp(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        if buf.len() < RTCP_HEADER_SIZE + 4 + AUTH_TAG_SIZE {
            return Err(Error::CryptoFailure);
        }

        let tag_offset = buf.len() - AUTH_TAG_SIZE;
        let index_offset = tag_offset - 4;

        let ssrc = u32::from_be_bytes(buf[4..8].try_into()?);
        let e_index = u32::from_be_bytes(buf[index_offset..tag_offset].try_into()?);
        let index = e_index & 0x7FFF_FFFF;

        {
            let stream = self.rtcp_inbound.entry(ssrc).or_default();
            if stream.replayed(index as u64) {
                return Err(Error::CryptoFailure);
            }
        }

        let mut mac = HmacSha1::new_from_slice(&*self.rtcp.auth).map_err(|_| Error::CryptoFailure)?;
        mac.update(&buf[..tag_offset]);
        mac.verify_truncated_left(&buf[tag_offset..])
            .map_err(|_| Error::CryptoFailure)?;

        if let Some(stream) = self.rtcp_inbound.get_mut(&ssrc) {
            stream.update(index as u64);
        }

        if e_index >> 31 == 1 {
            let iv = build_rtcp_iv(&self.rtcp.salt, ssrc, index);
            Aes128Ctr::new((&*self.rtcp.cipher).into(), (&iv).into())
                .apply_keystream(&mut buf[RTCP_HEADER_SIZE..index_offset]);
        }

        Ok(index_offset)
    }
}

/// AES-CM IV for SRTP (RFC 3711 section 4.1.1): the session salt XOR
/// `SSRC || packet index`, left aligned, two zero counter bytes.
fn build_iv(salt: &[u8; MASTER_SALT_SIZE], ssrc: u32, index: u64) -> [u8; 16] {
    let mut iv = [0u8; 16];
    iv[4..8].copy_from_slice(&ssrc.to_be_bytes());
    iv[8..12].copy_from_slice(&((index >> 16) as u32).to_be_bytes());
    iv[12..14].copy_from_slice(&(index as u16).to_be_bytes());

    for i in 0..MASTER_SALT_SIZE {
        iv[i] ^= salt[i];
    }

    iv
}

/// AES-CM IV for SRTCP: as above with the 31-bit SRTCP index.
fn build_rtcp_iv(salt: &[u8; MASTER_SALT_SIZE], ssrc: u32, index: u32) -> [u8; 16] {
    let mut iv = [0u8; 16];
    iv[4..8].copy_from_slice(&ssrc.to_be_bytes());
    iv[10..14].copy_from_slice(&index.to_be_bytes());

    for i in 0..MASTER_SALT_SIZE {
        iv[i] ^= salt[i];
    }

    iv
}
