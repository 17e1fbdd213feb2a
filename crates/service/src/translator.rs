use std::sync::Arc;

use bytes::BytesMut;
use codec::rtp::{DirectionState, MAX_PACKET_SIZE};
use parking_lot::{Mutex, RwLock};

use crate::directory::RoutingDirectory;

pub type PayloadHandler = Box<dyn Fn(&[u8]) + Send + Sync>;

/// SSRC stamping policy for synthesized reverse packets.
///
/// `Fixed` multiplexes all reverse traffic onto one gateway-assigned
/// synthetic stream. `Echo` stamps the SSRC of the most recently seen
/// inbound stream instead, so that reverse routing resolves to a live
/// origin through the directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum SsrcPolicy {
    #[default]
    Fixed,
    Echo,
}

pub struct TranslatorOptions {
    pub ssrc_policy: SsrcPolicy,
    pub ssrc: u32,
    pub payload_type: u8,
    pub timestamp_increment: u32,
}

impl Default for TranslatorOptions {
    fn default() -> Self {
        Self {
            ssrc_policy: SsrcPolicy::Fixed,
            ssrc: 0x12345678,
            payload_type: 96,
            timestamp_increment: 160,
        }
    }
}

struct Reverse {
    state: DirectionState,
    bytes: BytesMut,
}

/// The conversion point between the two transports.
///
/// The forward direction is stateless: payloads extracted from
/// received RTP packets pass through to the forward handler
/// unchanged. The reverse direction synthesizes well-formed RTP
/// around each received QUIC payload, with per-direction sequencing
/// state serialized behind a mutex.
///
/// Both directions drop with a log line while no handler is
/// registered yet, which only happens during startup ordering.
pub struct Translator {
    forward: RwLock<Option<PayloadHandler>>,
    reverse: RwLock<Option<PayloadHandler>>,
    state: Mutex<Reverse>,
    policy: SsrcPolicy,
    fixed_ssrc: u32,
    directory: Arc<RoutingDirectory>,
}

impl Translator {
    pub fn new(options: TranslatorOptions, directory: Arc<RoutingDirectory>) -> Self {
        Self {
            forward: RwLock::new(None),
            reverse: RwLock::new(None),
            state: Mutex::new(Reverse {
                state: DirectionState::new(
                    options.ssrc,
                    options.payload_type,
                    options.timestamp_increment,
                ),
                bytes: BytesMut::with_capacity(MAX_PACKET_SIZE),
            }),
            policy: options.ssrc_policy,
            fixed_ssrc: options.ssrc,
            directory,
        }
    }

    /// Register the forward payload handler, replacing any previous
    /// one.
    pub fn set_forward_handler<F>(&self, handler: F)
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        self.forward.write().replace(Box::new(handler));
    }

    /// Register the reverse payload handler, replacing any previous
    /// one.
    pub fn set_reverse_handler<F>(&self, handler: F)
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        self.reverse.write().replace(Box::new(handler));
    }

    /// Forward path: hand an RTP payload to the QUIC side unchanged.
    ///
    /// The payload has already been extracted from the RTP packet by
    /// the listener before it reaches the translator.
    pub fn translate_rtp_to_quic(&self, payload: &[u8]) {
        if let Some(handler) = self.forward.read().as_ref() {
            handler(payload);
        } else {
            log::warn!(
                "no forward handler registered, dropping payload: size={}",
                payload.len()
            );
        }
    }

    /// Reverse path: synthesize an RTP packet around a QUIC payload.
    ///
    /// Sequence number and timestamp advancement is strictly
    /// serialized, concurrent deliveries cannot interleave counter
    /// updates.
    ///
    /// # Test
    ///
    /// ```
    /// use std::sync::{Arc, Mutex};
    ///
    /// use quic_bridge_service::directory::RoutingDirectory;
    /// use quic_bridge_service::translator::{Translator, TranslatorOptions};
    ///
    /// let directory = Arc::new(RoutingDirectory::new(None));
    /// let translator = Translator::new(TranslatorOptions::default(), directory);
    ///
    /// let packets = Arc::new(Mutex::new(Vec::new()));
    ///
    /// let captured = packets.clone();
    /// translator.set_reverse_handler(move |bytes| {
    ///     captured.lock().unwrap().push(bytes.to_vec());
    /// });
    ///
    /// translator.translate_quic_to_rtp(&[0u8; 160]);
    ///
    /// let packets = packets.lock().unwrap();
    ///
    /// assert_eq!(packets[0].len(), 172);
    /// assert_eq!(packets[0][0], 0x80);
    /// assert_eq!(packets[0][1], 0x60);
    /// ```
    pub fn translate_quic_to_rtp(&self, payload: &[u8]) {
        let mut reverse = self.state.lock();

        if self.policy == SsrcPolicy::Echo {
            reverse.state.ssrc = match self.directory.latest() {
                Some((ssrc, _)) => ssrc,
                None => self.fixed_ssrc,
            };
        }

        let Reverse { state, bytes } = &mut *reverse;
        if let Err(e) = state.encode(payload, bytes) {
            log::warn!(
                "failed to synthesize reverse rtp packet: error={:?}, size={}",
                e,
                payload.len()
            );

            return;
        }

        if let Some(handler) = self.reverse.read().as_ref() {
            handler(bytes);
        } else {
            log::warn!(
                "no reverse handler registered, dropping payload: size={}",
                payload.len()
            );
        }
    }
}
