use bytes::{BufMut, BytesMut};

use super::Error;

/// Size of the fixed part of the RTP header.
pub const FIXED_HEADER_SIZE: usize = 12;

/// Largest packet the gateway will construct, header included.
pub const MAX_PACKET_SIZE: usize = 1500;

/// RTP protocol version carried in the two topmost bits of byte 0.
pub const VERSION: u8 = 2;

/// The RTP fixed header.
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |V=2|P|X|  CC   |M|     PT      |       sequence number         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                           timestamp                           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |           synchronization source (SSRC) identifier            |
/// +=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+
/// |            contributing source (CSRC) identifiers             |
/// |                             ....                              |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// The first twelve octets are present in every RTP packet, while the
/// list of CSRC identifiers is present only when inserted by a mixer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpHeader {
    pub version: u8,
    pub padding: bool,
    pub extension: bool,
    pub csrc_count: u8,
    pub marker: bool,
    pub payload_type: u8,
    pub sequence_number: u16,
    pub timestamp: u32,
    pub ssrc: u32,
}

/// A parsed view over one RTP packet.
///
/// The packet borrows the receive buffer, nothing is copied. A packet
/// is never mutated after construction; each direction of the gateway
/// builds a fresh one.
pub struct RtpPacket<'a> {
    pub header: RtpHeader,
    header_len: usize,
    bytes: &'a [u8],
}

impl<'a> RtpPacket<'a> {
    /// Parse an RTP packet from a received buffer.
    ///
    /// Fails with [`Error::Malformed`] when the buffer is shorter than
    /// the fixed header, when the CSRC list or the extension header
    /// claims more bytes than the buffer holds, or when the version
    /// field is not 2. Never reads past the buffer.
    ///
    /// # Test
    ///
    /// ```
    /// use quic_bridge_codec::rtp::RtpPacket;
    ///
    /// let buffer = [
    ///     0x80, 0x60, 0x00, 0x64, 0x00, 0x00, 0x00, 0xa0, 0x12, 0x34, 0x56,
    ///     0x78, 0x01, 0x02, 0x03, 0x04,
    /// ];
    ///
    /// let packet = RtpPacket::decode(&buffer).unwrap();
    ///
    /// assert_eq!(packet.header.version, 2);
    /// assert_eq!(packet.header.payload_type, 96);
    /// assert_eq!(packet.header.sequence_number, 100);
    /// assert_eq!(packet.header.timestamp, 160);
    /// assert_eq!(packet.header.ssrc, 0x12345678);
    /// assert_eq!(packet.header_len(), 12);
    /// assert_eq!(packet.payload(), &[0x01, 0x02, 0x03, 0x04]);
    ///
    /// assert!(RtpPacket::decode(&buffer[..11]).is_err());
    /// ```
    pub fn decode(bytes: &'a [u8]) -> Result<Self, Error> {
        if bytes.len() < FIXED_HEADER_SIZE {
            return Err(Error::Malformed);
        }

        if bytes[0] >> 6 != VERSION {
            return Err(Error::Malformed);
        }

        let header = RtpHeader {
            version: bytes[0] >> 6,
            padding: (bytes[0] >> 5) & 1 == 1,
            extension: (bytes[0] >> 4) & 1 == 1,
            csrc_count: bytes[0] & 0x0F,
            marker: bytes[1] >> 7 == 1,
            payload_type: bytes[1] & 0x7F,
            sequence_number: u16::from_be_bytes(bytes[2..4].try_into()?),
            timestamp: u32::from_be_bytes(bytes[4..8].try_into()?),
            ssrc: u32::from_be_bytes(bytes[8..12].try_into()?),
        };

        let mut header_len = FIXED_HEADER_SIZE + header.csrc_count as usize * 4;
        if header_len > bytes.len() {
            return Err(Error::Malformed);
        }

        // The extension, if present, starts with a four byte prologue
        // carrying a profile identifier and a length in 32-bit words.
        if header.extension {
            if bytes.len() < header_len + 4 {
                return Err(Error::Malformed);
            }

            let words =
                u16::from_be_bytes(bytes[header_len + 2..header_len + 4].try_into()?) as usize;

            header_len += 4 + words * 4;
            if header_len > bytes.len() {
                return Err(Error::Malformed);
            }
        }

        Ok(Self {
            header,
            header_len,
            bytes,
        })
    }

    /// Total number of header bytes, CSRC list and extension included.
    ///
    /// # Test
    ///
    /// ```
    /// use quic_bridge_codec::rtp::RtpPacket;
    ///
    /// // Two CSRC entries and a one word extension.
    /// let buffer = [
    ///     0x92, 0x60, 0x00, 0x64, 0x00, 0x00, 0x00, 0xa0, 0x12, 0x34, 0x56,
    ///     0x78, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x02, 0xbe, 0xde,
    ///     0x00, 0x01, 0x10, 0xff, 0x00, 0x00, 0xaa, 0xbb,
    /// ];
    ///
    /// let packet = RtpPacket::decode(&buffer).unwrap();
    ///
    /// assert_eq!(packet.header.csrc_count, 2);
    /// assert_eq!(packet.header_len(), 28);
    /// assert_eq!(packet.csrc().collect::<Vec<u32>>(), vec![1, 2]);
    /// assert_eq!(packet.extension(), Some((0xbede, &[0x10, 0xff, 0x00, 0x00][..])));
    /// assert_eq!(packet.payload(), &[0xaa, 0xbb]);
    ///
    /// // Same packet with the declared extension truncated.
    /// assert!(RtpPacket::decode(&buffer[..26]).is_err());
    /// ```
    pub fn header_len(&self) -> usize {
        self.header_len
    }

    /// The media payload following the header.
    pub fn payload(&self) -> &'a [u8] {
        &self.bytes[self.header_len..]
    }

    /// Contributing source identifiers.
    pub fn csrc(&self) -> impl Iterator<Item = u32> + 'a {
        self.bytes[FIXED_HEADER_SIZE..FIXED_HEADER_SIZE + self.header.csrc_count as usize * 4]
            .chunks_exact(4)
            .map(|it| u32::from_be_bytes(it.try_into().unwrap()))
    }

    /// The extension profile identifier and data words, if present.
    pub fn extension(&self) -> Option<(u16, &'a [u8])> {
        if !self.header.extension {
            return None;
        }

        let offset = FIXED_HEADER_SIZE + self.header.csrc_count as usize * 4;
        let profile = u16::from_be_bytes(self.bytes[offset..offset + 2].try_into().unwrap());

        Some((profile, &self.bytes[offset + 4..self.header_len]))
    }
}

/// Sequencing state for one synthesized RTP direction.
///
/// The counters advance on every [`DirectionState::encode`] call: the
/// sequence number by one, wrapping at 16 bits, the timestamp by the
/// configured media clock step. The SSRC is assigned once by the
/// gateway and is not taken from any received packet.
#[derive(Debug, Clone)]
pub struct DirectionState {
    pub sequence_number: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    pub payload_type: u8,
    pub timestamp_increment: u32,
}

impl DirectionState {
    pub fn new(ssrc: u32, payload_type: u8, timestamp_increment: u32) -> Self {
        Self {
            sequence_number: 0,
            timestamp: 0,
            ssrc,
            payload_type,
            timestamp_increment,
        }
    }

    /// Build a packet around `payload` and advance the counters.
    ///
    /// The produced packet has version 2, no padding, no extension, no
    /// CSRC list and the marker bit cleared. Fails with
    /// [`Error::PayloadTooLarge`] when the payload does not fit into
    /// [`MAX_PACKET_SIZE`] minus the fixed header; the counters are not
    /// advanced in that case.
    ///
    /// # Test
    ///
    /// ```
    /// use bytes::BytesMut;
    /// use quic_bridge_codec::rtp::{DirectionState, MAX_PACKET_SIZE};
    ///
    /// let mut state = DirectionState::new(0x12345678, 96, 160);
    /// let mut bytes = BytesMut::with_capacity(MAX_PACKET_SIZE);
    ///
    /// state.encode(&[0u8; 160], &mut bytes).unwrap();
    ///
    /// assert_eq!(bytes.len(), 172);
    /// assert_eq!(bytes[0], 0x80);
    /// assert_eq!(bytes[1], 0x60);
    /// assert_eq!(&bytes[2..4], &[0x00, 0x01]);
    /// assert_eq!(&bytes[4..8], &[0x00, 0x00, 0x00, 0xa0]);
    /// assert_eq!(&bytes[8..12], &[0x12, 0x34, 0x56, 0x78]);
    ///
    /// assert!(state.encode(&[0u8; MAX_PACKET_SIZE - 11], &mut bytes).is_err());
    /// assert!(state.encode(&[0u8; MAX_PACKET_SIZE - 12], &mut bytes).is_ok());
    /// ```
    pub fn encode(&mut self, payload: &[u8], bytes: &mut BytesMut) -> Result<(), Error> {
        if payload.len() > MAX_PACKET_SIZE - FIXED_HEADER_SIZE {
            return Err(Error::PayloadTooLarge);
        }

        self.sequence_number = self.sequence_number.wrapping_add(1);
        self.timestamp = self.timestamp.wrapping_add(self.timestamp_increment);

        bytes.clear();
        bytes.put_u8(VERSION << 6);
        bytes.put_u8(self.payload_type & 0x7F);
        bytes.put_u16(self.sequence_number);
        bytes.put_u32(self.timestamp);
        bytes.put_u32(self.ssrc);
        bytes.extend_from_slice(payload);

        Ok(())
    }
}
