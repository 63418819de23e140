//! RTP packet model (RFC 3550, version 2) and the wire classifier.

use bytes::{Buf, BufMut};
use thiserror::Error;

/// Fixed part of the RTP header.
pub const RTP_HEADER_SIZE: usize = 12;

/// RTP protocol version emitted and accepted by this stack.
pub const RTP_VERSION: u8 = 2;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PacketError {
    #[error("malformed RTP header")]
    MalformedHeader,
}

/// Payload types used on the wire. The set is closed: the payload type
/// byte doubles as the stream discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PayloadType {
    Undefined = 0,
    Pcm = 8,
    Vp8 = 96,
    Opus = 111,
    Text = 120,
    Data = 122,
}

impl PayloadType {
    pub fn from_u8(value: u8) -> Self {
        match value {
            8 => Self::Pcm,
            96 => Self::Vp8,
            111 => Self::Opus,
            120 => Self::Text,
            122 => Self::Data,
            _ => Self::Undefined,
        }
    }
}

/// Coarse classification of an inbound datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    Undefined,
    Rtp,
    Rtcp,
}

impl PacketKind {
    /// Reads byte 1, masks the marker bit and treats the datagram as RTP
    /// only when the remaining 7 bits name one of our media payload types.
    pub fn classify(data: &[u8]) -> Self {
        if data.len() < 2 {
            return Self::Undefined;
        }

        let marker = data[1] & 0x80 != 0;
        let pt = data[1] & 0x7f;

        if !marker
            && matches!(
                PayloadType::from_u8(pt),
                PayloadType::Vp8 | PayloadType::Opus | PayloadType::Data
            )
        {
            return Self::Rtp;
        }

        Self::Rtcp
    }
}

/// RTP packet header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpHeader {
    pub version: u8,
    pub padding: bool,
    pub extension: bool,
    pub marker: bool,
    pub payload_type: u8,
    pub sequence: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    pub csrc: Vec<u32>,
    pub extension_profile: u16,
    pub extension_words: Vec<u32>,
}

impl Default for RtpHeader {
    fn default() -> Self {
        Self {
            version: RTP_VERSION,
            padding: false,
            extension: false,
            marker: false,
            payload_type: PayloadType::Vp8 as u8,
            sequence: 0,
            timestamp: 0,
            ssrc: 0,
            csrc: Vec::new(),
            extension_profile: 0,
            extension_words: Vec::new(),
        }
    }
}

impl RtpHeader {
    /// Serialized size of the header including CSRC list and extension.
    pub fn wire_size(&self) -> usize {
        RTP_HEADER_SIZE
            + self.csrc.len() * 4
            + if self.extension {
                4 + self.extension_words.len() * 4
            } else {
                0
            }
    }
}

/// RTP packet borrowing its payload from the input buffer or an owning
/// packet. All 32-bit fields are network byte order on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpPacket<'a> {
    pub header: RtpHeader,
    pub payload: &'a [u8],
}

impl<'a> RtpPacket<'a> {
    pub fn new(header: RtpHeader, payload: &'a [u8]) -> Self {
        Self { header, payload }
    }

    pub fn serialize(&self) -> Vec<u8> {
        let h = &self.header;
        let mut out = Vec::with_capacity(h.wire_size() + self.payload.len());

        out.put_u8(
            (h.version << 6)
                | (u8::from(h.padding) << 5)
                | (u8::from(h.extension) << 4)
                | (h.csrc.len() as u8 & 0x0f),
        );
        out.put_u8((u8::from(h.marker) << 7) | (h.payload_type & 0x7f));
        out.put_u16(h.sequence);
        out.put_u32(h.timestamp);
        out.put_u32(h.ssrc);

        for csrc in &h.csrc {
            out.put_u32(*csrc);
        }

        if h.extension {
            out.put_u16(h.extension_profile);
            out.put_u16(h.extension_words.len() as u16);
            for word in &h.extension_words {
                out.put_u32(*word);
            }
        }

        out.extend_from_slice(self.payload);
        out
    }

    pub fn parse(data: &'a [u8]) -> Result<Self, PacketError> {
        if data.len() < RTP_HEADER_SIZE {
            return Err(PacketError::MalformedHeader);
        }

        let mut buf = data;

        let b0 = buf.get_u8();
        let version = b0 >> 6;
        if version != RTP_VERSION {
            return Err(PacketError::MalformedHeader);
        }
        let padding = b0 & 0x20 != 0;
        let extension = b0 & 0x10 != 0;
        let csrc_count = (b0 & 0x0f) as usize;

        let b1 = buf.get_u8();
        let marker = b1 & 0x80 != 0;
        let payload_type = b1 & 0x7f;

        let sequence = buf.get_u16();
        let timestamp = buf.get_u32();
        let ssrc = buf.get_u32();

        if buf.remaining() < csrc_count * 4 {
            return Err(PacketError::MalformedHeader);
        }
        let mut csrc = Vec::with_capacity(csrc_count);
        for _ in 0..csrc_count {
            csrc.push(buf.get_u32());
        }

        let mut extension_profile = 0;
        let mut extension_words = Vec::new();
        if extension {
            if buf.remaining() < 4 {
                return Err(PacketError::MalformedHeader);
            }
            extension_profile = buf.get_u16();
            let words = buf.get_u16() as usize;
            if buf.remaining() < words * 4 {
                return Err(PacketError::MalformedHeader);
            }
            extension_words.reserve(words);
            for _ in 0..words {
                extension_words.push(buf.get_u32());
            }
        }

        Ok(Self {
            header: RtpHeader {
                version,
                padding,
                extension,
                marker,
                payload_type,
                sequence,
                timestamp,
                ssrc,
                csrc,
                extension_profile,
                extension_words,
            },
            payload: buf,
        })
    }
}

/// RTP packet owning its payload bytes. Created at ingress (socket or
/// encoder), moved through at most one chain and destroyed at the sink;
/// deliberately not `Clone`.
#[derive(Debug)]
pub struct OwnedRtpPacket {
    pub header: RtpHeader,
    pub payload: Vec<u8>,
    /// Wall-clock worth of media carried by the payload.
    pub payload_ms: u16,
    pub payload_type: PayloadType,
}

impl OwnedRtpPacket {
    pub fn new(header: RtpHeader, payload: &[u8], payload_type: PayloadType) -> Self {
        Self {
            header,
            payload: payload.to_vec(),
            payload_ms: if payload_type == PayloadType::Vp8 { 40 } else { 20 },
            payload_type,
        }
    }

    /// Empty packet, used by the jitter buffer to stand in for a lost
    /// audio frame so the decoder can conceal it.
    pub fn empty(header: RtpHeader, payload_type: PayloadType) -> Self {
        Self::new(header, &[], payload_type)
    }

    /// Borrowed view for forwarding through a chain.
    pub fn packet(&self) -> RtpPacket<'_> {
        RtpPacket::new(self.header.clone(), &self.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> RtpHeader {
        RtpHeader {
            marker: true,
            payload_type: PayloadType::Opus as u8,
            sequence: 4242,
            timestamp: 960_000,
            ssrc: 0xdead_beef,
            ..Default::default()
        }
    }

    #[test]
    fn roundtrip_plain() {
        let packet = RtpPacket::new(sample_header(), b"opus payload");
        let wire = packet.serialize();

        let parsed = RtpPacket::parse(&wire).unwrap();
        assert_eq!(parsed, packet);
        assert_eq!(parsed.serialize(), wire);
    }

    #[test]
    fn roundtrip_with_csrc_and_extension() {
        let mut header = sample_header();
        header.csrc = vec![1, 2, 3];
        header.extension = true;
        header.extension_profile = 0xbede;
        header.extension_words = vec![0x11223344, 0x55667788];

        let packet = RtpPacket::new(header, &[9, 8, 7]);
        let wire = packet.serialize();

        let parsed = RtpPacket::parse(&wire).unwrap();
        assert_eq!(parsed, packet);
    }

    #[test]
    fn parse_rejects_short_input() {
        assert_eq!(RtpPacket::parse(&[0x80; 11]), Err(PacketError::MalformedHeader));
    }

    #[test]
    fn parse_rejects_wrong_version() {
        let mut wire = RtpPacket::new(sample_header(), b"x").serialize();
        wire[0] = 0x40; // version 1
        assert_eq!(RtpPacket::parse(&wire), Err(PacketError::MalformedHeader));
    }

    #[test]
    fn parse_rejects_truncated_csrc() {
        let mut header = sample_header();
        header.csrc = vec![7; 4];
        let wire = RtpPacket::new(header, &[]).serialize();

        assert_eq!(
            RtpPacket::parse(&wire[..RTP_HEADER_SIZE + 4]),
            Err(PacketError::MalformedHeader)
        );
    }

    #[test]
    fn classify_media_payload_types() {
        let mut header = RtpHeader {
            payload_type: PayloadType::Opus as u8,
            ..Default::default()
        };
        let wire = RtpPacket::new(header.clone(), &[]).serialize();
        assert_eq!(PacketKind::classify(&wire), PacketKind::Rtp);

        // Marker bit set is treated as RTCP territory.
        header.marker = true;
        let wire = RtpPacket::new(header.clone(), &[]).serialize();
        assert_eq!(PacketKind::classify(&wire), PacketKind::Rtcp);

        header.marker = false;
        header.payload_type = 73; // unknown
        let wire = RtpPacket::new(header, &[]).serialize();
        assert_eq!(PacketKind::classify(&wire), PacketKind::Rtcp);

        assert_eq!(PacketKind::classify(&[0x80]), PacketKind::Undefined);
    }

    #[test]
    fn owned_packet_media_duration() {
        let audio = OwnedRtpPacket::new(RtpHeader::default(), &[0; 80], PayloadType::Opus);
        assert_eq!(audio.payload_ms, 20);

        let video = OwnedRtpPacket::new(RtpHeader::default(), &[0; 80], PayloadType::Vp8);
        assert_eq!(video.payload_ms, 40);
    }
}
