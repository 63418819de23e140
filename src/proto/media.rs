//! The `media` command: one RTP packet tunnelled through the signalling
//! WebSocket when UDP and TCP media paths are unreachable.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Media {
    pub src_port: u16,
    pub dst_port: u16,
    /// Full RTP packet, header included, base64 encoded.
    pub rtp: String,
}

impl Media {
    pub fn wrap(src_port: u16, dst_port: u16, rtp: &[u8]) -> Self {
        Self {
            src_port,
            dst_port,
            rtp: BASE64.encode(rtp),
        }
    }

    pub fn decode_rtp(&self) -> Option<Vec<u8>> {
        BASE64.decode(&self.rtp).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_and_unwraps_rtp_bytes() {
        let media = Media::wrap(30002, 5000, &[0x80, 0x6f, 1, 2, 3]);
        assert_eq!(media.src_port, 30002);
        assert_eq!(media.dst_port, 5000);
        assert_eq!(media.decode_rtp().unwrap(), vec![0x80, 0x6f, 1, 2, 3]);
    }

    #[test]
    fn bad_base64_yields_none() {
        let media = Media {
            src_port: 1,
            dst_port: 2,
            rtp: "not base64!!!".into(),
        };
        assert!(media.decode_rtp().is_none());
    }
}
