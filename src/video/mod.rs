//! Video pipeline nodes: VP8 codec, frame fragmentation over RTP and the
//! key-frame loss-recovery path.

mod collector;
mod decoder;
mod encoder;
mod splitter;

pub use collector::FrameCollector;
pub use decoder::VideoDecoder;
pub use encoder::{VideoEncoder, VideoEncoderConfig};
pub use splitter::{FrameSplitter, SPLIT_PACKET_SIZE};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum VideoError {
    #[error("invalid resolution {0}x{1}")]
    InvalidResolution(u16, u16),
    #[error("codec error: {0}")]
    Codec(String),
}

/// Reverse edge of the video graph: the decoder asks the encoder side for
/// a key frame after unrecoverable loss. The callback must stay valid
/// until the decoder's `stop()` returns.
pub trait KeyFrameRequester: Send + Sync {
    fn force_key_frame(&self, last_received_seq: u16);
}

/// Raster formats crossing the capture/render boundary. Carried as a bare
/// integer in device signalling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(from = "i32", into = "i32")]
pub enum ColorSpace {
    #[default]
    Undefined = 0,
    I420 = 1,
    Rgb32 = 2,
}

impl From<i32> for ColorSpace {
    fn from(value: i32) -> Self {
        match value {
            1 => Self::I420,
            2 => Self::Rgb32,
            _ => Self::Undefined,
        }
    }
}

impl From<ColorSpace> for i32 {
    fn from(value: ColorSpace) -> i32 {
        value as i32
    }
}

/// Frame size packed into a single u32 the way the wire carries it:
/// width in the low half, height in the high half.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub width: u16,
    pub height: u16,
}

impl Resolution {
    pub const QVGA: Self = Self::new(320, 240);
    pub const CIF: Self = Self::new(352, 288);
    pub const VGA: Self = Self::new(640, 480);
    pub const CIF4: Self = Self::new(704, 576);
    pub const HD: Self = Self::new(1280, 720);
    pub const FULL_HD: Self = Self::new(1920, 1080);
    pub const UHD_4K: Self = Self::new(3840, 2160);

    pub const fn new(width: u16, height: u16) -> Self {
        Self { width, height }
    }

    pub fn from_code(code: u32) -> Self {
        Self {
            width: (code & 0xffff) as u16,
            height: (code >> 16) as u16,
        }
    }

    pub fn code(self) -> u32 {
        self.width as u32 | ((self.height as u32) << 16)
    }
}
