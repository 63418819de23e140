//! convoke — multi-party conferencing client media runtime.
//!
//! The crate is a pipeline of single-method nodes: raw captured frames
//! enter on one side, decoded frames leave on the other, RTP rides UDP
//! (or a framed-TCP / WebSocket fallback) in between, and a JSON command
//! protocol over WebSocket drives the whole thing.
//!
//! Every node implements [`transport::Sink`] and forwards to a
//! runtime-settable downstream sink, so chains compose like:
//!
//! ```text
//! microphone -> AudioEncoder -> Encryptor -> RtpSocket ~~~ network
//! network ~~~ RtpSocket -> Decryptor -> JitterBuffer -> AudioDecoder
//!          -> Resampler -> speaker
//! ```
//!
//! Capture and render devices are not part of this crate: they connect
//! through `Sink` callbacks owned by the application.

pub mod audio;
pub mod crypto;
pub mod jitter;
pub mod nettest;
pub mod proto;
pub mod session;
pub mod transport;
pub mod video;

pub use audio::{AudioDecoder, AudioEncoder, Resampler, SilenceDetector};
pub use crypto::{Decryptor, Encryptor};
pub use jitter::{JitterBuffer, JitterMode};
pub use proto::{Command, CommandKind};
pub use session::{Session, SessionEvent};
pub use transport::{Address, OwnedRtpPacket, PayloadType, RtpPacket, Sink};
pub use video::{FrameCollector, FrameSplitter, VideoDecoder, VideoEncoder};
