//! Session glue: brings per-call media chains up and down, hands out
//! ports and SSRCs, and drives the signalling connection.
//!
//! Chain wiring follows the fixed pipeline shapes; teardown always stops
//! sources before sinks so no node ever sends into a stopped neighbour.
//!
//! ```text
//! audio out: capture -> AudioEncoder -> Encryptor -> RtpSocket
//! audio in : RtpSocket -> Decryptor -> JitterBuffer =pump=> AudioDecoder
//!            -> Resampler -> renderer sink (+ SilenceDetector tee)
//! video out: capture -> VideoEncoder -> FrameSplitter -> Encryptor -> RtpSocket
//! video in : RtpSocket -> Decryptor -> JitterBuffer =pump=> FrameCollector
//!            -> VideoDecoder -> renderer sink
//! ```

mod signaling;

pub use signaling::{SignalEvent, SignalHandler, SignalingClient, SignalingError};

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

use crate::audio::{
    AudioDecoder, AudioEncoder, AudioError, EncoderConfig, Resampler, SilenceCallback,
    SilenceDetector, SAMPLE_RATE,
};
use crate::crypto::{CryptoError, Decryptor, Encryptor};
use crate::jitter::{JitterBuffer, JitterMode};
use crate::proto::{Command, ConnectRequest, ConnectResponse, ConnectResult, Grants};
use crate::transport::{
    Address, PortPool, RtpSocket, SharedSink, Sink, TransportError,
};
use crate::video::{
    FrameCollector, FrameSplitter, VideoDecoder, VideoEncoder, VideoEncoderConfig, VideoError,
};

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("media port range exhausted")]
    PortsExhausted,
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Audio(#[from] AudioError),
    #[error(transparent)]
    Video(#[from] VideoError),
    #[error(transparent)]
    Signaling(#[from] SignalingError),
}

/// What the session surfaces to the embedding application.
#[derive(Debug)]
pub enum SessionEvent {
    /// Successful `connect_response`; credentials are stored internally.
    Connected(ConnectResponse),
    /// Server refused the connection.
    Rejected(ConnectResponse),
    /// Control channel went silent past the lost timeout.
    ConnectionLost,
    /// Control channel closed.
    Closed,
    /// Any other inbound command, for the application to act on.
    Command(Command),
}

pub type SessionCallback = dyn Fn(SessionEvent) + Send + Sync;

trait Chain: Send + Sync {
    fn stop(&self);
    fn port(&self) -> u16;
}

/// Outgoing audio: capture sink -> Opus -> crypto -> UDP.
pub struct AudioSendChain {
    encoder: Arc<AudioEncoder>,
    encryptor: Arc<Encryptor>,
    socket: Arc<RtpSocket>,
    ssrc: u32,
    port: u16,
}

impl AudioSendChain {
    fn build(
        ports: &PortPool,
        ssrc: u32,
        destination: Address,
        secure_key: Option<&str>,
    ) -> Result<Self, SessionError> {
        let port = ports.take().ok_or(SessionError::PortsExhausted)?;

        let socket = Arc::new(RtpSocket::new());
        let encryptor = Arc::new(Encryptor::new());
        let encoder = Arc::new(AudioEncoder::new());

        encoder.set_receiver(Some(encryptor.clone() as SharedSink));
        encryptor.set_receiver(Some(socket.clone() as SharedSink));

        socket.start(port)?;
        socket.set_default_address(destination);
        if let Some(key) = secure_key {
            encryptor.start(key)?;
        }
        encoder.start(EncoderConfig::voice(ssrc))?;

        Ok(Self {
            encoder,
            encryptor,
            socket,
            ssrc,
            port,
        })
    }

    /// Where the capture device pushes 20-ms PCM frames.
    pub fn input(&self) -> SharedSink {
        self.encoder.clone()
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    pub fn local_port(&self) -> u16 {
        self.port
    }

    pub fn set_bitrate(&self, bitrate: i32) {
        self.encoder.set_bitrate(bitrate);
    }

    pub fn set_packet_loss(&self, percent: i32) {
        self.encoder.set_packet_loss(percent);
    }
}

impl Chain for AudioSendChain {
    fn stop(&self) {
        self.encoder.stop();
        self.encryptor.stop();
        self.socket.stop();
    }

    fn port(&self) -> u16 {
        self.port
    }
}

/// Incoming audio: UDP -> crypto -> jitter buffer, pumped by the renderer
/// clock through Opus decode, resampling and the silence tee.
pub struct AudioReceiveChain {
    socket: Arc<RtpSocket>,
    decryptor: Arc<Decryptor>,
    jitter: Arc<JitterBuffer>,
    decoder: Arc<AudioDecoder>,
    resampler: Arc<Resampler>,
    port: u16,
}

impl AudioReceiveChain {
    fn build(
        ports: &PortPool,
        renderer: SharedSink,
        device_rate: u32,
        secure_key: Option<&str>,
        silence_callback: Option<SilenceCallback>,
    ) -> Result<Self, SessionError> {
        let port = ports.take().ok_or(SessionError::PortsExhausted)?;

        let socket = Arc::new(RtpSocket::new());
        let decryptor = Arc::new(Decryptor::new());
        let jitter = Arc::new(JitterBuffer::new());
        let decoder = Arc::new(AudioDecoder::new());
        let resampler = Arc::new(Resampler::new());

        socket.set_receivers(Some(decryptor.clone() as SharedSink), None);
        decryptor.set_receiver(Some(jitter.clone() as SharedSink));
        decoder.set_receiver(Some(resampler.clone() as SharedSink));

        match silence_callback {
            Some(callback) => {
                let splitter = Arc::new(crate::transport::SinkSplitter::new());
                splitter.set_first(Some(renderer));
                splitter.set_second(Some(Arc::new(SilenceDetector::new(callback)) as SharedSink));
                resampler.set_receiver(Some(splitter as SharedSink));
            }
            None => resampler.set_receiver(Some(renderer)),
        }

        resampler.start(SAMPLE_RATE, device_rate)?;
        decoder.start(SAMPLE_RATE, 1)?;
        jitter.start(JitterMode::Sound, "audio-rx");
        if let Some(key) = secure_key {
            decryptor.start(key)?;
        }
        socket.start(port)?;

        Ok(Self {
            socket,
            decryptor,
            jitter,
            decoder,
            resampler,
            port,
        })
    }

    pub fn local_port(&self) -> u16 {
        self.port
    }

    /// Called by the renderer timer every 20 ms: move one frame from the
    /// jitter buffer into the decode path.
    pub fn pump(&self) {
        if let Some(packet) = self.jitter.get_frame() {
            self.decoder.send(&packet.packet(), None);
        }
    }
}

impl Chain for AudioReceiveChain {
    fn stop(&self) {
        self.socket.stop();
        self.decryptor.stop();
        self.jitter.stop();
        self.decoder.stop();
        self.resampler.stop();
    }

    fn port(&self) -> u16 {
        self.port
    }
}

/// Outgoing video: capture sink -> VP8 -> MTU chunks -> crypto -> UDP.
pub struct VideoSendChain {
    encoder: Arc<VideoEncoder>,
    splitter: Arc<FrameSplitter>,
    encryptor: Arc<Encryptor>,
    socket: Arc<RtpSocket>,
    ssrc: u32,
    port: u16,
}

impl VideoSendChain {
    fn build(
        ports: &PortPool,
        config: VideoEncoderConfig,
        destination: Address,
        secure_key: Option<&str>,
    ) -> Result<Self, SessionError> {
        let port = ports.take().ok_or(SessionError::PortsExhausted)?;

        let socket = Arc::new(RtpSocket::new());
        let encryptor = Arc::new(Encryptor::new());
        let splitter = Arc::new(FrameSplitter::new());
        let encoder = Arc::new(VideoEncoder::new());

        encoder.set_receiver(Some(splitter.clone() as SharedSink));
        splitter.set_receiver(Some(encryptor.clone() as SharedSink));
        encryptor.set_receiver(Some(socket.clone() as SharedSink));

        socket.start(port)?;
        socket.set_default_address(destination);
        if let Some(key) = secure_key {
            encryptor.start(key)?;
        }
        let ssrc = config.ssrc;
        encoder.start(config)?;

        Ok(Self {
            encoder,
            splitter,
            encryptor,
            socket,
            ssrc,
            port,
        })
    }

    /// Where the camera pushes raw I420 frames.
    pub fn input(&self) -> SharedSink {
        self.encoder.clone()
    }

    /// Encoder handle for the loss-recovery reverse edge.
    pub fn encoder(&self) -> Arc<VideoEncoder> {
        self.encoder.clone()
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    pub fn local_port(&self) -> u16 {
        self.port
    }
}

impl Chain for VideoSendChain {
    fn stop(&self) {
        self.encoder.stop();
        self.splitter.reset();
        self.encryptor.stop();
        self.socket.stop();
    }

    fn port(&self) -> u16 {
        self.port
    }
}

/// Incoming video: UDP -> crypto -> jitter buffer, pumped at the display
/// rate through reassembly and VP8 decode.
pub struct VideoReceiveChain {
    socket: Arc<RtpSocket>,
    decryptor: Arc<Decryptor>,
    jitter: Arc<JitterBuffer>,
    collector: Arc<FrameCollector>,
    decoder: Arc<VideoDecoder>,
    port: u16,
}

impl VideoReceiveChain {
    fn build(
        ports: &PortPool,
        renderer: SharedSink,
        secure_key: Option<&str>,
        loss_callback: Option<Arc<dyn crate::video::KeyFrameRequester>>,
    ) -> Result<Self, SessionError> {
        let port = ports.take().ok_or(SessionError::PortsExhausted)?;

        let socket = Arc::new(RtpSocket::new());
        let decryptor = Arc::new(Decryptor::new());
        let jitter = Arc::new(JitterBuffer::new());
        let collector = Arc::new(FrameCollector::new());
        let decoder = Arc::new(VideoDecoder::new());

        socket.set_receivers(Some(decryptor.clone() as SharedSink), None);
        decryptor.set_receiver(Some(jitter.clone() as SharedSink));
        collector.set_receiver(Some(decoder.clone() as SharedSink));
        decoder.set_receiver(Some(renderer));

        collector.set_loss_callback(loss_callback.clone());
        decoder.set_loss_callback(loss_callback);

        decoder.start()?;
        jitter.start(JitterMode::Video, "video-rx");
        if let Some(key) = secure_key {
            decryptor.start(key)?;
        }
        socket.start(port)?;

        Ok(Self {
            socket,
            decryptor,
            jitter,
            collector,
            decoder,
            port,
        })
    }

    pub fn local_port(&self) -> u16 {
        self.port
    }

    /// Called by the display timer (25 fps): drain deliverable chunks into
    /// reassembly and decode.
    pub fn pump(&self) {
        while let Some(packet) = self.jitter.get_frame() {
            self.collector.send(&packet.packet(), None);
        }
    }
}

impl Chain for VideoReceiveChain {
    fn stop(&self) {
        self.socket.stop();
        self.decryptor.stop();
        self.jitter.stop();
        self.collector.reset();
        self.decoder.stop();
    }

    fn port(&self) -> u16 {
        self.port
    }
}

struct ServerState {
    access_token: String,
    secure_key: String,
    grants: Grants,
    client_id: i64,
    connected: bool,
}

/// One client session: the control connection plus every media chain of
/// the current call.
pub struct Session {
    signaling: Arc<SignalingClient>,
    ports: Arc<PortPool>,
    ssrcs: Mutex<HashSet<u32>>,
    chains: Mutex<Vec<Arc<dyn Chain>>>,
    state: Arc<Mutex<ServerState>>,
}

impl Session {
    pub fn new(callback: Arc<SessionCallback>) -> Arc<Self> {
        let state = Arc::new(Mutex::new(ServerState {
            access_token: String::new(),
            secure_key: String::new(),
            grants: Grants::default(),
            client_id: 0,
            connected: false,
        }));

        let handler_state = state.clone();
        let handler: Arc<SignalHandler> = Arc::new(move |event| {
            Self::route_signal(&handler_state, &callback, event);
        });

        Arc::new(Self {
            signaling: Arc::new(SignalingClient::new(handler)),
            ports: Arc::new(PortPool::new()),
            ssrcs: Mutex::new(HashSet::new()),
            chains: Mutex::new(Vec::new()),
            state,
        })
    }

    fn route_signal(
        state: &Mutex<ServerState>,
        callback: &Arc<SessionCallback>,
        event: SignalEvent,
    ) {
        match event {
            SignalEvent::Command(Command::ConnectResponse(response)) => {
                if response.result == ConnectResult::Ok {
                    {
                        let mut state = state.lock();
                        state.access_token = response.access_token.clone();
                        state.secure_key = response.secure_key.clone();
                        state.grants = Grants::parse(response.grants);
                        state.client_id = response.id;
                        state.connected = true;
                    }
                    callback(SessionEvent::Connected(response));
                } else {
                    callback(SessionEvent::Rejected(response));
                }
            }
            SignalEvent::Command(Command::Ping {}) => {}
            SignalEvent::Command(command) => callback(SessionEvent::Command(command)),
            SignalEvent::Lost => {
                state.lock().connected = false;
                callback(SessionEvent::ConnectionLost);
            }
            SignalEvent::Closed => {
                state.lock().connected = false;
                callback(SessionEvent::Closed);
            }
        }
    }

    /// Open the control channel and log in.
    pub fn connect(
        &self,
        url: &str,
        login: &str,
        password: &str,
        client_version: u32,
    ) -> Result<(), SessionError> {
        self.signaling.connect(url)?;
        self.signaling
            .send(&Command::ConnectRequest(ConnectRequest {
                client_version,
                system: format!("{} {}", std::env::consts::OS, std::env::consts::ARCH),
                login: login.to_owned(),
                password: password.to_owned(),
            }))?;
        Ok(())
    }

    /// Send one signalling command.
    pub fn send_command(&self, command: &Command) -> Result<(), SessionError> {
        Ok(self.signaling.send(command)?)
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    pub fn grants(&self) -> Grants {
        self.state.lock().grants
    }

    pub fn access_token(&self) -> String {
        self.state.lock().access_token.clone()
    }

    /// Server-assigned client id from the last successful connect.
    pub fn client_id(&self) -> i64 {
        self.state.lock().client_id
    }

    fn secure_key_if_allowed(&self) -> Option<String> {
        let state = self.state.lock();
        if state.grants.allowed_crypto && !state.secure_key.is_empty() {
            Some(state.secure_key.clone())
        } else {
            None
        }
    }

    /// Unique stream id for a new source. Never zero, never reused within
    /// the session.
    pub fn allocate_ssrc(&self) -> u32 {
        let mut ssrcs = self.ssrcs.lock();
        loop {
            let candidate: u32 = rand::random();
            if candidate != 0 && ssrcs.insert(candidate) {
                return candidate;
            }
        }
    }

    pub fn create_audio_send(
        &self,
        destination: Address,
    ) -> Result<Arc<AudioSendChain>, SessionError> {
        let ssrc = self.allocate_ssrc();
        let key = self.secure_key_if_allowed();
        let chain = Arc::new(AudioSendChain::build(
            &self.ports,
            ssrc,
            destination,
            key.as_deref(),
        )?);
        self.chains.lock().push(chain.clone());
        Ok(chain)
    }

    pub fn create_audio_receive(
        &self,
        renderer: SharedSink,
        device_rate: u32,
        silence_callback: Option<SilenceCallback>,
    ) -> Result<Arc<AudioReceiveChain>, SessionError> {
        let key = self.secure_key_if_allowed();
        let chain = Arc::new(AudioReceiveChain::build(
            &self.ports,
            renderer,
            device_rate,
            key.as_deref(),
            silence_callback,
        )?);
        self.chains.lock().push(chain.clone());
        Ok(chain)
    }

    pub fn create_video_send(
        &self,
        resolution: crate::video::Resolution,
        bitrate_kbit: u32,
        screen_content: bool,
        destination: Address,
    ) -> Result<Arc<VideoSendChain>, SessionError> {
        let ssrc = self.allocate_ssrc();
        let key = self.secure_key_if_allowed();
        let config = VideoEncoderConfig {
            resolution,
            bitrate_kbit,
            screen_content,
            ssrc,
        };
        let chain = Arc::new(VideoSendChain::build(
            &self.ports,
            config,
            destination,
            key.as_deref(),
        )?);
        self.chains.lock().push(chain.clone());
        Ok(chain)
    }

    pub fn create_video_receive(
        &self,
        renderer: SharedSink,
        loss_callback: Option<Arc<dyn crate::video::KeyFrameRequester>>,
    ) -> Result<Arc<VideoReceiveChain>, SessionError> {
        let key = self.secure_key_if_allowed();
        let chain = Arc::new(VideoReceiveChain::build(
            &self.ports,
            renderer,
            key.as_deref(),
            loss_callback,
        )?);
        self.chains.lock().push(chain.clone());
        Ok(chain)
    }

    /// Stop every media chain, sources first. Ports return to the pool.
    pub fn end_call(&self) {
        let chains: Vec<_> = self.chains.lock().drain(..).collect();
        for chain in &chains {
            chain.stop();
            self.ports.give_back(chain.port());
        }
        tracing::info!("call ended, {} chains stopped", chains.len());
    }

    /// Full teardown: chains, then a polite disconnect on the control
    /// channel.
    pub fn disconnect(&self) {
        self.end_call();

        if self.signaling.is_connected() {
            let _ = self.signaling.send(&Command::Disconnect {});
        }
        self.signaling.disconnect();
        self.state.lock().connected = false;
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{pcm_to_bytes, SAMPLES_PER_FRAME};
    use crate::transport::testing::CaptureSink;
    use crate::transport::{PayloadType, RtpHeader, RtpPacket};
    use std::net::{Ipv4Addr, SocketAddrV4};
    use std::sync::mpsc;
    use std::time::{Duration, Instant};

    fn quiet_session() -> Arc<Session> {
        Session::new(Arc::new(|_| {}))
    }

    #[test]
    fn ssrcs_are_unique_and_nonzero() {
        let session = quiet_session();
        let mut seen = HashSet::new();
        for _ in 0..64 {
            let ssrc = session.allocate_ssrc();
            assert_ne!(ssrc, 0);
            assert!(seen.insert(ssrc));
        }
    }

    #[test]
    fn route_signal_stores_connect_state() {
        let (tx, rx) = mpsc::channel();
        let callback: Arc<SessionCallback> = Arc::new(move |event| {
            let _ = tx.send(format!("{event:?}"));
        });
        let session = quiet_session();

        Session::route_signal(
            &session.state,
            &callback,
            SignalEvent::Command(Command::ConnectResponse(ConnectResponse {
                result: ConnectResult::Ok,
                id: 77,
                access_token: "token".into(),
                secure_key: "key".into(),
                grants: 1 | (1 << 3),
                ..Default::default()
            })),
        );

        assert!(session.is_connected());
        assert!(session.grants().allowed_crypto);
        assert_eq!(session.access_token(), "token");
        assert_eq!(session.client_id(), 77);
        assert!(rx.recv().unwrap().starts_with("Connected"));

        Session::route_signal(&session.state, &callback, SignalEvent::Lost);
        assert!(!session.is_connected());
    }

    #[test]
    fn rejected_connect_does_not_mark_connected() {
        let callback: Arc<SessionCallback> = Arc::new(|_| {});
        let session = quiet_session();
        Session::route_signal(
            &session.state,
            &callback,
            SignalEvent::Command(Command::ConnectResponse(ConnectResponse {
                result: ConnectResult::InvalidCredentials,
                ..Default::default()
            })),
        );
        assert!(!session.is_connected());
    }

    /// Full audio loop over localhost: PCM -> encode -> UDP -> jitter ->
    /// decode -> renderer sink.
    #[test]
    fn audio_chains_speak_over_loopback() {
        let session = quiet_session();

        let renderer = CaptureSink::new();
        let receive = session
            .create_audio_receive(renderer.clone(), SAMPLE_RATE, None)
            .unwrap();

        let destination = Address::V4(SocketAddrV4::new(
            Ipv4Addr::LOCALHOST,
            receive.local_port(),
        ));
        let send = session.create_audio_send(destination).unwrap();

        let frame: Vec<i16> = (0..SAMPLES_PER_FRAME)
            .map(|i| ((i as f32 * 0.02).sin() * 5000.0) as i16)
            .collect();
        let payload = pcm_to_bytes(&frame);

        let input = send.input();
        for seq in 0..6u16 {
            let header = RtpHeader {
                payload_type: PayloadType::Pcm as u8,
                sequence: seq,
                ..Default::default()
            };
            input.send(&RtpPacket::new(header, &payload), None);
        }

        // Pump the renderer clock until the pre-play reserve drains.
        let deadline = Instant::now() + Duration::from_secs(3);
        while renderer.count() < 3 {
            assert!(Instant::now() < deadline, "no audio delivered");
            receive.pump();
            std::thread::sleep(Duration::from_millis(10));
        }

        let packets = renderer.packets.lock();
        assert_eq!(packets[0].payload.len(), SAMPLES_PER_FRAME * 2);

        drop(packets);
        session.end_call();
        session.end_call(); // idempotent
    }
}
