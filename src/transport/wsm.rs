use std::io::ErrorKind;
use std::net::{Ipv4Addr, SocketAddr, TcpStream, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Message, WebSocket};

use super::tcp::TunnelError;
use super::udp::MAX_DATAGRAM_SIZE;
use crate::proto::{Command, Media};

type WsStream = WebSocket<MaybeTlsStream<TcpStream>>;

/// WebSocket media tunnel ("WSM"): the last-resort transport when neither
/// UDP nor TCP reaches the media ports. Each RTP packet rides inside a
/// `media` signalling command, base64 encoded, tagged with source and
/// destination ports so the server can demultiplex flows.
pub struct WsmTunnel {
    socket: Arc<Mutex<Option<WsStream>>>,
    pipes: Arc<Mutex<Vec<Arc<Pipe>>>>,
    runned: Arc<AtomicBool>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

struct Pipe {
    udp: UdpSocket,
    local_port: u16,
    server_port: u16,
    app_addr: Mutex<Option<SocketAddr>>,
    runned: AtomicBool,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl WsmTunnel {
    pub fn new() -> Self {
        Self {
            socket: Arc::new(Mutex::new(None)),
            pipes: Arc::new(Mutex::new(Vec::new())),
            runned: Arc::new(AtomicBool::new(false)),
            reader: Mutex::new(None),
        }
    }

    /// Connect the tunnel WebSocket and start the demultiplexing reader.
    pub fn start(&self, url: &str, access_token: &str) -> Result<(), TunnelError> {
        if self.runned.load(Ordering::SeqCst) {
            return Ok(());
        }

        let full_url = format!("{url}?access_token={access_token}");
        let (socket, _response) = tungstenite::connect(full_url.as_str())
            .map_err(|e| TunnelError::WebSocket(e.to_string()))?;

        // Short read timeout so the reader thread can interleave with
        // senders on the shared socket lock.
        if let MaybeTlsStream::Plain(stream) = socket.get_ref() {
            let _ = stream.set_read_timeout(Some(Duration::from_millis(100)));
        }

        *self.socket.lock() = Some(socket);
        self.runned.store(true, Ordering::SeqCst);

        let runned = self.runned.clone();
        let shared_socket = self.socket.clone();
        let pipes = self.pipes.clone();

        let reader = std::thread::spawn(move || {
            while runned.load(Ordering::SeqCst) {
                let message = {
                    let mut guard = shared_socket.lock();
                    let Some(socket) = guard.as_mut() else { break };
                    match socket.read() {
                        Ok(message) => Some(message),
                        Err(tungstenite::Error::Io(e))
                            if e.kind() == ErrorKind::WouldBlock
                                || e.kind() == ErrorKind::TimedOut =>
                        {
                            None
                        }
                        Err(e) => {
                            if runned.load(Ordering::SeqCst) {
                                tracing::error!("wsm tunnel read failed: {}", e);
                            }
                            break;
                        }
                    }
                };

                let Some(Message::Text(text)) = message else {
                    continue;
                };

                match Command::parse(&text) {
                    Ok(Command::Media(media)) => {
                        Self::route_inbound(&pipes, &media);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::error!("wsm tunnel: unparseable message: {}", e);
                    }
                }
            }

            tracing::debug!("wsm tunnel reader finished");
        });

        *self.reader.lock() = Some(reader);
        tracing::info!("wsm tunnel connected to {}", url);
        Ok(())
    }

    fn route_inbound(pipes: &Mutex<Vec<Arc<Pipe>>>, media: &Media) {
        let Some(data) = media.decode_rtp() else {
            tracing::error!("wsm tunnel: media command with bad base64");
            return;
        };

        let pipes = pipes.lock();
        let pipe = pipes
            .iter()
            .find(|p| p.local_port == media.dst_port || p.server_port == media.src_port);

        if let Some(pipe) = pipe {
            let target = *pipe.app_addr.lock();
            if let Some(target) = target {
                let _ = pipe.udp.send_to(&data, target);
            }
        }
    }

    /// Bridge one media flow to `server_udp_port`; returns the local UDP
    /// port that stands in for the server on the media chain.
    pub fn create_pipe(&self, server_udp_port: u16) -> Result<u16, TunnelError> {
        if !self.runned.load(Ordering::SeqCst) {
            return Err(TunnelError::WebSocket("tunnel is not started".into()));
        }

        let udp =
            UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).map_err(TunnelError::Bind)?;
        let local_port = udp.local_addr().map_err(TunnelError::Bind)?.port();

        let pipe = Arc::new(Pipe {
            udp: udp.try_clone().map_err(TunnelError::Bind)?,
            local_port,
            server_port: server_udp_port,
            app_addr: Mutex::new(None),
            runned: AtomicBool::new(true),
            thread: Mutex::new(None),
        });

        let worker = pipe.clone();
        let shared_socket = self.socket.clone();
        let thread = std::thread::spawn(move || {
            let mut buffer = vec![0u8; MAX_DATAGRAM_SIZE];

            while worker.runned.load(Ordering::SeqCst) {
                match udp.recv_from(&mut buffer) {
                    Ok((size, from)) => {
                        if !worker.runned.load(Ordering::SeqCst) || size == 0 {
                            continue;
                        }
                        *worker.app_addr.lock() = Some(from);

                        let command = Command::Media(Media::wrap(
                            worker.local_port,
                            worker.server_port,
                            &buffer[..size],
                        ));

                        let mut guard = shared_socket.lock();
                        if let Some(socket) = guard.as_mut() {
                            if let Err(e) =
                                socket.send(Message::Text(command.serialize()))
                            {
                                tracing::error!("wsm pipe send failed: {}", e);
                                break;
                            }
                        }
                    }
                    Err(_) => break,
                }
            }
        });

        *pipe.thread.lock() = Some(thread);
        self.pipes.lock().push(pipe);

        tracing::info!(
            "wsm media pipe on local port {} for server port {}",
            local_port,
            server_udp_port
        );
        Ok(local_port)
    }

    /// Idempotent; closes the WebSocket and drains all pipes.
    pub fn stop(&self) {
        if !self.runned.swap(false, Ordering::SeqCst) {
            return;
        }

        for pipe in self.pipes.lock().drain(..) {
            pipe.stop();
        }

        if let Some(mut socket) = self.socket.lock().take() {
            let _ = socket.close(None);
        }

        if let Some(reader) = self.reader.lock().take() {
            let _ = reader.join();
        }

        tracing::info!("wsm tunnel stopped");
    }

    pub fn is_started(&self) -> bool {
        self.runned.load(Ordering::SeqCst)
    }
}

impl Default for WsmTunnel {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for WsmTunnel {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Pipe {
    fn stop(&self) {
        if !self.runned.swap(false, Ordering::SeqCst) {
            return;
        }

        let wake: SocketAddr = (Ipv4Addr::LOCALHOST, self.local_port).into();
        let _ = self.udp.send_to(&[], wake);

        if let Some(thread) = self.thread.lock().take() {
            let _ = thread.join();
        }
    }
}
