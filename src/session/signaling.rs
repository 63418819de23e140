use std::io::ErrorKind;
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use thiserror::Error;
use tungstenite::{Message, WebSocket};

use crate::proto::Command;

/// Connect timeout for the control channel.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Keepalive ping cadence.
const PING_INTERVAL: Duration = Duration::from_secs(5);
/// Silence on the control channel after which the peer is considered lost.
const LOST_TIMEOUT: Duration = Duration::from_secs(15);

type WsStream = WebSocket<TcpStream>;

#[derive(Error, Debug)]
pub enum SignalingError {
    #[error("unsupported control url {0}, expected ws://host[:port][/path]")]
    BadUrl(String),
    #[error("control server does not resolve")]
    BadAddress,
    #[error("control connect failed: {0}")]
    Connect(#[source] std::io::Error),
    #[error("websocket handshake failed: {0}")]
    Handshake(String),
    #[error("client is not connected")]
    NotConnected,
}

/// What the control channel reports to the session.
#[derive(Debug)]
pub enum SignalEvent {
    /// A parsed inbound command.
    Command(Command),
    /// No traffic for the lost timeout; the session should reconnect.
    Lost,
    /// The socket closed or failed.
    Closed,
}

pub type SignalHandler = dyn Fn(SignalEvent) + Send + Sync;

fn parse_ws_url(url: &str) -> Result<(String, u16, String), SignalingError> {
    let rest = url
        .strip_prefix("ws://")
        .ok_or_else(|| SignalingError::BadUrl(url.to_owned()))?;

    let (host_port, path) = match rest.split_once('/') {
        Some((host_port, path)) => (host_port, format!("/{path}")),
        None => (rest, "/".to_owned()),
    };

    let (host, port) = match host_port.split_once(':') {
        Some((host, port)) => (
            host.to_owned(),
            port.parse()
                .map_err(|_| SignalingError::BadUrl(url.to_owned()))?,
        ),
        None => (host_port.to_owned(), 80),
    };

    if host.is_empty() {
        return Err(SignalingError::BadUrl(url.to_owned()));
    }
    Ok((host, port, path))
}

/// JSON control connection: sends commands, parses inbound ones on a
/// dedicated reader thread and keeps the link alive with pings. Command
/// send order is preserved; the socket is a single mutex-guarded stream.
pub struct SignalingClient {
    handler: Arc<SignalHandler>,
    socket: Arc<Mutex<Option<WsStream>>>,
    runned: Arc<AtomicBool>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl SignalingClient {
    pub fn new(handler: Arc<SignalHandler>) -> Self {
        Self {
            handler,
            socket: Arc::new(Mutex::new(None)),
            runned: Arc::new(AtomicBool::new(false)),
            threads: Mutex::new(Vec::new()),
        }
    }

    pub fn connect(&self, url: &str) -> Result<(), SignalingError> {
        if self.runned.load(Ordering::SeqCst) {
            return Ok(());
        }

        let (host, port, path) = parse_ws_url(url)?;
        let target = (host.as_str(), port)
            .to_socket_addrs()
            .map_err(|_| SignalingError::BadAddress)?
            .next()
            .ok_or(SignalingError::BadAddress)?;

        let stream = TcpStream::connect_timeout(&target, CONNECT_TIMEOUT)
            .map_err(SignalingError::Connect)?;
        // Generous timeout for the handshake reply, short poll interval
        // afterwards so reader and senders can share the socket lock.
        stream
            .set_read_timeout(Some(Duration::from_secs(15)))
            .map_err(SignalingError::Connect)?;
        stream.set_nodelay(true).ok();

        let request = format!("ws://{host}:{port}{path}");
        let (socket, _response) = tungstenite::client(request, stream)
            .map_err(|e| SignalingError::Handshake(e.to_string()))?;
        let _ = socket
            .get_ref()
            .set_read_timeout(Some(Duration::from_millis(100)));

        *self.socket.lock() = Some(socket);
        self.runned.store(true, Ordering::SeqCst);

        self.spawn_reader();
        self.spawn_pinger();

        tracing::info!("signaling connected to {}", url);
        Ok(())
    }

    fn spawn_reader(&self) {
        let runned = self.runned.clone();
        let shared = self.socket.clone();
        let handler = self.handler.clone();

        let thread = std::thread::spawn(move || {
            let mut last_rx = Instant::now();

            while runned.load(Ordering::SeqCst) {
                let message = {
                    let mut guard = shared.lock();
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
                                tracing::error!("signaling read failed: {}", e);
                                handler(SignalEvent::Closed);
                            }
                            break;
                        }
                    }
                };

                match message {
                    Some(Message::Text(text)) => {
                        last_rx = Instant::now();
                        match Command::parse(&text) {
                            Ok(command) => handler(SignalEvent::Command(command)),
                            Err(e) => {
                                tracing::error!("signaling: dropping message: {}", e);
                            }
                        }
                    }
                    Some(Message::Ping(_)) | Some(Message::Pong(_)) => {
                        last_rx = Instant::now();
                    }
                    Some(Message::Close(_)) => {
                        handler(SignalEvent::Closed);
                        break;
                    }
                    Some(_) => {}
                    None => {
                        if last_rx.elapsed() >= LOST_TIMEOUT {
                            tracing::warn!("signaling: peer silent, reporting lost");
                            handler(SignalEvent::Lost);
                            break;
                        }
                    }
                }
            }

            tracing::debug!("signaling reader finished");
        });

        self.threads.lock().push(thread);
    }

    fn spawn_pinger(&self) {
        let runned = self.runned.clone();
        let shared = self.socket.clone();

        let thread = std::thread::spawn(move || {
            let mut last_ping = Instant::now();

            while runned.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(200));
                if last_ping.elapsed() < PING_INTERVAL {
                    continue;
                }
                last_ping = Instant::now();

                let mut guard = shared.lock();
                let Some(socket) = guard.as_mut() else { break };
                if let Err(e) = socket.send(Message::Text((Command::Ping {}).serialize())) {
                    if runned.load(Ordering::SeqCst) {
                        tracing::error!("signaling ping failed: {}", e);
                    }
                    break;
                }
            }
        });

        self.threads.lock().push(thread);
    }

    /// Serialize and send one command. Send order on the control channel
    /// follows call order.
    pub fn send(&self, command: &Command) -> Result<(), SignalingError> {
        if !self.runned.load(Ordering::SeqCst) {
            return Err(SignalingError::NotConnected);
        }

        let mut guard = self.socket.lock();
        let socket = guard.as_mut().ok_or(SignalingError::NotConnected)?;
        socket
            .send(Message::Text(command.serialize()))
            .map_err(|e| SignalingError::Handshake(e.to_string()))
    }

    pub fn is_connected(&self) -> bool {
        self.runned.load(Ordering::SeqCst)
    }

    /// Idempotent; closes the socket and joins both worker threads.
    pub fn disconnect(&self) {
        if !self.runned.swap(false, Ordering::SeqCst) {
            return;
        }

        if let Some(mut socket) = self.socket.lock().take() {
            let _ = socket.close(None);
        }

        for thread in self.threads.lock().drain(..) {
            let _ = thread.join();
        }

        tracing::info!("signaling disconnected");
    }
}

impl Drop for SignalingClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_parsing() {
        assert_eq!(
            parse_ws_url("ws://server.example:8080/signal").unwrap(),
            ("server.example".into(), 8080, "/signal".into())
        );
        assert_eq!(
            parse_ws_url("ws://10.0.0.1").unwrap(),
            ("10.0.0.1".into(), 80, "/".into())
        );
        assert!(parse_ws_url("http://server.example").is_err());
        assert!(parse_ws_url("ws://").is_err());
    }

    #[test]
    fn send_requires_connection() {
        let client = SignalingClient::new(Arc::new(|_| {}));
        assert!(matches!(
            client.send(&Command::Ping {}),
            Err(SignalingError::NotConnected)
        ));
        client.disconnect(); // no-op when never connected
    }
}
