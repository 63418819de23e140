use std::io::{Read, Write};
use std::net::{Ipv4Addr, Shutdown, SocketAddr, TcpStream, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;

use super::udp::MAX_DATAGRAM_SIZE;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum TunnelError {
    #[error("no server address configured")]
    NoServer,
    #[error("server address does not resolve")]
    BadAddress,
    #[error("tunnel connect failed: {0}")]
    Connect(#[source] std::io::Error),
    #[error("local pipe bind failed: {0}")]
    Bind(#[source] std::io::Error),
    #[error("websocket error: {0}")]
    WebSocket(String),
}

/// RTP-over-TCP fallback used when UDP fails its reachability probe.
///
/// Each pipe is a local UDP socket bridged to a framed TCP connection:
/// the media chain keeps talking plain RTP datagrams to 127.0.0.1, the
/// tunnel frames them with a 2-byte little-endian length prefix and
/// relays both directions.
pub struct TcpTunnel {
    server: Mutex<Option<String>>,
    pipes: Mutex<Vec<Arc<Pipe>>>,
}

struct Pipe {
    udp: UdpSocket,
    tcp_writer: Mutex<TcpStream>,
    /// Address the media chain last sent from; inbound frames go back there.
    app_addr: Mutex<Option<SocketAddr>>,
    runned: AtomicBool,
    threads: Mutex<Vec<JoinHandle<()>>>,
    local_port: u16,
}

impl TcpTunnel {
    pub fn new() -> Self {
        Self {
            server: Mutex::new(None),
            pipes: Mutex::new(Vec::new()),
        }
    }

    pub fn set_server(&self, host: &str) {
        *self.server.lock() = Some(host.to_owned());
    }

    /// Bridge one media flow to `server_tcp_port`. Returns the local UDP
    /// port the chain should address instead of the server.
    pub fn create_pipe(&self, server_tcp_port: u16) -> Result<u16, TunnelError> {
        let host = self.server.lock().clone().ok_or(TunnelError::NoServer)?;

        let server_addr = (host.as_str(), server_tcp_port)
            .to_socket_addrs()
            .map_err(|_| TunnelError::BadAddress)?
            .next()
            .ok_or(TunnelError::BadAddress)?;

        let tcp = TcpStream::connect_timeout(&server_addr, CONNECT_TIMEOUT)
            .map_err(TunnelError::Connect)?;
        tcp.set_nodelay(true).ok();

        let udp =
            UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).map_err(TunnelError::Bind)?;
        let local_port = udp.local_addr().map_err(TunnelError::Bind)?.port();

        let pipe = Arc::new(Pipe {
            udp,
            tcp_writer: Mutex::new(tcp.try_clone().map_err(TunnelError::Connect)?),
            app_addr: Mutex::new(None),
            runned: AtomicBool::new(true),
            threads: Mutex::new(Vec::new()),
            local_port,
        });

        pipe.spawn_udp_to_tcp();
        pipe.spawn_tcp_to_udp(tcp);

        tracing::info!(
            "tcp media pipe on local port {} -> {}:{}",
            local_port,
            host,
            server_tcp_port
        );

        self.pipes.lock().push(pipe);
        Ok(local_port)
    }

    /// Flush all pipes at conference end.
    pub fn end_session(&self) {
        for pipe in self.pipes.lock().drain(..) {
            pipe.stop();
        }
    }
}

impl Default for TcpTunnel {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TcpTunnel {
    fn drop(&mut self) {
        self.end_session();
    }
}

impl Pipe {
    fn spawn_udp_to_tcp(self: &Arc<Self>) {
        let pipe = self.clone();
        let thread = std::thread::spawn(move || {
            let mut buffer = vec![0u8; MAX_DATAGRAM_SIZE];

            while pipe.runned.load(Ordering::SeqCst) {
                match pipe.udp.recv_from(&mut buffer) {
                    Ok((size, from)) => {
                        if !pipe.runned.load(Ordering::SeqCst) || size == 0 {
                            continue;
                        }
                        *pipe.app_addr.lock() = Some(from);

                        let mut writer = pipe.tcp_writer.lock();
                        let prefix = (size as u16).to_le_bytes();
                        if writer
                            .write_all(&prefix)
                            .and_then(|_| writer.write_all(&buffer[..size]))
                            .is_err()
                        {
                            tracing::error!(
                                "tcp pipe {}: write failed, closing",
                                pipe.local_port
                            );
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
        });
        self.threads.lock().push(thread);
    }

    fn spawn_tcp_to_udp(self: &Arc<Self>, mut tcp: TcpStream) {
        let pipe = self.clone();
        let thread = std::thread::spawn(move || {
            let mut prefix = [0u8; 2];
            let mut frame = vec![0u8; u16::MAX as usize];

            while pipe.runned.load(Ordering::SeqCst) {
                if tcp.read_exact(&mut prefix).is_err() {
                    break;
                }
                let size = u16::from_le_bytes(prefix) as usize;
                if tcp.read_exact(&mut frame[..size]).is_err() {
                    break;
                }

                let target = *pipe.app_addr.lock();
                if let Some(target) = target {
                    let _ = pipe.udp.send_to(&frame[..size], target);
                }
            }

            tracing::debug!("tcp pipe {}: reader finished", pipe.local_port);
        });
        self.threads.lock().push(thread);
    }

    fn stop(&self) {
        if !self.runned.swap(false, Ordering::SeqCst) {
            return;
        }

        let _ = self.tcp_writer.lock().shutdown(Shutdown::Both);
        let wake: SocketAddr = (Ipv4Addr::LOCALHOST, self.local_port).into();
        let _ = self.udp.send_to(&[], wake);

        for thread in self.threads.lock().drain(..) {
            let _ = thread.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    /// End-to-end: datagram into the pipe comes out framed on the TCP side,
    /// and a framed TCP answer comes back as a datagram.
    #[test]
    fn pipe_relays_both_directions() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let server_port = listener.local_addr().unwrap().port();

        let server = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();

            let mut prefix = [0u8; 2];
            stream.read_exact(&mut prefix).unwrap();
            let size = u16::from_le_bytes(prefix) as usize;
            let mut data = vec![0u8; size];
            stream.read_exact(&mut data).unwrap();
            assert_eq!(data, b"rtp bytes");

            let reply = b"rtp reply";
            stream
                .write_all(&(reply.len() as u16).to_le_bytes())
                .unwrap();
            stream.write_all(reply).unwrap();
        });

        let tunnel = TcpTunnel::new();
        tunnel.set_server("127.0.0.1");
        let pipe_port = tunnel.create_pipe(server_port).unwrap();

        let app = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        app.send_to(b"rtp bytes", (Ipv4Addr::LOCALHOST, pipe_port))
            .unwrap();

        app.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let mut buffer = [0u8; 64];
        let (size, _) = app.recv_from(&mut buffer).unwrap();
        assert_eq!(&buffer[..size], b"rtp reply");

        server.join().unwrap();
        tunnel.end_session();
    }
}
