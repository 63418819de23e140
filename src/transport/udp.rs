use std::io;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;
use thiserror::Error;

use super::Address;

/// Largest datagram the receive loop accepts.
pub const MAX_DATAGRAM_SIZE: usize = 32768;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("socket bind failed: {0}")]
    Bind(#[source] io::Error),
    #[error("socket is not started")]
    NotStarted,
}

/// Handler invoked synchronously on the receive thread for every inbound
/// datagram: payload, peer address, local socket port.
pub type DatagramHandler = dyn Fn(&[u8], &Address, u16) + Send + Sync;

/// Blocking UDP socket with one dedicated receive thread. The thread's
/// lifetime equals the socket's Active state; `stop()` wakes it with a
/// self-addressed zero-byte datagram and joins.
pub struct UdpTransport {
    handler: Arc<DatagramHandler>,
    socket: Mutex<Option<Arc<UdpSocket>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
    runned: Arc<AtomicBool>,
    bound_port: AtomicU16,
}

impl UdpTransport {
    pub fn new(handler: Arc<DatagramHandler>) -> Self {
        Self {
            handler,
            socket: Mutex::new(None),
            thread: Mutex::new(None),
            runned: Arc::new(AtomicBool::new(false)),
            bound_port: AtomicU16::new(0),
        }
    }

    /// Bind and spin up the receive thread. Port 0 binds an ephemeral port;
    /// the effective port is available from `bound_port()`.
    pub fn start(&self, bind_port: u16) -> Result<(), TransportError> {
        if self.runned.load(Ordering::SeqCst) {
            return Ok(());
        }

        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, bind_port))
            .map_err(TransportError::Bind)?;
        let port = socket
            .local_addr()
            .map_err(TransportError::Bind)?
            .port();

        let socket = Arc::new(socket);
        self.bound_port.store(port, Ordering::SeqCst);
        self.runned.store(true, Ordering::SeqCst);

        let runned = self.runned.clone();
        let handler = self.handler.clone();
        let rx_socket = socket.clone();

        let thread = std::thread::spawn(move || {
            let mut buffer = vec![0u8; MAX_DATAGRAM_SIZE];

            while runned.load(Ordering::SeqCst) {
                match rx_socket.recv_from(&mut buffer) {
                    Ok((size, peer)) => {
                        if !runned.load(Ordering::SeqCst) {
                            break;
                        }
                        if size == 0 {
                            continue;
                        }
                        let address = Address::Auto(peer);
                        handler(&buffer[..size], &address, port);
                    }
                    Err(e) => {
                        if runned.load(Ordering::SeqCst) {
                            tracing::error!("udp recv error on port {}: {}", port, e);
                        }
                        break;
                    }
                }
            }

            tracing::debug!("udp receive thread on port {} finished", port);
        });

        *self.socket.lock() = Some(socket);
        *self.thread.lock() = Some(thread);

        tracing::info!("udp transport started on port {}", port);
        Ok(())
    }

    /// Idempotent; wakes and joins the receive thread.
    pub fn stop(&self) {
        if !self.runned.swap(false, Ordering::SeqCst) {
            return;
        }

        let port = self.bound_port.load(Ordering::SeqCst);
        if let Some(socket) = self.socket.lock().as_ref() {
            let wake: SocketAddr = (Ipv4Addr::LOCALHOST, port).into();
            let _ = socket.send_to(&[], wake);
        }

        if let Some(thread) = self.thread.lock().take() {
            let _ = thread.join();
        }
        *self.socket.lock() = None;

        tracing::info!("udp transport on port {} stopped", port);
    }

    pub fn is_started(&self) -> bool {
        self.runned.load(Ordering::SeqCst)
    }

    pub fn bound_port(&self) -> u16 {
        self.bound_port.load(Ordering::SeqCst)
    }

    /// Inline send from any thread; errors are logged and swallowed, the
    /// pipeline recovers end-to-end.
    pub fn send_to(&self, data: &[u8], address: &Address) {
        let Some(target) = address.socket_addr() else {
            return;
        };

        if let Some(socket) = self.socket.lock().as_ref() {
            if let Err(e) = socket.send_to(data, target) {
                tracing::trace!("udp send to {} failed: {}", target, e);
            }
        }
    }
}

impl Drop for UdpTransport {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn delivers_datagrams_to_handler() {
        let (tx, rx) = mpsc::channel::<Vec<u8>>();
        let handler: Arc<DatagramHandler> =
            Arc::new(move |data, _addr, _port| {
                let _ = tx.send(data.to_vec());
            });

        let transport = UdpTransport::new(handler);
        transport.start(0).unwrap();
        let port = transport.bound_port();
        assert_ne!(port, 0);

        let sender = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        sender
            .send_to(b"hello media", (Ipv4Addr::LOCALHOST, port))
            .unwrap();

        let received = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(received, b"hello media");

        transport.stop();
        assert!(!transport.is_started());
    }

    #[test]
    fn stop_is_idempotent_and_restartable() {
        let handler: Arc<DatagramHandler> = Arc::new(|_, _, _| {});
        let transport = UdpTransport::new(handler);

        transport.start(0).unwrap();
        transport.stop();
        transport.stop();

        transport.start(0).unwrap();
        assert!(transport.is_started());
        transport.stop();
    }
}
