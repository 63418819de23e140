//! Transparent payload crypto between socket and jitter buffer.
//!
//! AES-256-CBC over the RTP payload only; the header stays in clear so
//! reordering and reassembly keep working on the ciphertext path. The key
//! is derived from the conference secure key, the per-packet IV from the
//! sequence number and SSRC already present in the clear header, so no
//! extra bytes travel on the wire.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::transport::{Address, RtpHeader, RtpPacket, SharedSink, Sink};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CryptoError {
    #[error("empty secure key")]
    EmptyKey,
}

fn derive_key(secure_key: &str) -> [u8; 32] {
    Sha256::digest(secure_key.as_bytes()).into()
}

/// Both peers can rebuild the IV from the clear header alone.
fn packet_iv(header: &RtpHeader) -> [u8; 16] {
    let mut iv = [0u8; 16];
    iv[0..4].copy_from_slice(&header.ssrc.to_be_bytes());
    iv[4..6].copy_from_slice(&header.sequence.to_be_bytes());
    iv[6..10].copy_from_slice(&header.timestamp.to_be_bytes());
    iv[10..12].copy_from_slice(&header.sequence.to_be_bytes());
    iv[12..16].copy_from_slice(&header.ssrc.to_be_bytes());
    iv
}

/// Egress side: encrypts payloads while started, passes packets through
/// unchanged while dormant.
pub struct Encryptor {
    receiver: Mutex<Option<SharedSink>>,
    key: Mutex<Option<[u8; 32]>>,
    runned: AtomicBool,
}

impl Encryptor {
    pub fn new() -> Self {
        Self {
            receiver: Mutex::new(None),
            key: Mutex::new(None),
            runned: AtomicBool::new(false),
        }
    }

    pub fn set_receiver(&self, receiver: Option<SharedSink>) {
        *self.receiver.lock() = receiver;
    }

    pub fn start(&self, secure_key: &str) -> Result<(), CryptoError> {
        if secure_key.is_empty() {
            return Err(CryptoError::EmptyKey);
        }
        *self.key.lock() = Some(derive_key(secure_key));
        self.runned.store(true, Ordering::SeqCst);
        tracing::info!("encryptor started");
        Ok(())
    }

    pub fn stop(&self) {
        self.runned.store(false, Ordering::SeqCst);
        *self.key.lock() = None;
    }

    pub fn is_started(&self) -> bool {
        self.runned.load(Ordering::SeqCst)
    }
}

impl Default for Encryptor {
    fn default() -> Self {
        Self::new()
    }
}

impl Sink for Encryptor {
    fn send(&self, packet: &RtpPacket<'_>, addr: Option<&Address>) {
        let Some(receiver) = self.receiver.lock().clone() else {
            return;
        };

        if !self.runned.load(Ordering::SeqCst) {
            receiver.send(packet, addr);
            return;
        }

        let Some(key) = *self.key.lock() else {
            return;
        };

        let iv = packet_iv(&packet.header);
        let Ok(cipher) = Aes256CbcEnc::new_from_slices(&key, &iv) else {
            return;
        };
        let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(packet.payload);

        receiver.send(
            &RtpPacket::new(packet.header.clone(), &ciphertext),
            addr,
        );
    }
}

/// Ingress side. A failed decryption is counted, logged and dropped; late
/// packets crossing a key rotation are expected and must not interrupt
/// playback.
pub struct Decryptor {
    receiver: Mutex<Option<SharedSink>>,
    key: Mutex<Option<[u8; 32]>>,
    runned: AtomicBool,
    failures: AtomicU64,
}

impl Decryptor {
    pub fn new() -> Self {
        Self {
            receiver: Mutex::new(None),
            key: Mutex::new(None),
            runned: AtomicBool::new(false),
            failures: AtomicU64::new(0),
        }
    }

    pub fn set_receiver(&self, receiver: Option<SharedSink>) {
        *self.receiver.lock() = receiver;
    }

    pub fn start(&self, secure_key: &str) -> Result<(), CryptoError> {
        if secure_key.is_empty() {
            return Err(CryptoError::EmptyKey);
        }
        *self.key.lock() = Some(derive_key(secure_key));
        self.runned.store(true, Ordering::SeqCst);
        tracing::info!("decryptor started");
        Ok(())
    }

    pub fn stop(&self) {
        self.runned.store(false, Ordering::SeqCst);
        *self.key.lock() = None;
    }

    pub fn is_started(&self) -> bool {
        self.runned.load(Ordering::SeqCst)
    }

    pub fn failure_count(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

impl Default for Decryptor {
    fn default() -> Self {
        Self::new()
    }
}

impl Sink for Decryptor {
    fn send(&self, packet: &RtpPacket<'_>, addr: Option<&Address>) {
        let Some(receiver) = self.receiver.lock().clone() else {
            return;
        };

        if !self.runned.load(Ordering::SeqCst) {
            receiver.send(packet, addr);
            return;
        }

        let Some(key) = *self.key.lock() else {
            return;
        };

        let iv = packet_iv(&packet.header);
        let Ok(cipher) = Aes256CbcDec::new_from_slices(&key, &iv) else {
            return;
        };

        match cipher.decrypt_padded_vec_mut::<Pkcs7>(packet.payload) {
            Ok(plaintext) => {
                receiver.send(&RtpPacket::new(packet.header.clone(), &plaintext), addr);
            }
            Err(_) => {
                let total = self.failures.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::error!(
                    "dropping undecryptable packet seq {} (total failures {})",
                    packet.header.sequence,
                    total
                );
            }
        }
    }
}
