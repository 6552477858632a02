//! Loopback TCP transport.
//!
//! Operates in **non-blocking mode** once connected: `send` appends the
//! frame to an outbound buffer and writes as much as the socket accepts,
//! `poll` flushes leftovers and drains every readable byte into the frame
//! decoder. Nothing in here waits on the engine except the bounded connect.
//! A peer that stops reading is dropped once the outbound buffer would grow
//! past `MAX_PENDING_OUTBOUND`.

use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::blob::Blob;
use crate::constants::{CONNECT_TIMEOUT, MAX_PENDING_OUTBOUND, READ_CHUNK_SIZE};
use crate::error::TransportFault;

use super::framing::{encode_frame, FrameDecoder};
use super::router::InboundRouter;
use super::{PluginHandle, Transport};

/// Result of draining the socket once.
enum ReadOutcome {
    /// Everything readable was consumed.
    Drained,
    /// The peer closed the link or the socket failed.
    Closed,
    /// The byte stream cannot be decoded any more.
    Corrupted(TransportFault),
}

/// Engine transport over a loopback TCP stream.
pub struct TcpTransport {
    stream: Option<TcpStream>,
    connect_timeout: Duration,
    decoder: FrameDecoder,
    router: InboundRouter,
    /// Encoded frames the socket has not accepted yet.
    outbound: Vec<u8>,
    read_buf: Vec<u8>,
}

impl std::fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpTransport")
            .field("connected", &self.stream.is_some())
            .field("plugins", &self.router.len())
            .field("pending_out", &self.outbound.len())
            .finish_non_exhaustive()
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new(CONNECT_TIMEOUT)
    }
}

impl TcpTransport {
    /// Create a disconnected transport.
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            stream: None,
            connect_timeout,
            decoder: FrameDecoder::new(),
            router: InboundRouter::new(),
            outbound: Vec::new(),
            read_buf: vec![0u8; READ_CHUNK_SIZE],
        }
    }

    fn open(&self, host: &str, port: u16) -> Option<TcpStream> {
        let addrs = match (host, port).to_socket_addrs() {
            Ok(addrs) => addrs,
            Err(e) => {
                log::debug!("[Tcp] Cannot resolve {host}:{port}: {e}");
                return None;
            }
        };

        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.connect_timeout) {
                Ok(stream) => {
                    if let Err(e) = stream.set_nonblocking(true) {
                        log::warn!("[Tcp] Failed to make socket non-blocking: {e}");
                        return None;
                    }
                    let _ = stream.set_nodelay(true);
                    return Some(stream);
                }
                Err(e) => log::trace!("[Tcp] Connect to {addr} failed: {e}"),
            }
        }
        None
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
            log::debug!("[Tcp] Connection closed");
        }
        self.router.clear();
        self.decoder.reset();
        self.outbound.clear();
    }

    /// Write buffered frames. Returns `false` when the socket is dead.
    fn flush(&mut self) -> bool {
        let Some(stream) = self.stream.as_mut() else {
            return false;
        };
        while !self.outbound.is_empty() {
            match stream.write(&self.outbound) {
                Ok(0) => return false,
                Ok(n) => {
                    self.outbound.drain(..n);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    log::debug!("[Tcp] Write failed: {e}");
                    return false;
                }
            }
        }
        true
    }

    fn read_available(&mut self) -> ReadOutcome {
        let Some(stream) = self.stream.as_mut() else {
            return ReadOutcome::Closed;
        };
        loop {
            match stream.read(&mut self.read_buf) {
                Ok(0) => return ReadOutcome::Closed,
                Ok(n) => match self.decoder.feed(&self.read_buf[..n]) {
                    Ok(payloads) => {
                        for payload in payloads {
                            self.router.route(&payload);
                        }
                    }
                    Err(fault) => return ReadOutcome::Corrupted(fault),
                },
                Err(e) if e.kind() == ErrorKind::WouldBlock => return ReadOutcome::Drained,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    log::debug!("[Tcp] Read failed: {e}");
                    return ReadOutcome::Closed;
                }
            }
        }
    }
}

impl Transport for TcpTransport {
    fn connect(&mut self, host: &str, port: u16) -> bool {
        self.close();
        match self.open(host, port) {
            Some(stream) => {
                log::info!("[Tcp] Connected to engine at {host}:{port}");
                self.stream = Some(stream);
                true
            }
            None => false,
        }
    }

    fn disconnect(&mut self) {
        self.close();
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn poll(&mut self) -> Result<bool, TransportFault> {
        if self.stream.is_none() {
            return Ok(false);
        }
        if !self.flush() {
            self.close();
            return Ok(false);
        }
        match self.read_available() {
            ReadOutcome::Drained => Ok(true),
            ReadOutcome::Closed => {
                self.close();
                Ok(false)
            }
            ReadOutcome::Corrupted(fault) => {
                self.close();
                Err(fault)
            }
        }
    }

    fn register_plugin(&mut self, name: &str) -> Option<PluginHandle> {
        self.stream.as_ref()?;
        Some(self.router.register(name))
    }

    fn send(&mut self, blob: &Blob) -> bool {
        if self.stream.is_none() {
            return false;
        }
        let frame = encode_frame(blob.as_bytes());
        if self.outbound.len() + frame.len() > MAX_PENDING_OUTBOUND {
            log::warn!(
                "[Tcp] Engine stopped reading ({} bytes pending), dropping link",
                self.outbound.len()
            );
            self.close();
            return false;
        }
        self.outbound.extend_from_slice(&frame);
        if self.flush() {
            true
        } else {
            self.close();
            false
        }
    }

    fn receive(&mut self, handle: PluginHandle, blob: &mut Blob) -> bool {
        match self.router.pop(handle) {
            Some(message) => {
                *blob = message;
                true
            }
            None => false,
        }
    }
}
