//! Per-connection plumbing: transport (plain or TLS), the bounded sendbuf
//! with priority-ordered backpressure, and the recvbuf ceiling.
//!
//! The tagged-owner design (`ConnectionOwner`) is grounded on the hub's
//! design note on cyclic references: probe and user never co-own a
//! connection, a single tag is mutated on handoff instead of creating a
//! second owner. The socket itself lives directly on `Connection` rather
//! than nested inside a plain/TLS enum, so the probe-to-TLS handoff is a
//! matter of attaching an adapter, not reconstructing the connection.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::SocketAddr;

use mio::net::TcpStream;
use thiserror::Error;

use crate::identity::Sid;
use crate::net::tls::{TlsAdapter, TlsState};
use crate::proto::Priority;

/// What currently owns a connection slot. Mutated, never duplicated, on
/// handoff from probe to user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionOwner {
    Probe,
    User(Sid),
    Closing,
}

struct QueuedFrame {
    priority: Priority,
    bytes: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum SendError {
    #[error("send buffer overflow")]
    Overflow,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Outcome of attempting to enqueue a frame on the sendbuf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued,
    /// Dropped without queueing; not a fatal condition for non-critical
    /// frames.
    Dropped,
    /// Could not make room even after evicting everything lower priority;
    /// the caller must disconnect with `send_buffer_overflow`.
    Overflow,
}

/// One accepted TCP connection, plain or TLS, with its own bounded send
/// and receive buffers. `tls` is `None` until the protocol probe
/// classifies the connection as a TLS ClientHello and calls
/// [`Connection::upgrade_to_tls`].
pub struct Connection {
    stream: TcpStream,
    tls: Option<Box<TlsAdapter>>,
    pub addr: SocketAddr,
    pub owner: ConnectionOwner,
    sendbuf: VecDeque<QueuedFrame>,
    sendbuf_bytes: usize,
    max_sendbuf: usize,
    sendbuf_offset: usize,
    recvbuf: Vec<u8>,
    max_recvbuf: usize,
}

impl Connection {
    pub fn new_plain(stream: TcpStream, addr: SocketAddr, max_sendbuf: usize, max_recvbuf: usize) -> Self {
        Connection {
            stream,
            tls: None,
            addr,
            owner: ConnectionOwner::Probe,
            sendbuf: VecDeque::new(),
            sendbuf_bytes: 0,
            max_sendbuf,
            sendbuf_offset: 0,
            recvbuf: Vec::new(),
            max_recvbuf,
        }
    }

    pub fn new_tls(stream: TcpStream, tls: TlsAdapter, addr: SocketAddr, max_sendbuf: usize, max_recvbuf: usize) -> Self {
        Connection {
            stream,
            tls: Some(Box::new(tls)),
            addr,
            owner: ConnectionOwner::Probe,
            sendbuf: VecDeque::new(),
            sendbuf_bytes: 0,
            max_sendbuf,
            sendbuf_offset: 0,
            recvbuf: Vec::new(),
            max_recvbuf,
        }
    }

    pub fn is_tls(&self) -> bool {
        self.tls.is_some()
    }

    /// Queues `bytes` for sending, evicting already-queued lower-priority
    /// frames first when the buffer is full. `critical` frames that still
    /// cannot be queued after eviction report [`EnqueueOutcome::Overflow`]
    /// rather than being dropped silently.
    pub fn enqueue(&mut self, bytes: Vec<u8>, priority: Priority, critical: bool) -> EnqueueOutcome {
        let needed = bytes.len();
        if needed > self.max_sendbuf {
            return if critical { EnqueueOutcome::Overflow } else { EnqueueOutcome::Dropped };
        }
        while self.sendbuf_bytes + needed > self.max_sendbuf {
            match self.evict_lowest_priority() {
                Some(freed) => self.sendbuf_bytes -= freed,
                None => break,
            }
        }
        if self.sendbuf_bytes + needed > self.max_sendbuf {
            return if critical { EnqueueOutcome::Overflow } else { EnqueueOutcome::Dropped };
        }
        self.sendbuf_bytes += needed;
        self.sendbuf.push_back(QueuedFrame { priority, bytes });
        EnqueueOutcome::Queued
    }

    fn evict_lowest_priority(&mut self) -> Option<usize> {
        let idx = self
            .sendbuf
            .iter()
            .enumerate()
            .min_by_key(|(_, f)| f.priority)
            .map(|(i, _)| i)?;
        let removed = self.sendbuf.remove(idx).expect("index just found");
        Some(removed.bytes.len())
    }

    pub fn has_pending_writes(&self) -> bool {
        !self.sendbuf.is_empty()
    }

    pub fn sendbuf_len(&self) -> usize {
        self.sendbuf_bytes
    }

    /// Drains as much of the sendbuf as the transport accepts without
    /// blocking. Returns `Ok(true)` once fully drained.
    pub fn flush(&mut self) -> io::Result<bool> {
        while let Some(front) = self.sendbuf.front() {
            let chunk = &front.bytes[self.sendbuf_offset..];
            let n = match &mut self.tls {
                None => self.stream.write(chunk),
                Some(tls) => {
                    let n = tls.send(chunk)?;
                    tls.write_tls(&mut self.stream)?;
                    Ok(n)
                },
            };
            match n {
                Ok(0) => return Ok(self.sendbuf.is_empty()),
                Ok(written) => {
                    self.sendbuf_offset += written;
                    if self.sendbuf_offset >= front.bytes.len() {
                        let drained = self.sendbuf.pop_front().expect("front just matched");
                        self.sendbuf_bytes -= drained.bytes.len();
                        self.sendbuf_offset = 0;
                    } else {
                        return Ok(false);
                    }
                },
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(e) => return Err(e),
            }
        }
        Ok(true)
    }

    /// Reads newly available bytes into the recvbuf. Returns the number of
    /// bytes read, or an overflow error if the ceiling would be exceeded.
    /// For a TLS connection still mid-handshake this also advances the
    /// handshake state (`read_tls`/`process_new_packets`) even though no
    /// application bytes land in the recvbuf yet.
    pub fn read_available(&mut self) -> Result<usize, SendError> {
        let mut total = 0;
        let mut chunk = [0u8; 4096];
        loop {
            let n = match &mut self.tls {
                None => self.stream.read(&mut chunk),
                Some(tls) => {
                    tls.read_tls(&mut self.stream)?;
                    tls.process_new_packets().map_err(|e| SendError::Io(io::Error::other(e)))?;
                    tls.recv(&mut chunk)
                },
            };
            match n {
                Ok(0) => break,
                Ok(read) => {
                    if self.recvbuf.len() + read > self.max_recvbuf {
                        return Err(SendError::Overflow);
                    }
                    self.recvbuf.extend_from_slice(&chunk[..read]);
                    total += read;
                },
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(SendError::Io(e)),
            }
        }
        Ok(total)
    }

    /// Extracts complete LF-terminated frames from the recvbuf, leaving
    /// any trailing partial frame in place.
    pub fn take_frames(&mut self) -> Vec<Vec<u8>> {
        let mut frames = Vec::new();
        loop {
            let Some(pos) = self.recvbuf.iter().position(|&b| b == b'\n') else {
                break;
            };
            let frame: Vec<u8> = self.recvbuf.drain(..=pos).collect();
            frames.push(frame);
        }
        frames
    }

    /// Extracts a single complete LF-terminated frame from the recvbuf, if
    /// one is present, leaving the rest (including any trailing partial
    /// frame) in place. Used by the hub's per-frame dispatch loop so it
    /// can re-check session state between frames from the same wakeup.
    pub fn take_one_frame(&mut self) -> Option<Vec<u8>> {
        let pos = self.recvbuf.iter().position(|&b| b == b'\n')?;
        Some(self.recvbuf.drain(..=pos).collect())
    }

    /// Looks at up to [`crate::net::probe::PROBE_PEEK_SIZE`] bytes
    /// currently buffered, without consuming them, for the protocol
    /// probe's classification pass (§4.E).
    pub fn peek_prefix(&self) -> Vec<u8> {
        let n = self.recvbuf.len().min(crate::net::probe::PROBE_PEEK_SIZE);
        self.recvbuf[..n].to_vec()
    }

    /// Removes and returns every byte currently buffered, for the
    /// probe-to-TLS handoff where the peeked ClientHello prefix must be
    /// fed into the handshake adapter instead of being treated as framed
    /// application data.
    pub fn drain_recvbuf(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.recvbuf)
    }

    pub fn plain_stream_mut(&mut self) -> Option<&mut TcpStream> {
        if self.tls.is_none() { Some(&mut self.stream) } else { None }
    }

    /// The TLS adapter driving this connection's handshake, if any — used
    /// by the hub to union its read/write interest into the I/O loop
    /// registration (§4.D).
    pub fn tls_adapter(&self) -> Option<&TlsAdapter> {
        self.tls.as_deref()
    }

    /// The underlying socket, regardless of transport — needed by the hub
    /// to re-register interest with the I/O loop, since ciphertext still
    /// flows over the same `TcpStream` for a TLS connection.
    pub fn socket_mut(&mut self) -> &mut TcpStream {
        &mut self.stream
    }

    /// Seeds the recvbuf with bytes already consumed by the protocol
    /// probe before it handed the connection off, so they are processed
    /// as the start of the session's first frame(s) rather than lost.
    /// Plaintext transports only — a TLS ClientHello's peeked bytes are
    /// fed to the handshake via [`Connection::upgrade_to_tls`] instead,
    /// since they're ciphertext, not framed application data.
    pub fn seed_recvbuf(&mut self, bytes: &[u8]) {
        self.recvbuf.extend_from_slice(bytes);
    }

    /// Looks at the bytes currently buffered without consuming them, for
    /// the protocol probe's classification pass (§4.E).
    pub fn recvbuf(&self) -> &[u8] {
        &self.recvbuf
    }

    /// Attaches a TLS handshake adapter to an until-now-plaintext
    /// connection, feeding it whatever the probe had already read as the
    /// start of the ClientHello so no bytes are lost on handoff.
    pub fn upgrade_to_tls(&mut self, mut tls: TlsAdapter) {
        if !self.recvbuf.is_empty() {
            let _ = tls.feed_peeked(&self.recvbuf);
            self.recvbuf.clear();
        }
        self.tls = Some(Box::new(tls));
    }

    /// Flushes pending TLS handshake ciphertext that isn't tied to any
    /// queued application frame (ServerHello, certificate, Finished).
    /// `flush` alone never does this, since it only drains `sendbuf`,
    /// which the handshake itself never populates.
    pub fn pump_tls_handshake(&mut self) -> io::Result<()> {
        let Some(tls) = &mut self.tls else { return Ok(()) };
        loop {
            match tls.write_tls(&mut self.stream) {
                Ok(0) => return Ok(()),
                Ok(_) => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// The TLS handshake state, if this connection has upgraded to TLS.
    pub fn tls_state(&self) -> Option<TlsState> {
        self.tls_adapter().map(|t| t.state())
    }

    pub fn alpn_protocol(&self) -> Option<&[u8]> {
        self.tls_adapter().and_then(|t| t.alpn_protocol())
    }
}
