//! End-to-end source/destination half-transfer channels.
//!
//! Grounded on `examples/original_source/src/base/target_pass_e2e_specific.c`
//! (`xdd_e2e_src_send`/`xdd_e2e_dest_recv`), translated from raw
//! `sockaddr`/`send`/`recv` calls to `std::net::{TcpStream, UdpSocket}`.
//! UDP loss is a hard error: a destination that observes a sequence
//! gap aborts the transfer rather than silently tolerating drops, so
//! every byte written at the source is read at the destination
//! exactly once.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream, UdpSocket};

use crate::error::{Result, XddError};

use super::frame::{FrameHeader, HEADER_LEN};

/// One half of an E2E transfer, held by a Worker Agent for the
/// duration of a pass.
pub trait E2eChannel: Send {
    fn is_source(&self) -> bool;
    fn is_destination(&self) -> bool;
    fn send_data(&mut self, sequence_number: u64, byte_location: u64, data: &[u8]) -> Result<()>;
    fn send_eof(&mut self, sequence_number: u64) -> Result<()>;
    fn recv_into(&mut self, buf: &mut [u8]) -> Result<()>;
    fn last_recv_was_eof(&self) -> bool;
}

/// TCP source: one outbound connection per peer, round-robin — a
/// source with multiple destinations fans its writes out.
pub struct TcpSource {
    peers: Vec<TcpStream>,
    cursor: usize,
}

impl TcpSource {
    pub fn connect(addrs: &[String]) -> Result<Self> {
        let mut peers = Vec::with_capacity(addrs.len());
        for addr in addrs {
            let stream = TcpStream::connect(addr)
                .map_err(|e| XddError::E2eProtocol(format!("connect {addr} failed: {e}")))?;
            stream.set_nodelay(true).ok();
            peers.push(stream);
        }
        if peers.is_empty() {
            return Err(XddError::E2eProtocol("source declared with no peers".into()));
        }
        Ok(TcpSource { peers, cursor: 0 })
    }

    fn next_peer(&mut self) -> &mut TcpStream {
        let idx = self.cursor;
        self.cursor = (self.cursor + 1) % self.peers.len();
        &mut self.peers[idx]
    }
}

impl E2eChannel for TcpSource {
    fn is_source(&self) -> bool {
        true
    }
    fn is_destination(&self) -> bool {
        false
    }

    fn send_data(&mut self, sequence_number: u64, byte_location: u64, data: &[u8]) -> Result<()> {
        let header = FrameHeader::data(sequence_number, byte_location, data.len() as u64);
        let stream = self.next_peer();
        stream
            .write_all(&header.encode())
            .and_then(|_| stream.write_all(data))
            .map_err(|e| XddError::E2eProtocol(format!("send failed: {e}")))
    }

    fn send_eof(&mut self, sequence_number: u64) -> Result<()> {
        let header = FrameHeader::eof(sequence_number);
        for stream in self.peers.iter_mut() {
            stream
                .write_all(&header.encode())
                .map_err(|e| XddError::E2eProtocol(format!("send eof failed: {e}")))?;
        }
        Ok(())
    }

    fn recv_into(&mut self, _buf: &mut [u8]) -> Result<()> {
        Err(XddError::E2eProtocol("source channel cannot receive".into()))
    }

    fn last_recv_was_eof(&self) -> bool {
        false
    }
}

/// TCP destination: accepts exactly one inbound connection lazily, on
/// first use.
pub struct TcpDestination {
    listener: TcpListener,
    stream: Option<TcpStream>,
    eof_seen: bool,
}

impl TcpDestination {
    pub fn bind(addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .map_err(|e| XddError::E2eProtocol(format!("bind {addr} failed: {e}")))?;
        Ok(TcpDestination {
            listener,
            stream: None,
            eof_seen: false,
        })
    }

    fn stream(&mut self) -> Result<&mut TcpStream> {
        if self.stream.is_none() {
            let (stream, _peer) = self
                .listener
                .accept()
                .map_err(|e| XddError::E2eProtocol(format!("accept failed: {e}")))?;
            self.stream = Some(stream);
        }
        Ok(self.stream.as_mut().unwrap())
    }
}

impl E2eChannel for TcpDestination {
    fn is_source(&self) -> bool {
        false
    }
    fn is_destination(&self) -> bool {
        true
    }

    fn send_data(&mut self, _sequence_number: u64, _byte_location: u64, _data: &[u8]) -> Result<()> {
        Err(XddError::E2eProtocol("destination channel cannot send".into()))
    }

    fn send_eof(&mut self, _sequence_number: u64) -> Result<()> {
        Err(XddError::E2eProtocol("destination channel cannot send".into()))
    }

    fn recv_into(&mut self, buf: &mut [u8]) -> Result<()> {
        let stream = self.stream()?;
        let mut header_bytes = [0u8; HEADER_LEN];
        stream
            .read_exact(&mut header_bytes)
            .map_err(|e| XddError::E2eProtocol(format!("recv header failed: {e}")))?;
        let header = FrameHeader::decode(&header_bytes)?;
        if header.is_eof() {
            self.eof_seen = true;
            return Ok(());
        }
        self.eof_seen = false;
        let n = (header.length as usize).min(buf.len());
        stream
            .read_exact(&mut buf[..n])
            .map_err(|e| XddError::E2eProtocol(format!("recv payload failed: {e}")))
    }

    fn last_recv_was_eof(&self) -> bool {
        self.eof_seen
    }
}

/// UDP source: connectionless, single peer. UDP fan-out to multiple
/// peers is not supported, only TCP is.
pub struct UdpSource {
    socket: UdpSocket,
}

impl UdpSource {
    pub fn connect(addr: &str) -> Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0")
            .map_err(|e| XddError::E2eProtocol(format!("udp bind failed: {e}")))?;
        socket
            .connect(addr)
            .map_err(|e| XddError::E2eProtocol(format!("udp connect {addr} failed: {e}")))?;
        Ok(UdpSource { socket })
    }
}

impl E2eChannel for UdpSource {
    fn is_source(&self) -> bool {
        true
    }
    fn is_destination(&self) -> bool {
        false
    }

    fn send_data(&mut self, sequence_number: u64, byte_location: u64, data: &[u8]) -> Result<()> {
        let header = FrameHeader::data(sequence_number, byte_location, data.len() as u64);
        let mut datagram = header.encode().to_vec();
        datagram.extend_from_slice(data);
        self.socket
            .send(&datagram)
            .map_err(|e| XddError::E2eProtocol(format!("udp send failed: {e}")))?;
        Ok(())
    }

    fn send_eof(&mut self, sequence_number: u64) -> Result<()> {
        let header = FrameHeader::eof(sequence_number);
        self.socket
            .send(&header.encode())
            .map_err(|e| XddError::E2eProtocol(format!("udp send eof failed: {e}")))?;
        Ok(())
    }

    fn recv_into(&mut self, _buf: &mut [u8]) -> Result<()> {
        Err(XddError::E2eProtocol("source channel cannot receive".into()))
    }

    fn last_recv_was_eof(&self) -> bool {
        false
    }
}

/// UDP destination enforcing strict, gap-free sequence delivery.
pub struct UdpDestination {
    socket: UdpSocket,
    scratch: Vec<u8>,
    expected_sequence: u64,
    eof_seen: bool,
}

impl UdpDestination {
    pub fn bind(addr: &str, max_datagram: usize) -> Result<Self> {
        let socket = UdpSocket::bind(addr)
            .map_err(|e| XddError::E2eProtocol(format!("udp bind {addr} failed: {e}")))?;
        Ok(UdpDestination {
            socket,
            scratch: vec![0u8; HEADER_LEN + max_datagram],
            expected_sequence: 0,
            eof_seen: false,
        })
    }
}

impl E2eChannel for UdpDestination {
    fn is_source(&self) -> bool {
        false
    }
    fn is_destination(&self) -> bool {
        true
    }

    fn send_data(&mut self, _sequence_number: u64, _byte_location: u64, _data: &[u8]) -> Result<()> {
        Err(XddError::E2eProtocol("destination channel cannot send".into()))
    }

    fn send_eof(&mut self, _sequence_number: u64) -> Result<()> {
        Err(XddError::E2eProtocol("destination channel cannot send".into()))
    }

    fn recv_into(&mut self, buf: &mut [u8]) -> Result<()> {
        let n = self
            .socket
            .recv(&mut self.scratch)
            .map_err(|e| XddError::E2eProtocol(format!("udp recv failed: {e}")))?;
        let header = FrameHeader::decode(&self.scratch[..n])?;
        if header.sequence_number != self.expected_sequence {
            return Err(XddError::E2eProtocol(format!(
                "udp sequence gap: expected {}, got {} (datagram loss is not tolerated)",
                self.expected_sequence, header.sequence_number
            )));
        }
        self.expected_sequence += 1;
        if header.is_eof() {
            self.eof_seen = true;
            return Ok(());
        }
        self.eof_seen = false;
        let payload_len = (header.length as usize).min(buf.len());
        buf[..payload_len].copy_from_slice(&self.scratch[HEADER_LEN..HEADER_LEN + payload_len]);
        Ok(())
    }

    fn last_recv_was_eof(&self) -> bool {
        self.eof_seen
    }
}
