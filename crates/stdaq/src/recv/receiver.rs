// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Batched UDP receive for one module port.
//!
//! On Linux one `recvmmsg(MSG_WAITFORONE)` call blocks until the first datagram
//! (or `SO_RCVTIMEO`) and then drains whatever else is already queued, up to
//! the batch size. Other platforms fall back to one datagram per call.
//!
//! Every datagram lands in its own fixed stride of a buffer allocated once at
//! bind time. The stride is one byte larger than the expected packet so an
//! oversized datagram shows up with a wrong length instead of being silently
//! truncated to a plausible one.

use super::packet::PacketLayout;
use super::{NetError, Result};
use crate::config::{BUFFER_UDP_RCVBUF_BYTES, BUFFER_UDP_TIMEOUT};
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::time::Duration;

/// Socket and buffer sizing for a [`PacketReceiver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiverConfig {
    /// Local address to bind (all interfaces by default)
    pub bind_ip: Ipv4Addr,
    /// Expected datagram size
    pub packet_bytes: usize,
    /// Maximum datagrams returned by one `receive_many()`
    pub batch_packets: usize,
    /// SO_RCVBUF request (the kernel may cap it at `net.core.rmem_max`)
    pub recv_buffer_bytes: usize,
    /// SO_RCVTIMEO; an idle socket yields an empty batch after this long
    pub timeout: Duration,
}

impl ReceiverConfig {
    /// One frame's worth of packets per batch for `layout`.
    #[must_use]
    pub fn for_layout(layout: &PacketLayout) -> Self {
        Self {
            packet_bytes: layout.packet_bytes,
            batch_packets: layout.packets_per_frame as usize,
            ..Self::default()
        }
    }
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        let layout = PacketLayout::jungfrau();
        Self {
            bind_ip: Ipv4Addr::UNSPECIFIED,
            packet_bytes: layout.packet_bytes,
            batch_packets: layout.packets_per_frame as usize,
            recv_buffer_bytes: BUFFER_UDP_RCVBUF_BYTES,
            timeout: BUFFER_UDP_TIMEOUT,
        }
    }
}

/// Datagrams returned by one [`PacketReceiver::receive_many`] call.
///
/// Borrows the receiver's buffer; it is overwritten by the next call.
#[derive(Debug, Clone, Copy)]
pub struct PacketBatch<'a> {
    buffer: &'a [u8],
    stride: usize,
    lens: &'a [usize],
}

impl<'a> PacketBatch<'a> {
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.lens.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lens.is_empty()
    }

    /// Datagram `index`, exactly as long as what was received.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&'a [u8]> {
        let len = *self.lens.get(index)?;
        let buffer: &'a [u8] = self.buffer;
        let start = index * self.stride;
        Some(&buffer[start..start + len])
    }

    /// Datagrams in arrival order.
    pub fn iter(&self) -> impl Iterator<Item = &'a [u8]> + 'a {
        let buffer: &'a [u8] = self.buffer;
        let lens: &'a [usize] = self.lens;
        let stride = self.stride;
        lens.iter()
            .enumerate()
            .map(move |(i, &len)| &buffer[i * stride..i * stride + len])
    }
}

/// One bound module socket plus its pre-allocated packet buffer.
pub struct PacketReceiver {
    socket: UdpSocket,
    buffer: Vec<u8>,
    stride: usize,
    batch_packets: usize,
    lens: Vec<usize>,
    #[cfg(target_os = "linux")]
    iovecs: Vec<libc::iovec>,
    #[cfg(target_os = "linux")]
    msgs: Vec<libc::mmsghdr>,
}

// SAFETY: iovecs and msgs hold raw pointers into `buffer` and `iovecs`, both
// owned by this struct and never reallocated after bind(). Moving the struct
// to another thread moves the heap owners with it.
unsafe impl Send for PacketReceiver {}

impl PacketReceiver {
    /// Create, configure and bind the socket for `port`.
    ///
    /// # Errors
    ///
    /// Returns `NetError` if the socket cannot be created, configured or bound.
    pub fn bind(port: u16, config: &ReceiverConfig) -> Result<Self> {
        if config.timeout.is_zero() {
            return Err(NetError::Configure(io::Error::new(
                io::ErrorKind::InvalidInput,
                "receive timeout must be non-zero",
            )));
        }

        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).map_err(NetError::Socket)?;

        socket
            .set_recv_buffer_size(config.recv_buffer_bytes)
            .map_err(NetError::Configure)?;
        match socket.recv_buffer_size() {
            Ok(actual) if actual < config.recv_buffer_bytes => log::warn!(
                "[UDP] port {} SO_RCVBUF capped at {} (requested {}), check net.core.rmem_max",
                port,
                actual,
                config.recv_buffer_bytes
            ),
            Ok(_) => {}
            Err(e) => log::debug!("[UDP] port {} SO_RCVBUF query failed: {}", port, e),
        }

        socket
            .set_read_timeout(Some(config.timeout))
            .map_err(NetError::Configure)?;

        let addr = SocketAddr::V4(SocketAddrV4::new(config.bind_ip, port));
        socket
            .bind(&addr.into())
            .map_err(|source| NetError::Bind { port, source })?;

        let socket: UdpSocket = socket.into();
        let batch_packets = config.batch_packets.max(1);
        let stride = config.packet_bytes + 1;

        log::debug!(
            "[UDP] bound {} packet_bytes={} batch={}",
            addr,
            config.packet_bytes,
            batch_packets
        );

        let mut receiver = Self {
            socket,
            buffer: vec![0u8; stride * batch_packets],
            stride,
            batch_packets,
            lens: Vec::with_capacity(batch_packets),
            #[cfg(target_os = "linux")]
            iovecs: Vec::new(),
            #[cfg(target_os = "linux")]
            msgs: Vec::new(),
        };
        #[cfg(target_os = "linux")]
        receiver.init_mmsg();

        Ok(receiver)
    }

    #[cfg(target_os = "linux")]
    fn init_mmsg(&mut self) {
        let base = self.buffer.as_mut_ptr();
        self.iovecs = (0..self.batch_packets)
            .map(|i| libc::iovec {
                // SAFETY: i * stride < buffer.len() for every i < batch_packets
                iov_base: unsafe { base.add(i * self.stride) } as *mut libc::c_void,
                iov_len: self.stride,
            })
            .collect();

        // SAFETY: mmsghdr is a plain C struct; all-zero is a valid empty header
        self.msgs = vec![unsafe { std::mem::zeroed::<libc::mmsghdr>() }; self.batch_packets];
        for (msg, iov) in self.msgs.iter_mut().zip(self.iovecs.iter_mut()) {
            msg.msg_hdr.msg_iov = iov;
            msg.msg_hdr.msg_iovlen = 1;
            // Source address not needed
            msg.msg_hdr.msg_name = std::ptr::null_mut();
            msg.msg_hdr.msg_namelen = 0;
        }
    }

    /// Receive up to one batch of datagrams.
    ///
    /// Blocks for at most the configured timeout waiting for the first
    /// datagram. A timeout or an interrupted call returns an empty batch.
    ///
    /// # Errors
    ///
    /// Returns `NetError::Receive` for any other socket failure.
    pub fn receive_many(&mut self) -> Result<PacketBatch<'_>> {
        self.lens.clear();

        #[cfg(target_os = "linux")]
        {
            use std::os::unix::io::AsRawFd;

            // SAFETY:
            // - msgs holds batch_packets headers, each pointing at one iovec that
            //   points at a stride-sized region of buffer
            // - buffer, iovecs and msgs are not reallocated while the call runs
            // - a null timeout leaves blocking to SO_RCVTIMEO
            let n = unsafe {
                libc::recvmmsg(
                    self.socket.as_raw_fd(),
                    self.msgs.as_mut_ptr(),
                    self.batch_packets as libc::c_uint,
                    libc::MSG_WAITFORONE as _,
                    std::ptr::null_mut(),
                )
            };

            if n < 0 {
                return Self::empty_or_error(io::Error::last_os_error()).map(|()| self.batch());
            }
            self.lens
                .extend(self.msgs[..n as usize].iter().map(|m| m.msg_len as usize));
        }

        #[cfg(not(target_os = "linux"))]
        {
            let stride = self.stride;
            match self.socket.recv(&mut self.buffer[..stride]) {
                Ok(len) => self.lens.push(len),
                Err(e) => Self::empty_or_error(e)?,
            }
        }

        Ok(self.batch())
    }

    fn empty_or_error(err: io::Error) -> Result<()> {
        match err.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted => {
                Ok(())
            }
            _ => Err(NetError::Receive(err)),
        }
    }

    #[inline]
    fn batch(&self) -> PacketBatch<'_> {
        PacketBatch {
            buffer: &self.buffer,
            stride: self.stride,
            lens: &self.lens,
        }
    }

    /// Address the socket is bound to (useful with port 0).
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket.local_addr().map_err(NetError::Socket)
    }

    /// Close the socket and release the packet buffer.
    pub fn disconnect(self) {
        if let Ok(addr) = self.socket.local_addr() {
            log::debug!("[UDP] closing {}", addr);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn loopback_config(packet_bytes: usize, batch_packets: usize) -> ReceiverConfig {
        ReceiverConfig {
            bind_ip: Ipv4Addr::LOCALHOST,
            packet_bytes,
            batch_packets,
            recv_buffer_bytes: 1 << 20,
            timeout: Duration::from_millis(20),
        }
    }

    fn sender_to(receiver: &PacketReceiver) -> UdpSocket {
        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        sender.connect(receiver.local_addr().unwrap()).unwrap();
        sender
    }

    #[test]
    fn test_timeout_returns_empty_batch() {
        let mut receiver = PacketReceiver::bind(0, &loopback_config(32, 8)).unwrap();
        let start = Instant::now();
        let batch = receiver.receive_many().unwrap();
        assert!(batch.is_empty());
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_receives_queued_datagrams_in_order() {
        let mut receiver = PacketReceiver::bind(0, &loopback_config(32, 8)).unwrap();
        let sender = sender_to(&receiver);

        for i in 0..3u8 {
            sender.send(&[i; 32]).unwrap();
        }
        std::thread::sleep(Duration::from_millis(20));

        let mut seen = Vec::new();
        let deadline = Instant::now() + Duration::from_secs(2);
        while seen.len() < 3 && Instant::now() < deadline {
            let batch = receiver.receive_many().unwrap();
            seen.extend(batch.iter().map(<[u8]>::to_vec));
        }
        assert_eq!(seen, vec![vec![0u8; 32], vec![1u8; 32], vec![2u8; 32]]);
    }

    #[test]
    fn test_oversized_datagram_keeps_wrong_length() {
        let mut receiver = PacketReceiver::bind(0, &loopback_config(16, 4)).unwrap();
        let sender = sender_to(&receiver);
        sender.send(&[9u8; 64]).unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            let batch = receiver.receive_many().unwrap();
            if let Some(raw) = batch.get(0) {
                assert_eq!(raw.len(), 17);
                break;
            }
            assert!(Instant::now() < deadline, "datagram never arrived");
        }
    }

    #[test]
    fn test_bind_conflict_is_error() {
        let first = PacketReceiver::bind(0, &loopback_config(16, 4)).unwrap();
        let port = first.local_addr().unwrap().port();
        let second = PacketReceiver::bind(port, &loopback_config(16, 4));
        assert!(matches!(second, Err(NetError::Bind { .. })));
        first.disconnect();
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let mut config = loopback_config(16, 4);
        config.timeout = Duration::ZERO;
        assert!(matches!(
            PacketReceiver::bind(0, &config),
            Err(NetError::Configure(_))
        ));
    }

    #[test]
    fn test_config_for_layout() {
        let config = ReceiverConfig::for_layout(&PacketLayout::eiger(32));
        assert_eq!(config.packet_bytes, 4144);
        assert_eq!(config.batch_packets, 128);
        assert_eq!(config.timeout, BUFFER_UDP_TIMEOUT);
    }
}
