//! ICMP echo.
//!
//! Uses unprivileged datagram ICMP sockets where the kernel allows them and
//! falls back to raw sockets otherwise. Replies are matched on sequence
//! number and a per-request token in the payload, since datagram sockets
//! rewrite the identifier.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use minion_api::dto::{PingRequest, PingResponse};
use minion_api::{FromXml, Identified, RpcModule, RpcRequest, RpcResponse};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, trace};

use crate::error::{Result, RpcError};
use crate::reply;

pub const PING_MODULE_ID: &str = "PING";

const ICMP_HEADER_LEN: usize = 8;
const TOKEN_LEN: usize = 8;
const ECHO_REQUEST_V4: u8 = 8;
const ECHO_REPLY_V4: u8 = 0;
const ECHO_REQUEST_V6: u8 = 128;
const ECHO_REPLY_V6: u8 = 129;

/// Internet checksum (RFC 1071).
pub(crate) fn checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut chunks = data.chunks_exact(2);
    for pair in &mut chunks {
        sum += u32::from(u16::from_be_bytes([pair[0], pair[1]]));
    }
    if let [last] = chunks.remainder() {
        sum += u32::from(*last) << 8;
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

/// Builds an echo request of `size` bytes (header included).
///
/// ICMPv6 checksums cover a pseudo-header and are filled in by the kernel.
pub(crate) fn echo_request(
    v6: bool,
    identifier: u16,
    sequence: u16,
    token: &[u8; TOKEN_LEN],
    size: usize,
) -> Vec<u8> {
    let size = size.max(ICMP_HEADER_LEN + TOKEN_LEN);
    let mut packet = vec![0u8; size];
    packet[0] = if v6 { ECHO_REQUEST_V6 } else { ECHO_REQUEST_V4 };
    packet[4..6].copy_from_slice(&identifier.to_be_bytes());
    packet[6..8].copy_from_slice(&sequence.to_be_bytes());
    packet[8..8 + TOKEN_LEN].copy_from_slice(token);
    for (i, b) in packet[ICMP_HEADER_LEN + TOKEN_LEN..].iter_mut().enumerate() {
        *b = i as u8;
    }
    if !v6 {
        let sum = checksum(&packet);
        packet[2..4].copy_from_slice(&sum.to_be_bytes());
    }
    packet
}

/// Returns true when `bytes` is the echo reply for `sequence` and `token`.
///
/// Raw IPv4 sockets deliver the IP header too; it is skipped.
pub(crate) fn is_reply(bytes: &[u8], v6: bool, sequence: u16, token: &[u8; TOKEN_LEN]) -> bool {
    let icmp = if !v6 && bytes.first().map(|b| b >> 4) == Some(4) {
        let ihl = usize::from(bytes[0] & 0x0f) * 4;
        match bytes.get(ihl..) {
            Some(rest) => rest,
            None => return false,
        }
    } else {
        bytes
    };
    if icmp.len() < ICMP_HEADER_LEN + TOKEN_LEN {
        return false;
    }
    let expected = if v6 { ECHO_REPLY_V6 } else { ECHO_REPLY_V4 };
    icmp[0] == expected
        && u16::from_be_bytes([icmp[6], icmp[7]]) == sequence
        && icmp[8..8 + TOKEN_LEN] == token[..]
}

/// An ICMP socket for one address family.
pub struct Pinger {
    socket: UdpSocket,
    v6: bool,
    identifier: u16,
}

impl Pinger {
    /// Opens a socket suitable for `address`, with the given traffic class.
    pub fn open(address: &IpAddr, dscp: u8) -> io::Result<Self> {
        let v6 = address.is_ipv6();
        let (domain, protocol) = if v6 {
            (Domain::IPV6, Protocol::ICMPV6)
        } else {
            (Domain::IPV4, Protocol::ICMPV4)
        };
        let socket = Socket::new(domain, Type::DGRAM, Some(protocol))
            .or_else(|_| Socket::new(domain, Type::RAW, Some(protocol)))?;
        socket.set_nonblocking(true)?;
        if dscp != 0 && !v6 {
            socket.set_tos(u32::from(dscp))?;
        }
        let std_socket: std::net::UdpSocket = socket.into();
        Ok(Self {
            socket: UdpSocket::from_std(std_socket)?,
            v6,
            identifier: rand::random(),
        })
    }

    /// Sends one echo request and waits up to `timeout` for its reply.
    pub async fn echo(
        &self,
        address: IpAddr,
        sequence: u16,
        size: usize,
        timeout: Duration,
    ) -> Result<Duration> {
        let token: [u8; TOKEN_LEN] = rand::random();
        let packet = echo_request(self.v6, self.identifier, sequence, &token, size);
        let started = Instant::now();
        let deadline = started + timeout;
        self.socket.send_to(&packet, SocketAddr::new(address, 0)).await?;
        trace!(%address, sequence, "Sent echo request");

        let mut buf = vec![0u8; 65_535];
        loop {
            let (n, from) = match timeout_at(deadline, self.socket.recv_from(&mut buf)).await {
                Ok(received) => received?,
                Err(_) => return Err(RpcError::Timeout(timeout)),
            };
            if from.ip() == address && is_reply(&buf[..n], self.v6, sequence, &token) {
                return Ok(started.elapsed());
            }
        }
    }
}

/// Pings `address` up to `retries + 1` times, returning the first round trip.
pub async fn ping(
    address: IpAddr,
    retries: u32,
    timeout: Duration,
    packet_size: usize,
    dscp: u8,
) -> Result<Duration> {
    let pinger = Pinger::open(&address, dscp)?;
    let mut last = RpcError::Timeout(timeout);
    for attempt in 0..=retries {
        match pinger.echo(address, attempt as u16, packet_size, timeout).await {
            Ok(rtt) => return Ok(rtt),
            Err(e @ RpcError::Timeout(_)) => {
                debug!(%address, attempt, "Echo request timed out");
                last = e;
            }
            Err(e) => return Err(e),
        }
    }
    Err(last)
}

/// The `PING` module.
#[derive(Debug, Default)]
pub struct PingRpcModule;

impl Identified for PingRpcModule {
    fn id(&self) -> &str {
        PING_MODULE_ID
    }
}

#[async_trait]
impl RpcModule for PingRpcModule {
    async fn execute(&self, request: RpcRequest) -> Option<RpcResponse> {
        let ping_request = match PingRequest::from_xml_bytes(&request.content) {
            Ok(r) => r,
            Err(e) => return reply(&request, &PingResponse::error(e.to_string())),
        };
        let body = match ping(
            ping_request.address,
            ping_request.retries,
            ping_request.timeout(),
            ping_request.packet_size,
            ping_request.dscp,
        )
        .await
        {
            Ok(rtt) => PingResponse::rtt(rtt),
            Err(e) => PingResponse::error(e.to_string()),
        };
        reply(&request, &body)
    }
}
