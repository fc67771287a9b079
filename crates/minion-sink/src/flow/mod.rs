//! Flow datagram decoders.
//!
//! Each UDP flow listener owns one decoder, so template state needs no
//! locking.

pub mod enrich;
mod fields;
pub mod ipfix;
pub mod netflow5;
pub mod netflow9;
pub mod sflow;

use std::net::SocketAddr;

use minion_api::ParserKind;
use minion_proto::FlowMessage;

use crate::error::Result;

pub use enrich::HostnameResolver;
pub use ipfix::IpfixDecoder;
pub use netflow5::Netflow5Decoder;
pub use netflow9::Netflow9Decoder;
pub use sflow::SflowDecoder;

pub trait FlowDecoder: Send {
    /// Protocol name used in logs and errors.
    fn protocol(&self) -> &'static str;

    /// Decodes one datagram from `exporter` received at `received_ms`.
    fn decode(
        &mut self,
        exporter: SocketAddr,
        datagram: &[u8],
        received_ms: u64,
    ) -> Result<Vec<FlowMessage>>;
}

/// Decoder for a flow parser kind; `None` for the non-flow kinds.
pub fn decoder_for(kind: ParserKind) -> Option<Box<dyn FlowDecoder>> {
    match kind {
        ParserKind::Netflow5Udp => Some(Box::new(Netflow5Decoder::new())),
        ParserKind::Netflow9Udp => Some(Box::new(Netflow9Decoder::new())),
        ParserKind::IpfixUdp => Some(Box::new(IpfixDecoder::new())),
        ParserKind::SflowUdp => Some(Box::new(SflowDecoder::new())),
        ParserKind::NxosGrpc | ParserKind::ForwardUdp => None,
    }
}
