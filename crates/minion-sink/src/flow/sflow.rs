//! sFlow v5 datagrams.
//!
//! Flow samples (compact and expanded) are turned into one flow per sample,
//! built from the sampled packet header or the sampled IPv4/IPv6 record and
//! completed by the extended switch, router and gateway records. Counter
//! samples are skipped.

use std::io::{Cursor, Read};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use byteorder::{BigEndian, ByteOrder, ReadBytesExt};
use minion_proto::{FlowMessage, NetflowVersion, SamplingAlgorithm};
use tracing::trace;

use super::fields::ip_version;
use super::FlowDecoder;
use crate::error::{truncated, Result, SinkError};

const PROTOCOL: &str = "sFlow";

const FLOW_SAMPLE: u32 = 1;
const EXPANDED_FLOW_SAMPLE: u32 = 3;

const RAW_PACKET_HEADER: u32 = 1;
const SAMPLED_IPV4: u32 = 3;
const SAMPLED_IPV6: u32 = 4;
const EXTENDED_SWITCH: u32 = 1001;
const EXTENDED_ROUTER: u32 = 1002;
const EXTENDED_GATEWAY: u32 = 1003;

const HEADER_ETHERNET: u32 = 1;
const HEADER_IPV4: u32 = 11;
const HEADER_IPV6: u32 = 12;

const ETHERTYPE_IPV4: u16 = 0x0800;
const ETHERTYPE_IPV6: u16 = 0x86dd;
const ETHERTYPE_VLAN: u16 = 0x8100;

const IPPROTO_TCP: u8 = 6;
const IPPROTO_UDP: u8 = 17;

type Reader<'a> = Cursor<&'a [u8]>;

#[derive(Debug, Default)]
pub struct SflowDecoder;

impl SflowDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl FlowDecoder for SflowDecoder {
    fn protocol(&self) -> &'static str {
        PROTOCOL
    }

    fn decode(
        &mut self,
        _exporter: SocketAddr,
        datagram: &[u8],
        received_ms: u64,
    ) -> Result<Vec<FlowMessage>> {
        let mut cur = Cursor::new(datagram);
        let version = cur.read_u32::<BigEndian>().map_err(truncated(PROTOCOL))?;
        if version != 5 {
            return Err(SinkError::decode(PROTOCOL, format!("version {version}")));
        }
        let _agent = read_address(&mut cur)?;
        let _sub_agent = cur.read_u32::<BigEndian>().map_err(truncated(PROTOCOL))?;
        let sequence = cur.read_u32::<BigEndian>().map_err(truncated(PROTOCOL))?;
        let _uptime = cur.read_u32::<BigEndian>().map_err(truncated(PROTOCOL))?;
        let samples = cur.read_u32::<BigEndian>().map_err(truncated(PROTOCOL))?;

        let mut flows = Vec::new();
        for _ in 0..samples {
            let format = cur.read_u32::<BigEndian>().map_err(truncated(PROTOCOL))?;
            let body = read_opaque(&mut cur)?;
            // enterprise 0 only
            let sample = match format {
                FLOW_SAMPLE => Some(read_flow_sample(body, false)?),
                EXPANDED_FLOW_SAMPLE => Some(read_flow_sample(body, true)?),
                other => {
                    trace!(format = other, "Skipping sFlow sample");
                    None
                }
            };
            if let Some(mut msg) = sample {
                msg.timestamp = received_ms;
                msg.first_switched = Some(received_ms);
                msg.delta_switched = Some(received_ms);
                msg.last_switched = Some(received_ms);
                msg.flow_seq_num = Some(u64::from(sequence));
                msg.num_flow_records = Some(samples);
                flows.push(msg);
            }
        }
        Ok(flows)
    }
}

/// Length-prefixed opaque data, padded to four bytes.
fn read_opaque<'a>(cur: &mut Reader<'a>) -> Result<&'a [u8]> {
    let len = cur.read_u32::<BigEndian>().map_err(truncated(PROTOCOL))? as usize;
    let start = cur.position() as usize;
    let data = *cur.get_ref();
    let end = start
        .checked_add(len)
        .filter(|end| *end <= data.len())
        .ok_or_else(|| SinkError::decode(PROTOCOL, format!("opaque length {len}")))?;
    let padded = (end + 3) & !3;
    cur.set_position(padded.min(data.len()) as u64);
    Ok(&data[start..end])
}

fn read_address(cur: &mut Reader<'_>) -> Result<Option<IpAddr>> {
    let kind = cur.read_u32::<BigEndian>().map_err(truncated(PROTOCOL))?;
    match kind {
        1 => Ok(Some(IpAddr::V4(Ipv4Addr::from(
            cur.read_u32::<BigEndian>().map_err(truncated(PROTOCOL))?,
        )))),
        2 => {
            let mut octets = [0u8; 16];
            cur.read_exact(&mut octets).map_err(truncated(PROTOCOL))?;
            Ok(Some(IpAddr::V6(Ipv6Addr::from(octets))))
        }
        _ => Ok(None),
    }
}

fn word(cur: &mut Reader<'_>) -> Result<u32> {
    cur.read_u32::<BigEndian>().map_err(truncated(PROTOCOL))
}

fn read_flow_sample(body: &[u8], expanded: bool) -> Result<FlowMessage> {
    let mut cur = Cursor::new(body);
    let _sequence = word(&mut cur)?;
    if expanded {
        let _source_type = word(&mut cur)?;
        let _source_index = word(&mut cur)?;
    } else {
        let _source_id = word(&mut cur)?;
    }
    let sampling_rate = word(&mut cur)?;
    let _sample_pool = word(&mut cur)?;
    let _drops = word(&mut cur)?;
    let (input, output) = if expanded {
        let _input_format = word(&mut cur)?;
        let input = word(&mut cur)?;
        let _output_format = word(&mut cur)?;
        (input, word(&mut cur)?)
    } else {
        // top two bits carry the format
        (word(&mut cur)? & 0x3fff_ffff, word(&mut cur)? & 0x3fff_ffff)
    };
    let records = word(&mut cur)?;

    let mut msg = FlowMessage {
        input_snmp_ifindex: Some(input),
        output_snmp_ifindex: Some(output),
        num_packets: Some(1),
        sampling_interval: Some(f64::from(sampling_rate)),
        ..Default::default()
    };
    msg.set_netflow_version(NetflowVersion::Sflow);
    msg.set_sampling_algorithm(SamplingAlgorithm::RandomNOutOfNSampling);

    for _ in 0..records {
        let format = word(&mut cur)?;
        let data = read_opaque(&mut cur)?;
        apply_record(&mut msg, format, data).map_err(truncated(PROTOCOL))?;
    }
    Ok(msg)
}

fn apply_record(msg: &mut FlowMessage, format: u32, data: &[u8]) -> std::io::Result<()> {
    let mut cur = Cursor::new(data);
    match format {
        RAW_PACKET_HEADER => {
            let protocol = cur.read_u32::<BigEndian>()?;
            let frame_length = cur.read_u32::<BigEndian>()?;
            let _stripped = cur.read_u32::<BigEndian>()?;
            let header_len = cur.read_u32::<BigEndian>()? as usize;
            let start = cur.position() as usize;
            let header = data.get(start..start + header_len).unwrap_or(&data[start..]);
            msg.num_bytes = Some(u64::from(frame_length));
            match protocol {
                HEADER_ETHERNET => parse_ethernet(msg, header),
                HEADER_IPV4 => parse_ipv4(msg, header),
                HEADER_IPV6 => parse_ipv6(msg, header),
                _ => {}
            }
        }
        SAMPLED_IPV4 => {
            let length = cur.read_u32::<BigEndian>()?;
            let protocol = cur.read_u32::<BigEndian>()?;
            let src = Ipv4Addr::from(cur.read_u32::<BigEndian>()?);
            let dst = Ipv4Addr::from(cur.read_u32::<BigEndian>()?);
            set_sampled(msg, length, protocol, IpAddr::V4(src), IpAddr::V4(dst), &mut cur)?;
        }
        SAMPLED_IPV6 => {
            let length = cur.read_u32::<BigEndian>()?;
            let protocol = cur.read_u32::<BigEndian>()?;
            let mut src = [0u8; 16];
            let mut dst = [0u8; 16];
            cur.read_exact(&mut src)?;
            cur.read_exact(&mut dst)?;
            set_sampled(
                msg,
                length,
                protocol,
                IpAddr::V6(Ipv6Addr::from(src)),
                IpAddr::V6(Ipv6Addr::from(dst)),
                &mut cur,
            )?;
        }
        EXTENDED_SWITCH => {
            msg.vlan = Some(cur.read_u32::<BigEndian>()?);
        }
        EXTENDED_ROUTER => {
            if let Ok(Some(next_hop)) = read_address(&mut cur) {
                msg.next_hop_address = next_hop.to_string();
            }
            msg.src_mask_len = Some(cur.read_u32::<BigEndian>()?);
            msg.dst_mask_len = Some(cur.read_u32::<BigEndian>()?);
        }
        EXTENDED_GATEWAY => {
            if let Ok(Some(next_hop)) = read_address(&mut cur) {
                msg.next_hop_address = next_hop.to_string();
            }
            let _router_as = cur.read_u32::<BigEndian>()?;
            msg.src_as = Some(u64::from(cur.read_u32::<BigEndian>()?));
            let _src_peer_as = cur.read_u32::<BigEndian>()?;
            let segments = cur.read_u32::<BigEndian>()?;
            for _ in 0..segments {
                let _kind = cur.read_u32::<BigEndian>()?;
                let count = cur.read_u32::<BigEndian>()?;
                for _ in 0..count {
                    msg.dst_as = Some(u64::from(cur.read_u32::<BigEndian>()?));
                }
            }
        }
        other => trace!(format = other, "Skipping sFlow record"),
    }
    Ok(())
}

fn set_sampled(
    msg: &mut FlowMessage,
    length: u32,
    protocol: u32,
    src: IpAddr,
    dst: IpAddr,
    cur: &mut Reader<'_>,
) -> std::io::Result<()> {
    msg.num_bytes = Some(u64::from(length));
    msg.protocol = Some(protocol);
    msg.ip_protocol_version = Some(ip_version(&src));
    msg.src_address = src.to_string();
    msg.dst_address = dst.to_string();
    msg.src_port = Some(cur.read_u32::<BigEndian>()?);
    msg.dst_port = Some(cur.read_u32::<BigEndian>()?);
    msg.tcp_flags = Some(cur.read_u32::<BigEndian>()?);
    msg.tos = Some(cur.read_u32::<BigEndian>()?);
    Ok(())
}

fn parse_ethernet(msg: &mut FlowMessage, frame: &[u8]) {
    if frame.len() < 14 {
        return;
    }
    let mut ethertype = BigEndian::read_u16(&frame[12..14]);
    let mut offset = 14;
    if ethertype == ETHERTYPE_VLAN && frame.len() >= 18 {
        msg.vlan = Some(u32::from(BigEndian::read_u16(&frame[14..16]) & 0x0fff));
        ethertype = BigEndian::read_u16(&frame[16..18]);
        offset = 18;
    }
    match ethertype {
        ETHERTYPE_IPV4 => parse_ipv4(msg, &frame[offset..]),
        ETHERTYPE_IPV6 => parse_ipv6(msg, &frame[offset..]),
        _ => {}
    }
}

fn parse_ipv4(msg: &mut FlowMessage, packet: &[u8]) {
    if packet.len() < 20 || packet[0] >> 4 != 4 {
        return;
    }
    let ihl = usize::from(packet[0] & 0x0f) * 4;
    let protocol = packet[9];
    msg.ip_protocol_version = Some(4);
    msg.tos = Some(u32::from(packet[1]));
    msg.protocol = Some(u32::from(protocol));
    msg.src_address = Ipv4Addr::new(packet[12], packet[13], packet[14], packet[15]).to_string();
    msg.dst_address = Ipv4Addr::new(packet[16], packet[17], packet[18], packet[19]).to_string();
    if let Some(l4) = packet.get(ihl..) {
        parse_transport(msg, protocol, l4);
    }
}

fn parse_ipv6(msg: &mut FlowMessage, packet: &[u8]) {
    if packet.len() < 40 || packet[0] >> 4 != 6 {
        return;
    }
    let mut src = [0u8; 16];
    let mut dst = [0u8; 16];
    src.copy_from_slice(&packet[8..24]);
    dst.copy_from_slice(&packet[24..40]);
    let next_header = packet[6];
    msg.ip_protocol_version = Some(6);
    msg.tos = Some(u32::from((BigEndian::read_u16(&packet[0..2]) >> 4) & 0xff));
    msg.protocol = Some(u32::from(next_header));
    msg.src_address = Ipv6Addr::from(src).to_string();
    msg.dst_address = Ipv6Addr::from(dst).to_string();
    parse_transport(msg, next_header, &packet[40..]);
}

fn parse_transport(msg: &mut FlowMessage, protocol: u8, segment: &[u8]) {
    if !matches!(protocol, IPPROTO_TCP | IPPROTO_UDP) || segment.len() < 4 {
        return;
    }
    msg.src_port = Some(u32::from(BigEndian::read_u16(&segment[0..2])));
    msg.dst_port = Some(u32::from(BigEndian::read_u16(&segment[2..4])));
    if protocol == IPPROTO_TCP && segment.len() >= 14 {
        msg.tcp_flags = Some(u32::from(segment[13]));
    }
}
