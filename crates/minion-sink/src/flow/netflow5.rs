//! NetFlow v5: fixed 24-byte header followed by 48-byte records.

use std::io::Cursor;
use std::net::{Ipv4Addr, SocketAddr};

use byteorder::{BigEndian, ReadBytesExt};
use minion_proto::{FlowMessage, NetflowVersion, SamplingAlgorithm};

use super::FlowDecoder;
use crate::error::{truncated, Result, SinkError};

const PROTOCOL: &str = "NetFlow v5";
const HEADER_LEN: usize = 24;
const RECORD_LEN: usize = 48;
const MAX_RECORDS: usize = 30;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Header {
    count: u16,
    sys_uptime: u32,
    unix_secs: u32,
    unix_nsecs: u32,
    flow_sequence: u32,
    engine_type: u8,
    engine_id: u8,
    sampling: u16,
}

impl Header {
    fn read(cur: &mut Cursor<&[u8]>) -> std::io::Result<Self> {
        Ok(Self {
            count: cur.read_u16::<BigEndian>()?,
            sys_uptime: cur.read_u32::<BigEndian>()?,
            unix_secs: cur.read_u32::<BigEndian>()?,
            unix_nsecs: cur.read_u32::<BigEndian>()?,
            flow_sequence: cur.read_u32::<BigEndian>()?,
            engine_type: cur.read_u8()?,
            engine_id: cur.read_u8()?,
            sampling: cur.read_u16::<BigEndian>()?,
        })
    }

    fn export_time_ms(&self) -> u64 {
        u64::from(self.unix_secs) * 1000 + u64::from(self.unix_nsecs) / 1_000_000
    }

    fn boot_time_ms(&self) -> u64 {
        self.export_time_ms()
            .saturating_sub(u64::from(self.sys_uptime))
    }

    /// Upper two bits select the mode, the lower fourteen the interval.
    fn sampling(&self) -> (SamplingAlgorithm, f64) {
        let interval = self.sampling & 0x3fff;
        let algorithm = match self.sampling >> 14 {
            1 => SamplingAlgorithm::SystematicCountBasedSampling,
            2 => SamplingAlgorithm::RandomNOutOfNSampling,
            _ => SamplingAlgorithm::Unassigned,
        };
        (algorithm, if interval == 0 { 1.0 } else { f64::from(interval) })
    }
}

#[derive(Debug, Default)]
pub struct Netflow5Decoder;

impl Netflow5Decoder {
    pub fn new() -> Self {
        Self
    }
}

impl FlowDecoder for Netflow5Decoder {
    fn protocol(&self) -> &'static str {
        PROTOCOL
    }

    fn decode(
        &mut self,
        _exporter: SocketAddr,
        datagram: &[u8],
        _received_ms: u64,
    ) -> Result<Vec<FlowMessage>> {
        let mut cur = Cursor::new(datagram);
        let version = cur.read_u16::<BigEndian>().map_err(truncated(PROTOCOL))?;
        if version != 5 {
            return Err(SinkError::decode(PROTOCOL, format!("version {version}")));
        }
        let header = Header::read(&mut cur).map_err(truncated(PROTOCOL))?;
        let count = usize::from(header.count);
        if count == 0 || count > MAX_RECORDS {
            return Err(SinkError::decode(PROTOCOL, format!("record count {count}")));
        }
        if datagram.len() < HEADER_LEN + count * RECORD_LEN {
            return Err(SinkError::decode(
                PROTOCOL,
                format!("{} bytes for {count} records", datagram.len()),
            ));
        }

        let (algorithm, interval) = header.sampling();
        let boot = header.boot_time_ms();
        let mut flows = Vec::with_capacity(count);
        for _ in 0..count {
            let mut msg = read_record(&mut cur, boot).map_err(truncated(PROTOCOL))?;
            msg.timestamp = header.export_time_ms();
            msg.flow_seq_num = Some(u64::from(header.flow_sequence));
            msg.num_flow_records = Some(u32::from(header.count));
            msg.engine_type = Some(u32::from(header.engine_type));
            msg.engine_id = Some(u32::from(header.engine_id));
            msg.sampling_interval = Some(interval);
            msg.set_sampling_algorithm(algorithm);
            flows.push(msg);
        }
        Ok(flows)
    }
}

fn read_ipv4(cur: &mut Cursor<&[u8]>) -> std::io::Result<Ipv4Addr> {
    Ok(Ipv4Addr::from(cur.read_u32::<BigEndian>()?))
}

fn read_record(cur: &mut Cursor<&[u8]>, boot: u64) -> std::io::Result<FlowMessage> {
    let src = read_ipv4(cur)?;
    let dst = read_ipv4(cur)?;
    let next_hop = read_ipv4(cur)?;
    let input = cur.read_u16::<BigEndian>()?;
    let output = cur.read_u16::<BigEndian>()?;
    let packets = cur.read_u32::<BigEndian>()?;
    let octets = cur.read_u32::<BigEndian>()?;
    let first = cur.read_u32::<BigEndian>()?;
    let last = cur.read_u32::<BigEndian>()?;
    let src_port = cur.read_u16::<BigEndian>()?;
    let dst_port = cur.read_u16::<BigEndian>()?;
    let _pad = cur.read_u8()?;
    let tcp_flags = cur.read_u8()?;
    let protocol = cur.read_u8()?;
    let tos = cur.read_u8()?;
    let src_as = cur.read_u16::<BigEndian>()?;
    let dst_as = cur.read_u16::<BigEndian>()?;
    let src_mask = cur.read_u8()?;
    let dst_mask = cur.read_u8()?;
    let _pad = cur.read_u16::<BigEndian>()?;

    let first_switched = boot + u64::from(first);
    let mut msg = FlowMessage {
        src_address: src.to_string(),
        dst_address: dst.to_string(),
        next_hop_address: next_hop.to_string(),
        input_snmp_ifindex: Some(u32::from(input)),
        output_snmp_ifindex: Some(u32::from(output)),
        num_packets: Some(u64::from(packets)),
        num_bytes: Some(u64::from(octets)),
        first_switched: Some(first_switched),
        delta_switched: Some(first_switched),
        last_switched: Some(boot + u64::from(last)),
        src_port: Some(u32::from(src_port)),
        dst_port: Some(u32::from(dst_port)),
        tcp_flags: Some(u32::from(tcp_flags)),
        protocol: Some(u32::from(protocol)),
        tos: Some(u32::from(tos)),
        src_as: Some(u64::from(src_as)),
        dst_as: Some(u64::from(dst_as)),
        src_mask_len: Some(u32::from(src_mask)),
        dst_mask_len: Some(u32::from(dst_mask)),
        ip_protocol_version: Some(4),
        ..Default::default()
    };
    msg.set_netflow_version(NetflowVersion::V5);
    Ok(msg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use minion_proto::Direction;
    use pretty_assertions::assert_eq;
    use tokio_test::assert_err;

    fn packet(count: u16, records: usize) -> Vec<u8> {
        let mut p = Vec::new();
        p.extend_from_slice(&5u16.to_be_bytes());
        p.extend_from_slice(&count.to_be_bytes());
        p.extend_from_slice(&10_000u32.to_be_bytes()); // uptime
        p.extend_from_slice(&1_700_000_000u32.to_be_bytes());
        p.extend_from_slice(&500_000_000u32.to_be_bytes());
        p.extend_from_slice(&42u32.to_be_bytes());
        p.extend_from_slice(&[1, 2]);
        p.extend_from_slice(&(0x4000u16 | 10).to_be_bytes());
        for _ in 0..records {
            p.extend_from_slice(&[10, 0, 0, 1]);
            p.extend_from_slice(&[10, 0, 0, 2]);
            p.extend_from_slice(&[10, 0, 0, 254]);
            p.extend_from_slice(&3u16.to_be_bytes());
            p.extend_from_slice(&4u16.to_be_bytes());
            p.extend_from_slice(&7u32.to_be_bytes());
            p.extend_from_slice(&1500u32.to_be_bytes());
            p.extend_from_slice(&4_000u32.to_be_bytes());
            p.extend_from_slice(&9_000u32.to_be_bytes());
            p.extend_from_slice(&51000u16.to_be_bytes());
            p.extend_from_slice(&443u16.to_be_bytes());
            p.extend_from_slice(&[0, 0x18, 6, 0]);
            p.extend_from_slice(&64512u16.to_be_bytes());
            p.extend_from_slice(&64513u16.to_be_bytes());
            p.extend_from_slice(&[24, 16, 0, 0]);
        }
        p
    }

    fn exporter() -> SocketAddr {
        "192.0.2.1:2055".parse().unwrap()
    }

    #[test]
    fn test_decode_records() {
        let flows = Netflow5Decoder::new()
            .decode(exporter(), &packet(2, 2), 0)
            .unwrap();
        assert_eq!(flows.len(), 2);

        let flow = &flows[0];
        let export = 1_700_000_000_500u64;
        let boot = export - 10_000;
        assert_eq!(flow.netflow_version(), NetflowVersion::V5);
        assert_eq!(flow.direction(), Direction::Ingress);
        assert_eq!(flow.timestamp, export);
        assert_eq!(flow.src_address, "10.0.0.1");
        assert_eq!(flow.dst_address, "10.0.0.2");
        assert_eq!(flow.next_hop_address, "10.0.0.254");
        assert_eq!(flow.num_bytes, Some(1500));
        assert_eq!(flow.num_packets, Some(7));
        assert_eq!(flow.first_switched, Some(boot + 4_000));
        assert_eq!(flow.last_switched, Some(boot + 9_000));
        assert_eq!(flow.dst_port, Some(443));
        assert_eq!(flow.protocol, Some(6));
        assert_eq!(flow.tcp_flags, Some(0x18));
        assert_eq!(flow.src_as, Some(64512));
        assert_eq!(flow.src_mask_len, Some(24));
        assert_eq!(flow.flow_seq_num, Some(42));
        assert_eq!(flow.engine_id, Some(2));
        assert_eq!(flow.sampling_interval, Some(10.0));
        assert_eq!(
            flow.sampling_algorithm(),
            SamplingAlgorithm::SystematicCountBasedSampling
        );
    }

    #[test]
    fn test_rejects_bad_packets() {
        let mut decoder = Netflow5Decoder::new();
        assert_err!(decoder.decode(exporter(), &packet(2, 1), 0));
        assert_err!(decoder.decode(exporter(), &packet(0, 0), 0));
        assert_err!(decoder.decode(exporter(), &packet(31, 31), 0));

        let mut v9 = packet(1, 1);
        v9[1] = 9;
        assert_err!(decoder.decode(exporter(), &v9, 0));
        assert_err!(decoder.decode(exporter(), &[0, 5, 0], 0));
    }
}
