//! NetFlow v9 template records, and the information-element mapping shared
//! by NetFlow v9 and IPFIX.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use byteorder::{BigEndian, ByteOrder};
use minion_proto::{Direction, FlowMessage, NetflowVersion, SamplingAlgorithm};

/// Largest number of templates remembered per listener.
pub(crate) const TEMPLATE_CACHE_SIZE: usize = 4096;

mod ie {
    pub const OCTET_DELTA_COUNT: u16 = 1;
    pub const PACKET_DELTA_COUNT: u16 = 2;
    pub const PROTOCOL: u16 = 4;
    pub const TOS: u16 = 5;
    pub const TCP_FLAGS: u16 = 6;
    pub const SRC_PORT: u16 = 7;
    pub const SRC_IPV4: u16 = 8;
    pub const SRC_MASK: u16 = 9;
    pub const INPUT_SNMP: u16 = 10;
    pub const DST_PORT: u16 = 11;
    pub const DST_IPV4: u16 = 12;
    pub const DST_MASK: u16 = 13;
    pub const OUTPUT_SNMP: u16 = 14;
    pub const NEXT_HOP_IPV4: u16 = 15;
    pub const SRC_AS: u16 = 16;
    pub const DST_AS: u16 = 17;
    pub const LAST_SWITCHED: u16 = 21;
    pub const FIRST_SWITCHED: u16 = 22;
    pub const SRC_IPV6: u16 = 27;
    pub const DST_IPV6: u16 = 28;
    pub const SRC_MASK_IPV6: u16 = 29;
    pub const DST_MASK_IPV6: u16 = 30;
    pub const SAMPLING_INTERVAL: u16 = 34;
    pub const SAMPLING_ALGORITHM: u16 = 35;
    pub const ENGINE_TYPE: u16 = 38;
    pub const ENGINE_ID: u16 = 39;
    pub const SRC_VLAN: u16 = 58;
    pub const IP_VERSION: u16 = 60;
    pub const DIRECTION: u16 = 61;
    pub const NEXT_HOP_IPV6: u16 = 62;
    pub const OCTET_TOTAL_COUNT: u16 = 85;
    pub const PACKET_TOTAL_COUNT: u16 = 86;
    pub const FLOW_START_SECONDS: u16 = 150;
    pub const FLOW_END_SECONDS: u16 = 151;
    pub const FLOW_START_MILLISECONDS: u16 = 152;
    pub const FLOW_END_MILLISECONDS: u16 = 153;
    pub const SYSTEM_INIT_TIME_MILLISECONDS: u16 = 160;
    pub const SELECTOR_ALGORITHM: u16 = 304;
    pub const SAMPLING_PACKET_INTERVAL: u16 = 305;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TemplateField {
    pub id: u16,
    pub length: u16,
    /// Private enterprise number; such fields are skipped.
    pub enterprise: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Template {
    pub fields: Vec<TemplateField>,
    /// Options templates describe exporter metadata, not flows.
    pub options: bool,
}

impl Template {
    /// Smallest record the template can describe. Shorter trailers are padding.
    pub fn min_record_len(&self) -> usize {
        self.fields.iter().map(|f| usize::from(f.length)).sum()
    }

    /// Splits one record off `buf`, returning its values and the bytes consumed.
    pub fn split_record<'a>(&self, buf: &'a [u8]) -> Option<(Vec<&'a [u8]>, usize)> {
        let mut values = Vec::with_capacity(self.fields.len());
        let mut pos = 0usize;
        for field in &self.fields {
            let len = usize::from(field.length);
            values.push(buf.get(pos..pos + len)?);
            pos += len;
        }
        Some((values, pos))
    }

    /// Decodes every data record in a set body.
    pub fn decode_records(
        &self,
        body: &[u8],
        mut builder: impl FnMut() -> RecordBuilder,
        boot_time_ms: Option<u64>,
    ) -> Vec<FlowMessage> {
        let min = self.min_record_len();
        if self.options || min == 0 {
            return Vec::new();
        }
        let mut flows = Vec::new();
        let mut rest = body;
        while rest.len() >= min {
            let Some((values, used)) = self.split_record(rest) else {
                break;
            };
            let mut record = builder();
            for (field, value) in self.fields.iter().zip(values) {
                record.apply(field, value);
            }
            flows.push(record.finish(boot_time_ms));
            rest = &rest[used..];
        }
        flows
    }
}

/// Big-endian unsigned value of up to eight bytes; longer values keep the low bytes.
pub(crate) fn unsigned(value: &[u8]) -> Option<u64> {
    match value.len() {
        0 => None,
        n if n <= 8 => Some(BigEndian::read_uint(value, n)),
        n => Some(BigEndian::read_u64(&value[n - 8..])),
    }
}

pub(crate) fn address(value: &[u8]) -> Option<IpAddr> {
    match value.len() {
        4 => Some(IpAddr::V4(Ipv4Addr::new(value[0], value[1], value[2], value[3]))),
        16 => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(value);
            Some(IpAddr::V6(Ipv6Addr::from(octets)))
        }
        _ => None,
    }
}

fn small(value: &[u8]) -> Option<u32> {
    unsigned(value).map(|v| v as u32)
}

/// Accumulates one record's fields into a [`FlowMessage`].
#[derive(Debug)]
pub(crate) struct RecordBuilder {
    msg: FlowMessage,
    version: NetflowVersion,
    first_uptime: Option<u64>,
    last_uptime: Option<u64>,
    first_abs: Option<u64>,
    last_abs: Option<u64>,
    system_init: Option<u64>,
}

impl RecordBuilder {
    /// Starts an ingress record stamped with the export time.
    pub fn new(version: NetflowVersion, export_time_ms: u64) -> Self {
        let mut msg = FlowMessage {
            timestamp: export_time_ms,
            ..Default::default()
        };
        msg.set_netflow_version(version);
        msg.set_direction(Direction::Ingress);
        Self {
            msg,
            version,
            first_uptime: None,
            last_uptime: None,
            first_abs: None,
            last_abs: None,
            system_init: None,
        }
    }

    /// Sequence number and record count from the packet header.
    pub fn with_header(mut self, sequence: u64, count: u32) -> Self {
        self.msg.flow_seq_num = Some(sequence);
        self.msg.num_flow_records = Some(count);
        self
    }

    pub fn apply(&mut self, field: &TemplateField, value: &[u8]) {
        if field.enterprise.is_some() {
            return;
        }
        let msg = &mut self.msg;
        match field.id {
            ie::OCTET_DELTA_COUNT => msg.num_bytes = unsigned(value),
            ie::OCTET_TOTAL_COUNT if msg.num_bytes.is_none() => msg.num_bytes = unsigned(value),
            ie::PACKET_DELTA_COUNT => msg.num_packets = unsigned(value),
            ie::PACKET_TOTAL_COUNT if msg.num_packets.is_none() => {
                msg.num_packets = unsigned(value)
            }
            ie::PROTOCOL => msg.protocol = small(value),
            ie::TOS => msg.tos = small(value),
            ie::TCP_FLAGS => msg.tcp_flags = small(value),
            ie::SRC_PORT => msg.src_port = small(value),
            ie::DST_PORT => msg.dst_port = small(value),
            ie::SRC_IPV4 | ie::SRC_IPV6 => {
                if let Some(ip) = address(value) {
                    msg.src_address = ip.to_string();
                    msg.ip_protocol_version.get_or_insert(ip_version(&ip));
                }
            }
            ie::DST_IPV4 | ie::DST_IPV6 => {
                if let Some(ip) = address(value) {
                    msg.dst_address = ip.to_string();
                    msg.ip_protocol_version.get_or_insert(ip_version(&ip));
                }
            }
            ie::NEXT_HOP_IPV4 | ie::NEXT_HOP_IPV6 => {
                if let Some(ip) = address(value) {
                    msg.next_hop_address = ip.to_string();
                }
            }
            ie::SRC_MASK | ie::SRC_MASK_IPV6 => msg.src_mask_len = small(value),
            ie::DST_MASK | ie::DST_MASK_IPV6 => msg.dst_mask_len = small(value),
            ie::INPUT_SNMP => msg.input_snmp_ifindex = small(value),
            ie::OUTPUT_SNMP => msg.output_snmp_ifindex = small(value),
            ie::SRC_AS => msg.src_as = unsigned(value),
            ie::DST_AS => msg.dst_as = unsigned(value),
            ie::FIRST_SWITCHED => self.first_uptime = unsigned(value),
            ie::LAST_SWITCHED => self.last_uptime = unsigned(value),
            ie::FLOW_START_SECONDS => self.first_abs = unsigned(value).map(|s| s * 1000),
            ie::FLOW_END_SECONDS => self.last_abs = unsigned(value).map(|s| s * 1000),
            ie::FLOW_START_MILLISECONDS => self.first_abs = unsigned(value),
            ie::FLOW_END_MILLISECONDS => self.last_abs = unsigned(value),
            ie::SYSTEM_INIT_TIME_MILLISECONDS => self.system_init = unsigned(value),
            ie::SAMPLING_INTERVAL | ie::SAMPLING_PACKET_INTERVAL => {
                msg.sampling_interval = unsigned(value).map(|v| v as f64)
            }
            ie::SAMPLING_ALGORITHM | ie::SELECTOR_ALGORITHM => {
                let algorithm = match (self.version, field.id, unsigned(value)) {
                    // NetFlow v9: 1 deterministic, 2 random
                    (NetflowVersion::V9, ie::SAMPLING_ALGORITHM, Some(1)) => {
                        SamplingAlgorithm::SystematicCountBasedSampling
                    }
                    (NetflowVersion::V9, ie::SAMPLING_ALGORITHM, Some(2)) => {
                        SamplingAlgorithm::RandomNOutOfNSampling
                    }
                    (_, _, Some(v)) => SamplingAlgorithm::try_from(v as i32)
                        .unwrap_or(SamplingAlgorithm::Unassigned),
                    (_, _, None) => SamplingAlgorithm::Unassigned,
                };
                msg.set_sampling_algorithm(algorithm);
            }
            ie::ENGINE_TYPE => msg.engine_type = small(value),
            ie::ENGINE_ID => msg.engine_id = small(value),
            ie::SRC_VLAN => msg.vlan = small(value),
            ie::IP_VERSION => msg.ip_protocol_version = small(value),
            ie::DIRECTION => msg.set_direction(match unsigned(value) {
                Some(0) => Direction::Ingress,
                Some(1) => Direction::Egress,
                _ => Direction::Unknown,
            }),
            _ => {}
        }
    }

    /// Resolves uptime-relative switch times against `boot_time_ms` (or the
    /// record's own system init time) and returns the message.
    pub fn finish(mut self, boot_time_ms: Option<u64>) -> FlowMessage {
        let boot = self.system_init.or(boot_time_ms);
        let first = self
            .first_abs
            .or_else(|| Some(boot? + self.first_uptime?));
        let last = self.last_abs.or_else(|| Some(boot? + self.last_uptime?));
        self.msg.first_switched = first;
        self.msg.delta_switched = first;
        self.msg.last_switched = last;
        if self.msg.sampling_interval.is_none() {
            self.msg.sampling_interval = Some(1.0);
        }
        self.msg
    }
}

pub(crate) fn ip_version(ip: &IpAddr) -> u32 {
    match ip {
        IpAddr::V4(_) => 4,
        IpAddr::V6(_) => 6,
    }
}
