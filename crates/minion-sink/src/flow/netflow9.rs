//! NetFlow v9: template-driven flowsets.
//!
//! Templates are cached per exporter address and source id. Data flowsets
//! for an unknown template are skipped until the template arrives.

use std::io::Cursor;
use std::net::{IpAddr, SocketAddr};
use std::num::NonZeroUsize;

use byteorder::{BigEndian, ByteOrder, ReadBytesExt};
use lru::LruCache;
use minion_proto::{FlowMessage, NetflowVersion};
use tracing::{debug, trace};

use super::fields::{RecordBuilder, Template, TemplateField, TEMPLATE_CACHE_SIZE};
use super::FlowDecoder;
use crate::error::{truncated, Result, SinkError};

const PROTOCOL: &str = "NetFlow v9";
const HEADER_LEN: usize = 20;
const TEMPLATE_FLOWSET: u16 = 0;
const OPTIONS_TEMPLATE_FLOWSET: u16 = 1;
const MIN_DATA_FLOWSET: u16 = 256;

type TemplateKey = (IpAddr, u32, u16);

pub struct Netflow9Decoder {
    templates: LruCache<TemplateKey, Template>,
}

impl Netflow9Decoder {
    pub fn new() -> Self {
        Self {
            templates: LruCache::new(
                NonZeroUsize::new(TEMPLATE_CACHE_SIZE).unwrap_or(NonZeroUsize::MIN),
            ),
        }
    }

    pub fn template_count(&self) -> usize {
        self.templates.len()
    }

    fn read_templates(&mut self, exporter: IpAddr, source_id: u32, body: &[u8]) -> Result<()> {
        let mut cur = Cursor::new(body);
        while remaining(&cur) >= 4 {
            let id = cur.read_u16::<BigEndian>().map_err(truncated(PROTOCOL))?;
            let count = cur.read_u16::<BigEndian>().map_err(truncated(PROTOCOL))?;
            let fields = read_fields(&mut cur, usize::from(count))?;
            trace!(%exporter, source_id, template = id, fields = fields.len(), "Template");
            self.templates.put(
                (exporter, source_id, id),
                Template {
                    fields,
                    options: false,
                },
            );
        }
        Ok(())
    }

    fn read_options_templates(
        &mut self,
        exporter: IpAddr,
        source_id: u32,
        body: &[u8],
    ) -> Result<()> {
        let mut cur = Cursor::new(body);
        while remaining(&cur) >= 6 {
            let id = cur.read_u16::<BigEndian>().map_err(truncated(PROTOCOL))?;
            let scope_len = cur.read_u16::<BigEndian>().map_err(truncated(PROTOCOL))?;
            let option_len = cur.read_u16::<BigEndian>().map_err(truncated(PROTOCOL))?;
            let count = usize::from(scope_len / 4) + usize::from(option_len / 4);
            if count == 0 {
                break;
            }
            let fields = read_fields(&mut cur, count)?;
            self.templates.put(
                (exporter, source_id, id),
                Template {
                    fields,
                    options: true,
                },
            );
        }
        Ok(())
    }
}

impl Default for Netflow9Decoder {
    fn default() -> Self {
        Self::new()
    }
}

fn remaining(cur: &Cursor<&[u8]>) -> usize {
    cur.get_ref().len().saturating_sub(cur.position() as usize)
}

fn read_fields(cur: &mut Cursor<&[u8]>, count: usize) -> Result<Vec<TemplateField>> {
    let mut fields = Vec::with_capacity(count);
    for _ in 0..count {
        fields.push(TemplateField {
            id: cur.read_u16::<BigEndian>().map_err(truncated(PROTOCOL))?,
            length: cur.read_u16::<BigEndian>().map_err(truncated(PROTOCOL))?,
            enterprise: None,
        });
    }
    Ok(fields)
}

impl FlowDecoder for Netflow9Decoder {
    fn protocol(&self) -> &'static str {
        PROTOCOL
    }

    fn decode(
        &mut self,
        exporter: SocketAddr,
        datagram: &[u8],
        _received_ms: u64,
    ) -> Result<Vec<FlowMessage>> {
        let mut cur = Cursor::new(datagram);
        let version = cur.read_u16::<BigEndian>().map_err(truncated(PROTOCOL))?;
        if version != 9 {
            return Err(SinkError::decode(PROTOCOL, format!("version {version}")));
        }
        let count = cur.read_u16::<BigEndian>().map_err(truncated(PROTOCOL))?;
        let sys_uptime = cur.read_u32::<BigEndian>().map_err(truncated(PROTOCOL))?;
        let unix_secs = cur.read_u32::<BigEndian>().map_err(truncated(PROTOCOL))?;
        let sequence = cur.read_u32::<BigEndian>().map_err(truncated(PROTOCOL))?;
        let source_id = cur.read_u32::<BigEndian>().map_err(truncated(PROTOCOL))?;

        let export_ms = u64::from(unix_secs) * 1000;
        let boot = export_ms.saturating_sub(u64::from(sys_uptime));
        let ip = exporter.ip();
        let mut flows = Vec::new();
        let mut rest = &datagram[HEADER_LEN..];
        while rest.len() >= 4 {
            let id = BigEndian::read_u16(&rest[0..2]);
            let len = usize::from(BigEndian::read_u16(&rest[2..4]));
            if len < 4 || len > rest.len() {
                return Err(SinkError::decode(PROTOCOL, format!("flowset length {len}")));
            }
            let body = &rest[4..len];
            match id {
                TEMPLATE_FLOWSET => self.read_templates(ip, source_id, body)?,
                OPTIONS_TEMPLATE_FLOWSET => self.read_options_templates(ip, source_id, body)?,
                id if id >= MIN_DATA_FLOWSET => match self.templates.get(&(ip, source_id, id)) {
                    Some(template) => flows.extend(template.decode_records(
                        body,
                        || {
                            RecordBuilder::new(NetflowVersion::V9, export_ms)
                                .with_header(u64::from(sequence), u32::from(count))
                        },
                        Some(boot),
                    )),
                    None => debug!(%exporter, source_id, template = id, "No template for flowset"),
                },
                id => trace!(flowset = id, "Skipping reserved flowset"),
            }
            rest = &rest[len..];
        }
        Ok(flows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn header(count: u16) -> Vec<u8> {
        let mut p = Vec::new();
        p.extend_from_slice(&9u16.to_be_bytes());
        p.extend_from_slice(&count.to_be_bytes());
        p.extend_from_slice(&60_000u32.to_be_bytes());
        p.extend_from_slice(&1_700_000_000u32.to_be_bytes());
        p.extend_from_slice(&7u32.to_be_bytes());
        p.extend_from_slice(&1u32.to_be_bytes());
        p
    }

    fn template_flowset() -> Vec<u8> {
        // template 256: IPV4_SRC_ADDR(4) IPV4_DST_ADDR(4) IN_BYTES(4) PROTOCOL(1) FIRST_SWITCHED(4)
        let fields: [(u16, u16); 5] = [(8, 4), (12, 4), (1, 4), (4, 1), (22, 4)];
        let mut set = Vec::new();
        set.extend_from_slice(&0u16.to_be_bytes());
        set.extend_from_slice(&((8 + fields.len() * 4) as u16).to_be_bytes());
        set.extend_from_slice(&256u16.to_be_bytes());
        set.extend_from_slice(&(fields.len() as u16).to_be_bytes());
        for (id, len) in fields {
            set.extend_from_slice(&id.to_be_bytes());
            set.extend_from_slice(&len.to_be_bytes());
        }
        set
    }

    fn data_flowset() -> Vec<u8> {
        let mut record = Vec::new();
        record.extend_from_slice(&[10, 1, 1, 1]);
        record.extend_from_slice(&[10, 2, 2, 2]);
        record.extend_from_slice(&1200u32.to_be_bytes());
        record.push(17);
        record.extend_from_slice(&59_000u32.to_be_bytes());

        let mut set = Vec::new();
        set.extend_from_slice(&256u16.to_be_bytes());
        // one record (17 bytes) plus 3 bytes of padding
        set.extend_from_slice(&24u16.to_be_bytes());
        set.extend_from_slice(&record);
        set.extend_from_slice(&[0, 0, 0]);
        set
    }

    fn exporter() -> SocketAddr {
        "192.0.2.9:2055".parse().unwrap()
    }

    #[test]
    fn test_template_then_data() {
        let mut packet = header(2);
        packet.extend(template_flowset());
        packet.extend(data_flowset());

        let mut decoder = Netflow9Decoder::new();
        let flows = decoder.decode(exporter(), &packet, 0).unwrap();
        assert_eq!(decoder.template_count(), 1);
        assert_eq!(flows.len(), 1);

        let flow = &flows[0];
        assert_eq!(flow.netflow_version(), NetflowVersion::V9);
        assert_eq!(flow.src_address, "10.1.1.1");
        assert_eq!(flow.dst_address, "10.2.2.2");
        assert_eq!(flow.num_bytes, Some(1200));
        assert_eq!(flow.protocol, Some(17));
        assert_eq!(flow.ip_protocol_version, Some(4));
        assert_eq!(flow.timestamp, 1_700_000_000_000);
        assert_eq!(flow.first_switched, Some(1_700_000_000_000 - 60_000 + 59_000));
        assert_eq!(flow.flow_seq_num, Some(7));
    }

    #[test]
    fn test_data_before_template_is_skipped() {
        let mut decoder = Netflow9Decoder::new();
        let mut data_only = header(1);
        data_only.extend(data_flowset());
        assert!(decoder.decode(exporter(), &data_only, 0).unwrap().is_empty());

        let mut template_only = header(1);
        template_only.extend(template_flowset());
        decoder.decode(exporter(), &template_only, 0).unwrap();

        assert_eq!(decoder.decode(exporter(), &data_only, 0).unwrap().len(), 1);

        // templates do not leak between exporters
        let other: SocketAddr = "192.0.2.10:2055".parse().unwrap();
        assert!(decoder.decode(other, &data_only, 0).unwrap().is_empty());
    }

    #[test]
    fn test_options_data_yields_no_flows() {
        let mut packet = header(2);
        // options template 300: scope SYSTEM(2), option SAMPLING_INTERVAL(4), 2 bytes padding
        packet.extend_from_slice(&1u16.to_be_bytes());
        packet.extend_from_slice(&20u16.to_be_bytes());
        packet.extend_from_slice(&300u16.to_be_bytes());
        packet.extend_from_slice(&4u16.to_be_bytes());
        packet.extend_from_slice(&4u16.to_be_bytes());
        packet.extend_from_slice(&[0, 1, 0, 2, 0, 34, 0, 4]);
        packet.extend_from_slice(&[0, 0]);
        packet.extend_from_slice(&300u16.to_be_bytes());
        packet.extend_from_slice(&10u16.to_be_bytes());
        packet.extend_from_slice(&[0, 1, 0, 0, 0, 100]);

        let mut decoder = Netflow9Decoder::new();
        assert!(decoder.decode(exporter(), &packet, 0).unwrap().is_empty());
        assert_eq!(decoder.template_count(), 1);
    }

    #[test]
    fn test_bad_flowset_length() {
        let mut packet = header(1);
        packet.extend_from_slice(&256u16.to_be_bytes());
        packet.extend_from_slice(&400u16.to_be_bytes());
        assert!(Netflow9Decoder::new().decode(exporter(), &packet, 0).is_err());
    }
}
