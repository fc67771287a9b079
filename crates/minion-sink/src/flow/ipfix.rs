//! IPFIX (RFC 7011) messages.
//!
//! Records are parsed by `ipfixrw`. Its template store is not `Send`, so each
//! observation domain keeps its templates in a plain map that is lent to the
//! parser for one message at a time. Sets the parser should not see (options
//! templates and their data, withdrawals, data without a known template) are
//! screened out before parsing.

use std::cell::RefCell;
use std::collections::HashSet;
use std::io::Cursor;
use std::net::{IpAddr, SocketAddr};
use std::num::NonZeroUsize;
use std::rc::Rc;

use byteorder::{BigEndian, ByteOrder, ReadBytesExt};
use ipfixrw::information_elements::Formatter;
use ipfixrw::parse_ipfix_message;
use ipfixrw::parser::{DataRecordKey, DataRecordValue, FieldSpecifier};
use ipfixrw::template_store::{Template, TemplateStore};
use lru::LruCache;
use minion_proto::{FlowMessage, NetflowVersion};
use tracing::{debug, trace};

use super::fields::{RecordBuilder, TemplateField, TEMPLATE_CACHE_SIZE};
use super::FlowDecoder;
use crate::error::{truncated, Result, SinkError};

const PROTOCOL: &str = "IPFIX";
const HEADER_LEN: usize = 16;
const TEMPLATE_SET: u16 = 2;
const OPTIONS_TEMPLATE_SET: u16 = 3;
const MIN_DATA_SET: u16 = 256;
const ENTERPRISE_BIT: u16 = 0x8000;

type DomainKey = (IpAddr, u32);

/// Templates announced by one exporter observation domain.
#[derive(Default)]
struct Domain {
    templates: ahash::HashMap<u16, Template>,
    /// Options template ids. Their data sets describe the exporter, not flows.
    options: HashSet<u16>,
}

/// One record of a template or options template set.
struct Announcement {
    id: u16,
    withdrawn: bool,
}

pub struct IpfixDecoder {
    domains: LruCache<DomainKey, Domain>,
}

impl IpfixDecoder {
    pub fn new() -> Self {
        Self {
            domains: LruCache::new(
                NonZeroUsize::new(TEMPLATE_CACHE_SIZE).unwrap_or(NonZeroUsize::MIN),
            ),
        }
    }

    /// Flow templates currently known, summed over every observation domain.
    pub fn template_count(&self) -> usize {
        self.domains.iter().map(|(_, d)| d.templates.len()).sum()
    }
}

impl Default for IpfixDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Walks the records of a template set without interpreting the fields.
fn announcements(body: &[u8], options: bool) -> Result<Vec<Announcement>> {
    let mut cur = Cursor::new(body);
    let mut records = Vec::new();
    while remaining(&cur) >= 4 {
        let id = cur.read_u16::<BigEndian>().map_err(truncated(PROTOCOL))?;
        let count = cur.read_u16::<BigEndian>().map_err(truncated(PROTOCOL))?;
        if count > 0 {
            if options {
                let _scope_count = cur.read_u16::<BigEndian>().map_err(truncated(PROTOCOL))?;
            }
            for _ in 0..count {
                let raw = cur.read_u16::<BigEndian>().map_err(truncated(PROTOCOL))?;
                let _length = cur.read_u16::<BigEndian>().map_err(truncated(PROTOCOL))?;
                if raw & ENTERPRISE_BIT != 0 {
                    let _pen = cur.read_u32::<BigEndian>().map_err(truncated(PROTOCOL))?;
                }
            }
        }
        records.push(Announcement {
            id,
            withdrawn: count == 0,
        });
    }
    Ok(records)
}

fn remaining(cur: &Cursor<&[u8]>) -> usize {
    cur.get_ref().len().saturating_sub(cur.position() as usize)
}

fn field_of(spec: &FieldSpecifier) -> TemplateField {
    TemplateField {
        id: spec.information_element_identifier & !ENTERPRISE_BIT,
        length: spec.field_length,
        enterprise: spec.enterprise_number,
    }
}

/// Applies template bookkeeping the parser does not do and returns the sets
/// that should be handed to it.
fn screen<'a>(
    exporter: SocketAddr,
    domain_id: u32,
    domain: &mut Domain,
    mut rest: &'a [u8],
) -> Result<Vec<&'a [u8]>> {
    let mut kept = Vec::new();
    let mut announced = HashSet::new();
    while rest.len() >= 4 {
        let id = BigEndian::read_u16(&rest[0..2]);
        let len = usize::from(BigEndian::read_u16(&rest[2..4]));
        if len < 4 || len > rest.len() {
            return Err(SinkError::decode(PROTOCOL, format!("set length {len}")));
        }
        let set = &rest[..len];
        match id {
            TEMPLATE_SET => {
                let records = announcements(&set[4..], false)?;
                let mut withdrawal = false;
                for record in records {
                    if !record.withdrawn {
                        domain.options.remove(&record.id);
                        announced.insert(record.id);
                        trace!(%exporter, domain = domain_id, template = record.id, "Template");
                        continue;
                    }
                    withdrawal = true;
                    if record.id == TEMPLATE_SET {
                        domain.templates.clear();
                    } else {
                        domain.templates.remove(&record.id);
                        announced.remove(&record.id);
                    }
                    debug!(%exporter, domain = domain_id, template = record.id, "Template withdrawn");
                }
                if !withdrawal {
                    kept.push(set);
                }
            }
            OPTIONS_TEMPLATE_SET => {
                for record in announcements(&set[4..], true)? {
                    match (record.withdrawn, record.id) {
                        (true, OPTIONS_TEMPLATE_SET) => domain.options.clear(),
                        (true, id) => {
                            domain.options.remove(&id);
                        }
                        (false, id) => {
                            domain.templates.remove(&id);
                            announced.remove(&id);
                            domain.options.insert(id);
                        }
                    }
                }
            }
            id if id >= MIN_DATA_SET => {
                if domain.options.contains(&id) {
                    trace!(%exporter, domain = domain_id, template = id, "Skipping options data");
                } else if announced.contains(&id) || domain.templates.contains_key(&id) {
                    kept.push(set);
                } else {
                    debug!(%exporter, domain = domain_id, template = id, "No template for set");
                }
            }
            id => trace!(set = id, "Skipping reserved set"),
        }
        rest = &rest[len..];
    }
    Ok(kept)
}

impl FlowDecoder for IpfixDecoder {
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
        if version != 10 {
            return Err(SinkError::decode(PROTOCOL, format!("version {version}")));
        }
        let length = usize::from(cur.read_u16::<BigEndian>().map_err(truncated(PROTOCOL))?);
        let export_time = cur.read_u32::<BigEndian>().map_err(truncated(PROTOCOL))?;
        let sequence = cur.read_u32::<BigEndian>().map_err(truncated(PROTOCOL))?;
        let domain_id = cur.read_u32::<BigEndian>().map_err(truncated(PROTOCOL))?;
        if length < HEADER_LEN || length > datagram.len() {
            return Err(SinkError::decode(
                PROTOCOL,
                format!("message length {length} for {} bytes", datagram.len()),
            ));
        }

        let domain = self
            .domains
            .get_or_insert_mut((exporter.ip(), domain_id), Domain::default);
        let sets = screen(exporter, domain_id, domain, &datagram[HEADER_LEN..length])?;
        if sets.is_empty() {
            return Ok(Vec::new());
        }

        let body_len: usize = sets.iter().map(|s| s.len()).sum();
        let total_len = u16::try_from(HEADER_LEN + body_len)
            .map_err(|_| SinkError::decode(PROTOCOL, "message too long"))?;
        let mut message = Vec::with_capacity(HEADER_LEN + body_len);
        message.extend_from_slice(&datagram[..2]);
        message.extend_from_slice(&total_len.to_be_bytes());
        message.extend_from_slice(&datagram[4..HEADER_LEN]);
        for set in sets {
            message.extend_from_slice(set);
        }

        let store = Rc::new(RefCell::new(std::mem::take(&mut domain.templates)));
        let formatter = Rc::new(Formatter::default());
        let parsed = parse_ipfix_message(&message, Rc::clone(&store) as TemplateStore, formatter);
        domain.templates = store.take();
        let parsed = parsed.map_err(|e| SinkError::decode(PROTOCOL, e.to_string()))?;

        let export_ms = u64::from(export_time) * 1000;
        let mut flows: Vec<FlowMessage> = parsed
            .iter_data_records()
            .map(|record| {
                let mut builder = RecordBuilder::new(NetflowVersion::Ipfix, export_ms)
                    .with_header(u64::from(sequence), 0);
                for (key, value) in record.values.iter() {
                    if let (DataRecordKey::Unrecognized(spec), DataRecordValue::Bytes(bytes)) =
                        (key, value)
                    {
                        builder.apply(&field_of(spec), bytes);
                    }
                }
                builder.finish(None)
            })
            .collect();

        let total = flows.len() as u32;
        for flow in &mut flows {
            flow.num_flow_records = Some(total);
        }
        Ok(flows)
    }
}
