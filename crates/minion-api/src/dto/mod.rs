//! XML payloads carried inside RPC and sink envelopes.

pub mod attribute;
pub mod collector;
pub mod detector;
pub mod dns;
pub mod echo;
pub mod identity;
pub mod ping;
pub mod poller;
pub mod snmp;
pub mod syslog;
pub mod trap;

pub use attribute::{Attribute, AttributeStyle, Attributes};
pub use collector::{
    CollectionResource, CollectionSet, CollectionStatus, CollectorRequest, CollectorResponse,
    NumericAttribute, NumericType, StringAttribute,
};
pub use detector::{DetectorRequest, DetectorResponse};
pub use dns::{DnsLookupRequest, DnsLookupResponse, QueryType};
pub use echo::{EchoRequest, EchoResponse};
pub use identity::MinionIdentityDto;
pub use ping::{PingRequest, PingResponse};
pub use poller::{PollStatus, PollStatusCode, PollerRequest, PollerResponse};
pub use snmp::{
    SnmpAgentConfig, SnmpGetRequest, SnmpMultiResponse, SnmpRequest, SnmpResponse, SnmpResult,
    SnmpValue, SnmpVersion, SnmpWalkRequest,
};
pub use syslog::{SyslogMessageDto, SyslogMessageLogDto};
pub use trap::{TrapDto, TrapIdentity, TrapLogDto};
