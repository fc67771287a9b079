//! SNMP support for the minion.
//!
//! - [`ber`]: BER primitives
//! - [`pdu`]: v1/v2c messages, PDUs and values
//! - [`trap`]: trap and inform decoding
//! - [`client`]: async get/walk session
//!
//! SNMPv3 is not supported.

pub mod ber;
pub mod client;
pub mod error;
pub mod pdu;
pub mod trap;

pub use client::SnmpSession;
pub use error::{Result, SnmpError};
pub use pdu::{Message, MessagePdu, Oid, Pdu, PduType, TrapV1Pdu, Value, VarBind, Version};
pub use trap::{decode_trap, inform_ack, ReceivedTrap};
