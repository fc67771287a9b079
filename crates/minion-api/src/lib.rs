//! Shared contracts of the minion.
//!
//! This crate holds everything the broker and the module crates agree on:
//!
//! - envelopes ([`RpcRequest`], [`RpcResponse`], [`SinkMessage`])
//! - module traits ([`RpcModule`], [`SinkModule`], [`Sink`] and the probe kinds)
//! - the process-wide registries
//! - XML payload types for every module
//! - the [`MinionConfig`] model

pub mod config;
pub mod dto;
pub mod envelope;
pub mod error;
pub mod module;
pub mod registry;
pub mod xml;

pub use config::{BrokerType, Listener, MinionConfig, ParserKind};
pub use envelope::{RpcRequest, RpcResponse, SinkMessage, TracingInfo};
pub use error::{ApiError, Result};
pub use module::{
    Identified, RpcModule, ServiceCollector, ServiceDetector, ServiceMonitor, Sink, SinkModule,
};
pub use registry::{Registry, COLLECTORS, DETECTORS, MONITORS, RPC_MODULES, SINK_MODULES};
pub use xml::{Element, FromXml, ToXml};
